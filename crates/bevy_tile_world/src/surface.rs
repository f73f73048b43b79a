//! Tile imagery.
//!
//! A [`Surface`] is a row-major 2D buffer. Renderers produce an
//! [`RgbaSurface`] per tile; the presentation layer uploads it as-is.
//!
//! Unlike world space, surfaces are stored in image order: row 0 is the
//! *top* of the tile, so a tile's top-left corner maps to element `(0, 0)`.

use std::ops::{Index, IndexMut};

/// RGBA pixel with 8 bits per channel, using sRGB color space.
pub type Rgba = palette::Srgba<u8>;

/// Surface of sRGB pixels, ready for upload as `Rgba8UnormSrgb`.
pub type RgbaSurface = Surface<Rgba>;

// `as_bytes` reinterprets pixels as 4 consecutive bytes.
const _: () = assert!(std::mem::size_of::<Rgba>() == 4);

/// Creates an opaque RGB color (alpha = 255).
#[inline]
pub const fn rgb(r: u8, g: u8, b: u8) -> Rgba {
  Rgba::new(r, g, b, 255)
}

/// A 2D buffer of elements, stored top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct Surface<T> {
  data: Box<[T]>,
  width: u32,
  height: u32,
}

impl<T: Clone + Default> Surface<T> {
  /// Creates a surface filled with the default value.
  pub fn new(width: u32, height: u32) -> Self {
    Self::filled(width, height, T::default())
  }
}

impl<T: Clone> Surface<T> {
  /// Creates a surface filled with `value`.
  pub fn filled(width: u32, height: u32, value: T) -> Self {
    let len = (width as usize) * (height as usize);
    Self {
      data: vec![value; len].into_boxed_slice(),
      width,
      height,
    }
  }

  /// Fills the surface with `value`.
  pub fn fill(&mut self, value: T) {
    self.data.fill(value);
  }
}

impl<T> Surface<T> {
  /// Builds a surface by evaluating `f(x, y)` for every element.
  pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
    let mut data = Vec::with_capacity((width as usize) * (height as usize));
    for y in 0..height {
      for x in 0..width {
        data.push(f(x, y));
      }
    }
    Self {
      data: data.into_boxed_slice(),
      width,
      height,
    }
  }

  #[inline]
  pub fn width(&self) -> u32 {
    self.width
  }

  #[inline]
  pub fn height(&self) -> u32 {
    self.height
  }

  #[inline]
  fn index_of(&self, x: u32, y: u32) -> Option<usize> {
    (x < self.width && y < self.height)
      .then(|| (y as usize) * (self.width as usize) + (x as usize))
  }

  /// Returns the element at (x, y), or `None` if out of bounds.
  #[inline]
  pub fn get(&self, x: u32, y: u32) -> Option<&T> {
    self.index_of(x, y).map(|i| &self.data[i])
  }

  /// Sets the element at (x, y). Returns `false` if out of bounds.
  #[inline]
  pub fn set(&mut self, x: u32, y: u32, value: T) -> bool {
    match self.index_of(x, y) {
      Some(i) => {
        self.data[i] = value;
        true
      }
      None => false,
    }
  }

  #[inline]
  pub fn as_slice(&self) -> &[T] {
    &self.data
  }
}

impl RgbaSurface {
  /// Returns the pixels as tightly packed RGBA bytes.
  pub fn as_bytes(&self) -> &[u8] {
    let ptr = self.data.as_ptr() as *const u8;
    let len = self.data.len() * std::mem::size_of::<Rgba>();
    // SAFETY: Srgba<u8> is repr(C) over four u8 components, no padding.
    unsafe { std::slice::from_raw_parts(ptr, len) }
  }
}

impl<T> Index<(u32, u32)> for Surface<T> {
  type Output = T;

  #[inline]
  fn index(&self, (x, y): (u32, u32)) -> &Self::Output {
    &self.data[(y as usize) * (self.width as usize) + (x as usize)]
  }
}

impl<T> IndexMut<(u32, u32)> for Surface<T> {
  #[inline]
  fn index_mut(&mut self, (x, y): (u32, u32)) -> &mut Self::Output {
    &mut self.data[(y as usize) * (self.width as usize) + (x as usize)]
  }
}
