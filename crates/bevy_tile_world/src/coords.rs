//! Coordinate types for the tile plane.
//!
//! World space is Y+ up. A tile is identified by its top-left corner, which
//! is the corner with the *highest* Y value:
//! - [`TileCoord`]: tile corner, aligned to the tile side length (i32)
//! - [`TileGeometry`]: side length and sample resolution of a tile server
//! - [`WorldRect`]: axis-aligned world rectangle described by its top-left
//!   corner and a size that extends right and down

use bevy::math::{IVec2, Vec2};

/// Multiply by this to switch between Y+ up world space and Y+ down image
/// space.
pub const FLIP_Y: Vec2 = Vec2::new(1.0, -1.0);

/// World-space position of a tile's top-left corner.
///
/// Always a multiple of the producing server's tile length on both axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
  pub x: i32,
  pub y: i32,
}

impl TileCoord {
  /// Creates a new tile coordinate.
  pub const fn new(x: i32, y: i32) -> Self {
    Self { x, y }
  }

  /// Returns the corner as a world-space vector.
  #[inline]
  pub fn as_vec2(self) -> Vec2 {
    Vec2::new(self.x as f32, self.y as f32)
  }

  /// Corner of the `tile_length`-sized tile containing `world`.
  ///
  /// Floors on X and ceils on Y, since the top-left corner of a tile has the
  /// largest Y value in its span.
  pub fn containing(world: Vec2, tile_length: i32) -> Self {
    let length = tile_length as f32;
    Self::new(
      (world.x / length).floor() as i32 * tile_length,
      (world.y / length).ceil() as i32 * tile_length,
    )
  }

  /// Returns the coordinate of the neighbouring tile `steps` tiles away.
  ///
  /// Positive `steps.y` moves *up* in world space.
  #[inline]
  pub fn offset(self, steps: IVec2, tile_length: i32) -> Self {
    Self::new(
      self.x + steps.x * tile_length,
      self.y + steps.y * tile_length,
    )
  }

  /// Chequerboard parity of this tile in units of `tile_length`.
  pub fn is_odd(self, tile_length: i32) -> bool {
    ((self.x + self.y) / tile_length) & 1 == 1
  }
}

impl From<TileCoord> for IVec2 {
  fn from(coord: TileCoord) -> Self {
    IVec2::new(coord.x, coord.y)
  }
}

impl std::fmt::Display for TileCoord {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "[{}, {}]", self.x, self.y)
  }
}

/// Size information a tile server reports about its tiles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileGeometry {
  /// Width/height of a tile in world units.
  pub tile_length: i32,
  /// Width/height of the tile's sample data (pixels of the rendered image).
  pub resolution: i32,
}

impl TileGeometry {
  /// Creates a new geometry.
  pub const fn new(tile_length: i32, resolution: i32) -> Self {
    Self {
      tile_length,
      resolution,
    }
  }

  /// World units covered by one sample. `tile_length / resolution`.
  #[inline]
  pub fn scale(&self) -> f32 {
    self.tile_length as f32 / self.resolution as f32
  }

  /// Returns the coordinate of the tile that contains `world`.
  pub fn tile_containing(&self, world: Vec2) -> TileCoord {
    TileCoord::containing(world, self.tile_length)
  }
}

/// World-space rectangle anchored at its top-left corner.
///
/// `size` extends right (+X) and down (-Y) from `top_left`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldRect {
  pub top_left: Vec2,
  pub size: Vec2,
}

impl WorldRect {
  /// Creates a new world rectangle.
  pub const fn new(top_left: Vec2, size: Vec2) -> Self {
    Self { top_left, size }
  }

  #[inline]
  pub fn left(&self) -> f32 {
    self.top_left.x
  }

  #[inline]
  pub fn right(&self) -> f32 {
    self.top_left.x + self.size.x
  }

  #[inline]
  pub fn top(&self) -> f32 {
    self.top_left.y
  }

  #[inline]
  pub fn bottom(&self) -> f32 {
    self.top_left.y - self.size.y
  }

  /// Grows the rectangle by `amount` on every side.
  pub fn expand(&self, amount: Vec2) -> WorldRect {
    WorldRect {
      top_left: Vec2::new(self.top_left.x - amount.x, self.top_left.y + amount.y),
      size: self.size + amount * 2.0,
    }
  }

  /// Returns true if the rectangles overlap or share an edge.
  pub fn touches(&self, other: &WorldRect) -> bool {
    self.left() <= other.right()
      && other.left() <= self.right()
      && self.bottom() <= other.top()
      && other.bottom() <= self.top()
  }

  /// Returns true if `pos` lies inside `[left, right) × (bottom, top]`.
  pub fn contains(&self, pos: Vec2) -> bool {
    pos.x >= self.left() && pos.x < self.right() && pos.y <= self.top() && pos.y > self.bottom()
  }
}
