//! Built-in tile server drawing a seeded colour per tile.
//!
//! Useful for checking streaming without a real world generator: every tile
//! gets a flat colour hashed from its coordinate and the world seed, with an
//! optional darker grid line along its top and left edges.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bevy::math::Vec2;

use crate::coords::{TileCoord, TileGeometry};
use crate::error::{GenerationError, SettingError};
use crate::server::{TileRenderer, TileServer};
use crate::settings::{SettingDescriptor, SettingKind, SettingValue};
use crate::surface::{Rgba, RgbaSurface, rgb};
use crate::tile::{Tile, TilePayload};

const SETTINGS: &[SettingDescriptor] = &[
  SettingDescriptor {
    key: "show_grid",
    description: "Outline each tile",
    kind: SettingKind::Menu,
    rerender_on_change: true,
  },
  SettingDescriptor {
    key: "brightness",
    description: "Colour multiplier in [0, 2]",
    kind: SettingKind::Console,
    rerender_on_change: true,
  },
];

/// Payload of a test pattern tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PatternTile {
  pub color: Rgba,
}

pub struct TestPatternServer {
  seed: u64,
  show_grid: AtomicBool,
  /// `f64` bits.
  brightness: AtomicU64,
}

impl TestPatternServer {
  pub const NAME: &'static str = "Test pattern";
  pub const GEOMETRY: TileGeometry = TileGeometry::new(64, 16);

  pub fn new(seed: u64) -> Self {
    Self {
      seed,
      show_grid: AtomicBool::new(true),
      brightness: AtomicU64::new(1.0_f64.to_bits()),
    }
  }

  pub fn show_grid(&self) -> bool {
    self.show_grid.load(Ordering::Relaxed)
  }

  pub fn brightness(&self) -> f64 {
    f64::from_bits(self.brightness.load(Ordering::Relaxed))
  }

  /// Colour of the tile at `coord` at the current brightness.
  pub fn color_at(&self, coord: TileCoord) -> Rgba {
    let h = mix64(
      (coord.x as u64) ^ (coord.y as u64).rotate_left(21) ^ self.seed.rotate_left(42),
    );
    let brightness = self.brightness();
    let channel = |shift: u32| {
      let base = 64.0 + ((h >> shift) & 0x7f) as f64;
      (base * brightness).round().clamp(0.0, 255.0) as u8
    };
    rgb(channel(0), channel(16), channel(32))
  }
}

#[inline]
fn mix64(mut h: u64) -> u64 {
  h = h.wrapping_mul(0x517c_c1b7_2722_0a95);
  h ^= h >> 32;
  h = h.wrapping_mul(0x517c_c1b7_2722_0a95);
  h ^= h >> 32;
  h
}

fn darken(color: Rgba) -> Rgba {
  rgb(color.red / 2, color.green / 2, color.blue / 2)
}

impl TileServer for TestPatternServer {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn geometry(&self) -> TileGeometry {
    Self::GEOMETRY
  }

  fn generate(&self, coord: TileCoord) -> Result<TilePayload, GenerationError> {
    Ok(Box::new(PatternTile {
      color: self.color_at(coord),
    }))
  }

  fn renderer(&self) -> &dyn TileRenderer {
    self
  }

  fn diagnostic_suffix(&self) -> String {
    let grid = if self.show_grid() { "-grid" } else { "" };
    format!("-b{}{grid}", self.brightness())
  }

  fn settings(&self) -> &'static [SettingDescriptor] {
    SETTINGS
  }

  fn get_setting(&self, key: &str) -> Option<SettingValue> {
    match key {
      "show_grid" => Some(SettingValue::Bool(self.show_grid())),
      "brightness" => Some(SettingValue::Float(self.brightness())),
      _ => None,
    }
  }

  fn set_setting(&self, key: &str, value: SettingValue) -> Result<(), SettingError> {
    let mismatch = |expected: &'static str| SettingError::TypeMismatch {
      key: key.to_string(),
      expected,
    };
    match key {
      "show_grid" => {
        let show = value.as_bool().ok_or_else(|| mismatch("bool"))?;
        self.show_grid.store(show, Ordering::Relaxed);
      }
      "brightness" => {
        let brightness = value.as_f64().ok_or_else(|| mismatch("float"))?;
        if !(0.0..=2.0).contains(&brightness) {
          return Err(SettingError::InvalidValue {
            key: key.to_string(),
            reason: format!("{brightness} is outside [0, 2]"),
          });
        }
        self.brightness.store(brightness.to_bits(), Ordering::Relaxed);
      }
      _ => return Err(SettingError::UnknownKey(key.to_string())),
    }
    Ok(())
  }
}

impl TileRenderer for TestPatternServer {
  fn render_image(&self, tile: &Tile) -> RgbaSurface {
    let resolution = Self::GEOMETRY.resolution as u32;
    let Some(pattern) = tile.payload::<PatternTile>() else {
      return RgbaSurface::new(resolution, resolution);
    };
    let edge = darken(pattern.color);
    let grid = self.show_grid();
    RgbaSurface::from_fn(resolution, resolution, |x, y| {
      if grid && (x == 0 || y == 0) {
        edge
      } else {
        pattern.color
      }
    })
  }

  fn short_label(&self, tile: &Tile, local: Vec2) -> String {
    format!("{} ({:.0}, {:.0})", tile.coord(), local.x.floor(), local.y.floor())
  }

  fn long_label(&self, tile: &Tile, local: Vec2) -> String {
    let short = self.short_label(tile, local);
    match tile.payload::<PatternTile>() {
      Some(p) => format!(
        "{short} #{:02x}{:02x}{:02x}",
        p.color.red, p.color.green, p.color.blue
      ),
      None => short,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  fn tile(server: &Arc<TestPatternServer>, coord: TileCoord) -> Tile {
    let payload = server.generate(coord).unwrap();
    Tile::new(coord, server.clone(), payload)
  }

  #[test]
  fn colour_depends_on_seed_and_position() {
    let a = TestPatternServer::new(1);
    let b = TestPatternServer::new(2);
    let here = TileCoord::new(64, -128);
    assert_eq!(a.color_at(here), TestPatternServer::new(1).color_at(here));
    assert_ne!(a.color_at(here), b.color_at(here));
    assert_ne!(a.color_at(here), a.color_at(TileCoord::new(128, -128)));
  }

  #[test]
  fn grid_setting_changes_rendering() {
    let server = Arc::new(TestPatternServer::new(7));
    let tile = tile(&server, TileCoord::new(0, 0));
    let color = tile.payload::<PatternTile>().unwrap().color;

    let image = server.render_image(&tile);
    assert_eq!(image.width(), 16);
    assert_eq!(image[(0, 5)], darken(color));
    assert_eq!(image[(5, 5)], color);

    server
      .set_setting("show_grid", SettingValue::Bool(false))
      .unwrap();
    assert_eq!(server.render_image(&tile)[(0, 5)], color);
    assert_eq!(server.diagnostic_suffix(), "-b1");
  }

  #[test]
  fn brightness_is_validated() {
    let server = TestPatternServer::new(0);
    assert!(matches!(
      server.set_setting("brightness", SettingValue::Float(3.0)),
      Err(SettingError::InvalidValue { .. })
    ));
    assert!(matches!(
      server.set_setting("brightness", SettingValue::Bool(true)),
      Err(SettingError::TypeMismatch { .. })
    ));
    server
      .set_setting("brightness", SettingValue::Int(0))
      .unwrap();
    assert_eq!(server.get_setting("brightness"), Some(SettingValue::Float(0.0)));
    assert_eq!(server.color_at(TileCoord::new(0, 0)), rgb(0, 0, 0));
  }

  #[test]
  fn labels_describe_sample() {
    let server = Arc::new(TestPatternServer::new(3));
    let tile = tile(&server, TileCoord::new(-64, 64));
    let short = server.short_label(&tile, Vec2::new(3.7, 9.2));
    assert_eq!(short, "[-64, 64] (3, 9)");
    assert!(server.long_label(&tile, Vec2::new(3.7, 9.2)).starts_with(&short));
  }
}
