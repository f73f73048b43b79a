//! Tile server and renderer capabilities.
//!
//! A [`TileServer`] turns a tile coordinate into tile content. It is the only
//! place that knows what a tile contains; everything else sees an opaque
//! [`TilePayload`](crate::tile::TilePayload) and asks the server's
//! [`TileRenderer`] for imagery and labels.

use bevy::math::Vec2;

use crate::coords::{TileCoord, TileGeometry};
use crate::error::{GenerationError, SettingError};
use crate::settings::{SettingDescriptor, SettingValue};
use crate::surface::RgbaSurface;
use crate::tile::{Tile, TilePayload};

/// Produces tile content for coordinates of an infinite plane.
///
/// `generate` is called from worker threads, at most once per coordinate
/// while its result stays cached. Settings use interior mutability since
/// servers are shared behind `Arc`.
pub trait TileServer: Send + Sync + 'static {
  /// Human readable name, also the registry key.
  fn name(&self) -> &str;

  /// Tile side length and sample resolution.
  fn geometry(&self) -> TileGeometry;

  /// Coordinate of the tile containing `world`.
  fn tile_containing(&self, world: Vec2) -> TileCoord {
    self.geometry().tile_containing(world)
  }

  /// Generates the content of the tile whose top-left corner is `coord`.
  fn generate(&self, coord: TileCoord) -> Result<TilePayload, GenerationError>;

  /// Renderer for this server's tiles.
  fn renderer(&self) -> &dyn TileRenderer;

  /// Short text identifying the current settings, appended to screenshot
  /// file names.
  fn diagnostic_suffix(&self) -> String {
    String::new()
  }

  /// Settings this server exposes to menus and the console.
  fn settings(&self) -> &'static [SettingDescriptor] {
    &[]
  }

  /// Current value of a setting.
  fn get_setting(&self, key: &str) -> Option<SettingValue> {
    let _ = key;
    None
  }

  /// Changes a setting.
  fn set_setting(&self, key: &str, value: SettingValue) -> Result<(), SettingError> {
    let _ = value;
    Err(SettingError::UnknownKey(key.to_string()))
  }
}

/// Turns tiles into imagery and descriptions.
pub trait TileRenderer: Send + Sync {
  /// Renders the tile at its geometry's resolution, top row first.
  fn render_image(&self, tile: &Tile) -> RgbaSurface;

  /// One-line description of the sample at `local` (sample units, Y+ down
  /// from the tile's top-left corner).
  fn short_label(&self, tile: &Tile, local: Vec2) -> String;

  /// Detailed description of the sample at `local`.
  fn long_label(&self, tile: &Tile, local: Vec2) -> String {
    self.short_label(tile, local)
  }
}
