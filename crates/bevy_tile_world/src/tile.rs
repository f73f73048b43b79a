//! Generated tiles.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::coords::TileCoord;
use crate::server::TileServer;

/// Server-specific tile content.
pub type TilePayload = Box<dyn Any + Send + Sync>;

/// Immutable result of generating one tile.
///
/// Shared between the generation cache and the grid window; it lives as long
/// as either still holds it.
pub struct Tile {
  coord: TileCoord,
  server: Arc<dyn TileServer>,
  payload: TilePayload,
}

impl Tile {
  pub fn new(coord: TileCoord, server: Arc<dyn TileServer>, payload: TilePayload) -> Self {
    Self {
      coord,
      server,
      payload,
    }
  }

  /// Top-left corner of the tile.
  #[inline]
  pub fn coord(&self) -> TileCoord {
    self.coord
  }

  /// Server that produced this tile.
  #[inline]
  pub fn server(&self) -> &Arc<dyn TileServer> {
    &self.server
  }

  /// Downcasts the payload to the server's concrete tile data.
  pub fn payload<T: 'static>(&self) -> Option<&T> {
    self.payload.downcast_ref::<T>()
  }
}

impl fmt::Debug for Tile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Tile")
      .field("coord", &self.coord)
      .field("server", &self.server.name())
      .finish_non_exhaustive()
  }
}
