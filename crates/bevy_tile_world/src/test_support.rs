//! Stub tile server shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, mpsc};

use bevy::math::Vec2;

use crate::coords::{TileCoord, TileGeometry};
use crate::error::GenerationError;
use crate::server::{TileRenderer, TileServer};
use crate::surface::{RgbaSurface, rgb};
use crate::tile::{Tile, TilePayload};

pub struct StubRenderer;

impl TileRenderer for StubRenderer {
  fn render_image(&self, tile: &Tile) -> RgbaSurface {
    let value = tile.payload::<i32>().copied().unwrap_or_default();
    RgbaSurface::filled(2, 2, rgb(value as u8, 0, 0))
  }

  fn short_label(&self, tile: &Tile, local: Vec2) -> String {
    format!("{} @ {:.1},{:.1}", tile.coord(), local.x, local.y)
  }
}

/// Payload is `x + y`. Fails for negative X, panics for negative Y, and
/// blocks on the gate (one message per generation) when one is set.
pub struct StubServer {
  pub geometry: TileGeometry,
  pub gate: Option<Mutex<mpsc::Receiver<()>>>,
  pub generated: AtomicUsize,
}

impl StubServer {
  pub fn new() -> Self {
    Self {
      geometry: TileGeometry::new(64, 2),
      gate: None,
      generated: AtomicUsize::new(0),
    }
  }

  /// Server whose generations wait for a message on the returned sender.
  pub fn gated() -> (Self, mpsc::Sender<()>) {
    let (release, gate) = mpsc::channel();
    let mut server = Self::new();
    server.gate = Some(Mutex::new(gate));
    (server, release)
  }
}

impl TileServer for StubServer {
  fn name(&self) -> &str {
    "stub"
  }

  fn geometry(&self) -> TileGeometry {
    self.geometry
  }

  fn generate(&self, coord: TileCoord) -> Result<TilePayload, GenerationError> {
    if let Some(gate) = &self.gate {
      let _ = gate.lock().unwrap().recv();
    }
    self.generated.fetch_add(1, Ordering::SeqCst);
    if coord.x < 0 {
      return Err(GenerationError::failed("negative"));
    }
    if coord.y < 0 {
      panic!("below sea level");
    }
    Ok(Box::new(coord.x + coord.y))
  }

  fn renderer(&self) -> &dyn TileRenderer {
    &StubRenderer
  }
}
