//! Where finished tiles are displayed.

use bevy::math::Vec2;
use bevy::prelude::Resource;

use crate::deferred::TileId;
use crate::surface::RgbaSurface;

/// Receives tile imagery from the streamer.
///
/// All calls come from the consumer thread, once per tick, keyed by
/// [`TileId`].
pub trait PresentationSink {
  /// Shows a newly generated tile, initially fully transparent.
  ///
  /// `world_offset` is the tile's top-left corner in world space (Y+ up);
  /// `scale` is world units per image pixel.
  fn show(&mut self, id: TileId, image: RgbaSurface, world_offset: Vec2, scale: f32);

  /// Sets a shown tile's opacity in `[0, 1]`.
  fn set_opacity(&mut self, id: TileId, alpha: f32);

  /// Called once a tile reaches full opacity. `odd` is its chequerboard
  /// parity.
  fn fade_finished(&mut self, id: TileId, odd: bool) {
    let _ = (id, odd);
  }

  /// Removes a shown tile.
  fn remove(&mut self, id: TileId);
}

/// One presentation call, recorded for later application.
#[derive(Clone, Debug, PartialEq)]
pub enum PresentationCommand {
  Show {
    id: TileId,
    image: RgbaSurface,
    world_offset: Vec2,
    scale: f32,
  },
  Opacity {
    id: TileId,
    alpha: f32,
  },
  FadeFinished {
    id: TileId,
    odd: bool,
  },
  Remove {
    id: TileId,
  },
}

impl PresentationCommand {
  pub fn id(&self) -> TileId {
    match self {
      Self::Show { id, .. }
      | Self::Opacity { id, .. }
      | Self::FadeFinished { id, .. }
      | Self::Remove { id } => *id,
    }
  }
}

/// Sink that queues commands, drained by whoever owns the real display.
#[derive(Resource, Default, Debug)]
pub struct PresentationQueue {
  commands: Vec<PresentationCommand>,
}

impl PresentationQueue {
  pub fn drain(&mut self) -> std::vec::Drain<'_, PresentationCommand> {
    self.commands.drain(..)
  }

  pub fn commands(&self) -> &[PresentationCommand] {
    &self.commands
  }

  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }
}

impl PresentationSink for PresentationQueue {
  fn show(&mut self, id: TileId, image: RgbaSurface, world_offset: Vec2, scale: f32) {
    self.commands.push(PresentationCommand::Show {
      id,
      image,
      world_offset,
      scale,
    });
  }

  fn set_opacity(&mut self, id: TileId, alpha: f32) {
    self.commands.push(PresentationCommand::Opacity { id, alpha });
  }

  fn fade_finished(&mut self, id: TileId, odd: bool) {
    self.commands.push(PresentationCommand::FadeFinished { id, odd });
  }

  fn remove(&mut self, id: TileId) {
    self.commands.push(PresentationCommand::Remove { id });
  }
}

/// Opacity of a tile `now`, given when it completed.
///
/// Non-decreasing in `now`; exactly 1 from `completed + duration` on, and
/// immediately 1 for a zero duration.
pub fn fade_progress(now: f64, completed: f64, duration: f64) -> f32 {
  if duration <= 0.0 || now >= completed + duration {
    return 1.0;
  }
  ((now - completed) / duration).clamp(0.0, 1.0) as f32
}
