//! Tile load/unload lifecycle.
//!
//! [`TileStreamer`] ties the grid window to the generation cache and a
//! [`PresentationSink`]. Each [`TileStreamer::tick`], on the consumer
//! thread:
//!
//! 1. recompute the grid if the viewport changed (rate limited);
//! 2. drain tiles that finished on worker threads and show them;
//! 3. advance fade-ins.
//!
//! Workers never touch the grid or the sink. A finished tile is rendered on
//! the worker that completed it and handed to the consumer through a
//! channel.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use bevy::log::{error, info, warn};
use bevy::math::Vec2;

use crate::cache::{LeastRecentlyUsed, TileCache};
use crate::clock::SharedClock;
use crate::config::TileWorldConfig;
use crate::coords::{FLIP_Y, TileCoord};
use crate::deferred::{DeferredTile, TileId};
use crate::error::{ConfigError, SettingError, panic_message};
use crate::presentation::{PresentationSink, fade_progress};
use crate::server::TileServer;
use crate::settings::{SettingValue, find_setting};
use crate::surface::RgbaSurface;
use crate::window::{GridChange, GridSlot, SlotSource, TileWindow, Viewport};
use crate::worker::Executor;

impl GridSlot for Arc<DeferredTile> {
  fn coord(&self) -> TileCoord {
    DeferredTile::coord(self)
  }
}

/// A completed tile on its way to the consumer.
struct GeneratedTile {
  tile: Arc<DeferredTile>,
  /// `None` if the tile failed, was unwanted by the time it finished, or
  /// its renderer panicked.
  image: Option<RgbaSurface>,
}

/// Load and unload counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamStats {
  /// Loads during the most recent grid update.
  pub loaded: usize,
  /// Unloads during the most recent grid update.
  pub unloaded: usize,
  /// Slots currently in the grid.
  pub total: usize,
  pub loaded_overall: usize,
  pub unloaded_overall: usize,
  /// Generation failures seen by the consumer.
  pub failed_overall: usize,
}

impl StreamStats {
  fn record(&mut self, change: GridChange) {
    self.loaded = change.loaded;
    self.unloaded = change.unloaded;
    self.loaded_overall += change.loaded;
    self.unloaded_overall += change.unloaded;
    self.total = self.total + change.loaded - change.unloaded;
  }
}

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
  /// Grid change, if the grid was recomputed.
  pub grid: Option<GridChange>,
  /// Tiles handed to the sink.
  pub shown: usize,
  /// Tiles that finished fading in.
  pub faded_in: usize,
}

/// The streamer switched from tile server `old` to `new`.
#[derive(bevy::prelude::Message, Clone, Debug, PartialEq, Eq)]
pub struct TileServerChanged {
  pub old: String,
  pub new: String,
}

/// Description of the world under a position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PositionInfo {
  pub coords: String,
  pub short_description: Option<String>,
  pub long_description: Option<String>,
}

/// Spawns deferred tiles for the window and cleans up after it.
struct Lifecycle<'a> {
  cache: &'a Arc<TileCache>,
  executor: &'a Executor,
  clock: &'a SharedClock,
  sender: &'a Sender<GeneratedTile>,
  presented: &'a mut HashSet<TileId>,
  sink: &'a mut dyn PresentationSink,
}

impl SlotSource<Arc<DeferredTile>> for Lifecycle<'_> {
  fn load(&mut self, at: Vec2) -> Arc<DeferredTile> {
    let coord = self.cache.server().tile_containing(at);
    DeferredTile::spawn(
      coord,
      self.cache,
      self.executor,
      self.clock.clone(),
      on_tile_generated,
      self.sender.clone(),
    )
  }

  fn unload(&mut self, slot: Arc<DeferredTile>) {
    slot.mark_unwanted();
    if self.presented.remove(&slot.id()) {
      self.sink.remove(slot.id());
    }
  }
}

/// Completion callback, runs on the thread that finished the tile.
fn on_tile_generated(deferred: &Arc<DeferredTile>, sender: Sender<GeneratedTile>) {
  let image = match deferred.tile() {
    Some(tile) if !deferred.is_unwanted() => {
      let renderer = tile.server().renderer();
      match catch_unwind(AssertUnwindSafe(|| renderer.render_image(tile))) {
        Ok(image) => Some(image),
        Err(panic) => {
          error!(
            "Rendering tile {} panicked: {}",
            tile.coord(),
            panic_message(panic.as_ref())
          );
          None
        }
      }
    }
    _ => None,
  };
  // Closed only once the streamer is gone, when nobody wants the tile.
  let _ = sender.try_send(GeneratedTile {
    tile: deferred.clone(),
    image,
  });
}

/// Streams tiles from one tile server into a viewport.
pub struct TileStreamer {
  window: TileWindow<Arc<DeferredTile>>,
  cache: Arc<TileCache>,
  executor: Executor,
  cache_capacity: Option<usize>,
  clock: SharedClock,
  sender: Sender<GeneratedTile>,
  receiver: Receiver<GeneratedTile>,
  presented: HashSet<TileId>,
  fading: Vec<Arc<DeferredTile>>,
  fade_duration: f64,
  stats: StreamStats,
  server_changes: Vec<TileServerChanged>,
}

impl TileStreamer {
  pub fn new(
    config: &TileWorldConfig,
    server: Arc<dyn TileServer>,
    clock: SharedClock,
  ) -> Result<Self, ConfigError> {
    config.validate()?;
    let executor = if config.generate_synchronously {
      Executor::Inline
    } else {
      Executor::pool(config.worker_threads)?
    };
    let window = TileWindow::new(server.geometry().tile_length, config.viewport())?
      .with_min_interval(config.min_update_interval_secs)?;
    let cache = Arc::new(build_cache(server, executor.clone(), config.cache_capacity));
    let (sender, receiver) = async_channel::unbounded();

    info!(
      "Streaming tiles from '{}' ({:?})",
      cache.server().name(),
      executor
    );
    Ok(Self {
      window,
      cache,
      executor,
      cache_capacity: config.cache_capacity,
      clock,
      sender,
      receiver,
      presented: HashSet::new(),
      fading: Vec::new(),
      fade_duration: config.fade_duration_secs(),
      stats: StreamStats::default(),
      server_changes: Vec::new(),
    })
  }

  pub fn server(&self) -> &Arc<dyn TileServer> {
    self.cache.server()
  }

  pub fn cache(&self) -> &Arc<TileCache> {
    &self.cache
  }

  pub fn window(&self) -> &TileWindow<Arc<DeferredTile>> {
    &self.window
  }

  pub fn stats(&self) -> StreamStats {
    self.stats
  }

  pub fn viewport(&self) -> &Viewport {
    self.window.viewport()
  }

  pub fn set_viewport(&mut self, viewport: Viewport) -> Result<(), ConfigError> {
    self.window.set_viewport(viewport)
  }

  pub fn set_screen_top_left(&mut self, top_left: Vec2) -> Result<(), ConfigError> {
    self.window.set_screen_top_left(top_left)
  }

  /// Number of tiles still fading in.
  pub fn fading(&self) -> usize {
    self.fading.len()
  }

  /// Whether `id` is currently shown by the sink.
  pub fn is_presented(&self, id: TileId) -> bool {
    self.presented.contains(&id)
  }

  fn lifecycle<'a>(
    &'a mut self,
    sink: &'a mut dyn PresentationSink,
  ) -> (&'a mut TileWindow<Arc<DeferredTile>>, Lifecycle<'a>) {
    (
      &mut self.window,
      Lifecycle {
        cache: &self.cache,
        executor: &self.executor,
        clock: &self.clock,
        sender: &self.sender,
        presented: &mut self.presented,
        sink,
      },
    )
  }

  /// Runs one consumer step.
  #[cfg_attr(feature = "tracy", tracing::instrument(skip_all))]
  pub fn tick(&mut self, sink: &mut dyn PresentationSink) -> TickReport {
    let now = self.clock.now();
    let grid = {
      let (window, mut lifecycle) = self.lifecycle(sink);
      window.poll_update(now, &mut lifecycle)
    };
    if let Some(change) = grid {
      self.stats.record(change);
    }
    let shown = self.paint_newly_generated(sink);
    let faded_in = self.fade_tiles_in(now, sink);
    TickReport {
      grid,
      shown,
      faded_in,
    }
  }

  /// Recomputes the grid now, ignoring the update interval.
  pub fn force_update(&mut self, sink: &mut dyn PresentationSink) -> GridChange {
    let change = {
      let (window, mut lifecycle) = self.lifecycle(sink);
      window.update(&mut lifecycle)
    };
    self.stats.record(change);
    change
  }

  fn paint_newly_generated(&mut self, sink: &mut dyn PresentationSink) -> usize {
    let mut shown = 0;
    while let Ok(GeneratedTile { tile, image }) = self.receiver.try_recv() {
      if tile.is_unwanted() {
        continue;
      }
      if let Some(err) = tile.error() {
        warn!("Tile {} failed: {err}", tile.coord());
        self.stats.failed_overall += 1;
        continue;
      }
      let Some(image) = image else {
        continue;
      };
      let scale = tile.server().geometry().scale();
      sink.show(tile.id(), image, tile.coord().as_vec2(), scale);
      self.presented.insert(tile.id());
      self.fading.push(tile);
      shown += 1;
    }
    shown
  }

  fn fade_tiles_in(&mut self, now: f64, sink: &mut dyn PresentationSink) -> usize {
    let presented = &self.presented;
    let duration = self.fade_duration;
    let mut finished = 0;
    self.fading.retain(|tile| {
      if tile.is_unwanted() || !presented.contains(&tile.id()) {
        return false;
      }
      let Some(completed) = tile.completed_at() else {
        return false;
      };
      let alpha = fade_progress(now, completed, duration);
      sink.set_opacity(tile.id(), alpha);
      if alpha >= 1.0 {
        let length = tile.server().geometry().tile_length;
        sink.fade_finished(tile.id(), tile.coord().is_odd(length));
        finished += 1;
        false
      } else {
        true
      }
    });
    finished
  }

  /// Unloads every tile and rebuilds the grid on the next tick.
  ///
  /// Cached tiles are reused but rendered again.
  pub fn rerender_all(&mut self, sink: &mut dyn PresentationSink) {
    let change = {
      let (window, mut lifecycle) = self.lifecycle(sink);
      let change = window.drop_all(&mut lifecycle);
      window.request_update();
      change
    };
    self.stats.record(change);
  }

  /// Switches to another tile server, unloading every tile of the old one.
  pub fn set_tile_server(
    &mut self,
    server: Arc<dyn TileServer>,
    sink: &mut dyn PresentationSink,
  ) -> Result<(), ConfigError> {
    let tile_length = server.geometry().tile_length;
    let change = {
      let (window, mut lifecycle) = self.lifecycle(sink);
      window.set_tile_length(tile_length, &mut lifecycle)?
    };
    self.stats.record(change);
    let switch = TileServerChanged {
      old: self.cache.server().name().to_string(),
      new: server.name().to_string(),
    };
    info!("Switching tile server from '{}' to '{}'", switch.old, switch.new);
    self.server_changes.push(switch);
    self.cache = Arc::new(build_cache(
      server,
      self.executor.clone(),
      self.cache_capacity,
    ));
    self.fading.clear();
    Ok(())
  }

  /// Server switches since the last call, oldest first.
  pub fn take_server_changes(&mut self) -> Vec<TileServerChanged> {
    std::mem::take(&mut self.server_changes)
  }

  /// Changes a setting on the current tile server.
  ///
  /// Settings flagged `rerender_on_change` discard cached tiles and rebuild
  /// the grid.
  pub fn apply_setting(
    &mut self,
    key: &str,
    value: SettingValue,
    sink: &mut dyn PresentationSink,
  ) -> Result<(), SettingError> {
    let server = self.cache.server().clone();
    let descriptor = *find_setting(server.settings(), key)?;
    server.set_setting(key, value.clone())?;
    info!("Set {} '{}' to {value}", server.name(), descriptor.key);
    if descriptor.rerender_on_change {
      self.cache.clear();
      self.rerender_all(sink);
    }
    Ok(())
  }

  /// Applies a console line of the form `command value`.
  ///
  /// The command is matched against each console setting's sanitized key;
  /// the value is parsed as the setting's current type.
  pub fn run_console_command(
    &mut self,
    line: &str,
    sink: &mut dyn PresentationSink,
  ) -> Result<(), SettingError> {
    let line = line.trim();
    let (command, input) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let server = self.cache.server().clone();
    let descriptor = server
      .settings()
      .iter()
      .find(|d| d.console_command() == command)
      .ok_or_else(|| SettingError::UnknownKey(command.to_string()))?;
    let current = server
      .get_setting(descriptor.key)
      .ok_or_else(|| SettingError::UnknownKey(descriptor.key.to_string()))?;
    let value = SettingValue::parse_like(&current, descriptor.key, input.trim())?;
    self.apply_setting(descriptor.key, value, sink)
  }

  /// Describes the world at `world` using the tile under it.
  pub fn position_info(&self, world: Vec2) -> PositionInfo {
    let mut info = PositionInfo {
      coords: format!("[{:.0}, {:.0}]", world.x, world.y),
      ..Default::default()
    };
    let Some(tile) = self.window.tile_at(world).and_then(|d| d.tile()) else {
      return info;
    };
    let local = ((world - tile.coord().as_vec2()) * FLIP_Y) / tile.server().geometry().scale();
    let renderer = tile.server().renderer();
    info.short_description = Some(renderer.short_label(tile, local));
    info.long_description = Some(renderer.long_label(tile, local));
    info
  }

  /// Suffix for screenshot file names describing the current server.
  pub fn diagnostic_suffix(&self) -> String {
    let server = self.cache.server();
    format!("{}{}", server.name(), server.diagnostic_suffix())
  }
}

fn build_cache(
  server: Arc<dyn TileServer>,
  executor: Executor,
  capacity: Option<usize>,
) -> TileCache {
  match capacity {
    Some(capacity) => {
      TileCache::with_policy(server, executor, Box::new(LeastRecentlyUsed::new(capacity)))
    }
    None => TileCache::new(server, executor),
  }
}
