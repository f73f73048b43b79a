//! Tile World - streams an infinite, procedurally generated 2D tile plane
//! into a Bevy viewport.
//!
//! A [`TileServer`] generates tile content on worker threads. The
//! [`TileWindow`] keeps a rectangular grid of tiles covering the screen and
//! an offscreen margin, loading rows and columns as the view moves. A
//! [`TileCache`] makes sure each coordinate is generated once, and
//! [`TileStreamer`] hands finished tiles to a [`PresentationSink`] with a
//! fade-in.

pub mod cache;
pub mod clock;
pub mod config;
pub mod coords;
pub mod deferred;
pub mod error;
pub mod plugin;
pub mod presentation;
pub mod registry;
pub mod server;
pub mod settings;
pub mod streamer;
pub mod surface;
pub mod test_pattern;
pub mod tile;
#[cfg(feature = "tracy")]
mod tracy_init;
pub mod window;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use cache::{EvictionPolicy, Generation, LeastRecentlyUsed, RetainAll, TileCache, TileResult};
pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};
pub use config::TileWorldConfig;
pub use coords::{FLIP_Y, TileCoord, TileGeometry, WorldRect};
pub use deferred::{DeferredTile, TileId};
pub use error::{ConfigError, GenerationError, RegistryError, SettingError};
pub use plugin::{
  OddTile, TileCamera, TileFade, TileSprite, TileSprites, TileWorld, TileWorldPlugin,
  TileWorldSet,
};
pub use presentation::{PresentationCommand, PresentationQueue, PresentationSink, fade_progress};
pub use registry::{ServerFactory, TileServerRegistry};
pub use server::{TileRenderer, TileServer};
pub use settings::{SettingDescriptor, SettingKind, SettingValue};
pub use streamer::{PositionInfo, StreamStats, TickReport, TileServerChanged, TileStreamer};
pub use surface::{Rgba, RgbaSurface, Surface, rgb};
pub use test_pattern::{PatternTile, TestPatternServer};
pub use tile::{Tile, TilePayload};
#[cfg(feature = "tracy")]
pub use tracy_init::init_tracy;
pub use window::{GridChange, GridSlot, SlotSource, TileWindow, Viewport};
pub use worker::Executor;
