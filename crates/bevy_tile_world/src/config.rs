//! Streaming configuration.
//!
//! Every field has a default, so a TOML file only needs the values it
//! overrides:
//!
//! ```toml
//! screen_size = [1280, 720]
//! offscreen_margin = [2, 2]
//! fade_in_ms = 300
//! ```

use std::path::Path;

use bevy::math::{UVec2, Vec2};
use bevy::prelude::Resource;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::window::Viewport;

#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileWorldConfig {
  /// World position of the screen's top-left corner.
  pub screen_top_left: [f32; 2],
  /// Screen size in pixels.
  pub screen_size: [u32; 2],
  /// Pixels per world unit.
  pub screen_scale: f32,
  /// Offscreen columns and rows kept loaded on each side.
  pub offscreen_margin: [u32; 2],
  pub min_update_interval_secs: f64,
  /// Time for a newly shown tile to reach full opacity.
  pub fade_in_ms: u32,
  /// Generate and render on the consumer thread. For debugging.
  pub generate_synchronously: bool,
  pub world_seed: u64,
  /// Generation threads; 0 picks one per logical CPU.
  pub worker_threads: usize,
  /// Maximum cached tiles, least recently used evicted first. Unbounded if
  /// unset.
  pub cache_capacity: Option<usize>,
}

impl Default for TileWorldConfig {
  fn default() -> Self {
    let viewport = Viewport::default();
    Self {
      screen_top_left: viewport.top_left.to_array(),
      screen_size: viewport.size.to_array(),
      screen_scale: viewport.scale,
      offscreen_margin: viewport.margin.to_array(),
      min_update_interval_secs: 0.05,
      fade_in_ms: 600,
      generate_synchronously: false,
      world_seed: 1,
      worker_threads: 0,
      cache_capacity: None,
    }
  }
}

impl TileWorldConfig {
  /// Parses and validates a TOML document.
  pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(source)?;
    config.validate()?;
    Ok(config)
  }

  /// Reads, parses and validates a TOML file.
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Self::from_toml_str(&contents)
  }

  pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(self)
  }

  pub fn viewport(&self) -> Viewport {
    Viewport {
      top_left: Vec2::from_array(self.screen_top_left),
      size: UVec2::from_array(self.screen_size),
      scale: self.screen_scale,
      margin: UVec2::from_array(self.offscreen_margin),
    }
  }

  pub fn fade_duration_secs(&self) -> f64 {
    f64::from(self.fade_in_ms) / 1000.0
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    self.viewport().validate()?;
    if !self.min_update_interval_secs.is_finite() || self.min_update_interval_secs < 0.0 {
      return Err(ConfigError::UpdateInterval(self.min_update_interval_secs));
    }
    Ok(())
  }
}
