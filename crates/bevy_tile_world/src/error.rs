//! Error types.

use std::error::Error;
use std::{fmt, io};

/// Error settling a tile generation.
///
/// Cloned into every waiter of the same generation, so it carries owned
/// strings instead of boxed sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
  /// The tile server reported a failure.
  Failed(String),
  /// The tile server panicked while generating.
  Panicked(String),
}

impl GenerationError {
  /// Convenience constructor for server implementations.
  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed(message.into())
  }

  /// Converts a caught panic payload into an error.
  pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
    Self::Panicked(panic_message(payload.as_ref()))
  }
}

impl fmt::Display for GenerationError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Failed(msg) => write!(f, "generation failed: {msg}"),
      Self::Panicked(msg) => write!(f, "generation panicked: {msg}"),
    }
  }
}

impl Error for GenerationError {}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic payload".to_string()
  }
}

/// Rejected viewport, grid, or crate configuration.
#[derive(Debug)]
pub enum ConfigError {
  /// Tile side length must be positive.
  TileLength(i32),
  /// Screen size must be non-zero on both axes.
  ScreenSize { width: u32, height: u32 },
  /// Screen scale must be finite and positive.
  ScreenScale(f32),
  /// Screen position must be finite.
  ScreenPosition { x: f32, y: f32 },
  /// Minimum update interval must be finite and non-negative.
  UpdateInterval(f64),
  /// Configuration file could not be parsed.
  Parse(toml::de::Error),
  /// Configuration file could not be read.
  Io(io::Error),
  /// Generation worker pool could not be created.
  WorkerPool(rayon::ThreadPoolBuildError),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::TileLength(len) => write!(f, "tile length must be positive, got {len}"),
      Self::ScreenSize { width, height } => {
        write!(f, "screen size must be non-zero, got {width}x{height}")
      }
      Self::ScreenScale(scale) => {
        write!(f, "screen scale must be finite and positive, got {scale}")
      }
      Self::ScreenPosition { x, y } => write!(f, "screen position must be finite, got ({x}, {y})"),
      Self::UpdateInterval(secs) => {
        write!(f, "minimum update interval must be non-negative, got {secs}s")
      }
      Self::Parse(e) => write!(f, "invalid config: {e}"),
      Self::Io(e) => write!(f, "I/O error: {e}"),
      Self::WorkerPool(e) => write!(f, "failed to build worker pool: {e}"),
    }
  }
}

impl Error for ConfigError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    match self {
      Self::Parse(e) => Some(e),
      Self::Io(e) => Some(e),
      Self::WorkerPool(e) => Some(e),
      _ => None,
    }
  }
}

impl From<toml::de::Error> for ConfigError {
  fn from(err: toml::de::Error) -> Self {
    Self::Parse(err)
  }
}

impl From<io::Error> for ConfigError {
  fn from(err: io::Error) -> Self {
    Self::Io(err)
  }
}

impl From<rayon::ThreadPoolBuildError> for ConfigError {
  fn from(err: rayon::ThreadPoolBuildError) -> Self {
    Self::WorkerPool(err)
  }
}

/// Error reading or changing a tile server setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingError {
  /// The server declares no setting with this key.
  UnknownKey(String),
  /// The value has the wrong type for this setting.
  TypeMismatch { key: String, expected: &'static str },
  /// The value has the right type but is out of range.
  InvalidValue { key: String, reason: String },
}

impl fmt::Display for SettingError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnknownKey(key) => write!(f, "unknown setting '{key}'"),
      Self::TypeMismatch { key, expected } => {
        write!(f, "setting '{key}' expects a {expected} value")
      }
      Self::InvalidValue { key, reason } => write!(f, "invalid value for '{key}': {reason}"),
    }
  }
}

impl Error for SettingError {}

/// Error selecting a tile server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  /// No server registered under this name.
  UnknownName(String),
  /// Index past the end of the sorted name list.
  IndexOutOfRange { index: usize, len: usize },
}

impl fmt::Display for RegistryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::UnknownName(name) => write!(f, "no tile server named '{name}'"),
      Self::IndexOutOfRange { index, len } => {
        write!(f, "tile server index {index} out of range (have {len})")
      }
    }
  }
}

impl Error for RegistryError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn panic_payloads_become_messages() {
    let err = GenerationError::from_panic(Box::new("boom"));
    assert_eq!(err, GenerationError::Panicked("boom".into()));

    let err = GenerationError::from_panic(Box::new(String::from("owned")));
    assert_eq!(err, GenerationError::Panicked("owned".into()));

    let err = GenerationError::from_panic(Box::new(42_u32));
    assert_eq!(err, GenerationError::Panicked("unknown panic payload".into()));
  }

  #[test]
  fn config_error_exposes_source() {
    let io = ConfigError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
    assert!(io.source().is_some());
    assert!(ConfigError::TileLength(0).source().is_none());
    assert_eq!(
      ConfigError::TileLength(0).to_string(),
      "tile length must be positive, got 0"
    );
  }
}
