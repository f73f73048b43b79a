//! Runtime-adjustable tile server settings.
//!
//! Servers declare their settings as a static descriptor list. Boolean
//! settings surface as [`SettingKind::Menu`] checkboxes; everything else is
//! a [`SettingKind::Console`] value set by typing `key value`.

use std::fmt;

use crate::error::SettingError;

/// How a setting is exposed to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
  /// Boolean toggle in the server's menu.
  Menu,
  /// Typed value set from the console.
  Console,
}

/// Static description of one setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SettingDescriptor {
  pub key: &'static str,
  pub description: &'static str,
  pub kind: SettingKind,
  /// Whether changing the value invalidates already generated tiles.
  pub rerender_on_change: bool,
}

impl SettingDescriptor {
  /// Name of the console command that sets this value.
  pub fn console_command(&self) -> String {
    sanitize_console_key(self.key)
  }
}

/// Strips everything except `[a-zA-Z0-9_-]` from `key`.
pub fn sanitize_console_key(key: &str) -> String {
  key
    .chars()
    .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
    .collect()
}

/// Value of a setting.
#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
  Bool(bool),
  Int(i64),
  Float(f64),
  Text(String),
}

impl SettingValue {
  /// Name of the value's type, for error messages.
  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Bool(_) => "bool",
      Self::Int(_) => "integer",
      Self::Float(_) => "float",
      Self::Text(_) => "text",
    }
  }

  /// Parses console input into a value of the same type as `current`.
  pub fn parse_like(current: &SettingValue, key: &str, input: &str) -> Result<Self, SettingError> {
    let input = input.trim();
    let mismatch = || SettingError::TypeMismatch {
      key: key.to_string(),
      expected: current.type_name(),
    };
    match current {
      Self::Bool(_) => match input.to_ascii_lowercase().as_str() {
        "true" | "on" | "1" | "yes" => Ok(Self::Bool(true)),
        "false" | "off" | "0" | "no" => Ok(Self::Bool(false)),
        _ => Err(mismatch()),
      },
      Self::Int(_) => input.parse().map(Self::Int).map_err(|_| mismatch()),
      Self::Float(_) => input.parse().map(Self::Float).map_err(|_| mismatch()),
      Self::Text(_) => Ok(Self::Text(input.to_string())),
    }
  }

  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Self::Bool(b) => Some(*b),
      _ => None,
    }
  }

  /// Numeric value; integers widen to float.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Int(i) => Some(*i as f64),
      Self::Float(f) => Some(*f),
      _ => None,
    }
  }
}

impl fmt::Display for SettingValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Bool(b) => write!(f, "{b}"),
      Self::Int(i) => write!(f, "{i}"),
      Self::Float(v) => write!(f, "{v}"),
      Self::Text(s) => write!(f, "{s}"),
    }
  }
}

/// Finds the descriptor for `key` in a server's setting list.
pub fn find_setting<'a>(
  settings: &'a [SettingDescriptor],
  key: &str,
) -> Result<&'a SettingDescriptor, SettingError> {
  settings
    .iter()
    .find(|d| d.key == key)
    .ok_or_else(|| SettingError::UnknownKey(key.to_string()))
}
