//! Named tile server factories.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy::prelude::Resource;

use crate::error::RegistryError;
use crate::server::TileServer;
use crate::test_pattern::TestPatternServer;

/// Builds a tile server for a world seed.
pub type ServerFactory = fn(u64) -> Arc<dyn TileServer>;

/// Tile servers available for selection, sorted by name.
#[derive(Resource, Clone, Default)]
pub struct TileServerRegistry {
  factories: BTreeMap<String, ServerFactory>,
}

impl TileServerRegistry {
  /// Registry with the servers shipped in this crate.
  pub fn with_builtin() -> Self {
    let mut registry = Self::default();
    registry.register(TestPatternServer::NAME, |seed| {
      Arc::new(TestPatternServer::new(seed))
    });
    registry
  }

  /// Adds a factory, replacing any previous one with the same name.
  pub fn register(&mut self, name: impl Into<String>, factory: ServerFactory) -> &mut Self {
    self.factories.insert(name.into(), factory);
    self
  }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.factories.keys().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.factories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.factories.is_empty()
  }

  pub fn create(&self, name: &str, seed: u64) -> Result<Arc<dyn TileServer>, RegistryError> {
    self
      .factories
      .get(name)
      .map(|factory| factory(seed))
      .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
  }

  /// Creates the server at `index` in name order.
  pub fn create_index(&self, index: usize, seed: u64) -> Result<Arc<dyn TileServer>, RegistryError> {
    self
      .factories
      .values()
      .nth(index)
      .map(|factory| factory(seed))
      .ok_or(RegistryError::IndexOutOfRange {
        index,
        len: self.len(),
      })
  }
}
