//! Deduplicating tile generation cache.
//!
//! [`TileCache`] wraps a [`TileServer`] so that at most one generation runs
//! per coordinate. Every requester of a coordinate receives the same
//! [`Generation`] unit and, once it settles, the identical `Arc<Tile>` (or
//! the identical error).
//!
//! # Lifecycle of a unit
//!
//! ```text
//! fetch ──▶ Pending ──(worker)──▶ Settled(Ok | Err)
//!             │                       │
//!             │ all claims withdrawn  │ evict / clear / policy
//!             │ or clear              │
//!             ▼                       ▼
//!        settled but never         removed from table
//!        published in the table
//! ```
//!
//! Failed units stay in the table so repeated lookups do not hammer a
//! broken server. Retrying is an explicit [`TileCache::evict`] followed by a
//! new fetch.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use bevy::log::debug;

use crate::coords::TileCoord;
use crate::error::GenerationError;
use crate::server::TileServer;
use crate::tile::Tile;
use crate::worker::Executor;

/// Outcome of generating a tile.
pub type TileResult = Result<Arc<Tile>, GenerationError>;

type Subscriber = Box<dyn FnOnce(&TileResult) + Send>;

enum GenerationState {
  Pending(Vec<Subscriber>),
  Settled(TileResult),
}

/// One in-flight or settled generation, shared by all its requesters.
pub struct Generation {
  coord: TileCoord,
  state: Mutex<GenerationState>,
  settled: Condvar,
  /// Requesters that still want the result.
  claims: AtomicUsize,
}

impl Generation {
  fn new(coord: TileCoord, claims: usize) -> Self {
    Self {
      coord,
      state: Mutex::new(GenerationState::Pending(Vec::new())),
      settled: Condvar::new(),
      claims: AtomicUsize::new(claims),
    }
  }

  pub fn coord(&self) -> TileCoord {
    self.coord
  }

  fn lock_state(&self) -> MutexGuard<'_, GenerationState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_settled(&self) -> bool {
    matches!(*self.lock_state(), GenerationState::Settled(_))
  }

  /// Returns the result if the unit has settled.
  pub fn try_result(&self) -> Option<TileResult> {
    match &*self.lock_state() {
      GenerationState::Settled(result) => Some(result.clone()),
      GenerationState::Pending(_) => None,
    }
  }

  /// Blocks until the unit settles.
  ///
  /// Never call this from a generation worker; use [`Self::on_settled`].
  pub fn wait(&self) -> TileResult {
    let mut state = self.lock_state();
    loop {
      match &*state {
        GenerationState::Settled(result) => return result.clone(),
        GenerationState::Pending(_) => {
          state = self
            .settled
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
        }
      }
    }
  }

  /// Runs `f` with the result once the unit settles.
  ///
  /// If already settled, `f` runs immediately on the calling thread;
  /// otherwise it runs on the thread that settles the unit.
  pub fn on_settled(&self, f: impl FnOnce(&TileResult) + Send + 'static) {
    let mut state = self.lock_state();
    match &mut *state {
      GenerationState::Pending(subscribers) => subscribers.push(Box::new(f)),
      GenerationState::Settled(result) => {
        let result = result.clone();
        drop(state);
        f(&result);
      }
    }
  }

  fn settle(&self, result: TileResult) {
    let subscribers = {
      let mut state = self.lock_state();
      match std::mem::replace(&mut *state, GenerationState::Settled(result.clone())) {
        GenerationState::Pending(subscribers) => subscribers,
        GenerationState::Settled(_) => Vec::new(),
      }
    };
    self.settled.notify_all();
    for subscriber in subscribers {
      subscriber(&result);
    }
  }

  fn claim(&self) {
    self.claims.fetch_add(1, Ordering::AcqRel);
  }

  /// Withdraws one requester's interest.
  ///
  /// Has no effect once settled. When the last claim is withdrawn before the
  /// unit settles, its result is not published in the cache.
  pub fn withdraw(&self) {
    if self.is_settled() {
      return;
    }
    let _ = self
      .claims
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
  }

  /// Number of requesters still interested.
  pub fn claims(&self) -> usize {
    self.claims.load(Ordering::Acquire)
  }
}

/// Decides which settled entries to drop when the cache grows.
pub trait EvictionPolicy: Send {
  /// Called whenever a coordinate is fetched.
  fn record_access(&mut self, coord: TileCoord);

  /// Called whenever a coordinate leaves the table.
  fn record_removal(&mut self, coord: TileCoord);

  /// Maximum entry count, or `None` for unbounded.
  fn capacity(&self) -> Option<usize>;

  /// Tracked coordinates, first candidate for eviction first.
  fn eviction_order(&self) -> Vec<TileCoord>;
}

/// Keeps every entry until explicitly evicted.
#[derive(Default)]
pub struct RetainAll;

impl EvictionPolicy for RetainAll {
  fn record_access(&mut self, _coord: TileCoord) {}

  fn record_removal(&mut self, _coord: TileCoord) {}

  fn capacity(&self) -> Option<usize> {
    None
  }

  fn eviction_order(&self) -> Vec<TileCoord> {
    Vec::new()
  }
}

/// Evicts the least recently fetched entries above `capacity`.
pub struct LeastRecentlyUsed {
  capacity: usize,
  tick: u64,
  last_access: HashMap<TileCoord, u64>,
}

impl LeastRecentlyUsed {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      tick: 0,
      last_access: HashMap::new(),
    }
  }
}

impl EvictionPolicy for LeastRecentlyUsed {
  fn record_access(&mut self, coord: TileCoord) {
    self.tick += 1;
    self.last_access.insert(coord, self.tick);
  }

  fn record_removal(&mut self, coord: TileCoord) {
    self.last_access.remove(&coord);
  }

  fn capacity(&self) -> Option<usize> {
    Some(self.capacity)
  }

  fn eviction_order(&self) -> Vec<TileCoord> {
    let mut entries: Vec<_> = self.last_access.iter().map(|(c, t)| (*t, *c)).collect();
    entries.sort_unstable();
    entries.into_iter().map(|(_, c)| c).collect()
  }
}

struct CacheTable {
  units: HashMap<TileCoord, Arc<Generation>>,
  policy: Box<dyn EvictionPolicy>,
}

impl CacheTable {
  fn remove(&mut self, coord: TileCoord) -> Option<Arc<Generation>> {
    let unit = self.units.remove(&coord)?;
    self.policy.record_removal(coord);
    Some(unit)
  }

  fn enforce_capacity(&mut self) {
    let Some(capacity) = self.policy.capacity() else {
      return;
    };
    if self.units.len() <= capacity {
      return;
    }
    for coord in self.policy.eviction_order() {
      if self.units.len() <= capacity {
        break;
      }
      if self.units.get(&coord).is_some_and(|u| u.is_settled()) {
        self.remove(coord);
      }
    }
  }
}

/// Generation cache for one tile server.
pub struct TileCache {
  server: Arc<dyn TileServer>,
  executor: Executor,
  table: Mutex<CacheTable>,
  generations_started: AtomicUsize,
}

impl TileCache {
  /// Creates a cache that keeps every entry.
  pub fn new(server: Arc<dyn TileServer>, executor: Executor) -> Self {
    Self::with_policy(server, executor, Box::new(RetainAll))
  }

  pub fn with_policy(
    server: Arc<dyn TileServer>,
    executor: Executor,
    policy: Box<dyn EvictionPolicy>,
  ) -> Self {
    Self {
      server,
      executor,
      table: Mutex::new(CacheTable {
        units: HashMap::new(),
        policy,
      }),
      generations_started: AtomicUsize::new(0),
    }
  }

  pub fn server(&self) -> &Arc<dyn TileServer> {
    &self.server
  }

  pub fn executor(&self) -> &Executor {
    &self.executor
  }

  fn lock_table(&self) -> MutexGuard<'_, CacheTable> {
    self.table.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Returns the unit for `coord`, starting generation on the cache's
  /// executor if none exists.
  pub fn fetch(self: &Arc<Self>, coord: TileCoord) -> Arc<Generation> {
    self.fetch_on(coord, &self.executor)
  }

  /// Like [`Self::fetch`], but a newly started generation runs on
  /// `executor`.
  pub fn fetch_on(self: &Arc<Self>, coord: TileCoord, executor: &Executor) -> Arc<Generation> {
    self.fetch_inner(coord, executor, true)
  }

  /// Joins or starts the unit for `coord` without registering interest.
  ///
  /// A unit started this way is only cached if another requester claims it
  /// before it settles.
  pub fn fetch_unclaimed(
    self: &Arc<Self>,
    coord: TileCoord,
    executor: &Executor,
  ) -> Arc<Generation> {
    self.fetch_inner(coord, executor, false)
  }

  fn fetch_inner(
    self: &Arc<Self>,
    coord: TileCoord,
    executor: &Executor,
    claim: bool,
  ) -> Arc<Generation> {
    let created = {
      let mut table = self.lock_table();
      table.policy.record_access(coord);
      if let Some(existing) = table.units.get(&coord) {
        if claim {
          existing.claim();
        }
        return existing.clone();
      }
      let unit = Arc::new(Generation::new(coord, usize::from(claim)));
      table.units.insert(coord, unit.clone());
      table.enforce_capacity();
      unit
    };

    self.generations_started.fetch_add(1, Ordering::Relaxed);
    let cache = self.clone();
    let unit = created.clone();
    executor.spawn(move || cache.run_generation(unit));
    created
  }

  fn run_generation(&self, unit: Arc<Generation>) {
    let coord = unit.coord();
    let server = self.server.clone();
    let result = match catch_unwind(AssertUnwindSafe(|| server.generate(coord))) {
      Ok(Ok(payload)) => Ok(Arc::new(Tile::new(coord, server.clone(), payload))),
      Ok(Err(err)) => Err(err),
      Err(panic) => Err(GenerationError::from_panic(panic)),
    };

    {
      let mut table = self.lock_table();
      let published = table.units.get(&coord).is_some_and(|u| Arc::ptr_eq(u, &unit));
      if published && unit.claims() == 0 {
        debug!("Tile {coord} no longer wanted, not caching");
        table.remove(coord);
      }
    }

    unit.settle(result);
    self.lock_table().enforce_capacity();
  }

  /// Removes a settled entry. Returns false if absent or still pending.
  pub fn evict(&self, coord: TileCoord) -> bool {
    let mut table = self.lock_table();
    if table.units.get(&coord).is_some_and(|u| u.is_settled()) {
      table.remove(coord);
      true
    } else {
      false
    }
  }

  /// Removes every entry, pending ones included.
  ///
  /// Generations already running still settle for their requesters, but
  /// later fetches start over instead of joining them.
  pub fn clear(&self) {
    let mut table = self.lock_table();
    let coords: Vec<_> = table.units.keys().copied().collect();
    for coord in coords {
      table.remove(coord);
    }
  }

  /// Whether `coord` currently has an entry, pending or settled.
  pub fn contains(&self, coord: TileCoord) -> bool {
    self.lock_table().units.contains_key(&coord)
  }

  pub fn len(&self) -> usize {
    self.lock_table().units.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Number of generations ever started by this cache.
  pub fn generations_started(&self) -> usize {
    self.generations_started.load(Ordering::Relaxed)
  }
}
