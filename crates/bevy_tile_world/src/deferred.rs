//! Observable, cancellable-by-interest tile fetches.
//!
//! A [`DeferredTile`] is the window's handle on one tile request. It starts
//! a fetch through the [`TileCache`], records when the result arrived, and
//! calls a completion callback exactly once.
//!
//! Completion publishes in a fixed order: the result and its completion
//! time, then the callback, then the finish timestamp. Inside the callback
//! the result is readable but [`DeferredTile::is_finished`] is still false;
//! once it reports true the callback has run.
//!
//! [`DeferredTile::mark_unwanted`] is advisory. Generation keeps running and
//! the callback still fires; the flag only lets consumers skip work and lets
//! the cache drop a result nobody asked to keep.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use bevy::log::warn;

use crate::cache::{Generation, TileCache, TileResult};
use crate::clock::{Clock, SharedClock};
use crate::coords::TileCoord;
use crate::error::GenerationError;
use crate::server::TileServer;
use crate::tile::Tile;
use crate::worker::Executor;

/// Fetches slower than this are reported in debug builds.
const SLOW_TILE_SECS: f64 = 5.0;

/// Finish timestamp of a tile that has not completed.
const UNFINISHED: u64 = u64::MAX;

static NEXT_TILE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a requested tile, used as the presentation key.
///
/// Two requests for the same coordinate get different ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u64);

impl TileId {
  fn next() -> Self {
    Self(NEXT_TILE_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub fn raw(self) -> u64 {
    self.0
  }
}

impl fmt::Display for TileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

struct Completion {
  result: TileResult,
  at: f64,
}

#[derive(Default)]
struct Claim {
  generation: Option<Arc<Generation>>,
  withdrawn: bool,
}

impl Claim {
  fn withdraw(&mut self) {
    if self.withdrawn {
      return;
    }
    if let Some(generation) = &self.generation {
      generation.withdraw();
      self.withdrawn = true;
    }
  }
}

/// One in-flight or completed tile request.
pub struct DeferredTile {
  id: TileId,
  coord: TileCoord,
  server: Arc<dyn TileServer>,
  started_at: f64,
  finished_at: AtomicU64,
  completion: OnceLock<Completion>,
  unwanted: AtomicBool,
  claim: Mutex<Claim>,
}

impl DeferredTile {
  /// Requests the tile at `coord` and returns a handle to it.
  ///
  /// With a pool executor this returns immediately and `callback` runs on a
  /// worker thread. With [`Executor::Inline`] the fetch and the callback
  /// complete before this returns.
  pub fn spawn<A, F>(
    coord: TileCoord,
    cache: &Arc<TileCache>,
    executor: &Executor,
    clock: SharedClock,
    callback: F,
    arg: A,
  ) -> Arc<DeferredTile>
  where
    A: Send + 'static,
    F: FnOnce(&Arc<DeferredTile>, A) + Send + 'static,
  {
    let deferred = Arc::new(Self {
      id: TileId::next(),
      coord,
      server: cache.server().clone(),
      started_at: clock.now(),
      finished_at: AtomicU64::new(UNFINISHED),
      completion: OnceLock::new(),
      unwanted: AtomicBool::new(false),
      claim: Mutex::new(Claim::default()),
    });

    let task = deferred.clone();
    let cache = cache.clone();
    let job_executor = executor.clone();
    executor.spawn(move || {
      let generation = task.start(&cache, &job_executor);
      if job_executor.is_inline() {
        // A unit already running on another executor still has to finish
        // before an inline request returns.
        let result = generation.wait();
        task.complete(result, clock.as_ref(), callback, arg);
      } else {
        generation.on_settled(move |result| {
          task.complete(result.clone(), clock.as_ref(), callback, arg);
        });
      }
    });

    deferred
  }

  fn lock_claim(&self) -> MutexGuard<'_, Claim> {
    self.claim.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Fetches through the cache, claiming the unit unless the tile was
  /// already marked unwanted.
  fn start(&self, cache: &Arc<TileCache>, executor: &Executor) -> Arc<Generation> {
    let mut claim = self.lock_claim();
    let generation = if self.unwanted.load(Ordering::SeqCst) {
      claim.withdrawn = true;
      cache.fetch_unclaimed(self.coord, executor)
    } else {
      cache.fetch_on(self.coord, executor)
    };
    claim.generation = Some(generation.clone());
    generation
  }

  fn complete<A>(
    self: &Arc<Self>,
    result: TileResult,
    clock: &dyn Clock,
    callback: impl FnOnce(&Arc<DeferredTile>, A),
    arg: A,
  ) {
    let now = clock.now();
    if self.completion.set(Completion { result, at: now }).is_err() {
      return;
    }
    if cfg!(debug_assertions) && now - self.started_at > SLOW_TILE_SECS {
      warn!(
        "Tile {} took {:.1}s to generate",
        self.coord,
        now - self.started_at
      );
    }
    callback(self, arg);
    self.finished_at.store(now.to_bits(), Ordering::Release);
  }

  /// Flags the tile as no longer needed.
  ///
  /// Safe from any thread, at any time, any number of times.
  pub fn mark_unwanted(&self) {
    self.unwanted.store(true, Ordering::SeqCst);
    self.lock_claim().withdraw();
  }

  pub fn is_unwanted(&self) -> bool {
    self.unwanted.load(Ordering::SeqCst)
  }

  pub fn id(&self) -> TileId {
    self.id
  }

  pub fn coord(&self) -> TileCoord {
    self.coord
  }

  pub fn server(&self) -> &Arc<dyn TileServer> {
    &self.server
  }

  /// Whether the request completed and its callback has run.
  pub fn is_finished(&self) -> bool {
    self.finished_at.load(Ordering::Acquire) != UNFINISHED
  }

  /// Finish timestamp, set after the callback returns.
  pub fn finished_at(&self) -> Option<f64> {
    let bits = self.finished_at.load(Ordering::Acquire);
    (bits != UNFINISHED).then(|| f64::from_bits(bits))
  }

  /// Clock time at which the result arrived. Readable from the callback.
  pub fn completed_at(&self) -> Option<f64> {
    self.completion.get().map(|c| c.at)
  }

  /// The result, once it has arrived.
  pub fn result(&self) -> Option<&TileResult> {
    self.completion.get().map(|c| &c.result)
  }

  /// The generated tile, if finished successfully.
  pub fn tile(&self) -> Option<&Arc<Tile>> {
    self.result().and_then(|r| r.as_ref().ok())
  }

  /// The generation error, if finished unsuccessfully.
  pub fn error(&self) -> Option<&GenerationError> {
    self.result().and_then(|r| r.as_ref().err())
  }
}

impl fmt::Debug for DeferredTile {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DeferredTile")
      .field("id", &self.id)
      .field("coord", &self.coord)
      .field("finished_at", &self.finished_at())
      .field("unwanted", &self.is_unwanted())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;
  use std::sync::mpsc;

  use super::*;
  use crate::clock::ManualClock;
  use crate::test_support::StubServer;

  fn clock_at(secs: f64) -> SharedClock {
    Arc::new(ManualClock::new(secs))
  }

  #[test]
  fn inline_spawn_completes_before_returning() {
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), Executor::Inline));
    let calls = Arc::new(AtomicUsize::new(0));

    let deferred = DeferredTile::spawn(
      TileCoord::new(64, 64),
      &cache,
      &Executor::Inline,
      clock_at(3.0),
      |tile, calls: Arc<AtomicUsize>| {
        assert!(!tile.is_finished());
        assert_eq!(tile.completed_at(), Some(3.0));
        assert!(tile.tile().is_some());
        calls.fetch_add(1, Ordering::SeqCst);
      },
      calls.clone(),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(deferred.finished_at(), Some(3.0));
    assert_eq!(deferred.tile().unwrap().payload::<i32>(), Some(&128));
    assert!(deferred.error().is_none());
  }

  #[test]
  fn failed_fetch_still_finishes_and_calls_back() {
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), Executor::Inline));
    let calls = Arc::new(AtomicUsize::new(0));

    let deferred = DeferredTile::spawn(
      TileCoord::new(-64, 0),
      &cache,
      &Executor::Inline,
      clock_at(0.0),
      |_, calls: Arc<AtomicUsize>| {
        calls.fetch_add(1, Ordering::SeqCst);
      },
      calls.clone(),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(deferred.is_finished());
    assert!(deferred.tile().is_none());
    assert_eq!(deferred.error(), Some(&GenerationError::failed("negative")));
  }

  #[test]
  fn ids_are_unique_per_request() {
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), Executor::Inline));
    let spawn = || {
      DeferredTile::spawn(
        TileCoord::new(0, 0),
        &cache,
        &Executor::Inline,
        clock_at(0.0),
        |_, ()| {},
        (),
      )
    };
    let a = spawn();
    let b = spawn();

    assert_ne!(a.id(), b.id());
    assert!(Arc::ptr_eq(a.tile().unwrap(), b.tile().unwrap()));
  }

  #[test]
  fn pooled_spawn_calls_back_off_the_calling_thread() {
    let executor = Executor::pool(2).unwrap();
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), executor.clone()));
    let (tx, rx) = mpsc::channel();

    let deferred = DeferredTile::spawn(
      TileCoord::new(0, 0),
      &cache,
      &executor,
      clock_at(1.0),
      |tile, tx: mpsc::Sender<_>| {
        let name = std::thread::current().name().map(str::to_owned);
        tx.send((tile.id(), name)).unwrap();
      },
      tx,
    );

    let (id, thread) = rx.recv().unwrap();
    assert_eq!(id, deferred.id());
    assert!(thread.unwrap().starts_with("tile-gen-"));
    while !deferred.is_finished() {
      std::thread::yield_now();
    }
    assert_eq!(deferred.finished_at(), Some(1.0));
  }

  #[test]
  fn unwanted_tile_still_calls_back_and_is_not_cached() {
    let (server, release) = StubServer::gated();
    let executor = Executor::pool(2).unwrap();
    let cache = Arc::new(TileCache::new(Arc::new(server), executor.clone()));
    let (tx, rx) = mpsc::channel();

    let deferred = DeferredTile::spawn(
      TileCoord::new(0, 0),
      &cache,
      &executor,
      clock_at(0.0),
      |tile, tx: mpsc::Sender<bool>| tx.send(tile.is_unwanted()).unwrap(),
      tx,
    );
    while deferred.lock_claim().generation.is_none() {
      std::thread::yield_now();
    }
    deferred.mark_unwanted();
    deferred.mark_unwanted();
    release.send(()).unwrap();

    assert!(rx.recv().unwrap());
    assert!(deferred.tile().is_some());
    assert!(!cache.contains(TileCoord::new(0, 0)));
  }

  #[test]
  fn tile_unwanted_before_fetch_is_not_cached() {
    let executor = Executor::pool(1).unwrap();
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), executor.clone()));
    let (unblock, blocked) = mpsc::channel::<()>();
    executor.spawn(move || {
      let _ = blocked.recv();
    });
    let (tx, rx) = mpsc::channel();

    let deferred = DeferredTile::spawn(
      TileCoord::new(64, 0),
      &cache,
      &executor,
      clock_at(0.0),
      |_, tx: mpsc::Sender<()>| tx.send(()).unwrap(),
      tx,
    );
    deferred.mark_unwanted();
    unblock.send(()).unwrap();

    rx.recv().unwrap();
    assert!(deferred.tile().is_some());
    assert!(!cache.contains(TileCoord::new(64, 0)));
    assert_eq!(cache.generations_started(), 1);
  }

  #[test]
  fn marking_finished_tile_unwanted_keeps_cache_entry() {
    let cache = Arc::new(TileCache::new(Arc::new(StubServer::new()), Executor::Inline));
    let deferred = DeferredTile::spawn(
      TileCoord::new(0, 0),
      &cache,
      &Executor::Inline,
      clock_at(0.0),
      |_, ()| {},
      (),
    );
    deferred.mark_unwanted();
    assert!(deferred.is_unwanted());
    assert!(cache.contains(TileCoord::new(0, 0)));
  }
}
