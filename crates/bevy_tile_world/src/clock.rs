//! Monotonic time sources.
//!
//! Completion timestamps and update throttling read seconds as `f64` from a
//! [`Clock`]. [`MonotonicClock`] follows wall time; [`ManualClock`] is
//! advanced explicitly, by the Bevy adapter (from `Time`) or by tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

// WASM compat: use web_time::Instant, NOT std::time::Instant
use web_time::Instant;

/// Monotonic time in seconds.
pub trait Clock: Send + Sync {
  fn now(&self) -> f64;
}

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Seconds elapsed since construction.
pub struct MonotonicClock {
  origin: Instant,
}

impl MonotonicClock {
  pub fn new() -> Self {
    Self {
      origin: Instant::now(),
    }
  }
}

impl Default for MonotonicClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for MonotonicClock {
  fn now(&self) -> f64 {
    self.origin.elapsed().as_secs_f64()
  }
}

/// Clock whose time only changes when told to.
///
/// Readable from worker threads while the owner sets it.
#[derive(Default)]
pub struct ManualClock {
  bits: AtomicU64,
}

impl ManualClock {
  pub fn new(start: f64) -> Self {
    Self {
      bits: AtomicU64::new(start.to_bits()),
    }
  }

  pub fn set(&self, secs: f64) {
    self.bits.store(secs.to_bits(), Ordering::Release);
  }

  pub fn advance(&self, secs: f64) {
    self.set(self.now() + secs);
  }
}

impl Clock for ManualClock {
  fn now(&self) -> f64 {
    f64::from_bits(self.bits.load(Ordering::Acquire))
  }
}
