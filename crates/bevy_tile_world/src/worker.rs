//! Where tile generation and rendering run.
//!
//! Generation uses a private rayon pool so long-running tile servers never
//! starve Bevy's own task pools. [`Executor::Inline`] runs jobs on the
//! calling thread, which makes every load complete before it returns.

use std::sync::Arc;

use bevy::log::error;

use crate::error::{ConfigError, panic_message};

/// Job executed by an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs generation and rendering jobs.
#[derive(Clone)]
pub enum Executor {
  /// Dedicated worker threads.
  Pool(Arc<rayon::ThreadPool>),
  /// Run on the calling thread, before `spawn` returns.
  Inline,
}

impl Executor {
  /// Builds a worker pool.
  ///
  /// `threads == 0` lets rayon pick one thread per logical CPU.
  pub fn pool(threads: usize) -> Result<Self, ConfigError> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(|i| format!("tile-gen-{i}"))
      .panic_handler(|payload| {
        error!("Tile worker panicked: {}", panic_message(payload.as_ref()));
      })
      .build()?;
    Ok(Self::Pool(Arc::new(pool)))
  }

  /// Returns true if jobs run on the calling thread.
  pub fn is_inline(&self) -> bool {
    matches!(self, Self::Inline)
  }

  /// Queues `job`, or runs it immediately for [`Executor::Inline`].
  pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
    match self {
      Self::Pool(pool) => pool.spawn(job),
      Self::Inline => job(),
    }
  }
}

impl std::fmt::Debug for Executor {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Pool(pool) => write!(f, "Executor::Pool({} threads)", pool.current_num_threads()),
      Self::Inline => write!(f, "Executor::Inline"),
    }
  }
}
