//! Tracy profiler hookup.

use tracing_subscriber::prelude::*;
use tracing_tracy::TracyLayer;

/// Routes `tracing` spans (tile window updates, streaming systems) to
/// Tracy.
///
/// Call once from `main()` before building the `App`, and leave Bevy's
/// `LogPlugin` disabled since both install a global subscriber.
pub fn init_tracy() {
  tracing_subscriber::registry()
    .with(TracyLayer::default())
    .init();
}
