// Integration tests link the library without `cfg(test)`, so the crate's own
// `src/test.rs` helpers are not reachable from here.

use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::EnvFilter;

/// How long a test may wait for another thread to reach some state.
const PATIENCE: Duration = Duration::from_secs(10);

/// Installs a subscriber that prints events through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spins until `cond` holds, yielding between attempts.
pub fn wait_for<F: FnMut() -> bool>(mut cond: F) {
    let deadline = Instant::now() + PATIENCE;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in {PATIENCE:?}");
        thread::yield_now();
    }
}
