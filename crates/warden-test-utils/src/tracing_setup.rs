//! Tracing helpers for tests.
//!
//! Tests that only want log output use `#[test_log::test]`. Use
//! [`capture_logs`] when a test asserts on the messages themselves.

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use warden_core::{LogCollector, LogReader};

/// Capacity of the buffer behind [`capture_logs`].
const CAPTURE_CAPACITY: usize = 1024;

/// Capture every event emitted on the current thread until the guard drops.
///
/// Works with the default single-threaded `#[tokio::test]` runtime, where
/// spawned tasks run on the test thread.
pub fn capture_logs() -> (LogReader, DefaultGuard) {
    let collector = LogCollector::new(CAPTURE_CAPACITY);
    let reader = collector.reader();
    let guard = tracing_subscriber::registry().with(collector).set_default();
    (reader, guard)
}
