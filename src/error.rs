//! Errors reported to readers and owners of a cache.

use std::time::Duration;

/// Errors returned by [`ActiveCache`](crate::ActiveCache) operations.
///
/// Failures of the refresh function itself never reach readers: they are
/// logged by the monitor thread and handled according to the configured
/// [`FailurePolicy`](crate::FailurePolicy).
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The monitor stopped before a first value was produced.
   #[error("cache stopped before a value was produced")]
   Stopped,

   /// No first value was produced within the requested time.
   #[error("timed out after {0:?} waiting for the first value")]
   Timeout(Duration),

   /// The operating system refused to spawn the monitor thread.
   #[error("failed to spawn monitor thread")]
   Spawn(#[source] std::io::Error),
}
