//! Actively refreshed, lock-free caches.
//!
//! An [`ActiveCache`] holds one value that is computed on a dedicated monitor
//! thread and recomputed every time its [`Trigger`] fires:
//!
//! - The first read starts the monitor (lazily, unless started eagerly) and
//!   blocks until the first refresh completes. All readers arriving during
//!   that window share the one refresh.
//! - Every later read is a lock-free load of the current value, even while a
//!   refresh is in progress.
//! - [`ActiveCache::stop`] ends the monitor loop at the next trigger boundary,
//!   and [`ActiveCache::join`] waits for it to exit.
//!
//! Two trigger policies are provided:
//!
//! - [`TimeoutCache`]: refreshes every fixed period ([`Interval`]).
//! - [`TriggeredCache`]: refreshes when asked to ([`Signal`]).
//!
//! Readers that have to wait for the first value park through
//! `parking_lot`'s futex-based primitives; published values are swapped in
//! with `arc-swap`.
//!
//! # Examples
//!
//! ## Periodic refresh
//!
//! ```rust
//! use std::time::Duration;
//!
//! use active_cache::TimeoutCache;
//!
//! let cache = TimeoutCache::every(
//!    || Ok::<_, std::io::Error>(std::env::var("HOME").unwrap_or_default()),
//!    Duration::from_secs(60),
//! );
//!
//! // Blocks until the first refresh, then returns immediately thereafter.
//! let home = cache.get().unwrap();
//! assert_eq!(*home, std::env::var("HOME").unwrap_or_default());
//! cache.stop_and_join();
//! ```
//!
//! ## Refresh on demand
//!
//! ```rust
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! use active_cache::TriggeredCache;
//!
//! let generation = Arc::new(AtomicU32::new(0));
//! let cache = TriggeredCache::triggered({
//!    let generation = Arc::clone(&generation);
//!    move || Ok::<_, String>(generation.fetch_add(1, Ordering::SeqCst) + 1)
//! });
//!
//! assert_eq!(*cache.get().unwrap(), 1);
//! cache.refresh(); // picked up in the background
//! cache.stop_and_join();
//! ```

/// Actively refreshed cache implementation.
mod cache;

/// Error types.
mod error;

/// Construction options.
mod options;

/// Refresh computations.
mod refresh;

/// Internal lifecycle state management.
mod state;

/// Refresh trigger policies.
mod trigger;

pub use cache::{ActiveCache, TimeoutCache, TriggeredCache};
pub use error::Error;
pub use options::{FailurePolicy, Options};
pub use refresh::Refresh;
pub use trigger::{Interval, Signal, Trigger};
