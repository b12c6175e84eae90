//! Actively refreshed cache.
//!
//! This module provides [`ActiveCache`], a cell holding one value that is
//! computed on a dedicated monitor thread and replaced whenever the cache's
//! [`Trigger`] fires. Readers never wait on a refresh: once the first value
//! has been published, [`ActiveCache::get`] is a lock-free load.
//!
//! The monitor loop computes first and waits second, so the first value is
//! available as soon as the first refresh finishes rather than one trigger
//! period later.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::error::Error;
use crate::options::{FailurePolicy, Options};
use crate::refresh::Refresh;
use crate::state::CacheState;
use crate::trigger::{Interval, Signal, Trigger};

/// An [`ActiveCache`] refreshed every fixed period.
pub type TimeoutCache<T, R> = ActiveCache<T, R, Interval>;

/// An [`ActiveCache`] refreshed whenever [`ActiveCache::refresh`] is called.
pub type TriggeredCache<T, R> = ActiveCache<T, R, Signal>;

/// State shared between the cache handle and its monitor thread.
struct Shared<T, R, G> {
   state: CacheState,
   value: ArcSwapOption<T>,
   trigger: G,
   /// Locked by the monitor thread for its whole lifetime.
   refresher: Mutex<R>,
   options: Options,
   refreshes: AtomicU64,
   failures: AtomicU64,
}

/// A value computed off-thread and refreshed whenever a trigger fires.
///
/// The first read starts the monitor thread (unless the cache was started
/// already) and blocks until the first refresh completes. Every later read
/// returns the current value immediately, even while a refresh is running.
///
/// Values are handed out as `Arc<T>`: a reader keeps the snapshot it loaded
/// for as long as it needs it, independently of later refreshes.
///
/// Dropping the cache requests a stop but does not wait for the monitor
/// thread; use [`stop_and_join`](Self::stop_and_join) for that.
pub struct ActiveCache<T, R, G: Trigger> {
   shared: Arc<Shared<T, R, G>>,
   monitor: Mutex<Option<JoinHandle<()>>>,
}

impl<T, R, G> ActiveCache<T, R, G>
where
   T: Send + Sync + 'static,
   R: Refresh<T>,
   G: Trigger,
{
   /// Creates a cache that starts lazily on first read.
   #[must_use]
   pub fn new(refresher: R, trigger: G) -> Self {
      Self::from_parts(refresher, trigger, Options::new())
   }

   /// Creates a cache with explicit options.
   ///
   /// Fails only if [`Options::with_start_immediately`] was requested and the
   /// monitor thread could not be spawned.
   pub fn with_options(refresher: R, trigger: G, options: Options) -> Result<Self, Error> {
      let start_immediately = options.start_immediately;
      let cache = Self::from_parts(refresher, trigger, options);
      if start_immediately {
         cache.start()?;
      }
      Ok(cache)
   }

   fn from_parts(refresher: R, trigger: G, options: Options) -> Self {
      Self {
         shared: Arc::new(Shared {
            state: CacheState::new(),
            value: ArcSwapOption::empty(),
            trigger,
            refresher: Mutex::new(refresher),
            options,
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
         }),
         monitor: Mutex::new(None),
      }
   }

   /// Starts the monitor thread if it is not running yet.
   ///
   /// Idempotent and safe to race: exactly one monitor thread is ever spawned
   /// per cache. Does nothing once [`stop`](Self::stop) has been called.
   pub fn start(&self) -> Result<(), Error> {
      // Held across the claim and the spawn so that `join` never observes a
      // claimed monitor without its handle.
      let mut monitor = self.monitor.lock();
      if !self.shared.state.try_claim_start() {
         return Ok(());
      }
      tracing::debug!(cache = %self.shared.options.name, "starting monitor");

      let shared = Arc::clone(&self.shared);
      let spawned = thread::Builder::new()
         .name(self.shared.options.name.clone())
         .spawn(move || shared.monitor());
      match spawned {
         Ok(handle) => {
            *monitor = Some(handle);
            Ok(())
         }
         Err(err) => {
            tracing::error!(
               cache = %self.shared.options.name,
               error = %err,
               "failed to spawn monitor thread"
            );
            self.shared.state.abandon_start();
            Err(Error::Spawn(err))
         }
      }
   }

   /// Returns the current value, starting the monitor and waiting for the
   /// first refresh if necessary.
   ///
   /// Once a value exists this never blocks and never waits on an in-flight
   /// refresh. Before that, it blocks until the first refresh succeeds; it
   /// returns [`Error::Stopped`] if the monitor ends without producing one.
   #[inline]
   pub fn get(&self) -> Result<Arc<T>, Error> {
      if let Some(value) = self.try_get() {
         return Ok(value);
      }
      self.wait_first(None)
   }

   /// Like [`get`](Self::get), but gives up after `timeout` with
   /// [`Error::Timeout`] if no first value has been produced.
   pub fn get_timeout(&self, timeout: Duration) -> Result<Arc<T>, Error> {
      if let Some(value) = self.try_get() {
         return Ok(value);
      }
      let deadline = Instant::now().checked_add(timeout);
      self.wait_first(deadline.map(|deadline| (deadline, timeout)))
   }

   /// Returns the current value if one has been produced.
   ///
   /// Never blocks and never starts the monitor.
   #[inline]
   pub fn try_get(&self) -> Option<Arc<T>> {
      if self.shared.state.is_ready() {
         self.shared.value.load_full()
      } else {
         None
      }
   }

   /// Returns the current value, starting the monitor and waiting for the
   /// first refresh without blocking the async runtime if possible.
   ///
   /// Yields to the runtime for a while first, then falls back to
   /// `block_in_place`, which requires the multi-threaded runtime.
   #[cfg(any(feature = "async-tokio", feature = "async-tokio-mt"))]
   pub async fn get_async(&self) -> Result<Arc<T>, Error> {
      if let Some(value) = self.try_get() {
         return Ok(value);
      }
      self.start()?;

      #[allow(clippy::never_loop)]
      loop {
         for _ in 0..16 * 32 {
            tokio::task::yield_now().await;
            if let Some(value) = self.try_get() {
               return Ok(value);
            }
            if self.shared.state.snapshot(Ordering::Acquire).is_dead() {
               return Err(Error::Stopped);
            }
         }

         // Fallback to blocking wait if yielding didn't work
         #[cfg(feature = "async-tokio-mt")]
         {
            return tokio::task::block_in_place(|| self.get());
         }
      }
   }

   /// Cold path for `get` and `get_timeout`: start the monitor and park until
   /// the first value is published.
   #[cold]
   fn wait_first(&self, deadline: Option<(Instant, Duration)>) -> Result<Arc<T>, Error> {
      loop {
         let state = self.shared.state.snapshot(Ordering::Acquire);
         if state.is_ready() {
            return self.try_get().ok_or(Error::Stopped);
         }
         if state.is_dead() {
            return Err(Error::Stopped);
         }
         if !state.is_running() {
            self.start()?;
            continue;
         }
         if !self.shared.state.park(deadline.map(|(at, _)| at)) {
            return match (self.try_get(), deadline) {
               (Some(value), _) => Ok(value),
               (None, Some((_, timeout))) => Err(Error::Timeout(timeout)),
               (None, None) => continue,
            };
         }
      }
   }

   /// Requests the monitor loop to end.
   ///
   /// A refresh already in progress is completed, but no further refresh is
   /// started. The trigger is interrupted so that a monitor blocked between
   /// refreshes notices promptly. Idempotent; callable from any thread,
   /// including from inside a trigger.
   pub fn stop(&self) {
      if self.shared.state.request_stop() {
         tracing::debug!(cache = %self.shared.options.name, "stopping");
      }
      self.shared.trigger.interrupt();
   }

   /// Waits for the monitor thread to exit.
   ///
   /// Returns immediately if the monitor was never started or has already
   /// exited. Concurrent callers all wait: one joins the thread, the others
   /// park until the monitor has returned. Without a prior
   /// [`stop`](Self::stop) this waits for the loop to end on its own, which
   /// only happens under [`FailurePolicy::Stop`].
   pub fn join(&self) {
      let handle = self.monitor.lock().take();
      match handle {
         Some(handle) => {
            if handle.join().is_err() {
               tracing::error!(cache = %self.shared.options.name, "monitor thread panicked");
            }
         }
         None => self.shared.state.park_until_exited(),
      }
   }

   /// Stops the cache and waits for the monitor thread to exit.
   pub fn stop_and_join(&self) {
      self.stop();
      self.join();
   }
}

impl<T, R, G: Trigger> ActiveCache<T, R, G> {
   /// Checks if a first value has been produced. Never blocks.
   #[inline]
   pub fn is_initialized(&self) -> bool {
      self.shared.state.is_ready()
   }

   /// Checks if the monitor thread is alive (started and not yet exited).
   #[inline]
   pub fn is_running(&self) -> bool {
      self.shared.state.snapshot(Ordering::Acquire).is_alive()
   }

   /// Checks if a stop has been requested.
   #[inline]
   pub fn is_stopped(&self) -> bool {
      self.shared.state.snapshot(Ordering::Acquire).is_stopped()
   }

   /// Number of successful refreshes so far.
   #[inline]
   pub fn refresh_count(&self) -> u64 {
      self.shared.refreshes.load(Ordering::Acquire)
   }

   /// Number of failed or panicked refreshes so far.
   #[inline]
   pub fn failure_count(&self) -> u64 {
      self.shared.failures.load(Ordering::Acquire)
   }

   /// The options this cache was built with.
   #[inline]
   pub fn options(&self) -> &Options {
      &self.shared.options
   }

   /// The trigger driving this cache.
   #[inline]
   pub fn trigger(&self) -> &G {
      &self.shared.trigger
   }
}

impl<T, R> ActiveCache<T, R, Interval>
where
   T: Send + Sync + 'static,
   R: Refresh<T>,
{
   /// Creates a cache refreshed every `period`, starting lazily.
   #[must_use]
   pub fn every(refresher: R, period: Duration) -> Self {
      Self::new(refresher, Interval::new(period))
   }
}

impl<T, R> ActiveCache<T, R, Signal>
where
   T: Send + Sync + 'static,
   R: Refresh<T>,
{
   /// Creates a cache refreshed on demand through [`refresh`](Self::refresh),
   /// starting lazily.
   #[must_use]
   pub fn triggered(refresher: R) -> Self {
      Self::new(refresher, Signal::new())
   }

   /// Requests a refresh.
   ///
   /// Requests made while the monitor is busy are coalesced: at least one
   /// refresh happens after the most recent call, not one per call.
   #[inline]
   pub fn refresh(&self) {
      self.shared.trigger.post();
   }

   /// Returns a handle that external sources can use to request refreshes.
   #[inline]
   pub fn signal(&self) -> Signal {
      self.shared.trigger.clone()
   }
}

impl<T, R, G> Shared<T, R, G>
where
   T: Send + Sync + 'static,
   R: Refresh<T>,
   G: Trigger,
{
   /// Body of the monitor thread: refresh, publish, wait, repeat.
   fn monitor(&self) {
      let _exit = ExitGuard(&self.state);
      let name = self.options.name.as_str();
      let mut refresher = self.refresher.lock();

      loop {
         if self.state.snapshot(Ordering::Acquire).is_stopped() {
            break;
         }
         if !self.refresh_once(&mut *refresher) && self.options.on_failure == FailurePolicy::Stop {
            tracing::error!(cache = %name, "refresh failed, stopping monitor");
            break;
         }
         if self.state.snapshot(Ordering::Acquire).is_stopped() {
            break;
         }
         tracing::trace!(cache = %name, "waiting for trigger");
         self.trigger.wait();
      }
      tracing::debug!(cache = %name, "monitor exiting");
   }

   /// Runs one refresh and installs its result. Returns `false` on failure.
   fn refresh_once(&self, refresher: &mut R) -> bool {
      let name = self.options.name.as_str();
      let previous = self.value.load_full();
      let outcome = panic::catch_unwind(AssertUnwindSafe(|| refresher.refresh(previous.as_deref())));
      drop(previous);

      match outcome {
         Ok(Ok(value)) => {
            self.set_value(value);
            let count = self.refreshes.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!(cache = %name, count, "refreshed");
            if self.state.set_ready() {
               tracing::debug!(cache = %name, "first value published");
            }
            true
         }
         Ok(Err(err)) => {
            self.failures.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(cache = %name, error = %err, "refresh failed, keeping previous value");
            false
         }
         Err(payload) => {
            self.failures.fetch_add(1, Ordering::AcqRel);
            tracing::warn!(
               cache = %name,
               panic = panic_message(&*payload),
               "refresh panicked, keeping previous value"
            );
            false
         }
      }
   }

   /// Replaces the current value. Only called from the monitor thread.
   #[inline]
   fn set_value(&self, value: T) {
      self.value.store(Some(Arc::new(value)));
   }
}

/// Marks the monitor as exited when the monitor thread returns or unwinds,
/// releasing any reader still waiting for a first value.
struct ExitGuard<'a>(&'a CacheState);

impl Drop for ExitGuard<'_> {
   #[inline]
   fn drop(&mut self) {
      self.0.set_exited();
   }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
   if let Some(message) = payload.downcast_ref::<&'static str>() {
      *message
   } else if let Some(message) = payload.downcast_ref::<String>() {
      message.as_str()
   } else {
      "<non-string panic payload>"
   }
}

impl<T, R, G: Trigger> Drop for ActiveCache<T, R, G> {
   fn drop(&mut self) {
      if self.shared.state.request_stop() {
         tracing::debug!(cache = %self.shared.options.name, "dropped, stopping");
      }
      self.shared.trigger.interrupt();
   }
}

impl<T: fmt::Debug, R, G: Trigger> fmt::Debug for ActiveCache<T, R, G> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let mut d = f.debug_struct("ActiveCache");
      d.field("name", &self.shared.options.name);
      match self.shared.state.is_ready().then(|| self.shared.value.load_full()).flatten() {
         Some(v) => d.field("value", &v),
         None => d.field("value", &format_args!("<uninit>")),
      };
      d.field("refreshes", &self.refresh_count()).finish()
   }
}
