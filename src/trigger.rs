//! Policies deciding when the monitor refreshes next.
//!
//! A [`Trigger`] blocks the monitor thread between refreshes. Two policies
//! ship with the crate:
//!
//! - [`Interval`]: waits a fixed duration (backs [`TimeoutCache`](crate::TimeoutCache)).
//! - [`Signal`]: waits for an explicit wake-up (backs [`TriggeredCache`](crate::TriggeredCache)).

use core::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Blocks the monitor thread until the next refresh is due.
///
/// A trigger that never returns means the cache never refreshes again.
/// [`interrupt`](Self::interrupt) is called by
/// [`ActiveCache::stop`](crate::ActiveCache::stop) and should make a
/// concurrent or subsequent [`wait`](Self::wait) return promptly so that the
/// monitor can observe the stop.
///
/// Closures of the form `Fn()` implement this trait without interrupt support.
pub trait Trigger: Send + Sync + 'static {
   /// Blocks until the next refresh should happen.
   fn wait(&self);

   /// Unblocks a pending or upcoming [`wait`](Self::wait).
   #[inline]
   fn interrupt(&self) {}
}

impl<F> Trigger for F
where
   F: Fn() + Send + Sync + 'static,
{
   #[inline]
   fn wait(&self) {
      self()
   }
}

/// Fixed-interval trigger: each wait lasts `period`.
///
/// An interrupt ends the current wait early, or the next one if no wait is in
/// progress. It is consumed by that wait; later waits last the full period
/// again.
#[derive(Debug)]
pub struct Interval {
   period: Duration,
   /// Pending interrupt, consumed by the wait it ends.
   interrupted: Mutex<bool>,
   wakeup: Condvar,
}

impl Interval {
   /// Refresh period used by [`Interval::default`].
   pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

   /// Creates a trigger firing every `period`. A zero period never blocks.
   #[inline]
   #[must_use]
   pub fn new(period: Duration) -> Self {
      Self {
         period,
         interrupted: Mutex::new(false),
         wakeup: Condvar::new(),
      }
   }

   /// The time each wait lasts when not interrupted.
   #[inline]
   pub fn period(&self) -> Duration {
      self.period
   }
}

impl Default for Interval {
   #[inline]
   fn default() -> Self {
      Self::new(Self::DEFAULT_PERIOD)
   }
}

impl Trigger for Interval {
   fn wait(&self) {
      if self.period.is_zero() {
         return;
      }
      let mut interrupted = self.interrupted.lock();
      if mem::take(&mut *interrupted) {
         return;
      }
      match Instant::now().checked_add(self.period) {
         Some(deadline) => {
            while !*interrupted {
               if self.wakeup.wait_until(&mut interrupted, deadline).timed_out() {
                  break;
               }
            }
         }
         // Period too large to represent as a deadline: wait for an interrupt.
         None => {
            while !*interrupted {
               self.wakeup.wait(&mut interrupted);
            }
         }
      }
      *interrupted = false;
   }

   fn interrupt(&self) {
      *self.interrupted.lock() = true;
      self.wakeup.notify_all();
   }
}

struct SignalSlot {
   pending: Mutex<bool>,
   wakeup: Condvar,
}

/// Externally posted trigger with a single pending slot.
///
/// [`post`](Self::post) fills the slot and [`wait`](Trigger::wait) drains it.
/// Posts made while the slot is already full are coalesced, so every post
/// guarantees at least one later refresh but not one refresh per post.
///
/// Clones share the same slot and can be handed to other threads.
#[derive(Clone)]
pub struct Signal(Arc<SignalSlot>);

impl Signal {
   /// Creates a signal with an empty slot.
   #[must_use]
   pub fn new() -> Self {
      Self(Arc::new(SignalSlot {
         pending: Mutex::new(false),
         wakeup: Condvar::new(),
      }))
   }

   /// Requests one more refresh.
   pub fn post(&self) {
      *self.0.pending.lock() = true;
      self.0.wakeup.notify_one();
   }

   /// Checks if a posted signal has not been consumed yet.
   pub fn is_pending(&self) -> bool {
      *self.0.pending.lock()
   }
}

impl Default for Signal {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}

impl Trigger for Signal {
   fn wait(&self) {
      let mut pending = self.0.pending.lock();
      while !*pending {
         self.0.wakeup.wait(&mut pending);
      }
      *pending = false;
   }

   #[inline]
   fn interrupt(&self) {
      self.post();
   }
}

impl core::fmt::Debug for Signal {
   fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
      f.debug_struct("Signal")
         .field("pending", &self.is_pending())
         .finish()
   }
}
