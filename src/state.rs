//! Internal lifecycle state for active caches.
//!
//! The lifecycle of a cache instance is packed into a single `AtomicU8`:
//! - Bit 0: READY - At least one refresh has completed and the value is published
//! - Bit 1: RUNNING - A monitor thread has been claimed for this instance
//! - Bit 2: WAITING - At least one thread is parked waiting for a transition
//! - Bit 3: STOPPED - A stop has been requested
//! - Bit 4: EXITED - The monitor thread has returned
//!
//! READY, STOPPED and EXITED only ever go from clear to set. RUNNING is only
//! cleared again when spawning the monitor thread fails. Readers that arrive
//! before the first refresh, and joiners that lose the race for the thread
//! handle, park on the address of the atomic through `parking_lot_core`; every
//! publish of READY or EXITED wakes them all.

use core::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use parking_lot_core::{ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};

/// Copy of the state word at one point in time.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot(u8);

impl Snapshot {
   #[inline]
   pub(crate) const fn is_ready(self) -> bool {
      self.0 & CacheState::READY != 0
   }

   #[inline]
   pub(crate) const fn is_running(self) -> bool {
      self.0 & CacheState::RUNNING != 0
   }

   #[inline]
   pub(crate) const fn is_stopped(self) -> bool {
      self.0 & CacheState::STOPPED != 0
   }

   #[inline]
   pub(crate) const fn has_exited(self) -> bool {
      self.0 & CacheState::EXITED != 0
   }

   /// No first value can arrive anymore: the monitor has returned, or a stop
   /// was requested before any monitor was claimed.
   #[inline]
   pub(crate) const fn is_dead(self) -> bool {
      !self.is_ready() && (self.has_exited() || (self.is_stopped() && !self.is_running()))
   }

   /// A monitor has been claimed and has not returned yet.
   #[inline]
   pub(crate) const fn is_alive(self) -> bool {
      self.is_running() && !self.has_exited()
   }

   /// A parked reader still has something to wait for.
   #[inline]
   const fn must_wait(self) -> bool {
      self.0 & (CacheState::READY | CacheState::EXITED) == 0 && self.is_running()
   }
}

/// Atomic lifecycle state of one cache instance.
#[repr(transparent)]
pub(crate) struct CacheState(AtomicU8);

impl CacheState {
   /// Bit flag: first value published.
   const READY: u8 = 1;
   /// Bit flag: monitor thread claimed.
   const RUNNING: u8 = 2;
   /// Bit flag: a reader or joiner is (or is about to be) parked.
   const WAITING: u8 = 4;
   /// Bit flag: stop requested.
   const STOPPED: u8 = 8;
   /// Bit flag: monitor thread returned.
   const EXITED: u8 = 16;

   /// Creates a state for a cache that has never been started.
   #[inline]
   pub(crate) const fn new() -> Self {
      Self(AtomicU8::new(0))
   }

   #[inline]
   pub(crate) fn snapshot(&self, ordering: Ordering) -> Snapshot {
      Snapshot(self.0.load(ordering))
   }

   #[inline]
   pub(crate) fn is_ready(&self) -> bool {
      self.snapshot(Ordering::Acquire).is_ready()
   }

   /// Wakes every reader parked on this state.
   #[inline]
   fn notify_all(&self) {
      // SAFETY: The address passed to unpark must match the address used for park.
      // We consistently use the address of the AtomicU8.
      unsafe {
         parking_lot_core::unpark_all(self.0.as_ptr() as usize, DEFAULT_UNPARK_TOKEN);
      }
   }

   /// Sets `bits` with the given ordering and wakes parked readers if any
   /// were registered. Returns the previous state.
   #[inline]
   fn publish(&self, bits: u8, ordering: Ordering) -> Snapshot {
      let prev = self.0.fetch_or(bits, ordering);
      if prev & Self::WAITING != 0 {
         self.notify_all();
      }
      Snapshot(prev)
   }

   /// Claims the right to spawn the monitor thread.
   ///
   /// Returns `true` for exactly one caller over the lifetime of the state
   /// (unless the claim is handed back with [`abandon_start`](Self::abandon_start)).
   /// Returns `false` if a monitor is already claimed or a stop was requested.
   pub(crate) fn try_claim_start(&self) -> bool {
      let mut current = self.0.load(Ordering::Relaxed);
      loop {
         if current & (Self::RUNNING | Self::STOPPED) != 0 {
            return false;
         }
         match self.0.compare_exchange_weak(
            current,
            current | Self::RUNNING,
            Ordering::AcqRel,
            Ordering::Relaxed,
         ) {
            Ok(_) => return true,
            Err(actual) => {
               current = actual;
               std::hint::spin_loop();
            }
         }
      }
   }

   /// Hands back a claim from [`try_claim_start`](Self::try_claim_start) when
   /// the monitor could not be spawned. Parked readers are woken so that one
   /// of them can retry.
   pub(crate) fn abandon_start(&self) {
      let prev = self.0.fetch_and(!Self::RUNNING, Ordering::Release);
      if prev & Self::WAITING != 0 {
         self.notify_all();
      }
   }

   /// Marks the first value as published and releases every parked reader.
   /// Returns `true` if this call performed the transition.
   ///
   /// Release ordering makes the value store that precedes this call visible
   /// to every reader that observes READY with an Acquire load.
   #[inline]
   pub(crate) fn set_ready(&self) -> bool {
      !self.publish(Self::READY, Ordering::Release).is_ready()
   }

   /// Requests a stop. Returns `true` if this call performed the transition.
   #[inline]
   pub(crate) fn request_stop(&self) -> bool {
      !self.publish(Self::STOPPED, Ordering::AcqRel).is_stopped()
   }

   /// Records that the monitor thread returned and releases parked readers.
   #[inline]
   pub(crate) fn set_exited(&self) {
      self.publish(Self::EXITED, Ordering::Release);
   }

   /// Parks the calling thread until the first value is published, the
   /// monitor exits or is abandoned, or `deadline` passes.
   ///
   /// Returns `false` only if the deadline elapsed. Wake-ups may be spurious;
   /// callers re-check the state in a loop.
   #[inline]
   pub(crate) fn park(&self, deadline: Option<Instant>) -> bool {
      self.park_while(deadline, Snapshot::must_wait)
   }

   /// Parks the calling thread until a claimed monitor has exited (or the
   /// claim was abandoned). Returns immediately if no monitor was claimed.
   pub(crate) fn park_until_exited(&self) {
      while self.snapshot(Ordering::Acquire).is_alive() {
         self.park_while(None, Snapshot::is_alive);
      }
   }

   /// Parks while `condition` holds for the current state.
   fn park_while(&self, deadline: Option<Instant>, condition: fn(Snapshot) -> bool) -> bool {
      let state = self.publish_waiting();
      if !condition(state) {
         return true;
      }
      // SAFETY: See safety comment in `notify_all`.
      let result = unsafe {
         // park() checks the validation closure under the bucket lock *before*
         // sleeping, and unpark_all() takes the same lock, so a transition
         // that happens between our check and our sleep cannot be missed.
         parking_lot_core::park(
            self.0.as_ptr() as usize,
            || condition(self.snapshot(Ordering::Acquire)),
            || {},
            |_, _| {},
            DEFAULT_PARK_TOKEN,
            deadline,
         )
      };
      !matches!(result, ParkResult::TimedOut)
   }

   /// Registers interest in the next transition by setting WAITING.
   #[inline]
   fn publish_waiting(&self) -> Snapshot {
      let prev = self.0.fetch_or(Self::WAITING, Ordering::Acquire);
      Snapshot(prev | Self::WAITING)
   }
}
