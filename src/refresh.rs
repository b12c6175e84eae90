//! The computation that produces a cache's value.

use core::fmt;

/// Produces a fresh value for an [`ActiveCache`](crate::ActiveCache).
///
/// The monitor thread owns the refresher and calls [`refresh`](Self::refresh)
/// once immediately after start and once after every trigger. Calls never
/// overlap, so implementations may keep mutable state between runs. A refresh
/// may take arbitrarily long; readers keep seeing the previous value until the
/// new one is installed.
///
/// Closures of the form `FnMut() -> Result<T, E>` implement this trait.
pub trait Refresh<T>: Send + 'static {
   /// Failure reported by a refresh. It is logged and handled according to
   /// the cache's [`FailurePolicy`](crate::FailurePolicy).
   type Error: fmt::Display;

   /// Computes the next value. `previous` is the value currently served, or
   /// `None` before the first successful refresh.
   fn refresh(&mut self, previous: Option<&T>) -> Result<T, Self::Error>;
}

impl<T, E, F> Refresh<T> for F
where
   F: FnMut() -> Result<T, E> + Send + 'static,
   E: fmt::Display,
{
   type Error = E;

   #[inline]
   fn refresh(&mut self, _previous: Option<&T>) -> Result<T, E> {
      self()
   }
}
