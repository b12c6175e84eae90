//! Construction-time configuration of a cache.

/// What the monitor does when a refresh fails or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
   /// Log the failure, keep the last good value, and try again after the
   /// next trigger. Readers waiting for a first value keep waiting.
   #[default]
   Retry,
   /// Log the failure and end the monitor loop. Readers waiting for a first
   /// value are released with [`Error::Stopped`](crate::Error::Stopped).
   Stop,
}

/// Options for [`ActiveCache::with_options`](crate::ActiveCache::with_options).
#[derive(Debug, Clone)]
pub struct Options {
   pub(crate) name: String,
   pub(crate) start_immediately: bool,
   pub(crate) on_failure: FailurePolicy,
}

impl Options {
   /// Default name of the monitor thread and of the `cache` log field.
   pub const DEFAULT_NAME: &'static str = "active-cache";

   /// Creates the default options: lazy start, retry on failure.
   #[inline]
   #[must_use]
   pub fn new() -> Self {
      Self {
         name: Self::DEFAULT_NAME.to_owned(),
         start_immediately: false,
         on_failure: FailurePolicy::Retry,
      }
   }

   /// Names the monitor thread. The name also tags every log event.
   #[must_use]
   pub fn with_name(mut self, name: impl Into<String>) -> Self {
      self.name = name.into();
      self
   }

   /// Starts the monitor at construction instead of on first read.
   #[must_use]
   pub fn with_start_immediately(mut self, start_immediately: bool) -> Self {
      self.start_immediately = start_immediately;
      self
   }

   /// Chooses how the monitor reacts to a failed or panicking refresh.
   #[must_use]
   pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
      self.on_failure = policy;
      self
   }

   /// Name of the monitor thread and of the `cache` log field.
   pub fn name(&self) -> &str {
      &self.name
   }

   /// Checks if the monitor starts at construction.
   pub fn starts_immediately(&self) -> bool {
      self.start_immediately
   }

   /// The configured [`FailurePolicy`].
   pub fn failure_policy(&self) -> FailurePolicy {
      self.on_failure
   }
}

impl Default for Options {
   #[inline]
   fn default() -> Self {
      Self::new()
   }
}
