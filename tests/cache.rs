use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use active_cache::{ActiveCache, Error, Options, Refresh, TriggeredCache};

/// Refresher that counts up from the previous value, like a version number.
struct Counting {
   runs: Arc<AtomicUsize>,
   first_delay: Duration,
   delay: Duration,
}

impl Counting {
   fn new(delay: Duration) -> (Self, Arc<AtomicUsize>) {
      Self::with_first_delay(delay, delay)
   }

   fn with_first_delay(first_delay: Duration, delay: Duration) -> (Self, Arc<AtomicUsize>) {
      let runs = Arc::new(AtomicUsize::new(0));
      let refresher = Self {
         runs: Arc::clone(&runs),
         first_delay,
         delay,
      };
      (refresher, runs)
   }
}

impl Refresh<u64> for Counting {
   type Error = Infallible;

   fn refresh(&mut self, previous: Option<&u64>) -> Result<u64, Infallible> {
      let run = self.runs.fetch_add(1, Ordering::SeqCst);
      thread::sleep(if run == 0 { self.first_delay } else { self.delay });
      Ok(previous.copied().unwrap_or(0) + 1)
   }
}

/// Polls `predicate` until it holds, panicking after a generous deadline.
fn wait_for(mut predicate: impl FnMut() -> bool) {
   let deadline = Instant::now() + Duration::from_secs(10);
   while !predicate() {
      assert!(Instant::now() < deadline, "condition not reached in time");
      thread::sleep(Duration::from_millis(5));
   }
}

fn current(cache: &TriggeredCache<u64, Counting>) -> u64 {
   *cache.try_get().expect("cache should be initialized")
}

#[test]
fn test_first_read_returns_first_value() {
   let (refresher, runs) = Counting::new(Duration::from_millis(20));
   let cache = TriggeredCache::triggered(refresher);

   assert!(!cache.is_initialized());
   assert!(!cache.is_running());
   assert_eq!(cache.try_get(), None);
   assert_eq!(runs.load(Ordering::SeqCst), 0); // Nothing happens until the first read

   assert_eq!(*cache.get().unwrap(), 1);
   assert!(cache.is_initialized());
   assert!(cache.is_running());
   assert_eq!(cache.refresh_count(), 1);
   assert_eq!(runs.load(Ordering::SeqCst), 1);

   cache.stop_and_join();
}

#[test]
fn test_concurrent_readers_share_first_refresh() {
   let (refresher, runs) = Counting::new(Duration::from_millis(100));
   let cache = Arc::new(TriggeredCache::triggered(refresher));
   let barrier = Arc::new(Barrier::new(20));

   let readers: Vec<_> = (0..20)
      .map(|_| {
         let cache = Arc::clone(&cache);
         let barrier = Arc::clone(&barrier);
         thread::spawn(move || {
            barrier.wait();
            *cache.get().unwrap()
         })
      })
      .collect();

   for reader in readers {
      assert_eq!(reader.join().unwrap(), 1);
   }
   // Crucially, the refresher should only have run once
   assert_eq!(runs.load(Ordering::SeqCst), 1);
   assert_eq!(cache.refresh_count(), 1);

   cache.stop_and_join();
}

#[test]
fn test_reads_never_wait_on_refresh() {
   let (refresher, _runs) = Counting::with_first_delay(Duration::ZERO, Duration::from_millis(500));
   let cache = TriggeredCache::triggered(refresher);
   assert_eq!(*cache.get().unwrap(), 1);

   cache.refresh();
   thread::sleep(Duration::from_millis(50)); // Second refresh is now in flight

   let start = Instant::now();
   let value = cache.get().unwrap();
   assert!(start.elapsed() < Duration::from_millis(250));
   assert_eq!(*value, 1); // Still the pre-refresh value

   wait_for(|| current(&cache) == 2);
   assert_eq!(*value, 1); // Snapshots held by readers are unaffected

   cache.stop_and_join();
}

#[test]
fn test_triggered_refresh_and_coalescing() {
   let (refresher, _runs) = Counting::new(Duration::from_millis(100));
   let cache = TriggeredCache::triggered(refresher);
   assert_eq!(*cache.get().unwrap(), 1);

   cache.refresh();
   assert_eq!(current(&cache), 1); // Not refreshed synchronously
   wait_for(|| current(&cache) == 2);

   cache.refresh();
   thread::sleep(Duration::from_millis(30)); // Third refresh is in flight
   cache.refresh();
   cache.refresh();

   wait_for(|| cache.refresh_count() >= 4);
   thread::sleep(Duration::from_millis(300));
   // Both requests made during the third refresh collapse into one more.
   assert_eq!(current(&cache), 4);
   assert_eq!(cache.refresh_count(), 4);
   assert!(!cache.signal().is_pending());

   cache.stop_and_join();
}

#[test]
fn test_instances_are_independent() {
   let (refresher_a, runs_a) = Counting::new(Duration::from_millis(20));
   let (refresher_b, runs_b) = Counting::new(Duration::from_millis(20));
   let cache_a = TriggeredCache::triggered(refresher_a);
   let cache_b = TriggeredCache::triggered(refresher_b);

   assert_eq!(*cache_a.get().unwrap(), 1);
   assert!(!cache_b.is_initialized()); // Reading one does not start the other
   assert_eq!(*cache_b.get().unwrap(), 1);

   cache_b.refresh();
   wait_for(|| current(&cache_b) == 2);
   thread::sleep(Duration::from_millis(50));
   assert_eq!(current(&cache_a), 1);
   assert_eq!(runs_a.load(Ordering::SeqCst), 1);
   assert_eq!(runs_b.load(Ordering::SeqCst), 2);

   cache_a.stop_and_join();
   cache_b.stop_and_join();
}

#[test]
fn test_stop_terminates_loop() {
   let (refresher, runs) = Counting::new(Duration::from_millis(10));
   let cache = TriggeredCache::triggered(refresher);
   assert_eq!(*cache.get().unwrap(), 1);

   cache.stop_and_join();
   assert!(cache.is_stopped());
   assert!(!cache.is_running());

   cache.refresh();
   cache.refresh();
   thread::sleep(Duration::from_millis(50));
   assert_eq!(runs.load(Ordering::SeqCst), 1);
   assert_eq!(*cache.get().unwrap(), 1); // The last value is still served
}

#[test]
fn test_stop_completes_refresh_in_flight() {
   let (refresher, runs) = Counting::with_first_delay(Duration::ZERO, Duration::from_millis(200));
   let cache = TriggeredCache::triggered(refresher);
   assert_eq!(*cache.get().unwrap(), 1);

   cache.refresh();
   thread::sleep(Duration::from_millis(50));
   cache.stop_and_join();

   assert_eq!(runs.load(Ordering::SeqCst), 2);
   assert_eq!(*cache.get().unwrap(), 2);
}

#[test]
fn test_concurrent_joins_wait_for_exit() {
   let runs = Arc::new(AtomicUsize::new(0));
   let cache = Arc::new(ActiveCache::new(
      {
         let runs = Arc::clone(&runs);
         move || Ok::<_, Infallible>(runs.fetch_add(1, Ordering::SeqCst))
      },
      || thread::sleep(Duration::from_millis(300)),
   ));
   cache.get().unwrap();
   cache.stop();

   let first = {
      let cache = Arc::clone(&cache);
      thread::spawn(move || {
         cache.join();
         cache.is_running()
      })
   };
   thread::sleep(Duration::from_millis(20)); // Let the first joiner take the handle
   cache.join();
   assert!(!cache.is_running());
   assert!(!first.join().unwrap());
}

#[test]
fn test_stop_and_join_racing_start() {
   for _ in 0..50 {
      let (refresher, _runs) = Counting::new(Duration::ZERO);
      let cache = Arc::new(TriggeredCache::triggered(refresher));
      let starter = {
         let cache = Arc::clone(&cache);
         thread::spawn(move || cache.start().unwrap())
      };
      cache.stop_and_join();
      starter.join().unwrap();
      cache.join();
      assert!(!cache.is_running());
   }
}

#[test]
fn test_stop_is_idempotent() {
   let (refresher, _runs) = Counting::new(Duration::ZERO);
   let cache = TriggeredCache::triggered(refresher);
   cache.get().unwrap();
   cache.stop();
   cache.stop();
   cache.join();
   cache.join(); // Joining twice is a no-op
   assert!(!cache.is_running());
}

#[test]
fn test_stop_before_start() {
   let (refresher, runs) = Counting::new(Duration::ZERO);
   let cache = TriggeredCache::triggered(refresher);
   cache.stop();

   assert!(matches!(cache.get(), Err(Error::Stopped)));
   assert!(cache.start().is_ok()); // Start after stop does nothing
   assert!(!cache.is_running());
   assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_start_is_idempotent() {
   let (refresher, runs) = Counting::new(Duration::from_millis(50));
   let cache = Arc::new(TriggeredCache::triggered(refresher));

   let starters: Vec<_> = (0..10)
      .map(|_| {
         let cache = Arc::clone(&cache);
         thread::spawn(move || cache.start().unwrap())
      })
      .collect();
   for starter in starters {
      starter.join().unwrap();
   }

   assert_eq!(*cache.get().unwrap(), 1);
   thread::sleep(Duration::from_millis(50));
   assert_eq!(runs.load(Ordering::SeqCst), 1);

   cache.stop_and_join();
}

#[test]
fn test_start_immediately() {
   let (refresher, runs) = Counting::new(Duration::ZERO);
   let options = Options::new().with_name("eager").with_start_immediately(true);
   let cache = ActiveCache::with_options(refresher, active_cache::Signal::new(), options).unwrap();

   assert!(cache.options().starts_immediately());
   wait_for(|| cache.is_initialized());
   assert_eq!(runs.load(Ordering::SeqCst), 1);
   assert_eq!(cache.try_get().as_deref(), Some(&1));

   cache.stop_and_join();
}

#[test]
fn test_get_timeout() {
   let (refresher, _runs) = Counting::new(Duration::from_millis(500));
   let cache = TriggeredCache::triggered(refresher);

   let err = cache.get_timeout(Duration::from_millis(20)).unwrap_err();
   assert!(matches!(err, Error::Timeout(timeout) if timeout == Duration::from_millis(20)));
   assert!(cache.is_running()); // The timed-out read still started the monitor

   assert_eq!(*cache.get_timeout(Duration::from_secs(10)).unwrap(), 1);
   assert_eq!(*cache.get_timeout(Duration::ZERO).unwrap(), 1); // Ready values never time out

   cache.stop_and_join();
}

#[test]
fn test_external_signal_handle() {
   let (refresher, _runs) = Counting::new(Duration::ZERO);
   let cache = TriggeredCache::triggered(refresher);
   assert_eq!(*cache.get().unwrap(), 1);

   let signal = cache.signal();
   thread::spawn(move || signal.post()).join().unwrap();
   wait_for(|| current(&cache) == 2);

   cache.stop_and_join();
}

#[test]
fn test_drop_stops_monitor() {
   let runs = Arc::new(AtomicUsize::new(0));
   let cache = active_cache::TimeoutCache::every(
      {
         let runs = Arc::clone(&runs);
         move || Ok::<_, Infallible>(runs.fetch_add(1, Ordering::SeqCst))
      },
      Duration::from_millis(1),
   );
   cache.get().unwrap();
   drop(cache);

   thread::sleep(Duration::from_millis(50));
   let settled = runs.load(Ordering::SeqCst);
   thread::sleep(Duration::from_millis(100));
   assert_eq!(runs.load(Ordering::SeqCst), settled);
}

#[test]
fn test_debug_output() {
   let (refresher, _runs) = Counting::new(Duration::ZERO);
   let cache = TriggeredCache::triggered(refresher);
   assert!(format!("{cache:?}").contains("<uninit>"));
   cache.get().unwrap();
   let debug = format!("{cache:?}");
   assert!(debug.contains("value: 1"), "{debug}");
   cache.stop_and_join();
}
