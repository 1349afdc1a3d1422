//! Scheduling abstraction for debounce, recovery and degraded-mode timers
//!
//! Every timer in the framework goes through [`Clock`], so production code runs
//! on tokio's timer wheel while tests drive a [`ManualClock`] deterministically.

use log::{debug, warn};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Boxed, sendable future used at trait seams
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Work scheduled to run once a timer fires
pub type TimerCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + 'static>;

/// Opaque identifier of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

/// Schedules callbacks after a delay and cancels them
pub trait Clock: Send + Sync {
    /// Run `callback` once `delay` has elapsed
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Cancel a pending timer. Returns `false` if it already fired or was cancelled.
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Cancel every pending timer
    fn cancel_all(&self);

    /// Number of timers that have not fired yet
    fn pending(&self) -> usize;
}

/// Build a [`TimerCallback`] from an async closure
pub fn callback<F, Fut>(f: F) -> TimerCallback
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Clock backed by the tokio runtime
#[derive(Debug, Default)]
pub struct TokioClock {
    next_id: AtomicU64,
    tasks: Arc<Mutex<HashMap<u64, JoinHandle<()>>>>,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for TokioClock {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot schedule timer {} outside a tokio runtime: {}", id, e);
                return TimerHandle(id);
            }
        };

        // Hold the lock while spawning so the task cannot deregister before it is registered
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        let registry = Arc::clone(&self.tasks);
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&id);
            callback().await;
        });
        tasks.insert(id, task);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let task = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&handle.0);
        match task {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for (_, task) in tasks.drain() {
            task.abort();
        }
    }

    fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    /// Keyed by (deadline, id) so equal deadlines fire in scheduling order
    timers: BTreeMap<(Duration, u64), TimerCallback>,
    deadlines: HashMap<u64, Duration>,
}

/// Deterministic virtual clock for tests
///
/// Time only moves when [`ManualClock::advance`] is called. Due callbacks run
/// inline, in deadline order, and each callback's future is awaited before the
/// next one fires.
#[derive(Default)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since the clock was created
    pub fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).now
    }

    /// Move time forward by `by`, firing every timer that comes due
    pub async fn advance(&self, by: Duration) {
        let target = self.now() + by;
        loop {
            let next = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let due = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some(key) => {
                        state.now = key.0;
                        state.deadlines.remove(&key.1);
                        state.timers.remove(&key)
                    }
                    None => None,
                }
            };

            match next {
                Some(callback) => callback().await,
                None => break,
            }
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.now < target {
            state.now = target;
        }
    }
}

impl Clock for ManualClock {
    fn after(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = state.next_id;
        state.next_id += 1;
        let deadline = state.now + delay;
        state.timers.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        debug!("Scheduled virtual timer {} at {:?}", id, deadline);
        TimerHandle(id)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.deadlines.remove(&handle.0) {
            Some(deadline) => state.timers.remove(&(deadline, handle.0)).is_some(),
            None => false,
        }
    }

    fn cancel_all(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.timers.clear();
        state.deadlines.clear();
    }

    fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .timers
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
        let counter = Arc::clone(counter);
        callback(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_manual_clock_fires_when_due() {
        let clock = ManualClock::new();
        let counter = Arc::new(AtomicUsize::new(0));

        clock.after(Duration::from_millis(100), counter_callback(&counter));
        assert_eq!(clock.pending(), 1);

        clock.advance(Duration::from_millis(99)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_millis(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(clock.pending(), 0);
        assert_eq!(clock.now(), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_manual_clock_cancel() {
        let clock = ManualClock::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let handle = clock.after(Duration::from_millis(10), counter_callback(&counter));
        assert!(clock.cancel(handle));
        assert!(!clock.cancel(handle));

        clock.advance(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_manual_clock_fires_in_deadline_order() {
        let clock = ManualClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for (delay, label) in [(30u64, "c"), (10, "a"), (20, "b"), (10, "a2")] {
            let order = Arc::clone(&order);
            clock.after(
                Duration::from_millis(delay),
                callback(move || async move {
                    order.lock().unwrap().push(label);
                }),
            );
        }

        clock.advance(Duration::from_millis(30)).await;
        assert_eq!(*order.lock().unwrap(), vec!["a", "a2", "b", "c"]);
    }

    #[tokio::test]
    async fn test_manual_clock_fires_timers_scheduled_by_callbacks() {
        let clock = Arc::new(ManualClock::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_clock = Arc::clone(&clock);
        let inner_counter = Arc::clone(&counter);
        clock.after(
            Duration::from_millis(10),
            callback(move || async move {
                inner_clock.after(Duration::from_millis(10), counter_callback(&inner_counter));
            }),
        );

        clock.advance(Duration::from_millis(15)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(clock.pending(), 1);

        clock.advance(Duration::from_millis(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tokio_clock_fires_and_cancels() {
        let clock = TokioClock::new();
        let counter = Arc::new(AtomicUsize::new(0));

        clock.after(Duration::from_millis(5), counter_callback(&counter));
        let cancelled = clock.after(Duration::from_millis(5), counter_callback(&counter));
        assert!(clock.cancel(cancelled));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(clock.pending(), 0);
    }
}
