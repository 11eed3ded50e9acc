//! # Snapshot Worker
//!
//! Background sampler that captures TCP statistics at a fixed cadence while
//! a throughput test's foreground loop owns the data path. Lifecycle:
//!
//! ```text
//!   Created ──start()──▶ Started ──first sample──▶ Running ──stop()──▶ Stopped
//!                           │                                   │
//!                     caller blocks here                caller gets results
//! ```
//!
//! `start` does not return until the worker has taken its first sample, so
//! the timed data phase always begins with a baseline on record. The slot
//! vector is preallocated and never reallocated: sample indexes stay stable
//! for later analysis, and once capacity is reached further ticks are
//! no-ops. The mutex guards only the exit flag and the collected count; the
//! worker owns the samples outright until `stop` hands them back.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ─── Stats Backend Seam ─────────────────────────────────────────────────────

/// Source of point-in-time connection statistics. Implementations wrap
/// whatever kernel instrumentation is available; selection happens at
/// startup configuration, and snapshot failures are the backend's own
/// business — the worker only guarantees it keeps ticking until stopped.
pub trait StatsBackend: Send + 'static {
    type Snapshot: Send + 'static;

    fn take_snapshot(&mut self) -> Self::Snapshot;
}

// ─── Results ────────────────────────────────────────────────────────────────

/// Samples collected by one worker run. Owned by the worker while it runs;
/// ownership transfers to the caller at `stop`.
#[derive(Debug)]
pub struct SnapResults<T> {
    capacity: usize,
    samples: Vec<T>,
}

impl<T> SnapResults<T> {
    fn with_capacity(capacity: usize) -> Self {
        SnapResults {
            capacity,
            samples: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn collected(&self) -> usize {
        self.samples.len()
    }

    pub fn samples(&self) -> &[T] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<T> {
        self.samples
    }
}

/// Slots needed to cover a test of `duration` sampled every `interval`,
/// rounded up, with headroom for scheduling jitter.
pub fn capacity_for(duration: Duration, interval: Duration) -> usize {
    const MARGIN: usize = 2;
    let interval_us = interval.as_micros().max(1);
    let ticks = duration.as_micros().div_ceil(interval_us) as usize;
    ticks + MARGIN
}

// ─── Worker ─────────────────────────────────────────────────────────────────

struct WorkerState {
    should_exit: bool,
    started: bool,
    collected: usize,
}

struct Shared {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

/// Handle to one running sampler, constructed per test and discarded after
/// `stop`.
pub struct SnapWorker<T> {
    shared: Arc<Shared>,
    thread: JoinHandle<SnapResults<T>>,
}

impl<T: Send + 'static> SnapWorker<T> {
    /// Spawn the sampling loop and block until its first sample is on
    /// record.
    pub fn start<B>(mut backend: B, capacity: usize, interval: Duration) -> Self
    where
        B: StatsBackend<Snapshot = T>,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState {
                should_exit: false,
                started: false,
                collected: 0,
            }),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread = thread::spawn(move || {
            let mut results = SnapResults::with_capacity(capacity);

            let mut state = worker_shared.state.lock().unwrap();
            // Baseline sample, then release the starter.
            if results.samples.len() < results.capacity {
                results.samples.push(backend.take_snapshot());
                state.collected = results.samples.len();
            }
            state.started = true;
            worker_shared.cond.notify_all();

            loop {
                // The condvar wait doubles as the inter-sample sleep; stop()
                // notifies so shutdown never waits out a full interval.
                let (guard, _timeout) = worker_shared
                    .cond
                    .wait_timeout(state, interval)
                    .unwrap();
                state = guard;
                if state.should_exit {
                    break;
                }
                if results.samples.len() < results.capacity {
                    results.samples.push(backend.take_snapshot());
                    state.collected = results.samples.len();
                }
            }
            drop(state);
            tracing::debug!(collected = results.collected(), "snapshot worker exiting");
            results
        });

        let mut state = shared.state.lock().unwrap();
        while !state.started {
            state = shared.cond.wait(state).unwrap();
        }
        drop(state);

        SnapWorker { shared, thread }
    }

    /// Samples taken so far. Monotonically non-decreasing while running.
    pub fn collected(&self) -> usize {
        self.shared.state.lock().unwrap().collected
    }

    /// Signal the worker, join it, and take ownership of the results. After
    /// this returns nothing touches the worker again.
    pub fn stop(self) -> SnapResults<T> {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.should_exit = true;
        }
        self.shared.cond.notify_all();
        self.thread.join().expect("snapshot worker panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose snapshots are their own sequence numbers.
    struct Counter {
        next: usize,
        live: Arc<AtomicUsize>,
    }

    impl Counter {
        fn new(live: Arc<AtomicUsize>) -> Self {
            Counter { next: 0, live }
        }
    }

    impl StatsBackend for Counter {
        type Snapshot = usize;

        fn take_snapshot(&mut self) -> usize {
            let seq = self.next;
            self.next += 1;
            self.live.store(self.next, Ordering::SeqCst);
            seq
        }
    }

    #[test]
    fn start_blocks_until_first_sample() {
        let live = Arc::new(AtomicUsize::new(0));
        let worker = SnapWorker::start(
            Counter::new(live.clone()),
            8,
            Duration::from_millis(200),
        );
        // The long interval means only the baseline sample can exist yet.
        assert!(worker.collected() >= 1);
        assert!(live.load(Ordering::SeqCst) >= 1);
        worker.stop();
    }

    #[test]
    fn samples_fill_in_index_order() {
        let live = Arc::new(AtomicUsize::new(0));
        let worker = SnapWorker::start(Counter::new(live), 64, Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(60));
        let results = worker.stop();
        assert!(results.collected() >= 2);
        for (i, &seq) in results.samples().iter().enumerate() {
            assert_eq!(seq, i);
        }
    }

    #[test]
    fn capacity_bounds_collection_without_reallocation() {
        let live = Arc::new(AtomicUsize::new(0));
        let worker = SnapWorker::start(Counter::new(live.clone()), 3, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(50));
        let results = worker.stop();
        assert_eq!(results.collected(), 3);
        assert_eq!(results.capacity(), 3);
        // Once full, ticks are no-ops: the backend was never asked again.
        assert_eq!(live.load(Ordering::SeqCst), 3);
        assert_eq!(results.into_samples(), vec![0, 1, 2]);
    }

    #[test]
    fn stop_returns_promptly_despite_long_interval() {
        let live = Arc::new(AtomicUsize::new(0));
        let worker = SnapWorker::start(Counter::new(live), 8, Duration::from_secs(3600));
        let begun = std::time::Instant::now();
        let results = worker.stop();
        assert!(begun.elapsed() < Duration::from_secs(5));
        assert_eq!(results.collected(), 1);
    }

    #[test]
    fn capacity_estimate_rounds_up_with_margin() {
        let cap = capacity_for(Duration::from_secs(10), Duration::from_secs(3));
        assert_eq!(cap, 4 + 2);
        let exact = capacity_for(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(exact, 2 + 2);
    }
}
