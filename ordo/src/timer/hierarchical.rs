use super::bucket::Bucket;
use super::clock;
use super::delay_queue::DelayQueue;
use super::entry::{Timeout, TimerTaskEntry};
use super::wheel::{Placement, TimingWheel};
use super::{Timer, TimerBuilder, TimerTask};
use crate::error::TimerError;
use crate::runtime::{Executor, Lifecycle, ThreadPool};

use parking_lot::{Mutex, RwLock};

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

/// A timer built on a hierarchy of timing wheels.
///
/// Inserting a timeout is O(1) and only takes a read lock, so many threads
/// can insert concurrently. A dedicated clock thread waits on a delay queue
/// holding one element per non-empty bucket, advances the wheels when a
/// bucket is due and hands expired tasks to an executor pool: a slow task
/// never delays other expirations.
///
/// A task never runs before its delay has elapsed, and typically runs
/// within one tick after it.
///
/// # Examples
///
/// ```rust
/// use ordo::timer::{Timer, TimerBuilder};
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// let timer = TimerBuilder::new().tick(Duration::from_millis(10)).build();
/// let (tx, rx) = mpsc::channel();
///
/// timer
///     .new_timeout(Box::new(move |_| tx.send("fired").unwrap()), Duration::from_millis(50))
///     .unwrap();
///
/// assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "fired");
/// timer.stop().unwrap();
/// ```
#[derive(Clone)]
pub struct HierarchicalTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    name: String,

    wheel: TimingWheel,
    queue: Arc<DelayQueue>,

    /// Read for inserts, write for clock advances and stop.
    lock: RwLock<()>,

    /// Runs expired tasks.
    executor: ThreadPool,

    /// Timeouts neither expired nor cancelled.
    pending: Arc<AtomicUsize>,

    stopped: AtomicBool,

    /// Longest single wait of the clock thread.
    poll_timeout: Duration,

    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl HierarchicalTimer {
    /// Creates a timer with the default configuration.
    pub fn new() -> Self {
        TimerBuilder::new().build()
    }

    pub(crate) fn start(
        name: String,
        tick_ms: i64,
        wheel_size: i64,
        poll_timeout: Duration,
        executor_threads: usize,
    ) -> Self {
        let queue = Arc::new(DelayQueue::new());
        let inner = Arc::new(TimerInner {
            wheel: TimingWheel::new(tick_ms, wheel_size, clock::now_ms(), queue.clone()),
            queue,
            lock: RwLock::new(()),
            executor: ThreadPool::fixed(format!("{name}-executor"), executor_threads),
            pending: Arc::new(AtomicUsize::new(0)),
            stopped: AtomicBool::new(false),
            poll_timeout,
            worker: Mutex::new(None),
            name,
        });

        let weak = Arc::downgrade(&inner);
        let spawned = thread::Builder::new()
            .name(format!("{}-clock", inner.name))
            .spawn(move || clock_loop(weak));

        match spawned {
            Ok(handle) => *inner.worker.lock() = Some(handle),
            Err(error) => {
                tracing::error!(timer = %inner.name, %error, "failed to start the clock thread");
                inner.stopped.store(true, Ordering::Release);
            }
        }

        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of timeouts neither expired nor cancelled.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }
}

impl Default for HierarchicalTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of the clock thread.
///
/// Holds only a weak reference between polls, so the thread exits on its
/// own once every timer handle is gone.
fn clock_loop(timer: Weak<TimerInner>) {
    while let Some(inner) = timer.upgrade() {
        if inner.stopped.load(Ordering::Acquire) {
            break;
        }

        inner.advance(inner.poll_timeout);
    }

    tracing::trace!("timer clock thread exited");
}

impl TimerInner {
    /// Waits up to `timeout` for a due bucket, then advances the clock and
    /// flushes every bucket that is due.
    fn advance(&self, timeout: Duration) -> bool {
        let Some(mut bucket) = self.queue.poll(timeout) else {
            return false;
        };

        let _guard = self.lock.write();
        loop {
            self.wheel.advance_clock(bucket.expiration());

            for entry in bucket.flush() {
                self.place(entry);
            }

            match self.queue.poll_now() {
                Some(next) => bucket = next,
                None => break,
            }
        }

        true
    }

    /// Inserts `entry` into the wheel, expiring it if it is already due.
    ///
    /// Callers hold the lock, in either mode.
    fn place(&self, entry: Arc<TimerTaskEntry>) {
        match self.wheel.add(entry.clone()) {
            Placement::Due if entry.expiration_ms > clock::now_ms() => self.park(entry),
            Placement::Due => self.expire(entry),
            Placement::Scheduled | Placement::Cancelled => {}
        }
    }

    /// Queues an entry that falls within the current tick but is not due
    /// yet, in a bucket of its own keyed by its exact expiration. The wheel
    /// itself only resolves whole ticks.
    fn park(&self, entry: Arc<TimerTaskEntry>) {
        let bucket = Bucket::new();
        bucket.set_expiration(entry.expiration_ms);
        bucket.add(entry);
        self.queue.offer(bucket);
    }

    fn expire(&self, entry: Arc<TimerTaskEntry>) {
        let Some(task) = entry.expire() else {
            return;
        };

        let timeout = Timeout::new(entry);
        if let Err(error) = self.executor.execute(Box::new(move || task(&timeout))) {
            tracing::warn!(timer = %self.name, %error, "expired timeout could not be run");
        }
    }
}

impl Drop for TimerInner {
    fn drop(&mut self) {
        self.executor.shutdown_gracefully();
    }
}

impl Timer for HierarchicalTimer {
    fn new_timeout(&self, task: TimerTask, delay: Duration) -> Result<Timeout, TimerError> {
        if self.is_stopped() {
            return Err(TimerError::Stopped);
        }

        let expiration = clock::deadline_ms(delay);
        let entry = TimerTaskEntry::new(expiration, task, self.inner.pending.clone());
        let timeout = Timeout::new(entry.clone());

        let _guard = self.inner.lock.read();

        // Stop sets the flag before draining under the write lock.
        if self.is_stopped() {
            entry.cancel();
            return Err(TimerError::Stopped);
        }

        self.inner.place(entry);
        Ok(timeout)
    }

    /// Stops the clock thread and the executor pool.
    ///
    /// Tasks already handed to the pool still run. Returns the timeouts that
    /// were still pending, now cancelled.
    fn stop(&self) -> Result<HashSet<Timeout>, TimerError> {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return Err(TimerError::AlreadyStopped);
        }

        self.inner.queue.close();

        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::error!(timer = %self.inner.name, "clock thread panicked");
            }
        }

        let entries = {
            let _guard = self.inner.lock.write();
            let mut entries = self.inner.wheel.drain();

            // Parked entries live only in the queue.
            for bucket in self.inner.queue.drain() {
                entries.extend(bucket.flush());
            }
            entries
        };

        let cancelled: HashSet<Timeout> = entries
            .into_iter()
            .filter(|entry| entry.cancel())
            .map(Timeout::new)
            .collect();

        self.inner.executor.shutdown_gracefully();

        tracing::debug!(timer = %self.inner.name, cancelled = cancelled.len(), "timer stopped");
        Ok(cancelled)
    }
}

impl fmt::Debug for HierarchicalTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HierarchicalTimer")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .field("levels", &self.inner.wheel.levels())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Lets callers wait for the executor pool after [`Timer::stop`].
impl Lifecycle for HierarchicalTimer {
    fn shutdown(&self) -> Vec<crate::runtime::Task> {
        // Stopping twice is harmless here.
        let _ = Timer::stop(self);
        Vec::new()
    }

    fn is_shutdown(&self) -> bool {
        self.is_stopped()
    }

    fn is_terminated(&self) -> bool {
        self.inner.executor.is_terminated()
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.executor.await_termination(timeout)
    }
}
