use super::context::{self, ExecutorId};
use super::executor::{Executor, Lifecycle, Scheduler, Task, run_task};
use super::latch::TerminationLatch;
use super::memory::{MemoryProbe, MemorySafeQueue, Offer, RejectPolicy, SystemMemory};
use super::scheduled::{PeriodicTask, ScheduledFuture, relay, relay_periodic};
use super::state::{SHUTDOWN, SHUTTING_DOWN, STARTED, TERMINATED};
use crate::error::ExecutorError;

use parking_lot::Mutex;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Configuration of an [`OrderedEventLoop`].
#[derive(Clone)]
pub struct OrderedLoopConfig {
    /// Applied when available memory drops below `max_free_memory`.
    pub reject_policy: RejectPolicy,

    /// Free-memory threshold in bytes below which new tasks are rejected.
    /// Zero disables the check.
    pub max_free_memory: u64,

    /// A single task running longer than this is reported with a warning.
    pub warn_threshold: Duration,

    /// Available-memory source.
    pub probe: Arc<dyn MemoryProbe>,
}

impl Default for OrderedLoopConfig {
    fn default() -> Self {
        Self {
            reject_policy: RejectPolicy::Discard,
            max_free_memory: 0,
            warn_threshold: Duration::from_secs(1),
            probe: Arc::new(SystemMemory::new()),
        }
    }
}

impl fmt::Debug for OrderedLoopConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedLoopConfig")
            .field("reject_policy", &self.reject_policy)
            .field("max_free_memory", &self.max_free_memory)
            .field("warn_threshold", &self.warn_threshold)
            .finish_non_exhaustive()
    }
}

/// A logical execution lane that runs its tasks one at a time, in FIFO
/// order, on threads borrowed from a shared pool.
///
/// Submitting a task increments an in-flight counter; only the submission
/// that moves it from zero to one hands a drain task to the pool, every
/// other submission piggybacks on that drain. At most one thread therefore
/// consumes the lane at any instant, but successive drains may run on
/// different threads: thread-local state is not stable across tasks.
///
/// The queue is memory-bounded: when available memory falls below
/// [`OrderedLoopConfig::max_free_memory`] the [`RejectPolicy`] decides the
/// fate of new tasks.
#[derive(Clone)]
pub struct OrderedEventLoop {
    inner: Arc<Inner>,
}

struct Inner {
    id: ExecutorId,
    name: String,

    /// Pool the drain task runs on.
    pool: Arc<dyn Executor>,

    /// Timer source for the `schedule*` family.
    scheduler: Arc<dyn Scheduler>,

    queue: Mutex<MemorySafeQueue<Task>>,

    /// Queued tasks plus the one being run, if any.
    in_flight: AtomicUsize,

    state: AtomicUsize,
    warn_threshold: Duration,
    termination: TerminationLatch,
}

impl OrderedEventLoop {
    /// Creates an ordered loop draining on `pool` and scheduling through
    /// `scheduler`.
    pub fn new(
        name: impl Into<String>,
        pool: Arc<dyn Executor>,
        scheduler: Arc<dyn Scheduler>,
        config: OrderedLoopConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ExecutorId::next(),
                name: name.into(),
                pool,
                scheduler,
                queue: Mutex::new(MemorySafeQueue::new(
                    config.probe,
                    config.max_free_memory,
                    config.reject_policy,
                )),
                in_flight: AtomicUsize::new(0),
                state: AtomicUsize::new(STARTED),
                warn_threshold: config.warn_threshold,
                termination: TerminationLatch::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Tasks submitted and not yet finished, including the running one.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Stops accepting tasks; already queued tasks still run.
    pub fn shutdown_gracefully(&self) {
        if self
            .inner
            .state
            .compare_exchange(STARTED, SHUTTING_DOWN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.inner.terminate_if_idle();
        }
    }

    fn as_executor(&self) -> Arc<dyn Executor> {
        Arc::new(self.clone())
    }

    fn rejected(&self) -> ExecutorError {
        ExecutorError::Rejected(self.inner.name.clone())
    }

    fn ensure_accepting(&self) -> Result<(), ExecutorError> {
        if self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
            Err(self.rejected())
        } else {
            Ok(())
        }
    }
}

impl Inner {
    /// Drain task body: runs queued tasks until the lane is empty.
    fn drain(self: Arc<Self>) {
        context::enter_executor(self.id, || {
            loop {
                let Some(task) = self.queue.lock().poll() else {
                    // Shutdown removed the rest of the queue.
                    break;
                };

                let started = Instant::now();
                run_task(&self.name, task);

                let elapsed = started.elapsed();
                if elapsed > self.warn_threshold {
                    tracing::warn!(
                        event_loop = %self.name,
                        ?elapsed,
                        threshold = ?self.warn_threshold,
                        "ordered task exceeded the warn threshold"
                    );
                }

                if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                    break;
                }
            }
        });

        self.terminate_if_idle();
    }

    fn terminate_if_idle(&self) {
        if self.state.load(Ordering::Acquire) >= SHUTTING_DOWN
            && self.in_flight.load(Ordering::Acquire) == 0
        {
            self.state.store(TERMINATED, Ordering::Release);
            self.termination.release();
        }
    }
}

impl Executor for OrderedEventLoop {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        let first = {
            let mut queue = self.inner.queue.lock();
            self.ensure_accepting()?;

            match queue.offer(task)? {
                Offer::Appended => self.inner.in_flight.fetch_add(1, Ordering::AcqRel) == 0,
                Offer::ReplacedOldest | Offer::Discarded => false,
            }
        };

        if first {
            let inner = self.inner.clone();
            if let Err(error) = self.inner.pool.execute(Box::new(move || inner.drain())) {
                tracing::error!(event_loop = %self.inner.name, %error, "pool refused the drain task");

                let drained = self.inner.queue.lock().drain();
                self.inner.in_flight.fetch_sub(drained.len(), Ordering::AcqRel);
                self.inner.state.store(SHUTDOWN, Ordering::Release);
                self.inner.terminate_if_idle();

                return Err(error);
            }
        }

        Ok(())
    }

    fn in_event_loop(&self) -> bool {
        context::is_current(self.inner.id)
    }
}

impl Scheduler for OrderedEventLoop {
    /// Delays `task` on the shared scheduler, then enqueues it on this lane.
    ///
    /// The returned future completes once the task has been handed to the
    /// lane.
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledFuture, ExecutorError> {
        self.ensure_accepting()?;
        self.inner
            .scheduler
            .schedule(relay(self.as_executor(), task), delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.ensure_accepting()?;
        self.inner.scheduler.schedule_at_fixed_rate(
            relay_periodic(self.as_executor(), task),
            initial_delay,
            period,
        )
    }

    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.ensure_accepting()?;
        self.inner.scheduler.schedule_with_fixed_delay(
            relay_periodic(self.as_executor(), task),
            initial_delay,
            delay,
        )
    }
}

impl Lifecycle for OrderedEventLoop {
    /// Stops the lane; the running task completes, queued ones are returned.
    fn shutdown(&self) -> Vec<Task> {
        let drained = {
            let mut queue = self.inner.queue.lock();
            if self.inner.state.load(Ordering::Acquire) >= SHUTDOWN {
                return Vec::new();
            }

            self.inner.state.store(SHUTDOWN, Ordering::Release);

            let drained = queue.drain();
            self.inner
                .in_flight
                .fetch_sub(drained.len(), Ordering::AcqRel);
            drained
        };

        self.inner.terminate_if_idle();
        drained
    }

    fn is_shutdown(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN
    }

    fn is_terminated(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == TERMINATED
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        if self.in_event_loop() {
            return self.is_terminated();
        }

        self.inner.termination.wait_timeout(timeout)
    }
}

impl fmt::Debug for OrderedEventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedEventLoop")
            .field("name", &self.inner.name)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
