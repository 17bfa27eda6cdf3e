use super::context::{self, ExecutorId};
use super::executor::{Executor, Lifecycle, Scheduler, Task, run_task};
use super::latch::TerminationLatch;
use super::scheduled::{PeriodicTask, Repeat, ScheduledFuture, ScheduledTask};
use super::state::{NOT_STARTED, SHUTDOWN, SHUTTING_DOWN, STARTED, TERMINATED};
use crate::error::ExecutorError;
use crate::promise::Promise;
use crate::utils;

use parking_lot::{Condvar, Mutex};

use std::collections::{BinaryHeap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// An event loop pinned to one dedicated OS thread.
///
/// The thread is started lazily, on the first submitted task, and runs every
/// task of the loop for its whole lifetime, so thread-local state is valid
/// inside tasks. Immediate tasks run in submission order, interleaved with
/// scheduled tasks in non-decreasing trigger-time order; a scheduled task
/// never runs before its trigger time.
///
/// Cloning a loop yields another handle to the same loop. Once every handle
/// is dropped the worker thread exits on its own, within
/// [`IDLE_POLL`](Self::IDLE_POLL); promises and scheduled tasks bound to the
/// loop count as handles until they complete or are cancelled.
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::{ExecutorExt, Lifecycle, SingleThreadEventLoop};
/// use std::time::Duration;
///
/// let event_loop = SingleThreadEventLoop::new("io");
/// let answer = event_loop.submit(|| 6 * 7);
/// assert_eq!(answer.get().unwrap(), 42);
///
/// event_loop.shutdown_gracefully();
/// assert!(event_loop.await_termination(Duration::from_secs(5)));
/// ```
#[derive(Clone)]
pub struct SingleThreadEventLoop {
    inner: Arc<Inner>,
}

struct Inner {
    id: ExecutorId,
    name: String,

    /// Lifecycle state, see [`super::state`].
    state: AtomicUsize,

    queues: Mutex<Queues>,

    /// Wakes the worker when a task arrives or the loop shuts down.
    condvar: Condvar,

    termination: TerminationLatch,
}

/// Work owned by the loop, drained only by its worker.
struct Queues {
    tasks: VecDeque<Work>,
    scheduled: BinaryHeap<ScheduledTask>,

    /// Sequence number of the next scheduled task.
    sequence: u64,
}

enum Work {
    Immediate(Task),
    Scheduled(ScheduledTask),
}

/// What the worker got from one [`Inner::take`].
enum Take {
    Work(Work),

    /// Nothing to run yet; the worker lets go of the loop and comes back.
    Idle,

    /// The loop shut down.
    Exit,
}

impl SingleThreadEventLoop {
    /// Longest wait of an idle worker before it re-checks that a handle to
    /// the loop still exists.
    pub const IDLE_POLL: Duration = Duration::from_millis(200);

    /// Creates a loop whose worker thread will be named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ExecutorId::next(),
                name: name.into(),
                state: AtomicUsize::new(NOT_STARTED),
                queues: Mutex::new(Queues {
                    tasks: VecDeque::new(),
                    scheduled: BinaryHeap::new(),
                    sequence: 0,
                }),
                condvar: Condvar::new(),
                termination: TerminationLatch::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of immediate tasks waiting to run.
    pub fn pending_tasks(&self) -> usize {
        self.inner.queues.lock().tasks.len()
    }

    /// Stops accepting tasks, runs the already queued immediate tasks, then
    /// terminates. Pending scheduled tasks are cancelled.
    pub fn shutdown_gracefully(&self) {
        let (cancelled, never_started) = {
            let mut queues = self.inner.queues.lock();

            let state = self.inner.state.load(Ordering::Acquire);
            if state >= SHUTTING_DOWN {
                return;
            }

            self.inner.state.store(SHUTTING_DOWN, Ordering::Release);
            (mem::take(&mut queues.scheduled), state == NOT_STARTED)
        };

        self.inner.condvar.notify_all();

        for task in cancelled {
            task.cancel();
        }

        if never_started {
            self.inner.terminate();
        }
    }

    /// Starts the worker thread if this is the first submission.
    fn ensure_started(&self) -> Result<(), ExecutorError> {
        if self
            .inner
            .state
            .compare_exchange(NOT_STARTED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let id = self.inner.id;
        let spawned = thread::Builder::new()
            .name(self.inner.name.clone())
            .spawn(move || Inner::run(weak, id));

        if let Err(error) = spawned {
            tracing::error!(event_loop = %self.inner.name, %error, "failed to start event loop thread");
            self.inner.state.store(SHUTDOWN, Ordering::Release);
            self.inner.terminate();
            return Err(self.rejected());
        }

        Ok(())
    }

    fn rejected(&self) -> ExecutorError {
        ExecutorError::Rejected(self.inner.name.clone())
    }

    fn enqueue(&self, work: Work) -> Result<(), ExecutorError> {
        if self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
            return Err(self.rejected());
        }

        self.ensure_started()?;

        {
            let mut queues = self.inner.queues.lock();
            if self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
                return Err(self.rejected());
            }

            match work {
                Work::Scheduled(task) => queues.scheduled.push(task),
                immediate => queues.tasks.push_back(immediate),
            }
        }

        self.inner.condvar.notify_one();
        Ok(())
    }

    fn schedule_repeat(&self, repeat: Repeat, delay: Duration) -> Result<ScheduledFuture, ExecutorError> {
        let deadline = utils::after(Instant::now(), delay);
        let promise = Promise::with_executor(Arc::new(self.clone()));
        let future = ScheduledFuture::new(promise, deadline);

        let sequence = {
            let mut queues = self.inner.queues.lock();
            queues.sequence += 1;
            queues.sequence
        };

        let task = ScheduledTask::new(repeat, deadline, sequence, future.clone());
        self.enqueue(Work::Scheduled(task))?;

        Ok(future)
    }
}

impl Inner {
    /// Worker thread body.
    ///
    /// Holds the loop only while taking or running work, so the thread ends
    /// once the last handle is gone.
    fn run(inner: Weak<Self>, id: ExecutorId) {
        context::enter_executor(id, || {
            while let Some(inner) = inner.upgrade() {
                match inner.take() {
                    Take::Work(Work::Immediate(task)) => {
                        run_task(&inner.name, task);
                    }
                    Take::Work(Work::Scheduled(task)) => {
                        if let Some(next) = task.run() {
                            inner.requeue(next);
                        }
                    }
                    Take::Idle => {}
                    Take::Exit => {
                        inner.terminate();
                        return;
                    }
                }
            }

            tracing::debug!(executor = ?id, "event loop dropped without shutdown");
        });
    }

    /// Waits for the next runnable item.
    ///
    /// Blocks on the immediate queue for at most the delay until the next
    /// scheduled task is due, capped at [`IDLE_POLL`], then moves every due
    /// scheduled task behind the immediate ones.
    ///
    /// [`IDLE_POLL`]: SingleThreadEventLoop::IDLE_POLL
    fn take(&self) -> Take {
        let mut queues = self.queues.lock();
        let mut waited = false;

        loop {
            let state = self.state.load(Ordering::Acquire);
            if state >= SHUTDOWN {
                return Take::Exit;
            }

            let now = Instant::now();
            while queues
                .scheduled
                .peek()
                .is_some_and(|task| task.deadline <= now)
            {
                if let Some(task) = queues.scheduled.pop() {
                    queues.tasks.push_back(Work::Scheduled(task));
                }
            }

            if let Some(work) = queues.tasks.pop_front() {
                return Take::Work(work);
            }

            if state == SHUTTING_DOWN {
                return Take::Exit;
            }

            if waited {
                return Take::Idle;
            }

            let idle_until = utils::after(now, SingleThreadEventLoop::IDLE_POLL);
            let wake_at = match queues.scheduled.peek() {
                Some(task) => task.deadline.min(idle_until),
                None => idle_until,
            };

            self.condvar.wait_until(&mut queues, wake_at);
            waited = true;
        }
    }

    /// Puts a periodic task back into the heap, unless the loop stopped.
    fn requeue(&self, task: ScheduledTask) {
        let mut queues = self.queues.lock();

        if self.state.load(Ordering::Acquire) >= SHUTTING_DOWN {
            drop(queues);
            task.cancel();
            return;
        }

        queues.scheduled.push(task);
    }

    /// Cancels leftover scheduled tasks and releases the termination latch.
    fn terminate(&self) {
        let leftovers = {
            let mut queues = self.queues.lock();
            self.state.store(TERMINATED, Ordering::Release);

            let tasks = mem::take(&mut queues.tasks);
            let scheduled = mem::take(&mut queues.scheduled);
            (tasks, scheduled)
        };

        for work in leftovers.0 {
            if let Work::Scheduled(task) = work {
                task.cancel();
            }
        }
        for task in leftovers.1 {
            task.cancel();
        }

        self.termination.release();
        tracing::debug!(event_loop = %self.name, "event loop terminated");
    }
}

impl Executor for SingleThreadEventLoop {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.enqueue(Work::Immediate(task))
    }

    fn in_event_loop(&self) -> bool {
        context::is_current(self.inner.id)
    }
}

impl Scheduler for SingleThreadEventLoop {
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledFuture, ExecutorError> {
        self.schedule_repeat(Repeat::Once(task), delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.schedule_repeat(Repeat::FixedRate(task, period), initial_delay)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.schedule_repeat(Repeat::FixedDelay(task, delay), initial_delay)
    }
}

impl Lifecycle for SingleThreadEventLoop {
    /// Stops the loop immediately.
    ///
    /// The task currently running (if any) completes; every queued immediate
    /// task is returned and every scheduled task is cancelled.
    fn shutdown(&self) -> Vec<Task> {
        let (work, scheduled, never_started) = {
            let mut queues = self.inner.queues.lock();

            let state = self.inner.state.load(Ordering::Acquire);
            if state >= SHUTDOWN {
                return Vec::new();
            }

            self.inner.state.store(SHUTDOWN, Ordering::Release);
            (
                mem::take(&mut queues.tasks),
                mem::take(&mut queues.scheduled),
                state == NOT_STARTED,
            )
        };

        self.inner.condvar.notify_all();

        let mut drained = Vec::with_capacity(work.len());
        for item in work {
            match item {
                Work::Immediate(task) => drained.push(task),
                Work::Scheduled(task) => task.cancel(),
            }
        }

        for task in scheduled {
            task.cancel();
        }

        if never_started {
            self.inner.terminate();
        }

        drained
    }

    fn is_shutdown(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) >= SHUTTING_DOWN
    }

    fn is_terminated(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == TERMINATED
    }

    /// Waits for the worker to exit.
    ///
    /// Returns immediately when called from the loop's own thread, which
    /// could otherwise never observe its own termination.
    fn await_termination(&self, timeout: Duration) -> bool {
        if self.in_event_loop() {
            return self.is_terminated();
        }

        self.inner.termination.wait_timeout(timeout)
    }
}

impl std::fmt::Debug for SingleThreadEventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadEventLoop")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state.load(Ordering::Relaxed))
            .finish()
    }
}
