use super::executor::{Executor, Task};
use crate::error::{PanicError, cause};
use crate::promise::Promise;
use crate::utils;

use parking_lot::Mutex;

use std::cmp::Ordering;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A task run repeatedly by `schedule_at_fixed_rate`/`schedule_with_fixed_delay`.
pub type PeriodicTask = Arc<dyn Fn() + Send + Sync + 'static>;

/// Handle to a delayed or periodic task.
///
/// Backed by a [`Promise<()>`]: a one-shot task completes it when it runs, a
/// periodic task only completes it by panicking or being cancelled.
#[derive(Clone)]
pub struct ScheduledFuture {
    promise: Promise<()>,

    /// Next trigger time.
    deadline: Arc<Mutex<Instant>>,
}

impl ScheduledFuture {
    pub(crate) fn new(promise: Promise<()>, deadline: Instant) -> Self {
        Self {
            promise,
            deadline: Arc::new(Mutex::new(deadline)),
        }
    }

    /// Cancels the task; a running periodic task will not run again.
    ///
    /// Returns `false` if the task already ran (one-shot) or completed.
    pub fn cancel(&self) -> bool {
        self.promise.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.promise.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    /// Time left until the next trigger, zero if it is due.
    pub fn delay(&self) -> Duration {
        self.deadline.lock().saturating_duration_since(Instant::now())
    }

    /// The promise tracking this task.
    pub fn promise(&self) -> &Promise<()> {
        &self.promise
    }
}

/// How a scheduled task repeats.
pub(crate) enum Repeat {
    Once(Task),
    FixedRate(PeriodicTask, Duration),
    FixedDelay(PeriodicTask, Duration),
}

/// An entry of a loop's scheduled-task heap.
pub(crate) struct ScheduledTask {
    pub(crate) deadline: Instant,

    /// Submission order, breaks ties between equal deadlines.
    sequence: u64,

    repeat: Repeat,
    future: ScheduledFuture,
}

impl ScheduledTask {
    pub(crate) fn new(repeat: Repeat, deadline: Instant, sequence: u64, future: ScheduledFuture) -> Self {
        Self {
            deadline,
            sequence,
            repeat,
            future,
        }
    }

    /// Runs the task once.
    ///
    /// Returns the entry to re-queue for periodic tasks that should run
    /// again, `None` otherwise.
    pub(crate) fn run(self) -> Option<ScheduledTask> {
        let ScheduledTask {
            deadline,
            sequence,
            repeat,
            future,
        } = self;

        let (task, period, fixed_rate) = match repeat {
            Repeat::Once(task) => {
                if !future.promise.set_uncancellable() {
                    return None;
                }

                match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(()) => {
                        future.promise.try_success(());
                    }
                    Err(payload) => {
                        future
                            .promise
                            .try_failure(cause(PanicError::from_payload(&*payload)));
                    }
                }
                return None;
            }
            Repeat::FixedRate(task, period) => (task, period, true),
            Repeat::FixedDelay(task, delay) => (task, delay, false),
        };

        if future.promise.is_done() {
            return None;
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task())) {
            future
                .promise
                .try_failure(cause(PanicError::from_payload(&*payload)));
            return None;
        }

        if future.promise.is_done() {
            return None;
        }

        let (next, repeat) = if fixed_rate {
            (utils::after(deadline, period), Repeat::FixedRate(task, period))
        } else {
            (utils::after(Instant::now(), period), Repeat::FixedDelay(task, period))
        };
        *future.deadline.lock() = next;

        Some(ScheduledTask::new(repeat, next, sequence, future))
    }

    /// Cancels the task without running it.
    pub(crate) fn cancel(self) {
        self.future.cancel();
    }
}

impl Eq for ScheduledTask {}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Ord for ScheduledTask {
    /// Reversed so a `BinaryHeap<ScheduledTask>` pops the earliest deadline
    /// first; equal deadlines pop in submission order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Wraps `task` so that it is handed to `target` when it fires.
///
/// Used by executors that borrow another loop's timer: the scheduled entry
/// completes once the task is enqueued on `target`.
pub(crate) fn relay(target: Arc<dyn Executor>, task: Task) -> Task {
    Box::new(move || {
        if let Err(error) = target.execute(task) {
            tracing::warn!(%error, "scheduled task could not be handed over");
        }
    })
}

/// Periodic variant of [`relay`].
pub(crate) fn relay_periodic(target: Arc<dyn Executor>, task: PeriodicTask) -> PeriodicTask {
    Arc::new(move || {
        let task = task.clone();
        if let Err(error) = target.execute(Box::new(move || task())) {
            tracing::warn!(%error, "periodic task could not be handed over");
        }
    })
}
