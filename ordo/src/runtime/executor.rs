use super::scheduled::{PeriodicTask, ScheduledFuture};
use crate::error::{ExecutorError, PanicError, cause};
use crate::promise::Promise;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs tasks.
///
/// This is the smallest capability of the crate's executors; scheduling and
/// lifecycle management are separate traits implemented by composition.
pub trait Executor: Send + Sync {
    /// Submits a task for execution.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::Rejected`] once the executor is shutting down, and
    /// [`ExecutorError::MemoryExhausted`] when a memory-safe queue refuses the
    /// task under the abort policy.
    fn execute(&self, task: Task) -> Result<(), ExecutorError>;

    /// Returns `true` if the calling thread currently runs inside this
    /// executor.
    ///
    /// Promises bound to this executor use it to notify inline and to refuse
    /// blocking waits that would deadlock.
    fn in_event_loop(&self) -> bool {
        false
    }
}

/// An executor that can also delay and repeat tasks.
pub trait Scheduler: Executor {
    /// Runs `task` once, after `delay`.
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledFuture, ExecutorError>;

    /// Runs `task` after `initial_delay`, then every `period`, measured from
    /// the previous trigger time.
    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, ExecutorError>;

    /// Runs `task` after `initial_delay`, then again `delay` after each run
    /// completes.
    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, ExecutorError>;
}

/// Shutdown and termination of an executor.
pub trait Lifecycle: Send + Sync {
    /// Stops accepting tasks and returns the ones that never ran.
    ///
    /// Pending scheduled tasks are cancelled. Calling it again is a no-op
    /// returning an empty list.
    fn shutdown(&self) -> Vec<Task>;

    /// Returns `true` once shutdown was requested.
    fn is_shutdown(&self) -> bool;

    /// Returns `true` once every worker exited.
    fn is_terminated(&self) -> bool;

    /// Waits up to `timeout` for termination; returns `is_terminated()`.
    fn await_termination(&self, timeout: Duration) -> bool;
}

/// A schedulable executor with a lifecycle: the full event loop capability.
pub trait EventLoop: Scheduler + Lifecycle {}

impl<T: Scheduler + Lifecycle> EventLoop for T {}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        (**self).execute(task)
    }

    fn in_event_loop(&self) -> bool {
        (**self).in_event_loop()
    }
}

/// Promise-producing helpers available on every cloneable executor.
pub trait ExecutorExt: Executor + Clone + 'static {
    /// Creates a promise whose listeners are notified on this executor.
    fn new_promise<V: Send + Sync + 'static>(&self) -> Promise<V> {
        Promise::with_executor(Arc::new(self.clone()))
    }

    /// Runs `f` on this executor and exposes its result as a promise.
    ///
    /// A panic inside `f` fails the promise with a
    /// [`PanicError`](crate::error::PanicError); a rejected submission fails
    /// it with the executor's error.
    fn submit<T, F>(&self, f: F) -> Promise<T>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let promise = self.new_promise();
        let completer = promise.clone();

        let submitted = self.execute(Box::new(move || {
            if !completer.set_uncancellable() {
                return;
            }

            match panic::catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    completer.try_success(value);
                }
                Err(payload) => {
                    completer.try_failure(cause(PanicError::from_payload(&*payload)));
                }
            }
        }));

        if let Err(error) = submitted {
            promise.try_failure(cause(error));
        }

        promise
    }
}

impl<E: Executor + Clone + 'static> ExecutorExt for E {}

/// Runs a task, containing and logging a panic.
///
/// Returns `false` if the task panicked. Used by every worker so a failing
/// task never kills the thread that runs it.
pub(crate) fn run_task(executor: &str, task: Task) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => true,
        Err(payload) => {
            let error = PanicError::from_payload(&*payload);
            tracing::error!(executor, %error, "task panicked");
            false
        }
    }
}
