use super::PoolInner;
use super::injector::Steal;
use crate::runtime::executor::run_task;

use std::sync::Arc;

/// A worker thread of a [`ThreadPool`](super::ThreadPool).
///
/// The worker repeatedly takes the oldest queued task from the pool's
/// injector and runs it. It parks while the queue is empty and exits when
/// the injector tells it to retire.
pub(crate) struct Worker {
    /// Index of the worker, used in the thread name.
    id: usize,

    pool: Arc<PoolInner>,
}

impl Worker {
    pub(crate) fn new(id: usize, pool: Arc<PoolInner>) -> Self {
        Self { id, pool }
    }

    /// Runs the worker loop until retirement.
    ///
    /// A panicking task is logged and does not end the loop.
    pub(crate) fn run(&self) {
        tracing::trace!(pool = %self.pool.name, worker = self.id, "worker started");

        loop {
            match self.pool.injector.steal() {
                Steal::Task(task) => {
                    run_task(&self.pool.name, task);
                }
                Steal::Retire => break,
            }
        }

        tracing::trace!(pool = %self.pool.name, worker = self.id, "worker retired");
        self.pool.worker_exited();
    }
}
