//! Thread pool substrate.
//!
//! Every thread the crate runs, apart from the strict loops' own workers,
//! comes from a [`ThreadPool`]. Pools come in three shapes:
//! - *fixed*: a constant number of workers, started on demand,
//! - *bounded elastic*: grows up to a maximum, idle workers retire after a
//!   keep-alive,
//! - *unbounded elastic*: same without an upper bound.
//!
//! Worker threads are named `<name>-<index>`; panicking tasks are logged
//! and never kill a worker.

mod injector;
mod worker;

use super::context::ExecutorId;
use super::executor::{Executor, Lifecycle, Task};
use super::builder::ThreadPoolBuilder;
use super::latch::TerminationLatch;
use crate::error::ExecutorError;
use injector::{Injector, Push};
use worker::Worker;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// A pool of OS threads executing submitted tasks in FIFO order.
///
/// Cloning a `ThreadPool` yields another handle to the same pool.
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::{Executor, Lifecycle, ThreadPool};
/// use std::time::Duration;
///
/// let pool = ThreadPool::fixed("compute", 2);
/// pool.execute(Box::new(|| println!("hello from the pool"))).unwrap();
///
/// pool.shutdown_gracefully();
/// assert!(pool.await_termination(Duration::from_secs(5)));
/// ```
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    id: ExecutorId,

    /// Thread name prefix.
    pub(crate) name: String,

    pub(crate) injector: Injector,

    /// Index handed to the next started worker.
    next_worker: AtomicUsize,

    termination: TerminationLatch,
}

impl PoolInner {
    /// Called by a worker right before its thread ends.
    pub(crate) fn worker_exited(&self) {
        if self.injector.is_quiescent() {
            self.termination.release();
        }
    }
}

impl ThreadPool {
    pub(crate) fn new(name: String, core: usize, max: usize, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                id: ExecutorId::next(),
                name,
                injector: Injector::new(core, max, keep_alive),
                next_worker: AtomicUsize::new(0),
                termination: TerminationLatch::new(),
            }),
        }
    }

    /// A pool of exactly `threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `threads == 0`.
    pub fn fixed(name: impl Into<String>, threads: usize) -> Self {
        ThreadPoolBuilder::new(name).fixed(threads).build()
    }

    /// An elastic pool that grows up to `max_threads` workers.
    pub fn bounded_elastic(name: impl Into<String>, max_threads: usize) -> Self {
        ThreadPoolBuilder::new(name).max_threads(max_threads).build()
    }

    /// An elastic pool without an upper bound on workers.
    pub fn unbounded_elastic(name: impl Into<String>) -> Self {
        ThreadPoolBuilder::new(name).build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of worker threads currently alive.
    pub fn live_workers(&self) -> usize {
        self.inner.injector.live_workers()
    }

    /// Stops accepting tasks but lets the workers finish the queued ones.
    pub fn shutdown_gracefully(&self) {
        self.inner.injector.shutdown(false);
        self.inner.worker_exited();
    }

    fn spawn_worker(&self) {
        let index = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        let worker = Worker::new(index, self.inner.clone());

        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.inner.name, index))
            .spawn(move || worker.run());

        // The task stays queued and runs once another worker starts.
        if let Err(error) = spawned {
            tracing::error!(pool = %self.inner.name, %error, "failed to start worker thread");

            if self.inner.injector.spawn_failed() {
                self.inner.termination.release();
            }
        }
    }
}

impl Executor for ThreadPool {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        match self.inner.injector.push(task) {
            Ok(Push::Queued) => Ok(()),
            Ok(Push::SpawnWorker) => {
                self.spawn_worker();
                Ok(())
            }
            Err(_) => Err(ExecutorError::Rejected(self.inner.name.clone())),
        }
    }
}

impl Lifecycle for ThreadPool {
    fn shutdown(&self) -> Vec<Task> {
        let drained = self.inner.injector.shutdown(true);
        self.inner.worker_exited();
        drained
    }

    fn is_shutdown(&self) -> bool {
        self.inner.injector.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.inner.termination.is_released()
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.termination.wait_timeout(timeout)
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}
