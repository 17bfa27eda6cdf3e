use crate::runtime::executor::Task;

use parking_lot::{Condvar, Mutex};

use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of a worker asking the injector for work.
pub(crate) enum Steal {
    /// A task to run.
    Task(Task),

    /// The worker should exit: the pool shut down, or the worker was idle
    /// for longer than the keep-alive while above the core size.
    Retire,
}

/// Outcome of pushing a task.
pub(crate) enum Push {
    /// A parked worker was woken, or the pool is at its size limit and a
    /// busy worker will pick the task up.
    Queued,

    /// More tasks are queued than workers are parked and the pool may
    /// grow: the caller must start one.
    SpawnWorker,
}

/// Queue and worker accounting shared by every worker of a pool.
///
/// All counters live under the queue lock so that the decision to start a
/// new worker is never made on stale data.
struct Shared {
    queue: VecDeque<Task>,

    /// Workers parked waiting for a task.
    idle: usize,

    /// Workers started and not yet retired.
    live: usize,

    shutdown: bool,
}

/// Global task queue of a thread pool.
///
/// New tasks are pushed at the back and workers take them from the front.
/// Idle workers park on a condition variable.
pub(crate) struct Injector {
    shared: Mutex<Shared>,
    condvar: Condvar,

    /// Workers never retire below this count.
    core: usize,

    /// Upper bound on live workers.
    max: usize,

    /// Idle time after which a worker above `core` retires.
    keep_alive: Duration,
}

impl Injector {
    pub(crate) fn new(core: usize, max: usize, keep_alive: Duration) -> Self {
        Self {
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                idle: 0,
                live: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            core,
            max,
            keep_alive,
        }
    }

    /// Pushes a task, telling the caller whether a new worker is needed.
    ///
    /// Returns the task back if the pool is shut down.
    pub(crate) fn push(&self, task: Task) -> Result<Push, Task> {
        let mut shared = self.shared.lock();
        if shared.shutdown {
            return Err(task);
        }

        shared.queue.push_back(task);

        // Every queued task needs a parked worker of its own; a worker
        // already woken stays counted as idle until it takes the lock.
        if shared.queue.len() > shared.idle && shared.live < self.max {
            shared.live += 1;
            return Ok(Push::SpawnWorker);
        }

        let wake = shared.idle > 0;
        drop(shared);

        if wake {
            self.condvar.notify_one();
        }

        Ok(Push::Queued)
    }

    /// Undoes the `live` increment of a [`Push::SpawnWorker`] whose thread
    /// could not be started.
    pub(crate) fn spawn_failed(&self) -> bool {
        let mut shared = self.shared.lock();
        shared.live -= 1;
        shared.shutdown && shared.live == 0
    }

    /// Parks the calling worker until a task is available.
    ///
    /// Already queued tasks are still handed out after shutdown so that
    /// graceful shutdown drains the queue.
    pub(crate) fn steal(&self) -> Steal {
        let mut shared = self.shared.lock();

        loop {
            if let Some(task) = shared.queue.pop_front() {
                return Steal::Task(task);
            }

            if shared.shutdown {
                shared.live -= 1;
                return Steal::Retire;
            }

            shared.idle += 1;
            let timed_out = if shared.live > self.core {
                self.condvar
                    .wait_for(&mut shared, self.keep_alive)
                    .timed_out()
            } else {
                self.condvar.wait(&mut shared);
                false
            };
            shared.idle -= 1;

            if timed_out && shared.queue.is_empty() && shared.live > self.core {
                shared.live -= 1;
                return Steal::Retire;
            }
        }
    }

    /// Signals shutdown and wakes all parked workers.
    ///
    /// With `drain` the queued tasks are removed and returned; otherwise the
    /// workers finish them before retiring.
    pub(crate) fn shutdown(&self, drain: bool) -> Vec<Task> {
        let drained = {
            let mut shared = self.shared.lock();
            shared.shutdown = true;

            if drain {
                shared.queue.drain(..).collect()
            } else {
                Vec::new()
            }
        };

        self.condvar.notify_all();
        drained
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Returns `true` if the pool is shut down and no worker is live.
    pub(crate) fn is_quiescent(&self) -> bool {
        let shared = self.shared.lock();
        shared.shutdown && shared.live == 0
    }

    pub(crate) fn live_workers(&self) -> usize {
        self.shared.lock().live
    }
}
