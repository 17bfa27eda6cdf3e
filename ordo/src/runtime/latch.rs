use crate::utils;

use parking_lot::{Condvar, Mutex};

use std::time::Duration;

/// One-shot latch released when an executor terminates.
///
/// Waiters block until [`release`](Self::release) is called; once released the
/// latch stays open.
pub(crate) struct TerminationLatch {
    released: Mutex<bool>,
    condvar: Condvar,
}

impl TerminationLatch {
    pub(crate) fn new() -> Self {
        Self {
            released: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Opens the latch and wakes every waiter.
    pub(crate) fn release(&self) {
        *self.released.lock() = true;
        self.condvar.notify_all();
    }

    pub(crate) fn is_released(&self) -> bool {
        *self.released.lock()
    }

    /// Waits until the latch opens or `timeout` elapses.
    ///
    /// Returns `true` if the latch is open.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = utils::deadline(timeout) else {
            self.wait();
            return true;
        };
        let mut released = self.released.lock();

        while !*released {
            if self.condvar.wait_until(&mut released, deadline).timed_out() {
                return *released;
            }
        }

        true
    }

    pub(crate) fn wait(&self) {
        let mut released = self.released.lock();

        while !*released {
            self.condvar.wait(&mut released);
        }
    }
}
