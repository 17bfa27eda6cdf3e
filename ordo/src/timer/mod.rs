//! Timeouts on a hierarchical timing wheel.
//!
//! This module provides:
//! - the [`Timer`] trait and its [`Timeout`] handles,
//! - [`HierarchicalTimer`], a multi-level timing wheel with O(1) insertion
//!   and a delay queue bounded by the number of buckets,
//! - [`RepeatedTimer`], a restartable periodic task usable over any timer.
//!
//! Expired tasks never run on the clock thread; they are handed to the
//! timer's executor pool.

mod bucket;
mod builder;
mod clock;
mod delay_queue;
mod entry;
mod hierarchical;
mod repeated;
mod wheel;

pub use builder::TimerBuilder;
pub use entry::Timeout;
pub use hierarchical::HierarchicalTimer;
pub use repeated::{RepeatedTask, RepeatedTimer};

use crate::error::TimerError;

use std::collections::HashSet;
use std::time::Duration;

/// A task run once its timeout expires.
pub type TimerTask = Box<dyn FnOnce(&Timeout) + Send + 'static>;

/// Schedules one-shot tasks after a delay.
pub trait Timer: Send + Sync {
    /// Runs `task` once `delay` elapsed.
    ///
    /// # Errors
    ///
    /// [`TimerError::Stopped`] once the timer was stopped.
    fn new_timeout(&self, task: TimerTask, delay: Duration) -> Result<Timeout, TimerError>;

    /// Stops the timer and returns the timeouts that never ran, cancelled.
    ///
    /// # Errors
    ///
    /// [`TimerError::AlreadyStopped`] on every call after the first.
    fn stop(&self) -> Result<HashSet<Timeout>, TimerError>;
}
