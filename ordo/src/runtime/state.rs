//! Lifecycle states shared by every executor.
//!
//! States only ever move forward; comparisons such as
//! `state >= SHUTTING_DOWN` are therefore meaningful.

/// Created, worker not started yet.
///
/// Strict loops start their thread lazily on the first submitted task.
pub(crate) const NOT_STARTED: usize = 0;

/// Accepting and running tasks.
pub(crate) const STARTED: usize = 1;

/// No longer accepting tasks; already queued tasks are still run.
pub(crate) const SHUTTING_DOWN: usize = 2;

/// No longer accepting tasks; queued tasks were drained or discarded.
pub(crate) const SHUTDOWN: usize = 3;

/// The worker has exited and the termination latch was released.
pub(crate) const TERMINATED: usize = 4;
