use super::chooser::{ChooserStrategy, EventExecutorChooser};
use super::executor::{EventLoop, Executor, Lifecycle, Scheduler, Task};
use super::scheduled::{PeriodicTask, ScheduledFuture};
use crate::error::ExecutorError;
use crate::utils;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Poll step of [`EventLoopGroup::shutdown`] while waiting for members.
const TERMINATION_POLL: Duration = Duration::from_millis(100);

/// A fixed array of event loops plus a chooser.
///
/// The group is itself an executor: `execute` and the `schedule*` family
/// forward to the member picked by [`EventLoopGroup::next`]. Work that must
/// stay on one loop, such as every message of a given key, should be bound
/// explicitly through [`EventLoopGroup::get`] or by keeping the loop
/// returned by `next`.
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::{EventLoopGroupBuilder, Executor, Lifecycle};
/// use std::time::Duration;
///
/// let group = EventLoopGroupBuilder::new("workers").size(2).build_single_threaded();
/// let first = group.next().clone();
/// let second = group.next().clone();
/// assert_ne!(first.name(), second.name());
///
/// first.execute(Box::new(|| println!("bound to the first loop"))).unwrap();
/// group.shutdown();
/// assert!(group.is_terminated());
/// ```
pub struct EventLoopGroup<L> {
    loops: Vec<L>,
    chooser: Box<dyn EventExecutorChooser>,

    /// Shared resources the members run on, shut down after them.
    resources: Vec<Arc<dyn Lifecycle>>,
}

impl<L: EventLoop + 'static> EventLoopGroup<L> {
    /// Groups `loops` behind a chooser built from `strategy`.
    ///
    /// # Panics
    ///
    /// Panics if `loops` is empty.
    pub fn with_loops(loops: Vec<L>, strategy: ChooserStrategy) -> Self {
        Self::from_parts(loops, strategy, Vec::new())
    }

    pub(crate) fn from_parts(
        loops: Vec<L>,
        strategy: ChooserStrategy,
        resources: Vec<Arc<dyn Lifecycle>>,
    ) -> Self {
        let chooser = strategy.build(loops.len());

        Self {
            loops,
            chooser,
            resources,
        }
    }

    /// The member selected for the next unit of work.
    pub fn next(&self) -> &L {
        &self.loops[self.chooser.next_index()]
    }

    /// The member at `index`, for explicit binding.
    pub fn get(&self, index: usize) -> Option<&L> {
        self.loops.get(index)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, L> {
        self.loops.iter()
    }

    fn shutdown_resources(&self) {
        for resource in &self.resources {
            let dropped = resource.shutdown();
            if !dropped.is_empty() {
                tracing::debug!(count = dropped.len(), "group resource dropped pending tasks");
            }
        }
    }
}

impl<'a, L> IntoIterator for &'a EventLoopGroup<L> {
    type Item = &'a L;
    type IntoIter = std::slice::Iter<'a, L>;

    fn into_iter(self) -> Self::IntoIter {
        self.loops.iter()
    }
}

impl<L: EventLoop + 'static> Executor for EventLoopGroup<L> {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        self.next().execute(task)
    }

    fn in_event_loop(&self) -> bool {
        self.loops.iter().any(Executor::in_event_loop)
    }
}

impl<L: EventLoop + 'static> Scheduler for EventLoopGroup<L> {
    fn schedule(&self, task: Task, delay: Duration) -> Result<ScheduledFuture, ExecutorError> {
        self.next().schedule(task, delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.next().schedule_at_fixed_rate(task, initial_delay, period)
    }

    fn schedule_with_fixed_delay(
        &self,
        task: PeriodicTask,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, ExecutorError> {
        self.next().schedule_with_fixed_delay(task, initial_delay, delay)
    }
}

impl<L: EventLoop + 'static> Lifecycle for EventLoopGroup<L> {
    /// Shuts every member down and blocks until each one terminated.
    ///
    /// A member whose thread is the caller is not waited for, it terminates
    /// once the current task returns.
    fn shutdown(&self) -> Vec<Task> {
        let mut drained = Vec::new();
        for member in &self.loops {
            drained.extend(member.shutdown());
        }

        for member in &self.loops {
            if member.in_event_loop() {
                continue;
            }

            while !member.await_termination(TERMINATION_POLL) {
                tracing::trace!("waiting for group member termination");
            }
        }

        self.shutdown_resources();
        drained
    }

    fn is_shutdown(&self) -> bool {
        self.loops.iter().all(Lifecycle::is_shutdown)
    }

    fn is_terminated(&self) -> bool {
        self.loops.iter().all(Lifecycle::is_terminated)
    }

    /// Waits for each member in turn, all sharing one `timeout` budget.
    fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = utils::after(Instant::now(), timeout);

        for member in &self.loops {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !member.await_termination(remaining) {
                return false;
            }
        }

        true
    }
}

impl<L: fmt::Debug> fmt::Debug for EventLoopGroup<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loops", &self.loops)
            .field("chooser", &self.chooser)
            .finish()
    }
}
