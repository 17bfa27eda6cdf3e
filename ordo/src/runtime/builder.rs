use super::chooser::ChooserStrategy;
use super::executor::{Executor, Lifecycle, Scheduler};
use super::group::EventLoopGroup;
use super::ordered::{OrderedEventLoop, OrderedLoopConfig};
use super::pool::ThreadPool;
use super::single_thread::SingleThreadEventLoop;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Number of logical CPUs, falling back to `1` if unavailable.
pub(crate) fn available_parallelism() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builder for configuring and creating a [`ThreadPool`].
///
/// A fresh builder describes an unbounded elastic pool: no core workers,
/// no upper bound, idle workers retire after sixty seconds.
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::ThreadPoolBuilder;
/// use std::time::Duration;
///
/// let pool = ThreadPoolBuilder::new("blocking")
///     .max_threads(16)
///     .keep_alive(Duration::from_secs(10))
///     .build();
/// assert_eq!(pool.name(), "blocking");
/// ```
pub struct ThreadPoolBuilder {
    /// Worker thread name prefix.
    name: String,

    /// Workers that never retire once started.
    core_threads: usize,

    max_threads: usize,

    /// Idle time after which a non-core worker retires.
    keep_alive: Duration,
}

impl ThreadPoolBuilder {
    pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            core_threads: 0,
            max_threads: usize::MAX,
            keep_alive: Self::DEFAULT_KEEP_ALIVE,
        }
    }

    /// Makes the pool fixed: exactly `n` workers that never retire.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn fixed(mut self, n: usize) -> Self {
        assert!(n > 0, "fixed thread count must be > 0");

        self.core_threads = n;
        self.max_threads = n;
        self
    }

    /// Sets the number of workers kept alive while idle.
    pub fn core_threads(mut self, n: usize) -> Self {
        self.core_threads = n;
        self
    }

    /// Caps the number of concurrently alive workers.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn max_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "max_threads must be > 0");

        self.max_threads = n;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Builds the pool. Workers start on demand.
    ///
    /// # Panics
    ///
    /// Panics if `core_threads` exceeds `max_threads`.
    pub fn build(self) -> ThreadPool {
        assert!(
            self.core_threads <= self.max_threads,
            "core_threads ({}) must not exceed max_threads ({})",
            self.core_threads,
            self.max_threads
        );

        ThreadPool::new(self.name, self.core_threads, self.max_threads, self.keep_alive)
    }
}

/// Builder for [`EventLoopGroup`]s.
///
/// By default the group has one member per logical CPU and picks members
/// with [`ChooserStrategy::Auto`].
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::{ChooserStrategy, EventLoopGroupBuilder, Lifecycle};
///
/// let group = EventLoopGroupBuilder::new("lanes")
///     .size(4)
///     .chooser(ChooserStrategy::RoundRobin)
///     .build_ordered(Default::default());
/// assert_eq!(group.len(), 4);
/// group.shutdown();
/// ```
pub struct EventLoopGroupBuilder {
    name: String,
    size: usize,
    chooser: ChooserStrategy,

    /// Pool threads shared by ordered members; defaults to `size`.
    pool_threads: Option<usize>,
}

impl EventLoopGroupBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: available_parallelism(),
            chooser: ChooserStrategy::default(),
            pool_threads: None,
        }
    }

    /// Sets the number of member loops.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn size(mut self, n: usize) -> Self {
        assert!(n > 0, "group size must be > 0");

        self.size = n;
        self
    }

    pub fn chooser(mut self, strategy: ChooserStrategy) -> Self {
        self.chooser = strategy;
        self
    }

    /// Sets the thread count of the pool ordered members drain on.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn pool_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "pool_threads must be > 0");

        self.pool_threads = Some(n);
        self
    }

    /// Builds a group of thread-pinned loops named `<name>-<index>`.
    pub fn build_single_threaded(self) -> EventLoopGroup<SingleThreadEventLoop> {
        let loops = (0..self.size)
            .map(|index| SingleThreadEventLoop::new(format!("{}-{}", self.name, index)))
            .collect();

        EventLoopGroup::with_loops(loops, self.chooser)
    }

    /// Builds a group of ordered loops sharing one fixed pool and one
    /// scheduler thread named `<name>-scheduler`.
    pub fn build_ordered(self, config: OrderedLoopConfig) -> EventLoopGroup<OrderedEventLoop> {
        let pool = ThreadPool::fixed(
            format!("{}-pool", self.name),
            self.pool_threads.unwrap_or(self.size),
        );
        let scheduler = SingleThreadEventLoop::new(format!("{}-scheduler", self.name));

        let executor: Arc<dyn Executor> = Arc::new(pool.clone());
        let timer: Arc<dyn Scheduler> = Arc::new(scheduler.clone());

        let loops = (0..self.size)
            .map(|index| {
                OrderedEventLoop::new(
                    format!("{}-{}", self.name, index),
                    executor.clone(),
                    timer.clone(),
                    config.clone(),
                )
            })
            .collect();

        let resources: Vec<Arc<dyn Lifecycle>> = vec![Arc::new(scheduler), Arc::new(pool)];
        EventLoopGroup::from_parts(loops, self.chooser, resources)
    }
}
