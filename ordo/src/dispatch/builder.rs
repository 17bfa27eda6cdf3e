use super::{Key, LoopPerReceiverDispatcher, Message, SharedPoolDispatcher};
use crate::runtime::{OrderedLoopConfig, ThreadPool, available_parallelism};

/// Builder for the dispatcher topologies.
///
/// # Examples
///
/// ```rust
/// use ordo::dispatch::DispatcherBuilder;
///
/// let shared = DispatcherBuilder::new("events").workers(4).build_shared_pool::<u64, String>();
/// let isolated = DispatcherBuilder::new("sessions").build_unbounded::<u64, String>();
/// # let _ = (shared, isolated);
/// ```
pub struct DispatcherBuilder {
    /// Prefix of every thread the dispatcher starts.
    name: String,

    /// Worker threads of the shared pool topology.
    workers: usize,

    /// Applied to every lane of the loop-per-receiver topologies.
    lane_config: OrderedLoopConfig,
}

impl DispatcherBuilder {
    /// Creates a builder with one shared worker per logical CPU.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            workers: available_parallelism(),
            lane_config: OrderedLoopConfig::default(),
        }
    }

    /// Sets the number of shared workers.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn workers(mut self, n: usize) -> Self {
        assert!(n > 0, "workers must be > 0");

        self.workers = n;
        self
    }

    /// Sets the memory policy and warn threshold of every lane.
    pub fn lane_config(mut self, config: OrderedLoopConfig) -> Self {
        self.lane_config = config;
        self
    }

    /// Receivers share `workers` threads pulling from one ready queue.
    pub fn build_shared_pool<K: Key, M: Message>(self) -> SharedPoolDispatcher<K, M> {
        SharedPoolDispatcher::new(self.name, self.workers)
    }

    /// One lane per receiver, on a pool of at most `max_threads` threads.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads == 0`.
    pub fn build_bounded<K: Key, M: Message>(self, max_threads: usize) -> LoopPerReceiverDispatcher<K, M> {
        let pool = ThreadPool::bounded_elastic(self.name.clone(), max_threads);
        LoopPerReceiverDispatcher::new(self.name, pool, self.lane_config)
    }

    /// One lane per receiver, on a pool without a thread bound.
    pub fn build_unbounded<K: Key, M: Message>(self) -> LoopPerReceiverDispatcher<K, M> {
        let pool = ThreadPool::unbounded_elastic(self.name.clone());
        LoopPerReceiverDispatcher::new(self.name, pool, self.lane_config)
    }
}
