use super::HierarchicalTimer;
use super::clock;

use std::time::Duration;

/// Builder for configuring and creating a [`HierarchicalTimer`].
///
/// # Examples
///
/// ```rust
/// use ordo::timer::TimerBuilder;
/// use std::time::Duration;
///
/// let timer = TimerBuilder::new()
///     .name("heartbeats")
///     .tick(Duration::from_millis(10))
///     .wheel_size(64)
///     .build();
/// assert_eq!(timer.pending(), 0);
/// ```
pub struct TimerBuilder {
    /// Prefix of the clock and executor thread names.
    name: String,

    /// Width of a bucket of the finest wheel.
    tick: Duration,

    /// Buckets per wheel level.
    wheel_size: usize,

    /// Longest single wait of the clock thread on the delay queue.
    poll_timeout: Duration,

    /// Threads running expired tasks.
    executor_threads: usize,
}

impl TimerBuilder {
    pub const DEFAULT_TICK: Duration = Duration::from_millis(1);
    pub const DEFAULT_WHEEL_SIZE: usize = 20;
    pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(200);

    pub fn new() -> Self {
        Self {
            name: "timer".to_owned(),
            tick: Self::DEFAULT_TICK,
            wheel_size: Self::DEFAULT_WHEEL_SIZE,
            poll_timeout: Self::DEFAULT_POLL_TIMEOUT,
            executor_threads: 1,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the tick, rounded down to whole milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if `tick` is shorter than one millisecond.
    pub fn tick(mut self, tick: Duration) -> Self {
        assert!(tick >= Duration::from_millis(1), "tick must be at least 1ms");

        self.tick = tick;
        self
    }

    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn wheel_size(mut self, n: usize) -> Self {
        assert!(n > 0, "wheel_size must be > 0");

        self.wheel_size = n;
        self
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn executor_threads(mut self, n: usize) -> Self {
        assert!(n > 0, "executor_threads must be > 0");

        self.executor_threads = n;
        self
    }

    /// Builds the timer and starts its clock thread.
    pub fn build(self) -> HierarchicalTimer {
        HierarchicalTimer::start(
            self.name,
            clock::millis(self.tick),
            i64::try_from(self.wheel_size).unwrap_or(i64::MAX),
            self.poll_timeout,
            self.executor_threads,
        )
    }
}

impl Default for TimerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
