use super::bucket::Bucket;
use super::delay_queue::DelayQueue;
use super::entry::TimerTaskEntry;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock};

/// Result of [`TimingWheel::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// The entry now sits in a bucket of this wheel or an overflow wheel.
    Scheduled,

    /// The entry is already due and must be expired by the caller.
    Due,

    /// The entry was cancelled; it is dropped.
    Cancelled,
}

/// One level of a hierarchical timing wheel.
///
/// A wheel of `wheel_size` buckets, each `tick_ms` wide, covers `interval =
/// tick_ms * wheel_size` milliseconds from its current time. Entries beyond
/// that span go to an overflow wheel whose tick is this wheel's interval,
/// created on first need.
///
/// Bucket `i` holds the entries whose expiration satisfies
/// `expiration / tick_ms % wheel_size == i`, all expiring within the same
/// tick: the level only distinguishes tick-sized windows.
pub(crate) struct TimingWheel {
    tick_ms: i64,
    wheel_size: i64,
    interval: i64,

    /// Start of the current tick, always a multiple of `tick_ms`.
    current_time: AtomicI64,

    buckets: Vec<Arc<Bucket>>,
    overflow: OnceLock<Box<TimingWheel>>,

    /// Shared by every level.
    queue: Arc<DelayQueue>,
}

impl TimingWheel {
    pub(crate) fn new(tick_ms: i64, wheel_size: i64, start_ms: i64, queue: Arc<DelayQueue>) -> Self {
        Self {
            tick_ms,
            wheel_size,
            interval: tick_ms.saturating_mul(wheel_size),
            current_time: AtomicI64::new(start_ms - start_ms % tick_ms),
            buckets: (0..wheel_size).map(|_| Bucket::new()).collect(),
            overflow: OnceLock::new(),
            queue,
        }
    }

    fn overflow(&self) -> &TimingWheel {
        self.overflow.get_or_init(|| {
            Box::new(TimingWheel::new(
                self.interval,
                self.wheel_size,
                self.current_time.load(Ordering::Acquire),
                self.queue.clone(),
            ))
        })
    }

    /// Places `entry` in the level whose span covers its expiration.
    ///
    /// Runs under the timer's read lock: many inserters at once, never
    /// concurrently with [`advance_clock`](Self::advance_clock).
    pub(crate) fn add(&self, entry: Arc<TimerTaskEntry>) -> Placement {
        let expiration = entry.expiration_ms;
        let current = self.current_time.load(Ordering::Acquire);

        if entry.is_cancelled() {
            return Placement::Cancelled;
        }

        if expiration < current.saturating_add(self.tick_ms) {
            return Placement::Due;
        }

        // A level whose span saturated covers every expiration.
        if expiration < current.saturating_add(self.interval) || self.interval == i64::MAX {
            let virtual_id = expiration / self.tick_ms;
            let bucket = &self.buckets[(virtual_id % self.wheel_size) as usize];
            bucket.add(entry);

            if bucket.set_expiration(virtual_id * self.tick_ms) {
                self.queue.offer(bucket.clone());
            }

            return Placement::Scheduled;
        }

        self.overflow().add(entry)
    }

    /// Moves the wheel, and every overflow level, to the tick containing
    /// `time_ms`.
    pub(crate) fn advance_clock(&self, time_ms: i64) {
        let current = self.current_time.load(Ordering::Acquire);

        if time_ms >= current.saturating_add(self.tick_ms) {
            let advanced = time_ms - time_ms % self.tick_ms;
            self.current_time.store(advanced, Ordering::Release);

            if let Some(overflow) = self.overflow.get() {
                overflow.advance_clock(advanced);
            }
        }
    }

    /// Flushes every bucket of every level.
    pub(crate) fn drain(&self) -> Vec<Arc<TimerTaskEntry>> {
        let mut entries = Vec::new();
        let mut level = Some(self);

        while let Some(wheel) = level {
            for bucket in &wheel.buckets {
                entries.extend(bucket.flush());
            }
            level = wheel.overflow.get().map(Box::as_ref);
        }

        entries
    }

    /// Number of levels created so far.
    pub(crate) fn levels(&self) -> usize {
        1 + self.overflow.get().map_or(0, |overflow| overflow.levels())
    }

    pub(crate) fn current_time(&self) -> i64 {
        self.current_time.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn wheel() -> (TimingWheel, Arc<DelayQueue>) {
        let queue = Arc::new(DelayQueue::new());
        (TimingWheel::new(10, 20, 1_000, queue.clone()), queue)
    }

    fn entry(expiration_ms: i64) -> Arc<TimerTaskEntry> {
        TimerTaskEntry::new(expiration_ms, Box::new(|_| {}), Arc::new(AtomicUsize::new(0)))
    }

    #[test]
    fn due_entries_are_not_placed() {
        let (wheel, queue) = wheel();

        assert_eq!(wheel.add(entry(1_005)), Placement::Due);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn entries_of_one_tick_share_a_bucket() {
        let (wheel, queue) = wheel();

        assert_eq!(wheel.add(entry(1_050)), Placement::Scheduled);
        assert_eq!(wheel.add(entry(1_055)), Placement::Scheduled);
        assert_eq!(queue.len(), 1);
        assert_eq!(wheel.levels(), 1);
    }

    #[test]
    fn far_entries_overflow() {
        let (wheel, _) = wheel();

        // Beyond the 200ms span of the first level.
        assert_eq!(wheel.add(entry(1_500)), Placement::Scheduled);
        assert_eq!(wheel.levels(), 2);

        assert_eq!(wheel.add(entry(1_000 + 200 * 20 + 10)), Placement::Scheduled);
        assert_eq!(wheel.levels(), 3);
    }

    #[test]
    fn farthest_expiration_stops_at_a_saturated_level() {
        let (wheel, queue) = wheel();

        assert_eq!(wheel.add(entry(i64::MAX)), Placement::Scheduled);
        assert!(wheel.levels() > 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn advance_rounds_down_to_tick() {
        let (wheel, _) = wheel();
        wheel.add(entry(1_500));

        wheel.advance_clock(1_237);
        assert_eq!(wheel.current_time(), 1_230);

        // Less than a tick later: no movement.
        wheel.advance_clock(1_239);
        assert_eq!(wheel.current_time(), 1_230);
    }

    #[test]
    fn cancelled_entries_are_dropped() {
        let (wheel, _) = wheel();
        let cancelled = entry(1_100);
        cancelled.cancel();

        assert_eq!(wheel.add(cancelled), Placement::Cancelled);
        assert!(wheel.drain().is_empty());
    }
}
