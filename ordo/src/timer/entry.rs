use super::TimerTask;
use super::bucket::Bucket;
use super::clock;

use parking_lot::Mutex;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const EXPIRED: u8 = 2;

/// Where an entry currently sits: its bucket and slot index.
pub(crate) type Slot = (Weak<Bucket>, usize);

/// A timer task together with its expiration and wheel linkage.
pub(crate) struct TimerTaskEntry {
    /// Absolute expiration on the timer clock, in milliseconds.
    pub(crate) expiration_ms: i64,

    state: AtomicU8,

    /// Taken exactly once, by expiration.
    task: Mutex<Option<TimerTask>>,

    /// Bucket linkage, `None` while the entry is between buckets.
    slot: Mutex<Option<Slot>>,

    /// Live-timeout counter of the owning timer.
    pending: Arc<AtomicUsize>,
}

impl TimerTaskEntry {
    pub(crate) fn new(expiration_ms: i64, task: TimerTask, pending: Arc<AtomicUsize>) -> Arc<Self> {
        pending.fetch_add(1, Ordering::AcqRel);

        Arc::new(Self {
            expiration_ms,
            state: AtomicU8::new(PENDING),
            task: Mutex::new(Some(task)),
            slot: Mutex::new(None),
            pending,
        })
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Transitions to `to` if the entry is still pending.
    fn transition(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }

        won
    }

    /// Marks the entry expired and hands out its task.
    ///
    /// Returns `None` if the entry was cancelled or already expired.
    pub(crate) fn expire(&self) -> Option<TimerTask> {
        if self.transition(EXPIRED) {
            self.task.lock().take()
        } else {
            None
        }
    }

    /// Marks the entry cancelled and unlinks it from its bucket.
    pub(crate) fn cancel(self: &Arc<Self>) -> bool {
        if !self.transition(CANCELLED) {
            return false;
        }

        // Released before the bucket lock is taken: buckets lock entries
        // in the opposite order.
        let slot = self.slot.lock().clone();
        if let Some((bucket, index)) = slot {
            if let Some(bucket) = bucket.upgrade() {
                bucket.remove(self, index);
            }
        }

        self.task.lock().take();
        true
    }

    pub(crate) fn set_slot(&self, slot: Option<Slot>) {
        *self.slot.lock() = slot;
    }

    /// Clears the linkage if it still points at `bucket`.
    pub(crate) fn clear_slot_if(&self, bucket: &Bucket) {
        let mut slot = self.slot.lock();

        if slot
            .as_ref()
            .is_some_and(|(current, _)| std::ptr::eq(current.as_ptr(), bucket))
        {
            *slot = None;
        }
    }
}

/// Handle to a task submitted to a [`Timer`](super::Timer).
///
/// Two handles are equal when they refer to the same submission.
#[derive(Clone)]
pub struct Timeout {
    pub(crate) entry: Arc<TimerTaskEntry>,
}

impl Timeout {
    pub(crate) fn new(entry: Arc<TimerTaskEntry>) -> Self {
        Self { entry }
    }

    /// Cancels the task if it has neither run nor been cancelled yet.
    pub fn cancel(&self) -> bool {
        self.entry.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled()
    }

    /// Returns `true` once the task was handed off for execution.
    pub fn is_expired(&self) -> bool {
        self.entry.state.load(Ordering::Acquire) == EXPIRED
    }

    /// Monotonic instant at which the task is due.
    pub fn deadline(&self) -> Instant {
        clock::instant_at(self.entry.expiration_ms)
    }

    /// Time left until the task is due, zero if it is overdue.
    pub fn remaining(&self) -> Duration {
        self.deadline().saturating_duration_since(Instant::now())
    }
}

impl PartialEq for Timeout {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }
}

impl Eq for Timeout {}

impl Hash for Timeout {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.entry).hash(state);
    }
}

impl fmt::Debug for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.entry.state.load(Ordering::Relaxed) {
            PENDING => "pending",
            CANCELLED => "cancelled",
            _ => "expired",
        };

        f.debug_struct("Timeout")
            .field("expiration_ms", &self.entry.expiration_ms)
            .field("state", &state)
            .finish()
    }
}
