use super::entry::TimerTaskEntry;
use crate::utils::Slab;

use parking_lot::Mutex;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Expiration of a bucket that is not in the delay queue.
pub(crate) const UNSET: i64 = -1;

/// One slot of a timing wheel: the entries expiring within the same tick.
///
/// A bucket is in the delay queue at most once per expiration: only the
/// call that publishes a new expiration pushes it.
pub(crate) struct Bucket {
    expiration: AtomicI64,
    entries: Mutex<Slab<Arc<TimerTaskEntry>>>,
}

impl Bucket {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            expiration: AtomicI64::new(UNSET),
            entries: Mutex::new(Slab::new(0)),
        })
    }

    pub(crate) fn add(self: &Arc<Self>, entry: Arc<TimerTaskEntry>) {
        let mut entries = self.entries.lock();
        let index = entries.insert(entry.clone());

        entry.set_slot(Some((Arc::downgrade(self), index)));
    }

    /// Unlinks `entry` if the slot at `index` still holds it.
    ///
    /// The slot may have been flushed and reused since the caller read it.
    pub(crate) fn remove(&self, entry: &Arc<TimerTaskEntry>, index: usize) {
        let mut entries = self.entries.lock();

        if entries
            .get(index)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(index);
            entry.clear_slot_if(self);
        }
    }

    /// Publishes the bucket's expiration.
    ///
    /// Returns `true` if the value changed, in which case the caller must
    /// push the bucket into the delay queue.
    pub(crate) fn set_expiration(&self, expiration_ms: i64) -> bool {
        self.expiration.swap(expiration_ms, Ordering::AcqRel) != expiration_ms
    }

    pub(crate) fn expiration(&self) -> i64 {
        self.expiration.load(Ordering::Acquire)
    }

    /// Removes and returns every entry, resetting the expiration.
    ///
    /// The caller reinserts the entries after the bucket lock is released.
    pub(crate) fn flush(&self) -> Vec<Arc<TimerTaskEntry>> {
        let mut entries = self.entries.lock();
        let drained = entries.drain();

        for entry in &drained {
            entry.clear_slot_if(self);
        }

        self.expiration.store(UNSET, Ordering::Release);
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("expiration", &self.expiration())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    fn entry(expiration_ms: i64, pending: &Arc<AtomicUsize>) -> Arc<TimerTaskEntry> {
        TimerTaskEntry::new(expiration_ms, Box::new(|_| {}), pending.clone())
    }

    #[test]
    fn expiration_is_published_once() {
        let bucket = Bucket::new();

        assert!(bucket.set_expiration(100));
        assert!(!bucket.set_expiration(100));
        assert!(bucket.set_expiration(200));
    }

    #[test]
    fn cancel_unlinks_entry() {
        let pending = Arc::new(AtomicUsize::new(0));
        let bucket = Bucket::new();
        let first = entry(10, &pending);
        let second = entry(10, &pending);

        bucket.add(first.clone());
        bucket.add(second.clone());
        assert_eq!(bucket.len(), 2);

        assert!(first.cancel());
        assert_eq!(bucket.len(), 1);
        assert_eq!(pending.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stale_slot_is_not_removed() {
        let pending = Arc::new(AtomicUsize::new(0));
        let bucket = Bucket::new();
        let first = entry(10, &pending);
        let second = entry(10, &pending);

        bucket.add(first.clone());
        bucket.set_expiration(10);
        assert_eq!(bucket.flush().len(), 1);
        assert_eq!(bucket.expiration(), UNSET);

        // Slot 0 now holds `second`; removing `first` from it is a no-op.
        bucket.add(second.clone());
        bucket.remove(&first, 0);
        assert_eq!(bucket.len(), 1);
    }
}
