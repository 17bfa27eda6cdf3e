use super::bucket::Bucket;
use super::clock;
use crate::utils;

use parking_lot::{Condvar, Mutex};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

/// A bucket queued under the expiration it had when it was pushed.
struct Delayed {
    expiration_ms: i64,
    bucket: Arc<Bucket>,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.expiration_ms == other.expiration_ms
    }
}

impl Eq for Delayed {}

impl Ord for Delayed {
    /// Reversed: the heap pops the earliest expiration first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.expiration_ms.cmp(&self.expiration_ms)
    }
}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Buckets ordered by expiration, shared by every level of a wheel.
///
/// It holds one element per published bucket expiration, so its size is
/// bounded by the number of buckets rather than the number of timeouts.
pub(crate) struct DelayQueue {
    heap: Mutex<BinaryHeap<Delayed>>,
    condvar: Condvar,

    /// Set by [`close`](Self::close); makes `poll` return immediately.
    closed: AtomicBool,
}

impl DelayQueue {
    pub(crate) fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            condvar: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn offer(&self, bucket: Arc<Bucket>) {
        let expiration_ms = bucket.expiration();
        self.heap.lock().push(Delayed {
            expiration_ms,
            bucket,
        });

        // A new head may be due earlier than the one being waited on.
        self.condvar.notify_all();
    }

    /// Waits up to `timeout` for a bucket to be due and returns it.
    ///
    /// Returns `None` early once the queue is closed.
    pub(crate) fn poll(&self, timeout: Duration) -> Option<Arc<Bucket>> {
        let deadline = utils::after(Instant::now(), timeout);
        let mut heap = self.heap.lock();

        loop {
            if self.closed.load(AtomicOrdering::Acquire) {
                return None;
            }

            let due_at = match heap.peek() {
                Some(head) if head.expiration_ms <= clock::now_ms() => {
                    return heap.pop().map(|delayed| delayed.bucket);
                }
                Some(head) => clock::instant_at(head.expiration_ms).min(deadline),
                None => deadline,
            };

            if Instant::now() >= deadline {
                return None;
            }

            self.condvar.wait_until(&mut heap, due_at);
        }
    }

    /// Returns a due bucket without waiting.
    pub(crate) fn poll_now(&self) -> Option<Arc<Bucket>> {
        let mut heap = self.heap.lock();

        match heap.peek() {
            Some(head) if head.expiration_ms <= clock::now_ms() => {
                heap.pop().map(|delayed| delayed.bucket)
            }
            _ => None,
        }
    }

    /// Releases every thread blocked in [`poll`](Self::poll), for good.
    pub(crate) fn close(&self) {
        let _heap = self.heap.lock();
        self.closed.store(true, AtomicOrdering::Release);
        self.condvar.notify_all();
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Removes and returns every queued bucket.
    pub(crate) fn drain(&self) -> Vec<Arc<Bucket>> {
        self.heap
            .lock()
            .drain()
            .map(|delayed| delayed.bucket)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_at(expiration_ms: i64) -> Arc<Bucket> {
        let bucket = Bucket::new();
        bucket.set_expiration(expiration_ms);
        bucket
    }

    #[test]
    fn pops_in_expiration_order() {
        let queue = DelayQueue::new();
        let now = clock::now_ms();

        queue.offer(bucket_at(now - 5));
        queue.offer(bucket_at(now - 20));
        queue.offer(bucket_at(now - 10));

        let order: Vec<_> = std::iter::from_fn(|| queue.poll_now())
            .map(|bucket| bucket.expiration())
            .collect();
        assert_eq!(order, vec![now - 20, now - 10, now - 5]);
    }

    #[test]
    fn poll_waits_for_expiration() {
        let queue = DelayQueue::new();
        queue.offer(bucket_at(clock::now_ms() + 30));

        assert!(queue.poll_now().is_none());
        assert!(queue.poll(Duration::from_millis(1)).is_none());
        assert!(queue.poll(Duration::from_secs(2)).is_some());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn close_releases_pollers() {
        let queue = Arc::new(DelayQueue::new());
        let poller = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.poll(Duration::from_secs(30)).is_none())
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.close();
        assert!(poller.join().unwrap());
    }
}
