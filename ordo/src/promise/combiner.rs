use super::Promise;
use crate::error::Cause;

use parking_lot::Mutex;

use std::sync::Arc;

/// Aggregates several promises into one.
///
/// Promises are added with [`add`](Self::add); [`finish`](Self::finish) hands
/// over the aggregate promise, which completes once every added promise is
/// done. It succeeds if all of them succeeded and otherwise fails with the
/// cause of the first one that did not (cancellations included).
///
/// # Examples
///
/// ```rust
/// use ordo::promise::{Promise, PromiseCombiner};
///
/// let a = Promise::<u8>::new();
/// let b = Promise::<&'static str>::new();
///
/// let mut combiner = PromiseCombiner::new();
/// combiner.add(&a);
/// combiner.add(&b);
///
/// let all = Promise::new();
/// combiner.finish(all.clone());
///
/// a.success(1).unwrap();
/// b.success("two").unwrap();
/// assert!(all.is_success());
/// ```
pub struct PromiseCombiner {
    state: Arc<Mutex<Progress>>,
    finished: bool,
}

struct Progress {
    expected: usize,
    done: usize,
    cause: Option<Cause>,
    aggregate: Option<Promise<()>>,
}

impl Progress {
    /// Completes the aggregate if everything it waits for is done.
    fn try_complete(&mut self) {
        if self.done != self.expected {
            return;
        }

        let Some(aggregate) = self.aggregate.take() else {
            return;
        };

        match self.cause.take() {
            Some(cause) => {
                aggregate.try_failure(cause);
            }
            None => {
                aggregate.try_success(());
            }
        }
    }
}

impl Default for PromiseCombiner {
    fn default() -> Self {
        Self::new()
    }
}

impl PromiseCombiner {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Progress {
                expected: 0,
                done: 0,
                cause: None,
                aggregate: None,
            })),
            finished: false,
        }
    }

    /// Adds a promise to the aggregation.
    ///
    /// # Panics
    ///
    /// Panics if called after [`finish`](Self::finish).
    pub fn add<V: Send + Sync + 'static>(&mut self, promise: &Promise<V>) {
        assert!(!self.finished, "promises cannot be added after finish()");

        self.state.lock().expected += 1;

        let state = self.state.clone();
        promise.add_listener(move |p| {
            let mut progress = state.lock();
            progress.done += 1;

            if progress.cause.is_none() {
                progress.cause = p.cause();
            }

            progress.try_complete();
        });
    }

    /// Sets the aggregate promise; no more promises may be added.
    ///
    /// # Panics
    ///
    /// Panics if called twice.
    pub fn finish(&mut self, aggregate: Promise<()>) {
        assert!(!self.finished, "finish() already called");
        self.finished = true;

        let mut progress = self.state.lock();
        progress.aggregate = Some(aggregate);
        progress.try_complete();
    }
}
