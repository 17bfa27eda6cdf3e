use super::Promise;

use std::sync::Arc;

/// Handle returned when a listener is added, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(pub(crate) u64);

/// A listener that additionally observes progress reports of a
/// [`ProgressivePromise`](super::ProgressivePromise).
pub trait ProgressiveListener<V>: Send + Sync {
    /// Called for every accepted progress report.
    ///
    /// `total` is `-1` when the total is unknown.
    fn operation_progressed(&self, promise: &Promise<V>, progress: i64, total: i64);

    /// Called exactly once, when the promise completes.
    fn operation_complete(&self, promise: &Promise<V>);
}

pub(crate) type CompleteFn<V> = Box<dyn FnOnce(&Promise<V>) + Send + 'static>;

/// A registered listener.
pub(crate) enum Listener<V> {
    /// Completion-only listener, consumed on notification.
    Complete(CompleteFn<V>),

    /// Listener that also receives progress reports.
    Progressive(Arc<dyn ProgressiveListener<V>>),
}

/// Listener registry of one promise, guarded by the promise's mutex.
pub(crate) struct Listeners<V> {
    /// Listeners in registration order.
    pub(crate) entries: Vec<(ListenerKey, Listener<V>)>,

    /// A notification pass is draining `entries` right now.
    pub(crate) notifying: bool,

    /// Number of threads blocked waiting for completion.
    pub(crate) waiters: usize,

    next_key: u64,
}

impl<V> Listeners<V> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            notifying: false,
            waiters: 0,
            next_key: 0,
        }
    }

    pub(crate) fn push(&mut self, listener: Listener<V>) -> ListenerKey {
        let key = ListenerKey(self.next_key);
        self.next_key += 1;

        self.entries.push((key, listener));
        key
    }

    pub(crate) fn remove(&mut self, key: ListenerKey) -> bool {
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Clones the progressive listeners, in registration order.
    pub(crate) fn progressive(&self) -> Vec<Arc<dyn ProgressiveListener<V>>> {
        self.entries
            .iter()
            .filter_map(|(_, listener)| match listener {
                Listener::Progressive(l) => Some(l.clone()),
                Listener::Complete(_) => None,
            })
            .collect()
    }
}
