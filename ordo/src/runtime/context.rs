use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity of an executor, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExecutorId(usize);

impl ExecutorId {
    /// Allocates a fresh identifier.
    pub(crate) fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);

        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

thread_local! {
    /// Executor currently running a task on this thread.
    ///
    /// Set by the strict loop's worker for its whole lifetime and by the
    /// ordered loop around each drain, which may land on a different pool
    /// thread every time.
    static CURRENT_EXECUTOR: Cell<Option<ExecutorId>> = const { Cell::new(None) };

    /// Nesting depth of inline listener notification on this thread.
    static LISTENER_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Runs `f` with `id` installed as the current executor of this thread.
///
/// The previous executor is restored afterwards, so nested drains (an ordered
/// loop whose task runs another executor inline) see the right identity.
pub(crate) fn enter_executor<R>(id: ExecutorId, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<ExecutorId>);

    impl Drop for Restore {
        fn drop(&mut self) {
            CURRENT_EXECUTOR.with(|c| c.set(self.0));
        }
    }

    let _restore = Restore(CURRENT_EXECUTOR.with(|c| c.replace(Some(id))));

    f()
}

/// Returns `true` if the calling thread is currently running inside `id`.
pub(crate) fn is_current(id: ExecutorId) -> bool {
    CURRENT_EXECUTOR.with(|c| c.get() == Some(id))
}

/// Runs `f` one listener-notification level deeper, unless the depth on this
/// thread already reached `limit`.
///
/// Returns `None` without running `f` when the limit is reached; the caller
/// is expected to resubmit the notification as a task instead.
pub(crate) fn with_listener_depth<R>(limit: usize, f: impl FnOnce() -> R) -> Option<R> {
    let depth = LISTENER_DEPTH.with(Cell::get);
    if depth >= limit {
        return None;
    }

    struct Restore(usize);

    impl Drop for Restore {
        fn drop(&mut self) {
            LISTENER_DEPTH.with(|d| d.set(self.0));
        }
    }

    LISTENER_DEPTH.with(|d| d.set(depth + 1));
    let _restore = Restore(depth);

    Some(f())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_identity_is_scoped() {
        let outer = ExecutorId::next();
        let inner = ExecutorId::next();

        assert!(!is_current(outer));
        enter_executor(outer, || {
            assert!(is_current(outer));
            enter_executor(inner, || {
                assert!(is_current(inner));
                assert!(!is_current(outer));
            });
            assert!(is_current(outer));
        });
        assert!(!is_current(outer));
    }

    #[test]
    fn listener_depth_is_bounded() {
        fn recurse(level: usize) -> usize {
            with_listener_depth(3, || recurse(level + 1)).unwrap_or(level)
        }

        assert_eq!(recurse(0), 3);
        assert_eq!(with_listener_depth(3, || 7), Some(7));
    }
}
