use super::Promise;
use crate::error::PromiseError;
use crate::runtime::Executor;

use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A [`Promise`] that can additionally report progress.
///
/// Progress reports are transient: they are broadcast to the progressive
/// listeners registered at the time of the report and never stored.
/// Monotonicity is up to the caller; only the range is checked.
pub struct ProgressivePromise<V> {
    promise: Promise<V>,
}

impl<V> Clone for ProgressivePromise<V> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Default for ProgressivePromise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> ProgressivePromise<V> {
    pub fn new() -> Self {
        Self {
            promise: Promise::new(),
        }
    }

    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self {
            promise: Promise::with_executor(executor),
        }
    }

    /// The underlying promise.
    pub fn promise(&self) -> &Promise<V> {
        &self.promise
    }

    /// Reports progress.
    ///
    /// A negative `total` means the total is unknown; it is normalized to
    /// `-1` and only `progress >= 0` is required. Otherwise
    /// `0 <= progress <= total` must hold.
    ///
    /// # Errors
    ///
    /// [`PromiseError::InvalidProgress`] for out-of-range values and
    /// [`PromiseError::AlreadyComplete`] once the promise is done.
    pub fn set_progress(&self, progress: i64, total: i64) -> Result<(), PromiseError> {
        let total = normalize(progress, total)?;

        if self.promise.is_done() {
            return Err(PromiseError::AlreadyComplete);
        }

        self.notify_progress(progress, total);
        Ok(())
    }

    /// Non-failing variant of [`set_progress`](Self::set_progress).
    pub fn try_progress(&self, progress: i64, total: i64) -> bool {
        let Ok(total) = normalize(progress, total) else {
            return false;
        };

        if self.promise.is_done() {
            return false;
        }

        self.notify_progress(progress, total);
        true
    }

    fn notify_progress(&self, progress: i64, total: i64) {
        let listeners = self.promise.progressive_listeners();
        if listeners.is_empty() {
            return;
        }

        let promise = self.promise.clone();
        let notify = move || {
            for listener in &listeners {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    listener.operation_progressed(&promise, progress, total)
                }));

                if result.is_err() {
                    tracing::warn!(progress, total, "progress listener panicked");
                }
            }
        };

        match self.promise.executor() {
            Some(executor) if !executor.in_event_loop() => {
                if let Err(error) = executor.execute(Box::new(notify)) {
                    tracing::error!(%error, "failed to submit progress notification");
                }
            }
            _ => notify(),
        }
    }
}

fn normalize(progress: i64, total: i64) -> Result<i64, PromiseError> {
    if total < 0 {
        if progress < 0 {
            return Err(PromiseError::InvalidProgress { progress, total: -1 });
        }
        return Ok(-1);
    }

    if progress < 0 || progress > total {
        return Err(PromiseError::InvalidProgress { progress, total });
    }

    Ok(total)
}

impl<V> Deref for ProgressivePromise<V> {
    type Target = Promise<V>;

    fn deref(&self) -> &Promise<V> {
        &self.promise
    }
}
