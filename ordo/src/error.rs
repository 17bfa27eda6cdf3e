//! Error taxonomy shared by every subsystem of the crate.
//!
//! Errors fall into a handful of families:
//! - *state conflicts* (completing a promise twice, registering a key twice,
//!   stopping a timer twice) are always reported to the caller,
//! - *blocking inside an event loop* is detected and reported instead of
//!   deadlocking,
//! - *timeouts* on blocking waits are distinct from failures,
//! - *resource exhaustion* surfaces only when the configured rejection policy
//!   asks for it.
//!
//! Not-found conditions (posting to an unknown key) have no variant:
//! they are silent no-ops.

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A shareable failure cause stored inside a completed promise.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors reported by [`Promise`](crate::promise::Promise) operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PromiseError {
    /// The promise was already completed (successfully, by failure, or by
    /// cancellation).
    #[error("promise already complete")]
    AlreadyComplete,

    /// A blocking wait was attempted on the thread that owns the promise's
    /// event loop, which would deadlock.
    #[error("blocking operation inside the promise's own event loop")]
    BlockingOperation,

    /// A timed wait elapsed before the promise completed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The promise was cancelled.
    #[error(transparent)]
    Cancelled(Arc<CancellationError>),

    /// The operation represented by the promise failed.
    #[error("execution failed: {0}")]
    Execution(Cause),

    /// A progress report was outside the accepted range.
    #[error("progress {progress} is out of range for total {total}")]
    InvalidProgress { progress: i64, total: i64 },
}

/// Errors reported when an executor cannot accept a task.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecutorError {
    /// The executor is shutting down or already terminated.
    #[error("executor `{0}` rejected the task: shut down")]
    Rejected(String),

    /// The memory-safe queue refused the item under the abort policy.
    #[error("available memory below {threshold} bytes, task rejected")]
    MemoryExhausted { threshold: u64 },
}

/// Errors reported by dispatchers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    /// A receiver is already registered under this key.
    #[error("a receiver is already registered for key `{0}`")]
    AlreadyRegistered(String),

    /// The dispatcher has been shut down.
    #[error("dispatcher has been stopped")]
    Stopped,

    /// The underlying executor refused the work.
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Errors reported by timers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TimerError {
    /// A timeout was submitted after `stop()`.
    #[error("cannot schedule a timeout after the timer has stopped")]
    Stopped,

    /// `stop()` was invoked more than once.
    #[error("timer already stopped")]
    AlreadyStopped,
}

/// Cancellation cause attached to a cancelled promise.
///
/// Created lazily, the first time the cause of a cancelled promise is
/// observed, so cancelling stays cheap.
pub struct CancellationError {
    backtrace: Backtrace,
}

impl CancellationError {
    pub(crate) fn capture() -> Self {
        Self {
            backtrace: Backtrace::capture(),
        }
    }

    /// Backtrace captured where the cancellation was first observed.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Debug for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationError").finish_non_exhaustive()
    }
}

impl fmt::Display for CancellationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation cancelled")
    }
}

impl StdError for CancellationError {}

/// A panic caught at a task, listener, or receiver boundary.
#[derive(Debug, Clone, thiserror::Error)]
#[error("panicked: {message}")]
pub struct PanicError {
    message: String,
}

impl PanicError {
    /// Builds an error from the payload returned by `catch_unwind`.
    pub(crate) fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };

        Self { message }
    }

    /// The panic message, if any could be extracted.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Wraps any error into a [`Cause`].
pub fn cause<E>(error: E) -> Cause
where
    E: StdError + Send + Sync + 'static,
{
    Arc::new(error)
}
