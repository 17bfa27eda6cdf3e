use super::listener::{Listener, ListenerKey, Listeners, ProgressiveListener};
use super::state::{COMPLETING, DONE, PENDING, UNCANCELLABLE};
use crate::error::{CancellationError, Cause, PanicError, PromiseError};
use crate::runtime::Executor;
use crate::runtime::context;
use crate::utils;

use parking_lot::{Condvar, Mutex};

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Maximum nesting of inline listener notification on one thread.
///
/// Past this depth notification is resubmitted to the affinity executor so
/// long promise chains cannot overflow the stack.
pub const MAX_LISTENER_STACK_DEPTH: usize = 8;

/// Terminal outcome of a promise.
pub(crate) enum Outcome<V> {
    Success(V),
    Failure(Cause),

    /// The cause is materialized on first access.
    Cancelled(OnceLock<Arc<CancellationError>>),
}

/// A single-assignment, observable container for the eventual result of an
/// asynchronous operation.
///
/// A `Promise` is completed at most once, either by [`success`](Self::success),
/// [`failure`](Self::failure) or [`cancel`](Self::cancel). Observers either
/// block with [`await_done`](Self::await_done)/[`get`](Self::get) or register
/// listeners that run exactly once, after completion.
///
/// Cloning a promise is cheap; clones share the same result slot.
///
/// # Affinity
///
/// A promise may be bound to an [`Executor`]. Listeners are then always
/// notified from inside that executor: inline when the completing thread
/// already runs inside it (up to [`MAX_LISTENER_STACK_DEPTH`] nested levels),
/// as a submitted task otherwise. Blocking waits from inside the affinity
/// executor fail with [`PromiseError::BlockingOperation`].
///
/// # Examples
///
/// ```rust
/// use ordo::promise::Promise;
///
/// let promise = Promise::new();
/// promise.add_listener(|p: &Promise<u32>| assert_eq!(p.get_now(), Some(42)));
/// promise.success(42).unwrap();
/// assert!(promise.is_success());
/// ```
pub struct Promise<V> {
    inner: Arc<Inner<V>>,
}

struct Inner<V> {
    /// Completion state, see [`super::state`].
    state: AtomicU8,

    /// Result slot, written once by the thread that won the completion CAS.
    outcome: OnceLock<Outcome<V>>,

    /// Executor listeners are notified on.
    executor: Option<Arc<dyn Executor>>,

    listeners: Mutex<Listeners<V>>,

    /// Signalled on completion when `listeners.waiters > 0`.
    condvar: Condvar,
}

impl<V> Clone for Promise<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V: Send + Sync + 'static> Default for Promise<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Send + Sync + 'static> Promise<V> {
    /// Creates a pending promise without executor affinity.
    ///
    /// Listeners of such a promise run on whichever thread completes it, or
    /// on the registering thread if it is already complete.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a pending promise whose listeners are notified on `executor`.
    pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
        Self::build(Some(executor))
    }

    fn build(executor: Option<Arc<dyn Executor>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(PENDING),
                outcome: OnceLock::new(),
                executor,
                listeners: Mutex::new(Listeners::new()),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Executor this promise notifies its listeners on, if any.
    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.inner.executor.as_ref()
    }

    /// Completes the promise successfully.
    ///
    /// Fails with [`PromiseError::AlreadyComplete`] if it was already
    /// completed.
    pub fn success(&self, value: V) -> Result<(), PromiseError> {
        if self.try_success(value) {
            Ok(())
        } else {
            Err(PromiseError::AlreadyComplete)
        }
    }

    /// Completes the promise successfully, returning `false` if it was
    /// already completed.
    pub fn try_success(&self, value: V) -> bool {
        self.complete(Outcome::Success(value))
    }

    /// Completes the promise with a failure cause.
    ///
    /// Fails with [`PromiseError::AlreadyComplete`] if it was already
    /// completed.
    pub fn failure(&self, cause: Cause) -> Result<(), PromiseError> {
        if self.try_failure(cause) {
            Ok(())
        } else {
            Err(PromiseError::AlreadyComplete)
        }
    }

    /// Completes the promise with a failure cause, returning `false` if it was
    /// already completed.
    pub fn try_failure(&self, cause: Cause) -> bool {
        self.complete(Outcome::Failure(cause))
    }

    /// Cancels the promise.
    ///
    /// Only a pending promise that was not marked uncancellable can be
    /// cancelled. Returns `true` if this call cancelled it.
    pub fn cancel(&self) -> bool {
        self.complete(Outcome::Cancelled(OnceLock::new()))
    }

    /// Forbids any later cancellation.
    ///
    /// Returns `true` if the promise is now uncancellable, or already
    /// completed without being cancelled; `false` if it was cancelled.
    pub fn set_uncancellable(&self) -> bool {
        loop {
            match self.inner.state.compare_exchange(
                PENDING,
                UNCANCELLABLE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) | Err(UNCANCELLABLE) => return true,
                // The winner may be a cancellation; wait for it to publish.
                Err(COMPLETING) => std::hint::spin_loop(),
                Err(_) => return !self.is_cancelled(),
            }
        }
    }

    /// Publishes `outcome` if this call wins the completion race.
    fn complete(&self, outcome: Outcome<V>) -> bool {
        let cancelling = matches!(outcome, Outcome::Cancelled(_));

        loop {
            let current = self.inner.state.load(Ordering::Acquire);

            let completable = current == PENDING || (current == UNCANCELLABLE && !cancelling);
            if !completable {
                return false;
            }

            if self
                .inner
                .state
                .compare_exchange(current, COMPLETING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        // Only the CAS winner reaches this point, so the slot is empty.
        let _ = self.inner.outcome.set(outcome);
        self.inner.state.store(DONE, Ordering::Release);

        let has_listeners = {
            let listeners = self.inner.listeners.lock();
            if listeners.waiters > 0 {
                self.inner.condvar.notify_all();
            }
            !listeners.entries.is_empty()
        };

        if has_listeners {
            self.notify_listeners();
        }

        true
    }

    /// Returns `true` once the promise is completed, in any way.
    pub fn is_done(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == DONE
    }

    /// Returns `true` if the promise completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::Success(_)))
    }

    /// Returns `true` if the promise was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome(), Some(Outcome::Cancelled(_)))
    }

    /// Returns `true` if [`cancel`](Self::cancel) could still succeed.
    pub fn is_cancellable(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == PENDING
    }

    pub(crate) fn outcome(&self) -> Option<&Outcome<V>> {
        if self.is_done() {
            self.inner.outcome.get()
        } else {
            None
        }
    }

    /// Failure cause of a failed or cancelled promise.
    ///
    /// For a cancelled promise the [`CancellationError`] is created on the
    /// first call; every later call returns the same instance.
    pub fn cause(&self) -> Option<Cause> {
        match self.outcome()? {
            Outcome::Success(_) => None,
            Outcome::Failure(cause) => Some(cause.clone()),
            Outcome::Cancelled(slot) => Some(Self::cancellation(slot) as Cause),
        }
    }

    fn cancellation(slot: &OnceLock<Arc<CancellationError>>) -> Arc<CancellationError> {
        slot.get_or_init(|| Arc::new(CancellationError::capture()))
            .clone()
    }

    /// Adds a listener invoked exactly once, after completion.
    ///
    /// If the promise is already complete the listener is notified right
    /// away, subject to the affinity rules described on [`Promise`].
    pub fn add_listener<F>(&self, listener: F) -> ListenerKey
    where
        F: FnOnce(&Promise<V>) + Send + 'static,
    {
        self.push_listener(Listener::Complete(Box::new(listener)))
    }

    /// Adds a listener that also observes progress reports.
    ///
    /// Progress is only reported through a
    /// [`ProgressivePromise`](super::ProgressivePromise).
    pub fn add_progressive_listener(&self, listener: Arc<dyn ProgressiveListener<V>>) -> ListenerKey {
        self.push_listener(Listener::Progressive(listener))
    }

    fn push_listener(&self, listener: Listener<V>) -> ListenerKey {
        let key = self.inner.listeners.lock().push(listener);

        if self.is_done() {
            self.notify_listeners();
        }

        key
    }

    pub(crate) fn progressive_listeners(&self) -> Vec<Arc<dyn ProgressiveListener<V>>> {
        self.inner.listeners.lock().progressive()
    }

    /// Returns `true` if the caller runs inside the affinity executor.
    pub(crate) fn in_affinity_loop(&self) -> bool {
        self.inner
            .executor
            .as_ref()
            .is_some_and(|executor| executor.in_event_loop())
    }

    /// Dispatches listener notification according to the affinity rules.
    fn notify_listeners(&self) {
        let Some(executor) = self.inner.executor.clone() else {
            self.notify_listeners_now();
            return;
        };

        if executor.in_event_loop()
            && context::with_listener_depth(MAX_LISTENER_STACK_DEPTH, || {
                self.notify_listeners_now()
            })
            .is_some()
        {
            return;
        }

        let promise = self.clone();
        if let Err(error) = executor.execute(Box::new(move || promise.notify_listeners_now())) {
            tracing::error!(%error, "failed to submit listener notification, notifying inline");
            self.notify_listeners_now();
        }
    }

    /// Drains the listener registry until no listener is left.
    ///
    /// Listeners added while a pass is running are picked up by the next
    /// pass of the thread that is already notifying.
    fn notify_listeners_now(&self) {
        let mut batch = {
            let mut listeners = self.inner.listeners.lock();
            if listeners.notifying || listeners.entries.is_empty() {
                return;
            }

            listeners.notifying = true;
            mem::take(&mut listeners.entries)
        };

        loop {
            for (_, listener) in batch {
                self.invoke(listener);
            }

            let mut listeners = self.inner.listeners.lock();
            if listeners.entries.is_empty() {
                listeners.notifying = false;
                return;
            }

            batch = mem::take(&mut listeners.entries);
        }
    }

    fn invoke(&self, listener: Listener<V>) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| match listener {
            Listener::Complete(f) => f(self),
            Listener::Progressive(l) => l.operation_complete(self),
        }));

        if let Err(payload) = result {
            let error = PanicError::from_payload(&*payload);
            tracing::warn!(%error, "promise listener panicked");
        }
    }

    /// Fails if the caller would deadlock by blocking on this promise.
    fn check_deadlock(&self) -> Result<(), PromiseError> {
        if self.in_affinity_loop() {
            Err(PromiseError::BlockingOperation)
        } else {
            Ok(())
        }
    }

    /// Blocks until the promise completes.
    ///
    /// # Errors
    ///
    /// [`PromiseError::BlockingOperation`] when called from inside the
    /// promise's affinity executor.
    pub fn await_done(&self) -> Result<(), PromiseError> {
        if self.is_done() {
            return Ok(());
        }

        self.check_deadlock()?;

        let mut listeners = self.inner.listeners.lock();
        while !self.is_done() {
            listeners.waiters += 1;
            self.inner.condvar.wait(&mut listeners);
            listeners.waiters -= 1;
        }

        Ok(())
    }

    /// Same as [`await_done`](Self::await_done).
    ///
    /// Threads cannot be interrupted, so the two waits behave identically.
    pub fn await_uninterruptibly(&self) -> Result<(), PromiseError> {
        self.await_done()
    }

    /// Blocks until the promise completes or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the promise is done.
    pub fn await_timeout(&self, timeout: Duration) -> Result<bool, PromiseError> {
        if self.is_done() {
            return Ok(true);
        }

        if timeout.is_zero() {
            return Ok(false);
        }

        self.check_deadlock()?;

        let Some(deadline) = utils::deadline(timeout) else {
            self.await_done()?;
            return Ok(true);
        };
        let mut listeners = self.inner.listeners.lock();

        while !self.is_done() {
            listeners.waiters += 1;
            let timed_out = self
                .inner
                .condvar
                .wait_until(&mut listeners, deadline)
                .timed_out();
            listeners.waiters -= 1;

            if timed_out {
                return Ok(self.is_done());
            }
        }

        Ok(true)
    }

    /// Waits for completion and surfaces a failure or cancellation as an
    /// error.
    pub fn sync(&self) -> Result<(), PromiseError> {
        self.await_done()?;
        self.surface(|_| ())
    }

    /// Maps the published outcome into the `get` family's result shape.
    pub(crate) fn surface<R>(&self, on_success: impl FnOnce(&V) -> R) -> Result<R, PromiseError> {
        match self.outcome() {
            Some(Outcome::Success(value)) => Ok(on_success(value)),
            Some(Outcome::Failure(cause)) => Err(PromiseError::Execution(cause.clone())),
            Some(Outcome::Cancelled(slot)) => Err(PromiseError::Cancelled(Self::cancellation(slot))),
            None => unreachable!("surface is only called on completed promises"),
        }
    }
}

impl<V> Promise<V> {
    /// Removes a listener that has not been notified yet.
    ///
    /// Returns `false` if the key is unknown or the listener already ran.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        self.inner.listeners.lock().remove(key)
    }
}

impl<V: Clone + Send + Sync + 'static> Promise<V> {
    /// Blocks until completion and returns the value.
    ///
    /// # Errors
    ///
    /// - [`PromiseError::Execution`] wrapping the failure cause,
    /// - [`PromiseError::Cancelled`] if the promise was cancelled,
    /// - [`PromiseError::BlockingOperation`] inside the affinity executor.
    pub fn get(&self) -> Result<V, PromiseError> {
        self.await_done()?;
        self.surface(V::clone)
    }

    /// Like [`get`](Self::get), giving up after `timeout`.
    ///
    /// A timeout yields [`PromiseError::Timeout`] and leaves the promise
    /// untouched.
    pub fn get_timeout(&self, timeout: Duration) -> Result<V, PromiseError> {
        if !self.await_timeout(timeout)? {
            return Err(PromiseError::Timeout(timeout));
        }

        self.surface(V::clone)
    }

    /// Returns the value if the promise completed successfully, without
    /// blocking.
    pub fn get_now(&self) -> Option<V> {
        match self.outcome() {
            Some(Outcome::Success(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<V> fmt::Debug for Promise<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.state.load(Ordering::Acquire) {
            PENDING => "pending",
            UNCANCELLABLE => "uncancellable",
            COMPLETING => "completing",
            _ => match self.inner.outcome.get() {
                Some(Outcome::Success(_)) => "success",
                Some(Outcome::Failure(_)) => "failure",
                Some(Outcome::Cancelled(_)) => "cancelled",
                None => "completing",
            },
        };

        f.debug_struct("Promise").field("state", &state).finish()
    }
}
