use super::{ListenerKey, Promise};
use crate::error::PromiseError;

use parking_lot::Mutex;

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// A [`Future`] resolving once a [`Promise`] completes.
///
/// Obtained through [`IntoFuture`], so a promise can be `.await`ed from any
/// async runtime. The waker is registered as a promise listener before the
/// completion state is re-checked, so no wake-up is missed.
///
/// Dropping the future does **not** cancel the promise; it only removes the
/// listener.
pub struct PromiseFuture<V> {
    promise: Promise<V>,

    /// Slot the listener wakes; updated on every poll.
    waker: Arc<Mutex<Option<Waker>>>,

    /// Listener registered on the first pending poll.
    key: Option<ListenerKey>,
}

impl<V: Clone + Send + Sync + 'static> IntoFuture for Promise<V> {
    type Output = Result<V, PromiseError>;
    type IntoFuture = PromiseFuture<V>;

    fn into_future(self) -> PromiseFuture<V> {
        PromiseFuture {
            promise: self,
            waker: Arc::new(Mutex::new(None)),
            key: None,
        }
    }
}

impl<V: Clone + Send + Sync + 'static> PromiseFuture<V> {
    fn take_result(&self) -> Result<V, PromiseError> {
        self.promise.surface(V::clone)
    }
}

impl<V: Clone + Send + Sync + 'static> Future for PromiseFuture<V> {
    type Output = Result<V, PromiseError>;

    /// Polls the promise.
    ///
    /// A completed promise resolves immediately. Otherwise the current waker
    /// is stored, a listener is registered once, and the state is checked
    /// again.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if this.promise.is_done() {
            return Poll::Ready(this.take_result());
        }

        *this.waker.lock() = Some(cx.waker().clone());

        if this.key.is_none() {
            let slot = this.waker.clone();
            this.key = Some(this.promise.add_listener(move |_| {
                if let Some(waker) = slot.lock().take() {
                    waker.wake();
                }
            }));
        }

        if this.promise.is_done() {
            return Poll::Ready(this.take_result());
        }

        Poll::Pending
    }
}

impl<V> Drop for PromiseFuture<V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.promise.remove_listener(key);
        }
    }
}
