use super::executor::Executor;
use crate::error::ExecutorError;

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Consumer of the messages a [`MessageLoop`] receives.
pub trait Handler<M>: Send + Sync {
    fn handle(&self, message: M);
}

impl<M, F> Handler<M> for F
where
    F: Fn(M) + Send + Sync,
{
    fn handle(&self, message: M) {
        self(message)
    }
}

/// Binds a message handler to an executor.
///
/// [`MessageLoop::receive`] turns every message into a task of the executor,
/// so messages inherit its ordering guarantees: strict FIFO on one thread
/// for a [`SingleThreadEventLoop`](super::SingleThreadEventLoop), FIFO
/// without thread affinity for an [`OrderedEventLoop`](super::OrderedEventLoop).
///
/// # Examples
///
/// ```rust
/// use ordo::runtime::{Lifecycle, MessageLoop, SingleThreadEventLoop};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
///
/// let event_loop = SingleThreadEventLoop::new("messages");
/// let messages = MessageLoop::new(event_loop.clone(), move |n: u32| sink.lock().unwrap().push(n));
///
/// for n in 0..3 {
///     messages.receive(n).unwrap();
/// }
///
/// event_loop.shutdown_gracefully();
/// event_loop.await_termination(Duration::from_secs(5));
/// assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
/// ```
pub struct MessageLoop<M, E> {
    executor: E,
    handler: Arc<dyn Handler<M>>,
    _message: PhantomData<fn(M)>,
}

impl<M, E> MessageLoop<M, E>
where
    M: Send + 'static,
    E: Executor,
{
    pub fn new(executor: E, handler: impl Handler<M> + 'static) -> Self {
        Self {
            executor,
            handler: Arc::new(handler),
            _message: PhantomData,
        }
    }

    /// Enqueues `message` for the handler.
    ///
    /// # Errors
    ///
    /// Whatever the executor reports when it refuses the task.
    pub fn receive(&self, message: M) -> Result<(), ExecutorError> {
        let handler = self.handler.clone();
        self.executor
            .execute(Box::new(move || handler.handle(message)))
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<M, E: Clone> Clone for MessageLoop<M, E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            handler: self.handler.clone(),
            _message: PhantomData,
        }
    }
}

impl<M, E: fmt::Debug> fmt::Debug for MessageLoop<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLoop")
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}
