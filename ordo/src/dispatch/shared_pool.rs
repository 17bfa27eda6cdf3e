use super::inbox::Inbox;
use super::schedule::{self, Mailboxes};
use super::{Dispatcher, Key, Message, Receiver};
use crate::error::{DispatchError, ExecutorError};
use crate::runtime::{
    Executor, Lifecycle, ScheduledFuture, Scheduler, SingleThreadEventLoop, Task, ThreadPool, run_task,
};

use crossbeam_channel::{Receiver as Channel, Sender};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Work item of the global queue.
enum Pending<M> {
    /// A mailbox with letters to process.
    Ready(Arc<Inbox<M>>),

    /// A plain task handed over through the execution context.
    Run(Task),

    /// Ends the worker that takes it; each worker passes it on.
    PoisonPill,
}

/// Dispatcher whose receivers share a fixed set of worker threads.
///
/// Posting a message appends it to the receiver's mailbox and pushes the
/// mailbox onto one global queue. Each worker takes the next ready mailbox
/// and drains it; a mailbox already being drained elsewhere is skipped.
///
/// Receivers must not block: a blocked receiver holds one of the shared
/// workers.
///
/// # Examples
///
/// ```rust
/// use ordo::dispatch::{Dispatcher, DispatcherBuilder, Receiver};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Sum(AtomicU64);
///
/// impl Receiver<u64> for Sum {
///     fn receive(&self, n: u64) {
///         self.0.fetch_add(n, Ordering::SeqCst);
///     }
/// }
///
/// let dispatcher = DispatcherBuilder::new("sums").workers(2).build_shared_pool::<&str, u64>();
/// let sum = Arc::new(Sum::default());
///
/// dispatcher.register("total", sum.clone(), false).unwrap();
/// for n in 1..=4 {
///     dispatcher.post_message(&"total", n);
/// }
///
/// dispatcher.shutdown();
/// assert!(dispatcher.await_termination(Duration::from_secs(5)));
/// assert_eq!(sum.0.load(Ordering::SeqCst), 10);
/// ```
pub struct SharedPoolDispatcher<K, M> {
    inner: Arc<Inner<K, M>>,
}

struct Inner<K, M> {
    name: String,
    registry: DashMap<K, Arc<Inbox<M>>>,

    /// Global queue of ready mailboxes.
    sender: Sender<Pending<M>>,

    /// Workers running the message loops.
    pool: ThreadPool,

    /// Timer thread of the `schedule*` family.
    scheduler: SingleThreadEventLoop,

    stopped: AtomicBool,
}

impl<K: Key, M: Message> SharedPoolDispatcher<K, M> {
    pub(crate) fn new(name: String, workers: usize) -> Self {
        let (sender, queue) = crossbeam_channel::unbounded();
        let pool = ThreadPool::fixed(name.clone(), workers);

        for _ in 0..workers {
            let queue = queue.clone();
            let sender = sender.clone();
            let worker = name.clone();

            if let Err(error) = pool.execute(Box::new(move || message_loop(&worker, queue, sender))) {
                tracing::error!(dispatcher = %name, %error, "failed to start a message loop");
            }
        }

        Self {
            inner: Arc::new(Inner {
                scheduler: SingleThreadEventLoop::new(format!("{name}-scheduler")),
                name,
                registry: DashMap::new(),
                sender,
                pool,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of registered receivers.
    pub fn len(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.registry.is_empty()
    }

    fn target(&self) -> Weak<dyn Mailboxes<K, M>> {
        let weak: Weak<Inner<K, M>> = Arc::downgrade(&self.inner);
        weak
    }

    fn ensure_running(&self) -> Result<(), DispatchError> {
        if self.inner.stopped.load(Ordering::Acquire) {
            Err(DispatchError::Stopped)
        } else {
            Ok(())
        }
    }
}

/// Body of each shared worker.
fn message_loop<M: Send + 'static>(name: &str, queue: Channel<Pending<M>>, sender: Sender<Pending<M>>) {
    loop {
        match queue.recv() {
            Ok(Pending::Ready(inbox)) => inbox.process(),
            Ok(Pending::Run(task)) => {
                run_task(name, task);
            }
            Ok(Pending::PoisonPill) => {
                // Pass it on so every other worker stops too.
                let _ = sender.send(Pending::PoisonPill);
                break;
            }
            Err(_) => break,
        }
    }
}

impl<K: Key, M: Message> Inner<K, M> {
    fn ready(&self, inbox: Arc<Inbox<M>>) {
        if self.sender.send(Pending::Ready(inbox)).is_err() {
            tracing::warn!(dispatcher = %self.name, "no message loop left to process the mailbox");
        }
    }

    fn unregister(&self, key: &K) -> bool {
        let Some((_, inbox)) = self.registry.remove(key) else {
            return false;
        };

        if inbox.stop() {
            self.ready(inbox);
        }

        true
    }
}

impl<K: Key, M: Message> Mailboxes<K, M> for Inner<K, M> {
    fn post(&self, key: &K, message: M) {
        let inbox = self.registry.get(key).map(|entry| entry.value().clone());

        match inbox {
            Some(inbox) if inbox.post(message) => self.ready(inbox),
            Some(_) => tracing::trace!(dispatcher = %self.name, ?key, "message to a stopping receiver dropped"),
            None => tracing::trace!(dispatcher = %self.name, ?key, "message to an unknown key dropped"),
        }
    }
}

impl<K: Key, M: Message> Dispatcher<K, M> for SharedPoolDispatcher<K, M> {
    fn register(&self, key: K, receiver: Arc<dyn Receiver<M>>, enable_concurrent: bool) -> Result<(), DispatchError> {
        self.ensure_running()?;

        let inbox = match self.inner.registry.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DispatchError::AlreadyRegistered(format!("{key:?}"))),
            Entry::Vacant(vacant) => {
                let inbox = Arc::new(Inbox::new(format!("{key:?}"), receiver, enable_concurrent));
                vacant.insert(inbox.clone());
                inbox
            }
        };

        self.inner.ready(inbox);

        // Lost the race against shutdown's sweep of the registry.
        if self.inner.stopped.load(Ordering::Acquire) {
            self.inner.unregister(&key);
            return Err(DispatchError::Stopped);
        }

        Ok(())
    }

    fn unregister(&self, key: &K) -> bool {
        self.inner.unregister(key)
    }

    fn is_registered(&self, key: &K) -> bool {
        self.inner.registry.contains_key(key)
    }

    fn post_message(&self, key: &K, message: M) {
        self.inner.post(key, message);
    }

    fn post_to_all(&self, message: M) {
        let inboxes: Vec<_> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for inbox in inboxes {
            if inbox.post(message.clone()) {
                self.inner.ready(inbox);
            }
        }
    }

    fn schedule(&self, key: K, message: M, delay: Duration) -> Result<ScheduledFuture, DispatchError> {
        self.ensure_running()?;
        schedule::post_later(&self.inner.scheduler, self.target(), key, message, delay)
    }

    fn schedule_at_fixed_rate(
        &self,
        key: K,
        message: M,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, DispatchError> {
        self.ensure_running()?;

        let task = schedule::repost(self.target(), key, message);
        Ok(self
            .inner
            .scheduler
            .schedule_at_fixed_rate(task, initial_delay, period)?)
    }

    fn schedule_with_fixed_delay(
        &self,
        key: K,
        message: M,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, DispatchError> {
        self.ensure_running()?;

        let task = schedule::repost(self.target(), key, message);
        Ok(self
            .inner
            .scheduler
            .schedule_with_fixed_delay(task, initial_delay, delay)?)
    }

    fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let keys: Vec<K> = self
            .inner
            .registry
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for key in &keys {
            self.inner.unregister(key);
        }

        // Queued behind every stop letter.
        let _ = self.inner.sender.send(Pending::PoisonPill);
        self.inner.pool.shutdown_gracefully();
        self.inner.scheduler.shutdown();

        tracing::debug!(dispatcher = %self.inner.name, receivers = keys.len(), "dispatcher stopped");
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.pool.await_termination(timeout)
    }

    /// An executor feeding the workers' queue; the pool threads
    /// themselves are busy running message loops.
    fn execution_context(&self) -> Arc<dyn Executor> {
        Arc::new(SharedContext {
            inner: Arc::downgrade(&self.inner),
        })
    }
}

/// Executor view of a shared pool dispatcher.
struct SharedContext<K, M> {
    inner: Weak<Inner<K, M>>,
}

impl<K: Key, M: Message> Executor for SharedContext<K, M> {
    fn execute(&self, task: Task) -> Result<(), ExecutorError> {
        let Some(inner) = self.inner.upgrade() else {
            return Err(ExecutorError::Rejected("dropped dispatcher".to_owned()));
        };

        if inner.stopped.load(Ordering::Acquire) || inner.sender.send(Pending::Run(task)).is_err() {
            return Err(ExecutorError::Rejected(inner.name.clone()));
        }

        Ok(())
    }
}

impl<K, M> Clone for SharedPoolDispatcher<K, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, M> Drop for Inner<K, M> {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            let _ = self.sender.send(Pending::PoisonPill);
            self.pool.shutdown_gracefully();
            self.scheduler.shutdown();
        }
    }
}

impl<K: Key, M: Message> fmt::Debug for SharedPoolDispatcher<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPoolDispatcher")
            .field("name", &self.inner.name)
            .field("receivers", &self.inner.registry.len())
            .finish()
    }
}
