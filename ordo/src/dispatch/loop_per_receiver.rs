use super::inbox::Inbox;
use super::schedule::{self, Mailboxes};
use super::{Dispatcher, Key, Message, Receiver};
use crate::error::DispatchError;
use crate::runtime::{
    Executor, Lifecycle, OrderedEventLoop, OrderedLoopConfig, ScheduledFuture, Scheduler, SingleThreadEventLoop,
    ThreadPool,
};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// A receiver's mailbox and the lane that drains it.
struct Lane<M> {
    inbox: Arc<Inbox<M>>,
    lane: OrderedEventLoop,
}

impl<M: Send + 'static> Lane<M> {
    /// Asks the lane to drain the mailbox.
    ///
    /// Lanes run one task at a time, so a drain request arriving while the
    /// mailbox is being drained finds it empty and returns at once.
    fn drive(&self) {
        let inbox = self.inbox.clone();

        if let Err(error) = self.lane.execute(Box::new(move || inbox.process())) {
            tracing::warn!(lane = %self.lane.name(), %error, "mailbox drain not scheduled");
        }
    }
}

/// Dispatcher giving every receiver its own ordered lane on an elastic
/// pool.
///
/// A receiver that blocks only delays its own messages; the pool grows to
/// keep the other lanes moving, up to its bound if it has one. Since a
/// lane never runs two tasks at once, `enable_concurrent` has no effect
/// here.
///
/// # Examples
///
/// ```rust
/// use ordo::dispatch::{Dispatcher, DispatcherBuilder, Receiver};
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct Log(Mutex<Vec<String>>);
///
/// impl Receiver<String> for Log {
///     fn receive(&self, line: String) {
///         self.0.lock().unwrap().push(line);
///     }
/// }
///
/// let dispatcher = DispatcherBuilder::new("logs").build_bounded::<u32, String>(4);
/// let log = Arc::new(Log::default());
///
/// dispatcher.register(7, log.clone(), false).unwrap();
/// dispatcher.post_message(&7, "first".to_owned());
/// dispatcher.post_message(&7, "second".to_owned());
///
/// dispatcher.shutdown();
/// assert!(dispatcher.await_termination(Duration::from_secs(5)));
/// assert_eq!(*log.0.lock().unwrap(), ["first", "second"]);
/// ```
pub struct LoopPerReceiverDispatcher<K, M> {
    inner: Arc<Inner<K, M>>,
}

struct Inner<K, M> {
    name: String,
    registry: DashMap<K, Lane<M>>,

    /// Elastic pool the lanes drain on.
    pool: ThreadPool,

    /// Timer thread shared by the lanes and the `schedule*` family.
    scheduler: SingleThreadEventLoop,

    /// Applied to every lane.
    config: OrderedLoopConfig,

    /// Index of the next lane, used in its name.
    next_lane: AtomicUsize,

    stopped: AtomicBool,
}

impl<K: Key, M: Message> LoopPerReceiverDispatcher<K, M> {
    pub(crate) fn new(name: String, pool: ThreadPool, config: OrderedLoopConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                scheduler: SingleThreadEventLoop::new(format!("{name}-scheduler")),
                name,
                registry: DashMap::new(),
                pool,
                config,
                next_lane: AtomicUsize::new(0),
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

impl<K: Key, M: Message> Inner<K, M> {
    fn new_lane(&self) -> OrderedEventLoop {
        let index = self.next_lane.fetch_add(1, Ordering::Relaxed);

        OrderedEventLoop::new(
            format!("{}-lane-{}", self.name, index),
            Arc::new(self.pool.clone()),
            Arc::new(self.scheduler.clone()),
            self.config.clone(),
        )
    }

    fn unregister(&self, key: &K) -> bool {
        let Some((_, lane)) = self.registry.remove(key) else {
            return false;
        };

        if lane.inbox.stop() {
            lane.drive();
        }

        // Queued drains, the stop letter's included, still run.
        lane.lane.shutdown_gracefully();
        true
    }
}

impl<K: Key, M: Message> Mailboxes<K, M> for Inner<K, M> {
    fn post(&self, key: &K, message: M) {
        let Some(lane) = self.registry.get(key) else {
            tracing::trace!(dispatcher = %self.name, ?key, "message to an unknown key dropped");
            return;
        };

        if lane.inbox.post(message) {
            lane.drive();
        } else {
            tracing::trace!(dispatcher = %self.name, ?key, "message to a stopping receiver dropped");
        }
    }
}

impl<K: Key, M: Message> Dispatcher<K, M> for LoopPerReceiverDispatcher<K, M> {
    /// Registers `receiver` on a lane of its own. `enable_concurrent` is
    /// ignored: the lane delivers one message at a time.
    fn register(&self, key: K, receiver: Arc<dyn Receiver<M>>, enable_concurrent: bool) -> Result<(), DispatchError> {
        self.ensure_running()?;

        if enable_concurrent {
            tracing::debug!(dispatcher = %self.inner.name, ?key, "concurrent delivery ignored on a per-receiver lane");
        }

        match self.inner.registry.entry(key.clone()) {
            Entry::Occupied(_) => return Err(DispatchError::AlreadyRegistered(format!("{key:?}"))),
            Entry::Vacant(vacant) => {
                let lane = Lane {
                    inbox: Arc::new(Inbox::new(format!("{key:?}"), receiver, false)),
                    lane: self.inner.new_lane(),
                };

                lane.drive();
                vacant.insert(lane);
            }
        }

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
        for lane in self.inner.registry.iter() {
            if lane.inbox.post(message.clone()) {
                lane.drive();
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

        self.inner.scheduler.shutdown();
        self.inner.pool.shutdown_gracefully();

        tracing::debug!(dispatcher = %self.inner.name, receivers = keys.len(), "dispatcher stopped");
    }

    fn await_termination(&self, timeout: Duration) -> bool {
        self.inner.pool.await_termination(timeout)
    }

    fn execution_context(&self) -> Arc<dyn Executor> {
        Arc::new(self.inner.pool.clone())
    }
}

impl<K, M> Clone for LoopPerReceiverDispatcher<K, M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, M> Drop for Inner<K, M> {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.scheduler.shutdown();
            self.pool.shutdown_gracefully();
        }
    }
}

impl<K: Key, M: Message> fmt::Debug for LoopPerReceiverDispatcher<K, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopPerReceiverDispatcher")
            .field("name", &self.inner.name)
            .field("receivers", &self.inner.registry.len())
            .field("pool", &self.inner.pool)
            .finish()
    }
}
