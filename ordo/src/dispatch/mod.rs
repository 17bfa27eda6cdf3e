//! Keyed message dispatch.
//!
//! A [`Dispatcher`] maps keys to [`Receiver`]s. Every receiver owns a
//! mailbox: messages posted to its key are delivered in post order,
//! bracketed by exactly one `on_start` and, after `unregister`, exactly one
//! `on_stop`.
//!
//! Two topologies are provided:
//! - [`SharedPoolDispatcher`]: a fixed set of worker threads pulls ready
//!   mailboxes from one global queue. Suited to many lightweight receivers
//!   that never block.
//! - [`LoopPerReceiverDispatcher`]: every receiver gets its own ordered lane
//!   on an elastic pool, bounded or unbounded. A receiver that blocks only
//!   stalls itself.
//!
//! Delivery is best effort: posting to a key that is unknown, or that is
//! being unregistered, silently drops the message.

mod builder;
mod inbox;
mod loop_per_receiver;
mod schedule;
mod shared_pool;

pub use builder::DispatcherBuilder;
pub use loop_per_receiver::LoopPerReceiverDispatcher;
pub use shared_pool::SharedPoolDispatcher;

use crate::error::DispatchError;
use crate::runtime::{Executor, ScheduledFuture};

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Bounds required of dispatcher keys.
pub trait Key: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T: Eq + Hash + Clone + Debug + Send + Sync + 'static> Key for T {}

/// Bounds required of dispatched messages.
///
/// `Clone` serves broadcasts and periodic re-posts.
pub trait Message: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Message for T {}

/// The consumer behind a key.
///
/// Callbacks take `&self`: a receiver registered with concurrency enabled
/// may see `receive` called from several threads at once. A panic inside a
/// callback is logged and the mailbox carries on.
pub trait Receiver<M>: Send + Sync + 'static {
    /// Runs before any message is delivered.
    fn on_start(&self) {}

    fn receive(&self, message: M);

    /// Runs after every message posted before `unregister` was delivered.
    fn on_stop(&self) {}
}

/// Routes messages to registered receivers.
pub trait Dispatcher<K: Key, M: Message>: Send + Sync {
    /// Registers `receiver` under `key` and queues its `on_start`.
    ///
    /// With `enable_concurrent`, messages of this key may be delivered in
    /// parallel once `on_start` returned (shared pool topology only).
    ///
    /// # Errors
    ///
    /// [`DispatchError::AlreadyRegistered`] if `key` is taken and
    /// [`DispatchError::Stopped`] after shutdown.
    fn register(&self, key: K, receiver: Arc<dyn Receiver<M>>, enable_concurrent: bool) -> Result<(), DispatchError>;

    /// Removes `key`, queueing `on_stop` behind the messages already posted.
    ///
    /// Returns `false` if `key` was not registered.
    fn unregister(&self, key: &K) -> bool;

    fn is_registered(&self, key: &K) -> bool;

    /// Posts `message` to `key`; dropped silently if `key` is unknown.
    fn post_message(&self, key: &K, message: M);

    /// Posts a clone of `message` to every registered key.
    fn post_to_all(&self, message: M);

    /// Posts `message` to `key` after `delay`.
    fn schedule(&self, key: K, message: M, delay: Duration) -> Result<ScheduledFuture, DispatchError>;

    /// Posts `message` to `key` after `initial_delay`, then every `period`.
    fn schedule_at_fixed_rate(
        &self,
        key: K,
        message: M,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture, DispatchError>;

    /// Posts `message` to `key` after `initial_delay`, then `delay` after
    /// each post.
    fn schedule_with_fixed_delay(
        &self,
        key: K,
        message: M,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture, DispatchError>;

    /// Unregisters every key, then stops the worker threads once the
    /// pending `on_stop`s ran. Later registrations fail, later posts are
    /// dropped.
    fn shutdown(&self);

    /// Waits up to `timeout` for the worker threads to exit.
    fn await_termination(&self, timeout: Duration) -> bool;

    /// The executor receivers run on.
    fn execution_context(&self) -> Arc<dyn Executor>;
}
