use super::{Key, Message};
use crate::error::DispatchError;
use crate::runtime::{PeriodicTask, ScheduledFuture, Scheduler};

use std::sync::{Arc, Weak};
use std::time::Duration;

/// The posting side of a dispatcher, as seen by its scheduled tasks.
pub(crate) trait Mailboxes<K, M>: Send + Sync {
    fn post(&self, key: &K, message: M);
}

/// Re-posts `message` to `key` once, after `delay`.
///
/// The task only holds a weak reference: a dispatcher that is dropped
/// before the delay elapses is not kept alive by it.
pub(crate) fn post_later<K, M, S>(
    scheduler: &S,
    target: Weak<dyn Mailboxes<K, M>>,
    key: K,
    message: M,
    delay: Duration,
) -> Result<ScheduledFuture, DispatchError>
where
    K: Key,
    M: Message,
    S: Scheduler + ?Sized,
{
    let task = Box::new(move || {
        if let Some(target) = target.upgrade() {
            target.post(&key, message);
        }
    });

    Ok(scheduler.schedule(task, delay)?)
}

/// Builds the periodic task re-posting a clone of `message` to `key`.
pub(crate) fn repost<K, M>(target: Weak<dyn Mailboxes<K, M>>, key: K, message: M) -> PeriodicTask
where
    K: Key,
    M: Message,
{
    Arc::new(move || {
        if let Some(target) = target.upgrade() {
            target.post(&key, message.clone());
        }
    })
}
