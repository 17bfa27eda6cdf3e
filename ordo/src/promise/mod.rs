//! Single-assignment asynchronous results.
//!
//! This module provides the promise family used across the crate:
//! - [`Promise`]: a result slot completed exactly once, with listener
//!   notification and blocking retrieval,
//! - [`ProgressivePromise`]: a promise that also broadcasts progress reports,
//! - [`PromiseFuture`]: an adapter that lets any async runtime `.await` a
//!   promise,
//! - [`PromiseCombiner`]: aggregation of several promises into one.
//!
//! Completion is a lock-free compare-and-swap on the promise state; the
//! listener registry is the only part protected by a mutex.

mod combiner;
mod core;
mod future;
mod listener;
mod progressive;
mod state;

pub use combiner::PromiseCombiner;
pub use self::core::{MAX_LISTENER_STACK_DEPTH, Promise};
pub use future::PromiseFuture;
pub use listener::{ListenerKey, ProgressiveListener};
pub use progressive::ProgressivePromise;
