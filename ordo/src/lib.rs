//! # Ordo
//!
//! **Ordo** is a thread-based concurrency toolkit: completion primitives,
//! event loops, keyed message dispatch and hierarchical timers, built on OS
//! threads rather than an async reactor.
//!
//! It provides:
//!
//! - **Promises** completed exactly once, with listeners, progress reports,
//!   blocking waits guarded against event-loop deadlocks, and a
//!   [`Future`](std::future::Future) adapter
//! - **Event loops** pinned to one thread, or ordered lanes that borrow pool
//!   threads, grouped behind a round-robin chooser
//! - **Dispatchers** delivering keyed messages in order to registered
//!   receivers, with bracketed start and stop callbacks
//! - **Timers** on a hierarchical timing wheel with O(1) insertion, and a
//!   restartable repeated timer
//!
//! ## Quick Start
//!
//! ```rust
//! use ordo::promise::Promise;
//! use ordo::runtime::{ExecutorExt, Lifecycle, SingleThreadEventLoop};
//! use std::time::Duration;
//!
//! let event_loop = SingleThreadEventLoop::new("main");
//!
//! let answer = event_loop.submit(|| 21 * 2);
//! answer.add_listener(|p: &Promise<i32>| println!("done: {:?}", p.get_now()));
//! assert_eq!(answer.get().unwrap(), 42);
//!
//! event_loop.shutdown_gracefully();
//! assert!(event_loop.await_termination(Duration::from_secs(5)));
//! ```
//!
//! ## Modules
//!
//! - [`promise`]: Promises, progress, combiners and the future adapter
//! - [`runtime`]: Executors, event loops, groups and thread pools
//! - [`dispatch`]: Keyed dispatch to receivers through ordered mailboxes
//! - [`timer`]: Hierarchical timing wheel and repeated timers
//! - [`error`]: Error types shared by every module
//!
//! ## Logging
//!
//! Ordo reports contained panics, slow ordered tasks and rejected work
//! through [`tracing`]. It never installs a subscriber.

mod utils;

pub mod dispatch;
pub mod error;
pub mod promise;
pub mod runtime;
pub mod timer;
