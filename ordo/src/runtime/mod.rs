//! Executors and event loops.
//!
//! This module contains everything that runs tasks:
//! - the capability traits [`Executor`], [`Scheduler`] and [`Lifecycle`],
//!   combined into [`EventLoop`],
//! - [`SingleThreadEventLoop`], a loop pinned to one dedicated thread,
//! - [`OrderedEventLoop`], a FIFO lane borrowing threads from a pool,
//! - [`EventLoopGroup`], a fixed array of loops behind a chooser,
//! - [`ThreadPool`], the thread substrate the other executors run on,
//! - [`MessageLoop`], which binds a message handler to an executor.
//!
//! Every executor contains task panics: they are logged through `tracing`
//! and never kill a worker thread.

mod builder;
mod chooser;
mod executor;
mod group;
mod latch;
mod memory;
mod message;
mod ordered;
mod pool;
mod scheduled;
mod single_thread;
mod state;

pub(crate) mod context;

pub use builder::{EventLoopGroupBuilder, ThreadPoolBuilder};
pub use chooser::{ChooserStrategy, EventExecutorChooser, GenericChooser, PowerOfTwoChooser};
pub use executor::{EventLoop, Executor, ExecutorExt, Lifecycle, Scheduler, Task};
pub use group::EventLoopGroup;
pub use memory::{MemoryProbe, RejectPolicy, SystemMemory};
pub use message::{Handler, MessageLoop};
pub use ordered::{OrderedEventLoop, OrderedLoopConfig};
pub use pool::ThreadPool;
pub use scheduled::{PeriodicTask, ScheduledFuture};
pub use single_thread::SingleThreadEventLoop;

pub(crate) use builder::available_parallelism;
pub(crate) use executor::run_task;
