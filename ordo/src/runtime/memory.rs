use crate::error::ExecutorError;

use parking_lot::Mutex;

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of the "available memory" estimate a [`MemorySafeQueue`] checks
/// before accepting an item.
pub trait MemoryProbe: Send + Sync {
    /// Estimated number of bytes still available to the process.
    fn available(&self) -> u64;
}

/// Reads available physical memory from the operating system.
///
/// The value is cached and refreshed at most once per `refresh` interval so
/// that the check stays cheap on hot enqueue paths. Platforms without a
/// supported query report `u64::MAX`, which never triggers rejection.
pub struct SystemMemory {
    refresh: Duration,
    cached: Mutex<(Instant, u64)>,
}

impl SystemMemory {
    /// Default refresh interval of the cached estimate.
    pub const DEFAULT_REFRESH: Duration = Duration::from_millis(50);

    pub fn new() -> Self {
        Self::with_refresh(Self::DEFAULT_REFRESH)
    }

    pub fn with_refresh(refresh: Duration) -> Self {
        Self {
            refresh,
            cached: Mutex::new((Instant::now(), query_available())),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn available(&self) -> u64 {
        let mut cached = self.cached.lock();

        if cached.0.elapsed() >= self.refresh {
            *cached = (Instant::now(), query_available());
        }

        cached.1
    }
}

#[cfg(target_os = "linux")]
fn query_available() -> u64 {
    // Safety: sysconf only reads system configuration values.
    let (pages, page_size) = unsafe {
        (
            libc::sysconf(libc::_SC_AVPHYS_PAGES),
            libc::sysconf(libc::_SC_PAGESIZE),
        )
    };

    if pages < 0 || page_size < 0 {
        return u64::MAX;
    }

    (pages as u64).saturating_mul(page_size as u64)
}

#[cfg(windows)]
fn query_available() -> u64 {
    use windows_sys::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

    // Safety: MEMORYSTATUSEX is plain data and dwLength is set as required.
    unsafe {
        let mut status: MEMORYSTATUSEX = std::mem::zeroed();
        status.dwLength = std::mem::size_of::<MEMORYSTATUSEX>() as u32;

        if GlobalMemoryStatusEx(&mut status) != 0 {
            status.ullAvailPhys
        } else {
            u64::MAX
        }
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
fn query_available() -> u64 {
    u64::MAX
}

/// What a [`MemorySafeQueue`] does with an item when memory runs low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RejectPolicy {
    /// Silently drop the new item.
    #[default]
    Discard,

    /// Drop the oldest queued item to make room for the new one.
    DiscardOldest,

    /// Refuse the item with [`ExecutorError::MemoryExhausted`].
    Abort,
}

/// Result of [`MemorySafeQueue::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    /// Appended; the queue grew by one.
    Appended,

    /// Appended after dropping the oldest item; the length is unchanged.
    ReplacedOldest,

    /// Dropped under [`RejectPolicy::Discard`].
    Discarded,
}

/// A FIFO that refuses to grow while available memory is below a threshold.
///
/// Not synchronized: owners keep it behind their own lock so that other
/// bookkeeping can change atomically with the queue.
pub(crate) struct MemorySafeQueue<T> {
    items: VecDeque<T>,
    probe: Arc<dyn MemoryProbe>,

    /// Minimum number of free bytes required to accept an item.
    max_free_memory: u64,

    policy: RejectPolicy,
}

impl<T> MemorySafeQueue<T> {
    pub(crate) fn new(probe: Arc<dyn MemoryProbe>, max_free_memory: u64, policy: RejectPolicy) -> Self {
        Self {
            items: VecDeque::new(),
            probe,
            max_free_memory,
            policy,
        }
    }

    fn has_remaining_memory(&self) -> bool {
        self.probe.available() > self.max_free_memory
    }

    /// Appends `item`, applying the rejection policy when memory is short.
    pub(crate) fn offer(&mut self, item: T) -> Result<Offer, ExecutorError> {
        if self.max_free_memory == 0 || self.has_remaining_memory() {
            self.items.push_back(item);
            return Ok(Offer::Appended);
        }

        match self.policy {
            RejectPolicy::Discard => {
                tracing::debug!(threshold = self.max_free_memory, "memory low, item discarded");
                Ok(Offer::Discarded)
            }
            RejectPolicy::DiscardOldest => {
                tracing::debug!(threshold = self.max_free_memory, "memory low, oldest item discarded");

                if self.items.pop_front().is_some() {
                    self.items.push_back(item);
                    Ok(Offer::ReplacedOldest)
                } else {
                    self.items.push_back(item);
                    Ok(Offer::Appended)
                }
            }
            RejectPolicy::Abort => Err(ExecutorError::MemoryExhausted {
                threshold: self.max_free_memory,
            }),
        }
    }

    pub(crate) fn poll(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub(crate) fn drain(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}

impl<T> fmt::Debug for MemorySafeQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySafeQueue")
            .field("len", &self.items.len())
            .field("max_free_memory", &self.max_free_memory)
            .field("policy", &self.policy)
            .finish()
    }
}
