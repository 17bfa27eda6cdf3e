use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks the member of a group that handles the next unit of work.
pub trait EventExecutorChooser: Send + Sync + fmt::Debug {
    /// Returns an index in `0..len` where `len` is the group size the
    /// chooser was built for.
    fn next_index(&self) -> usize;
}

/// How an [`EventLoopGroup`](super::EventLoopGroup) selects its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChooserStrategy {
    /// [`ChooserStrategy::PowerOfTwo`] when the size allows it, round robin
    /// otherwise.
    #[default]
    Auto,

    /// Round robin with a modulo.
    RoundRobin,

    /// Round robin with an index mask. Falls back to
    /// [`ChooserStrategy::RoundRobin`] if the size is not a power of two.
    PowerOfTwo,
}

impl ChooserStrategy {
    /// Builds a chooser for a group of `len` members.
    ///
    /// # Panics
    ///
    /// Panics if `len == 0`.
    pub fn build(self, len: usize) -> Box<dyn EventExecutorChooser> {
        assert!(len > 0, "a chooser needs at least one member");

        match self {
            ChooserStrategy::Auto | ChooserStrategy::PowerOfTwo if len.is_power_of_two() => {
                Box::new(PowerOfTwoChooser::new(len))
            }
            _ => Box::new(GenericChooser::new(len)),
        }
    }
}

/// Round robin over a power-of-two sized group using `counter & (len - 1)`.
#[derive(Debug)]
pub struct PowerOfTwoChooser {
    counter: AtomicUsize,
    mask: usize,
}

impl PowerOfTwoChooser {
    /// # Panics
    ///
    /// Panics if `len` is not a power of two.
    pub fn new(len: usize) -> Self {
        assert!(len.is_power_of_two(), "size must be a power of two, got {len}");

        Self {
            counter: AtomicUsize::new(0),
            mask: len - 1,
        }
    }
}

impl EventExecutorChooser for PowerOfTwoChooser {
    fn next_index(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) & self.mask
    }
}

/// Round robin over a group of any size.
///
/// The rotation may skip members once, when the counter wraps.
#[derive(Debug)]
pub struct GenericChooser {
    counter: AtomicUsize,
    len: usize,
}

impl GenericChooser {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "a chooser needs at least one member");

        Self {
            counter: AtomicUsize::new(0),
            len,
        }
    }
}

impl EventExecutorChooser for GenericChooser {
    fn next_index(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_cycles() {
        let chooser = PowerOfTwoChooser::new(4);
        let picked: Vec<_> = (0..9).map(|_| chooser.next_index()).collect();

        assert_eq!(picked, vec![0, 1, 2, 3, 0, 1, 2, 3, 0]);
    }

    #[test]
    fn generic_cycles() {
        let chooser = GenericChooser::new(3);
        let picked: Vec<_> = (0..7).map(|_| chooser.next_index()).collect();

        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn strategy_falls_back_for_odd_sizes() {
        let chooser = ChooserStrategy::PowerOfTwo.build(3);
        for expected in [0, 1, 2, 0] {
            assert_eq!(chooser.next_index(), expected);
        }
    }

    #[test]
    fn single_member_always_zero() {
        let chooser = ChooserStrategy::Auto.build(1);
        assert!((0..5).all(|_| chooser.next_index() == 0));
    }

    #[test]
    #[should_panic]
    fn empty_group_panics() {
        let _ = ChooserStrategy::RoundRobin.build(0);
    }
}
