/// An index-stable store with slot reuse.
///
/// A `Slab` hands out small `usize` keys on insertion. A key stays valid
/// until its value is removed, after which the slot may be handed out again.
/// Holders of a key must therefore check the value they find under it
/// before acting on it.
pub(crate) struct Slab<T> {
    /// Slots, `None` when free.
    items: Vec<Option<T>>,

    /// Stack of free indices that can be reused.
    free: Vec<usize>,

    /// Number of occupied slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a `Slab` with `size` pre-allocated free slots.
    pub(crate) fn new(size: usize) -> Self {
        Self {
            items: (0..size).map(|_| None).collect(),
            free: (0..size).rev().collect(),
            len: 0,
        }
    }

    /// Inserts a value and returns its index.
    ///
    /// If a free slot is available, it is reused. Otherwise, the slab grows
    /// exponentially.
    pub(crate) fn insert(&mut self, item: T) -> usize {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let len = self.items.len();
                let new_len = if len == 0 { 1 } else { 2 * len };

                self.items.resize_with(new_len, || None);
                self.free.extend(((len + 1)..new_len).rev());

                len
            }
        };

        self.items[index] = Some(item);
        self.len += 1;

        index
    }

    /// Removes and returns the value stored at `index`, if any.
    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        let item = self.items.get_mut(index)?.take()?;

        self.free.push(index);
        self.len -= 1;

        Some(item)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    /// Removes every value, keeping the allocated slots.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let drained: Vec<T> = self.items.iter_mut().filter_map(Option::take).collect();

        self.free.clear();
        self.free.extend((0..self.items.len()).rev());
        self.len = 0;

        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::Slab;

    #[test]
    fn reuses_freed_slots() {
        let mut slab = Slab::new(2);

        let a = slab.insert("a");
        let b = slab.insert("b");
        assert_eq!(slab.remove(a), Some("a"));

        let c = slab.insert("c");
        assert_eq!(c, a);
        assert_eq!(slab.get(b), Some(&"b"));
        assert_eq!(slab.len(), 2);
    }

    #[test]
    fn grows_when_full() {
        let mut slab = Slab::new(0);
        let keys: Vec<_> = (0..5).map(|n| slab.insert(n)).collect();

        assert_eq!(keys, vec![0, 1, 2, 3, 4]);
        assert_eq!(slab.len(), 5);
    }

    #[test]
    fn removing_twice_is_harmless() {
        let mut slab = Slab::new(1);
        let key = slab.insert(7);

        assert_eq!(slab.remove(key), Some(7));
        assert_eq!(slab.remove(key), None);
        assert_eq!(slab.remove(99), None);
        assert_eq!(slab.len(), 0);
    }

    #[test]
    fn drain_empties_and_keeps_capacity() {
        let mut slab = Slab::new(4);
        slab.insert(1);
        slab.insert(2);

        let mut drained = slab.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(slab.len(), 0);
        assert_eq!(slab.insert(3), 0);
    }
}
