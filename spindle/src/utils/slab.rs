use std::fmt;
use std::mem::MaybeUninit;

/// A stable, generation-checked reference into a [`Slab`].
///
/// The index of a removed slot is reused by later insertions, but the
/// generation counter of that slot is bumped on every removal, so a key
/// that outlived its value never resolves to the newcomer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub(crate) fn index(self) -> u32 {
        self.index
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// A simple slab allocator with generation-checked keys.
///
/// A `Slab` stores values of type `T` in a contiguous array and hands
/// out [`Key`]s that stay valid until the value is removed.
///
/// Internally, it keeps track of:
/// - initialized slots,
/// - free indices,
/// - one generation counter per slot,
/// - and uninitialized memory using [`MaybeUninit`].
///
/// Every lookup compares the key's generation with the slot's, so a
/// stale key is reported as absent instead of aliasing a newer value.
pub(crate) struct Slab<T> {
    /// Storage for items (may contain uninitialized slots).
    items: Vec<MaybeUninit<T>>,
    /// Stack of free indices that can be reused.
    free: Vec<usize>,
    /// Marks whether a slot is currently initialized.
    used: Vec<bool>,
    /// Generation of the value currently (or last) stored in each slot.
    generations: Vec<u32>,
    /// Number of initialized slots.
    len: usize,
}

impl<T> Slab<T> {
    /// Creates a new `Slab` with a fixed initial capacity.
    ///
    /// All slots are initially free and uninitialized.
    pub(crate) fn new(size: usize) -> Self {
        let items = (0..size).map(|_| MaybeUninit::<T>::uninit()).collect();
        // Reversed so that `pop` hands out the lowest index first.
        let free = (0..size).rev().collect();
        let used = vec![false; size];
        let generations = vec![0; size];

        Self {
            items,
            free,
            used,
            generations,
            len: 0,
        }
    }

    /// Inserts a value into the slab and returns its key.
    ///
    /// If a free slot is available, it is reused.
    /// Otherwise, the slab grows exponentially.
    pub(crate) fn insert(&mut self, item: T) -> Key {
        let index = if let Some(i) = self.free.pop() {
            i
        } else {
            let len = self.items.len();
            let new_len = if len == 0 { 1 } else { 2 * len };

            self.items
                .extend((len..new_len).map(|_| MaybeUninit::<T>::uninit()));
            self.free.extend(((len + 1)..new_len).rev());
            self.used.resize(new_len, false);
            self.generations.resize(new_len, 0);

            len
        };

        self.items[index] = MaybeUninit::new(item);
        self.used[index] = true;
        self.len += 1;

        Key {
            index: index as u32,
            generation: self.generations[index],
        }
    }

    /// Returns `true` if `key` refers to a live value.
    pub(crate) fn contains(&self, key: Key) -> bool {
        let index = key.index as usize;

        index < self.items.len() && self.used[index] && self.generations[index] == key.generation
    }

    /// Removes and returns the value stored under `key`.
    ///
    /// The slot becomes free and may be reused by future insertions;
    /// its generation is advanced so `key` can never match again.
    /// Returns `None` if the key is stale or out of range.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        if !self.contains(key) {
            return None;
        }

        let index = key.index as usize;

        self.free.push(index);
        self.used[index] = false;
        self.generations[index] = self.generations[index].wrapping_add(1);
        self.len -= 1;

        let item = unsafe { self.items[index].assume_init_read() };
        self.items[index] = MaybeUninit::uninit();

        Some(item)
    }

    /// Returns a shared reference to the value stored under `key`.
    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        if !self.contains(key) {
            return None;
        }

        // The slot is initialized: `contains` checked `used`.
        Some(unsafe { self.items[key.index as usize].assume_init_ref() })
    }

    /// Returns a mutable reference to the value stored under `key`.
    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        if !self.contains(key) {
            return None;
        }

        Some(unsafe { self.items[key.index as usize].assume_init_mut() })
    }

    /// Number of live values.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Removes every live value, advancing each slot's generation.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);

        for index in 0..self.items.len() {
            if self.used[index] {
                let key = Key {
                    index: index as u32,
                    generation: self.generations[index],
                };

                if let Some(item) = self.remove(key) {
                    out.push(item);
                }
            }
        }

        out
    }
}

impl<T> Drop for Slab<T> {
    /// Drops all initialized elements stored in the slab.
    ///
    /// Uninitialized slots are ignored.
    fn drop(&mut self) {
        for (slot, &used) in self.items.iter_mut().zip(self.used.iter()) {
            if used {
                unsafe {
                    slot.assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Slab;

    #[test]
    fn insert_get_remove() {
        let mut slab = Slab::new(2);

        let a = slab.insert("a");
        let b = slab.insert("b");

        assert_eq!(slab.get(a), Some(&"a"));
        assert_eq!(slab.get(b), Some(&"b"));
        assert_eq!(slab.len(), 2);

        assert_eq!(slab.remove(a), Some("a"));
        assert_eq!(slab.get(a), None);
        assert_eq!(slab.remove(a), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn stale_key_does_not_alias_reused_slot() {
        let mut slab = Slab::new(1);

        let old = slab.insert(1);
        slab.remove(old);
        let new = slab.insert(2);

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(slab.get(old), None);
        assert_eq!(slab.get(new), Some(&2));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut slab = Slab::new(0);
        let keys: Vec<_> = (0..10).map(|i| slab.insert(i)).collect();

        for (i, key) in keys.iter().enumerate() {
            assert_eq!(slab.get(*key), Some(&i));
        }

        let drained = slab.drain();
        assert_eq!(drained.len(), 10);
        assert!(slab.is_empty());
    }

    #[test]
    fn drop_releases_live_values() {
        use std::rc::Rc;

        let marker = Rc::new(());
        {
            let mut slab = Slab::new(4);
            slab.insert(marker.clone());
            let k = slab.insert(marker.clone());
            slab.remove(k);
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
