//! A bit vector for dense sets of small integers.
//!
//! Blocks of a [`ControlFlowGraph`](crate::cfg::ControlFlowGraph) and registers of a method
//! are both identified by small dense integers, so reachability (`visit`) and liveness sets
//! are stored as bit vectors rather than hash sets.
//!
//! # Example
//!
//! ```rust
//! use redex::utils::BitSet;
//!
//! let mut live = BitSet::new(16);
//! live.insert(0);
//! live.insert(3);
//!
//! assert!(live.contains(3));
//! assert_eq!(live.iter().collect::<Vec<_>>(), vec![0, 3]);
//! ```

use std::fmt;

/// A fixed-capacity bit vector.
///
/// Indices at or beyond the capacity are rejected by the mutating operations. Use
/// [`BitSet::grow`] when the universe grows (for example after blocks were added to a
/// graph).
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with room for `capacity` elements.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Returns the capacity of this bit set.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Extends the capacity to at least `capacity` elements, keeping all set bits.
    pub fn grow(&mut self, capacity: usize) {
        if capacity > self.len {
            self.words.resize(capacity.div_ceil(64), 0);
            self.len = capacity;
        }
    }

    /// Sets the bit at `index`.
    ///
    /// Returns `true` if the bit was not set before.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let fresh = *word & mask == 0;
        *word |= mask;
        fresh
    }

    /// Clears the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    pub fn remove(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] &= !(1u64 << (index % 64));
    }

    /// Returns `true` if the bit at `index` is set. Out-of-range indices are never set.
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Returns the number of set bits.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Clears all bits.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// In-place union. Returns `true` if `self` changed.
    ///
    /// # Panics
    ///
    /// Panics if the capacities differ.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// In-place difference: removes every bit set in `other`. Returns `true` if `self`
    /// changed.
    ///
    /// # Panics
    ///
    /// Panics if the capacities differ.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Returns an iterator over the indices of set bits in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            word_idx: 0,
            current: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits of a [`BitSet`].
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    word_idx: usize,
    current: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current != 0 {
                let bit = self.current.trailing_zeros() as usize;
                self.current &= self.current - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            if self.word_idx >= self.set.words.len() {
                return None;
            }
            self.current = self.set.words[self.word_idx];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitset_basic() {
        let mut bs = BitSet::new(100);
        assert!(bs.is_empty());

        assert!(bs.insert(0));
        assert!(bs.insert(64));
        assert!(bs.insert(99));
        assert!(!bs.insert(99));

        assert_eq!(bs.count(), 3);
        assert!(bs.contains(64));
        assert!(!bs.contains(1));
        assert!(!bs.contains(1000));
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![0, 64, 99]);
    }

    #[test]
    fn test_bitset_set_ops() {
        let mut a = BitSet::new(70);
        let mut b = BitSet::new(70);
        a.insert(1);
        a.insert(66);
        b.insert(66);
        b.insert(2);

        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 66]);

        assert!(a.difference_with(&b));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_bitset_grow_keeps_bits() {
        let mut bs = BitSet::new(3);
        bs.insert(2);
        bs.grow(200);
        bs.insert(150);
        assert_eq!(bs.len(), 200);
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![2, 150]);
    }
}
