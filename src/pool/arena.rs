//! Index arena for pooled sessions
//!
//! Session indices travel on the wire, so they must stay stable while a
//! session lives and be reusable once it is gone. Slots are reserved before
//! a tunnel leg is negotiated and filled when it arrives; freed indices go to
//! a free list and the lowest one is handed out first.

use std::collections::BTreeSet;

#[derive(Debug)]
enum Slot<T> {
    Vacant,
    Reserved,
    Occupied(T),
}

/// Arena of values keyed by session index, starting at 1
#[derive(Debug)]
pub struct SessionArena<T> {
    slots: Vec<Slot<T>>,
    free: BTreeSet<u32>,
    live: usize,
    limit: usize,
}

impl<T> SessionArena<T> {
    /// Create an arena that tracks at most `limit` live entries
    pub fn new(limit: usize) -> Self {
        SessionArena {
            slots: Vec::new(),
            free: BTreeSet::new(),
            live: 0,
            limit,
        }
    }

    /// Reserve an index, or `None` once the ceiling is reached
    pub fn reserve(&mut self) -> Option<u32> {
        if self.live >= self.limit {
            return None;
        }
        let index = match self.free.pop_first() {
            Some(index) => {
                self.slots[Self::pos(index)] = Slot::Reserved;
                index
            }
            None => {
                self.slots.push(Slot::Reserved);
                self.slots.len() as u32
            }
        };
        self.live += 1;
        Some(index)
    }

    /// Store the value for a reserved index
    ///
    /// Returns false if the index is not currently reserved.
    pub fn fill(&mut self, index: u32, value: T) -> bool {
        match self.slots.get_mut(Self::pos(index)) {
            Some(slot @ Slot::Reserved) => {
                *slot = Slot::Occupied(value);
                true
            }
            _ => false,
        }
    }

    /// Free an index, returning the value it held
    pub fn release(&mut self, index: u32) -> Option<T> {
        let slot = self.slots.get_mut(Self::pos(index))?;
        match std::mem::replace(slot, Slot::Vacant) {
            Slot::Vacant => None,
            Slot::Reserved => {
                self.live -= 1;
                self.free.insert(index);
                None
            }
            Slot::Occupied(value) => {
                self.live -= 1;
                self.free.insert(index);
                Some(value)
            }
        }
    }

    /// Value at `index`, if occupied
    pub fn get(&self, index: u32) -> Option<&T> {
        match self.slots.get(Self::pos(index)) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// Reserved plus occupied slots
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether no slot is reserved or occupied
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Ceiling given at construction
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Occupied values in index order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Occupied(value) => Some(value),
            _ => None,
        })
    }

    fn pos(index: u32) -> usize {
        (index as usize).wrapping_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_start_at_one() {
        let mut arena = SessionArena::<&str>::new(5);
        assert_eq!(arena.reserve(), Some(1));
        assert_eq!(arena.reserve(), Some(2));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_fill_and_get() {
        let mut arena = SessionArena::new(5);
        let index = arena.reserve().unwrap();
        assert!(arena.get(index).is_none());
        assert!(arena.fill(index, "leg"));
        assert_eq!(arena.get(index), Some(&"leg"));
        assert!(!arena.fill(index, "again"));
        assert!(!arena.fill(42, "nowhere"));
    }

    #[test]
    fn test_freed_index_is_reused_lowest_first() {
        let mut arena = SessionArena::new(5);
        for _ in 0..4 {
            let index = arena.reserve().unwrap();
            arena.fill(index, index);
        }
        assert_eq!(arena.release(3), Some(3));
        assert_eq!(arena.release(2), Some(2));
        assert_eq!(arena.release(2), None);

        assert_eq!(arena.reserve(), Some(2));
        assert_eq!(arena.reserve(), Some(3));
        assert_eq!(arena.reserve(), Some(5));
    }

    #[test]
    fn test_ceiling() {
        let mut arena = SessionArena::<u32>::new(50);
        for expected in 1..=50 {
            assert_eq!(arena.reserve(), Some(expected));
        }
        assert_eq!(arena.reserve(), None);
        assert_eq!(arena.len(), arena.limit());

        arena.release(17);
        assert_eq!(arena.reserve(), Some(17));
        assert_eq!(arena.reserve(), None);
    }

    #[test]
    fn test_released_reservation_frees_capacity() {
        let mut arena = SessionArena::<u32>::new(1);
        let index = arena.reserve().unwrap();
        assert_eq!(arena.release(index), None);
        assert!(arena.is_empty());
        assert_eq!(arena.reserve(), Some(index));
    }

    #[test]
    fn test_iter_skips_tombstones() {
        let mut arena = SessionArena::new(5);
        for _ in 0..3 {
            let index = arena.reserve().unwrap();
            arena.fill(index, index * 10);
        }
        arena.release(2);
        arena.reserve();
        let values: Vec<_> = arena.iter().copied().collect();
        assert_eq!(values, vec![10, 30]);
    }

    #[test]
    fn test_index_zero_is_never_valid() {
        let mut arena = SessionArena::<u32>::new(5);
        assert!(arena.get(0).is_none());
        assert!(arena.release(0).is_none());
    }
}
