//! Slot arena backing the buffer tables of every backend.
//!
//! Slots are appended and never reused: destroying a buffer leaves a
//! tombstone, so use-after-destroy and double-destroy are plain index checks.

use std::sync::atomic::{AtomicU32, Ordering};

use super::handle::BufferId;

/// Source of arena tags; each arena gets a distinct one.
static NEXT_ARENA_TAG: AtomicU32 = AtomicU32::new(1);

enum Slot<S> {
    Live(S),
    Destroyed,
}

/// Buffer table keyed by the index inside [`BufferId`].
pub(crate) struct BufferArena<S> {
    tag: u32,
    slots: Vec<Slot<S>>,
    live: usize,
}

impl<S> BufferArena<S> {
    pub fn new() -> Self {
        Self {
            tag: NEXT_ARENA_TAG.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF,
            slots: Vec::new(),
            live: 0,
        }
    }

    /// Store a new allocation and hand out its id.
    pub fn insert(&mut self, storage: S) -> BufferId {
        let id = BufferId::from_parts(self.tag, self.slots.len() as u64);
        self.slots.push(Slot::Live(storage));
        self.live += 1;
        id
    }

    /// Remove a live allocation. Panics on foreign, unknown or destroyed ids.
    pub fn remove(&mut self, id: BufferId) -> S {
        self.check_owner(id);
        let slot = self
            .slots
            .get_mut(id.index())
            .unwrap_or_else(|| panic!("{:?} was never created by this context", id));
        match std::mem::replace(slot, Slot::Destroyed) {
            Slot::Live(storage) => {
                self.live -= 1;
                storage
            }
            Slot::Destroyed => panic!("{:?} destroyed twice", id),
        }
    }

    /// Borrow a live allocation. Panics on foreign, unknown or destroyed ids.
    pub fn get(&self, id: BufferId) -> &S {
        self.check_owner(id);
        match self.slots.get(id.index()) {
            Some(Slot::Live(storage)) => storage,
            Some(Slot::Destroyed) => panic!("{:?} used after destroy", id),
            None => panic!("{:?} was never created by this context", id),
        }
    }

    /// Mutably borrow a live allocation.
    pub fn get_mut(&mut self, id: BufferId) -> &mut S {
        self.check_owner(id);
        match self.slots.get_mut(id.index()) {
            Some(Slot::Live(storage)) => storage,
            Some(Slot::Destroyed) => panic!("{:?} used after destroy", id),
            None => panic!("{:?} was never created by this context", id),
        }
    }

    /// Number of live (not destroyed) allocations.
    pub fn live_count(&self) -> usize {
        self.live
    }

    #[inline]
    fn check_owner(&self, id: BufferId) {
        assert!(
            id.owner() == self.tag,
            "{:?} belongs to another device context",
            id
        );
    }
}

/// Panics unless `[offset, offset + len)` lies inside a buffer of `size` bytes.
#[inline]
pub(crate) fn check_range(id: BufferId, size: u64, offset: u64, len: u64) {
    let end = offset.checked_add(len);
    assert!(
        matches!(end, Some(end) if end <= size),
        "{:?}: byte range {}..{} out of bounds (size {})",
        id,
        offset,
        offset.saturating_add(len),
        size
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let mut arena = BufferArena::new();
        let a = arena.insert(1u8);
        let b = arena.insert(2u8);
        arena.remove(a);
        let c = arena.insert(3u8);
        assert!(a < b && b < c);
        assert_eq!(arena.live_count(), 2);
        assert_eq!(*arena.get(c), 3);
    }

    #[test]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_remove_panics() {
        let mut arena = BufferArena::new();
        let a = arena.insert(1u8);
        arena.remove(a);
        arena.remove(a);
    }

    #[test]
    #[should_panic(expected = "another device context")]
    fn test_foreign_id_panics() {
        let mut first = BufferArena::new();
        let second: BufferArena<u8> = BufferArena::new();
        let a = first.insert(1u8);
        second.get(a);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_range_check() {
        check_range(BufferId::from_parts(1, 0), 16, 12, 8);
    }
}
