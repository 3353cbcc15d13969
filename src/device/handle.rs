//! Buffer and event handles.
//!
//! Handles are plain values: they carry no ownership and no borrow of the
//! context that issued them.

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

/// Handle to a device-resident allocation.
///
/// Upper 24 bits: owning arena tag, lower 40 bits: slot index. Slot indices
/// are assigned monotonically and never reused, so a stale handle always
/// resolves to a tombstone rather than to a newer buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BufferId(u64);

impl BufferId {
    const INDEX_BITS: u32 = 40;
    const INDEX_MASK: u64 = (1 << Self::INDEX_BITS) - 1;

    #[inline]
    pub(crate) const fn from_parts(owner: u32, index: u64) -> Self {
        debug_assert!(index <= Self::INDEX_MASK);
        Self(((owner as u64) << Self::INDEX_BITS) | index)
    }

    /// Raw handle value.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Tag of the arena that issued this handle.
    #[inline]
    pub(crate) const fn owner(self) -> u32 {
        (self.0 >> Self::INDEX_BITS) as u32
    }

    /// Slot index in the owning arena.
    #[inline]
    pub(crate) const fn index(self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }

    /// Typed view starting at element 0.
    #[inline]
    pub fn slice<T>(self) -> BufferSlice<T> {
        BufferSlice::new(self, 0)
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferId({}:{})", self.owner(), self.index())
    }
}

/// Handle to an asynchronous operation.
///
/// On synchronous backends every event is [`EventId::COMPLETED`]. On the GPU
/// backend the value is the fence sequence number of the submission.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct EventId(u64);

impl EventId {
    /// Event of an operation that finished before its enqueue call returned.
    pub const COMPLETED: Self = Self(0);

    #[inline]
    pub(crate) const fn from_sequence(seq: u64) -> Self {
        Self(seq)
    }

    /// Fence sequence number (0 for completed-on-return events).
    #[inline]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

/// Typed view into a buffer starting at element `offset`.
pub struct BufferSlice<T> {
    id: BufferId,
    offset: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BufferSlice<T> {
    /// View of `id` starting at element `offset`.
    #[inline]
    pub const fn new(id: BufferId, offset: u64) -> Self {
        Self {
            id,
            offset,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub const fn id(&self) -> BufferId {
        self.id
    }

    /// Element offset.
    #[inline]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Byte offset into the buffer.
    ///
    /// Panics if the offset does not fit in `u64` bytes.
    #[inline]
    pub fn byte_offset(&self) -> u64 {
        match self.offset.checked_mul(size_of::<T>() as u64) {
            Some(bytes) => bytes,
            None => panic!("{:?}: slice offset overflows", self),
        }
    }

    /// Same buffer, `elements` further along.
    #[inline]
    pub fn advance(self, elements: u64) -> Self {
        match self.offset.checked_add(elements) {
            Some(offset) => Self::new(self.id, offset),
            None => panic!("{:?}: slice offset overflows advancing by {}", self, elements),
        }
    }

    /// View the same bytes as elements of `U`.
    ///
    /// Panics unless `size_of::<T>()` is a multiple of `size_of::<U>()`.
    pub fn reinterpret<U>(self) -> BufferSlice<U> {
        let (t, u) = (size_of::<T>(), size_of::<U>());
        assert!(
            u != 0 && t % u == 0,
            "cannot reinterpret {}-byte elements as {}-byte elements",
            t,
            u
        );
        match self.offset.checked_mul((t / u) as u64) {
            Some(offset) => BufferSlice::new(self.id, offset),
            None => panic!("{:?}: slice offset overflows", self),
        }
    }

    /// View the same bytes as elements of `U` without the size check.
    ///
    /// The caller guarantees the byte offset is a multiple of `size_of::<U>()`;
    /// any remainder is truncated.
    pub fn reinterpret_unchecked<U>(self) -> BufferSlice<U> {
        let u = size_of::<U>() as u64;
        debug_assert!(u != 0 && self.byte_offset() % u == 0);
        BufferSlice::new(self.id, self.byte_offset() / u)
    }
}

impl<T> Clone for BufferSlice<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for BufferSlice<T> {}

impl<T> PartialEq for BufferSlice<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.offset == other.offset
    }
}

impl<T> Eq for BufferSlice<T> {}

impl<T> fmt::Debug for BufferSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BufferSlice<{}>({:?} + {})",
            std::any::type_name::<T>(),
            self.id,
            self.offset
        )
    }
}
