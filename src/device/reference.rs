//! Reference backend: synchronous, single-threaded, host memory.
//!
//! Every enqueue finishes before it returns, so all events are
//! [`EventId::COMPLETED`].

use bytemuck::Pod;
use parking_lot::RwLock;

use super::arena::{check_range, BufferArena};
use super::handle::{BufferId, BufferSlice, EventId};
use crate::util::{Error, Result};

/// Allocate `size` zeroed host bytes, reporting allocation failure.
pub(crate) fn allocate_host(size: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(size)
        .map_err(|_| Error::OutOfMemory(format!("{} bytes exceeds address space", size)))?;
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(len)
        .map_err(|e| Error::OutOfMemory(format!("{} bytes: {}", size, e)))?;
    storage.resize(len, 0);
    Ok(storage)
}

/// Host-memory buffer table shared by the CPU backends.
pub(crate) struct HostBuffers {
    arena: RwLock<BufferArena<Vec<u8>>>,
}

impl HostBuffers {
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(BufferArena::new()),
        }
    }

    pub fn create(&self, size: u64) -> Result<BufferId> {
        assert!(size > 0, "cannot create a zero-sized buffer");
        let storage = allocate_host(size)?;
        Ok(self.arena.write().insert(storage))
    }

    pub fn destroy(&self, id: BufferId) {
        drop(self.arena.write().remove(id));
    }

    pub fn size(&self, id: BufferId) -> u64 {
        self.arena.read().get(id).len() as u64
    }

    pub fn live_count(&self) -> usize {
        self.arena.read().live_count()
    }

    /// Run `f` on the destination byte range of a write.
    pub fn with_range_mut<T: Pod, R>(
        &self,
        dst: BufferSlice<T>,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> R {
        let mut arena = self.arena.write();
        let storage = arena.get_mut(dst.id());
        check_range(dst.id(), storage.len() as u64, dst.byte_offset(), len as u64);
        let start = dst.byte_offset() as usize;
        f(&mut storage[start..start + len])
    }

    /// Run `f` on the source byte range of a read.
    pub fn with_range<T: Pod, R>(
        &self,
        src: BufferSlice<T>,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> R {
        let arena = self.arena.read();
        let storage = arena.get(src.id());
        check_range(src.id(), storage.len() as u64, src.byte_offset(), len as u64);
        let start = src.byte_offset() as usize;
        f(&storage[start..start + len])
    }
}

/// Synchronous in-process device context.
pub struct ReferenceContext {
    buffers: HostBuffers,
    batch_size: usize,
    initialized: bool,
}

impl ReferenceContext {
    pub fn new(batch_size: usize) -> Self {
        Self {
            buffers: HostBuffers::new(),
            batch_size: batch_size.max(1),
            initialized: false,
        }
    }

    /// Nothing to select; always succeeds.
    pub fn initialize(&mut self) -> Result<()> {
        self.initialized = true;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn create_buffer(&self, size: u64) -> Result<BufferId> {
        self.buffers.create(size)
    }

    pub fn destroy_buffer(&self, id: BufferId) {
        self.buffers.destroy(id);
    }

    pub fn buffer_size(&self, id: BufferId) -> u64 {
        self.buffers.size(id)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.live_count()
    }

    pub fn write_buffer<T: Pod>(&self, dst: BufferSlice<T>, src: &[T]) -> EventId {
        let bytes: &[u8] = bytemuck::cast_slice(src);
        self.buffers
            .with_range_mut(dst, bytes.len(), |range| range.copy_from_slice(bytes));
        EventId::COMPLETED
    }

    pub fn read_buffer<T: Pod>(&self, src: BufferSlice<T>, dst: &mut [T]) -> EventId {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(dst);
        let len = bytes.len();
        self.buffers
            .with_range(src, len, |range| bytes.copy_from_slice(range));
        EventId::COMPLETED
    }

    /// Plain loop over `batch_size` chunks, stopping at the first error.
    pub fn dispatch_batches<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        for (i, chunk) in out.chunks_mut(self.batch_size).enumerate() {
            f(i * self.batch_size, chunk)?;
        }
        Ok(())
    }
}
