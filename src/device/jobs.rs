//! Job-based CPU backend.
//!
//! Buffers live in host memory like the reference backend, but copies and
//! kernels fan out over a dedicated rayon pool in fixed-size batches. The
//! calling thread blocks on the join, so every event is already complete when
//! it is handed out.

use bytemuck::Pod;
use rayon::prelude::*;

use super::handle::{BufferId, BufferSlice, EventId};
use super::reference::HostBuffers;
use crate::util::{Error, Result};

/// Copies at or below this size run on the calling thread.
const PARALLEL_COPY_THRESHOLD: usize = 256 * 1024;

/// Bytes per parallel copy task.
const COPY_CHUNK: usize = 64 * 1024;

/// Rayon-backed device context.
pub struct JobContext {
    buffers: HostBuffers,
    pool: Option<rayon::ThreadPool>,
    worker_threads: usize,
    batch_size: usize,
}

impl JobContext {
    /// `worker_threads == 0` lets rayon pick the thread count.
    pub fn new(worker_threads: usize, batch_size: usize) -> Self {
        Self {
            buffers: HostBuffers::new(),
            pool: None,
            worker_threads,
            batch_size: batch_size.max(1),
        }
    }

    /// Build the worker pool. Idempotent once it succeeded.
    pub fn initialize(&mut self) -> Result<()> {
        if self.pool.is_some() {
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_threads)
            .thread_name(|i| format!("lightbaker-job-{}", i))
            .build()
            .map_err(|e| Error::device(format!("failed to build job pool: {}", e)))?;
        tracing::debug!(threads = pool.current_num_threads(), "job backend initialized");
        self.pool = Some(pool);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.is_some()
    }

    /// Worker count of the pool.
    pub fn thread_count(&self) -> usize {
        self.pool().current_num_threads()
    }

    fn pool(&self) -> &rayon::ThreadPool {
        match &self.pool {
            Some(pool) => pool,
            None => panic!("job device context used before initialize()"),
        }
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
            .with_range_mut(dst, bytes.len(), |range| self.copy(range, bytes));
        EventId::COMPLETED
    }

    pub fn read_buffer<T: Pod>(&self, src: BufferSlice<T>, dst: &mut [T]) -> EventId {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(dst);
        let len = bytes.len();
        self.buffers.with_range(src, len, |range| self.copy(bytes, range));
        EventId::COMPLETED
    }

    fn copy(&self, dst: &mut [u8], src: &[u8]) {
        if dst.len() <= PARALLEL_COPY_THRESHOLD {
            dst.copy_from_slice(src);
            return;
        }
        self.pool().install(|| {
            dst.par_chunks_mut(COPY_CHUNK)
                .zip(src.par_chunks(COPY_CHUNK))
                .for_each(|(d, s)| d.copy_from_slice(s));
        });
    }

    /// Fan out `batch_size` chunks over the pool and join.
    pub fn dispatch_batches<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        let batch = self.batch_size;
        self.pool().install(|| {
            out.par_chunks_mut(batch)
                .enumerate()
                .try_for_each(|(i, chunk)| f(i * batch, chunk))
        })
    }
}
