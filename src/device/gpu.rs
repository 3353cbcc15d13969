//! GPU backend on wgpu.
//!
//! Buffers are storage buffers on a single queue, so submissions complete in
//! order. Each submission gets a fence sequence number; a work-done callback
//! advances the completed counter when the device signals it.
//!
//! Writes are staged with `Queue::write_buffer` and submitted immediately.
//! Reads copy into a staging buffer and map it; they finish before returning
//! because the destination slice is only borrowed for the call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};

use bytemuck::Pod;
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use super::arena::{check_range, BufferArena};
use super::handle::{BufferId, BufferSlice, EventId};
use crate::config::GpuPowerPreference;
use crate::util::{Error, Result};

/// wgpu requires copy offsets and sizes to be multiples of this.
const COPY_ALIGN: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

#[inline]
fn align_down(v: u64) -> u64 {
    v & !(COPY_ALIGN - 1)
}

#[inline]
fn align_up(v: u64) -> u64 {
    (v + COPY_ALIGN - 1) & !(COPY_ALIGN - 1)
}

/// Selected adapter, device and queue.
pub(crate) struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub info: wgpu::AdapterInfo,
}

/// Device allocation plus its requested (unpadded) size.
pub(crate) struct GpuBuffer {
    pub buffer: wgpu::Buffer,
    pub size: u64,
}

/// Asynchronous device-resident context.
pub struct GpuContext {
    power_preference: GpuPowerPreference,
    batch_size: usize,
    gpu: Option<GpuDevice>,
    buffers: RwLock<BufferArena<GpuBuffer>>,
    /// Last fence handed out; the lock also orders submissions.
    submitted: Mutex<u64>,
    completed: Arc<AtomicU64>,
}

impl GpuContext {
    pub fn new(power_preference: GpuPowerPreference, batch_size: usize) -> Self {
        Self {
            power_preference,
            batch_size: batch_size.max(1),
            gpu: None,
            buffers: RwLock::new(BufferArena::new()),
            submitted: Mutex::new(0),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Select an adapter and create the device. Idempotent once it succeeded.
    pub fn initialize(&mut self) -> Result<()> {
        if self.gpu.is_some() {
            return Ok(());
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let power_preference = match self.power_preference {
            GpuPowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            GpuPowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .map_err(|e| Error::device(format!("no suitable GPU adapter: {}", e)))?;

        let adapter_limits = adapter.limits();
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lightbaker device"),
            required_limits: wgpu::Limits {
                max_buffer_size: adapter_limits.max_buffer_size,
                max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
                ..wgpu::Limits::downlevel_defaults()
            },
            ..Default::default()
        }))
        .map_err(|e| Error::device(format!("failed to create GPU device: {}", e)))?;

        let info = adapter.get_info();
        tracing::info!(adapter = %info.name, backend = ?info.backend, "GPU backend initialized");
        self.gpu = Some(GpuDevice { device, queue, info });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    pub(crate) fn gpu(&self) -> &GpuDevice {
        match &self.gpu {
            Some(gpu) => gpu,
            None => panic!("GPU device context used before initialize()"),
        }
    }

    /// Name of the selected adapter.
    pub fn adapter_name(&self) -> &str {
        &self.gpu().info.name
    }

    pub fn create_buffer(&self, size: u64) -> Result<BufferId> {
        assert!(size > 0, "cannot create a zero-sized buffer");
        let gpu = self.gpu();
        let padded = align_up(size);
        let max = gpu.device.limits().max_buffer_size;
        if padded > max {
            return Err(Error::OutOfMemory(format!(
                "{} bytes exceeds the device buffer limit of {}",
                size, max
            )));
        }
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lightbaker_buffer"),
            size: padded,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(self.buffers.write().insert(GpuBuffer { buffer, size }))
    }

    pub fn destroy_buffer(&self, id: BufferId) {
        let removed = self.buffers.write().remove(id);
        removed.buffer.destroy();
    }

    pub fn buffer_size(&self, id: BufferId) -> u64 {
        self.buffers.read().get(id).size
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.read().live_count()
    }

    /// Run `f` with the wgpu buffer behind `id`.
    pub(crate) fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&GpuBuffer) -> R) -> R {
        let arena = self.buffers.read();
        f(arena.get(id))
    }

    /// Submit `commands` (or just the staged writes) and fence the submission.
    pub(crate) fn submit(&self, commands: Option<wgpu::CommandBuffer>) -> EventId {
        let gpu = self.gpu();
        let mut submitted = self.submitted.lock();
        *submitted += 1;
        let seq = *submitted;
        gpu.queue.submit(commands);
        let completed = Arc::clone(&self.completed);
        gpu.queue.on_submitted_work_done(move || {
            completed.fetch_max(seq, Ordering::AcqRel);
        });
        EventId::from_sequence(seq)
    }

    pub fn write_buffer<T: Pod>(&self, dst: BufferSlice<T>, src: &[T]) -> Result<EventId> {
        let bytes: &[u8] = bytemuck::cast_slice(src);
        let offset = dst.byte_offset();
        let len = bytes.len() as u64;
        let size = self.buffer_size(dst.id());
        check_range(dst.id(), size, offset, len);
        if len == 0 {
            return Ok(EventId::COMPLETED);
        }

        if offset % COPY_ALIGN == 0 && len % COPY_ALIGN == 0 {
            self.with_buffer(dst.id(), |b| {
                self.gpu().queue.write_buffer(&b.buffer, offset, bytes)
            });
        } else {
            // Widen to aligned bounds and patch the existing contents.
            let start = align_down(offset);
            let end = align_up(offset + len);
            let mut staged = vec![0u8; (end - start) as usize];
            self.read_bytes(dst.id(), start, &mut staged)?;
            let lead = (offset - start) as usize;
            staged[lead..lead + bytes.len()].copy_from_slice(bytes);
            self.with_buffer(dst.id(), |b| {
                self.gpu().queue.write_buffer(&b.buffer, start, &staged)
            });
        }
        Ok(self.submit(None))
    }

    pub fn read_buffer<T: Pod>(&self, src: BufferSlice<T>, dst: &mut [T]) -> Result<EventId> {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(dst);
        let offset = src.byte_offset();
        let size = self.buffer_size(src.id());
        check_range(src.id(), size, offset, bytes.len() as u64);
        if bytes.is_empty() {
            return Ok(EventId::COMPLETED);
        }

        let start = align_down(offset);
        let end = align_up(offset + bytes.len() as u64);
        let mut staged = vec![0u8; (end - start) as usize];
        let event = self.read_bytes(src.id(), start, &mut staged)?;
        let lead = (offset - start) as usize;
        bytes.copy_from_slice(&staged[lead..lead + bytes.len()]);
        Ok(event)
    }

    /// Blocking readback of an aligned byte range.
    fn read_bytes(&self, id: BufferId, offset: u64, out: &mut [u8]) -> Result<EventId> {
        let gpu = self.gpu();
        let len = out.len() as u64;
        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lightbaker_readback"),
            size: len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lightbaker_read"),
            });
        self.with_buffer(id, |b| {
            encoder.copy_buffer_to_buffer(&b.buffer, offset, &staging, 0, len)
        });
        let event = self.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        gpu.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::io_failed(format!("device poll during readback: {}", e)))?;
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(Error::io_failed(format!("readback map failed: {}", e))),
            Err(_) => return Err(Error::io_failed("readback map callback never ran")),
        }
        {
            let mapped = slice.get_mapped_range();
            out.copy_from_slice(&mapped);
        }
        staging.unmap();
        Ok(event)
    }

    pub fn is_completed(&self, event: EventId) -> bool {
        if event.sequence() <= self.completed.load(Ordering::Acquire) {
            return true;
        }
        // Non-blocking: only drives callbacks of work that already finished.
        if let Err(e) = self.gpu().device.poll(wgpu::PollType::Poll) {
            tracing::debug!("device poll failed: {}", e);
        }
        event.sequence() <= self.completed.load(Ordering::Acquire)
    }

    pub fn wait(&self, event: EventId) -> Result<()> {
        if event.sequence() <= self.completed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.gpu()
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| Error::device(format!("device wait failed: {}", e)))?;
        if event.sequence() <= self.completed.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::device(format!(
                "fence {} not signaled after device wait",
                event.sequence()
            )))
        }
    }

    /// Submit staged writes and drive completion callbacks.
    pub fn flush(&self) -> Result<()> {
        self.submit(None);
        self.gpu()
            .device
            .poll(wgpu::PollType::Poll)
            .map(|_| ())
            .map_err(|e| Error::device(format!("device flush failed: {}", e)))
    }

    /// Host-side batches run on the global rayon pool.
    pub fn dispatch_batches<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        let batch = self.batch_size;
        out.par_chunks_mut(batch)
            .enumerate()
            .try_for_each(|(i, chunk)| f(i * batch, chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_helpers() {
        assert_eq!(align_down(13), 12);
        assert_eq!(align_up(13), 16);
        assert_eq!(align_up(16), 16);
    }
}
