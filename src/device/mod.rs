//! Device-agnostic buffer and command layer.
//!
//! A [`DeviceContext`] allocates buffers, moves typed data in and out of them
//! and reports completion of the transfers it enqueued. The backend set is
//! closed, so dispatch is a `match` over [`DeviceContext`] variants:
//!
//! - [`ReferenceContext`] - synchronous, single-threaded
//! - [`JobContext`] - rayon pool, blocking joins
//! - `GpuContext` - wgpu device, real fences (`gpu` feature)
//!
//! ## Example
//! ```ignore
//! let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default())?;
//! let buf = ctx.create_buffer(4 * 16)?;
//! let ev = ctx.write_buffer(buf.slice::<f32>(), &[1.0; 16])?;
//! ctx.wait(ev)?;
//! ```

mod arena;
mod handle;
mod jobs;
mod reference;

#[cfg(feature = "gpu")]
mod gpu;

pub use handle::{BufferId, BufferSlice, EventId};
pub(crate) use arena::check_range;
pub use jobs::JobContext;
pub use reference::ReferenceContext;

#[cfg(feature = "gpu")]
pub use gpu::GpuContext;

use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::DeviceSettings;
use crate::util::{Error, Result};

/// Execution backend tag.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Reference,
    Jobs,
    Gpu,
}

impl Backend {
    /// All backends, available or not.
    pub const ALL: [Backend; 3] = [Backend::Reference, Backend::Jobs, Backend::Gpu];

    /// Whether this build can create a context for the backend.
    pub const fn is_available(self) -> bool {
        match self {
            Backend::Reference | Backend::Jobs => true,
            Backend::Gpu => cfg!(feature = "gpu"),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Backend::Reference => "reference",
            Backend::Jobs => "jobs",
            Backend::Gpu => "gpu",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" | "ref" | "cpu" => Ok(Backend::Reference),
            "jobs" | "job" => Ok(Backend::Jobs),
            "gpu" => Ok(Backend::Gpu),
            other => Err(Error::invalid(format!("unknown backend '{}'", other))),
        }
    }
}

/// Buffer/command context over one of the execution backends.
pub enum DeviceContext {
    Reference(ReferenceContext),
    Jobs(JobContext),
    #[cfg(feature = "gpu")]
    Gpu(GpuContext),
}

/// Forward a call to whichever backend is active.
macro_rules! dispatch {
    ($self:expr, $ctx:ident => $body:expr) => {
        match $self {
            DeviceContext::Reference($ctx) => $body,
            DeviceContext::Jobs($ctx) => $body,
            #[cfg(feature = "gpu")]
            DeviceContext::Gpu($ctx) => $body,
        }
    };
}

impl DeviceContext {
    /// Create an uninitialized context for `backend`.
    pub fn new(backend: Backend, settings: &DeviceSettings) -> Result<Self> {
        match backend {
            Backend::Reference => Ok(Self::Reference(ReferenceContext::new(settings.batch_size))),
            Backend::Jobs => Ok(Self::Jobs(JobContext::new(
                settings.worker_threads,
                settings.batch_size,
            ))),
            #[cfg(feature = "gpu")]
            Backend::Gpu => Ok(Self::Gpu(GpuContext::new(
                settings.gpu_power_preference,
                settings.batch_size,
            ))),
            #[cfg(not(feature = "gpu"))]
            Backend::Gpu => Err(Error::device(
                "GPU backend not available. Rebuild with: cargo build --features gpu",
            )),
        }
    }

    /// Create and initialize a context.
    pub fn create(backend: Backend, settings: &DeviceSettings) -> Result<Self> {
        let mut ctx = Self::new(backend, settings)?;
        ctx.initialize()?;
        Ok(ctx)
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Reference(_) => Backend::Reference,
            Self::Jobs(_) => Backend::Jobs,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => Backend::Gpu,
        }
    }

    /// Backend-specific setup. Idempotent once it succeeded; a failure leaves
    /// the context uninitialized.
    pub fn initialize(&mut self) -> Result<()> {
        dispatch!(self, ctx => ctx.initialize())
    }

    pub fn is_initialized(&self) -> bool {
        dispatch!(self, ctx => ctx.is_initialized())
    }

    /// Backend name plus what it runs on, for logs.
    pub fn describe(&self) -> String {
        if !self.is_initialized() {
            return format!("{} (uninitialized)", self.backend());
        }
        match self {
            Self::Reference(_) => "reference (1 thread)".to_string(),
            Self::Jobs(ctx) => format!("jobs ({} threads)", ctx.thread_count()),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => format!("gpu ({})", ctx.adapter_name()),
        }
    }

    /// Allocate `size_bytes` of device storage. Panics if `size_bytes` is 0.
    pub fn create_buffer(&self, size_bytes: u64) -> Result<BufferId> {
        let id = dispatch!(self, ctx => ctx.create_buffer(size_bytes))?;
        tracing::trace!(?id, size_bytes, "buffer created");
        Ok(id)
    }

    /// Allocate room for `count` elements of `T`. Panics if the byte size
    /// overflows.
    pub fn create_buffer_for<T: Pod>(&self, count: usize) -> Result<BufferId> {
        let size_bytes = (count as u64)
            .checked_mul(std::mem::size_of::<T>() as u64)
            .unwrap_or_else(|| panic!("buffer of {} elements overflows its byte size", count));
        self.create_buffer(size_bytes)
    }

    /// Free a buffer. Panics if `id` is foreign, unknown or already destroyed.
    pub fn destroy_buffer(&self, id: BufferId) {
        dispatch!(self, ctx => ctx.destroy_buffer(id));
        tracing::trace!(?id, "buffer destroyed");
    }

    /// Requested size of a live buffer in bytes.
    pub fn buffer_size(&self, id: BufferId) -> u64 {
        dispatch!(self, ctx => ctx.buffer_size(id))
    }

    /// Number of buffers created and not yet destroyed.
    pub fn live_buffer_count(&self) -> usize {
        dispatch!(self, ctx => ctx.live_buffer_count())
    }

    /// Copy `src` into the buffer starting at `dst`.
    ///
    /// Panics if the range falls outside the buffer.
    pub fn write_buffer<T: Pod>(&self, dst: BufferSlice<T>, src: &[T]) -> Result<EventId> {
        match self {
            Self::Reference(ctx) => Ok(ctx.write_buffer(dst, src)),
            Self::Jobs(ctx) => Ok(ctx.write_buffer(dst, src)),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.write_buffer(dst, src),
        }
    }

    /// Copy from the buffer starting at `src` into `dst`.
    ///
    /// Panics if the range falls outside the buffer.
    pub fn read_buffer<T: Pod>(&self, src: BufferSlice<T>, dst: &mut [T]) -> Result<EventId> {
        match self {
            Self::Reference(ctx) => Ok(ctx.read_buffer(src, dst)),
            Self::Jobs(ctx) => Ok(ctx.read_buffer(src, dst)),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.read_buffer(src, dst),
        }
    }

    /// Non-blocking completion check.
    #[cfg_attr(not(feature = "gpu"), allow(unused_variables))]
    pub fn is_completed(&self, event: EventId) -> bool {
        match self {
            Self::Reference(_) | Self::Jobs(_) => true,
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.is_completed(event),
        }
    }

    /// Block until `event` has completed.
    pub fn wait(&self, event: EventId) -> Result<()> {
        match self {
            Self::Reference(_) | Self::Jobs(_) => {
                debug_assert_eq!(event, EventId::COMPLETED);
                Ok(())
            }
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.wait(event),
        }
    }

    /// Submit batched work to the device.
    pub fn flush(&self) -> Result<()> {
        match self {
            Self::Reference(_) | Self::Jobs(_) => Ok(()),
            #[cfg(feature = "gpu")]
            Self::Gpu(ctx) => ctx.flush(),
        }
    }

    /// Read `dst.len()` elements and wait for them to land.
    pub fn read_now<T: Pod>(&self, src: BufferSlice<T>, dst: &mut [T]) -> Result<()> {
        let event = self.read_buffer(src, dst)?;
        self.wait(event)
    }

    /// Write `src` and wait for the transfer to finish.
    pub fn write_now<T: Pod>(&self, dst: BufferSlice<T>, src: &[T]) -> Result<()> {
        let event = self.write_buffer(dst, src)?;
        self.wait(event)
    }

    /// Run `f(first_index, chunk)` over fixed-size chunks of `out` with the
    /// backend's execution strategy, stopping at the first error.
    pub fn dispatch_batches<T, F>(&self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync + Send,
    {
        dispatch!(self, ctx => ctx.dispatch_batches(out, f))
    }
}

impl fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend())
            .field("initialized", &self.is_initialized())
            .field("live_buffers", &self.live_buffer_count())
            .finish()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let live = self.live_buffer_count();
        if live > 0 {
            tracing::debug!(backend = %self.backend(), live, "releasing buffers still alive at context drop");
        }
    }
}
