//! Spherical-harmonic post-processing over device buffers.
//!
//! Every operation reads `probe_count` probes from its input slices and
//! writes `probe_count` probes to the output slice. A context of another
//! backend is rejected with [`Error::BackendMismatch`] before any buffer is
//! touched.

mod jobs;
mod reference;

#[cfg(feature = "gpu")]
mod gpu;

pub use jobs::JobPostProcessor;
pub use reference::ReferencePostProcessor;

#[cfg(feature = "gpu")]
pub use gpu::GpuPostProcessor;

use sh_l2::SphericalHarmonicsL2;

use crate::device::{Backend, BufferSlice, DeviceContext};
use crate::util::{Error, Result};

/// SH post-processor for one backend.
pub enum ProbePostProcessor {
    Reference(ReferencePostProcessor),
    Jobs(JobPostProcessor),
    #[cfg(feature = "gpu")]
    Gpu(GpuPostProcessor),
}

impl ProbePostProcessor {
    /// Post-processor for `backend`. Fails for the GPU backend when the crate
    /// is built without the `gpu` feature.
    pub fn new(backend: Backend) -> Result<Self> {
        match backend {
            Backend::Reference => Ok(Self::Reference(ReferencePostProcessor)),
            Backend::Jobs => Ok(Self::Jobs(JobPostProcessor)),
            #[cfg(feature = "gpu")]
            Backend::Gpu => Ok(Self::Gpu(GpuPostProcessor::new())),
            #[cfg(not(feature = "gpu"))]
            Backend::Gpu => Err(Error::device(
                "GPU post-processing not available. Rebuild with: cargo build --features gpu",
            )),
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Self::Reference(_) => Backend::Reference,
            Self::Jobs(_) => Backend::Jobs,
            #[cfg(feature = "gpu")]
            Self::Gpu(_) => Backend::Gpu,
        }
    }

    fn check_backend(&self, ctx: &DeviceContext) -> Result<()> {
        if ctx.backend() == self.backend() {
            Ok(())
        } else {
            Err(Error::BackendMismatch {
                expected: self.backend(),
                actual: ctx.backend(),
            })
        }
    }

    /// Backend setup (GPU pipeline compilation).
    pub fn initialize(&mut self, ctx: &DeviceContext) -> Result<()> {
        self.check_backend(ctx)?;
        match (self, ctx) {
            #[cfg(feature = "gpu")]
            (Self::Gpu(pp), DeviceContext::Gpu(gpu)) => pp.initialize(gpu),
            _ => Ok(()),
        }
    }

    /// Cosine-lobe convolution: band 0 × π, band 1 × 2π/3, band 2 × π/4.
    pub fn convolve_radiance_to_irradiance(
        &self,
        ctx: &DeviceContext,
        radiance_in: BufferSlice<SphericalHarmonicsL2>,
        irradiance_out: BufferSlice<SphericalHarmonicsL2>,
        probe_count: u32,
    ) -> Result<()> {
        self.check_backend(ctx)?;
        let count = probe_count as usize;
        if count == 0 {
            return Ok(());
        }
        match (self, ctx) {
            (Self::Reference(pp), _) => {
                pp.convolve_radiance_to_irradiance(ctx, radiance_in, irradiance_out, count)
            }
            (Self::Jobs(pp), _) => {
                pp.convolve_radiance_to_irradiance(ctx, radiance_in, irradiance_out, count)
            }
            #[cfg(feature = "gpu")]
            (Self::Gpu(pp), DeviceContext::Gpu(gpu)) => {
                pp.convolve_radiance_to_irradiance(gpu, radiance_in, irradiance_out, count)
            }
            #[cfg(feature = "gpu")]
            (Self::Gpu(_), _) => unreachable!("backend checked above"),
        }
    }

    /// Irradiance in the engine's normalized layout: L0 and L1 scaled by
    /// their basis constants over π with L1 reordered from (y, z, x) to
    /// (x, y, z); L2 scaled by its reconstruction factors.
    pub fn convert_to_unity_format(
        &self,
        ctx: &DeviceContext,
        irradiance_in: BufferSlice<SphericalHarmonicsL2>,
        irradiance_out: BufferSlice<SphericalHarmonicsL2>,
        probe_count: u32,
    ) -> Result<()> {
        self.check_backend(ctx)?;
        let count = probe_count as usize;
        if count == 0 {
            return Ok(());
        }
        match (self, ctx) {
            (Self::Reference(pp), _) => {
                pp.convert_to_unity_format(ctx, irradiance_in, irradiance_out, count)
            }
            (Self::Jobs(pp), _) => pp.convert_to_unity_format(ctx, irradiance_in, irradiance_out, count),
            #[cfg(feature = "gpu")]
            (Self::Gpu(pp), DeviceContext::Gpu(gpu)) => {
                pp.convert_to_unity_format(gpu, irradiance_in, irradiance_out, count)
            }
            #[cfg(feature = "gpu")]
            (Self::Gpu(_), _) => unreachable!("backend checked above"),
        }
    }

    /// Element-wise `a + b`.
    pub fn add_spherical_harmonics_l2(
        &self,
        ctx: &DeviceContext,
        a: BufferSlice<SphericalHarmonicsL2>,
        b: BufferSlice<SphericalHarmonicsL2>,
        out: BufferSlice<SphericalHarmonicsL2>,
        probe_count: u32,
    ) -> Result<()> {
        self.check_backend(ctx)?;
        let count = probe_count as usize;
        if count == 0 {
            return Ok(());
        }
        match (self, ctx) {
            (Self::Reference(pp), _) => pp.add(ctx, a, b, out, count),
            (Self::Jobs(pp), _) => pp.add(ctx, a, b, out, count),
            #[cfg(feature = "gpu")]
            (Self::Gpu(pp), DeviceContext::Gpu(gpu)) => pp.add(gpu, a, b, out, count),
            #[cfg(feature = "gpu")]
            (Self::Gpu(_), _) => unreachable!("backend checked above"),
        }
    }
}
