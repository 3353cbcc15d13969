//! The seam between the integrator and the code that actually traces rays.

use sh_l2::SphericalHarmonicsL2;

use crate::device::DeviceContext;
use crate::progress::ProgressSpan;
use crate::util::{Result, Vec3};
use crate::world::IntegrationContextRef;

/// Per-category sample budgets for one kernel call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleCounts {
    pub direct: u32,
    pub indirect: u32,
    pub environment: u32,
}

impl SampleCounts {
    /// Direct pass: lights plus directly visible environment.
    pub const fn direct_pass(n: u32, ignore_environment: bool) -> Self {
        Self {
            direct: n,
            indirect: 0,
            environment: if ignore_environment { 0 } else { n },
        }
    }

    /// Indirect pass: bounced light, environment only on escaped bounces.
    pub const fn indirect_pass(n: u32, ignore_environment: bool) -> Self {
        Self {
            direct: 0,
            indirect: n,
            environment: if ignore_environment { 0 } else { n },
        }
    }

    /// Validity pass: geometry rays only.
    pub const fn validity_pass(n: u32) -> Self {
        Self {
            direct: 0,
            indirect: n,
            environment: 0,
        }
    }
}

/// Everything a kernel call needs besides its output.
#[derive(Clone, Copy)]
pub struct KernelRequest<'a> {
    pub ctx: &'a DeviceContext,
    pub world: IntegrationContextRef<'a>,
    /// World-space probe positions of this call
    pub positions: &'a [Vec3],
    /// Global index of `positions[0]`
    pub probe_offset: u32,
    pub pushoff: f32,
    pub bounce_count: u32,
    pub samples: SampleCounts,
    pub ignore_direct_environment: bool,
    pub ignore_indirect_environment: bool,
    /// Window of the shared progress this call reports into
    pub progress: Option<ProgressSpan<'a>>,
}

impl KernelRequest<'_> {
    /// Whether the caller asked to stop.
    #[inline]
    pub fn is_cancel_requested(&self) -> bool {
        self.progress.is_some_and(|p| p.is_cancel_requested())
    }

    /// Report `done` of `total` probes finished.
    #[inline]
    pub fn report(&self, done: usize, total: usize) {
        if let (Some(p), true) = (self.progress, total > 0) {
            p.set(done as f32 / total as f32);
        }
    }
}

/// Backend kernel computing per-probe radiance and validity.
///
/// Output slices have exactly `request.positions.len()` elements.
pub trait ProbeKernel: Send + Sync {
    /// Radiance SH of each probe for the request's sample counts.
    fn integrate_radiance(
        &self,
        request: &KernelRequest<'_>,
        out: &mut [SphericalHarmonicsL2],
    ) -> Result<()>;

    /// Invalidity in `[0, 1]` of each probe (fraction of back-face hits).
    fn integrate_validity(&self, request: &KernelRequest<'_>, out: &mut [f32]) -> Result<()>;
}
