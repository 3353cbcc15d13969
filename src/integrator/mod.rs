//! Probe integration over device buffers.
//!
//! [`ProbeIntegrator`] binds a world and a positions buffer in [`prepare`],
//! then each `integrate_*` call reads a range of positions back to the host,
//! hands them to a [`ProbeKernel`] and writes the results into the output
//! buffer, waiting for both transfers.
//!
//! Sample partitioning per call:
//!
//! | call     | direct | indirect | environment        |
//! |----------|--------|----------|--------------------|
//! | direct   | n      | 0        | n unless ignored   |
//! | indirect | 0      | n        | n unless ignored   |
//! | validity | 0      | n        | 0                  |
//!
//! The direct call always ignores indirect environment and the indirect call
//! always ignores direct environment, so environment light is counted once.
//!
//! [`prepare`]: ProbeIntegrator::prepare

mod kernel;
mod sampling;
mod scene_kernel;

pub use kernel::{KernelRequest, ProbeKernel, SampleCounts};
pub use sampling::{fibonacci_sphere, pcg_hash, Sampler, Stream};
pub use scene_kernel::SceneKernel;

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use sh_l2::SphericalHarmonicsL2;

use crate::device::{Backend, BufferSlice, DeviceContext};
use crate::progress::{BakeProgressState, ProgressSpan};
use crate::util::{Error, Result, Vec3};
use crate::world::{IntegrationContextRef, World};

/// Bound state between `prepare` and the integrate calls.
struct Session<'w> {
    world: IntegrationContextRef<'w>,
    positions: BufferSlice<Vec3>,
    pushoff: f32,
    bounce_count: u32,
}

/// Radiance/validity integrator for one backend.
pub struct ProbeIntegrator<'w> {
    backend: Backend,
    kernel: Arc<dyn ProbeKernel>,
    session: Option<Session<'w>>,
    progress: Option<Arc<BakeProgressState>>,
    progress_range: (f32, f32),
}

impl<'w> ProbeIntegrator<'w> {
    pub fn new(backend: Backend, kernel: Arc<dyn ProbeKernel>) -> Self {
        Self {
            backend,
            kernel,
            session: None,
            progress: None,
            progress_range: (0.0, 1.0),
        }
    }

    /// Integrator running the built-in [`SceneKernel`].
    pub fn with_scene_kernel(backend: Backend) -> Self {
        Self::new(backend, Arc::new(SceneKernel::new()))
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn is_prepared(&self) -> bool {
        self.session.is_some()
    }

    /// Bind `world` and the positions buffer for the following calls.
    ///
    /// Panics if the context or world belongs to another backend, or if the
    /// world has not been populated.
    pub fn prepare(
        &mut self,
        ctx: &DeviceContext,
        world: &'w World,
        positions: BufferSlice<Vec3>,
        pushoff: f32,
        bounce_count: u32,
    ) {
        self.check_backend(ctx);
        assert_eq!(
            world.backend(),
            self.backend,
            "world backend does not match the integrator"
        );
        let Some(view) = world.integration_context() else {
            panic!("integrator prepared with a world that has not been populated");
        };
        self.session = Some(Session {
            world: view,
            positions,
            pushoff,
            bounce_count,
        });
    }

    /// Shared progress/cancel state polled by the kernel, or `None` to detach.
    pub fn set_progress_reporter(&mut self, progress: Option<Arc<BakeProgressState>>) {
        self.progress = progress;
    }

    /// Window of the shared progress the next calls report into.
    pub fn set_progress_range(&mut self, start: f32, end: f32) {
        self.progress_range = (start, end);
    }

    /// Light and directly visible environment arriving at each probe.
    #[tracing::instrument(skip(self, ctx, out), fields(backend = %self.backend))]
    pub fn integrate_direct_radiance(
        &self,
        ctx: &DeviceContext,
        position_offset: u32,
        position_count: u32,
        sample_count: u32,
        ignore_direct_environment: bool,
        out: BufferSlice<SphericalHarmonicsL2>,
    ) -> Result<()> {
        self.run(
            ctx,
            position_offset,
            position_count,
            SampleCounts::direct_pass(sample_count, ignore_direct_environment),
            (ignore_direct_environment, true),
            out,
            |kernel, request, results| kernel.integrate_radiance(request, results),
        )
    }

    /// Bounced light arriving at each probe.
    #[tracing::instrument(skip(self, ctx, out), fields(backend = %self.backend))]
    pub fn integrate_indirect_radiance(
        &self,
        ctx: &DeviceContext,
        position_offset: u32,
        position_count: u32,
        sample_count: u32,
        ignore_indirect_environment: bool,
        out: BufferSlice<SphericalHarmonicsL2>,
    ) -> Result<()> {
        self.run(
            ctx,
            position_offset,
            position_count,
            SampleCounts::indirect_pass(sample_count, ignore_indirect_environment),
            (true, ignore_indirect_environment),
            out,
            |kernel, request, results| kernel.integrate_radiance(request, results),
        )
    }

    /// Per-probe invalidity: fraction of rays hitting back faces.
    #[tracing::instrument(skip(self, ctx, out), fields(backend = %self.backend))]
    pub fn integrate_validity(
        &self,
        ctx: &DeviceContext,
        position_offset: u32,
        position_count: u32,
        sample_count: u32,
        out: BufferSlice<f32>,
    ) -> Result<()> {
        self.run(
            ctx,
            position_offset,
            position_count,
            SampleCounts::validity_pass(sample_count),
            (true, true),
            out,
            |kernel, request, results| kernel.integrate_validity(request, results),
        )
    }

    /// Release the integrator. It holds no device resources.
    pub fn dispose(self) {
        tracing::debug!(backend = %self.backend, "probe integrator disposed");
    }

    fn check_backend(&self, ctx: &DeviceContext) {
        assert_eq!(
            ctx.backend(),
            self.backend,
            "device context backend does not match the integrator"
        );
    }

    /// Read positions, run `kernel_call`, write results.
    #[allow(clippy::too_many_arguments)]
    fn run<T, F>(
        &self,
        ctx: &DeviceContext,
        position_offset: u32,
        position_count: u32,
        samples: SampleCounts,
        (ignore_direct_environment, ignore_indirect_environment): (bool, bool),
        out: BufferSlice<T>,
        kernel_call: F,
    ) -> Result<()>
    where
        T: Pod + Zeroable,
        F: FnOnce(&dyn ProbeKernel, &KernelRequest<'_>, &mut [T]) -> Result<()>,
    {
        self.check_backend(ctx);
        let Some(session) = self.session.as_ref() else {
            panic!("probe integrator used before prepare()");
        };
        if position_count == 0 {
            return Ok(());
        }
        let progress = self
            .progress
            .as_deref()
            .map(|state| ProgressSpan::new(state, self.progress_range.0, self.progress_range.1));
        if progress.is_some_and(|p| p.is_cancel_requested()) {
            return Err(Error::Cancelled);
        }

        let count = position_count as usize;
        let mut positions = vec![Vec3::ZERO; count];
        ctx.read_buffer(session.positions.advance(position_offset as u64), &mut positions)
            .and_then(|event| ctx.wait(event))
            .map_err(|e| Error::io_failed(format!("reading probe positions: {}", e)))?;

        let request = KernelRequest {
            ctx,
            world: session.world,
            positions: &positions,
            probe_offset: position_offset,
            pushoff: session.pushoff,
            bounce_count: session.bounce_count,
            samples,
            ignore_direct_environment,
            ignore_indirect_environment,
            progress,
        };
        let mut results = vec![T::zeroed(); count];
        kernel_call(self.kernel.as_ref(), &request, &mut results)?;

        ctx.write_buffer(out, &results)
            .and_then(|event| ctx.wait(event))
            .map_err(|e| Error::io_failed(format!("writing probe results: {}", e)))?;
        tracing::debug!(probes = count, ?samples, "probe range integrated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceSettings;
    use crate::world::{Environment, IntegrationContext, SceneAccel};

    fn populated(backend: Backend) -> World {
        let mut world = World::new(backend);
        let scene = SceneAccel::build(
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Environment::uniform(Vec3::ONE),
        );
        world.set_integration_context(IntegrationContext::new(backend, scene));
        world
    }

    #[test]
    #[should_panic(expected = "before prepare")]
    fn test_unprepared_use_panics() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let out = ctx.create_buffer_for::<f32>(1).unwrap();
        let integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
        let _ = integrator.integrate_validity(&ctx, 0, 1, 4, out.slice());
    }

    #[test]
    #[should_panic(expected = "does not match the integrator")]
    fn test_foreign_world_panics() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let positions = ctx.create_buffer_for::<Vec3>(1).unwrap();
        let world = populated(Backend::Jobs);
        let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
        integrator.prepare(&ctx, &world, positions.slice(), 0.0, 0);
    }

    #[test]
    fn test_cancel_before_start() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let positions = ctx.create_buffer_for::<Vec3>(4).unwrap();
        let out = ctx.create_buffer_for::<f32>(4).unwrap();
        let world = populated(Backend::Reference);
        let progress = Arc::new(BakeProgressState::new());
        progress.request_cancel();

        let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
        integrator.prepare(&ctx, &world, positions.slice(), 0.0, 0);
        integrator.set_progress_reporter(Some(progress));
        let err = integrator
            .integrate_validity(&ctx, 0, 4, 8, out.slice())
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_constant_environment_projects_exactly() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let positions = ctx.create_buffer_for::<Vec3>(2).unwrap();
        ctx.write_now(positions.slice(), &[Vec3::ZERO, Vec3::new(3.0, 1.0, -2.0)])
            .unwrap();
        let out = ctx.create_buffer_for::<SphericalHarmonicsL2>(2).unwrap();
        let world = populated(Backend::Reference);

        let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
        integrator.prepare(&ctx, &world, positions.slice(), 1e-4, 0);
        integrator
            .integrate_direct_radiance(&ctx, 0, 2, 64, false, out.slice())
            .unwrap();

        let mut sh = [SphericalHarmonicsL2::ZERO; 2];
        ctx.read_now(out.slice(), &mut sh).unwrap();
        // 4π * L * Y00 for constant radiance L = 1
        let expected = 4.0 * std::f32::consts::PI * sh_l2::basis::Y00;
        for probe in &sh {
            for channel in 0..3 {
                assert!((probe[(channel, 0)] - expected).abs() < 1e-3);
            }
        }
        integrator.dispose();
    }
}
