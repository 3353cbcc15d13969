//! Bake orchestration: world population and the probe bake pipeline.
//!
//! ## Pipeline
//! ```text
//! BakeInput ─ populate_world ─> World (SceneAccel)
//!           ─ upload positions ─> direct, indirect, validity
//!           ─ add ─ convolve ─ convert ─> read back
//! ```

pub mod input;
pub mod ipc;

pub use input::{BakeInput, MeshInput};

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sh_l2::SphericalHarmonicsL2;
use tracing::{debug, info};

use crate::config::DeviceSettings;
use crate::device::{Backend, BufferId, DeviceContext};
use crate::integrator::ProbeIntegrator;
use crate::postprocess::ProbePostProcessor;
use crate::progress::{BakeProgressState, ProgressSpan};
use crate::util::{BakeResult, Error, Result, Vec3};
use crate::world::{IntegrationContext, SceneAccel, World};

/// Progress windows of the bake stages.
const POPULATE: (f32, f32) = (0.0, 0.1);
const DIRECT: (f32, f32) = (0.1, 0.4);
const INDIRECT: (f32, f32) = (0.4, 0.85);
const VALIDITY: (f32, f32) = (0.85, 0.95);

/// Probe bake results in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeBakeOutput {
    pub backend: Backend,
    /// Irradiance SH in the engine's normalized format
    pub irradiance: Vec<SphericalHarmonicsL2>,
    /// Fraction of validity rays that hit back faces
    pub validity: Vec<f32>,
}

impl ProbeBakeOutput {
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn check_cancel(progress: &BakeProgressState) -> Result<()> {
    if progress.is_cancel_requested() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Validate `input`, build its acceleration structure and store it in `world`.
///
/// Panics if `world` belongs to another backend than `ctx`.
#[tracing::instrument(skip_all, fields(backend = %ctx.backend(), meshes = input.meshes.len()))]
pub fn populate_world(
    input: &BakeInput,
    progress: &BakeProgressState,
    ctx: &DeviceContext,
    world: &mut World,
) -> Result<()> {
    assert_eq!(
        world.backend(),
        ctx.backend(),
        "world backend does not match the device context"
    );
    let span = ProgressSpan::new(progress, POPULATE.0, POPULATE.1);
    check_cancel(progress)?;
    input.validate()?;

    let start = Instant::now();
    let triangles = input.triangles();
    check_cancel(progress)?;
    span.set(0.2);

    // Every backend traces against the same host-side structure
    let scene = SceneAccel::build(
        triangles,
        input.materials_or_default(),
        input.lights.clone(),
        input.environment,
    );
    check_cancel(progress)?;

    debug!(
        triangles = scene.triangle_count(),
        nodes = scene.node_count(),
        lights = scene.lights().len(),
        "scene built in {:.1}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    world.set_integration_context(IntegrationContext::new(ctx.backend(), scene));
    span.set(1.0);
    Ok(())
}

/// Buffers destroyed together when the bake returns.
struct ScopedBuffers<'a> {
    ctx: &'a DeviceContext,
    ids: Vec<BufferId>,
}

impl<'a> ScopedBuffers<'a> {
    fn new(ctx: &'a DeviceContext) -> Self {
        Self { ctx, ids: Vec::new() }
    }

    fn create<T: bytemuck::Pod>(&mut self, count: usize) -> Result<BufferId> {
        let id = self.ctx.create_buffer_for::<T>(count)?;
        self.ids.push(id);
        Ok(id)
    }
}

impl Drop for ScopedBuffers<'_> {
    fn drop(&mut self) {
        for id in self.ids.drain(..) {
            self.ctx.destroy_buffer(id);
        }
    }
}

/// Create a context for `device.backend` and bake every probe of `input`.
pub fn bake(
    input: &BakeInput,
    device: &DeviceSettings,
    progress: &Arc<BakeProgressState>,
) -> Result<ProbeBakeOutput> {
    let _span = tracing::info_span!("bake", backend = %device.backend).entered();
    let ctx = DeviceContext::create(device.backend, device)?;
    bake_with_context(&ctx, input, progress)
}

/// Bake every probe of `input` on an initialized context.
pub fn bake_with_context(
    ctx: &DeviceContext,
    input: &BakeInput,
    progress: &Arc<BakeProgressState>,
) -> Result<ProbeBakeOutput> {
    let start = Instant::now();
    let backend = ctx.backend();
    let settings = &input.settings;
    info!(
        "Baking {} probes against {} triangles on {}",
        input.probe_count(),
        input.triangle_count(),
        ctx.describe()
    );

    let mut world = World::new(backend);
    populate_world(input, progress, ctx, &mut world)?;

    let count = input.probe_count();
    if count == 0 {
        progress.set_progress(1.0);
        return Ok(ProbeBakeOutput {
            backend,
            ..Default::default()
        });
    }
    let n = count as u32;

    let mut buffers = ScopedBuffers::new(ctx);
    let positions = buffers.create::<Vec3>(count)?;
    let direct = buffers.create::<SphericalHarmonicsL2>(count)?;
    let indirect = buffers.create::<SphericalHarmonicsL2>(count)?;
    let validity = buffers.create::<f32>(count)?;
    ctx.write_now(positions.slice(), &input.probe_positions)?;

    let mut integrator = ProbeIntegrator::with_scene_kernel(backend);
    integrator.prepare(ctx, &world, positions.slice(), settings.pushoff, settings.bounce_count);
    integrator.set_progress_reporter(Some(Arc::clone(progress)));

    integrator.set_progress_range(DIRECT.0, DIRECT.1);
    integrator.integrate_direct_radiance(
        ctx,
        0,
        n,
        settings.direct_sample_count,
        settings.ignore_direct_environment,
        direct.slice(),
    )?;
    integrator.set_progress_range(INDIRECT.0, INDIRECT.1);
    integrator.integrate_indirect_radiance(
        ctx,
        0,
        n,
        settings.indirect_sample_count,
        settings.ignore_indirect_environment,
        indirect.slice(),
    )?;
    integrator.set_progress_range(VALIDITY.0, VALIDITY.1);
    integrator.integrate_validity(ctx, 0, n, settings.validity_sample_count, validity.slice())?;
    integrator.dispose();
    check_cancel(progress)?;

    let mut post = ProbePostProcessor::new(backend)?;
    post.initialize(ctx)?;
    post.add_spherical_harmonics_l2(ctx, direct.slice(), indirect.slice(), direct.slice(), n)?;
    post.convolve_radiance_to_irradiance(ctx, direct.slice(), direct.slice(), n)?;
    post.convert_to_unity_format(ctx, direct.slice(), direct.slice(), n)?;

    let mut output = ProbeBakeOutput {
        backend,
        irradiance: vec![SphericalHarmonicsL2::ZERO; count],
        validity: vec![0.0; count],
    };
    ctx.read_now(direct.slice(), &mut output.irradiance)?;
    ctx.read_now(validity.slice(), &mut output.validity)?;
    drop(buffers);

    progress.set_progress(1.0);
    info!(
        "Bake complete: {} probes in {:.2}s",
        count,
        start.elapsed().as_secs_f64()
    );
    Ok(output)
}

/// [`bake`] with the outcome flattened into a [`BakeResult`].
pub fn bake_to_report(
    input: &BakeInput,
    device: &DeviceSettings,
    progress: &Arc<BakeProgressState>,
) -> (Option<ProbeBakeOutput>, BakeResult) {
    match bake(input, device, progress) {
        Ok(output) => (Some(output), BakeResult::success()),
        Err(e) => {
            tracing::warn!("bake failed: {}", e);
            (None, BakeResult::from(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Environment;

    #[test]
    fn test_populate_world_sets_context() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let mut world = World::new(Backend::Reference);
        let input = BakeInput {
            meshes: vec![MeshInput {
                positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
                indices: vec![0, 1, 2],
                material: 0,
            }],
            ..Default::default()
        };
        let progress = BakeProgressState::new();
        populate_world(&input, &progress, &ctx, &mut world).unwrap();
        let view = world.integration_context().unwrap();
        assert_eq!(view.scene().triangle_count(), 1);
        assert!(progress.progress() >= POPULATE.1);
    }

    #[test]
    fn test_populate_world_honors_cancel() {
        let ctx = DeviceContext::create(Backend::Jobs, &DeviceSettings::default()).unwrap();
        let mut world = World::new(Backend::Jobs);
        let progress = BakeProgressState::new();
        progress.request_cancel();
        let err = populate_world(&BakeInput::default(), &progress, &ctx, &mut world).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(world.integration_context().is_none());
    }

    #[test]
    fn test_bake_leaves_no_buffers() {
        let ctx = DeviceContext::create(Backend::Reference, &DeviceSettings::default()).unwrap();
        let input = BakeInput {
            environment: Environment::uniform(Vec3::splat(0.5)),
            probe_positions: vec![Vec3::ZERO; 3],
            ..Default::default()
        };
        let progress = Arc::new(BakeProgressState::new());
        let out = bake_with_context(&ctx, &input, &progress).unwrap();
        assert_eq!(out.irradiance.len(), 3);
        assert_eq!(ctx.live_buffer_count(), 0);
        assert_eq!(progress.progress(), 1.0);
    }

    #[test]
    fn test_report_carries_error_kind() {
        let mut input = BakeInput::default();
        input.settings.pushoff = -1.0;
        let progress = Arc::new(BakeProgressState::new());
        let (output, report) = bake_to_report(&input, &DeviceSettings::default(), &progress);
        assert!(output.is_none());
        assert_eq!(report.kind(), crate::util::ResultKind::InvalidInput);
    }
}
