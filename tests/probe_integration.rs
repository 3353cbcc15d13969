//! Probe integrator behavior with stub and built-in kernels.

use std::sync::Arc;

use parking_lot::Mutex;

use lightbaker::integrator::{KernelRequest, ProbeKernel, SampleCounts};
use lightbaker::util::Vec3;
use lightbaker::world::{Environment, IntegrationContext, Light, Material, SceneAccel, Triangle};
use lightbaker::{
    Backend, DeviceContext, DeviceSettings, Error, ProbeIntegrator, SphericalHarmonicsL2, World,
};

/// What the integrator handed to the kernel.
#[derive(Debug, Clone, PartialEq)]
struct Call {
    samples: SampleCounts,
    ignore_direct_environment: bool,
    ignore_indirect_environment: bool,
    probe_offset: u32,
    positions: Vec<Vec3>,
    bounce_count: u32,
}

#[derive(Default)]
struct RecordingKernel {
    calls: Mutex<Vec<Call>>,
}

impl RecordingKernel {
    fn record(&self, request: &KernelRequest<'_>) {
        self.calls.lock().push(Call {
            samples: request.samples,
            ignore_direct_environment: request.ignore_direct_environment,
            ignore_indirect_environment: request.ignore_indirect_environment,
            probe_offset: request.probe_offset,
            positions: request.positions.to_vec(),
            bounce_count: request.bounce_count,
        });
    }
}

impl ProbeKernel for RecordingKernel {
    fn integrate_radiance(
        &self,
        request: &KernelRequest<'_>,
        out: &mut [SphericalHarmonicsL2],
    ) -> lightbaker::Result<()> {
        self.record(request);
        for (i, sh) in out.iter_mut().enumerate() {
            sh[(0, 0)] = (request.probe_offset as usize + i) as f32;
        }
        Ok(())
    }

    fn integrate_validity(&self, request: &KernelRequest<'_>, out: &mut [f32]) -> lightbaker::Result<()> {
        self.record(request);
        out.fill(0.25);
        Ok(())
    }
}

struct FailingKernel;

impl ProbeKernel for FailingKernel {
    fn integrate_radiance(
        &self,
        _request: &KernelRequest<'_>,
        _out: &mut [SphericalHarmonicsL2],
    ) -> lightbaker::Result<()> {
        Err(Error::job("kernel exploded"))
    }

    fn integrate_validity(&self, _request: &KernelRequest<'_>, _out: &mut [f32]) -> lightbaker::Result<()> {
        Err(Error::job("kernel exploded"))
    }
}

fn context(backend: Backend) -> DeviceContext {
    DeviceContext::create(backend, &DeviceSettings::default()).expect("context")
}

fn world_with(backend: Backend, scene: SceneAccel) -> World {
    let mut world = World::new(backend);
    world.set_integration_context(IntegrationContext::new(backend, scene));
    world
}

fn empty_scene() -> SceneAccel {
    SceneAccel::build(Vec::new(), Vec::new(), Vec::new(), Environment::default())
}

/// Closed axis-aligned box with outward-facing triangles.
fn closed_box(center: Vec3, half: f32) -> Vec<Triangle> {
    let corner = |x: f32, y: f32, z: f32| center + Vec3::new(x, y, z) * half;
    let c = [
        corner(-1.0, -1.0, -1.0),
        corner(1.0, -1.0, -1.0),
        corner(1.0, 1.0, -1.0),
        corner(-1.0, 1.0, -1.0),
        corner(-1.0, -1.0, 1.0),
        corner(1.0, -1.0, 1.0),
        corner(1.0, 1.0, 1.0),
        corner(-1.0, 1.0, 1.0),
    ];
    let quads = [
        [0, 1, 2, 3],
        [4, 5, 6, 7],
        [0, 1, 5, 4],
        [3, 2, 6, 7],
        [0, 3, 7, 4],
        [1, 2, 6, 5],
    ];
    let mut out = Vec::new();
    for q in quads {
        for [a, b, d] in [[q[0], q[1], q[2]], [q[0], q[2], q[3]]] {
            let mut t = Triangle { v0: c[a], v1: c[b], v2: c[d], material: 0 };
            if t.normal().dot(t.centroid() - center) < 0.0 {
                std::mem::swap(&mut t.v1, &mut t.v2);
            }
            out.push(t);
        }
    }
    out
}

/// Large upward-facing quad at `y`.
fn floor(y: f32, half: f32) -> Vec<Triangle> {
    let p = |x: f32, z: f32| Vec3::new(x * half, y, z * half);
    vec![
        Triangle { v0: p(-1.0, -1.0), v1: p(-1.0, 1.0), v2: p(1.0, 1.0), material: 0 },
        Triangle { v0: p(-1.0, -1.0), v1: p(1.0, 1.0), v2: p(1.0, -1.0), material: 0 },
    ]
}

fn upload_positions(ctx: &DeviceContext, positions: &[Vec3]) -> lightbaker::BufferId {
    let id = ctx.create_buffer_for::<Vec3>(positions.len()).expect("positions");
    ctx.write_now(id.slice(), positions).expect("upload positions");
    id
}

#[test]
fn test_calls_partition_samples() {
    let ctx = context(Backend::Reference);
    let world = world_with(Backend::Reference, empty_scene());
    let positions: Vec<Vec3> = (0..10).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
    let pos = upload_positions(&ctx, &positions);
    let radiance = ctx.create_buffer_for::<SphericalHarmonicsL2>(10).expect("radiance");
    let validity = ctx.create_buffer_for::<f32>(10).expect("validity");

    let kernel = Arc::new(RecordingKernel::default());
    let mut integrator = ProbeIntegrator::new(Backend::Reference, kernel.clone());
    integrator.prepare(&ctx, &world, pos.slice(), 0.01, 3);

    integrator
        .integrate_direct_radiance(&ctx, 0, 10, 16, false, radiance.slice())
        .expect("direct");
    integrator
        .integrate_direct_radiance(&ctx, 0, 10, 16, true, radiance.slice())
        .expect("direct without environment");
    integrator
        .integrate_indirect_radiance(&ctx, 0, 10, 32, false, radiance.slice())
        .expect("indirect");
    integrator
        .integrate_indirect_radiance(&ctx, 0, 10, 32, true, radiance.slice())
        .expect("indirect without environment");
    integrator
        .integrate_validity(&ctx, 0, 10, 8, validity.slice())
        .expect("validity");

    let calls = kernel.calls.lock();
    let summary: Vec<_> = calls
        .iter()
        .map(|c| (c.samples, c.ignore_direct_environment, c.ignore_indirect_environment))
        .collect();
    let counts = |direct, indirect, environment| SampleCounts { direct, indirect, environment };
    assert_eq!(
        summary,
        vec![
            (counts(16, 0, 16), false, true),
            (counts(16, 0, 0), true, true),
            (counts(0, 32, 32), true, false),
            (counts(0, 32, 0), true, true),
            (counts(0, 8, 0), true, true),
        ]
    );
    assert!(calls.iter().all(|c| c.bounce_count == 3 && c.positions == positions));
}

#[test]
fn test_offsets_select_positions_and_output() {
    let ctx = context(Backend::Jobs);
    let world = world_with(Backend::Jobs, empty_scene());
    let positions: Vec<Vec3> = (0..8).map(|i| Vec3::splat(i as f32)).collect();
    let pos = upload_positions(&ctx, &positions);
    let radiance = ctx.create_buffer_for::<SphericalHarmonicsL2>(8).expect("radiance");
    ctx.write_now(radiance.slice(), &[SphericalHarmonicsL2::ZERO; 8])
        .expect("clear");

    let kernel = Arc::new(RecordingKernel::default());
    let mut integrator = ProbeIntegrator::new(Backend::Jobs, kernel.clone());
    integrator.prepare(&ctx, &world, pos.slice(), 0.0, 0);

    // Positions 5..8 land in output elements 1..4
    integrator
        .integrate_indirect_radiance(&ctx, 5, 3, 4, false, radiance.slice().advance(1))
        .expect("indirect");

    let calls = kernel.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].probe_offset, 5);
    assert_eq!(calls[0].positions, positions[5..8].to_vec());

    let mut out = [SphericalHarmonicsL2::ZERO; 8];
    ctx.read_now(radiance.slice(), &mut out).expect("read");
    let firsts: Vec<f32> = out.iter().map(|sh| sh[(0, 0)]).collect();
    assert_eq!(firsts, vec![0.0, 5.0, 6.0, 7.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn test_zero_count_skips_kernel() {
    let ctx = context(Backend::Reference);
    let world = world_with(Backend::Reference, empty_scene());
    let pos = upload_positions(&ctx, &[Vec3::ZERO]);
    let validity = ctx.create_buffer_for::<f32>(1).expect("validity");

    let kernel = Arc::new(RecordingKernel::default());
    let mut integrator = ProbeIntegrator::new(Backend::Reference, kernel.clone());
    integrator.prepare(&ctx, &world, pos.slice(), 0.0, 0);
    integrator
        .integrate_validity(&ctx, 0, 0, 16, validity.slice())
        .expect("empty range");
    assert!(kernel.calls.lock().is_empty());
}

#[test]
fn test_kernel_failure_passes_through() {
    let ctx = context(Backend::Reference);
    let world = world_with(Backend::Reference, empty_scene());
    let pos = upload_positions(&ctx, &[Vec3::ZERO; 2]);
    let radiance = ctx.create_buffer_for::<SphericalHarmonicsL2>(2).expect("radiance");

    let mut integrator = ProbeIntegrator::new(Backend::Reference, Arc::new(FailingKernel));
    integrator.prepare(&ctx, &world, pos.slice(), 0.0, 0);
    let err = integrator
        .integrate_direct_radiance(&ctx, 0, 2, 4, false, radiance.slice())
        .expect_err("kernel error");
    assert!(matches!(err, Error::JobFailed(ref msg) if msg.contains("exploded")));
}

#[test]
#[should_panic(expected = "has not been populated")]
fn test_unpopulated_world_panics() {
    let ctx = context(Backend::Reference);
    let world = World::new(Backend::Reference);
    let pos = upload_positions(&ctx, &[Vec3::ZERO]);
    let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
    integrator.prepare(&ctx, &world, pos.slice(), 0.0, 0);
}

#[test]
#[should_panic(expected = "device context backend does not match")]
fn test_foreign_context_panics() {
    let ctx = context(Backend::Jobs);
    let world = world_with(Backend::Reference, empty_scene());
    let pos = upload_positions(&ctx, &[Vec3::ZERO]);
    let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
    integrator.prepare(&ctx, &world, pos.slice(), 0.0, 0);
}

#[test]
fn test_validity_inside_and_outside_closed_box() {
    let scene = SceneAccel::build(
        closed_box(Vec3::ZERO, 1.0),
        vec![Material::default()],
        Vec::new(),
        Environment::default(),
    );

    // 50 probes inside the box, 50 well outside it
    let mut positions = Vec::new();
    for i in 0..50 {
        let t = i as f32 / 49.0;
        positions.push(Vec3::new(t * 1.4 - 0.7, (t * 7.0).sin() * 0.6, (t * 3.0).cos() * 0.6));
    }
    for i in 0..50 {
        let angle = i as f32 * 0.4;
        positions.push(Vec3::new(angle.cos() * 3.0, (i as f32 * 0.1) - 2.5, angle.sin() * 3.0));
    }

    for backend in [Backend::Reference, Backend::Jobs] {
        let ctx = context(backend);
        let world = world_with(backend, scene.clone());
        let pos = upload_positions(&ctx, &positions);
        let validity = ctx.create_buffer_for::<f32>(positions.len()).expect("validity");

        let mut integrator = ProbeIntegrator::with_scene_kernel(backend);
        integrator.prepare(&ctx, &world, pos.slice(), 1e-4, 0);
        integrator
            .integrate_validity(&ctx, 0, positions.len() as u32, 64, validity.slice())
            .expect("validity");

        let mut out = vec![0.0f32; positions.len()];
        ctx.read_now(validity.slice(), &mut out).expect("read");
        for (i, v) in out.iter().enumerate() {
            if i < 50 {
                assert!(*v > 0.95, "inside probe {} validity {} on {}", i, v, backend);
            } else {
                assert!(*v < 0.05, "outside probe {} validity {} on {}", i, v, backend);
            }
        }
    }
}

#[test]
fn test_floor_shadows_probe_below() {
    let sun = Light::Directional {
        direction: Vec3::NEG_Y,
        color: Vec3::ONE,
        intensity: 2.0,
        radius: 0.0,
    };
    let scene = SceneAccel::build(floor(0.0, 100.0), vec![Material::default()], vec![sun], Environment::default());
    let ctx = context(Backend::Reference);
    let world = world_with(Backend::Reference, scene);
    let pos = upload_positions(&ctx, &[Vec3::new(0.3, 1.0, 0.2), Vec3::new(0.3, -1.0, 0.2)]);
    let radiance = ctx.create_buffer_for::<SphericalHarmonicsL2>(2).expect("radiance");

    let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
    integrator.prepare(&ctx, &world, pos.slice(), 1e-4, 0);
    integrator
        .integrate_direct_radiance(&ctx, 0, 2, 8, false, radiance.slice())
        .expect("direct");

    let mut out = [SphericalHarmonicsL2::ZERO; 2];
    ctx.read_now(radiance.slice(), &mut out).expect("read");
    let y00 = sh_l2::basis::Y00;
    for channel in 0..3 {
        assert!((out[0][(channel, 0)] - 2.0 * y00).abs() < 1e-4);
    }
    assert_eq!(out[1], SphericalHarmonicsL2::ZERO);
}

#[test]
fn test_host_backends_agree() {
    let mut triangles = closed_box(Vec3::new(0.0, 1.0, 0.0), 0.5);
    triangles.extend(floor(0.0, 20.0));
    let materials = vec![Material {
        albedo: Vec3::new(0.8, 0.6, 0.4),
        emission: Vec3::ZERO,
    }];
    let lights = vec![
        Light::Directional {
            direction: Vec3::new(-0.3, -1.0, 0.2),
            color: Vec3::ONE,
            intensity: 3.0,
            radius: 0.05,
        },
        Light::Point {
            position: Vec3::new(2.0, 3.0, -1.0),
            color: Vec3::new(1.0, 0.9, 0.8),
            intensity: 20.0,
            radius: 0.1,
        },
    ];
    let environment = Environment {
        sky: Vec3::new(0.4, 0.5, 0.8),
        ground: Vec3::splat(0.1),
    };
    let scene = SceneAccel::build(triangles, materials, lights, environment);
    let positions: Vec<Vec3> = (0..40)
        .map(|i| {
            let a = i as f32 * 0.37;
            Vec3::new(a.cos() * 2.0, 0.5 + (i % 5) as f32 * 0.4, a.sin() * 2.0)
        })
        .collect();

    let mut results = Vec::new();
    for backend in [Backend::Reference, Backend::Jobs] {
        let ctx = context(backend);
        let world = world_with(backend, scene.clone());
        let pos = upload_positions(&ctx, &positions);
        let direct = ctx.create_buffer_for::<SphericalHarmonicsL2>(40).expect("direct");
        let indirect = ctx.create_buffer_for::<SphericalHarmonicsL2>(40).expect("indirect");

        let mut integrator = ProbeIntegrator::with_scene_kernel(backend);
        integrator.prepare(&ctx, &world, pos.slice(), 1e-3, 2);
        integrator
            .integrate_direct_radiance(&ctx, 0, 40, 8, false, direct.slice())
            .expect("direct");
        integrator
            .integrate_indirect_radiance(&ctx, 0, 40, 32, false, indirect.slice())
            .expect("indirect");

        let mut d = vec![SphericalHarmonicsL2::ZERO; 40];
        let mut ind = vec![SphericalHarmonicsL2::ZERO; 40];
        ctx.read_now(direct.slice(), &mut d).expect("read direct");
        ctx.read_now(indirect.slice(), &mut ind).expect("read indirect");
        assert!(d.iter().chain(&ind).all(|sh| sh.is_finite()));
        results.push((d, ind));
    }
    assert_eq!(results[0], results[1]);
    // Lit scene, so something arrived
    assert!(results[0].1.iter().any(|sh| sh[(0, 0)] > 0.0));
}

#[test]
fn test_validity_hundred_probes_single_sample() {
    let ctx = context(Backend::Reference);
    let world = world_with(
        Backend::Reference,
        SceneAccel::build(floor(0.0, 5.0), vec![Material::default()], Vec::new(), Environment::default()),
    );
    let positions: Vec<Vec3> = (0..100)
        .map(|i| Vec3::new((i % 10) as f32 - 4.5, (i / 10) as f32 * 0.5 - 2.0, 0.25))
        .collect();
    let pos = upload_positions(&ctx, &positions);
    let validity = ctx.create_buffer_for::<f32>(100).expect("validity");
    ctx.write_now(validity.slice(), &[f32::NAN; 100]).expect("poison");

    let mut integrator = ProbeIntegrator::with_scene_kernel(Backend::Reference);
    integrator.prepare(&ctx, &world, pos.slice(), 1e-4, 0);
    integrator
        .integrate_validity(&ctx, 0, 100, 1, validity.slice())
        .expect("validity");
    integrator.dispose();

    let mut out = vec![0.0f32; 100];
    ctx.read_now(validity.slice(), &mut out).expect("read");
    assert!(out.iter().all(|v| *v == 0.0 || *v == 1.0), "{:?}", out);
}
