//! Built-in CPU kernel over a [`SceneAccel`].
//!
//! - direct: `direct` cone-jittered shadow rays per light, plus `environment`
//!   rays that see the environment from the probe unless
//!   `ignore_direct_environment` is set
//! - indirect: `indirect` rays shaded at their first hit with emission and
//!   shadowed direct light, continued for `bounce_count` cosine bounces;
//!   escaped bounces see the environment when `environment > 0` and
//!   `ignore_indirect_environment` is clear
//! - validity: fraction of `indirect` rays that hit a back face
//!
//! The work runs on the host through [`DeviceContext::dispatch_batches`], so
//! each backend contributes its own execution strategy.
//!
//! [`DeviceContext::dispatch_batches`]: crate::device::DeviceContext::dispatch_batches

use std::f32::consts::{PI, TAU};
use std::sync::atomic::{AtomicUsize, Ordering};

use sh_l2::SphericalHarmonicsL2;

use super::kernel::{KernelRequest, ProbeKernel};
use super::sampling::{fibonacci_sphere, Sampler, Stream};
use crate::util::{cosine_hemisphere, uniform_cone, Error, Result, Vec3};
use crate::world::{Hit, Ray, SceneAccel};

/// Deterministic hashed-sampling kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct SceneKernel;

impl SceneKernel {
    pub fn new() -> Self {
        Self
    }
}

/// Solid angle of the full sphere.
const SPHERE: f32 = 4.0 * PI;

struct Tracer<'a> {
    scene: &'a SceneAccel,
    pushoff: f32,
    bounce_count: u32,
    environment_on_bounce: bool,
}

impl Tracer<'_> {
    #[inline]
    fn spawn(&self, origin: Vec3, dir: Vec3) -> Ray {
        Ray::new(origin + dir * self.pushoff, dir)
    }

    /// Shadowed irradiance from every light on a surface at `x` facing `n`.
    fn direct_irradiance(&self, x: Vec3, n: Vec3, sampler: &mut Sampler) -> Vec3 {
        let mut e = Vec3::ZERO;
        for light in self.scene.lights() {
            let Some(ls) = light.sample_from(x) else {
                continue;
            };
            let (u, v) = sampler.next_2d();
            let dir = uniform_cone(ls.dir, ls.cone_angle, u, v);
            let cos = n.dot(dir);
            if cos <= 0.0 {
                continue;
            }
            let ray = self.spawn(x, dir);
            if !self.scene.occluded(&ray, ls.distance - self.pushoff) {
                e += ls.irradiance * cos;
            }
        }
        e
    }

    /// Outgoing radiance towards `ray.origin` from `hit`, following bounces.
    fn shade(&self, ray: &Ray, hit: Hit, sampler: &mut Sampler) -> Vec3 {
        let mut radiance = Vec3::ZERO;
        let mut throughput = Vec3::ONE;
        let mut ray = *ray;
        let mut hit = hit;

        for depth in 0..=self.bounce_count {
            let material = self.scene.material(&hit);
            let n = self.scene.shading_normal(&hit);
            let x = ray.at(hit.t) + n * self.pushoff;

            radiance += throughput * material.emission;
            radiance += throughput * material.albedo * (self.direct_irradiance(x, n, sampler) / PI);

            if depth == self.bounce_count {
                break;
            }
            throughput *= material.albedo;
            if throughput.max_element() <= 0.0 {
                break;
            }
            let (u, v) = sampler.next_2d();
            let dir = cosine_hemisphere(n, u, v);
            ray = Ray::new(x, dir);
            match self.scene.closest_hit(&ray, f32::INFINITY) {
                Some(next) => hit = next,
                None => {
                    if self.environment_on_bounce {
                        radiance += throughput * self.scene.environment().radiance(dir);
                    }
                    break;
                }
            }
        }
        radiance
    }
}

impl ProbeKernel for SceneKernel {
    #[tracing::instrument(skip_all, fields(probes = out.len(), samples = ?request.samples))]
    fn integrate_radiance(
        &self,
        request: &KernelRequest<'_>,
        out: &mut [SphericalHarmonicsL2],
    ) -> Result<()> {
        let scene = request.world.scene();
        let samples = request.samples;
        let tracer = Tracer {
            scene,
            pushoff: request.pushoff,
            bounce_count: request.bounce_count,
            environment_on_bounce: samples.environment > 0 && !request.ignore_indirect_environment,
        };
        let environment_direct = samples.environment > 0 && !request.ignore_direct_environment;
        let total = out.len();
        let done = AtomicUsize::new(0);

        request.ctx.dispatch_batches(out, |first, chunk| {
            if request.is_cancel_requested() {
                return Err(Error::Cancelled);
            }
            for (i, sh) in chunk.iter_mut().enumerate() {
                let index = first + i;
                let p = request.positions[index];
                let probe = request.probe_offset + index as u32;
                *sh = SphericalHarmonicsL2::ZERO;

                if samples.direct > 0 {
                    let mut sampler = Sampler::new(probe, Stream::Direct);
                    let weight = 1.0 / samples.direct as f32;
                    for light in scene.lights() {
                        let Some(ls) = light.sample_from(p) else {
                            continue;
                        };
                        for _ in 0..samples.direct {
                            let (u, v) = sampler.next_2d();
                            let dir = uniform_cone(ls.dir, ls.cone_angle, u, v);
                            let ray = tracer.spawn(p, dir);
                            if !scene.occluded(&ray, ls.distance - tracer.pushoff) {
                                sh.add_radiance(dir.into(), ls.irradiance.into(), weight);
                            }
                        }
                    }
                }

                if environment_direct {
                    let mut sampler = Sampler::new(probe, Stream::Direct);
                    let weight = SPHERE / samples.environment as f32;
                    for dir in fibonacci_sphere(samples.environment, sampler.next_f32() * TAU) {
                        let ray = tracer.spawn(p, dir);
                        if scene.closest_hit(&ray, f32::INFINITY).is_none() {
                            sh.add_radiance(dir.into(), scene.environment().radiance(dir).into(), weight);
                        }
                    }
                }

                if samples.indirect > 0 {
                    let mut sampler = Sampler::new(probe, Stream::Indirect);
                    let weight = SPHERE / samples.indirect as f32;
                    for dir in fibonacci_sphere(samples.indirect, sampler.next_f32() * TAU) {
                        let ray = tracer.spawn(p, dir);
                        if let Some(hit) = scene.closest_hit(&ray, f32::INFINITY) {
                            let l = tracer.shade(&ray, hit, &mut sampler);
                            sh.add_radiance(dir.into(), l.into(), weight);
                        }
                    }
                }
            }
            let finished = done.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
            request.report(finished, total);
            Ok(())
        })
    }

    #[tracing::instrument(skip_all, fields(probes = out.len(), rays = request.samples.indirect))]
    fn integrate_validity(&self, request: &KernelRequest<'_>, out: &mut [f32]) -> Result<()> {
        let scene = request.world.scene();
        let rays = request.samples.indirect;
        let total = out.len();
        let done = AtomicUsize::new(0);

        request.ctx.dispatch_batches(out, |first, chunk| {
            if request.is_cancel_requested() {
                return Err(Error::Cancelled);
            }
            for (i, validity) in chunk.iter_mut().enumerate() {
                let index = first + i;
                if rays == 0 {
                    *validity = 0.0;
                    continue;
                }
                let p = request.positions[index];
                let mut sampler = Sampler::new(request.probe_offset + index as u32, Stream::Validity);
                let back = fibonacci_sphere(rays, sampler.next_f32() * TAU)
                    .filter(|&dir| {
                        let ray = Ray::new(p + dir * request.pushoff, dir);
                        scene
                            .closest_hit(&ray, f32::INFINITY)
                            .is_some_and(|hit| !hit.front_face)
                    })
                    .count();
                *validity = back as f32 / rays as f32;
            }
            let finished = done.fetch_add(chunk.len(), Ordering::Relaxed) + chunk.len();
            request.report(finished, total);
            Ok(())
        })
    }
}
