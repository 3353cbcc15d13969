//! Scene description consumed by the built-in kernel.

use serde::{Deserialize, Serialize};

use super::build::build_bvh;
use super::bvh::{Bvh, Hit, Ray, Triangle};
use crate::util::Vec3;

/// Lambertian surface with optional emission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub albedo: Vec3,
    pub emission: Vec3,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            albedo: Vec3::splat(0.5),
            emission: Vec3::ZERO,
        }
    }
}

/// Analytic light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Light {
    /// Light arriving from `-direction`.
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
        /// Angular radius in radians
        #[serde(default)]
        radius: f32,
    },
    Point {
        position: Vec3,
        color: Vec3,
        intensity: f32,
        /// Sphere radius in world units
        #[serde(default)]
        radius: f32,
    },
}

/// Sample of a light as seen from a shading point.
#[derive(Debug, Clone, Copy)]
pub struct LightSample {
    /// Unit direction towards the light center
    pub dir: Vec3,
    /// Half-angle of the cone the light subtends
    pub cone_angle: f32,
    /// Distance to test for occlusion
    pub distance: f32,
    /// Irradiance on a surface facing the light
    pub irradiance: Vec3,
}

impl Light {
    /// Light as seen from `p`, or `None` if `p` is inside a point light.
    pub fn sample_from(&self, p: Vec3) -> Option<LightSample> {
        match *self {
            Light::Directional {
                direction,
                color,
                intensity,
                radius,
            } => Some(LightSample {
                dir: (-direction).normalize_or_zero(),
                cone_angle: radius.max(0.0),
                distance: f32::INFINITY,
                irradiance: color * intensity,
            }),
            Light::Point {
                position,
                color,
                intensity,
                radius,
            } => {
                let to = position - p;
                let d2 = to.length_squared();
                let d = d2.sqrt();
                if d <= radius.max(1e-6) {
                    return None;
                }
                Some(LightSample {
                    dir: to / d,
                    cone_angle: (radius.max(0.0) / d).min(1.0).asin(),
                    distance: d - radius.max(0.0),
                    irradiance: color * (intensity / d2),
                })
            }
        }
    }
}

/// Two-tone sky/ground environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub sky: Vec3,
    pub ground: Vec3,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            sky: Vec3::ZERO,
            ground: Vec3::ZERO,
        }
    }
}

impl Environment {
    /// Constant radiance in every direction.
    pub fn uniform(radiance: Vec3) -> Self {
        Self {
            sky: radiance,
            ground: radiance,
        }
    }

    /// Radiance arriving from unit direction `dir`, blended on `dir.y`.
    #[inline]
    pub fn radiance(&self, dir: Vec3) -> Vec3 {
        let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
        self.ground.lerp(self.sky, t)
    }
}

/// Triangles, BVH, materials, lights and environment of one prepared scene.
#[derive(Debug, Clone)]
pub struct SceneAccel {
    triangles: Vec<Triangle>,
    bvh: Bvh,
    materials: Vec<Material>,
    lights: Vec<Light>,
    environment: Environment,
}

impl SceneAccel {
    /// Build the BVH and reorder `triangles` to match its leaves.
    ///
    /// Material indices must be valid for `materials`.
    pub fn build(
        triangles: Vec<Triangle>,
        materials: Vec<Material>,
        lights: Vec<Light>,
        environment: Environment,
    ) -> Self {
        debug_assert!(triangles
            .iter()
            .all(|t| (t.material as usize) < materials.len()));
        let (bvh, order) = build_bvh(&triangles);
        let triangles = order.into_iter().map(|i| triangles[i]).collect();
        Self {
            triangles,
            bvh,
            materials,
            lights,
            environment,
        }
    }

    pub fn triangles(&self) -> &[Triangle] {
        &self.triangles
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn node_count(&self) -> usize {
        self.bvh.nodes.len()
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Material of the triangle a hit refers to.
    pub fn material(&self, hit: &Hit) -> &Material {
        &self.materials[self.triangles[hit.triangle as usize].material as usize]
    }

    /// Geometric normal of the hit triangle, facing the ray.
    pub fn shading_normal(&self, hit: &Hit) -> Vec3 {
        let n = self.triangles[hit.triangle as usize].normal();
        if hit.front_face {
            n
        } else {
            -n
        }
    }

    #[inline]
    pub fn closest_hit(&self, ray: &Ray, t_max: f32) -> Option<Hit> {
        self.bvh.closest_hit(&self.triangles, ray, t_max)
    }

    #[inline]
    pub fn occluded(&self, ray: &Ray, t_max: f32) -> bool {
        self.bvh.occluded(&self.triangles, ray, t_max)
    }
}
