//! Math type re-exports and small sampling helpers.

// Re-export glam types
pub use glam::{Mat3, Mat4, Vec2, Vec3, Vec3A, Vec4};

use std::f32::consts::PI;

/// Build an orthonormal basis `(tangent, bitangent)` around unit vector `n`.
///
/// Branchless construction (Duff et al. 2017).
#[inline]
pub fn orthonormal_basis(n: Vec3) -> (Vec3, Vec3) {
    let sign = 1.0f32.copysign(n.z);
    let a = -1.0 / (sign + n.z);
    let b = n.x * n.y * a;
    (
        Vec3::new(1.0 + sign * n.x * n.x * a, sign * b, -sign * n.x),
        Vec3::new(b, sign + n.y * n.y * a, -n.y),
    )
}

/// Cosine-weighted direction in the hemisphere around `n`.
#[inline]
pub fn cosine_hemisphere(n: Vec3, u: f32, v: f32) -> Vec3 {
    let r = u.sqrt();
    let phi = 2.0 * PI * v;
    let (t, b) = orthonormal_basis(n);
    let local_z = (1.0 - u).max(0.0).sqrt();
    (t * (r * phi.cos()) + b * (r * phi.sin()) + n * local_z).normalize()
}

/// Direction inside a cone of half-angle `angle` around unit vector `axis`.
#[inline]
pub fn uniform_cone(axis: Vec3, angle: f32, u: f32, v: f32) -> Vec3 {
    if angle <= 0.0 {
        return axis;
    }
    let cos_max = angle.cos();
    let cos_theta = 1.0 - u * (1.0 - cos_max);
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = 2.0 * PI * v;
    let (t, b) = orthonormal_basis(axis);
    (t * (sin_theta * phi.cos()) + b * (sin_theta * phi.sin()) + axis * cos_theta).normalize()
}
