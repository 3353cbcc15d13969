//! L2 spherical harmonics for light probes.
//!
//! A coefficient set holds 9 real SH coefficients (bands 0..=2) for each of
//! the three color channels. Per channel the order is
//! `L00, L1-1, L10, L11, L2-2, L2-1, L20, L21, L22`, i.e. the L1 band is stored
//! as `(y, z, x)`.
//!
//! The free functions in this crate are the per-probe transforms the bake
//! post-processors run, whatever device executes them:
//!
//! - [`convolve_radiance_to_irradiance`] - cosine-lobe convolution
//! - [`convert_to_unity_format`] - engine shader normalization
//! - [`add`] - accumulation

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::ops::{Add, AddAssign, Index, IndexMut, Mul};

/// Number of coefficients per color channel.
pub const COEFFICIENT_COUNT: usize = 9;

/// Number of color channels.
pub const CHANNEL_COUNT: usize = 3;

/// Number of floats in one coefficient set.
pub const FLOAT_COUNT: usize = COEFFICIENT_COUNT * CHANNEL_COUNT;

/// Real SH basis constants.
pub mod basis {
    /// `0.5 * sqrt(1/pi)`
    pub const Y00: f32 = 0.282_094_8;
    /// `0.5 * sqrt(3/pi)`
    pub const Y1: f32 = 0.488_602_5;
    /// `0.5 * sqrt(15/pi)`
    pub const Y2_XY: f32 = 1.092_548_4;
    /// `0.25 * sqrt(5/pi)`
    pub const Y20: f32 = 0.315_391_57;
    /// `0.25 * sqrt(15/pi)`
    pub const Y22: f32 = 0.546_274_2;
}

/// Lambertian convolution factor for band 0.
pub const CONVOLVE_L0: f32 = PI;
/// Lambertian convolution factor for band 1.
pub const CONVOLVE_L1: f32 = 2.0 * PI / 3.0;
/// Lambertian convolution factor for band 2.
pub const CONVOLVE_L2: f32 = PI / 4.0;

/// `sqrt(15) / (8 * sqrt(pi))`, applied to L2-2, L2-1 and L21.
pub const F_C2: f32 = 0.273_137_1;
/// `sqrt(5) / (16 * sqrt(pi))`, applied to L20.
pub const F_C3: f32 = 0.078_847_89;
/// `F_C2 / 2`, applied to L22.
pub const F_C4: f32 = F_C2 * 0.5;

/// L2 spherical harmonics coefficients for RGB.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable, Serialize, Deserialize)]
pub struct SphericalHarmonicsL2 {
    /// `coefficients[channel][index]`
    pub coefficients: [[f32; COEFFICIENT_COUNT]; CHANNEL_COUNT],
}

impl SphericalHarmonicsL2 {
    /// All coefficients zero.
    pub const ZERO: Self = Self {
        coefficients: [[0.0; COEFFICIENT_COUNT]; CHANNEL_COUNT],
    };

    /// Build from per-channel coefficient arrays.
    #[inline]
    pub const fn new(coefficients: [[f32; COEFFICIENT_COUNT]; CHANNEL_COUNT]) -> Self {
        Self { coefficients }
    }

    /// Coefficients as one flat array (channel-major).
    #[inline]
    pub fn as_flat(&self) -> &[f32; FLOAT_COUNT] {
        bytemuck::cast_ref(self)
    }

    /// Mutable flat view (channel-major).
    #[inline]
    pub fn as_flat_mut(&mut self) -> &mut [f32; FLOAT_COUNT] {
        bytemuck::cast_mut(self)
    }

    /// True if every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.as_flat().iter().all(|c| c.is_finite())
    }

    /// Accumulate `rgb * weight` arriving from unit direction `dir`.
    #[inline]
    pub fn add_radiance(&mut self, dir: [f32; 3], rgb: [f32; 3], weight: f32) {
        let y = evaluate_basis(dir);
        for (channel, &c) in rgb.iter().enumerate() {
            let w = c * weight;
            if w == 0.0 {
                continue;
            }
            for (coef, basis) in self.coefficients[channel].iter_mut().zip(y.iter()) {
                *coef += w * basis;
            }
        }
    }

    /// Reconstruct the function in unit direction `dir`.
    pub fn evaluate(&self, dir: [f32; 3]) -> [f32; 3] {
        let y = evaluate_basis(dir);
        let mut out = [0.0f32; 3];
        for (channel, value) in out.iter_mut().enumerate() {
            *value = self.coefficients[channel]
                .iter()
                .zip(y.iter())
                .map(|(c, b)| c * b)
                .sum();
        }
        out
    }
}

impl Index<(usize, usize)> for SphericalHarmonicsL2 {
    type Output = f32;

    /// Index by `(channel, coefficient)`.
    #[inline]
    fn index(&self, (channel, coefficient): (usize, usize)) -> &f32 {
        &self.coefficients[channel][coefficient]
    }
}

impl IndexMut<(usize, usize)> for SphericalHarmonicsL2 {
    #[inline]
    fn index_mut(&mut self, (channel, coefficient): (usize, usize)) -> &mut f32 {
        &mut self.coefficients[channel][coefficient]
    }
}

impl Add for SphericalHarmonicsL2 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        add(&self, &rhs)
    }
}

impl AddAssign for SphericalHarmonicsL2 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = add(self, &rhs);
    }
}

impl Mul<f32> for SphericalHarmonicsL2 {
    type Output = Self;

    fn mul(mut self, rhs: f32) -> Self {
        for c in self.as_flat_mut() {
            *c *= rhs;
        }
        self
    }
}

/// Evaluate the 9 real SH basis functions in unit direction `dir`.
#[inline]
pub fn evaluate_basis(dir: [f32; 3]) -> [f32; COEFFICIENT_COUNT] {
    let [x, y, z] = dir;
    [
        basis::Y00,
        basis::Y1 * y,
        basis::Y1 * z,
        basis::Y1 * x,
        basis::Y2_XY * x * y,
        basis::Y2_XY * y * z,
        basis::Y20 * (3.0 * z * z - 1.0),
        basis::Y2_XY * x * z,
        basis::Y22 * (x * x - y * y),
    ]
}

/// Band (0, 1 or 2) of a coefficient index.
#[inline]
pub const fn band_of(coefficient: usize) -> usize {
    match coefficient {
        0 => 0,
        1..=3 => 1,
        _ => 2,
    }
}

/// Convolve radiance with the clamped cosine lobe (Ramamoorthi & Hanrahan).
pub fn convolve_radiance_to_irradiance(radiance: &SphericalHarmonicsL2) -> SphericalHarmonicsL2 {
    const BAND_SCALE: [f32; 3] = [CONVOLVE_L0, CONVOLVE_L1, CONVOLVE_L2];

    let mut out = *radiance;
    for channel in out.coefficients.iter_mut() {
        for (i, c) in channel.iter_mut().enumerate() {
            *c *= BAND_SCALE[band_of(i)];
        }
    }
    out
}

/// Re-express irradiance in the engine's shader convention.
///
/// L0 and L1 are scaled by their basis normalization and divided by pi. L1 is
/// read as `(y, z, x)` and written as `(x, y, z)`. L2 uses the folded
/// constants [`F_C2`], [`F_C3`] and [`F_C4`] and is not divided by pi.
pub fn convert_to_unity_format(irradiance: &SphericalHarmonicsL2) -> SphericalHarmonicsL2 {
    const K0: f32 = basis::Y00 / PI;
    const K1: f32 = basis::Y1 / PI;

    let mut out = SphericalHarmonicsL2::ZERO;
    for (dst, src) in out.coefficients.iter_mut().zip(irradiance.coefficients.iter()) {
        dst[0] = src[0] * K0;

        let (l1_y, l1_z, l1_x) = (src[1], src[2], src[3]);
        dst[1] = l1_x * K1;
        dst[2] = l1_y * K1;
        dst[3] = l1_z * K1;

        dst[4] = src[4] * F_C2;
        dst[5] = src[5] * F_C2;
        dst[6] = src[6] * F_C3;
        dst[7] = src[7] * F_C2;
        dst[8] = src[8] * F_C4;
    }
    out
}

/// Per-channel, per-coefficient sum.
#[inline]
pub fn add(a: &SphericalHarmonicsL2, b: &SphericalHarmonicsL2) -> SphericalHarmonicsL2 {
    let mut out = *a;
    for (o, v) in out.as_flat_mut().iter_mut().zip(b.as_flat().iter()) {
        *o += v;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> SphericalHarmonicsL2 {
        let mut sh = SphericalHarmonicsL2::ZERO;
        for (i, c) in sh.as_flat_mut().iter_mut().enumerate() {
            *c = i as f32 * 0.25 - 3.0;
        }
        sh
    }

    #[test]
    fn test_constants() {
        let sqrt_pi = PI.sqrt();
        assert!((F_C2 - 15f32.sqrt() / (8.0 * sqrt_pi)).abs() < 1e-6);
        assert!((F_C3 - 5f32.sqrt() / (16.0 * sqrt_pi)).abs() < 1e-6);
        assert!((basis::Y00 - 0.5 * (1.0 / PI).sqrt()).abs() < 1e-6);
        assert!((basis::Y1 - 0.5 * (3.0 / PI).sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_layout_is_27_floats() {
        assert_eq!(std::mem::size_of::<SphericalHarmonicsL2>(), FLOAT_COUNT * 4);
        let sh = ramp();
        assert_eq!(sh.as_flat()[COEFFICIENT_COUNT], sh[(1, 0)]);
    }

    #[test]
    fn test_convolve_band_factors() {
        let mut sh = SphericalHarmonicsL2::ZERO;
        sh.coefficients[1] = [1.0; COEFFICIENT_COUNT];
        let out = convolve_radiance_to_irradiance(&sh);
        assert_eq!(out[(1, 0)], PI);
        for i in 1..4 {
            assert_eq!(out[(1, i)], 2.0 * PI / 3.0);
        }
        for i in 4..9 {
            assert_eq!(out[(1, i)], PI / 4.0);
        }
        assert_eq!(out.coefficients[0], [0.0; COEFFICIENT_COUNT]);
    }

    #[test]
    fn test_constant_radiance_gives_pi_irradiance() {
        // Project L = 1 from a dense set of directions.
        let mut sh = SphericalHarmonicsL2::ZERO;
        let n = 4096;
        let golden = (1.0 + 5f32.sqrt()) / 2.0;
        for i in 0..n {
            let z = 1.0 - 2.0 * (i as f32 + 0.5) / n as f32;
            let r = (1.0 - z * z).sqrt();
            let phi = 2.0 * PI * i as f32 / golden;
            sh.add_radiance([r * phi.cos(), r * phi.sin(), z], [1.0; 3], 4.0 * PI / n as f32);
        }
        let irradiance = convolve_radiance_to_irradiance(&sh);
        let e = irradiance.evaluate([0.0, 1.0, 0.0]);
        assert!((e[0] - PI).abs() < 1e-2, "irradiance {}", e[0]);

        let unity = convert_to_unity_format(&irradiance);
        assert!((unity[(2, 0)] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_unity_format_l1_reorder() {
        let mut sh = SphericalHarmonicsL2::ZERO;
        // y, z, x
        sh.coefficients[0][1] = 1.0;
        sh.coefficients[0][2] = 2.0;
        sh.coefficients[0][3] = 3.0;
        let out = convert_to_unity_format(&sh);
        let k1 = basis::Y1 / PI;
        assert!((out[(0, 1)] - 3.0 * k1).abs() < 1e-7);
        assert!((out[(0, 2)] - 1.0 * k1).abs() < 1e-7);
        assert!((out[(0, 3)] - 2.0 * k1).abs() < 1e-7);
    }

    #[test]
    fn test_unity_format_l2_not_divided_by_pi() {
        let mut sh = SphericalHarmonicsL2::ZERO;
        for c in 4..9 {
            sh.coefficients[2][c] = 1.0;
        }
        let out = convert_to_unity_format(&sh);
        assert_eq!(out.coefficients[2][4..], [F_C2, F_C2, F_C3, F_C2, F_C4]);
    }

    #[test]
    fn test_add_commutes() {
        let a = ramp();
        let b = ramp() * -0.5;
        assert_eq!(add(&a, &b), add(&b, &a));
        assert_eq!((a + b)[(2, 8)], a[(2, 8)] + b[(2, 8)]);
    }

    #[test]
    fn test_zero_stays_zero() {
        let zero = SphericalHarmonicsL2::ZERO;
        assert_eq!(convolve_radiance_to_irradiance(&zero), zero);
        assert_eq!(convert_to_unity_format(&zero), zero);
    }
}
