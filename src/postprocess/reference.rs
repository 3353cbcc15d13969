//! Host-side SH post-processing, one probe at a time.

use sh_l2::SphericalHarmonicsL2;

use crate::device::{BufferSlice, DeviceContext};
use crate::util::Result;

pub(crate) type Sh = SphericalHarmonicsL2;

/// Read `count` probes and wait for them.
pub(crate) fn read_probes(ctx: &DeviceContext, src: BufferSlice<Sh>, count: usize) -> Result<Vec<Sh>> {
    let mut probes = vec![Sh::ZERO; count];
    ctx.read_now(src, &mut probes)?;
    Ok(probes)
}

pub(crate) fn write_probes(ctx: &DeviceContext, dst: BufferSlice<Sh>, probes: &[Sh]) -> Result<()> {
    ctx.write_now(dst, probes)
}

/// Single-threaded post-processor.
#[derive(Debug, Default)]
pub struct ReferencePostProcessor;

impl ReferencePostProcessor {
    /// Read `input`, map every probe with `f`, write to `output`.
    fn map(
        &self,
        ctx: &DeviceContext,
        input: BufferSlice<Sh>,
        output: BufferSlice<Sh>,
        count: usize,
        f: fn(&Sh) -> Sh,
    ) -> Result<()> {
        let mut probes = read_probes(ctx, input, count)?;
        for probe in probes.iter_mut() {
            *probe = f(probe);
        }
        write_probes(ctx, output, &probes)
    }

    pub fn convolve_radiance_to_irradiance(
        &self,
        ctx: &DeviceContext,
        radiance_in: BufferSlice<Sh>,
        irradiance_out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        self.map(ctx, radiance_in, irradiance_out, count, sh_l2::convolve_radiance_to_irradiance)
    }

    pub fn convert_to_unity_format(
        &self,
        ctx: &DeviceContext,
        irradiance_in: BufferSlice<Sh>,
        irradiance_out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        self.map(ctx, irradiance_in, irradiance_out, count, sh_l2::convert_to_unity_format)
    }

    pub fn add(
        &self,
        ctx: &DeviceContext,
        a: BufferSlice<Sh>,
        b: BufferSlice<Sh>,
        out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        let mut sums = read_probes(ctx, a, count)?;
        let rhs = read_probes(ctx, b, count)?;
        for (sum, rhs) in sums.iter_mut().zip(&rhs) {
            *sum = sh_l2::add(sum, rhs);
        }
        write_probes(ctx, out, &sums)
    }
}
