//! Batched SH post-processing on the job context's pool.

use super::reference::{read_probes, write_probes, Sh};
use crate::device::{BufferSlice, DeviceContext};
use crate::util::Result;

/// Post-processor fanning probes out in context-sized batches.
#[derive(Debug, Default)]
pub struct JobPostProcessor;

impl JobPostProcessor {
    fn map(
        &self,
        ctx: &DeviceContext,
        input: BufferSlice<Sh>,
        output: BufferSlice<Sh>,
        count: usize,
        f: fn(&Sh) -> Sh,
    ) -> Result<()> {
        let mut probes = read_probes(ctx, input, count)?;
        ctx.dispatch_batches(&mut probes, |_, batch| {
            for probe in batch.iter_mut() {
                *probe = f(probe);
            }
            Ok(())
        })?;
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
        ctx.dispatch_batches(&mut sums, |first, batch| {
            for (i, sum) in batch.iter_mut().enumerate() {
                *sum = sh_l2::add(sum, &rhs[first + i]);
            }
            Ok(())
        })?;
        write_probes(ctx, out, &sums)
    }
}
