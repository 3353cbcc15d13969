//! WGSL compute post-processing.
//!
//! Inputs are copied into scratch storage buffers before dispatch and the
//! result is copied out afterwards, so input and output slices may alias.

use wgpu::util::DeviceExt;

use super::reference::Sh;
use crate::device::{check_range, BufferSlice, GpuContext};
use crate::util::Result;

const SH_POSTPROCESS_WGSL: &str = include_str!("sh_postprocess.wgsl");

/// Must match `@workgroup_size` in the shader.
const WG_SIZE: u32 = 64;

/// Max workgroups per dispatch dimension guaranteed by wgpu.
const MAX_GROUPS_PER_DIM: u32 = 65_535;

const PROBE_BYTES: u64 = std::mem::size_of::<Sh>() as u64;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Params {
    probe_count: u32,
    row_stride: u32,
    _pad: [u32; 2],
}

#[derive(Clone, Copy, Debug)]
enum Op {
    Convolve,
    ConvertUnity,
    Add,
}

struct Pipelines {
    layout: wgpu::BindGroupLayout,
    convolve: wgpu::ComputePipeline,
    convert_unity: wgpu::ComputePipeline,
    add: wgpu::ComputePipeline,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sh_postprocess_shader"),
            source: wgpu::ShaderSource::Wgsl(SH_POSTPROCESS_WGSL.into()),
        });

        let storage = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sh_postprocess_bgl"),
            entries: &[
                // @binding(0) input a
                storage(0, true),
                // @binding(1) input b
                storage(1, true),
                // @binding(2) output
                storage(2, false),
                // @binding(3) params uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sh_postprocess_pl"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = |entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Self {
            convolve: pipeline("convolve"),
            convert_unity: pipeline("convert_unity"),
            add: pipeline("add"),
            layout,
        }
    }

    fn get(&self, op: Op) -> &wgpu::ComputePipeline {
        match op {
            Op::Convolve => &self.convolve,
            Op::ConvertUnity => &self.convert_unity,
            Op::Add => &self.add,
        }
    }
}

/// Post-processor running the SH kernels on the device.
#[derive(Default)]
pub struct GpuPostProcessor {
    pipelines: Option<Pipelines>,
}

impl GpuPostProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile the pipelines. Idempotent.
    pub fn initialize(&mut self, ctx: &GpuContext) -> Result<()> {
        if self.pipelines.is_none() {
            self.pipelines = Some(Pipelines::new(&ctx.gpu().device));
            tracing::debug!("GPU post-processing pipelines created");
        }
        Ok(())
    }

    pub fn convolve_radiance_to_irradiance(
        &self,
        ctx: &GpuContext,
        radiance_in: BufferSlice<Sh>,
        irradiance_out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        self.run(ctx, Op::Convolve, radiance_in, None, irradiance_out, count)
    }

    pub fn convert_to_unity_format(
        &self,
        ctx: &GpuContext,
        irradiance_in: BufferSlice<Sh>,
        irradiance_out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        self.run(ctx, Op::ConvertUnity, irradiance_in, None, irradiance_out, count)
    }

    pub fn add(
        &self,
        ctx: &GpuContext,
        a: BufferSlice<Sh>,
        b: BufferSlice<Sh>,
        out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        self.run(ctx, Op::Add, a, Some(b), out, count)
    }

    fn run(
        &self,
        ctx: &GpuContext,
        op: Op,
        a: BufferSlice<Sh>,
        b: Option<BufferSlice<Sh>>,
        out: BufferSlice<Sh>,
        count: usize,
    ) -> Result<()> {
        let Some(pipelines) = self.pipelines.as_ref() else {
            panic!("GPU post-processor used before initialize()");
        };
        if count == 0 {
            return Ok(());
        }
        let bytes = count as u64 * PROBE_BYTES;
        for slice in [Some(a), b, Some(out)].into_iter().flatten() {
            check_range(slice.id(), ctx.buffer_size(slice.id()), slice.byte_offset(), bytes);
        }

        let device = &ctx.gpu().device;
        let scratch = |label: &str, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes,
                usage: wgpu::BufferUsages::STORAGE | usage,
                mapped_at_creation: false,
            })
        };
        let scratch_a = scratch("sh_scratch_a", wgpu::BufferUsages::COPY_DST);
        let scratch_b = b.map(|_| scratch("sh_scratch_b", wgpu::BufferUsages::COPY_DST));
        let scratch_out = scratch("sh_scratch_out", wgpu::BufferUsages::COPY_SRC);

        let groups = (count as u32).div_ceil(WG_SIZE);
        let groups_x = groups.min(MAX_GROUPS_PER_DIM);
        let groups_y = groups.div_ceil(groups_x);
        let params = Params {
            probe_count: count as u32,
            row_stride: groups_x * WG_SIZE,
            _pad: [0; 2],
        };
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sh_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sh_postprocess_bg"),
            layout: &pipelines.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: scratch_a.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    // Unary kernels never read binding 1
                    resource: scratch_b.as_ref().unwrap_or(&scratch_a).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: scratch_out.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sh_postprocess"),
        });
        ctx.with_buffer(a.id(), |src| {
            encoder.copy_buffer_to_buffer(&src.buffer, a.byte_offset(), &scratch_a, 0, bytes)
        });
        if let (Some(b), Some(scratch_b)) = (b, scratch_b.as_ref()) {
            ctx.with_buffer(b.id(), |src| {
                encoder.copy_buffer_to_buffer(&src.buffer, b.byte_offset(), scratch_b, 0, bytes)
            });
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("sh_postprocess_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipelines.get(op));
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        ctx.with_buffer(out.id(), |dst| {
            encoder.copy_buffer_to_buffer(&scratch_out, 0, &dst.buffer, out.byte_offset(), bytes)
        });

        let event = ctx.submit(Some(encoder.finish()));
        ctx.wait(event)?;
        tracing::trace!(?op, probes = count, "GPU SH kernel finished");
        Ok(())
    }
}
