// SPDX-License-Identifier: AGPL-3.0-or-later
//! WGSL chain-stencil variants on [`WgpuDevice`].
//!
//! Both variants share one shader module and bind group layout. Setup
//! uploads the two neighbour tables and the uniform parameters once; `run`
//! only builds a bind group over the caller's fields and submits.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use super::{not_set_up, ChainPlan, ChainStencil, KernelArgs, KernelVariant, StencilBackend};
use crate::device::{scoped, WgpuDevice, WgpuField, WgpuStream};
use crate::error::{Error, Result};
use crate::mesh::{Connectivity, Topology};

const CHAIN_WGSL: &str = include_str!("../shaders/chain_stencil.wgsl");
const WORKGROUP: u32 = 256;
const MAX_GROUPS_X: u32 = 65_535;
const AUX_SLOTS: usize = 4;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ChainParams {
    outer_begin: u32,
    outer_end: u32,
    outer_count: u32,
    mid_count: u32,
    inner_count: u32,
    fan_outer: u32,
    fan_inner: u32,
    levels: u32,
    mode: u32,
    _pad: [u32; 3],
}

fn to_u32(what: &str, v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::Kernel(format!("{what} = {v} exceeds u32 indexing")))
}

impl ChainParams {
    fn from_plan(plan: &ChainPlan) -> Result<Self> {
        // largest flat index any entry point forms
        let widest = plan.n_mid.max(plan.n_outer).max(plan.n_inner)
            * plan.levels
            * plan.inner_nbr.fan_out.max(1);
        to_u32("flattened field size", widest)?;
        Ok(Self {
            outer_begin: to_u32("range start", plan.range.start)?,
            outer_end: to_u32("range end", plan.range.end)?,
            outer_count: to_u32("outer count", plan.n_outer)?,
            mid_count: to_u32("middle count", plan.n_mid)?,
            inner_count: to_u32("inner count", plan.n_inner)?,
            fan_outer: to_u32("outer fan-out", plan.outer_nbr.fan_out)?,
            fan_inner: to_u32("inner fan-out", plan.inner_nbr.fan_out)?,
            levels: to_u32("levels", plan.levels)?,
            mode: plan.stencil.reduction.mode(),
            _pad: [0; 3],
        })
    }
}

fn bgl_entry(binding: u32, ty: wgpu::BufferBindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// Split `invocations` into a 2-D grid the shaders flatten back.
fn grid(invocations: u32) -> (u32, u32) {
    let groups = invocations.div_ceil(WORKGROUP);
    if groups <= MAX_GROUPS_X {
        (groups, 1)
    } else {
        (MAX_GROUPS_X, groups.div_ceil(MAX_GROUPS_X))
    }
}

/// Device resources shared by both variants once set up.
struct Pipelines {
    plan: ChainPlan,
    bgl: wgpu::BindGroupLayout,
    passes: Vec<(wgpu::ComputePipeline, u32)>,
    params: wgpu::Buffer,
    outer_nbr: wgpu::Buffer,
    inner_nbr: wgpu::Buffer,
    spare_read: wgpu::Buffer,
    tmp: wgpu::Buffer,
}

impl Pipelines {
    fn build(
        stencil: ChainStencil,
        topology: &Topology,
        level_count: usize,
        stream: &WgpuStream,
        entries: &[&'static str],
        with_tmp: bool,
    ) -> Result<Self> {
        let plan = ChainPlan::new(stencil, topology, level_count)?;
        let params = ChainParams::from_plan(&plan)?;
        let device = stream.device();
        let (pipelines, caught) = scoped(device, wgpu::ErrorFilter::Validation, || {
            Self::create(device, plan, &params, entries, with_tmp)
        });
        match caught {
            Some(e) => Err(Error::Kernel(format!("{stencil}: pipeline setup: {e}"))),
            None => Ok(pipelines),
        }
    }

    fn create(
        device: &wgpu::Device,
        plan: ChainPlan,
        params: &ChainParams,
        entries: &[&'static str],
        with_tmp: bool,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("chain stencil"),
            source: wgpu::ShaderSource::Wgsl(CHAIN_WGSL.into()),
        });

        let read_only = wgpu::BufferBindingType::Storage { read_only: true };
        let read_write = wgpu::BufferBindingType::Storage { read_only: false };
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("chain stencil BGL"),
            entries: &[
                bgl_entry(0, wgpu::BufferBindingType::Uniform),
                bgl_entry(1, read_only),
                bgl_entry(2, read_only),
                bgl_entry(3, read_only),
                bgl_entry(4, read_only),
                bgl_entry(5, read_only),
                bgl_entry(6, read_only),
                bgl_entry(7, read_only),
                bgl_entry(8, read_write),
                bgl_entry(9, read_write),
            ],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("chain stencil PL"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let span = params.outer_end - params.outer_begin;
        let passes = entries
            .iter()
            .map(|&entry| {
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(entry),
                    layout: Some(&layout),
                    module: &shader,
                    entry_point: entry,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
                let invocations = if entry == "chain_stage_inner" {
                    params.mid_count * params.levels
                } else {
                    span * params.levels
                };
                (pipeline, invocations)
            })
            .collect();

        let table = |label: &str, conn: &Connectivity| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&conn.table),
                usage: wgpu::BufferUsages::STORAGE,
            })
        };
        let outer_nbr = table("outer neighbours", &plan.outer_nbr);
        let inner_nbr = table("inner neighbours", &plan.inner_nbr);
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("chain params"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let scratch = |label: &str, bytes: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: bytes.max(8),
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        let spare_read = scratch("unused aux slot", 8);
        let tmp_bytes = if with_tmp {
            (plan.n_mid * plan.levels) as u64 * 8
        } else {
            8
        };
        let tmp = scratch("middle temporary", tmp_bytes);

        tracing::debug!(
            stencil = %plan.stencil,
            levels = plan.levels,
            tmp_bytes,
            "chain stencil pipelines ready"
        );
        Self {
            plan,
            bgl,
            passes,
            params,
            outer_nbr,
            inner_nbr,
            spare_read,
            tmp,
        }
    }

    fn dispatch(&self, args: &KernelArgs<'_, WgpuField>, stream: &WgpuStream) -> Result<()> {
        self.plan.check_args(args)?;
        let device = stream.device();

        let ((), caught) = scoped(device, wgpu::ErrorFilter::Validation, || {
            let aux: Vec<&wgpu::Buffer> = (0..AUX_SLOTS)
                .map(|s| args.aux.get(s).map_or(&self.spare_read, WgpuField::buffer))
                .collect();
            let entry = |binding: u32, buffer: &wgpu::Buffer| wgpu::BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            };
            let bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("chain stencil BG"),
                layout: &self.bgl,
                entries: &[
                    entry(0, &self.params),
                    entry(1, args.input.buffer()),
                    entry(2, &self.outer_nbr),
                    entry(3, &self.inner_nbr),
                    entry(4, aux[0]),
                    entry(5, aux[1]),
                    entry(6, aux[2]),
                    entry(7, aux[3]),
                    entry(8, args.output.buffer()),
                    entry(9, &self.tmp),
                ],
            });

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("chain stencil"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("chain stencil"),
                    timestamp_writes: None,
                });
                pass.set_bind_group(0, &bg, &[]);
                for (pipeline, invocations) in &self.passes {
                    if *invocations == 0 {
                        continue;
                    }
                    let (x, y) = grid(*invocations);
                    pass.set_pipeline(pipeline);
                    pass.dispatch_workgroups(x, y, 1);
                }
            }
            stream.queue().submit(Some(encoder.finish()));
        });
        match caught {
            Some(e) => Err(Error::Kernel(format!("{}: dispatch: {e}", self.plan.stencil))),
            None => Ok(()),
        }
    }
}

/// `chain_fused` in a single dispatch.
pub struct WgpuInlined {
    stencil: ChainStencil,
    pipelines: Option<Pipelines>,
}

impl WgpuInlined {
    /// Variant for `stencil`; call `setup` before `run`.
    #[must_use]
    pub const fn new(stencil: ChainStencil) -> Self {
        Self {
            stencil,
            pipelines: None,
        }
    }
}

impl KernelVariant<WgpuDevice> for WgpuInlined {
    fn name(&self) -> &'static str {
        "inlined"
    }

    fn setup(
        &mut self,
        topology: &Topology,
        level_count: usize,
        stream: &WgpuStream,
    ) -> Result<()> {
        self.pipelines = Some(Pipelines::build(
            self.stencil,
            topology,
            level_count,
            stream,
            &["chain_fused"],
            false,
        )?);
        Ok(())
    }

    fn run(&self, args: &KernelArgs<'_, WgpuField>, stream: &WgpuStream) -> Result<()> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| not_set_up(self.name(), self.stencil))?
            .dispatch(args, stream)
    }
}

/// `chain_stage_inner` then `chain_stage_outer` through a device temporary.
pub struct WgpuSequential {
    stencil: ChainStencil,
    pipelines: Option<Pipelines>,
}

impl WgpuSequential {
    /// Variant for `stencil`; call `setup` before `run`.
    #[must_use]
    pub const fn new(stencil: ChainStencil) -> Self {
        Self {
            stencil,
            pipelines: None,
        }
    }
}

impl KernelVariant<WgpuDevice> for WgpuSequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn setup(
        &mut self,
        topology: &Topology,
        level_count: usize,
        stream: &WgpuStream,
    ) -> Result<()> {
        self.pipelines = Some(Pipelines::build(
            self.stencil,
            topology,
            level_count,
            stream,
            &["chain_stage_inner", "chain_stage_outer"],
            true,
        )?);
        Ok(())
    }

    fn run(&self, args: &KernelArgs<'_, WgpuField>, stream: &WgpuStream) -> Result<()> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| not_set_up(self.name(), self.stencil))?
            .dispatch(args, stream)
    }
}

impl StencilBackend for WgpuDevice {
    fn inlined(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>> {
        Box::new(WgpuInlined::new(stencil))
    }

    fn sequential(&self, stencil: ChainStencil) -> Box<dyn KernelVariant<Self>> {
        Box::new(WgpuSequential::new(stencil))
    }
}
