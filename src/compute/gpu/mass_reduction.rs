//! GPU mass reduction with double-buffered staging readback.

use std::sync::mpsc::{self, Receiver, TryRecvError};

use super::GpuError;
use crate::compute::{MassError, MassReducer, READBACK_SLOTS, ReadbackToken};

const MASS_REDUCE_SHADER: &str = include_str!("shaders/mass_reduce.wgsl");

/// Workgroup size of the reduction shader.
const BLOCK: usize = 256;
/// Maximum workgroups in one dispatch dimension.
const MAX_GROUPS: usize = 65_535;

/// Uniform buffer struct for the reduction shader.
#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
struct ReduceParams {
    len: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct ReducePass {
    bind_group: wgpu::BindGroup,
    groups: u32,
}

type MapResult = Result<(), wgpu::BufferAsyncError>;

enum StagingSlot {
    Idle,
    InFlight {
        generation: u64,
        rx: Receiver<MapResult>,
    },
}

/// Mass reducer running the block reduction on the GPU.
///
/// Each pass collapses 256 cells into one partial sum until a single value
/// remains; that value is copied into one of two staging buffers and mapped
/// asynchronously.
pub struct GpuMassReducer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    len: usize,
    field_buffer: wgpu::Buffer,
    /// Partial sums per pass; the last level holds one value.
    levels: Vec<wgpu::Buffer>,
    passes: Vec<ReducePass>,
    staging: [wgpu::Buffer; READBACK_SLOTS],
    slots: [StagingSlot; READBACK_SLOTS],
    next_generation: u64,
}

impl GpuMassReducer {
    /// Create a reducer for fields of `len` cells.
    pub async fn new(len: usize) -> Result<Self, GpuError> {
        let max = BLOCK * MAX_GROUPS;
        if len == 0 || len > max {
            return Err(GpuError::TooLarge { len, max });
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Mass Reduction"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            })
            .await?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Mass Reduce Shader"),
            source: wgpu::ShaderSource::Wgsl(MASS_REDUCE_SHADER.into()),
        });
        let bind_group_layout = create_reduce_bind_group_layout(&device);
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mass Reduce Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            ..Default::default()
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Mass Reduce Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        let f32_size = std::mem::size_of::<f32>() as u64;
        let field_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Mass Field"),
            size: len as u64 * f32_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Level sizes shrink by BLOCK each pass until one value remains
        let mut levels = Vec::new();
        let mut passes = Vec::new();
        let mut n = len;
        loop {
            let groups = n.div_ceil(BLOCK);
            let output = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Mass Partials"),
                size: groups as u64 * f32_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            });

            let params = ReduceParams {
                len: n as u32,
                _pad0: 0,
                _pad1: 0,
                _pad2: 0,
            };
            let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Mass Reduce Params"),
                size: std::mem::size_of::<ReduceParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            queue.write_buffer(&params_buffer, 0, bytemuck::bytes_of(&params));

            let input = levels.last().unwrap_or(&field_buffer);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Mass Reduce Bind Group"),
                layout: &bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: input.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: output.as_entire_binding(),
                    },
                ],
            });

            passes.push(ReducePass {
                bind_group,
                groups: groups as u32,
            });
            levels.push(output);

            if groups == 1 {
                break;
            }
            n = groups;
        }

        let staging = std::array::from_fn(|_| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Mass Staging"),
                size: f32_size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        log::debug!("gpu mass reducer: {} cells, {} passes", len, passes.len());

        Ok(Self {
            device,
            queue,
            pipeline,
            len,
            field_buffer,
            levels,
            passes,
            staging,
            slots: std::array::from_fn(|_| StagingSlot::Idle),
            next_generation: 0,
        })
    }

    /// Number of cells this reducer accepts.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn finish(&mut self, token: ReadbackToken, blocking: bool) -> Result<Option<f32>, MassError> {
        let index = token.slot();
        let slot = self.slots.get_mut(index).ok_or(MassError::UnknownToken)?;
        let StagingSlot::InFlight { generation, rx } = slot else {
            return Err(MassError::UnknownToken);
        };
        if *generation != token.generation() {
            return Err(MassError::UnknownToken);
        }

        let poll_type = if blocking {
            wgpu::PollType::wait_indefinitely()
        } else {
            wgpu::PollType::Poll
        };
        self.device
            .poll(poll_type)
            .map_err(|e| GpuError::Poll(e.to_string()))?;

        let mapped = match rx.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) if !blocking => return Ok(None),
            Err(TryRecvError::Empty) => rx.recv().map_err(|_| MassError::Disconnected)?,
            Err(TryRecvError::Disconnected) => {
                *slot = StagingSlot::Idle;
                return Err(MassError::Disconnected);
            }
        };
        *slot = StagingSlot::Idle;
        mapped.map_err(GpuError::from)?;

        let staging = &self.staging[index];
        let mass = {
            let data = staging.slice(..).get_mapped_range();
            let values: &[f32] = bytemuck::cast_slice(&data);
            values.first().copied().unwrap_or(0.0)
        };
        staging.unmap();

        log::debug!(
            "gpu mass readback {}#{} complete: {}",
            index,
            token.generation(),
            mass
        );
        Ok(Some(mass))
    }
}

impl MassReducer for GpuMassReducer {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn request(&mut self, field: &[f32]) -> Result<ReadbackToken, MassError> {
        if field.len() != self.len {
            return Err(GpuError::SizeMismatch {
                expected: self.len,
                actual: field.len(),
            }
            .into());
        }
        let index = self
            .slots
            .iter()
            .position(|s| matches!(s, StagingSlot::Idle))
            .ok_or(MassError::ReadbackBusy)?;

        self.queue
            .write_buffer(&self.field_buffer, 0, bytemuck::cast_slice(field));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Mass Reduce Encoder"),
            });
        for pass in &self.passes {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Mass Reduce Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &pass.bind_group, &[]);
            cpass.dispatch_workgroups(pass.groups, 1, 1);
        }

        let staging = &self.staging[index];
        if let Some(total) = self.levels.last() {
            encoder.copy_buffer_to_buffer(total, 0, staging, 0, std::mem::size_of::<f32>() as u64);
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            // Receiver is gone if the reducer was dropped mid-readback
            let _ = tx.send(result);
        });

        let generation = self.next_generation;
        self.next_generation += 1;
        self.slots[index] = StagingSlot::InFlight { generation, rx };
        Ok(ReadbackToken::new(index, generation))
    }

    fn poll(&mut self, token: ReadbackToken) -> Result<Option<f32>, MassError> {
        self.finish(token, false)
    }

    fn wait(&mut self, token: ReadbackToken) -> Result<f32, MassError> {
        self.finish(token, true)?.ok_or(MassError::UnknownToken)
    }
}

fn create_reduce_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Mass Reduce Bind Group Layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: false },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            },
        ],
    })
}
