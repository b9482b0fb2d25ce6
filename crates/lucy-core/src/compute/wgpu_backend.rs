//! wgpu-based GPU compute backend (Metal / Vulkan / DX12).

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::error::{LucyError, Result};

use super::{BatchShape, BufferInner, ComputeBackend, DeviceBuffer};

// ---------------------------------------------------------------------------
// Inline WGSL shaders for the deconvolution kernel primitives
// ---------------------------------------------------------------------------

const CORRELATE_WGSL: &str = r"
struct Params { channels: u32, height: u32, width: u32, mask_h: u32, mask_w: u32 }
@group(0) @binding(0) var<storage, read>       input:  array<f32>;
@group(0) @binding(1) var<storage, read>       mask:   array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
@compute @workgroup_size(16, 16)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let col = gid.x; let row = gid.y; let ch = gid.z;
    if row >= params.height || col >= params.width || ch >= params.channels { return; }
    let ry = i32(params.mask_h) / 2;
    let rx = i32(params.mask_w) / 2;
    let plane = ch * params.height * params.width;
    var sum = 0.0;
    for (var i = 0u; i < params.mask_h; i = i + 1u) {
        let r = i32(row) + i32(i) - ry;
        if r < 0 || r >= i32(params.height) { continue; }
        for (var j = 0u; j < params.mask_w; j = j + 1u) {
            let c = i32(col) + i32(j) - rx;
            if c < 0 || c >= i32(params.width) { continue; }
            sum = sum + input[plane + u32(r) * params.width + u32(c)] * mask[i * params.mask_w + j];
        }
    }
    output[plane + row * params.width + col] = sum;
}
";

const DIVIDE_WGSL: &str = r"
struct Params { count: u32, epsilon: f32 }
@group(0) @binding(0) var<storage, read>       num:    array<f32>;
@group(0) @binding(1) var<storage, read>       den:    array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    output[gid.x] = num[gid.x] / (den[gid.x] + params.epsilon);
}
";

const DIVIDE_FILTERED_WGSL: &str = r"
struct Params { count: u32, threshold: f32 }
@group(0) @binding(0) var<storage, read>       num:    array<f32>;
@group(0) @binding(1) var<storage, read>       den:    array<f32>;
@group(0) @binding(2) var<storage, read_write> output: array<f32>;
@group(0) @binding(3) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    if den[gid.x] < params.threshold {
        output[gid.x] = 0.0;
    } else {
        output[gid.x] = num[gid.x] / den[gid.x];
    }
}
";

const MULTIPLY_ASSIGN_WGSL: &str = r"
struct Params { count: u32 }
@group(0) @binding(0) var<storage, read_write> a:      array<f32>;
@group(0) @binding(1) var<storage, read>       b:      array<f32>;
@group(0) @binding(2) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    a[gid.x] = a[gid.x] * b[gid.x];
}
";

const CLIP_WGSL: &str = r"
struct Params { count: u32, lower: f32, upper: f32 }
@group(0) @binding(0) var<storage, read_write> a:      array<f32>;
@group(0) @binding(1) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    a[gid.x] = clamp(a[gid.x], params.lower, params.upper);
}
";

const FILL_WGSL: &str = r"
struct Params { count: u32, value: f32 }
@group(0) @binding(0) var<storage, read_write> a:      array<f32>;
@group(0) @binding(1) var<uniform>             params: Params;
@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    if gid.x >= params.count { return; }
    a[gid.x] = params.value;
}
";

// ---------------------------------------------------------------------------
// Uniform parameter structs (must match WGSL layouts exactly)
// ---------------------------------------------------------------------------

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CorrelateParams {
    channels: u32,
    height: u32,
    width: u32,
    mask_h: u32,
    mask_w: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct DivideParams {
    count: u32,
    epsilon: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FilteredDivideParams {
    count: u32,
    threshold: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CountParams {
    count: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClipParams {
    count: u32,
    lower: f32,
    upper: f32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct FillParams {
    count: u32,
    value: f32,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn gpu_buf(buf: &DeviceBuffer) -> &wgpu::Buffer {
    match &buf.inner {
        BufferInner::Wgpu { buffer } => buffer,
        _ => panic!("WgpuBackend: expected GPU buffer"),
    }
}

const fn div_ceil(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

// ---------------------------------------------------------------------------
// WgpuBackend
// ---------------------------------------------------------------------------

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    adapter_name: String,
    // Pipelines
    correlate_pipeline: wgpu::ComputePipeline,
    divide_pipeline: wgpu::ComputePipeline,
    divide_filtered_pipeline: wgpu::ComputePipeline,
    multiply_assign_pipeline: wgpu::ComputePipeline,
    clip_pipeline: wgpu::ComputePipeline,
    fill_pipeline: wgpu::ComputePipeline,
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| LucyError::Gpu(format!("No suitable GPU adapter found: {e}")))?;

        let adapter_name = adapter.get_info().name.clone();
        tracing::info!("GPU adapter: {adapter_name}");

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("lucy"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                ..Default::default()
            },
        ))
        .map_err(|e| LucyError::Gpu(format!("Failed to create GPU device: {e}")))?;

        let device: Arc<wgpu::Device> = Arc::new(device);
        let queue: Arc<wgpu::Queue> = Arc::new(queue);

        // Compile all shader modules
        let mk = |label, src: &str| {
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(src.into()),
            })
        };

        let correlate_mod = mk("correlate", CORRELATE_WGSL);
        let divide_mod = mk("divide", DIVIDE_WGSL);
        let divide_filt_mod = mk("divide_filtered", DIVIDE_FILTERED_WGSL);
        let mult_mod = mk("multiply_assign", MULTIPLY_ASSIGN_WGSL);
        let clip_mod = mk("clip", CLIP_WGSL);
        let fill_mod = mk("fill", FILL_WGSL);

        // Create compute pipelines
        let pipe = |module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: None,
                layout: None,
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        Ok(Self {
            adapter_name,
            correlate_pipeline: pipe(&correlate_mod, "main"),
            divide_pipeline: pipe(&divide_mod, "main"),
            divide_filtered_pipeline: pipe(&divide_filt_mod, "main"),
            multiply_assign_pipeline: pipe(&mult_mod, "main"),
            clip_pipeline: pipe(&clip_mod, "main"),
            fill_pipeline: pipe(&fill_mod, "main"),
            device,
            queue,
        })
    }

    // --- Buffer helpers ---

    fn create_storage(&self, data: &[f32]) -> Result<wgpu::Buffer> {
        self.device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        self.check_allocation()?;
        Ok(buffer)
    }

    fn create_storage_uninit(&self, len: usize) -> Result<wgpu::Buffer> {
        let byte_size = (len * std::mem::size_of::<f32>()) as u64;
        self.device
            .push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size: byte_size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.check_allocation()?;
        Ok(buffer)
    }

    fn check_allocation(&self) -> Result<()> {
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(LucyError::OutOfDeviceMemory(err.to_string())),
            None => Ok(()),
        }
    }

    fn create_uniform<T: Pod>(&self, data: &T) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: None,
                contents: bytemuck::bytes_of(data),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn download_f32(&self, buffer: &wgpu::Buffer, out: &mut [f32]) -> Result<()> {
        let size = buffer.size();
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(enc.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::sync_channel(1);
        slice.map_async(wgpu::MapMode::Read, move |r| {
            tx.send(r).ok();
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| LucyError::DeviceTransferFailure(format!("device poll failed: {e}")))?;
        rx.recv()
            .map_err(|_| LucyError::DeviceTransferFailure("GPU channel closed".into()))?
            .map_err(|e| LucyError::DeviceTransferFailure(format!("buffer mapping failed: {e}")))?;

        let data = slice.get_mapped_range();
        out.copy_from_slice(bytemuck::cast_slice(&data));
        drop(data);
        staging.unmap();
        Ok(())
    }

    /// Dispatch a single compute pass with one bind group at group(0),
    /// surfacing validation errors as kernel failures.
    fn dispatch(
        &self,
        pipeline: &wgpu::ComputePipeline,
        entries: &[wgpu::BindGroupEntry],
        workgroups: (u32, u32, u32),
    ) -> Result<()> {
        self.device
            .push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = pipeline.get_bind_group_layout(0);
        let bg = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: &layout,
            entries,
        });
        let mut enc = self.device.create_command_encoder(&Default::default());
        {
            let mut pass = enc.begin_compute_pass(&Default::default());
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bg, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, workgroups.2);
        }
        self.queue.submit(std::iter::once(enc.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(LucyError::KernelExecutionFailure(err.to_string())),
            None => Ok(()),
        }
    }

    fn make_device_buffer(&self, buffer: wgpu::Buffer) -> DeviceBuffer {
        let len = (buffer.size() / std::mem::size_of::<f32>() as u64) as usize;
        DeviceBuffer::from_wgpu(buffer, len)
    }
}

// ---------------------------------------------------------------------------
// ComputeBackend implementation
// ---------------------------------------------------------------------------

impl ComputeBackend for WgpuBackend {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn is_gpu(&self) -> bool {
        true
    }

    fn alloc(&self, len: usize) -> Result<DeviceBuffer> {
        let buffer = self.create_storage_uninit(len)?;
        Ok(self.make_device_buffer(buffer))
    }

    fn upload(&self, data: &[f32]) -> Result<DeviceBuffer> {
        let buffer = self.create_storage(data)?;
        Ok(self.make_device_buffer(buffer))
    }

    fn download(&self, buf: &DeviceBuffer, out: &mut [f32]) -> Result<()> {
        self.download_f32(gpu_buf(buf), out)
    }

    fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
        let src_buf = gpu_buf(src);
        let dst_buf = gpu_buf(dst);
        let mut enc = self.device.create_command_encoder(&Default::default());
        enc.copy_buffer_to_buffer(src_buf, 0, dst_buf, 0, src_buf.size());
        self.queue.submit(std::iter::once(enc.finish()));
        Ok(())
    }

    fn fill(&self, buf: &mut DeviceBuffer, value: f32) -> Result<()> {
        let count = buf.len() as u32;
        let uniform = self.create_uniform(&FillParams { count, value });
        self.dispatch(
            &self.fill_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(buf).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        )
    }

    fn correlate(
        &self,
        src: &DeviceBuffer,
        mask: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        shape: BatchShape,
    ) -> Result<()> {
        let uniform = self.create_uniform(&CorrelateParams {
            channels: shape.channels as u32,
            height: shape.height as u32,
            width: shape.width as u32,
            mask_h: shape.psf_height as u32,
            mask_w: shape.psf_width as u32,
        });
        self.dispatch(
            &self.correlate_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(src).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu_buf(mask).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gpu_buf(dst).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (
                div_ceil(shape.width as u32, 16),
                div_ceil(shape.height as u32, 16),
                shape.channels as u32,
            ),
        )
    }

    fn divide(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        epsilon: f32,
    ) -> Result<()> {
        let count = dst.len() as u32;
        let uniform = self.create_uniform(&DivideParams { count, epsilon });
        self.dispatch(
            &self.divide_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(num).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu_buf(den).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gpu_buf(dst).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        )
    }

    fn divide_filtered(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        threshold: f32,
    ) -> Result<()> {
        let count = dst.len() as u32;
        let uniform = self.create_uniform(&FilteredDivideParams { count, threshold });
        self.dispatch(
            &self.divide_filtered_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(num).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu_buf(den).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: gpu_buf(dst).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        )
    }

    fn multiply_assign(&self, dst: &mut DeviceBuffer, rhs: &DeviceBuffer) -> Result<()> {
        let count = dst.len() as u32;
        let uniform = self.create_uniform(&CountParams { count });
        self.dispatch(
            &self.multiply_assign_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(dst).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: gpu_buf(rhs).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        )
    }

    fn clip(&self, buf: &mut DeviceBuffer, lower: f32, upper: f32) -> Result<()> {
        let count = buf.len() as u32;
        let uniform = self.create_uniform(&ClipParams {
            count,
            lower,
            upper,
        });
        self.dispatch(
            &self.clip_pipeline,
            &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: gpu_buf(buf).as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
            (div_ceil(count, 256), 1, 1),
        )
    }
}
