//! Device Fourier transforms over register buffer groups.
//!
//! Power-of-two lengths run a radix-2 FFT (bit reversal then one butterfly
//! pass per stage, ping-ponging between two scratch buffers). Other lengths
//! fall back to a direct DFT, which is quadratic and therefore capped.

use std::sync::Arc;
use wgpu::{BindGroupLayout, Buffer, ComputePipeline, Device, Queue};

use super::pipelines::{self, FourierPipelines};
use crate::memory::{BufferGroup, ElementType, Handle, MemoryError, MemoryRegister};

const WORKGROUP_SIZE: u32 = 256;

/// Largest non-power-of-two length transformed with the direct DFT.
pub const MAX_DFT_SIZE: usize = 65536;

/// Errors that can occur during spectral transforms.
#[derive(Debug, thiserror::Error)]
pub enum FourierError {
    #[error("Transform length {n} unsupported (non power-of-two limit {max})")]
    UnsupportedSize { n: usize, max: usize },
    #[error("Expected {expected} data, got {actual}")]
    WrongElementType {
        expected: ElementType,
        actual: ElementType,
    },
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error("Device error: {0}")]
    Device(String),
    #[error("{requested} buffers requested but only {available} streams provisioned")]
    InsufficientStreams { requested: usize, available: usize },
}

/// Transform parameters. Must match `Params` in `fourier.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FourierParams {
    pub n: u32,
    pub stage: u32,
    pub log2_n: u32,
    pub input_complex: u32,
    pub direction: f32,
    pub scale: f32,
    pub _pad0: u32,
    pub _pad1: u32,
}

impl FourierParams {
    pub fn new(n: usize, stage: u32, forward: bool, input_complex: bool) -> Self {
        Self {
            n: n as u32,
            stage,
            log2_n: n.trailing_zeros(),
            input_complex: input_complex as u32,
            direction: if forward { 1.0 } else { -1.0 },
            scale: 1.0,
            _pad0: 0,
            _pad1: 0,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }
}

/// Workgroup grid for `invocations` threads, spilling into y past `max_per_dim`.
///
/// Returns `None` when even the 2D grid cannot cover the request.
pub fn workgroup_grid(invocations: u64, local: u32, max_per_dim: u32) -> Option<[u32; 2]> {
    let groups = invocations.div_ceil(local.max(1) as u64).max(1);
    let max = max_per_dim.max(1) as u64;
    if groups <= max {
        return Some([groups as u32, 1]);
    }
    let rows = groups.div_ceil(max);
    (rows <= max).then_some([max as u32, rows as u32])
}

/// Forward and inverse transforms executed on the device.
pub struct GpuFourier {
    device: Arc<Device>,
    queue: Arc<Queue>,
    layout: BindGroupLayout,
    pipelines: FourierPipelines,
}

impl GpuFourier {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("fourier_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../shaders/fourier.wgsl").into()),
        });
        let layout = pipelines::create_storage_uniform_layout(&device, "fourier");
        let pipelines = FourierPipelines::new(&device, &shader, &layout);

        Self {
            device,
            queue,
            layout,
            pipelines,
        }
    }

    /// Transform every real buffer of `input` into a new complex group.
    pub fn forward(
        &self,
        register: &MemoryRegister,
        input: Handle,
    ) -> Result<Handle, FourierError> {
        self.transform(register, input, true)
    }

    /// Transform every complex buffer of `input` into a new real group, scaled by 1/n.
    pub fn inverse(
        &self,
        register: &MemoryRegister,
        input: Handle,
    ) -> Result<Handle, FourierError> {
        self.transform(register, input, false)
    }

    fn transform(
        &self,
        register: &MemoryRegister,
        input: Handle,
        forward: bool,
    ) -> Result<Handle, FourierError> {
        let source = register
            .find_group(input)
            .ok_or(MemoryError::HandleNotFound(input))?;
        let (expected, produced) = if forward {
            (ElementType::Float32, ElementType::Complex)
        } else {
            (ElementType::Complex, ElementType::Float32)
        };
        if source.element_type() != expected {
            return Err(FourierError::WrongElementType {
                expected,
                actual: source.element_type(),
            });
        }
        for &n in source.lengths() {
            if !n.is_power_of_two() && n > MAX_DFT_SIZE {
                return Err(FourierError::UnsupportedSize {
                    n,
                    max: MAX_DFT_SIZE,
                });
            }
        }

        let output = register.allocate_with_lengths(source.lengths(), produced)?;
        let result = self.run_group(register, &source, output, forward);
        if let Err(e) = result {
            register.free(output);
            return Err(e);
        }
        Ok(output)
    }

    fn run_group(
        &self,
        register: &MemoryRegister,
        source: &BufferGroup,
        output: Handle,
        forward: bool,
    ) -> Result<(), FourierError> {
        let target = register
            .find_group(output)
            .ok_or(MemoryError::HandleNotFound(output))?;
        let max_len = source.lengths().iter().copied().max().unwrap_or(1);
        let scratch_handle = register.allocate_group(2, max_len, ElementType::Complex)?;
        let scratch = register
            .find_group(scratch_handle)
            .ok_or(MemoryError::HandleNotFound(scratch_handle))?;
        let params = register.create_params_buffer("fourier_params", 32);

        let mut result = Ok(());
        for (index, &n) in source.lengths().iter().enumerate() {
            let (Some(input), Some(out)) = (source.buffer(index), target.buffer(index)) else {
                break;
            };
            result = self.run_buffer(register, input, out, &scratch, &params, n, forward);
            if result.is_err() {
                break;
            }
        }

        let polled = self
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| FourierError::Device(e.to_string()));
        params.destroy();
        register.free(scratch_handle);
        result.and(polled.map(|_| ()))
    }

    #[allow(clippy::too_many_arguments)]
    fn run_buffer(
        &self,
        register: &MemoryRegister,
        input: &Buffer,
        output: &Buffer,
        scratch: &BufferGroup,
        params: &Buffer,
        n: usize,
        forward: bool,
    ) -> Result<(), FourierError> {
        let (Some(a), Some(b)) = (scratch.buffer(0), scratch.buffer(1)) else {
            return Err(FourierError::Device("scratch group incomplete".to_string()));
        };
        let input_complex = !forward;
        let scale = 1.0 / n as f32;

        if !n.is_power_of_two() {
            let p = FourierParams::new(n, 0, forward, input_complex);
            if forward {
                self.run_pass(register, &self.pipelines.dft, input, output, params, p, n)?;
            } else {
                self.run_pass(register, &self.pipelines.dft, input, a, params, p, n)?;
                let p = p.with_scale(scale);
                self.run_pass(register, &self.pipelines.to_real, a, output, params, p, n)?;
            }
            return Ok(());
        }

        let p = FourierParams::new(n, 0, forward, input_complex);
        self.run_pass(register, &self.pipelines.bit_reverse, input, a, params, p, n)?;

        // Stages ping-pong a -> b -> a ...; each needs its own submit for the uniform update.
        let (mut current, mut next) = (a, b);
        for stage in 0..n.trailing_zeros() {
            let p = FourierParams::new(n, stage, forward, true);
            self.run_pass(register, &self.pipelines.butterfly, current, next, params, p, n / 2)?;
            std::mem::swap(&mut current, &mut next);
        }

        if forward {
            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("fourier_copy_encoder"),
                });
            encoder.copy_buffer_to_buffer(current, 0, output, 0, (n * 8) as u64);
            self.queue.submit(Some(encoder.finish()));
        } else {
            let p = FourierParams::new(n, 0, forward, true).with_scale(scale);
            self.run_pass(register, &self.pipelines.to_real, current, output, params, p, n)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn run_pass(
        &self,
        register: &MemoryRegister,
        pipeline: &ComputePipeline,
        input: &Buffer,
        output: &Buffer,
        params: &Buffer,
        values: FourierParams,
        invocations: usize,
    ) -> Result<(), FourierError> {
        let limits = self.device.limits();
        let [x, y] = workgroup_grid(
            invocations as u64,
            WORKGROUP_SIZE,
            limits.max_compute_workgroups_per_dimension,
        )
        .ok_or(FourierError::UnsupportedSize {
            n: invocations,
            max: (limits.max_compute_workgroups_per_dimension as usize).pow(2)
                * WORKGROUP_SIZE as usize,
        })?;

        register.write_params(params, bytemuck::bytes_of(&values));
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fourier_bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: input.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("fourier_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("fourier_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, 1);
        }
        self.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
