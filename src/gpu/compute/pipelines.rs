//! Bind group layouts and compute pipelines.

use wgpu::{BindGroupLayout, BindGroupLayoutEntry, ComputePipeline, Device, ShaderModule};

/// Pipelines for every Fourier stage. They share one layout.
pub struct FourierPipelines {
    pub bit_reverse: ComputePipeline,
    pub butterfly: ComputePipeline,
    pub dft: ComputePipeline,
    pub to_real: ComputePipeline,
}

impl FourierPipelines {
    /// Create all compute pipelines from the shader module.
    pub fn new(device: &Device, shader: &ShaderModule, layout: &BindGroupLayout) -> Self {
        Self {
            bit_reverse: create_pipeline(device, shader, layout, "bit_reverse_permute"),
            butterfly: create_pipeline(device, shader, layout, "fft_butterfly"),
            dft: create_pipeline(device, shader, layout, "dft"),
            to_real: create_pipeline(device, shader, layout, "complex_to_real"),
        }
    }
}

/// Standard layout: input storage, output storage, uniform params.
pub fn create_storage_uniform_layout(device: &Device, name: &str) -> BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(&format!("{}_layout", name)),
        entries: &[
            storage_entry(0, true),
            storage_entry(1, false),
            uniform_entry(2),
        ],
    })
}

pub fn storage_entry(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn uniform_entry(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn create_pipeline(
    device: &Device,
    shader: &ShaderModule,
    layout: &BindGroupLayout,
    entry_point: &str,
) -> ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{}_pipeline_layout", entry_point)),
        bind_group_layouts: &[layout],
        immediate_size: 0,
    });

    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{}_pipeline", entry_point)),
        layout: Some(&pipeline_layout),
        module: shader,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}
