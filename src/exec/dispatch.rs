//! Per-buffer kernel dispatch.

use std::sync::{Arc, Mutex, PoisonError};
use wgpu::{BindGroupEntry, Buffer};

use super::binding::{bind_arguments, BindingContext, BoundValue};
use super::transform::SpectralTransformer;
use super::ExecError;
use crate::gpu::compute::workgroup_grid;
use crate::kernel::{ArgLocation, CompiledKernel};
use crate::memory::{BufferGroup, Handle, MemoryError, MemoryRegister};

/// Work-group size used when a kernel's declared size is unusable.
pub const FALLBACK_WORK_GROUP_SIZE: u32 = 64;

/// Global and local work sizes of one linear dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSize {
    pub global: u64,
    pub local: u32,
}

impl WorkSize {
    pub fn groups(&self) -> u64 {
        self.global.div_ceil(self.local as u64)
    }
}

/// Local size is the kernel maximum capped at the element count, never below one.
pub fn work_size(elements: u64, max_local: u32) -> WorkSize {
    let local = (max_local as u64).min(elements).max(1) as u32;
    WorkSize {
        global: elements.max(local as u64),
        local,
    }
}

/// Work-group grid of a linear dispatch.
///
/// Groups beyond `max_per_dim` spill into `y` rows. Only kernels that fold
/// `gid.y` into their element index (`grid_rows`) may run such a grid; for
/// any other kernel the rows past the first would go unprocessed.
pub fn linear_grid(
    work: WorkSize,
    max_per_dim: u32,
    grid_rows: bool,
) -> Result<[u32; 3], ExecError> {
    let too_large = || ExecError::DispatchTooLarge {
        invocations: work.global,
    };
    let [x, y] = workgroup_grid(work.global, work.local, max_per_dim).ok_or_else(too_large)?;
    if y > 1 && !grid_rows {
        log::warn!(
            "{} work groups exceed {} per dimension and the kernel indexes by gid.x only",
            work.groups(),
            max_per_dim
        );
        return Err(too_large());
    }
    Ok([x, y, 1])
}

/// Geometry of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchShape {
    /// One invocation per element of each buffer.
    Linear,
    /// One invocation per pixel.
    Planar { width: u32, height: u32 },
}

/// Binds and dispatches compiled kernels on register groups.
pub struct KernelExecutor {
    register: Arc<MemoryRegister>,
    transformer: SpectralTransformer,
    fallback_work_group_size: u32,
    dispatch_lock: Mutex<()>,
}

impl KernelExecutor {
    pub fn new(
        register: Arc<MemoryRegister>,
        transformer: SpectralTransformer,
        fallback_work_group_size: u32,
    ) -> Self {
        Self {
            register,
            transformer,
            fallback_work_group_size: fallback_work_group_size.max(1),
            dispatch_lock: Mutex::new(()),
        }
    }

    pub fn register(&self) -> &Arc<MemoryRegister> {
        &self.register
    }

    pub fn transformer(&self) -> &SpectralTransformer {
        &self.transformer
    }

    pub fn fallback_work_group_size(&self) -> u32 {
        self.fallback_work_group_size
    }

    /// Dispatch `kernel` once per buffer of `input`.
    ///
    /// Kernels with a single pointer argument run in place on `input`;
    /// otherwise `output` must hold the same number of buffers. Each dispatch
    /// completes before the next buffer is bound.
    pub fn dispatch_group(
        &self,
        kernel: &CompiledKernel,
        input: Handle,
        output: Option<Handle>,
        ctx: &BindingContext,
        shape: DispatchShape,
    ) -> Result<(), ExecError> {
        let source = self
            .register
            .find_group(input)
            .ok_or(MemoryError::HandleNotFound(input))?;
        let target = match output {
            Some(handle) => {
                let group = self
                    .register
                    .find_group(handle)
                    .ok_or(MemoryError::HandleNotFound(handle))?;
                if group.count() != source.count() {
                    return Err(ExecError::GroupCountMismatch {
                        input: source.count(),
                        output: group.count(),
                    });
                }
                Some(group)
            }
            None => None,
        };

        let _guard = self
            .dispatch_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let params = kernel.schema().uniform().map(|block| {
            (
                block,
                self.register
                    .create_params_buffer(&format!("{}_params", kernel.name()), block.size),
            )
        });

        let result = (0..source.count()).try_for_each(|index| {
            self.dispatch_buffer(
                kernel,
                &source,
                target.as_ref(),
                index,
                params.as_ref().map(|(block, buffer)| (block.size, block.binding, buffer)),
                ctx,
                shape,
            )
        });

        if let Some((_, buffer)) = params {
            buffer.destroy();
        }
        if result.is_ok() {
            log::debug!(
                "Dispatched '{}' over {} buffers of group {}",
                kernel.name(),
                source.count(),
                input
            );
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_buffer(
        &self,
        kernel: &CompiledKernel,
        source: &BufferGroup,
        target: Option<&BufferGroup>,
        index: usize,
        params: Option<(u64, u32, &Buffer)>,
        ctx: &BindingContext,
        shape: DispatchShape,
    ) -> Result<(), ExecError> {
        let length = source.lengths()[index];
        let bound = bind_arguments(kernel, ctx, length)?;
        let unbindable = |argument: &str, reason: &str| ExecError::Unbindable {
            kernel: kernel.name().to_string(),
            argument: argument.to_string(),
            reason: reason.to_string(),
        };

        let in_place = kernel.schema().pointer_count() == 1;
        let mut entries = Vec::new();
        for slot in &bound.slots {
            let ArgLocation::Storage { binding, .. } = slot.location else {
                continue;
            };
            let buffer = match (slot.value, in_place, target) {
                (BoundValue::Scalar(_), _, _) => {
                    return Err(unbindable(&slot.name, "scalar in a storage binding"));
                }
                (_, true, _) | (BoundValue::Input, false, _) => source.buffer(index),
                (BoundValue::Output, false, Some(group)) => group.buffer(index),
                (BoundValue::Output, false, None) => {
                    return Err(unbindable(&slot.name, "no output group supplied"));
                }
            };
            let buffer = buffer.ok_or_else(|| unbindable(&slot.name, "buffer index out of range"))?;
            entries.push(BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            });
        }

        if let Some((size, binding, buffer)) = params {
            self.register.write_params(buffer, &bound.pack_uniform(size));
            entries.push(BindGroupEntry {
                binding,
                resource: buffer.as_entire_binding(),
            });
        }

        let [x, y, z] = self.workgroups(kernel, length as u64, shape)?;
        let device = self.register.device();
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{}_bind_group", kernel.name())),
            layout: kernel.layout(),
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&format!("{}_encoder", kernel.name())),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("{}_pass", kernel.name())),
                timestamp_writes: None,
            });
            pass.set_pipeline(kernel.pipeline());
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(x, y, z);
        }
        self.register.queue().submit(Some(encoder.finish()));
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| ExecError::Device(e.to_string()))?;
        Ok(())
    }

    fn workgroups(
        &self,
        kernel: &CompiledKernel,
        elements: u64,
        shape: DispatchShape,
    ) -> Result<[u32; 3], ExecError> {
        let limits = self.register.device().limits();
        let max_per_dim = limits.max_compute_workgroups_per_dimension;

        match shape {
            DispatchShape::Linear => {
                let max_local = kernel.max_work_group_size(&limits, self.fallback_work_group_size);
                linear_grid(work_size(elements, max_local), max_per_dim, kernel.grid_rows())
            }
            DispatchShape::Planar { width, height } => {
                let [wx, wy, _] = kernel.workgroup_size();
                let x = width.max(1).div_ceil(wx.max(1));
                let y = height.max(1).div_ceil(wy.max(1));
                if x > max_per_dim || y > max_per_dim {
                    return Err(ExecError::DispatchTooLarge {
                        invocations: width as u64 * height as u64,
                    });
                }
                Ok([x, y, 1])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_size_caps_local() {
        assert_eq!(
            work_size(1000, 256),
            WorkSize {
                global: 1000,
                local: 256
            }
        );
        assert_eq!(work_size(1000, 256).groups(), 4);
        assert_eq!(work_size(10, 256), WorkSize { global: 10, local: 10 });
        assert_eq!(work_size(0, 256), WorkSize { global: 1, local: 1 });
    }

    #[test]
    fn test_linear_grid_within_one_dimension() {
        let work = work_size(1000, 64);
        assert_eq!(linear_grid(work, 65535, false).unwrap(), [16, 1, 1]);
        assert_eq!(linear_grid(work, 65535, true).unwrap(), [16, 1, 1]);
    }

    #[test]
    fn test_linear_grid_rows_need_opt_in() {
        // 5,000,000 samples at 64 per group is 78,125 groups.
        let work = work_size(5_000_000, 64);
        assert!(matches!(
            linear_grid(work, 65535, false),
            Err(ExecError::DispatchTooLarge {
                invocations: 5_000_000
            })
        ));
        assert_eq!(linear_grid(work, 65535, true).unwrap(), [65535, 2, 1]);
    }

    #[test]
    fn test_linear_grid_beyond_two_dimensions() {
        let work = WorkSize {
            global: 1 << 40,
            local: 1,
        };
        assert!(matches!(
            linear_grid(work, 65535, true),
            Err(ExecError::DispatchTooLarge { .. })
        ));
    }
}
