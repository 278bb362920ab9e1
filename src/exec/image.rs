//! Image kernel execution over byte groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::audio::expect_domain;
use super::binding::{BindingContext, Scalar};
use super::dispatch::{DispatchShape, KernelExecutor};
use super::ExecError;
use crate::kernel::{CompiledKernel, KernelDomain};
use crate::memory::{ElementType, Handle, MemoryError};

/// Pixel geometry of an image group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFormat {
    pub width: u32,
    pub height: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl ImageFormat {
    pub fn new(width: u32, height: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            width,
            height,
            channels,
            bit_depth,
        }
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.channels as u32 * self.bit_depth as u32
    }

    /// Bytes needed for one tightly packed image.
    pub fn byte_len(&self) -> usize {
        (self.width as usize * self.height as usize * self.bits_per_pixel() as usize).div_ceil(8)
    }

    fn context(&self, overrides: BTreeMap<String, Scalar>) -> BindingContext {
        BindingContext {
            width: self.width,
            height: self.height,
            channels: self.channels,
            bit_depth: self.bit_depth,
            bits_per_pixel: self.bits_per_pixel(),
            overrides,
            ..Default::default()
        }
    }
}

impl KernelExecutor {
    /// Run an imaging kernel over a byte group, one invocation per pixel.
    ///
    /// Returns a new byte group for kernels with separate input and output
    /// pointers, or `input` itself when the kernel works in place.
    pub fn execute_image(
        &self,
        kernel: &CompiledKernel,
        input: Handle,
        format: &ImageFormat,
        overrides: BTreeMap<String, Scalar>,
    ) -> Result<Handle, ExecError> {
        expect_domain(kernel, KernelDomain::Imaging)?;
        let register = self.register();
        let group = register
            .find_group(input)
            .ok_or(MemoryError::HandleNotFound(input))?;
        if group.element_type() != ElementType::Byte {
            return Err(MemoryError::TypeMismatch {
                stored: group.element_type(),
                requested: ElementType::Byte,
            }
            .into());
        }

        let output = if kernel.schema().pointer_count() >= 2 {
            Some(register.allocate_with_lengths(group.lengths(), ElementType::Byte)?)
        } else {
            None
        };

        let ctx = format.context(overrides);
        let shape = DispatchShape::Planar {
            width: format.width,
            height: format.height,
        };
        if let Err(e) = self.dispatch_group(kernel, input, output, &ctx, shape) {
            if let Some(handle) = output {
                register.free(handle);
            }
            return Err(e);
        }

        let result = output.unwrap_or(input);
        log::info!(
            "Executed image kernel '{}' ({}x{}) on {} -> {}",
            kernel.name(),
            format.width,
            format.height,
            input,
            result
        );
        Ok(result)
    }
}
