//! Spectral transforms over register groups, on the device or host streams.

use std::sync::Arc;

use crate::audio::StreamPool;
use crate::gpu::compute::{FourierError, GpuFourier};
use crate::memory::{Complex32, ElementType, Handle, MemoryError, MemoryRegister};

/// A backend that turns a real group into a complex one and back.
///
/// Both directions leave the input group untouched and return a new group
/// with the same per-buffer lengths.
pub trait SpectralTransform {
    fn forward(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError>;

    fn inverse(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError>;
}

impl SpectralTransform for GpuFourier {
    fn forward(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        GpuFourier::forward(self, register, input)
    }

    fn inverse(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        GpuFourier::inverse(self, register, input)
    }
}

impl SpectralTransform for StreamPool {
    fn forward(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        expect_type(register, input, ElementType::Float32)?;
        let chunks = register.pull_chunks::<f32>(input, false)?;
        let spectra = StreamPool::forward(self, &chunks)?;
        Ok(register.push_chunks(&spectra)?)
    }

    fn inverse(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        expect_type(register, input, ElementType::Complex)?;
        let spectra = register.pull_chunks::<Complex32>(input, false)?;
        let chunks = StreamPool::inverse(self, &spectra)?;
        Ok(register.push_chunks(&chunks)?)
    }
}

fn expect_type(
    register: &MemoryRegister,
    handle: Handle,
    expected: ElementType,
) -> Result<(), FourierError> {
    let group = register
        .find_group(handle)
        .ok_or(MemoryError::HandleNotFound(handle))?;
    if group.element_type() != expected {
        return Err(FourierError::WrongElementType {
            expected,
            actual: group.element_type(),
        });
    }
    Ok(())
}

/// Device or host transform backend, chosen at startup.
pub enum TransformBackend {
    Device(Box<GpuFourier>),
    Streams(StreamPool),
}

impl TransformBackend {
    pub fn is_device(&self) -> bool {
        matches!(self, TransformBackend::Device(_))
    }
}

impl SpectralTransform for TransformBackend {
    fn forward(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        match self {
            TransformBackend::Device(b) => SpectralTransform::forward(b.as_ref(), register, input),
            TransformBackend::Streams(b) => SpectralTransform::forward(b, register, input),
        }
    }

    fn inverse(&self, register: &MemoryRegister, input: Handle) -> Result<Handle, FourierError> {
        match self {
            TransformBackend::Device(b) => SpectralTransform::inverse(b.as_ref(), register, input),
            TransformBackend::Streams(b) => SpectralTransform::inverse(b, register, input),
        }
    }
}

/// Forward/inverse transforms that can release their input.
pub struct SpectralTransformer {
    register: Arc<MemoryRegister>,
    backend: TransformBackend,
}

impl SpectralTransformer {
    pub fn new(register: Arc<MemoryRegister>, backend: TransformBackend) -> Self {
        Self { register, backend }
    }

    /// Host streams when `streams` is set, otherwise the device path.
    pub fn from_config(register: Arc<MemoryRegister>, streams: Option<usize>) -> Self {
        let backend = match streams {
            Some(n) => TransformBackend::Streams(StreamPool::new(n)),
            None => TransformBackend::Device(Box::new(GpuFourier::new(
                register.device().clone(),
                register.queue().clone(),
            ))),
        };
        Self::new(register, backend)
    }

    pub fn backend(&self) -> &TransformBackend {
        &self.backend
    }

    /// Forward transform; frees `input` on success when asked.
    pub fn forward(&self, input: Handle, free_input: bool) -> Result<Handle, FourierError> {
        let output = self.backend.forward(&self.register, input)?;
        self.finish("forward", input, output, free_input);
        Ok(output)
    }

    /// Inverse transform; frees `input` on success when asked.
    pub fn inverse(&self, input: Handle, free_input: bool) -> Result<Handle, FourierError> {
        let output = self.backend.inverse(&self.register, input)?;
        self.finish("inverse", input, output, free_input);
        Ok(output)
    }

    fn finish(&self, direction: &str, input: Handle, output: Handle, free_input: bool) {
        if free_input {
            self.register.free(input);
        }
        log::debug!(
            "{} transform {} -> {} ({})",
            direction,
            input,
            output,
            if self.backend.is_device() {
                "device"
            } else {
                "streams"
            }
        );
    }
}
