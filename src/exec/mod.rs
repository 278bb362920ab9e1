//! Kernel execution: argument binding, dispatch and the audio/image flows.
//!
//! The executor binds register groups and scalars to a compiled kernel and
//! dispatches it once per buffer, blocking until each dispatch completes.
//! Audio execution wraps kernels that expect complex input in a forward
//! transform and, when they also produce complex output, an inverse one.

pub mod audio;
pub mod binding;
pub mod dispatch;
pub mod image;
pub mod transform;

pub use audio::{
    AudioOutcome, AudioRequest, BeatScanResult, BeatZoomSettings, ChunkReduction, OutputLength,
};
pub use binding::{
    bind_arguments, BindingContext, BoundArgument, BoundArguments, BoundValue, Scalar,
};
pub use dispatch::{
    linear_grid, work_size, DispatchShape, KernelExecutor, WorkSize, FALLBACK_WORK_GROUP_SIZE,
};
pub use image::ImageFormat;
pub use transform::{SpectralTransform, SpectralTransformer, TransformBackend};

use crate::gpu::compute::FourierError;
use crate::kernel::{KernelDomain, KernelError};
use crate::memory::MemoryError;

/// Errors that can occur while binding or dispatching kernels.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Fourier(#[from] FourierError),
    #[error("Kernel '{kernel}' has no value for argument '{argument}'")]
    MissingArgument { kernel: String, argument: String },
    #[error("Kernel '{kernel}' is a {actual:?} kernel, expected {expected:?}")]
    DomainMismatch {
        kernel: String,
        expected: KernelDomain,
        actual: KernelDomain,
    },
    #[error("Cannot bind '{argument}' of kernel '{kernel}': {reason}")]
    Unbindable {
        kernel: String,
        argument: String,
        reason: String,
    },
    #[error("Output group has {output} buffers but input has {input}")]
    GroupCountMismatch { input: usize, output: usize },
    #[error("Dispatch of {invocations} invocations exceeds device limits")]
    DispatchTooLarge { invocations: u64 },
    #[error("Device error: {0}")]
    Device(String),
}
