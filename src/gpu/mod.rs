//! GPU device setup and built-in compute passes using wgpu.
//!
//! The context owns the adapter, device and queue; `compute` holds the
//! spectral transform pipelines that run on register groups.

pub mod compute;
pub mod context;

pub use compute::{FourierError, GpuFourier};
pub use context::{GpuContext, GpuError};
