//! GPU compute: Fourier transforms and shared pipeline helpers.
//!
//! Kernel pipelines built by the compiler reuse the layout helpers here so
//! every compute pass in the crate binds storage and uniforms the same way.

mod fourier;
pub mod pipelines;

pub use fourier::{workgroup_grid, FourierError, FourierParams, GpuFourier, MAX_DFT_SIZE};
