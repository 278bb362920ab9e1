//! Device memory: element types, handles and the buffer register.
//!
//! This module provides:
//! - Generation-counted handles that never alias a freed group
//! - Element types with their host-side Pod counterparts
//! - The register that owns every device buffer

pub mod element;
pub mod handle;
pub mod register;

pub use element::{Complex32, DeviceElement, ElementType};
pub use handle::{Handle, SlotTable};
pub use register::{BufferGroup, MemoryError, MemoryRegister};
