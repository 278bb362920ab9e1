//! Kernel sources, compilation and argument introspection.
//!
//! A kernel is a WGSL file with one `@compute` entry point. Compiling it
//! yields an immutable [`CompiledKernel`] carrying the argument schema read
//! from the module and the descriptor that assigns each argument a role.

pub mod compiler;
pub mod descriptor;
pub mod schema;
pub mod source;

pub use compiler::{CompiledKernel, KernelCompiler, KernelError};
pub use descriptor::{ArgRole, ArgumentDescriptor, DescriptorEntry, DescriptorOrigin};
pub use schema::{ArgLocation, ArgType, ArgumentSchema, KernelArgument, ScalarTag, UniformBlock};
pub use source::{extract_entry_name, verify_kernel_source, KernelDomain};
