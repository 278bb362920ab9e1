//! Kernel argument schema derived from the compiled module.
//!
//! Storage buffers become pointer arguments, members of the uniform
//! parameter block become scalar arguments. Order follows declaration order.

use naga::{AddressSpace, ScalarKind, StorageAccess, TypeInner};
use serde::{Deserialize, Serialize};

use super::compiler::KernelError;
use crate::memory::ElementType;

/// Semantic tag of a scalar (or of a pointer's pointee).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarTag {
    Int,
    UInt,
    Float,
    Double,
    Long,
    ULong,
    Short,
    Byte,
    Complex,
}

/// Device type names and the tags they map to.
const TYPE_TABLE: &[(&str, ScalarTag)] = &[
    ("i32", ScalarTag::Int),
    ("u32", ScalarTag::UInt),
    ("f32", ScalarTag::Float),
    ("f64", ScalarTag::Double),
    ("i64", ScalarTag::Long),
    ("u64", ScalarTag::ULong),
    ("i16", ScalarTag::Short),
    ("u8", ScalarTag::Byte),
    ("vec2<f32>", ScalarTag::Complex),
];

impl ScalarTag {
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarTag::Int
                | ScalarTag::UInt
                | ScalarTag::Long
                | ScalarTag::ULong
                | ScalarTag::Short
                | ScalarTag::Byte
        )
    }

    /// Size in bytes when packed into a parameter block.
    pub fn size(self) -> u32 {
        match self {
            ScalarTag::Byte => 1,
            ScalarTag::Short => 2,
            ScalarTag::Int | ScalarTag::UInt | ScalarTag::Float => 4,
            ScalarTag::Double | ScalarTag::Long | ScalarTag::ULong | ScalarTag::Complex => 8,
        }
    }

    /// Register element type holding values of this tag, if any.
    pub fn element_type(self) -> Option<ElementType> {
        match self {
            ScalarTag::Int => Some(ElementType::Int32),
            ScalarTag::Float => Some(ElementType::Float32),
            ScalarTag::Double => Some(ElementType::Float64),
            ScalarTag::Long => Some(ElementType::Int64),
            ScalarTag::Byte => Some(ElementType::Byte),
            ScalarTag::Complex => Some(ElementType::Complex),
            ScalarTag::UInt | ScalarTag::ULong | ScalarTag::Short => None,
        }
    }
}

/// Semantic type of one kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Scalar(ScalarTag),
    Pointer(ScalarTag),
    /// Storage buffer whose element type is missing from the lookup table,
    /// such as a struct.
    OpaquePointer,
    /// Type name missing from the lookup table; bound best-effort.
    Opaque,
}

impl ArgType {
    /// Map a device type name to a tag. A trailing `*` marks a pointer.
    pub fn from_type_name(type_name: &str) -> Self {
        let (base, pointer) = match type_name.strip_suffix('*') {
            Some(base) => (base, true),
            None => (type_name, false),
        };

        match TYPE_TABLE.iter().find(|(name, _)| *name == base) {
            Some(&(_, tag)) if pointer => ArgType::Pointer(tag),
            Some(&(_, tag)) => ArgType::Scalar(tag),
            None => {
                log::warn!("Unrecognized kernel type '{}', tagging as opaque", type_name);
                if pointer {
                    ArgType::OpaquePointer
                } else {
                    ArgType::Opaque
                }
            }
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, ArgType::Pointer(_) | ArgType::OpaquePointer)
    }

    pub fn tag(&self) -> Option<ScalarTag> {
        match self {
            ArgType::Scalar(tag) | ArgType::Pointer(tag) => Some(*tag),
            ArgType::OpaquePointer | ArgType::Opaque => None,
        }
    }
}

/// Where an argument lives in bind group 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLocation {
    Storage { binding: u32, read_only: bool },
    Uniform { binding: u32, offset: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelArgument {
    pub name: String,
    /// Device type name, e.g. `f32*` or `u32`.
    pub type_name: String,
    pub arg_type: ArgType,
    pub location: ArgLocation,
}

/// The uniform parameter block backing scalar arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBlock {
    pub binding: u32,
    pub size: u64,
}

/// Ordered argument list of a compiled kernel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgumentSchema {
    arguments: Vec<KernelArgument>,
    uniform: Option<UniformBlock>,
}

impl ArgumentSchema {
    /// Introspect the bound globals of a parsed module.
    pub fn from_module(module: &naga::Module) -> Result<Self, KernelError> {
        let mut arguments = Vec::new();
        let mut uniform = None;

        for (_, var) in module.global_variables.iter() {
            let Some(binding) = &var.binding else {
                continue;
            };
            let name = var
                .name
                .clone()
                .unwrap_or_else(|| format!("binding{}", binding.binding));
            if binding.group != 0 {
                return Err(KernelError::UnsupportedBinding {
                    name,
                    reason: format!("bind group {} (only group 0 is bound)", binding.group),
                });
            }

            match var.space {
                AddressSpace::Storage { access } => {
                    let type_name = storage_type_name(module, var.ty);
                    arguments.push(KernelArgument {
                        name,
                        arg_type: ArgType::from_type_name(&type_name),
                        type_name,
                        location: ArgLocation::Storage {
                            binding: binding.binding,
                            read_only: !access.contains(StorageAccess::STORE),
                        },
                    });
                }
                AddressSpace::Uniform => {
                    if uniform.is_some() {
                        return Err(KernelError::UnsupportedBinding {
                            name,
                            reason: "more than one uniform block".to_string(),
                        });
                    }

                    let ty = &module.types[var.ty];
                    let size = match &ty.inner {
                        TypeInner::Struct { members, span } => {
                            for member in members {
                                let type_name = type_name(module, member.ty);
                                arguments.push(KernelArgument {
                                    name: member.name.clone().unwrap_or_default(),
                                    arg_type: ArgType::from_type_name(&type_name),
                                    type_name,
                                    location: ArgLocation::Uniform {
                                        binding: binding.binding,
                                        offset: member.offset,
                                    },
                                });
                            }
                            *span as u64
                        }
                        _ => {
                            let type_name = type_name(module, var.ty);
                            arguments.push(KernelArgument {
                                name,
                                arg_type: ArgType::from_type_name(&type_name),
                                type_name,
                                location: ArgLocation::Uniform {
                                    binding: binding.binding,
                                    offset: 0,
                                },
                            });
                            16
                        }
                    };
                    uniform = Some(UniformBlock {
                        binding: binding.binding,
                        size: size.next_multiple_of(16),
                    });
                }
                other => {
                    return Err(KernelError::UnsupportedBinding {
                        name,
                        reason: format!("address space {:?}", other),
                    });
                }
            }
        }

        Ok(Self { arguments, uniform })
    }

    /// Build a schema from `(name, type name)` pairs.
    ///
    /// Pointers take consecutive storage bindings; scalars are packed into a
    /// uniform block bound after them, each aligned to its own size.
    pub fn from_declarations(declarations: &[(&str, &str)]) -> Self {
        let mut arguments = Vec::with_capacity(declarations.len());
        let pointers = declarations
            .iter()
            .filter(|(_, ty)| ty.ends_with('*'))
            .count() as u32;

        let mut binding = 0;
        let mut offset = 0u32;
        for &(name, type_name) in declarations {
            let arg_type = ArgType::from_type_name(type_name);
            let location = if arg_type.is_pointer() {
                binding += 1;
                ArgLocation::Storage {
                    binding: binding - 1,
                    read_only: !name.to_lowercase().contains("out"),
                }
            } else {
                let size = arg_type.tag().map_or(4, ScalarTag::size);
                offset = offset.next_multiple_of(size);
                let location = ArgLocation::Uniform {
                    binding: pointers,
                    offset,
                };
                offset += size;
                location
            };
            arguments.push(KernelArgument {
                name: name.to_string(),
                type_name: type_name.to_string(),
                arg_type,
                location,
            });
        }

        let uniform = (offset > 0).then(|| UniformBlock {
            binding: pointers,
            size: (offset as u64).next_multiple_of(16),
        });
        Self { arguments, uniform }
    }

    pub fn arguments(&self) -> &[KernelArgument] {
        &self.arguments
    }

    pub fn len(&self) -> usize {
        self.arguments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arguments.is_empty()
    }

    pub fn uniform(&self) -> Option<UniformBlock> {
        self.uniform
    }

    /// First pointer argument.
    pub fn input_pointer(&self) -> Option<&KernelArgument> {
        self.arguments.iter().find(|a| a.arg_type.is_pointer())
    }

    /// Last pointer argument.
    pub fn output_pointer(&self) -> Option<&KernelArgument> {
        self.arguments.iter().rev().find(|a| a.arg_type.is_pointer())
    }

    pub fn pointer_count(&self) -> usize {
        self.arguments
            .iter()
            .filter(|a| a.arg_type.is_pointer())
            .count()
    }
}

/// Device type name of a module type. Runtime arrays get a trailing `*`.
fn type_name(module: &naga::Module, ty: naga::Handle<naga::Type>) -> String {
    let ty = &module.types[ty];
    match &ty.inner {
        TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => scalar_name(*scalar),
        TypeInner::Vector { size, scalar } => {
            format!("vec{}<{}>", *size as u8, scalar_name(*scalar))
        }
        TypeInner::Array { base, .. } => format!("{}*", type_name(module, *base)),
        _ => ty.name.clone().unwrap_or_else(|| "opaque".to_string()),
    }
}

/// Type name of a storage buffer, always a pointer.
///
/// Arrays point at their element type; any other buffer type (a struct, a
/// lone atomic) is named as a pointer to itself.
fn storage_type_name(module: &naga::Module, ty: naga::Handle<naga::Type>) -> String {
    let name = type_name(module, ty);
    if name.ends_with('*') {
        name
    } else {
        format!("{}*", name)
    }
}

fn scalar_name(scalar: naga::Scalar) -> String {
    let name = match (scalar.kind, scalar.width) {
        (ScalarKind::Sint, 4) => "i32",
        (ScalarKind::Uint, 4) => "u32",
        (ScalarKind::Float, 4) => "f32",
        (ScalarKind::Float, 8) => "f64",
        (ScalarKind::Sint, 8) => "i64",
        (ScalarKind::Uint, 8) => "u64",
        (ScalarKind::Float, 2) => "f16",
        (ScalarKind::Bool, _) => "bool",
        (kind, width) => return format!("{:?}{}", kind, width as u32 * 8),
    };
    name.to_string()
}
