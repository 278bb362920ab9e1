//! Binding values to kernel argument slots.
//!
//! Each slot is filled according to its descriptor role. Variable slots
//! take the caller's variables in order, then the descriptor default.
//! Overrides run last: each replaces the first scalar slot whose name
//! contains its key (case-insensitive) or is carried as an extra.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ExecError;
use crate::kernel::{ArgLocation, ArgRole, CompiledKernel, ScalarTag};

/// A scalar argument value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Float(f64),
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<usize> for Scalar {
    fn from(v: usize) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Scalar::Float(v as f64)
    }
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Int(v) => v as f64,
            Scalar::Float(v) => v,
        }
    }

    /// Integer value, rounding floats.
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(v) => v.round() as i64,
        }
    }

    /// Little-endian bytes of this value converted to `tag`.
    ///
    /// Untagged (opaque) slots are written as i32 or f32.
    pub fn encode(self, tag: Option<ScalarTag>) -> Vec<u8> {
        match tag {
            Some(ScalarTag::Int) => (self.as_i64() as i32).to_le_bytes().to_vec(),
            Some(ScalarTag::UInt) => (self.as_i64() as u32).to_le_bytes().to_vec(),
            Some(ScalarTag::Float) => (self.as_f64() as f32).to_le_bytes().to_vec(),
            Some(ScalarTag::Double) => self.as_f64().to_le_bytes().to_vec(),
            Some(ScalarTag::Long) => self.as_i64().to_le_bytes().to_vec(),
            Some(ScalarTag::ULong) => (self.as_i64() as u64).to_le_bytes().to_vec(),
            Some(ScalarTag::Short) => (self.as_i64() as i16).to_le_bytes().to_vec(),
            Some(ScalarTag::Byte) => vec![self.as_i64() as u8],
            Some(ScalarTag::Complex) => {
                let mut bytes = (self.as_f64() as f32).to_le_bytes().to_vec();
                bytes.extend_from_slice(&0.0f32.to_le_bytes());
                bytes
            }
            None => match self {
                Scalar::Int(v) => (v as i32).to_le_bytes().to_vec(),
                Scalar::Float(v) => (v as f32).to_le_bytes().to_vec(),
            },
        }
    }
}

/// Caller-side values available to role-based binding.
#[derive(Debug, Clone, Default)]
pub struct BindingContext {
    pub chunk_size: usize,
    pub overlap: f32,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub variables: Vec<Scalar>,
    pub overrides: BTreeMap<String, Scalar>,
}

/// What a slot was bound to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundValue {
    Input,
    Output,
    Scalar(Scalar),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundArgument {
    pub name: String,
    pub tag: Option<ScalarTag>,
    pub location: ArgLocation,
    pub value: BoundValue,
}

/// Bound slots in schema order plus overrides that matched no slot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundArguments {
    pub slots: Vec<BoundArgument>,
    pub extras: Vec<(String, Scalar)>,
}

impl BoundArguments {
    pub fn values(&self) -> Vec<BoundValue> {
        self.slots.iter().map(|s| s.value).collect()
    }

    /// Scalar bound to the first slot whose name contains `key`.
    pub fn scalar(&self, key: &str) -> Option<Scalar> {
        let key = key.to_lowercase();
        self.slots
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&key))
            .find_map(|s| match s.value {
                BoundValue::Scalar(v) => Some(v),
                _ => None,
            })
    }

    /// Pack uniform slots at their offsets into a block of `size` bytes.
    pub fn pack_uniform(&self, size: u64) -> Vec<u8> {
        let mut block = vec![0u8; size as usize];
        for slot in &self.slots {
            let (ArgLocation::Uniform { offset, .. }, BoundValue::Scalar(value)) =
                (slot.location, slot.value)
            else {
                continue;
            };
            let bytes = value.encode(slot.tag);
            let start = offset as usize;
            match block.get_mut(start..start + bytes.len()) {
                Some(dst) => dst.copy_from_slice(&bytes),
                None => log::warn!(
                    "Argument '{}' at offset {} overflows {}-byte parameter block",
                    slot.name,
                    offset,
                    size
                ),
            }
        }
        block
    }
}

/// Bind every argument of `kernel` for a buffer of `length` elements.
pub fn bind_arguments(
    kernel: &CompiledKernel,
    ctx: &BindingContext,
    length: usize,
) -> Result<BoundArguments, ExecError> {
    bind_with(
        kernel.name(),
        kernel.schema(),
        kernel.descriptor(),
        ctx,
        length,
    )
}

pub(crate) fn bind_with(
    kernel: &str,
    schema: &crate::kernel::ArgumentSchema,
    descriptor: &crate::kernel::ArgumentDescriptor,
    ctx: &BindingContext,
    length: usize,
) -> Result<BoundArguments, ExecError> {
    let mut variables = ctx.variables.iter().copied();
    let overridden = |name: &str| {
        let name = name.to_lowercase();
        ctx.overrides
            .keys()
            .any(|key| name.contains(&key.to_lowercase()))
    };

    let mut slots = Vec::with_capacity(schema.len());
    for (arg, entry) in schema.arguments().iter().zip(&descriptor.arguments) {
        let tag = arg.arg_type.tag();
        let int = |v: i64| BoundValue::Scalar(Scalar::Int(v));

        let value = match entry.role {
            ArgRole::Input => BoundValue::Input,
            ArgRole::Output => BoundValue::Output,
            ArgRole::Length => int(length as i64),
            ArgRole::ChunkSize => int(ctx.chunk_size as i64),
            ArgRole::Overlap => {
                if tag.is_some_and(ScalarTag::is_integer) {
                    int((ctx.chunk_size as f32 * ctx.overlap) as i64)
                } else {
                    BoundValue::Scalar(Scalar::Float(ctx.overlap as f64))
                }
            }
            ArgRole::SampleRate => int(ctx.sample_rate as i64),
            ArgRole::BitDepth => int(ctx.bit_depth as i64),
            ArgRole::Channels => int(ctx.channels as i64),
            ArgRole::Width => int(ctx.width as i64),
            ArgRole::Height => int(ctx.height as i64),
            ArgRole::BitsPerPixel => int(ctx.bits_per_pixel as i64),
            ArgRole::Variable => match variables.next() {
                Some(v) => BoundValue::Scalar(v),
                None => match entry.default {
                    Some(d) => BoundValue::Scalar(Scalar::Float(d)),
                    // Filled by an override below.
                    None if overridden(&arg.name) => BoundValue::Scalar(Scalar::Int(0)),
                    None => {
                        log::error!(
                            "Kernel '{}': no value for argument '{}'",
                            kernel,
                            arg.name
                        );
                        return Err(ExecError::MissingArgument {
                            kernel: kernel.to_string(),
                            argument: arg.name.clone(),
                        });
                    }
                },
            },
        };

        slots.push(BoundArgument {
            name: arg.name.clone(),
            tag,
            location: arg.location,
            value,
        });
    }

    let mut extras = Vec::new();
    for (key, &value) in &ctx.overrides {
        let lower = key.to_lowercase();
        let target = slots.iter_mut().find(|s| {
            matches!(s.value, BoundValue::Scalar(_)) && s.name.to_lowercase().contains(&lower)
        });
        match target {
            Some(slot) => {
                log::debug!("Kernel '{}': '{}' overridden with {:?}", kernel, slot.name, value);
                slot.value = BoundValue::Scalar(value);
            }
            None => extras.push((key.clone(), value)),
        }
    }
    if !extras.is_empty() {
        log::debug!(
            "Kernel '{}': {} overrides matched no argument",
            kernel,
            extras.len()
        );
    }

    Ok(BoundArguments { slots, extras })
}
