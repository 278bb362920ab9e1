//! Element types that can live in a device buffer group.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared element type of a buffer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Int32,
    Float32,
    Float64,
    Int64,
    Byte,
    /// Two-component float vector (real, imaginary).
    Complex,
}

impl ElementType {
    /// Width of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            ElementType::Int32 | ElementType::Float32 => 4,
            ElementType::Float64 | ElementType::Int64 | ElementType::Complex => 8,
            ElementType::Byte => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ElementType::Int32 => "i32",
            ElementType::Float32 => "f32",
            ElementType::Float64 => "f64",
            ElementType::Int64 => "i64",
            ElementType::Byte => "u8",
            ElementType::Complex => "vec2<f32>",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Complex sample as stored on the device (`vec2<f32>` in WGSL).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Complex32 {
    pub re: f32,
    pub im: f32,
}

impl Complex32 {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn norm(&self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }
}

/// Host types that map one-to-one onto an [`ElementType`].
pub trait DeviceElement: bytemuck::Pod {
    const ELEMENT_TYPE: ElementType;
}

impl DeviceElement for i32 {
    const ELEMENT_TYPE: ElementType = ElementType::Int32;
}

impl DeviceElement for f32 {
    const ELEMENT_TYPE: ElementType = ElementType::Float32;
}

impl DeviceElement for f64 {
    const ELEMENT_TYPE: ElementType = ElementType::Float64;
}

impl DeviceElement for i64 {
    const ELEMENT_TYPE: ElementType = ElementType::Int64;
}

impl DeviceElement for u8 {
    const ELEMENT_TYPE: ElementType = ElementType::Byte;
}

impl DeviceElement for Complex32 {
    const ELEMENT_TYPE: ElementType = ElementType::Complex;
}
