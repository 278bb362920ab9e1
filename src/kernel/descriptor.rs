//! Declarative argument descriptors.
//!
//! A descriptor assigns a role to every schema slot. It is read from a JSON
//! sidecar next to the kernel (`stretch00.wgsl` → `stretch00.json`) or
//! generated from argument names when no sidecar exists. Either way it is
//! checked against the schema before the kernel can be dispatched.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::compiler::KernelError;
use super::schema::{ArgLocation, ArgType, ArgumentSchema, KernelArgument};

/// What a kernel argument is bound to at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgRole {
    Input,
    Output,
    Length,
    ChunkSize,
    Overlap,
    SampleRate,
    BitDepth,
    Channels,
    Width,
    Height,
    BitsPerPixel,
    /// Filled from the caller's variable list, overrides, or the default.
    Variable,
}

impl ArgRole {
    pub fn is_buffer(self) -> bool {
        matches!(self, ArgRole::Input | ArgRole::Output)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorEntry {
    pub name: String,
    pub role: ArgRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
}

/// Where a kernel's descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorOrigin {
    Sidecar,
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDescriptor {
    pub kernel: String,
    pub arguments: Vec<DescriptorEntry>,
    /// The kernel folds `gid.y` into its element index, so linear
    /// dispatches may spill into a second grid dimension.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub grid_rows: bool,
}

impl ArgumentDescriptor {
    /// Generate a descriptor from argument names.
    pub fn infer(kernel: &str, schema: &ArgumentSchema) -> Self {
        let arguments = schema
            .arguments()
            .iter()
            .map(|arg| DescriptorEntry {
                name: arg.name.clone(),
                role: infer_role(arg),
                default: None,
            })
            .collect();
        Self {
            kernel: kernel.to_string(),
            arguments,
            grid_rows: false,
        }
    }

    /// Parse a sidecar and validate it against the schema.
    pub fn from_json(text: &str, schema: &ArgumentSchema) -> Result<Self, KernelError> {
        let descriptor: Self = serde_json::from_str(text)?;
        descriptor.validate(schema)?;
        Ok(descriptor)
    }

    /// Load the sidecar next to `source` if present, otherwise infer.
    pub fn load_or_infer(
        source: &Path,
        kernel: &str,
        schema: &ArgumentSchema,
    ) -> Result<(Self, DescriptorOrigin), KernelError> {
        let sidecar = Self::sidecar_path(source);
        if sidecar.is_file() {
            let text = fs::read_to_string(&sidecar)?;
            let descriptor = Self::from_json(&text, schema)?;
            if descriptor.kernel != kernel {
                log::warn!(
                    "Descriptor {} names kernel '{}', expected '{}'",
                    sidecar.display(),
                    descriptor.kernel,
                    kernel
                );
            }
            return Ok((descriptor, DescriptorOrigin::Sidecar));
        }

        log::debug!("No descriptor for {}, inferring from names", kernel);
        Ok((Self::infer(kernel, schema), DescriptorOrigin::Inferred))
    }

    pub fn sidecar_path(source: &Path) -> PathBuf {
        source.with_extension("json")
    }

    /// Check slot count, names and role/type compatibility.
    pub fn validate(&self, schema: &ArgumentSchema) -> Result<(), KernelError> {
        let mismatch = |reason: String| KernelError::DescriptorMismatch {
            kernel: self.kernel.clone(),
            reason,
        };

        if self.arguments.len() != schema.len() {
            return Err(mismatch(format!(
                "{} entries for {} arguments",
                self.arguments.len(),
                schema.len()
            )));
        }

        for (entry, arg) in self.arguments.iter().zip(schema.arguments()) {
            if entry.name != arg.name {
                return Err(mismatch(format!(
                    "entry '{}' where argument '{}' is declared",
                    entry.name, arg.name
                )));
            }
            if entry.role.is_buffer() != arg.arg_type.is_pointer() {
                return Err(mismatch(format!(
                    "role {:?} does not fit '{}: {}'",
                    entry.role, arg.name, arg.type_name
                )));
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String, KernelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn role_of(&self, name: &str) -> Option<ArgRole> {
        self.arguments
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.role)
    }
}

/// Role implied by an argument's name and type.
pub fn infer_role(argument: &KernelArgument) -> ArgRole {
    let lower = argument.name.to_lowercase();
    let compact: String = lower.chars().filter(|c| *c != '_').collect();

    match argument.arg_type {
        ArgType::Pointer(_) | ArgType::OpaquePointer => {
            if lower.contains("in") {
                ArgRole::Input
            } else if lower.contains("out") {
                ArgRole::Output
            } else if matches!(
                argument.location,
                ArgLocation::Storage {
                    read_only: true,
                    ..
                }
            ) {
                ArgRole::Input
            } else {
                ArgRole::Output
            }
        }
        ArgType::Scalar(tag) => {
            if tag.is_integer() && compact.contains("len") {
                return ArgRole::Length;
            }
            if compact.contains("chunk") {
                return ArgRole::ChunkSize;
            }
            if compact.contains("overlap") {
                return ArgRole::Overlap;
            }
            match compact.as_str() {
                "samplerate" => ArgRole::SampleRate,
                "bit" | "bits" | "bitdepth" => ArgRole::BitDepth,
                "channel" | "channels" => ArgRole::Channels,
                "width" => ArgRole::Width,
                "height" => ArgRole::Height,
                "bpp" | "bitsperpixel" => ArgRole::BitsPerPixel,
                _ => ArgRole::Variable,
            }
        }
        ArgType::Opaque => ArgRole::Variable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stretch_schema() -> ArgumentSchema {
        ArgumentSchema::from_declarations(&[
            ("input", "vec2<f32>*"),
            ("output", "vec2<f32>*"),
            ("len", "u32"),
            ("chunk_size", "u32"),
            ("overlap", "u32"),
            ("sample_rate", "u32"),
            ("factor", "f32"),
        ])
    }

    #[test]
    fn test_infer_roles() {
        let descriptor = ArgumentDescriptor::infer("stretch00", &stretch_schema());
        let roles: Vec<ArgRole> = descriptor.arguments.iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            [
                ArgRole::Input,
                ArgRole::Output,
                ArgRole::Length,
                ArgRole::ChunkSize,
                ArgRole::Overlap,
                ArgRole::SampleRate,
                ArgRole::Variable,
            ]
        );
    }

    #[test]
    fn test_len_only_for_integers() {
        let schema = ArgumentSchema::from_declarations(&[("lens_gain", "f32")]);
        let descriptor = ArgumentDescriptor::infer("k", &schema);
        assert_eq!(descriptor.arguments[0].role, ArgRole::Variable);
    }

    #[test]
    fn test_sidecar_round_trip_validates() {
        let schema = stretch_schema();
        let mut descriptor = ArgumentDescriptor::infer("stretch00", &schema);
        descriptor.arguments[6].default = Some(1.0);

        let json = descriptor.to_json_pretty().unwrap();
        let parsed = ArgumentDescriptor::from_json(&json, &schema).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_sidecar_with_wrong_names_rejected() {
        let json = r#"{"kernel": "k", "arguments": [
            {"name": "src", "role": "input"},
            {"name": "dst", "role": "output"}
        ]}"#;
        let schema = ArgumentSchema::from_declarations(&[("input", "f32*"), ("output", "f32*")]);
        assert!(matches!(
            ArgumentDescriptor::from_json(json, &schema),
            Err(KernelError::DescriptorMismatch { .. })
        ));
    }

    #[test]
    fn test_sidecar_with_buffer_role_on_scalar_rejected() {
        let json = r#"{"kernel": "k", "arguments": [
            {"name": "input", "role": "input"},
            {"name": "gain", "role": "output"}
        ]}"#;
        let schema = ArgumentSchema::from_declarations(&[("input", "f32*"), ("gain", "f32")]);
        assert!(matches!(
            ArgumentDescriptor::from_json(json, &schema),
            Err(KernelError::DescriptorMismatch { .. })
        ));
    }

    #[test]
    fn test_sidecar_grid_rows_flag() {
        let schema = ArgumentSchema::from_declarations(&[("data", "f32*")]);
        let json = r#"{"kernel": "k", "grid_rows": true, "arguments": [
            {"name": "data", "role": "output"}
        ]}"#;
        assert!(ArgumentDescriptor::from_json(json, &schema).unwrap().grid_rows);

        let inferred = ArgumentDescriptor::infer("k", &schema);
        assert!(!inferred.grid_rows);
        assert!(!inferred.to_json_pretty().unwrap().contains("grid_rows"));
    }

    #[test]
    fn test_load_prefers_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("gain.wgsl");
        let schema = ArgumentSchema::from_declarations(&[("data_in", "f32*"), ("amount", "f32")]);

        let (_, origin) = ArgumentDescriptor::load_or_infer(&source, "gain", &schema).unwrap();
        assert_eq!(origin, DescriptorOrigin::Inferred);

        fs::write(
            ArgumentDescriptor::sidecar_path(&source),
            r#"{"kernel": "gain", "arguments": [
                {"name": "data_in", "role": "input"},
                {"name": "amount", "role": "variable", "default": 0.5}
            ]}"#,
        )
        .unwrap();
        let (descriptor, origin) =
            ArgumentDescriptor::load_or_infer(&source, "gain", &schema).unwrap();
        assert_eq!(origin, DescriptorOrigin::Sidecar);
        assert_eq!(descriptor.arguments[1].default, Some(0.5));
    }
}
