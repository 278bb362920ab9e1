//! Kernel source files: verification, entry name extraction and domains.
//!
//! Kernels are WGSL files with a single `@compute` entry point. The entry
//! name should match the file stem; a mismatch is logged but tolerated.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::compiler::KernelError;

/// File extension of kernel sources.
pub const KERNEL_EXTENSION: &str = "wgsl";

/// Marker that precedes the kernel entry declaration.
pub const ENTRY_MARKER: &str = "@compute";

/// Directory-based domain a kernel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelDomain {
    Audio,
    Imaging,
    Other,
}

impl KernelDomain {
    /// Derive the domain from the first directory below the kernel root.
    ///
    /// A kernel outside `root` is classified by its own parent directory.
    pub fn from_path(path: &Path, root: &Path) -> Self {
        let directory = match path.strip_prefix(root) {
            Ok(relative) if relative.components().count() > 1 => relative.components().next(),
            Ok(_) => None,
            Err(_) => path.parent().and_then(|p| p.components().next_back()),
        };
        directory.map_or(KernelDomain::Other, |component| {
            Self::from_directory(&component.as_os_str().to_string_lossy())
        })
    }

    fn from_directory(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "audio" => KernelDomain::Audio,
            "imaging" | "image" => KernelDomain::Imaging,
            _ => KernelDomain::Other,
        }
    }
}

/// Check that `path` names a usable kernel source.
///
/// Returns the normalized path, or `None` (with a log line) if the file is
/// missing, has the wrong extension, is empty, or lacks an entry marker.
pub fn verify_kernel_source(path: &Path) -> Option<PathBuf> {
    if !path.is_file() {
        log::warn!("Kernel file not found: {}", path.display());
        return None;
    }

    let has_extension = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(KERNEL_EXTENSION));
    if !has_extension {
        log::warn!("Not a .{} kernel: {}", KERNEL_EXTENSION, path.display());
        return None;
    }

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            log::warn!("Cannot read kernel {}: {}", path.display(), e);
            return None;
        }
    };
    if source.trim().is_empty() {
        log::warn!("Kernel file is empty: {}", path.display());
        return None;
    }
    if !source.contains(ENTRY_MARKER) {
        log::warn!("No {} entry in {}", ENTRY_MARKER, path.display());
        return None;
    }

    Some(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()))
}

/// Extract the entry point name that follows the `@compute` marker.
///
/// Returns `Ok(None)` when the marker is absent. A name that is empty or
/// contains whitespace means the source is corrupt.
pub fn extract_entry_name(source: &str) -> Result<Option<String>, KernelError> {
    let Some(marker) = source.find(ENTRY_MARKER) else {
        return Ok(None);
    };
    let rest = &source[marker + ENTRY_MARKER.len()..];

    let Some(name_start) = find_fn_keyword(rest) else {
        return Err(KernelError::CorruptEntryName(String::new()));
    };
    let declaration = &rest[name_start..];
    let Some(paren) = declaration.find('(') else {
        return Err(KernelError::CorruptEntryName(declaration.trim().to_string()));
    };

    let name = declaration[..paren].trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        log::error!("Corrupt kernel entry name: {:?}", name);
        return Err(KernelError::CorruptEntryName(name.to_string()));
    }
    Ok(Some(name.to_string()))
}

/// Log when the entry name differs from the file stem. Returns whether they match.
pub fn entry_matches_file(path: &Path, entry: &str) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let matches = stem == entry;
    if !matches {
        log::warn!(
            "Kernel entry '{}' does not match file name '{}'",
            entry,
            path.display()
        );
    }
    matches
}

/// Byte offset just past the first standalone `fn` keyword.
fn find_fn_keyword(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.match_indices("fn")
        .map(|(i, _)| i)
        .find(|&i| {
            let standalone = i == 0 || !is_ident_byte(bytes[i - 1]);
            let followed = bytes.get(i + 2).is_some_and(|b| b.is_ascii_whitespace());
            standalone && followed
        })
        .map(|i| i + 2)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
