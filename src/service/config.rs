//! Service configuration, loadable from JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::ServiceError;
use crate::audio::chunking::MAX_RECONSTRUCTED_LEN;
use crate::audio::tempo::{DEFAULT_MAX_BPM, DEFAULT_MIN_BPM};
use crate::audio::AudioFormat;
use crate::exec::{ChunkReduction, FALLBACK_WORK_GROUP_SIZE};

/// Settings for a [`super::SignalService`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Directory scanned for `.wgsl` kernels.
    pub kernel_root: PathBuf,
    pub chunk_size: usize,
    pub overlap: f32,
    pub fallback_work_group_size: u32,
    /// Host FFT stream count; `None` runs transforms on the device.
    pub transform_streams: Option<usize>,
    pub beat_scan_reduction: ChunkReduction,
    pub beat_zoom_reduction: ChunkReduction,
    pub min_bpm: f32,
    pub max_bpm: f32,
    pub default_format: AudioFormat,
    /// Longest buffer a chunked pull may reconstruct, in samples.
    pub max_reconstructed_len: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            kernel_root: PathBuf::from("kernels"),
            chunk_size: 1024,
            overlap: 0.5,
            fallback_work_group_size: FALLBACK_WORK_GROUP_SIZE,
            transform_streams: None,
            beat_scan_reduction: ChunkReduction::First,
            beat_zoom_reduction: ChunkReduction::Max,
            min_bpm: DEFAULT_MIN_BPM,
            max_bpm: DEFAULT_MAX_BPM,
            default_format: AudioFormat::default(),
            max_reconstructed_len: MAX_RECONSTRUCTED_LEN,
        }
    }
}

impl ServiceConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ServiceError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ServiceError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        log::info!("Loaded service config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn to_json_pretty(&self) -> Result<String, ServiceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        let invalid = |reason: String| Err(ServiceError::InvalidConfig(reason));
        if self.chunk_size == 0 {
            return invalid("chunk_size must be positive".to_string());
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return invalid(format!("overlap {} is outside [0, 1)", self.overlap));
        }
        if self.fallback_work_group_size == 0 {
            return invalid("fallback_work_group_size must be positive".to_string());
        }
        if self.transform_streams == Some(0) {
            return invalid("transform_streams must be positive when set".to_string());
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return invalid(format!(
                "BPM range [{}, {}] is empty",
                self.min_bpm, self.max_bpm
            ));
        }
        if self.default_format.sample_rate == 0 || self.default_format.channels == 0 {
            return invalid("default_format needs a sample rate and channels".to_string());
        }
        if self.max_reconstructed_len == 0 {
            return invalid("max_reconstructed_len must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.beat_scan_reduction, ChunkReduction::First);
        assert_eq!(config.beat_zoom_reduction, ChunkReduction::Max);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config =
            ServiceConfig::from_json_str(r#"{"chunk_size": 2048, "transform_streams": 4}"#)
                .unwrap();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.transform_streams, Some(4));
        assert_eq!(config.overlap, 0.5);
        assert_eq!(config.kernel_root, PathBuf::from("kernels"));
        assert_eq!(config.max_reconstructed_len, MAX_RECONSTRUCTED_LEN);
    }

    #[test]
    fn test_reduction_names() {
        let config = ServiceConfig::from_json_str(r#"{"beat_scan_reduction": "mean"}"#).unwrap();
        assert_eq!(config.beat_scan_reduction, ChunkReduction::Mean);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            ServiceConfig::from_json_str(r#"{"overlap": 1.0}"#),
            Err(ServiceError::InvalidConfig(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json_str(r#"{"min_bpm": 200, "max_bpm": 60}"#),
            Err(ServiceError::InvalidConfig(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json_str(r#"{"max_reconstructed_len": 0}"#),
            Err(ServiceError::InvalidConfig(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json_str("{not json"),
            Err(ServiceError::Json(_))
        ));
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"kernel_root": "/tmp/k", "min_bpm": 80}}"#).unwrap();
        let config = ServiceConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.kernel_root, PathBuf::from("/tmp/k"));
        assert_eq!(config.min_bpm, 80.0);

        let round = ServiceConfig::from_json_str(&config.to_json_pretty().unwrap()).unwrap();
        assert_eq!(round, config);
    }
}
