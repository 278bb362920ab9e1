//! Audio kernel execution, beat scan and beat zoom.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::binding::{bind_arguments, BindingContext, Scalar};
use super::dispatch::{DispatchShape, KernelExecutor};
use super::ExecError;
use crate::audio::{chunking, tempo, AudioFormat, SignalForm};
use crate::kernel::{CompiledKernel, KernelDomain, ScalarTag};
use crate::memory::{ElementType, Handle, MemoryError};

/// Per-buffer length of the output group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLength {
    MatchInput,
    PerChunk(usize),
}

/// One audio kernel run over a device group.
#[derive(Debug, Clone)]
pub struct AudioRequest {
    pub handle: Handle,
    pub format: AudioFormat,
    pub chunk_size: usize,
    pub overlap: f32,
    pub variables: Vec<Scalar>,
    pub overrides: BTreeMap<String, Scalar>,
    pub output: OutputLength,
    /// Free `handle` once a different final group has been produced.
    pub free_input: bool,
}

impl AudioRequest {
    pub fn new(handle: Handle, format: AudioFormat, chunk_size: usize, overlap: f32) -> Self {
        Self {
            handle,
            format,
            chunk_size,
            overlap,
            variables: Vec::new(),
            overrides: BTreeMap::new(),
            output: OutputLength::MatchInput,
            free_input: false,
        }
    }

    pub fn with_variables(mut self, variables: Vec<Scalar>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_overrides(mut self, overrides: BTreeMap<String, Scalar>) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_output(mut self, output: OutputLength) -> Self {
        self.output = output;
        self
    }

    pub fn freeing_input(mut self, free_input: bool) -> Self {
        self.free_input = free_input;
        self
    }

    fn context(&self) -> BindingContext {
        BindingContext {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
            sample_rate: self.format.sample_rate,
            bit_depth: self.format.bit_depth,
            channels: self.format.channels,
            variables: self.variables.clone(),
            overrides: self.overrides.clone(),
            ..Default::default()
        }
    }
}

/// Result of an audio kernel run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioOutcome {
    pub handle: Handle,
    pub form: SignalForm,
    /// Value bound to the kernel's stretch `factor` argument, if it has one.
    pub factor: Option<f64>,
}

/// How the values a kernel writes for one chunk are reduced to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkReduction {
    First,
    Max,
    Mean,
}

impl ChunkReduction {
    pub fn reduce(self, values: &[f32]) -> f32 {
        match self {
            ChunkReduction::First => values.first().copied().unwrap_or(0.0),
            ChunkReduction::Max => values.iter().copied().reduce(f32::max).unwrap_or(0.0),
            ChunkReduction::Mean => {
                if values.is_empty() {
                    0.0
                } else {
                    values.iter().sum::<f32>() / values.len() as f32
                }
            }
        }
    }
}

/// Beat scan energies and the tempo estimated from them.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatScanResult {
    pub energies: Vec<f32>,
    pub bpm: f32,
}

/// Parameters bound to beat zoom kernels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeatZoomSettings {
    pub frame_rate: u32,
    pub threshold: f32,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub zoom_multiplier: f64,
}

impl Default for BeatZoomSettings {
    fn default() -> Self {
        Self {
            frame_rate: 20,
            threshold: 0.2,
            min_zoom: 1000.0,
            max_zoom: 10000.0,
            zoom_multiplier: 1.05,
        }
    }
}

impl BeatZoomSettings {
    /// Frames covered by one chunk, at least one.
    pub fn frames_per_chunk(&self, chunk_size: usize, sample_rate: u32) -> usize {
        if sample_rate == 0 {
            return 1;
        }
        (chunk_size as u64 * self.frame_rate as u64 / sample_rate as u64).max(1) as usize
    }

    fn overrides(&self) -> [(&'static str, Scalar); 5] {
        [
            ("frame_rate", Scalar::from(self.frame_rate)),
            ("threshold", Scalar::from(self.threshold)),
            ("min_zoom", Scalar::from(self.min_zoom)),
            ("max_zoom", Scalar::from(self.max_zoom)),
            ("zoom_multiplier", Scalar::from(self.zoom_multiplier)),
        ]
    }
}

impl KernelExecutor {
    /// Run an audio kernel over a group.
    ///
    /// Real data meeting a kernel that expects complex input is forward
    /// transformed first; complex output is then inverse transformed.
    /// Intermediate groups are freed on success and on failure.
    pub fn execute_audio(
        &self,
        kernel: &CompiledKernel,
        request: &AudioRequest,
    ) -> Result<AudioOutcome, ExecError> {
        expect_domain(kernel, KernelDomain::Audio)?;
        let register = self.register();
        let group = register
            .find_group(request.handle)
            .ok_or(MemoryError::HandleNotFound(request.handle))?;

        let wants_complex = kernel.input_type() == Some(ScalarTag::Complex);
        let transform = wants_complex && group.element_type() == ElementType::Float32;
        let working = if transform {
            self.transformer().forward(request.handle, false)?
        } else {
            request.handle
        };
        let release_working = |handle: Handle| {
            if transform {
                register.free(handle);
            }
        };

        let working_group = match register.find_group(working) {
            Some(group) => group,
            None => return Err(MemoryError::HandleNotFound(working).into()),
        };
        if let Some(expected) = kernel.input_type().and_then(ScalarTag::element_type) {
            if expected != working_group.element_type() {
                release_working(working);
                return Err(MemoryError::TypeMismatch {
                    stored: working_group.element_type(),
                    requested: expected,
                }
                .into());
            }
        }

        let ctx = request.context();
        let factor = bind_arguments(kernel, &ctx, request.chunk_size)
            .ok()
            .and_then(|bound| bound.scalar("factor"))
            .map(Scalar::as_f64);

        let output = if kernel.schema().pointer_count() >= 2 {
            let element_type = kernel
                .output_type()
                .and_then(ScalarTag::element_type)
                .unwrap_or(working_group.element_type());
            let lengths = match request.output {
                OutputLength::MatchInput => working_group.lengths().to_vec(),
                OutputLength::PerChunk(n) => vec![n.max(1); working_group.count()],
            };
            match register.allocate_with_lengths(&lengths, element_type) {
                Ok(handle) => Some(handle),
                Err(e) => {
                    release_working(working);
                    return Err(e.into());
                }
            }
        } else if request.output != OutputLength::MatchInput {
            release_working(working);
            return Err(ExecError::Unbindable {
                kernel: kernel.name().to_string(),
                argument: "output".to_string(),
                reason: "per-chunk output needs a separate output pointer".to_string(),
            });
        } else {
            None
        };

        if let Err(e) = self.dispatch_group(kernel, working, output, &ctx, DispatchShape::Linear) {
            if let Some(handle) = output {
                register.free(handle);
            }
            release_working(working);
            return Err(e);
        }

        let result = match output {
            Some(handle) => {
                release_working(working);
                handle
            }
            None => working,
        };

        let result_type = register
            .find_group(result)
            .map(|g| g.element_type())
            .ok_or(MemoryError::HandleNotFound(result))?;
        let (handle, form) = if transform && result_type == ElementType::Complex {
            match self.transformer().inverse(result, true) {
                Ok(handle) => (handle, SignalForm::Real),
                Err(e) => {
                    register.free(result);
                    return Err(e.into());
                }
            }
        } else if result_type == ElementType::Complex {
            (result, SignalForm::Complex)
        } else {
            (result, SignalForm::Real)
        };

        if request.free_input && handle != request.handle && register.contains(request.handle) {
            register.free(request.handle);
        }
        log::info!(
            "Executed audio kernel '{}' on {} -> {} ({:?})",
            kernel.name(),
            request.handle,
            handle,
            form
        );
        Ok(AudioOutcome {
            handle,
            form,
            factor,
        })
    }

    /// Run a beat scan kernel: one value per chunk, then autocorrelate.
    pub fn execute_beat_scan(
        &self,
        kernel: &CompiledKernel,
        request: &AudioRequest,
        reduction: ChunkReduction,
        min_bpm: f32,
        max_bpm: f32,
    ) -> Result<BeatScanResult, ExecError> {
        let request = request
            .clone()
            .with_output(OutputLength::PerChunk(1))
            .freeing_input(false);
        let energies = self.reduced_chunks(kernel, &request, reduction)?;

        let hop = chunking::hop_size(request.chunk_size, request.overlap);
        let bpm = tempo::estimate_bpm(
            &energies,
            hop as f32,
            request.format.sample_rate,
            min_bpm,
            max_bpm,
        );
        log::info!(
            "Beat scan '{}': {} chunks, {:.3} BPM",
            kernel.name(),
            energies.len(),
            bpm
        );
        Ok(BeatScanResult { energies, bpm })
    }

    /// Run a beat zoom kernel: one reduced zoom value per chunk.
    pub fn execute_beat_zoom(
        &self,
        kernel: &CompiledKernel,
        request: &AudioRequest,
        settings: &BeatZoomSettings,
        reduction: ChunkReduction,
    ) -> Result<Vec<f64>, ExecError> {
        let frames = settings.frames_per_chunk(request.chunk_size, request.format.sample_rate);
        let mut request = request
            .clone()
            .with_output(OutputLength::PerChunk(frames))
            .freeing_input(false);
        for (key, value) in settings.overrides() {
            request.overrides.entry(key.to_string()).or_insert(value);
        }

        let zooms = self.reduced_chunks(kernel, &request, reduction)?;
        Ok(zooms.into_iter().map(f64::from).collect())
    }

    fn reduced_chunks(
        &self,
        kernel: &CompiledKernel,
        request: &AudioRequest,
        reduction: ChunkReduction,
    ) -> Result<Vec<f32>, ExecError> {
        let outcome = self.execute_audio(kernel, request)?;
        let chunks = self.register().pull_chunks::<f32>(outcome.handle, true);
        if chunks.is_err() {
            self.register().free(outcome.handle);
        }
        Ok(chunks?
            .iter()
            .map(|chunk| reduction.reduce(chunk))
            .collect())
    }
}

pub(crate) fn expect_domain(
    kernel: &CompiledKernel,
    expected: KernelDomain,
) -> Result<(), ExecError> {
    if kernel.domain() != expected {
        log::warn!(
            "Kernel '{}' is {:?}, refusing {:?} execution",
            kernel.name(),
            kernel.domain(),
            expected
        );
        return Err(ExecError::DomainMismatch {
            kernel: kernel.name().to_string(),
            expected,
            actual: kernel.domain(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reductions() {
        let values = [0.5, 2.0, -1.0];
        assert_eq!(ChunkReduction::First.reduce(&values), 0.5);
        assert_eq!(ChunkReduction::Max.reduce(&values), 2.0);
        assert!((ChunkReduction::Mean.reduce(&values) - 0.5).abs() < 1e-6);
        assert_eq!(ChunkReduction::Max.reduce(&[]), 0.0);
        assert_eq!(ChunkReduction::First.reduce(&[]), 0.0);
    }

    #[test]
    fn test_frames_per_chunk() {
        let settings = BeatZoomSettings::default();
        assert_eq!(settings.frames_per_chunk(8192, 44100), 3);
        assert_eq!(settings.frames_per_chunk(512, 44100), 1);
        assert_eq!(settings.frames_per_chunk(44100, 44100), 20);
    }

    #[test]
    fn test_request_context() {
        let request = AudioRequest::new(Handle::NULL, AudioFormat::default(), 1024, 0.5)
            .with_variables(vec![Scalar::Float(1.0)]);
        let ctx = request.context();
        assert_eq!(ctx.chunk_size, 1024);
        assert_eq!(ctx.sample_rate, 44100);
        assert_eq!(ctx.channels, 2);
        assert_eq!(ctx.variables.len(), 1);
    }
}
