//! Audio objects and where their samples live.

use serde::{Deserialize, Serialize};

use super::chunking;
use crate::memory::Handle;

/// Sample rate, channel count and bit depth of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 2,
            bit_depth: 32,
        }
    }
}

/// Whether device data is time-domain samples or a spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalForm {
    Real,
    Complex,
}

impl SignalForm {
    /// Single-letter code: `f` for real, `c` for complex.
    pub fn code(self) -> char {
        match self {
            SignalForm::Real => 'f',
            SignalForm::Complex => 'c',
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SignalForm::Real => SignalForm::Complex,
            SignalForm::Complex => SignalForm::Real,
        }
    }
}

/// How device data was chunked, needed to reconstruct it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkLayout {
    pub chunk_size: usize,
    pub overlap: f32,
    /// Stretch applied by kernels since chunking.
    pub stretch: f64,
}

impl ChunkLayout {
    pub fn new(chunk_size: usize, overlap: f32) -> Self {
        Self {
            chunk_size,
            overlap,
            stretch: 1.0,
        }
    }

    pub fn hop(&self) -> usize {
        chunking::hop_size(self.chunk_size, self.overlap)
    }
}

/// Exactly one place an object's samples can be.
#[derive(Debug, Clone, PartialEq)]
pub enum Residency {
    Host {
        samples: Vec<f32>,
    },
    Device {
        handle: Handle,
        form: SignalForm,
        /// `None` when the samples were pushed as one flat buffer.
        layout: Option<ChunkLayout>,
    },
    Invalid,
}

/// One media asset: format metadata plus its samples on host or device.
#[derive(Debug, Clone)]
pub struct AudioObject {
    name: String,
    format: AudioFormat,
    bpm: f32,
    residency: Residency,
}

impl AudioObject {
    /// Wrap interleaved host samples. Empty samples give an invalid object.
    pub fn new(name: impl Into<String>, samples: Vec<f32>, format: AudioFormat) -> Self {
        let residency = if samples.is_empty() {
            Residency::Invalid
        } else {
            Residency::Host { samples }
        };
        Self {
            name: name.into(),
            format,
            bpm: 0.0,
            residency,
        }
    }

    /// A silent track of `frames` frames.
    pub fn empty_track(name: impl Into<String>, frames: usize, format: AudioFormat) -> Self {
        let samples = vec![0.0; frames * format.channels.max(1) as usize];
        Self::new(name, samples, format)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn bit_depth(&self) -> u16 {
        self.format.bit_depth
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = bpm;
    }

    pub fn residency(&self) -> &Residency {
        &self.residency
    }

    pub fn is_on_host(&self) -> bool {
        matches!(self.residency, Residency::Host { .. })
    }

    pub fn is_on_device(&self) -> bool {
        matches!(self.residency, Residency::Device { .. })
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self.residency, Residency::Invalid)
    }

    /// Host samples, if the object is on the host.
    pub fn samples(&self) -> Option<&[f32]> {
        match &self.residency {
            Residency::Host { samples } => Some(samples),
            _ => None,
        }
    }

    /// Device handle, if the object is on the device.
    pub fn handle(&self) -> Option<Handle> {
        match self.residency {
            Residency::Device { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn form(&self) -> Option<SignalForm> {
        match self.residency {
            Residency::Device { form, .. } => Some(form),
            _ => None,
        }
    }

    pub fn layout(&self) -> Option<ChunkLayout> {
        match self.residency {
            Residency::Device { layout, .. } => layout,
            _ => None,
        }
    }

    /// Duration of host samples in seconds.
    pub fn duration(&self) -> f64 {
        let rate = self.format.sample_rate as f64 * self.format.channels.max(1) as f64;
        match (&self.residency, rate > 0.0) {
            (Residency::Host { samples }, true) => samples.len() as f64 / rate,
            _ => 0.0,
        }
    }

    /// Take the host samples out, leaving the object invalid until it is
    /// placed again.
    pub fn take_samples(&mut self) -> Option<Vec<f32>> {
        match std::mem::replace(&mut self.residency, Residency::Invalid) {
            Residency::Host { samples } => Some(samples),
            other => {
                self.residency = other;
                None
            }
        }
    }

    /// Record that the samples now live in a device group.
    pub fn place_on_device(
        &mut self,
        handle: Handle,
        form: SignalForm,
        layout: Option<ChunkLayout>,
    ) {
        self.residency = if handle.is_null() {
            Residency::Invalid
        } else {
            Residency::Device {
                handle,
                form,
                layout,
            }
        };
    }

    /// Record that the samples are back on the host.
    pub fn place_on_host(&mut self, samples: Vec<f32>) {
        self.residency = if samples.is_empty() {
            Residency::Invalid
        } else {
            Residency::Host { samples }
        };
    }

    /// Record a stretch applied to the chunked device data.
    pub fn apply_stretch(&mut self, factor: f64) {
        if let Residency::Device {
            layout: Some(layout),
            ..
        } = &mut self.residency
        {
            layout.stretch *= factor;
        }
        if factor > 0.0 && self.bpm > 0.0 {
            self.bpm = (self.bpm as f64 / factor) as f32;
        }
    }

    pub fn invalidate(&mut self) {
        self.residency = Residency::Invalid;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty_is_invalid() {
        let obj = AudioObject::new("empty", Vec::new(), AudioFormat::default());
        assert!(!obj.is_valid());
        assert!(obj.samples().is_none());
    }

    #[test]
    fn test_empty_track() {
        let format = AudioFormat {
            sample_rate: 1000,
            channels: 2,
            bit_depth: 16,
        };
        let obj = AudioObject::empty_track("silence", 500, format);
        assert_eq!(obj.samples().map(<[f32]>::len), Some(1000));
        assert!((obj.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_residency_transitions() {
        let mut obj = AudioObject::new("tone", vec![0.5; 8], AudioFormat::default());
        let samples = obj.take_samples().unwrap();
        assert!(!obj.is_valid());

        let handle = Handle::from_raw((1 << 32) | 3);
        obj.place_on_device(handle, SignalForm::Real, Some(ChunkLayout::new(4, 0.5)));
        assert!(obj.is_on_device());
        assert!(obj.samples().is_none());
        assert_eq!(obj.handle(), Some(handle));
        assert_eq!(obj.layout().unwrap().hop(), 2);
        assert!(obj.take_samples().is_none());
        assert!(obj.is_on_device());

        obj.place_on_host(samples);
        assert!(obj.is_on_host());
        assert!(obj.handle().is_none());

        obj.place_on_device(Handle::NULL, SignalForm::Real, None);
        assert!(!obj.is_valid());
    }

    #[test]
    fn test_stretch_divides_bpm() {
        let mut obj = AudioObject::new("beat", vec![0.0; 4], AudioFormat::default());
        obj.set_bpm(120.0);
        obj.place_on_device(
            Handle::from_raw((1 << 32) | 1),
            SignalForm::Complex,
            Some(ChunkLayout::new(4, 0.0)),
        );
        obj.apply_stretch(1.5);
        assert!((obj.bpm() - 80.0).abs() < 1e-4);
        assert_eq!(obj.layout().unwrap().stretch, 1.5);
    }

    #[test]
    fn test_form_codes() {
        assert_eq!(SignalForm::Real.code(), 'f');
        assert_eq!(SignalForm::Real.toggled(), SignalForm::Complex);
    }
}
