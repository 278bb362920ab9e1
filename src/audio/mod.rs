//! Host-side audio: objects, chunking, tempo, transforms and test signals.
//!
//! This module provides:
//! - `AudioObject` with explicit host/device residency
//! - Overlapping chunk extraction and Hann-weighted overlap-add
//! - BPM estimation by autocorrelation of per-chunk energies
//! - A RustFFT stream pool for host transforms
//! - Peak normalization, PCM conversion and synthetic waveforms

pub mod chunking;
pub mod fft;
pub mod object;
pub mod samples;
pub mod synth;
pub mod tempo;

pub use chunking::{hann_window, hop_size, overlap_add, overlap_add_bounded, split_chunks};
pub use fft::StreamPool;
pub use object::{AudioFormat, AudioObject, ChunkLayout, Residency, SignalForm};
pub use samples::{normalize, to_pcm_bytes};
pub use synth::{
    generate_click_track, generate_sine, generate_waveform, generate_white_noise, Waveform,
};
pub use tempo::{calculate_rms, estimate_bpm};
