//! Synthetic signals for tests, benches and demos.
//!
//! Generates sine, square, saw and noise tones plus click tracks, mono or
//! interleaved over any channel count.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Periodic shape produced by [`generate_waveform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Noise,
}

/// Generate a sine wave.
///
/// # Arguments
/// * `frequency` - Frequency in Hz
/// * `sample_rate` - Sample rate in Hz
/// * `duration` - Duration in seconds
/// * `amplitude` - Amplitude (0.0 to 1.0)
pub fn generate_sine(frequency: f32, sample_rate: u32, duration: f32, amplitude: f32) -> Vec<f32> {
    generate_waveform(Waveform::Sine, frequency, sample_rate, 1, duration, amplitude)
}

/// Generate white noise.
///
/// Uses a linear congruential generator so runs are reproducible.
pub fn generate_white_noise(
    sample_rate: u32,
    duration: f32,
    amplitude: f32,
    seed: u64,
) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let mut state = seed;
    (0..num_samples)
        .map(|_| amplitude * next_noise(&mut state))
        .collect()
}

/// Generate a waveform with `channels` interleaved copies of each frame.
pub fn generate_waveform(
    waveform: Waveform,
    frequency: f32,
    sample_rate: u32,
    channels: u16,
    duration: f32,
    amplitude: f32,
) -> Vec<f32> {
    let frames = (duration * sample_rate as f32) as usize;
    let channels = channels.max(1) as usize;
    let mut state = 0x5eed_u64;

    let mut samples = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let phase = (frequency * t).fract();
        let value = match waveform {
            Waveform::Sine => (2.0 * PI * frequency * t).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Noise => next_noise(&mut state),
        };
        samples.extend(std::iter::repeat(amplitude * value).take(channels));
    }
    samples
}

/// Generate a click track (metronome).
///
/// Creates short decaying clicks at regular intervals based on BPM.
pub fn generate_click_track(
    bpm: f32,
    sample_rate: u32,
    duration: f32,
    click_freq: f32,
) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let samples_per_beat = ((60.0 / bpm * sample_rate as f32) as usize).max(1);
    let click_samples = (sample_rate as f32 * 0.01) as usize; // 10ms click

    let mut samples = vec![0.0; num_samples];
    let mut pos = 0;
    while pos < num_samples {
        for i in 0..click_samples.min(num_samples - pos) {
            let t = i as f32 / sample_rate as f32;
            let envelope = (1.0 - i as f32 / click_samples as f32).powi(2);
            samples[pos + i] = envelope * (2.0 * PI * click_freq * t).sin();
        }
        pos += samples_per_beat;
    }
    samples
}

fn next_noise(state: &mut u64) -> f32 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    (*state as f32 / u64::MAX as f32) * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_sine() {
        let samples = generate_sine(440.0, 44100, 1.0, 0.5);
        assert_eq!(samples.len(), 44100);

        let max = samples.iter().cloned().fold(0.0f32, f32::max);
        assert!((max - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_generate_white_noise() {
        let samples = generate_white_noise(44100, 1.0, 1.0, 12345);
        assert_eq!(samples.len(), 44100);

        let has_positive = samples.iter().any(|&s| s > 0.0);
        let has_negative = samples.iter().any(|&s| s < 0.0);
        assert!(has_positive && has_negative);
        assert_eq!(samples, generate_white_noise(44100, 1.0, 1.0, 12345));
    }

    #[test]
    fn test_waveform_interleaves_channels() {
        let samples = generate_waveform(Waveform::Saw, 100.0, 1000, 2, 0.1, 1.0);
        assert_eq!(samples.len(), 200);
        for frame in samples.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn test_square_is_bipolar() {
        let samples = generate_waveform(Waveform::Square, 10.0, 1000, 1, 0.1, 0.25);
        assert!(samples.iter().all(|s| s.abs() == 0.25));
        assert!(samples.contains(&0.25) && samples.contains(&-0.25));
    }

    #[test]
    fn test_generate_click_track() {
        let samples = generate_click_track(120.0, 44100, 2.0, 1000.0);
        assert_eq!(samples.len(), 88200);
        assert!(samples[22050].abs() < 1e-6);
        assert!(samples[22051].abs() > 0.0);
    }
}
