//! Sample-level utilities: peak normalization and PCM byte conversion.

use rayon::prelude::*;

/// Bit depths accepted by [`to_pcm_bytes`].
pub const SUPPORTED_BIT_DEPTHS: [u16; 4] = [8, 16, 24, 32];

/// Largest absolute sample value.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .par_iter()
        .map(|s| s.abs())
        .reduce(|| 0.0, f32::max)
}

/// Scale samples so the peak equals `max_amplitude`. Silent input is left untouched.
pub fn normalize(samples: &mut [f32], max_amplitude: f32) {
    let peak = peak(samples);
    if peak <= 0.0 {
        return;
    }
    let scale = max_amplitude / peak;
    samples.par_iter_mut().for_each(|s| *s *= scale);
}

/// Convert float samples to little-endian PCM bytes.
///
/// 8-bit output is unsigned with a 128 offset, 16 and 24-bit output is
/// signed integer, 32-bit output is IEEE float. Samples are clamped to
/// `[-1, 1]` before integer conversion. Returns `None` for other depths.
pub fn to_pcm_bytes(samples: &[f32], bit_depth: u16) -> Option<Vec<u8>> {
    if !SUPPORTED_BIT_DEPTHS.contains(&bit_depth) {
        log::warn!("Unsupported PCM bit depth {}", bit_depth);
        return None;
    }
    let width = bit_depth as usize / 8;
    let mut bytes = vec![0u8; samples.len() * width];

    bytes
        .par_chunks_mut(width)
        .zip(samples.par_iter())
        .for_each(|(out, &sample)| {
            let s = sample.clamp(-1.0, 1.0);
            match bit_depth {
                8 => out[0] = (s * 127.0 + 128.0) as u8,
                16 => out.copy_from_slice(&((s * i16::MAX as f32) as i16).to_le_bytes()),
                24 => out.copy_from_slice(&((s * 8_388_607.0) as i32).to_le_bytes()[..3]),
                _ => out.copy_from_slice(&sample.to_le_bytes()),
            }
        });
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let mut samples = vec![0.1, -0.4, 0.2];
        normalize(&mut samples, 0.8);
        assert!((samples[1] + 0.8).abs() < 1e-6);
        assert!((samples[0] - 0.2).abs() < 1e-6);

        let mut silent = vec![0.0; 4];
        normalize(&mut silent, 1.0);
        assert_eq!(silent, [0.0; 4]);
    }

    #[test]
    fn test_pcm_widths() {
        let samples = [0.0f32, 1.0, -1.0];
        assert_eq!(to_pcm_bytes(&samples, 8).unwrap(), [128, 255, 1]);
        assert_eq!(to_pcm_bytes(&samples, 16).unwrap().len(), 6);
        assert_eq!(to_pcm_bytes(&samples, 24).unwrap().len(), 9);
        assert_eq!(to_pcm_bytes(&samples, 32).unwrap().len(), 12);
        assert!(to_pcm_bytes(&samples, 12).is_none());
    }

    #[test]
    fn test_pcm_16_bit_values() {
        let bytes = to_pcm_bytes(&[1.0, -1.0, 2.0], 16).unwrap();
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), i16::MAX);
    }

    #[test]
    fn test_pcm_24_bit_sign() {
        let bytes = to_pcm_bytes(&[-1.0], 24).unwrap();
        let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
        assert_eq!(value, -8_388_607);
    }
}
