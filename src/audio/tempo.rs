//! Tempo estimation from per-chunk energies.

/// Default lower bound of the tempo search.
pub const DEFAULT_MIN_BPM: f32 = 60.0;
/// Default upper bound of the tempo search.
pub const DEFAULT_MAX_BPM: f32 = 200.0;

/// Estimate BPM by autocorrelating per-chunk energies.
///
/// Energies are assumed `hop_samples` apart. The search covers lags that
/// correspond to `[min_bpm, max_bpm]`; the lag with the strongest
/// correlation wins. Returns 0.0 when there is not enough data.
pub fn estimate_bpm(
    energies: &[f32],
    hop_samples: f32,
    sample_rate: u32,
    min_bpm: f32,
    max_bpm: f32,
) -> f32 {
    let len = energies.len();
    if len < 2 || hop_samples <= 0.0 || sample_rate == 0 || min_bpm <= 0.0 || max_bpm <= 0.0 {
        return 0.0;
    }

    let hop_time = hop_samples / sample_rate as f32;
    let min_lag = ((60.0 / max_bpm / hop_time) as usize).max(1);
    let max_lag = ((60.0 / min_bpm / hop_time) as usize).min(len - 1);
    if min_lag > max_lag {
        log::debug!(
            "No lag between {} and {} for {} energies",
            min_lag,
            max_lag,
            len
        );
        return 0.0;
    }

    let mut best_lag = min_lag;
    let mut best_corr = f32::NEG_INFINITY;
    for lag in min_lag..=max_lag {
        let corr: f32 = energies[..len - lag]
            .iter()
            .zip(&energies[lag..])
            .map(|(a, b)| a * b)
            .sum();
        if corr > best_corr {
            best_corr = corr;
            best_lag = lag;
        }
    }

    60.0 / (best_lag as f32 * hop_time)
}

/// Root mean square of a buffer.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
