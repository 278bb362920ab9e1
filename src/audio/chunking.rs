//! Overlapping chunk extraction and windowed overlap-add reconstruction.
//!
//! Chunk `i` starts at `i * hop` where `hop = size - (int)(size * overlap)`.
//! Reconstruction places chunk `i` at `i * round(hop * stretch)`, weights it
//! with a symmetric Hann window and divides by the summed weights once all
//! chunks are accumulated. Accumulation is in f64.

use rayon::prelude::*;
use std::f64::consts::PI;
use std::sync::{Mutex, PoisonError};

type Accumulator = (Vec<f64>, Vec<f64>);

/// Weight sums below this produce a zero sample.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Samples shared by two neighbouring chunks.
pub fn overlap_size(size: usize, overlap: f32) -> usize {
    (size as f32 * overlap) as usize
}

/// Distance between the starts of two neighbouring chunks.
pub fn hop_size(size: usize, overlap: f32) -> usize {
    size.saturating_sub(overlap_size(size, overlap))
}

/// Number of whole chunks that fit in `len` samples, or 0 for degenerate input.
pub fn chunk_count(len: usize, size: usize, overlap: f32) -> usize {
    if len == 0 || size == 0 || len < size || !(0.0..1.0).contains(&overlap) {
        return 0;
    }
    let hop = hop_size(size, overlap);
    if hop == 0 {
        return 0;
    }
    (len - size) / hop + 1
}

/// Split `data` into overlapping chunks of `size` samples.
///
/// The tail that does not fill a whole chunk is dropped. Empty data, a zero
/// size, an overlap outside `[0, 1)` or data shorter than one chunk give an
/// empty list.
pub fn split_chunks<T>(data: &[T], size: usize, overlap: f32) -> Vec<Vec<T>>
where
    T: Copy + Send + Sync,
{
    let count = chunk_count(data.len(), size, overlap);
    if count == 0 {
        log::warn!(
            "Cannot chunk {} samples with size {} and overlap {}",
            data.len(),
            size,
            overlap
        );
        return Vec::new();
    }

    let hop = hop_size(size, overlap);
    (0..count)
        .into_par_iter()
        .map(|i| data[i * hop..i * hop + size].to_vec())
        .collect()
}

/// Symmetric Hann window of `size` points.
pub fn hann_window(size: usize) -> Vec<f64> {
    match size {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size - 1) as f64).cos()))
            .collect(),
    }
}

/// Longest buffer [`overlap_add`] will reconstruct, in samples.
pub const MAX_RECONSTRUCTED_LEN: usize = 1 << 25;

/// Hop scaled by a stretch factor, rounded to whole samples.
///
/// `None` when the product is not a representable sample count.
pub fn stretched_hop(hop: usize, stretch: f64) -> Option<usize> {
    let step = (hop as f64 * stretch).round();
    if !step.is_finite() || step < 0.0 || step >= usize::MAX as f64 {
        return None;
    }
    Some(step as usize)
}

/// Output length of an overlap-add over `count` chunks of `size` samples.
///
/// `None` on overflow.
pub fn reconstructed_len(count: usize, size: usize, stretched_hop: usize) -> Option<usize> {
    if count == 0 {
        return Some(0);
    }
    (count - 1).checked_mul(stretched_hop)?.checked_add(size)
}

/// Samples accumulated by one rayon worker, starting at `start`.
struct Partial {
    start: usize,
    data: Vec<f64>,
    weight: Vec<f64>,
}

/// Reconstruct a flat buffer from processed chunks.
///
/// Chunks are placed `round(hop * stretch)` apart. Where neighbouring chunks
/// overlap they are Hann-weighted; when they do not overlap every sample
/// carries weight one so an unstretched, non-overlapping split reconstructs
/// exactly. A non-positive or non-finite stretch gives an empty buffer, as
/// does a result longer than [`MAX_RECONSTRUCTED_LEN`].
pub fn overlap_add<C>(chunks: &[C], hop: usize, stretch: f64) -> Vec<f32>
where
    C: AsRef<[f32]> + Sync,
{
    overlap_add_bounded(chunks, hop, stretch, MAX_RECONSTRUCTED_LEN)
}

/// [`overlap_add`] with an explicit output length limit.
pub fn overlap_add_bounded<C>(chunks: &[C], hop: usize, stretch: f64, max_len: usize) -> Vec<f32>
where
    C: AsRef<[f32]> + Sync,
{
    if chunks.is_empty() {
        return Vec::new();
    }
    if !stretch.is_finite() || stretch <= 0.0 {
        log::warn!("Invalid stretch factor {}", stretch);
        return Vec::new();
    }

    let size = chunks.iter().map(|c| c.as_ref().len()).max().unwrap_or(0);
    let Some((step, out_len)) = stretched_hop(hop, stretch)
        .and_then(|step| Some((step, reconstructed_len(chunks.len(), size, step)?)))
    else {
        log::warn!(
            "Stretch {} overflows the output length of {} chunks",
            stretch,
            chunks.len()
        );
        return Vec::new();
    };
    if out_len > max_len {
        log::warn!(
            "Reconstructed length {} exceeds the limit of {} samples (stretch {})",
            out_len,
            max_len,
            stretch
        );
        return Vec::new();
    }
    if out_len == 0 {
        return Vec::new();
    }

    let window = if step >= size {
        vec![1.0; size]
    } else {
        hann_window(size)
    };

    let merged: Mutex<Accumulator> = Mutex::new((vec![0.0; out_len], vec![0.0; out_len]));
    chunks
        .par_iter()
        .enumerate()
        .fold(
            || None::<Partial>,
            |local, (i, chunk)| {
                // Offsets fit: (count - 1) * step + size was checked above.
                let offset = i * step;
                let mut part = local.unwrap_or(Partial {
                    start: offset,
                    data: Vec::new(),
                    weight: Vec::new(),
                });
                if offset < part.start {
                    let shift = part.start - offset;
                    part.data.splice(0..0, std::iter::repeat(0.0).take(shift));
                    part.weight.splice(0..0, std::iter::repeat(0.0).take(shift));
                    part.start = offset;
                }
                let end = (offset + chunk.as_ref().len()).min(out_len);
                let span = end.saturating_sub(part.start);
                if part.data.len() < span {
                    part.data.resize(span, 0.0);
                    part.weight.resize(span, 0.0);
                }
                for (j, &sample) in chunk.as_ref().iter().enumerate() {
                    let idx = offset + j;
                    if idx >= end {
                        break;
                    }
                    let local_idx = idx - part.start;
                    part.data[local_idx] += sample as f64 * window[j];
                    part.weight[local_idx] += window[j];
                }
                Some(part)
            },
        )
        .for_each(|local| {
            let Some(part) = local else {
                return;
            };
            let mut guard = merged.lock().unwrap_or_else(PoisonError::into_inner);
            let (total, weights) = &mut *guard;
            for (t, d) in total[part.start..].iter_mut().zip(&part.data) {
                *t += d;
            }
            for (w, l) in weights[part.start..].iter_mut().zip(&part.weight) {
                *w += l;
            }
        });

    let (data, weight) = merged.into_inner().unwrap_or_else(PoisonError::into_inner);
    data.par_iter()
        .zip(weight.par_iter())
        .map(|(&d, &w)| {
            if w > WEIGHT_EPSILON {
                (d / w) as f32
            } else {
                0.0
            }
        })
        .collect()
}
