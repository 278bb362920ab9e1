//! Property tests for chunk extraction and overlap-add reconstruction.

use proptest::prelude::*;
use signal_runtime::audio::chunking::{
    chunk_count, hop_size, overlap_add, reconstructed_len, split_chunks, stretched_hop,
};

proptest! {
    #[test]
    fn prop_chunks_start_at_hop_multiples(
        data in prop::collection::vec(-1.0f32..1.0, 1..2000),
        size in 1usize..256,
        overlap in 0.0f32..0.95,
    ) {
        let chunks = split_chunks(&data, size, overlap);
        prop_assert_eq!(chunks.len(), chunk_count(data.len(), size, overlap));

        let hop = hop_size(size, overlap);
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.len(), size);
            prop_assert_eq!(chunk.as_slice(), &data[i * hop..i * hop + size]);
        }
        if data.len() >= size && hop > 0 {
            prop_assert_eq!(chunks.len(), (data.len() - size) / hop + 1);
        }
    }

    #[test]
    fn prop_identity_without_overlap(
        size in 1usize..128,
        count in 1usize..32,
        seed in any::<u32>(),
    ) {
        let data: Vec<f32> = (0..size * count)
            .map(|i| {
                let bucket = (i as u32).wrapping_mul(2654435761).wrapping_add(seed) % 1000;
                bucket as f32 / 500.0 - 1.0
            })
            .collect();
        let chunks = split_chunks(&data, size, 0.0);
        let restored = overlap_add(&chunks, hop_size(size, 0.0), 1.0);
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn prop_output_length_follows_stretch(
        size in 2usize..256,
        count in 1usize..64,
        overlap in 0.0f32..0.9,
        stretch in 0.25f64..4.0,
    ) {
        let chunks = vec![vec![0.5f32; size]; count];
        let hop = hop_size(size, overlap);
        let out = overlap_add(&chunks, hop, stretch);
        let step = stretched_hop(hop, stretch).unwrap();
        prop_assert_eq!(Some(out.len()), reconstructed_len(count, size, step));
        prop_assert_eq!(out.len(), (count - 1) * step + size);
    }

    #[test]
    fn prop_double_stretch_within_one_hop(
        size in 2usize..512,
        count in 1usize..64,
    ) {
        let chunks = vec![vec![0.25f32; size]; count];
        let hop = hop_size(size, 0.5);
        let one = overlap_add(&chunks, hop, 1.0);
        let two = overlap_add(&chunks, hop, 2.0);
        let step = stretched_hop(hop, 2.0).unwrap();
        prop_assert!((two.len() as i64 - 2 * one.len() as i64).unsigned_abs() as usize <= step);
    }

    #[test]
    fn prop_stretched_span_scales(
        size in 2usize..256,
        count in 2usize..64,
        overlap in 0.0f32..0.9,
        stretch in 0.25f64..4.0,
    ) {
        // Distance from the first to the last chunk start scales with the
        // stretch, off by at most half a sample per rounded hop.
        let chunks = vec![vec![0.5f32; size]; count];
        let hop = hop_size(size, overlap);
        let span_one = (overlap_add(&chunks, hop, 1.0).len() - size) as f64;
        let span = (overlap_add(&chunks, hop, stretch).len() - size) as f64;
        prop_assert!((span - stretch * span_one).abs() <= 0.5 * (count - 1) as f64 + 1e-9);
    }

    #[test]
    fn prop_oversized_stretch_is_empty(
        count in 2usize..16,
        stretch in 1e12f64..1e300,
    ) {
        let chunks = vec![vec![1.0f32; 8]; count];
        prop_assert!(overlap_add(&chunks, 4, stretch).is_empty());
    }

    #[test]
    fn prop_constant_signal_survives_overlap(
        size in 8usize..256,
        count in 2usize..32,
        overlap in prop::sample::select(vec![0.25f32, 0.5, 0.75]),
        level in -1.0f32..1.0,
    ) {
        let chunks = vec![vec![level; size]; count];
        let out = overlap_add(&chunks, hop_size(size, overlap), 1.0);
        for &sample in &out[1..out.len() - 1] {
            prop_assert!((sample - level).abs() < 1e-4, "{} vs {}", sample, level);
        }
    }

    #[test]
    fn prop_degenerate_input_is_empty(
        data in prop::collection::vec(-1.0f32..1.0, 0..64),
        overlap in 1.0f32..5.0,
    ) {
        prop_assert!(split_chunks(&data, 8, overlap).is_empty());
        prop_assert!(split_chunks(&data, 0, 0.0).is_empty());
        prop_assert!(split_chunks(&data, data.len() + 1, 0.0).is_empty());
    }
}
