//! Benchmarks for chunk extraction and overlap-add reconstruction.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use signal_runtime::audio::chunking::{hop_size, overlap_add, split_chunks};
use signal_runtime::audio::synth::generate_white_noise;

const SAMPLE_RATE: u32 = 44100;

fn bench_split_chunks(c: &mut Criterion) {
    let mut group = c.benchmark_group("Split Chunks");
    let samples = generate_white_noise(SAMPLE_RATE, 10.0, 1.0, 42);

    for chunk_size in [256, 1024, 4096] {
        group.throughput(Throughput::Elements(samples.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("overlap_0.5", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| black_box(split_chunks(&samples, size, 0.5)));
            },
        );
    }

    group.finish();
}

fn bench_overlap_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("Overlap Add");
    let samples = generate_white_noise(SAMPLE_RATE, 10.0, 1.0, 7);

    for overlap in [0.0f32, 0.5, 0.75] {
        let chunks = split_chunks(&samples, 1024, overlap);
        let hop = hop_size(1024, overlap);

        group.throughput(Throughput::Elements(samples.len() as u64));
        for stretch in [1.0f64, 2.0] {
            group.bench_with_input(
                BenchmarkId::new(format!("overlap_{}", overlap), format!("stretch_{}", stretch)),
                &chunks,
                |b, chunks| {
                    b.iter(|| black_box(overlap_add(chunks, hop, stretch)));
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_split_chunks, bench_overlap_add);
criterion_main!(benches);
