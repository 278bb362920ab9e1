//! Integration tests for device and host spectral transforms.

use signal_runtime::audio::generate_sine;
use signal_runtime::exec::{SpectralTransformer, TransformBackend};
use signal_runtime::gpu::{FourierError, GpuContext};
use signal_runtime::memory::{Complex32, ElementType, MemoryRegister};
use std::sync::Arc;

const SAMPLE_RATE: u32 = 44100;

fn create_register() -> Option<Arc<MemoryRegister>> {
    let ctx = GpuContext::new_blocking().ok()?;
    Some(Arc::new(MemoryRegister::new(
        ctx.device.clone(),
        ctx.queue.clone(),
    )))
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    let scale = expected.iter().fold(1e-3f32, |m, s| m.max(s.abs()));
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= 1e-4 * scale,
            "sample {}: got {}, expected {}",
            i,
            a,
            e
        );
    }
}

fn chunks() -> Vec<Vec<f32>> {
    let signal = generate_sine(440.0, SAMPLE_RATE, 0.05, 0.8);
    signal.chunks_exact(512).take(4).map(|c| c.to_vec()).collect()
}

fn round_trip(transformer: &SpectralTransformer, register: &MemoryRegister) {
    let chunks = chunks();
    let input = register.push_chunks(&chunks).unwrap();

    let spectrum = transformer.forward(input, false).unwrap();
    assert_ne!(spectrum, input);
    let group = register.find_group(spectrum).unwrap();
    assert_eq!(group.element_type(), ElementType::Complex);
    assert_eq!(group.lengths(), &[512; 4]);

    let restored = transformer.inverse(spectrum, true).unwrap();
    assert!(!register.contains(spectrum));
    let pulled = register.pull_chunks::<f32>(restored, true).unwrap();
    for (got, expected) in pulled.iter().zip(&chunks) {
        assert_close(got, expected);
    }

    assert_eq!(register.pull::<f32>(input, true).unwrap(), chunks.concat());
    assert_eq!(register.live_groups(), 0);
}

#[test]
fn test_device_round_trip() {
    if let Some(register) = create_register() {
        let transformer = SpectralTransformer::from_config(register.clone(), None);
        assert!(transformer.backend().is_device());
        round_trip(&transformer, &register);
    }
}

#[test]
fn test_stream_round_trip() {
    if let Some(register) = create_register() {
        let transformer = SpectralTransformer::from_config(register.clone(), Some(4));
        assert!(!transformer.backend().is_device());
        round_trip(&transformer, &register);
    }
}

#[test]
fn test_backends_agree_on_spectrum() {
    if let Some(register) = create_register() {
        let device = SpectralTransformer::from_config(register.clone(), None);
        let streams = SpectralTransformer::from_config(register.clone(), Some(4));
        let input = register.push_chunks(&chunks()).unwrap();

        let a = register
            .pull::<Complex32>(device.forward(input, false).unwrap(), true)
            .unwrap();
        let b = register
            .pull::<Complex32>(streams.forward(input, true).unwrap(), true)
            .unwrap();
        let peak = b.iter().fold(0.0f32, |m, c| m.max(c.norm()));
        for (x, y) in a.iter().zip(&b) {
            assert!((x.re - y.re).abs() < 1e-3 * peak);
            assert!((x.im - y.im).abs() < 1e-3 * peak);
        }
        assert_eq!(register.live_groups(), 0);
    }
}

#[test]
fn test_stream_pool_rejects_large_batches() {
    if let Some(register) = create_register() {
        let transformer = SpectralTransformer::new(
            register.clone(),
            TransformBackend::Streams(signal_runtime::audio::StreamPool::new(2)),
        );
        let input = register.push_chunks(&chunks()).unwrap();
        assert!(matches!(
            transformer.forward(input, true),
            Err(FourierError::InsufficientStreams {
                requested: 4,
                available: 2
            })
        ));
        // The rejected input is not freed.
        assert!(register.contains(input));
        assert_eq!(register.live_groups(), 1);
        register.free(input);
    }
}

#[test]
fn test_wrong_direction_is_rejected() {
    if let Some(register) = create_register() {
        for streams in [None, Some(4)] {
            let transformer = SpectralTransformer::from_config(register.clone(), streams);
            let input = register.push(&[0.5f32; 64]).unwrap();
            assert!(matches!(
                transformer.inverse(input, true),
                Err(FourierError::WrongElementType { .. })
            ));
            register.free(input);
        }
        assert_eq!(register.live_groups(), 0);
    }
}
