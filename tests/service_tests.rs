//! End-to-end tests of the signal service on the bundled kernels.

use signal_runtime::audio::{generate_click_track, generate_sine, overlap_add};
use signal_runtime::exec::{BeatZoomSettings, ImageFormat, Scalar};
use signal_runtime::{AudioFormat, AudioObject, Handle, ServiceConfig, SignalForm, SignalService};
use std::collections::BTreeMap;
use std::path::Path;

const SAMPLE_RATE: u32 = 44100;

fn mono() -> AudioFormat {
    AudioFormat {
        sample_rate: SAMPLE_RATE,
        channels: 1,
        bit_depth: 16,
    }
}

fn create_service(streams: Option<usize>) -> Option<SignalService> {
    let config = ServiceConfig {
        kernel_root: Path::new(env!("CARGO_MANIFEST_DIR")).join("kernels"),
        chunk_size: 512,
        overlap: 0.0,
        transform_streams: streams,
        ..Default::default()
    };
    SignalService::new(config).ok()
}

fn overrides(pairs: &[(&str, f64)]) -> BTreeMap<String, Scalar> {
    pairs
        .iter()
        .map(|&(k, v)| (k.to_string(), Scalar::Float(v)))
        .collect()
}

#[test]
fn test_flat_object_round_trip() {
    if let Some(service) = create_service(None) {
        let samples = generate_sine(220.0, SAMPLE_RATE, 0.1, 0.5);
        let mut object = AudioObject::new("sine", samples.clone(), mono());

        let handle = service.push_flat_samples(&mut object);
        assert!(!handle.is_null());
        assert!(object.is_on_device());
        assert!(object.samples().is_none());
        assert_eq!(object.form(), Some(SignalForm::Real));

        // Pushing again is refused: nothing is on the host.
        assert!(service.push_flat_samples(&mut object).is_null());

        assert!(service.pull_flat_samples(&mut object));
        assert_eq!(object.samples(), Some(samples.as_slice()));
        assert!(!service.register().contains(handle));

        assert!(service.move_audio(&mut object));
        assert!(object.is_on_device());
        assert!(service.move_audio(&mut object));
        assert!(object.is_on_host());
    }
}

#[test]
fn test_chunked_identity_without_overlap() {
    if let Some(service) = create_service(None) {
        let samples: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut object = AudioObject::new("chunks", samples.clone(), mono());

        let handle = service.push_chunked_samples(&mut object, 512, 0.0);
        assert_eq!(service.register().find_group(handle).unwrap().count(), 8);
        assert!(service.pull_chunked_samples(&mut object, 1.0));

        let restored = object.samples().unwrap();
        assert_eq!(restored.len(), samples.len());
        for (a, b) in restored.iter().zip(&samples) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}

#[test]
fn test_fft_toggles_form() {
    for streams in [None, Some(8)] {
        if let Some(service) = create_service(streams) {
            let samples = generate_sine(1000.0, SAMPLE_RATE, 0.05, 0.7)[..2048].to_vec();
            let mut object = AudioObject::new("tone", samples.clone(), mono());

            assert!(service.perform_fft(&mut object));
            assert_eq!(object.form(), Some(SignalForm::Complex));
            assert!(!service.pull_flat_samples(&mut object));
            assert!(!service.perform_fft(&mut object));

            assert!(service.perform_ifft(&mut object));
            assert_eq!(object.form(), Some(SignalForm::Real));
            assert_eq!(service.register().live_groups(), 1);

            assert!(service.pull_flat_samples(&mut object));
            let restored = object.samples().unwrap();
            for (a, b) in restored.iter().zip(&samples) {
                assert!((a - b).abs() < 1e-4);
            }
        }
    }
}

#[test]
fn test_gain_kernel_in_place() {
    if let Some(service) = create_service(None) {
        let samples: Vec<f32> = (0..2048).map(|i| ((i % 100) as f32 - 50.0) / 100.0).collect();
        let mut object = AudioObject::new("ramp", samples.clone(), mono());

        assert!(service.process_audio(&mut object, "gain00", overrides(&[("gain", 0.5)])));
        assert_eq!(service.register().live_groups(), 1);
        assert!(service.pull_flat_samples(&mut object));

        let processed = object.samples().unwrap();
        for (a, b) in processed.iter().zip(&samples) {
            assert!((a - b * 0.5).abs() < 1e-6);
        }
    }
}

#[test]
fn test_stretch_scales_output_and_bpm() {
    if let Some(service) = create_service(None) {
        let samples = generate_sine(330.0, SAMPLE_RATE, 0.5, 0.5);

        let mut plain = AudioObject::new("plain", samples.clone(), mono());
        assert!(service.process_audio(&mut plain, "stretch00", BTreeMap::new()));
        assert!(service.pull_flat_samples(&mut plain));
        let plain_len = plain.samples().unwrap().len();

        let mut stretched = AudioObject::new("stretched", samples, mono());
        stretched.set_bpm(120.0);
        assert!(service.process_audio(&mut stretched, "stretch00", overrides(&[("factor", 2.0)])));
        assert_eq!(stretched.layout().unwrap().stretch, 2.0);
        assert!((stretched.bpm() - 60.0).abs() < 1e-3);
        assert!(service.pull_flat_samples(&mut stretched));
        let stretched_len = stretched.samples().unwrap().len();

        assert!(stretched_len.abs_diff(2 * plain_len) <= 512);
        assert_eq!(service.register().live_groups(), 0);
    }
}

#[test]
fn test_beat_scan_finds_tempo() {
    if let Some(service) = create_service(None) {
        let clicks = generate_click_track(120.0, SAMPLE_RATE, 10.0, 1000.0);
        let mut object = AudioObject::new("clicks", clicks, mono());

        let bpm = service.beat_scan(&mut object, "beat_scan00");
        assert!((bpm - 120.0).abs() < 5.0, "got {} BPM", bpm);
        assert_eq!(object.bpm(), bpm);
        // The scan leaves the chunked signal on the device.
        assert!(object.is_on_device());
        assert_eq!(service.register().live_groups(), 1);
    }
}

#[test]
fn test_beat_zoom_per_chunk() {
    if let Some(service) = create_service(None) {
        let clicks = generate_click_track(120.0, SAMPLE_RATE, 2.0, 1000.0);
        let mut object = AudioObject::new("clicks", clicks, mono());
        assert!(!service.push_chunked_samples(&mut object, 8192, 0.0).is_null());

        let settings = BeatZoomSettings::default();
        let zooms = service.beat_zoom(&mut object, "beat_zoom00", &settings);
        assert_eq!(zooms.len(), 10);
        for zoom in zooms {
            assert!(zoom >= settings.min_zoom && zoom <= settings.max_zoom);
        }
    }
}

#[test]
fn test_image_invert() {
    if let Some(service) = create_service(None) {
        let format = ImageFormat::new(4, 2, 4, 8);
        let pixels: Vec<u8> = (0..8).flat_map(|i| [i * 10, 0x22, 0xf0, 0x80]).collect();
        let input = service.push_image(&pixels);

        let output = service.execute_image_kernel(input, "invert00", &format, BTreeMap::new());
        assert!(!output.is_null());
        assert_ne!(output, input);

        let inverted = service.pull_image(output, true);
        for (got, src) in inverted.chunks(4).zip(pixels.chunks(4)) {
            assert_eq!(got, [255 - src[0], 0xdd, 0x0f, 0x80]);
        }
        assert_eq!(service.free(input), 32);
    }
}

#[test]
fn test_handle_surface_returns_sentinels() {
    if let Some(service) = create_service(Some(2)) {
        assert!(service.load_kernel("does_not_exist").is_none());
        assert!(service.push_samples(&[]).is_null());
        assert!(service.pull_samples(Handle::NULL, false).is_empty());
        assert!(service
            .execute_kernel(Handle::NULL, "gain00", 512, 0.0, BTreeMap::new())
            .is_null());

        let samples = generate_sine(440.0, SAMPLE_RATE, 0.1, 0.5);
        let chunked = service.push_chunked(&samples, 512, 0.0);
        // Eight chunks exceed two transform streams.
        assert!(service.execute_forward_transform(chunked).is_null());
        assert!(service.register().contains(chunked));

        let flat = service.push_samples(&samples[..1024]);
        let spectrum = service.execute_forward_transform(flat);
        assert!(!spectrum.is_null());
        let restored = service.execute_inverse_transform(spectrum);
        let pulled = service.pull_samples(restored, true);
        assert_eq!(pulled.len(), 1024);

        let reconstructed = service.pull_chunked(chunked, 512, 0.0, 1.0, false);
        let expected = overlap_add(
            &service.register().pull_chunks::<f32>(chunked, false).unwrap(),
            512,
            1.0,
        );
        assert_eq!(reconstructed, expected);

        assert!(service.dispose() > 0);
        assert_eq!(service.register().live_groups(), 0);
        assert!(service.compiler().loaded().is_empty());
    }
}

#[test]
fn test_oversized_stretch_pulls_empty() {
    if let Some(service) = create_service(None) {
        let samples = generate_sine(440.0, SAMPLE_RATE, 0.1, 0.5);
        let chunked = service.push_chunked(&samples, 512, 0.0);
        assert!(service.pull_chunked(chunked, 512, 0.0, 1e30, false).is_empty());
        assert!(service.pull_chunked(chunked, 512, 0.0, 1e8, true).is_empty());
        assert!(!service.register().contains(chunked));
    }
}

#[test]
fn test_config_file_builds_service() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"kernel_root": {:?}, "chunk_size": 256, "transform_streams": 2}}"#,
            dir.path().join("kernels")
        ),
    )
    .unwrap();

    let config = ServiceConfig::from_json_file(&path).unwrap();
    assert_eq!(config.chunk_size, 256);
    if let Ok(service) = SignalService::new(config) {
        assert!(dir.path().join("kernels").is_dir());
        assert!(!service.executor().transformer().backend().is_device());
    }
}
