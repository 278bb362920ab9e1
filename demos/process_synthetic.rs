//! Process a synthetic signal end to end: chunk, stretch, beat scan, export PCM.
//!
//! Run with `cargo run --example process_synthetic --features tokio [kernel_root]`.

use anyhow::{bail, Context, Result};
use signal_runtime::audio::{generate_click_track, generate_sine, normalize};
use signal_runtime::exec::{BeatZoomSettings, Scalar};
use signal_runtime::{AudioFormat, AudioObject, GpuContext, ServiceConfig, SignalService};
use std::collections::BTreeMap;

#[tokio::main]
async fn main() -> Result<()> {
    signal_runtime::init_logging();

    let kernel_root = std::env::args()
        .nth(1)
        .unwrap_or_else(|| concat!(env!("CARGO_MANIFEST_DIR"), "/kernels").to_string());
    let context = GpuContext::new().await.context("no GPU adapter available")?;
    let info = context.adapter_info();
    println!("Adapter: {} ({:?})", info.name, info.backend);

    let config = ServiceConfig {
        kernel_root: kernel_root.into(),
        chunk_size: 2048,
        overlap: 0.5,
        ..Default::default()
    };
    let service = SignalService::from_context(&context, config)?;
    println!("Kernels: {}", service.compiler().loaded().join(", "));

    let format = AudioFormat {
        sample_rate: 44100,
        channels: 1,
        bit_depth: 16,
    };

    // Tempo of a click track.
    let mut clicks = AudioObject::new(
        "clicks",
        generate_click_track(128.0, format.sample_rate, 8.0, 1000.0),
        format,
    );
    if service.push_chunked_samples(&mut clicks, 1024, 0.0).is_null() {
        bail!("could not upload click track");
    }
    let bpm = service.beat_scan(&mut clicks, "beat_scan00");
    let zooms = service.beat_zoom(&mut clicks, "beat_zoom00", &BeatZoomSettings::default());
    println!(
        "Click track: {:.1} BPM, {} zoom values (peak {:.0})",
        bpm,
        zooms.len(),
        zooms.iter().cloned().fold(0.0, f64::max)
    );

    // Stretch a tone to twice its length.
    let mut tone = AudioObject::new(
        "tone",
        generate_sine(440.0, format.sample_rate, 2.0, 0.5),
        format,
    );
    tone.set_bpm(bpm);
    let overrides = BTreeMap::from([("factor".to_string(), Scalar::Float(2.0))]);
    if !service.process_audio(&mut tone, "stretch00", overrides) {
        bail!("stretch failed");
    }
    if !service.pull_flat_samples(&mut tone) {
        bail!("could not reconstruct stretched tone");
    }

    let mut samples = tone.take_samples().context("tone is not on the host")?;
    normalize(&mut samples, 0.9);
    println!(
        "Stretched tone: {} samples ({:.2}s), {:.1} BPM",
        samples.len(),
        samples.len() as f64 / format.sample_rate as f64,
        tone.bpm()
    );
    tone.place_on_host(samples);

    let pcm = service.pcm_bytes(&tone);
    println!("PCM export: {} bytes at {} bits", pcm.len(), format.bit_depth);

    println!("Freed {} bytes on dispose", service.dispose());
    Ok(())
}
