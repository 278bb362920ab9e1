//! Signal Runtime Core
//!
//! GPU signal-processing runtime for chunked audio and image kernels.
//!
//! # Features
//!
//! - Handle-based device memory register (wgpu buffers grouped per signal)
//! - WGSL kernel compiler with argument introspection via naga
//! - Role-based argument binding with optional JSON descriptors
//! - FFT/IFFT on the device, or on a RustFFT host stream pool
//! - Overlapping chunking and Hann-weighted overlap-add with time stretch
//! - Beat scan (BPM by autocorrelation) and beat zoom kernels
//! - Python bindings via PyO3 (when `python` feature is enabled)

pub mod audio;
pub mod exec;
pub mod gpu;
pub mod kernel;
pub mod memory;
pub mod service;

// Re-export commonly used types
pub use audio::{AudioFormat, AudioObject, ChunkLayout, Residency, SignalForm, Waveform};
pub use exec::{
    AudioOutcome, AudioRequest, BeatScanResult, BeatZoomSettings, ChunkReduction, ExecError,
    ImageFormat, KernelExecutor, Scalar,
};
pub use gpu::{GpuContext, GpuError};
pub use kernel::{CompiledKernel, KernelCompiler, KernelDomain, KernelError};
pub use memory::{Complex32, ElementType, Handle, MemoryError, MemoryRegister};
pub use service::{ServiceConfig, ServiceError, SignalService, SignalServiceBuilder};

/// Install `env_logger` as the `log` backend. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
mod python_bindings {
    use crate::audio::{synth, Waveform};
    use crate::exec::Scalar;
    use crate::memory::Handle;
    use crate::service::{ServiceConfig, SignalService};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::collections::{BTreeMap, HashMap};

    fn to_overrides(overrides: Option<HashMap<String, f64>>) -> BTreeMap<String, Scalar> {
        overrides
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, Scalar::Float(v)))
            .collect()
    }

    /// Signal runtime bound to one GPU device. Handles are plain integers; 0 means failure.
    #[pyclass(unsendable)]
    struct SignalRuntime {
        service: SignalService,
    }

    #[pymethods]
    impl SignalRuntime {
        #[new]
        #[pyo3(signature = (config_path=None, kernel_root=None))]
        fn new(config_path: Option<&str>, kernel_root: Option<&str>) -> PyResult<Self> {
            crate::init_logging();
            let mut config = match config_path {
                Some(path) => ServiceConfig::from_json_file(path)
                    .map_err(|e| PyValueError::new_err(e.to_string()))?,
                None => ServiceConfig::default(),
            };
            if let Some(root) = kernel_root {
                config.kernel_root = root.into();
            }
            let service =
                SignalService::new(config).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            Ok(Self { service })
        }

        fn push_flat_samples(&self, samples: Vec<f32>) -> u64 {
            self.service.push_samples(&samples).raw()
        }

        #[pyo3(signature = (handle, free=true))]
        fn pull_flat_samples(&self, handle: u64, free: bool) -> Vec<f32> {
            self.service.pull_samples(Handle::from_raw(handle), free)
        }

        #[pyo3(signature = (samples, chunk_size=1024, overlap=0.5))]
        fn push_chunked_samples(&self, samples: Vec<f32>, chunk_size: usize, overlap: f32) -> u64 {
            self.service.push_chunked(&samples, chunk_size, overlap).raw()
        }

        #[pyo3(signature = (handle, chunk_size=1024, overlap=0.5, stretch=1.0, free=true))]
        fn pull_chunked_samples(
            &self,
            handle: u64,
            chunk_size: usize,
            overlap: f32,
            stretch: f64,
            free: bool,
        ) -> Vec<f32> {
            self.service
                .pull_chunked(Handle::from_raw(handle), chunk_size, overlap, stretch, free)
        }

        /// Load a kernel by name or path. Returns false when it cannot be compiled.
        fn load_kernel(&self, name: &str) -> bool {
            self.service.load_kernel(name).is_some()
        }

        fn kernels(&self) -> Vec<String> {
            self.service.compiler().loaded()
        }

        #[pyo3(signature = (handle, kernel, chunk_size=1024, overlap=0.5, overrides=None))]
        fn execute_kernel(
            &self,
            handle: u64,
            kernel: &str,
            chunk_size: usize,
            overlap: f32,
            overrides: Option<HashMap<String, f64>>,
        ) -> u64 {
            self.service
                .execute_kernel(
                    Handle::from_raw(handle),
                    kernel,
                    chunk_size,
                    overlap,
                    to_overrides(overrides),
                )
                .raw()
        }

        fn execute_forward_transform(&self, handle: u64) -> u64 {
            self.service
                .execute_forward_transform(Handle::from_raw(handle))
                .raw()
        }

        fn execute_inverse_transform(&self, handle: u64) -> u64 {
            self.service
                .execute_inverse_transform(Handle::from_raw(handle))
                .raw()
        }

        fn free(&self, handle: u64) -> u64 {
            self.service.free(Handle::from_raw(handle))
        }

        fn live_bytes(&self) -> u64 {
            self.service.register().live_bytes()
        }

        fn dispose(&self) -> u64 {
            self.service.dispose()
        }
    }

    /// Generate a test waveform as interleaved float samples.
    #[pyfunction]
    #[pyo3(signature = (
        waveform="sine",
        frequency=440.0,
        sample_rate=44100,
        channels=1,
        duration=1.0,
        amplitude=0.8
    ))]
    fn generate_waveform(
        waveform: &str,
        frequency: f32,
        sample_rate: u32,
        channels: u16,
        duration: f32,
        amplitude: f32,
    ) -> PyResult<Vec<f32>> {
        let waveform: Waveform = serde_json::from_value(serde_json::Value::from(waveform))
            .map_err(|_| PyValueError::new_err(format!("Unknown waveform: {}", waveform)))?;
        Ok(synth::generate_waveform(
            waveform,
            frequency,
            sample_rate,
            channels,
            duration,
            amplitude,
        ))
    }

    /// Signal runtime Python module
    #[pymodule]
    pub fn signal_runtime(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        m.add_class::<SignalRuntime>()?;
        m.add_function(wrap_pyfunction!(generate_waveform, m)?)?;
        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python_bindings::*;
