//! Host-facing signal service combining the register, compiler and executor.
//!
//! Every public operation is synchronous and returns a sentinel on failure
//! (`Handle::NULL`, an empty vector, `false` or `0.0`) after logging why.
//! Callers can inspect the register and retry; nothing panics or returns an
//! error across this boundary once the service is built.

mod config;

pub use config::ServiceConfig;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use wgpu::{Device, Queue};

use crate::audio::{chunking, samples, AudioFormat, AudioObject, ChunkLayout, Residency, SignalForm};
use crate::exec::{
    AudioRequest, BeatZoomSettings, ExecError, ImageFormat, KernelExecutor, Scalar,
    SpectralTransformer,
};
use crate::gpu::{FourierError, GpuContext, GpuError};
use crate::kernel::{CompiledKernel, KernelCompiler, KernelError};
use crate::memory::{Handle, MemoryError, MemoryRegister};

/// Errors surfaced while building the service or inside its fallible helpers.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error(transparent)]
    Fourier(#[from] FourierError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("Object '{name}' is in the wrong state: {reason}")]
    InvalidState { name: String, reason: String },
}

fn invalid_state(object: &AudioObject, reason: &str) -> ServiceError {
    ServiceError::InvalidState {
        name: object.name().to_string(),
        reason: reason.to_string(),
    }
}

/// Log a failed operation and return its sentinel.
fn or_sentinel<T>(operation: &str, result: Result<T, ServiceError>, sentinel: T) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("{} failed: {}", operation, e);
        sentinel
    })
}

/// Builder for [`SignalService`].
#[derive(Debug, Clone, Default)]
pub struct SignalServiceBuilder {
    config: ServiceConfig,
}

impl SignalServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn kernel_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.kernel_root = root.into();
        self
    }

    pub fn chunking(mut self, chunk_size: usize, overlap: f32) -> Self {
        self.config.chunk_size = chunk_size;
        self.config.overlap = overlap;
        self
    }

    pub fn transform_streams(mut self, streams: Option<usize>) -> Self {
        self.config.transform_streams = streams;
        self
    }

    pub fn fallback_work_group_size(mut self, size: u32) -> Self {
        self.config.fallback_work_group_size = size;
        self
    }

    pub fn default_format(mut self, format: AudioFormat) -> Self {
        self.config.default_format = format;
        self
    }

    /// Create a GPU context and build on it.
    pub fn build(self) -> Result<SignalService, ServiceError> {
        let context = GpuContext::new_blocking()?;
        self.build_with(&context)
    }

    pub fn build_with(self, context: &GpuContext) -> Result<SignalService, ServiceError> {
        SignalService::from_device(context.device.clone(), context.queue.clone(), self.config)
    }
}

/// The runtime: device memory, kernel catalog and execution behind one API.
pub struct SignalService {
    config: ServiceConfig,
    register: Arc<MemoryRegister>,
    compiler: KernelCompiler,
    executor: KernelExecutor,
}

impl SignalService {
    pub fn builder() -> SignalServiceBuilder {
        SignalServiceBuilder::new()
    }

    /// Create a service on a fresh GPU context.
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        Self::builder().config(config).build()
    }

    pub fn from_context(context: &GpuContext, config: ServiceConfig) -> Result<Self, ServiceError> {
        Self::from_device(context.device.clone(), context.queue.clone(), config)
    }

    /// Build on an existing device. Kernels below the root are precompiled;
    /// failures are logged and leave the rest of the catalog usable.
    pub fn from_device(
        device: Arc<Device>,
        queue: Arc<Queue>,
        config: ServiceConfig,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let register = Arc::new(MemoryRegister::new(device.clone(), queue));
        let compiler = KernelCompiler::new(device, config.kernel_root.clone());
        let transformer =
            SpectralTransformer::from_config(register.clone(), config.transform_streams);
        let executor = KernelExecutor::new(
            register.clone(),
            transformer,
            config.fallback_work_group_size,
        );

        for (path, e) in compiler.precompile_all() {
            log::warn!("Skipping kernel {}: {}", path.display(), e);
        }
        log::info!(
            "Signal service ready (kernel root {}, {} transforms)",
            config.kernel_root.display(),
            if executor.transformer().backend().is_device() {
                "device"
            } else {
                "stream"
            }
        );

        Ok(Self {
            config,
            register,
            compiler,
            executor,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn register(&self) -> &Arc<MemoryRegister> {
        &self.register
    }

    pub fn compiler(&self) -> &KernelCompiler {
        &self.compiler
    }

    pub fn executor(&self) -> &KernelExecutor {
        &self.executor
    }

    // --- Object operations ---

    /// Upload an object's samples as one buffer.
    pub fn push_flat_samples(&self, object: &mut AudioObject) -> Handle {
        or_sentinel("push_flat_samples", self.try_push(object, None), Handle::NULL)
    }

    /// Upload an object's samples as overlapping chunks.
    pub fn push_chunked_samples(
        &self,
        object: &mut AudioObject,
        chunk_size: usize,
        overlap: f32,
    ) -> Handle {
        or_sentinel(
            "push_chunked_samples",
            self.try_push(object, Some(ChunkLayout::new(chunk_size, overlap))),
            Handle::NULL,
        )
    }

    /// Bring an object's samples back to the host. Chunked data is
    /// reconstructed with the stretch recorded on the object.
    pub fn pull_flat_samples(&self, object: &mut AudioObject) -> bool {
        or_sentinel("pull_flat_samples", self.try_pull(object, 1.0), false)
    }

    /// Reconstruct chunked device data on the host with an extra stretch.
    pub fn pull_chunked_samples(&self, object: &mut AudioObject, stretch: f64) -> bool {
        or_sentinel("pull_chunked_samples", self.try_pull(object, stretch), false)
    }

    /// Move an object to the other side: host to device as one buffer, or back.
    pub fn move_audio(&self, object: &mut AudioObject) -> bool {
        if object.is_on_host() {
            !self.push_flat_samples(object).is_null()
        } else {
            self.pull_flat_samples(object)
        }
    }

    /// Forward transform an object, uploading it first if needed.
    pub fn perform_fft(&self, object: &mut AudioObject) -> bool {
        or_sentinel(
            "perform_fft",
            self.try_transform(object, SignalForm::Real),
            false,
        )
    }

    /// Inverse transform an object back to real samples.
    pub fn perform_ifft(&self, object: &mut AudioObject) -> bool {
        or_sentinel(
            "perform_ifft",
            self.try_transform(object, SignalForm::Complex),
            false,
        )
    }

    /// Run an audio kernel on an object, chunking it first if it is on the host.
    ///
    /// A kernel that binds a `factor` other than 1 divides the object's BPM
    /// by it and records the stretch for reconstruction.
    pub fn process_audio(
        &self,
        object: &mut AudioObject,
        kernel: &str,
        overrides: BTreeMap<String, Scalar>,
    ) -> bool {
        or_sentinel(
            "process_audio",
            self.try_process(object, kernel, overrides),
            false,
        )
    }

    /// Estimate and store an object's BPM with a beat scan kernel. Returns 0 on failure.
    pub fn beat_scan(&self, object: &mut AudioObject, kernel: &str) -> f32 {
        or_sentinel("beat_scan", self.try_beat_scan(object, kernel), 0.0)
    }

    /// Per-chunk zoom values from a beat zoom kernel.
    pub fn beat_zoom(
        &self,
        object: &mut AudioObject,
        kernel: &str,
        settings: &BeatZoomSettings,
    ) -> Vec<f64> {
        or_sentinel(
            "beat_zoom",
            self.try_beat_zoom(object, kernel, settings),
            Vec::new(),
        )
    }

    /// Host samples of an object as PCM bytes at its bit depth.
    pub fn pcm_bytes(&self, object: &AudioObject) -> Vec<u8> {
        match object.samples() {
            Some(data) => samples::to_pcm_bytes(data, object.bit_depth()).unwrap_or_default(),
            None => {
                log::warn!("pcm_bytes: '{}' has no host samples", object.name());
                Vec::new()
            }
        }
    }

    // --- Handle operations ---

    pub fn load_kernel(&self, name_or_path: &str) -> Option<Arc<CompiledKernel>> {
        or_sentinel(
            "load_kernel",
            self.compiler.load_kernel(name_or_path).map(Some).map_err(Into::into),
            None,
        )
    }

    pub fn push_samples(&self, samples: &[f32]) -> Handle {
        or_sentinel(
            "push_samples",
            self.register.push(samples).map_err(Into::into),
            Handle::NULL,
        )
    }

    pub fn push_chunked(&self, samples: &[f32], chunk_size: usize, overlap: f32) -> Handle {
        let chunks = chunking::split_chunks(samples, chunk_size, overlap);
        or_sentinel(
            "push_chunked",
            self.register.push_chunks(&chunks).map_err(Into::into),
            Handle::NULL,
        )
    }

    pub fn pull_samples(&self, handle: Handle, free: bool) -> Vec<f32> {
        or_sentinel(
            "pull_samples",
            self.register.pull::<f32>(handle, free).map_err(Into::into),
            Vec::new(),
        )
    }

    /// Pull a chunked group and overlap-add it.
    pub fn pull_chunked(
        &self,
        handle: Handle,
        chunk_size: usize,
        overlap: f32,
        stretch: f64,
        free: bool,
    ) -> Vec<f32> {
        let hop = chunking::hop_size(chunk_size, overlap);
        or_sentinel(
            "pull_chunked",
            self.register
                .pull_chunks::<f32>(handle, free)
                .map(|chunks| self.reconstruct(&chunks, hop, stretch))
                .map_err(Into::into),
            Vec::new(),
        )
    }

    pub fn push_image(&self, pixels: &[u8]) -> Handle {
        or_sentinel(
            "push_image",
            self.register.push(pixels).map_err(Into::into),
            Handle::NULL,
        )
    }

    pub fn pull_image(&self, handle: Handle, free: bool) -> Vec<u8> {
        or_sentinel(
            "pull_image",
            self.register.pull::<u8>(handle, free).map_err(Into::into),
            Vec::new(),
        )
    }

    /// Run an audio kernel on a group with the default format. The input group is kept.
    pub fn execute_kernel(
        &self,
        handle: Handle,
        kernel: &str,
        chunk_size: usize,
        overlap: f32,
        overrides: BTreeMap<String, Scalar>,
    ) -> Handle {
        let result = self.kernel(kernel).and_then(|kernel| {
            let request = AudioRequest::new(handle, self.config.default_format, chunk_size, overlap)
                .with_overrides(overrides);
            Ok(self.executor.execute_audio(&kernel, &request)?.handle)
        });
        or_sentinel("execute_kernel", result, Handle::NULL)
    }

    /// Forward transform of a real group into a new complex group.
    pub fn execute_forward_transform(&self, handle: Handle) -> Handle {
        or_sentinel(
            "execute_forward_transform",
            self.executor.transformer().forward(handle, false).map_err(Into::into),
            Handle::NULL,
        )
    }

    /// Inverse transform of a complex group into a new real group.
    pub fn execute_inverse_transform(&self, handle: Handle) -> Handle {
        or_sentinel(
            "execute_inverse_transform",
            self.executor.transformer().inverse(handle, false).map_err(Into::into),
            Handle::NULL,
        )
    }

    pub fn execute_image_kernel(
        &self,
        handle: Handle,
        kernel: &str,
        format: &ImageFormat,
        overrides: BTreeMap<String, Scalar>,
    ) -> Handle {
        let result = self.kernel(kernel).and_then(|kernel| {
            Ok(self
                .executor
                .execute_image(&kernel, handle, format, overrides)?)
        });
        or_sentinel("execute_image_kernel", result, Handle::NULL)
    }

    /// Release a group. Returns the bytes freed, 0 for an unknown handle.
    pub fn free(&self, handle: Handle) -> u64 {
        self.register.free(handle)
    }

    /// Free every live group and drop all compiled kernels.
    pub fn dispose(&self) -> u64 {
        self.compiler.unload_all();
        let freed = self.register.clear();
        log::info!("Disposed signal service, freed {} bytes", freed);
        freed
    }

    // --- Private helpers ---

    fn kernel(&self, name: &str) -> Result<Arc<CompiledKernel>, ServiceError> {
        Ok(self.compiler.load_kernel(name)?)
    }

    fn try_push(
        &self,
        object: &mut AudioObject,
        layout: Option<ChunkLayout>,
    ) -> Result<Handle, ServiceError> {
        let samples = object
            .take_samples()
            .ok_or_else(|| invalid_state(object, "samples are not on the host"))?;

        let pushed = match layout {
            None => self.register.push(&samples),
            Some(layout) => {
                let chunks = chunking::split_chunks(&samples, layout.chunk_size, layout.overlap);
                self.register.push_chunks(&chunks)
            }
        };
        match pushed {
            Ok(handle) => {
                object.place_on_device(handle, SignalForm::Real, layout);
                log::debug!("Pushed '{}' as group {}", object.name(), handle);
                Ok(handle)
            }
            Err(e) => {
                object.place_on_host(samples);
                Err(e.into())
            }
        }
    }

    fn try_pull(&self, object: &mut AudioObject, stretch: f64) -> Result<bool, ServiceError> {
        let Residency::Device {
            handle,
            form,
            layout,
        } = *object.residency()
        else {
            return Err(invalid_state(object, "samples are not on the device"));
        };
        if form == SignalForm::Complex {
            return Err(invalid_state(object, "inverse transform before pulling"));
        }

        let samples = match layout {
            None => self.register.pull::<f32>(handle, true)?,
            Some(layout) => {
                let chunks = self.register.pull_chunks::<f32>(handle, true)?;
                self.reconstruct(&chunks, layout.hop(), layout.stretch * stretch)
            }
        };
        if samples.is_empty() {
            object.invalidate();
            return Err(invalid_state(object, "reconstruction produced no samples"));
        }
        object.place_on_host(samples);
        Ok(true)
    }

    fn reconstruct(&self, chunks: &[Vec<f32>], hop: usize, stretch: f64) -> Vec<f32> {
        chunking::overlap_add_bounded(chunks, hop, stretch, self.config.max_reconstructed_len)
    }

    fn try_transform(
        &self,
        object: &mut AudioObject,
        from: SignalForm,
    ) -> Result<bool, ServiceError> {
        if object.is_on_host() {
            self.try_push(object, None)?;
        }
        let (handle, form, layout) = match *object.residency() {
            Residency::Device {
                handle,
                form,
                layout,
            } => (handle, form, layout),
            _ => return Err(invalid_state(object, "object is invalid")),
        };
        if form != from {
            return Err(invalid_state(object, "signal is already in the requested form"));
        }

        let transformer = self.executor.transformer();
        let output = match from {
            SignalForm::Real => transformer.forward(handle, true)?,
            SignalForm::Complex => transformer.inverse(handle, true)?,
        };
        object.place_on_device(output, form.toggled(), layout);
        Ok(true)
    }

    /// Device handle and layout of an object, chunking host samples with the
    /// configured defaults.
    fn chunked_on_device(
        &self,
        object: &mut AudioObject,
    ) -> Result<(Handle, ChunkLayout), ServiceError> {
        if object.is_on_host() {
            let layout = ChunkLayout::new(self.config.chunk_size, self.config.overlap);
            self.try_push(object, Some(layout))?;
        }
        match *object.residency() {
            Residency::Device {
                handle,
                layout: Some(layout),
                ..
            } => Ok((handle, layout)),
            Residency::Device { handle, .. } => {
                let length = self
                    .register
                    .find_group(handle)
                    .map(|g| g.total_elements())
                    .ok_or(MemoryError::HandleNotFound(handle))?;
                Ok((handle, ChunkLayout::new(length, 0.0)))
            }
            _ => Err(invalid_state(object, "object is invalid")),
        }
    }

    fn try_process(
        &self,
        object: &mut AudioObject,
        kernel: &str,
        overrides: BTreeMap<String, Scalar>,
    ) -> Result<bool, ServiceError> {
        let kernel = self.kernel(kernel)?;
        let (handle, layout) = self.chunked_on_device(object)?;
        let request = AudioRequest::new(handle, object.format(), layout.chunk_size, layout.overlap)
            .with_overrides(overrides)
            .freeing_input(true);

        let outcome = self.executor.execute_audio(&kernel, &request)?;
        let recorded = object.layout();
        object.place_on_device(outcome.handle, outcome.form, recorded);
        if let Some(factor) = outcome.factor.filter(|f| (*f - 1.0).abs() > f64::EPSILON) {
            object.apply_stretch(factor);
            log::info!("'{}' stretched by {}", object.name(), factor);
        }
        Ok(true)
    }

    fn try_beat_scan(&self, object: &mut AudioObject, kernel: &str) -> Result<f32, ServiceError> {
        let kernel = self.kernel(kernel)?;
        let (handle, layout) = self.chunked_on_device(object)?;
        let request = AudioRequest::new(handle, object.format(), layout.chunk_size, layout.overlap);
        let scan = self.executor.execute_beat_scan(
            &kernel,
            &request,
            self.config.beat_scan_reduction,
            self.config.min_bpm,
            self.config.max_bpm,
        )?;
        object.set_bpm(scan.bpm);
        Ok(scan.bpm)
    }

    fn try_beat_zoom(
        &self,
        object: &mut AudioObject,
        kernel: &str,
        settings: &BeatZoomSettings,
    ) -> Result<Vec<f64>, ServiceError> {
        let kernel = self.kernel(kernel)?;
        let (handle, layout) = self.chunked_on_device(object)?;
        let request = AudioRequest::new(handle, object.format(), layout.chunk_size, layout.overlap);
        Ok(self.executor.execute_beat_zoom(
            &kernel,
            &request,
            settings,
            self.config.beat_zoom_reduction,
        )?)
    }
}
