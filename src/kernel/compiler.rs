//! Kernel compiler: WGSL source → validated module → compute pipeline.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use wgpu::{BindGroupLayout, ComputePipeline, Device};

use super::descriptor::{ArgumentDescriptor, DescriptorOrigin};
use super::schema::{ArgLocation, ArgumentSchema, ScalarTag};
use super::source::{self, KernelDomain, KERNEL_EXTENSION};
use crate::gpu::compute::pipelines;

/// Errors that can occur while locating, compiling or describing kernels.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Kernel source rejected: {}", .0.display())]
    InvalidSource(PathBuf),
    #[error("Corrupt kernel entry name {0:?}")]
    CorruptEntryName(String),
    #[error("No compute entry point '{0}'")]
    MissingEntryPoint(String),
    #[error("Kernel compile failed:\n{0}")]
    CompileError(String),
    #[error("Unsupported binding '{name}': {reason}")]
    UnsupportedBinding { name: String, reason: String },
    #[error("Descriptor for '{kernel}' does not match its arguments: {reason}")]
    DescriptorMismatch { kernel: String, reason: String },
    #[error("Kernel '{0}' not found")]
    NotFound(String),
    #[error("Failed to read kernel files: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid descriptor: {0}")]
    Json(#[from] serde_json::Error),
}

/// An immutable compiled kernel with its schema and descriptor.
pub struct CompiledKernel {
    name: String,
    path: PathBuf,
    domain: KernelDomain,
    schema: ArgumentSchema,
    descriptor: ArgumentDescriptor,
    descriptor_origin: DescriptorOrigin,
    workgroup_size: [u32; 3],
    grid_rows: bool,
    layout: BindGroupLayout,
    pipeline: ComputePipeline,
}

impl std::fmt::Debug for CompiledKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledKernel")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("domain", &self.domain)
            .field("workgroup_size", &self.workgroup_size)
            .field("grid_rows", &self.grid_rows)
            .finish_non_exhaustive()
    }
}

impl CompiledKernel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn domain(&self) -> KernelDomain {
        self.domain
    }

    pub fn schema(&self) -> &ArgumentSchema {
        &self.schema
    }

    pub fn descriptor(&self) -> &ArgumentDescriptor {
        &self.descriptor
    }

    pub fn descriptor_origin(&self) -> DescriptorOrigin {
        self.descriptor_origin
    }

    /// Declared `@workgroup_size`.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    /// Whether the kernel indexes elements across `gid.y` rows of the grid.
    pub fn grid_rows(&self) -> bool {
        self.grid_rows
    }

    pub fn layout(&self) -> &BindGroupLayout {
        &self.layout
    }

    pub fn pipeline(&self) -> &ComputePipeline {
        &self.pipeline
    }

    /// Pointee tag of the first pointer argument.
    pub fn input_type(&self) -> Option<ScalarTag> {
        self.schema.input_pointer().and_then(|a| a.arg_type.tag())
    }

    /// Pointee tag of the last pointer argument.
    pub fn output_type(&self) -> Option<ScalarTag> {
        self.schema.output_pointer().and_then(|a| a.arg_type.tag())
    }

    /// Work-group size the device can run this kernel with.
    ///
    /// Falls back to `fallback` when the declared size is unusable on the device.
    pub fn max_work_group_size(&self, limits: &wgpu::Limits, fallback: u32) -> u32 {
        let declared: u32 = self.workgroup_size.iter().product();
        if declared == 0 || declared > limits.max_compute_invocations_per_workgroup {
            log::warn!(
                "Kernel '{}' work-group size {} unsupported (device max {}), using {}",
                self.name,
                declared,
                limits.max_compute_invocations_per_workgroup,
                fallback
            );
            return fallback;
        }
        declared
    }
}

/// Compiles kernels below a root directory and caches them by path.
pub struct KernelCompiler {
    device: Arc<Device>,
    root: PathBuf,
    cache: Mutex<HashMap<PathBuf, Arc<CompiledKernel>>>,
}

impl KernelCompiler {
    pub fn new(device: Arc<Device>, root: impl Into<PathBuf>) -> Self {
        Self {
            device,
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All kernel files below the root, sorted. Creates the root if missing.
    pub fn kernel_files(&self) -> Vec<PathBuf> {
        if !self.root.exists() {
            if let Err(e) = fs::create_dir_all(&self.root) {
                log::warn!("Cannot create kernel root {}: {}", self.root.display(), e);
                return Vec::new();
            }
            log::info!("Created kernel root {}", self.root.display());
        }

        let mut files = Vec::new();
        collect_kernel_files(&self.root, &mut files);
        files.sort();
        files
    }

    /// Most recently modified kernel file.
    pub fn latest_kernel_file(&self) -> Option<PathBuf> {
        self.kernel_files().into_iter().max_by_key(|path| {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
    }

    /// Compile a kernel file, replacing any cached version.
    pub fn compile(&self, path: &Path) -> Result<Arc<CompiledKernel>, KernelError> {
        let path = source::verify_kernel_source(path)
            .ok_or_else(|| KernelError::InvalidSource(path.to_path_buf()))?;
        let text = fs::read_to_string(&path)?;

        let name = source::extract_entry_name(&text)?
            .ok_or_else(|| KernelError::MissingEntryPoint(path.display().to_string()))?;
        source::entry_matches_file(&path, &name);

        let module = naga::front::wgsl::parse_str(&text).map_err(|e| {
            let log = e.emit_to_string(&text);
            log::error!("Failed to compile kernel '{}':\n{}", name, log);
            KernelError::CompileError(log)
        })?;
        Validator::new(ValidationFlags::all(), self.capabilities())
            .validate(&module)
            .map_err(|e| {
                let log = e.emit_to_string(&text);
                log::error!("Kernel '{}' failed validation:\n{}", name, log);
                KernelError::CompileError(log)
            })?;

        let entry = module
            .entry_points
            .iter()
            .find(|ep| ep.name == name && ep.stage == naga::ShaderStage::Compute)
            .ok_or_else(|| KernelError::MissingEntryPoint(name.clone()))?;
        let workgroup_size = entry.workgroup_size;
        let reads_group_count = reads_num_workgroups(&module, entry);

        let schema = ArgumentSchema::from_module(&module)?;
        let (descriptor, descriptor_origin) =
            ArgumentDescriptor::load_or_infer(&path, &name, &schema)?;
        let grid_rows = descriptor.grid_rows || reads_group_count;

        let layout = self.create_layout(&name, &schema);
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&name),
                source: wgpu::ShaderSource::Wgsl(text.into()),
            });
        let pipeline = pipelines::create_pipeline(&self.device, &shader, &layout, &name);

        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let kernel = Arc::new(CompiledKernel {
            domain: KernelDomain::from_path(&path, &root),
            name,
            path: path.clone(),
            schema,
            descriptor,
            descriptor_origin,
            workgroup_size,
            grid_rows,
            layout,
            pipeline,
        });
        log::info!(
            "Compiled kernel '{}' ({:?}, {} arguments)",
            kernel.name,
            kernel.domain,
            kernel.schema.len()
        );

        self.lock_cache().insert(path, kernel.clone());
        Ok(kernel)
    }

    /// Load a kernel by file stem (case-insensitive) or path, compiling on a cache miss.
    pub fn load_kernel(&self, name_or_path: &str) -> Result<Arc<CompiledKernel>, KernelError> {
        let candidate = Path::new(name_or_path);
        let path = if candidate.is_file() {
            candidate.to_path_buf()
        } else {
            self.kernel_files()
                .into_iter()
                .find(|p| {
                    p.file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.eq_ignore_ascii_case(name_or_path))
                })
                .ok_or_else(|| KernelError::NotFound(name_or_path.to_string()))?
        };

        let key = fs::canonicalize(&path).unwrap_or(path);
        if let Some(kernel) = self.lock_cache().get(&key) {
            return Ok(kernel.clone());
        }
        self.compile(&key)
    }

    /// Compile every kernel below the root. Returns the failures.
    pub fn precompile_all(&self) -> Vec<(PathBuf, KernelError)> {
        let mut failures = Vec::new();
        let files = self.kernel_files();
        for path in &files {
            if let Err(e) = self.compile(path) {
                failures.push((path.clone(), e));
            }
        }
        log::info!(
            "Precompiled {} of {} kernels",
            files.len() - failures.len(),
            files.len()
        );
        failures
    }

    /// Drop a kernel from the cache. Returns false if it was not loaded.
    pub fn unload(&self, kernel: &CompiledKernel) -> bool {
        let removed = self.lock_cache().remove(kernel.path()).is_some();
        if removed {
            log::debug!("Unloaded kernel '{}'", kernel.name());
        }
        removed
    }

    /// Drop every cached kernel. Returns how many were loaded.
    pub fn unload_all(&self) -> usize {
        let mut cache = self.lock_cache();
        let count = cache.len();
        cache.clear();
        count
    }

    /// Names of cached kernels.
    pub fn loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .lock_cache()
            .values()
            .map(|k| k.name().to_string())
            .collect();
        names.sort();
        names
    }

    fn capabilities(&self) -> Capabilities {
        let features = self.device.features();
        let mut capabilities = Capabilities::empty();
        if features.contains(wgpu::Features::SHADER_F64) {
            capabilities |= Capabilities::FLOAT64;
        }
        if features.contains(wgpu::Features::SHADER_INT64) {
            capabilities |= Capabilities::SHADER_INT64;
        }
        capabilities
    }

    fn create_layout(&self, name: &str, schema: &ArgumentSchema) -> BindGroupLayout {
        let mut entries: Vec<_> = schema
            .arguments()
            .iter()
            .filter_map(|arg| match arg.location {
                ArgLocation::Storage { binding, read_only } => {
                    Some(pipelines::storage_entry(binding, read_only))
                }
                ArgLocation::Uniform { .. } => None,
            })
            .collect();
        if let Some(block) = schema.uniform() {
            entries.push(pipelines::uniform_entry(block.binding));
        }

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("{}_layout", name)),
                entries: &entries,
            })
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<CompiledKernel>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether the entry point takes `@builtin(num_workgroups)`, directly or in
/// an argument struct.
fn reads_num_workgroups(module: &naga::Module, entry: &naga::EntryPoint) -> bool {
    let is_group_count = |binding: &Option<naga::Binding>| {
        matches!(binding, Some(naga::Binding::BuiltIn(naga::BuiltIn::NumWorkGroups)))
    };
    entry.function.arguments.iter().any(|arg| {
        is_group_count(&arg.binding)
            || match &module.types[arg.ty].inner {
                naga::TypeInner::Struct { members, .. } => {
                    members.iter().any(|m| is_group_count(&m.binding))
                }
                _ => false,
            }
    })
}

fn collect_kernel_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            log::warn!("Cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_kernel_files(&path, files);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(KERNEL_EXTENSION))
        {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GAIN: &str = r#"
struct Params {
    len: u32,
    gain: f32,
}

@group(0) @binding(0) var<storage, read> input: array<f32>;
@group(0) @binding(1) var<storage, read_write> output: array<f32>;
@group(0) @binding(2) var<uniform> params: Params;

@compute @workgroup_size(64)
fn gain(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= params.len) { return; }
    output[i] = input[i] * params.gain;
}
"#;

    const ROWS: &str = r#"
struct Ids {
    @builtin(global_invocation_id) gid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
}

@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn rows(ids: Ids) {
    let i = ids.gid.x + ids.gid.y * ids.groups.x * 64u;
    if (i < arrayLength(&data)) { data[i] = 0.0; }
}
"#;

    fn entry_reads_group_count(source: &str) -> bool {
        let module = naga::front::wgsl::parse_str(source).unwrap();
        reads_num_workgroups(&module, &module.entry_points[0])
    }

    #[test]
    fn test_group_count_detection() {
        assert!(!entry_reads_group_count(GAIN));
        assert!(entry_reads_group_count(ROWS));
        assert!(entry_reads_group_count(
            "@group(0) @binding(0) var<storage, read_write> d: array<u32>;\n\
             @compute @workgroup_size(1)\n\
             fn k(@builtin(num_workgroups) n: vec3<u32>) { d[0] = n.x; }"
        ));
    }

    fn create_test_device() -> Option<Arc<Device>> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        let (device, _queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()?;
        Some(Arc::new(device))
    }

    #[test]
    fn test_compile_and_cache() {
        if let Some(device) = create_test_device() {
            let dir = tempfile::tempdir().unwrap();
            let audio = dir.path().join("audio");
            fs::create_dir_all(&audio).unwrap();
            fs::write(audio.join("gain.wgsl"), GAIN).unwrap();

            let compiler = KernelCompiler::new(device, dir.path());
            let kernel = compiler.load_kernel("GAIN").unwrap();
            assert_eq!(kernel.name(), "gain");
            assert_eq!(kernel.domain(), KernelDomain::Audio);
            assert_eq!(kernel.workgroup_size(), [64, 1, 1]);
            assert_eq!(kernel.input_type(), Some(ScalarTag::Float));
            assert_eq!(kernel.descriptor_origin(), DescriptorOrigin::Inferred);
            assert!(!kernel.grid_rows());

            let again = compiler.load_kernel("gain").unwrap();
            assert!(Arc::ptr_eq(&kernel, &again));

            assert!(compiler.unload(&kernel));
            assert!(!compiler.unload(&kernel));
        }
    }

    #[test]
    fn test_compile_error_carries_diagnostic() {
        if let Some(device) = create_test_device() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("broken.wgsl");
            fs::write(&path, "@compute @workgroup_size(1)\nfn broken() { let x = ; }").unwrap();

            let compiler = KernelCompiler::new(device, dir.path());
            match compiler.compile(&path) {
                Err(KernelError::CompileError(log)) => assert!(!log.is_empty()),
                other => panic!(
                    "expected compile error, got {:?}",
                    other.map(|k| k.name().to_string())
                ),
            }
        }
    }

    #[test]
    fn test_kernel_files_creates_root() {
        if let Some(device) = create_test_device() {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().join("kernels");
            let compiler = KernelCompiler::new(device, &root);
            assert!(compiler.kernel_files().is_empty());
            assert!(root.is_dir());
            assert!(compiler.latest_kernel_file().is_none());
            assert!(matches!(
                compiler.load_kernel("nothing"),
                Err(KernelError::NotFound(_))
            ));
        }
    }
}
