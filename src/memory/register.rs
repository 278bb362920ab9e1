//! Device memory register.
//!
//! Owns every device-side allocation. Buffers are grouped under a single
//! [`Handle`]; groups are created by push/allocate and destroyed only by an
//! explicit [`MemoryRegister::free`].

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use wgpu::{Buffer, BufferUsages, Device, Queue};

use super::element::{DeviceElement, ElementType};
use super::handle::{Handle, SlotTable};

/// Errors that can occur during register operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Refusing to upload or allocate an empty buffer")]
    EmptyInput,
    #[error("Handle {0} not found")]
    HandleNotFound(Handle),
    #[error("Type mismatch: group holds {stored}, requested {requested}")]
    TypeMismatch {
        stored: ElementType,
        requested: ElementType,
    },
    #[error("Allocation of {requested} bytes exceeds the device limit of {limit} bytes")]
    AllocationFailure { requested: u64, limit: u64 },
    #[error("GPU buffer mapping failed: {0}")]
    BufferMapFailed(String),
}

/// Ordered device buffers sharing one element type.
#[derive(Debug, Clone)]
pub struct BufferGroup {
    buffers: Vec<Buffer>,
    lengths: Vec<usize>,
    element_type: ElementType,
}

impl BufferGroup {
    /// Number of buffers in the group.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    pub fn buffer(&self, index: usize) -> Option<&Buffer> {
        self.buffers.get(index)
    }

    /// Element count of each buffer.
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn total_elements(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Logical size in bytes (elements x width, without alignment padding).
    pub fn total_bytes(&self) -> u64 {
        (self.total_elements() * self.element_type.width()) as u64
    }
}

/// Register of live device buffer groups.
pub struct MemoryRegister {
    device: Arc<Device>,
    queue: Arc<Queue>,
    groups: RwLock<SlotTable<BufferGroup>>,
}

impl MemoryRegister {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            groups: RwLock::new(SlotTable::new()),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    /// Upload one buffer.
    pub fn push<T: DeviceElement>(&self, data: &[T]) -> Result<Handle, MemoryError> {
        self.push_chunks(&[data])
    }

    /// Upload several buffers as one group, preserving their order.
    pub fn push_chunks<T, C>(&self, chunks: &[C]) -> Result<Handle, MemoryError>
    where
        T: DeviceElement,
        C: AsRef<[T]>,
    {
        if chunks.is_empty() || chunks.iter().any(|c| c.as_ref().is_empty()) {
            log::warn!("push rejected: empty input");
            return Err(MemoryError::EmptyInput);
        }

        let lengths: Vec<usize> = chunks.iter().map(|c| c.as_ref().len()).collect();
        let buffers = self.create_buffers(&lengths, T::ELEMENT_TYPE, "register_push")?;
        for (buffer, chunk) in buffers.iter().zip(chunks) {
            self.write_padded(buffer, bytemuck::cast_slice(chunk.as_ref()));
        }

        Ok(self.register(buffers, lengths, T::ELEMENT_TYPE))
    }

    /// Allocate `count` uninitialized buffers of `length` elements each.
    pub fn allocate_group(
        &self,
        count: usize,
        length: usize,
        element_type: ElementType,
    ) -> Result<Handle, MemoryError> {
        self.allocate_with_lengths(&vec![length; count], element_type)
    }

    /// Allocate uninitialized buffers with explicit per-buffer lengths.
    pub fn allocate_with_lengths(
        &self,
        lengths: &[usize],
        element_type: ElementType,
    ) -> Result<Handle, MemoryError> {
        if lengths.is_empty() || lengths.contains(&0) {
            log::warn!("allocate rejected: empty group or zero-length buffer");
            return Err(MemoryError::EmptyInput);
        }

        let buffers = self.create_buffers(lengths, element_type, "register_allocate")?;
        Ok(self.register(buffers, lengths.to_vec(), element_type))
    }

    /// Download all buffers of a group and concatenate them.
    pub fn pull<T: DeviceElement>(
        &self,
        handle: Handle,
        free: bool,
    ) -> Result<Vec<T>, MemoryError> {
        Ok(self.pull_chunks::<T>(handle, free)?.concat())
    }

    /// Download all buffers of a group, one vector per buffer.
    pub fn pull_chunks<T: DeviceElement>(
        &self,
        handle: Handle,
        free: bool,
    ) -> Result<Vec<Vec<T>>, MemoryError> {
        let group = self
            .find_group(handle)
            .ok_or(MemoryError::HandleNotFound(handle))?;
        if group.element_type != T::ELEMENT_TYPE {
            return Err(MemoryError::TypeMismatch {
                stored: group.element_type,
                requested: T::ELEMENT_TYPE,
            });
        }

        let chunks = self.read_group::<T>(&group)?;
        if free {
            self.free(handle);
        }
        Ok(chunks)
    }

    /// Release every buffer of a group. Returns the logical bytes freed,
    /// or 0 when the handle is unknown.
    pub fn free(&self, handle: Handle) -> u64 {
        let removed = self.write_groups().remove(handle);
        match removed {
            Some(group) => {
                for buffer in &group.buffers {
                    buffer.destroy();
                }
                let bytes = group.total_bytes();
                log::debug!(
                    "Freed group {} ({} buffers, {} bytes)",
                    handle,
                    group.count(),
                    bytes
                );
                bytes
            }
            None => {
                log::warn!("free: handle {} not found", handle);
                0
            }
        }
    }

    /// Free every live group. Returns the total logical bytes freed.
    pub fn clear(&self) -> u64 {
        let handles: Vec<Handle> = self.read_groups().iter().map(|(h, _)| h).collect();
        handles.into_iter().map(|h| self.free(h)).sum()
    }

    /// Look up a group without mutating the register.
    pub fn find_group(&self, handle: Handle) -> Option<BufferGroup> {
        self.read_groups().get(handle).cloned()
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.read_groups().contains(handle)
    }

    pub fn live_groups(&self) -> usize {
        self.read_groups().len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.read_groups().iter().map(|(_, g)| g.total_bytes()).sum()
    }

    /// Create a uniform buffer for kernel parameters.
    ///
    /// Parameter buffers live only as long as the caller holds them and are
    /// not tracked in the handle table.
    pub fn create_params_buffer(&self, label: &str, size: u64) -> Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded_size(size as usize).max(16),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Write parameter bytes into a buffer created by [`Self::create_params_buffer`].
    pub fn write_params(&self, buffer: &Buffer, bytes: &[u8]) {
        self.write_padded(buffer, bytes);
    }

    // --- Private helpers ---

    fn create_buffers(
        &self,
        lengths: &[usize],
        element_type: ElementType,
        label: &str,
    ) -> Result<Vec<Buffer>, MemoryError> {
        let limits = self.device.limits();
        let limit = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);

        let mut buffers: Vec<Buffer> = Vec::with_capacity(lengths.len());
        for &length in lengths {
            let size = padded_size(length * element_type.width());
            if size > limit {
                // Roll back so no partial group survives.
                for buffer in &buffers {
                    buffer.destroy();
                }
                log::error!(
                    "Allocation of {} bytes exceeds device limit {} ({} buffers rolled back)",
                    size,
                    limit,
                    buffers.len()
                );
                return Err(MemoryError::AllocationFailure {
                    requested: size,
                    limit,
                });
            }

            buffers.push(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        Ok(buffers)
    }

    fn register(
        &self,
        buffers: Vec<Buffer>,
        lengths: Vec<usize>,
        element_type: ElementType,
    ) -> Handle {
        let count = buffers.len();
        let group = BufferGroup {
            buffers,
            lengths,
            element_type,
        };
        let bytes = group.total_bytes();
        let handle = self.write_groups().insert(group);
        log::debug!(
            "Registered group {} ({} x {}, {} bytes)",
            handle,
            count,
            element_type,
            bytes
        );
        handle
    }

    fn write_padded(&self, buffer: &Buffer, bytes: &[u8]) {
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        if bytes.len() % align == 0 {
            self.queue.write_buffer(buffer, 0, bytes);
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(bytes.len().next_multiple_of(align), 0);
            self.queue.write_buffer(buffer, 0, &padded);
        }
    }

    fn read_group<T: DeviceElement>(
        &self,
        group: &BufferGroup,
    ) -> Result<Vec<Vec<T>>, MemoryError> {
        let staging: Vec<Buffer> = group
            .buffers
            .iter()
            .map(|source| {
                self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("register_staging"),
                    size: source.size(),
                    usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("register_pull_encoder"),
            });
        for (source, target) in group.buffers.iter().zip(&staging) {
            encoder.copy_buffer_to_buffer(source, 0, target, 0, source.size());
        }
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        for buffer in &staging {
            let tx = tx.clone();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |r| {
                let _ = tx.send(r);
            });
        }
        drop(tx);
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| MemoryError::BufferMapFailed(e.to_string()))?;

        for _ in 0..staging.len() {
            rx.recv()
                .map_err(|e| MemoryError::BufferMapFailed(e.to_string()))?
                .map_err(|e| MemoryError::BufferMapFailed(format!("{:?}", e)))?;
        }

        let mut chunks = Vec::with_capacity(staging.len());
        for (buffer, &length) in staging.iter().zip(&group.lengths) {
            let data = buffer.slice(..).get_mapped_range();
            let bytes = length * std::mem::size_of::<T>();
            chunks.push(bytemuck::cast_slice::<u8, T>(&data[..bytes]).to_vec());
            drop(data);
            buffer.unmap();
            buffer.destroy();
        }
        Ok(chunks)
    }

    fn read_groups(&self) -> RwLockReadGuard<'_, SlotTable<BufferGroup>> {
        self.groups.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_groups(&self) -> RwLockWriteGuard<'_, SlotTable<BufferGroup>> {
        self.groups.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Round a byte size up to the copy alignment, never below one word.
fn padded_size(bytes: usize) -> u64 {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    bytes.next_multiple_of(align).max(align) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Complex32;

    fn create_test_register() -> Option<MemoryRegister> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default())).ok()?;
        Some(MemoryRegister::new(Arc::new(device), Arc::new(queue)))
    }

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), 4);
        assert_eq!(padded_size(1), 4);
        assert_eq!(padded_size(4), 4);
        assert_eq!(padded_size(9), 12);
    }

    #[test]
    fn test_push_empty_rejected() {
        if let Some(register) = create_test_register() {
            let empty: [f32; 0] = [];
            assert!(matches!(register.push(&empty), Err(MemoryError::EmptyInput)));
            let chunks: Vec<Vec<f32>> = vec![vec![1.0], vec![]];
            assert!(matches!(
                register.push_chunks(&chunks),
                Err(MemoryError::EmptyInput)
            ));
            assert_eq!(register.live_groups(), 0);
        }
    }

    #[test]
    fn test_odd_byte_lengths_round_trip() {
        if let Some(register) = create_test_register() {
            let data: Vec<u8> = (0..7).collect();
            let h = register.push(&data).unwrap();
            assert_eq!(register.pull::<u8>(h, true).unwrap(), data);
            assert!(!register.contains(h));
        }
    }

    #[test]
    fn test_complex_round_trip() {
        if let Some(register) = create_test_register() {
            let data: Vec<Complex32> = (0..16)
                .map(|i| Complex32::new(i as f32, -(i as f32)))
                .collect();
            let h = register.push(&data).unwrap();
            assert_eq!(register.pull::<Complex32>(h, false).unwrap(), data);
            assert_eq!(register.free(h), 16 * 8);
        }
    }

    #[test]
    fn test_allocation_over_limit_rolls_back() {
        if let Some(register) = create_test_register() {
            let limit = register.device().limits().max_buffer_size as usize;
            let result = register.allocate_with_lengths(&[16, limit], ElementType::Float32);
            assert!(matches!(result, Err(MemoryError::AllocationFailure { .. })));
            assert_eq!(register.live_groups(), 0);
        }
    }
}
