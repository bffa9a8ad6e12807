//! Buffer management for geometry, uniforms and acceleration structure inputs
//!
//! [`GpuBuffer`] owns its allocation and releases it deterministically on
//! drop. A buffer carries a persistent mapped pointer only when created
//! with the host-visible sequential-write policy; writing through any other
//! buffer is an invalid operation, not undefined behavior.

use std::sync::Arc;

use ash::{vk, Device};
use bytemuck::Pod;

use super::allocator::{GpuAllocator, MemoryResidency};
use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Buffer wrapper with owned memory
pub struct GpuBuffer {
    device: Device,
    allocator: Arc<GpuAllocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

impl GpuBuffer {
    /// Create a new buffer
    ///
    /// `HostSequentialWrite` buffers are mapped once here and stay mapped
    /// for their whole lifetime.
    pub fn new(
        device: Device,
        allocator: Arc<GpuAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<Self> {
        let (buffer, mut allocation) = allocator.create_buffer(size, usage, residency)?;

        let mapped = if residency.is_host_visible() {
            Some(allocator.map(&mut allocation)?)
        } else {
            None
        };

        Ok(Self {
            device,
            allocator,
            buffer,
            allocation,
            size,
            mapped,
        })
    }

    /// Create a host-visible buffer pre-filled with `data`
    pub fn from_data<T: Pod>(
        device: Device,
        allocator: Arc<GpuAllocator>,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> VulkanResult<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let buffer = Self::new(
            device,
            allocator,
            size.max(1),
            usage,
            MemoryResidency::HostSequentialWrite,
        )?;
        buffer.write_data(data, 0)?;
        Ok(buffer)
    }

    /// Write `data` at `offset` bytes through the persistent mapping
    pub fn write_data<T: Pod>(&self, data: &[T], offset: vk::DeviceSize) -> VulkanResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes past buffer size {}", end, self.size),
            });
        }

        let mapped = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "write to a buffer without host-visible mapping".to_string(),
        })?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                mapped.add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Read back `count` elements from `offset` bytes through the mapping
    pub fn read_data<T: Pod>(&self, count: usize, offset: vk::DeviceSize) -> VulkanResult<Vec<T>> {
        let mapped = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "read from a buffer without host-visible mapping".to_string(),
        })?;

        let mut out = vec![T::zeroed(); count];
        unsafe {
            std::ptr::copy_nonoverlapping(
                mapped.add(offset as usize),
                out.as_mut_ptr() as *mut u8,
                count * std::mem::size_of::<T>(),
            );
        }
        Ok(out)
    }

    /// Query the buffer's device address
    ///
    /// The buffer must have been created with
    /// `SHADER_DEVICE_ADDRESS` usage.
    pub fn device_address(&self) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.buffer);
        unsafe { self.device.get_buffer_device_address(&info) }
    }

    /// Get buffer handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Whether this buffer carries a persistent host mapping
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        if self.mapped.take().is_some() {
            self.allocator.unmap(&mut self.allocation);
        }
        self.allocator.destroy_buffer(self.buffer, &mut self.allocation);
    }
}
