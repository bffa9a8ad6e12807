//! GPU memory allocation through VMA
//!
//! One [`GpuAllocator`] is created by the context and shared by every
//! buffer and image in the backend. Callers declare usage flags and a
//! residency hint; the allocator resolves the concrete memory type.

use ash::vk;
use vk_mem::Alloc;

use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryResidency {
    /// Device-local memory, no host access
    DeviceLocal,
    /// Host-visible, persistently mapped, written sequentially by the CPU
    HostSequentialWrite,
    /// Let the allocator decide from the usage flags
    Auto,
}

impl MemoryResidency {
    fn to_create_info(self) -> vk_mem::AllocationCreateInfo {
        let mut info = vk_mem::AllocationCreateInfo::default();
        match self {
            MemoryResidency::DeviceLocal => {
                info.usage = vk_mem::MemoryUsage::AutoPreferDevice;
            }
            MemoryResidency::HostSequentialWrite => {
                info.usage = vk_mem::MemoryUsage::Auto;
                info.flags = vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE;
            }
            MemoryResidency::Auto => {
                info.usage = vk_mem::MemoryUsage::Auto;
            }
        }
        info
    }

    /// Whether allocations with this policy carry a persistent mapping
    pub fn is_host_visible(self) -> bool {
        matches!(self, MemoryResidency::HostSequentialWrite)
    }
}

/// Wrapper around the VMA allocator shared by all GPU resources
pub struct GpuAllocator {
    allocator: vk_mem::Allocator,
}

impl GpuAllocator {
    /// Create the allocator with buffer-device-address support enabled
    pub fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> VulkanResult<Self> {
        let create_info = vk_mem::AllocatorCreateInfo::new(instance, device, physical_device)
            .vulkan_api_version(vk::API_VERSION_1_2)
            .flags(vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS);

        let allocator = vk_mem::Allocator::new(create_info).map_err(VulkanError::from_vk)?;

        Ok(Self { allocator })
    }

    /// Allocate a buffer with backing memory
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        residency: MemoryResidency,
    ) -> VulkanResult<(vk::Buffer, vk_mem::Allocation)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let create_info = residency.to_create_info();

        unsafe {
            self.allocator
                .create_buffer(&buffer_info, &create_info)
                .map_err(VulkanError::from_vk)
        }
    }

    /// Allocate an image with backing memory
    pub fn create_image(
        &self,
        image_info: &vk::ImageCreateInfo,
        residency: MemoryResidency,
    ) -> VulkanResult<(vk::Image, vk_mem::Allocation)> {
        let create_info = residency.to_create_info();

        unsafe {
            self.allocator
                .create_image(image_info, &create_info)
                .map_err(VulkanError::from_vk)
        }
    }

    /// Map an allocation for CPU writes
    ///
    /// Only valid for `HostSequentialWrite` allocations; the pointer stays
    /// valid until [`Self::unmap`].
    pub fn map(&self, allocation: &mut vk_mem::Allocation) -> VulkanResult<*mut u8> {
        unsafe {
            self.allocator
                .map_memory(allocation)
                .map_err(VulkanError::from_vk)
        }
    }

    /// Unmap a previously mapped allocation
    pub fn unmap(&self, allocation: &mut vk_mem::Allocation) {
        unsafe {
            self.allocator.unmap_memory(allocation);
        }
    }

    /// Free a buffer and its memory
    pub fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        unsafe {
            self.allocator.destroy_buffer(buffer, allocation);
        }
    }

    /// Free an image and its memory
    pub fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        unsafe {
            self.allocator.destroy_image(image, allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_residency_policy_mapping() {
        assert!(MemoryResidency::HostSequentialWrite.is_host_visible());
        assert!(!MemoryResidency::DeviceLocal.is_host_visible());
        assert!(!MemoryResidency::Auto.is_host_visible());

        let info = MemoryResidency::HostSequentialWrite.to_create_info();
        assert!(info
            .flags
            .contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE));
    }
}
