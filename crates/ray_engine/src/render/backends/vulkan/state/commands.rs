//! Command buffer management and the blocking upload path
//!
//! Two submission modes exist. Per-frame command buffers come from the
//! frame ring and are synchronized by that slot's fence. Everything else —
//! mesh uploads, texture uploads, acceleration structure builds — goes
//! through [`ImmediateSubmit`]: record one closure, submit, block the
//! calling thread until the shared upload fence signals, reset the pool.
//! When an immediate submit returns, the recorded commands have fully
//! completed on the device, so uploads and builds are strictly sequential
//! with respect to each other and to frame rendering.

use ash::{vk, Device};

use super::sync::Fence;
use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool for the given queue family
    pub fn new(device: Device, queue_family_index: u32) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        Ok(Self {
            device,
            command_pool,
        })
    }

    /// Allocate primary command buffers
    pub fn allocate_command_buffers(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let command_buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::from_vk)?
        };

        Ok(command_buffers)
    }

    /// Reset the whole pool, recycling all buffers allocated from it
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::from_vk)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            // All command buffers must be off the queue before the pool goes
            let _ = self.device.device_wait_idle();
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Dedicated pool + fence for synchronous one-shot uploads
pub struct ImmediateSubmit {
    device: Device,
    queue: vk::Queue,
    pool: CommandPool,
    command_buffer: vk::CommandBuffer,
    upload_fence: Fence,
}

impl ImmediateSubmit {
    /// Create the upload pool and its persistent fence
    pub fn new(device: Device, queue: vk::Queue, queue_family_index: u32) -> VulkanResult<Self> {
        let pool = CommandPool::new(device.clone(), queue_family_index)?;
        let command_buffer = pool.allocate_command_buffers(1)?[0];
        let upload_fence = Fence::new(device.clone(), false)?;

        Ok(Self {
            device,
            queue,
            pool,
            command_buffer,
            upload_fence,
        })
    }

    /// Record `record` into the upload buffer, submit, and block until done
    ///
    /// This is a request-response call: every command recorded by the
    /// closure has completed on the device when it returns.
    pub fn submit<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
                .map_err(VulkanError::from_vk)?;
        }

        record(self.command_buffer);

        unsafe {
            self.device
                .end_command_buffer(self.command_buffer)
                .map_err(VulkanError::from_vk)?;
        }

        let command_buffers = [self.command_buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info.build()], self.upload_fence.handle())
                .map_err(VulkanError::from_vk)?;
        }

        self.upload_fence.wait()?;
        self.upload_fence.reset()?;
        self.pool.reset()?;

        Ok(())
    }
}
