//! Image and render target management
//!
//! [`GpuImage`] bundles an image, its view and its allocation, and tracks
//! the layout the image was last transitioned to. The tracked layout is
//! advisory: it is only correct if every access goes through
//! [`GpuImage::cmd_transition`], which is how all passes in this backend
//! declare their reads and writes.

use std::cell::Cell;
use std::sync::Arc;

use ash::{vk, Device};

use super::allocator::{GpuAllocator, MemoryResidency};
use crate::render::backends::vulkan::initialization::context::VulkanResult;

/// Parameters for creating a [`GpuImage`]
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Pixel format
    pub format: vk::Format,
    /// Width and height
    pub extent: vk::Extent2D,
    /// Usage flags declared at creation
    pub usage: vk::ImageUsageFlags,
    /// Aspect for the default view
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Color target with the given format, extent and usage
    pub fn color(format: vk::Format, extent: vk::Extent2D, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            extent,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }
}

/// Image wrapper with view, owned memory and tracked layout
pub struct GpuImage {
    device: Device,
    allocator: Arc<GpuAllocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
    current_layout: Cell<vk::ImageLayout>,
}

impl GpuImage {
    /// Create a 2D image plus a full-subresource view
    pub fn new(
        device: Device,
        allocator: Arc<GpuAllocator>,
        desc: &ImageDesc,
    ) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, allocation) =
            allocator.create_image(&image_info, MemoryResidency::DeviceLocal)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(crate::render::backends::vulkan::VulkanError::from_vk)?
        };

        Ok(Self {
            device,
            allocator,
            image,
            allocation,
            view,
            format: desc.format,
            extent: desc.extent,
            current_layout: Cell::new(vk::ImageLayout::UNDEFINED),
        })
    }

    /// Record a layout transition declaring the next access to this image
    ///
    /// Derives access masks and pipeline stages from the old and new
    /// layouts and updates the tracked layout. A transition to the layout
    /// the image is already in is recorded anyway when `force` barriers are
    /// needed; callers that want to skip redundant transitions check
    /// [`Self::layout`] first.
    pub fn cmd_transition(&self, cmd: vk::CommandBuffer, new_layout: vk::ImageLayout) {
        let old_layout = self.current_layout.get();
        let (src_access, src_stage) = access_for_layout(old_layout);
        let (dst_access, dst_stage) = access_for_layout(new_layout);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(src_access)
            .dst_access_mask(dst_access);

        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier.build()],
            );
        }

        self.current_layout.set(new_layout);
    }

    /// Get image handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// Get the default view
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Get format
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Get extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Layout the image was last transitioned to
    pub fn layout(&self) -> vk::ImageLayout {
        self.current_layout.get()
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
        self.allocator.destroy_image(self.image, &mut self.allocation);
    }
}

/// Access mask and pipeline stage implied by an image layout
fn access_for_layout(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE)
        }
        vk::ImageLayout::GENERAL => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        vk::ImageLayout::PRESENT_SRC_KHR => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
        _ => (
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_for_layout_pairs() {
        let (access, stage) = access_for_layout(vk::ImageLayout::UNDEFINED);
        assert_eq!(access, vk::AccessFlags::empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);

        let (access, stage) = access_for_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);

        let (access, _) = access_for_layout(vk::ImageLayout::GENERAL);
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
    }

    #[test]
    fn test_image_desc_color_helper() {
        let desc = ImageDesc::color(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::Extent2D { width: 800, height: 600 },
            vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED,
        );
        assert_eq!(desc.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(desc.extent.width, 800);
    }
}
