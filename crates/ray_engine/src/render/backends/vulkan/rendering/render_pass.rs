//! Render pass objects for the raster stages
//!
//! Every raster stage in this backend writes exactly one color attachment
//! and reads nothing through attachments; cross-pass data flows through
//! sampled images with explicit barriers recorded by the frame graph. The
//! render passes therefore keep images in `COLOR_ATTACHMENT_OPTIMAL` and
//! leave all transitions to the caller.

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// How a pass treats the attachment's previous contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadBehavior {
    /// Clear to the frame's clear color
    Clear,
    /// Preserve previous contents (UI drawing over the blitted composite)
    Load,
    /// Previous contents are irrelevant (full-screen overwrites)
    DontCare,
}

impl LoadBehavior {
    fn to_vk(self) -> vk::AttachmentLoadOp {
        match self {
            LoadBehavior::Clear => vk::AttachmentLoadOp::CLEAR,
            LoadBehavior::Load => vk::AttachmentLoadOp::LOAD,
            LoadBehavior::DontCare => vk::AttachmentLoadOp::DONT_CARE,
        }
    }
}

/// Single-color-attachment render pass with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    /// Create a pass writing one color attachment of `format`
    pub fn new_color(device: Device, format: vk::Format, load: LoadBehavior) -> VulkanResult<Self> {
        let attachment = vk::AttachmentDescription::builder()
            .format(format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(load.to_vk())
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();

        let color_refs = [color_ref];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs)
            .build();

        let attachments = [attachment];
        let subpasses = [subpass];
        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses);

        let render_pass = unsafe {
            device
                .create_render_pass(&create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        Ok(Self {
            device,
            render_pass,
        })
    }

    /// Get render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Framebuffer binding one image view to a render pass, with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer for one color view
    pub fn new(
        device: Device,
        render_pass: &RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let attachments = [view];
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(&attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe {
            device
                .create_framebuffer(&create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    /// Get framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Extent the framebuffer was created with
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_framebuffer(self.framebuffer, None);
        }
    }
}
