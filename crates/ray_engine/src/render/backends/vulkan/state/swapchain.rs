//! Vulkan swapchain management
//!
//! Swapchain creation and recreation. The present blit copies the offscreen
//! present target into the acquired swapchain image, so images are created
//! with transfer-destination usage on top of color attachment.
//!
//! Recreation is synchronous: the caller blocks on device idle, drops the
//! in-progress frame, and builds a new chain against the current surface
//! extent. A zero-sized extent (minimized window) never reaches this module;
//! the frame graph suspends submission entirely until the extent is
//! non-zero again.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use crate::render::backends::vulkan::initialization::context::{
    VulkanContext, VulkanError, VulkanResult,
};

/// Swapchain wrapper with RAII cleanup
pub struct Swapchain {
    device: ash::Device,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain for the current surface state
    pub fn new(context: &VulkanContext, window_extent: vk::Extent2D) -> VulkanResult<Self> {
        Self::create_internal(context, window_extent, vk::SwapchainKHR::null())
    }

    /// Recreate after a resize or out-of-date signal
    ///
    /// Blocks on device idle. The retired chain is handed to the driver as
    /// `old_swapchain` for resource reuse, then destroyed.
    pub fn recreate(
        &mut self,
        context: &VulkanContext,
        window_extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        context.wait_idle()?;
        let mut replacement = Self::create_internal(context, window_extent, self.swapchain)?;
        std::mem::swap(self, &mut replacement);
        // `replacement` now holds the retired chain; dropping it destroys
        // the old views and swapchain
        Ok(())
    }

    fn create_internal(
        context: &VulkanContext,
        window_extent: vk::Extent2D,
        old_swapchain: vk::SwapchainKHR,
    ) -> VulkanResult<Self> {
        let physical = context.physical_device();
        let surface = context.surface();

        let surface_caps = surface.capabilities(physical.device)?;
        let surface_formats = surface.formats(physical.device)?;

        let format = surface_formats
            .iter()
            .find(|sf| {
                sf.format == vk::Format::B8G8R8A8_UNORM
                    && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .cloned()
            .unwrap_or(surface_formats[0]);

        let present_modes = surface.present_modes(physical.device)?;
        let present_mode = present_modes
            .iter()
            .cloned()
            .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: window_extent.width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: window_extent.height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        let image_count = (surface_caps.min_image_count + 1).min(if surface_caps.max_image_count > 0
        {
            surface_caps.max_image_count
        } else {
            surface_caps.min_image_count + 1
        });

        // TRANSFER_DST for the final present-target blit
        let swapchain_create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = context.swapchain_loader().clone();
        let device = context.raw_device();

        let swapchain = unsafe {
            loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(VulkanError::from_vk)?
        };

        let images = unsafe {
            loader
                .get_swapchain_images(swapchain)
                .map_err(VulkanError::from_vk)?
        };

        let image_views: Result<Vec<_>, _> = images
            .iter()
            .map(|&image| {
                let create_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(format.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.create_image_view(&create_info, None) }
            })
            .collect();

        let image_views = image_views.map_err(VulkanError::from_vk)?;

        log::debug!(
            "Swapchain created: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            images.len(),
            format.format
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            images,
            image_views,
            format,
            extent,
        })
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    ///
    /// Returns the image index and whether the chain reported suboptimal.
    /// Out-of-date surfaces map to [`VulkanError::SwapchainOutOfDate`].
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> VulkanResult<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
                .map_err(VulkanError::from_vk)
        }
    }

    /// Queue a present of `image_index`, waiting on `wait_semaphore`
    ///
    /// Returns whether the chain reported suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.loader
                .queue_present(queue, &present_info)
                .map_err(VulkanError::from_vk)
        }
    }

    /// Get swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Get surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    /// Get a swapchain image by acquired index
    pub fn image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    /// Get image views
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Number of images in the chain
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Get swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &image_view in &self.image_views {
                self.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Tracks the collaborator-reported surface extent and pending recreation
///
/// A zero extent means the window is minimized: frame submission is
/// suspended entirely, no recreation is queued. The first non-zero extent
/// after that queues exactly one recreation.
pub struct SurfaceTracker {
    extent: vk::Extent2D,
    needs_recreate: bool,
}

impl SurfaceTracker {
    /// Start tracking from the initial framebuffer extent
    pub fn new(extent: vk::Extent2D) -> Self {
        Self {
            extent,
            needs_recreate: false,
        }
    }

    /// Record a new extent reported by the window collaborator
    pub fn report_extent(&mut self, width: u32, height: u32) {
        let reported = vk::Extent2D { width, height };
        if width == 0 || height == 0 {
            // Minimized: suspend, and queue nothing until restore
            self.extent = reported;
            return;
        }
        if reported.width != self.extent.width
            || reported.height != self.extent.height
            || self.is_suspended()
        {
            self.needs_recreate = true;
        }
        self.extent = reported;
    }

    /// Whether all swapchain work is currently suspended
    pub fn is_suspended(&self) -> bool {
        self.extent.width == 0 || self.extent.height == 0
    }

    /// Queue a recreation (out-of-date or suboptimal present result)
    pub fn request_recreate(&mut self) {
        self.needs_recreate = true;
    }

    /// Consume the pending-recreation flag
    pub fn take_recreate(&mut self) -> bool {
        std::mem::take(&mut self.needs_recreate)
    }

    /// Last reported extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SurfaceTracker {
        SurfaceTracker::new(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }

    #[test]
    fn test_same_extent_queues_nothing() {
        let mut surface = tracker();
        surface.report_extent(800, 600);
        assert!(!surface.take_recreate());
        assert!(!surface.is_suspended());
    }

    #[test]
    fn test_resize_queues_one_recreate() {
        let mut surface = tracker();
        surface.report_extent(1024, 768);
        assert!(surface.take_recreate());
        // Consumed: a second query sees nothing pending
        assert!(!surface.take_recreate());
    }

    #[test]
    fn test_minimize_suspends_without_recreate() {
        let mut surface = tracker();
        surface.report_extent(0, 0);
        assert!(surface.is_suspended());
        assert!(!surface.take_recreate());
    }

    #[test]
    fn test_restore_after_minimize_recreates_exactly_once() {
        let mut surface = tracker();
        surface.report_extent(0, 0);
        assert!(!surface.take_recreate());

        // Restoring to the pre-minimize size still needs one recreation
        surface.report_extent(800, 600);
        assert!(!surface.is_suspended());
        assert!(surface.take_recreate());
        assert!(!surface.take_recreate());
    }

    #[test]
    fn test_out_of_date_request() {
        let mut surface = tracker();
        surface.request_recreate();
        assert!(surface.take_recreate());
    }
}
