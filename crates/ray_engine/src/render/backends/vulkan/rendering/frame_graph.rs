//! Per-frame pass orchestration
//!
//! Owns the swapchain, the offscreen render targets and the sampler sets
//! that feed the post-process chain, and records the fixed pass sequence:
//!
//! 1. ray trace main scene, then inventory scene when active
//! 2. 1×1 mouse-pick trace, result copied to the slot's readback buffer
//! 3. five-stage denoise ping-pong across three blur targets
//! 4. composite
//! 5. blit composite → present target, UI pass over it
//! 6. blit present target → swapchain image, transition to present
//!
//! Passes execute in strict program order from the CPU's perspective; all
//! GPU-side overlap is governed by the explicit barriers recorded between
//! them. Swapchain recreation is synchronous and drops the frame in
//! progress; a zero-sized surface suspends submission entirely.

use ash::{vk, Device};

use super::pipeline::{PipelineManager, RasterPipeline, ScreenPush, HDR_FORMAT, PRESENT_FORMAT};
use super::render_pass::{Framebuffer, RenderPass};
use crate::render::backends::vulkan::initialization::context::{VulkanContext, VulkanResult};
use crate::render::backends::vulkan::raytracing::pipeline::RayTracingPipeline;
use crate::render::backends::vulkan::resources::buffer::GpuBuffer;
use crate::render::backends::vulkan::resources::descriptor_set::{
    slots, BindingKind, DescriptorBindings, DescriptorPool, DescriptorResource,
};
use crate::render::backends::vulkan::resources::image::{GpuImage, ImageDesc};
use crate::render::backends::vulkan::state::frame::FrameSlot;
use crate::render::backends::vulkan::state::swapchain::Swapchain;

/// Number of denoise ping-pong targets
const DENOISE_TARGETS: usize = 3;
/// Number of separable blur passes in the denoise chain
const DENOISE_PASSES: usize = 5;

/// Build the sampler-flavor binding declarations (layout only)
///
/// Binding 0 is the pass's primary input, binding 1 the secondary
/// (composite reads the raw trace plus the denoised result). Passes with
/// one input bind it to both slots rather than leave a binding undefined.
pub fn sampler_flavor(device: Device) -> VulkanResult<DescriptorBindings> {
    let mut set = DescriptorBindings::new(device);
    set.add_binding(
        BindingKind::CombinedImageSampler,
        slots::SAMPLER_INPUT,
        1,
        vk::ShaderStageFlags::FRAGMENT,
    )?;
    set.add_binding(
        BindingKind::CombinedImageSampler,
        slots::SAMPLER_INPUT + 1,
        1,
        vk::ShaderStageFlags::FRAGMENT,
    )?;
    set.build_layout()?;
    Ok(set)
}

/// Everything the frame graph needs from the renderer to record one frame
pub struct PassResources<'a> {
    /// The shared context
    pub context: &'a VulkanContext,
    /// Current frame slot (command buffer, dynamic sets, TLAS slots)
    pub slot: &'a FrameSlot,
    /// The mostly-immutable static set
    pub static_set: &'a DescriptorBindings,
    /// Raster pipelines and render passes
    pub pipelines: &'a PipelineManager,
    /// Scene ray tracing pipeline
    pub scene_rt: &'a RayTracingPipeline,
    /// Mouse-pick ray tracing pipeline
    pub pick_rt: &'a RayTracingPipeline,
    /// Device-local pick result buffer bound in the static set
    pub pick_storage: &'a GpuBuffer,
    /// Number of UI quads to draw this frame
    pub ui_quad_count: u32,
    /// Clear color for the composite chain
    pub clear_color: [f32; 4],
}

/// Offscreen targets and the sampler sets reading them
///
/// Recreated as a unit whenever the surface extent changes.
struct RenderTargets {
    rt_color: GpuImage,
    rt_normal: GpuImage,
    denoise: Vec<GpuImage>,
    composite: GpuImage,
    present: GpuImage,
    denoise_framebuffers: Vec<Framebuffer>,
    composite_framebuffer: Framebuffer,
    present_framebuffer: Framebuffer,
    sampler_rt: DescriptorBindings,
    sampler_denoise: Vec<DescriptorBindings>,
    sampler_composite: DescriptorBindings,
}

impl RenderTargets {
    fn new(
        context: &VulkanContext,
        pool: &DescriptorPool,
        pipelines: &PipelineManager,
        sampler: vk::Sampler,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let allocator = context.allocator();

        let trace_usage = vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED;
        let rt_color = GpuImage::new(
            device.clone(),
            allocator.clone(),
            &ImageDesc::color(HDR_FORMAT, extent, trace_usage),
        )?;
        let rt_normal = GpuImage::new(
            device.clone(),
            allocator.clone(),
            &ImageDesc::color(HDR_FORMAT, extent, trace_usage),
        )?;

        let blur_usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED;
        let mut denoise = Vec::with_capacity(DENOISE_TARGETS);
        for _ in 0..DENOISE_TARGETS {
            denoise.push(GpuImage::new(
                device.clone(),
                allocator.clone(),
                &ImageDesc::color(HDR_FORMAT, extent, blur_usage),
            )?);
        }

        let composite = GpuImage::new(
            device.clone(),
            allocator.clone(),
            &ImageDesc::color(
                HDR_FORMAT,
                extent,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC,
            ),
        )?;

        let present = GpuImage::new(
            device.clone(),
            allocator.clone(),
            &ImageDesc::color(
                PRESENT_FORMAT,
                extent,
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )?;

        let mut denoise_framebuffers = Vec::with_capacity(DENOISE_TARGETS);
        for target in &denoise {
            denoise_framebuffers.push(Framebuffer::new(
                device.clone(),
                &pipelines.denoise_pass,
                target.view(),
                extent,
            )?);
        }
        let composite_framebuffer = Framebuffer::new(
            device.clone(),
            &pipelines.composite_pass,
            composite.view(),
            extent,
        )?;
        let present_framebuffer =
            Framebuffer::new(device.clone(), &pipelines.ui_pass, present.view(), extent)?;

        // Sampler sets, one per distinct pass input
        let mut sampler_rt = sampler_flavor(device.clone())?;
        sampler_rt.allocate(pool)?;
        Self::bind_inputs(&sampler_rt, sampler, rt_color.view(), rt_color.view())?;

        let mut sampler_denoise = Vec::with_capacity(DENOISE_TARGETS);
        for target in &denoise {
            let mut set = sampler_flavor(device.clone())?;
            set.allocate(pool)?;
            Self::bind_inputs(&set, sampler, target.view(), target.view())?;
            sampler_denoise.push(set);
        }

        // Composite reads the raw trace and the final denoise target
        let mut sampler_composite = sampler_flavor(device.clone())?;
        sampler_composite.allocate(pool)?;
        Self::bind_inputs(
            &sampler_composite,
            sampler,
            rt_color.view(),
            denoise[final_denoise_target()].view(),
        )?;

        Ok(Self {
            rt_color,
            rt_normal,
            denoise,
            composite,
            present,
            denoise_framebuffers,
            composite_framebuffer,
            present_framebuffer,
            sampler_rt,
            sampler_denoise,
            sampler_composite,
        })
    }

    fn bind_inputs(
        set: &DescriptorBindings,
        sampler: vk::Sampler,
        primary: vk::ImageView,
        secondary: vk::ImageView,
    ) -> VulkanResult<()> {
        set.update(
            slots::SAMPLER_INPUT,
            DescriptorResource::CombinedImageSampler {
                view: primary,
                sampler,
            },
        )?;
        set.update(
            slots::SAMPLER_INPUT + 1,
            DescriptorResource::CombinedImageSampler {
                view: secondary,
                sampler,
            },
        )
    }
}

/// The blur chain: (input, output) target index per pass, -1 meaning the
/// raw trace image. Derived from the fixed A → h → v → B → h → v → C
/// sequence over three targets.
const fn denoise_chain() -> [(isize, usize); DENOISE_PASSES] {
    [(-1, 0), (0, 1), (1, 2), (2, 0), (0, 1)]
}

/// Target index holding the final denoise result
const fn final_denoise_target() -> usize {
    denoise_chain()[DENOISE_PASSES - 1].1
}

/// Owns the swapchain and drives the fixed pass sequence
pub struct FrameGraph {
    device: Device,
    swapchain: Swapchain,
    targets: RenderTargets,
    sampler: vk::Sampler,
    extent: vk::Extent2D,
}

impl FrameGraph {
    /// Create the swapchain, render targets and post-process sampler
    pub fn new(
        context: &VulkanContext,
        pool: &DescriptorPool,
        pipelines: &PipelineManager,
        extent: vk::Extent2D,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let swapchain = Swapchain::new(context, extent)?;

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE);
        let sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(crate::render::backends::vulkan::VulkanError::from_vk)?
        };

        let actual_extent = swapchain.extent();
        let targets = RenderTargets::new(context, pool, pipelines, sampler, actual_extent)?;

        Ok(Self {
            device,
            swapchain,
            targets,
            sampler,
            extent: actual_extent,
        })
    }

    /// Current render extent
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Rewrite the static set's trace output bindings
    ///
    /// Must be called once at startup and again after every recreation.
    pub fn bind_outputs(&self, static_set: &DescriptorBindings) -> VulkanResult<()> {
        static_set.update(
            slots::STATIC_RT_COLOR,
            DescriptorResource::StorageImage(&self.targets.rt_color),
        )?;
        static_set.update(
            slots::STATIC_RT_NORMAL,
            DescriptorResource::StorageImage(&self.targets.rt_normal),
        )
    }

    /// Synchronously recreate the swapchain and every per-extent resource
    ///
    /// Blocks on device idle; the in-progress frame is dropped.
    pub fn recreate(
        &mut self,
        context: &VulkanContext,
        pool: &DescriptorPool,
        pipelines: &PipelineManager,
        extent: vk::Extent2D,
    ) -> VulkanResult<()> {
        log::debug!("Recreating swapchain at {}x{}", extent.width, extent.height);

        // Blocks on device idle before touching anything still in flight
        self.swapchain.recreate(context, extent)?;
        self.extent = self.swapchain.extent();
        self.targets = RenderTargets::new(context, pool, pipelines, self.sampler, self.extent)?;
        Ok(())
    }

    /// Acquire the next swapchain image
    pub fn acquire(&self, semaphore: vk::Semaphore) -> VulkanResult<(u32, bool)> {
        self.swapchain.acquire_next_image(semaphore)
    }

    /// Present an acquired image
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> VulkanResult<bool> {
        self.swapchain.present(queue, image_index, wait_semaphore)
    }

    /// Record the full pass sequence into the slot's command buffer
    pub fn record(&self, res: &PassResources<'_>, image_index: u32) -> VulkanResult<()> {
        let device = res.context.device();
        let cmd = res.slot.command_buffer;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .map_err(crate::render::backends::vulkan::VulkanError::from_vk)?;
        }

        self.record_trace_passes(res, cmd);
        self.record_pick_pass(res, cmd);
        self.record_denoise_passes(res, cmd);
        self.record_composite_pass(res, cmd);
        self.record_ui_pass(res, cmd);
        self.record_present_blit(res, cmd, image_index);

        unsafe {
            device
                .end_command_buffer(cmd)
                .map_err(crate::render::backends::vulkan::VulkanError::from_vk)?;
        }
        Ok(())
    }

    /// Ray trace the main scene, then the inventory scene when present
    fn record_trace_passes(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        self.targets.rt_color.cmd_transition(cmd, vk::ImageLayout::GENERAL);
        self.targets.rt_normal.cmd_transition(cmd, vk::ImageLayout::GENERAL);

        // A scene with no TLAS this frame (empty instance list) is skipped
        // rather than traced against a stale structure.
        if res.slot.tlas_main.is_some() {
            self.bind_trace_sets(res, cmd, &res.slot.dynamic_main);
            res.scene_rt
                .cmd_trace(res.context, cmd, self.extent.width, self.extent.height);
        }

        if res.slot.tlas_inventory.is_some() {
            self.bind_trace_sets(res, cmd, &res.slot.dynamic_inventory);
            res.scene_rt
                .cmd_trace(res.context, cmd, self.extent.width, self.extent.height);
        }
    }

    /// 1×1 dispatch writing (instance, primitive) into the pick buffer
    fn record_pick_pass(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        let device = res.context.device();

        if res.slot.tlas_main.is_some() {
            self.bind_pick_sets(res, cmd);
            res.pick_rt.cmd_trace(res.context, cmd, 1, 1);
        }

        // Pick write → copy to the slot's host-readable buffer
        let to_transfer = vk::BufferMemoryBarrier::builder()
            .buffer(res.pick_storage.handle())
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .build();

        let copy = vk::BufferCopy::builder()
            .src_offset(0)
            .dst_offset(0)
            .size(res.pick_storage.size())
            .build();

        let to_host = vk::BufferMemoryBarrier::builder()
            .buffer(res.slot.pick_readback.handle())
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .build();

        unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[to_transfer],
                &[],
            );
            device.cmd_copy_buffer(
                cmd,
                res.pick_storage.handle(),
                res.slot.pick_readback.handle(),
                &[copy],
            );
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::DependencyFlags::empty(),
                &[],
                &[to_host],
                &[],
            );
        }
    }

    /// Five separable blur passes ping-ponging across three targets
    fn record_denoise_passes(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        self.targets
            .rt_color
            .cmd_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        self.targets
            .rt_normal
            .cmd_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let texel = [
            1.0 / self.extent.width.max(1) as f32,
            1.0 / self.extent.height.max(1) as f32,
        ];

        for (pass, (input, output)) in denoise_chain().into_iter().enumerate() {
            let horizontal = pass % 2 == 0;
            let push = ScreenPush {
                direction: if horizontal { [1.0, 0.0] } else { [0.0, 1.0] },
                texel_size: texel,
            };

            let sampler_set = match input {
                -1 => &self.targets.sampler_rt,
                i => &self.targets.sampler_denoise[i as usize],
            };
            if input >= 0 {
                self.targets.denoise[input as usize]
                    .cmd_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
            }
            self.targets.denoise[output]
                .cmd_transition(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

            self.record_screen_pass(
                res,
                cmd,
                &res.pipelines.denoise_pass,
                &self.targets.denoise_framebuffers[output],
                &res.pipelines.blur,
                sampler_set,
                &push,
                res.clear_color,
                3,
                1,
            );
        }
    }

    /// Combine the raw trace and the denoise result
    fn record_composite_pass(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        self.targets.denoise[final_denoise_target()]
            .cmd_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        self.targets
            .composite
            .cmd_transition(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let push = ScreenPush {
            direction: [0.0, 0.0],
            texel_size: [
                1.0 / self.extent.width.max(1) as f32,
                1.0 / self.extent.height.max(1) as f32,
            ],
        };

        self.record_screen_pass(
            res,
            cmd,
            &res.pipelines.composite_pass,
            &self.targets.composite_framebuffer,
            &res.pipelines.composite,
            &self.targets.sampler_composite,
            &push,
            res.clear_color,
            3,
            1,
        );
    }

    /// Blit the composite onto the present target and draw the UI over it
    fn record_ui_pass(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        let device = res.context.device();

        self.targets
            .composite
            .cmd_transition(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        self.targets
            .present
            .cmd_transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);

        let blit = full_image_blit(self.extent, self.extent);
        unsafe {
            device.cmd_blit_image(
                cmd,
                self.targets.composite.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                self.targets.present.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }

        self.targets
            .present
            .cmd_transition(cmd, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        if res.ui_quad_count > 0 {
            let push = ScreenPush {
                direction: [0.0, 0.0],
                texel_size: [0.0, 0.0],
            };
            // Six vertices per quad, one instance per quad record
            self.record_screen_pass(
                res,
                cmd,
                &res.pipelines.ui_pass,
                &self.targets.present_framebuffer,
                &res.pipelines.ui,
                &self.targets.sampler_composite,
                &push,
                res.clear_color,
                6,
                res.ui_quad_count,
            );
        }
    }

    /// Blit the present target into the acquired swapchain image
    fn record_present_blit(
        &self,
        res: &PassResources<'_>,
        cmd: vk::CommandBuffer,
        image_index: u32,
    ) {
        let device = res.context.device();
        let swap_image = self.swapchain.image(image_index);

        self.targets
            .present
            .cmd_transition(cmd, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);

        // Swapchain images are not tracked; barrier them directly
        cmd_image_barrier(
            device,
            cmd,
            swap_image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        );

        let blit = full_image_blit(self.extent, self.swapchain.extent());
        unsafe {
            device.cmd_blit_image(
                cmd,
                self.targets.present.handle(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                swap_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );
        }

        cmd_image_barrier(
            device,
            cmd,
            swap_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        );
    }

    /// Shared body of every raster pass
    fn record_screen_pass(
        &self,
        res: &PassResources<'_>,
        cmd: vk::CommandBuffer,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        pipeline: &RasterPipeline,
        sampler_set: &DescriptorBindings,
        push: &ScreenPush,
        clear_color: [f32; 4],
        vertex_count: u32,
        instance_count: u32,
    ) {
        let device = res.context.device();
        let extent = framebuffer.extent();

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        }];

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.handle());
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[scissor]);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                0,
                &[
                    res.slot.dynamic_main.set(),
                    res.static_set.set(),
                    sampler_set.set(),
                ],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                pipeline.layout(),
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(push),
            );
            device.cmd_draw(cmd, vertex_count, instance_count, 0, 0);
            device.cmd_end_render_pass(cmd);
        }
    }

    fn bind_trace_sets(
        &self,
        res: &PassResources<'_>,
        cmd: vk::CommandBuffer,
        dynamic: &DescriptorBindings,
    ) {
        unsafe {
            res.context.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                res.scene_rt.layout(),
                0,
                &[dynamic.set(), res.static_set.set()],
                &[],
            );
        }
    }

    fn bind_pick_sets(&self, res: &PassResources<'_>, cmd: vk::CommandBuffer) {
        unsafe {
            res.context.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                res.pick_rt.layout(),
                0,
                &[res.slot.dynamic_main.set(), res.static_set.set()],
                &[],
            );
        }
    }
}

impl Drop for FrameGraph {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

/// Full-extent blit region between two 2D color images
fn full_image_blit(src: vk::Extent2D, dst: vk::Extent2D) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    vk::ImageBlit {
        src_subresource: layers,
        src_offsets: [
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: src.width as i32,
                y: src.height as i32,
                z: 1,
            },
        ],
        dst_subresource: layers,
        dst_offsets: [
            vk::Offset3D { x: 0, y: 0, z: 0 },
            vk::Offset3D {
                x: dst.width as i32,
                y: dst.height as i32,
                z: 1,
            },
        ],
    }
}

/// Barrier for images the backend does not wrap (swapchain images)
fn cmd_image_barrier(
    device: &Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
) {
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denoise_chain_shape() {
        let chain = denoise_chain();
        assert_eq!(chain.len(), DENOISE_PASSES);

        // First pass reads the raw trace output
        assert_eq!(chain[0].0, -1);

        // Every later pass reads what some earlier pass wrote
        for (pass, (input, _)) in chain.iter().enumerate().skip(1) {
            let produced_earlier = chain[..pass].iter().any(|(_, out)| *out as isize == *input);
            assert!(produced_earlier, "pass {} reads an unwritten target", pass);
        }

        // No pass reads and writes the same target
        for (input, output) in chain {
            assert_ne!(input, output as isize);
        }
    }

    #[test]
    fn test_denoise_targets_bounded() {
        for (input, output) in denoise_chain() {
            assert!(output < DENOISE_TARGETS);
            assert!(input >= -1 && input < DENOISE_TARGETS as isize);
        }
        assert!(final_denoise_target() < DENOISE_TARGETS);
    }

    #[test]
    fn test_full_blit_covers_extents() {
        let blit = full_image_blit(
            vk::Extent2D { width: 800, height: 600 },
            vk::Extent2D { width: 1024, height: 768 },
        );
        assert_eq!(blit.src_offsets[1].x, 800);
        assert_eq!(blit.src_offsets[1].y, 600);
        assert_eq!(blit.dst_offsets[1].x, 1024);
        assert_eq!(blit.dst_offsets[1].y, 768);
        assert_eq!(blit.src_offsets[1].z, 1);
    }
}
