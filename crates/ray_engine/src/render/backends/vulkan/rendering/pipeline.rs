//! Raster pipelines for the post-trace stages
//!
//! All raster work in this backend is screen-space: the denoise blurs and
//! the composite draw a full-screen triangle generated in the vertex
//! shader, and the UI pass pulls quad records from a storage buffer. No
//! pipeline consumes vertex input state; viewport and scissor are dynamic
//! so swapchain recreation never rebuilds pipelines.
//!
//! Pipelines are built once at load and rebuilt wholesale on shader hot
//! reload.

use std::path::{Path, PathBuf};

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use super::render_pass::{LoadBehavior, RenderPass};
use super::shader::{entry_point, ShaderModule};
use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Push constants shared by the screen-space passes
///
/// The blur passes use `direction` to select horizontal or vertical and
/// `texel_size` to step one texel; composite and UI ignore the fields they
/// don't read. One 16-byte block keeps every raster pipeline layout
/// compatible.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ScreenPush {
    /// Blur direction: (1, 0) horizontal, (0, 1) vertical
    pub direction: [f32; 2],
    /// Reciprocal render-target extent
    pub texel_size: [f32; 2],
}

/// Fixed-function options that differ between the raster stages
#[derive(Debug, Clone, Copy)]
pub struct RasterDesc {
    /// Enable standard alpha blending (UI pass)
    pub blend: bool,
}

/// Graphics pipeline wrapper with RAII cleanup
pub struct RasterPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl RasterPipeline {
    /// Create a screen-space pipeline for `render_pass`
    pub fn new(
        device: Device,
        render_pass: &RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
        desc: &RasterDesc,
    ) -> VulkanResult<Self> {
        let entry = entry_point();
        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX, entry),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT, entry),
        ];

        // No vertex input: geometry comes from gl_VertexIndex
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Placeholder viewport/scissor; both are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Screen-space passes carry no depth
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = if desc.blend {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        } else {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
                .build()
        };

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let push_constant_range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<ScreenPush>() as u32,
        };

        let push_constant_ranges = [push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&push_constant_ranges);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::from_vk)?
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .dynamic_state(&dynamic_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info.build()], None)
                .map_err(|(_, err)| VulkanError::from_vk(err))?
        };

        Ok(Self {
            device,
            pipeline: pipelines[0],
            layout,
        })
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for RasterPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// The fixed raster pipeline set, rebuilt wholesale on hot reload
pub struct PipelineManager {
    device: Device,
    shader_dir: PathBuf,
    /// Pass writing the denoise ping-pong targets
    pub denoise_pass: RenderPass,
    /// Pass writing the composite target
    pub composite_pass: RenderPass,
    /// Pass drawing UI over the present target
    pub ui_pass: RenderPass,
    /// Separable blur used by every denoise stage
    pub blur: RasterPipeline,
    /// Combines RT output and denoise results
    pub composite: RasterPipeline,
    /// Text/crosshair/panel quads
    pub ui: RasterPipeline,
}

/// Format of the HDR intermediate targets (RT output, denoise, composite)
pub const HDR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;
/// Format of the present target the UI draws onto
pub const PRESENT_FORMAT: vk::Format = vk::Format::B8G8R8A8_UNORM;

impl PipelineManager {
    /// Build render passes and all raster pipelines
    pub fn new(
        device: Device,
        shader_dir: &Path,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> VulkanResult<Self> {
        let denoise_pass =
            RenderPass::new_color(device.clone(), HDR_FORMAT, LoadBehavior::DontCare)?;
        let composite_pass =
            RenderPass::new_color(device.clone(), HDR_FORMAT, LoadBehavior::DontCare)?;
        let ui_pass = RenderPass::new_color(device.clone(), PRESENT_FORMAT, LoadBehavior::Load)?;

        let (blur, composite, ui) = Self::build_pipelines(
            &device,
            shader_dir,
            set_layouts,
            &denoise_pass,
            &composite_pass,
            &ui_pass,
        )?;

        Ok(Self {
            device,
            shader_dir: shader_dir.to_path_buf(),
            denoise_pass,
            composite_pass,
            ui_pass,
            blur,
            composite,
            ui,
        })
    }

    fn build_pipelines(
        device: &Device,
        shader_dir: &Path,
        set_layouts: &[vk::DescriptorSetLayout],
        denoise_pass: &RenderPass,
        composite_pass: &RenderPass,
        ui_pass: &RenderPass,
    ) -> VulkanResult<(RasterPipeline, RasterPipeline, RasterPipeline)> {
        let fullscreen_vert =
            ShaderModule::from_file(device.clone(), shader_dir.join("fullscreen.vert.spv"))?;
        let blur_frag = ShaderModule::from_file(device.clone(), shader_dir.join("blur.frag.spv"))?;
        let composite_frag =
            ShaderModule::from_file(device.clone(), shader_dir.join("composite.frag.spv"))?;
        let ui_vert = ShaderModule::from_file(device.clone(), shader_dir.join("ui.vert.spv"))?;
        let ui_frag = ShaderModule::from_file(device.clone(), shader_dir.join("ui.frag.spv"))?;

        let opaque = RasterDesc { blend: false };
        let blended = RasterDesc { blend: true };

        let blur = RasterPipeline::new(
            device.clone(),
            denoise_pass,
            &fullscreen_vert,
            &blur_frag,
            set_layouts,
            &opaque,
        )?;
        let composite = RasterPipeline::new(
            device.clone(),
            composite_pass,
            &fullscreen_vert,
            &composite_frag,
            set_layouts,
            &opaque,
        )?;
        let ui = RasterPipeline::new(
            device.clone(),
            ui_pass,
            &ui_vert,
            &ui_frag,
            set_layouts,
            &blended,
        )?;

        Ok((blur, composite, ui))
    }

    /// Rebuild every pipeline from the shader directory (hot reload)
    ///
    /// The caller must ensure the device is idle; old pipelines are dropped
    /// as the new ones replace them.
    pub fn reload(&mut self, set_layouts: &[vk::DescriptorSetLayout]) -> VulkanResult<()> {
        let (blur, composite, ui) = Self::build_pipelines(
            &self.device,
            &self.shader_dir,
            set_layouts,
            &self.denoise_pass,
            &self.composite_pass,
            &self.ui_pass,
        )?;
        self.blur = blur;
        self.composite = composite;
        self.ui = ui;
        log::info!("Raster pipelines reloaded from {:?}", self.shader_dir);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_push_is_16_bytes() {
        // Matches the push constant range shared by all raster pipelines
        assert_eq!(std::mem::size_of::<ScreenPush>(), 16);
    }

    #[test]
    fn test_formats_are_fixed() {
        assert_eq!(HDR_FORMAT, vk::Format::R16G16B16A16_SFLOAT);
        assert_eq!(PRESENT_FORMAT, vk::Format::B8G8R8A8_UNORM);
    }
}
