//! Vulkan renderer facade
//!
//! The one type applications talk to. Owns the context, the resource
//! registry, the frame ring and the frame graph, and drives the whole
//! backend from the single control thread: uploads (meshes, textures),
//! per-frame top-level acceleration structure rebuilds, pass recording,
//! submission and presentation.

use ash::vk;
use bytemuck::Zeroable;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::config::RendererConfig;
use crate::render::backends::vulkan::initialization::context::{
    VulkanContext, VulkanError, VulkanResult,
};
use crate::render::backends::vulkan::raytracing::accel::{
    instance_record, Blas, MeshGeometry, Tlas,
};
use crate::render::backends::vulkan::raytracing::pipeline::{RayTracingPipeline, RtShaderPaths};
use crate::render::backends::vulkan::rendering::frame_graph::{
    sampler_flavor, FrameGraph, PassResources,
};
use crate::render::backends::vulkan::rendering::pipeline::PipelineManager;
use crate::render::backends::vulkan::resources::allocator::MemoryResidency;
use crate::render::backends::vulkan::resources::buffer::GpuBuffer;
use crate::render::backends::vulkan::resources::descriptor_set::{
    slots, BindingKind, DescriptorBindings, DescriptorPool, DescriptorResource,
};
use crate::render::backends::vulkan::resources::image::{GpuImage, ImageDesc};
use crate::render::backends::vulkan::resources::registry::ResourceRegistry;
use crate::render::backends::vulkan::state::commands::ImmediateSubmit;
use crate::render::backends::vulkan::state::frame::FrameRing;
use crate::render::backends::vulkan::state::swapchain::SurfaceTracker;
use crate::render::frame_input::{
    CameraDataGpu, FrameInput, FrameReport, InstanceDataGpu, LightDataGpu, MeshId, MeshInstance,
    MeshVertex, PickResult, TextureId, UiQuadGpu,
};

/// Registry names of the global geometry buffers
const GLOBAL_VERTICES: &str = "global_vertices";
const GLOBAL_INDICES: &str = "global_indices";
const PICK_RESULT: &str = "pick_result";

/// One uploaded mesh: where its triangles live plus its bottom-level AS
struct MeshEntry {
    geometry: MeshGeometry,
    blas: Blas,
}

/// The Vulkan ray tracing renderer
///
/// Field order is load-bearing: every field holding GPU resources (and
/// thereby an `Arc` to the allocator) is declared before `context`, so the
/// allocator and device are torn down last.
pub struct VulkanRenderer {
    registry: ResourceRegistry,
    meshes: Vec<MeshEntry>,
    texture_count: u32,
    static_set: DescriptorBindings,
    // Never allocated; exists so pipeline layouts outlive target recreation
    sampler_layout: DescriptorBindings,
    ring: FrameRing,
    frame_graph: FrameGraph,
    scene_rt: RayTracingPipeline,
    pick_rt: RayTracingPipeline,
    pipelines: PipelineManager,
    upload: ImmediateSubmit,
    descriptor_pool: DescriptorPool,
    texture_sampler: vk::Sampler,
    config: RendererConfig,
    vertex_cursor: u32,
    index_cursor: u32,
    surface: SurfaceTracker,
    last_pick: PickResult,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Create the full backend against a collaborator-supplied window
    pub fn new(
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        extent: (u32, u32),
        config: &RendererConfig,
    ) -> VulkanResult<Self> {
        log::debug!("Creating VulkanRenderer...");

        let context = VulkanContext::new(
            display_handle,
            window_handle,
            &config.application_name,
            config.enable_validation,
        )?;
        let device = context.raw_device();

        let upload = ImmediateSubmit::new(
            device.clone(),
            context.graphics_queue(),
            context.physical_device().graphics_family,
        )?;

        // Sets: per-slot dynamic pairs, the static set, the post-process
        // sampler sets, plus slack for recreation.
        let max_sets = (config.frames_in_flight as u32) * 2 + 16;
        let descriptor_pool =
            DescriptorPool::new(device.clone(), max_sets, config.max_textures)?;

        let mut registry = ResourceRegistry::new();
        let (static_set, texture_sampler) =
            Self::create_static_resources(&context, &descriptor_pool, &mut registry, config)?;

        let ring = FrameRing::new(&context, &descriptor_pool, config)?;
        let sampler_layout = sampler_flavor(device.clone())?;

        let dynamic_layout = ring.current().dynamic_main.layout();
        let raster_layouts = [dynamic_layout, static_set.layout(), sampler_layout.layout()];
        let trace_layouts = [dynamic_layout, static_set.layout()];

        let shader_dir = std::path::Path::new(&config.shader_directory);
        let pipelines = PipelineManager::new(device, shader_dir, &raster_layouts)?;
        let scene_rt =
            RayTracingPipeline::new(&context, &trace_layouts, &RtShaderPaths::scene(shader_dir))?;
        let pick_rt =
            RayTracingPipeline::new(&context, &trace_layouts, &RtShaderPaths::pick(shader_dir))?;

        let surface_extent = vk::Extent2D {
            width: extent.0,
            height: extent.1,
        };
        let frame_graph = FrameGraph::new(&context, &descriptor_pool, &pipelines, surface_extent)?;
        frame_graph.bind_outputs(&static_set)?;

        log::debug!("VulkanRenderer created");
        Ok(Self {
            registry,
            meshes: Vec::new(),
            texture_count: 0,
            static_set,
            sampler_layout,
            ring,
            frame_graph,
            scene_rt,
            pick_rt,
            pipelines,
            upload,
            descriptor_pool,
            texture_sampler,
            config: config.clone(),
            vertex_cursor: 0,
            index_cursor: 0,
            surface: SurfaceTracker::new(surface_extent),
            last_pick: PickResult::NONE,
            context,
        })
    }

    /// Build the static set and the global buffers it exposes
    fn create_static_resources(
        context: &VulkanContext,
        pool: &DescriptorPool,
        registry: &mut ResourceRegistry,
        config: &RendererConfig,
    ) -> VulkanResult<(DescriptorBindings, vk::Sampler)> {
        let device = context.raw_device();
        let allocator = context.allocator().clone();

        let geometry_usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::TRANSFER_DST
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let vertex_buffer = GpuBuffer::new(
            device.clone(),
            allocator.clone(),
            (config.max_vertices as usize * std::mem::size_of::<MeshVertex>()) as vk::DeviceSize,
            geometry_usage,
            MemoryResidency::DeviceLocal,
        )?;
        let index_buffer = GpuBuffer::new(
            device.clone(),
            allocator.clone(),
            (config.max_indices as usize * std::mem::size_of::<u32>()) as vk::DeviceSize,
            geometry_usage,
            MemoryResidency::DeviceLocal,
        )?;

        let pick_buffer = GpuBuffer::new(
            device.clone(),
            allocator,
            std::mem::size_of::<PickResult>() as vk::DeviceSize,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryResidency::DeviceLocal,
        )?;

        let trace_read = vk::ShaderStageFlags::CLOSEST_HIT_KHR | vk::ShaderStageFlags::FRAGMENT;

        let mut static_set = DescriptorBindings::new(device.clone());
        static_set.add_binding_update_after_bind(
            BindingKind::SampledImageArray,
            slots::STATIC_TEXTURES,
            config.max_textures,
            trace_read,
        )?;
        static_set.add_binding(
            BindingKind::StorageBuffer,
            slots::STATIC_VERTICES,
            1,
            vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        )?;
        static_set.add_binding(
            BindingKind::StorageBuffer,
            slots::STATIC_INDICES,
            1,
            vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        )?;
        static_set.add_binding(
            BindingKind::StorageImage,
            slots::STATIC_RT_COLOR,
            1,
            vk::ShaderStageFlags::RAYGEN_KHR,
        )?;
        static_set.add_binding(
            BindingKind::StorageImage,
            slots::STATIC_RT_NORMAL,
            1,
            vk::ShaderStageFlags::RAYGEN_KHR,
        )?;
        static_set.add_binding(
            BindingKind::StorageBuffer,
            slots::STATIC_PICK,
            1,
            vk::ShaderStageFlags::RAYGEN_KHR,
        )?;
        static_set.build_layout()?;
        static_set.allocate(pool)?;

        static_set.update(
            slots::STATIC_VERTICES,
            DescriptorResource::StorageBuffer(&vertex_buffer),
        )?;
        static_set.update(
            slots::STATIC_INDICES,
            DescriptorResource::StorageBuffer(&index_buffer),
        )?;
        static_set.update(slots::STATIC_PICK, DescriptorResource::StorageBuffer(&pick_buffer))?;

        registry.insert_buffer(GLOBAL_VERTICES, vertex_buffer);
        registry.insert_buffer(GLOBAL_INDICES, index_buffer);
        registry.insert_buffer(PICK_RESULT, pick_buffer);

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT);
        let texture_sampler = unsafe {
            device
                .create_sampler(&sampler_info, None)
                .map_err(VulkanError::from_vk)?
        };

        Ok((static_set, texture_sampler))
    }

    /// Upload a mesh into the global geometry buffers and build its BLAS
    ///
    /// Blocks until both the copy and the build have completed on the
    /// device. The returned id stays valid for the renderer's lifetime.
    pub fn upload_mesh(
        &mut self,
        vertices: &[MeshVertex],
        indices: &[u32],
    ) -> VulkanResult<MeshId> {
        if vertices.is_empty() || indices.len() < 3 {
            return Err(VulkanError::InvalidOperation {
                reason: "mesh upload needs at least one triangle".to_string(),
            });
        }
        let vertex_end = self.vertex_cursor as usize + vertices.len();
        let index_end = self.index_cursor as usize + indices.len();
        if vertex_end > self.config.max_vertices as usize
            || index_end > self.config.max_indices as usize
        {
            return Err(VulkanError::InvalidOperation {
                reason: "global geometry buffers exhausted".to_string(),
            });
        }

        let geometry = MeshGeometry {
            vertex_offset: self.vertex_cursor,
            vertex_count: vertices.len() as u32,
            vertex_stride: std::mem::size_of::<MeshVertex>() as u32,
            index_offset: self.index_cursor,
            index_count: indices.len() as u32,
        };

        // Stage and copy into the device-local globals
        let device = self.context.raw_device();
        let allocator = self.context.allocator().clone();

        let vertex_staging = GpuBuffer::from_data(
            device.clone(),
            allocator.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            vertices,
        )?;
        let index_staging = GpuBuffer::from_data(
            device,
            allocator,
            vk::BufferUsageFlags::TRANSFER_SRC,
            indices,
        )?;

        let vertex_buffer = self.registry.buffer_by_name(GLOBAL_VERTICES)?;
        let index_buffer = self.registry.buffer_by_name(GLOBAL_INDICES)?;

        let vertex_copy = vk::BufferCopy {
            src_offset: 0,
            dst_offset: u64::from(geometry.vertex_offset) * u64::from(geometry.vertex_stride),
            size: vertex_staging.size(),
        };
        let index_copy = vk::BufferCopy {
            src_offset: 0,
            dst_offset: u64::from(geometry.index_offset) * std::mem::size_of::<u32>() as u64,
            size: index_staging.size(),
        };

        let raw_device = self.context.device();
        self.upload.submit(|cmd| unsafe {
            raw_device.cmd_copy_buffer(
                cmd,
                vertex_staging.handle(),
                vertex_buffer.handle(),
                &[vertex_copy],
            );
            raw_device.cmd_copy_buffer(
                cmd,
                index_staging.handle(),
                index_buffer.handle(),
                &[index_copy],
            );
        })?;

        let blas = Blas::build(
            &self.context,
            &self.upload,
            vertex_buffer,
            index_buffer,
            &geometry,
        )?;

        self.vertex_cursor = vertex_end as u32;
        self.index_cursor = index_end as u32;

        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(MeshEntry { geometry, blas });
        log::debug!(
            "Mesh {} uploaded: {} vertices, {} indices",
            id.index(),
            vertices.len(),
            indices.len()
        );
        Ok(id)
    }

    /// Upload raw RGBA pixels into the next texture array slot
    ///
    /// Decoding is the asset collaborator's job; this only stages, copies
    /// and transitions. The first upload also fills every unused array slot
    /// with this texture so runtime-indexed reads never touch an undefined
    /// descriptor.
    pub fn upload_texture(&mut self, rgba: &[u8], width: u32, height: u32) -> VulkanResult<TextureId> {
        if self.texture_count >= self.config.max_textures {
            return Err(VulkanError::InvalidOperation {
                reason: "texture array full".to_string(),
            });
        }
        if rgba.len() != (width as usize) * (height as usize) * 4 {
            return Err(VulkanError::InvalidOperation {
                reason: "texture data does not match extent".to_string(),
            });
        }

        let device = self.context.raw_device();
        let allocator = self.context.allocator().clone();

        let staging = GpuBuffer::from_data(
            device.clone(),
            allocator.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC,
            rgba,
        )?;

        let image = GpuImage::new(
            device,
            allocator,
            &ImageDesc::color(
                vk::Format::R8G8B8A8_UNORM,
                vk::Extent2D { width, height },
                vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
            ),
        )?;

        let raw_device = self.context.device();
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
        };

        self.upload.submit(|cmd| {
            image.cmd_transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
            unsafe {
                raw_device.cmd_copy_buffer_to_image(
                    cmd,
                    staging.handle(),
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }
            image.cmd_transition(cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        })?;

        let slot = self.texture_count;
        let info = vk::DescriptorImageInfo::builder()
            .image_view(image.view())
            .sampler(self.texture_sampler)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build();

        if slot == 0 {
            // First texture: fill the whole array so unused slots alias it
            let infos = vec![info; self.config.max_textures as usize];
            self.static_set
                .update(slots::STATIC_TEXTURES, DescriptorResource::SampledImageArray(&infos))?;
        } else {
            self.static_set
                .update_array_element(slots::STATIC_TEXTURES, slot, info)?;
        }

        self.registry.insert_image(&format!("texture_{}", slot), image);
        self.texture_count += 1;
        log::debug!("Texture {} uploaded: {}x{}", slot, width, height);
        Ok(TextureId(slot))
    }

    /// The collaborator reports a new framebuffer extent
    ///
    /// A zero extent (minimized) suspends all swapchain work until a
    /// non-zero extent arrives, which then triggers exactly one recreation.
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        self.surface.report_extent(width, height);
    }

    /// Render one frame from the collaborator's input
    ///
    /// Returns the previous frame's pick result and whether this frame was
    /// actually presented (minimized/out-of-date frames are dropped).
    /// Device errors are logged here and propagated; the application
    /// decides whether they are fatal.
    pub fn render_frame(&mut self, input: &FrameInput) -> VulkanResult<FrameReport> {
        self.render_frame_inner(input).map_err(|e| {
            log::error!("Frame {} failed: {}", self.ring.frame_number(), e);
            e
        })
    }

    fn render_frame_inner(&mut self, input: &FrameInput) -> VulkanResult<FrameReport> {
        // Minimized: no swapchain work at all
        if self.surface.is_suspended() {
            return Ok(FrameReport {
                pick: self.last_pick,
                presented: false,
            });
        }

        if self.surface.take_recreate() {
            self.frame_graph.recreate(
                &self.context,
                &self.descriptor_pool,
                &self.pipelines,
                self.surface.extent(),
            )?;
            self.frame_graph.bind_outputs(&self.static_set)?;
        }

        // Reclaim the oldest in-flight slot before touching any of it
        self.ring.wait_current()?;

        let pick = if self.ring.current().pick_valid {
            self.ring.current().pick_readback.read_data::<PickResult>(1, 0)?[0]
        } else {
            PickResult::NONE
        };
        self.last_pick = pick;

        self.write_frame_data(input)?;

        // Acquire; an out-of-date surface drops the frame and recreates
        let acquire_semaphore = self.ring.current().sync.image_available.handle();
        let (image_index, suboptimal) = match self.frame_graph.acquire(acquire_semaphore) {
            Ok(ok) => ok,
            Err(VulkanError::SwapchainOutOfDate) => {
                self.surface.request_recreate();
                return Ok(FrameReport {
                    pick,
                    presented: false,
                });
            }
            Err(e) => return Err(e),
        };
        if suboptimal {
            self.surface.request_recreate();
        }

        let pick_storage = self.registry.buffer_by_name(PICK_RESULT)?;
        let resources = PassResources {
            context: &self.context,
            slot: self.ring.current(),
            static_set: &self.static_set,
            pipelines: &self.pipelines,
            scene_rt: &self.scene_rt,
            pick_rt: &self.pick_rt,
            pick_storage,
            ui_quad_count: input.ui_quads.len().min(self.config.max_instances as usize) as u32,
            clear_color: self.config.clear_color,
        };
        self.frame_graph.record(&resources, image_index)?;

        self.submit_frame()?;

        match self.frame_graph.present(
            self.context.present_queue(),
            image_index,
            self.ring.current().sync.render_finished.handle(),
        ) {
            Ok(suboptimal) => {
                if suboptimal {
                    self.surface.request_recreate();
                }
            }
            Err(VulkanError::SwapchainOutOfDate) => {
                self.surface.request_recreate();
            }
            Err(e) => return Err(e),
        }

        self.ring.advance();
        Ok(FrameReport {
            pick,
            presented: true,
        })
    }

    /// Copy collaborator data into the slot and rebuild its structures
    fn write_frame_data(&mut self, input: &FrameInput) -> VulkanResult<()> {
        self.ring.mark_write()?;

        let max_instances = self.config.max_instances as usize;
        let meshes = &self.meshes;
        let lookup = |id: MeshId| -> Option<(MeshGeometry, u64)> {
            meshes
                .get(id.index() as usize)
                .map(|m| (m.geometry, m.blas.device_address()))
        };

        let (main_records, main_instances) =
            pack_scene(&input.main_scene, max_instances, &lookup)?;
        let (inventory_records, inventory_instances) =
            pack_scene(&input.inventory_scene, max_instances, &lookup)?;

        let slot = self.ring.current_mut();

        // Camera, lights, UI quads
        slot.camera_buffer
            .write_data(&[CameraDataGpu::from_camera(&input.camera, input.cursor)], 0)?;

        // Pad to capacity: the hit shader iterates the whole buffer and
        // skips zero-intensity entries, so stale tails must be zeroed.
        let mut lights: Vec<LightDataGpu> = input
            .lights
            .iter()
            .take(self.config.max_lights as usize)
            .map(LightDataGpu::from_light)
            .collect();
        lights.resize(self.config.max_lights as usize, LightDataGpu::zeroed());
        slot.light_buffer.write_data(&lights, 0)?;

        let quads: Vec<UiQuadGpu> = input
            .ui_quads
            .iter()
            .take(max_instances)
            .map(UiQuadGpu::from_quad)
            .collect();
        if !quads.is_empty() {
            slot.ui_buffer.write_data(&quads, 0)?;
        }

        if !main_records.is_empty() {
            slot.instance_buffer_main.write_data(&main_records, 0)?;
        }
        if !inventory_records.is_empty() {
            slot.instance_buffer_inventory.write_data(&inventory_records, 0)?;
        }

        // Previous generation TLAS for this slot drops on reassignment;
        // safe because this slot's fence was waited above.
        slot.tlas_main = Tlas::rebuild(&self.context, &self.upload, &main_instances)?;
        slot.tlas_inventory = Tlas::rebuild(&self.context, &self.upload, &inventory_instances)?;

        if let Some(tlas) = &slot.tlas_main {
            slot.dynamic_main.update(
                slots::DYN_TLAS,
                DescriptorResource::AccelerationStructure(tlas.handle()),
            )?;
        }
        if let Some(tlas) = &slot.tlas_inventory {
            slot.dynamic_inventory.update(
                slots::DYN_TLAS,
                DescriptorResource::AccelerationStructure(tlas.handle()),
            )?;
        }

        slot.pick_valid = slot.tlas_main.is_some();
        Ok(())
    }

    /// Submit the recorded command buffer for the current slot
    fn submit_frame(&mut self) -> VulkanResult<()> {
        let slot = self.ring.current();

        let wait_semaphores = [slot.sync.image_available.handle()];
        // First swapchain access is the present blit's transfer barrier
        let wait_stages = [vk::PipelineStageFlags::TRANSFER];
        let command_buffers = [slot.command_buffer];
        let signal_semaphores = [slot.sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // Reset only now: a frame dropped before this point must leave the
        // fence signaled for the next wait
        slot.sync.in_flight.reset()?;

        unsafe {
            self.context
                .device()
                .queue_submit(
                    self.context.graphics_queue(),
                    &[submit_info.build()],
                    slot.sync.in_flight.handle(),
                )
                .map_err(VulkanError::from_vk)?;
        }

        self.ring.mark_submit();
        Ok(())
    }

    /// Rebuild every pipeline from the shader directory
    pub fn reload_shaders(&mut self) -> VulkanResult<()> {
        self.context.wait_idle()?;

        let dynamic_layout = self.ring.current().dynamic_main.layout();
        let raster_layouts = [
            dynamic_layout,
            self.static_set.layout(),
            self.sampler_layout.layout(),
        ];
        let trace_layouts = [dynamic_layout, self.static_set.layout()];
        let shader_dir = std::path::Path::new(&self.config.shader_directory);

        self.pipelines.reload(&raster_layouts)?;
        self.scene_rt = RayTracingPipeline::new(
            &self.context,
            &trace_layouts,
            &RtShaderPaths::scene(shader_dir),
        )?;
        self.pick_rt = RayTracingPipeline::new(
            &self.context,
            &trace_layouts,
            &RtShaderPaths::pick(shader_dir),
        )?;
        Ok(())
    }

    /// Number of live top-level structures across all slots
    pub fn live_tlas_count(&self) -> usize {
        self.ring.live_tlas_count()
    }

    /// Number of uploaded meshes
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Current render extent
    pub fn render_extent(&self) -> (u32, u32) {
        let extent = self.frame_graph.extent();
        (extent.width, extent.height)
    }

    /// Block until the device is idle
    pub fn wait_idle(&self) -> VulkanResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        let _ = self.context.wait_idle();
        unsafe {
            self.context
                .device()
                .destroy_sampler(self.texture_sampler, None);
        }
        // Remaining fields drop in declaration order: resources first,
        // allocator and device last.
    }
}

/// Pack a scene's visible instances into GPU records and TLAS instances
///
/// The TLAS instance list is always exactly as long as the (clamped)
/// visible instance list; the custom index stored per instance is its
/// position in that list, which the pick shader reports back.
fn pack_scene(
    scene: &[MeshInstance],
    max_instances: usize,
    lookup: &impl Fn(MeshId) -> Option<(MeshGeometry, u64)>,
) -> VulkanResult<(Vec<InstanceDataGpu>, Vec<vk::AccelerationStructureInstanceKHR>)> {
    if scene.len() > max_instances {
        log::warn!(
            "Scene has {} instances; clamping to {}",
            scene.len(),
            max_instances
        );
    }

    let mut records = Vec::with_capacity(scene.len().min(max_instances));
    let mut tlas_instances = Vec::with_capacity(scene.len().min(max_instances));

    for (index, instance) in scene.iter().take(max_instances).enumerate() {
        let (geometry, blas_address) =
            lookup(instance.mesh).ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("unknown mesh id {}", instance.mesh.index()),
            })?;

        records.push(InstanceDataGpu {
            model: instance.transform.into(),
            vertex_offset: geometry.vertex_offset,
            index_offset: geometry.index_offset,
            material_index: instance.material_index,
            texture_index: instance.texture_index,
        });
        tlas_instances.push(instance_record(
            &instance.transform,
            index as u32,
            blas_address,
        ));
    }

    Ok((records, tlas_instances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4;

    fn test_lookup(id: MeshId) -> Option<(MeshGeometry, u64)> {
        if id.index() < 4 {
            Some((
                MeshGeometry {
                    vertex_offset: id.index() * 100,
                    vertex_count: 100,
                    vertex_stride: 32,
                    index_offset: id.index() * 300,
                    index_count: 300,
                },
                0x1000 + u64::from(id.index()),
            ))
        } else {
            None
        }
    }

    fn instance(mesh: u32) -> MeshInstance {
        MeshInstance {
            mesh: MeshId(mesh),
            transform: Mat4::identity(),
            material_index: 0,
            texture_index: 0,
        }
    }

    #[test]
    fn test_pack_scene_counts_match_input() {
        let scene = vec![instance(0), instance(1), instance(2)];
        let (records, tlas) = pack_scene(&scene, 1024, &test_lookup).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(tlas.len(), 3);
    }

    #[test]
    fn test_pack_scene_empty() {
        let (records, tlas) = pack_scene(&[], 1024, &test_lookup).unwrap();
        assert!(records.is_empty());
        assert!(tlas.is_empty());
    }

    #[test]
    fn test_pack_scene_custom_index_is_list_position() {
        let scene = vec![instance(2), instance(0), instance(1)];
        let (_, tlas) = pack_scene(&scene, 1024, &test_lookup).unwrap();
        for (i, record) in tlas.iter().enumerate() {
            assert_eq!(record.instance_custom_index_and_mask.low_24(), i as u32);
        }
    }

    #[test]
    fn test_pack_scene_resolves_blas_addresses() {
        let scene = vec![instance(1), instance(3)];
        let (records, tlas) = pack_scene(&scene, 1024, &test_lookup).unwrap();
        assert_eq!(unsafe { tlas[0].acceleration_structure_reference.device_handle }, 0x1001);
        assert_eq!(unsafe { tlas[1].acceleration_structure_reference.device_handle }, 0x1003);
        assert_eq!(records[0].vertex_offset, 100);
        assert_eq!(records[1].index_offset, 900);
    }

    #[test]
    fn test_pack_scene_unknown_mesh_errors() {
        let scene = vec![instance(99)];
        let result = pack_scene(&scene, 1024, &test_lookup);
        assert!(matches!(result, Err(VulkanError::InvalidOperation { .. })));
    }

    #[test]
    fn test_pack_scene_clamps_to_capacity() {
        let scene: Vec<MeshInstance> = (0..10).map(|_| instance(0)).collect();
        let (records, tlas) = pack_scene(&scene, 4, &test_lookup).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(tlas.len(), 4);
    }
}
