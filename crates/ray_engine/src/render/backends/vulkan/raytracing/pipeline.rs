//! Ray tracing pipeline and shader binding table
//!
//! One pipeline per ray-tracing dispatch kind: the scene pipeline (raygen,
//! primary miss, shadow miss, closest hit) and the 1×1 mouse-pick pipeline
//! (raygen, miss, closest hit). The shader binding table lives in one
//! host-visible buffer with raygen/miss/hit regions laid out to the
//! device's group alignment rules.

use std::path::Path;

use ash::{vk, Device};

use crate::render::backends::vulkan::initialization::context::{
    VulkanContext, VulkanError, VulkanResult,
};
use crate::render::backends::vulkan::rendering::shader::{entry_point, ShaderModule};
use crate::render::backends::vulkan::resources::buffer::GpuBuffer;

/// Round `value` up to a multiple of `alignment`
fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) & !(alignment - 1)
}

/// Shader files making up one ray tracing pipeline
pub struct RtShaderPaths {
    /// Ray generation shader
    pub raygen: std::path::PathBuf,
    /// Miss shaders, one group each, in SBT order
    pub misses: Vec<std::path::PathBuf>,
    /// Closest-hit shader for the single triangle hit group
    pub closest_hit: std::path::PathBuf,
}

impl RtShaderPaths {
    /// The scene tracing pipeline's fixed file set
    pub fn scene(shader_dir: &Path) -> Self {
        Self {
            raygen: shader_dir.join("scene.rgen.spv"),
            misses: vec![
                shader_dir.join("scene.rmiss.spv"),
                shader_dir.join("shadow.rmiss.spv"),
            ],
            closest_hit: shader_dir.join("scene.rchit.spv"),
        }
    }

    /// The mouse-pick pipeline's fixed file set
    pub fn pick(shader_dir: &Path) -> Self {
        Self {
            raygen: shader_dir.join("pick.rgen.spv"),
            misses: vec![shader_dir.join("pick.rmiss.spv")],
            closest_hit: shader_dir.join("pick.rchit.spv"),
        }
    }
}

/// Ray tracing pipeline, its layout and its shader binding table
pub struct RayTracingPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    // SBT buffer must outlive every trace recorded against it
    _sbt_buffer: GpuBuffer,
    raygen_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
    callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl RayTracingPipeline {
    /// Build the pipeline and its SBT from fixed shader files
    pub fn new(
        context: &VulkanContext,
        set_layouts: &[vk::DescriptorSetLayout],
        paths: &RtShaderPaths,
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let entry = entry_point();

        let raygen = ShaderModule::from_file(device.clone(), &paths.raygen)?;
        let misses: Vec<ShaderModule> = paths
            .misses
            .iter()
            .map(|p| ShaderModule::from_file(device.clone(), p))
            .collect::<VulkanResult<_>>()?;
        let closest_hit = ShaderModule::from_file(device.clone(), &paths.closest_hit)?;

        // Stage order defines SBT group order: raygen, misses, hit
        let mut stages =
            vec![raygen.stage_info(vk::ShaderStageFlags::RAYGEN_KHR, entry)];
        for miss in &misses {
            stages.push(miss.stage_info(vk::ShaderStageFlags::MISS_KHR, entry));
        }
        let hit_stage_index = stages.len() as u32;
        stages.push(closest_hit.stage_info(vk::ShaderStageFlags::CLOSEST_HIT_KHR, entry));

        let mut groups = Vec::with_capacity(stages.len());
        for general_index in 0..hit_stage_index {
            groups.push(
                vk::RayTracingShaderGroupCreateInfoKHR::builder()
                    .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                    .general_shader(general_index)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR)
                    .build(),
            );
        }
        groups.push(
            vk::RayTracingShaderGroupCreateInfoKHR::builder()
                .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                .general_shader(vk::SHADER_UNUSED_KHR)
                .closest_hit_shader(hit_stage_index)
                .any_hit_shader(vk::SHADER_UNUSED_KHR)
                .intersection_shader(vk::SHADER_UNUSED_KHR)
                .build(),
        );

        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::from_vk)?
        };

        let pipeline_info = vk::RayTracingPipelineCreateInfoKHR::builder()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(2)
            .layout(layout);

        let pipelines = unsafe {
            context
                .rt_pipeline_loader()
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[pipeline_info.build()],
                    None,
                )
                .map_err(VulkanError::from_vk)?
        };
        let pipeline = pipelines[0];

        let (sbt_buffer, raygen_region, miss_region, hit_region) = Self::build_sbt(
            context,
            pipeline,
            1,
            misses.len() as u32,
        )?;

        log::debug!(
            "RT pipeline built from {:?} ({} miss groups)",
            paths.raygen,
            misses.len()
        );

        Ok(Self {
            device,
            pipeline,
            layout,
            _sbt_buffer: sbt_buffer,
            raygen_region,
            miss_region,
            hit_region,
            callable_region: vk::StridedDeviceAddressRegionKHR::default(),
        })
    }

    /// Lay out the shader binding table and copy group handles into it
    fn build_sbt(
        context: &VulkanContext,
        pipeline: vk::Pipeline,
        raygen_count: u32,
        miss_count: u32,
    ) -> VulkanResult<(
        GpuBuffer,
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
        vk::StridedDeviceAddressRegionKHR,
    )> {
        let rt_props = context.physical_device().ray_tracing;
        let handle_size = rt_props.shader_group_handle_size;
        let handle_stride = align_up(handle_size, rt_props.shader_group_handle_alignment);
        let base_alignment = rt_props.shader_group_base_alignment;

        let group_count = raygen_count + miss_count + 1;
        let handles = unsafe {
            context
                .rt_pipeline_loader()
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    (group_count * handle_size) as usize,
                )
                .map_err(VulkanError::from_vk)?
        };

        // Region layout: [raygen][miss...][hit], each region base aligned
        let raygen_size = align_up(handle_stride, base_alignment);
        let miss_size = align_up(miss_count * handle_stride, base_alignment);
        let hit_size = align_up(handle_stride, base_alignment);
        let total_size = raygen_size + miss_size + hit_size;

        let mut table = vec![0u8; total_size as usize];
        let handle = |index: u32| -> &[u8] {
            let start = (index * handle_size) as usize;
            &handles[start..start + handle_size as usize]
        };

        // Raygen
        table[0..handle_size as usize].copy_from_slice(handle(0));
        // Misses
        for miss in 0..miss_count {
            let dst = (raygen_size + miss * handle_stride) as usize;
            table[dst..dst + handle_size as usize].copy_from_slice(handle(1 + miss));
        }
        // Hit
        let hit_dst = (raygen_size + miss_size) as usize;
        table[hit_dst..hit_dst + handle_size as usize]
            .copy_from_slice(handle(raygen_count + miss_count));

        let sbt_buffer = GpuBuffer::from_data(
            context.raw_device(),
            context.allocator().clone(),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            &table,
        )?;

        let base_address = sbt_buffer.device_address();
        let raygen_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(base_address)
            .stride(u64::from(raygen_size))
            .size(u64::from(raygen_size))
            .build();
        let miss_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(base_address + u64::from(raygen_size))
            .stride(u64::from(handle_stride))
            .size(u64::from(miss_size))
            .build();
        let hit_region = vk::StridedDeviceAddressRegionKHR::builder()
            .device_address(base_address + u64::from(raygen_size) + u64::from(miss_size))
            .stride(u64::from(handle_stride))
            .size(u64::from(hit_size))
            .build();

        Ok((sbt_buffer, raygen_region, miss_region, hit_region))
    }

    /// Record a trace dispatch of `width` × `height` rays
    ///
    /// Descriptor sets must already be bound for
    /// `vk::PipelineBindPoint::RAY_TRACING_KHR`.
    pub fn cmd_trace(
        &self,
        context: &VulkanContext,
        cmd: vk::CommandBuffer,
        width: u32,
        height: u32,
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.pipeline,
            );
            context.rt_pipeline_loader().cmd_trace_rays(
                cmd,
                &self.raygen_region,
                &self.miss_region,
                &self.hit_region,
                &self.callable_region,
                width,
                height,
                1,
            );
        }
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Pipeline layout for descriptor binding
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for RayTracingPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(32, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(0, 64), 0);
    }

    #[test]
    fn test_shader_paths_fixed_sets() {
        let dir = Path::new("shaders");
        let scene = RtShaderPaths::scene(dir);
        assert_eq!(scene.misses.len(), 2);
        assert!(scene.raygen.ends_with("scene.rgen.spv"));

        let pick = RtShaderPaths::pick(dir);
        assert_eq!(pick.misses.len(), 1);
        assert!(pick.closest_hit.ends_with("pick.rchit.spv"));
    }
}
