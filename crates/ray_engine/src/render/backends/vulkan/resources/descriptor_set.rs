//! Descriptor set and resource binding management
//!
//! Binding layouts are declared once at setup time and frozen by
//! [`DescriptorBindings::build_layout`]; afterwards only the resource
//! behind a binding may change, one binding per [`DescriptorBindings::update`]
//! call. Three layout flavors exist in this backend:
//!
//! - **dynamic**: per-frame camera/instances/lights/TLAS, one set instance
//!   per frame slot per logical scene
//! - **static**: the global texture array, global vertex/index buffers,
//!   ray tracing output images and the mouse-pick buffer
//! - **sampler**: a single combined image sampler used by the denoise,
//!   composite and UI passes to read the previous pass's output
//!
//! The texture array binding is declared update-after-bind so the asset
//! collaborator can keep streaming textures in while earlier frames'
//! descriptor sets are still in flight.

use ash::{vk, Device};

use super::buffer::GpuBuffer;
use super::image::GpuImage;
use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};

/// Resource kind a binding slot accepts, fixed at layout-build time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    /// Uniform buffer
    UniformBuffer,
    /// Storage buffer
    StorageBuffer,
    /// Sampled image array (texture atlas slots)
    SampledImageArray,
    /// Combined image + sampler
    CombinedImageSampler,
    /// Storage image written by ray generation shaders
    StorageImage,
    /// Top-level acceleration structure
    AccelerationStructure,
}

impl BindingKind {
    /// The Vulkan descriptor type backing this kind
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::SampledImageArray => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            BindingKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            BindingKind::AccelerationStructure => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        }
    }
}

/// One declared binding slot
#[derive(Debug, Clone, Copy)]
struct BindingDecl {
    kind: BindingKind,
    index: u32,
    count: u32,
    stages: vk::ShaderStageFlags,
    update_after_bind: bool,
}

/// Resource handed to [`DescriptorBindings::update`]
pub enum DescriptorResource<'a> {
    /// Whole uniform buffer
    UniformBuffer(&'a GpuBuffer),
    /// Whole storage buffer
    StorageBuffer(&'a GpuBuffer),
    /// Storage image in GENERAL layout
    StorageImage(&'a GpuImage),
    /// Image view + sampler in SHADER_READ_ONLY_OPTIMAL layout
    CombinedImageSampler {
        /// View to sample
        view: vk::ImageView,
        /// Sampler to sample with
        sampler: vk::Sampler,
    },
    /// Full sampled-image array; must fill every declared slot
    SampledImageArray(&'a [vk::DescriptorImageInfo]),
    /// Top-level acceleration structure
    AccelerationStructure(vk::AccelerationStructureKHR),
}

/// Declared bindings, their layout, and one allocated set instance
pub struct DescriptorBindings {
    device: Device,
    decls: Vec<BindingDecl>,
    layout: Option<vk::DescriptorSetLayout>,
    set: Option<vk::DescriptorSet>,
    pool: Option<vk::DescriptorPool>,
}

impl DescriptorBindings {
    /// Start an empty declaration list
    pub fn new(device: Device) -> Self {
        Self {
            device,
            decls: Vec::new(),
            layout: None,
            set: None,
            pool: None,
        }
    }

    /// Declare one binding slot; append-only, before [`Self::build_layout`]
    pub fn add_binding(
        &mut self,
        kind: BindingKind,
        index: u32,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> VulkanResult<&mut Self> {
        self.add_binding_inner(kind, index, count, stages, false)
    }

    /// Declare an update-after-bind binding (texture array streaming)
    pub fn add_binding_update_after_bind(
        &mut self,
        kind: BindingKind,
        index: u32,
        count: u32,
        stages: vk::ShaderStageFlags,
    ) -> VulkanResult<&mut Self> {
        self.add_binding_inner(kind, index, count, stages, true)
    }

    fn add_binding_inner(
        &mut self,
        kind: BindingKind,
        index: u32,
        count: u32,
        stages: vk::ShaderStageFlags,
        update_after_bind: bool,
    ) -> VulkanResult<&mut Self> {
        if self.layout.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "add_binding after build_layout".to_string(),
            });
        }
        if self.decls.iter().any(|d| d.index == index) {
            return Err(VulkanError::InvalidOperation {
                reason: format!("binding index {} declared twice", index),
            });
        }
        self.decls.push(BindingDecl {
            kind,
            index,
            count,
            stages,
            update_after_bind,
        });
        Ok(self)
    }

    /// Finalize the declarations into a layout object
    ///
    /// Calling again after the layout exists is a no-op.
    pub fn build_layout(&mut self) -> VulkanResult<()> {
        if self.layout.is_some() {
            return Ok(());
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .decls
            .iter()
            .map(|d| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(d.index)
                    .descriptor_type(d.kind.descriptor_type())
                    .descriptor_count(d.count)
                    .stage_flags(d.stages)
                    .build()
            })
            .collect();

        let binding_flags: Vec<vk::DescriptorBindingFlags> = self
            .decls
            .iter()
            .map(|d| {
                if d.update_after_bind {
                    vk::DescriptorBindingFlags::UPDATE_AFTER_BIND
                        | vk::DescriptorBindingFlags::PARTIALLY_BOUND
                } else {
                    vk::DescriptorBindingFlags::empty()
                }
            })
            .collect();

        let needs_after_bind = self.decls.iter().any(|d| d.update_after_bind);

        let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&binding_flags);

        let layout_flags = if needs_after_bind {
            vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL
        } else {
            vk::DescriptorSetLayoutCreateFlags::empty()
        };

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .bindings(&bindings)
            .flags(layout_flags)
            .push_next(&mut flags_info);

        let layout = unsafe {
            self.device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(VulkanError::from_vk)?
        };

        self.layout = Some(layout);
        Ok(())
    }

    /// Allocate the single set instance from `pool`
    pub fn allocate(&mut self, pool: &DescriptorPool) -> VulkanResult<()> {
        let layout = self.layout.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "allocate before build_layout".to_string(),
        })?;
        self.set = Some(pool.allocate_set(layout)?);
        self.pool = Some(pool.handle());
        Ok(())
    }

    /// Rewrite one binding with a new resource
    ///
    /// May be called every frame for per-frame resources or once at load
    /// time for static ones. Writing the same handle twice is equivalent to
    /// writing it once.
    pub fn update(&self, binding: u32, resource: DescriptorResource<'_>) -> VulkanResult<()> {
        let set = self.set.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "update before allocate".to_string(),
        })?;
        let decl = self
            .decls
            .iter()
            .find(|d| d.index == binding)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("update of undeclared binding {}", binding),
            })?;

        let base = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(0)
            .descriptor_type(decl.kind.descriptor_type());

        match resource {
            DescriptorResource::UniformBuffer(buffer)
            | DescriptorResource::StorageBuffer(buffer) => {
                let info = [vk::DescriptorBufferInfo::builder()
                    .buffer(buffer.handle())
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
                    .build()];
                let write = base.buffer_info(&info).build();
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorResource::StorageImage(image) => {
                let info = [vk::DescriptorImageInfo::builder()
                    .image_view(image.view())
                    .image_layout(vk::ImageLayout::GENERAL)
                    .build()];
                let write = base.image_info(&info).build();
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorResource::CombinedImageSampler { view, sampler } => {
                let info = [vk::DescriptorImageInfo::builder()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .build()];
                let write = base.image_info(&info).build();
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorResource::SampledImageArray(infos) => {
                if infos.len() != decl.count as usize {
                    return Err(VulkanError::InvalidOperation {
                        reason: format!(
                            "image array update with {} entries, binding declared {}",
                            infos.len(),
                            decl.count
                        ),
                    });
                }
                let write = base.image_info(infos).build();
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
            DescriptorResource::AccelerationStructure(accel) => {
                let structures = [accel];
                let mut accel_info = vk::WriteDescriptorSetAccelerationStructureKHR::builder()
                    .acceleration_structures(&structures);
                let mut write = base.push_next(&mut accel_info).build();
                write.descriptor_count = 1;
                unsafe { self.device.update_descriptor_sets(&[write], &[]) };
            }
        }
        Ok(())
    }

    /// Rewrite a single element of an array binding (texture streaming)
    pub fn update_array_element(
        &self,
        binding: u32,
        element: u32,
        info: vk::DescriptorImageInfo,
    ) -> VulkanResult<()> {
        let set = self.set.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "update before allocate".to_string(),
        })?;
        let decl = self
            .decls
            .iter()
            .find(|d| d.index == binding)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("update of undeclared binding {}", binding),
            })?;
        if element >= decl.count {
            return Err(VulkanError::InvalidOperation {
                reason: format!("array element {} out of {} slots", element, decl.count),
            });
        }

        let infos = [info];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(element)
            .descriptor_type(decl.kind.descriptor_type())
            .image_info(&infos)
            .build();
        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
        Ok(())
    }

    /// Layout handle; panics only if called before `build_layout`
    pub fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout.expect("layout not built")
    }

    /// Allocated set handle; panics only if called before `allocate`
    pub fn set(&self) -> vk::DescriptorSet {
        self.set.expect("set not allocated")
    }

    /// Number of declared bindings
    pub fn binding_count(&self) -> usize {
        self.decls.len()
    }
}

impl Drop for DescriptorBindings {
    fn drop(&mut self) {
        unsafe {
            // The pool was created with FREE_DESCRIPTOR_SET, so returning
            // the set keeps pool capacity stable across target recreation
            if let (Some(set), Some(pool)) = (self.set.take(), self.pool.take()) {
                let _ = self.device.free_descriptor_sets(pool, &[set]);
            }
            if let Some(layout) = self.layout.take() {
                self.device.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

/// Descriptor pool sized for the backend's bounded resource kinds
pub struct DescriptorPool {
    device: Device,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    /// Create the pool shared by all set flavors
    ///
    /// `max_textures` sizes the sampled-image pool for the global texture
    /// array plus the post-process sampler sets.
    pub fn new(device: Device, max_sets: u32, max_textures: u32) -> VulkanResult<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(max_sets * 2)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(max_sets * 8)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(max_textures + max_sets * 4)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(max_sets * 4)
                .build(),
            vk::DescriptorPoolSize::builder()
                .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(max_sets * 2)
                .build(),
        ];

        // UPDATE_AFTER_BIND covers the streaming texture array; FREE_DESCRIPTOR_SET
        // lets swapchain recreation rebuild the sampler sets.
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(
                vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET
                    | vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND,
            )
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe {
            device
                .create_descriptor_pool(&pool_info, None)
                .map_err(VulkanError::from_vk)?
        };

        Ok(Self { device, pool })
    }

    /// Allocate one set with the given layout
    pub fn allocate_set(&self, layout: vk::DescriptorSetLayout) -> VulkanResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(VulkanError::from_vk)?
        };
        Ok(sets[0])
    }

    /// Get the pool handle
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Binding indices shared between Rust and the shader sources
///
/// These are part of the wire protocol with the compiled SPIR-V; renumber
/// only together with the shaders.
pub mod slots {
    /// Dynamic set: camera uniform block
    pub const DYN_CAMERA: u32 = 0;
    /// Dynamic set: top-level acceleration structure
    pub const DYN_TLAS: u32 = 1;
    /// Dynamic set: per-instance records
    pub const DYN_INSTANCES: u32 = 2;
    /// Dynamic set: light records
    pub const DYN_LIGHTS: u32 = 3;
    /// Dynamic set: UI quad records
    pub const DYN_UI_QUADS: u32 = 4;

    /// Static set: global texture array
    pub const STATIC_TEXTURES: u32 = 0;
    /// Static set: global vertex buffer
    pub const STATIC_VERTICES: u32 = 1;
    /// Static set: global index buffer
    pub const STATIC_INDICES: u32 = 2;
    /// Static set: ray traced color output
    pub const STATIC_RT_COLOR: u32 = 3;
    /// Static set: ray traced normal/depth output
    pub const STATIC_RT_NORMAL: u32 = 4;
    /// Static set: mouse-pick result buffer
    pub const STATIC_PICK: u32 = 5;

    /// Sampler set: the one post-process input
    pub const SAMPLER_INPUT: u32 = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_kind_descriptor_types() {
        assert_eq!(
            BindingKind::UniformBuffer.descriptor_type(),
            vk::DescriptorType::UNIFORM_BUFFER
        );
        assert_eq!(
            BindingKind::AccelerationStructure.descriptor_type(),
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
        );
        assert_eq!(
            BindingKind::SampledImageArray.descriptor_type(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
    }

    #[test]
    fn test_slot_indices_are_distinct() {
        let dynamic = [
            slots::DYN_CAMERA,
            slots::DYN_TLAS,
            slots::DYN_INSTANCES,
            slots::DYN_LIGHTS,
            slots::DYN_UI_QUADS,
        ];
        for (i, a) in dynamic.iter().enumerate() {
            for b in &dynamic[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
