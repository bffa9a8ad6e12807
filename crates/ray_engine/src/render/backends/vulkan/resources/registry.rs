//! Name-keyed registry of GPU resources
//!
//! Buffers, images, pipelines and descriptor sets live in generation-indexed
//! arenas; callers hold lightweight keys (or names) instead of raw Vulkan
//! handles, so a stale key after `remove_*` resolves to `None` instead of a
//! dangling handle. Removal drops the owning wrapper, which frees the GPU
//! memory immediately — lifetime is tied to the registry entry, never to a
//! Rust scope.

use std::collections::HashMap;

use slotmap::{new_key_type, SlotMap};

use super::buffer::GpuBuffer;
use super::descriptor_set::DescriptorBindings;
use super::image::GpuImage;
use crate::render::backends::vulkan::initialization::context::{VulkanError, VulkanResult};
use crate::render::backends::vulkan::rendering::pipeline::RasterPipeline;

new_key_type! {
    /// Generation-checked key for a registered buffer
    pub struct BufferKey;
    /// Generation-checked key for a registered image
    pub struct ImageKey;
    /// Generation-checked key for a registered pipeline
    pub struct PipelineKey;
    /// Generation-checked key for a registered descriptor set
    pub struct SetKey;
}

/// Process-wide store of named GPU resources
///
/// Mutated only from the control thread; no locking is needed or provided.
#[derive(Default)]
pub struct ResourceRegistry {
    buffers: SlotMap<BufferKey, GpuBuffer>,
    images: SlotMap<ImageKey, GpuImage>,
    pipelines: SlotMap<PipelineKey, RasterPipeline>,
    sets: SlotMap<SetKey, DescriptorBindings>,
    buffer_names: HashMap<String, BufferKey>,
    image_names: HashMap<String, ImageKey>,
    pipeline_names: HashMap<String, PipelineKey>,
    set_names: HashMap<String, SetKey>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer under `name`, replacing any previous holder
    pub fn insert_buffer(&mut self, name: &str, buffer: GpuBuffer) -> BufferKey {
        if let Some(old) = self.buffer_names.remove(name) {
            self.buffers.remove(old);
        }
        let key = self.buffers.insert(buffer);
        self.buffer_names.insert(name.to_string(), key);
        key
    }

    /// Look up a buffer by key
    pub fn buffer(&self, key: BufferKey) -> Option<&GpuBuffer> {
        self.buffers.get(key)
    }

    /// Look up a buffer by name
    pub fn buffer_by_name(&self, name: &str) -> VulkanResult<&GpuBuffer> {
        self.buffer_names
            .get(name)
            .and_then(|&key| self.buffers.get(key))
            .ok_or_else(|| VulkanError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    /// Drop a buffer, freeing its memory now
    pub fn remove_buffer(&mut self, name: &str) -> bool {
        match self.buffer_names.remove(name) {
            Some(key) => self.buffers.remove(key).is_some(),
            None => false,
        }
    }

    /// Register an image under `name`, replacing any previous holder
    pub fn insert_image(&mut self, name: &str, image: GpuImage) -> ImageKey {
        if let Some(old) = self.image_names.remove(name) {
            self.images.remove(old);
        }
        let key = self.images.insert(image);
        self.image_names.insert(name.to_string(), key);
        key
    }

    /// Look up an image by key
    pub fn image(&self, key: ImageKey) -> Option<&GpuImage> {
        self.images.get(key)
    }

    /// Look up an image by name
    pub fn image_by_name(&self, name: &str) -> VulkanResult<&GpuImage> {
        self.image_names
            .get(name)
            .and_then(|&key| self.images.get(key))
            .ok_or_else(|| VulkanError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    /// Drop an image, freeing its memory now
    pub fn remove_image(&mut self, name: &str) -> bool {
        match self.image_names.remove(name) {
            Some(key) => self.images.remove(key).is_some(),
            None => false,
        }
    }

    /// Register a pipeline under `name`, replacing any previous holder
    pub fn insert_pipeline(&mut self, name: &str, pipeline: RasterPipeline) -> PipelineKey {
        if let Some(old) = self.pipeline_names.remove(name) {
            self.pipelines.remove(old);
        }
        let key = self.pipelines.insert(pipeline);
        self.pipeline_names.insert(name.to_string(), key);
        key
    }

    /// Look up a pipeline by name
    pub fn pipeline_by_name(&self, name: &str) -> VulkanResult<&RasterPipeline> {
        self.pipeline_names
            .get(name)
            .and_then(|&key| self.pipelines.get(key))
            .ok_or_else(|| VulkanError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    /// Drop a pipeline
    pub fn remove_pipeline(&mut self, name: &str) -> bool {
        match self.pipeline_names.remove(name) {
            Some(key) => self.pipelines.remove(key).is_some(),
            None => false,
        }
    }

    /// Register a descriptor set under `name`, replacing any previous holder
    pub fn insert_set(&mut self, name: &str, set: DescriptorBindings) -> SetKey {
        if let Some(old) = self.set_names.remove(name) {
            self.sets.remove(old);
        }
        let key = self.sets.insert(set);
        self.set_names.insert(name.to_string(), key);
        key
    }

    /// Look up a descriptor set by name
    pub fn set_by_name(&self, name: &str) -> VulkanResult<&DescriptorBindings> {
        self.set_names
            .get(name)
            .and_then(|&key| self.sets.get(key))
            .ok_or_else(|| VulkanError::ResourceNotFound {
                name: name.to_string(),
            })
    }

    /// Drop a descriptor set declaration
    pub fn remove_set(&mut self, name: &str) -> bool {
        match self.set_names.remove(name) {
            Some(key) => self.sets.remove(key).is_some(),
            None => false,
        }
    }

    /// Number of live buffers (leak checks)
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Number of live images (leak checks)
    pub fn live_images(&self) -> usize {
        self.images.len()
    }

    /// Number of live pipelines
    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Registry bookkeeping is testable without a device by exercising the
    // name maps against empty arenas.

    #[test]
    fn test_lookup_missing_buffer() {
        let registry = ResourceRegistry::new();
        let result = registry.buffer_by_name("global_vertices");
        assert!(matches!(result, Err(VulkanError::ResourceNotFound { .. })));
    }

    #[test]
    fn test_remove_missing_is_false() {
        let mut registry = ResourceRegistry::new();
        assert!(!registry.remove_buffer("nope"));
        assert!(!registry.remove_image("nope"));
        assert!(!registry.remove_pipeline("nope"));
    }

    #[test]
    fn test_live_counts_start_at_zero() {
        let registry = ResourceRegistry::new();
        assert_eq!(registry.live_buffers(), 0);
        assert_eq!(registry.live_images(), 0);
        assert_eq!(registry.live_pipelines(), 0);
    }
}
