//! Vulkan ray tracing backend
//!
//! Low-level Vulkan implementation following the resource ownership and
//! synchronization rules defined in DESIGN.md. Module layout mirrors the
//! frame lifecycle:
//!
//! - `initialization`: instance, device selection, logical device, context
//! - `resources`: allocator, buffers, images, registry, descriptor sets
//! - `state`: command pools, sync primitives, frame ring, swapchain
//! - `raytracing`: acceleration structures and the ray tracing pipeline
//! - `rendering`: shader modules, raster pipelines, the frame graph

pub mod initialization;
pub mod raytracing;
pub mod rendering;
pub mod renderer;
pub mod resources;
pub mod state;

pub use initialization::context::{
    PhysicalDeviceInfo, RayTracingProperties, VulkanContext, VulkanError, VulkanInstance,
    VulkanResult,
};
pub use renderer::VulkanRenderer;
