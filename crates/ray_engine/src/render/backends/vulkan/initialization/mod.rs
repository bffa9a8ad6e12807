//! Vulkan initialization: instance, device selection, surface, context

pub mod context;
pub mod surface;
