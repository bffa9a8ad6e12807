//! Render backend implementations

pub mod vulkan;
