//! Rendering subsystem
//!
//! Public surface of the GPU backend. The only backend implemented is
//! Vulkan with hardware ray tracing; everything below
//! [`backends::vulkan`] is internal wiring and re-exported here where the
//! application is expected to touch it.

pub mod backends;
pub mod frame_input;

pub use backends::vulkan::VulkanRenderer;
pub use frame_input::{
    CameraData, FrameInput, FrameReport, LightData, MeshId, MeshInstance, MeshVertex, PickResult,
    TextureId, UiQuad,
};
