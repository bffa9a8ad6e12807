//! GPU resource management: allocator, buffers, images, registry, descriptors

pub mod allocator;
pub mod buffer;
pub mod descriptor_set;
pub mod image;
pub mod registry;

pub use allocator::{GpuAllocator, MemoryResidency};
pub use buffer::GpuBuffer;
pub use descriptor_set::{BindingKind, DescriptorBindings, DescriptorPool, DescriptorResource};
pub use image::{GpuImage, ImageDesc};
pub use registry::ResourceRegistry;
