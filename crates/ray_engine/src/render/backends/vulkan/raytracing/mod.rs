//! Hardware ray tracing: acceleration structures and the RT pipeline

pub mod accel;
pub mod pipeline;

pub use accel::{instance_record, Blas, MeshGeometry, Tlas};
pub use pipeline::RayTracingPipeline;
