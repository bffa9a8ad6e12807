//! Pipelines and per-frame pass recording

pub mod frame_graph;
pub mod pipeline;
pub mod render_pass;
pub mod shader;

pub use frame_graph::FrameGraph;
pub use pipeline::{PipelineManager, RasterPipeline};
pub use render_pass::{Framebuffer, RenderPass};
pub use shader::ShaderModule;
