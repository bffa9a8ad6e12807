//! # Ray Engine
//!
//! Rendering backend for a real-time ray traced 3D application, built on
//! Vulkan with hardware ray tracing.
//!
//! The backend owns the graphics device and drives a fixed multi-pass frame
//! pipeline: ray trace (main scene + optional inventory scene), mouse-pick
//! dispatch, five-stage denoise ping-pong, composite, UI blit, present.
//! Surrounding systems (windowing, asset decoding, scene simulation, UI
//! logic) are external collaborators that feed data in through
//! [`render::FrameInput`] and read back a [`render::PickResult`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ray_engine::config::RendererConfig;
//! use ray_engine::render::{FrameInput, VulkanRenderer};
//!
//! # fn window_handles() -> (raw_window_handle::RawDisplayHandle, raw_window_handle::RawWindowHandle) { unimplemented!() }
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     ray_engine::foundation::logging::init();
//!
//!     let config = RendererConfig::default();
//!     let (display, window) = window_handles();
//!     let mut renderer = VulkanRenderer::new(display, window, (1280, 720), &config)?;
//!
//!     loop {
//!         let input = FrameInput::default();
//!         let report = renderer.render_frame(&input)?;
//!         let _hovered = report.pick;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

pub use render::{FrameInput, FrameReport, PickResult, VulkanRenderer};
