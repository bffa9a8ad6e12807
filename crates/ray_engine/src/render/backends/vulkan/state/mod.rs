//! Frame state: command pools, synchronization, frame ring, swapchain

pub mod commands;
pub mod frame;
pub mod swapchain;
pub mod sync;

pub use commands::{CommandPool, ImmediateSubmit};
pub use frame::{FrameEvent, FrameRing, FrameSlot};
pub use swapchain::Swapchain;
pub use sync::{Fence, FrameSync, Semaphore};
