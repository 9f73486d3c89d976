//! # Vulkan Runner
//!
//! Vulkan device, swapchain and frame-synchronization substrate with a full-screen
//! affine texture filter on top.
//!
//! ## Features
//!
//! - **Device bring-up**: instance, surface, queue family and memory type selection
//! - **Swapchain lifecycle**: creation, resize with old-swapchain handoff, framebuffers
//! - **Frame pacing**: per-slot semaphores and fences, blocking and pipelined submission
//! - **Texture upload**: staging copies with tracked image layouts
//! - **Affine filter**: one draw of a sampled texture through a 2D affine transform
//! - **Handle bridge**: the same operations over opaque `u64` handles with sentinel results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vulkan_runner::prelude::*;
//!
//! fn main() {
//!     vulkan_runner::foundation::logging::init();
//!
//!     let config = RunnerConfig::new("demo").with_frames_in_flight(2);
//!     let mut bridge = NativeBridge::new();
//!     let instance = bridge.create_instance(&config, &[]);
//!     if instance == 0 {
//!         eprintln!("Vulkan is not available");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod bridge;
pub mod config;
pub mod filter;
pub mod foundation;
pub mod vulkan;

/// Common imports for runner users
pub mod prelude {
    pub use crate::{
        bridge::NativeBridge,
        config::{Config, RunnerConfig, ShaderConfig, SwapchainConfig, TextureConfig},
        filter::AffineFilter,
        foundation::math::AffineMatrix,
        vulkan::{
            AcquireOutcome, CommandPool, CommandRecorder, DeviceContext, FrameSyncEngine, GpuDriver, RenderPass,
            SwapchainManager, TextureUploader, VulkanError, VulkanInstance, VulkanResult,
        },
    };
}
