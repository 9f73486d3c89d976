//! Instance, surface and device bring-up

pub mod context;
pub mod instance;
pub mod selectors;

pub use context::DeviceContext;
pub use instance::{create_surface, platform_extensions, VulkanInstance};
pub use selectors::{find_memory_type, find_queue_family, QueueFamilyIndices};
