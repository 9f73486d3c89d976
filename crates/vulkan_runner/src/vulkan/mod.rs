//! Vulkan backend
//!
//! Organized the way objects depend on each other:
//!
//! - **`initialization`**: instance, surface, device context, capability selectors
//! - **`state`**: swapchain and frame synchronization, the objects rebuilt or cycled every frame
//! - **`rendering`**: render pass, pipeline objects and command recording
//! - **`resources`**: descriptors, samplers and uploaded textures
//!
//! Every owning wrapper keeps an `Arc<dyn GpuDriver>` and releases its handle on
//! drop. Objects that depend on other objects hold an `Arc` to them, so teardown
//! always runs in reverse dependency order.

pub mod driver;
pub mod error;
pub mod initialization;
pub mod rendering;
pub mod resources;
pub mod state;

#[cfg(test)]
pub(crate) mod mock;

pub use driver::{GpuDriver, SubmitBatch};
pub use error::{VulkanError, VulkanResult};
pub use initialization::{DeviceContext, QueueFamilyIndices, VulkanInstance};
pub use rendering::{
    ActiveRenderPass, CommandPool, CommandRecorder, DescriptorSetLayout, GraphicsPipeline, PipelineFactory,
    PipelineLayout, PushConstants, RenderPass, ShaderModule,
};
pub use resources::{
    DescriptorPool, DescriptorResourceManager, DescriptorSet, FrameCallbackSlot, ImageLayoutState, InputTexture,
    LayoutTracker, PixelSource, Sampler, Texture, TextureUploader,
};
pub use state::{
    AcquireOutcome, BlockingSubmitter, Fence, FrameSyncEngine, FrameSyncSet, PipelinedSubmitter, ResizeOutcome,
    Semaphore, SlotState, SwapchainInfo, SwapchainManager,
};
