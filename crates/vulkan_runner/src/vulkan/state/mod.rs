// Vulkan state management

pub mod swapchain_manager;
pub mod sync;

pub use swapchain_manager::{ResizeOutcome, SwapchainInfo, SwapchainManager};
pub use sync::{
    acquire_next_image, create_sync_objects, device_wait_idle, present, present_with_timestamp, reset_fence,
    wait_for_all_fences, wait_for_fence, AcquireOutcome, BlockingSubmitter, Fence, FrameSyncEngine, FrameSyncSet,
    PipelinedSubmitter, Semaphore, SlotState,
};
