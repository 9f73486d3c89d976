//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII wrappers for semaphores and fences, the per-frame [`FrameSyncSet`], and the
//! [`FrameSyncEngine`] that cycles frames in flight:
//!
//! ```text
//! Idle --begin_frame--> Acquiring --acquire--> Rendering --submit--> Presenting --present--> Idle
//!                           |  out of date
//!                           +--------------> Idle
//! ```
//!
//! A slot's fence is waited on when the slot is entered and reset only right
//! before the queue submission that signals it again, so an abandoned frame
//! never leaves an unsignaled fence behind.
//!
//! Two submission policies exist as separate types. [`BlockingSubmitter`] drains
//! the queue after every submit; [`PipelinedSubmitter`] relies on semaphores and
//! fences and has no way to wait for idle.

use ash::vk;
use std::sync::Arc;

use crate::vulkan::state::SwapchainManager;
use crate::vulkan::{GpuDriver, SubmitBatch, VulkanError, VulkanResult};

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    driver: Arc<dyn GpuDriver>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new semaphore
    pub fn new(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let semaphore = driver.create_semaphore()?;
        Ok(Self { driver, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        self.driver.destroy_semaphore(self.semaphore);
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    driver: Arc<dyn GpuDriver>,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(driver: Arc<dyn GpuDriver>, signaled: bool) -> VulkanResult<Self> {
        let fence = driver.create_fence(signaled)?;
        Ok(Self { driver, fence })
    }

    /// Wait for the fence without a timeout
    pub fn wait(&self) -> VulkanResult<()> {
        self.driver.wait_for_fences(&[self.fence], u64::MAX)
    }

    /// Reset the fence to unsignaled
    pub fn reset(&self) -> VulkanResult<()> {
        self.driver.reset_fences(&[self.fence])
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        self.driver.destroy_fence(self.fence);
    }
}

/// Frame synchronization objects for in-flight frame management
pub struct FrameSyncSet {
    /// Semaphore signaled when swapchain image becomes available
    pub image_available: Semaphore,
    /// Semaphore signaled when frame rendering is complete
    pub render_finished: Semaphore,
    /// Fence for CPU-GPU synchronization of frame, created signaled
    pub in_flight: Fence,
}

impl FrameSyncSet {
    /// Create frame synchronization objects
    pub fn new(driver: &Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let image_available = Semaphore::new(Arc::clone(driver))?;
        let render_finished = Semaphore::new(Arc::clone(driver))?;
        let in_flight = Fence::new(Arc::clone(driver), true)?;

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
        })
    }
}

/// Build `count` sync sets; anything already built is released on failure
pub fn create_sync_objects(driver: &Arc<dyn GpuDriver>, count: usize) -> VulkanResult<Vec<FrameSyncSet>> {
    if count == 0 {
        return Err(VulkanError::precondition("sync object count must be positive"));
    }
    let sets = (0..count)
        .map(|_| FrameSyncSet::new(driver))
        .collect::<VulkanResult<Vec<_>>>()
        .map_err(|e| {
            log::error!("[SYNC] Sync object creation failed: {}", e);
            e
        })?;
    log::debug!("[SYNC] Created {} sync sets", count);
    Ok(sets)
}

/// Per-slot frame state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Free to start a frame
    #[default]
    Idle,
    /// Fence waited, waiting for a swapchain image
    Acquiring,
    /// Image acquired, commands being recorded
    Rendering,
    /// Submitted, waiting to be presented
    Presenting,
}

/// Result of a swapchain image acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image ready
    Success(u32),
    /// Image ready but the swapchain no longer matches the surface exactly
    Suboptimal(u32),
    /// Swapchain must be resized before acquiring again
    OutOfDate,
    /// Any other driver failure
    Failed(vk::Result),
}

impl AcquireOutcome {
    fn from_driver(result: Result<(u32, bool), vk::Result>) -> Self {
        match result {
            Ok((index, false)) => Self::Success(index),
            Ok((index, true)) => Self::Suboptimal(index),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Self::OutOfDate,
            Err(e) => Self::Failed(e),
        }
    }

    /// Acquired image index, if any
    pub fn image_index(&self) -> Option<u32> {
        match self {
            Self::Success(index) | Self::Suboptimal(index) => Some(*index),
            Self::OutOfDate | Self::Failed(_) => None,
        }
    }

    /// Driver result code for this outcome
    pub fn result(&self) -> vk::Result {
        match self {
            Self::Success(_) => vk::Result::SUCCESS,
            Self::Suboptimal(_) => vk::Result::SUBOPTIMAL_KHR,
            Self::OutOfDate => vk::Result::ERROR_OUT_OF_DATE_KHR,
            Self::Failed(e) => *e,
        }
    }

    /// `(result code << 32) | image index`
    #[allow(clippy::cast_sign_loss)]
    pub fn pack(&self) -> u64 {
        let code = u64::from(self.result().as_raw() as u32);
        (code << 32) | u64::from(self.image_index().unwrap_or(0))
    }

    /// Inverse of [`Self::pack`]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn unpack(packed: u64) -> Self {
        let code = vk::Result::from_raw((packed >> 32) as u32 as i32);
        let index = packed as u32;
        match code {
            vk::Result::SUCCESS => Self::Success(index),
            vk::Result::SUBOPTIMAL_KHR => Self::Suboptimal(index),
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::OutOfDate,
            other => Self::Failed(other),
        }
    }
}

/// Acquire the next image, signaling `semaphore`; never resizes
pub fn acquire_next_image(
    driver: &dyn GpuDriver,
    swapchain: vk::SwapchainKHR,
    semaphore: vk::Semaphore,
) -> AcquireOutcome {
    let outcome = AcquireOutcome::from_driver(driver.acquire_next_image(swapchain, u64::MAX, semaphore));
    match outcome {
        AcquireOutcome::OutOfDate => log::warn!("[SYNC] Swapchain out of date on acquire"),
        AcquireOutcome::Failed(e) => log::error!("[SYNC] Acquire failed: {:?} ({})", e, e.as_raw()),
        AcquireOutcome::Suboptimal(index) => log::debug!("[SYNC] Acquired image {} (suboptimal)", index),
        AcquireOutcome::Success(_) => {}
    }
    outcome
}

/// Queue `image_index` for presentation once `wait_semaphore` is signaled
///
/// Returns `Ok(true)` when the swapchain is suboptimal. An out of date swapchain is
/// reported as [`VulkanError::SwapchainOutOfDate`] and left untouched.
pub fn present(
    driver: &dyn GpuDriver,
    swapchain: vk::SwapchainKHR,
    image_index: u32,
    wait_semaphore: vk::Semaphore,
) -> VulkanResult<bool> {
    match driver.queue_present(driver.present_queue(), swapchain, image_index, wait_semaphore) {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            log::warn!("[SYNC] Swapchain out of date on present");
            Err(VulkanError::SwapchainOutOfDate)
        }
        Err(e) => {
            log::error!("[SYNC] Present failed: {:?} ({})", e, e.as_raw());
            Err(VulkanError::Api(e))
        }
    }
}

/// [`present`] with a presentation timestamp in nanoseconds
///
/// Display timing is not enabled on the device, so the timestamp is only logged.
pub fn present_with_timestamp(
    driver: &dyn GpuDriver,
    swapchain: vk::SwapchainKHR,
    image_index: u32,
    wait_semaphore: vk::Semaphore,
    timestamp: i64,
) -> VulkanResult<bool> {
    log::trace!("[SYNC] Present image {} at {}ns", image_index, timestamp);
    present(driver, swapchain, image_index, wait_semaphore)
}

/// Wait for a single fence without a timeout
pub fn wait_for_fence(driver: &dyn GpuDriver, fence: vk::Fence) -> VulkanResult<()> {
    driver.wait_for_fences(&[fence], u64::MAX)
}

/// Reset a single fence
pub fn reset_fence(driver: &dyn GpuDriver, fence: vk::Fence) -> VulkanResult<()> {
    driver.reset_fences(&[fence])
}

/// Wait for every fence without a timeout
pub fn wait_for_all_fences(driver: &dyn GpuDriver, fences: &[vk::Fence]) -> VulkanResult<()> {
    if fences.is_empty() {
        return Ok(());
    }
    driver.wait_for_fences(fences, u64::MAX)
}

/// Block until the device has no pending work
pub fn device_wait_idle(driver: &dyn GpuDriver) -> VulkanResult<()> {
    driver.device_wait_idle()
}

/// Submits and then waits for the graphics queue to drain
pub struct BlockingSubmitter {
    driver: Arc<dyn GpuDriver>,
}

impl BlockingSubmitter {
    /// Submitter on the graphics queue
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self { driver }
    }

    /// Submit `command_buffer` and return once the GPU has executed it
    pub fn submit(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        if command_buffer == vk::CommandBuffer::null() {
            return Err(VulkanError::precondition("null command buffer"));
        }
        let queue = self.driver.graphics_queue();
        self.driver
            .queue_submit(queue, &SubmitBatch::command_buffer_only(command_buffer), vk::Fence::null())
            .map_err(|e| {
                log::error!("[SYNC] Submit failed: {}", e);
                e
            })?;
        self.driver.queue_wait_idle(queue)
    }
}

/// Submits with semaphore and fence signaling and returns immediately
pub struct PipelinedSubmitter {
    driver: Arc<dyn GpuDriver>,
}

impl PipelinedSubmitter {
    /// Submitter on the graphics queue
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self { driver }
    }

    /// Submit `command_buffer` after `wait` at color output, signaling `signal` and `fence`
    ///
    /// `fence` must be unsignaled.
    pub fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> VulkanResult<()> {
        if command_buffer == vk::CommandBuffer::null() {
            return Err(VulkanError::precondition("null command buffer"));
        }
        let wait_semaphores = [wait];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [signal];
        let batch = SubmitBatch {
            command_buffer,
            wait_semaphores: &wait_semaphores,
            wait_stages: &wait_stages,
            signal_semaphores: &signal_semaphores,
        };
        self.driver
            .queue_submit(self.driver.graphics_queue(), &batch, fence)
            .map_err(|e| {
                log::error!("[SYNC] Pipelined submit failed: {}", e);
                e
            })
    }
}

/// Cycles frames in flight over a fixed set of sync slots
///
/// The slot count is independent of the swapchain image count.
pub struct FrameSyncEngine {
    driver: Arc<dyn GpuDriver>,
    sets: Vec<FrameSyncSet>,
    states: Vec<SlotState>,
    submitter: PipelinedSubmitter,
    current: usize,
}

impl FrameSyncEngine {
    /// Engine with `frames_in_flight` slots
    pub fn new(driver: Arc<dyn GpuDriver>, frames_in_flight: usize) -> VulkanResult<Self> {
        let sets = create_sync_objects(&driver, frames_in_flight)?;
        Ok(Self {
            states: vec![SlotState::Idle; sets.len()],
            submitter: PipelinedSubmitter::new(Arc::clone(&driver)),
            driver,
            sets,
            current: 0,
        })
    }

    fn expect_state(&self, expected: SlotState, operation: &str) -> VulkanResult<()> {
        let actual = self.states[self.current];
        if actual == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid_operation(format!(
                "{operation} on slot {} in state {actual:?}",
                self.current
            )))
        }
    }

    /// Enter the current slot, waiting until its previous submission has completed
    pub fn begin_frame(&mut self) -> VulkanResult<usize> {
        self.expect_state(SlotState::Idle, "begin_frame")?;
        self.sets[self.current].in_flight.wait()?;
        self.states[self.current] = SlotState::Acquiring;
        Ok(self.current)
    }

    /// Acquire the next swapchain image for the current slot
    ///
    /// An out of date or failed acquire returns the slot to idle so the frame can
    /// be abandoned; the caller decides whether to resize.
    pub fn acquire(&mut self, swapchain: &SwapchainManager) -> VulkanResult<AcquireOutcome> {
        self.expect_state(SlotState::Acquiring, "acquire")?;
        let semaphore = self.sets[self.current].image_available.handle();
        let outcome = acquire_next_image(self.driver.as_ref(), swapchain.handle(), semaphore);
        self.states[self.current] = match outcome {
            AcquireOutcome::Success(_) | AcquireOutcome::Suboptimal(_) => SlotState::Rendering,
            AcquireOutcome::OutOfDate | AcquireOutcome::Failed(_) => SlotState::Idle,
        };
        Ok(outcome)
    }

    /// Submit the recorded frame, signaling the slot fence
    pub fn submit(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.expect_state(SlotState::Rendering, "submit")?;
        let set = &self.sets[self.current];
        set.in_flight.reset()?;

        let result = self.submitter.submit(
            command_buffer,
            set.image_available.handle(),
            set.render_finished.handle(),
            set.in_flight.handle(),
        );
        match result {
            Ok(()) => {
                self.states[self.current] = SlotState::Presenting;
                Ok(())
            }
            Err(e) => {
                // Nothing will signal the reset fence; replace it with a signaled one
                self.sets[self.current].in_flight = Fence::new(Arc::clone(&self.driver), true)?;
                self.states[self.current] = SlotState::Idle;
                Err(e)
            }
        }
    }

    /// Drop the frame of an acquired slot without rendering or presenting it
    ///
    /// Used after a suboptimal acquire when the caller would rather rebuild the
    /// swapchain first. An empty submission consumes the acquire semaphore and
    /// signals the slot fence, so the slot goes back to idle and stays current.
    /// The acquired image is not returned; rebuilding the swapchain releases it.
    pub fn abandon_frame(&mut self) -> VulkanResult<()> {
        self.expect_state(SlotState::Rendering, "abandon_frame")?;
        let set = &self.sets[self.current];
        set.in_flight.reset()?;

        let wait_semaphores = [set.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::ALL_COMMANDS];
        let batch = SubmitBatch::wait_only(&wait_semaphores, &wait_stages);
        let result = self
            .driver
            .queue_submit(self.driver.graphics_queue(), &batch, set.in_flight.handle());
        self.states[self.current] = SlotState::Idle;
        if let Err(e) = result {
            log::error!("[SYNC] Abandoning frame on slot {} failed: {}", self.current, e);
            self.sets[self.current].in_flight = Fence::new(Arc::clone(&self.driver), true)?;
            return Err(e);
        }
        log::debug!("[SYNC] Frame on slot {} abandoned", self.current);
        Ok(())
    }

    /// Present `image_index` after rendering finishes and advance to the next slot
    ///
    /// The slot is released whatever the present result.
    pub fn present(&mut self, swapchain: &SwapchainManager, image_index: u32) -> VulkanResult<bool> {
        self.expect_state(SlotState::Presenting, "present")?;
        let semaphore = self.sets[self.current].render_finished.handle();
        let result = present(self.driver.as_ref(), swapchain.handle(), image_index, semaphore);
        self.states[self.current] = SlotState::Idle;
        self.current = (self.current + 1) % self.sets.len();
        result
    }

    /// Wait for every slot fence
    pub fn wait_all(&self) -> VulkanResult<()> {
        let fences: Vec<vk::Fence> = self.sets.iter().map(|set| set.in_flight.handle()).collect();
        wait_for_all_fences(self.driver.as_ref(), &fences)
    }

    /// Index of the current slot
    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Sync objects of the current slot
    pub fn current_set(&self) -> &FrameSyncSet {
        &self.sets[self.current]
    }

    /// State of slot `index`
    pub fn slot_state(&self, index: usize) -> Option<SlotState> {
        self.states.get(index).copied()
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.sets.len()
    }
}

impl Drop for FrameSyncEngine {
    fn drop(&mut self) {
        if let Err(e) = self.driver.device_wait_idle() {
            log::warn!("[SYNC] Device wait idle failed during teardown: {}", e);
        }
    }
}
