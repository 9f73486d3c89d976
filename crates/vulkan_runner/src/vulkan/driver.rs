//! GPU driver seam
//!
//! Platform-independent abstraction over the device-level Vulkan entry points this
//! crate uses. [`DeviceContext`](crate::vulkan::DeviceContext) implements it with
//! `ash`; tests implement it with a recording mock so every ordering rule (fence
//! waits, destroy order, "no driver call on bad input") can be checked without a GPU.
//!
//! # Threading
//! Not `Send + Sync`. All GPU object calls are issued from one thread, matching
//! Vulkan's external synchronization rules. The only cross-thread piece in the
//! crate is [`FrameCallbackSlot`](crate::vulkan::FrameCallbackSlot), which never
//! touches the driver.

use ash::vk;

use crate::vulkan::initialization::QueueFamilyIndices;
use crate::vulkan::VulkanResult;

/// One command buffer submission with its semaphore dependencies
#[derive(Debug, Clone, Copy)]
pub struct SubmitBatch<'a> {
    /// Command buffer to execute; null for a batch that only waits
    pub command_buffer: vk::CommandBuffer,
    /// Semaphores waited on before execution
    pub wait_semaphores: &'a [vk::Semaphore],
    /// Stage at which each wait semaphore is waited on
    pub wait_stages: &'a [vk::PipelineStageFlags],
    /// Semaphores signaled on completion
    pub signal_semaphores: &'a [vk::Semaphore],
}

impl<'a> SubmitBatch<'a> {
    /// Submission without any semaphore dependency
    pub fn command_buffer_only(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait_semaphores: &[],
            wait_stages: &[],
            signal_semaphores: &[],
        }
    }

    /// Submission that executes nothing and only consumes `wait_semaphores`
    pub fn wait_only(wait_semaphores: &'a [vk::Semaphore], wait_stages: &'a [vk::PipelineStageFlags]) -> Self {
        Self {
            command_buffer: vk::CommandBuffer::null(),
            wait_semaphores,
            wait_stages,
            signal_semaphores: &[],
        }
    }
}

/// Device-level Vulkan calls
pub trait GpuDriver {
    /// Graphics and present queue family indices
    fn queue_families(&self) -> QueueFamilyIndices;

    /// Queue used for rendering, uploads and submission
    fn graphics_queue(&self) -> vk::Queue;

    /// Queue used for presentation
    fn present_queue(&self) -> vk::Queue;

    /// Memory heaps and types of the physical device
    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties;

    /// Current surface capabilities
    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR>;

    /// Surface formats supported by the physical device
    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>>;

    /// Block until all queued GPU work completes
    fn device_wait_idle(&self) -> VulkanResult<()>;

    // Swapchain

    /// Create a swapchain
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VulkanResult<vk::SwapchainKHR>;
    /// Destroy a swapchain
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// Presentable images owned by the swapchain
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>>;
    /// Raw acquire; `Ok((index, suboptimal))` or the driver result code
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result>;
    /// Raw present; `Ok(suboptimal)` or the driver result code
    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result>;

    // Images, views, framebuffers, render passes

    /// Create an image
    fn create_image(&self, info: &vk::ImageCreateInfo) -> VulkanResult<vk::Image>;
    /// Destroy an image
    fn destroy_image(&self, image: vk::Image);
    /// Memory requirements for an image
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    /// Bind memory to an image at offset 0
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Create an image view
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VulkanResult<vk::ImageView>;
    /// Destroy an image view
    fn destroy_image_view(&self, view: vk::ImageView);
    /// Create a framebuffer
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VulkanResult<vk::Framebuffer>;
    /// Destroy a framebuffer
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Create a render pass
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VulkanResult<vk::RenderPass>;
    /// Destroy a render pass
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    // Buffers and memory

    /// Create a buffer
    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VulkanResult<vk::Buffer>;
    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: vk::Buffer);
    /// Memory requirements for a buffer
    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    /// Bind memory to a buffer at offset 0
    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()>;
    /// Allocate device memory
    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VulkanResult<vk::DeviceMemory>;
    /// Free device memory
    fn free_memory(&self, memory: vk::DeviceMemory);
    /// Map host-visible memory, copy `data` at `offset`, unmap
    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;

    // Pipeline objects

    /// Create a shader module from aligned SPIR-V words
    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;
    /// Destroy a shader module
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VulkanResult<vk::DescriptorSetLayout>;
    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    /// Create a pipeline layout
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VulkanResult<vk::PipelineLayout>;
    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    /// Create one graphics pipeline
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VulkanResult<vk::Pipeline>;
    /// Destroy a pipeline
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Descriptors

    /// Create a descriptor pool
    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo) -> VulkanResult<vk::DescriptorPool>;
    /// Destroy a descriptor pool and every set allocated from it
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    /// Allocate descriptor sets
    fn allocate_descriptor_sets(&self, info: &vk::DescriptorSetAllocateInfo) -> VulkanResult<Vec<vk::DescriptorSet>>;
    /// Apply descriptor writes
    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]);
    /// Create a sampler
    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler>;
    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: vk::Sampler);

    // Commands

    /// Create a command pool
    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VulkanResult<vk::CommandPool>;
    /// Destroy a command pool and every buffer allocated from it
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    /// Allocate command buffers
    fn allocate_command_buffers(&self, info: &vk::CommandBufferAllocateInfo) -> VulkanResult<Vec<vk::CommandBuffer>>;
    /// Return command buffers to their pool
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Reset a single command buffer
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Begin recording
    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> VulkanResult<()>;
    /// End recording
    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()>;
    /// Record vkCmdBeginRenderPass with inline contents
    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo);
    /// Record vkCmdEndRenderPass
    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer);
    /// Record a dynamic viewport
    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport);
    /// Record a dynamic scissor
    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D);
    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    /// Bind one descriptor set at set index 0
    fn cmd_bind_descriptor_set(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    /// Record push constants
    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    );
    /// Record a non-indexed draw
    fn cmd_draw(
        &self,
        buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    /// Record a single image memory barrier
    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    );
    /// Record a buffer to image copy
    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: &vk::BufferImageCopy,
    );

    // Synchronization

    /// Create a binary semaphore
    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore>;
    /// Destroy a semaphore
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// Create a fence, optionally in the signaled state
    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence>;
    /// Destroy a fence
    fn destroy_fence(&self, fence: vk::Fence);
    /// Wait until every fence is signaled
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VulkanResult<()>;
    /// Return fences to the unsignaled state
    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()>;
    /// Submit one batch; `fence` may be null
    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch<'_>, fence: vk::Fence) -> VulkanResult<()>;
    /// Block until the queue is idle
    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()>;
}
