//! Command pools and command buffer recording
//!
//! [`CommandRecorder`] tracks where a command buffer is in its recording lifecycle
//! and rejects commands issued out of place. Rust callers record a render pass
//! through the [`ActiveRenderPass`] guard, which ends the pass when dropped; the
//! handle bridge drives the same recorder with explicit open and close calls.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use crate::foundation::math::IDENTITY_4X4;
use crate::vulkan::rendering::{GraphicsPipeline, PipelineLayout, RenderPass};
use crate::vulkan::resources::LayoutTransition;
use crate::vulkan::state::SwapchainManager;
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

/// Vertex stage push constant block: texture matrix then user matrix, column-major
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    /// Transform applied to texture coordinates
    pub tex_matrix: [f32; 16],
    /// Transform applied to positions
    pub user_matrix: [f32; 16],
}

/// Size of [`PushConstants`] in bytes
#[allow(clippy::cast_possible_truncation)]
pub const PUSH_CONSTANTS_SIZE: u32 = std::mem::size_of::<PushConstants>() as u32;

impl Default for PushConstants {
    fn default() -> Self {
        Self {
            tex_matrix: IDENTITY_4X4,
            user_matrix: IDENTITY_4X4,
        }
    }
}

impl PushConstants {
    /// Block from both matrices
    pub fn new(tex_matrix: [f32; 16], user_matrix: [f32; 16]) -> Self {
        Self { tex_matrix, user_matrix }
    }

    /// Block from 32 floats laid out as `[tex | user]`
    pub fn from_slice(values: &[f32]) -> VulkanResult<Self> {
        if values.len() != 32 {
            return Err(VulkanError::precondition(format!(
                "push constants need 32 floats, got {}",
                values.len()
            )));
        }
        let mut constants = Self::zeroed();
        constants.tex_matrix.copy_from_slice(&values[..16]);
        constants.user_matrix.copy_from_slice(&values[16..]);
        Ok(constants)
    }

    /// Raw bytes as pushed to the GPU
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    driver: Arc<dyn GpuDriver>,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool on `queue_family_index`
    ///
    /// Frame pools use `RESET_COMMAND_BUFFER`, upload pools `TRANSIENT`.
    pub fn new(
        driver: Arc<dyn GpuDriver>,
        queue_family_index: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> VulkanResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let command_pool = driver.create_command_pool(&create_info).map_err(|e| {
            log::error!("[COMMAND] Command pool creation failed: {}", e);
            e
        })?;
        log::debug!("[COMMAND] Command pool created on family {}", queue_family_index);
        Ok(Self { driver, command_pool })
    }

    /// Pool for per-frame buffers on the graphics family
    pub fn for_frames(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let family = driver.queue_families().graphics;
        Self::new(driver, family, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
    }

    /// Pool for short-lived upload buffers on the graphics family
    pub fn transient(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let family = driver.queue_families().graphics;
        Self::new(driver, family, vk::CommandPoolCreateFlags::TRANSIENT)
    }

    /// Allocate primary command buffers
    pub fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Err(VulkanError::precondition("command buffer count must be positive"));
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        self.driver.allocate_command_buffers(&alloc_info)
    }

    /// Return command buffers to the pool
    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            self.driver.free_command_buffers(self.command_pool, buffers);
        }
    }

    /// Reset one command buffer back to the initial state
    pub fn reset_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.driver.reset_command_buffer(buffer)
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }

    /// Driver the pool was created on
    pub fn driver(&self) -> &Arc<dyn GpuDriver> {
        &self.driver
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Frees every buffer allocated from the pool
        self.driver.destroy_command_pool(self.command_pool);
    }
}

/// Single mip, single layer color subresource
pub const COLOR_SUBRESOURCE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordingState {
    Initial,
    Recording,
    InRenderPass,
}

/// Type-safe command buffer recorder
pub struct CommandRecorder {
    driver: Arc<dyn GpuDriver>,
    command_buffer: vk::CommandBuffer,
    state: RecordingState,
}

impl CommandRecorder {
    /// Recorder for a freshly allocated or reset command buffer
    pub fn new(driver: Arc<dyn GpuDriver>, command_buffer: vk::CommandBuffer) -> Self {
        Self {
            driver,
            command_buffer,
            state: RecordingState::Initial,
        }
    }

    fn require(&self, expected: RecordingState, operation: &str) -> VulkanResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VulkanError::invalid_operation(format!(
                "{operation} while command buffer is {:?}",
                self.state
            )))
        }
    }

    /// Begin one-time-submit recording
    pub fn begin(&mut self) -> VulkanResult<&mut Self> {
        self.require(RecordingState::Initial, "begin")?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        self.driver.begin_command_buffer(self.command_buffer, &begin_info)?;
        self.state = RecordingState::Recording;
        Ok(self)
    }

    /// Begin `render_pass` on the framebuffer of `image_index` and return a guard
    ///
    /// Clears to `clear_color` and sets a full-extent viewport and scissor.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        swapchain: &SwapchainManager,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> VulkanResult<ActiveRenderPass<'_>> {
        self.open_render_pass(render_pass, swapchain, image_index, clear_color)?;
        Ok(ActiveRenderPass { recorder: self })
    }

    /// Begin a render pass without a guard; pair with [`Self::close_render_pass`]
    #[allow(clippy::cast_precision_loss)]
    pub fn open_render_pass(
        &mut self,
        render_pass: &RenderPass,
        swapchain: &SwapchainManager,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> VulkanResult<()> {
        self.require(RecordingState::Recording, "begin_render_pass")?;
        if image_index as usize >= swapchain.framebuffer_count() {
            return Err(VulkanError::precondition(format!(
                "image index {image_index} out of range for {} framebuffers",
                swapchain.framebuffer_count()
            )));
        }
        let framebuffer = swapchain.framebuffer(image_index)?;
        let extent = swapchain.extent();

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let render_pass_begin = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass.handle())
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        self.driver.cmd_begin_render_pass(self.command_buffer, &render_pass_begin);
        self.state = RecordingState::InRenderPass;

        self.set_viewport(0.0, 0.0, extent.width as f32, extent.height as f32)
    }

    /// End the render pass opened with [`Self::open_render_pass`]
    pub fn close_render_pass(&mut self) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "end_render_pass")?;
        self.driver.cmd_end_render_pass(self.command_buffer);
        self.state = RecordingState::Recording;
        Ok(())
    }

    /// Set the viewport to the given rectangle and the scissor to match it
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "set_viewport")?;
        let viewport = vk::Viewport {
            x,
            y,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D {
                x: x as i32,
                y: y as i32,
            },
            extent: vk::Extent2D {
                width: width.max(0.0) as u32,
                height: height.max(0.0) as u32,
            },
        };
        self.driver.cmd_set_viewport(self.command_buffer, viewport);
        self.driver.cmd_set_scissor(self.command_buffer, scissor);
        Ok(())
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "bind_pipeline")?;
        self.driver.cmd_bind_pipeline(self.command_buffer, pipeline.handle());
        Ok(())
    }

    /// Bind `set` at set index 0
    pub fn bind_descriptor_set(&mut self, layout: &PipelineLayout, set: vk::DescriptorSet) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "bind_descriptor_set")?;
        if set == vk::DescriptorSet::null() {
            return Err(VulkanError::precondition("null descriptor set"));
        }
        self.driver.cmd_bind_descriptor_set(self.command_buffer, layout.handle(), set);
        Ok(())
    }

    /// Push the vertex stage constant block
    pub fn push_constants(&mut self, layout: &PipelineLayout, constants: &PushConstants) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "push_constants")?;
        self.driver.cmd_push_constants(
            self.command_buffer,
            layout.handle(),
            vk::ShaderStageFlags::VERTEX,
            0,
            constants.as_bytes(),
        );
        Ok(())
    }

    /// Non-indexed draw
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> VulkanResult<()> {
        self.require(RecordingState::InRenderPass, "draw")?;
        self.driver
            .cmd_draw(self.command_buffer, vertex_count, instance_count, first_vertex, first_instance);
        Ok(())
    }

    /// Record a color image layout transition outside any render pass
    pub fn transition_image(&mut self, image: vk::Image, transition: &LayoutTransition) -> VulkanResult<()> {
        self.require(RecordingState::Recording, "transition_image")?;
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOR_SUBRESOURCE)
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build();
        self.driver
            .cmd_image_barrier(self.command_buffer, transition.src_stage, transition.dst_stage, &barrier);
        Ok(())
    }

    /// Copy tightly packed pixels from `src` into mip 0 of `dst`
    ///
    /// `dst` must already be in `TRANSFER_DST_OPTIMAL`.
    pub fn copy_buffer_to_image(&mut self, src: vk::Buffer, dst: vk::Image, width: u32, height: u32) -> VulkanResult<()> {
        self.require(RecordingState::Recording, "copy_buffer_to_image")?;
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .build();
        self.driver.cmd_copy_buffer_to_image(
            self.command_buffer,
            src,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &region,
        );
        Ok(())
    }

    /// Finish recording; the buffer is ready to submit
    pub fn end(&mut self) -> VulkanResult<vk::CommandBuffer> {
        self.require(RecordingState::Recording, "end")?;
        self.driver.end_command_buffer(self.command_buffer)?;
        self.state = RecordingState::Initial;
        Ok(self.command_buffer)
    }

    /// Forget recording state after the buffer was reset externally
    pub fn reset_state(&mut self) {
        self.state = RecordingState::Initial;
    }

    /// True between `begin` and `end`
    pub fn is_recording(&self) -> bool {
        self.state != RecordingState::Initial
    }

    /// Get the command buffer handle
    pub fn handle(&self) -> vk::CommandBuffer {
        self.command_buffer
    }
}

/// Render pass in progress; ends the pass when dropped
pub struct ActiveRenderPass<'a> {
    recorder: &'a mut CommandRecorder,
}

impl<'a> ActiveRenderPass<'a> {
    /// Set the viewport to the given rectangle and the scissor to match it
    pub fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) -> VulkanResult<()> {
        self.recorder.set_viewport(x, y, width, height)
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: &GraphicsPipeline) -> VulkanResult<()> {
        self.recorder.bind_pipeline(pipeline)
    }

    /// Bind `set` at set index 0
    pub fn bind_descriptor_set(&mut self, layout: &PipelineLayout, set: vk::DescriptorSet) -> VulkanResult<()> {
        self.recorder.bind_descriptor_set(layout, set)
    }

    /// Push the vertex stage constant block
    pub fn push_constants(&mut self, layout: &PipelineLayout, constants: &PushConstants) -> VulkanResult<()> {
        self.recorder.push_constants(layout, constants)
    }

    /// Non-indexed draw
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> VulkanResult<()> {
        self.recorder.draw(vertex_count, instance_count, first_vertex, first_instance)
    }
}

impl<'a> Drop for ActiveRenderPass<'a> {
    fn drop(&mut self) {
        if let Err(e) = self.recorder.close_render_pass() {
            log::error!("[COMMAND] Failed to end render pass: {}", e);
        }
    }
}
