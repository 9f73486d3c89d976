//! Recording driver for tests
//!
//! Hands out fake handles, keeps every call in order and tracks which objects are
//! alive so tests can check destroy order, leaks and "no driver call" guarantees.
//! Fences follow a small model: a submitted fence stays pending until the CPU
//! waits on it, which is when the simulated GPU finishes the work.

use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::vulkan::driver::{GpuDriver, SubmitBatch};
use crate::vulkan::initialization::QueueFamilyIndices;
use crate::vulkan::{VulkanError, VulkanResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending,
}

/// Fields of the last swapchain create info
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwapchainRecord {
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub format: vk::Format,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_index_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
}

/// One queue submission
#[derive(Debug, Clone)]
pub(crate) struct SubmitRecord {
    pub command_buffer: u64,
    pub wait_semaphores: Vec<u64>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<u64>,
    pub fence: u64,
}

pub(crate) struct MockDriver {
    next_handle: Cell<u64>,
    calls: RefCell<Vec<(&'static str, u64)>>,
    live: RefCell<HashSet<u64>>,
    double_destroys: RefCell<Vec<u64>>,
    failures: RefCell<HashMap<&'static str, (usize, vk::Result)>>,
    fences: RefCell<HashMap<u64, FenceState>>,
    swapchain_lengths: RefCell<HashMap<u64, u32>>,
    acquire_script: RefCell<VecDeque<Result<(u32, bool), vk::Result>>>,
    present_script: RefCell<VecDeque<Result<bool, vk::Result>>>,
    acquire_counter: Cell<u32>,
    pub families: Cell<QueueFamilyIndices>,
    pub capabilities: RefCell<vk::SurfaceCapabilitiesKHR>,
    pub formats: RefCell<Vec<vk::SurfaceFormatKHR>>,
    pub swapchain_image_count: Cell<Option<u32>>,
    pub swapchains: RefCell<Vec<SwapchainRecord>>,
    pub submits: RefCell<Vec<SubmitRecord>>,
    pub last_write: RefCell<Vec<u8>>,
    pub last_push: RefCell<Vec<u8>>,
    pub viewports: RefCell<Vec<vk::Viewport>>,
}

impl MockDriver {
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        Self {
            next_handle: Cell::new(0x1000),
            calls: RefCell::default(),
            live: RefCell::default(),
            double_destroys: RefCell::default(),
            failures: RefCell::default(),
            fences: RefCell::default(),
            swapchain_lengths: RefCell::default(),
            acquire_script: RefCell::default(),
            present_script: RefCell::default(),
            acquire_counter: Cell::new(0),
            families: Cell::new(QueueFamilyIndices { graphics: 0, present: 0 }),
            capabilities: RefCell::new(capabilities),
            formats: RefCell::new(vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }]),
            swapchain_image_count: Cell::new(None),
            swapchains: RefCell::default(),
            submits: RefCell::default(),
            last_write: RefCell::default(),
            last_push: RefCell::default(),
            viewports: RefCell::default(),
        }
    }

    /// Surface that leaves the extent to the application
    pub fn with_undefined_extent(self) -> Self {
        self.capabilities.borrow_mut().current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        self
    }

    /// Make the call named `name` fail after `skip` successful calls
    pub fn fail_after(&self, name: &'static str, skip: usize, result: vk::Result) {
        self.failures.borrow_mut().insert(name, (skip, result));
    }

    /// Make the next call named `name` fail
    pub fn fail_next(&self, name: &'static str, result: vk::Result) {
        self.fail_after(name, 0, result);
    }

    pub fn script_acquire(&self, results: impl IntoIterator<Item = Result<(u32, bool), vk::Result>>) {
        self.acquire_script.borrow_mut().extend(results);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = Result<bool, vk::Result>>) {
        self.present_script.borrow_mut().extend(results);
    }

    pub fn calls(&self) -> Vec<(&'static str, u64)> {
        self.calls.borrow().clone()
    }

    pub fn call_names(&self) -> Vec<&'static str> {
        self.calls.borrow().iter().map(|(name, _)| *name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|(n, _)| *n == name).count()
    }

    /// Handles recorded with calls named `name`, in call order
    pub fn handles(&self, name: &str) -> Vec<u64> {
        self.calls
            .borrow()
            .iter()
            .filter(|(n, _)| *n == name)
            .map(|(_, h)| *h)
            .collect()
    }

    /// Index of the first call named `name`
    pub fn position(&self, name: &str) -> Option<usize> {
        self.calls.borrow().iter().position(|(n, _)| *n == name)
    }

    /// Index of the last call named `name`
    pub fn last_position(&self, name: &str) -> Option<usize> {
        self.calls.borrow().iter().rposition(|(n, _)| *n == name)
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn live_objects(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.live.borrow().contains(&raw)
    }

    pub fn double_destroys(&self) -> Vec<u64> {
        self.double_destroys.borrow().clone()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.fences.borrow().get(&fence.as_raw()) == Some(&FenceState::Signaled)
    }

    fn record(&self, name: &'static str, raw: u64) {
        self.calls.borrow_mut().push((name, raw));
    }

    fn check(&self, name: &'static str) -> VulkanResult<()> {
        let mut failures = self.failures.borrow_mut();
        if let Some((skip, result)) = failures.get_mut(name) {
            if *skip == 0 {
                let result = *result;
                failures.remove(name);
                self.record(name, 0);
                return Err(VulkanError::Api(result));
            }
            *skip -= 1;
        }
        Ok(())
    }

    fn next_raw(&self) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        raw
    }

    fn create<H: Handle>(&self, name: &'static str) -> VulkanResult<H> {
        self.check(name)?;
        let raw = self.next_raw();
        self.live.borrow_mut().insert(raw);
        self.record(name, raw);
        Ok(H::from_raw(raw))
    }

    fn destroy<H: Handle>(&self, name: &'static str, handle: H) {
        let raw = handle.as_raw();
        self.record(name, raw);
        if raw != 0 && !self.live.borrow_mut().remove(&raw) {
            self.double_destroys.borrow_mut().push(raw);
        }
    }

    fn unowned<H: Handle>(&self, count: u32) -> Vec<H> {
        (0..count).map(|_| H::from_raw(self.next_raw())).collect()
    }
}

impl GpuDriver for MockDriver {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.families.get()
    }

    fn graphics_queue(&self) -> vk::Queue {
        vk::Queue::from_raw(0x10)
    }

    fn present_queue(&self) -> vk::Queue {
        let families = self.families.get();
        vk::Queue::from_raw(if families.is_shared() { 0x10 } else { 0x20 })
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 1,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        self.check("surface_capabilities")?;
        self.record("surface_capabilities", 0);
        Ok(*self.capabilities.borrow())
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        self.check("surface_formats")?;
        Ok(self.formats.borrow().clone())
    }

    fn device_wait_idle(&self) -> VulkanResult<()> {
        self.check("device_wait_idle")?;
        self.record("device_wait_idle", 0);
        for state in self.fences.borrow_mut().values_mut() {
            if *state == FenceState::Pending {
                *state = FenceState::Signaled;
            }
        }
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VulkanResult<vk::SwapchainKHR> {
        let swapchain: vk::SwapchainKHR = self.create("create_swapchain")?;
        self.swapchains.borrow_mut().push(SwapchainRecord {
            extent: info.image_extent,
            min_image_count: info.min_image_count,
            format: info.image_format,
            sharing_mode: info.image_sharing_mode,
            queue_family_index_count: info.queue_family_index_count,
            present_mode: info.present_mode,
            old_swapchain: info.old_swapchain,
        });
        let length = self.swapchain_image_count.get().unwrap_or(info.min_image_count);
        self.swapchain_lengths.borrow_mut().insert(swapchain.as_raw(), length);
        Ok(swapchain)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.destroy("destroy_swapchain", swapchain);
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        self.check("swapchain_images")?;
        self.record("swapchain_images", swapchain.as_raw());
        let length = self
            .swapchain_lengths
            .borrow()
            .get(&swapchain.as_raw())
            .copied()
            .unwrap_or(0);
        Ok(self.unowned(length))
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        self.record("acquire_next_image", semaphore.as_raw());
        if let Some(result) = self.acquire_script.borrow_mut().pop_front() {
            return result;
        }
        let length = self
            .swapchain_lengths
            .borrow()
            .get(&swapchain.as_raw())
            .copied()
            .unwrap_or(1)
            .max(1);
        let index = self.acquire_counter.get();
        self.acquire_counter.set(index + 1);
        Ok((index % length, false))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        self.record("queue_present", u64::from(image_index));
        self.present_script.borrow_mut().pop_front().unwrap_or(Ok(false))
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo) -> VulkanResult<vk::Image> {
        self.create("create_image")
    }

    fn destroy_image(&self, image: vk::Image) {
        self.destroy("destroy_image", image);
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn bind_image_memory(&self, image: vk::Image, _memory: vk::DeviceMemory) -> VulkanResult<()> {
        self.check("bind_image_memory")?;
        self.record("bind_image_memory", image.as_raw());
        Ok(())
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> VulkanResult<vk::ImageView> {
        self.create("create_image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("destroy_image_view", view);
    }

    fn create_framebuffer(&self, _info: &vk::FramebufferCreateInfo) -> VulkanResult<vk::Framebuffer> {
        self.create("create_framebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("destroy_framebuffer", framebuffer);
    }

    fn create_render_pass(&self, _info: &vk::RenderPassCreateInfo) -> VulkanResult<vk::RenderPass> {
        self.create("create_render_pass")
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("destroy_render_pass", render_pass);
    }

    fn create_buffer(&self, _info: &vk::BufferCreateInfo) -> VulkanResult<vk::Buffer> {
        self.create("create_buffer")
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.destroy("destroy_buffer", buffer);
    }

    fn buffer_memory_requirements(&self, _buffer: vk::Buffer) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b11,
        }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, _memory: vk::DeviceMemory) -> VulkanResult<()> {
        self.check("bind_buffer_memory")?;
        self.record("bind_buffer_memory", buffer.as_raw());
        Ok(())
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VulkanResult<vk::DeviceMemory> {
        let memory: vk::DeviceMemory = self.create("allocate_memory")?;
        self.record("memory_type", u64::from(info.memory_type_index));
        Ok(memory)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.destroy("free_memory", memory);
    }

    fn write_memory(&self, memory: vk::DeviceMemory, _offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        self.check("write_memory")?;
        self.record("write_memory", memory.as_raw());
        *self.last_write.borrow_mut() = data.to_vec();
        Ok(())
    }

    fn create_shader_module(&self, _code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        self.create("create_shader_module")
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("destroy_shader_module", module);
    }

    fn create_descriptor_set_layout(
        &self,
        _info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        self.create("create_descriptor_set_layout")
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.destroy("destroy_descriptor_set_layout", layout);
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VulkanResult<vk::PipelineLayout> {
        let layout: vk::PipelineLayout = self.create("create_pipeline_layout")?;
        self.record("push_constant_ranges", u64::from(info.push_constant_range_count));
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("destroy_pipeline_layout", layout);
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VulkanResult<vk::Pipeline> {
        let pipeline: vk::Pipeline = self.create("create_graphics_pipeline")?;
        self.record("pipeline_stages", u64::from(info.stage_count));
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("destroy_pipeline", pipeline);
    }

    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo) -> VulkanResult<vk::DescriptorPool> {
        let pool: vk::DescriptorPool = self.create("create_descriptor_pool")?;
        self.record("descriptor_pool_max_sets", u64::from(info.max_sets));
        Ok(pool)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.destroy("destroy_descriptor_pool", pool);
    }

    fn allocate_descriptor_sets(&self, info: &vk::DescriptorSetAllocateInfo) -> VulkanResult<Vec<vk::DescriptorSet>> {
        self.check("allocate_descriptor_sets")?;
        self.record("allocate_descriptor_sets", info.descriptor_pool.as_raw());
        Ok(self.unowned(info.descriptor_set_count))
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        for write in writes {
            self.record("update_descriptor_sets", write.dst_set.as_raw());
        }
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler> {
        self.create("create_sampler")
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.destroy("destroy_sampler", sampler);
    }

    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VulkanResult<vk::CommandPool> {
        let pool: vk::CommandPool = self.create("create_command_pool")?;
        self.record("command_pool_flags", u64::from(info.flags.as_raw()));
        Ok(pool)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.destroy("destroy_command_pool", pool);
    }

    fn allocate_command_buffers(&self, info: &vk::CommandBufferAllocateInfo) -> VulkanResult<Vec<vk::CommandBuffer>> {
        self.check("allocate_command_buffers")?;
        self.record("allocate_command_buffers", u64::from(info.command_buffer_count));
        Ok(self.unowned(info.command_buffer_count))
    }

    fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        for buffer in buffers {
            self.record("free_command_buffers", buffer.as_raw());
        }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.check("reset_command_buffer")?;
        self.record("reset_command_buffer", buffer.as_raw());
        Ok(())
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, _info: &vk::CommandBufferBeginInfo) -> VulkanResult<()> {
        self.check("begin_command_buffer")?;
        self.record("begin_command_buffer", buffer.as_raw());
        Ok(())
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.check("end_command_buffer")?;
        self.record("end_command_buffer", buffer.as_raw());
        Ok(())
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        self.record("cmd_begin_render_pass", info.framebuffer.as_raw());
        let _ = buffer;
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        self.record("cmd_end_render_pass", buffer.as_raw());
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        self.record("cmd_set_viewport", buffer.as_raw());
        self.viewports.borrow_mut().push(viewport);
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.record("cmd_set_scissor", buffer.as_raw());
    }

    fn cmd_bind_pipeline(&self, _buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record("cmd_bind_pipeline", pipeline.as_raw());
    }

    fn cmd_bind_descriptor_set(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.record("cmd_bind_descriptor_set", set.as_raw());
    }

    fn cmd_push_constants(
        &self,
        _buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        assert_eq!(stages, vk::ShaderStageFlags::VERTEX);
        assert_eq!(offset, 0);
        self.record("cmd_push_constants", data.len() as u64);
        *self.last_push.borrow_mut() = data.to_vec();
    }

    fn cmd_draw(
        &self,
        _buffer: vk::CommandBuffer,
        vertex_count: u32,
        _instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record("cmd_draw", u64::from(vertex_count));
    }

    fn cmd_image_barrier(
        &self,
        _buffer: vk::CommandBuffer,
        _src_stage: vk::PipelineStageFlags,
        _dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        // Packs (old, new) layouts so tests can assert transitions
        let packed = (u64::from(barrier.old_layout.as_raw() as u32) << 32) | u64::from(barrier.new_layout.as_raw() as u32);
        self.record("cmd_image_barrier", packed);
    }

    fn cmd_copy_buffer_to_image(
        &self,
        _buffer: vk::CommandBuffer,
        _src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        _region: &vk::BufferImageCopy,
    ) {
        assert_eq!(dst_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        self.record("cmd_copy_buffer_to_image", dst.as_raw());
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        self.create("create_semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("destroy_semaphore", semaphore);
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let fence: vk::Fence = self.create("create_fence")?;
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        self.fences.borrow_mut().insert(fence.as_raw(), state);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.borrow_mut().remove(&fence.as_raw());
        self.destroy("destroy_fence", fence);
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], _timeout: u64) -> VulkanResult<()> {
        self.check("wait_for_fences")?;
        let mut states = self.fences.borrow_mut();
        for fence in fences {
            self.record("wait_for_fences", fence.as_raw());
            match states.get_mut(&fence.as_raw()) {
                Some(state @ FenceState::Pending) => *state = FenceState::Signaled,
                Some(FenceState::Signaled) => {}
                // Nothing will ever signal it; a real wait would hang
                Some(FenceState::Unsignaled) | None => return Err(VulkanError::Api(vk::Result::TIMEOUT)),
            }
        }
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()> {
        self.check("reset_fences")?;
        let mut states = self.fences.borrow_mut();
        for fence in fences {
            self.record("reset_fences", fence.as_raw());
            match states.get_mut(&fence.as_raw()) {
                Some(FenceState::Pending) | None => return Err(VulkanError::Api(vk::Result::ERROR_UNKNOWN)),
                Some(state) => *state = FenceState::Unsignaled,
            }
        }
        Ok(())
    }

    fn queue_submit(&self, _queue: vk::Queue, batch: &SubmitBatch<'_>, fence: vk::Fence) -> VulkanResult<()> {
        self.check("queue_submit")?;
        if fence != vk::Fence::null() {
            let mut states = self.fences.borrow_mut();
            match states.get_mut(&fence.as_raw()) {
                Some(state @ FenceState::Unsignaled) => *state = FenceState::Pending,
                // Submitting with a fence that is not unsignaled is a usage error
                _ => return Err(VulkanError::Api(vk::Result::ERROR_UNKNOWN)),
            }
        }
        self.record("queue_submit", fence.as_raw());
        self.submits.borrow_mut().push(SubmitRecord {
            command_buffer: batch.command_buffer.as_raw(),
            wait_semaphores: batch.wait_semaphores.iter().map(|s| s.as_raw()).collect(),
            wait_stages: batch.wait_stages.to_vec(),
            signal_semaphores: batch.signal_semaphores.iter().map(|s| s.as_raw()).collect(),
            fence: fence.as_raw(),
        });
        Ok(())
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()> {
        self.check("queue_wait_idle")?;
        self.record("queue_wait_idle", queue.as_raw());
        Ok(())
    }
}
