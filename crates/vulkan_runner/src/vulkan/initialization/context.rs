//! Device context
//!
//! Owns the logical device, the physical device it was created from, the graphics
//! and present queues and the presentation surface. Implements [`GpuDriver`] with
//! `ash`, so every other module talks to the GPU through this type.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};
use std::collections::HashSet;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

use super::instance::VulkanInstance;
use super::selectors::{find_queue_family, QueueFamilyIndices};
use crate::vulkan::driver::{GpuDriver, SubmitBatch};
use crate::vulkan::{VulkanError, VulkanResult};

/// Logical device with its queues and surface
pub struct DeviceContext {
    instance: Arc<VulkanInstance>,
    physical_device: vk::PhysicalDevice,
    device: Device,
    swapchain_loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl DeviceContext {
    /// Create the device context for `surface`, taking ownership of the surface
    ///
    /// Selects the first enumerated physical device. The surface is destroyed if
    /// any later step fails.
    pub fn new(instance: Arc<VulkanInstance>, surface: vk::SurfaceKHR) -> VulkanResult<Self> {
        match Self::build(&instance, surface) {
            Ok(parts) => Ok(Self::assemble(instance, surface, parts)),
            Err(e) => {
                log::error!("[DEVICE] Device creation failed: {}", e);
                unsafe { instance.surface_loader().destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    fn build(instance: &VulkanInstance, surface: vk::SurfaceKHR) -> VulkanResult<DeviceParts> {
        let vk_instance = instance.instance();
        let devices = unsafe { vk_instance.enumerate_physical_devices() }.map_err(VulkanError::Api)?;
        let physical_device = *devices.first().ok_or(VulkanError::NoSuitableDevice)?;

        for (index, candidate) in devices.iter().enumerate() {
            let properties = unsafe { vk_instance.get_physical_device_properties(*candidate) };
            let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
            log::info!(
                "[DEVICE] GPU {}: {} (type {:?}, api {}.{}.{})",
                index,
                name.to_string_lossy(),
                properties.device_type,
                vk::api_version_major(properties.api_version),
                vk::api_version_minor(properties.api_version),
                vk::api_version_patch(properties.api_version),
            );
        }

        let families = unsafe { vk_instance.get_physical_device_queue_family_properties(physical_device) };
        let graphics = find_queue_family(&families, vk::QueueFlags::GRAPHICS, None::<fn(u32) -> bool>)
            .ok_or_else(|| VulkanError::InitializationFailed("No graphics queue family found".to_string()))?;
        let supports_present = |index: u32| unsafe {
            instance
                .surface_loader()
                .get_physical_device_surface_support(physical_device, index, surface)
                .unwrap_or(false)
        };
        let present = find_queue_family(&families, vk::QueueFlags::GRAPHICS, Some(supports_present))
            .ok_or_else(|| VulkanError::InitializationFailed("No present queue family found".to_string()))?;
        let families = QueueFamilyIndices { graphics, present };

        let unique: HashSet<u32> = families.unique().into_iter().collect();
        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions: [*const c_char; 1] = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { vk_instance.create_device(physical_device, &create_info, None) }.map_err(|e| {
            log::error!("[DEVICE] vkCreateDevice failed: {:?} ({})", e, e.as_raw());
            VulkanError::Api(e)
        })?;

        let graphics_queue = unsafe { device.get_device_queue(families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(families.present, 0) };
        let memory_properties = unsafe { vk_instance.get_physical_device_memory_properties(physical_device) };
        let swapchain_loader = SwapchainLoader::new(vk_instance, &device);

        log::info!(
            "[DEVICE] Logical device created (graphics family {}, present family {})",
            families.graphics,
            families.present
        );

        Ok(DeviceParts {
            physical_device,
            device,
            swapchain_loader,
            families,
            graphics_queue,
            present_queue,
            memory_properties,
        })
    }

    fn assemble(instance: Arc<VulkanInstance>, surface: vk::SurfaceKHR, parts: DeviceParts) -> Self {
        Self {
            instance,
            physical_device: parts.physical_device,
            device: parts.device,
            swapchain_loader: parts.swapchain_loader,
            surface,
            families: parts.families,
            graphics_queue: parts.graphics_queue,
            present_queue: parts.present_queue,
            memory_properties: parts.memory_properties,
        }
    }

    /// Physical device the context was created from
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Logical device dispatch table
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Presentation surface
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Instance this context belongs to
    pub fn instance(&self) -> &Arc<VulkanInstance> {
        &self.instance
    }
}

struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    device: Device,
    swapchain_loader: SwapchainLoader,
    families: QueueFamilyIndices,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("[DEVICE] Wait idle before teardown failed: {:?}", e);
            }
            self.device.destroy_device(None);
            self.instance.surface_loader().destroy_surface(self.surface, None);
        }
        log::debug!("[DEVICE] Device and surface destroyed");
    }
}

impl GpuDriver for DeviceContext {
    fn queue_families(&self) -> QueueFamilyIndices {
        self.families
    }

    fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.memory_properties
    }

    fn surface_capabilities(&self) -> VulkanResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .map_err(VulkanError::Api)
    }

    fn surface_formats(&self) -> VulkanResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.instance
                .surface_loader()
                .get_physical_device_surface_formats(self.physical_device, self.surface)
        }
        .map_err(VulkanError::Api)
    }

    fn device_wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(VulkanError::Api)
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> VulkanResult<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VulkanResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.map_err(VulkanError::Api)
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout, semaphore, vk::Fence::null())
        }
    }

    fn queue_present(
        &self,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    fn create_image(&self, info: &vk::ImageCreateInfo) -> VulkanResult<vk::Image> {
        unsafe { self.device.create_image(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_image(&self, image: vk::Image) {
        unsafe { self.device.destroy_image(image, None) }
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        unsafe { self.device.get_image_memory_requirements(image) }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe { self.device.bind_image_memory(image, memory, 0) }.map_err(VulkanError::Api)
    }

    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> VulkanResult<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> VulkanResult<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> VulkanResult<vk::RenderPass> {
        unsafe { self.device.create_render_pass(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device.destroy_render_pass(render_pass, None) }
    }

    fn create_buffer(&self, info: &vk::BufferCreateInfo) -> VulkanResult<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> VulkanResult<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }.map_err(VulkanError::Api)
    }

    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo) -> VulkanResult<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }.map_err(VulkanError::Api)
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }

    fn write_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        unsafe {
            let ptr = self
                .device
                .map_memory(memory, offset, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            self.device.unmap_memory(memory);
        }
        Ok(())
    }

    fn create_shader_module(&self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        unsafe { self.device.create_shader_module(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        unsafe { self.device.destroy_shader_module(module, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        info: &vk::DescriptorSetLayoutCreateInfo,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        unsafe { self.device.create_descriptor_set_layout(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> VulkanResult<vk::PipelineLayout> {
        unsafe { self.device.create_pipeline_layout(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        unsafe { self.device.destroy_pipeline_layout(layout, None) }
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> VulkanResult<vk::Pipeline> {
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| VulkanError::invalid_operation("driver returned no pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn create_descriptor_pool(&self, info: &vk::DescriptorPoolCreateInfo) -> VulkanResult<vk::DescriptorPool> {
        unsafe { self.device.create_descriptor_pool(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(&self, info: &vk::DescriptorSetAllocateInfo) -> VulkanResult<Vec<vk::DescriptorSet>> {
        unsafe { self.device.allocate_descriptor_sets(info) }.map_err(VulkanError::Api)
    }

    fn update_descriptor_sets(&self, writes: &[vk::WriteDescriptorSet]) {
        unsafe { self.device.update_descriptor_sets(writes, &[]) }
    }

    fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> VulkanResult<vk::Sampler> {
        unsafe { self.device.create_sampler(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_command_pool(&self, info: &vk::CommandPoolCreateInfo) -> VulkanResult<vk::CommandPool> {
        unsafe { self.device.create_command_pool(info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        unsafe { self.device.destroy_command_pool(pool, None) }
    }

    fn allocate_command_buffers(&self, info: &vk::CommandBufferAllocateInfo) -> VulkanResult<Vec<vk::CommandBuffer>> {
        unsafe { self.device.allocate_command_buffers(info) }.map_err(VulkanError::Api)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .map_err(VulkanError::Api)
    }

    fn begin_command_buffer(&self, buffer: vk::CommandBuffer, info: &vk::CommandBufferBeginInfo) -> VulkanResult<()> {
        unsafe { self.device.begin_command_buffer(buffer, info) }.map_err(VulkanError::Api)
    }

    fn end_command_buffer(&self, buffer: vk::CommandBuffer) -> VulkanResult<()> {
        unsafe { self.device.end_command_buffer(buffer) }.map_err(VulkanError::Api)
    }

    fn cmd_begin_render_pass(&self, buffer: vk::CommandBuffer, info: &vk::RenderPassBeginInfo) {
        unsafe {
            self.device
                .cmd_begin_render_pass(buffer, info, vk::SubpassContents::INLINE)
        }
    }

    fn cmd_end_render_pass(&self, buffer: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(buffer) }
    }

    fn cmd_set_viewport(&self, buffer: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device.cmd_set_viewport(buffer, 0, &[viewport]) }
    }

    fn cmd_set_scissor(&self, buffer: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device.cmd_set_scissor(buffer, 0, &[scissor]) }
    }

    fn cmd_bind_pipeline(&self, buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            )
        }
    }

    fn cmd_push_constants(
        &self,
        buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe { self.device.cmd_push_constants(buffer, layout, stages, offset, data) }
    }

    fn cmd_draw(
        &self,
        buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device
                .cmd_draw(buffer, vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    fn cmd_image_barrier(
        &self,
        buffer: vk::CommandBuffer,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier,
    ) {
        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(barrier),
            )
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: &vk::BufferImageCopy,
    ) {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(buffer, src, dst, dst_layout, std::slice::from_ref(region))
        }
    }

    fn create_semaphore(&self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout: u64) -> VulkanResult<()> {
        unsafe { self.device.wait_for_fences(fences, true, timeout) }.map_err(VulkanError::Api)
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(fences) }.map_err(VulkanError::Api)
    }

    fn queue_submit(&self, queue: vk::Queue, batch: &SubmitBatch<'_>, fence: vk::Fence) -> VulkanResult<()> {
        let command_buffers: &[vk::CommandBuffer] = if batch.command_buffer == vk::CommandBuffer::null() {
            &[]
        } else {
            std::slice::from_ref(&batch.command_buffer)
        };
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(batch.wait_semaphores)
            .wait_dst_stage_mask(batch.wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(batch.signal_semaphores)
            .build();
        unsafe { self.device.queue_submit(queue, &[submit_info], fence) }.map_err(VulkanError::Api)
    }

    fn queue_wait_idle(&self, queue: vk::Queue) -> VulkanResult<()> {
        unsafe { self.device.queue_wait_idle(queue) }.map_err(VulkanError::Api)
    }
}
