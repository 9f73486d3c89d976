//! Handle-based native boundary
//!
//! Exposes the runner as flat functions over opaque `u64` handles, one
//! [`HandleRegistry`] per object category. Nothing here panics or returns an
//! error: failures are logged once with a `[BRIDGE]` tag and turned into a
//! sentinel (`0`, `false`, `None`, or a packed failed acquire).
//!
//! Destroying a handle only drops the registry's reference. Objects that others
//! depend on are shared through `Arc`, so a pipeline layout destroyed while a
//! pipeline still uses it stays alive until the pipeline goes too.
//!
//! Handles are the only inputs. Raw Vulkan values such as image views may be
//! read out for inspection, but no function accepts one back: descriptor sets
//! are bound from a texture handle and devices are built from a surface handle.

use ash::vk::{self, Handle};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::config::RunnerConfig;
use crate::foundation::handles::HandleRegistry;
use crate::vulkan::initialization::{create_surface, DeviceContext, VulkanInstance};
use crate::vulkan::rendering::{
    CommandPool, CommandRecorder, DescriptorSetLayout, GraphicsPipeline, PipelineFactory, PipelineLayout,
    PushConstants, RenderPass, ShaderModule,
};
use crate::vulkan::resources::{
    DescriptorPool, DescriptorResourceManager, DescriptorSet, FrameCallback, FrameCallbackSlot, InputTexture, Sampler,
    Texture, TextureUploader,
};
use crate::vulkan::state::{self, AcquireOutcome, Fence, Semaphore, SwapchainManager};
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

/// Fill used for freshly created input textures
const INPUT_TEXTURE_INITIAL_COLOR: [u8; 4] = [0, 255, 0, 255];

struct InstanceEntry {
    instance: Arc<VulkanInstance>,
    config: RunnerConfig,
}

struct DeviceEntry {
    driver: Arc<dyn GpuDriver>,
    uploader: TextureUploader,
    config: RunnerConfig,
}

/// Presentation surface waiting to be handed to a device
struct SurfaceEntry {
    instance: Arc<VulkanInstance>,
    surface: vk::SurfaceKHR,
}

impl SurfaceEntry {
    /// Give up ownership of the surface
    fn take(mut self) -> vk::SurfaceKHR {
        std::mem::replace(&mut self.surface, vk::SurfaceKHR::null())
    }
}

impl Drop for SurfaceEntry {
    fn drop(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            log::debug!("[BRIDGE] Destroying unused surface");
            unsafe { self.instance.surface_loader().destroy_surface(self.surface, None) };
        }
    }
}

/// Descriptor set plus whatever it currently samples
///
/// The bound texture and sampler stay alive while the set refers to them, even
/// after their own handles are destroyed.
struct DescriptorSetEntry {
    set: DescriptorSet,
    binding: Option<(Arc<Texture>, Arc<Sampler>)>,
}

struct CommandBufferEntry {
    pool: Arc<CommandPool>,
    recorder: CommandRecorder,
}

/// Log a failure once and collapse it into the sentinel for `T`
fn report<T: Default>(operation: &str, result: VulkanResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            log::error!("[BRIDGE] {} failed: {}", operation, e);
            T::default()
        }
    }
}

/// Registries for every object handed across the boundary
pub struct NativeBridge {
    instances: HandleRegistry<InstanceEntry>,
    surfaces: HandleRegistry<SurfaceEntry>,
    devices: HandleRegistry<DeviceEntry>,
    swapchains: HandleRegistry<SwapchainManager>,
    render_passes: HandleRegistry<RenderPass>,
    set_layouts: HandleRegistry<Arc<DescriptorSetLayout>>,
    pipeline_layouts: HandleRegistry<Arc<PipelineLayout>>,
    shader_modules: HandleRegistry<ShaderModule>,
    pipelines: HandleRegistry<GraphicsPipeline>,
    descriptor_pools: HandleRegistry<Arc<DescriptorPool>>,
    descriptor_sets: HandleRegistry<DescriptorSetEntry>,
    samplers: HandleRegistry<Arc<Sampler>>,
    command_pools: HandleRegistry<Arc<CommandPool>>,
    command_buffers: HandleRegistry<CommandBufferEntry>,
    semaphores: HandleRegistry<Semaphore>,
    fences: HandleRegistry<Fence>,
    textures: HandleRegistry<InputTexture>,
}

impl Default for NativeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBridge {
    /// Bridge with every registry empty
    pub fn new() -> Self {
        Self {
            instances: HandleRegistry::new("instance"),
            surfaces: HandleRegistry::new("surface"),
            devices: HandleRegistry::new("device"),
            swapchains: HandleRegistry::new("swapchain"),
            render_passes: HandleRegistry::new("render pass"),
            set_layouts: HandleRegistry::new("descriptor set layout"),
            pipeline_layouts: HandleRegistry::new("pipeline layout"),
            shader_modules: HandleRegistry::new("shader module"),
            pipelines: HandleRegistry::new("pipeline"),
            descriptor_pools: HandleRegistry::new("descriptor pool"),
            descriptor_sets: HandleRegistry::new("descriptor set"),
            samplers: HandleRegistry::new("sampler"),
            command_pools: HandleRegistry::new("command pool"),
            command_buffers: HandleRegistry::new("command buffer"),
            semaphores: HandleRegistry::new("semaphore"),
            fences: HandleRegistry::new("fence"),
            textures: HandleRegistry::new("texture"),
        }
    }

    fn driver(&self, device: u64) -> VulkanResult<Arc<dyn GpuDriver>> {
        Ok(Arc::clone(&self.devices.get(device)?.driver))
    }

    // Instance and device

    /// Create an instance with the given window-system extensions
    pub fn create_instance(&mut self, config: &RunnerConfig, platform_extensions: &[String]) -> u64 {
        let result = config
            .validate()
            .map_err(VulkanError::InitializationFailed)
            .and_then(|()| VulkanInstance::new(config, platform_extensions))
            .map(|instance| {
                self.instances.insert(InstanceEntry {
                    instance: Arc::new(instance),
                    config: config.clone(),
                })
            });
        report("create_instance", result)
    }

    /// Wrap a native window in a surface owned by `instance`
    ///
    /// The window handles are only borrowed for the call.
    pub fn create_surface(&mut self, instance: u64, display: RawDisplayHandle, window: RawWindowHandle) -> u64 {
        let result = self.instances.get(instance).and_then(|entry| {
            let surface = create_surface(&entry.instance, display, window)?;
            Ok(SurfaceEntry {
                instance: Arc::clone(&entry.instance),
                surface,
            })
        });
        let result = result.map(|entry| self.surfaces.insert(entry));
        report("create_surface", result)
    }

    /// Destroy a surface that was never handed to a device
    pub fn destroy_surface(&mut self, surface: u64) -> bool {
        report("destroy_surface", self.surfaces.remove(surface).map(|_| true))
    }

    /// Create a surface for a native window and a device presenting to it
    pub fn create_device(&mut self, instance: u64, display: RawDisplayHandle, window: RawWindowHandle) -> u64 {
        let surface = self.create_surface(instance, display, window);
        if surface == 0 {
            return 0;
        }
        self.create_device_with_surface(instance, surface)
    }

    /// Create a device presenting to `surface`
    ///
    /// The surface handle is consumed whether or not the device comes up. It must
    /// have been created on `instance`.
    pub fn create_device_with_surface(&mut self, instance: u64, surface: u64) -> u64 {
        let result = self.instances.get(instance).map(|entry| (Arc::clone(&entry.instance), entry.config.clone()));
        let result = result.and_then(|(instance, config)| {
            let entry = self.surfaces.remove(surface)?;
            if !Arc::ptr_eq(&entry.instance, &instance) {
                return Err(VulkanError::precondition("surface belongs to another instance"));
            }
            let context = DeviceContext::new(instance, entry.take())?;
            Ok((Arc::new(context) as Arc<dyn GpuDriver>, config))
        });
        let result = result.map(|(driver, config)| self.adopt_device(driver, config));
        report("create_device_with_surface", result)
    }

    /// Register an existing driver as a device
    pub fn adopt_device(&mut self, driver: Arc<dyn GpuDriver>, config: RunnerConfig) -> u64 {
        let uploader = TextureUploader::new(Arc::clone(&driver));
        self.devices.insert(DeviceEntry {
            driver,
            uploader,
            config,
        })
    }

    /// Block until the device is idle
    pub fn device_wait_idle(&self, device: u64) -> bool {
        let result = self
            .devices
            .get(device)
            .and_then(|entry| state::device_wait_idle(entry.driver.as_ref()));
        report("device_wait_idle", result.map(|()| true))
    }

    /// Release the device handle; the device itself lives until its last object is gone
    pub fn destroy_device(&mut self, device: u64) -> bool {
        report("destroy_device", self.devices.remove(device).map(|_| true))
    }

    /// Release the instance handle; devices and surfaces built on it keep it alive
    pub fn destroy_instance(&mut self, instance: u64) -> bool {
        report("destroy_instance", self.instances.remove(instance).map(|_| true))
    }

    // Swapchain

    /// Swapchain sized to the surface using the device's swapchain settings
    pub fn create_swapchain(&mut self, device: u64) -> u64 {
        let result = self
            .devices
            .get(device)
            .and_then(|entry| SwapchainManager::new(Arc::clone(&entry.driver), &entry.config.swapchain))
            .map(|manager| self.swapchains.insert(manager));
        report("create_swapchain", result)
    }

    /// Recreate the swapchain and its framebuffers for a new window size
    pub fn resize_swapchain(&mut self, swapchain: u64, render_pass: u64, width: u32, height: u32) -> bool {
        let result = self.render_passes.get(render_pass).and_then(|pass| {
            let manager = self.swapchains.get_mut(swapchain)?;
            manager.resize(pass.handle(), width, height)
        });
        report("resize_swapchain", result.map(|_| true))
    }

    /// Build one framebuffer per swapchain image for `render_pass`
    pub fn create_framebuffers(&mut self, swapchain: u64, render_pass: u64) -> bool {
        let result = self.render_passes.get(render_pass).and_then(|pass| {
            let manager = self.swapchains.get_mut(swapchain)?;
            manager.create_framebuffers(pass.handle())
        });
        report("create_framebuffers", result.map(|()| true))
    }

    /// Number of images in the swapchain
    pub fn swapchain_image_count(&self, swapchain: u64) -> u32 {
        report(
            "swapchain_image_count",
            self.swapchains.get(swapchain).map(SwapchainManager::image_count),
        )
    }

    /// Raw image view of swapchain image `index`, for inspection only
    pub fn swapchain_image_view(&self, swapchain: u64, index: u32) -> u64 {
        let result = self
            .swapchains
            .get(swapchain)
            .and_then(|manager| manager.image_view(index))
            .map(|view| view.as_raw());
        report("swapchain_image_view", result)
    }

    /// Destroy the swapchain with its views and framebuffers
    pub fn destroy_swapchain(&mut self, swapchain: u64) -> bool {
        report("destroy_swapchain", self.swapchains.remove(swapchain).map(|_| true))
    }

    // Render pass and pipeline objects

    /// Render pass matching the color format of `swapchain`
    pub fn create_render_pass(&mut self, device: u64, swapchain: u64) -> u64 {
        let result = self.driver(device).and_then(|driver| {
            let format = self.swapchains.get(swapchain)?.format().format;
            RenderPass::new(driver, format)
        });
        let result = result.map(|pass| self.render_passes.insert(pass));
        report("create_render_pass", result)
    }

    /// Destroy a render pass; framebuffers built on it must be gone first
    pub fn destroy_render_pass(&mut self, render_pass: u64) -> bool {
        report("destroy_render_pass", self.render_passes.remove(render_pass).map(|_| true))
    }

    /// Set layout with one sampled image for the fragment stage
    pub fn create_descriptor_set_layout(&mut self, device: u64) -> u64 {
        let result = self
            .driver(device)
            .and_then(|driver| PipelineFactory::new(driver).create_descriptor_set_layout())
            .map(|layout| self.set_layouts.insert(Arc::new(layout)));
        report("create_descriptor_set_layout", result)
    }

    /// Release the set layout handle; pipeline layouts using it keep it alive
    pub fn destroy_descriptor_set_layout(&mut self, layout: u64) -> bool {
        report(
            "destroy_descriptor_set_layout",
            self.set_layouts.remove(layout).map(|_| true),
        )
    }

    /// Pipeline layout over `set_layout` with the vertex push constant block
    pub fn create_pipeline_layout(&mut self, device: u64, set_layout: u64) -> u64 {
        let result = self.driver(device).and_then(|driver| {
            let set_layout = Arc::clone(self.set_layouts.get(set_layout)?);
            PipelineFactory::new(driver).create_pipeline_layout(set_layout)
        });
        let result = result.map(|layout| self.pipeline_layouts.insert(Arc::new(layout)));
        report("create_pipeline_layout", result)
    }

    /// Release the pipeline layout handle; pipelines using it keep it alive
    pub fn destroy_pipeline_layout(&mut self, layout: u64) -> bool {
        report(
            "destroy_pipeline_layout",
            self.pipeline_layouts.remove(layout).map(|_| true),
        )
    }

    /// Shader module from SPIR-V bytes
    pub fn create_shader_module(&mut self, device: u64, spirv: &[u8]) -> u64 {
        let result = self
            .driver(device)
            .and_then(|driver| ShaderModule::from_bytes(driver, spirv))
            .map(|module| self.shader_modules.insert(module));
        report("create_shader_module", result)
    }

    /// Destroy a shader module
    pub fn destroy_shader_module(&mut self, module: u64) -> bool {
        report("destroy_shader_module", self.shader_modules.remove(module).map(|_| true))
    }

    /// Full-screen pipeline; the shader modules may be destroyed afterwards
    pub fn create_graphics_pipeline(
        &mut self,
        device: u64,
        render_pass: u64,
        pipeline_layout: u64,
        vertex_shader: u64,
        fragment_shader: u64,
    ) -> u64 {
        let result = self.driver(device).and_then(|driver| {
            let render_pass = self.render_passes.get(render_pass)?.handle();
            let layout = Arc::clone(self.pipeline_layouts.get(pipeline_layout)?);
            let vertex = self.shader_modules.get(vertex_shader)?;
            let fragment = self.shader_modules.get(fragment_shader)?;
            GraphicsPipeline::new(driver, render_pass, layout, vertex, fragment)
        });
        let result = result.map(|pipeline| self.pipelines.insert(pipeline));
        report("create_graphics_pipeline", result)
    }

    /// Destroy a pipeline, then any layouts only it still referenced
    pub fn destroy_pipeline(&mut self, pipeline: u64) -> bool {
        report("destroy_pipeline", self.pipelines.remove(pipeline).map(|_| true))
    }

    // Descriptors

    /// Pool with room for one combined image sampler set
    pub fn create_descriptor_pool(&mut self, device: u64) -> u64 {
        let result = self
            .driver(device)
            .and_then(|driver| DescriptorResourceManager::new(driver).create_descriptor_pool())
            .map(|pool| self.descriptor_pools.insert(Arc::new(pool)));
        report("create_descriptor_pool", result)
    }

    /// Release the pool handle; sets allocated from it keep it alive
    pub fn destroy_descriptor_pool(&mut self, pool: u64) -> bool {
        report("destroy_descriptor_pool", self.descriptor_pools.remove(pool).map(|_| true))
    }

    /// Linear clamp-to-edge sampler
    pub fn create_sampler(&mut self, device: u64) -> u64 {
        let result = self
            .driver(device)
            .and_then(|driver| DescriptorResourceManager::new(driver).create_sampler())
            .map(|sampler| self.samplers.insert(Arc::new(sampler)));
        report("create_sampler", result)
    }

    /// Release the sampler handle; descriptor sets bound to it keep it alive
    pub fn destroy_sampler(&mut self, sampler: u64) -> bool {
        report("destroy_sampler", self.samplers.remove(sampler).map(|_| true))
    }

    /// Set with `set_layout` from `pool`; the set keeps its pool alive
    pub fn allocate_descriptor_set(&mut self, device: u64, pool: u64, set_layout: u64) -> u64 {
        let result = self.driver(device).and_then(|driver| {
            let pool = Arc::clone(self.descriptor_pools.get(pool)?);
            let layout = self.set_layouts.get(set_layout)?;
            DescriptorResourceManager::new(driver).allocate_descriptor_set(pool, layout)
        });
        let result = result.map(|set| self.descriptor_sets.insert(DescriptorSetEntry { set, binding: None }));
        report("allocate_descriptor_set", result)
    }

    /// Bind the view of `texture` sampled through `sampler` into `set`
    ///
    /// The set holds the texture and sampler until it is rebound or destroyed, so
    /// destroying either handle afterwards cannot leave the set dangling.
    pub fn update_descriptor_set(&mut self, device: u64, set: u64, texture: u64, sampler: u64) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let texture = self.textures.get(texture)?.shared_texture();
            let sampler = Arc::clone(self.samplers.get(sampler)?);
            let entry = self.descriptor_sets.get_mut(set)?;
            DescriptorResourceManager::new(driver).update_descriptor_set(
                entry.set.handle(),
                texture.view(),
                sampler.handle(),
            )?;
            entry.binding = Some((texture, sampler));
            Ok(())
        });
        report("update_descriptor_set", result.map(|()| true))
    }

    /// Release the set handle together with the texture and sampler it samples
    ///
    /// The set itself is returned to the device when its pool is destroyed.
    pub fn destroy_descriptor_set(&mut self, device: u64, set: u64) -> bool {
        if !self.device_wait_idle(device) {
            return false;
        }
        report("destroy_descriptor_set", self.descriptor_sets.remove(set).map(|_| true))
    }

    // Command pools and buffers

    /// Pool on the graphics family whose buffers can be reset individually
    pub fn create_command_pool(&mut self, device: u64) -> u64 {
        let result = self
            .driver(device)
            .and_then(CommandPool::for_frames)
            .map(|pool| self.command_pools.insert(Arc::new(pool)));
        report("create_command_pool", result)
    }

    /// Release the pool handle; it is destroyed once its buffers are freed
    pub fn destroy_command_pool(&mut self, pool: u64) -> bool {
        report("destroy_command_pool", self.command_pools.remove(pool).map(|_| true))
    }

    /// Single primary buffer from `pool`
    pub fn allocate_command_buffer(&mut self, pool: u64) -> u64 {
        let mut handle = [0u64];
        if self.allocate_command_buffers(pool, &mut handle) {
            handle[0]
        } else {
            0
        }
    }

    /// Allocate `out.len()` buffers and write their handles into `out`
    pub fn allocate_command_buffers(&mut self, pool: u64, out: &mut [u64]) -> bool {
        let result = self.command_pools.get(pool).and_then(|pool| {
            let count = u32::try_from(out.len())
                .map_err(|_| VulkanError::precondition(format!("{} command buffers requested", out.len())))?;
            let buffers = pool.allocate(count)?;
            Ok((Arc::clone(pool), buffers))
        });
        let result = result.map(|(pool, buffers)| {
            for (slot, buffer) in out.iter_mut().zip(buffers) {
                let recorder = CommandRecorder::new(Arc::clone(pool.driver()), buffer);
                *slot = self.command_buffers.insert(CommandBufferEntry {
                    pool: Arc::clone(&pool),
                    recorder,
                });
            }
        });
        report("allocate_command_buffers", result.map(|()| true))
    }

    /// Free one buffer; its pool goes once no handle or buffer needs it
    pub fn free_command_buffer(&mut self, buffer: u64) -> bool {
        self.free_command_buffers(&[buffer])
    }

    /// Free every buffer in `buffers`; nothing is freed if any handle is stale
    pub fn free_command_buffers(&mut self, buffers: &[u64]) -> bool {
        let result = self.command_buffers.get_all(buffers).map(|_| ());
        if result.is_ok() {
            for &handle in buffers {
                if let Ok(entry) = self.command_buffers.remove(handle) {
                    entry.pool.free(&[entry.recorder.handle()]);
                }
            }
        }
        report("free_command_buffers", result.map(|()| true))
    }

    /// Reset the buffer so it can be recorded again
    pub fn reset_command_buffer(&mut self, buffer: u64) -> bool {
        let result = self.command_buffers.get_mut(buffer).and_then(|entry| {
            entry.pool.reset_buffer(entry.recorder.handle())?;
            entry.recorder.reset_state();
            Ok(())
        });
        report("reset_command_buffer", result.map(|()| true))
    }

    /// Start recording
    pub fn begin_command_buffer(&mut self, buffer: u64) -> bool {
        let result = self
            .command_buffers
            .get_mut(buffer)
            .and_then(|entry| entry.recorder.begin().map(|_| ()));
        report("begin_command_buffer", result.map(|()| true))
    }

    /// Finish recording; fails inside an open render pass
    pub fn end_command_buffer(&mut self, buffer: u64) -> bool {
        let result = self
            .command_buffers
            .get_mut(buffer)
            .and_then(|entry| entry.recorder.end().map(|_| ()));
        report("end_command_buffer", result.map(|()| true))
    }

    /// Begin `render_pass` on the framebuffer of swapchain image `image_index`
    pub fn begin_render_pass(
        &mut self,
        buffer: u64,
        render_pass: u64,
        swapchain: u64,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> bool {
        let result = self.render_passes.get(render_pass).and_then(|pass| {
            let manager = self.swapchains.get(swapchain)?;
            let entry = self.command_buffers.get_mut(buffer)?;
            entry.recorder.open_render_pass(pass, manager, image_index, clear_color)
        });
        report("begin_render_pass", result.map(|()| true))
    }

    /// Close the render pass opened by `begin_render_pass`
    pub fn end_render_pass(&mut self, buffer: u64) -> bool {
        let result = self
            .command_buffers
            .get_mut(buffer)
            .and_then(|entry| entry.recorder.close_render_pass());
        report("end_render_pass", result.map(|()| true))
    }

    /// Set viewport and scissor to the given pixel rectangle
    #[allow(clippy::cast_precision_loss)]
    pub fn set_viewport(&mut self, buffer: u64, x: i32, y: i32, width: i32, height: i32) -> bool {
        let result = self.command_buffers.get_mut(buffer).and_then(|entry| {
            entry
                .recorder
                .set_viewport(x as f32, y as f32, width as f32, height as f32)
        });
        report("set_viewport", result.map(|()| true))
    }

    /// Bind a graphics pipeline inside the render pass
    pub fn bind_pipeline(&mut self, buffer: u64, pipeline: u64) -> bool {
        let result = self.pipelines.get(pipeline).and_then(|pipeline| {
            let entry = self.command_buffers.get_mut(buffer)?;
            entry.recorder.bind_pipeline(pipeline)
        });
        report("bind_pipeline", result.map(|()| true))
    }

    /// Bind `set` at index 0 of `pipeline_layout`
    pub fn bind_descriptor_sets(&mut self, buffer: u64, pipeline_layout: u64, set: u64) -> bool {
        let result = self.pipeline_layouts.get(pipeline_layout).and_then(|layout| {
            let set = self.descriptor_sets.get(set)?.set.handle();
            let entry = self.command_buffers.get_mut(buffer)?;
            entry.recorder.bind_descriptor_set(layout, set)
        });
        report("bind_descriptor_sets", result.map(|()| true))
    }

    /// Push 32 floats: texture matrix then user matrix, both column-major
    pub fn push_constants(&mut self, buffer: u64, pipeline_layout: u64, values: &[f32]) -> bool {
        let result = self.pipeline_layouts.get(pipeline_layout).and_then(|layout| {
            let constants = PushConstants::from_slice(values)?;
            let entry = self.command_buffers.get_mut(buffer)?;
            entry.recorder.push_constants(layout, &constants)
        });
        report("push_constants", result.map(|()| true))
    }

    /// Record a non-indexed draw
    pub fn draw(
        &mut self,
        buffer: u64,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> bool {
        let result = self.command_buffers.get_mut(buffer).and_then(|entry| {
            entry
                .recorder
                .draw(vertex_count, instance_count, first_vertex, first_instance)
        });
        report("draw", result.map(|()| true))
    }

    // Synchronization

    /// Create one sync set per slot of the output slices, which must be equally long
    ///
    /// Fences start signaled. Nothing is registered if any creation fails.
    pub fn create_sync_objects(
        &mut self,
        device: u64,
        image_available: &mut [u64],
        render_finished: &mut [u64],
        in_flight: &mut [u64],
    ) -> bool {
        let count = image_available.len();
        let result = self.driver(device).and_then(|driver| {
            if render_finished.len() != count || in_flight.len() != count {
                return Err(VulkanError::precondition(format!(
                    "sync output arrays differ in length ({count}, {}, {})",
                    render_finished.len(),
                    in_flight.len()
                )));
            }
            state::create_sync_objects(&driver, count)
        });
        let result = result.map(|sets| {
            for (i, set) in sets.into_iter().enumerate() {
                image_available[i] = self.semaphores.insert(set.image_available);
                render_finished[i] = self.semaphores.insert(set.render_finished);
                in_flight[i] = self.fences.insert(set.in_flight);
            }
        });
        report("create_sync_objects", result.map(|()| true))
    }

    /// Wait for the device to go idle, then destroy every listed sync object
    ///
    /// Stale handles are logged and skipped; the result is `false` if any were.
    pub fn destroy_sync_objects(
        &mut self,
        device: u64,
        image_available: &[u64],
        render_finished: &[u64],
        in_flight: &[u64],
    ) -> bool {
        if !self.device_wait_idle(device) {
            return false;
        }
        let mut all_found = true;
        for &handle in image_available.iter().chain(render_finished) {
            all_found &= report("destroy_sync_objects", self.semaphores.remove(handle).map(|_| true));
        }
        for &handle in in_flight {
            all_found &= report("destroy_sync_objects", self.fences.remove(handle).map(|_| true));
        }
        all_found
    }

    /// Block until the fence signals
    pub fn wait_for_fence(&self, fence: u64) -> bool {
        let result = self.fences.get(fence).and_then(Fence::wait);
        report("wait_for_fence", result.map(|()| true))
    }

    /// Return the fence to unsignaled
    pub fn reset_fence(&self, fence: u64) -> bool {
        let result = self.fences.get(fence).and_then(Fence::reset);
        report("reset_fence", result.map(|()| true))
    }

    /// Block until every fence in `fences` signals
    pub fn wait_for_all_fences(&self, device: u64, fences: &[u64]) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let handles: Vec<vk::Fence> = self.fences.get_all(fences)?.iter().map(|f| f.handle()).collect();
            state::wait_for_all_fences(driver.as_ref(), &handles)
        });
        report("wait_for_all_fences", result.map(|()| true))
    }

    /// Acquire the next image signaling `semaphore`, as a packed [`AcquireOutcome`]
    ///
    /// Bad handles yield a packed `Failed(ERROR_UNKNOWN)`, never a success.
    pub fn acquire_next_image(&self, device: u64, swapchain: u64, semaphore: u64) -> u64 {
        let result = self.driver(device).and_then(|driver| {
            let swapchain = self.swapchains.get(swapchain)?.handle();
            let semaphore = self.semaphores.get(semaphore)?.handle();
            Ok(state::acquire_next_image(driver.as_ref(), swapchain, semaphore))
        });
        match result {
            Ok(outcome) => outcome.pack(),
            Err(e) => {
                log::error!("[BRIDGE] acquire_next_image failed: {}", e);
                AcquireOutcome::Failed(vk::Result::ERROR_UNKNOWN).pack()
            }
        }
    }

    /// Submit and wait for the graphics queue to drain
    pub fn submit_command_buffer(&self, device: u64, buffer: u64) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let buffer = self.command_buffers.get(buffer)?.recorder.handle();
            state::BlockingSubmitter::new(driver).submit(buffer)
        });
        report("submit_command_buffer", result.map(|()| true))
    }

    /// Submit waiting on `wait`, signaling `signal` and the unsignaled `fence`
    pub fn submit_command_buffer_with_sync(
        &self,
        device: u64,
        buffer: u64,
        wait: u64,
        signal: u64,
        fence: u64,
    ) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let buffer = self.command_buffers.get(buffer)?.recorder.handle();
            let wait = self.semaphores.get(wait)?.handle();
            let signal = self.semaphores.get(signal)?.handle();
            let fence = self.fences.get(fence)?.handle();
            state::PipelinedSubmitter::new(driver).submit(buffer, wait, signal, fence)
        });
        report("submit_command_buffer_with_sync", result.map(|()| true))
    }

    /// Present `image_index` after `wait`; suboptimal still counts as presented
    pub fn present_image(&self, device: u64, swapchain: u64, image_index: u32, wait: u64) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let swapchain = self.swapchains.get(swapchain)?.handle();
            let wait = self.semaphores.get(wait)?.handle();
            state::present(driver.as_ref(), swapchain, image_index, wait)
        });
        report("present_image", result.map(|_| true))
    }

    /// Present with a timestamp in nanoseconds; the timestamp is only logged
    pub fn present_image_with_timestamp(
        &self,
        device: u64,
        swapchain: u64,
        image_index: u32,
        wait: u64,
        timestamp: i64,
    ) -> bool {
        let result = self.driver(device).and_then(|driver| {
            let swapchain = self.swapchains.get(swapchain)?.handle();
            let wait = self.semaphores.get(wait)?.handle();
            state::present_with_timestamp(driver.as_ref(), swapchain, image_index, wait, timestamp)
        });
        report("present_image_with_timestamp", result.map(|_| true))
    }

    // Textures

    /// Texture of the configured test size and fill
    pub fn create_test_texture(&mut self, device: u64) -> u64 {
        let result = self.devices.get(device).and_then(|entry| {
            let texture = &entry.config.texture;
            InputTexture::new(&entry.uploader, texture.test_width, texture.test_height, texture.test_color)
        });
        let result = result.map(|texture| self.textures.insert(texture));
        report("create_test_texture", result)
    }

    /// Input texture filled with opaque green until the first update
    pub fn create_input_texture(&mut self, device: u64, width: u32, height: u32) -> u64 {
        let result = self
            .devices
            .get(device)
            .and_then(|entry| InputTexture::new(&entry.uploader, width, height, INPUT_TEXTURE_INITIAL_COLOR))
            .map(|texture| self.textures.insert(texture));
        report("create_input_texture", result)
    }

    /// Replace the texture contents with `width * height * 4` RGBA bytes
    pub fn update_input_texture(&mut self, device: u64, texture: u64, bytes: &[u8]) -> bool {
        let result = self.devices.get(device).and_then(|entry| {
            let texture = self.textures.get_mut(texture)?;
            texture.update(&entry.uploader, bytes)
        });
        report("update_input_texture", result.map(|()| true))
    }

    /// Fill the whole texture with one RGBA color
    pub fn update_input_texture_color(&mut self, device: u64, texture: u64, rgba: [u8; 4]) -> bool {
        let result = self.devices.get(device).and_then(|entry| {
            let texture = self.textures.get_mut(texture)?;
            texture.update_color(&entry.uploader, rgba)
        });
        report("update_input_texture_color", result.map(|()| true))
    }

    /// Raw image view of the texture, for inspection only
    pub fn texture_image_view(&self, texture: u64) -> u64 {
        report(
            "texture_image_view",
            self.textures.get(texture).map(|t| t.view().as_raw()),
        )
    }

    /// Texture coordinate transform as 16 column-major floats
    pub fn texture_transform_matrix(&self, texture: u64) -> Option<[f32; 16]> {
        report(
            "texture_transform_matrix",
            self.textures.get(texture).map(|t| Some(t.transform_matrix())),
        )
    }

    /// Set the texture coordinate transform from 16 column-major floats
    pub fn set_texture_transform_matrix(&mut self, texture: u64, matrix: &[f32]) -> bool {
        let result = <[f32; 16]>::try_from(matrix)
            .map_err(|_| VulkanError::precondition(format!("transform needs 16 floats, got {}", matrix.len())))
            .and_then(|matrix| {
                self.textures.get_mut(texture)?.set_transform_matrix(matrix);
                Ok(())
            });
        report("set_texture_transform_matrix", result.map(|()| true))
    }

    /// Timestamp of the last frame written into the texture
    pub fn texture_timestamp(&self, texture: u64) -> i64 {
        report("texture_timestamp", self.textures.get(texture).map(InputTexture::timestamp))
    }

    /// Record the timestamp of the frame just written
    pub fn set_texture_timestamp(&mut self, texture: u64, timestamp: i64) -> bool {
        let result = self.textures.get_mut(texture).map(|t| t.set_timestamp(timestamp));
        report("set_texture_timestamp", result.map(|()| true))
    }

    /// Install or clear the new-frame callback
    pub fn set_frame_callback(&self, texture: u64, callback: Option<FrameCallback>) -> bool {
        let result = self.textures.get(texture).map(|t| t.callbacks().set(callback));
        report("set_frame_callback", result.map(|()| true))
    }

    /// Run the new-frame callback; `false` if none is installed
    pub fn notify_frame(&self, texture: u64) -> bool {
        report("notify_frame", self.textures.get(texture).map(|t| t.callbacks().notify()))
    }

    /// Callback slot of `texture` for a producer thread to signal new frames on
    ///
    /// The slot stays usable after the texture handle is destroyed.
    pub fn frame_notifier(&self, texture: u64) -> Option<Arc<FrameCallbackSlot>> {
        report(
            "frame_notifier",
            self.textures.get(texture).map(|t| Some(t.frame_notifier())),
        )
    }

    /// Destroy a texture handle once the device has finished with it
    ///
    /// Descriptor sets still sampling the texture keep its image alive.
    pub fn destroy_texture(&mut self, device: u64, texture: u64) -> bool {
        if !self.device_wait_idle(device) {
            return false;
        }
        report("destroy_texture", self.textures.remove(texture).map(|_| true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::mock::MockDriver;
    use crate::vulkan::rendering::pipeline::fake_spirv;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bridge() -> (Arc<MockDriver>, NativeBridge, u64) {
        let mock = Arc::new(MockDriver::new());
        let mut bridge = NativeBridge::new();
        let device = bridge.adopt_device(mock.clone(), RunnerConfig::default());
        (mock, bridge, device)
    }

    #[test]
    fn test_zero_and_stale_handles_return_sentinels() {
        let (mock, mut bridge, device) = bridge();
        mock.clear_calls();

        assert_eq!(bridge.create_swapchain(0), 0);
        assert_eq!(bridge.swapchain_image_count(0), 0);
        assert_eq!(bridge.texture_timestamp(0), 0);
        assert!(bridge.texture_transform_matrix(0).is_none());
        assert!(!bridge.wait_for_fence(0));
        assert!(!bridge.begin_command_buffer(12345));
        assert_eq!(
            AcquireOutcome::unpack(bridge.acquire_next_image(device, 0, 0)),
            AcquireOutcome::Failed(vk::Result::ERROR_UNKNOWN)
        );
        assert!(mock.calls().is_empty());

        let sampler = bridge.create_sampler(device);
        assert_ne!(sampler, 0);
        assert!(bridge.destroy_sampler(sampler));
        assert!(!bridge.destroy_sampler(sampler));
        assert!(mock.double_destroys().is_empty());
    }

    #[test]
    fn test_frame_through_handles() {
        let (mock, mut bridge, device) = bridge();

        let swapchain = bridge.create_swapchain(device);
        let render_pass = bridge.create_render_pass(device, swapchain);
        assert!(bridge.create_framebuffers(swapchain, render_pass));
        assert_eq!(bridge.swapchain_image_count(swapchain), 3);
        assert_ne!(bridge.swapchain_image_view(swapchain, 2), 0);
        assert_eq!(bridge.swapchain_image_view(swapchain, 3), 0);

        let set_layout = bridge.create_descriptor_set_layout(device);
        let pipeline_layout = bridge.create_pipeline_layout(device, set_layout);
        let vert = bridge.create_shader_module(device, &fake_spirv(8));
        let frag = bridge.create_shader_module(device, &fake_spirv(8));
        let pipeline = bridge.create_graphics_pipeline(device, render_pass, pipeline_layout, vert, frag);
        assert_ne!(pipeline, 0);
        assert!(bridge.destroy_shader_module(vert));
        assert!(bridge.destroy_shader_module(frag));

        let pool = bridge.create_descriptor_pool(device);
        let set = bridge.allocate_descriptor_set(device, pool, set_layout);
        let sampler = bridge.create_sampler(device);
        let texture = bridge.create_input_texture(device, 4, 4);
        assert!(bridge.update_descriptor_set(device, set, texture, sampler));

        let command_pool = bridge.create_command_pool(device);
        let mut buffers = [0u64; 2];
        assert!(bridge.allocate_command_buffers(command_pool, &mut buffers));
        assert!(buffers.iter().all(|&b| b != 0));

        let mut image_available = [0u64; 2];
        let mut render_finished = [0u64; 2];
        let mut in_flight = [0u64; 2];
        assert!(bridge.create_sync_objects(device, &mut image_available, &mut render_finished, &mut in_flight));

        assert!(bridge.wait_for_fence(in_flight[0]));
        assert!(bridge.reset_fence(in_flight[0]));
        let outcome = AcquireOutcome::unpack(bridge.acquire_next_image(device, swapchain, image_available[0]));
        let index = outcome.image_index().unwrap();

        let cb = buffers[0];
        assert!(bridge.begin_command_buffer(cb));
        assert!(bridge.begin_render_pass(cb, render_pass, swapchain, index, [0.0; 4]));
        assert!(bridge.set_viewport(cb, 0, 0, 640, 480));
        assert!(bridge.bind_pipeline(cb, pipeline));
        assert!(bridge.bind_descriptor_sets(cb, pipeline_layout, set));
        assert!(!bridge.push_constants(cb, pipeline_layout, &[0.0; 31]));
        assert!(bridge.push_constants(cb, pipeline_layout, &[1.0; 32]));
        assert!(bridge.draw(cb, 3, 1, 0, 0));
        assert!(bridge.end_render_pass(cb));
        assert!(bridge.end_command_buffer(cb));

        assert!(bridge.submit_command_buffer_with_sync(
            device,
            cb,
            image_available[0],
            render_finished[0],
            in_flight[0]
        ));
        assert!(bridge.present_image(device, swapchain, index, render_finished[0]));
        assert!(bridge.wait_for_all_fences(device, &in_flight));

        let submit = mock.submits.borrow().last().cloned().unwrap();
        assert_eq!(submit.wait_semaphores.len(), 1);
        assert_eq!(submit.signal_semaphores.len(), 1);
        assert_ne!(submit.fence, 0);
        assert_eq!(mock.last_push.borrow().len(), 128);
        assert_eq!(mock.viewports.borrow().last().unwrap().width as u32, 640);

        assert!(bridge.free_command_buffers(&buffers));
        assert!(!bridge.free_command_buffer(buffers[0]));
        assert!(bridge.destroy_sync_objects(device, &image_available, &render_finished, &in_flight));
    }

    #[test]
    fn test_destroyed_layout_outlives_its_pipeline() {
        let (mock, mut bridge, device) = bridge();
        let swapchain = bridge.create_swapchain(device);
        let render_pass = bridge.create_render_pass(device, swapchain);
        let set_layout = bridge.create_descriptor_set_layout(device);
        let pipeline_layout = bridge.create_pipeline_layout(device, set_layout);
        let vert = bridge.create_shader_module(device, &fake_spirv(8));
        let frag = bridge.create_shader_module(device, &fake_spirv(8));
        let pipeline = bridge.create_graphics_pipeline(device, render_pass, pipeline_layout, vert, frag);

        mock.clear_calls();
        assert!(bridge.destroy_pipeline_layout(pipeline_layout));
        assert!(bridge.destroy_descriptor_set_layout(set_layout));
        assert_eq!(mock.count("destroy_pipeline_layout"), 0);
        assert_eq!(mock.count("destroy_descriptor_set_layout"), 0);

        assert!(bridge.destroy_pipeline(pipeline));
        let pipeline_at = mock.position("destroy_pipeline").unwrap();
        let layout_at = mock.position("destroy_pipeline_layout").unwrap();
        let set_layout_at = mock.position("destroy_descriptor_set_layout").unwrap();
        assert!(pipeline_at < layout_at && layout_at < set_layout_at);
    }

    #[test]
    fn test_command_pool_outlives_handle_until_buffers_freed() {
        let (mock, mut bridge, device) = bridge();
        let pool = bridge.create_command_pool(device);
        let buffer = bridge.allocate_command_buffer(pool);
        assert_ne!(buffer, 0);

        assert!(bridge.destroy_command_pool(pool));
        assert_eq!(mock.count("destroy_command_pool"), 0);
        assert!(bridge.reset_command_buffer(buffer));
        assert!(bridge.free_command_buffer(buffer));
        assert_eq!(mock.count("destroy_command_pool"), 1);
    }

    #[test]
    fn test_sync_arrays_must_match() {
        let (mock, mut bridge, device) = bridge();
        let mut a = [0u64; 2];
        let mut b = [0u64; 1];
        let mut c = [0u64; 2];
        assert!(!bridge.create_sync_objects(device, &mut a, &mut b, &mut c));
        assert_eq!(mock.count("create_semaphore"), 0);
        assert_eq!(a, [0, 0]);
    }

    #[test]
    fn test_texture_handles() {
        let (mock, mut bridge, device) = bridge();
        let test_texture = bridge.create_test_texture(device);
        assert_ne!(test_texture, 0);
        assert_eq!(mock.last_write.borrow().len(), 1920 * 1080 * 4);
        assert_eq!(&mock.last_write.borrow()[..4], &[122, 255, 0, 255]);

        let texture = bridge.create_input_texture(device, 2, 2);
        assert_eq!(&mock.last_write.borrow()[..4], &[0, 255, 0, 255]);
        assert!(!bridge.update_input_texture(device, texture, &[0u8; 15]));
        assert!(bridge.update_input_texture(device, texture, &[7u8; 16]));
        assert!(bridge.update_input_texture_color(device, texture, [1, 2, 3, 4]));

        assert_eq!(bridge.texture_timestamp(texture), 0);
        assert!(bridge.set_texture_timestamp(texture, 99));
        assert_eq!(bridge.texture_timestamp(texture), 99);
        assert!(!bridge.set_texture_transform_matrix(texture, &[0.0; 4]));
        let mut matrix = [0.0f32; 16];
        matrix[0] = 2.0;
        assert!(bridge.set_texture_transform_matrix(texture, &matrix));
        approx::assert_relative_eq!(bridge.texture_transform_matrix(texture).unwrap()[0], 2.0);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        assert!(!bridge.notify_frame(texture));
        assert!(bridge.set_frame_callback(
            texture,
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        ));
        assert!(bridge.notify_frame(texture));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(bridge.destroy_texture(device, texture));
        assert!(bridge.destroy_texture(device, test_texture));
        assert_eq!(bridge.texture_image_view(texture), 0);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_descriptor_set_takes_texture_handles_only() {
        let (mock, mut bridge, device) = bridge();
        let set_layout = bridge.create_descriptor_set_layout(device);
        let pool = bridge.create_descriptor_pool(device);
        let set = bridge.allocate_descriptor_set(device, pool, set_layout);
        let sampler = bridge.create_sampler(device);
        let texture = bridge.create_input_texture(device, 2, 2);
        let view = bridge.texture_image_view(texture);
        assert_ne!(view, 0);

        mock.clear_calls();
        assert!(!bridge.update_descriptor_set(device, set, view, sampler));
        assert!(bridge.destroy_texture(device, texture));
        assert!(!mock.is_live(view));
        assert!(!bridge.update_descriptor_set(device, set, texture, sampler));
        assert_eq!(mock.count("update_descriptor_sets"), 0);
    }

    #[test]
    fn test_bound_texture_and_sampler_outlive_their_handles() {
        let (mock, mut bridge, device) = bridge();
        let set_layout = bridge.create_descriptor_set_layout(device);
        let pool = bridge.create_descriptor_pool(device);
        let set = bridge.allocate_descriptor_set(device, pool, set_layout);
        let sampler = bridge.create_sampler(device);
        let first = bridge.create_input_texture(device, 2, 2);
        let second = bridge.create_input_texture(device, 2, 2);
        let first_view = bridge.texture_image_view(first);
        let second_view = bridge.texture_image_view(second);

        assert!(bridge.update_descriptor_set(device, set, first, sampler));
        assert!(bridge.destroy_texture(device, first));
        assert!(bridge.destroy_sampler(sampler));
        assert!(mock.is_live(first_view));
        assert_eq!(mock.count("destroy_sampler"), 0);

        // Rebinding drops the previous texture
        let sampler = bridge.create_sampler(device);
        assert!(bridge.update_descriptor_set(device, set, second, sampler));
        assert!(!mock.is_live(first_view));
        assert_eq!(mock.count("destroy_sampler"), 1);

        assert!(bridge.destroy_texture(device, second));
        assert!(bridge.destroy_sampler(sampler));
        assert!(mock.is_live(second_view));

        assert!(bridge.destroy_descriptor_set(device, set));
        assert!(!mock.is_live(second_view));
        assert_eq!(mock.count("destroy_sampler"), 2);
        assert!(!bridge.destroy_descriptor_set(device, set));
        assert!(mock.double_destroys().is_empty());
    }

    #[test]
    fn test_device_needs_a_registered_surface() {
        let (mock, mut bridge, _device) = bridge();
        mock.clear_calls();

        assert_eq!(bridge.create_device_with_surface(0, 0), 0);
        assert_eq!(bridge.create_device_with_surface(0, 0x1234), 0);
        assert!(!bridge.destroy_surface(0));
        assert!(!bridge.destroy_surface(0x1234));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_frame_notifier_reaches_producer_thread() {
        let (_mock, mut bridge, device) = bridge();
        let texture = bridge.create_input_texture(device, 2, 2);
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        assert!(bridge.set_frame_callback(
            texture,
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
        ));

        let notifier = bridge.frame_notifier(texture).unwrap();
        let producer = std::thread::spawn(move || notifier.notify());
        assert!(producer.join().unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let notifier = bridge.frame_notifier(texture).unwrap();
        assert!(bridge.destroy_texture(device, texture));
        assert!(std::thread::spawn(move || notifier.notify()).join().unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(bridge.frame_notifier(texture).is_none());
    }
}
