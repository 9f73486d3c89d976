//! Sampled RGBA textures and staging uploads
//!
//! Textures are `R8G8B8A8_UNORM`, device local and sampled by the fragment
//! stage. Every upload goes through a host visible staging buffer copied on the
//! graphics queue and waits for the queue to go idle before returning. The layout
//! tracker only commits a new layout once the copy has been submitted, so a
//! failed upload leaves the texture in its previous state.

use ash::vk;
use std::cell::Cell;
use std::sync::{Arc, Mutex};

use crate::config::TextureConfig;
use crate::foundation::math::IDENTITY_4X4;
use crate::vulkan::initialization::find_memory_type;
use crate::vulkan::rendering::{CommandPool, CommandRecorder, COLOR_SUBRESOURCE};
use crate::vulkan::state::BlockingSubmitter;
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
const BYTES_PER_PIXEL: usize = 4;

/// Layout a texture image is known to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageLayoutState {
    /// Freshly created, contents undefined
    #[default]
    Undefined,
    /// Ready to receive a copy
    TransferDst,
    /// Ready to be sampled by the fragment shader
    ShaderReadOnly,
}

impl ImageLayoutState {
    /// Matching Vulkan layout
    pub fn vk_layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

/// One image memory barrier worth of layout change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

/// Tracks the layout of one texture image across uploads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayoutTracker {
    state: ImageLayoutState,
}

impl LayoutTracker {
    /// Current layout
    pub fn state(&self) -> ImageLayoutState {
        self.state
    }

    /// True once an upload has completed
    pub fn is_sampleable(&self) -> bool {
        self.state == ImageLayoutState::ShaderReadOnly
    }

    /// Move to `TransferDst` and return the barrier that gets there
    pub fn begin_upload(&mut self) -> VulkanResult<LayoutTransition> {
        let (src_stage, src_access) = match self.state {
            ImageLayoutState::Undefined => (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty()),
            ImageLayoutState::ShaderReadOnly => {
                (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
            }
            ImageLayoutState::TransferDst => {
                return Err(VulkanError::invalid_operation("upload already in progress"));
            }
        };
        let transition = LayoutTransition {
            old_layout: self.state.vk_layout(),
            new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            src_stage,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
            src_access,
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
        };
        self.state = ImageLayoutState::TransferDst;
        Ok(transition)
    }

    /// Move from `TransferDst` to `ShaderReadOnly` and return the barrier
    pub fn finish_upload(&mut self) -> VulkanResult<LayoutTransition> {
        if self.state != ImageLayoutState::TransferDst {
            return Err(VulkanError::invalid_operation(format!(
                "finish_upload from {:?}",
                self.state
            )));
        }
        self.state = ImageLayoutState::ShaderReadOnly;
        Ok(LayoutTransition {
            old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
        })
    }
}

/// Device local RGBA8 image with its memory and view
pub struct Texture {
    driver: Arc<dyn GpuDriver>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    width: u32,
    height: u32,
    layout: Cell<LayoutTracker>,
}

impl Texture {
    /// Allocate an uninitialized texture; upload before sampling it
    pub fn new(driver: Arc<dyn GpuDriver>, width: u32, height: u32) -> VulkanResult<Self> {
        if width == 0 || height == 0 {
            return Err(VulkanError::precondition(format!(
                "texture dimensions must be positive, got {width}x{height}"
            )));
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = driver.create_image(&image_info).map_err(|e| {
            log::error!("[TEXTURE] Image creation failed: {}", e);
            e
        })?;

        // Drop releases whatever exists so far if a later step fails
        let mut texture = Self {
            driver,
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            width,
            height,
            layout: Cell::default(),
        };

        let requirements = texture.driver.image_memory_requirements(image);
        let memory_type = find_memory_type(
            &texture.driver.memory_properties(),
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
        .ok_or(VulkanError::NoSuitableMemoryType)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        texture.memory = texture.driver.allocate_memory(&alloc_info)?;
        texture.driver.bind_image_memory(image, texture.memory)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(TEXTURE_FORMAT)
            .subresource_range(COLOR_SUBRESOURCE);
        texture.view = texture.driver.create_image_view(&view_info)?;

        log::debug!("[TEXTURE] Created {}x{} texture", width, height);
        Ok(texture)
    }

    /// Get the image handle
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Get the image view handle
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Width in texels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes a full upload must provide
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }

    /// Current image layout
    pub fn layout_state(&self) -> ImageLayoutState {
        self.layout.get().state()
    }

    /// True once pixel data has been uploaded
    pub fn is_sampleable(&self) -> bool {
        self.layout.get().is_sampleable()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        if self.view != vk::ImageView::null() {
            self.driver.destroy_image_view(self.view);
        }
        self.driver.destroy_image(self.image);
        if self.memory != vk::DeviceMemory::null() {
            self.driver.free_memory(self.memory);
        }
    }
}

/// Pixel data for an upload
#[derive(Debug, Clone, Copy)]
pub enum PixelSource<'a> {
    /// Tightly packed RGBA rows covering the whole texture
    Bytes(&'a [u8]),
    /// Every pixel set to one RGBA value
    Solid([u8; 4]),
}

/// Host visible buffer holding one upload
struct StagingBuffer {
    driver: Arc<dyn GpuDriver>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl StagingBuffer {
    fn new(driver: Arc<dyn GpuDriver>, data: &[u8]) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = driver.create_buffer(&buffer_info)?;

        let mut staging = Self {
            driver,
            buffer,
            memory: vk::DeviceMemory::null(),
        };

        let requirements = staging.driver.buffer_memory_requirements(buffer);
        let memory_type = find_memory_type(
            &staging.driver.memory_properties(),
            requirements.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
        .ok_or(VulkanError::NoSuitableMemoryType)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        staging.memory = staging.driver.allocate_memory(&alloc_info)?;
        staging.driver.bind_buffer_memory(buffer, staging.memory)?;
        staging.driver.write_memory(staging.memory, 0, data)?;
        Ok(staging)
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        self.driver.destroy_buffer(self.buffer);
        if self.memory != vk::DeviceMemory::null() {
            self.driver.free_memory(self.memory);
        }
    }
}

/// Copies pixel data into textures through a staging buffer
pub struct TextureUploader {
    driver: Arc<dyn GpuDriver>,
    submitter: BlockingSubmitter,
}

impl TextureUploader {
    /// Uploader submitting its copies on `driver`'s graphics queue
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        let submitter = BlockingSubmitter::new(Arc::clone(&driver));
        Self { driver, submitter }
    }

    /// Replace the full contents of `texture`
    ///
    /// Byte sources must match the texture size exactly; a mismatch is rejected
    /// before any GPU work. Returns once the copy has completed. Takes a shared
    /// reference so textures bound into descriptor sets can still be refreshed.
    pub fn upload(&self, texture: &Texture, source: PixelSource<'_>) -> VulkanResult<()> {
        let expected = texture.byte_size();
        let filled;
        let bytes = match source {
            PixelSource::Bytes(bytes) => {
                if bytes.len() != expected {
                    let e = VulkanError::precondition(format!(
                        "pixel data is {} bytes, {}x{} texture needs {}",
                        bytes.len(),
                        texture.width,
                        texture.height,
                        expected
                    ));
                    log::error!("[TEXTURE] {}", e);
                    return Err(e);
                }
                bytes
            }
            PixelSource::Solid(rgba) => {
                filled = rgba.repeat(expected / BYTES_PER_PIXEL);
                filled.as_slice()
            }
        };

        let mut layout = texture.layout.get();
        let to_transfer = layout.begin_upload()?;
        let to_shader = layout.finish_upload()?;

        let staging = StagingBuffer::new(Arc::clone(&self.driver), bytes).map_err(|e| {
            log::error!("[TEXTURE] Staging buffer setup failed: {}", e);
            e
        })?;
        let pool = CommandPool::transient(Arc::clone(&self.driver))?;
        let command_buffer = pool
            .allocate(1)?
            .first()
            .copied()
            .ok_or_else(|| VulkanError::invalid_operation("driver returned no command buffer"))?;

        let mut recorder = CommandRecorder::new(Arc::clone(&self.driver), command_buffer);
        recorder.begin()?;
        recorder.transition_image(texture.image, &to_transfer)?;
        recorder.copy_buffer_to_image(staging.buffer, texture.image, texture.width, texture.height)?;
        recorder.transition_image(texture.image, &to_shader)?;
        let command_buffer = recorder.end()?;

        self.submitter.submit(command_buffer).map_err(|e| {
            log::error!("[TEXTURE] Upload submit failed: {}", e);
            e
        })?;
        texture.layout.set(layout);
        log::trace!("[TEXTURE] Uploaded {} bytes", bytes.len());
        Ok(())
    }

    /// Texture filled with the configured test color
    pub fn create_test_texture(&self, config: &TextureConfig) -> VulkanResult<Texture> {
        let texture = Texture::new(Arc::clone(&self.driver), config.test_width, config.test_height)?;
        self.upload(&texture, PixelSource::Solid(config.test_color))?;
        log::info!(
            "[TEXTURE] Test texture {}x{} filled with {:?}",
            config.test_width,
            config.test_height,
            config.test_color
        );
        Ok(texture)
    }
}

/// Callback run when a new input frame is available
pub type FrameCallback = Arc<dyn Fn() + Send + Sync>;

/// Optional new-frame notification, settable from any thread
#[derive(Default)]
pub struct FrameCallbackSlot {
    callback: Mutex<Option<FrameCallback>>,
}

impl FrameCallbackSlot {
    /// Install `callback`, or clear the slot with `None`
    pub fn set(&self, callback: Option<FrameCallback>) {
        let cleared = callback.is_none();
        match self.callback.lock() {
            Ok(mut slot) => *slot = callback,
            Err(poisoned) => *poisoned.into_inner() = callback,
        }
        if cleared {
            log::debug!("[TEXTURE] Frame callback cleared");
        } else {
            log::debug!("[TEXTURE] Frame callback set");
        }
    }

    /// True if a callback is installed
    pub fn is_set(&self) -> bool {
        match self.callback.lock() {
            Ok(slot) => slot.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Invoke the callback, if any, outside the lock
    pub fn notify(&self) -> bool {
        let callback = match self.callback.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

/// Externally fed texture with frame metadata
///
/// The image is shared so descriptor sets sampling it can keep it alive, and the
/// callback slot is shared so producer threads can signal new frames without
/// borrowing the texture.
pub struct InputTexture {
    texture: Arc<Texture>,
    timestamp: i64,
    transform_matrix: [f32; 16],
    callback: Arc<FrameCallbackSlot>,
}

impl InputTexture {
    /// Create a texture and fill it with `initial_color` so it is sampleable at once
    pub fn new(uploader: &TextureUploader, width: u32, height: u32, initial_color: [u8; 4]) -> VulkanResult<Self> {
        let texture = Texture::new(Arc::clone(&uploader.driver), width, height)?;
        uploader.upload(&texture, PixelSource::Solid(initial_color))?;
        log::info!("[TEXTURE] Input texture {}x{} ready", width, height);
        Ok(Self {
            texture: Arc::new(texture),
            timestamp: 0,
            transform_matrix: IDENTITY_4X4,
            callback: Arc::default(),
        })
    }

    /// Upload a full frame of RGBA bytes
    pub fn update(&mut self, uploader: &TextureUploader, bytes: &[u8]) -> VulkanResult<()> {
        uploader.upload(&self.texture, PixelSource::Bytes(bytes))
    }

    /// Fill the whole texture with one color
    pub fn update_color(&mut self, uploader: &TextureUploader, rgba: [u8; 4]) -> VulkanResult<()> {
        uploader.upload(&self.texture, PixelSource::Solid(rgba))
    }

    /// Underlying texture
    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Shared reference to the image, for bindings that must outlive this handle
    pub fn shared_texture(&self) -> Arc<Texture> {
        Arc::clone(&self.texture)
    }

    /// View sampled by the filter
    pub fn view(&self) -> vk::ImageView {
        self.texture.view()
    }

    /// Texture coordinate transform, column-major
    pub fn transform_matrix(&self) -> [f32; 16] {
        self.transform_matrix
    }

    /// Replace the texture coordinate transform
    pub fn set_transform_matrix(&mut self, matrix: [f32; 16]) {
        self.transform_matrix = matrix;
    }

    /// Timestamp of the current frame, 0 until set
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Record the timestamp of the frame just uploaded
    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.timestamp = timestamp;
    }

    /// New-frame callback slot
    pub fn callbacks(&self) -> &FrameCallbackSlot {
        &self.callback
    }

    /// Owned handle to the callback slot, usable from any thread
    pub fn frame_notifier(&self) -> Arc<FrameCallbackSlot> {
        Arc::clone(&self.callback)
    }
}
