//! Swapchain lifecycle
//!
//! Owns the swapchain, its image views and the framebuffers built over them, and
//! rebuilds all three on resize. Images belong to the swapchain and are never
//! destroyed here.

use ash::vk;
use std::sync::Arc;

use crate::config::SwapchainConfig;
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

/// Handles and parameters describing the current swapchain
#[derive(Debug, Clone, Default)]
pub struct SwapchainInfo {
    /// Swapchain handle
    pub swapchain: vk::SwapchainKHR,
    /// Presentable images (owned by the swapchain)
    pub images: Vec<vk::Image>,
    /// One identity view per image
    pub image_views: Vec<vk::ImageView>,
    /// One framebuffer per view, empty until a render pass is attached
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Surface format in use
    pub format: vk::SurfaceFormatKHR,
    /// Image extent
    pub extent: vk::Extent2D,
}

impl SwapchainInfo {
    /// True when images, views and framebuffers line up one to one
    pub fn is_complete(&self) -> bool {
        !self.images.is_empty()
            && self.images.len() == self.image_views.len()
            && self.image_views.len() == self.framebuffers.len()
    }
}

/// Result of a successful resize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    /// Extent of the new swapchain
    pub extent: vk::Extent2D,
    /// Number of images in the new swapchain
    pub image_count: u32,
    /// True when the image count differs from before the resize
    pub image_count_changed: bool,
}

/// Swapchain plus the per-image views and framebuffers
pub struct SwapchainManager {
    driver: Arc<dyn GpuDriver>,
    info: SwapchainInfo,
    fallback_extent: vk::Extent2D,
}

impl SwapchainManager {
    /// Create the swapchain and its image views
    ///
    /// Framebuffers are built separately with [`Self::create_framebuffers`] once a
    /// render pass exists.
    pub fn new(driver: Arc<dyn GpuDriver>, config: &SwapchainConfig) -> VulkanResult<Self> {
        let caps = driver.surface_capabilities()?;
        let formats = driver.surface_formats()?;
        let format = choose_surface_format(&formats, config.preferred_surface_format())?;
        let fallback_extent = config.fallback_extent();
        let extent = if caps.current_extent.width == u32::MAX {
            fallback_extent
        } else {
            caps.current_extent
        };

        let swapchain = create_swapchain(driver.as_ref(), &caps, format, extent, vk::SwapchainKHR::null())?;
        let images = match driver.swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                driver.destroy_swapchain(swapchain);
                return Err(e);
            }
        };
        let image_views = match create_image_views(driver.as_ref(), &images, format.format) {
            Ok(views) => views,
            Err(e) => {
                driver.destroy_swapchain(swapchain);
                return Err(e);
            }
        };

        log::info!(
            "[SWAPCHAIN] Created {}x{} with {} images ({:?})",
            extent.width,
            extent.height,
            images.len(),
            format.format
        );

        Ok(Self {
            driver,
            info: SwapchainInfo {
                swapchain,
                images,
                image_views,
                framebuffers: Vec::new(),
                format,
                extent,
            },
            fallback_extent,
        })
    }

    /// Build one framebuffer per image view for `render_pass`
    ///
    /// Existing framebuffers are destroyed first. On failure the list is left empty.
    pub fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        if render_pass == vk::RenderPass::null() {
            return Err(VulkanError::precondition("framebuffers need a render pass"));
        }
        self.destroy_framebuffers();

        let mut framebuffers = Vec::with_capacity(self.info.image_views.len());
        for (i, view) in self.info.image_views.iter().enumerate() {
            let attachments = [*view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.info.extent.width)
                .height(self.info.extent.height)
                .layers(1);

            match self.driver.create_framebuffer(&create_info) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    log::error!("[SWAPCHAIN] Framebuffer {} creation failed: {}", i, e);
                    for framebuffer in framebuffers {
                        self.driver.destroy_framebuffer(framebuffer);
                    }
                    return Err(e);
                }
            }
        }

        log::debug!("[SWAPCHAIN] {} framebuffers created", framebuffers.len());
        self.info.framebuffers = framebuffers;
        Ok(())
    }

    /// Recreate the swapchain for a new window size
    ///
    /// Waits for the device to go idle first. After an error the manager holds no
    /// views or framebuffers but a valid swapchain handle, and calling `resize`
    /// again is always allowed.
    pub fn resize(&mut self, render_pass: vk::RenderPass, width: u32, height: u32) -> VulkanResult<ResizeOutcome> {
        if width == 0 || height == 0 {
            return Err(VulkanError::precondition(format!("cannot resize to {width}x{height}")));
        }
        log::info!("[SWAPCHAIN] Resizing to {}x{}", width, height);

        self.driver.device_wait_idle()?;
        let previous_count = self.info.images.len();

        self.destroy_framebuffers();
        self.destroy_image_views();
        self.info.images.clear();

        let caps = self.driver.surface_capabilities()?;
        let extent = if caps.current_extent.width == u32::MAX {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        } else {
            caps.current_extent
        };

        let old_swapchain = self.info.swapchain;
        let swapchain = create_swapchain(self.driver.as_ref(), &caps, self.info.format, extent, old_swapchain)?;
        self.driver.destroy_swapchain(old_swapchain);
        self.info.swapchain = swapchain;
        self.info.extent = extent;

        self.info.images = self.driver.swapchain_images(swapchain)?;
        match create_image_views(self.driver.as_ref(), &self.info.images, self.info.format.format) {
            Ok(views) => self.info.image_views = views,
            Err(e) => {
                self.info.images.clear();
                return Err(e);
            }
        }
        self.create_framebuffers(render_pass)?;

        let image_count = self.image_count();
        let image_count_changed = previous_count != self.info.images.len();
        if image_count_changed {
            log::warn!(
                "[SWAPCHAIN] Image count changed from {} to {}",
                previous_count,
                image_count
            );
        }
        log::info!("[SWAPCHAIN] Resized to {}x{}", extent.width, extent.height);

        Ok(ResizeOutcome {
            extent,
            image_count,
            image_count_changed,
        })
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.info.framebuffers.drain(..) {
            self.driver.destroy_framebuffer(framebuffer);
        }
    }

    fn destroy_image_views(&mut self) {
        for view in self.info.image_views.drain(..) {
            self.driver.destroy_image_view(view);
        }
    }

    /// Current handles and parameters
    pub fn info(&self) -> &SwapchainInfo {
        &self.info
    }

    /// Swapchain handle
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.info.swapchain
    }

    /// Number of presentable images
    pub fn image_count(&self) -> u32 {
        u32::try_from(self.info.images.len()).unwrap_or(u32::MAX)
    }

    /// View of image `index`
    pub fn image_view(&self, index: u32) -> VulkanResult<vk::ImageView> {
        self.info
            .image_views
            .get(index as usize)
            .copied()
            .ok_or_else(|| VulkanError::precondition(format!("image index {index} out of range")))
    }

    /// Framebuffer for image `index`
    pub fn framebuffer(&self, index: u32) -> VulkanResult<vk::Framebuffer> {
        self.info
            .framebuffers
            .get(index as usize)
            .copied()
            .ok_or_else(|| VulkanError::precondition(format!("no framebuffer for image {index}")))
    }

    /// Number of framebuffers currently built
    pub fn framebuffer_count(&self) -> usize {
        self.info.framebuffers.len()
    }

    /// Image extent
    pub fn extent(&self) -> vk::Extent2D {
        self.info.extent
    }

    /// Surface format
    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.info.format
    }

    /// Extent used when the surface leaves the size to the application
    pub fn fallback_extent(&self) -> vk::Extent2D {
        self.fallback_extent
    }

    /// True when images, views and framebuffers line up one to one
    pub fn is_complete(&self) -> bool {
        self.info.is_complete()
    }
}

impl Drop for SwapchainManager {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        self.destroy_image_views();
        if self.info.swapchain != vk::SwapchainKHR::null() {
            self.driver.destroy_swapchain(self.info.swapchain);
        }
        log::debug!("[SWAPCHAIN] Destroyed");
    }
}

/// First format matching `preferred`, otherwise the first one reported
fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> VulkanResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|sf| sf.format == preferred.format && sf.color_space == preferred.color_space)
        .or_else(|| formats.first())
        .copied()
        .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))
}

/// One more than the minimum, capped by the maximum when there is one
fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

fn create_swapchain(
    driver: &dyn GpuDriver,
    caps: &vk::SurfaceCapabilitiesKHR,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    old_swapchain: vk::SwapchainKHR,
) -> VulkanResult<vk::SwapchainKHR> {
    let families = driver.queue_families();
    let family_indices = [families.graphics, families.present];

    let mut create_info = vk::SwapchainCreateInfoKHR::builder()
        .min_image_count(choose_image_count(caps))
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(vk::PresentModeKHR::FIFO)
        .clipped(true)
        .old_swapchain(old_swapchain);

    create_info = if families.is_shared() {
        create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    } else {
        create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&family_indices)
    };

    driver.create_swapchain(&create_info).map_err(|e| {
        log::error!("[SWAPCHAIN] Creation failed: {}", e);
        e
    })
}

/// Identity 2D color views, destroying the partial set on failure
fn create_image_views(driver: &dyn GpuDriver, images: &[vk::Image], format: vk::Format) -> VulkanResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        match driver.create_image_view(&create_info) {
            Ok(view) => views.push(view),
            Err(e) => {
                log::error!("[SWAPCHAIN] Image view creation failed: {}", e);
                for view in views {
                    driver.destroy_image_view(view);
                }
                return Err(e);
            }
        }
    }
    Ok(views)
}
