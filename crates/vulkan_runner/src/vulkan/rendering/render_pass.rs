//! Single color attachment render pass

use ash::vk;
use std::sync::Arc;

use crate::vulkan::{GpuDriver, VulkanResult};

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    driver: Arc<dyn GpuDriver>,
    render_pass: vk::RenderPass,
    format: vk::Format,
}

impl RenderPass {
    /// Create a render pass that clears one color attachment and leaves it ready to present
    pub fn new(driver: Arc<dyn GpuDriver>, color_format: vk::Format) -> VulkanResult<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build();
        let attachments = [color_attachment];

        let color_attachment_ref = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build();
        let color_attachments = [color_attachment_ref];

        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_attachments)
            .build();
        let subpasses = [subpass];

        // Image acquisition completes at color output; wait there before writing
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .build();
        let dependencies = [dependency];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = driver.create_render_pass(&create_info).map_err(|e| {
            log::error!("[PIPELINE] Render pass creation failed: {}", e);
            e
        })?;
        log::debug!("[PIPELINE] Render pass created for {:?}", color_format);

        Ok(Self {
            driver,
            render_pass,
            format: color_format,
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color attachment format
    pub fn format(&self) -> vk::Format {
        self.format
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.driver.destroy_render_pass(self.render_pass);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::mock::MockDriver;
    use crate::vulkan::VulkanError;
    use ash::vk::Handle;

    #[test]
    fn test_render_pass_released_on_drop() {
        let mock = Arc::new(MockDriver::new());
        let render_pass = RenderPass::new(mock.clone(), vk::Format::B8G8R8A8_SRGB).unwrap();
        assert_eq!(render_pass.format(), vk::Format::B8G8R8A8_SRGB);
        let raw = render_pass.handle().as_raw();
        assert!(mock.is_live(raw));

        drop(render_pass);
        assert_eq!(mock.handles("destroy_render_pass"), vec![raw]);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_creation_failure_is_reported() {
        let mock = Arc::new(MockDriver::new());
        mock.fail_next("create_render_pass", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        let result = RenderPass::new(mock.clone(), vk::Format::B8G8R8A8_UNORM);
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))));
        assert_eq!(mock.count("destroy_render_pass"), 0);
    }
}
