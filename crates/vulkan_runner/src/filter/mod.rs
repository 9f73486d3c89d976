//! Affine texture filter
//!
//! Draws one sampled texture through a user supplied 2D affine transform. The
//! vertex shader generates a full-screen triangle and reads two column-major
//! matrices from push constants: the texture coordinate transform of the input
//! frame, then the user transform built from an [`AffineMatrix`]. Coordinates
//! are sampled at `tex * user * uv`; anything outside the unit square is
//! written as transparent black.

use ash::vk;
use std::sync::Arc;

use crate::config::ShaderConfig;
use crate::foundation::math::{AffineMatrix, IDENTITY_4X4};
use crate::vulkan::rendering::{
    ActiveRenderPass, GraphicsPipeline, PipelineFactory, PushConstants, RenderPass, ShaderModule,
};
use crate::vulkan::resources::{DescriptorResourceManager, DescriptorSet, Sampler};
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

const FULL_SCREEN_TRIANGLE_VERTICES: u32 = 3;

/// Full-screen affine filter bound to one render pass
pub struct AffineFilter {
    pipeline: GraphicsPipeline,
    descriptor_set: DescriptorSet,
    sampler: Sampler,
    descriptors: DescriptorResourceManager,
    bound_view: vk::ImageView,
    user_transform: AffineMatrix,
}

impl AffineFilter {
    /// Build the filter from in-memory SPIR-V
    ///
    /// Anything created before a failing step is released before returning.
    pub fn new(
        driver: Arc<dyn GpuDriver>,
        render_pass: &RenderPass,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
        user_transform: AffineMatrix,
    ) -> VulkanResult<Self> {
        let factory = PipelineFactory::new(Arc::clone(&driver));
        let vertex_shader = factory.create_shader_module(vertex_spirv)?;
        let fragment_shader = factory.create_shader_module(fragment_spirv)?;
        Self::build(driver, &factory, render_pass, &vertex_shader, &fragment_shader, user_transform)
    }

    /// Build the filter from the SPIR-V files named in `shaders`
    pub fn from_config(
        driver: Arc<dyn GpuDriver>,
        render_pass: &RenderPass,
        shaders: &ShaderConfig,
        user_transform: AffineMatrix,
    ) -> VulkanResult<Self> {
        let factory = PipelineFactory::new(Arc::clone(&driver));
        let vertex_shader = factory.load_shader_module(&shaders.vertex_shader_path)?;
        let fragment_shader = factory.load_shader_module(&shaders.fragment_shader_path)?;
        Self::build(driver, &factory, render_pass, &vertex_shader, &fragment_shader, user_transform)
    }

    fn build(
        driver: Arc<dyn GpuDriver>,
        factory: &PipelineFactory,
        render_pass: &RenderPass,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        user_transform: AffineMatrix,
    ) -> VulkanResult<Self> {
        let set_layout = Arc::new(factory.create_descriptor_set_layout()?);
        let pipeline_layout = Arc::new(factory.create_pipeline_layout(Arc::clone(&set_layout))?);
        let pipeline =
            factory.create_graphics_pipeline(render_pass.handle(), pipeline_layout, vertex_shader, fragment_shader)?;

        let descriptors = DescriptorResourceManager::new(driver);
        let pool = Arc::new(descriptors.create_descriptor_pool()?);
        let sampler = descriptors.create_sampler()?;
        let descriptor_set = descriptors.allocate_descriptor_set(pool, &set_layout)?;

        log::info!("[FILTER] Affine filter ready, user transform {}", user_transform);
        Ok(Self {
            pipeline,
            descriptor_set,
            sampler,
            descriptors,
            bound_view: vk::ImageView::null(),
            user_transform,
        })
    }

    /// Record the filter into an open render pass
    ///
    /// `tex_matrix` must hold 16 column-major floats when given; identity is used
    /// otherwise. The descriptor set is only rewritten when `input_view` changes,
    /// so a new view must not be passed while an earlier frame is still reading
    /// the set.
    pub fn draw(
        &mut self,
        pass: &mut ActiveRenderPass<'_>,
        input_view: vk::ImageView,
        tex_matrix: Option<&[f32]>,
    ) -> VulkanResult<()> {
        if input_view == vk::ImageView::null() {
            return Err(VulkanError::precondition("filter input view is null"));
        }
        let tex_matrix = match tex_matrix {
            Some(values) => <[f32; 16]>::try_from(values).map_err(|_| {
                VulkanError::precondition(format!("texture matrix needs 16 floats, got {}", values.len()))
            })?,
            None => IDENTITY_4X4,
        };

        if input_view != self.bound_view {
            self.descriptors
                .update_descriptor_set(self.descriptor_set.handle(), input_view, self.sampler.handle())?;
            self.bound_view = input_view;
            log::debug!("[FILTER] Input view changed to {:?}", input_view);
        }

        let layout = self.pipeline.layout();
        pass.bind_pipeline(&self.pipeline)?;
        pass.bind_descriptor_set(layout, self.descriptor_set.handle())?;
        pass.push_constants(layout, &PushConstants::new(tex_matrix, self.user_transform.to_4x4()))?;
        pass.draw(FULL_SCREEN_TRIANGLE_VERTICES, 1, 0, 0)
    }

    /// Replace the user transform used by later draws
    pub fn set_user_transform(&mut self, transform: AffineMatrix) {
        self.user_transform = transform;
    }

    /// Current user transform
    pub fn user_transform(&self) -> AffineMatrix {
        self.user_transform
    }

    /// Pipeline used for drawing
    pub fn pipeline(&self) -> &GraphicsPipeline {
        &self.pipeline
    }
}
