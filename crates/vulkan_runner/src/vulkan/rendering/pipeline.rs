//! Shader modules, layouts and the graphics pipeline
//!
//! Ownership follows the Vulkan dependency chain: a [`GraphicsPipeline`] keeps its
//! [`PipelineLayout`] alive, which keeps its [`DescriptorSetLayout`] alive, so the
//! three are always destroyed pipeline first. Shader modules are only needed while
//! the pipeline is created and may be dropped right after.

use ash::vk;
use std::ffi::CStr;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::vulkan::rendering::commands::PUSH_CONSTANTS_SIZE;
use crate::vulkan::rendering::RenderPass;
use crate::vulkan::{GpuDriver, VulkanError, VulkanResult};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Smallest byte length that can hold a SPIR-V header
const SPIRV_MIN_BYTES: usize = 16;

/// Shader entry point shared by both stages
const ENTRY_POINT: &CStr = match CStr::from_bytes_with_nul(b"main\0") {
    Ok(name) => name,
    Err(_) => panic!("entry point name must end in a single NUL"),
};

/// Check SPIR-V bytes and copy them into aligned words
pub fn validate_spirv(bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    if bytes.len() < SPIRV_MIN_BYTES || bytes.len() % 4 != 0 {
        return Err(VulkanError::precondition(format!(
            "SPIR-V length {} is not a multiple of 4 of at least {}",
            bytes.len(),
            SPIRV_MIN_BYTES
        )));
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(VulkanError::precondition(format!("bad SPIR-V magic {:#010x}", words[0])));
    }
    Ok(words)
}

/// Shader module wrapper with RAII cleanup
pub struct ShaderModule {
    driver: Arc<dyn GpuDriver>,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create from SPIR-V bytes; malformed input never reaches the driver
    pub fn from_bytes(driver: Arc<dyn GpuDriver>, bytes: &[u8]) -> VulkanResult<Self> {
        log::debug!("[SHADER] Creating shader module from {} bytes", bytes.len());
        let words = validate_spirv(bytes).map_err(|e| {
            log::error!("[SHADER] {}", e);
            e
        })?;

        let module = driver.create_shader_module(&words).map_err(|e| {
            log::error!("[SHADER] vkCreateShaderModule failed: {}", e);
            e
        })?;
        Ok(Self { driver, module })
    }

    /// Create from a compiled SPIR-V file
    pub fn from_file<P: AsRef<Path>>(driver: Arc<dyn GpuDriver>, path: P) -> VulkanResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            log::error!("[SHADER] Failed to read shader file {:?}: {}", path, e);
            VulkanError::InitializationFailed(format!("Failed to read shader file {}: {e}", path.display()))
        })?;
        Self::from_bytes(driver, &bytes)
    }

    /// Get the shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.driver.destroy_shader_module(self.module);
    }
}

/// Descriptor set layout with one sampled image at binding 0
pub struct DescriptorSetLayout {
    driver: Arc<dyn GpuDriver>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Layout with a fragment-stage combined image sampler at binding 0
    pub fn new(driver: Arc<dyn GpuDriver>) -> VulkanResult<Self> {
        let bindings = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = driver.create_descriptor_set_layout(&create_info).map_err(|e| {
            log::error!("[PIPELINE] Descriptor set layout creation failed: {}", e);
            e
        })?;
        Ok(Self { driver, layout })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        self.driver.destroy_descriptor_set_layout(self.layout);
    }
}

/// Pipeline layout: one descriptor set plus the vertex push constant block
pub struct PipelineLayout {
    driver: Arc<dyn GpuDriver>,
    layout: vk::PipelineLayout,
    set_layout: Arc<DescriptorSetLayout>,
}

impl PipelineLayout {
    /// Create over `set_layout`, which stays alive as long as this layout
    pub fn new(driver: Arc<dyn GpuDriver>, set_layout: Arc<DescriptorSetLayout>) -> VulkanResult<Self> {
        let set_layouts = [set_layout.handle()];
        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: PUSH_CONSTANTS_SIZE,
        }];
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_constant_ranges);

        let layout = driver.create_pipeline_layout(&create_info).map_err(|e| {
            log::error!("[PIPELINE] Pipeline layout creation failed: {}", e);
            e
        })?;
        Ok(Self {
            driver,
            layout,
            set_layout,
        })
    }

    /// Get the layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Descriptor set layout this pipeline layout was built from
    pub fn set_layout(&self) -> &Arc<DescriptorSetLayout> {
        &self.set_layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        self.driver.destroy_pipeline_layout(self.layout);
    }
}

/// Graphics pipeline drawing a full-screen primitive without vertex buffers
pub struct GraphicsPipeline {
    driver: Arc<dyn GpuDriver>,
    pipeline: vk::Pipeline,
    layout: Arc<PipelineLayout>,
}

impl GraphicsPipeline {
    /// Build the pipeline for subpass 0 of `render_pass`
    pub fn new(
        driver: Arc<dyn GpuDriver>,
        render_pass: vk::RenderPass,
        layout: Arc<PipelineLayout>,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<Self> {
        if render_pass == vk::RenderPass::null() {
            return Err(VulkanError::precondition("pipeline needs a render pass"));
        }

        let shader_stages = [
            vertex_shader.stage_info(vk::ShaderStageFlags::VERTEX),
            fragment_shader.stage_info(vk::ShaderStageFlags::FRAGMENT),
        ];

        // Vertices are generated in the vertex shader
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(render_pass)
            .subpass(0);

        let pipeline = driver.create_graphics_pipeline(&pipeline_info).map_err(|e| {
            log::error!("[PIPELINE] Graphics pipeline creation failed: {}", e);
            e
        })?;
        log::debug!("[PIPELINE] Graphics pipeline created");

        Ok(Self {
            driver,
            pipeline,
            layout,
        })
    }

    /// Get the pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was built with
    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping GraphicsPipeline {:?}", self.pipeline);
        self.driver.destroy_pipeline(self.pipeline);
    }
}

/// Creates render passes, layouts, shader modules and pipelines on one device
#[derive(Clone)]
pub struct PipelineFactory {
    driver: Arc<dyn GpuDriver>,
}

impl PipelineFactory {
    /// Factory for the device behind `driver`
    pub fn new(driver: Arc<dyn GpuDriver>) -> Self {
        Self { driver }
    }

    /// Single color attachment render pass for `format`
    pub fn create_render_pass(&self, format: vk::Format) -> VulkanResult<RenderPass> {
        RenderPass::new(Arc::clone(&self.driver), format)
    }

    /// Layout with one fragment sampler at binding 0
    pub fn create_descriptor_set_layout(&self) -> VulkanResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(Arc::clone(&self.driver))
    }

    /// Layout over `set_layout` with the vertex push constant block
    pub fn create_pipeline_layout(&self, set_layout: Arc<DescriptorSetLayout>) -> VulkanResult<PipelineLayout> {
        PipelineLayout::new(Arc::clone(&self.driver), set_layout)
    }

    /// Shader module from SPIR-V bytes
    pub fn create_shader_module(&self, bytes: &[u8]) -> VulkanResult<ShaderModule> {
        ShaderModule::from_bytes(Arc::clone(&self.driver), bytes)
    }

    /// Shader module from a SPIR-V file
    pub fn load_shader_module<P: AsRef<Path>>(&self, path: P) -> VulkanResult<ShaderModule> {
        ShaderModule::from_file(Arc::clone(&self.driver), path)
    }

    /// Full-screen pipeline for `render_pass`
    pub fn create_graphics_pipeline(
        &self,
        render_pass: vk::RenderPass,
        layout: Arc<PipelineLayout>,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
    ) -> VulkanResult<GraphicsPipeline> {
        GraphicsPipeline::new(Arc::clone(&self.driver), render_pass, layout, vertex_shader, fragment_shader)
    }
}

#[cfg(test)]
pub(crate) fn fake_spirv(words: usize) -> Vec<u8> {
    let mut bytes = SPIRV_MAGIC.to_ne_bytes().to_vec();
    bytes.resize(words * 4, 0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::mock::MockDriver;

    fn factory() -> (Arc<MockDriver>, PipelineFactory) {
        let mock = Arc::new(MockDriver::new());
        let factory = PipelineFactory::new(mock.clone());
        (mock, factory)
    }

    #[test]
    fn test_entry_point_name() {
        assert_eq!(ENTRY_POINT.to_bytes(), b"main");
    }

    #[test]
    fn test_short_shader_makes_no_driver_call() {
        let (mock, factory) = factory();
        let bytes = fake_spirv(4);
        assert!(matches!(
            factory.create_shader_module(&bytes[..15]),
            Err(VulkanError::Precondition { .. })
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_bad_magic_makes_no_driver_call() {
        let (mock, factory) = factory();
        let mut bytes = fake_spirv(8);
        bytes[0] ^= 0xff;
        assert!(factory.create_shader_module(&bytes).is_err());
        assert!(factory.create_shader_module(&fake_spirv(3)).is_err());
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_valid_shader_words() {
        let words = validate_spirv(&fake_spirv(5)).unwrap();
        assert_eq!(words.len(), 5);
        assert_eq!(words[0], SPIRV_MAGIC);
    }

    #[test]
    fn test_missing_shader_file() {
        let (mock, factory) = factory();
        let result = factory.load_shader_module("does/not/exist.spv");
        assert!(matches!(result, Err(VulkanError::InitializationFailed(_))));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn test_full_pipeline_creation_and_teardown_order() {
        let (mock, factory) = factory();
        let render_pass = factory.create_render_pass(vk::Format::B8G8R8A8_UNORM).unwrap();
        let set_layout = Arc::new(factory.create_descriptor_set_layout().unwrap());
        let layout = Arc::new(factory.create_pipeline_layout(set_layout).unwrap());
        assert_eq!(mock.handles("push_constant_ranges"), vec![1]);

        let vert = factory.create_shader_module(&fake_spirv(16)).unwrap();
        let frag = factory.create_shader_module(&fake_spirv(16)).unwrap();
        let pipeline = factory
            .create_graphics_pipeline(render_pass.handle(), Arc::clone(&layout), &vert, &frag)
            .unwrap();
        assert_eq!(mock.handles("pipeline_stages"), vec![2]);

        // Shader modules are not needed once the pipeline exists
        drop(vert);
        drop(frag);
        drop(layout);
        mock.clear_calls();

        drop(pipeline);
        assert_eq!(
            mock.call_names(),
            vec!["destroy_pipeline", "destroy_pipeline_layout", "destroy_descriptor_set_layout"]
        );
        drop(render_pass);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_pipeline_requires_render_pass() {
        let (mock, factory) = factory();
        let set_layout = Arc::new(factory.create_descriptor_set_layout().unwrap());
        let layout = Arc::new(factory.create_pipeline_layout(set_layout).unwrap());
        let vert = factory.create_shader_module(&fake_spirv(4)).unwrap();
        let frag = factory.create_shader_module(&fake_spirv(4)).unwrap();
        let result = factory.create_graphics_pipeline(vk::RenderPass::null(), layout, &vert, &frag);
        assert!(result.is_err());
        assert_eq!(mock.count("create_graphics_pipeline"), 0);
    }
}
