//! Rendering objects: render pass, pipeline and command recording

pub mod commands;
pub mod pipeline;
pub mod render_pass;

pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder, PushConstants, COLOR_SUBRESOURCE, PUSH_CONSTANTS_SIZE};
pub use pipeline::{
    validate_spirv, DescriptorSetLayout, GraphicsPipeline, PipelineFactory, PipelineLayout, ShaderModule, SPIRV_MAGIC,
};
pub use render_pass::RenderPass;
