//! Descriptor objects and uploaded textures

pub mod descriptor;
pub mod texture;

pub use descriptor::{DescriptorPool, DescriptorResourceManager, DescriptorSet, Sampler};
pub use texture::{
    FrameCallback, FrameCallbackSlot, ImageLayoutState, InputTexture, LayoutTracker, LayoutTransition, PixelSource, Texture,
    TextureUploader,
};
