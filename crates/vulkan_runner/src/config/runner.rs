//! Runner configuration
//!
//! Settings consumed when building the device, swapchain, frame-sync and texture
//! objects. Every struct fills missing fields from its `Default`, so a config file
//! only needs to name what it changes.

use ash::vk;
use serde::{Deserialize, Serialize};

use super::Config;

/// Surface formats the swapchain may prefer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    /// `B8G8R8A8_UNORM`
    Bgra8Unorm,
    /// `B8G8R8A8_SRGB`
    Bgra8Srgb,
    /// `R8G8B8A8_UNORM`
    Rgba8Unorm,
    /// `R8G8B8A8_SRGB`
    Rgba8Srgb,
}

impl ColorFormat {
    /// Matching Vulkan format
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
            Self::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
            Self::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
            Self::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        }
    }
}

/// Swapchain creation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    /// Format picked when the surface offers it with SRGB_NONLINEAR color space
    pub preferred_format: ColorFormat,
    /// Width used when the surface reports an undefined extent
    pub fallback_width: u32,
    /// Height used when the surface reports an undefined extent
    pub fallback_height: u32,
    /// Render pass clear color
    pub clear_color: [f32; 4],
}

impl SwapchainConfig {
    /// The preferred (format, color space) pair
    pub fn preferred_surface_format(&self) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format: self.preferred_format.to_vk(),
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    /// Extent used when the surface does not dictate one
    pub fn fallback_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.fallback_width,
            height: self.fallback_height,
        }
    }

    /// Set the fallback extent
    pub fn with_fallback_extent(mut self, width: u32, height: u32) -> Self {
        self.fallback_width = width;
        self.fallback_height = height;
        self
    }

    /// Set the preferred format
    pub fn with_preferred_format(mut self, format: ColorFormat) -> Self {
        self.preferred_format = format;
        self
    }
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_format: ColorFormat::Bgra8Unorm,
            fallback_width: 1920,
            fallback_height: 1080,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Static test texture settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// Test texture width in pixels
    pub test_width: u32,
    /// Test texture height in pixels
    pub test_height: u32,
    /// RGBA fill of the test texture
    pub test_color: [u8; 4],
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            test_width: 1920,
            test_height: 1080,
            test_color: [122, 255, 0, 255],
        }
    }
}

/// Paths to the affine filter SPIR-V binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::new("target/shaders/affine.vert.spv", "target/shaders/affine.frag.spv")
    }
}

/// Top-level runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Default `env_logger` filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Number of frame slots the CPU may run ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Swapchain settings
    pub swapchain: SwapchainConfig,
    /// Test texture settings
    pub texture: TextureConfig,
    /// Affine filter shaders
    pub shaders: ShaderConfig,
}

impl RunnerConfig {
    /// Create a configuration with defaults and the given application name
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            ..Self::default()
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the number of frame slots
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Replace the swapchain settings
    pub fn with_swapchain(mut self, swapchain: SwapchainConfig) -> Self {
        self.swapchain = swapchain;
        self
    }

    /// Replace the shader paths
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Validation layers requested, resolving `None` by build type
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if !(1..=8).contains(&self.frames_in_flight) {
            return Err(format!(
                "Frames in flight must be between 1 and 8, got {}",
                self.frames_in_flight
            ));
        }

        if self.swapchain.fallback_width == 0 || self.swapchain.fallback_height == 0 {
            return Err("Fallback extent must be non-zero".to_string());
        }

        if self.texture.test_width == 0 || self.texture.test_height == 0 {
            return Err("Test texture size must be non-zero".to_string());
        }

        Ok(())
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            application_name: "VulkanRunner".to_string(),
            application_version: (1, 0, 0),
            log_level: "info".to_string(),
            frames_in_flight: 2,
            enable_validation: None,
            swapchain: SwapchainConfig::default(),
            texture: TextureConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }
}

impl Config for RunnerConfig {}
