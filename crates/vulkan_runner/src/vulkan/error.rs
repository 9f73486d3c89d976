//! Vulkan error taxonomy
//!
//! Every fallible operation in the crate returns [`VulkanResult`]. The variants map
//! onto four classes: precondition failures caught before any driver call, driver
//! result codes, the swapchain obsolescence signal, and failures that leave the
//! session unusable.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// Non-success result code returned by the driver
    #[error("Vulkan API error: {0:?} ({})", .0.as_raw())]
    Api(vk::Result),

    /// Invalid argument detected before touching GPU state
    #[error("Precondition failed: {reason}")]
    Precondition {
        /// What was wrong with the input
        reason: String,
    },

    /// Operation attempted in a state that does not allow it
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// The swapchain no longer matches the surface and must be resized by the caller
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// Handle does not name a live object
    #[error("Resource not found: {id:#x}")]
    ResourceNotFound {
        /// The stale or unknown handle
        id: u64,
    },

    /// No physical device could be enumerated
    #[error("No Vulkan capable device found")]
    NoSuitableDevice,

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl VulkanError {
    /// Shorthand for a [`VulkanError::Precondition`]
    pub fn precondition(reason: impl Into<String>) -> Self {
        Self::Precondition { reason: reason.into() }
    }

    /// Shorthand for a [`VulkanError::InvalidOperation`]
    pub fn invalid_operation(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// True when the whole device context has to be torn down and rebuilt
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Api(vk::Result::ERROR_DEVICE_LOST)
                | Self::Api(vk::Result::ERROR_SURFACE_LOST_KHR)
                | Self::NoSuitableDevice
                | Self::InitializationFailed(_)
        )
    }

    /// True for the "must recreate swapchain" signal
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            Self::SwapchainOutOfDate | Self::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SwapchainOutOfDate,
            other => Self::Api(other),
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;
