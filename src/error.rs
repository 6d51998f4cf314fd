//! Error taxonomy.
//!
//! Errors are split by how the caller should react: fatal configuration errors abort
//! backend construction, resource-creation failures are reported to the caller as `bool`/`Option`
//! rather than as an error (see [`crate::registry`]), unsupported operations are a backend bug
//! and always fatal, and encoder-time soft failures (swapchain acquire) are logged and skip the
//! affected encoder instead of failing the frame.
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no physical device exposes a queue family with GRAPHICS support")]
    NoSuitablePhysicalDevice,

    #[error("required device extension not available: {0}")]
    MissingExtension(&'static str),

    #[error("device creation failed")]
    DeviceCreationFailed,

    #[error("pipeline cache creation failed")]
    PipelineCacheCreationFailed,

    /// An operation this backend deliberately does not support (e.g. heap sub-allocation,
    /// managed-storage readback, `setBuffer`/`setTexture` outside an argument buffer). Always
    /// fatal: reaching this path upstream is a bug, not a recoverable condition.
    #[error("unsupported operation on this backend: {0}")]
    UnsupportedOperation(&'static str),

    #[error("vulkan call failed: {0:?}")]
    Vulkan(#[from] vk::Result),

    /// Soft failure: the dispatcher skips the affected encoder and continues the frame.
    #[error("swapchain acquire failed for resource handle {0:?}")]
    SwapchainAcquireFailed(crate::handle::ResourceId),
}

impl BackendError {
    /// Whether this error must abort the whole frame (vs. being handled locally by skipping
    /// one encoder).
    pub fn is_fatal_to_frame(&self) -> bool {
        !matches!(self, BackendError::SwapchainAcquireFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
