// Render error taxonomy
//
// Every device-facing operation reports one of these. OutOfDate and
// Suboptimal are handled by recreating the swapchain and never leave the
// render loop; everything else is fatal for the current run.

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The presentation surface is gone (window destroyed, display lost)
    #[error("Surface lost")]
    SurfaceLost,

    /// The logical device is gone (driver reset, GPU hang)
    #[error("Device lost")]
    DeviceLost,

    /// The swapchain no longer matches the surface and must be rebuilt
    #[error("Swapchain out of date")]
    OutOfDate,

    /// The swapchain still works but no longer matches the surface exactly
    #[error("Swapchain suboptimal")]
    Suboptimal,

    /// A buffer, image or device memory allocation failed
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// A copy submission to the transfer queue was rejected
    #[error("Transfer failure: {0}")]
    TransferFailure(String),

    #[error("Timed out waiting for the device")]
    Timeout,

    /// Any Vulkan failure that doesn't map onto the categories above
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

impl RenderError {
    /// True for results the render loop absorbs by recreating the swapchain.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::OutOfDate | RenderError::Suboptimal)
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => RenderError::OutOfDate,
            vk::Result::SUBOPTIMAL_KHR => RenderError::Suboptimal,
            vk::Result::TIMEOUT => RenderError::Timeout,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                RenderError::AllocationFailure(result.to_string())
            }
            other => RenderError::Vulkan(other),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(error: gpu_allocator::AllocationError) -> Self {
        RenderError::AllocationFailure(error.to_string())
    }
}

/// Result type alias for render operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
