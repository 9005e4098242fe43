// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Everything above `render_device` is written against the `RenderDevice`
// trait, so it runs unchanged on a real GPU or a simulated one.

pub mod buffer;
pub mod deletion;
pub mod device;
pub mod error;
pub mod pipeline;
pub mod render_device;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use buffer::{DeviceBuffer, StagedTransferUploader};
pub use deletion::{Deletion, DeletionQueue};
pub use device::{QueueFamilies, VulkanDevice};
pub use error::{RenderError, RenderResult};
pub use render_device::{
    AcquireOutcome, PresentOutcome, QueueRole, RenderDevice, Submission, SurfaceSupport,
    SwapchainDesc,
};
pub use swapchain::{Rebuild, SwapImage, SwapchainManager, SwapchainPreferences};
pub use sync::{FrameSlot, FrameSyncController, SlotState};
