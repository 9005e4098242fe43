// Device seam
//
// Everything the render loop needs from the GPU goes through `RenderDevice`.
// `VulkanDevice` is the real implementation; tests drive the same components
// with a simulated device. Handles are plain `ash::vk` handles so the
// components read like ordinary Vulkan code.

use ash::vk;
use gpu_allocator::MemoryLocation;

use super::RenderResult;

/// Which device queue an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

/// Result of asking the presentation engine for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is ready to be rendered into
    Ready(u32),
    /// Image can be used, but the swapchain should be recreated before the next acquire
    Suboptimal(u32),
    /// No image was acquired; the swapchain must be recreated first
    OutOfDate,
}

impl AcquireOutcome {
    pub fn image_index(&self) -> Option<u32> {
        match *self {
            AcquireOutcome::Ready(index) | AcquireOutcome::Suboptimal(index) => Some(index),
            AcquireOutcome::OutOfDate => None,
        }
    }
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Everything the surface reports about what a swapchain may look like
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Fully resolved swapchain parameters
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub image_usage: vk::ImageUsageFlags,
}

/// One queue submission: a command buffer plus its optional sync primitives
#[derive(Debug, Clone, Copy)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore to wait on, and the stage that waits
    pub wait: Option<(vk::Semaphore, vk::PipelineStageFlags)>,
    pub signal: Option<vk::Semaphore>,
    /// Fence signalled when the GPU finishes this submission
    pub fence: Option<vk::Fence>,
}

impl Submission {
    pub fn new(command_buffer: vk::CommandBuffer) -> Self {
        Self {
            command_buffer,
            wait: None,
            signal: None,
            fence: None,
        }
    }
}

/// GPU operations used by the frame loop, the swapchain and uploads.
///
/// All waits block without a timeout. Destroy calls are infallible, matching
/// Vulkan; callers must make sure the GPU is done with a handle first.
pub trait RenderDevice {
    /// Block until every queue is idle.
    fn wait_idle(&self) -> RenderResult<()>;
    fn queue_wait_idle(&self, queue: QueueRole) -> RenderResult<()>;

    // ── Synchronization ────────────────────────────────────────────────────
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;

    // ── Presentation ───────────────────────────────────────────────────────
    fn surface_support(&self) -> RenderResult<SurfaceSupport>;
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome>;
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome>;

    // ── Images ─────────────────────────────────────────────────────────────
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> RenderResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_image(&self, image: vk::Image);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // ── Commands ───────────────────────────────────────────────────────────
    fn create_command_pool(&self, queue: QueueRole) -> RenderResult<vk::CommandPool>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    /// Begin recording; implicitly resets the buffer.
    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        usage: vk::CommandBufferUsageFlags,
    ) -> RenderResult<()>;
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()>;
    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    );
    fn queue_submit(&self, queue: QueueRole, submission: &Submission) -> RenderResult<()>;

    // ── Memory ─────────────────────────────────────────────────────────────
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<vk::Buffer>;
    /// Map, copy and unmap a host-visible buffer.
    fn write_buffer(&self, buffer: vk::Buffer, data: &[u8]) -> RenderResult<()>;
    /// Copy `len` bytes out of a host-visible buffer.
    fn read_buffer(&self, buffer: vk::Buffer, len: usize) -> RenderResult<Vec<u8>>;
    fn destroy_buffer(&self, buffer: vk::Buffer);
}
