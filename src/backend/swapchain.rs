// Swapchain - Window presentation
//
// Owns the chain of images we render to and everything sized to it: image
// views, framebuffers and the per-image command buffers. The whole set is
// rebuilt from scratch whenever the surface changes.

use ash::vk;
use std::sync::Arc;

use super::deletion::{Deletion, DeletionQueue};
use super::{
    AcquireOutcome, PresentOutcome, QueueRole, RenderDevice, RenderError, RenderResult,
    SurfaceSupport, SwapchainDesc,
};

/// What the caller would like the swapchain to look like
#[derive(Debug, Clone, Copy)]
pub struct SwapchainPreferences {
    /// Pinned format; negotiated from the surface when `None`
    pub format: Option<vk::SurfaceFormatKHR>,
    pub present_mode: vk::PresentModeKHR,
    pub image_usage: vk::ImageUsageFlags,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            format: None,
            present_mode: vk::PresentModeKHR::FIFO,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        }
    }
}

/// One presentable image and the resources sized to it
#[derive(Debug)]
pub struct SwapImage {
    /// Owned by the swapchain, never destroyed directly
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
    pub command_buffer: vk::CommandBuffer,
    /// Fence of the frame currently rendering into this image, if any
    pub in_flight: Option<vk::Fence>,
}

/// Whether a recreate produced a usable swapchain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rebuild {
    Ready,
    /// Surface has zero area; retry later
    Deferred,
}

// Prefer SRGB, otherwise take whatever the surface lists first
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::SurfaceFormatKHR>,
) -> Option<vk::SurfaceFormatKHR> {
    let wanted = preferred.unwrap_or(vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    });
    formats
        .iter()
        .copied()
        .find(|f| f.format == wanted.format && f.color_space == wanted.color_space)
        .or_else(|| formats.first().copied())
}

// FIFO is always supported
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    preferred: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: preferred.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: preferred.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Minimized windows report a zero-sized surface
pub fn is_degenerate(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

pub struct SwapchainManager<D: RenderDevice> {
    device: Arc<D>,
    render_pass: vk::RenderPass,
    preferences: SwapchainPreferences,
    swapchain: vk::SwapchainKHR,
    images: Vec<SwapImage>,
    command_pool: vk::CommandPool,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Everything created for the current swapchain, in creation order
    deletion_queue: DeletionQueue<D>,
}

impl<D: RenderDevice> SwapchainManager<D> {
    /// Pick the surface format a render pass should be built against.
    pub fn negotiate_format(device: &D) -> RenderResult<vk::SurfaceFormatKHR> {
        let support = device.surface_support()?;
        choose_surface_format(&support.formats, None).ok_or(RenderError::SurfaceLost)
    }

    /// Create the swapchain and its image resources.
    ///
    /// On a zero-area surface the manager starts out empty and
    /// [`is_ready`](Self::is_ready) reports false until a later recreate
    /// succeeds.
    pub fn create(
        device: Arc<D>,
        render_pass: vk::RenderPass,
        preferences: SwapchainPreferences,
        preferred_extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let deletion_queue = DeletionQueue::new(device.clone());
        let mut manager = Self {
            device,
            render_pass,
            preferences,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            command_pool: vk::CommandPool::null(),
            format: preferences.format.unwrap_or_default(),
            extent: vk::Extent2D::default(),
            present_mode: preferences.present_mode,
            deletion_queue,
        };
        manager.build(preferred_extent)?;
        Ok(manager)
    }

    /// Tear down and rebuild everything sized to the surface.
    ///
    /// Waits for the device to go idle first, so nothing still in flight can
    /// reference the old images or framebuffers.
    pub fn recreate(&mut self, preferred_extent: vk::Extent2D) -> RenderResult<Rebuild> {
        self.device.wait_idle()?;
        self.teardown();
        self.build(preferred_extent)
    }

    /// Same teardown as [`recreate`](Self::recreate), without the rebuild.
    pub fn destroy(&mut self) -> RenderResult<()> {
        self.device.wait_idle()?;
        self.teardown();
        Ok(())
    }

    fn teardown(&mut self) {
        // framebuffers -> image views -> command buffers -> command pool -> swapchain
        self.deletion_queue.flush();
        self.images.clear();
        self.swapchain = vk::SwapchainKHR::null();
        self.command_pool = vk::CommandPool::null();
    }

    fn build(&mut self, preferred_extent: vk::Extent2D) -> RenderResult<Rebuild> {
        let support = self.device.surface_support()?;
        let extent = choose_extent(&support.capabilities, preferred_extent);
        if is_degenerate(extent) {
            log::warn!(
                "Surface is {}x{}, deferring swapchain creation",
                extent.width,
                extent.height
            );
            return Ok(Rebuild::Deferred);
        }

        let desc = self.describe(&support, extent)?;
        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}",
            extent.width,
            extent.height,
            desc.format.format,
            desc.present_mode
        );

        let swapchain = self.device.create_swapchain(&desc)?;
        self.deletion_queue.enqueue(Deletion::Swapchain(swapchain));
        self.swapchain = swapchain;
        self.format = desc.format;
        self.extent = extent;
        self.present_mode = desc.present_mode;
        // Recreations keep the render pass compatible
        self.preferences.format = Some(desc.format);

        let images = self.device.swapchain_images(swapchain)?;
        self.create_image_resources(&images)?;

        log::info!("Created swapchain with {} images", self.images.len());
        Ok(Rebuild::Ready)
    }

    fn describe(&self, support: &SurfaceSupport, extent: vk::Extent2D) -> RenderResult<SwapchainDesc> {
        let format = choose_surface_format(&support.formats, self.preferences.format)
            .ok_or(RenderError::SurfaceLost)?;
        if let Some(pinned) = self.preferences.format {
            if pinned.format != format.format {
                log::warn!(
                    "Surface no longer offers {:?}, falling back to {:?}",
                    pinned.format,
                    format.format
                );
            }
        }
        Ok(SwapchainDesc {
            min_image_count: choose_image_count(&support.capabilities),
            format,
            extent,
            present_mode: choose_present_mode(&support.present_modes, self.preferences.present_mode),
            pre_transform: support.capabilities.current_transform,
            image_usage: self.preferences.image_usage,
        })
    }

    /// One command buffer, image view and framebuffer per swap image.
    fn create_image_resources(&mut self, images: &[vk::Image]) -> RenderResult<()> {
        let device = self.device.clone();

        let command_pool = device.create_command_pool(QueueRole::Graphics)?;
        self.deletion_queue.enqueue(Deletion::CommandPool(command_pool));
        self.command_pool = command_pool;

        let command_buffers = device.allocate_command_buffers(command_pool, images.len() as u32)?;
        self.deletion_queue.enqueue(Deletion::CommandBuffers {
            pool: command_pool,
            buffers: command_buffers.clone(),
        });

        let mut views = Vec::with_capacity(images.len());
        for &image in images {
            let view = device.create_image_view(image, self.format.format)?;
            self.deletion_queue.enqueue(Deletion::ImageView(view));
            views.push(view);
        }

        let mut framebuffers = Vec::with_capacity(images.len());
        for &view in &views {
            let framebuffer = device.create_framebuffer(self.render_pass, view, self.extent)?;
            self.deletion_queue.enqueue(Deletion::Framebuffer(framebuffer));
            framebuffers.push(framebuffer);
        }

        self.images = images
            .iter()
            .zip(views)
            .zip(framebuffers)
            .zip(command_buffers)
            .map(|(((&image, view), framebuffer), command_buffer)| SwapImage {
                image,
                view,
                framebuffer,
                command_buffer,
                in_flight: None,
            })
            .collect();
        Ok(())
    }

    /// Ask the presentation engine for the next image, signalling `semaphore`
    /// once it's actually available.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> RenderResult<AcquireOutcome> {
        if !self.is_ready() {
            return Ok(AcquireOutcome::OutOfDate);
        }
        match self.device.acquire_next_image(self.swapchain, semaphore) {
            Err(RenderError::OutOfDate) => Ok(AcquireOutcome::OutOfDate),
            other => other,
        }
    }

    /// Queue `image_index` for presentation once `wait` is signalled.
    pub fn present(&self, image_index: u32, wait: vk::Semaphore) -> RenderResult<PresentOutcome> {
        match self.device.queue_present(self.swapchain, image_index, wait) {
            Err(RenderError::OutOfDate) => Ok(PresentOutcome::OutOfDate),
            Err(RenderError::Suboptimal) => Ok(PresentOutcome::Suboptimal),
            other => other,
        }
    }

    /// False while deferred on a zero-area surface
    pub fn is_ready(&self) -> bool {
        self.swapchain != vk::SwapchainKHR::null() && !self.images.is_empty()
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn images(&self) -> &[SwapImage] {
        &self.images
    }

    pub fn image(&self, index: u32) -> Option<&SwapImage> {
        self.images.get(index as usize)
    }

    pub fn image_mut(&mut self, index: u32) -> Option<&mut SwapImage> {
        self.images.get_mut(index as usize)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl<D: RenderDevice> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("Failed to wait for device before destroying swapchain: {}", e);
            // The handles are released regardless when the deletion queue drops
        }
    }
}
