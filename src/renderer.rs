// =============================================================================
// RENDER LOOP DRIVER
// =============================================================================
//
// Ties the backend pieces together, one iteration per call:
//
// ┌──────────────────────────────────────────────────────────────────────────┐
// │  wait slot fence ─> acquire ─> wait image fence ─> record ─> submit ─>   │
// │  present ─> advance                                                      │
// │                                                                          │
// │  OutOfDate / Suboptimal / resize  ──>  recreate swapchain (device idle)  │
// └──────────────────────────────────────────────────────────────────────────┘
//
// Stale-swapchain results never leave `render_frame`; they only ever turn
// into a recreate, now or on the next call.

use ash::vk;
use std::sync::Arc;

use crate::backend::{
    AcquireOutcome, DeletionQueue, FrameSyncController, PresentOutcome, Rebuild, RenderDevice,
    RenderError, RenderResult, SwapchainManager, SwapchainPreferences,
};

/// Where frames end up. Implemented by the windowing layer.
pub trait SurfaceProvider {
    /// Current drawable size in pixels; zero while minimized
    fn current_extent(&self) -> vk::Extent2D;

    /// Polled once per frame, on top of [`RenderLoopDriver::request_resize`]
    fn resize_requested(&self) -> bool {
        false
    }
}

/// Everything a recorder needs to fill one frame's command buffer
#[derive(Debug, Clone, Copy)]
pub struct FrameTarget {
    /// Already in the recording state; the driver ends it
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    pub framebuffer: vk::Framebuffer,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

/// Scene recording callback, invoked between acquire and submit.
///
/// Must only record; submitting or presenting is the driver's job.
pub trait FrameRecorder<D: RenderDevice> {
    fn record(&mut self, device: &D, target: &FrameTarget) -> RenderResult<()>;
}

impl<D, F> FrameRecorder<D> for F
where
    D: RenderDevice,
    F: FnMut(&D, &FrameTarget) -> RenderResult<()>,
{
    fn record(&mut self, device: &D, target: &FrameTarget) -> RenderResult<()> {
        self(device, target)
    }
}

/// What one call to [`RenderLoopDriver::render_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation
    Presented,
    /// Nothing was rendered, e.g. the surface has zero area
    Skipped,
    /// The swapchain was stale and has been rebuilt; nothing was rendered
    Recreated,
}

#[derive(Debug, Clone, Copy)]
pub struct DriverSettings {
    pub frames_in_flight: usize,
    pub present_mode: vk::PresentModeKHR,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            present_mode: vk::PresentModeKHR::FIFO,
        }
    }
}

/// Owns frame sync, the swapchain set and the deletion queue for scene
/// resources.
///
/// IMPORTANT: Field order matters for Drop! Frame slots go first (their
/// fences are waited on), then the swapchain, then deferred releases.
pub struct RenderLoopDriver<D: RenderDevice> {
    sync: FrameSyncController<D>,
    swapchain: SwapchainManager<D>,
    deletion_queue: DeletionQueue<D>,
    device: Arc<D>,
    /// Set by the windowing layer, cleared only by a successful recreate
    resize_pending: bool,
    frames_presented: u64,
}

impl<D: RenderDevice> RenderLoopDriver<D> {
    /// Build the frame slots and the swapchain for `render_pass`.
    ///
    /// A zero-area `extent` is fine: the swapchain starts deferred and the
    /// first frames report [`FrameStatus::Skipped`].
    pub fn new(
        device: Arc<D>,
        render_pass: vk::RenderPass,
        settings: DriverSettings,
        extent: vk::Extent2D,
    ) -> RenderResult<Self> {
        let sync = FrameSyncController::new(device.clone(), settings.frames_in_flight)?;

        let format = SwapchainManager::negotiate_format(device.as_ref())?;
        let preferences = SwapchainPreferences {
            format: Some(format),
            present_mode: settings.present_mode,
            ..Default::default()
        };
        let swapchain = SwapchainManager::create(device.clone(), render_pass, preferences, extent)?;

        log::info!(
            "Render loop ready: {} frames in flight, {} swap images",
            sync.frames_in_flight(),
            swapchain.image_count()
        );

        Ok(Self {
            sync,
            swapchain,
            deletion_queue: DeletionQueue::new(device.clone()),
            device,
            resize_pending: false,
            frames_presented: 0,
        })
    }

    /// Ask for a swapchain rebuild before the next frame. Calls coalesce.
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// Run one iteration of the render loop.
    ///
    /// Only fatal errors are returned: SurfaceLost, DeviceLost, allocation
    /// failures and unclassified Vulkan errors.
    pub fn render_frame<S, R>(&mut self, surface: &S, recorder: &mut R) -> RenderResult<FrameStatus>
    where
        S: SurfaceProvider + ?Sized,
        R: FrameRecorder<D> + ?Sized,
    {
        match self.try_render_frame(surface, recorder) {
            Err(e) if e.is_recoverable() => {
                log::debug!("Swapchain stale mid-frame ({}), recreating next frame", e);
                self.resize_pending = true;
                Ok(FrameStatus::Skipped)
            }
            Err(e) => {
                log::error!("Fatal render error: {}", e);
                Err(e)
            }
            ok => ok,
        }
    }

    fn try_render_frame<S, R>(&mut self, surface: &S, recorder: &mut R) -> RenderResult<FrameStatus>
    where
        S: SurfaceProvider + ?Sized,
        R: FrameRecorder<D> + ?Sized,
    {
        if surface.resize_requested() {
            self.resize_pending = true;
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 0: Pending resize, or still deferred on a zero-area surface
        // ─────────────────────────────────────────────────────────────────────
        if self.resize_pending || !self.swapchain.is_ready() {
            if self.recreate(surface)? == Rebuild::Deferred {
                return Ok(FrameStatus::Skipped);
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous frame has finished
        // ─────────────────────────────────────────────────────────────────────
        self.sync.wait_for_frame_slot()?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire the next swap image
        // ─────────────────────────────────────────────────────────────────────
        let image_index = match self.sync.acquire_image(&self.swapchain)? {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                // Finish this frame, rebuild before the next acquire
                self.resize_pending = true;
                index
            }
            AcquireOutcome::OutOfDate => {
                // The slot's fence was never reset, so nothing is left waiting on it
                return match self.recreate(surface)? {
                    Rebuild::Ready => Ok(FrameStatus::Recreated),
                    Rebuild::Deferred => Ok(FrameStatus::Skipped),
                };
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Make sure no other frame is still rendering into this image
        // ─────────────────────────────────────────────────────────────────────
        let image = self
            .swapchain
            .image_mut(image_index)
            .ok_or(RenderError::OutOfDate)?;
        self.sync.reconcile_image_fence(image)?;

        let target = FrameTarget {
            command_buffer: image.command_buffer,
            image_index,
            framebuffer: image.framebuffer,
            render_pass: self.swapchain.render_pass(),
            extent: self.swapchain.extent(),
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record this frame's commands
        // ─────────────────────────────────────────────────────────────────────
        self.device.begin_command_buffer(
            target.command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )?;
        recorder.record(self.device.as_ref(), &target)?;
        self.device.end_command_buffer(target.command_buffer)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit, then present once rendering has finished
        // ─────────────────────────────────────────────────────────────────────
        self.sync.submit(target.command_buffer)?;

        match self.sync.present(&self.swapchain, image_index)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal | PresentOutcome::OutOfDate => {
                self.resize_pending = true;
            }
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Advance to the next frame slot
        // ─────────────────────────────────────────────────────────────────────
        self.sync.advance();
        self.frames_presented += 1;

        Ok(FrameStatus::Presented)
    }

    fn recreate<S: SurfaceProvider + ?Sized>(&mut self, surface: &S) -> RenderResult<Rebuild> {
        let extent = surface.current_extent();
        let rebuild = self.swapchain.recreate(extent)?;
        // The device is idle now; a frame abandoned after its acquire left a
        // signalled semaphore behind
        self.sync.recycle_image_semaphores()?;
        if rebuild == Rebuild::Ready {
            self.resize_pending = false;
            log::info!(
                "Swapchain recreated: {}x{}, {} images, {:?}",
                self.swapchain.extent().width,
                self.swapchain.extent().height,
                self.swapchain.image_count(),
                self.swapchain.present_mode()
            );
        }
        Ok(rebuild)
    }

    /// Queue for resources that must outlive every frame that may use them
    pub fn deletion_queue(&mut self) -> &mut DeletionQueue<D> {
        &mut self.deletion_queue
    }

    pub fn swapchain(&self) -> &SwapchainManager<D> {
        &self.swapchain
    }

    pub fn sync(&self) -> &FrameSyncController<D> {
        &self.sync
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Wait for every frame in flight, then release the swapchain set and
    /// all deferred resources. Safe to call more than once.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        self.sync.wait_all()?;
        self.swapchain.destroy()?;
        self.deletion_queue.flush();
        Ok(())
    }
}

impl<D: RenderDevice> Drop for RenderLoopDriver<D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            // Handles are still released by the members' own Drop
            log::error!("Render loop shutdown failed: {}", e);
        }
    }
}
