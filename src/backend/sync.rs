// Synchronization primitives
//
// Fences and semaphores for up to N frames in flight. The CPU never records
// into a command buffer, and the GPU never renders into a swap image, before
// the previous work on it has completed.

use ash::vk;
use std::sync::Arc;

use super::swapchain::{SwapImage, SwapchainManager};
use super::{AcquireOutcome, PresentOutcome, QueueRole, RenderDevice, RenderResult, Submission};

/// Lifecycle of a frame slot
///
/// Idle -> Waiting -> Recording -> Submitted -> (fence signals) -> Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    /// CPU is blocked on the slot's fence
    Waiting,
    /// Fence has signalled, the slot's resources may be reused
    Recording,
    /// Work is queued and the fence is pending
    Submitted,
}

/// Frame synchronization - one per frame in flight
#[derive(Debug)]
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub state: SlotState,
    /// An acquire signalled `image_available` and no submit has waited on it yet
    unconsumed_acquire: bool,
}

impl FrameSlot {
    fn new<D: RenderDevice>(device: &D) -> RenderResult<Self> {
        Ok(Self {
            image_available: device.create_semaphore()?,
            render_finished: device.create_semaphore()?,
            // Start signaled so the first wait returns immediately
            in_flight_fence: device.create_fence(true)?,
            state: SlotState::Idle,
            unconsumed_acquire: false,
        })
    }

    fn destroy<D: RenderDevice>(&self, device: &D) {
        device.destroy_semaphore(self.image_available);
        device.destroy_semaphore(self.render_finished);
        device.destroy_fence(self.in_flight_fence);
    }
}

/// Owns the per-slot sync objects and sequences acquire -> submit -> present.
///
/// Slots are created once and survive swapchain recreation.
pub struct FrameSyncController<D: RenderDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot>,
    frame_index: usize,
    /// Stage at which submitted work waits for the acquired image
    wait_stages: vk::PipelineStageFlags,
}

impl<D: RenderDevice> FrameSyncController<D> {
    pub fn new(device: Arc<D>, frames_in_flight: usize) -> RenderResult<Self> {
        debug_assert!(frames_in_flight > 0, "at least one frame slot is required");

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match FrameSlot::new(device.as_ref()) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        slot.destroy(device.as_ref());
                    }
                    return Err(e);
                }
            }
        }
        log::debug!("Created {} frame slots", frames_in_flight);

        Ok(Self {
            device,
            slots,
            frame_index: 0,
            // No color writes before the image is handed over
            wait_stages: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.frame_index]
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Block until the current slot's previous submission has completed.
    pub fn wait_for_frame_slot(&mut self) -> RenderResult<()> {
        let slot = &mut self.slots[self.frame_index];
        slot.state = SlotState::Waiting;
        self.device.wait_for_fence(slot.in_flight_fence)?;
        slot.state = SlotState::Recording;
        Ok(())
    }

    /// Request the next presentable image for the current slot.
    pub fn acquire_image(&mut self, swapchain: &SwapchainManager<D>) -> RenderResult<AcquireOutcome> {
        let slot = &mut self.slots[self.frame_index];
        let outcome = swapchain.acquire_next_image(slot.image_available)?;
        if outcome.image_index().is_some() {
            slot.unconsumed_acquire = true;
        }
        Ok(outcome)
    }

    /// Replace image-available semaphores whose acquire signal no submit
    /// ever waited on, e.g. after a frame was abandoned between acquire and
    /// submit. A signalled semaphore can't be handed to another acquire.
    ///
    /// Only valid while the device is idle.
    pub fn recycle_image_semaphores(&mut self) -> RenderResult<()> {
        for slot in self.slots.iter_mut().filter(|slot| slot.unconsumed_acquire) {
            let fresh = self.device.create_semaphore()?;
            self.device.destroy_semaphore(slot.image_available);
            slot.image_available = fresh;
            slot.unconsumed_acquire = false;
            log::debug!("Replaced image-available semaphore of an abandoned frame");
        }
        Ok(())
    }

    /// Make the current slot the only pending frame targeting `image`.
    ///
    /// If another slot's submission still renders into the image, wait for it
    /// first; then bind the image to this slot's fence.
    pub fn reconcile_image_fence(&mut self, image: &mut SwapImage) -> RenderResult<()> {
        let own_fence = self.slots[self.frame_index].in_flight_fence;
        if let Some(previous) = image.in_flight.filter(|&fence| fence != own_fence) {
            log::trace!("Swap image still in use by another frame, waiting");
            self.device.wait_for_fence(previous)?;
        }
        image.in_flight = Some(own_fence);
        Ok(())
    }

    /// Submit `command_buffer` on the graphics queue for the current slot.
    ///
    /// Waits on the slot's image-available semaphore at color output, then
    /// signals its render-finished semaphore and fence.
    pub fn submit(&mut self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let slot = &mut self.slots[self.frame_index];
        debug_assert_eq!(slot.state, SlotState::Recording);

        // Reset only now: an early return before this point leaves the fence
        // signalled, so the next wait on this slot can't deadlock
        self.device.reset_fence(slot.in_flight_fence)?;

        let submission = Submission {
            command_buffer,
            wait: Some((slot.image_available, self.wait_stages)),
            signal: Some(slot.render_finished),
            fence: Some(slot.in_flight_fence),
        };
        self.device.queue_submit(QueueRole::Graphics, &submission)?;
        slot.unconsumed_acquire = false;
        slot.state = SlotState::Submitted;
        Ok(())
    }

    /// Present `image_index` once the current slot's rendering has finished.
    pub fn present(
        &self,
        swapchain: &SwapchainManager<D>,
        image_index: u32,
    ) -> RenderResult<PresentOutcome> {
        swapchain.present(image_index, self.current_slot().render_finished)
    }

    pub fn advance(&mut self) {
        self.frame_index = (self.frame_index + 1) % self.slots.len();
    }

    /// Wait for every slot's fence. Required before tearing anything down.
    pub fn wait_all(&mut self) -> RenderResult<()> {
        for slot in &mut self.slots {
            if slot.state == SlotState::Submitted {
                self.device.wait_for_fence(slot.in_flight_fence)?;
            }
            slot.state = SlotState::Idle;
        }
        Ok(())
    }
}

impl<D: RenderDevice> Drop for FrameSyncController<D> {
    fn drop(&mut self) {
        if let Err(e) = self.wait_all() {
            log::error!("Failed waiting for frames in flight: {}", e);
        }
        for slot in &self.slots {
            slot.destroy(self.device.as_ref());
        }
    }
}
