// Simulated GPU for integration tests
//
// Implements `RenderDevice` without a driver. Submitted work completes on a
// manual clock: each submission is pending for `latency` ticks, and waiting
// on a fence (or a queue) moves the clock forward to when it completes.
// Every misuse the hardware would punish (re-recording in-flight command
// buffers, two frames on one swap image, destroying parents before
// children, double frees) is recorded in `violations` instead.

#![allow(dead_code)]

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use vk_render_loop::backend::{
    AcquireOutcome, PresentOutcome, QueueRole, RenderDevice, RenderError, RenderResult,
    Submission, SurfaceSupport, SwapchainDesc,
};
use vk_render_loop::{FrameRecorder, FrameTarget, SurfaceProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Semaphore,
    Fence,
    Swapchain,
    Image,
    ImageView,
    Framebuffer,
    CommandPool,
    CommandBuffer,
    Buffer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    WaitIdle,
    QueueWaitIdle(QueueRole),
    /// `blocked` is true when the fence was still pending
    WaitFence { fence: vk::Fence, blocked: bool },
    ResetFence(vk::Fence),
    Acquire(AcquireOutcome),
    Submit {
        queue: QueueRole,
        command_buffer: vk::CommandBuffer,
        wait_stage: Option<vk::PipelineStageFlags>,
        fence: Option<vk::Fence>,
    },
    Present { image_index: u32 },
    CreateSwapchain {
        extent: vk::Extent2D,
        image_count: u32,
        format: vk::Format,
        present_mode: vk::PresentModeKHR,
    },
    Destroy(ObjectKind),
    Note(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    Pending { ready_at: u64 },
}

#[derive(Debug, Default)]
struct CommandState {
    recording: bool,
    copies: Vec<BufferCopy>,
    busy_until: u64,
}

#[derive(Debug, Clone, Copy)]
struct BufferCopy {
    src: vk::Buffer,
    dst: vk::Buffer,
    size: vk::DeviceSize,
}

#[derive(Debug)]
struct PendingWork {
    queue: QueueRole,
    ready_at: u64,
    copies: Vec<BufferCopy>,
    fence: Option<vk::Fence>,
}

#[derive(Debug)]
struct SimSwapchain {
    images: Vec<vk::Image>,
    next: u32,
}

#[derive(Debug)]
struct SimBuffer {
    data: Vec<u8>,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    busy_until: u64,
}

pub struct SimState {
    next_handle: u64,
    pub clock: u64,
    /// Ticks between a submission and its completion
    pub latency: u64,

    live: HashMap<u64, ObjectKind>,
    fences: HashMap<vk::Fence, FenceState>,
    pending: Vec<PendingWork>,
    commands: HashMap<vk::CommandBuffer, CommandState>,
    command_pool_of: HashMap<vk::CommandBuffer, vk::CommandPool>,
    swapchains: HashMap<vk::SwapchainKHR, SimSwapchain>,
    image_owner: HashMap<vk::Image, vk::SwapchainKHR>,
    view_image: HashMap<vk::ImageView, vk::Image>,
    framebuffer_view: HashMap<vk::Framebuffer, vk::ImageView>,
    acquired_by: HashMap<vk::Semaphore, (vk::SwapchainKHR, u32)>,
    acquired: HashSet<(vk::SwapchainKHR, u32)>,
    // Signalled by an acquire, not yet waited on by a submit
    unwaited_semaphores: HashSet<vk::Semaphore>,
    image_busy_until: HashMap<(vk::SwapchainKHR, u32), u64>,
    buffers: HashMap<vk::Buffer, SimBuffer>,

    // Surface
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub max_image_count: u32,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,

    // Scripted presentation engine; round-robin acquire when empty
    pub acquire_script: VecDeque<RenderResult<AcquireOutcome>>,
    pub present_script: VecDeque<RenderResult<PresentOutcome>>,

    // Fault injection
    /// Buffer creations left before allocations start failing
    pub allocation_budget: Option<usize>,
    pub reject_transfer_submits: bool,
    pub surface_lost: bool,
    pub device_lost: bool,

    pub events: Vec<SimEvent>,
    pub violations: Vec<String>,
}

impl SimState {
    fn new() -> Self {
        Self {
            next_handle: 1000,
            clock: 0,
            latency: 3,
            live: HashMap::new(),
            fences: HashMap::new(),
            pending: Vec::new(),
            commands: HashMap::new(),
            command_pool_of: HashMap::new(),
            swapchains: HashMap::new(),
            image_owner: HashMap::new(),
            view_image: HashMap::new(),
            framebuffer_view: HashMap::new(),
            acquired_by: HashMap::new(),
            acquired: HashSet::new(),
            unwaited_semaphores: HashSet::new(),
            image_busy_until: HashMap::new(),
            buffers: HashMap::new(),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_count: 2,
            max_image_count: 3,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            allocation_budget: None,
            reject_transfer_submits: false,
            surface_lost: false,
            device_lost: false,
            events: Vec::new(),
            violations: Vec::new(),
        }
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn create<H: Handle>(&mut self, kind: ObjectKind) -> H {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        H::from_raw(self.next_handle)
    }

    /// False (and a violation) if the handle wasn't a live object of `kind`
    fn release<H: Handle + std::fmt::Debug + Copy>(&mut self, handle: H, kind: ObjectKind) -> bool {
        match self.live.remove(&handle.as_raw()) {
            Some(found) if found == kind => {
                self.events.push(SimEvent::Destroy(kind));
                true
            }
            Some(found) => {
                self.live.insert(handle.as_raw(), found);
                self.violation(format!("{:?} {:?} released as {:?}", found, handle, kind));
                false
            }
            None => {
                self.violation(format!("release of dead or unknown {:?} {:?}", kind, handle));
                false
            }
        }
    }

    fn is_live(&self, raw: u64, kind: ObjectKind) -> bool {
        self.live.get(&raw) == Some(&kind)
    }

    /// Move the clock forward and complete everything due by then
    fn advance_to(&mut self, time: u64) {
        self.clock = self.clock.max(time);
        let clock = self.clock;
        let (mut done, still): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|work| work.ready_at <= clock);
        self.pending = still;
        done.sort_by_key(|work| work.ready_at);

        for work in done {
            for copy in work.copies {
                self.execute_copy(copy);
            }
            if let Some(fence) = work.fence {
                if let Some(state) = self.fences.get_mut(&fence) {
                    if *state == (FenceState::Pending { ready_at: work.ready_at }) {
                        *state = FenceState::Signaled;
                    }
                }
            }
        }
    }

    fn execute_copy(&mut self, copy: BufferCopy) {
        let source = match self.buffers.get(&copy.src) {
            Some(src) => {
                if !src.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
                    self.violations
                        .push(format!("copy from {:?} without TRANSFER_SRC", copy.src));
                    return;
                }
                if (src.data.len() as u64) < copy.size {
                    self.violations.push(format!("copy reads past the end of {:?}", copy.src));
                    return;
                }
                src.data[..copy.size as usize].to_vec()
            }
            None => {
                self.violation(format!("copy from destroyed buffer {:?}", copy.src));
                return;
            }
        };
        match self.buffers.get_mut(&copy.dst) {
            Some(dst) => {
                if !dst.usage.contains(vk::BufferUsageFlags::TRANSFER_DST) {
                    self.violations
                        .push(format!("copy into {:?} without TRANSFER_DST", copy.dst));
                } else if (dst.data.len() as u64) < copy.size {
                    self.violations.push(format!("copy writes past the end of {:?}", copy.dst));
                } else {
                    dst.data[..source.len()].copy_from_slice(&source);
                }
            }
            None => self.violation(format!("copy into destroyed buffer {:?}", copy.dst)),
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> bool {
        match self.fences.get(&fence) {
            Some(FenceState::Signaled) => true,
            Some(FenceState::Pending { ready_at }) => *ready_at <= self.clock,
            _ => false,
        }
    }

    fn check_device(&self) -> RenderResult<()> {
        if self.device_lost {
            Err(RenderError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn check_surface(&self) -> RenderResult<()> {
        self.check_device()?;
        if self.surface_lost {
            Err(RenderError::SurfaceLost)
        } else {
            Ok(())
        }
    }
}

pub struct SimDevice {
    state: Mutex<SimState>,
}

impl SimDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState::new()),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock()
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.values().filter(|&&k| k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    /// Let the GPU run for `ticks` while the CPU does something else
    pub fn advance(&self, ticks: u64) {
        let mut state = self.state.lock();
        let target = state.clock + ticks;
        state.advance_to(target);
    }

    pub fn set_extent(&self, width: u32, height: u32) {
        self.state.lock().extent = vk::Extent2D { width, height };
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<SimEvent> {
        std::mem::take(&mut self.state.lock().events)
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn assert_clean(&self) {
        let violations = self.violations();
        assert!(violations.is_empty(), "device misuse: {:#?}", violations);
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fence_signaled(fence)
    }

    /// Completion time of the fence's pending submission, if any
    pub fn fence_ready_at(&self, fence: vk::Fence) -> Option<u64> {
        match self.state.lock().fences.get(&fence) {
            Some(FenceState::Pending { ready_at }) => Some(*ready_at),
            _ => None,
        }
    }

    pub fn buffer_usage(&self, buffer: vk::Buffer) -> Option<vk::BufferUsageFlags> {
        self.state.lock().buffers.get(&buffer).map(|b| b.usage)
    }

    pub fn buffer_location(&self, buffer: vk::Buffer) -> Option<MemoryLocation> {
        self.state.lock().buffers.get(&buffer).map(|b| b.location)
    }

    /// A free-standing image, for deletion tests
    pub fn create_test_image(&self) -> vk::Image {
        self.state.lock().create(ObjectKind::Image)
    }

    pub fn note(&self, label: &'static str) {
        self.state.lock().events.push(SimEvent::Note(label));
    }

    pub fn count_events(&self, matches: impl Fn(&SimEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| matches(e)).count()
    }

    pub fn swapchains_created(&self) -> usize {
        self.count_events(|e| matches!(e, SimEvent::CreateSwapchain { .. }))
    }

    pub fn presents(&self) -> usize {
        self.count_events(|e| matches!(e, SimEvent::Present { .. }))
    }
}

impl RenderDevice for SimDevice {
    fn wait_idle(&self) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        let last = state.pending.iter().map(|w| w.ready_at).max().unwrap_or(0);
        state.advance_to(last);
        state.events.push(SimEvent::WaitIdle);
        Ok(())
    }

    fn queue_wait_idle(&self, queue: QueueRole) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        let last = state
            .pending
            .iter()
            .filter(|w| w.queue == queue)
            .map(|w| w.ready_at)
            .max()
            .unwrap_or(0);
        state.advance_to(last);
        state.events.push(SimEvent::QueueWaitIdle(queue));
        Ok(())
    }

    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        Ok(self.state.lock().create(ObjectKind::Semaphore))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        state.acquired_by.remove(&semaphore);
        state.unwaited_semaphores.remove(&semaphore);
        state.release(semaphore, ObjectKind::Semaphore);
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = state.create(ObjectKind::Fence);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if !state.device_lost && matches!(state.fences.get(&fence), Some(FenceState::Pending { .. }))
            && !state.fence_signaled(fence)
        {
            state.violation(format!("destroyed in-flight fence {:?}", fence));
        }
        state.fences.remove(&fence);
        state.release(fence, ObjectKind::Fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => {
                state.events.push(SimEvent::WaitFence {
                    fence,
                    blocked: false,
                });
                Ok(())
            }
            Some(FenceState::Pending { ready_at }) => {
                let blocked = ready_at > state.clock;
                state.advance_to(ready_at);
                state.events.push(SimEvent::WaitFence { fence, blocked });
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                state.violation(format!("wait on {:?}, which nothing will signal", fence));
                Err(RenderError::Timeout)
            }
            None => {
                state.violation(format!("wait on unknown fence {:?}", fence));
                Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        if !state.fence_signaled(fence)
            && matches!(state.fences.get(&fence), Some(FenceState::Pending { .. }))
        {
            state.violation(format!("reset of in-flight fence {:?}", fence));
        }
        state.fences.insert(fence, FenceState::Unsignaled);
        state.events.push(SimEvent::ResetFence(fence));
        Ok(())
    }

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let state = self.state.lock();
        state.check_surface()?;
        Ok(SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: state.min_image_count,
                max_image_count: state.max_image_count,
                current_extent: state.extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: state.formats.clone(),
            present_modes: state.present_modes.clone(),
        })
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let mut state = self.state.lock();
        state.check_surface()?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("swapchain created with a zero-area extent".to_string());
        }
        if !state.swapchains.is_empty() {
            state.violation("second swapchain created while one is still alive".to_string());
        }
        if !state.present_modes.contains(&desc.present_mode) {
            state.violation(format!("unsupported present mode {:?}", desc.present_mode));
        }

        let swapchain: vk::SwapchainKHR = state.create(ObjectKind::Swapchain);
        let mut images = Vec::with_capacity(desc.min_image_count as usize);
        for _ in 0..desc.min_image_count {
            state.next_handle += 1;
            let image = vk::Image::from_raw(state.next_handle);
            state.image_owner.insert(image, swapchain);
            images.push(image);
        }
        state.swapchains.insert(swapchain, SimSwapchain { images, next: 0 });
        state.events.push(SimEvent::CreateSwapchain {
            extent: desc.extent,
            image_count: desc.min_image_count,
            format: desc.format.format,
            present_mode: desc.present_mode,
        });
        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        let state = self.state.lock();
        state
            .swapchains
            .get(&swapchain)
            .map(|s| s.images.clone())
            .ok_or(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state.lock();
        let Some(chain) = state.swapchains.remove(&swapchain) else {
            state.violation(format!("destroy of unknown swapchain {:?}", swapchain));
            return;
        };
        let images: HashSet<vk::Image> = chain.images.iter().copied().collect();
        let dangling = state
            .view_image
            .iter()
            .filter(|(view, image)| {
                images.contains(*image) && state.is_live(view.as_raw(), ObjectKind::ImageView)
            })
            .count();
        if dangling > 0 {
            state.violation(format!("swapchain destroyed before {} of its views", dangling));
        }
        for image in &images {
            state.image_owner.remove(image);
        }
        state.acquired.retain(|(owner, _)| *owner != swapchain);
        state.acquired_by.retain(|_, (owner, _)| *owner != swapchain);
        state.image_busy_until.retain(|(owner, _), _| *owner != swapchain);
        state.release(swapchain, ObjectKind::Swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome> {
        let mut state = self.state.lock();
        state.check_surface()?;
        let Some((image_count, next)) = state
            .swapchains
            .get(&swapchain)
            .map(|chain| (chain.images.len() as u32, chain.next))
        else {
            state.violation(format!("acquire from unknown swapchain {:?}", swapchain));
            return Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };
        let round_robin = next % image_count;

        let outcome = match state.acquire_script.pop_front() {
            Some(scripted) => scripted?,
            None => {
                if let Some(chain) = state.swapchains.get_mut(&swapchain) {
                    chain.next += 1;
                }
                AcquireOutcome::Ready(round_robin)
            }
        };

        if let Some(index) = outcome.image_index() {
            if !state.acquired.insert((swapchain, index)) {
                state.violation(format!("image {} acquired twice without a present", index));
            }
            if !state.unwaited_semaphores.insert(signal) {
                state.violation(format!(
                    "acquire signals {:?}, which already has an unwaited signal",
                    signal
                ));
            }
            state.acquired_by.insert(signal, (swapchain, index));
        }
        state.events.push(SimEvent::Acquire(outcome));
        Ok(outcome)
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let mut state = self.state.lock();
        state.check_surface()?;
        if !state.acquired.remove(&(swapchain, image_index)) {
            state.violation(format!("presented image {} without acquiring it", image_index));
        }
        state.events.push(SimEvent::Present { image_index });
        state
            .present_script
            .pop_front()
            .unwrap_or(Ok(PresentOutcome::Presented))
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> RenderResult<vk::ImageView> {
        let mut state = self.state.lock();
        if !state.image_owner.contains_key(&image) && !state.is_live(image.as_raw(), ObjectKind::Image) {
            state.violation(format!("view of unknown image {:?}", image));
        }
        let view = state.create(ObjectKind::ImageView);
        state.view_image.insert(view, image);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut state = self.state.lock();
        let users = state
            .framebuffer_view
            .iter()
            .filter(|(fb, v)| **v == view && state.is_live(fb.as_raw(), ObjectKind::Framebuffer))
            .count();
        if users > 0 {
            state.violation(format!("image view destroyed before {} framebuffers", users));
        }
        state.view_image.remove(&view);
        state.release(view, ObjectKind::ImageView);
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut state = self.state.lock();
        if state.image_owner.contains_key(&image) {
            state.violation(format!("destroyed swapchain-owned image {:?}", image));
            return;
        }
        let views = state
            .view_image
            .iter()
            .filter(|(view, i)| **i == image && state.is_live(view.as_raw(), ObjectKind::ImageView))
            .count();
        if views > 0 {
            state.violation(format!("image destroyed before {} views", views));
        }
        state.release(image, ObjectKind::Image);
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let mut state = self.state.lock();
        if !state.is_live(view.as_raw(), ObjectKind::ImageView) {
            state.violation(format!("framebuffer on dead view {:?}", view));
        }
        if extent.width == 0 || extent.height == 0 {
            state.violation("zero-area framebuffer".to_string());
        }
        let framebuffer = state.create(ObjectKind::Framebuffer);
        state.framebuffer_view.insert(framebuffer, view);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut state = self.state.lock();
        state.framebuffer_view.remove(&framebuffer);
        state.release(framebuffer, ObjectKind::Framebuffer);
    }

    fn create_command_pool(&self, _queue: QueueRole) -> RenderResult<vk::CommandPool> {
        Ok(self.state.lock().create(ObjectKind::CommandPool))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut state = self.state.lock();
        // Buffers still allocated from the pool go with it
        let owned: Vec<vk::CommandBuffer> = state
            .command_pool_of
            .iter()
            .filter(|(_, p)| **p == pool)
            .map(|(cmd, _)| *cmd)
            .collect();
        for cmd in owned {
            state.command_pool_of.remove(&cmd);
            state.commands.remove(&cmd);
            state.live.remove(&cmd.as_raw());
        }
        state.release(pool, ObjectKind::CommandPool);
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> RenderResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        if !state.is_live(pool.as_raw(), ObjectKind::CommandPool) {
            state.violation(format!("allocation from dead pool {:?}", pool));
        }
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cmd: vk::CommandBuffer = state.create(ObjectKind::CommandBuffer);
            state.commands.insert(cmd, CommandState::default());
            state.command_pool_of.insert(cmd, pool);
            buffers.push(cmd);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        for &cmd in buffers {
            if state.command_pool_of.get(&cmd) != Some(&pool) {
                state.violation(format!("{:?} freed into the wrong pool", cmd));
            }
            let busy_until = state.commands.get(&cmd).map(|c| c.busy_until).unwrap_or(0);
            if busy_until > state.clock && !state.device_lost {
                state.violation(format!("{:?} freed while in flight", cmd));
            }
            state.commands.remove(&cmd);
            state.command_pool_of.remove(&cmd);
            state.release(cmd, ObjectKind::CommandBuffer);
        }
    }

    fn begin_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        _usage: vk::CommandBufferUsageFlags,
    ) -> RenderResult<()> {
        let mut state = self.state.lock();
        let clock = state.clock;
        let busy = match state.commands.get_mut(&command_buffer) {
            Some(cmd) => {
                let busy = cmd.busy_until > clock;
                cmd.recording = true;
                cmd.copies.clear();
                busy
            }
            None => {
                state.violation(format!("begin on unknown {:?}", command_buffer));
                return Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN));
            }
        };
        if busy {
            state.violation(format!("{:?} re-recorded while in flight", command_buffer));
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut state = self.state.lock();
        match state.commands.get_mut(&command_buffer) {
            Some(cmd) if cmd.recording => {
                cmd.recording = false;
                Ok(())
            }
            _ => {
                state.violation(format!("end on {:?}, which isn't recording", command_buffer));
                Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn cmd_copy_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let mut state = self.state.lock();
        match state.commands.get_mut(&command_buffer) {
            Some(cmd) if cmd.recording => cmd.copies.push(BufferCopy { src, dst, size }),
            _ => state.violation(format!("copy recorded outside recording on {:?}", command_buffer)),
        }
    }

    fn queue_submit(&self, queue: QueueRole, submission: &Submission) -> RenderResult<()> {
        let mut state = self.state.lock();
        state.check_device()?;
        if queue == QueueRole::Transfer && state.reject_transfer_submits {
            return Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN));
        }

        let ready_at = state.clock + state.latency;
        let cmd = submission.command_buffer;

        let copies = match state.commands.get_mut(&cmd) {
            Some(command) if !command.recording => {
                command.busy_until = ready_at;
                command.copies.clone()
            }
            Some(_) => {
                state.violation(format!("{:?} submitted while still recording", cmd));
                Vec::new()
            }
            None => {
                state.violation(format!("submit of unknown {:?}", cmd));
                Vec::new()
            }
        };
        for copy in &copies {
            for buffer in [copy.src, copy.dst] {
                if let Some(b) = state.buffers.get_mut(&buffer) {
                    b.busy_until = b.busy_until.max(ready_at);
                }
            }
        }

        if let Some(fence) = submission.fence {
            if state.fences.get(&fence) != Some(&FenceState::Unsignaled) {
                state.violation(format!("submit with fence {:?} not reset", fence));
            }
            state.fences.insert(fence, FenceState::Pending { ready_at });
        }

        if let Some((semaphore, _)) = submission.wait {
            state.unwaited_semaphores.remove(&semaphore);
            if let Some(image) = state.acquired_by.remove(&semaphore) {
                let clock = state.clock;
                if state.image_busy_until.get(&image).is_some_and(|&until| until > clock) {
                    state.violation(format!(
                        "swap image {} targeted by two frames in flight",
                        image.1
                    ));
                }
                state.image_busy_until.insert(image, ready_at);
            }
        }

        state.pending.push(PendingWork {
            queue,
            ready_at,
            copies,
            fence: submission.fence,
        });
        state.events.push(SimEvent::Submit {
            queue,
            command_buffer: cmd,
            wait_stage: submission.wait.map(|(_, stage)| stage),
            fence: submission.fence,
        });

        if state.latency == 0 {
            let clock = state.clock;
            state.advance_to(clock);
        }
        Ok(())
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<vk::Buffer> {
        let mut state = self.state.lock();
        state.check_device()?;
        if size == 0 {
            state.violation("zero-sized buffer".to_string());
            return Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN));
        }
        match state.allocation_budget {
            Some(0) => {
                return Err(RenderError::AllocationFailure(
                    "simulated out of device memory".to_string(),
                ))
            }
            Some(left) => state.allocation_budget = Some(left - 1),
            None => {}
        }
        let buffer = state.create(ObjectKind::Buffer);
        state.buffers.insert(
            buffer,
            SimBuffer {
                data: vec![0; size as usize],
                usage,
                location,
                busy_until: 0,
            },
        );
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, data: &[u8]) -> RenderResult<()> {
        let mut state = self.state.lock();
        match state.buffers.get_mut(&buffer) {
            Some(b) if b.location == MemoryLocation::GpuOnly => Err(RenderError::AllocationFailure(
                "buffer is not host visible".to_string(),
            )),
            Some(b) if b.data.len() < data.len() => Err(RenderError::AllocationFailure(
                "write past the end of the buffer".to_string(),
            )),
            Some(b) => {
                b.data[..data.len()].copy_from_slice(data);
                Ok(())
            }
            None => {
                state.violation(format!("write to unknown buffer {:?}", buffer));
                Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn read_buffer(&self, buffer: vk::Buffer, len: usize) -> RenderResult<Vec<u8>> {
        let mut state = self.state.lock();
        match state.buffers.get(&buffer) {
            Some(b) if b.location == MemoryLocation::GpuOnly => Err(RenderError::AllocationFailure(
                "buffer is not host visible".to_string(),
            )),
            Some(b) => b
                .data
                .get(..len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| RenderError::AllocationFailure("read past the end".to_string())),
            None => {
                state.violation(format!("read from unknown buffer {:?}", buffer));
                Err(RenderError::Vulkan(vk::Result::ERROR_UNKNOWN))
            }
        }
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut state = self.state.lock();
        if let Some(b) = state.buffers.remove(&buffer) {
            if b.busy_until > state.clock && !state.device_lost {
                state.violation(format!("{:?} destroyed while the GPU still uses it", buffer));
            }
        }
        state.release(buffer, ObjectKind::Buffer);
    }
}

// ── Collaborators ───────────────────────────────────────────────────────────

/// Surface whose size is whatever the simulated device reports
pub struct SimSurface(pub Arc<SimDevice>);

impl SurfaceProvider for SimSurface {
    fn current_extent(&self) -> vk::Extent2D {
        self.0.state().extent
    }
}

/// Records which swap image each frame targeted
#[derive(Default)]
pub struct TraceRecorder {
    pub frames: Vec<FrameTarget>,
}

impl FrameRecorder<SimDevice> for TraceRecorder {
    fn record(&mut self, _device: &SimDevice, target: &FrameTarget) -> RenderResult<()> {
        self.frames.push(*target);
        Ok(())
    }
}

pub fn render_pass() -> vk::RenderPass {
    vk::RenderPass::from_raw(7)
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}
