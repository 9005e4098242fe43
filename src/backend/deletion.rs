// Deferred destruction of GPU-owned handles
//
// Resources are pushed here when they're created and released in reverse
// order on flush, which mirrors their dependency order. Flushing is only
// valid once the fences protecting the resources have signalled (or the
// device is idle); the queue itself doesn't check.

use ash::vk;
use std::sync::Arc;

use super::RenderDevice;

/// A single pending release
pub enum Deletion<D> {
    Buffer(vk::Buffer),
    Image(vk::Image),
    ImageView(vk::ImageView),
    Framebuffer(vk::Framebuffer),
    CommandBuffers {
        pool: vk::CommandPool,
        buffers: Vec<vk::CommandBuffer>,
    },
    CommandPool(vk::CommandPool),
    Swapchain(vk::SwapchainKHR),
    Closure(Box<dyn FnOnce(&D)>),
}

impl<D: RenderDevice> Deletion<D> {
    fn release(self, device: &D) {
        match self {
            Deletion::Buffer(buffer) => device.destroy_buffer(buffer),
            Deletion::Image(image) => device.destroy_image(image),
            Deletion::ImageView(view) => device.destroy_image_view(view),
            Deletion::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer),
            Deletion::CommandBuffers { pool, buffers } => {
                if !buffers.is_empty() {
                    device.free_command_buffers(pool, &buffers);
                }
            }
            Deletion::CommandPool(pool) => device.destroy_command_pool(pool),
            Deletion::Swapchain(swapchain) => device.destroy_swapchain(swapchain),
            Deletion::Closure(release) => release(device),
        }
    }
}

impl<D> std::fmt::Debug for Deletion<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Deletion::Buffer(h) => write!(f, "Buffer({:?})", h),
            Deletion::Image(h) => write!(f, "Image({:?})", h),
            Deletion::ImageView(h) => write!(f, "ImageView({:?})", h),
            Deletion::Framebuffer(h) => write!(f, "Framebuffer({:?})", h),
            Deletion::CommandBuffers { pool, buffers } => {
                write!(f, "CommandBuffers({:?}, {} buffers)", pool, buffers.len())
            }
            Deletion::CommandPool(h) => write!(f, "CommandPool({:?})", h),
            Deletion::Swapchain(h) => write!(f, "Swapchain({:?})", h),
            Deletion::Closure(_) => write!(f, "Closure"),
        }
    }
}

/// Ordered list of pending releases, drained last-in first-out.
pub struct DeletionQueue<D: RenderDevice> {
    device: Arc<D>,
    entries: Vec<Deletion<D>>,
}

impl<D: RenderDevice> DeletionQueue<D> {
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            entries: Vec::new(),
        }
    }

    pub fn enqueue(&mut self, entry: Deletion<D>) {
        self.entries.push(entry);
    }

    /// Queue an arbitrary release action.
    pub fn defer(&mut self, release: impl FnOnce(&D) + 'static) {
        self.entries.push(Deletion::Closure(Box::new(release)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every entry, newest first, until the queue is empty.
    ///
    /// The caller must already have waited on the fences guarding these
    /// resources, or on device idle.
    pub fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        log::trace!("Flushing {} deferred deletions", self.entries.len());
        while let Some(entry) = self.entries.pop() {
            entry.release(&self.device);
        }
    }
}

impl<D: RenderDevice> Drop for DeletionQueue<D> {
    fn drop(&mut self) {
        if !self.entries.is_empty() {
            log::warn!(
                "Deletion queue dropped with {} pending entries, releasing now",
                self.entries.len()
            );
            self.flush();
        }
    }
}
