// Staged buffer uploads
//
// Host bytes go into a host-visible staging buffer, then a one-time command
// buffer copies them into device-local memory on the transfer queue. Every
// upload blocks until the transfer queue is idle, which is fine for startup
// loads but not for per-frame streaming.

use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::{QueueRole, RenderDevice, RenderError, RenderResult, Submission};

/// A device-local buffer produced by an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceBuffer {
    pub buffer: vk::Buffer,
    /// Bytes of meaningful content (the allocation may be larger)
    pub size: vk::DeviceSize,
}

pub struct StagedTransferUploader<D: RenderDevice> {
    device: Arc<D>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
}

impl<D: RenderDevice> StagedTransferUploader<D> {
    pub fn new(device: Arc<D>) -> RenderResult<Self> {
        let command_pool = device.create_command_pool(QueueRole::Transfer)?;
        let command_buffer = match device.allocate_command_buffers(command_pool, 1) {
            Ok(buffers) if !buffers.is_empty() => buffers[0],
            Ok(_) => {
                device.destroy_command_pool(command_pool);
                return Err(RenderError::AllocationFailure(
                    "no transfer command buffer returned".to_string(),
                ));
            }
            Err(e) => {
                device.destroy_command_pool(command_pool);
                return Err(e);
            }
        };

        Ok(Self {
            device,
            command_pool,
            command_buffer,
        })
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Copy `bytes` into a new device-local buffer with `usage | TRANSFER_DST`.
    ///
    /// The destination is fully written when this returns.
    pub fn upload(&mut self, usage: vk::BufferUsageFlags, bytes: &[u8]) -> RenderResult<DeviceBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        let usage = usage | vk::BufferUsageFlags::TRANSFER_DST;

        if bytes.is_empty() {
            // Vulkan forbids zero-sized buffers; hand back a minimal one with nothing to copy
            let buffer = self.device.create_buffer(1, usage, MemoryLocation::GpuOnly)?;
            return Ok(DeviceBuffer { buffer, size: 0 });
        }

        let staging = self.device.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;

        let result = self
            .device
            .write_buffer(staging, bytes)
            .and_then(|()| self.device.create_buffer(size, usage, MemoryLocation::GpuOnly))
            .and_then(|destination| match self.copy(staging, destination, size) {
                Ok(()) => Ok(destination),
                Err(e) => {
                    self.device.destroy_buffer(destination);
                    Err(e)
                }
            });

        // The copy has completed (or never started), so staging can go
        self.device.destroy_buffer(staging);

        let buffer = result?;
        log::debug!("Uploaded {} bytes to device-local buffer", size);
        Ok(DeviceBuffer { buffer, size })
    }

    /// Upload a slice of plain-old-data values.
    pub fn upload_slice<T: bytemuck::Pod>(
        &mut self,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> RenderResult<DeviceBuffer> {
        self.upload(usage, bytemuck::cast_slice(data))
    }

    /// Read a device-local buffer back to the host through a staging buffer.
    ///
    /// The buffer must have been created with `TRANSFER_SRC` usage.
    pub fn readback(&mut self, source: &DeviceBuffer) -> RenderResult<Vec<u8>> {
        if source.size == 0 {
            return Ok(Vec::new());
        }

        let staging = self.device.create_buffer(
            source.size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
        )?;
        let result = self
            .copy(source.buffer, staging, source.size)
            .and_then(|()| self.device.read_buffer(staging, source.size as usize));
        self.device.destroy_buffer(staging);
        result
    }

    /// Record, submit and wait for a single buffer-to-buffer copy.
    fn copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> RenderResult<()> {
        let cmd = self.command_buffer;
        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        self.device.cmd_copy_buffer(cmd, src, dst, size);
        self.device.end_command_buffer(cmd)?;

        self.device
            .queue_submit(QueueRole::Transfer, &Submission::new(cmd))
            .map_err(transfer_failure)?;
        self.device.queue_wait_idle(QueueRole::Transfer)
    }
}

// A lost device stays a lost device; any other rejection is a failed transfer
fn transfer_failure(error: RenderError) -> RenderError {
    match error {
        RenderError::DeviceLost | RenderError::TransferFailure(_) => error,
        other => RenderError::TransferFailure(other.to_string()),
    }
}

impl<D: RenderDevice> Drop for StagedTransferUploader<D> {
    fn drop(&mut self) {
        // Every copy waited for queue idle, nothing is pending here
        self.device.destroy_command_pool(self.command_pool);
    }
}
