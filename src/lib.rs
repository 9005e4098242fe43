// =============================================================================
// VK RENDER LOOP
// =============================================================================
//
// A Vulkan frame loop with N frames in flight:
//
// ┌─────────────────────────────────────────────────────────────────┐
// │  RenderLoopDriver (resize flag, one iteration per call)         │
// │    ├── FrameSyncController (per-slot semaphores + fences)       │
// │    ├── SwapchainManager (images, views, framebuffers, cmds)     │
// │    └── DeletionQueue (deferred, LIFO release)                   │
// │  StagedTransferUploader (host bytes -> device-local buffers)    │
// │  RenderDevice (the GPU, real or simulated)                      │
// └─────────────────────────────────────────────────────────────────┘

pub mod backend;
pub mod config;
pub mod renderer;
pub mod scene;
pub mod scene_pass;

pub use backend::{RenderDevice, RenderError, RenderResult};
pub use renderer::{
    DriverSettings, FrameRecorder, FrameStatus, FrameTarget, RenderLoopDriver, SurfaceProvider,
};
