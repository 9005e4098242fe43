// =============================================================================
// VULKAN RENDER LOOP DEMO
// =============================================================================
//
// Opens a window and draws a triangle with the frame loop from the library.
//
// FRAME FLOW:
// 1. winit asks for a redraw
// 2. RenderLoopDriver waits on the frame slot, acquires a swap image
// 3. ScenePass records the clear + draw
// 4. The driver submits, presents and advances to the next slot
//
// Resizes, minimizing and fullscreen toggles only set the resize flag; the
// driver rebuilds the swapchain on its next frame.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Fullscreen, Window, WindowAttributes},
};

use vk_render_loop::backend::pipeline::{self, GraphicsPipeline};
use vk_render_loop::backend::{shader, StagedTransferUploader, SwapchainManager, VulkanDevice};
use vk_render_loop::config::Config;
use vk_render_loop::scene::{SceneUpload, TriangleScene};
use vk_render_loop::scene_pass::ScenePass;
use vk_render_loop::{FrameStatus, RenderLoopDriver, SurfaceProvider};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting Vulkan render loop");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;
    Ok(())
}

/// Initialize logging; RUST_LOG wins over the configured level
fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.debug.log_level.as_str()),
    )
    .init();
}

// =============================================================================
// SURFACE
// =============================================================================

/// The window as the driver sees it
struct WindowSurface<'a>(&'a Window);

impl SurfaceProvider for WindowSurface<'_> {
    fn current_extent(&self) -> vk::Extent2D {
        let size = self.0.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}

// =============================================================================
// GPU STATE
// =============================================================================

/// Everything that lives as long as the window's Vulkan device.
///
/// IMPORTANT: Field order matters for Drop! The driver must release the
/// swapchain's framebuffers before the render pass goes, and every holder
/// of the device `Arc` must be gone before the device itself.
struct Gpu {
    scene_pass: ScenePass,
    driver: RenderLoopDriver<VulkanDevice>,
    render_pass: vk::RenderPass,
    device: Arc<VulkanDevice>,
}

impl Gpu {
    /// Bring up the device, the render loop and the demo scene.
    fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device + surface
        // ─────────────────────────────────────────────────────────────────────
        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();
        let device = VulkanDevice::new(
            &config.window.title,
            enable_validation,
            display_handle,
            window_handle,
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Render pass against the format the swapchain will use
        // ─────────────────────────────────────────────────────────────────────
        let format = SwapchainManager::negotiate_format(device.as_ref())?;
        let render_pass = pipeline::create_render_pass(&device, format.format)?;

        let surface = WindowSurface(window);
        let driver = match RenderLoopDriver::new(
            device.clone(),
            render_pass,
            config.driver_settings(),
            surface.current_extent(),
        ) {
            Ok(driver) => driver,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                return Err(e).context("Failed to create render loop");
            }
        };

        // From here on Drop cleans up
        let mut gpu = Self {
            scene_pass: ScenePass::new(config.graphics.clear_color, None, Default::default()),
            driver,
            render_pass,
            device,
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pipeline (optional) and scene upload
        // ─────────────────────────────────────────────────────────────────────
        gpu.scene_pass.pipeline = load_pipeline(&gpu.device, render_pass, config)
            .map_err(|e| log::warn!("No triangle pipeline, clearing only: {:#}", e))
            .ok();

        let mut uploader = StagedTransferUploader::new(gpu.device.clone())?;
        gpu.scene_pass.scene = TriangleScene::default()
            .upload_meshes(&mut uploader)
            .context("Failed to upload scene")?;

        log::info!("Vulkan initialized successfully!");
        Ok(gpu)
    }
}

fn load_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    config: &Config,
) -> Result<GraphicsPipeline> {
    let dir = &config.graphics.shader_dir;
    let vert = shader::load_shader_module(device, &dir.join("triangle.vert.spv"))?;
    let frag = match shader::load_shader_module(device, &dir.join("triangle.frag.spv")) {
        Ok(frag) => frag,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert, None) };
            return Err(e);
        }
    };

    let pipeline = pipeline::create_graphics_pipeline(device, render_pass, vert, frag);

    // Modules are only needed while the pipeline is built
    unsafe {
        device.device.destroy_shader_module(vert, None);
        device.device.destroy_shader_module(frag, None);
    }
    pipeline
}

impl Drop for Gpu {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Waits for every frame in flight, then releases the swapchain set
        if let Err(e) = self.driver.shutdown() {
            log::error!("Failed to shut down render loop: {}", e);
        }

        // No frame can reference the scene anymore
        std::mem::take(&mut self.scene_pass.scene).release_into(self.driver.deletion_queue());
        self.driver.deletion_queue().flush();

        if let Some(pipeline) = self.scene_pass.pipeline.take() {
            pipeline.destroy(&self.device);
        }
        unsafe {
            self.device.device.destroy_render_pass(self.render_pass, None);
        }

        log::info!("Cleanup complete");
    }
}

// =============================================================================
// FRAME STATISTICS
// =============================================================================

/// Presented frames per second, refreshed about once a second
struct FrameCounter {
    window_start: Instant,
    presented_at_start: u64,
}

impl FrameCounter {
    fn new() -> Self {
        Self {
            window_start: Instant::now(),
            presented_at_start: 0,
        }
    }

    /// Returns (fps, average frame time in ms) once per interval
    fn sample(&mut self, presented: u64) -> Option<(f32, f32)> {
        let elapsed = self.window_start.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return None;
        }
        let frames = presented.saturating_sub(self.presented_at_start).max(1) as f32;
        self.window_start = Instant::now();
        self.presented_at_start = presented;
        Some((frames / elapsed, elapsed * 1000.0 / frames))
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Dropped before the window its surface belongs to
    gpu: Option<Gpu>,
    window: Option<Arc<Window>>,
    fullscreen: bool,
    counter: FrameCounter,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            fullscreen: config.window.fullscreen,
            config,
            gpu: None,
            window: None,
            counter: FrameCounter::new(),
        }
    }

    fn render_frame(&mut self) -> Result<FrameStatus> {
        let (Some(gpu), Some(window)) = (self.gpu.as_mut(), self.window.as_ref()) else {
            return Ok(FrameStatus::Skipped);
        };
        let status = gpu
            .driver
            .render_frame(&WindowSurface(window), &mut gpu.scene_pass)?;
        Ok(status)
    }

    fn request_resize(&mut self) {
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.driver.request_resize();
        }
    }

    /// Borderless fullscreen on the current monitor; the swapchain follows
    /// through the resize flag
    fn toggle_fullscreen(&mut self) {
        let Some(window) = self.window.as_ref() else {
            return;
        };
        self.fullscreen = !self.fullscreen;
        window.set_fullscreen(self.fullscreen.then_some(Fullscreen::Borderless(None)));
        log::info!("Fullscreen {}", if self.fullscreen { "on" } else { "off" });
        self.request_resize();
    }

    fn update_title(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }
        let (Some(gpu), Some(window)) = (self.gpu.as_ref(), self.window.as_ref()) else {
            return;
        };
        if let Some((fps, frame_ms)) = self.counter.sample(gpu.driver.frames_presented()) {
            let swapchain = gpu.driver.swapchain();
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) {}x{} {:?}",
                self.config.window.title,
                fps,
                frame_ms,
                swapchain.extent().width,
                swapchain.extent().height,
                swapchain.present_mode()
            ));
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        if self.config.window.fullscreen {
            window_attributes =
                window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                event_loop.exit();
                return;
            }
        };

        match Gpu::new(&window, &self.config) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                // Zero sizes too: the driver skips frames until the window is back
                self.request_resize();
            }

            WindowEvent::RedrawRequested => match self.render_frame() {
                Ok(FrameStatus::Presented) => self.update_title(),
                Ok(FrameStatus::Skipped | FrameStatus::Recreated) => {}
                Err(e) => {
                    // Device or surface lost; Drop releases what's still valid
                    log::error!("Render error: {:?}", e);
                    event_loop.exit();
                }
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(key) = event.physical_key {
                        match key {
                            KeyCode::Escape => {
                                log::info!("ESC pressed, exiting...");
                                event_loop.exit();
                            }
                            KeyCode::F11 => {
                                self.toggle_fullscreen();
                            }
                            _ => {}
                        }
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        // GPU state goes before the window it presents to
        self.gpu = None;
    }
}
