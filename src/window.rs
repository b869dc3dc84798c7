//! Window host using winit
//!
//! Owns the window, the Vulkan context, the swapchain surface and the device,
//! and turns window events into lifecycle notifications for one handler.

use std::sync::Arc;

use winit::{
    dpi::PhysicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::backend::vulkan::{VulkanContext, VulkanDevice, VulkanSurface};
use crate::backend::{BackendError, Extent2d};
use crate::error::{Error, Result};
use crate::lifecycle::{InitArgs, LifecycleHandler};
use crate::HostConfig;

/// Wrapper around winit window with additional state
pub struct Window {
    window: WinitWindow,
    extent: Extent2d,
    resized: bool,
    close_requested: bool,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(event_loop: &EventLoop<()>, title: &str, width: u32, height: u32) -> Result<Self> {
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(event_loop)
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
        let size = window.inner_size();

        Ok(Self {
            window,
            extent: Extent2d::new(size.width, size.height),
            resized: false,
            close_requested: false,
        })
    }

    /// Get the raw window for backend initialization
    pub fn window(&self) -> &WinitWindow {
        &self.window
    }

    /// Current client area size
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Minimized windows have a zero-sized client area and are not drawn
    pub fn is_minimized(&self) -> bool {
        self.extent.is_empty()
    }

    /// Take the resize flag
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Force a swapchain rebuild on the next frame
    pub fn mark_resized(&mut self) {
        self.resized = true;
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    /// Handle window events
    pub fn handle_event(&mut self, event: &WindowEvent) {
        match event {
            WindowEvent::Resized(size) => {
                self.extent = Extent2d::new(size.width, size.height);
                self.resized = true;
            }
            WindowEvent::CloseRequested => {
                self.close_requested = true;
            }
            _ => {}
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

/// Everything the render loop touches between events
struct Host<'h, H: LifecycleHandler> {
    // Dropped in order: the swapchain and device go before the window
    surface: VulkanSurface,
    device: VulkanDevice,
    window: Window,
    handler: &'h mut H,
    max_frames: Option<u64>,
    frames: u64,
    closed: bool,
    outcome: Result<()>,
}

impl<H: LifecycleHandler> Host<'_, H> {
    /// Draw one frame. Returns false once the loop should stop.
    fn redraw(&mut self) -> bool {
        if self.window.take_resized() {
            if let Err(e) = self.resize() {
                return self.fail("Resize", e);
            }
        }
        if self.window.is_minimized() {
            return true;
        }

        let queue = self.device.graphics_queue();
        match self.handler.on_frame(&mut self.device, &mut self.surface, queue) {
            Ok(()) => {
                self.frames += 1;
                if self.max_frames.is_some_and(|max| self.frames >= max) {
                    log::info!("Reached {} frames, closing", self.frames);
                    return false;
                }
                true
            }
            Err(Error::Backend(BackendError::SurfaceLost)) => {
                log::debug!("Swapchain out of date, rebuilding before the next frame");
                self.window.mark_resized();
                true
            }
            Err(e) => self.fail("Frame", e),
        }
    }

    fn resize(&mut self) -> Result<()> {
        let extent = self.window.extent();
        if extent.is_empty() {
            log::debug!("Window minimized, skipping swapchain rebuild");
            return Ok(());
        }
        self.surface.recreate(extent)?;
        self.handler.on_resize(&mut self.device, &self.surface)
    }

    fn fail(&mut self, what: &str, e: Error) -> bool {
        log::error!("{} failed: {}", what, e);
        self.outcome = Err(e);
        false
    }

    /// Wait for the GPU, then let the handler release everything. Runs once.
    fn close(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device wait before close failed: {}", e);
        }
        if let Err(e) = self.handler.on_close(&mut self.device) {
            log::error!("Close failed: {}", e);
            if self.outcome.is_ok() {
                self.outcome = Err(e);
            }
        }
    }
}

/// Open a window and drive `handler` until the window closes, a frame fails or
/// `config.max_frames` frames have been presented
pub fn run<H: LifecycleHandler>(config: &HostConfig, handler: &mut H) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|e| BackendError::InitializationFailed(e.to_string()))?;
    let window = Window::new(&event_loop, &config.title, config.width, config.height)?;

    let context = Arc::new(VulkanContext::new(window.window(), config.validation)?);
    let surface = VulkanSurface::new(
        Arc::clone(&context),
        window.extent(),
        config.vsync,
        handler.needs_depth_attachment(),
    )?;
    let device = VulkanDevice::new(context);
    let args = InitArgs {
        graphics_queue: device.graphics_queue(),
        graphics_queue_family: device.graphics_queue_family(),
    };

    let mut host = Host {
        surface,
        device,
        window,
        handler,
        max_frames: config.max_frames,
        frames: 0,
        closed: false,
        outcome: Ok(()),
    };

    if let Err(e) = host.handler.on_init(&mut host.device, &host.surface, args) {
        log::error!("Initialization failed: {}", e);
        host.close();
        return Err(e);
    }

    event_loop
        .run(|event, elwt: &EventLoopWindowTarget<()>| {
            elwt.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => {
                    host.window.handle_event(&event);

                    match event {
                        WindowEvent::CloseRequested => elwt.exit(),
                        WindowEvent::RedrawRequested => {
                            if !host.redraw() {
                                elwt.exit();
                            }
                        }
                        _ => {}
                    }
                }
                Event::AboutToWait => {
                    if !host.window.should_close() {
                        host.window.request_redraw();
                    }
                }
                Event::LoopExiting => host.close(),
                _ => {}
            }
        })
        .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

    host.close();
    log::info!("Presented {} frames", host.frames);
    host.outcome
}
