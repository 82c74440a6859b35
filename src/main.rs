// Vulkan triangle renderer
//
// Startup order is strict: window/surface -> device context -> swapchain
// -> pipeline, then the frame scheduler runs until the window closes or
// Escape is pressed. The window is fixed-size; losing the surface is
// fatal rather than triggering swapchain recreation.

mod backend;
mod config;
mod error;
mod frame;
mod renderer;

use anyhow::{Context, Result};
use config::Config;
use frame::{FrameOutcome, FrameScheduler};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use renderer::VulkanRenderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting Vulkan triangle renderer");
    log::info!(
        "Window: {}x{}, preferred present mode: {}",
        config.window.width,
        config.window.height,
        config.graphics.present_mode
    );

    let event_loop = EventLoop::new().context("failed to create event loop")?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // A fatal render error exits nonzero with its diagnostic on stderr;
    // a plain window close exits clean
    if let Some(e) = app.fatal.take() {
        return Err(e);
    }
    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Application state driven by the winit event loop.
struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<VulkanRenderer>,
    scheduler: FrameScheduler,
    /// First fatal error observed in the loop; reported from `main`
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            scheduler: FrameScheduler::new(),
            fatal: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let renderer = VulkanRenderer::new(
            &self.config,
            window.raw_display_handle(),
            window.raw_window_handle(),
        )?;
        self.renderer = Some(renderer);
        Ok(())
    }

    fn render_frame(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match self.scheduler.run_frame(renderer) {
            Ok(FrameOutcome::Presented) => self.update_fps(),
            // No image in time; just try again next iteration
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => {
                log::error!("Fatal render error: {e}");
                self.fatal = Some(e.into());
                event_loop.exit();
            }
        }
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        self.frame_count += 1;
        let elapsed = self.last_fps_update.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;
            if let Some(ref window) = self.window {
                window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
            }
            self.frame_count = 0;
            self.last_fps_update = Instant::now();
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        // Fixed-size window: swapchain recreation on resize is out of scope
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                self.fatal = Some(e.into());
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Failed to initialize renderer: {e:#}");
            self.fatal = Some(e);
            event_loop.exit();
            return;
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

            WindowEvent::RedrawRequested => {
                self.render_frame(event_loop);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("Escape pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    /// Drain in-flight GPU work before any resource is torn down. The
    /// renderer itself drops with the App, in reverse creation order.
    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = self.scheduler.drain(renderer) {
                log::warn!("Device-idle wait failed during shutdown: {e}");
            }
        }
        log::info!(
            "Rendered {} frames",
            self.scheduler.frames_presented()
        );
    }
}
