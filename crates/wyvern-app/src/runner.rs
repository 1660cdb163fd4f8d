//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};
use wyvern_gpu::{GpuContextBuilder, VulkanDevice};
use wyvern_render::{
    AcquireResult, FrameOrchestrator, PresentOutcome, RenderError, SubmitStatus,
};

use crate::app::WyvernApp;
use crate::config::AppConfig;
use crate::context::{AppContext, FrameInfo};
use crate::platform::WinitPlatform;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
}

/// Run a `WyvernApp` with the given configuration.
///
/// Initializes logging, creates the window, device and renderer, and runs the
/// event loop until the window closes or rendering fails fatally.
pub fn run_app<A: WyvernApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging(&config.log_filter)?;

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
        failure: None,
    };
    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: WyvernApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
    failure: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: WyvernApp> {
    ctx: AppContext,
    app: A,
    target_frame_time: Option<Duration>,
    // FPS tracking
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl<A: WyvernApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => {
                error!("Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.render_frame() {
                    error!("Render error: {e:#}");
                    self.failure = Some(e);
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.ctx.renderer.platform_mut().notify_resized();
                    info!("Window resized to {}x{}", size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window.request_redraw();
        }
    }
}

impl<A: WyvernApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let pipeline = A::pipeline(&self.config)?;

        let builder = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation);
        let device = VulkanDevice::for_window(builder, window.as_ref())?;
        info!("GPU: {}", device.gpu().capabilities().summary());

        let renderer = FrameOrchestrator::new(
            device,
            WinitPlatform::new(Arc::clone(&window)),
            &pipeline,
            self.config.renderer.clone(),
        )?;

        let mut ctx = AppContext::new(renderer, window, self.config.clone());
        let app = A::init(&mut ctx)?;

        let target_frame_time = self
            .config
            .target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

        Ok(AppState {
            ctx,
            app,
            target_frame_time,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }
}

impl<A: WyvernApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        // Nothing can be presented while minimized; the swapchain is rebuilt
        // once the window has an area again.
        if self.ctx.renderer.platform().is_minimized() {
            return Ok(());
        }

        let frame_start = Instant::now();
        let dt = self.tick();

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.update").entered();
            self.app.update(&self.ctx, dt);
        }

        let image_index = match self.ctx.renderer.acquire_next_image() {
            Ok(AcquireResult::Image(index)) => index,
            Ok(AcquireResult::NeedsRecreate) => return self.resized(),
            Err(e) => return recoverable(e),
        };

        let Some(active) = self.ctx.renderer.active_frame() else {
            anyhow::bail!("acquired image {image_index} without an active frame");
        };
        self.ctx.renderer.begin_frame()?;
        let frame = FrameInfo {
            image_index,
            slot: active.slot,
            extent: self.ctx.extent(),
            dt,
            frame_number: self.ctx.frame_count(),
        };
        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record").entered();
            self.app.render(&mut self.ctx, &frame)?;
        }
        self.ctx.renderer.end_frame()?;

        if self.ctx.renderer.submit()? == SubmitStatus::Aborted {
            return self.resized();
        }
        if self.ctx.renderer.present()? == PresentOutcome::Recreated {
            self.resized()?;
        }

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }
        Ok(())
    }

    /// Advance the frame clock and return the delta time in seconds.
    fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let dt = now.duration_since(self.ctx.last_frame_time).as_secs_f32();
        self.ctx.last_frame_time = now;

        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.fps_samples += 1;
        }
        dt
    }

    fn resized(&mut self) -> anyhow::Result<()> {
        let extent = self.ctx.extent();
        self.app
            .on_resize(&mut self.ctx, extent.width, extent.height)
    }

    fn cleanup(&mut self) {
        if self.fps_samples > 0 {
            let avg_fps = self.fps_sum / self.fps_samples as f64;
            let stats = self.ctx.renderer.stats();
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", avg_fps);
            info!(
                "  Presented: {}, skipped: {}, swapchain recreations: {}",
                stats.frames_presented, stats.frames_skipped, stats.recreations
            );
        }

        info!("Starting cleanup...");
        if let Err(e) = self.ctx.renderer.wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&mut self.ctx);
        if let Err(e) = self.ctx.renderer.shutdown() {
            error!("Renderer shutdown failed: {e}");
        }
        info!("Cleanup complete");
    }
}

/// Keep running after errors that only cost a frame.
fn recoverable(e: RenderError) -> anyhow::Result<()> {
    if e.is_fatal() {
        Err(e.into())
    } else {
        warn!("Frame skipped: {e}");
        Ok(())
    }
}
