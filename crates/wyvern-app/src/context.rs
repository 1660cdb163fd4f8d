//! Application context.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use winit::window::Window;
use wyvern_gpu::{RenderDevice, VulkanDevice};
use wyvern_render::{FrameOrchestrator, GpuMesh};

use crate::config::AppConfig;
use crate::platform::WinitPlatform;

/// The renderer type driven by the runner.
pub type Renderer = FrameOrchestrator<VulkanDevice, WinitPlatform>;

/// A mesh uploaded through [`Renderer`].
pub type Mesh = GpuMesh<<VulkanDevice as RenderDevice>::Buffer>;

/// Application context shared across all app methods.
pub struct AppContext {
    /// Frame orchestrator; owns the device and the platform context.
    pub renderer: Renderer,
    /// The window handle.
    pub window: Arc<Window>,
    /// Configuration the application was started with.
    pub config: AppConfig,
    /// Time of last frame (for delta time calculation).
    pub(crate) last_frame_time: Instant,
}

impl AppContext {
    pub(crate) fn new(renderer: Renderer, window: Arc<Window>, config: AppConfig) -> Self {
        Self {
            renderer,
            window,
            config,
            last_frame_time: Instant::now(),
        }
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.renderer.extent()
    }

    /// Width over height of the swapchain, 1.0 while it has no area.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        if extent.height == 0 {
            1.0
        } else {
            extent.width as f32 / extent.height as f32
        }
    }

    /// Frames presented or skipped so far.
    pub fn frame_count(&self) -> u64 {
        self.renderer.frame_counter()
    }
}

/// Per-frame information handed to [`crate::WyvernApp::render`].
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// Frame slot in use.
    pub slot: usize,
    /// Extent of the render area.
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    /// Current frame number.
    pub frame_number: u64,
}
