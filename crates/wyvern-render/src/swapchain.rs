//! Swapchain and the render targets derived from it.

use crate::error::{RenderError, Result};
use crate::platform::PlatformContext;
use ash::vk;
use wyvern_gpu::{
    calculate_extent, select_image_count, select_present_mode, AcquireStatus, AttachmentImage,
    GpuError, PresentStatus, RenderDevice, SwapchainDesc,
};

/// Outcome of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// Image index to render into.
    Image(u32),
    /// The swapchain is stale (out of date, suboptimal or the window was resized).
    NeedsRecreate,
}

/// Inputs that stay fixed across recreations.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub vsync: bool,
}

/// Presentable images plus the views, depth attachment and framebuffers built on
/// them. Created and destroyed as one unit.
pub struct Swapchain<D: RenderDevice> {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<D::Image>,
    framebuffers: Vec<vk::Framebuffer>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl<D: RenderDevice> Swapchain<D> {
    /// Create the swapchain and its render targets.
    ///
    /// While the drawable extent is zero (minimized window) this waits on
    /// platform events and polls again; it returns once the extent is non-zero.
    /// On failure every part built so far is destroyed.
    pub fn create<P: PlatformContext>(
        device: &D,
        platform: &mut P,
        settings: &SwapchainSettings,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let (support, extent) = wait_for_drawable(device, platform)?;

        let format_supported = support.formats.iter().any(|f| {
            f.format == settings.surface_format.format
                && f.color_space == settings.surface_format.color_space
        });
        if !format_supported {
            return Err(GpuError::SwapchainCreation(format!(
                "surface no longer offers {:?}",
                settings.surface_format.format
            ))
            .into());
        }

        let desc = SwapchainDesc {
            surface_format: settings.surface_format,
            present_mode: select_present_mode(&support.present_modes, settings.vsync),
            extent,
            image_count: select_image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
        };

        let (handle, images) = device.create_swapchain(&desc)?;

        let mut swapchain = Self {
            handle,
            images,
            image_views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            surface_format: desc.surface_format,
            present_mode: desc.present_mode,
            extent,
        };

        if let Err(e) = swapchain.build_targets(device, render_pass, settings.depth_format) {
            swapchain.destroy(device);
            return Err(e);
        }

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = swapchain.images.len(),
            present_mode = ?desc.present_mode,
            "Created swapchain"
        );

        Ok(swapchain)
    }

    fn build_targets(
        &mut self,
        device: &D,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<()> {
        for &image in &self.images {
            let view = device.create_image_view(
                image,
                self.surface_format.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            self.image_views.push(view);
        }

        let depth = device.create_depth_image(self.extent, depth_format)?;
        let depth_view = depth.view();
        self.depth = Some(depth);

        for &view in &self.image_views {
            let framebuffer =
                device.create_framebuffer(render_pass, &[view, depth_view], self.extent)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// A pending resize flag short-circuits to [`AcquireResult::NeedsRecreate`]
    /// without touching the swapchain.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next<P: PlatformContext>(
        &self,
        device: &D,
        platform: &mut P,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireResult> {
        if platform.take_resize_pending() {
            tracing::debug!("Resize pending, skipping acquire");
            return Ok(AcquireResult::NeedsRecreate);
        }

        match device.acquire_next_image(self.handle, semaphore, u64::MAX)? {
            AcquireStatus::Acquired {
                index,
                suboptimal: false,
            } => Ok(AcquireResult::Image(index)),
            AcquireStatus::Acquired {
                suboptimal: true, ..
            } => {
                tracing::debug!("Swapchain suboptimal at acquire");
                Ok(AcquireResult::NeedsRecreate)
            }
            AcquireStatus::OutOfDate => {
                tracing::debug!("Swapchain out of date at acquire");
                Ok(AcquireResult::NeedsRecreate)
            }
        }
    }

    /// Queue `image_index` for presentation after `wait_semaphore`.
    pub fn present(
        &self,
        device: &D,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentStatus> {
        Ok(device.queue_present(self.handle, image_index, wait_semaphore)?)
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Framebuffer for swapchain image `image_index`.
    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::SyncViolation(format!(
                    "image index {image_index} outside swapchain of {}",
                    self.framebuffers.len()
                ))
            })
    }

    /// Destroy framebuffers, depth attachment, views and the swapchain.
    ///
    /// The device must be idle.
    pub fn destroy(mut self, device: &D) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }
        if let Some(depth) = self.depth.take() {
            if let Err(e) = device.destroy_depth_image(depth) {
                tracing::warn!("Failed to free depth image: {e}");
            }
        }
        for view in self.image_views.drain(..) {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.handle);
    }
}

/// Poll surface support until the drawable extent is non-zero.
fn wait_for_drawable<D: RenderDevice, P: PlatformContext>(
    device: &D,
    platform: &mut P,
) -> Result<(wyvern_gpu::SurfaceSupport, vk::Extent2D)> {
    let mut polls = 0u32;
    loop {
        let support = device.surface_support()?;
        let drawable = platform.drawable_extent();
        let extent = calculate_extent(&support.capabilities, drawable);

        let visible = drawable.width > 0 && drawable.height > 0;
        if visible && extent.width > 0 && extent.height > 0 {
            if polls > 0 {
                tracing::debug!(polls, "Drawable extent restored");
            }
            return Ok((support, extent));
        }

        if polls == 0 {
            tracing::info!("Drawable extent is zero, waiting for the window to be restored");
        }
        polls = polls.saturating_add(1);
        platform.wait_events();
    }
}
