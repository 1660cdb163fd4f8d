//! Collaborators supplied by the embedding application.

use crate::error::Result;
use ash::vk;
use wyvern_gpu::RenderDevice;

/// Window-system services the renderer needs.
pub trait PlatformContext {
    /// Current drawable size in pixels; zero while minimized.
    fn drawable_extent(&self) -> vk::Extent2D;

    /// Return and clear the "framebuffer resized" flag.
    fn take_resize_pending(&mut self) -> bool;

    /// Block until window events arrive. Called while the drawable extent is zero.
    fn wait_events(&mut self);
}

/// Records extra draw commands (a UI overlay, debug text) into the main render pass
/// just before it ends.
pub trait OverlayRenderer<D: RenderDevice> {
    fn record(
        &mut self,
        device: &D,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> Result<()>;
}
