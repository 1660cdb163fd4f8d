//! Scripted platform and overlay collaborators.

use ash::vk;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use wyvern_gpu::RenderDevice;
use wyvern_render::{OverlayRenderer, PlatformContext};

#[derive(Debug)]
struct PlatformState {
    extent: vk::Extent2D,
    /// Extents reported by successive `drawable_extent` calls before `extent`.
    scripted: VecDeque<vk::Extent2D>,
    resize_pending: bool,
    wait_events: usize,
    extent_queries: usize,
}

/// Window stand-in with a settable drawable extent and resize flag.
///
/// Clones share state, so a test can flip the resize flag while the
/// orchestrator owns the platform.
#[derive(Debug, Clone)]
pub struct MockPlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl MockPlatform {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(PlatformState {
                extent: vk::Extent2D { width, height },
                scripted: VecDeque::new(),
                resize_pending: false,
                wait_events: 0,
                extent_queries: 0,
            })),
        }
    }

    /// Change the drawable size and raise the resize flag, like a window resize.
    pub fn resize(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.extent = vk::Extent2D { width, height };
        state.resize_pending = true;
    }

    /// Raise the resize flag without changing the size.
    pub fn flag_resize(&self) {
        self.state.lock().resize_pending = true;
    }

    /// Report `extents` from the next extent queries, in order, before falling
    /// back to the current size.
    pub fn script_extents(&self, extents: impl IntoIterator<Item = (u32, u32)>) {
        self.state.lock().scripted.extend(
            extents
                .into_iter()
                .map(|(width, height)| vk::Extent2D { width, height }),
        );
    }

    pub fn resize_pending(&self) -> bool {
        self.state.lock().resize_pending
    }

    /// How often the renderer blocked on platform events.
    pub fn wait_events_count(&self) -> usize {
        self.state.lock().wait_events
    }

    pub fn extent_queries(&self) -> usize {
        self.state.lock().extent_queries
    }
}

impl PlatformContext for MockPlatform {
    fn drawable_extent(&self) -> vk::Extent2D {
        let mut state = self.state.lock();
        state.extent_queries += 1;
        match state.scripted.pop_front() {
            Some(extent) => extent,
            None => state.extent,
        }
    }

    fn take_resize_pending(&mut self) -> bool {
        std::mem::take(&mut self.state.lock().resize_pending)
    }

    fn wait_events(&mut self) {
        self.state.lock().wait_events += 1;
    }
}

/// Overlay that draws one full-screen triangle and counts its invocations.
#[derive(Debug, Clone, Default)]
pub struct RecordingOverlay {
    calls: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl RecordingOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extents the overlay was recorded with, one entry per frame.
    pub fn recorded(&self) -> Vec<(u32, u32)> {
        self.calls.lock().clone()
    }
}

impl<D: RenderDevice> OverlayRenderer<D> for RecordingOverlay {
    fn record(
        &mut self,
        device: &D,
        command_buffer: vk::CommandBuffer,
        extent: vk::Extent2D,
    ) -> wyvern_render::Result<()> {
        device.cmd_draw(command_buffer, 3, 1, 0, 0);
        self.calls.lock().push((extent.width, extent.height));
        Ok(())
    }
}
