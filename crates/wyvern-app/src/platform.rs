//! Winit-backed platform context.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ash::vk;
use winit::window::Window;
use wyvern_render::PlatformContext;

/// How long [`WinitPlatform::wait_events`] sleeps before the size is polled again.
const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(16);

/// Zero-extent polls (about two seconds) before the stall is reported.
const STALL_WARN_POLLS: u32 = 120;

/// Exposes a winit window to the renderer.
///
/// The runner owns the event loop, so resize events are forwarded through
/// [`WinitPlatform::notify_resized`] rather than read here.
///
/// `wait_events` cannot dispatch events itself: it sleeps and lets the
/// renderer poll `inner_size` again. Where the window size only changes
/// during event dispatch (Wayland), a recreation that starts while the window
/// has no area keeps seeing the stale size. The runner does not start frames
/// while minimized, which keeps this to a window minimized mid-frame; a
/// warning is logged when such a stall persists.
pub struct WinitPlatform {
    window: Arc<Window>,
    resize_pending: bool,
    stall: StallCounter,
}

/// Counts consecutive zero-extent polls.
#[derive(Debug, Default)]
struct StallCounter {
    polls: u32,
}

impl StallCounter {
    /// Count one poll. True exactly once, when the warning threshold is reached.
    fn tick(&mut self) -> bool {
        self.polls = self.polls.saturating_add(1);
        self.polls == STALL_WARN_POLLS
    }

    fn reset(&mut self) {
        self.polls = 0;
    }
}

impl WinitPlatform {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            resize_pending: false,
            stall: StallCounter::default(),
        }
    }

    /// Record that the window's framebuffer changed size.
    pub fn notify_resized(&mut self) {
        self.resize_pending = true;
        self.stall.reset();
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Whether the window currently has no drawable area.
    pub fn is_minimized(&self) -> bool {
        let extent = self.drawable_extent();
        extent.width == 0 || extent.height == 0
    }
}

impl PlatformContext for WinitPlatform {
    fn drawable_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn take_resize_pending(&mut self) -> bool {
        std::mem::take(&mut self.resize_pending)
    }

    fn wait_events(&mut self) {
        if self.stall.tick() {
            tracing::warn!(
                polls = STALL_WARN_POLLS,
                "Window still has no drawable area; the platform may only report \
                 new sizes during event dispatch"
            );
        }
        thread::sleep(MINIMIZED_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stall_warns_once_at_threshold() {
        let mut stall = StallCounter::default();
        let warnings = (0..STALL_WARN_POLLS * 2).filter(|_| stall.tick()).count();
        assert_eq!(warnings, 1);
    }

    #[test]
    fn stall_reset_rearms_warning() {
        let mut stall = StallCounter::default();
        for _ in 0..STALL_WARN_POLLS {
            stall.tick();
        }
        stall.reset();
        assert!(!stall.tick());
        for _ in 1..STALL_WARN_POLLS - 1 {
            assert!(!stall.tick());
        }
        assert!(stall.tick());
    }
}
