//! Renderer configuration.

use crate::error::{RenderError, Result};
use ash::vk;
use serde::{Deserialize, Serialize};
use wyvern_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, MAX_FRAMES_IN_FLIGHT};

/// Depth attachment format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    #[default]
    D32Sfloat,
    D24UnormS8Uint,
    D16Unorm,
}

impl DepthFormat {
    /// The matching Vulkan format.
    pub fn to_vk(self) -> vk::Format {
        match self {
            Self::D32Sfloat => vk::Format::D32_SFLOAT,
            Self::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            Self::D16Unorm => vk::Format::D16_UNORM,
        }
    }
}

/// Settings for the frame orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Force FIFO presentation instead of preferring mailbox.
    pub vsync: bool,
    /// Color attachment clear value (RGBA).
    pub clear_color: [f32; 4],
    /// Depth attachment format.
    pub depth_format: DepthFormat,
    /// Upper bound for fence waits in milliseconds; `None` waits indefinitely.
    pub fence_timeout_ms: Option<u64>,
    /// Staging buffer capacity allocated at startup, in bytes.
    pub staging_size: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            vsync: false,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            depth_format: DepthFormat::default(),
            fence_timeout_ms: None,
            staging_size: 64 * 1024,
        }
    }
}

impl RendererConfig {
    /// Set the number of frames in flight.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Set the clear color.
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Bound fence waits.
    pub fn with_fence_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.fence_timeout_ms = timeout_ms;
        self
    }

    /// Fence wait timeout in nanoseconds, as passed to the device.
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms
            .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000))
    }

    /// Check that every setting is in range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(RenderError::InvalidConfig(format!(
                "frames_in_flight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        if self.fence_timeout_ms == Some(0) {
            return Err(RenderError::InvalidConfig(
                "fence_timeout_ms must be positive".to_string(),
            ));
        }
        if self.clear_color.iter().any(|c| !c.is_finite()) {
            return Err(RenderError::InvalidConfig(
                "clear_color components must be finite".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RendererConfig::default();
        config.validate().unwrap();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout_ns(), u64::MAX);
    }

    #[test]
    fn frames_in_flight_range() {
        assert!(RendererConfig::default()
            .with_frames_in_flight(0)
            .validate()
            .is_err());
        assert!(RendererConfig::default()
            .with_frames_in_flight(5)
            .validate()
            .is_err());
        RendererConfig::default()
            .with_frames_in_flight(1)
            .validate()
            .unwrap();
    }

    #[test]
    fn timeout_conversion() {
        let config = RendererConfig::default().with_fence_timeout_ms(Some(250));
        assert_eq!(config.fence_timeout_ns(), 250_000_000);
        assert!(RendererConfig::default()
            .with_fence_timeout_ms(Some(0))
            .validate()
            .is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: RendererConfig = toml::from_str(
            r#"
            frames_in_flight = 3
            depth_format = "d24_unorm_s8_uint"
            "#,
        )
        .unwrap();
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.depth_format.to_vk(), vk::Format::D24_UNORM_S8_UINT);
        assert!(!config.vsync);
        assert_eq!(config.fence_timeout_ms, None);
    }
}
