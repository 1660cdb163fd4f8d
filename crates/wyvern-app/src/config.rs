//! Application configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;
use wyvern_render::RendererConfig;

/// Application configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: String,
    /// Compiled SPIR-V for the mesh vertex stage.
    pub vertex_shader: PathBuf,
    /// Compiled SPIR-V for the mesh fragment stage.
    pub fragment_shader: PathBuf,
    /// Frame orchestrator settings.
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Wyvern".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            validation: cfg!(debug_assertions),
            log_filter: "info".to_string(),
            vertex_shader: PathBuf::from("shaders/mesh.vert.spv"),
            fragment_shader: PathBuf::from("shaders/mesh.frag.spv"),
            renderer: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Read a TOML config file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.renderer.validate()?;
        Ok(config)
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.renderer.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the fallback log filter.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Set the SPIR-V files for the mesh pipeline.
    pub fn with_shaders(
        mut self,
        vertex: impl Into<PathBuf>,
        fragment: impl Into<PathBuf>,
    ) -> Self {
        self.vertex_shader = vertex.into();
        self.fragment_shader = fragment.into();
        self
    }

    /// Replace the renderer settings.
    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            title = "Viewer"
            target_fps = 60

            [renderer]
            frames_in_flight = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.title, "Viewer");
        assert_eq!(config.target_fps, Some(60));
        assert_eq!(config.width, 1280);
        assert_eq!(config.renderer.frames_in_flight, 3);
        assert_eq!(config.renderer.staging_size, 64 * 1024);
    }

    #[test]
    fn invalid_renderer_section_is_rejected() {
        assert!(AppConfig::from_toml("[renderer]\nframes_in_flight = 0\n").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = AppConfig::load("/nonexistent/wyvern.toml").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn builders_compose() {
        let config = AppConfig::new("Test")
            .with_size(640, 480)
            .with_vsync(true)
            .with_shaders("a.spv", "b.spv");
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.renderer.vsync);
        assert_eq!(config.fragment_shader, PathBuf::from("b.spv"));
    }
}
