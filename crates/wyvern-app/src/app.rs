//! `WyvernApp` trait definition.

use anyhow::Context;
use winit::event::WindowEvent;
use wyvern_gpu::PipelineDesc;
use wyvern_render::mesh_pipeline_desc;

use crate::config::AppConfig;
use crate::context::{AppContext, FrameInfo};

/// Trait for Wyvern applications.
///
/// The framework creates the window, the device and the frame orchestrator,
/// then drives the frame protocol. The application only records draws into
/// the render pass the framework has already begun.
pub trait WyvernApp: Sized {
    /// Describe the mesh pipeline.
    ///
    /// Default implementation loads the SPIR-V files named in the config.
    fn pipeline(config: &AppConfig) -> anyhow::Result<PipelineDesc> {
        let vertex = load_spirv(&config.vertex_shader)?;
        let fragment = load_spirv(&config.fragment_shader)?;
        Ok(mesh_pipeline_desc(vertex, fragment))
    }

    /// Initialize the application.
    ///
    /// Called once the renderer exists; this is where meshes are uploaded.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Update application state. `dt` is the time since the last frame in seconds.
    fn update(&mut self, ctx: &AppContext, dt: f32);

    /// Record this frame's draws and write its uniforms.
    ///
    /// The render pass is active with the viewport, scissor and pipeline set.
    /// Use `ctx.renderer` to write uniforms and draw meshes.
    fn render(&mut self, ctx: &mut AppContext, frame: &FrameInfo) -> anyhow::Result<()>;

    /// Called after the swapchain was recreated with a new extent.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handle window events. Return `true` to stop further processing.
    ///
    /// Default implementation does nothing and returns `false`.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release GPU resources. The device is idle when this is called.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}

/// Read a SPIR-V binary.
pub fn load_spirv(path: &std::path::Path) -> anyhow::Result<Vec<u32>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open shader {}", path.display()))?;
    ash::util::read_spv(&mut file)
        .with_context(|| format!("Invalid SPIR-V in {}", path.display()))
}
