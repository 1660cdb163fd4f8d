//! Application framework for the Wyvern renderer.
//!
//! This crate provides a trait-based application framework that handles:
//! - Window creation and management
//! - Device and renderer initialization
//! - Driving the frame protocol, including swapchain recreation
//! - Logging setup and TOML configuration
//!
//! # Example
//!
//! ```no_run
//! use wyvern_app::{run_app, AppConfig, AppContext, FrameInfo, WyvernApp};
//!
//! struct MyApp;
//!
//! impl WyvernApp for MyApp {
//!     fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, ctx: &AppContext, dt: f32) {}
//!
//!     fn render(&mut self, ctx: &mut AppContext, frame: &FrameInfo) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::load("wyvern.toml")?)
//! }
//! ```

mod app;
mod config;
mod context;
mod platform;
mod runner;

pub use app::{load_spirv, WyvernApp};
pub use config::AppConfig;
pub use context::{AppContext, FrameInfo, Mesh, Renderer};
pub use platform::WinitPlatform;
pub use runner::{init_logging, run_app};

// Re-export commonly used types for convenience
pub use winit::event::WindowEvent;
pub use wyvern_core::{FrameUniforms, IndexData, MeshData, Vertex};
pub use wyvern_render::{MeshDraw, RendererConfig};
