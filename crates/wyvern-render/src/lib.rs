//! Frame rendering and synchronization for the Wyvern renderer.
//!
//! This crate provides:
//! - The frame orchestrator driving the per-frame protocol (wait, acquire,
//!   record, submit, present) over a pool of frames in flight
//! - Swapchain lifecycle, including full recreation on resize or staleness
//! - Staged uploads of vertex and index data into device-local buffers
//! - The platform and overlay collaborator traits
//!
//! Everything is written against [`wyvern_gpu::RenderDevice`], so the same code
//! drives a real GPU or a recording mock.

pub mod binding;
pub mod config;
pub mod error;
pub mod frame;
pub mod mesh;
pub mod orchestrator;
pub mod platform;
pub mod swapchain;
pub mod transfer;

pub use binding::UniformBinding;
pub use config::{DepthFormat, RendererConfig};
pub use error::{RenderError, Result};
pub use frame::{FrameContext, FramePool, SlotPhase};
pub use mesh::{mesh_pipeline_desc, vertex_layout, GpuMesh, MeshDraw};
pub use orchestrator::{
    ActiveFrame, FrameOrchestrator, FrameOutcome, FrameState, FrameStats, PresentOutcome,
    SubmitStatus,
};
pub use platform::{OverlayRenderer, PlatformContext};
pub use swapchain::{AcquireResult, Swapchain, SwapchainSettings};
pub use transfer::TransferChannel;
