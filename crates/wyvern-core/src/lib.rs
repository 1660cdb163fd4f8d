//! Core types for the Wyvern renderer.
//!
//! This crate provides the CPU-side data the renderer consumes:
//! - Vertex and mesh types
//! - Per-frame uniform payloads (model/view/projection)
//! - Common error types

pub mod error;
pub mod mesh;
pub mod uniforms;

pub use error::{Error, Result};
pub use mesh::{IndexData, MeshData, Vertex};
pub use uniforms::FrameUniforms;

/// Renderer-wide constants
pub mod constants {
    /// Default number of frames the CPU may record ahead of the GPU
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;
    /// Upper bound accepted for the frames-in-flight setting
    pub const MAX_FRAMES_IN_FLIGHT: usize = 4;
    /// Size in bytes of the per-frame uniform block (three 4x4 f32 matrices)
    pub const FRAME_UNIFORM_SIZE: usize = 3 * 16 * 4;
    /// Descriptor binding slot of the per-frame uniform block
    pub const FRAME_UNIFORM_BINDING: u32 = 0;
}
