//! Vulkan abstraction layer for the Wyvern renderer.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - GPU capability detection and device scoring
//! - Memory allocation via gpu-allocator
//! - Render pass and graphics pipeline creation
//! - Swapchain policies (format, present mode, image count, extent)
//! - The [`RenderDevice`] facade the frame renderer is written against

pub mod capabilities;
pub mod context;
pub mod device;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod surface;
pub mod swapchain;
pub mod vulkan;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilyIndices};
pub use device::{
    AcquireStatus, AttachmentImage, DeviceBuffer, PresentStatus, RenderDevice, RenderPassBegin,
    Submission, SurfaceSupport, SwapchainDesc,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, PipelineDesc};
pub use surface::SurfaceContext;
pub use swapchain::{
    calculate_extent, select_image_count, select_present_mode, select_surface_format,
};
pub use vulkan::{DepthImage, VulkanDevice};

/// Re-exported so downstream crates can name memory locations without a direct dependency.
pub use gpu_allocator::MemoryLocation;
