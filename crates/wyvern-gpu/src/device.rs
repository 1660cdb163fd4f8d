//! Device facade the frame renderer is written against.
//!
//! [`RenderDevice`] covers exactly the Vulkan surface the renderer touches:
//! synchronization objects, command recording and submission, buffers, the
//! depth attachment, descriptors, the graphics pipeline and the swapchain.
//! Handles are plain `ash::vk` handles so recorded work can be inspected
//! without a driver. [`crate::VulkanDevice`] is the production implementation.

use crate::error::Result;
use crate::pipeline::{GraphicsPipeline, PipelineDesc};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// A buffer created by a [`RenderDevice`].
pub trait DeviceBuffer {
    /// Raw buffer handle.
    fn handle(&self) -> vk::Buffer;

    /// Requested size in bytes.
    fn size(&self) -> u64;

    /// Whether the buffer memory is persistently mapped for CPU access.
    fn is_host_visible(&self) -> bool;

    /// Copy `data` into mapped memory at `offset`.
    ///
    /// Fails when the buffer is not host-visible or the range exceeds [`Self::size`].
    fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `len` bytes of mapped memory starting at `offset`.
    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>>;
}

/// An image with a view, usable as a framebuffer attachment.
pub trait AttachmentImage {
    /// Raw image handle.
    fn image(&self) -> vk::Image;

    /// View covering the whole image.
    fn view(&self) -> vk::ImageView;
}

/// Surface properties queried from the presentation engine.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Parameters for creating a swapchain.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// An image was acquired and the semaphore will be signaled.
    Acquired { index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    OutOfDate,
}

impl PresentStatus {
    /// Whether the swapchain must be rebuilt after this present.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// One batch of work for the graphics queue.
#[derive(Debug, Clone, Copy, Default)]
pub struct Submission<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    /// Fence signaled when the batch completes, or null.
    pub fence: vk::Fence,
}

/// Parameters for beginning the main render pass.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBegin {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
}

/// The Vulkan operations the frame renderer depends on.
///
/// Methods take `&self`; implementations synchronize internally where needed.
/// Destroy methods must only be called once the GPU no longer uses the object.
pub trait RenderDevice {
    /// Buffer type returned by [`RenderDevice::create_buffer`].
    type Buffer: DeviceBuffer;
    /// Image type returned by [`RenderDevice::create_depth_image`].
    type Image: AttachmentImage;

    // Synchronization

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Block until `fence` is signaled or `timeout_ns` expires.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    /// Block until all queues are idle.
    fn wait_idle(&self) -> Result<()>;

    // Command buffers

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()>;
    /// Submit to the graphics queue.
    fn submit(&self, submission: &Submission<'_>) -> Result<()>;

    // Recording

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);
    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );
    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer);
    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    );
    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );
    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64);

    // Memory

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<Self::Buffer>;
    fn destroy_buffer(&self, buffer: Self::Buffer) -> Result<()>;
    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> Result<Self::Image>;
    fn destroy_depth_image(&self, image: Self::Image) -> Result<()>;

    // Descriptors

    fn create_uniform_set_layout(
        &self,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn write_uniform_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    );

    // Pipeline

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        render_pass: vk::RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<GraphicsPipeline>;
    fn destroy_graphics_pipeline(&self, pipeline: &GraphicsPipeline);

    // Presentation

    fn surface_support(&self) -> Result<SurfaceSupport>;
    /// Create a swapchain and return it with its images in presentation order.
    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    /// Acquire the next presentable image, signaling `semaphore` when it is ready.
    ///
    /// A lost surface is reported as [`crate::GpuError::SurfaceLost`].
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireStatus>;
    /// Queue `image_index` for presentation once `wait_semaphore` is signaled.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentStatus>;
}
