//! [`RenderDevice`] backed by a real Vulkan device.

use crate::context::{GpuContext, GpuContextBuilder};
use crate::device::{
    AcquireStatus, AttachmentImage, PresentStatus, RenderDevice, RenderPassBegin, Submission,
    SurfaceSupport, SwapchainDesc,
};
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage};
use crate::pipeline::{self, GraphicsPipeline, PipelineDesc};
use crate::surface::SurfaceContext;
use crate::swapchain;
use ash::vk;
use gpu_allocator::MemoryLocation;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Depth attachment image with its view.
pub struct DepthImage {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

impl AttachmentImage for DepthImage {
    fn image(&self) -> vk::Image {
        self.image.image
    }

    fn view(&self) -> vk::ImageView {
        self.view
    }
}

/// Vulkan device, presentation surface and graphics command pool.
pub struct VulkanDevice {
    command_pool: vk::CommandPool,
    surface: SurfaceContext,
    // Dropped last: destroys the logical device and instance.
    gpu: GpuContext,
}

impl VulkanDevice {
    /// Create the instance, surface, device and command pool for `window`.
    pub fn for_window<W>(builder: GpuContextBuilder, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let (gpu, surface) = builder.build_for_window(window)?;
        // Frame command buffers are re-recorded every cycle.
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(gpu.queue_families().graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { gpu.device().create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { surface.destroy() };
                return Err(e.into());
            }
        };

        Ok(Self {
            command_pool,
            surface,
            gpu,
        })
    }

    /// Underlying GPU context.
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    fn device(&self) -> &ash::Device {
        self.gpu.device()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.gpu.wait_idle();
            self.gpu.device().destroy_command_pool(self.command_pool, None);
            self.surface.destroy();
        }
    }
}

impl RenderDevice for VulkanDevice {
    type Buffer = GpuBuffer;
    type Image = DepthImage;

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        Ok(unsafe { self.device().create_fence(&info, None) }?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device().destroy_fence(fence, None) };
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<()> {
        unsafe { self.device().wait_for_fences(&[fence], true, timeout_ns) }
            .map_err(GpuError::from_wait)
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        Ok(unsafe { self.device().reset_fences(&[fence]) }?)
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        Ok(unsafe { self.device().get_fence_status(fence) }?)
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        Ok(unsafe { self.device().create_semaphore(&info, None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device().destroy_semaphore(semaphore, None) };
    }

    fn wait_idle(&self) -> Result<()> {
        self.gpu.wait_idle()
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { self.device().allocate_command_buffers(&info) }?)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device()
                .free_command_buffers(self.command_pool, command_buffers);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default().flags(flags);
        Ok(unsafe { self.device().begin_command_buffer(cmd, &info) }?)
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe { self.device().end_command_buffer(cmd) }?)
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        Ok(unsafe {
            self.device()
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        }?)
    }

    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn submit(&self, submission: &Submission<'_>) -> Result<()> {
        let info = vk::SubmitInfo::default()
            .command_buffers(submission.command_buffers)
            .wait_semaphores(submission.wait_semaphores)
            .wait_dst_stage_mask(submission.wait_stages)
            .signal_semaphores(submission.signal_semaphores);
        Ok(unsafe {
            self.device()
                .queue_submit(self.gpu.graphics_queue(), &[info], submission.fence)
        }?)
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: begin.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: begin.clear_depth,
                    stencil: 0,
                },
            },
        ];
        let info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: begin.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device()
                .cmd_begin_render_pass(cmd, &info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device().cmd_end_render_pass(cmd) };
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        unsafe { self.device().cmd_set_viewport(cmd, 0, &[viewport]) };
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        unsafe { self.device().cmd_set_scissor(cmd, 0, &[scissor]) };
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device().cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe { self.device().cmd_bind_vertex_buffers(cmd, 0, &[buffer], &[0]) };
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        unsafe {
            self.device()
                .cmd_bind_index_buffer(cmd, buffer, 0, index_type);
        }
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw(
                cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device().cmd_draw_indexed(
                cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe { self.device().cmd_copy_buffer(cmd, src, dst, &[region]) };
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        self.gpu
            .allocator()
            .lock()
            .create_buffer(size, usage, location, name)
    }

    fn destroy_buffer(&self, mut buffer: GpuBuffer) -> Result<()> {
        self.gpu.allocator().lock().free_buffer(&mut buffer)
    }

    fn create_depth_image(&self, extent: vk::Extent2D, format: vk::Format) -> Result<DepthImage> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = self.gpu.allocator().lock().create_image(
            &create_info,
            MemoryLocation::GpuOnly,
            "depth",
        )?;

        match self.create_image_view(image.image, format, vk::ImageAspectFlags::DEPTH) {
            Ok(view) => Ok(DepthImage { image, view }),
            Err(e) => {
                self.gpu.allocator().lock().free_image(&mut image)?;
                Err(e)
            }
        }
    }

    fn destroy_depth_image(&self, mut image: DepthImage) -> Result<()> {
        self.destroy_image_view(image.view);
        self.gpu.allocator().lock().free_image(&mut image.image)
    }

    fn create_uniform_set_layout(
        &self,
        binding: u32,
        stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(stages)];
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        Ok(unsafe { self.device().create_descriptor_set_layout(&info, None) }?)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        let info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);
        Ok(unsafe { self.device().create_descriptor_pool(&info, None) }?)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device().destroy_descriptor_pool(pool, None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(layouts);
        Ok(unsafe { self.device().allocate_descriptor_sets(&info) }?)
    }

    fn write_uniform_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    ) {
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info);
        unsafe { self.device().update_descriptor_sets(&[write], &[]) };
    }

    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        unsafe { pipeline::create_render_pass(self.device(), color_format, depth_format) }
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        unsafe { self.device().destroy_render_pass(render_pass, None) };
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        render_pass: vk::RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<GraphicsPipeline> {
        unsafe { GraphicsPipeline::new(self.device(), desc, render_pass, set_layouts) }
    }

    fn destroy_graphics_pipeline(&self, pipeline: &GraphicsPipeline) {
        unsafe { pipeline.destroy(self.device()) };
    }

    fn surface_support(&self) -> Result<SurfaceSupport> {
        self.surface.support()
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
    ) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let families = self.gpu.queue_families();
        unsafe {
            swapchain::create_swapchain(
                &self.surface.swapchain_loader,
                self.surface.surface,
                desc,
                families.graphics,
                families.present,
            )
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe {
            self.surface
                .swapchain_loader
                .destroy_swapchain(swapchain, None);
        }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        unsafe { self.device().create_image_view(&view_info, None) }.map_err(GpuError::from)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device().destroy_image_view(view, None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        unsafe { pipeline::create_framebuffer(self.device(), render_pass, attachments, extent) }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device().destroy_framebuffer(framebuffer, None) };
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireStatus> {
        unsafe {
            swapchain::acquire_next_image(
                &self.surface.swapchain_loader,
                swapchain,
                semaphore,
                timeout_ns,
            )
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentStatus> {
        unsafe {
            swapchain::queue_present(
                &self.surface.swapchain_loader,
                self.gpu.present_queue(),
                swapchain,
                image_index,
                wait_semaphore,
            )
        }
    }
}
