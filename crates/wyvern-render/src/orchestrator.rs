//! Frame orchestrator.
//!
//! Drives one frame at a time through
//! `Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle`
//! over a pool of K frame slots, where slot `frame_counter % K` is used for
//! each frame:
//!
//! 1. wait on the slot's fence (bounds the GPU to K frames in flight)
//! 2. acquire a swapchain image, signaling the slot's image-available semaphore
//! 3. reset the fence, only once a usable image is confirmed
//! 4. record the render pass
//! 5. write the uniform payload into the slot's mapped buffer
//! 6. submit, waiting on image-available and signaling render-finished and the fence
//! 7. present, waiting on render-finished
//! 8. advance the frame counter
//!
//! A stale swapchain (out of date, suboptimal, or a resize flag from the
//! platform) triggers a full recreation: everything derived from the swapchain
//! and every sync object is destroyed, then everything is created again.

use crate::binding::UniformBinding;
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::frame::{FrameContext, FramePool};
use crate::mesh::{GpuMesh, MeshDraw};
use crate::platform::{OverlayRenderer, PlatformContext};
use crate::swapchain::{AcquireResult, Swapchain, SwapchainSettings};
use crate::transfer::TransferChannel;
use ash::vk;
use wyvern_core::{FrameUniforms, IndexData, MeshData};
use wyvern_gpu::{
    select_surface_format, DeviceBuffer, GraphicsPipeline, PipelineDesc, PresentStatus,
    RenderDevice, RenderPassBegin, Submission,
};

/// Where the orchestrator is in the frame cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    /// The slot fence was waited on and an image acquired; recording has not begun.
    Acquiring,
    Recording,
    Submitted,
    Presenting,
}

/// The frame currently between acquire and present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveFrame {
    /// Frame-pool slot.
    pub slot: usize,
    /// Acquired swapchain image.
    pub image_index: u32,
}

/// Result of [`FrameOrchestrator::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Submitted,
    /// A resize was observed before submission; the frame was discarded and
    /// the swapchain recreated.
    Aborted,
}

/// Result of [`FrameOrchestrator::present`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// The swapchain was recreated after presenting.
    Recreated,
}

/// Result of [`FrameOrchestrator::render`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// No image reached the screen this cycle.
    Skipped,
}

/// Counters over the orchestrator's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames_presented: u64,
    pub frames_skipped: u64,
    pub recreations: u64,
}

/// Owns the device-side rendering state and sequences frames.
pub struct FrameOrchestrator<D: RenderDevice, P: PlatformContext> {
    device: D,
    platform: P,
    config: RendererConfig,
    settings: SwapchainSettings,
    binding: UniformBinding,
    render_pass: vk::RenderPass,
    pipeline: GraphicsPipeline,
    swapchain: Option<Swapchain<D>>,
    frames: FramePool<D>,
    transfer: TransferChannel<D>,
    overlay: Option<Box<dyn OverlayRenderer<D>>>,
    state: FrameState,
    active: Option<ActiveFrame>,
    frame_counter: u64,
    stats: FrameStats,
    destroyed: bool,
}

fn stage<T, E: Into<RenderError>>(
    stage: &'static str,
    result: std::result::Result<T, E>,
) -> Result<T> {
    result.map_err(|e| RenderError::startup(stage)(e.into()))
}

impl<D: RenderDevice, P: PlatformContext> FrameOrchestrator<D, P> {
    /// Build every renderer resource: uniform binding, render pass, pipeline,
    /// swapchain with its targets, frame pool and transfer channel.
    ///
    /// Any failure is reported as [`RenderError::StartupFatal`] naming the stage,
    /// after the stages already built have been destroyed.
    pub fn new(
        device: D,
        platform: P,
        pipeline_desc: &PipelineDesc,
        config: RendererConfig,
    ) -> Result<Self> {
        stage("configuration", config.validate())?;
        let fence_timeout_ns = config.fence_timeout_ns();
        let slots = config.frames_in_flight;
        let sets = stage(
            "configuration",
            u32::try_from(slots)
                .map_err(|_| RenderError::InvalidConfig(format!("{slots} frames in flight"))),
        )?;

        let binding = stage("descriptor binding", UniformBinding::new(&device, sets))?;

        let settings = match device
            .surface_support()
            .and_then(|support| select_surface_format(&support.formats))
        {
            Ok(surface_format) => SwapchainSettings {
                surface_format,
                depth_format: config.depth_format.to_vk(),
                vsync: config.vsync,
            },
            Err(e) => {
                binding.destroy(&device);
                return stage("surface format", Err(e));
            }
        };

        let render_pass =
            match device.create_render_pass(settings.surface_format.format, settings.depth_format) {
                Ok(render_pass) => render_pass,
                Err(e) => {
                    binding.destroy(&device);
                    return stage("render pass", Err(e));
                }
            };

        let pipeline =
            match device.create_graphics_pipeline(pipeline_desc, render_pass, &[binding.layout()]) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    device.destroy_render_pass(render_pass);
                    binding.destroy(&device);
                    return stage("pipeline", Err(e));
                }
            };

        // From here on, dropping the orchestrator tears down whatever exists.
        let mut orchestrator = Self {
            device,
            platform,
            config,
            settings,
            binding,
            render_pass,
            pipeline,
            swapchain: None,
            frames: FramePool::empty(fence_timeout_ns),
            transfer: TransferChannel::new(fence_timeout_ns),
            overlay: None,
            state: FrameState::Idle,
            active: None,
            frame_counter: 0,
            stats: FrameStats::default(),
            destroyed: false,
        };
        orchestrator.build_targets()?;

        tracing::info!(
            frames_in_flight = slots,
            format = ?orchestrator.settings.surface_format.format,
            "Frame orchestrator ready"
        );
        Ok(orchestrator)
    }

    fn build_targets(&mut self) -> Result<()> {
        let swapchain = stage(
            "swapchain",
            Swapchain::create(
                &self.device,
                &mut self.platform,
                &self.settings,
                self.render_pass,
            ),
        )?;
        self.swapchain = Some(swapchain);

        self.frames = stage(
            "frame pool",
            FramePool::new(
                &self.device,
                self.config.frames_in_flight,
                &self.binding,
                self.config.fence_timeout_ns(),
            ),
        )?;

        stage("transfer fence", self.transfer.create_fence(&self.device))?;
        if self.config.staging_size > 0 {
            stage(
                "staging buffer",
                self.transfer
                    .allocate_staging(&self.device, self.config.staging_size),
            )?;
        }
        Ok(())
    }

    fn expect_state(&self, allowed: &[FrameState], operation: &str) -> Result<()> {
        if self.destroyed {
            return Err(RenderError::SyncViolation(format!(
                "{operation} after shutdown"
            )));
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RenderError::SyncViolation(format!(
                "{operation} in state {:?}",
                self.state
            )))
        }
    }

    fn active_frame_for(&self, operation: &str) -> Result<ActiveFrame> {
        self.active.ok_or_else(|| {
            RenderError::SyncViolation(format!("{operation} without an acquired image"))
        })
    }

    fn swapchain_ref(&self) -> Result<&Swapchain<D>> {
        self.swapchain
            .as_ref()
            .ok_or_else(|| RenderError::SyncViolation("no swapchain".to_string()))
    }

    fn slot_frame(&self, slot: usize) -> Result<&FrameContext<D::Buffer>> {
        self.frames
            .frame(slot)
            .ok_or_else(|| RenderError::SyncViolation(format!("missing frame slot {slot}")))
    }

    /// Slot the next (or current) frame uses.
    pub fn current_slot(&self) -> usize {
        let slots = self.frames.len().max(1) as u64;
        (self.frame_counter % slots) as usize
    }

    /// Wait for the current slot's fence, then acquire the next swapchain image.
    ///
    /// On [`AcquireResult::NeedsRecreate`] the slot's fence is left signaled,
    /// the swapchain has already been recreated and the caller should skip the
    /// frame.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next_image(&mut self) -> Result<AcquireResult> {
        self.expect_state(&[FrameState::Idle], "acquire_next_image")?;
        let slot = self.current_slot();

        self.frames.wait_frame(&self.device, slot)?;
        self.state = FrameState::Acquiring;

        let acquired = match (self.swapchain.as_ref(), self.frames.frame(slot)) {
            (Some(swapchain), Some(frame)) => {
                swapchain.acquire_next(&self.device, &mut self.platform, frame.image_available())
            }
            _ => Err(RenderError::SyncViolation(
                "acquire without swapchain or frame slot".to_string(),
            )),
        };

        match acquired {
            Ok(AcquireResult::Image(image_index)) => {
                if let Err(e) = self.frames.confirm_frame(&self.device, slot) {
                    self.abandon_acquire(slot);
                    return Err(e);
                }
                self.active = Some(ActiveFrame { slot, image_index });
                Ok(AcquireResult::Image(image_index))
            }
            Ok(AcquireResult::NeedsRecreate) => {
                self.abandon_acquire(slot);
                self.stats.frames_skipped += 1;
                self.rebuild_swapchain()?;
                Ok(AcquireResult::NeedsRecreate)
            }
            Err(e) => {
                self.abandon_acquire(slot);
                Err(e)
            }
        }
    }

    /// Return an unconfirmed slot to idle with its fence untouched.
    fn abandon_acquire(&mut self, slot: usize) {
        if let Err(e) = self.frames.release_frame(slot) {
            tracing::warn!(slot, "Failed to release frame slot: {e}");
        }
        self.state = FrameState::Idle;
        self.active = None;
    }

    /// Begin recording: start the render pass on the acquired image, set the
    /// viewport and scissor to the swapchain extent and bind the pipeline.
    pub fn begin_frame(&mut self) -> Result<vk::CommandBuffer> {
        self.expect_state(&[FrameState::Acquiring], "begin_frame")?;
        let active = self.active_frame_for("begin_frame")?;

        let swapchain = self.swapchain_ref()?;
        let extent = swapchain.extent();
        let framebuffer = swapchain.framebuffer(active.image_index)?;

        let cmd = self.frames.begin_recording(&self.device, active.slot)?;
        self.device.cmd_begin_render_pass(
            cmd,
            &RenderPassBegin {
                render_pass: self.render_pass,
                framebuffer,
                extent,
                clear_color: self.config.clear_color,
                clear_depth: 1.0,
            },
        );
        self.device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.device.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
        self.device.cmd_bind_pipeline(cmd, self.pipeline.pipeline);

        self.state = FrameState::Recording;
        Ok(cmd)
    }

    fn recording_target(&mut self, operation: &str) -> Result<(vk::CommandBuffer, ActiveFrame)> {
        self.expect_state(&[FrameState::Recording], operation)?;
        let active = self.active_frame_for(operation)?;
        let cmd = self.frames.recording_command_buffer(active.slot)?;
        Ok((cmd, active))
    }

    /// Copy `payload` into the active slot's uniform buffer.
    pub fn update_uniforms(&mut self, payload: &[u8]) -> Result<()> {
        self.expect_state(
            &[FrameState::Acquiring, FrameState::Recording],
            "update_uniforms",
        )?;
        let active = self.active_frame_for("update_uniforms")?;
        self.frames.write_uniforms(active.slot, payload)
    }

    pub fn update_frame_uniforms(&mut self, uniforms: &FrameUniforms) -> Result<()> {
        self.update_uniforms(uniforms.as_bytes())
    }

    /// Bind a mesh's vertex and index buffers and the slot's descriptor set.
    pub fn bind_mesh_buffers(&mut self, mesh: &GpuMesh<D::Buffer>) -> Result<()> {
        let (cmd, active) = self.recording_target("bind_mesh_buffers")?;
        let descriptor_set = self.slot_frame(active.slot)?.descriptor_set();

        self.device
            .cmd_bind_vertex_buffer(cmd, mesh.vertex_buffer.handle());
        if let Some((index_buffer, index_type)) = &mesh.index_buffer {
            self.device
                .cmd_bind_index_buffer(cmd, index_buffer.handle(), *index_type);
        }
        self.device
            .cmd_bind_descriptor_set(cmd, self.pipeline.layout, descriptor_set);
        Ok(())
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<()> {
        let (cmd, _) = self.recording_target("draw")?;
        self.device.cmd_draw(cmd, vertex_count, instance_count, 0, 0);
        Ok(())
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> Result<()> {
        let (cmd, _) = self.recording_target("draw_indexed")?;
        self.device
            .cmd_draw_indexed(cmd, index_count, instance_count, 0, 0, 0);
        Ok(())
    }

    /// Bind and draw each mesh, indexed when it has an index buffer.
    pub fn draw_meshes(&mut self, draws: &[MeshDraw<'_, D::Buffer>]) -> Result<()> {
        for draw in draws {
            self.bind_mesh_buffers(draw.mesh)?;
            if draw.mesh.is_indexed() {
                self.draw_indexed(draw.mesh.index_count, draw.instance_count)?;
            } else {
                self.draw(draw.mesh.vertex_count, draw.instance_count)?;
            }
        }
        Ok(())
    }

    /// Let the overlay record, then end the render pass and the command buffer.
    pub fn end_frame(&mut self) -> Result<()> {
        let (cmd, active) = self.recording_target("end_frame")?;
        let extent = self.swapchain_ref()?.extent();

        if let Some(overlay) = self.overlay.as_mut() {
            overlay.record(&self.device, cmd, extent)?;
        }

        self.device.cmd_end_render_pass(cmd);
        self.frames.end_recording(&self.device, active.slot)
    }

    /// Submit the recorded frame to the graphics queue.
    ///
    /// If the platform reports a resize first, the recording is discarded,
    /// nothing is submitted and the swapchain is recreated.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit(&mut self) -> Result<SubmitStatus> {
        self.expect_state(&[FrameState::Recording], "submit")?;
        let active = self.active_frame_for("submit")?;
        let frame = self.frames.expect_recorded(active.slot)?;

        let command_buffers = [frame.command_buffer()];
        let wait_semaphores = [frame.image_available()];
        let signal_semaphores = [frame.render_finished()];
        let fence = frame.in_flight();

        if self.platform.take_resize_pending() {
            tracing::debug!(
                slot = active.slot,
                "Resize observed before submit, discarding frame"
            );
            self.state = FrameState::Idle;
            self.active = None;
            self.stats.frames_skipped += 1;
            self.rebuild_swapchain()?;
            return Ok(SubmitStatus::Aborted);
        }

        self.device.submit(&Submission {
            command_buffers: &command_buffers,
            wait_semaphores: &wait_semaphores,
            wait_stages: &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            signal_semaphores: &signal_semaphores,
            fence,
        })?;
        self.frames.mark_submitted(active.slot)?;
        self.state = FrameState::Submitted;
        Ok(SubmitStatus::Submitted)
    }

    /// Present the submitted image and advance the frame counter.
    ///
    /// Recreates the swapchain when presentation reports it stale or the
    /// platform reports a resize.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(&mut self) -> Result<PresentOutcome> {
        self.expect_state(&[FrameState::Submitted], "present")?;
        let active = self.active_frame_for("present")?;
        self.state = FrameState::Presenting;

        let render_finished = self.slot_frame(active.slot)?.render_finished();
        let status = self
            .swapchain_ref()?
            .present(&self.device, active.image_index, render_finished);

        self.frame_counter += 1;
        self.active = None;
        self.state = FrameState::Idle;
        let status = status?;

        if status == PresentStatus::OutOfDate {
            self.stats.frames_skipped += 1;
        } else {
            self.stats.frames_presented += 1;
        }

        let resized = self.platform.take_resize_pending();
        if status.needs_recreate() || resized {
            tracing::debug!(?status, resized, "Swapchain stale after present");
            self.rebuild_swapchain()?;
            return Ok(PresentOutcome::Recreated);
        }
        Ok(PresentOutcome::Presented)
    }

    /// Run one whole frame: acquire, record `draws`, write `uniforms`, submit
    /// and present.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn render(
        &mut self,
        draws: &[MeshDraw<'_, D::Buffer>],
        uniforms: &FrameUniforms,
    ) -> Result<FrameOutcome> {
        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.acquire").entered();
            if self.acquire_next_image()? == AcquireResult::NeedsRecreate {
                return Ok(FrameOutcome::Skipped);
            }
        }

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.record").entered();
            self.begin_frame()?;
            self.update_frame_uniforms(uniforms)?;
            self.draw_meshes(draws)?;
            self.end_frame()?;
        }

        {
            #[cfg(feature = "profiling-tracy")]
            let _span = tracing::trace_span!("frame.submit").entered();
            if self.submit()? == SubmitStatus::Aborted {
                return Ok(FrameOutcome::Skipped);
            }
        }

        let presented_before = self.stats.frames_presented;
        self.present()?;
        if self.stats.frames_presented > presented_before {
            Ok(FrameOutcome::Presented)
        } else {
            Ok(FrameOutcome::Skipped)
        }
    }

    /// Rebuild the swapchain and every sync object. Only allowed between frames.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        self.expect_state(&[FrameState::Idle], "recreate_swapchain")?;
        self.rebuild_swapchain()
    }

    /// Destroy everything, then create everything: swapchain targets, slot sync
    /// objects and the transfer fence. Blocks while the drawable is zero-sized.
    fn rebuild_swapchain(&mut self) -> Result<()> {
        // The rebuilt swapchain reads the current extent, which covers any pending resize.
        self.platform.take_resize_pending();
        self.device.wait_idle()?;

        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.device);
        }
        self.frames.destroy_sync(&self.device);
        self.transfer.destroy_fence(&self.device);

        let swapchain = Swapchain::create(
            &self.device,
            &mut self.platform,
            &self.settings,
            self.render_pass,
        )?;
        let extent = swapchain.extent();
        self.swapchain = Some(swapchain);
        self.frames.create_sync(&self.device)?;
        self.transfer.create_fence(&self.device)?;

        self.state = FrameState::Idle;
        self.active = None;
        self.stats.recreations += 1;
        tracing::info!(
            width = extent.width,
            height = extent.height,
            recreations = self.stats.recreations,
            "Recreated swapchain"
        );
        Ok(())
    }

    fn expect_idle_for_upload(&self, operation: &str) -> Result<()> {
        self.expect_state(&[FrameState::Idle], operation)
    }

    /// Grow the staging buffer to at least `size` bytes.
    pub fn allocate_staging(&mut self, size: u64) -> Result<()> {
        self.expect_idle_for_upload("allocate_staging")?;
        self.transfer.allocate_staging(&self.device, size)
    }

    /// Upload vertex bytes into a new device-local vertex buffer.
    pub fn upload_vertex_buffer(&mut self, bytes: &[u8], name: &str) -> Result<D::Buffer> {
        self.expect_idle_for_upload("upload_vertex_buffer")?;
        self.transfer.upload_vertex_buffer(&self.device, bytes, name)
    }

    /// Upload indices into a new device-local index buffer.
    pub fn upload_index_buffer(
        &mut self,
        indices: &IndexData,
        name: &str,
    ) -> Result<(D::Buffer, vk::IndexType)> {
        self.expect_idle_for_upload("upload_index_buffer")?;
        self.transfer.upload_index_buffer(&self.device, indices, name)
    }

    /// Validate and upload a whole mesh.
    pub fn upload_mesh(&mut self, mesh: &MeshData, name: &str) -> Result<GpuMesh<D::Buffer>> {
        self.expect_idle_for_upload("upload_mesh")?;
        self.transfer.upload_mesh(&self.device, mesh, name)
    }

    /// Free a mesh once no submitted frame can still reference it.
    pub fn destroy_mesh(&mut self, mesh: GpuMesh<D::Buffer>) -> Result<()> {
        self.expect_idle_for_upload("destroy_mesh")?;
        self.device.wait_idle()?;
        mesh.destroy(&self.device)
    }

    /// Install the overlay that records into every frame's render pass.
    pub fn set_overlay(&mut self, overlay: Box<dyn OverlayRenderer<D>>) {
        self.overlay = Some(overlay);
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn active_frame(&self) -> Option<ActiveFrame> {
        self.active
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn frames(&self) -> &FramePool<D> {
        &self.frames
    }

    pub fn swapchain(&self) -> Option<&Swapchain<D>> {
        self.swapchain.as_ref()
    }

    pub fn transfer(&self) -> &TransferChannel<D> {
        &self.transfer
    }

    pub fn pipeline(&self) -> GraphicsPipeline {
        self.pipeline
    }

    /// Current swapchain extent, zero before the first swapchain exists.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or_else(vk::Extent2D::default, Swapchain::extent)
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        Ok(self.device.wait_idle()?)
    }

    /// Wait for the GPU, then destroy every renderer resource in reverse
    /// creation order. Later calls do nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let idle = self.device.wait_idle();

        self.transfer.destroy(&self.device);
        self.frames.destroy(&self.device);
        if let Some(swapchain) = self.swapchain.take() {
            swapchain.destroy(&self.device);
        }
        self.device.destroy_graphics_pipeline(&self.pipeline);
        self.device.destroy_render_pass(self.render_pass);
        self.binding.destroy(&self.device);
        self.overlay = None;
        self.active = None;
        self.state = FrameState::Idle;

        tracing::info!(
            presented = self.stats.frames_presented,
            skipped = self.stats.frames_skipped,
            recreations = self.stats.recreations,
            "Frame orchestrator shut down"
        );
        idle.map_err(RenderError::from)
    }
}

impl<D: RenderDevice, P: PlatformContext> Drop for FrameOrchestrator<D, P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("Renderer shutdown failed: {e}");
        }
    }
}
