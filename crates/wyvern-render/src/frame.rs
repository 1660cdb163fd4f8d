//! Frame-context pool.
//!
//! Each of the K slots owns the resources one frame in flight needs: a command
//! buffer, an image-available and a render-finished semaphore, an in-flight fence
//! and a uniform buffer with its descriptor set. A slot moves through
//! [`SlotPhase`] in a fixed order; out-of-order calls are rejected with
//! [`RenderError::SyncViolation`] before any device call is made.
//!
//! The fence wait is split in two: [`FramePool::wait_frame`] blocks until the
//! slot's previous submission has completed, and [`FramePool::confirm_frame`]
//! resets the fence. Only a caller that is certain to submit may confirm; a
//! caller that bails out in between uses [`FramePool::release_frame`] and leaves
//! the fence signaled.

use crate::binding::UniformBinding;
use crate::error::{RenderError, Result};
use ash::vk;
use wyvern_core::constants::FRAME_UNIFORM_SIZE;
use wyvern_gpu::{DeviceBuffer, GpuError, MemoryLocation, RenderDevice};

/// Where a frame slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Not in use by the CPU. The last submission may still be executing.
    Idle,
    /// The fence has been waited on; the GPU is done with the slot.
    Waited,
    /// The fence has been reset; the slot must be submitted.
    Confirmed,
    /// The command buffer is recording.
    Recording,
    /// The command buffer is ready to submit.
    Recorded,
}

/// Resources for one frame in flight.
pub struct FrameContext<B> {
    command_buffer: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
    uniform_buffer: B,
    descriptor_set: vk::DescriptorSet,
    phase: SlotPhase,
}

impl<B: DeviceBuffer> FrameContext<B> {
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }

    pub fn in_flight(&self) -> vk::Fence {
        self.in_flight
    }

    pub fn uniform_buffer(&self) -> &B {
        &self.uniform_buffer
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    pub fn phase(&self) -> SlotPhase {
        self.phase
    }
}

/// Fixed pool of K frame contexts.
pub struct FramePool<D: RenderDevice> {
    frames: Vec<FrameContext<D::Buffer>>,
    fence_timeout_ns: u64,
    sync_alive: bool,
}

impl<D: RenderDevice> FramePool<D> {
    /// A pool without slots, standing in until the real pool is built.
    pub(crate) fn empty(fence_timeout_ns: u64) -> Self {
        Self {
            frames: Vec::new(),
            fence_timeout_ns,
            sync_alive: false,
        }
    }

    /// Create `count` slots with signaled fences, so the first wait on each
    /// slot returns immediately.
    pub fn new(
        device: &D,
        count: usize,
        binding: &UniformBinding,
        fence_timeout_ns: u64,
    ) -> Result<Self> {
        let count_u32 = u32::try_from(count)
            .map_err(|_| RenderError::InvalidConfig(format!("{count} frame slots")))?;

        let command_buffers = device.allocate_command_buffers(count_u32)?;
        let descriptor_sets = match binding.allocate(device, count_u32) {
            Ok(sets) => sets,
            Err(e) => {
                device.free_command_buffers(&command_buffers);
                return Err(e);
            }
        };

        let mut pool = Self {
            frames: Vec::with_capacity(count),
            fence_timeout_ns,
            sync_alive: true,
        };

        for (i, (&command_buffer, &descriptor_set)) in
            command_buffers.iter().zip(&descriptor_sets).enumerate()
        {
            match Self::create_frame(device, binding, i, command_buffer, descriptor_set) {
                Ok(frame) => pool.frames.push(frame),
                Err(e) => {
                    let remaining = &command_buffers[i..];
                    device.free_command_buffers(remaining);
                    pool.destroy(device);
                    return Err(e);
                }
            }
        }

        tracing::debug!(frames = count, "Created frame pool");
        Ok(pool)
    }

    fn create_frame(
        device: &D,
        binding: &UniformBinding,
        index: usize,
        command_buffer: vk::CommandBuffer,
        descriptor_set: vk::DescriptorSet,
    ) -> Result<FrameContext<D::Buffer>> {
        let uniform_buffer = device.create_buffer(
            FRAME_UNIFORM_SIZE as u64,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            &format!("frame_uniforms_{index}"),
        )?;
        binding.bind_buffer(device, descriptor_set, uniform_buffer.handle());

        let (image_available, render_finished, in_flight) = match Self::create_sync_objects(device)
        {
            Ok(sync) => sync,
            Err(e) => {
                if let Err(cleanup) = device.destroy_buffer(uniform_buffer) {
                    tracing::warn!("Failed to free uniform buffer: {cleanup}");
                }
                return Err(e);
            }
        };

        Ok(FrameContext {
            command_buffer,
            image_available,
            render_finished,
            in_flight,
            uniform_buffer,
            descriptor_set,
            phase: SlotPhase::Idle,
        })
    }

    fn create_sync_objects(device: &D) -> Result<(vk::Semaphore, vk::Semaphore, vk::Fence)> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e.into());
            }
        };
        match device.create_fence(true) {
            Ok(fence) => Ok((image_available, render_finished, fence)),
            Err(e) => {
                device.destroy_semaphore(image_available);
                device.destroy_semaphore(render_finished);
                Err(e.into())
            }
        }
    }

    /// Number of slots (K).
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the pool has no slots.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Access slot `index`.
    pub fn frame(&self, index: usize) -> Option<&FrameContext<D::Buffer>> {
        self.frames.get(index)
    }

    /// Whether sync objects currently exist.
    pub fn sync_alive(&self) -> bool {
        self.sync_alive
    }

    fn slot_in(
        &mut self,
        index: usize,
        allowed: &[SlotPhase],
        operation: &str,
    ) -> Result<&mut FrameContext<D::Buffer>> {
        if !self.sync_alive {
            return Err(RenderError::SyncViolation(format!(
                "{operation} on frame slot {index} while sync objects are destroyed"
            )));
        }
        let frame = self.frames.get_mut(index).ok_or_else(|| {
            RenderError::SyncViolation(format!("{operation} on missing frame slot {index}"))
        })?;
        if !allowed.contains(&frame.phase) {
            return Err(RenderError::SyncViolation(format!(
                "{operation} on frame slot {index} in phase {:?}",
                frame.phase
            )));
        }
        Ok(frame)
    }

    /// Block until slot `index`'s previous submission has completed.
    ///
    /// The fence is left signaled.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_frame(&mut self, device: &D, index: usize) -> Result<()> {
        let timeout = self.fence_timeout_ns;
        let frame = self.slot_in(index, &[SlotPhase::Idle], "wait_frame")?;
        device
            .wait_for_fence(frame.in_flight, timeout)
            .map_err(|e| match e {
                GpuError::Timeout => RenderError::FenceTimeout { slot: index },
                e => e.into(),
            })?;
        frame.phase = SlotPhase::Waited;
        Ok(())
    }

    /// Reset slot `index`'s fence. The caller commits to submitting the slot.
    pub fn confirm_frame(&mut self, device: &D, index: usize) -> Result<()> {
        let frame = self.slot_in(index, &[SlotPhase::Waited], "confirm_frame")?;
        device.reset_fence(frame.in_flight)?;
        frame.phase = SlotPhase::Confirmed;
        Ok(())
    }

    /// Return a waited but unconfirmed slot to idle, keeping its fence signaled.
    pub fn release_frame(&mut self, index: usize) -> Result<()> {
        let frame = self.slot_in(index, &[SlotPhase::Waited], "release_frame")?;
        frame.phase = SlotPhase::Idle;
        Ok(())
    }

    /// Reset and begin slot `index`'s command buffer.
    pub fn begin_recording(&mut self, device: &D, index: usize) -> Result<vk::CommandBuffer> {
        let frame = self.slot_in(index, &[SlotPhase::Confirmed], "begin_recording")?;
        device.reset_command_buffer(frame.command_buffer)?;
        device.begin_command_buffer(
            frame.command_buffer,
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        )?;
        frame.phase = SlotPhase::Recording;
        Ok(frame.command_buffer)
    }

    /// The command buffer of a slot that is currently recording.
    pub fn recording_command_buffer(&mut self, index: usize) -> Result<vk::CommandBuffer> {
        let frame = self.slot_in(index, &[SlotPhase::Recording], "record")?;
        Ok(frame.command_buffer)
    }

    /// End slot `index`'s command buffer.
    pub fn end_recording(&mut self, device: &D, index: usize) -> Result<()> {
        let frame = self.slot_in(index, &[SlotPhase::Recording], "end_recording")?;
        device.end_command_buffer(frame.command_buffer)?;
        frame.phase = SlotPhase::Recorded;
        Ok(())
    }

    /// Check that slot `index` is ready to submit.
    pub fn expect_recorded(&mut self, index: usize) -> Result<&FrameContext<D::Buffer>> {
        let frame = self.slot_in(index, &[SlotPhase::Recorded], "submit")?;
        Ok(frame)
    }

    /// Mark slot `index` as handed to the GPU.
    pub fn mark_submitted(&mut self, index: usize) -> Result<()> {
        let frame = self.slot_in(index, &[SlotPhase::Recorded], "mark_submitted")?;
        frame.phase = SlotPhase::Idle;
        Ok(())
    }

    /// Write `payload` into slot `index`'s uniform buffer.
    ///
    /// Only allowed once the slot's fence has been waited on and reset, so the
    /// GPU cannot be reading the buffer.
    pub fn write_uniforms(&mut self, index: usize, payload: &[u8]) -> Result<()> {
        let frame = self.slot_in(
            index,
            &[SlotPhase::Confirmed, SlotPhase::Recording, SlotPhase::Recorded],
            "write_uniforms",
        )?;
        if payload.len() as u64 > frame.uniform_buffer.size() {
            return Err(RenderError::SyncViolation(format!(
                "uniform payload of {} bytes exceeds the {}-byte buffer",
                payload.len(),
                frame.uniform_buffer.size()
            )));
        }
        frame.uniform_buffer.write_bytes(0, payload)?;
        Ok(())
    }

    /// Destroy every slot's semaphores and fence.
    ///
    /// The device must be idle.
    pub fn destroy_sync(&mut self, device: &D) {
        if !self.sync_alive {
            return;
        }
        for frame in &mut self.frames {
            device.destroy_semaphore(frame.image_available);
            device.destroy_semaphore(frame.render_finished);
            device.destroy_fence(frame.in_flight);
            frame.image_available = vk::Semaphore::null();
            frame.render_finished = vk::Semaphore::null();
            frame.in_flight = vk::Fence::null();
        }
        self.sync_alive = false;
    }

    /// Create fresh sync objects (fences signaled) and return every slot to idle.
    pub fn create_sync(&mut self, device: &D) -> Result<()> {
        if self.sync_alive {
            return Err(RenderError::SyncViolation(
                "create_sync while sync objects exist".to_string(),
            ));
        }
        for i in 0..self.frames.len() {
            match Self::create_sync_objects(device) {
                Ok((image_available, render_finished, in_flight)) => {
                    let frame = &mut self.frames[i];
                    frame.image_available = image_available;
                    frame.render_finished = render_finished;
                    frame.in_flight = in_flight;
                    frame.phase = SlotPhase::Idle;
                }
                Err(e) => {
                    for frame in &mut self.frames[..i] {
                        device.destroy_semaphore(frame.image_available);
                        device.destroy_semaphore(frame.render_finished);
                        device.destroy_fence(frame.in_flight);
                    }
                    return Err(e);
                }
            }
        }
        self.sync_alive = true;
        Ok(())
    }

    /// Destroy every resource of the pool, leaving it empty.
    ///
    /// The device must be idle. Descriptor sets are freed with their pool.
    pub fn destroy(&mut self, device: &D) {
        self.destroy_sync(device);
        let command_buffers: Vec<_> = self.frames.iter().map(|f| f.command_buffer).collect();
        if !command_buffers.is_empty() {
            device.free_command_buffers(&command_buffers);
        }
        for frame in self.frames.drain(..) {
            if let Err(e) = device.destroy_buffer(frame.uniform_buffer) {
                tracing::warn!("Failed to free uniform buffer: {e}");
            }
        }
    }
}
