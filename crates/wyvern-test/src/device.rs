//! Recording [`RenderDevice`] with simulated GPU state.
//!
//! `MockDevice` hands out fabricated handles and models the state Vulkan
//! validation would check: fence and semaphore signal state, command buffer
//! lifecycle, live objects and host-visible buffer memory. Submitted work
//! "executes" at submission (buffer copies are applied then) and completes
//! when its fence is waited on or the device is idled. Anything a driver would
//! reject is logged as a violation and, where the call returns a result,
//! reported as an error.

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use wyvern_gpu::{
    AcquireStatus, AttachmentImage, DeviceBuffer, GpuError, GraphicsPipeline, MemoryLocation,
    PipelineDesc, PresentStatus, RenderDevice, RenderPassBegin, Result, Submission,
    SurfaceSupport, SwapchainDesc,
};

/// Signal state of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Signaled,
    Unsignaled,
    /// Attached to submitted work that has not completed yet.
    Pending,
}

/// Kinds of objects whose lifetime is tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Fence,
    Semaphore,
    CommandBuffer,
    Buffer,
    DepthImage,
    ImageView,
    Framebuffer,
    Swapchain,
    RenderPass,
    Pipeline,
    DescriptorSetLayout,
    DescriptorPool,
}

/// Device calls relevant to synchronization ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroyFence(vk::Fence),
    /// `blocked` is true when the fence still had pending work.
    WaitFence { fence: vk::Fence, blocked: bool },
    /// A wait on pending work returned without the work completing.
    WaitExpired(vk::Fence),
    ResetFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    WaitIdle,
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit { fence: vk::Fence },
    Acquire { semaphore: vk::Semaphore },
    Present { image_index: u32 },
    CreateSwapchain { width: u32, height: u32 },
    DestroySwapchain(vk::SwapchainKHR),
    CreateImageView(vk::ImageView),
    DestroyImageView(vk::ImageView),
    CreateDepthImage { width: u32, height: u32 },
    DestroyDepthImage,
    CreateFramebuffer(vk::Framebuffer),
    DestroyFramebuffer(vk::Framebuffer),
}

/// A recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        extent: (u32, u32),
        clear_color: [f32; 4],
    },
    EndRenderPass,
    SetViewport { width: f32, height: f32 },
    SetScissor { extent: (u32, u32) },
    BindPipeline(vk::Pipeline),
    BindDescriptorSet {
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    },
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer, vk::IndexType),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        size: u64,
    },
}

/// One queue submission.
#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub commands: Vec<Command>,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

/// One presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentRecord {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub wait_semaphore: vk::Semaphore,
}

/// Scripted result for the next acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedAcquire {
    Acquired,
    Suboptimal,
    OutOfDate,
    SurfaceLost,
}

/// Scripted result for the next present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedPresent {
    Presented,
    Suboptimal,
    OutOfDate,
    SurfaceLost,
}

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOp {
    CreateBuffer,
    CreateFence,
    CreateSwapchain,
    CreateGraphicsPipeline,
    Submit,
    DestroyBuffer,
    /// A wait on a pending fence fails with a device error; the work stays pending.
    WaitFence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandBufferPhase {
    Initial,
    Recording,
    Executable,
    Pending,
}

#[derive(Debug)]
struct CommandBufferState {
    phase: CommandBufferPhase,
    commands: Vec<Command>,
}

#[derive(Debug)]
struct BufferRecord {
    memory: Vec<u8>,
    host_visible: bool,
    name: String,
}

#[derive(Debug)]
struct SwapchainRecord {
    image_count: u32,
    next_image: u32,
}

#[derive(Debug)]
struct MockState {
    next_handle: u64,
    calls: Vec<Call>,
    violations: Vec<String>,
    live: HashMap<ObjectKind, HashSet<u64>>,
    fences: HashMap<vk::Fence, FenceState>,
    semaphores: HashMap<vk::Semaphore, bool>,
    command_buffers: HashMap<vk::CommandBuffer, CommandBufferState>,
    buffers: HashMap<vk::Buffer, BufferRecord>,
    descriptor_writes: HashMap<vk::DescriptorSet, (u32, vk::Buffer, u64)>,
    swapchains: HashMap<vk::SwapchainKHR, SwapchainRecord>,
    submissions: Vec<SubmitRecord>,
    presents: Vec<PresentRecord>,
    max_pending_fences: usize,
    acquire_script: VecDeque<ScriptedAcquire>,
    present_script: VecDeque<ScriptedPresent>,
    failures: HashSet<FailOp>,
    expiring_waits: u32,
    support: SurfaceSupport,
}

impl MockState {
    fn handle<H: Handle>(&mut self, kind: ObjectKind) -> H {
        self.next_handle += 1;
        let raw = self.next_handle;
        self.live.entry(kind).or_default().insert(raw);
        H::from_raw(raw)
    }

    fn release<H: Handle>(&mut self, kind: ObjectKind, handle: H) -> bool {
        let raw = handle.as_raw();
        let known = self
            .live
            .get_mut(&kind)
            .is_some_and(|live| live.remove(&raw));
        if !known {
            self.violation(format!("destroy of unknown {kind:?} {raw:#x}"));
        }
        known
    }

    fn violation(&mut self, message: String) {
        tracing::warn!("mock device violation: {message}");
        self.violations.push(message);
    }

    fn fail(&mut self, op: FailOp) -> Result<()> {
        if self.failures.remove(&op) {
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))
        } else {
            Ok(())
        }
    }

    fn pending_fences(&self) -> usize {
        self.fences
            .values()
            .filter(|state| **state == FenceState::Pending)
            .count()
    }

    fn complete(&mut self, fence: vk::Fence) {
        for record in &self.submissions {
            if record.fence != fence {
                continue;
            }
            for cmd in &record.command_buffers {
                if let Some(state) = self.command_buffers.get_mut(cmd) {
                    if state.phase == CommandBufferPhase::Pending {
                        state.phase = CommandBufferPhase::Executable;
                    }
                }
            }
        }
        self.fences.insert(fence, FenceState::Signaled);
    }

    fn complete_all(&mut self) {
        let pending: Vec<_> = self
            .fences
            .iter()
            .filter(|(_, state)| **state == FenceState::Pending)
            .map(|(fence, _)| *fence)
            .collect();
        for fence in pending {
            self.complete(fence);
        }
        for state in self.command_buffers.values_mut() {
            if state.phase == CommandBufferPhase::Pending {
                state.phase = CommandBufferPhase::Executable;
            }
        }
    }

    /// Whether a pending command buffer copies from or into `buffer`.
    fn buffer_in_flight(&self, buffer: vk::Buffer) -> bool {
        self.command_buffers
            .values()
            .filter(|state| state.phase == CommandBufferPhase::Pending)
            .flat_map(|state| &state.commands)
            .any(|command| {
                matches!(command, Command::CopyBuffer { src, dst, .. }
                    if *src == buffer || *dst == buffer)
            })
    }

    fn record(&mut self, cmd: vk::CommandBuffer, command: Command) {
        match self.command_buffers.get_mut(&cmd) {
            Some(state) if state.phase == CommandBufferPhase::Recording => {
                state.commands.push(command);
            }
            Some(state) => {
                let phase = state.phase;
                self.violation(format!("{command:?} recorded into {phase:?} command buffer"));
            }
            None => self.violation(format!("{command:?} recorded into unknown command buffer")),
        }
    }

    fn copy(&mut self, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        let Ok(len) = usize::try_from(size) else {
            self.violation(format!("copy of {size} bytes"));
            return;
        };
        let data = match self.buffers.get(&src) {
            Some(record) if record.memory.len() >= len => record.memory[..len].to_vec(),
            _ => {
                self.violation(format!("copy from invalid source {src:?}"));
                return;
            }
        };
        match self.buffers.get_mut(&dst) {
            Some(record) if record.memory.len() >= len => {
                record.memory[..len].copy_from_slice(&data);
            }
            _ => self.violation(format!("copy into invalid destination {dst:?}")),
        }
    }
}

fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
    }
}

/// Recording device. Clones share state, so a test can keep one clone while
/// the renderer owns another.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a device whose surface leaves the extent to the window
    /// (`current_extent` is the `u32::MAX` sentinel) and offers 2..=3 images.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_handle: 0x1000,
                calls: Vec::new(),
                violations: Vec::new(),
                live: HashMap::new(),
                fences: HashMap::new(),
                semaphores: HashMap::new(),
                command_buffers: HashMap::new(),
                buffers: HashMap::new(),
                descriptor_writes: HashMap::new(),
                swapchains: HashMap::new(),
                submissions: Vec::new(),
                presents: Vec::new(),
                max_pending_fences: 0,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                failures: HashSet::new(),
                expiring_waits: 0,
                support: default_support(),
            })),
        }
    }

    /// Queue the result of an upcoming acquire. Unscripted acquires succeed.
    pub fn script_acquire(&self, result: ScriptedAcquire) {
        self.state.lock().acquire_script.push_back(result);
    }

    /// Queue the result of an upcoming present. Unscripted presents succeed.
    pub fn script_present(&self, result: ScriptedPresent) {
        self.state.lock().present_script.push_back(result);
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: FailOp) {
        self.state.lock().failures.insert(op);
    }

    /// Make the next `count` waits on pending fences expire with
    /// [`GpuError::Timeout`], leaving the work pending.
    pub fn expire_waits(&self, count: u32) {
        self.state.lock().expiring_waits += count;
    }

    /// Replace the formats the surface reports.
    pub fn set_surface_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.state.lock().support.formats = formats;
    }

    /// Replace the surface's image count limits.
    pub fn set_image_count_limits(&self, min: u32, max: u32) {
        let mut state = self.state.lock();
        state.support.capabilities.min_image_count = min;
        state.support.capabilities.max_image_count = max;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn submissions(&self) -> Vec<SubmitRecord> {
        self.state.lock().submissions.clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.state.lock().presents.clone()
    }

    /// Draw commands across every submission, in order.
    pub fn submitted_draws(&self) -> Vec<Command> {
        self.state
            .lock()
            .submissions
            .iter()
            .flat_map(|record| record.commands.iter())
            .filter(|command| {
                matches!(command, Command::Draw { .. } | Command::DrawIndexed { .. })
            })
            .cloned()
            .collect()
    }

    /// Commands currently recorded in `cmd`.
    pub fn recorded_commands(&self, cmd: vk::CommandBuffer) -> Vec<Command> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd)
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.lock().fences.get(&fence).copied()
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> Option<bool> {
        self.state.lock().semaphores.get(&semaphore).copied()
    }

    pub fn pending_fences(&self) -> usize {
        self.state.lock().pending_fences()
    }

    /// Largest number of fences that were pending at the same time.
    pub fn max_pending_fences(&self) -> usize {
        self.state.lock().max_pending_fences
    }

    /// Memory of any buffer, host-visible or not.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|record| record.memory.clone())
    }

    /// Whether a buffer was created in host-visible memory.
    pub fn buffer_host_visible(&self, buffer: vk::Buffer) -> Option<bool> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|record| record.host_visible)
    }

    /// Debug name a buffer was created with.
    pub fn buffer_name(&self, buffer: vk::Buffer) -> Option<String> {
        self.state
            .lock()
            .buffers
            .get(&buffer)
            .map(|record| record.name.clone())
    }

    /// `(binding, buffer, range)` last written to `set`.
    pub fn descriptor_binding(&self, set: vk::DescriptorSet) -> Option<(u32, vk::Buffer, u64)> {
        self.state.lock().descriptor_writes.get(&set).copied()
    }

    pub fn live_count(&self, kind: ObjectKind) -> usize {
        self.state.lock().live.get(&kind).map_or(0, HashSet::len)
    }

    /// Every live object, by kind.
    pub fn live_objects(&self) -> usize {
        self.state.lock().live.values().map(HashSet::len).sum()
    }
}

/// Buffer backed by the mock's memory.
#[derive(Debug)]
pub struct MockBuffer {
    handle: vk::Buffer,
    size: u64,
    host_visible: bool,
    state: Arc<Mutex<MockState>>,
}

impl DeviceBuffer for MockBuffer {
    fn handle(&self) -> vk::Buffer {
        self.handle
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_host_visible(&self) -> bool {
        self.host_visible
    }

    fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.host_visible {
            return Err(GpuError::InvalidState("buffer is not host visible".into()));
        }
        let end = offset + data.len() as u64;
        if end > self.size {
            return Err(GpuError::InvalidState(format!(
                "write of {end} bytes into {}-byte buffer",
                self.size
            )));
        }
        let mut state = self.state.lock();
        let record = state
            .buffers
            .get_mut(&self.handle)
            .ok_or_else(|| GpuError::InvalidState("write to destroyed buffer".into()))?;
        let start = offset as usize;
        record.memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_bytes(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if !self.host_visible {
            return Err(GpuError::InvalidState("buffer is not host visible".into()));
        }
        if offset + len as u64 > self.size {
            return Err(GpuError::InvalidState("read past end of buffer".into()));
        }
        let state = self.state.lock();
        let record = state
            .buffers
            .get(&self.handle)
            .ok_or_else(|| GpuError::InvalidState("read from destroyed buffer".into()))?;
        let start = offset as usize;
        Ok(record.memory[start..start + len].to_vec())
    }
}

/// Depth image handle pair.
#[derive(Debug)]
pub struct MockImage {
    image: vk::Image,
    view: vk::ImageView,
}

impl AttachmentImage for MockImage {
    fn image(&self) -> vk::Image {
        self.image
    }

    fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl RenderDevice for MockDevice {
    type Buffer = MockBuffer;
    type Image = MockImage;

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::CreateFence)?;
        let fence: vk::Fence = state.handle(ObjectKind::Fence);
        let initial = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(fence, initial);
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.fences.get(&fence) == Some(&FenceState::Pending) {
            state.violation(format!("destroyed fence {fence:?} with pending work"));
        }
        state.release(ObjectKind::Fence, fence);
        state.fences.remove(&fence);
        state.calls.push(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => {
                state.calls.push(Call::WaitFence {
                    fence,
                    blocked: false,
                });
                Ok(())
            }
            Some(FenceState::Pending) => {
                if state.expiring_waits > 0 {
                    state.expiring_waits -= 1;
                    state.calls.push(Call::WaitExpired(fence));
                    return Err(GpuError::Timeout);
                }
                if let Err(e) = state.fail(FailOp::WaitFence) {
                    state.calls.push(Call::WaitExpired(fence));
                    return Err(e);
                }
                state.complete(fence);
                state.calls.push(Call::WaitFence {
                    fence,
                    blocked: true,
                });
                Ok(())
            }
            Some(FenceState::Unsignaled) => {
                // Nothing will ever signal it: a real device would hang here.
                state.violation(format!("wait on fence {fence:?} with no pending work"));
                Err(GpuError::Timeout)
            }
            None => {
                state.violation(format!("wait on unknown fence {fence:?}"));
                Err(GpuError::InvalidState("unknown fence".into()))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        match state.fences.get(&fence).copied() {
            Some(FenceState::Pending) => {
                state.violation(format!("reset of fence {fence:?} with pending work"));
                Err(GpuError::InvalidState("fence in use".into()))
            }
            Some(_) => {
                state.fences.insert(fence, FenceState::Unsignaled);
                state.calls.push(Call::ResetFence(fence));
                Ok(())
            }
            None => {
                state.violation(format!("reset of unknown fence {fence:?}"));
                Err(GpuError::InvalidState("unknown fence".into()))
            }
        }
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        let state = self.state.lock();
        state
            .fences
            .get(&fence)
            .map(|s| *s == FenceState::Signaled)
            .ok_or_else(|| GpuError::InvalidState("unknown fence".into()))
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let semaphore: vk::Semaphore = state.handle(ObjectKind::Semaphore);
        state.semaphores.insert(semaphore, false);
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release(ObjectKind::Semaphore, semaphore);
        state.semaphores.remove(&semaphore);
        state.calls.push(Call::DestroySemaphore(semaphore));
    }

    fn wait_idle(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.complete_all();
        state.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let cmd: vk::CommandBuffer = state.handle(ObjectKind::CommandBuffer);
            state.command_buffers.insert(
                cmd,
                CommandBufferState {
                    phase: CommandBufferPhase::Initial,
                    commands: Vec::new(),
                },
            );
            buffers.push(cmd);
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for &cmd in command_buffers {
            if state
                .command_buffers
                .get(&cmd)
                .is_some_and(|s| s.phase == CommandBufferPhase::Pending)
            {
                state.violation(format!("freed pending command buffer {cmd:?}"));
            }
            state.release(ObjectKind::CommandBuffer, cmd);
            state.command_buffers.remove(&cmd);
        }
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let phase = state.command_buffers.get(&cmd).map(|s| s.phase);
        match phase {
            Some(CommandBufferPhase::Pending) => {
                state.violation(format!("begin of pending command buffer {cmd:?}"));
                Err(GpuError::InvalidState("command buffer in use".into()))
            }
            Some(CommandBufferPhase::Recording) => {
                state.violation(format!("begin of recording command buffer {cmd:?}"));
                Err(GpuError::InvalidState("command buffer already recording".into()))
            }
            Some(_) => {
                if let Some(s) = state.command_buffers.get_mut(&cmd) {
                    s.phase = CommandBufferPhase::Recording;
                    s.commands.clear();
                }
                state.calls.push(Call::BeginCommandBuffer(cmd));
                Ok(())
            }
            None => Err(GpuError::InvalidState("unknown command buffer".into())),
        }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let phase = state.command_buffers.get(&cmd).map(|s| s.phase);
        match phase {
            Some(CommandBufferPhase::Recording) => {
                if let Some(s) = state.command_buffers.get_mut(&cmd) {
                    s.phase = CommandBufferPhase::Executable;
                }
                state.calls.push(Call::EndCommandBuffer(cmd));
                Ok(())
            }
            _ => {
                state.violation(format!("end of command buffer {cmd:?} that is not recording"));
                Err(GpuError::InvalidState("command buffer not recording".into()))
            }
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let phase = state.command_buffers.get(&cmd).map(|s| s.phase);
        match phase {
            Some(CommandBufferPhase::Pending) => {
                state.violation(format!("reset of pending command buffer {cmd:?}"));
                Err(GpuError::InvalidState("command buffer in use".into()))
            }
            Some(_) => {
                if let Some(s) = state.command_buffers.get_mut(&cmd) {
                    s.phase = CommandBufferPhase::Initial;
                    s.commands.clear();
                }
                state.calls.push(Call::ResetCommandBuffer(cmd));
                Ok(())
            }
            None => Err(GpuError::InvalidState("unknown command buffer".into())),
        }
    }

    fn submit(&self, submission: &Submission<'_>) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::Submit)?;

        let fence = submission.fence;
        if fence != vk::Fence::null() {
            match state.fences.get(&fence).copied() {
                Some(FenceState::Unsignaled) => {}
                other => {
                    state.violation(format!("submit with fence {fence:?} in state {other:?}"));
                    return Err(GpuError::InvalidState("submit fence not unsignaled".into()));
                }
            }
        }

        let mut commands = Vec::new();
        for cmd in submission.command_buffers {
            match state.command_buffers.get(cmd) {
                Some(s) if s.phase == CommandBufferPhase::Executable => {
                    commands.extend(s.commands.iter().cloned());
                }
                other => {
                    let phase = other.map(|s| s.phase);
                    state.violation(format!("submit of command buffer {cmd:?} in {phase:?}"));
                    return Err(GpuError::InvalidState("command buffer not executable".into()));
                }
            }
        }

        for semaphore in submission.wait_semaphores {
            match state.semaphores.get(semaphore).copied() {
                Some(true) => {
                    state.semaphores.insert(*semaphore, false);
                }
                other => state.violation(format!(
                    "submit waits on semaphore {semaphore:?} that will never signal ({other:?})"
                )),
            }
        }

        for command in &commands {
            if let Command::CopyBuffer { src, dst, size } = command {
                state.copy(*src, *dst, *size);
            }
        }

        for semaphore in submission.signal_semaphores {
            state.semaphores.insert(*semaphore, true);
        }
        for cmd in submission.command_buffers {
            if let Some(s) = state.command_buffers.get_mut(cmd) {
                s.phase = CommandBufferPhase::Pending;
            }
        }
        if fence != vk::Fence::null() {
            state.fences.insert(fence, FenceState::Pending);
        }
        let pending = state.pending_fences();
        state.max_pending_fences = state.max_pending_fences.max(pending);

        state.submissions.push(SubmitRecord {
            command_buffers: submission.command_buffers.to_vec(),
            commands,
            wait_semaphores: submission.wait_semaphores.to_vec(),
            wait_stages: submission.wait_stages.to_vec(),
            signal_semaphores: submission.signal_semaphores.to_vec(),
            fence,
        });
        state.calls.push(Call::Submit { fence });
        Ok(())
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, begin: &RenderPassBegin) {
        self.state.lock().record(
            cmd,
            Command::BeginRenderPass {
                framebuffer: begin.framebuffer,
                extent: (begin.extent.width, begin.extent.height),
                clear_color: begin.clear_color,
            },
        );
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.state.lock().record(cmd, Command::EndRenderPass);
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport) {
        self.state.lock().record(
            cmd,
            Command::SetViewport {
                width: viewport.width,
                height: viewport.height,
            },
        );
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D) {
        self.state.lock().record(
            cmd,
            Command::SetScissor {
                extent: (scissor.extent.width, scissor.extent.height),
            },
        );
    }

    fn cmd_bind_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.state.lock().record(cmd, Command::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.state
            .lock()
            .record(cmd, Command::BindDescriptorSet { layout, set });
    }

    fn cmd_bind_vertex_buffer(&self, cmd: vk::CommandBuffer, buffer: vk::Buffer) {
        self.state.lock().record(cmd, Command::BindVertexBuffer(buffer));
    }

    fn cmd_bind_index_buffer(
        &self,
        cmd: vk::CommandBuffer,
        buffer: vk::Buffer,
        index_type: vk::IndexType,
    ) {
        self.state
            .lock()
            .record(cmd, Command::BindIndexBuffer(buffer, index_type));
    }

    fn cmd_draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.state.lock().record(
            cmd,
            Command::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        cmd: vk::CommandBuffer,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.state.lock().record(
            cmd,
            Command::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: u64) {
        self.state
            .lock()
            .record(cmd, Command::CopyBuffer { src, dst, size });
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<MockBuffer> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::CreateBuffer)?;
        if size == 0 {
            state.violation(format!("zero-sized buffer {name}"));
            return Err(GpuError::AllocationFailed(format!("{name}: zero size")));
        }
        let len = usize::try_from(size)
            .map_err(|_| GpuError::AllocationFailed(format!("{name}: {size} bytes")))?;
        let handle: vk::Buffer = state.handle(ObjectKind::Buffer);
        let host_visible = location != MemoryLocation::GpuOnly;
        state.buffers.insert(
            handle,
            BufferRecord {
                memory: vec![0; len],
                host_visible,
                name: name.to_string(),
            },
        );
        Ok(MockBuffer {
            handle,
            size,
            host_visible,
            state: Arc::clone(&self.state),
        })
    }

    fn destroy_buffer(&self, buffer: MockBuffer) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::DestroyBuffer)?;
        if state.buffer_in_flight(buffer.handle) {
            state.violation(format!("destroyed buffer {:?} used by pending work", buffer.handle));
        }
        if state.release(ObjectKind::Buffer, buffer.handle) {
            state.buffers.remove(&buffer.handle);
            Ok(())
        } else {
            Err(GpuError::InvalidState("unknown buffer".into()))
        }
    }

    fn create_depth_image(&self, extent: vk::Extent2D, _format: vk::Format) -> Result<MockImage> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if extent.width == 0 || extent.height == 0 {
            state.violation("zero-sized depth image".to_string());
            return Err(GpuError::AllocationFailed("zero-sized depth image".into()));
        }
        let image: vk::Image = state.handle(ObjectKind::DepthImage);
        let view: vk::ImageView = state.handle(ObjectKind::ImageView);
        state.calls.push(Call::CreateDepthImage {
            width: extent.width,
            height: extent.height,
        });
        Ok(MockImage { image, view })
    }

    fn destroy_depth_image(&self, image: MockImage) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release(ObjectKind::ImageView, image.view);
        state.release(ObjectKind::DepthImage, image.image);
        state.calls.push(Call::DestroyDepthImage);
        Ok(())
    }

    fn create_uniform_set_layout(
        &self,
        _binding: u32,
        _stages: vk::ShaderStageFlags,
    ) -> Result<vk::DescriptorSetLayout> {
        Ok(self.state.lock().handle(ObjectKind::DescriptorSetLayout))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .lock()
            .release(ObjectKind::DescriptorSetLayout, layout);
    }

    fn create_descriptor_pool(
        &self,
        _max_sets: u32,
        _pool_sizes: &[vk::DescriptorPoolSize],
    ) -> Result<vk::DescriptorPool> {
        Ok(self.state.lock().handle(ObjectKind::DescriptorPool))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.state.lock().release(ObjectKind::DescriptorPool, pool);
    }

    fn allocate_descriptor_sets(
        &self,
        _pool: vk::DescriptorPool,
        layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        // Sets are freed with their pool, so they are not tracked as live objects.
        Ok(layouts
            .iter()
            .map(|_| {
                state.next_handle += 1;
                vk::DescriptorSet::from_raw(state.next_handle)
            })
            .collect())
    }

    fn write_uniform_descriptor(
        &self,
        set: vk::DescriptorSet,
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    ) {
        self.state
            .lock()
            .descriptor_writes
            .insert(set, (binding, buffer, range));
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        Ok(self.state.lock().handle(ObjectKind::RenderPass))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state.lock().release(ObjectKind::RenderPass, render_pass);
    }

    fn create_graphics_pipeline(
        &self,
        desc: &PipelineDesc,
        _render_pass: vk::RenderPass,
        _set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<GraphicsPipeline> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::CreateGraphicsPipeline)?;
        if desc.vertex_shader.is_empty() || desc.fragment_shader.is_empty() {
            return Err(GpuError::ShaderModule("empty SPIR-V".into()));
        }
        let pipeline = state.handle(ObjectKind::Pipeline);
        state.next_handle += 1;
        let layout = vk::PipelineLayout::from_raw(state.next_handle);
        Ok(GraphicsPipeline { pipeline, layout })
    }

    fn destroy_graphics_pipeline(&self, pipeline: &GraphicsPipeline) {
        self.state
            .lock()
            .release(ObjectKind::Pipeline, pipeline.pipeline);
    }

    fn surface_support(&self) -> Result<SurfaceSupport> {
        Ok(self.state.lock().support.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<(vk::SwapchainKHR, Vec<vk::Image>)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.fail(FailOp::CreateSwapchain)?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation("zero-sized swapchain".to_string());
            return Err(GpuError::SwapchainCreation("zero extent".into()));
        }
        if !state.swapchains.is_empty() {
            state.violation("swapchain created while another is alive".to_string());
        }
        let swapchain: vk::SwapchainKHR = state.handle(ObjectKind::Swapchain);
        let images = (0..desc.image_count)
            .map(|_| {
                state.next_handle += 1;
                vk::Image::from_raw(state.next_handle)
            })
            .collect();
        state.swapchains.insert(
            swapchain,
            SwapchainRecord {
                image_count: desc.image_count,
                next_image: 0,
            },
        );
        state.calls.push(Call::CreateSwapchain {
            width: desc.extent.width,
            height: desc.extent.height,
        });
        Ok((swapchain, images))
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release(ObjectKind::Swapchain, swapchain);
        state.swapchains.remove(&swapchain);
        state.calls.push(Call::DestroySwapchain(swapchain));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let view: vk::ImageView = state.handle(ObjectKind::ImageView);
        state.calls.push(Call::CreateImageView(view));
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release(ObjectKind::ImageView, view);
        state.calls.push(Call::DestroyImageView(view));
    }

    fn create_framebuffer(
        &self,
        _render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for view in attachments {
            let alive = state
                .live
                .get(&ObjectKind::ImageView)
                .is_some_and(|live| live.contains(&view.as_raw()));
            if !alive {
                state.violation(format!("framebuffer attachment {view:?} is not alive"));
            }
        }
        let framebuffer: vk::Framebuffer = state.handle(ObjectKind::Framebuffer);
        state.calls.push(Call::CreateFramebuffer(framebuffer));
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.release(ObjectKind::Framebuffer, framebuffer);
        state.calls.push(Call::DestroyFramebuffer(framebuffer));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<AcquireStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(Call::Acquire { semaphore });

        match state.semaphores.get(&semaphore).copied() {
            Some(false) => {}
            Some(true) => state.violation(format!(
                "acquire signals semaphore {semaphore:?} that is already signaled"
            )),
            None => state.violation(format!("acquire with unknown semaphore {semaphore:?}")),
        }

        let scripted = state
            .acquire_script
            .pop_front()
            .unwrap_or(ScriptedAcquire::Acquired);
        let index = match state.swapchains.get_mut(&swapchain) {
            Some(record) => {
                let index = record.next_image;
                record.next_image = (record.next_image + 1) % record.image_count.max(1);
                index
            }
            None => {
                state.violation(format!("acquire from unknown swapchain {swapchain:?}"));
                return Err(GpuError::InvalidState("unknown swapchain".into()));
            }
        };

        match scripted {
            ScriptedAcquire::Acquired | ScriptedAcquire::Suboptimal => {
                state.semaphores.insert(semaphore, true);
                Ok(AcquireStatus::Acquired {
                    index,
                    suboptimal: scripted == ScriptedAcquire::Suboptimal,
                })
            }
            ScriptedAcquire::OutOfDate => Ok(AcquireStatus::OutOfDate),
            ScriptedAcquire::SurfaceLost => Err(GpuError::SurfaceLost),
        }
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.calls.push(Call::Present { image_index });

        if !state.swapchains.contains_key(&swapchain) {
            state.violation(format!("present to unknown swapchain {swapchain:?}"));
            return Err(GpuError::InvalidState("unknown swapchain".into()));
        }
        match state.semaphores.get(&wait_semaphore).copied() {
            Some(true) => {
                state.semaphores.insert(wait_semaphore, false);
            }
            other => state.violation(format!(
                "present waits on semaphore {wait_semaphore:?} that will never signal ({other:?})"
            )),
        }

        let scripted = state
            .present_script
            .pop_front()
            .unwrap_or(ScriptedPresent::Presented);
        if scripted == ScriptedPresent::SurfaceLost {
            return Err(GpuError::SurfaceLost);
        }

        state.presents.push(PresentRecord {
            swapchain,
            image_index,
            wait_semaphore,
        });
        Ok(match scripted {
            ScriptedPresent::Suboptimal => PresentStatus::Suboptimal,
            ScriptedPresent::OutOfDate => PresentStatus::OutOfDate,
            _ => PresentStatus::Presented,
        })
    }
}
