//! Staged host-to-device uploads.
//!
//! Uploads are synchronous: data is written into a reusable host-visible
//! staging buffer, copied into a device-local buffer by a one-shot command
//! buffer, and the call blocks on a dedicated fence until the copy completes.
//! They belong to asset loading, not to the per-frame path.

use crate::error::{RenderError, Result};
use crate::mesh::GpuMesh;
use ash::vk;
use wyvern_core::{IndexData, MeshData};
use wyvern_gpu::{DeviceBuffer, GpuError, MemoryLocation, RenderDevice, Submission};

/// Staging buffer plus the fence that tracks staged copies.
pub struct TransferChannel<D: RenderDevice> {
    staging: Option<D::Buffer>,
    fence: Option<vk::Fence>,
    fence_timeout_ns: u64,
    /// Set when a copy could not be confirmed complete; its command buffer
    /// and destination are leaked and the channel refuses further uploads.
    stalled: bool,
}

impl<D: RenderDevice> TransferChannel<D> {
    /// Create an empty channel. Call [`Self::create_fence`] before uploading.
    pub fn new(fence_timeout_ns: u64) -> Self {
        Self {
            staging: None,
            fence: None,
            fence_timeout_ns,
            stalled: false,
        }
    }

    /// Current staging capacity in bytes.
    pub fn staging_capacity(&self) -> u64 {
        self.staging.as_ref().map_or(0, DeviceBuffer::size)
    }

    /// Make sure the staging buffer holds at least `size` bytes.
    ///
    /// A larger request replaces the buffer; a smaller one keeps it.
    pub fn allocate_staging(&mut self, device: &D, size: u64) -> Result<()> {
        if size <= self.staging_capacity() {
            return Ok(());
        }

        if let Some(old) = self.staging.take() {
            if let Err(e) = device.destroy_buffer(old) {
                tracing::warn!("Failed to free staging buffer: {e}");
            }
        }

        let buffer = device
            .create_buffer(
                size,
                vk::BufferUsageFlags::TRANSFER_SRC,
                MemoryLocation::CpuToGpu,
                "staging",
            )
            .map_err(|e| RenderError::TransferFailure(format!("staging allocation: {e}")))?;
        if !buffer.is_host_visible() {
            if let Err(e) = device.destroy_buffer(buffer) {
                tracing::warn!("Failed to free staging buffer: {e}");
            }
            return Err(RenderError::TransferFailure(
                "staging buffer is not host visible".to_string(),
            ));
        }

        tracing::debug!(size, "Allocated staging buffer");
        self.staging = Some(buffer);
        Ok(())
    }

    /// Copy `bytes` into the start of `dst` and wait for the copy to finish.
    ///
    /// `dst` must have been created with `TRANSFER_DST` usage and be at least
    /// `bytes.len()` long. When a bounded wait expires the copy is still
    /// drained before this returns, so `dst` and the channel are reusable.
    pub fn upload_to(&mut self, device: &D, dst: &D::Buffer, bytes: &[u8]) -> Result<()> {
        self.ensure_not_stalled()?;
        if bytes.is_empty() {
            return Err(RenderError::TransferFailure("empty upload".to_string()));
        }
        let size = bytes.len() as u64;
        if size > dst.size() {
            return Err(RenderError::TransferFailure(format!(
                "{size} bytes do not fit a {}-byte destination",
                dst.size()
            )));
        }
        let fence = self.fence.ok_or_else(|| {
            RenderError::SyncViolation("upload while the transfer fence is destroyed".to_string())
        })?;

        if size > self.staging_capacity() {
            tracing::debug!(
                size,
                capacity = self.staging_capacity(),
                "Growing staging buffer for upload"
            );
            self.allocate_staging(device, size)?;
        }
        let staging = self
            .staging
            .as_mut()
            .ok_or_else(|| RenderError::TransferFailure("no staging buffer".to_string()))?;
        staging
            .write_bytes(0, bytes)
            .map_err(|e| RenderError::TransferFailure(format!("staging write: {e}")))?;
        let src = staging.handle();

        let command_buffers = device
            .allocate_command_buffers(1)
            .map_err(|e| RenderError::TransferFailure(format!("command buffer: {e}")))?;
        let result =
            Self::record_and_submit(device, command_buffers[0], src, dst.handle(), size, fence)
                .and_then(|()| self.wait_for_copy(device, fence));
        if self.stalled {
            tracing::error!("Leaking transfer command buffer still in flight");
        } else {
            device.free_command_buffers(&command_buffers);
        }
        result?;

        tracing::debug!(size, "Uploaded buffer data");
        Ok(())
    }

    fn ensure_not_stalled(&self) -> Result<()> {
        if self.stalled {
            let stalled = GpuError::InvalidState("transfer channel has a copy in flight".into());
            return Err(stalled.into());
        }
        Ok(())
    }

    fn record_and_submit(
        device: &D,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: u64,
        fence: vk::Fence,
    ) -> Result<()> {
        device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .map_err(failure("begin"))?;
        device.cmd_copy_buffer(cmd, src, dst, size);
        device.end_command_buffer(cmd).map_err(failure("end"))?;

        let command_buffers = [cmd];
        device
            .submit(&Submission {
                command_buffers: &command_buffers,
                fence,
                ..Submission::default()
            })
            .map_err(failure("submit"))
    }

    /// Wait for the submitted copy and return the fence to unsignaled.
    ///
    /// An expired bounded wait still blocks until the copy retires, then
    /// reports `TransferFailure`. If completion cannot be confirmed at all
    /// the channel is marked stalled and the device error is returned.
    fn wait_for_copy(&mut self, device: &D, fence: vk::Fence) -> Result<()> {
        let expired = match device.wait_for_fence(fence, self.fence_timeout_ns) {
            Ok(()) => None,
            Err(GpuError::Timeout) => {
                tracing::warn!(
                    timeout_ns = self.fence_timeout_ns,
                    "Transfer exceeded the fence timeout, draining"
                );
                if let Err(e) = device.wait_for_fence(fence, u64::MAX) {
                    self.stalled = true;
                    return Err(e.into());
                }
                Some(GpuError::Timeout)
            }
            Err(e) => {
                self.stalled = true;
                return Err(e.into());
            }
        };
        device.reset_fence(fence).map_err(failure("fence reset"))?;
        match expired {
            Some(e) => Err(failure("wait")(e)),
            None => Ok(()),
        }
    }

    /// Upload vertex bytes into a new device-local vertex buffer.
    pub fn upload_vertex_buffer(
        &mut self,
        device: &D,
        bytes: &[u8],
        name: &str,
    ) -> Result<D::Buffer> {
        self.upload_new(device, bytes, vk::BufferUsageFlags::VERTEX_BUFFER, name)
    }

    /// Upload indices into a new device-local index buffer.
    ///
    /// Returns the buffer with the matching index type.
    pub fn upload_index_buffer(
        &mut self,
        device: &D,
        indices: &IndexData,
        name: &str,
    ) -> Result<(D::Buffer, vk::IndexType)> {
        let index_type = match indices {
            IndexData::None => {
                return Err(RenderError::TransferFailure(
                    "index upload without indices".to_string(),
                ))
            }
            IndexData::U16(_) => vk::IndexType::UINT16,
            IndexData::U32(_) => vk::IndexType::UINT32,
        };
        let buffer = self.upload_new(
            device,
            indices.as_bytes(),
            vk::BufferUsageFlags::INDEX_BUFFER,
            name,
        )?;
        Ok((buffer, index_type))
    }

    /// Validate `mesh` and upload its vertices and indices.
    pub fn upload_mesh(
        &mut self,
        device: &D,
        mesh: &MeshData,
        name: &str,
    ) -> Result<GpuMesh<D::Buffer>> {
        mesh.validate()?;

        let vertex_buffer =
            self.upload_vertex_buffer(device, mesh.vertex_bytes(), &format!("{name}_vertices"))?;

        let index_buffer = if mesh.indices.is_empty() {
            None
        } else {
            match self.upload_index_buffer(device, &mesh.indices, &format!("{name}_indices")) {
                Ok(index) => Some(index),
                Err(e) => {
                    if let Err(cleanup) = device.destroy_buffer(vertex_buffer) {
                        tracing::warn!("Failed to free vertex buffer {name}: {cleanup}");
                    }
                    return Err(e);
                }
            }
        };

        tracing::debug!(
            name,
            vertices = mesh.vertex_count(),
            indices = mesh.index_count(),
            "Uploaded mesh"
        );

        Ok(GpuMesh {
            vertex_buffer,
            index_buffer,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        })
    }

    fn upload_new(
        &mut self,
        device: &D,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<D::Buffer> {
        self.ensure_not_stalled()?;
        if bytes.is_empty() {
            return Err(RenderError::TransferFailure(format!("{name}: empty upload")));
        }
        let buffer = device
            .create_buffer(
                bytes.len() as u64,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                MemoryLocation::GpuOnly,
                name,
            )
            .map_err(|e| RenderError::TransferFailure(format!("{name}: {e}")))?;

        if let Err(e) = self.upload_to(device, &buffer, bytes) {
            if self.stalled {
                tracing::error!("Leaking {name}: a copy into it may still be running");
            } else if let Err(cleanup) = device.destroy_buffer(buffer) {
                tracing::warn!("Failed to free {name}: {cleanup}");
            }
            return Err(e);
        }
        Ok(buffer)
    }

    /// Whether the transfer fence currently exists.
    pub fn fence_alive(&self) -> bool {
        self.fence.is_some()
    }

    /// Whether a copy could not be confirmed complete.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    pub fn fence(&self) -> Option<vk::Fence> {
        self.fence
    }

    /// Destroy the transfer fence. The device must be idle.
    pub fn destroy_fence(&mut self, device: &D) {
        self.stalled = false;
        if let Some(fence) = self.fence.take() {
            device.destroy_fence(fence);
        }
    }

    /// Create a fresh unsignaled transfer fence if none exists.
    pub fn create_fence(&mut self, device: &D) -> Result<()> {
        if self.fence.is_none() {
            self.fence = Some(device.create_fence(false)?);
        }
        Ok(())
    }

    /// Release the staging buffer and fence. The device must be idle.
    pub fn destroy(&mut self, device: &D) {
        self.destroy_fence(device);
        if let Some(staging) = self.staging.take() {
            if let Err(e) = device.destroy_buffer(staging) {
                tracing::warn!("Failed to free staging buffer: {e}");
            }
        }
    }
}

fn failure(stage: &'static str) -> impl FnOnce(GpuError) -> RenderError {
    move |e| RenderError::TransferFailure(format!("{stage}: {e}"))
}
