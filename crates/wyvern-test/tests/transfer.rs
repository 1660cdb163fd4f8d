//! Staged uploads into device-local buffers.

use wyvern_core::{IndexData, MeshData, Vertex};
use wyvern_gpu::{DeviceBuffer, RenderDevice};
use wyvern_render::{RenderError, RendererConfig, TransferChannel};
use wyvern_test::{Call, Command, FailOp, FenceState, MockDevice, ObjectKind, TestRenderer};

fn renderer() -> TestRenderer {
    TestRenderer::new(RendererConfig::default()).unwrap()
}

#[test]
fn uploaded_bytes_reach_device_local_buffer() {
    let mut t = renderer();
    let quad = MeshData::quad();
    let mesh = t.renderer.upload_mesh(&quad, "quad").unwrap();

    let vertices = t
        .device
        .buffer_contents(mesh.vertex_buffer.handle())
        .unwrap();
    assert_eq!(vertices, quad.vertex_bytes());
    assert!(!mesh.vertex_buffer.is_host_visible());

    let (index_buffer, index_type) = mesh.index_buffer.as_ref().unwrap();
    assert_eq!(*index_type, ash::vk::IndexType::UINT16);
    assert_eq!(
        t.device.buffer_contents(index_buffer.handle()).unwrap(),
        quad.indices.as_bytes()
    );
    assert_eq!(
        t.device.buffer_name(mesh.vertex_buffer.handle()).as_deref(),
        Some("quad_vertices")
    );
    assert_eq!(
        t.device.buffer_name(index_buffer.handle()).as_deref(),
        Some("quad_indices")
    );

    t.renderer.destroy_mesh(mesh).unwrap();
}

#[test]
fn upload_blocks_until_copy_completes() {
    let mut t = renderer();
    t.device.clear_calls();
    let buffer = t
        .renderer
        .upload_vertex_buffer(MeshData::cube().vertex_bytes(), "cube")
        .unwrap();

    let fence = t.renderer.transfer().fence().unwrap();
    let calls = t.device.calls();
    let submit = calls
        .iter()
        .position(|c| *c == Call::Submit { fence })
        .unwrap();
    let wait = calls
        .iter()
        .position(|c| {
            *c == Call::WaitFence {
                fence,
                blocked: true,
            }
        })
        .unwrap();
    let reset = calls
        .iter()
        .position(|c| *c == Call::ResetFence(fence))
        .unwrap();
    assert!(submit < wait && wait < reset);

    // The fence is ready for the next upload and the one-shot command buffer is gone.
    assert_eq!(t.device.fence_state(fence), Some(FenceState::Unsignaled));
    assert_eq!(t.device.pending_fences(), 0);
    let copies: Vec<Command> = t
        .device
        .submissions()
        .into_iter()
        .flat_map(|s| s.commands)
        .filter(|c| matches!(c, Command::CopyBuffer { .. }))
        .collect();
    assert_eq!(copies.len(), 1);
    assert!(matches!(
        copies[0],
        Command::CopyBuffer { dst, size, .. }
            if dst == buffer.handle() && size == buffer.size()
    ));

    t.device.destroy_buffer(buffer).unwrap();
}

#[test]
fn staging_grows_for_large_uploads() {
    let mut t = renderer();
    assert_eq!(t.renderer.transfer().staging_capacity(), 64 * 1024);

    let bytes = vec![7u8; 100 * 1024];
    let buffer = t.renderer.upload_vertex_buffer(&bytes, "big").unwrap();
    assert_eq!(t.renderer.transfer().staging_capacity(), 100 * 1024);
    assert_eq!(t.device.buffer_contents(buffer.handle()).unwrap(), bytes);

    // Smaller requests keep the larger buffer.
    t.renderer.allocate_staging(1024).unwrap();
    assert_eq!(t.renderer.transfer().staging_capacity(), 100 * 1024);

    t.device.destroy_buffer(buffer).unwrap();
}

#[test]
fn failed_submit_frees_destination_and_recovers() {
    let mut t = renderer();
    let buffers_before = t.device.live_count(ObjectKind::Buffer);
    let command_buffers_before = t.device.live_count(ObjectKind::CommandBuffer);

    t.device.fail_next(FailOp::Submit);
    let err = t
        .renderer
        .upload_mesh(&MeshData::quad(), "quad")
        .unwrap_err();
    assert!(matches!(err, RenderError::TransferFailure(_)));
    assert!(!err.is_fatal());
    assert_eq!(t.device.live_count(ObjectKind::Buffer), buffers_before);
    assert_eq!(
        t.device.live_count(ObjectKind::CommandBuffer),
        command_buffers_before
    );

    let mesh = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    t.renderer.destroy_mesh(mesh).unwrap();
    assert_eq!(t.device.live_count(ObjectKind::Buffer), buffers_before);
}

#[test]
fn empty_uploads_are_rejected() {
    let mut t = renderer();
    assert!(matches!(
        t.renderer.upload_vertex_buffer(&[], "empty"),
        Err(RenderError::TransferFailure(_))
    ));
    assert!(matches!(
        t.renderer.upload_index_buffer(&IndexData::None, "none"),
        Err(RenderError::TransferFailure(_))
    ));
    assert!(matches!(
        t.renderer
            .upload_mesh(&MeshData::new(Vec::new(), IndexData::None), "empty"),
        Err(RenderError::InvalidMesh(_))
    ));
}

#[test]
fn out_of_range_indices_are_rejected_before_upload() {
    let mut t = renderer();
    let buffers_before = t.device.live_count(ObjectKind::Buffer);
    let mesh = MeshData::new(
        vec![Vertex::new([0.0; 3], [1.0; 3]); 3],
        IndexData::U32(vec![0, 1, 3]),
    );

    assert!(matches!(
        t.renderer.upload_mesh(&mesh, "broken"),
        Err(RenderError::InvalidMesh(_))
    ));
    assert_eq!(t.device.live_count(ObjectKind::Buffer), buffers_before);
}

#[test]
fn u32_indices_bind_as_uint32() {
    let mut t = renderer();
    let (buffer, index_type) = t
        .renderer
        .upload_index_buffer(&IndexData::U32(vec![0, 1, 2]), "tri")
        .unwrap();
    assert_eq!(index_type, ash::vk::IndexType::UINT32);
    assert_eq!(buffer.size(), 12);
    t.device.destroy_buffer(buffer).unwrap();
}

#[test]
fn channel_without_fence_refuses_uploads() {
    let device = MockDevice::new();
    let mut channel = TransferChannel::<MockDevice>::new(u64::MAX);
    assert!(matches!(
        channel.upload_vertex_buffer(&device, &[1, 2, 3, 4], "orphan"),
        Err(RenderError::SyncViolation(_))
    ));
    // The destination created for the failed upload was released.
    assert_eq!(device.live_count(ObjectKind::Buffer), 0);

    channel.create_fence(&device).unwrap();
    let buffer = channel
        .upload_vertex_buffer(&device, &[1, 2, 3, 4], "ok")
        .unwrap();
    assert_eq!(channel.staging_capacity(), 4);
    device.destroy_buffer(buffer).unwrap();
    channel.destroy(&device);
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn expired_transfer_wait_drains_before_releasing() {
    let mut t =
        TestRenderer::new(RendererConfig::default().with_fence_timeout_ms(Some(1))).unwrap();
    let buffers_before = t.device.live_count(ObjectKind::Buffer);
    let command_buffers_before = t.device.live_count(ObjectKind::CommandBuffer);
    let fence = t.renderer.transfer().fence().unwrap();
    t.device.clear_calls();

    t.device.expire_waits(1);
    let err = t
        .renderer
        .upload_mesh(&MeshData::quad(), "quad")
        .unwrap_err();
    assert!(matches!(err, RenderError::TransferFailure(_)));
    assert!(!err.is_fatal());

    // The copy retired before its command buffer and destination were released.
    let calls = t.device.calls();
    let expired = calls
        .iter()
        .position(|c| *c == Call::WaitExpired(fence))
        .unwrap();
    let drained = calls
        .iter()
        .position(|c| {
            *c == Call::WaitFence {
                fence,
                blocked: true,
            }
        })
        .unwrap();
    assert!(expired < drained);
    assert!(t.device.violations().is_empty());
    assert_eq!(t.device.fence_state(fence), Some(FenceState::Unsignaled));
    assert_eq!(t.device.live_count(ObjectKind::Buffer), buffers_before);
    assert_eq!(
        t.device.live_count(ObjectKind::CommandBuffer),
        command_buffers_before
    );
    assert!(!t.renderer.transfer().is_stalled());

    // The channel keeps working.
    let cube = MeshData::cube();
    let mesh = t.renderer.upload_mesh(&cube, "cube").unwrap();
    assert_eq!(
        t.device.buffer_contents(mesh.vertex_buffer.handle()).unwrap(),
        cube.vertex_bytes()
    );
    assert!(t.device.violations().is_empty());
    t.renderer.destroy_mesh(mesh).unwrap();
}

#[test]
fn unconfirmed_copy_stalls_channel_without_freeing() {
    let mut t = renderer();
    t.device.fail_next(FailOp::WaitFence);

    let err = t
        .renderer
        .upload_vertex_buffer(MeshData::cube().vertex_bytes(), "cube")
        .unwrap_err();
    assert!(err.is_fatal());
    assert!(t.renderer.transfer().is_stalled());
    // Nothing the copy still uses was freed or reset.
    assert!(t.device.violations().is_empty());
    assert_eq!(t.device.pending_fences(), 1);

    let submits_before = t.device.submissions().len();
    let err = t
        .renderer
        .upload_vertex_buffer(MeshData::quad().vertex_bytes(), "quad")
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(t.device.submissions().len(), submits_before);

    t.renderer.shutdown().unwrap();
    assert!(t.device.violations().is_empty());
}

#[test]
fn uploads_land_in_device_local_memory() {
    let mut t = renderer();
    let mesh = t.renderer.upload_mesh(&MeshData::cube(), "cube").unwrap();
    let (index_buffer, _) = mesh.index_buffer.as_ref().unwrap();
    assert_eq!(
        t.device.buffer_host_visible(mesh.vertex_buffer.handle()),
        Some(false)
    );
    assert_eq!(t.device.buffer_host_visible(index_buffer.handle()), Some(false));
    t.renderer.destroy_mesh(mesh).unwrap();
}

#[test]
fn cleanup_failure_keeps_original_error() {
    let mut t = renderer();
    t.device.fail_next(FailOp::Submit);
    t.device.fail_next(FailOp::DestroyBuffer);

    let err = t
        .renderer
        .upload_vertex_buffer(MeshData::quad().vertex_bytes(), "quad")
        .unwrap_err();
    match err {
        RenderError::TransferFailure(message) => assert!(message.starts_with("submit")),
        other => panic!("expected the submit failure, got {other:?}"),
    }

    let mesh = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    t.renderer.destroy_mesh(mesh).unwrap();
}
