//! Renderer construction, configuration and teardown.

use ash::vk;
use wyvern_core::{FrameUniforms, MeshData};
use wyvern_render::{
    FrameOrchestrator, FrameState, MeshDraw, RenderError, RendererConfig, SlotPhase,
};
use wyvern_test::{
    test_pipeline_desc, FailOp, FenceState, MockDevice, MockPlatform, ObjectKind, TestRenderer,
};

fn startup_failure(op: FailOp) -> (MockDevice, RenderError) {
    let device = MockDevice::new();
    device.fail_next(op);
    let err = TestRenderer::with_parts(
        device.clone(),
        MockPlatform::new(800, 600),
        RendererConfig::default(),
    )
    .err()
    .unwrap();
    (device, err)
}

#[test]
fn startup_builds_every_object() {
    let t = TestRenderer::new(RendererConfig::default()).unwrap();
    let d = &t.device;

    assert_eq!(d.live_count(ObjectKind::Swapchain), 1);
    // Three swapchain views plus the depth view.
    assert_eq!(d.live_count(ObjectKind::ImageView), 4);
    assert_eq!(d.live_count(ObjectKind::Framebuffer), 3);
    assert_eq!(d.live_count(ObjectKind::DepthImage), 1);
    assert_eq!(d.live_count(ObjectKind::Semaphore), 4);
    assert_eq!(d.live_count(ObjectKind::Fence), 3);
    assert_eq!(d.live_count(ObjectKind::CommandBuffer), 2);
    // Two uniform buffers and the staging buffer.
    assert_eq!(d.live_count(ObjectKind::Buffer), 3);
    assert_eq!(d.live_count(ObjectKind::RenderPass), 1);
    assert_eq!(d.live_count(ObjectKind::Pipeline), 1);

    let frames = t.renderer.frames();
    assert_eq!(frames.len(), 2);
    for slot in 0..2 {
        let frame = frames.frame(slot).unwrap();
        assert_eq!(frame.phase(), SlotPhase::Idle);
        assert_eq!(
            d.fence_state(frame.in_flight()),
            Some(FenceState::Signaled)
        );
        assert_eq!(d.semaphore_signaled(frame.image_available()), Some(false));
    }
    let transfer_fence = t.renderer.transfer().fence().unwrap();
    assert_eq!(d.fence_state(transfer_fence), Some(FenceState::Unsignaled));

    assert_eq!(t.renderer.state(), FrameState::Idle);
    assert_eq!(t.renderer.frame_counter(), 0);
    assert_eq!(
        t.renderer.extent(),
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    let swapchain = t.renderer.swapchain().unwrap();
    assert_eq!(swapchain.surface_format().format, vk::Format::B8G8R8A8_SRGB);
    assert_eq!(swapchain.present_mode(), vk::PresentModeKHR::MAILBOX);
    assert!(d.violations().is_empty());
}

#[test]
fn vsync_selects_fifo() {
    let t = TestRenderer::new(RendererConfig::default().with_vsync(true)).unwrap();
    assert_eq!(
        t.renderer.swapchain().unwrap().present_mode(),
        vk::PresentModeKHR::FIFO
    );
}

#[test]
fn image_count_respects_surface_limits() {
    let device = MockDevice::new();
    device.set_image_count_limits(2, 2);
    let t = TestRenderer::with_parts(
        device,
        MockPlatform::new(800, 600),
        RendererConfig::default(),
    )
    .unwrap();
    assert_eq!(t.renderer.swapchain().unwrap().image_count(), 2);
}

#[test]
fn frames_in_flight_are_configurable() {
    let t = TestRenderer::new(RendererConfig::default().with_frames_in_flight(3)).unwrap();
    assert_eq!(t.renderer.frames().len(), 3);
    assert_eq!(t.device.live_count(ObjectKind::Fence), 4);
}

#[test]
fn invalid_config_is_rejected_before_touching_the_device() {
    for config in [
        RendererConfig::default().with_frames_in_flight(0),
        RendererConfig::default().with_frames_in_flight(9),
    ] {
        let device = MockDevice::new();
        let err = TestRenderer::with_parts(device.clone(), MockPlatform::new(800, 600), config)
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(device.calls().is_empty());
        assert_eq!(device.live_objects(), 0);
    }
}

#[test]
fn pipeline_failure_is_fatal_and_clean() {
    let (device, err) = startup_failure(FailOp::CreateGraphicsPipeline);
    assert!(matches!(err, RenderError::StartupFatal { stage: "pipeline", .. }));
    assert!(err.is_fatal());
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn swapchain_failure_is_fatal_and_clean() {
    let (device, err) = startup_failure(FailOp::CreateSwapchain);
    assert!(matches!(err, RenderError::StartupFatal { stage: "swapchain", .. }));
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn frame_pool_failure_is_fatal_and_clean() {
    let (device, err) = startup_failure(FailOp::CreateBuffer);
    assert!(matches!(err, RenderError::StartupFatal { stage: "frame pool", .. }));
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn sync_object_failure_is_fatal_and_clean() {
    let (device, err) = startup_failure(FailOp::CreateFence);
    assert!(matches!(err, RenderError::StartupFatal { stage: "frame pool", .. }));
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn missing_shader_code_fails_pipeline_stage() {
    let device = MockDevice::new();
    let mut desc = test_pipeline_desc();
    desc.fragment_shader.clear();
    let err = FrameOrchestrator::new(
        device.clone(),
        MockPlatform::new(800, 600),
        &desc,
        RendererConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RenderError::StartupFatal { stage: "pipeline", .. }));
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn startup_waits_out_a_minimized_window() {
    let platform = MockPlatform::new(800, 600);
    platform.script_extents([(0, 0), (0, 0)]);
    let t = TestRenderer::with_parts(MockDevice::new(), platform, RendererConfig::default())
        .unwrap();
    assert_eq!(t.platform.wait_events_count(), 2);
    assert_eq!(t.renderer.extent().width, 800);
}

#[test]
fn drop_releases_everything() {
    let device = MockDevice::new();
    {
        let mut t = TestRenderer::with_parts(
            device.clone(),
            MockPlatform::new(800, 600),
            RendererConfig::default(),
        )
        .unwrap();
        let cube = t.renderer.upload_mesh(&MeshData::cube(), "cube").unwrap();
        t.renderer
            .render(&[MeshDraw::new(&cube)], &FrameUniforms::default())
            .unwrap();
        t.renderer.destroy_mesh(cube).unwrap();
    }
    assert_eq!(device.live_objects(), 0);
    assert!(device.violations().is_empty(), "{:?}", device.violations());
}

#[test]
fn calls_after_shutdown_are_rejected() {
    let mut t = TestRenderer::new(RendererConfig::default()).unwrap();
    t.renderer.shutdown().unwrap();
    assert!(matches!(
        t.renderer.acquire_next_image(),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        t.renderer.upload_mesh(&MeshData::quad(), "late"),
        Err(RenderError::SyncViolation(_))
    ));
}
