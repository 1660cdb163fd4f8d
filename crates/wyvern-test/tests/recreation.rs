//! Swapchain recreation on resize, staleness and minimization.

use ash::vk;
use wyvern_core::{FrameUniforms, MeshData};
use wyvern_gpu::GpuError;
use wyvern_render::{
    AcquireResult, FrameOutcome, FrameState, MeshDraw, PresentOutcome, RenderError,
    RendererConfig, SubmitStatus,
};
use wyvern_test::{
    Call, Command, FenceState, ObjectKind, ScriptedAcquire, ScriptedPresent, TestRenderer,
};

fn renderer() -> TestRenderer {
    TestRenderer::new(RendererConfig::default()).unwrap()
}

fn is_destroy(call: &Call) -> bool {
    matches!(
        call,
        Call::DestroyFence(_)
            | Call::DestroySemaphore(_)
            | Call::DestroySwapchain(_)
            | Call::DestroyImageView(_)
            | Call::DestroyDepthImage
            | Call::DestroyFramebuffer(_)
    )
}

fn is_create(call: &Call) -> bool {
    matches!(
        call,
        Call::CreateFence { .. }
            | Call::CreateSemaphore(_)
            | Call::CreateSwapchain { .. }
            | Call::CreateImageView(_)
            | Call::CreateDepthImage { .. }
            | Call::CreateFramebuffer(_)
    )
}

#[test]
fn resize_between_record_and_submit_discards_frame() {
    let mut t = renderer();
    let quad = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    t.renderer
        .render(&[MeshDraw::new(&quad)], &FrameUniforms::default())
        .unwrap();
    let submissions_before = t.device.submissions().len();

    assert!(matches!(
        t.renderer.acquire_next_image().unwrap(),
        AcquireResult::Image(_)
    ));
    t.renderer.begin_frame().unwrap();
    t.renderer.draw_meshes(&[MeshDraw::new(&quad)]).unwrap();
    t.renderer.end_frame().unwrap();

    t.platform.flag_resize();
    assert_eq!(t.renderer.submit().unwrap(), SubmitStatus::Aborted);

    assert_eq!(t.device.submissions().len(), submissions_before);
    assert_eq!(t.renderer.state(), FrameState::Idle);
    assert_eq!(t.renderer.active_frame(), None);
    assert_eq!(t.renderer.stats().recreations, 1);
    assert_eq!(t.renderer.stats().frames_skipped, 1);
    assert!(!t.platform.resize_pending());

    // The rebuilt slot fences start signaled, so the next frame cannot deadlock.
    let outcome = t
        .renderer
        .render(&[MeshDraw::new(&quad)], &FrameUniforms::default())
        .unwrap();
    assert_eq!(outcome, FrameOutcome::Presented);
    assert!(t.device.violations().is_empty(), "{:?}", t.device.violations());
}

#[test]
fn stale_acquire_keeps_fence_signaled() {
    let mut t = renderer();
    let slot = t.renderer.current_slot();
    let fence = t.renderer.frames().frame(slot).unwrap().in_flight();
    t.device.clear_calls();
    t.device.script_acquire(ScriptedAcquire::OutOfDate);

    assert_eq!(
        t.renderer.acquire_next_image().unwrap(),
        AcquireResult::NeedsRecreate
    );
    assert!(!t.device.calls().contains(&Call::ResetFence(fence)));
    assert_eq!(t.renderer.stats().recreations, 1);
    assert_eq!(t.renderer.frame_counter(), 0);

    // Fresh fences are signaled and the frame goes through.
    for slot in 0..2 {
        let fence = t.renderer.frames().frame(slot).unwrap().in_flight();
        assert_eq!(t.device.fence_state(fence), Some(FenceState::Signaled));
    }
    assert_eq!(
        t.renderer.render(&[], &FrameUniforms::default()).unwrap(),
        FrameOutcome::Presented
    );
    assert!(t.device.violations().is_empty());
}

#[test]
fn suboptimal_acquire_recreates() {
    let mut t = renderer();
    t.device.script_acquire(ScriptedAcquire::Suboptimal);

    assert_eq!(
        t.renderer.render(&[], &FrameUniforms::default()).unwrap(),
        FrameOutcome::Skipped
    );
    assert_eq!(t.renderer.stats().recreations, 1);
    assert_eq!(t.renderer.stats().frames_skipped, 1);
    assert!(t.device.violations().is_empty());
}

#[test]
fn resize_flag_recreates_before_acquiring() {
    let mut t = renderer();
    t.platform.resize(1024, 768);
    t.device.clear_calls();

    assert_eq!(
        t.renderer.acquire_next_image().unwrap(),
        AcquireResult::NeedsRecreate
    );
    assert!(!t
        .device
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Acquire { .. })));
    assert_eq!(
        t.renderer.extent(),
        vk::Extent2D {
            width: 1024,
            height: 768
        }
    );

    t.renderer.render(&[], &FrameUniforms::default()).unwrap();
    let commands = t.device.submissions().pop().unwrap().commands;
    assert!(commands.contains(&Command::SetViewport {
        width: 1024.0,
        height: 768.0
    }));
    assert!(commands.contains(&Command::SetScissor {
        extent: (1024, 768)
    }));
}

#[test]
fn stale_present_still_advances_counter() {
    let mut t = renderer();
    t.device.script_present(ScriptedPresent::OutOfDate);

    t.renderer.acquire_next_image().unwrap();
    t.renderer.begin_frame().unwrap();
    t.renderer.end_frame().unwrap();
    t.renderer.submit().unwrap();
    assert_eq!(t.renderer.present().unwrap(), PresentOutcome::Recreated);

    assert_eq!(t.renderer.frame_counter(), 1);
    assert_eq!(t.renderer.stats().frames_presented, 0);
    assert_eq!(t.renderer.stats().frames_skipped, 1);
    assert_eq!(t.renderer.stats().recreations, 1);
    assert_eq!(t.renderer.state(), FrameState::Idle);

    for _ in 0..3 {
        assert_eq!(
            t.renderer.render(&[], &FrameUniforms::default()).unwrap(),
            FrameOutcome::Presented
        );
    }
    assert!(t.device.violations().is_empty(), "{:?}", t.device.violations());
}

#[test]
fn suboptimal_present_counts_as_presented() {
    let mut t = renderer();
    t.device.script_present(ScriptedPresent::Suboptimal);

    assert_eq!(
        t.renderer.render(&[], &FrameUniforms::default()).unwrap(),
        FrameOutcome::Presented
    );
    assert_eq!(t.renderer.stats().recreations, 1);
}

#[test]
fn resize_after_present_recreates() {
    let mut t = renderer();
    t.renderer.acquire_next_image().unwrap();
    t.renderer.begin_frame().unwrap();
    t.renderer.end_frame().unwrap();
    t.renderer.submit().unwrap();
    t.platform.resize(640, 480);

    assert_eq!(t.renderer.present().unwrap(), PresentOutcome::Recreated);
    assert_eq!(t.renderer.stats().frames_presented, 1);
    assert_eq!(
        t.renderer.extent(),
        vk::Extent2D {
            width: 640,
            height: 480
        }
    );
}

#[test]
fn recreation_destroys_everything_before_creating() {
    let mut t = renderer();
    t.renderer.render(&[], &FrameUniforms::default()).unwrap();
    t.device.clear_calls();

    t.renderer.recreate_swapchain().unwrap();

    let calls = t.device.calls();
    assert_eq!(calls[0], Call::WaitIdle);
    let last_destroy = calls.iter().rposition(is_destroy).unwrap();
    let first_create = calls.iter().position(is_create).unwrap();
    assert!(last_destroy < first_create);

    // Two slots of fences and semaphores plus the transfer fence.
    let fences_destroyed = calls
        .iter()
        .filter(|c| matches!(c, Call::DestroyFence(_)))
        .count();
    let semaphores_destroyed = calls
        .iter()
        .filter(|c| matches!(c, Call::DestroySemaphore(_)))
        .count();
    assert_eq!(fences_destroyed, 3);
    assert_eq!(semaphores_destroyed, 4);
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, Call::CreateFence { signaled: true, .. }))
            .count(),
        2
    );
    assert!(calls.contains(&Call::CreateFence {
        fence: t.renderer.transfer().fence().unwrap(),
        signaled: false
    }));
    assert!(t.device.violations().is_empty());
}

#[test]
fn recreation_keeps_object_counts_stable() {
    let mut t = renderer();
    let before: Vec<usize> = [
        ObjectKind::Fence,
        ObjectKind::Semaphore,
        ObjectKind::Swapchain,
        ObjectKind::ImageView,
        ObjectKind::Framebuffer,
        ObjectKind::DepthImage,
        ObjectKind::CommandBuffer,
        ObjectKind::Buffer,
    ]
    .iter()
    .map(|&kind| t.device.live_count(kind))
    .collect();

    for _ in 0..3 {
        t.renderer.render(&[], &FrameUniforms::default()).unwrap();
        t.platform.flag_resize();
        t.renderer.render(&[], &FrameUniforms::default()).unwrap();
    }

    let after: Vec<usize> = [
        ObjectKind::Fence,
        ObjectKind::Semaphore,
        ObjectKind::Swapchain,
        ObjectKind::ImageView,
        ObjectKind::Framebuffer,
        ObjectKind::DepthImage,
        ObjectKind::CommandBuffer,
        ObjectKind::Buffer,
    ]
    .iter()
    .map(|&kind| t.device.live_count(kind))
    .collect();
    assert_eq!(before, after);
    assert_eq!(t.renderer.stats().recreations, 3);
}

#[test]
fn recreation_is_refused_mid_frame() {
    let mut t = renderer();
    t.renderer.acquire_next_image().unwrap();
    assert!(matches!(
        t.renderer.recreate_swapchain(),
        Err(RenderError::SyncViolation(_))
    ));
}

#[test]
fn minimized_window_waits_for_nonzero_extent() {
    let mut t = renderer();
    t.platform.script_extents([(0, 0), (0, 0), (0, 0)]);
    t.platform.flag_resize();
    t.device.clear_calls();

    assert_eq!(
        t.renderer.acquire_next_image().unwrap(),
        AcquireResult::NeedsRecreate
    );

    assert_eq!(t.platform.wait_events_count(), 3);
    let creates: Vec<Call> = t
        .device
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CreateSwapchain { .. }))
        .collect();
    assert_eq!(
        creates,
        vec![Call::CreateSwapchain {
            width: 800,
            height: 600
        }]
    );
    assert!(t.device.violations().is_empty());
}

#[test]
fn lost_surface_format_fails_recreation() {
    let mut t = renderer();
    t.device.set_surface_formats(vec![vk::SurfaceFormatKHR {
        format: vk::Format::R8G8B8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    }]);
    t.platform.flag_resize();

    let err = t.renderer.acquire_next_image().unwrap_err();
    assert!(matches!(
        err,
        RenderError::Gpu(GpuError::SwapchainCreation(_))
    ));

    // Partial state still tears down cleanly.
    t.renderer.shutdown().unwrap();
    assert_eq!(t.device.live_objects(), 0);
}
