//! Fence, semaphore and ordering guarantees of the frame cycle.

use glam::{Mat4, Vec3};
use wyvern_core::{FrameUniforms, MeshData};
use wyvern_gpu::{DeviceBuffer, RenderDevice};
use wyvern_render::{
    AcquireResult, FrameOutcome, FramePool, FrameState, MeshDraw, PresentOutcome, RenderError,
    RendererConfig, SlotPhase, SubmitStatus, UniformBinding,
};
use wyvern_test::{
    Call, Command, FenceState, MockDevice, RecordingOverlay, ScriptedAcquire, TestRenderer,
};

fn renderer(frames_in_flight: usize) -> TestRenderer {
    TestRenderer::new(RendererConfig::default().with_frames_in_flight(frames_in_flight)).unwrap()
}

#[test]
fn fence_is_waited_before_command_buffer_reset() {
    let mut t = renderer(2);
    let quad = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    t.device.clear_calls();

    for _ in 0..6 {
        let outcome = t
            .renderer
            .render(&[MeshDraw::new(&quad)], &FrameUniforms::default())
            .unwrap();
        assert_eq!(outcome, FrameOutcome::Presented);
    }

    let calls = t.device.calls();
    for slot in 0..2 {
        let frame = t.renderer.frames().frame(slot).unwrap();
        let (cmd, fence) = (frame.command_buffer(), frame.in_flight());

        for (i, call) in calls.iter().enumerate() {
            if *call != Call::ResetCommandBuffer(cmd) {
                continue;
            }
            // The last fence event before the reset must be a wait, not a submit.
            let last_fence_event = calls[..i].iter().rev().find(|c| {
                matches!(c, Call::WaitFence { fence: f, .. } if *f == fence)
                    || matches!(c, Call::Submit { fence: f } if *f == fence)
            });
            assert!(
                matches!(last_fence_event, Some(Call::WaitFence { .. })),
                "slot {slot} command buffer reset without a preceding fence wait"
            );
        }
    }
    assert!(t.device.violations().is_empty(), "{:?}", t.device.violations());
}

#[test]
fn at_most_k_frames_in_flight() {
    for k in 1..=3 {
        let mut t = renderer(k);
        for _ in 0..(3 * k + 1) {
            t.renderer
                .render(&[], &FrameUniforms::default())
                .unwrap();
        }
        assert_eq!(t.device.max_pending_fences(), k);
        assert!(t.device.violations().is_empty());
    }
}

#[test]
fn reused_slot_blocks_on_its_previous_submission() {
    let mut t = renderer(2);
    for _ in 0..2 {
        t.renderer.render(&[], &FrameUniforms::default()).unwrap();
    }
    let slot0_fence = t.renderer.frames().frame(0).unwrap().in_flight();
    assert_eq!(t.device.fence_state(slot0_fence), Some(FenceState::Pending));
    t.device.clear_calls();

    // Third frame reuses slot 0 and has to wait for frame one to complete.
    assert!(matches!(
        t.renderer.acquire_next_image().unwrap(),
        AcquireResult::Image(_)
    ));
    assert_eq!(
        t.device.calls()[0],
        Call::WaitFence {
            fence: slot0_fence,
            blocked: true
        }
    );
}

#[test]
fn one_presentation_per_acquire() {
    let mut t = renderer(2);
    for _ in 0..5 {
        t.renderer.render(&[], &FrameUniforms::default()).unwrap();
    }

    let calls = t.device.calls();
    let acquires = calls
        .iter()
        .filter(|c| matches!(c, Call::Acquire { .. }))
        .count();
    let presents = t.device.presents();
    assert_eq!(acquires, 5);
    assert_eq!(presents.len(), 5);
    assert_eq!(t.renderer.stats().frames_presented, 5);
    assert_eq!(t.renderer.frame_counter(), 5);

    // Each present waits on the render-finished semaphore of its submission.
    let submissions = t.device.submissions();
    for (submit, present) in submissions.iter().zip(&presents) {
        assert_eq!(submit.signal_semaphores, vec![present.wait_semaphore]);
    }
}

#[test]
fn submission_waits_at_color_output_and_signals_slot_fence() {
    let mut t = renderer(2);
    t.renderer.render(&[], &FrameUniforms::default()).unwrap();

    let frame = t.renderer.frames().frame(0).unwrap();
    let submission = t.device.submissions().pop().unwrap();
    assert_eq!(submission.command_buffers, vec![frame.command_buffer()]);
    assert_eq!(submission.wait_semaphores, vec![frame.image_available()]);
    assert_eq!(
        submission.wait_stages,
        vec![ash::vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT]
    );
    assert_eq!(submission.signal_semaphores, vec![frame.render_finished()]);
    assert_eq!(submission.fence, frame.in_flight());
}

#[test]
fn recording_follows_render_pass_order() {
    let mut t = renderer(2);
    let quad = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    t.renderer
        .render(&[MeshDraw::new(&quad)], &FrameUniforms::default())
        .unwrap();

    let commands = t.device.submissions().pop().unwrap().commands;
    let pipeline = t.renderer.pipeline();
    let set = t.renderer.frames().frame(0).unwrap().descriptor_set();

    assert!(matches!(
        commands[0],
        Command::BeginRenderPass {
            extent: (800, 600),
            ..
        }
    ));
    assert_eq!(
        commands[1],
        Command::SetViewport {
            width: 800.0,
            height: 600.0
        }
    );
    assert_eq!(commands[2], Command::SetScissor { extent: (800, 600) });
    assert_eq!(commands[3], Command::BindPipeline(pipeline.pipeline));
    assert_eq!(
        commands[4],
        Command::BindVertexBuffer(quad.vertex_buffer.handle())
    );
    assert!(matches!(commands[5], Command::BindIndexBuffer(..)));
    assert_eq!(
        commands[6],
        Command::BindDescriptorSet {
            layout: pipeline.layout,
            set
        }
    );
    assert_eq!(commands.last(), Some(&Command::EndRenderPass));
}

#[test]
fn indexed_quad_submits_six_indices_once() {
    let mut t = renderer(2);
    let quad = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    assert_eq!(quad.vertex_count, 4);
    assert_eq!(quad.index_count, 6);

    t.renderer
        .render(&[MeshDraw::new(&quad)], &FrameUniforms::default())
        .unwrap();

    assert_eq!(
        t.device.submitted_draws(),
        vec![Command::DrawIndexed {
            index_count: 6,
            instance_count: 1
        }]
    );
}

#[test]
fn non_indexed_mesh_uses_plain_draw() {
    let mut t = renderer(2);
    let mut triangle = MeshData::quad();
    triangle.vertices.truncate(3);
    triangle.indices = wyvern_core::IndexData::None;
    let mesh = t.renderer.upload_mesh(&triangle, "triangle").unwrap();
    assert!(!mesh.is_indexed());

    t.renderer
        .render(
            &[MeshDraw {
                mesh: &mesh,
                instance_count: 4,
            }],
            &FrameUniforms::default(),
        )
        .unwrap();

    assert_eq!(
        t.device.submitted_draws(),
        vec![Command::Draw {
            vertex_count: 3,
            instance_count: 4
        }]
    );
}

#[test]
fn uniform_payload_lands_in_active_slot() {
    let mut t = renderer(2);
    let uniforms = FrameUniforms::look_at(
        Mat4::from_rotation_y(0.5),
        Vec3::new(2.0, 2.0, 2.0),
        Vec3::ZERO,
        60f32.to_radians(),
        800.0 / 600.0,
        0.1,
        100.0,
    );
    assert_eq!(uniforms.as_bytes().len(), 192);

    let AcquireResult::Image(_) = t.renderer.acquire_next_image().unwrap() else {
        panic!("expected an image");
    };
    t.renderer.begin_frame().unwrap();
    t.renderer.update_frame_uniforms(&uniforms).unwrap();

    let slot = t.renderer.active_frame().unwrap().slot;
    let buffer = t.renderer.frames().frame(slot).unwrap().uniform_buffer();
    assert_eq!(buffer.read_bytes(0, 192).unwrap(), uniforms.as_bytes());
    assert_eq!(
        t.device.buffer_contents(buffer.handle()).unwrap(),
        uniforms.as_bytes()
    );
}

#[test]
fn descriptor_sets_point_at_their_uniform_buffers() {
    let t = renderer(3);
    for slot in 0..3 {
        let frame = t.renderer.frames().frame(slot).unwrap();
        assert_eq!(
            t.device.descriptor_binding(frame.descriptor_set()),
            Some((0, frame.uniform_buffer().handle(), 192))
        );
    }
}

#[test]
fn oversized_uniform_payload_is_rejected() {
    let mut t = renderer(2);
    t.renderer.acquire_next_image().unwrap();
    let err = t.renderer.update_uniforms(&[0u8; 193]).unwrap_err();
    assert!(matches!(err, RenderError::SyncViolation(_)));
}

#[test]
fn out_of_order_frame_calls_are_rejected() {
    let mut t = renderer(2);

    assert!(matches!(
        t.renderer.begin_frame(),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        t.renderer.submit(),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        t.renderer.present(),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        t.renderer.draw(3, 1),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        t.renderer.update_uniforms(&[0; 16]),
        Err(RenderError::SyncViolation(_))
    ));

    t.renderer.acquire_next_image().unwrap();
    assert!(matches!(
        t.renderer.acquire_next_image(),
        Err(RenderError::SyncViolation(_))
    ));
    t.renderer.begin_frame().unwrap();
    // Submitting before end_frame would hand the GPU a recording command buffer.
    assert!(matches!(
        t.renderer.submit(),
        Err(RenderError::SyncViolation(_))
    ));
    t.renderer.end_frame().unwrap();
    assert_eq!(t.renderer.submit().unwrap(), SubmitStatus::Submitted);
    assert_eq!(t.renderer.present().unwrap(), PresentOutcome::Presented);
    assert_eq!(t.renderer.state(), FrameState::Idle);
    assert!(t.device.violations().is_empty());
}

#[test]
fn uploads_are_refused_mid_frame() {
    let mut t = renderer(2);
    t.renderer.acquire_next_image().unwrap();
    assert!(matches!(
        t.renderer.upload_mesh(&MeshData::quad(), "quad"),
        Err(RenderError::SyncViolation(_))
    ));
}

#[test]
fn overlay_records_before_render_pass_ends() {
    let mut t = renderer(2);
    let overlay = RecordingOverlay::new();
    t.renderer.set_overlay(Box::new(overlay.clone()));

    t.renderer.render(&[], &FrameUniforms::default()).unwrap();

    let commands = t.device.submissions().pop().unwrap().commands;
    let n = commands.len();
    assert_eq!(
        commands[n - 2],
        Command::Draw {
            vertex_count: 3,
            instance_count: 1
        }
    );
    assert_eq!(commands[n - 1], Command::EndRenderPass);
    assert_eq!(overlay.recorded(), vec![(800, 600)]);
}

#[test]
fn lost_surface_is_fatal() {
    let mut t = renderer(2);
    t.device.script_acquire(ScriptedAcquire::SurfaceLost);

    let err = t.renderer.acquire_next_image().unwrap_err();
    assert!(matches!(err, RenderError::SurfaceLost));
    assert!(err.is_fatal());
    assert_eq!(t.renderer.state(), FrameState::Idle);
    assert_eq!(t.renderer.frames().frame(0).unwrap().phase(), SlotPhase::Idle);
}

#[test]
fn slot_phases_enforce_wait_then_confirm() {
    let device = MockDevice::new();
    let binding = UniformBinding::new(&device, 2).unwrap();
    let mut pool = FramePool::new(&device, 2, &binding, u64::MAX).unwrap();
    device.clear_calls();

    // Confirming before waiting is refused without touching the device.
    assert!(matches!(
        pool.confirm_frame(&device, 0),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(matches!(
        pool.write_uniforms(0, &[0; 4]),
        Err(RenderError::SyncViolation(_))
    ));
    assert!(device.calls().is_empty());

    pool.wait_frame(&device, 0).unwrap();
    assert_eq!(pool.frame(0).unwrap().phase(), SlotPhase::Waited);
    // Releasing keeps the fence signaled for the next wait.
    pool.release_frame(0).unwrap();
    let fence = pool.frame(0).unwrap().in_flight();
    assert_eq!(device.fence_state(fence), Some(FenceState::Signaled));

    pool.wait_frame(&device, 0).unwrap();
    pool.confirm_frame(&device, 0).unwrap();
    assert_eq!(device.fence_state(fence), Some(FenceState::Unsignaled));
    assert!(matches!(
        pool.wait_frame(&device, 5),
        Err(RenderError::SyncViolation(_))
    ));

    pool.destroy(&device);
    binding.destroy(&device);
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn unsubmitted_fence_times_out_instead_of_hanging() {
    let device = MockDevice::new();
    let binding = UniformBinding::new(&device, 1).unwrap();
    let mut pool = FramePool::new(&device, 1, &binding, 5_000_000).unwrap();

    pool.wait_frame(&device, 0).unwrap();
    pool.confirm_frame(&device, 0).unwrap();
    pool.begin_recording(&device, 0).unwrap();
    pool.end_recording(&device, 0).unwrap();
    // Marked submitted without a queue submission: nothing will signal the fence.
    pool.mark_submitted(0).unwrap();

    let err = pool.wait_frame(&device, 0).unwrap_err();
    assert!(matches!(err, RenderError::FenceTimeout { slot: 0 }));
    assert!(!err.is_fatal());

    device.wait_idle().unwrap();
    pool.destroy(&device);
    binding.destroy(&device);
}

#[test]
fn shutdown_releases_every_object() {
    let mut t = renderer(3);
    let quad = t.renderer.upload_mesh(&MeshData::quad(), "quad").unwrap();
    let cube = t.renderer.upload_mesh(&MeshData::cube(), "cube").unwrap();
    for _ in 0..4 {
        t.renderer
            .render(
                &[MeshDraw::new(&quad), MeshDraw::new(&cube)],
                &FrameUniforms::default(),
            )
            .unwrap();
    }
    t.renderer.destroy_mesh(quad).unwrap();
    t.renderer.destroy_mesh(cube).unwrap();

    t.renderer.shutdown().unwrap();
    assert_eq!(t.device.live_objects(), 0);
    assert!(t.device.violations().is_empty(), "{:?}", t.device.violations());
    // A second shutdown is a no-op.
    t.renderer.shutdown().unwrap();
}
