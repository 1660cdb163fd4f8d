//! Test harness for the Wyvern renderer.
//!
//! Provides a recording mock device that simulates fence, semaphore and
//! command buffer state, a scripted platform, and an overlay that records a
//! draw, so the frame protocol can be tested without a GPU.

pub mod device;
pub mod harness;
pub mod platform;

pub use device::{
    Call, Command, FailOp, FenceState, MockBuffer, MockDevice, MockImage, ObjectKind,
    PresentRecord, ScriptedAcquire, ScriptedPresent, SubmitRecord,
};
pub use harness::{test_pipeline_desc, MockOrchestrator, TestRenderer};
pub use platform::{MockPlatform, RecordingOverlay};
