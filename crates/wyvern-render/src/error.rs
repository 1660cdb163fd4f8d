//! Renderer error types.

use thiserror::Error;
use wyvern_gpu::GpuError;

/// Errors surfaced by the frame renderer.
///
/// A stale swapchain is not an error: it is reported through
/// [`crate::AcquireResult::NeedsRecreate`] and handled by recreation.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device, surface, pipeline or initial swapchain creation failed.
    #[error("Renderer startup failed while creating {stage}: {source}")]
    StartupFatal {
        stage: &'static str,
        #[source]
        source: Box<RenderError>,
    },

    /// The presentation surface is gone; the renderer cannot continue.
    #[error("Presentation surface lost")]
    SurfaceLost,

    /// A staged copy could not be submitted or did not complete.
    #[error("Transfer failed: {0}")]
    TransferFailure(String),

    /// A frame operation was called out of protocol order.
    #[error("Frame synchronization violated: {0}")]
    SyncViolation(String),

    /// A bounded fence wait on a frame slot expired.
    #[error("Timed out waiting for frame slot {slot}")]
    FenceTimeout { slot: usize },

    /// Renderer configuration is out of range.
    #[error("Invalid renderer configuration: {0}")]
    InvalidConfig(String),

    /// Mesh data failed validation.
    #[error("Invalid mesh: {0}")]
    InvalidMesh(#[from] wyvern_core::Error),

    /// Any other device error.
    #[error(transparent)]
    Gpu(GpuError),
}

impl From<GpuError> for RenderError {
    fn from(error: GpuError) -> Self {
        match error {
            GpuError::SurfaceLost => Self::SurfaceLost,
            other => Self::Gpu(other),
        }
    }
}

impl RenderError {
    pub(crate) fn startup(stage: &'static str) -> impl FnOnce(Self) -> Self {
        move |source| Self::StartupFatal {
            stage,
            source: Box::new(source),
        }
    }

    /// Whether the renderer must shut down after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::TransferFailure(_) | Self::InvalidMesh(_) | Self::FenceTimeout { .. }
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_lost_is_promoted() {
        let error = RenderError::from(GpuError::SurfaceLost);
        assert!(matches!(error, RenderError::SurfaceLost));
        assert!(error.is_fatal());
    }

    #[test]
    fn transfer_failure_is_recoverable() {
        assert!(!RenderError::TransferFailure("copy".into()).is_fatal());
        assert!(!RenderError::FenceTimeout { slot: 1 }.is_fatal());
    }

    #[test]
    fn startup_wraps_source() {
        let error = RenderError::startup("swapchain")(RenderError::SurfaceLost);
        assert_eq!(
            error.to_string(),
            "Renderer startup failed while creating swapchain: Presentation surface lost"
        );
    }
}
