use crate::api::ApiError;
use facegate_hw::{CameraError, CaptureError};
use thiserror::Error;

/// Input rejected before anything was captured or sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter your name first.")]
    EmptyName,
    #[error("Camera not started.")]
    CameraNotStarted,
}

/// Network, HTTP or capture failure.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Failure of a single flow attempt. None of these end the flow.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to access camera: {0}")]
    Device(#[from] CameraError),
    /// The service answered with a non-success status.
    #[error("{0}")]
    Service(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("a liveness submission is already in progress")]
    Busy,
    /// The flow was torn down while the attempt was outstanding.
    #[error("flow was torn down before the response arrived")]
    Stale,
}

impl From<CaptureError> for FlowError {
    fn from(e: CaptureError) -> Self {
        FlowError::Transport(e.into())
    }
}

impl From<ApiError> for FlowError {
    fn from(e: ApiError) -> Self {
        FlowError::Transport(e.into())
    }
}
