//! Error taxonomy shared by both entry points.
//!
//! Per-camera faults (`DeviceUnavailable`, `CaptureFailure`) are isolated by the
//! sweep. Request faults map to HTTP status codes at the API boundary.

use thiserror::Error;

use crate::CameraId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CountError {
    #[error("camera {camera} unavailable: {reason}")]
    DeviceUnavailable { camera: CameraId, reason: String },

    #[error("failed to capture frame from camera {camera}: {reason}")]
    CaptureFailure { camera: CameraId, reason: String },

    #[error("{0}")]
    BadRequest(String),

    #[error("inference failed: {0}")]
    InferenceFailure(String),

    #[error("{0}")]
    Internal(String),
}

impl CountError {
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn inference<S: Into<String>>(msg: S) -> Self {
        Self::InferenceFailure(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status for this fault when it reaches the service boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            _ => 500,
        }
    }
}
