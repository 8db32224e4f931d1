//! Frame sources.
//!
//! A source opens one camera by index, hands back a handle that reads exactly
//! one frame, and is released straight after:
//! - Synthetic cameras (testing, model-less runs)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Handles are never shared between cameras. `release` is idempotent and every
//! handle also releases itself on drop, so a device is never held longer than
//! one read.

pub mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use serde::{Deserialize, Serialize};

use crate::error::CountError;
use crate::frame::Frame;

pub use synthetic::{SourceStats, SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Capture device index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(pub u32);

impl CameraId {
    /// Key used for this camera in the sweep output file.
    pub fn key(&self) -> String {
        format!("camera_{}", self.0)
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for CameraId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Opens cameras by index.
pub trait FrameSource {
    /// Fails with `DeviceUnavailable` when the device cannot be opened.
    fn open(&mut self, camera: CameraId) -> Result<Box<dyn CameraHandle>, CountError>;
}

/// An open camera.
pub trait CameraHandle {
    fn camera(&self) -> CameraId;

    /// Read one frame. Fails with `CaptureFailure`, including after release.
    fn read(&mut self) -> Result<Frame, CountError>;

    /// Give the device back. Safe to call any number of times.
    fn release(&mut self);
}
