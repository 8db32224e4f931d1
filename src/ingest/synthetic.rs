//! Synthetic camera source.
//!
//! Stands in for real devices in tests and model-less runs. Which cameras
//! exist and which of them fail to deliver a frame is configured up front;
//! every open, read and release is recorded in shared `SourceStats`.

use std::sync::{Arc, Mutex};

use super::{CameraHandle, CameraId, FrameSource};
use crate::error::CountError;
use crate::frame::{ChannelOrder, Frame};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Cameras that can be opened. `None` means every index opens.
    pub available: Option<Vec<CameraId>>,
    /// Cameras that open but fail to deliver a frame.
    pub unreadable: Vec<CameraId>,
    pub width: u32,
    pub height: u32,
    /// Channel order frames are delivered in (real webcams usually hand out BGR).
    pub order: ChannelOrder,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            available: None,
            unreadable: Vec::new(),
            width: 640,
            height: 480,
            order: ChannelOrder::Bgr,
        }
    }
}

/// Record of device activity, shared by the source and all of its handles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub opened: Vec<CameraId>,
    pub released: Vec<CameraId>,
    pub frames_read: u64,
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    stats: Arc<Mutex<SourceStats>>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stats: Arc::new(Mutex::new(SourceStats::default())),
        }
    }

    /// Snapshot of activity so far.
    pub fn stats(&self) -> SourceStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn is_available(&self, camera: CameraId) -> bool {
        self.config
            .available
            .as_ref()
            .map_or(true, |ids| ids.contains(&camera))
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self, camera: CameraId) -> Result<Box<dyn CameraHandle>, CountError> {
        if !self.is_available(camera) {
            return Err(CountError::DeviceUnavailable {
                camera,
                reason: "no synthetic device at this index".to_string(),
            });
        }
        if let Ok(mut stats) = self.stats.lock() {
            stats.opened.push(camera);
        }
        log::debug!("SyntheticSource: opened camera {}", camera);
        Ok(Box::new(SyntheticHandle {
            camera,
            width: self.config.width,
            height: self.config.height,
            order: self.config.order,
            readable: !self.config.unreadable.contains(&camera),
            stats: self.stats.clone(),
            released: false,
        }))
    }
}

struct SyntheticHandle {
    camera: CameraId,
    width: u32,
    height: u32,
    order: ChannelOrder,
    readable: bool,
    stats: Arc<Mutex<SourceStats>>,
    released: bool,
}

impl SyntheticHandle {
    /// Diagonal pattern offset by camera index so cameras differ.
    fn generate_pixels(&self) -> Result<Vec<u8>, CountError> {
        let len = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(Frame::CHANNELS))
            .ok_or_else(|| CountError::CaptureFailure {
                camera: self.camera,
                reason: format!("frame size {}x{} overflows", self.width, self.height),
            })?;
        let offset = self.camera.0 as usize * 17;
        Ok((0..len).map(|i| ((i + offset) % 256) as u8).collect())
    }
}

impl CameraHandle for SyntheticHandle {
    fn camera(&self) -> CameraId {
        self.camera
    }

    fn read(&mut self) -> Result<Frame, CountError> {
        if self.released {
            return Err(CountError::CaptureFailure {
                camera: self.camera,
                reason: "handle already released".to_string(),
            });
        }
        if !self.readable {
            return Err(CountError::CaptureFailure {
                camera: self.camera,
                reason: "synthetic device returned no frame".to_string(),
            });
        }
        let frame = Frame::new(self.generate_pixels()?, self.width, self.height, self.order)?;
        if let Ok(mut stats) = self.stats.lock() {
            stats.frames_read += 1;
        }
        Ok(frame)
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Ok(mut stats) = self.stats.lock() {
            stats.released.push(self.camera);
        }
    }
}

impl Drop for SyntheticHandle {
    fn drop(&mut self) {
        self.release();
    }
}
