//! V4L2 frame source.
//!
//! Opens `/dev/video<N>` for camera index `N`, negotiates a 24-bit RGB format
//! where the driver allows it, and reads a single buffer per open. Drivers
//! that insist on YUYV or MJPG are normalized through `normalize`.
//!
//! No capture session outlives a handle: the mmap stream is created inside
//! `read` and dropped before it returns, and `release` closes the device.

use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::Capture;

use super::normalize::{normalize_frame, PixelFormat};
use super::{CameraHandle, CameraId, FrameSource};
use crate::error::CountError;
use crate::frame::Frame;

/// Configuration for V4L2 cameras.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device node prefix; the camera index is appended.
    pub device_prefix: String,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
    /// Buffers to queue for the single read.
    pub buffers: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device_prefix: "/dev/video".to_string(),
            width: 640,
            height: 480,
            buffers: 2,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    fn device_path(&self, camera: CameraId) -> String {
        format!("{}{}", self.config.device_prefix, camera.0)
    }
}

impl FrameSource for V4l2Source {
    fn open(&mut self, camera: CameraId) -> Result<Box<dyn CameraHandle>, CountError> {
        let path = self.device_path(camera);
        let unavailable = |reason: String| CountError::DeviceUnavailable { camera, reason };

        let device = v4l::Device::with_path(&path)
            .map_err(|err| unavailable(format!("open {}: {}", path, err)))?;
        let mut format = device
            .format()
            .map_err(|err| unavailable(format!("read format of {}: {}", path, err)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .map_err(|err| unavailable(format!("read format of {}: {}", path, err)))?
            }
        };

        let pixel_format = PixelFormat::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            unavailable(format!(
                "unsupported pixel format {}",
                format.fourcc.str().unwrap_or("????")
            ))
        })?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );

        Ok(Box::new(V4l2Handle {
            camera,
            path,
            device: Some(device),
            width: format.width,
            height: format.height,
            pixel_format,
            buffers: self.config.buffers.max(1),
        }))
    }
}

struct V4l2Handle {
    camera: CameraId,
    path: String,
    device: Option<v4l::Device>,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    buffers: u32,
}

impl V4l2Handle {
    fn capture_failure(&self, reason: String) -> CountError {
        CountError::CaptureFailure {
            camera: self.camera,
            reason,
        }
    }
}

impl CameraHandle for V4l2Handle {
    fn camera(&self) -> CameraId {
        self.camera
    }

    fn read(&mut self) -> Result<Frame, CountError> {
        let device = match self.device.as_mut() {
            Some(device) => device,
            None => return Err(self.capture_failure("handle already released".to_string())),
        };

        let captured = MmapStream::with_buffers(device, Type::VideoCapture, self.buffers)
            .and_then(|mut stream| {
                let (buf, meta) = stream.next()?;
                let used = meta.bytesused as usize;
                let bytes = if used > 0 && used <= buf.len() {
                    &buf[..used]
                } else {
                    buf
                };
                Ok(bytes.to_vec())
            });

        let bytes = captured
            .map_err(|err| self.capture_failure(format!("capture from {}: {}", self.path, err)))?;
        normalize_frame(&bytes, self.width, self.height, self.pixel_format)
            .map_err(|err| self.capture_failure(err.to_string()))
    }

    fn release(&mut self) {
        if self.device.take().is_some() {
            log::debug!("V4l2Source: released {}", self.path);
        }
    }
}

impl Drop for V4l2Handle {
    fn drop(&mut self) {
        self.release();
    }
}
