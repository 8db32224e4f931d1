//! Decoded raster frames.
//!
//! A `Frame` is three interleaved 8-bit channels plus a tag saying which order
//! those channels are in. Capture devices may hand us BGR; the detector only
//! ever sees RGB (see `SharedDetector::infer`).

use image::RgbImage;

use crate::error::CountError;

/// Channel ordering of the interleaved pixel data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

/// Decoded image owned by one pipeline pass.
#[derive(Clone)]
pub struct Frame {
    pixels: Vec<u8>,
    width: u32,
    height: u32,
    order: ChannelOrder,
}

impl Frame {
    pub const CHANNELS: usize = 3;

    /// Wrap interleaved pixels. Fails when the buffer does not match the dimensions.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        order: ChannelOrder,
    ) -> Result<Self, CountError> {
        if width == 0 || height == 0 {
            return Err(CountError::internal(format!(
                "frame dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(Self::CHANNELS))
            .ok_or_else(|| CountError::internal("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(CountError::internal(format!(
                "frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            order,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            pixels: image.into_raw(),
            width,
            height,
            order: ChannelOrder::Rgb,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn order(&self) -> ChannelOrder {
        self.order
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Convert to RGB ordering in place. No-op for RGB frames.
    pub fn into_rgb(mut self) -> Self {
        if self.order == ChannelOrder::Bgr {
            swap_red_blue(&mut self.pixels);
            self.order = ChannelOrder::Rgb;
        }
        self
    }

    /// RGB copy of this frame, leaving `self` untouched.
    pub fn to_rgb(&self) -> Self {
        self.clone().into_rgb()
    }

    /// Consume into an `image` buffer in RGB order.
    pub fn into_rgb_image(self) -> Result<RgbImage, CountError> {
        let frame = self.into_rgb();
        RgbImage::from_raw(frame.width, frame.height, frame.pixels)
            .ok_or_else(|| CountError::internal("frame buffer does not match its dimensions"))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("order", &self.order)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(Frame::CHANNELS) {
        px.swap(0, 2);
    }
}
