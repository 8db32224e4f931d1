//! Device pixel formats to `Frame`.

use crate::codec;
use crate::error::CountError;
use crate::frame::{ChannelOrder, Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    /// Packed 4:2:2, `Y0 U Y1 V` per pixel pair.
    Yuyv,
    /// One JPEG image per buffer.
    Mjpeg,
}

impl PixelFormat {
    /// Map a V4L2 fourcc to a supported format.
    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb24),
            b"BGR3" => Some(Self::Bgr24),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" | b"JPEG" => Some(Self::Mjpeg),
            _ => None,
        }
    }
}

pub fn normalize_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Frame, CountError> {
    match format {
        PixelFormat::Rgb24 => {
            let rgb = packed_prefix(pixels, width, height, 3)?;
            Frame::new(rgb, width, height, ChannelOrder::Rgb)
        }
        PixelFormat::Bgr24 => {
            let bgr = packed_prefix(pixels, width, height, 3)?;
            Frame::new(bgr, width, height, ChannelOrder::Bgr)
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, width, height),
        PixelFormat::Mjpeg => codec::decode_image(pixels)
            .map_err(|_| CountError::internal("device delivered an undecodable JPEG buffer")),
    }
}

/// Drivers may hand back buffers padded past the image; keep the image bytes.
fn packed_prefix(
    pixels: &[u8],
    width: u32,
    height: u32,
    bpp: usize,
) -> Result<Vec<u8>, CountError> {
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(bpp))
        .ok_or_else(|| CountError::internal("frame dimensions overflow"))?;
    if pixels.len() < expected {
        return Err(CountError::internal(format!(
            "short frame buffer: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }
    Ok(pixels[..expected].to_vec())
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Frame, CountError> {
    if width % 2 != 0 {
        return Err(CountError::internal("YUYV frames need an even width"));
    }
    let packed = packed_prefix(pixels, width, height, 2)?;
    let mut rgb = Vec::with_capacity(packed.len() / 2 * 3);
    for quad in packed.chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let y = y as f32;
            rgb.push(clamp_to_u8(y + 1.402_f32 * v));
            rgb.push(clamp_to_u8(y - 0.344_136_f32 * u - 0.714_136_f32 * v));
            rgb.push(clamp_to_u8(y + 1.772_f32 * u));
        }
    }
    Frame::new(rgb, width, height, ChannelOrder::Rgb)
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
