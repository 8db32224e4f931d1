//! Image codec boundary.
//!
//! Inbound payloads are base64 text wrapping any format the `image` crate can
//! sniff (JPEG and PNG are compiled in). Outbound frames are always JPEG, which
//! is lossy: a decode/encode round trip keeps pixel dimensions exactly but not
//! pixel values.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::CountError;
use crate::frame::{ChannelOrder, Frame};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Decode base64 text, ignoring embedded whitespace and line breaks.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, CountError> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| CountError::bad_request(format!("Failed to decode image: {}", e)))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode encoded image bytes into an RGB frame.
pub fn decode_image(bytes: &[u8]) -> Result<Frame, CountError> {
    if bytes.is_empty() {
        return Err(CountError::bad_request("Failed to decode image"));
    }
    let image = image::load_from_memory(bytes).map_err(|e| {
        log::debug!("image decode failed: {}", e);
        CountError::bad_request("Failed to decode image")
    })?;
    let rgb = image.to_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(CountError::bad_request("Failed to decode image"));
    }
    Ok(Frame::from_rgb_image(rgb))
}

/// Encode a frame as baseline JPEG at `quality` (1..=100).
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, CountError> {
    let rgb;
    let pixels = match frame.order() {
        ChannelOrder::Rgb => frame.pixels(),
        ChannelOrder::Bgr => {
            rgb = frame.to_rgb();
            rgb.pixels()
        }
    };
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
        .encode(pixels, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .map_err(|e| CountError::internal(format!("failed to encode jpeg: {}", e)))?;
    Ok(out)
}
