//! YOLOv5 letterboxing and output decoding.
//!
//! Kept independent of any inference runtime so it can be exercised without a
//! model file.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};

use super::result::{BoundingBox, Detection};

/// Gray fill YOLOv5 uses when padding to the model input.
pub const LETTERBOX_FILL: u8 = 114;

/// Offsets of the fields in one YOLOv5 output row.
const BOX_FIELDS: usize = 4;
const OBJECTNESS: usize = 4;
const CLASS_OFFSET: usize = 5;

/// Thresholds applied while decoding model output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeParams {
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 1000,
        }
    }
}

/// Geometry of a letterboxed frame, used to map boxes back to the source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub source_width: u32,
    pub source_height: u32,
}

impl Letterbox {
    pub fn fit(source_width: u32, source_height: u32, target: u32) -> Self {
        let scale = (target as f32 / source_width as f32).min(target as f32 / source_height as f32);
        let new_w = (source_width as f32 * scale).round();
        let new_h = (source_height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((target as f32 - new_w) / 2.0).floor(),
            pad_y: ((target as f32 - new_h) / 2.0).floor(),
            source_width,
            source_height,
        }
    }

    fn resized_dims(&self) -> (u32, u32) {
        (
            ((self.source_width as f32 * self.scale).round() as u32).max(1),
            ((self.source_height as f32 * self.scale).round() as u32).max(1),
        )
    }

    /// Map a box in model-input space back to source-image pixels.
    pub fn unmap(&self, bbox: BoundingBox) -> BoundingBox {
        let sw = self.source_width as f32;
        let sh = self.source_height as f32;
        let x1 = ((bbox.left() - self.pad_x) / self.scale).clamp(0.0, sw);
        let y1 = ((bbox.top() - self.pad_y) / self.scale).clamp(0.0, sh);
        let x2 = ((bbox.right() - self.pad_x) / self.scale).clamp(0.0, sw);
        let y2 = ((bbox.bottom() - self.pad_y) / self.scale).clamp(0.0, sh);
        BoundingBox::new((x1 + x2) / 2.0, (y1 + y2) / 2.0, x2 - x1, y2 - y1)
    }
}

/// Resize `image` into a `target`x`target` canvas, preserving aspect ratio.
pub fn letterbox(image: &RgbImage, target: u32) -> (RgbImage, Letterbox) {
    let geometry = Letterbox::fit(image.width(), image.height(), target);
    let (w, h) = geometry.resized_dims();
    let resized = image::imageops::resize(image, w, h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target, target, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        geometry.pad_x as i64,
        geometry.pad_y as i64,
    );
    (canvas, geometry)
}

/// Decode raw YOLOv5 rows (`cx, cy, w, h, obj, class scores...`).
///
/// `data` is the flattened `[N, row_len]` output for a single image. Boxes are
/// returned in source-image pixels after class-aware NMS.
pub fn decode_yolov5(
    data: &[f32],
    row_len: usize,
    params: &DecodeParams,
    geometry: &Letterbox,
) -> Vec<Detection> {
    if row_len <= CLASS_OFFSET {
        return Vec::new();
    }
    let mut candidates = Vec::new();
    for row in data.chunks_exact(row_len) {
        let objectness = row[OBJECTNESS];
        if objectness.is_nan() || objectness <= params.conf_threshold {
            continue;
        }
        let Some((class_id, class_score)) = row[CLASS_OFFSET..]
            .iter()
            .copied()
            .enumerate()
            .reduce(|best, x| if x.1 > best.1 { x } else { best })
        else {
            continue;
        };
        let confidence = objectness * class_score;
        if confidence.is_nan() || confidence <= params.conf_threshold {
            continue;
        }
        let b = &row[..BOX_FIELDS];
        let bbox = geometry.unmap(BoundingBox::new(b[0], b[1], b[2], b[3]));
        candidates.push(Detection::new(class_id as u32, confidence, bbox));
    }
    non_max_suppression(&mut candidates, params.iou_threshold);
    candidates.truncate(params.max_detections);
    candidates
}

/// Class-aware NMS: a box only suppresses lower-scored boxes of its own class.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev in 0..kept {
            if xs[prev].class_id == xs[index].class_id
                && xs[prev].bbox.iou(&xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(kept, index);
            kept += 1;
        }
    }
    xs.truncate(kept);
}
