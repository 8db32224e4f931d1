//! Detection overlay drawn onto the frame returned by the service.

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::{Detection, PERSON_CLASS_ID};
use crate::error::CountError;
use crate::frame::Frame;

const PERSON_COLOR: Rgb<u8> = Rgb([255, 56, 56]);
const OTHER_COLOR: Rgb<u8> = Rgb([72, 146, 234]);
const THICKNESS: i32 = 2;

/// Draw a box per detection. Returns an RGB frame with the same dimensions.
pub fn annotate(frame: Frame, detections: &[Detection]) -> Result<Frame, CountError> {
    let mut image = frame.into_rgb_image()?;
    let (width, height) = image.dimensions();
    for det in detections {
        let x1 = det.bbox.left().clamp(0.0, width as f32) as i32;
        let y1 = det.bbox.top().clamp(0.0, height as f32) as i32;
        let x2 = det.bbox.right().clamp(0.0, width as f32) as i32;
        let y2 = det.bbox.bottom().clamp(0.0, height as f32) as i32;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        let color = if det.class_id == PERSON_CLASS_ID {
            PERSON_COLOR
        } else {
            OTHER_COLOR
        };
        // Thick border from nested rectangles, shrinking inwards.
        for offset in 0..THICKNESS {
            let w = x2 - x1 - 2 * offset;
            let h = y2 - y1 - 2 * offset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + offset, y1 + offset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(&mut image, rect, color);
        }
    }
    Ok(Frame::from_rgb_image(image))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;
    use crate::frame::ChannelOrder;

    fn black(width: u32, height: u32) -> Frame {
        Frame::new(vec![0; (width * height * 3) as usize], width, height, ChannelOrder::Rgb)
            .unwrap()
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * frame.width() + x) * 3) as usize;
        [frame.pixels()[i], frame.pixels()[i + 1], frame.pixels()[i + 2]]
    }

    #[test]
    fn draws_person_box_outline() {
        let det = Detection::new(PERSON_CLASS_ID, 0.9, BoundingBox::new(10.0, 10.0, 10.0, 10.0));
        let out = annotate(black(20, 20), &[det]).unwrap();
        assert_eq!((out.width(), out.height()), (20, 20));
        assert_eq!(pixel(&out, 5, 5), PERSON_COLOR.0);
        // interior untouched
        assert_eq!(pixel(&out, 10, 10), [0, 0, 0]);
    }

    #[test]
    fn boxes_outside_frame_are_clipped_or_skipped() {
        let outside = Detection::new(3, 0.5, BoundingBox::new(-50.0, -50.0, 10.0, 10.0));
        let partial = Detection::new(3, 0.5, BoundingBox::new(19.0, 19.0, 10.0, 10.0));
        let out = annotate(black(20, 20), &[outside, partial]).unwrap();
        assert_eq!(pixel(&out, 0, 0), [0, 0, 0]);
        assert_eq!(pixel(&out, 14, 14), OTHER_COLOR.0);
    }

    #[test]
    fn no_detections_leaves_pixels_alone() {
        let frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 2, 1, ChannelOrder::Bgr).unwrap();
        let out = annotate(frame, &[]).unwrap();
        assert_eq!(out.pixels(), &[3, 2, 1, 6, 5, 4]);
    }
}
