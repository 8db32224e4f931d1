use super::result::Detection;

/// "person" in the COCO label ordering used by the YOLOv5 family.
///
/// This is only the default for `detector.person_class`; a model trained on a
/// different taxonomy needs a different value.
pub const PERSON_CLASS_ID: u32 = 0;

/// Number of detections whose class matches `target_class`.
pub fn count_class(detections: &[Detection], target_class: u32) -> usize {
    detections
        .iter()
        .filter(|d| d.class_id == target_class)
        .count()
}
