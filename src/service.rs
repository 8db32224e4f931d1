//! Request handling for the detection endpoint, independent of transport.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::codec;
use crate::detect::{count_class, SharedDetector, PERSON_CLASS_ID};
use crate::error::CountError;
use crate::render;

/// Result of one detection request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DetectionResponse {
    pub people_count: usize,
    /// JPEG bytes; base64 text on the wire.
    #[serde(serialize_with = "serialize_base64")]
    pub processed_image: Vec<u8>,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&codec::encode_base64(bytes))
}

#[derive(Clone, Debug)]
pub struct DetectionService {
    detector: SharedDetector,
    person_class: u32,
    jpeg_quality: u8,
}

impl DetectionService {
    pub fn new(detector: SharedDetector) -> Self {
        Self {
            detector,
            person_class: PERSON_CLASS_ID,
            jpeg_quality: codec::DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_person_class(mut self, class_id: u32) -> Self {
        self.person_class = class_id;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn detector(&self) -> &SharedDetector {
        &self.detector
    }

    /// Handle a raw JSON body of the form `{"image": "<base64>"}`.
    pub fn handle(&self, body: &[u8]) -> Result<DetectionResponse, CountError> {
        let image = extract_image(body)?;
        let encoded = codec::decode_base64(&image)?;
        let frame = codec::decode_image(&encoded)?;

        let detections = self.detector.infer(&frame)?;
        let people_count = count_class(&detections, self.person_class);
        log::debug!(
            "detection request: {}x{} frame, {} detections, {} people",
            frame.width(),
            frame.height(),
            detections.len(),
            people_count
        );

        let annotated = render::annotate(frame, &detections)?;
        let processed_image = codec::encode_jpeg(&annotated, self.jpeg_quality)?;
        Ok(DetectionResponse {
            people_count,
            processed_image,
        })
    }
}

fn extract_image(body: &[u8]) -> Result<String, CountError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| CountError::bad_request(format!("Invalid JSON body: {}", e)))?;
    match value.get("image") {
        Some(Value::String(image)) if !image.trim().is_empty() => Ok(image.clone()),
        _ => Err(CountError::bad_request("No image data provided")),
    }
}
