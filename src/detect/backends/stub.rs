use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::DetectorBackend;
use crate::detect::count::PERSON_CLASS_ID;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::CountError;
use crate::frame::Frame;

/// Stub backend for tests and model-less runs.
///
/// Returns a scripted answer for every frame and counts how often it was asked.
pub struct StubBackend {
    script: StubScript,
    calls: Arc<AtomicUsize>,
    initialized: bool,
}

enum StubScript {
    Fixed(Vec<Detection>),
    /// `n` person boxes laid out left to right across the frame.
    People(usize),
    Fail(String),
}

impl StubBackend {
    /// Backend that never detects anything.
    pub fn new() -> Self {
        Self::with_detections(Vec::new())
    }

    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self::scripted(StubScript::Fixed(detections))
    }

    pub fn with_people(count: usize) -> Self {
        Self::scripted(StubScript::People(count))
    }

    /// Backend whose every inference fails with `reason`.
    pub fn failing<S: Into<String>>(reason: S) -> Self {
        Self::scripted(StubScript::Fail(reason.into()))
    }

    fn scripted(script: StubScript) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            initialized: false,
        }
    }

    /// Shared counter of `infer` calls; stays valid after the backend is moved.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn initialize(&mut self) -> Result<(), CountError> {
        self.initialized = true;
        Ok(())
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, CountError> {
        if !self.initialized {
            return Err(CountError::inference("stub backend used before initialize"));
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            StubScript::Fixed(detections) => Ok(detections.clone()),
            StubScript::People(count) => Ok(layout_people(*count, frame)),
            StubScript::Fail(reason) => Err(CountError::inference(reason.clone())),
        }
    }

    fn shutdown(&mut self) {
        self.initialized = false;
    }
}

fn layout_people(count: usize, frame: &Frame) -> Vec<Detection> {
    if count == 0 {
        return Vec::new();
    }
    let slot = frame.width() as f32 / count as f32;
    let h = frame.height() as f32 * 0.6;
    (0..count)
        .map(|i| {
            let bbox = BoundingBox::new(
                slot * (i as f32 + 0.5),
                frame.height() as f32 / 2.0,
                slot * 0.6,
                h,
            );
            Detection::new(PERSON_CLASS_ID, 0.9, bbox)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ChannelOrder;

    fn frame() -> Frame {
        Frame::new(vec![0; 100 * 50 * 3], 100, 50, ChannelOrder::Rgb).unwrap()
    }

    #[test]
    fn counts_calls_after_move() {
        let mut backend = StubBackend::with_people(2);
        let calls = backend.call_counter();
        backend.initialize().unwrap();
        backend.infer(&frame()).unwrap();
        backend.infer(&frame()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn people_boxes_stay_inside_frame() {
        let mut backend = StubBackend::with_people(4);
        backend.initialize().unwrap();
        let dets = backend.infer(&frame()).unwrap();
        assert_eq!(dets.len(), 4);
        for d in dets {
            assert_eq!(d.class_id, PERSON_CLASS_ID);
            assert!(d.bbox.left() >= 0.0 && d.bbox.right() <= 100.0);
            assert!(d.bbox.top() >= 0.0 && d.bbox.bottom() <= 50.0);
        }
    }

    #[test]
    fn refuses_inference_before_initialize() {
        let mut backend = StubBackend::new();
        assert!(backend.infer(&frame()).is_err());
        backend.initialize().unwrap();
        assert!(backend.infer(&frame()).unwrap().is_empty());
        backend.shutdown();
        assert!(backend.infer(&frame()).is_err());
    }

    #[test]
    fn failing_script_reports_reason() {
        let mut backend = StubBackend::failing("cuda device lost");
        backend.initialize().unwrap();
        assert_eq!(
            backend.infer(&frame()).unwrap_err(),
            CountError::inference("cuda device lost")
        );
    }
}
