use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::error::CountError;
use crate::frame::{ChannelOrder, Frame};

use super::result::Detection;

/// Object-detection model behind a single capability.
///
/// Backends own whatever device or accelerator state the model needs. They
/// always receive RGB frames; `SharedDetector` does the conversion.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Load or warm up the model. Called once before the first `infer`.
    fn initialize(&mut self) -> Result<(), CountError> {
        Ok(())
    }

    /// Run the model on an RGB frame.
    ///
    /// Output order is unspecified. On error no partial results are returned.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, CountError>;

    /// Release model state. Must be safe to call more than once.
    fn shutdown(&mut self) {}
}

/// Process-wide handle to the loaded detector.
///
/// Cloning is cheap. Calls are serialized through a `Mutex` because
/// `DetectorBackend::infer` takes `&mut self` and models are not assumed to be
/// safe for concurrent inference. A backend panic fails that call only.
#[derive(Clone)]
pub struct SharedDetector {
    name: &'static str,
    backend: Arc<Mutex<Box<dyn DetectorBackend>>>,
}

impl SharedDetector {
    /// Initialize `backend` and wrap it for sharing.
    pub fn initialize<B: DetectorBackend + 'static>(backend: B) -> Result<Self, CountError> {
        Self::from_boxed(Box::new(backend))
    }

    pub fn from_boxed(mut backend: Box<dyn DetectorBackend>) -> Result<Self, CountError> {
        let name = backend.name();
        backend.initialize()?;
        log::info!("detector backend '{}' initialized", name);
        Ok(Self {
            name,
            backend: Arc::new(Mutex::new(backend)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Run inference, converting BGR input to RGB first.
    ///
    /// Every failure surfaces as `InferenceFailure`.
    pub fn infer(&self, frame: &Frame) -> Result<Vec<Detection>, CountError> {
        let converted;
        let rgb = match frame.order() {
            ChannelOrder::Rgb => frame,
            ChannelOrder::Bgr => {
                converted = frame.to_rgb();
                &converted
            }
        };
        let mut guard = self.backend.lock().unwrap_or_else(|poisoned| {
            log::warn!("detector lock poisoned, recovering");
            poisoned.into_inner()
        });
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| guard.infer(rgb)));
        match outcome {
            Ok(Ok(detections)) => Ok(detections),
            Ok(Err(CountError::InferenceFailure(reason))) => {
                Err(CountError::InferenceFailure(reason))
            }
            Ok(Err(other)) => Err(CountError::inference(other.to_string())),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                log::error!("detector backend '{}' panicked: {}", self.name, reason);
                Err(CountError::inference(format!("backend panicked: {}", reason)))
            }
        }
    }

    pub fn shutdown(&self) {
        let mut guard = self
            .backend
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.shutdown();
        log::info!("detector backend '{}' shut down", self.name);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for SharedDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedDetector")
            .field("backend", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::result::BoundingBox;

    /// Records the first pixel it sees so tests can check channel order.
    struct PixelRecorder {
        seen: Arc<Mutex<Vec<[u8; 3]>>>,
    }

    impl DetectorBackend for PixelRecorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn infer(&mut self, frame: &Frame) -> Result<Vec<Detection>, CountError> {
            assert_eq!(frame.order(), ChannelOrder::Rgb);
            let px = frame.pixels();
            self.seen.lock().unwrap().push([px[0], px[1], px[2]]);
            Ok(vec![Detection::new(
                0,
                1.0,
                BoundingBox::new(0.5, 0.5, 1.0, 1.0),
            )])
        }
    }

    struct Failing;

    impl DetectorBackend for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, CountError> {
            Err(CountError::internal("device lost"))
        }
    }

    struct FailsToLoad;

    impl DetectorBackend for FailsToLoad {
        fn name(&self) -> &'static str {
            "fails-to-load"
        }

        fn initialize(&mut self) -> Result<(), CountError> {
            Err(CountError::internal("model file missing"))
        }

        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, CountError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn bgr_frames_reach_backend_as_rgb() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = SharedDetector::initialize(PixelRecorder { seen: seen.clone() }).unwrap();

        let bgr = Frame::new(vec![10, 20, 30], 1, 1, ChannelOrder::Bgr).unwrap();
        let rgb = Frame::new(vec![10, 20, 30], 1, 1, ChannelOrder::Rgb).unwrap();
        detector.infer(&bgr).unwrap();
        detector.infer(&rgb).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![[30, 20, 10], [10, 20, 30]]);
    }

    #[test]
    fn backend_errors_become_inference_failures() {
        let detector = SharedDetector::initialize(Failing).unwrap();
        let frame = Frame::new(vec![0; 3], 1, 1, ChannelOrder::Rgb).unwrap();
        let err = detector.infer(&frame).unwrap_err();
        assert_eq!(err, CountError::inference("device lost"));
    }

    /// Panics on the first call, then answers normally.
    struct PanicsOnce {
        calls: usize,
    }

    impl DetectorBackend for PanicsOnce {
        fn name(&self) -> &'static str {
            "panics-once"
        }

        fn infer(&mut self, _frame: &Frame) -> Result<Vec<Detection>, CountError> {
            self.calls += 1;
            if self.calls == 1 {
                panic!("kernel fault");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn backend_panic_fails_only_that_call() {
        let detector = SharedDetector::initialize(PanicsOnce { calls: 0 }).unwrap();
        let frame = Frame::new(vec![0; 3], 1, 1, ChannelOrder::Rgb).unwrap();

        let err = detector.infer(&frame).unwrap_err();
        assert_eq!(err, CountError::inference("backend panicked: kernel fault"));
        for _ in 0..3 {
            assert!(detector.infer(&frame).unwrap().is_empty());
        }
        detector.shutdown();
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = SharedDetector::initialize(PixelRecorder { seen: seen.clone() }).unwrap();
        let backend = detector.backend.clone();
        let _ = std::thread::spawn(move || {
            let _guard = backend.lock().unwrap();
            panic!("poison the detector lock");
        })
        .join();
        assert!(detector.backend.is_poisoned());

        let frame = Frame::new(vec![4, 5, 6], 1, 1, ChannelOrder::Rgb).unwrap();
        assert_eq!(detector.infer(&frame).unwrap().len(), 1);
    }

    #[test]
    fn initialize_errors_propagate() {
        let err = SharedDetector::initialize(FailsToLoad).unwrap_err();
        assert_eq!(err, CountError::internal("model file missing"));
    }

    #[test]
    fn clones_share_one_backend() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = SharedDetector::initialize(PixelRecorder { seen: seen.clone() }).unwrap();
        let other = detector.clone();
        let frame = Frame::new(vec![1, 2, 3], 1, 1, ChannelOrder::Rgb).unwrap();

        let handles: Vec<_> = [detector, other]
            .into_iter()
            .map(|d| {
                let frame = frame.clone();
                std::thread::spawn(move || d.infer(&frame).unwrap().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(seen.lock().unwrap().len(), 2);
    }
}
