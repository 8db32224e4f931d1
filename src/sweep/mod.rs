//! Camera sweep.
//!
//! One pass visits a fixed, ordered list of cameras. For each camera:
//! 1. Open the device; on failure log and move on
//! 2. Read one frame; on failure release, log and move on
//! 3. Check the interval gate; when closed the frame is discarded
//! 4. When open, run the detector, count people, mark the gate, record the result
//! 5. Release the device
//!
//! Per-camera faults never abort the pass and retries are never attempted.
//!
//! With the default `GateScope::Shared` + `GateStart::Closed`, one timestamp is
//! shared by every camera and starts at construction, so a single fast pass
//! over several cameras counts at most the cameras reached after the first
//! interval has elapsed. This mirrors the deployed behavior. Continuous
//! monitoring wants `GateScope::PerCamera` across repeated passes instead.

mod aggregate;
mod clock;
mod gate;

use std::time::Duration;

use crate::detect::{count_class, SharedDetector, PERSON_CLASS_ID};
use crate::ingest::{CameraHandle, CameraId, FrameSource};

pub use aggregate::{AggregationBuilder, AggregationMap, CameraResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use gate::{GateScope, GateStart, IntervalGate};

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub cameras: Vec<CameraId>,
    pub interval: Duration,
    pub person_class: u32,
    pub gate_scope: GateScope,
    pub gate_start: GateStart,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            cameras: (0..6).map(CameraId).collect(),
            interval: Duration::from_secs(5),
            person_class: PERSON_CLASS_ID,
            gate_scope: GateScope::default(),
            gate_start: GateStart::default(),
        }
    }
}

/// What happened to one camera during a pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CameraOutcome {
    Counted(usize),
    /// Frame read but discarded by the interval gate.
    Gated,
    Unavailable(String),
    CaptureFailed(String),
    InferenceFailed(String),
}

#[derive(Clone, Debug, Default)]
pub struct SweepReport {
    pub counts: AggregationMap,
    pub outcomes: Vec<(CameraId, CameraOutcome)>,
}

impl SweepReport {
    pub fn outcome(&self, camera: CameraId) -> Option<&CameraOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == camera)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Sweep<C: Clock = SystemClock> {
    config: SweepConfig,
    clock: C,
    gate: IntervalGate,
}

impl<C: Clock> Sweep<C> {
    /// The gate clock starts now.
    pub fn new(config: SweepConfig, clock: C) -> Self {
        let gate = IntervalGate::new(
            config.interval,
            config.gate_scope,
            config.gate_start,
            clock.now(),
        );
        Self {
            config,
            clock,
            gate,
        }
    }

    /// Run one pass over the configured cameras.
    ///
    /// Gate state carries over between passes on the same `Sweep`.
    pub fn run(&mut self, source: &mut dyn FrameSource, detector: &SharedDetector) -> SweepReport {
        let mut counts = AggregationBuilder::new();
        let mut outcomes = Vec::with_capacity(self.config.cameras.len());

        for camera in self.config.cameras.clone() {
            let outcome = self.visit(camera, source, detector, &mut counts);
            outcomes.push((camera, outcome));
        }

        let report = SweepReport {
            counts: counts.build(),
            outcomes,
        };
        log::info!(
            "sweep finished: {} of {} cameras counted",
            report.counts.len(),
            self.config.cameras.len()
        );
        report
    }

    fn visit(
        &mut self,
        camera: CameraId,
        source: &mut dyn FrameSource,
        detector: &SharedDetector,
        counts: &mut AggregationBuilder,
    ) -> CameraOutcome {
        let mut handle = match source.open(camera) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!("camera {} not accessible: {}", camera, err);
                return CameraOutcome::Unavailable(err.to_string());
            }
        };
        log::info!("camera {} accessible", camera);

        let outcome = self.process(handle.as_mut(), detector, counts);
        handle.release();
        outcome
    }

    fn process(
        &mut self,
        handle: &mut dyn CameraHandle,
        detector: &SharedDetector,
        counts: &mut AggregationBuilder,
    ) -> CameraOutcome {
        let camera = handle.camera();
        let frame = match handle.read() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("{}", err);
                return CameraOutcome::CaptureFailed(err.to_string());
            }
        };

        let now = self.clock.now();
        if !self.gate.is_open(camera, now) {
            log::debug!("camera {}: interval not elapsed, frame discarded", camera);
            return CameraOutcome::Gated;
        }

        match detector.infer(&frame) {
            Ok(detections) => {
                let people_count = count_class(&detections, self.config.person_class);
                self.gate.mark(camera, now);
                counts.record(CameraResult {
                    camera_id: camera,
                    people_count,
                });
                log::info!("camera {}: {} people", camera, people_count);
                CameraOutcome::Counted(people_count)
            }
            Err(err) => {
                log::warn!("camera {}: {}", camera, err);
                CameraOutcome::InferenceFailed(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::ingest::{SyntheticConfig, SyntheticSource};
    use std::sync::atomic::Ordering;

    fn people(n: usize) -> Vec<Detection> {
        let mut dets: Vec<Detection> = (0..n)
            .map(|i| Detection::new(0, 0.8, BoundingBox::new(10.0 * i as f32, 5.0, 4.0, 8.0)))
            .collect();
        // a chair, never counted
        dets.push(Detection::new(56, 0.7, BoundingBox::new(1.0, 1.0, 1.0, 1.0)));
        dets
    }

    fn source(available: &[u32]) -> SyntheticSource {
        SyntheticSource::new(SyntheticConfig {
            available: Some(available.iter().copied().map(CameraId).collect()),
            width: 16,
            height: 8,
            ..SyntheticConfig::default()
        })
    }

    fn config(cameras: &[u32], interval: Duration, start: GateStart) -> SweepConfig {
        SweepConfig {
            cameras: cameras.iter().copied().map(CameraId).collect(),
            interval,
            gate_start: start,
            ..SweepConfig::default()
        }
    }

    #[test]
    fn open_gate_counts_every_camera() {
        let detector = SharedDetector::initialize(StubBackend::with_detections(people(3))).unwrap();
        let mut source = source(&[0, 1, 2]);
        let mut sweep = Sweep::new(
            config(&[0, 1, 2], Duration::ZERO, GateStart::Closed),
            ManualClock::new(),
        );

        let report = sweep.run(&mut source, &detector);
        assert_eq!(report.counts.len(), 3);
        for id in 0..3 {
            assert_eq!(report.counts.get(CameraId(id)).unwrap().people_count, 3);
        }
    }

    #[test]
    fn shared_gate_lets_only_first_camera_through_a_fast_pass() {
        let backend = StubBackend::with_detections(people(1));
        let calls = backend.call_counter();
        let detector = SharedDetector::initialize(backend).unwrap();
        let mut source = source(&[0, 1]);
        let mut sweep = Sweep::new(
            config(&[0, 1], Duration::from_secs(5), GateStart::Open),
            ManualClock::new(),
        );

        let report = sweep.run(&mut source, &detector);
        assert_eq!(report.outcome(CameraId(0)), Some(&CameraOutcome::Counted(1)));
        assert_eq!(report.outcome(CameraId(1)), Some(&CameraOutcome::Gated));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.stats().released, vec![CameraId(0), CameraId(1)]);
    }

    #[test]
    fn per_camera_gate_counts_each_camera_once() {
        let detector = SharedDetector::initialize(StubBackend::with_detections(people(2))).unwrap();
        let mut source = source(&[0, 1]);
        let mut cfg = config(&[0, 1], Duration::from_secs(5), GateStart::Open);
        cfg.gate_scope = GateScope::PerCamera;
        let clock = ManualClock::new();
        let mut sweep = Sweep::new(cfg, clock.clone());

        assert_eq!(sweep.run(&mut source, &detector).counts.len(), 2);

        // second pass inside the interval: both gated
        let again = sweep.run(&mut source, &detector);
        assert!(again.counts.is_empty());

        clock.advance(Duration::from_secs(5));
        assert_eq!(sweep.run(&mut source, &detector).counts.len(), 2);
    }

    #[test]
    fn inference_failure_is_isolated() {
        let detector = SharedDetector::initialize(StubBackend::failing("device lost")).unwrap();
        let mut source = source(&[0]);
        let mut sweep = Sweep::new(
            config(&[0], Duration::ZERO, GateStart::Open),
            ManualClock::new(),
        );

        let report = sweep.run(&mut source, &detector);
        assert!(report.counts.is_empty());
        assert!(matches!(
            report.outcome(CameraId(0)),
            Some(CameraOutcome::InferenceFailed(_))
        ));
        assert_eq!(source.stats().released, vec![CameraId(0)]);
    }

    #[test]
    fn stepping_clock_reopens_shared_gate() {
        // each clock read moves 5s, so every camera sees an elapsed interval
        let detector = SharedDetector::initialize(StubBackend::with_detections(people(1))).unwrap();
        let mut source = source(&[0, 1, 2]);
        let mut sweep = Sweep::new(
            config(&[0, 1, 2], Duration::from_secs(5), GateStart::Closed),
            ManualClock::with_step(Duration::from_secs(5)),
        );
        let report = sweep.run(&mut source, &detector);
        assert_eq!(report.counts.len(), 3);
    }
}
