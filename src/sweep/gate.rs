use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ingest::CameraId;

/// Which timestamp the interval gate compares against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// One "last capture" time shared by every camera in the sweep.
    #[default]
    Shared,
    /// Independent timer per camera.
    PerCamera,
}

/// Whether the gate is open before anything has been captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStart {
    /// The gate clock starts when the sweep is created, so nothing passes
    /// until one full interval has elapsed.
    #[default]
    Closed,
    /// The first visit passes immediately.
    Open,
}

/// Skips detection until `interval` has elapsed since the last counted frame.
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    scope: GateScope,
    start: GateStart,
    created: Instant,
    last_shared: Option<Instant>,
    last_per_camera: HashMap<CameraId, Instant>,
}

impl IntervalGate {
    pub fn new(interval: Duration, scope: GateScope, start: GateStart, created: Instant) -> Self {
        Self {
            interval,
            scope,
            start,
            created,
            last_shared: None,
            last_per_camera: HashMap::new(),
        }
    }

    pub fn is_open(&self, camera: CameraId, now: Instant) -> bool {
        let last = match self.scope {
            GateScope::Shared => self.last_shared,
            GateScope::PerCamera => self.last_per_camera.get(&camera).copied(),
        };
        match (last, self.start) {
            (Some(last), _) => now.saturating_duration_since(last) >= self.interval,
            (None, GateStart::Open) => true,
            (None, GateStart::Closed) => {
                now.saturating_duration_since(self.created) >= self.interval
            }
        }
    }

    /// Record a counted frame at `now`.
    pub fn mark(&mut self, camera: CameraId, now: Instant) {
        match self.scope {
            GateScope::Shared => self.last_shared = Some(now),
            GateScope::PerCamera => {
                self.last_per_camera.insert(camera, now);
            }
        }
    }
}
