use serde::Serialize;

use crate::ingest::CameraId;

/// People counted on one camera in one sweep pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct CameraResult {
    pub camera_id: CameraId,
    pub people_count: usize,
}

/// Per-camera results of a sweep, in the order cameras were first counted.
///
/// Holds at most one entry per camera. Cameras that failed or were gated are
/// absent rather than zero. Built through `AggregationBuilder`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AggregationMap {
    results: Vec<CameraResult>,
}

impl AggregationMap {
    pub fn get(&self, camera: CameraId) -> Option<&CameraResult> {
        self.results.iter().find(|r| r.camera_id == camera)
    }

    pub fn contains(&self, camera: CameraId) -> bool {
        self.get(camera).is_some()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CameraResult> {
        self.results.iter()
    }

    pub fn cameras(&self) -> Vec<CameraId> {
        self.results.iter().map(|r| r.camera_id).collect()
    }

    /// Combine with a later pass; entries in `later` win.
    pub fn merge(self, later: AggregationMap) -> AggregationMap {
        let mut builder = AggregationBuilder { results: self.results };
        for result in later.results {
            builder.record(result);
        }
        builder.build()
    }
}

#[derive(Debug, Default)]
pub struct AggregationBuilder {
    results: Vec<CameraResult>,
}

impl AggregationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `result.camera_id`. Returns the old entry.
    pub fn record(&mut self, result: CameraResult) -> Option<CameraResult> {
        match self
            .results
            .iter_mut()
            .find(|r| r.camera_id == result.camera_id)
        {
            Some(slot) => Some(std::mem::replace(slot, result)),
            None => {
                self.results.push(result);
                None
            }
        }
    }

    pub fn build(self) -> AggregationMap {
        AggregationMap {
            results: self.results,
        }
    }
}
