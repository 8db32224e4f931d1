use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::api::ApiConfig;
use crate::detect::postprocess::DecodeParams;
use crate::detect::{SharedDetector, StubBackend, PERSON_CLASS_ID};
use crate::ingest::{CameraId, FrameSource, SyntheticConfig, SyntheticSource};
use crate::sink::CountFormat;
use crate::sweep::{GateScope, GateStart, SweepConfig};

const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_API_WORKERS: usize = 4;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_JPEG_QUALITY: u8 = crate::codec::DEFAULT_JPEG_QUALITY;
const DEFAULT_CAMERA_COUNT: u32 = 6;
const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_OUTPUT_PATH: &str = "people_counts.json";
const DEFAULT_MODEL_PATH: &str = "yolov5s.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;

#[derive(Debug, Deserialize, Default)]
struct CounterConfigFile {
    api: Option<ApiConfigFile>,
    sweep: Option<SweepConfigFile>,
    detector: Option<DetectorConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    workers: Option<usize>,
    max_body_bytes: Option<usize>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct SweepConfigFile {
    cameras: Option<Vec<u32>>,
    interval_secs: Option<u64>,
    output_path: Option<PathBuf>,
    gate_scope: Option<GateScope>,
    gate_start: Option<GateStart>,
    count_format: Option<CountFormat>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<BackendKind>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    conf_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    max_detections: Option<usize>,
    person_class: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    kind: Option<SourceKind>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub api: ApiSettings,
    pub sweep: SweepSettings,
    pub detector: DetectorSettings,
    pub source: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub workers: usize,
    pub max_body_bytes: usize,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct SweepSettings {
    pub cameras: Vec<CameraId>,
    pub interval: Duration,
    pub output_path: PathBuf,
    pub gate_scope: GateScope,
    pub gate_start: GateStart,
    pub count_format: CountFormat,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: BackendKind,
    pub model_path: PathBuf,
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub person_class: u32,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub kind: SourceKind,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// ONNX model through tract (feature: backend-tract).
    #[serde(alias = "onnx")]
    Tract,
    /// Detects nothing; for wiring checks without a model.
    Stub,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "backend-tract") {
            Self::Tract
        } else {
            Self::Stub
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tract" | "onnx" => Ok(Self::Tract),
            "stub" => Ok(Self::Stub),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// `/dev/video<N>` (feature: ingest-v4l2).
    #[serde(alias = "usb")]
    V4l2,
    Synthetic,
}

impl Default for SourceKind {
    fn default() -> Self {
        if cfg!(feature = "ingest-v4l2") {
            Self::V4l2
        } else {
            Self::Synthetic
        }
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v4l2" | "usb" => Ok(Self::V4l2),
            "synthetic" | "stub" => Ok(Self::Synthetic),
            other => Err(anyhow!("unknown frame source '{}'", other)),
        }
    }
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self::from_file(CounterConfigFile::default())
    }
}

impl CounterConfig {
    /// Defaults, then `$PEOPLE_COUNTER_CONFIG`, then environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PEOPLE_COUNTER_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Like `load`, with an explicit file taking the place of `$PEOPLE_COUNTER_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CounterConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let sweep = file.sweep.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        let defaults = DecodeParams::default();

        Self {
            api: ApiSettings {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                workers: api.workers.unwrap_or(DEFAULT_API_WORKERS),
                max_body_bytes: api.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
                jpeg_quality: api.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            sweep: SweepSettings {
                cameras: sweep
                    .cameras
                    .map(|ids| ids.into_iter().map(CameraId).collect())
                    .unwrap_or_else(|| (0..DEFAULT_CAMERA_COUNT).map(CameraId).collect()),
                interval: Duration::from_secs(
                    sweep.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
                ),
                output_path: sweep
                    .output_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH)),
                gate_scope: sweep.gate_scope.unwrap_or_default(),
                gate_start: sweep.gate_start.unwrap_or_default(),
                count_format: sweep.count_format.unwrap_or_default(),
            },
            detector: DetectorSettings {
                backend: detector.backend.unwrap_or_default(),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                conf_threshold: detector.conf_threshold.unwrap_or(defaults.conf_threshold),
                iou_threshold: detector.iou_threshold.unwrap_or(defaults.iou_threshold),
                max_detections: detector.max_detections.unwrap_or(defaults.max_detections),
                person_class: detector.person_class.unwrap_or(PERSON_CLASS_ID),
            },
            source: SourceSettings {
                kind: source.kind.unwrap_or_default(),
                width: source.width.unwrap_or(DEFAULT_WIDTH),
                height: source.height.unwrap_or(DEFAULT_HEIGHT),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PEOPLE_COUNTER_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api.addr = addr.trim().to_string();
            }
        }
        if let Ok(workers) = std::env::var("PEOPLE_COUNTER_API_WORKERS") {
            self.api.workers = workers
                .trim()
                .parse()
                .map_err(|_| anyhow!("PEOPLE_COUNTER_API_WORKERS must be a positive integer"))?;
        }
        if let Ok(cameras) = std::env::var("PEOPLE_COUNTER_CAMERAS") {
            let parsed = parse_cameras(&cameras)?;
            if !parsed.is_empty() {
                self.sweep.cameras = parsed;
            }
        }
        if let Ok(interval) = std::env::var("PEOPLE_COUNTER_INTERVAL_SECS") {
            let seconds: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("PEOPLE_COUNTER_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.sweep.interval = Duration::from_secs(seconds);
        }
        if let Ok(output) = std::env::var("PEOPLE_COUNTER_OUTPUT") {
            if !output.trim().is_empty() {
                self.sweep.output_path = PathBuf::from(output);
            }
        }
        if let Ok(backend) = std::env::var("PEOPLE_COUNTER_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.parse()?;
            }
        }
        if let Ok(model) = std::env::var("PEOPLE_COUNTER_MODEL") {
            if !model.trim().is_empty() {
                self.detector.model_path = PathBuf::from(model);
            }
        }
        if let Ok(source) = std::env::var("PEOPLE_COUNTER_SOURCE") {
            if !source.trim().is_empty() {
                self.source.kind = source.parse()?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep.cameras.is_empty() {
            return Err(anyhow!("camera list must not be empty"));
        }
        let mut seen = self.sweep.cameras.clone();
        seen.sort();
        if seen.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(anyhow!("camera list contains duplicates"));
        }
        for (name, value) in [
            ("conf_threshold", self.detector.conf_threshold),
            ("iou_threshold", self.detector.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within 0..=1, got {}", name, value));
            }
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if self.api.workers == 0 {
            return Err(anyhow!("api workers must be at least 1"));
        }
        if !(1..=100).contains(&self.api.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        self.api
            .addr
            .parse::<SocketAddr>()
            .map_err(|_| anyhow!("invalid api listen address '{}'", self.api.addr))?;
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        Ok(())
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api.addr.clone(),
            workers: self.api.workers,
            max_body_bytes: self.api.max_body_bytes,
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            cameras: self.sweep.cameras.clone(),
            interval: self.sweep.interval,
            person_class: self.detector.person_class,
            gate_scope: self.sweep.gate_scope,
            gate_start: self.sweep.gate_start,
        }
    }
}

impl DetectorSettings {
    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams {
            conf_threshold: self.conf_threshold,
            iou_threshold: self.iou_threshold,
            max_detections: self.max_detections,
        }
    }

    /// Load the configured backend. Runs once per process.
    pub fn build(&self) -> Result<SharedDetector> {
        let detector = match self.backend {
            BackendKind::Stub => {
                log::warn!("using stub detector backend; every frame counts zero people");
                SharedDetector::initialize(StubBackend::new())?
            }
            #[cfg(feature = "backend-tract")]
            BackendKind::Tract => {
                let backend = crate::detect::TractBackend::new(&self.model_path, self.input_size)
                    .with_params(self.decode_params());
                SharedDetector::initialize(backend).map_err(|e| {
                    anyhow!("failed to load model {}: {}", self.model_path.display(), e)
                })?
            }
            #[cfg(not(feature = "backend-tract"))]
            BackendKind::Tract => {
                return Err(anyhow!(
                    "detector backend 'tract' requires the backend-tract feature"
                ));
            }
        };
        log::info!("detector backend {} ready", detector.name());
        Ok(detector)
    }
}

impl SourceSettings {
    pub fn build(&self) -> Result<Box<dyn FrameSource>> {
        match self.kind {
            SourceKind::Synthetic => Ok(Box::new(SyntheticSource::new(SyntheticConfig {
                width: self.width,
                height: self.height,
                ..SyntheticConfig::default()
            }))),
            #[cfg(feature = "ingest-v4l2")]
            SourceKind::V4l2 => Ok(Box::new(crate::ingest::V4l2Source::new(
                crate::ingest::V4l2Config {
                    width: self.width,
                    height: self.height,
                    ..crate::ingest::V4l2Config::default()
                },
            ))),
            #[cfg(not(feature = "ingest-v4l2"))]
            SourceKind::V4l2 => Err(anyhow!(
                "frame source 'v4l2' requires the ingest-v4l2 feature"
            )),
        }
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse a comma separated list of camera indices, e.g. `0,1,4`.
pub fn parse_cameras(value: &str) -> Result<Vec<CameraId>> {
    split_csv(value)
        .into_iter()
        .map(|entry| {
            entry
                .parse::<u32>()
                .map(CameraId)
                .map_err(|_| anyhow!("invalid camera index '{}'", entry))
        })
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
