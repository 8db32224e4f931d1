//! People counter
//!
//! Counts people in camera frames with a YOLO-family object detector.
//!
//! # Entry points
//!
//! 1. **Sweep** (`count_sweep`): visit a fixed list of local cameras once,
//!    count people on each, write one JSON file of per-camera counts.
//! 2. **Detection service** (`count_server`): HTTP endpoint that takes a
//!    base64 image and returns the people count plus an annotated JPEG.
//!
//! Both share one detector loaded once per process (`detect::SharedDetector`).
//!
//! # Module Structure
//!
//! - `frame`: Decoded pixel buffers with a channel order tag
//! - `ingest`: Frame sources (V4L2, synthetic) and per-camera handles
//! - `detect`: Detector adapter, backends, YOLO post-processing, counting
//! - `sweep`: Interval gate, clock and per-camera aggregation
//! - `sink`: Sweep output file
//! - `service` / `api`: Detection request handling and its HTTP transport
//! - `codec` / `render`: Image encode/decode and detection overlays
//! - `config`: File + environment configuration

pub mod api;
pub mod codec;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod render;
pub mod service;
pub mod sink;
pub mod sweep;

pub use config::CounterConfig;
pub use detect::{count_class, Detection, DetectorBackend, SharedDetector, PERSON_CLASS_ID};
pub use error::CountError;
pub use frame::{ChannelOrder, Frame};
pub use ingest::{CameraHandle, CameraId, FrameSource};
pub use service::{DetectionResponse, DetectionService};
pub use sink::CountFormat;
pub use sweep::{AggregationMap, CameraOutcome, Sweep, SweepConfig, SweepReport};
