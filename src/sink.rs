//! Sweep output file.
//!
//! ```json
//! {
//!     "people_counts": {
//!         "camera_0": [3]
//!     }
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::sweep::AggregationMap;

/// How each count is written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountFormat {
    /// One-element array per camera. This is the layout existing consumers read.
    #[default]
    Set,
    /// Plain integer.
    Number,
}

/// Build the output document. Cameras appear in the order they were counted.
pub fn render_counts(counts: &AggregationMap, format: CountFormat) -> Value {
    let mut per_camera = Map::new();
    for result in counts.iter() {
        let count = Value::from(result.people_count);
        let value = match format {
            CountFormat::Set => Value::Array(vec![count]),
            CountFormat::Number => count,
        };
        per_camera.insert(result.camera_id.key(), value);
    }
    let mut root = Map::new();
    root.insert("people_counts".to_string(), Value::Object(per_camera));
    Value::Object(root)
}

/// Serialize with a four-space indent.
pub fn to_pretty_json(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value
        .serialize(&mut ser)
        .context("failed to serialize people counts")?;
    Ok(out)
}

/// Overwrite `path` with the rendered counts.
pub fn write_counts(path: &Path, counts: &AggregationMap, format: CountFormat) -> Result<()> {
    let bytes = to_pretty_json(&render_counts(counts, format))?;
    std::fs::write(path, bytes)
        .with_context(|| format!("failed to write people counts to {}", path.display()))?;
    log::info!(
        "wrote {} camera counts to {}",
        counts.len(),
        path.display()
    );
    Ok(())
}
