//! Stage engines: speech, character animation, scene composition.
//!
//! Each engine exposes the same contract: `validate(config) -> bool` for a
//! cheap structural check and an async `process(config)` returning an
//! [`EngineResult`]. External tools live behind the runner traits in
//! [`cmd`]; engines own fallback behavior when a tool is missing or fails.

pub mod character;
pub mod cmd;
pub mod composition;
pub mod speech;

use std::path::PathBuf;
use std::process::Output;

use serde_json::{Map, Value};

/// Common output bundle produced by every stage engine.
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub scene_id: String,
    /// Primary artifact: audio clip, frames directory, or video segment.
    pub output_path: Option<PathBuf>,
    /// Effective duration in seconds contributed by this stage.
    pub duration: f64,
    pub metadata: Map<String, Value>,
}

impl EngineResult {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            output_path: None,
            duration: 0.0,
            metadata: Map::new(),
        }
    }
}

/// Parse an ffprobe duration invocation's stdout into seconds.
pub(crate) fn parse_probe_duration(output: &Output) -> Option<f64> {
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: f64 = stdout.trim().parse().ok()?;
    if value.is_finite() && value > 0.0 {
        Some(value)
    } else {
        None
    }
}
