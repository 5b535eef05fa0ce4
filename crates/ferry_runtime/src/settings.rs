use anyhow::{Context, Result};
use ferry_core::FerryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for the demo frame loop, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Frames to simulate.
    pub frames: u32,
    /// `tracing` filter directive, e.g. `info,ferry_core=debug`.
    pub log_filter: String,
    /// Couriers spawned on the first frame.
    pub entities: u32,
    /// Cancel one courier every this many frames; 0 disables cancelling.
    pub cancel_every: u32,
    pub ferry: FerryConfig,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            frames: 120,
            log_filter: "info".to_string(),
            entities: 1024,
            cancel_every: 10,
            ferry: FerryConfig::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
