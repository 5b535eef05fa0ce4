//! Runtime configuration for the scheduler and the stores it creates.

use crate::job::BatchStrategy;
use serde::{Deserialize, Serialize};

/// Settings shared by every store and job created through one scheduler.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config: FerryConfig = serde_json::from_str(r#"{ "worker_threads": 4 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FerryConfig {
    /// Worker threads in the pool. `None` sizes the pool from the host.
    pub worker_threads: Option<usize>,
    /// Initial capacity reserved per lane in every pending stream.
    pub lane_capacity: usize,
    /// Initial capacity reserved for active snapshots.
    pub initial_capacity: usize,
    /// How parallel jobs over snapshots are split into batches.
    pub batch_strategy: BatchStrategy,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            worker_threads: None,
            lane_capacity: 64,
            initial_capacity: 256,
            batch_strategy: BatchStrategy::MaximizeChunk,
            thread_name_prefix: "ferry-worker".to_string(),
        }
    }
}

impl FerryConfig {
    /// Worker count after falling back to the detected host topology.
    pub fn resolved_worker_threads(&self) -> usize {
        self.worker_threads
            .filter(|&n| n > 0)
            .unwrap_or_else(|| ferry_env::Topology::detect().default_worker_threads())
    }

    /// Convenience for tests and tools that pin the pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }
}
