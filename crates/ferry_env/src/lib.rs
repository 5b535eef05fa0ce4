//! Ferry Environment
//!
//! Host facts the data pipeline sizes itself from: how many worker lanes
//! to create and how many records fit in a cache-friendly batch.

mod topology;

pub use topology::Topology;

/// Bytes per batch the host engine treats as one "chunk" when no cache
/// information is available.
pub const FALLBACK_CHUNK_BYTES: usize = 16 * 1024;
