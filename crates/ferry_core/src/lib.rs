//! Ferry Core
//!
//! Deferred, double-buffered instance data for job graphs:
//! - Job runtime adapter (dependency tokens over a worker pool)
//! - Deferred arrays and multi-lane append streams
//! - Access arbitration for shared containers
//! - Instance stores with per-frame consolidation
//! - Hierarchical cancellation (requests, progress, completion)
//! - Task graph registry, hardening and frame orchestration

/// Fail fast on a usage error in debug builds, or in any build with the
/// `checks` feature. Compiles to nothing otherwise; reserved for per-record
/// paths where an always-on check would cost too much.
macro_rules! usage_check {
    ($cond:expr, $($arg:tt)+) => {
        if cfg!(any(debug_assertions, feature = "checks")) && !($cond) {
            panic!($($arg)+);
        }
    };
}

pub mod access;
pub mod cancel;
pub mod collections;
pub mod config;
pub mod data;
pub mod error;
pub mod job;
pub mod task;

pub use access::{AccessController, AccessGuard, AccessType};
pub use cancel::{CancelCompleteReader, IdLookup, SignalStore, SignalWriter};
pub use collections::{AllocatorPolicy, ArrayOptions, DeferredArray, DeferredView, LaneStream};
pub use config::FerryConfig;
pub use data::{
    CancelBehaviour, ContextId, DataSource, Entity, InstanceData, InstanceId, InstanceReader,
    InstanceStore, InstanceUpdater, InstanceWriter, OwnerId, ProxyInstance, ResultsDestination,
    StoreProfile, UpdateContext, UpdateJob,
};
pub use error::{AccessError, CollectionError, DataError, FerryError, GraphError, JobError};
pub use job::{BatchStrategy, BulkScheduler, JobHandle, JobScheduler, ParallelJob};
pub use task::{JobConfigBuilder, JobId, OwnerKind, TaskGraph};

/// Result alias used across the crate.
pub type FerryResult<T> = Result<T, FerryError>;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
