//! Job runtime adapter: dependency tokens, the worker pool and batching.

mod batch;
mod bulk;
mod handle;
mod scheduler;

pub use batch::BatchStrategy;
pub use bulk::BulkScheduler;
pub use handle::JobHandle;
pub use scheduler::JobScheduler;

use crate::error::FerryError;

/// Per-element work run by [`JobScheduler::schedule_parallel_for`].
///
/// The scheduler clones the job once per batch and calls
/// `init_for_thread` with the executing worker's lane before the first
/// `execute`. Writers that append to lane streams bind there.
pub trait ParallelJob<T>: Clone + Send + Sync + 'static {
    fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        let _ = lane;
        Ok(())
    }

    fn execute(&mut self, index: usize, item: &T) -> Result<(), FerryError>;
}
