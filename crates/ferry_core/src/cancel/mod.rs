//! Hierarchical cancellation: requests, progress and completion signals,
//! plus the flow that turns one into the other.

mod flow;
mod signal;

pub use flow::{CancelProgressFlow, FlowNode, FlowNodeKind};
pub use signal::{CancelCompleteReader, IdLookup, SignalStore, SignalWriter};

use crate::access::{AccessType, Guarded};
use crate::error::FerryError;
use crate::job::{BulkScheduler, JobHandle, JobScheduler};
use std::sync::Arc;

/// The three signal stores shared by every owner of a graph.
pub struct CancelSignals {
    requests: Arc<SignalStore>,
    progress: Arc<SignalStore>,
    complete: Arc<SignalStore>,
}

impl CancelSignals {
    pub fn new(scheduler: &JobScheduler) -> Result<Self, FerryError> {
        Ok(Self {
            requests: Arc::new(SignalStore::new("cancel requests", scheduler)?),
            progress: Arc::new(SignalStore::new("cancel progress", scheduler)?),
            complete: Arc::new(SignalStore::new("cancel complete", scheduler)?),
        })
    }

    pub fn requests(&self) -> &Arc<SignalStore> {
        &self.requests
    }

    pub fn progress(&self) -> &Arc<SignalStore> {
        &self.progress
    }

    pub fn complete(&self) -> &Arc<SignalStore> {
        &self.complete
    }

    /// Lookup every store partitions against this frame.
    pub fn request_lookup(&self) -> IdLookup {
        self.requests.lookup()
    }

    pub fn complete_reader(&self) -> CancelCompleteReader {
        CancelCompleteReader::new(self.complete.lookup())
    }

    /// Make requests and progress written since the last frame visible.
    pub fn consolidate_incoming(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let requests = self.requests.consolidate(deps)?;
        let progress = self.progress.consolidate(deps)?;
        Ok(JobHandle::combine(&[requests, progress]))
    }

    /// Run every flow under one set of accesses.
    pub fn schedule_flows(
        &self,
        scheduler: &JobScheduler,
        flows: &mut BulkScheduler<CancelProgressFlow>,
        deps: &JobHandle,
    ) -> Result<JobHandle, FerryError> {
        if flows.is_empty() {
            return Ok(deps.clone());
        }
        let gates = [
            deps.clone(),
            self.requests.access().acquire_async(AccessType::SharedWrite)?,
            self.progress.access().acquire_async(AccessType::SharedRead)?,
            self.complete.access().acquire_async(AccessType::SharedWrite)?,
        ];
        let gate = JobHandle::combine(&gates);
        let done = flows.schedule(&gate, |flow, deps| flow.schedule(scheduler, self, deps));
        // Release even when scheduling failed so the stores stay usable.
        let token = done.as_ref().map_or_else(|_| gate.clone(), Clone::clone);
        self.requests.access().release_async(token.clone())?;
        self.progress.access().release_async(token.clone())?;
        self.complete.access().release_async(token)?;
        done
    }

    /// Make completions written this frame visible to the next one.
    pub fn consolidate_complete(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        self.complete.consolidate(deps)
    }

    pub fn dispose_async(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        Ok(JobHandle::combine(&[
            self.requests.dispose_async(deps)?,
            self.progress.dispose_async(deps)?,
            self.complete.dispose_async(deps)?,
        ]))
    }
}
