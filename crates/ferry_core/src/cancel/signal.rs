//! Keyed signal stores: the building block for cancel requests, cancel
//! progress and cancel completion.

use crate::access::{AccessController, AccessType, Guarded};
use crate::collections::{
    AllocatorPolicy, ArrayOptions, DeferredArray, DeferredView, LaneStream, LaneStreamWriter,
    LaneWriter,
};
use crate::data::{Entity, InstanceId, OwnerId};
use crate::error::FerryError;
use crate::job::{JobHandle, JobScheduler};
use dashmap::DashSet;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::trace;

/// Concurrent set of instance ids with O(1) membership tests.
#[derive(Clone, Default)]
pub struct IdLookup {
    keys: Arc<DashSet<InstanceId>>,
}

impl IdLookup {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn contains(&self, id: &InstanceId) -> bool {
        self.keys.contains(id)
    }

    pub fn insert(&self, id: InstanceId) -> bool {
        self.keys.insert(id)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&self) {
        self.keys.clear();
    }

    /// Keys whose owner is `owner`.
    pub fn keys_for_owner(&self, owner: OwnerId) -> Vec<InstanceId> {
        self.keys
            .iter()
            .filter(|key| key.owner == owner)
            .map(|key| *key)
            .collect()
    }

    /// Every key, sorted.
    pub fn snapshot(&self) -> Vec<InstanceId> {
        let mut keys: Vec<InstanceId> = self.keys.iter().map(|key| *key).collect();
        keys.sort_unstable();
        keys
    }

    fn rebuild(&self, keys: &[InstanceId]) {
        self.keys.clear();
        let mut set: &DashSet<InstanceId> = &self.keys;
        set.par_extend(keys.par_iter().copied());
    }
}

impl FromIterator<InstanceId> for IdLookup {
    fn from_iter<I: IntoIterator<Item = InstanceId>>(iter: I) -> Self {
        let lookup = IdLookup::new();
        for id in iter {
            lookup.insert(id);
        }
        lookup
    }
}

impl std::fmt::Debug for IdLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.snapshot()).finish()
    }
}

/// A double-buffered stream of instance ids.
///
/// Signals written during a frame land in lane streams; consolidation turns
/// them into a snapshot plus an [`IdLookup`] that stays valid until the
/// next consolidation. Duplicates collapse in the lookup.
pub struct SignalStore {
    name: String,
    scheduler: JobScheduler,
    pending: LaneStream<InstanceId>,
    active: DeferredArray<InstanceId>,
    lookup: IdLookup,
    access: AccessController,
}

impl SignalStore {
    pub fn new(name: impl Into<String>, scheduler: &JobScheduler) -> Result<Self, FerryError> {
        let name = name.into();
        let config = scheduler.config();
        Ok(Self {
            access: AccessController::new(name.clone()),
            name,
            scheduler: scheduler.clone(),
            pending: LaneStream::for_scheduler(scheduler, config.lane_capacity),
            active: DeferredArray::with_capacity(AllocatorPolicy::Persistent, config.initial_capacity)?,
            lookup: IdLookup::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lane-bound writer for jobs.
    pub fn writer(&self) -> SignalWriter {
        SignalWriter {
            stream: self.pending.as_writer(),
            lane: None,
        }
    }

    /// Lookup over the signals visible since the last consolidation.
    pub fn lookup(&self) -> IdLookup {
        self.lookup.clone()
    }

    /// Snapshot of the signals visible since the last consolidation.
    pub fn active(&self) -> DeferredView<InstanceId> {
        self.active.as_deferred_view()
    }

    /// Write signals from the calling thread, outside any job. Waits for
    /// conflicting work on this store to finish first. Concurrent callers
    /// outside the pool take turns on the shared lane.
    pub fn signal_now<I>(&self, ids: I) -> Result<(), FerryError>
    where
        I: IntoIterator<Item = InstanceId>,
    {
        let _guard = self.access.acquire_with_handle(AccessType::SharedWrite)?;
        let mut writer = self.writer();
        writer.init_for_thread(self.scheduler.current_lane())?;
        for id in ids {
            writer.signal(id);
        }
        Ok(())
    }

    /// Rebuild the snapshot and lookup from this frame's signals.
    pub fn consolidate(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let gate = self.access.acquire_async(AccessType::ExclusiveWrite)?;
        let deps = JobHandle::combine(&[gate, deps.clone()]);

        let pending = self.pending.clone();
        let active = self.active.clone();
        let lookup = self.lookup.clone();
        let name = self.name.clone();
        let done = self
            .scheduler
            .schedule(format!("{}: consolidate", self.name), &deps, move || {
                active.clear();
                let count = pending.count();
                let mut slots = active.commit(count, ArrayOptions::UninitializedMemory)?;
                pending.copy_to(&mut slots)?;
                lookup.rebuild(&slots);
                drop(slots);
                pending.clear()?;
                trace!(signals = %name, count, "signals consolidated");
                Ok::<(), FerryError>(())
            });

        self.access.release_async(done.clone())?;
        Ok(done)
    }

    pub fn dispose_async(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let gate = self.access.acquire_async(AccessType::Disposal)?;
        let deps = JobHandle::combine(&[gate, deps.clone()]);
        let done = JobHandle::combine(&[
            self.pending.clone().dispose_async(&self.scheduler, &deps),
            self.active.clone().dispose_async(&self.scheduler, &deps),
        ]);
        self.access.release_async(done.clone())?;
        Ok(done)
    }
}

impl Guarded for SignalStore {
    fn access(&self) -> &AccessController {
        &self.access
    }
}

/// Appends signals from one lane.
pub struct SignalWriter {
    stream: LaneStreamWriter<InstanceId>,
    lane: Option<LaneWriter<InstanceId>>,
}

impl Clone for SignalWriter {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
            lane: None,
        }
    }
}

impl SignalWriter {
    pub fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.lane = Some(self.stream.lane(lane)?);
        Ok(())
    }

    #[inline]
    pub fn signal(&mut self, id: InstanceId) {
        usage_check!(self.lane.is_some(), "signal writer used before init_for_thread");
        if let Some(lane) = self.lane.as_mut() {
            lane.write(id);
        }
    }
}

/// Read side of cancel completion for jobs and the main thread.
#[derive(Clone, Debug)]
pub struct CancelCompleteReader {
    lookup: IdLookup,
}

impl CancelCompleteReader {
    pub(crate) fn new(lookup: IdLookup) -> Self {
        Self { lookup }
    }

    /// Whether cancelling `entity` under `owner` finished in the previous
    /// frame.
    pub fn is_complete(&self, owner: OwnerId, entity: Entity) -> bool {
        self.lookup.contains(&InstanceId::new(entity, owner))
    }

    /// Entities whose cancellation under `owner` finished in the previous
    /// frame.
    pub fn completed_for(&self, owner: OwnerId) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .lookup
            .keys_for_owner(owner)
            .into_iter()
            .map(|key| key.entity)
            .collect();
        entities.sort_unstable();
        entities
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}
