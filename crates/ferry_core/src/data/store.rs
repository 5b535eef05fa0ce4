//! Instance data stores and the per-frame consolidation pipeline.

use super::handles::{InstanceReader, InstanceUpdater, InstanceWriter, ResultsDestination};
use super::ids::{ContextId, InstanceId, OwnerId, ProxyInstance};
use super::update::UpdateJob;
use crate::access::{AccessController, AccessType, Guarded};
use crate::cancel::IdLookup;
use crate::collections::{
    AllocatorPolicy, ArrayOptions, DeferredArray, LaneStream, LaneStreamWriter, LaneWriter,
};
use crate::error::{DataError, FerryError};
use crate::job::{JobHandle, JobScheduler, ParallelJob};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::trace;

/// Payload types a store can hold.
pub trait InstanceData: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> InstanceData for T {}

/// What a store contributes while its owner is being cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CancelBehaviour {
    /// Cancelled records are exposed for one frame and then dropped.
    #[default]
    Default,
    /// Cancelled records need explicit unwinding; the owner counts as
    /// having cancellable data and reports progress until done.
    Unwind,
}

/// Best-effort size and occupancy figures for inspection tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreProfile {
    pub name: String,
    pub type_name: &'static str,
    pub owner: OwnerId,
    pub pending_bytes_per_instance: usize,
    pub live_bytes_per_instance: usize,
    /// Records written since the last consolidation. Approximate while
    /// writers are active.
    pub pending: usize,
    pub live: usize,
    pub cancelled: usize,
}

impl StoreProfile {
    pub fn live_bytes(&self) -> usize {
        (self.live + self.cancelled) * self.live_bytes_per_instance
    }
}

/// Type-erased view of a store used by the task graph.
pub trait DataSource: Guarded {
    fn name(&self) -> &str;
    fn owner(&self) -> OwnerId;
    fn cancel_behaviour(&self) -> CancelBehaviour;
    fn consolidate_for_frame(&self, deps: &JobHandle, cancel: &IdLookup) -> Result<JobHandle, FerryError>;
    fn profile(&self) -> StoreProfile;
    fn dispose_async(&self, deps: &JobHandle) -> Result<JobHandle, FerryError>;
}

/// Double-buffered store of instance records.
///
/// Producers append to lane streams during a frame; once per frame
/// [`consolidate_for_frame`](Self::consolidate_for_frame) rebuilds the
/// readable snapshots from them, moving records whose identity is in the
/// cancel lookup into the cancelled snapshot.
pub struct InstanceStore<T: InstanceData> {
    name: String,
    owner: OwnerId,
    behaviour: CancelBehaviour,
    scheduler: JobScheduler,
    batch_size: usize,
    pending: LaneStream<ProxyInstance<T>>,
    pending_cancelled: LaneStream<ProxyInstance<T>>,
    active: DeferredArray<ProxyInstance<T>>,
    active_cancelled: DeferredArray<ProxyInstance<T>>,
    cancel: RwLock<IdLookup>,
    access: AccessController,
}

impl<T: InstanceData> InstanceStore<T> {
    pub fn new(
        name: impl Into<String>,
        owner: OwnerId,
        behaviour: CancelBehaviour,
        scheduler: &JobScheduler,
    ) -> Result<Self, FerryError> {
        let name = name.into();
        let config = scheduler.config();
        let lane_capacity = config.lane_capacity;
        let capacity = config.initial_capacity;
        Ok(Self {
            access: AccessController::new(name.clone()),
            name,
            owner,
            behaviour,
            scheduler: scheduler.clone(),
            batch_size: scheduler.batch_size_for::<ProxyInstance<T>>(),
            pending: LaneStream::for_scheduler(scheduler, lane_capacity),
            pending_cancelled: LaneStream::for_scheduler(scheduler, lane_capacity),
            active: DeferredArray::with_capacity(AllocatorPolicy::Persistent, capacity)?,
            active_cancelled: DeferredArray::with_capacity(AllocatorPolicy::Persistent, capacity)?,
            cancel: RwLock::new(IdLookup::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Cancel lookup this store was last consolidated against.
    pub fn cancel_lookup(&self) -> IdLookup {
        self.cancel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Schedule this frame's consolidation behind `deps`.
    ///
    /// Three sequential jobs under exclusive access: promote pending into
    /// the snapshot, partition the snapshot by `cancel` back into the
    /// pending streams, then rebuild both snapshots from those streams.
    pub fn consolidate_for_frame(&self, deps: &JobHandle, cancel: &IdLookup) -> Result<JobHandle, FerryError> {
        *self.cancel.write().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

        let gate = self.access.acquire_async(AccessType::ExclusiveWrite)?;
        let deps = JobHandle::combine(&[gate, deps.clone()]);
        trace!(store = %self.name, "scheduling consolidation");

        let (pending, active) = (self.pending.clone(), self.active.clone());
        let promoted = self
            .scheduler
            .schedule(format!("{}: promote pending", self.name), &deps, move || {
                active.clear();
                let count = pending.count();
                let mut slots = active.commit(count, ArrayOptions::UninitializedMemory)?;
                pending.copy_to(&mut slots)?;
                drop(slots);
                pending.clear()?;
                Ok::<(), FerryError>(())
            });

        let partition = PartitionJob {
            cancel: cancel.clone(),
            live: self.pending.as_writer(),
            cancelled: self.pending_cancelled.as_writer(),
            lanes: None,
        };
        let partitioned = self.scheduler.schedule_parallel_for(
            format!("{}: partition", self.name),
            self.active.as_deferred_view(),
            self.batch_size,
            &promoted,
            partition,
        );

        let (pending, pending_cancelled) = (self.pending.clone(), self.pending_cancelled.clone());
        let (active, active_cancelled) = (self.active.clone(), self.active_cancelled.clone());
        let done = self
            .scheduler
            .schedule(format!("{}: consolidate", self.name), &partitioned, move || {
                active.clear();
                active_cancelled.clear();

                let cancelled = pending_cancelled.count();
                let mut slots = active_cancelled.commit(cancelled, ArrayOptions::UninitializedMemory)?;
                pending_cancelled.copy_to(&mut slots)?;
                drop(slots);

                let live = pending.count();
                let mut slots = active.commit(live, ArrayOptions::UninitializedMemory)?;
                pending.copy_to(&mut slots)?;
                drop(slots);

                pending.clear()?;
                pending_cancelled.clear()?;
                Ok::<(), FerryError>(())
            });

        self.access.release_async(done.clone())?;
        Ok(done)
    }

    /// Read-only handle over the live snapshot.
    pub fn create_reader(&self) -> InstanceReader<T> {
        InstanceReader::new(self.active.as_deferred_view())
    }

    /// Read-only handle over the cancelled snapshot.
    pub fn create_cancelled_reader(&self) -> InstanceReader<T> {
        InstanceReader::new(self.active_cancelled.as_deferred_view())
    }

    /// Writer other stores' jobs complete records into.
    pub fn create_results_destination(&self) -> ResultsDestination<T> {
        ResultsDestination::new(self.name.clone(), self.pending.as_writer())
    }

    /// Writer for new records produced on behalf of `context`.
    pub fn create_writer(&self, context: ContextId) -> Result<InstanceWriter<T>, DataError> {
        let owner = context.owner().ok_or_else(|| DataError::UnsetContext {
            store: self.name.clone(),
        })?;
        Ok(InstanceWriter::new(self.name.clone(), owner, self.pending.as_writer()))
    }

    /// Reader over the live snapshot that can continue records into the
    /// next frame or add new ones on behalf of `context`.
    pub fn create_updater(&self, context: ContextId) -> Result<InstanceUpdater<T>, DataError> {
        self.updater_over(context, self.active.as_deferred_view())
    }

    /// Like [`create_updater`](Self::create_updater), over the cancelled
    /// snapshot. Continued records stay cancelled while the request does.
    pub fn create_cancelled_updater(&self, context: ContextId) -> Result<InstanceUpdater<T>, DataError> {
        self.updater_over(context, self.active_cancelled.as_deferred_view())
    }

    fn updater_over(
        &self,
        context: ContextId,
        source: crate::collections::DeferredView<ProxyInstance<T>>,
    ) -> Result<InstanceUpdater<T>, DataError> {
        let owner = context.owner().ok_or_else(|| DataError::UnsetContext {
            store: self.name.clone(),
        })?;
        Ok(InstanceUpdater::new(
            self.name.clone(),
            owner,
            source,
            self.pending.as_writer(),
            self.cancel_lookup(),
        ))
    }

    /// Parallel job over the live snapshot that runs `f` per record.
    pub fn update_job<R, F>(&self, f: F) -> UpdateJob<T, R, F>
    where
        R: InstanceData,
        F: Fn(&mut super::UpdateContext<T, R>, &ProxyInstance<T>) -> Result<(), FerryError>
            + Send
            + Sync
            + 'static,
    {
        let updater = InstanceUpdater::new(
            self.name.clone(),
            self.owner,
            self.active.as_deferred_view(),
            self.pending.as_writer(),
            self.cancel_lookup(),
        );
        UpdateJob::new(format!("{}: update", self.name), updater, self.batch_size, f)
    }

    /// Parallel job over the cancelled snapshot that runs `f` per record.
    pub fn cancel_job<R, F>(&self, f: F) -> UpdateJob<T, R, F>
    where
        R: InstanceData,
        F: Fn(&mut super::UpdateContext<T, R>, &ProxyInstance<T>) -> Result<(), FerryError>
            + Send
            + Sync
            + 'static,
    {
        let updater = InstanceUpdater::new(
            self.name.clone(),
            self.owner,
            self.active_cancelled.as_deferred_view(),
            self.pending.as_writer(),
            self.cancel_lookup(),
        );
        UpdateJob::new(format!("{}: cancel", self.name), updater, self.batch_size, f)
    }

    pub fn profile(&self) -> StoreProfile {
        let record = std::mem::size_of::<ProxyInstance<T>>();
        StoreProfile {
            name: self.name.clone(),
            type_name: std::any::type_name::<T>(),
            owner: self.owner,
            pending_bytes_per_instance: record,
            live_bytes_per_instance: record,
            pending: self.pending.count(),
            live: self.active.len(),
            cancelled: self.active_cancelled.len(),
        }
    }

    /// Request disposal and release all storage once `deps` and every
    /// outstanding access have finished.
    pub fn dispose_async(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let gate = self.access.acquire_async(AccessType::Disposal)?;
        let deps = JobHandle::combine(&[gate, deps.clone()]);
        let sched = &self.scheduler;
        let done = JobHandle::combine(&[
            self.pending.clone().dispose_async(sched, &deps),
            self.pending_cancelled.clone().dispose_async(sched, &deps),
            self.active.clone().dispose_async(sched, &deps),
            self.active_cancelled.clone().dispose_async(sched, &deps),
        ]);
        self.access.release_async(done.clone())?;
        Ok(done)
    }
}

impl<T: InstanceData> Guarded for InstanceStore<T> {
    fn access(&self) -> &AccessController {
        &self.access
    }
}

impl<T: InstanceData> DataSource for InstanceStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn owner(&self) -> OwnerId {
        self.owner
    }

    fn cancel_behaviour(&self) -> CancelBehaviour {
        self.behaviour
    }

    fn consolidate_for_frame(&self, deps: &JobHandle, cancel: &IdLookup) -> Result<JobHandle, FerryError> {
        InstanceStore::consolidate_for_frame(self, deps, cancel)
    }

    fn profile(&self) -> StoreProfile {
        InstanceStore::profile(self)
    }

    fn dispose_async(&self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        InstanceStore::dispose_async(self, deps)
    }
}

/// Splits the promoted snapshot back into live and cancelled lanes.
struct PartitionJob<T> {
    cancel: IdLookup,
    live: LaneStreamWriter<ProxyInstance<T>>,
    cancelled: LaneStreamWriter<ProxyInstance<T>>,
    lanes: Option<(LaneWriter<ProxyInstance<T>>, LaneWriter<ProxyInstance<T>>)>,
}

impl<T> Clone for PartitionJob<T> {
    fn clone(&self) -> Self {
        Self {
            cancel: self.cancel.clone(),
            live: self.live.clone(),
            cancelled: self.cancelled.clone(),
            lanes: None,
        }
    }
}

impl<T: InstanceData> ParallelJob<ProxyInstance<T>> for PartitionJob<T> {
    fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.lanes = Some((self.live.lane(lane)?, self.cancelled.lane(lane)?));
        Ok(())
    }

    fn execute(&mut self, _index: usize, record: &ProxyInstance<T>) -> Result<(), FerryError> {
        let (live, cancelled) = self
            .lanes
            .as_mut()
            .ok_or(DataError::NotBoundToLane { handle: "partition" })?;
        if self.cancel.contains(&record.id) {
            cancelled.write(*record);
        } else {
            live.write(*record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Entity;

    fn store(scheduler: &JobScheduler) -> InstanceStore<u32> {
        InstanceStore::new("counters", OwnerId::new(0), CancelBehaviour::Default, scheduler).unwrap()
    }

    fn write_from_main(store: &InstanceStore<u32>, scheduler: &JobScheduler, records: &[(u32, u32)]) {
        let mut writer = store.create_writer(ContextId::of(store.owner())).unwrap();
        writer.init_for_thread(scheduler.current_lane()).unwrap();
        for &(index, value) in records {
            writer.add(Entity::new(index, 0), value);
        }
    }

    #[test]
    fn unset_context_is_rejected() {
        let scheduler = JobScheduler::with_workers(1).unwrap();
        let store = store(&scheduler);
        assert!(matches!(
            store.create_writer(ContextId::UNSET),
            Err(DataError::UnsetContext { .. })
        ));
        assert!(store.create_updater(ContextId::UNSET).is_err());
    }

    #[test]
    fn consolidation_promotes_and_partitions() {
        let scheduler = JobScheduler::with_workers(2).unwrap();
        let store = store(&scheduler);
        write_from_main(&store, &scheduler, &[(1, 10), (2, 20), (3, 30)]);

        let cancel: IdLookup = [InstanceId::new(Entity::new(2, 0), store.owner())]
            .into_iter()
            .collect();
        store
            .consolidate_for_frame(&JobHandle::completed(), &cancel)
            .unwrap()
            .wait()
            .unwrap();

        let mut live: Vec<u32> = store.create_reader().read().iter().map(|r| r.data).collect();
        live.sort_unstable();
        assert_eq!(live, vec![10, 30]);
        let cancelled: Vec<u32> = store
            .create_cancelled_reader()
            .read()
            .iter()
            .map(|r| r.data)
            .collect();
        assert_eq!(cancelled, vec![20]);

        let profile = store.profile();
        assert_eq!(profile.pending, 0);
        assert_eq!((profile.live, profile.cancelled), (2, 1));
        assert_eq!(profile.live_bytes(), 3 * std::mem::size_of::<ProxyInstance<u32>>());
    }

    #[test]
    fn records_not_continued_are_dropped() {
        let scheduler = JobScheduler::with_workers(1).unwrap();
        let store = store(&scheduler);
        write_from_main(&store, &scheduler, &[(1, 1)]);
        let none = IdLookup::new();
        store.consolidate_for_frame(&JobHandle::completed(), &none).unwrap();
        let second = store
            .consolidate_for_frame(&JobHandle::completed(), &none)
            .unwrap();
        second.wait().unwrap();
        assert!(store.create_reader().is_empty());
    }

    #[test]
    fn disposed_store_refuses_consolidation() {
        let scheduler = JobScheduler::with_workers(1).unwrap();
        let store = store(&scheduler);
        store.dispose_async(&JobHandle::completed()).unwrap().wait().unwrap();
        let err = store
            .consolidate_for_frame(&JobHandle::completed(), &IdLookup::new())
            .unwrap_err();
        assert!(matches!(err, FerryError::Access(crate::AccessError::Disposed { .. })));
    }
}
