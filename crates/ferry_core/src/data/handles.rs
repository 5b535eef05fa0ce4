//! Job-time handles handed out by [`InstanceStore`](super::InstanceStore).
//!
//! Writers are lane-bound: clone one into a job, call `init_for_thread`
//! with the executing worker's lane, then write. Clones start unbound.

use super::ids::{Entity, InstanceId, OwnerId, ProxyInstance};
use super::InstanceData;
use crate::cancel::IdLookup;
use crate::collections::{DeferredSlice, DeferredView, LaneStreamWriter, LaneWriter};
use crate::error::FerryError;

/// Read-only access to one snapshot of a store.
pub struct InstanceReader<T> {
    view: DeferredView<ProxyInstance<T>>,
}

impl<T> Clone for InstanceReader<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
        }
    }
}

impl<T: InstanceData> InstanceReader<T> {
    pub(crate) fn new(view: DeferredView<ProxyInstance<T>>) -> Self {
        Self { view }
    }

    pub fn read(&self) -> DeferredSlice<'_, ProxyInstance<T>> {
        self.view.read()
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// The underlying view, for scheduling parallel jobs over it.
    pub fn view(&self) -> DeferredView<ProxyInstance<T>> {
        self.view.clone()
    }
}

/// Appends new records on behalf of one owner.
pub struct InstanceWriter<T> {
    store: String,
    owner: OwnerId,
    stream: LaneStreamWriter<ProxyInstance<T>>,
    lane: Option<LaneWriter<ProxyInstance<T>>>,
}

impl<T> Clone for InstanceWriter<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            owner: self.owner,
            stream: self.stream.clone(),
            lane: None,
        }
    }
}

impl<T: InstanceData> InstanceWriter<T> {
    pub(crate) fn new(store: String, owner: OwnerId, stream: LaneStreamWriter<ProxyInstance<T>>) -> Self {
        Self {
            store,
            owner,
            stream,
            lane: None,
        }
    }

    pub fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.lane = Some(self.stream.lane(lane)?);
        Ok(())
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    /// Append a record for `entity`. Visible after the next consolidation.
    #[inline]
    pub fn add(&mut self, entity: Entity, data: T) {
        usage_check!(
            self.lane.is_some(),
            "writer for '{}' used before init_for_thread",
            self.store
        );
        if let Some(lane) = self.lane.as_mut() {
            lane.write(ProxyInstance::new(InstanceId::new(entity, self.owner), data));
        }
    }
}

/// Destination other stores' jobs complete records into. Records keep the
/// identity of the record they complete.
pub struct ResultsDestination<T> {
    store: String,
    stream: LaneStreamWriter<ProxyInstance<T>>,
    lane: Option<LaneWriter<ProxyInstance<T>>>,
}

impl<T> Clone for ResultsDestination<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            stream: self.stream.clone(),
            lane: None,
        }
    }
}

impl<T: InstanceData> ResultsDestination<T> {
    pub(crate) fn new(store: String, stream: LaneStreamWriter<ProxyInstance<T>>) -> Self {
        Self {
            store,
            stream,
            lane: None,
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.lane = Some(self.stream.lane(lane)?);
        Ok(())
    }

    #[inline]
    pub fn write(&mut self, id: InstanceId, data: T) {
        usage_check!(
            self.lane.is_some(),
            "results destination '{}' used before init_for_thread",
            self.store
        );
        if let Some(lane) = self.lane.as_mut() {
            lane.write(ProxyInstance::new(id, data));
        }
    }
}

/// Reads one snapshot and writes back into the same store's pending stream.
pub struct InstanceUpdater<T> {
    store: String,
    owner: OwnerId,
    source: DeferredView<ProxyInstance<T>>,
    stream: LaneStreamWriter<ProxyInstance<T>>,
    lane: Option<LaneWriter<ProxyInstance<T>>>,
    cancel: IdLookup,
}

impl<T> Clone for InstanceUpdater<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            owner: self.owner,
            source: self.source.clone(),
            stream: self.stream.clone(),
            lane: None,
            cancel: self.cancel.clone(),
        }
    }
}

impl<T: InstanceData> InstanceUpdater<T> {
    pub(crate) fn new(
        store: String,
        owner: OwnerId,
        source: DeferredView<ProxyInstance<T>>,
        stream: LaneStreamWriter<ProxyInstance<T>>,
        cancel: IdLookup,
    ) -> Self {
        Self {
            store,
            owner,
            source,
            stream,
            lane: None,
            cancel,
        }
    }

    pub fn store(&self) -> &str {
        &self.store
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.lane = Some(self.stream.lane(lane)?);
        Ok(())
    }

    /// Snapshot this updater reads from.
    pub fn source(&self) -> DeferredView<ProxyInstance<T>> {
        self.source.clone()
    }

    /// Keep `instance` alive for another frame.
    #[inline]
    pub fn continue_with(&mut self, instance: ProxyInstance<T>) {
        usage_check!(
            self.lane.is_some(),
            "updater for '{}' used before init_for_thread",
            self.store
        );
        if let Some(lane) = self.lane.as_mut() {
            lane.write(instance);
        }
    }

    /// Append a new record on behalf of this updater's owner.
    #[inline]
    pub fn add(&mut self, entity: Entity, data: T) {
        self.continue_with(ProxyInstance::new(InstanceId::new(entity, self.owner), data));
    }

    /// Whether a cancel request for `id` was visible at the last
    /// consolidation.
    pub fn is_cancel_requested(&self, id: &InstanceId) -> bool {
        self.cancel.contains(id)
    }

    pub(crate) fn set_cancel_lookup(&mut self, cancel: IdLookup) {
        self.cancel = cancel;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::LaneStream;
    use crate::error::CollectionError;

    #[test]
    fn clones_start_unbound() {
        let stream = LaneStream::<ProxyInstance<u8>>::with_lanes(2, 0);
        let mut writer = InstanceWriter::new("s".into(), OwnerId::new(1), stream.as_writer());
        writer.init_for_thread(0).unwrap();
        let mut copy = writer.clone();
        assert_eq!(
            copy.init_for_thread(0).unwrap_err(),
            FerryError::Collection(CollectionError::LaneBusy { lane: 0 })
        );
        copy.init_for_thread(1).unwrap();
        writer.add(Entity::new(1, 0), 5);
        copy.add(Entity::new(2, 0), 6);
        drop((writer, copy));
        assert_eq!(stream.count(), 2);
    }

    #[cfg(any(debug_assertions, feature = "checks"))]
    #[test]
    #[should_panic(expected = "before init_for_thread")]
    fn writing_unbound_fails_fast() {
        let stream = LaneStream::<ProxyInstance<u8>>::with_lanes(1, 0);
        let mut writer = InstanceWriter::new("s".into(), OwnerId::new(1), stream.as_writer());
        writer.add(Entity::new(1, 0), 5);
    }

    #[test]
    fn results_keep_the_completed_identity() {
        let stream = LaneStream::<ProxyInstance<u16>>::with_lanes(1, 0);
        let mut dest = ResultsDestination::new("done".into(), stream.as_writer());
        dest.init_for_thread(0).unwrap();
        let id = InstanceId::new(Entity::new(9, 1), OwnerId::new(3));
        dest.write(id, 42);
        drop(dest);
        let mut out = vec![ProxyInstance::default(); 1];
        stream.copy_to(&mut out).unwrap();
        assert_eq!(out[0], ProxyInstance::new(id, 42));
    }
}
