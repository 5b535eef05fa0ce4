//! Per-record update jobs over a store snapshot.

use super::handles::{InstanceUpdater, ResultsDestination};
use super::ids::{Entity, InstanceId, ProxyInstance};
use super::{InstanceData, InstanceStore};
use crate::cancel::{IdLookup, SignalWriter};
use crate::error::{DataError, FerryError};
use crate::job::{JobHandle, JobScheduler, ParallelJob};
use std::sync::Arc;

/// What an update closure may do with the record it is handed.
pub struct UpdateContext<T, R> {
    updater: InstanceUpdater<T>,
    results: Option<ResultsDestination<R>>,
    progress: Option<SignalWriter>,
}

impl<T, R> Clone for UpdateContext<T, R> {
    fn clone(&self) -> Self {
        Self {
            updater: self.updater.clone(),
            results: self.results.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<T: InstanceData, R: InstanceData> UpdateContext<T, R> {
    fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.updater.init_for_thread(lane)?;
        if let Some(results) = self.results.as_mut() {
            results.init_for_thread(lane)?;
        }
        if let Some(progress) = self.progress.as_mut() {
            progress.init_for_thread(lane)?;
        }
        Ok(())
    }

    /// Keep the record for another frame.
    pub fn continue_with(&mut self, instance: ProxyInstance<T>) {
        self.updater.continue_with(instance);
    }

    /// Start a new record in the same store.
    pub fn add(&mut self, entity: Entity, data: T) {
        self.updater.add(entity, data);
    }

    pub fn is_cancel_requested(&self, id: &InstanceId) -> bool {
        self.updater.is_cancel_requested(id)
    }

    /// Hand `result` to the results destination and let the record drop.
    pub fn complete(&mut self, id: InstanceId, result: R) -> Result<(), FerryError> {
        let results = self.results.as_mut().ok_or_else(|| DataError::MissingDestination {
            store: self.updater.store().to_string(),
        })?;
        results.write(id, result);
        Ok(())
    }

    /// Mark the cancellation of `id` as still unwinding this frame, on
    /// behalf of the owner running the job.
    pub fn report_cancel_progress(&mut self, id: InstanceId) -> Result<(), FerryError> {
        let progress = self
            .progress
            .as_mut()
            .ok_or_else(|| DataError::MissingProgressWriter {
                store: self.updater.store().to_string(),
            })?;
        progress.signal(id.for_owner(self.updater.owner()));
        Ok(())
    }
}

/// Parallel job running a closure over every record of one snapshot.
///
/// ```ignore
/// timers
///     .update_job(|ctx, timer| {
///         if timer.data.remaining == 0 {
///             ctx.complete(timer.id, Expired)
///         } else {
///             ctx.continue_with(timer.with_data(timer.data.tick()));
///             Ok(())
///         }
///     })
///     .complete_into(&expired)
///     .schedule(&scheduler, &deps);
/// ```
pub struct UpdateJob<T, R, F> {
    name: String,
    context: UpdateContext<T, R>,
    batch_size: usize,
    f: Arc<F>,
}

impl<T, R, F> Clone for UpdateJob<T, R, F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            context: self.context.clone(),
            batch_size: self.batch_size,
            f: Arc::clone(&self.f),
        }
    }
}

impl<T, R, F> UpdateJob<T, R, F>
where
    T: InstanceData,
    R: InstanceData,
    F: Fn(&mut UpdateContext<T, R>, &ProxyInstance<T>) -> Result<(), FerryError> + Send + Sync + 'static,
{
    pub(crate) fn new(name: String, updater: InstanceUpdater<T>, batch_size: usize, f: F) -> Self {
        Self {
            name,
            context: UpdateContext {
                updater,
                results: None,
                progress: None,
            },
            batch_size,
            f: Arc::new(f),
        }
    }

    /// Route [`UpdateContext::complete`] into `destination`'s pending stream.
    pub fn complete_into(mut self, destination: &InstanceStore<R>) -> Self {
        self.context.results = Some(destination.create_results_destination());
        self
    }

    /// Route [`UpdateContext::report_cancel_progress`] into `progress`.
    pub fn report_progress_to(mut self, progress: SignalWriter) -> Self {
        self.context.progress = Some(progress);
        self
    }

    /// Check cancellation against `cancel` instead of the lookup the store
    /// was last consolidated against.
    pub fn watching(mut self, cancel: IdLookup) -> Self {
        self.context.updater.set_cancel_lookup(cancel);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn schedule(self, scheduler: &JobScheduler, deps: &JobHandle) -> JobHandle {
        let source = self.context.updater.source();
        let name = self.name.clone();
        let batch = self.batch_size;
        scheduler.schedule_parallel_for(name, source, batch, deps, self)
    }
}

impl<T, R, F> ParallelJob<ProxyInstance<T>> for UpdateJob<T, R, F>
where
    T: InstanceData,
    R: InstanceData,
    F: Fn(&mut UpdateContext<T, R>, &ProxyInstance<T>) -> Result<(), FerryError> + Send + Sync + 'static,
{
    fn init_for_thread(&mut self, lane: usize) -> Result<(), FerryError> {
        self.context.init_for_thread(lane)
    }

    fn execute(&mut self, _index: usize, item: &ProxyInstance<T>) -> Result<(), FerryError> {
        (*self.f)(&mut self.context, item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CancelBehaviour, ContextId, OwnerId};

    fn seeded(scheduler: &JobScheduler, values: &[u32]) -> InstanceStore<u32> {
        let store =
            InstanceStore::new("ticks", OwnerId::new(0), CancelBehaviour::Default, scheduler).unwrap();
        {
            let mut writer = store.create_writer(ContextId::of(store.owner())).unwrap();
            writer.init_for_thread(scheduler.current_lane()).unwrap();
            for (i, v) in values.iter().enumerate() {
                writer.add(Entity::new(i as u32, 0), *v);
            }
        }
        store
            .consolidate_for_frame(&JobHandle::completed(), &IdLookup::new())
            .unwrap()
            .wait()
            .unwrap();
        store
    }

    #[test]
    fn records_are_continued_or_completed() {
        let scheduler = JobScheduler::with_workers(2).unwrap();
        let ticks = seeded(&scheduler, &[1, 2, 3]);
        let done =
            InstanceStore::<u32>::new("done", OwnerId::new(1), CancelBehaviour::Default, &scheduler)
                .unwrap();

        ticks
            .update_job::<u32, _>(|ctx, rec| {
                if rec.data == 1 {
                    ctx.complete(rec.id, 100)
                } else {
                    ctx.continue_with(rec.with_data(rec.data - 1));
                    Ok(())
                }
            })
            .complete_into(&done)
            .schedule(&scheduler, &JobHandle::completed())
            .wait()
            .unwrap();

        let none = IdLookup::new();
        let a = ticks.consolidate_for_frame(&JobHandle::completed(), &none).unwrap();
        let b = done.consolidate_for_frame(&JobHandle::completed(), &none).unwrap();
        JobHandle::combine(&[a, b]).wait().unwrap();

        let mut left: Vec<u32> = ticks.create_reader().read().iter().map(|r| r.data).collect();
        left.sort_unstable();
        assert_eq!(left, vec![1, 2]);
        let finished: Vec<_> = done.create_reader().read().iter().map(|r| (r.id.entity.index(), r.data)).collect();
        assert_eq!(finished, vec![(0, 100)]);
    }

    #[test]
    fn completing_without_destination_fails_the_job() {
        let scheduler = JobScheduler::with_workers(1).unwrap();
        let ticks = seeded(&scheduler, &[1]);
        let outcome = ticks
            .update_job::<u32, _>(|ctx, rec| ctx.complete(rec.id, 0))
            .schedule(&scheduler, &JobHandle::completed())
            .wait();
        match outcome {
            Err(crate::JobError::Failed { message, .. }) => assert!(message.contains("without a results destination")),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
