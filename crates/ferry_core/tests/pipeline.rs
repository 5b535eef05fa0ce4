//! Containers, access arbitration and store consolidation exercised through
//! the public API on a real worker pool.

use ferry_core::access::Guarded;
use ferry_core::{
    AccessController, AccessError, AccessType, AllocatorPolicy, ArrayOptions, BatchStrategy,
    CancelBehaviour, CollectionError, ContextId, DeferredArray, Entity, FerryConfig, FerryError,
    IdLookup, InstanceId, InstanceStore, JobHandle, JobScheduler, LaneStream, OwnerId, ParallelJob,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const OWNER: OwnerId = OwnerId::new(0);

fn scheduler() -> JobScheduler {
    JobScheduler::with_workers(4).unwrap()
}

fn id(entity: u32) -> InstanceId {
    InstanceId::new(Entity::new(entity, 0), OWNER)
}

fn store(scheduler: &JobScheduler) -> InstanceStore<u32> {
    InstanceStore::new("records", OWNER, CancelBehaviour::Default, scheduler).unwrap()
}

fn consolidate(store: &InstanceStore<u32>, cancel: &IdLookup) {
    store
        .consolidate_for_frame(&JobHandle::completed(), cancel)
        .unwrap()
        .wait()
        .unwrap();
}

fn live(store: &InstanceStore<u32>) -> Vec<(u32, u32)> {
    let mut records: Vec<_> = store
        .create_reader()
        .read()
        .iter()
        .map(|r| (r.id.entity.index(), r.data))
        .collect();
    records.sort_unstable();
    records
}

fn cancelled(store: &InstanceStore<u32>) -> Vec<(u32, u32)> {
    let mut records: Vec<_> = store
        .create_cancelled_reader()
        .read()
        .iter()
        .map(|r| (r.id.entity.index(), r.data))
        .collect();
    records.sort_unstable();
    records
}

#[test]
fn concurrent_lane_writes_are_all_kept() {
    let scheduler = scheduler();
    let stream: LaneStream<u32> = LaneStream::for_scheduler(&scheduler, 8);

    let handles: Vec<JobHandle> = (0..16u32)
        .map(|job| {
            let writer = stream.as_writer();
            let lanes = scheduler.clone();
            scheduler.schedule(format!("writer {job}"), &JobHandle::completed(), move || {
                let mut lane = writer.lane(lanes.current_lane())?;
                for i in 0..250 {
                    lane.write(job * 1000 + i);
                }
                Ok::<(), FerryError>(())
            })
        })
        .collect();
    JobHandle::combine(&handles).wait().unwrap();

    assert_eq!(stream.count(), 4000);
    let mut out = vec![0; 4000];
    assert_eq!(stream.copy_to(&mut out).unwrap(), 4000);
    out.sort_unstable();
    out.dedup();
    assert_eq!(out.len(), 4000);

    let mut short = vec![0; 10];
    assert_eq!(
        stream.copy_to(&mut short),
        Err(CollectionError::DestinationTooSmall {
            needed: 4000,
            available: 10
        })
    );
}

#[test]
fn deferred_view_sees_the_committed_array() {
    let array = DeferredArray::<u32>::new(AllocatorPolicy::Persistent).unwrap();
    let view = array.as_deferred_view();
    assert_eq!(view.len(), 0);

    {
        let mut slots = array.commit(5, ArrayOptions::ClearMemory).unwrap();
        slots.copy_from_slice(&[1, 2, 3, 4, 5]);
    }
    assert_eq!(view.len(), 5);
    assert_eq!(&*view.read(), &[1, 2, 3, 4, 5]);
    assert!(view.same_array(&array));
    assert_eq!(
        array.commit(1, ArrayOptions::ClearMemory).err(),
        Some(CollectionError::AlreadyCreated)
    );
}

#[derive(Clone)]
struct Sum(Arc<AtomicUsize>);

impl ParallelJob<u32> for Sum {
    fn execute(&mut self, _index: usize, item: &u32) -> Result<(), FerryError> {
        self.0.fetch_add(*item as usize, Ordering::Relaxed);
        Ok(())
    }
}

#[test]
fn parallel_for_reads_length_when_it_starts() {
    let scheduler = scheduler();
    let array = DeferredArray::<u32>::new(AllocatorPolicy::Persistent).unwrap();
    let total = Arc::new(AtomicUsize::new(0));

    let producer = {
        let array = array.clone();
        scheduler.schedule("produce", &JobHandle::completed(), move || {
            let mut slots = array.commit(1000, ArrayOptions::ClearMemory)?;
            slots.iter_mut().for_each(|slot| *slot = 1);
            Ok::<(), FerryError>(())
        })
    };
    let consumer = scheduler.schedule_parallel_for(
        "consume",
        array.as_deferred_view(),
        64,
        &producer,
        Sum(total.clone()),
    );
    consumer.wait().unwrap();
    assert_eq!(total.load(Ordering::Relaxed), 1000);
}

#[test]
fn shared_access_overlaps_and_exclusive_waits() {
    let scheduler = scheduler();
    let controller = AccessController::new("shared");

    let first = controller.acquire_async(AccessType::SharedRead).unwrap();
    let second = controller.acquire_async(AccessType::SharedRead).unwrap();
    assert!(matches!(
        controller.acquire_async(AccessType::ExclusiveWrite),
        Err(AccessError::Conflict { .. })
    ));

    let running = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));
    for gate in [first, second] {
        let (running, finished) = (running.clone(), finished.clone());
        let done = scheduler.schedule("reader", &gate, move || {
            running.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            running.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
            Ok::<(), FerryError>(())
        });
        controller.release_async(done).unwrap();
    }

    let gate = controller.acquire_async(AccessType::ExclusiveWrite).unwrap();
    let (seen_running, seen_finished) = (running.clone(), finished.clone());
    let writer = scheduler.schedule("writer", &gate, move || {
        if seen_running.load(Ordering::SeqCst) != 0 || seen_finished.load(Ordering::SeqCst) != 2 {
            return Err("writer overlapped a reader");
        }
        Ok(())
    });
    controller.release_async(writer.clone()).unwrap();
    writer.wait().unwrap();

    let disposal = controller.acquire_async(AccessType::Disposal).unwrap();
    controller.release_async(disposal).unwrap();
    assert!(matches!(
        controller.acquire_async(AccessType::SharedRead),
        Err(AccessError::Disposed { .. })
    ));
}

#[test]
fn empty_store_consolidates_to_empty_snapshots() {
    let scheduler = scheduler();
    let store = store(&scheduler);
    for _ in 0..3 {
        consolidate(&store, &IdLookup::new());
        assert!(store.create_reader().is_empty());
        assert!(store.create_cancelled_reader().is_empty());
    }
}

#[test]
fn cancel_lookup_partitions_live_and_cancelled() {
    let scheduler = scheduler();
    let store = store(&scheduler);
    {
        let mut writer = store.create_writer(ContextId::of(OWNER)).unwrap();
        writer.init_for_thread(scheduler.current_lane()).unwrap();
        writer.add(Entity::new(0, 0), 1);
        writer.add(Entity::new(1, 0), 2);
        writer.add(Entity::new(2, 0), 3);
    }
    let cancel: IdLookup = [id(1)].into_iter().collect();
    consolidate(&store, &cancel);

    assert_eq!(live(&store), vec![(0, 1), (2, 3)]);
    assert_eq!(cancelled(&store), vec![(1, 2)]);
}

#[test]
fn continued_record_survives_unchanged() {
    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Probe {
        x: f32,
        hits: u16,
        tag: u8,
    }

    let scheduler = scheduler();
    let store =
        InstanceStore::<Probe>::new("probes", OWNER, CancelBehaviour::Default, &scheduler).unwrap();
    let written = Probe {
        x: 1.5,
        hits: 7,
        tag: 3,
    };
    {
        let mut writer = store.create_writer(ContextId::of(OWNER)).unwrap();
        writer.init_for_thread(scheduler.current_lane()).unwrap();
        writer.add(Entity::new(9, 2), written);
    }
    store
        .consolidate_for_frame(&JobHandle::completed(), &IdLookup::new())
        .unwrap()
        .wait()
        .unwrap();

    store
        .update_job::<Probe, _>(|ctx, record| {
            ctx.continue_with(*record);
            Ok(())
        })
        .schedule(&scheduler, &JobHandle::completed())
        .wait()
        .unwrap();
    assert_eq!(store.profile().pending, 1);

    store
        .consolidate_for_frame(&JobHandle::completed(), &IdLookup::new())
        .unwrap()
        .wait()
        .unwrap();
    let reader = store.create_reader();
    let records = reader.read();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, InstanceId::new(Entity::new(9, 2), OWNER));
    assert_eq!(records[0].data, written);
}

/// Two lanes write in frame 1; in frame 2 the records were kept alive by a
/// consumer and one of them is cancelled.
#[test]
fn two_lane_frames_end_to_end() {
    let scheduler = scheduler();
    let store = store(&scheduler);
    {
        let mut lane_a = store.create_writer(ContextId::of(OWNER)).unwrap();
        let mut lane_b = store.create_writer(ContextId::of(OWNER)).unwrap();
        lane_a.init_for_thread(0).unwrap();
        lane_b.init_for_thread(1).unwrap();
        lane_a.add(Entity::new(1, 0), 10);
        lane_b.add(Entity::new(2, 0), 20);
    }

    consolidate(&store, &IdLookup::new());
    assert_eq!(live(&store), vec![(1, 10), (2, 20)]);
    assert!(cancelled(&store).is_empty());

    store
        .update_job::<u32, _>(|ctx, record| {
            ctx.continue_with(*record);
            Ok(())
        })
        .schedule(&scheduler, &JobHandle::completed())
        .wait()
        .unwrap();

    let cancel: IdLookup = [id(2)].into_iter().collect();
    consolidate(&store, &cancel);
    assert_eq!(live(&store), vec![(1, 10)]);
    assert_eq!(cancelled(&store), vec![(2, 20)]);
}

#[test]
fn profiling_during_an_update_leaves_writers_alone() {
    let config = FerryConfig {
        batch_strategy: BatchStrategy::PerElement,
        ..FerryConfig::default().with_workers(4)
    };
    let scheduler = JobScheduler::new(config).unwrap();
    let store = store(&scheduler);
    {
        let mut writer = store.create_writer(ContextId::of(OWNER)).unwrap();
        writer.init_for_thread(scheduler.current_lane()).unwrap();
        for index in 0..50_000 {
            writer.add(Entity::new(index, 0), index);
        }
    }
    consolidate(&store, &IdLookup::new());

    let update = store
        .update_job::<u32, _>(|ctx, record| {
            ctx.continue_with(record.with_data(record.data + 1));
            Ok(())
        })
        .schedule(&scheduler, &JobHandle::completed());

    let mut last = 0;
    while !update.is_resolved() {
        let pending = store.profile().pending;
        assert!(pending >= last && pending <= 50_000);
        last = pending;
    }
    update.wait().unwrap();
    assert_eq!(store.profile().pending, 50_000);

    consolidate(&store, &IdLookup::new());
    let records = live(&store);
    assert_eq!(records.len(), 50_000);
    assert!(records.iter().all(|&(index, data)| data == index + 1));
}

#[test]
fn threads_outside_the_pool_share_a_lane() {
    let scheduler = scheduler();
    let store = Arc::new(store(&scheduler));

    let threads: Vec<_> = (0..4u32)
        .map(|thread| {
            let (store, scheduler) = (store.clone(), scheduler.clone());
            std::thread::spawn(move || {
                for batch in 0..50 {
                    let _guard = store
                        .access()
                        .acquire_with_handle(AccessType::SharedWrite)
                        .unwrap();
                    let mut writer = store.create_writer(ContextId::of(OWNER)).unwrap();
                    writer.init_for_thread(scheduler.current_lane()).unwrap();
                    for i in 0..10 {
                        writer.add(Entity::new(thread * 1000 + batch * 10 + i, 0), thread);
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    consolidate(&store, &IdLookup::new());
    let records = live(&store);
    assert_eq!(records.len(), 2000);
    assert_eq!(records.iter().filter(|&&(_, writer)| writer == 3).count(), 500);
}
