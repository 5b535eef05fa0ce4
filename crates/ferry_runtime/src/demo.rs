//! Courier demo graph.
//!
//! `routes` governs the couriers' trips, `depot` governs arrivals. A
//! cancelled courier drives back the distance it already travelled before
//! its cancellation completes.

use ferry_core::access::Guarded;
use ferry_core::{
    AccessType, CancelBehaviour, ContextId, Entity, FerryError, FerryResult, InstanceStore,
    OwnerId, TaskGraph,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Trip {
    pub remaining: u32,
    pub travelled: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Arrival {
    pub travelled: u32,
}

pub struct CourierDemo {
    pub couriers: OwnerId,
    trips: Arc<InstanceStore<Trip>>,
    delivered: Arc<AtomicUsize>,
}

impl CourierDemo {
    pub fn build(graph: &mut TaskGraph) -> FerryResult<Self> {
        let routes = graph.register_system("routes")?;
        let depot = graph.register_system("depot")?;
        let couriers = graph.register_driver("couriers", routes, None)?;
        let receipts = graph.register_driver("receipts", depot, Some(couriers))?;

        let trips = graph.create_store::<Trip>(routes, CancelBehaviour::Unwind)?;
        let arrivals = graph.create_store::<Arrival>(depot, CancelBehaviour::Default)?;
        let delivered = Arc::new(AtomicUsize::new(0));

        let (source, sink) = (trips.clone(), arrivals.clone());
        graph
            .configure_job(couriers, "drive")?
            .updates(&trips)
            .writes(&arrivals)
            .schedule(move |scheduler, deps| {
                Ok(source
                    .update_job::<Arrival, _>(|ctx, trip| {
                        if trip.data.remaining == 0 {
                            return ctx.complete(trip.id, Arrival { travelled: trip.data.travelled });
                        }
                        ctx.continue_with(trip.with_data(Trip {
                            remaining: trip.data.remaining - 1,
                            travelled: trip.data.travelled + 1,
                        }));
                        Ok(())
                    })
                    .complete_into(&sink)
                    .schedule(scheduler, deps))
            });

        let (source, progress) = (trips.clone(), graph.cancel_signals().progress().writer());
        graph
            .configure_job(couriers, "return to base")?
            .updates(&trips)
            .reports_cancel_progress()
            .schedule(move |scheduler, deps| {
                Ok(source
                    .cancel_job::<Arrival, _>(|ctx, trip| {
                        if trip.data.travelled > 0 {
                            ctx.report_cancel_progress(trip.id)?;
                            ctx.continue_with(trip.with_data(Trip {
                                remaining: trip.data.remaining,
                                travelled: trip.data.travelled - 1,
                            }));
                        }
                        Ok(())
                    })
                    .report_progress_to(progress.clone())
                    .schedule(scheduler, deps))
            });

        let (reader, tally) = (arrivals.create_reader(), delivered.clone());
        graph
            .configure_job(receipts, "tally")?
            .reads(&arrivals)
            .schedule(move |scheduler, deps| {
                let (reader, tally) = (reader.clone(), tally.clone());
                Ok(scheduler.schedule("receipts: tally arrivals", deps, move || {
                    tally.fetch_add(reader.len(), Ordering::Relaxed);
                    Ok::<(), FerryError>(())
                }))
            });

        Ok(Self {
            couriers,
            trips,
            delivered,
        })
    }

    /// Start `count` trips from the main thread.
    pub fn dispatch(&self, graph: &TaskGraph, count: u32) -> FerryResult<()> {
        let _guard = self
            .trips
            .access()
            .acquire_with_handle(AccessType::SharedWrite)?;
        let mut writer = self.trips.create_writer(ContextId::of(self.couriers))?;
        writer.init_for_thread(graph.scheduler().current_lane())?;
        for index in 0..count {
            let trip = Trip {
                remaining: 5 + index % 17,
                travelled: 0,
            };
            writer.add(Entity::new(index, 0), trip);
        }
        Ok(())
    }

    pub fn delivered(&self) -> usize {
        self.delivered.load(Ordering::Relaxed)
    }
}
