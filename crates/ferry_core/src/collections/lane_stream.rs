//! Multi-lane append stream.
//!
//! One append-only lane per worker plus one for threads outside the pool.
//! A writer claims its lane for as long as it lives, so any number of
//! writers on distinct lanes append without contention. The last lane is
//! shared by every thread outside the pool: claiming it waits for the
//! current holder instead of failing. A thread must not claim the shared
//! lane of one stream twice.
//!
//! `count` reads per-lane lengths published by the writers and never
//! claims. The other bulk operations claim every lane first and fail
//! instead of racing an active writer.

use crate::error::CollectionError;
use crate::job::{JobHandle, JobScheduler};
use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Below this many elements `copy_to` copies lanes on the calling thread.
const PARALLEL_COPY_THRESHOLD: usize = 4096;

// Keeps neighbouring lanes on separate cache lines.
#[repr(align(128))]
struct Lane<T> {
    claimed: AtomicBool,
    shared: bool,
    len: AtomicUsize,
    items: UnsafeCell<Vec<T>>,
}

// SAFETY: `items` is only touched by the holder of the lane's claim.
unsafe impl<T: Send> Sync for Lane<T> {}

impl<T> Lane<T> {
    fn claim(&self, lane: usize) -> Result<(), CollectionError> {
        self.claimed
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| ())
            .map_err(|_| CollectionError::LaneBusy { lane })
    }

    /// Claim for a writer. Contended claims on the shared lane back off
    /// and retry.
    fn claim_for_writer(&self, lane: usize) -> Result<(), CollectionError> {
        if !self.shared {
            return self.claim(lane);
        }
        let mut spins = 0u32;
        while self
            .claimed
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins = spins.wrapping_add(1);
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
        Ok(())
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    /// Must be called by the claim holder after changing `items`.
    fn publish_len(&self, items: &[T]) {
        self.len.store(items.len(), Ordering::Release);
    }
}

struct StreamInner<T> {
    lanes: Box<[Lane<T>]>,
}

impl<T> StreamInner<T> {
    /// Claim every lane, run `f` over all of them, then release.
    fn with_all_lanes<R>(&self, f: impl FnOnce(&mut [&mut Vec<T>]) -> R) -> Result<R, CollectionError> {
        for (index, lane) in self.lanes.iter().enumerate() {
            if let Err(err) = lane.claim(index) {
                self.lanes[..index].iter().for_each(Lane::release);
                return Err(err);
            }
        }
        let mut views: Vec<&mut Vec<T>> = self
            .lanes
            .iter()
            // SAFETY: every lane was claimed above and stays claimed until
            // the views are dropped at the end of this function.
            .map(|lane| unsafe { &mut *lane.items.get() })
            .collect();
        let result = f(&mut views);
        for (lane, items) in self.lanes.iter().zip(views.iter()) {
            lane.publish_len(items);
        }
        drop(views);
        self.lanes.iter().for_each(Lane::release);
        Ok(result)
    }
}

/// Owning handle to a multi-lane stream. Clones share the same lanes.
pub struct LaneStream<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T> Clone for LaneStream<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send> LaneStream<T> {
    /// A stream with one lane per lane of `scheduler`.
    pub fn for_scheduler(scheduler: &JobScheduler, lane_capacity: usize) -> Self {
        Self::with_lanes(scheduler.lane_count(), lane_capacity)
    }

    /// A stream with `lanes` lanes. The last one is the shared lane.
    pub fn with_lanes(lanes: usize, lane_capacity: usize) -> Self {
        let lanes = lanes.max(1);
        let lanes = (0..lanes)
            .map(|index| Lane {
                claimed: AtomicBool::new(false),
                shared: index + 1 == lanes,
                len: AtomicUsize::new(0),
                items: UnsafeCell::new(Vec::with_capacity(lane_capacity)),
            })
            .collect();
        Self {
            inner: Arc::new(StreamInner { lanes }),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.inner.lanes.len()
    }

    /// A cloneable handle that hands out lane writers.
    pub fn as_writer(&self) -> LaneStreamWriter<T> {
        LaneStreamWriter {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Total elements across all lanes.
    ///
    /// Exact once every writer has dropped. While writers are active it is
    /// a snapshot that may miss their latest appends.
    pub fn count(&self) -> usize {
        self.inner
            .lanes
            .iter()
            .map(|lane| lane.len.load(Ordering::Acquire))
            .sum()
    }

    /// Empty every lane, keeping capacity.
    pub fn clear(&self) -> Result<(), CollectionError> {
        self.inner
            .with_all_lanes(|lanes| lanes.iter_mut().for_each(|lane| lane.clear()))
    }

    /// Release lane storage now.
    pub fn dispose(self) -> Result<(), CollectionError> {
        self.inner.with_all_lanes(|lanes| {
            for lane in lanes.iter_mut() {
                **lane = Vec::new();
            }
        })
    }

    /// Release lane storage once `deps` resolves.
    pub fn dispose_async(self, scheduler: &JobScheduler, deps: &JobHandle) -> JobHandle
    where
        T: 'static,
    {
        scheduler.schedule("dispose lane stream", deps, move || {
            trace!("releasing lane stream storage");
            self.dispose()
        })
    }
}

impl<T: Clone + Send + Sync> LaneStream<T> {
    /// Copy every lane, in lane order, into the front of `dst`. Returns the
    /// number of elements copied.
    pub fn copy_to(&self, dst: &mut [T]) -> Result<usize, CollectionError> {
        self.inner.with_all_lanes(|lanes| {
            let total: usize = lanes.iter().map(|lane| lane.len()).sum();
            if dst.len() < total {
                return Err(CollectionError::DestinationTooSmall {
                    needed: total,
                    available: dst.len(),
                });
            }

            let mut rest = &mut dst[..total];
            let mut pairs = Vec::with_capacity(lanes.len());
            for lane in lanes.iter() {
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(lane.len());
                pairs.push((&***lane, head));
                rest = tail;
            }

            if total >= PARALLEL_COPY_THRESHOLD {
                pairs
                    .into_par_iter()
                    .for_each(|(src, out)| out.clone_from_slice(src));
            } else {
                for (src, out) in pairs {
                    out.clone_from_slice(src);
                }
            }
            Ok(total)
        })?
    }
}

/// Cloneable handle for jobs that append to a stream.
pub struct LaneStreamWriter<T> {
    inner: Arc<StreamInner<T>>,
}

impl<T> Clone for LaneStreamWriter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> LaneStreamWriter<T> {
    pub fn lane_count(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Claim `lane` for exclusive appends until the returned writer drops.
    ///
    /// Fails with `LaneBusy` if another writer holds a worker lane. Waits
    /// if another thread holds the shared lane.
    pub fn lane(&self, lane: usize) -> Result<LaneWriter<T>, CollectionError> {
        let slot = self
            .inner
            .lanes
            .get(lane)
            .ok_or(CollectionError::LaneOutOfRange {
                lane,
                lanes: self.inner.lanes.len(),
            })?;
        slot.claim_for_writer(lane)?;
        Ok(LaneWriter {
            inner: Arc::clone(&self.inner),
            lane,
        })
    }
}

/// Exclusive append access to one lane.
pub struct LaneWriter<T> {
    inner: Arc<StreamInner<T>>,
    lane: usize,
}

impl<T> LaneWriter<T> {
    pub fn lane(&self) -> usize {
        self.lane
    }

    #[inline]
    pub fn write(&mut self, item: T) {
        let lane = &self.inner.lanes[self.lane];
        // SAFETY: this writer holds the lane's claim.
        let items = unsafe { &mut *lane.items.get() };
        items.push(item);
        lane.publish_len(items);
    }

    /// Elements in this lane, including ones written by earlier writers.
    pub fn len(&self) -> usize {
        // SAFETY: this writer holds the lane's claim.
        unsafe { (*self.inner.lanes[self.lane].items.get()).len() }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for LaneWriter<T> {
    fn drop(&mut self) {
        self.inner.lanes[self.lane].release();
    }
}
