//! Worker pool adapter.
//!
//! Wraps a dedicated rayon pool. Every worker thread owns one lane; threads
//! outside the pool (the thread driving the frame) share the last lane and
//! take turns on it.

use super::handle::JobHandle;
use super::ParallelJob;
use crate::collections::DeferredView;
use crate::config::FerryConfig;
use crate::error::{FerryError, JobError};
use rayon::prelude::*;
use std::any::Any;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

struct PoolInner {
    pool: rayon::ThreadPool,
    workers: usize,
    config: FerryConfig,
}

/// Schedules work behind [`JobHandle`] dependencies on a worker pool.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<PoolInner>,
}

impl JobScheduler {
    /// Build a pool sized from `config`.
    pub fn new(config: FerryConfig) -> Result<Self, JobError> {
        let workers = config.resolved_worker_threads();
        let prefix = config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |index| format!("{prefix}-{index}"))
            .build()
            .map_err(|err| JobError::PoolBuild(err.to_string()))?;

        debug!(workers, lanes = workers + 1, "job scheduler started");
        Ok(Self {
            inner: Arc::new(PoolInner {
                pool,
                workers,
                config,
            }),
        })
    }

    /// Build a pool with exactly `workers` threads and default settings.
    pub fn with_workers(workers: usize) -> Result<Self, JobError> {
        Self::new(FerryConfig::default().with_workers(workers.max(1)))
    }

    pub fn config(&self) -> &FerryConfig {
        &self.inner.config
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers
    }

    /// Number of lanes a multi-lane stream needs: one per worker plus one
    /// for threads outside the pool.
    pub fn lane_count(&self) -> usize {
        self.inner.workers + 1
    }

    /// Lane owned by the calling thread.
    pub fn current_lane(&self) -> usize {
        self.inner
            .pool
            .current_thread_index()
            .unwrap_or(self.inner.workers)
    }

    /// Batch size for parallel jobs over records of type `T`.
    pub fn batch_size_for<T>(&self) -> usize {
        self.inner.config.batch_strategy.batch_size_for::<T>()
    }

    /// Run `work` on the pool once `deps` resolves.
    ///
    /// A panic or an `Err` from `work` fails the returned handle. If `deps`
    /// fails, `work` is skipped and the failure is passed on.
    pub fn schedule<F, E>(&self, name: impl Into<String>, deps: &JobHandle, work: F) -> JobHandle
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
        E: Display,
    {
        let name: String = name.into();
        let handle = JobHandle::pending();
        let out = handle.clone();
        let inner = Arc::clone(&self.inner);

        deps.on_resolve(move |outcome| match outcome {
            Err(cause) => {
                trace!(job = %name, "skipping job behind failed dependency");
                let cause = match cause {
                    JobError::DependencyFailed { cause, .. } => cause,
                    other => other.to_string(),
                };
                out.resolve(Err(JobError::DependencyFailed { job: name, cause }));
            }
            Ok(()) => inner.pool.spawn(move || {
                let result = run_guarded(&name, work);
                out.resolve(result);
            }),
        });

        handle
    }

    /// Run `job` over every element visible through `source`, in batches of
    /// `batch_size`, once `deps` resolves.
    ///
    /// Each batch gets its own clone of `job`, bound to the lane of the
    /// worker executing it through [`ParallelJob::init_for_thread`].
    pub fn schedule_parallel_for<T, J>(
        &self,
        name: impl Into<String>,
        source: DeferredView<T>,
        batch_size: usize,
        deps: &JobHandle,
        job: J,
    ) -> JobHandle
    where
        T: Send + Sync + 'static,
        J: ParallelJob<T>,
    {
        let scheduler = self.clone();
        let batch = batch_size.max(1);
        self.schedule(name, deps, move || -> Result<(), FerryError> {
            let items = source.read();
            scheduler.inner.pool.install(|| {
                items
                    .par_chunks(batch)
                    .enumerate()
                    .try_for_each(|(chunk, slice)| {
                        let mut local = job.clone();
                        local.init_for_thread(scheduler.current_lane())?;
                        let base = chunk * batch;
                        for (offset, item) in slice.iter().enumerate() {
                            local.execute(base + offset, item)?;
                        }
                        Ok(())
                    })
            })
        })
    }

    /// Combine handles into one dependency.
    pub fn combine(&self, handles: &[JobHandle]) -> JobHandle {
        JobHandle::combine(handles)
    }
}

fn run_guarded<F, E>(name: &str, work: F) -> Result<(), JobError>
where
    F: FnOnce() -> Result<(), E>,
    E: Display,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(job = name, error = %err, "job failed");
            Err(JobError::Failed {
                job: name.to_string(),
                message: err.to_string(),
            })
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(job = name, %message, "job panicked");
            Err(JobError::Panicked {
                job: name.to_string(),
                message,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{AllocatorPolicy, ArrayOptions, DeferredArray};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn scheduler() -> JobScheduler {
        JobScheduler::with_workers(2).unwrap()
    }

    #[test]
    fn lanes_cover_workers_and_outside_threads() {
        let sched = scheduler();
        assert_eq!(sched.lane_count(), 3);
        assert_eq!(sched.current_lane(), 2);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let inner = sched.clone();
        let handle = sched.schedule("lane probe", &JobHandle::completed(), move || {
            seen2.lock().unwrap().push(inner.current_lane());
            Ok::<(), FerryError>(())
        });
        handle.wait().unwrap();
        assert!(seen.lock().unwrap()[0] < 2);
    }

    #[test]
    fn dependencies_order_execution() {
        let sched = scheduler();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        let first = sched.schedule("first", &JobHandle::completed(), move || {
            std::thread::sleep(std::time::Duration::from_millis(5));
            first_log.lock().unwrap().push("first");
            Ok::<(), FerryError>(())
        });
        let second_log = Arc::clone(&log);
        let second = sched.schedule("second", &first, move || {
            second_log.lock().unwrap().push("second");
            Ok::<(), FerryError>(())
        });

        second.wait().unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn panics_fail_the_handle_and_skip_dependents() {
        let sched = scheduler();
        let ran = Arc::new(AtomicUsize::new(0));
        let bad = sched.schedule("bad", &JobHandle::completed(), || -> Result<(), FerryError> {
            panic!("boom")
        });
        let ran2 = Arc::clone(&ran);
        let after = sched.schedule("after", &bad, move || {
            ran2.fetch_add(1, Ordering::SeqCst);
            Ok::<(), FerryError>(())
        });

        assert!(matches!(bad.wait(), Err(JobError::Panicked { .. })));
        match after.wait() {
            Err(JobError::DependencyFailed { job, cause }) => {
                assert_eq!(job, "after");
                assert!(cause.contains("boom"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[derive(Clone)]
    struct SumJob {
        total: Arc<AtomicUsize>,
        visited: Arc<AtomicUsize>,
    }

    impl ParallelJob<u32> for SumJob {
        fn execute(&mut self, index: usize, item: &u32) -> Result<(), FerryError> {
            assert_eq!(index as u32, *item);
            self.total.fetch_add(*item as usize, Ordering::Relaxed);
            self.visited.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn parallel_for_visits_every_element_once() {
        let sched = scheduler();
        let array = DeferredArray::<u32>::new(AllocatorPolicy::Persistent).unwrap();
        {
            let mut slots = array.commit(1000, ArrayOptions::ClearMemory).unwrap();
            for (i, slot) in slots.iter_mut().enumerate() {
                *slot = i as u32;
            }
        }
        let job = SumJob {
            total: Arc::new(AtomicUsize::new(0)),
            visited: Arc::new(AtomicUsize::new(0)),
        };
        let handle = sched.schedule_parallel_for(
            "sum",
            array.as_deferred_view(),
            64,
            &JobHandle::completed(),
            job.clone(),
        );
        handle.wait().unwrap();
        assert_eq!(job.visited.load(Ordering::SeqCst), 1000);
        assert_eq!(job.total.load(Ordering::SeqCst), 999 * 1000 / 2);
    }
}
