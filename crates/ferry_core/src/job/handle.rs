//! Dependency tokens.
//!
//! A [`JobHandle`] resolves once the work it stands for has finished. Work
//! scheduled behind a handle is attached as a continuation and handed to the
//! pool only when the handle resolves, so no worker ever blocks on a
//! dependency.

use crate::error::JobError;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

type Continuation = Box<dyn FnOnce(Result<(), JobError>) + Send>;

enum Status {
    Pending,
    Complete,
    Failed(JobError),
}

struct HandleState {
    status: Status,
    continuations: Vec<Continuation>,
}

struct HandleInner {
    state: Mutex<HandleState>,
    resolved: Condvar,
}

/// Cloneable completion token for a scheduled unit of work.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<HandleInner>,
}

static COMPLETED: Lazy<JobHandle> = Lazy::new(|| JobHandle::with_status(Status::Complete));

impl JobHandle {
    /// A handle that is already resolved. Scheduling behind it runs at once.
    pub fn completed() -> Self {
        COMPLETED.clone()
    }

    pub(crate) fn pending() -> Self {
        Self::with_status(Status::Pending)
    }

    /// A handle that is already failed with `error`.
    pub fn failed(error: JobError) -> Self {
        Self::with_status(Status::Failed(error))
    }

    fn with_status(status: Status) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(HandleState {
                    status,
                    continuations: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HandleState> {
        // A continuation never runs under this lock, so poisoning can only
        // come from a panic inside this module; the state is still coherent.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolve the handle and run every continuation attached so far.
    /// Resolving twice keeps the first outcome.
    pub(crate) fn resolve(&self, outcome: Result<(), JobError>) {
        let continuations = {
            let mut state = self.lock();
            if !matches!(state.status, Status::Pending) {
                return;
            }
            state.status = match &outcome {
                Ok(()) => Status::Complete,
                Err(err) => Status::Failed(err.clone()),
            };
            std::mem::take(&mut state.continuations)
        };
        self.inner.resolved.notify_all();
        for continuation in continuations {
            continuation(outcome.clone());
        }
    }

    /// Run `f` with the outcome once this handle resolves. Runs inline when
    /// the handle is already resolved.
    pub(crate) fn on_resolve<F>(&self, f: F)
    where
        F: FnOnce(Result<(), JobError>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &state.status {
                Status::Pending => {
                    state.continuations.push(Box::new(f));
                    return;
                }
                Status::Complete => Ok(()),
                Status::Failed(err) => Err(err.clone()),
            }
        };
        f(outcome);
    }

    /// Whether the work behind the handle has finished, successfully or not.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.lock().status, Status::Pending)
    }

    /// Whether the work finished successfully.
    pub fn is_complete(&self) -> bool {
        matches!(self.lock().status, Status::Complete)
    }

    /// The failure carried by this handle, if it resolved with one.
    pub fn error(&self) -> Option<JobError> {
        match &self.lock().status {
            Status::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Block the calling thread until the handle resolves.
    ///
    /// Never call this from inside a job running on the same pool; use the
    /// handle as a dependency instead.
    pub fn wait(&self) -> Result<(), JobError> {
        let mut state = self.lock();
        loop {
            match &state.status {
                Status::Complete => return Ok(()),
                Status::Failed(err) => return Err(err.clone()),
                Status::Pending => {
                    state = self
                        .inner
                        .resolved
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
    }

    /// A handle that resolves once every handle in `handles` has resolved.
    ///
    /// The combined handle fails with the first failure observed, but only
    /// after all inputs have finished.
    pub fn combine(handles: &[JobHandle]) -> JobHandle {
        let outstanding: Vec<&JobHandle> = handles
            .iter()
            .filter(|handle| !handle.is_complete())
            .collect();

        match outstanding.as_slice() {
            [] => return JobHandle::completed(),
            [single] => return (*single).clone(),
            _ => {}
        }

        let combined = JobHandle::pending();
        let remaining = Arc::new(AtomicUsize::new(outstanding.len()));
        let first_error: Arc<Mutex<Option<JobError>>> = Arc::new(Mutex::new(None));

        for handle in outstanding {
            let combined = combined.clone();
            let remaining = Arc::clone(&remaining);
            let first_error = Arc::clone(&first_error);
            handle.on_resolve(move |outcome| {
                if let Err(err) = outcome {
                    let mut slot = first_error
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    slot.get_or_insert(err);
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failure = first_error
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .take();
                    combined.resolve(failure.map_or(Ok(()), Err));
                }
            });
        }

        combined
    }

    /// Whether two handles are the same token.
    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::completed()
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match &self.lock().status {
            Status::Pending => "pending",
            Status::Complete => "complete",
            Status::Failed(_) => "failed",
        };
        f.debug_struct("JobHandle").field("status", &status).finish()
    }
}
