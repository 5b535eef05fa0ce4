use crate::error::AccessError;
use crate::job::JobHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Kind of access requested from an [`AccessController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccessType {
    SharedRead,
    SharedWrite,
    ExclusiveWrite,
    Disposal,
}

impl AccessType {
    pub fn is_shared(self) -> bool {
        matches!(self, AccessType::SharedRead | AccessType::SharedWrite)
    }

    /// Whether two holders of these access types must be serialized.
    pub fn conflicts_with(self, other: AccessType) -> bool {
        !(self.is_shared() && self == other)
    }

    /// The weaker of two types is implied by the stronger one.
    pub fn strongest(self, other: AccessType) -> AccessType {
        match (self, other) {
            (a, b) if a == b => a,
            (AccessType::SharedRead, AccessType::SharedWrite)
            | (AccessType::SharedWrite, AccessType::SharedRead) => AccessType::ExclusiveWrite,
            (a, b) => a.max(b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Holding {
    Free,
    Shared { kind: AccessType, holders: usize },
    Exclusive,
    Disposed,
}

struct ControllerState {
    holding: Holding,
    disposal_requested: bool,
    exclusive: JobHandle,
    shared_read: Vec<JobHandle>,
    shared_write: Vec<JobHandle>,
}

/// Shared release tokens are folded into one once this many accumulate.
const COMPACT_AFTER: usize = 16;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Arbitrates access to one shared container between asynchronous jobs and
/// the main thread.
///
/// Acquiring returns a dependency token the work must be gated behind;
/// releasing registers the token of that work so later acquires wait for
/// it. Compatible shared holders overlap; exclusive and disposal access
/// waits for everything before it. Disposal is terminal.
pub struct AccessController {
    id: u64,
    name: String,
    state: Mutex<ControllerState>,
    released: Condvar,
}

impl AccessController {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            state: Mutex::new(ControllerState {
                holding: Holding::Free,
                disposal_requested: false,
                exclusive: JobHandle::completed(),
                shared_read: Vec::new(),
                shared_write: Vec::new(),
            }),
            released: Condvar::new(),
        }
    }

    /// Process-unique id, used to detect two declarations of one container.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposal_requested
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn disposed(&self) -> AccessError {
        AccessError::Disposed {
            name: self.name.clone(),
        }
    }

    fn conflict(&self, state: &ControllerState, requested: AccessType) -> Option<AccessError> {
        let held = match state.holding {
            Holding::Free => return None,
            Holding::Shared { kind, .. } if kind == requested => return None,
            Holding::Shared { kind, .. } => kind,
            Holding::Exclusive | Holding::Disposed => AccessType::ExclusiveWrite,
        };
        Some(AccessError::Conflict {
            name: self.name.clone(),
            held,
            requested,
        })
    }

    /// Record the grant and return the token the access must wait on.
    fn grant(state: &mut ControllerState, access: AccessType) -> JobHandle {
        match access {
            AccessType::SharedRead | AccessType::SharedWrite => {
                state.holding = match state.holding {
                    Holding::Shared { kind, holders } => Holding::Shared {
                        kind,
                        holders: holders + 1,
                    },
                    _ => Holding::Shared {
                        kind: access,
                        holders: 1,
                    },
                };
                let opposing = if access == AccessType::SharedRead {
                    &state.shared_write
                } else {
                    &state.shared_read
                };
                let mut gates = Vec::with_capacity(opposing.len() + 1);
                gates.push(state.exclusive.clone());
                gates.extend(opposing.iter().cloned());
                JobHandle::combine(&gates)
            }
            AccessType::ExclusiveWrite | AccessType::Disposal => {
                state.holding = Holding::Exclusive;
                if access == AccessType::Disposal {
                    state.disposal_requested = true;
                }
                let mut gates = Vec::with_capacity(state.shared_read.len() + state.shared_write.len() + 1);
                gates.push(state.exclusive.clone());
                gates.append(&mut state.shared_read);
                gates.append(&mut state.shared_write);
                JobHandle::combine(&gates)
            }
        }
    }

    /// Request `access` for asynchronous work.
    ///
    /// Fails if disposal was requested or if an incompatible access is
    /// still outstanding (not yet released).
    pub fn acquire_async(&self, access: AccessType) -> Result<JobHandle, AccessError> {
        let mut state = self.lock();
        if state.disposal_requested {
            return Err(self.disposed());
        }
        if let Some(err) = self.conflict(&state, access) {
            return Err(err);
        }
        trace!(controller = %self.name, ?access, "access acquired");
        Ok(Self::grant(&mut state, access))
    }

    /// Register that the outstanding access completes once `done` resolves.
    pub fn release_async(&self, done: JobHandle) -> Result<(), AccessError> {
        let mut state = self.lock();
        match state.holding {
            Holding::Free | Holding::Disposed => {
                return Err(AccessError::NotAcquired {
                    name: self.name.clone(),
                })
            }
            Holding::Shared { kind, holders } => {
                let list = if kind == AccessType::SharedRead {
                    &mut state.shared_read
                } else {
                    &mut state.shared_write
                };
                list.push(done);
                if list.len() > COMPACT_AFTER {
                    let folded = JobHandle::combine(list);
                    list.clear();
                    list.push(folded);
                }
                state.holding = if holders > 1 {
                    Holding::Shared {
                        kind,
                        holders: holders - 1,
                    }
                } else {
                    Holding::Free
                };
            }
            Holding::Exclusive => {
                state.exclusive = done;
                state.holding = if state.disposal_requested {
                    Holding::Disposed
                } else {
                    Holding::Free
                };
            }
        }
        trace!(controller = %self.name, "access released");
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    /// Main-thread acquire: waits for conflicting holders to release, then
    /// for the work they registered to finish.
    pub fn acquire(&self, access: AccessType) -> Result<(), AccessError> {
        let gate = {
            let mut state = self.lock();
            loop {
                if state.disposal_requested {
                    return Err(self.disposed());
                }
                if self.conflict(&state, access).is_none() {
                    break;
                }
                state = self
                    .released
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            Self::grant(&mut state, access)
        };
        if let Err(err) = gate.wait() {
            // The access was granted; hand it back before reporting.
            self.release()?;
            return Err(err.into());
        }
        Ok(())
    }

    /// Main-thread release of an access taken with [`acquire`](Self::acquire).
    pub fn release(&self) -> Result<(), AccessError> {
        self.release_async(JobHandle::completed())
    }

    /// Acquire for the lifetime of the returned guard.
    pub fn acquire_with_handle(&self, access: AccessType) -> Result<AccessGuard<'_>, AccessError> {
        self.acquire(access)?;
        Ok(AccessGuard {
            controller: self,
            access,
        })
    }
}

impl std::fmt::Debug for AccessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessController")
            .field("name", &self.name)
            .field("holding", &self.lock().holding)
            .finish()
    }
}

/// Scoped access; released when dropped, including during unwinding.
pub struct AccessGuard<'a> {
    controller: &'a AccessController,
    access: AccessType,
}

impl AccessGuard<'_> {
    pub fn access(&self) -> AccessType {
        self.access
    }
}

impl Drop for AccessGuard<'_> {
    fn drop(&mut self) {
        // Cannot fail: the guard proves the access is outstanding.
        let _ = self.controller.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn shared_reads_overlap() {
        let ctrl = AccessController::new("test");
        let a = ctrl.acquire_async(AccessType::SharedRead).unwrap();
        let b = ctrl.acquire_async(AccessType::SharedRead).unwrap();
        assert!(a.is_complete());
        assert!(b.is_complete());
        assert!(matches!(
            ctrl.acquire_async(AccessType::ExclusiveWrite),
            Err(AccessError::Conflict { .. })
        ));
        ctrl.release_async(JobHandle::completed()).unwrap();
        ctrl.release_async(JobHandle::completed()).unwrap();
        assert!(ctrl.acquire_async(AccessType::ExclusiveWrite).is_ok());
    }

    #[test]
    fn exclusive_waits_on_released_shared_work() {
        let ctrl = AccessController::new("test");
        ctrl.acquire_async(AccessType::SharedRead).unwrap();
        let reader_work = JobHandle::pending();
        ctrl.release_async(reader_work.clone()).unwrap();

        let gate = ctrl.acquire_async(AccessType::ExclusiveWrite).unwrap();
        assert!(!gate.is_resolved());
        reader_work.resolve(Ok(()));
        assert!(gate.is_complete());
    }

    #[test]
    fn shared_reads_wait_only_on_writers() {
        let ctrl = AccessController::new("test");
        ctrl.acquire_async(AccessType::SharedRead).unwrap();
        let reader_work = JobHandle::pending();
        ctrl.release_async(reader_work.clone()).unwrap();

        // Another reader does not wait for the first.
        let second = ctrl.acquire_async(AccessType::SharedRead).unwrap();
        assert!(second.is_complete());
        ctrl.release_async(JobHandle::completed()).unwrap();

        // A shared writer does.
        let writer = ctrl.acquire_async(AccessType::SharedWrite).unwrap();
        assert!(!writer.is_resolved());
        reader_work.resolve(Ok(()));
        assert!(writer.is_complete());
    }

    #[test]
    fn disposal_is_terminal() {
        let ctrl = AccessController::new("store");
        ctrl.acquire_async(AccessType::Disposal).unwrap();
        ctrl.release_async(JobHandle::completed()).unwrap();
        assert!(ctrl.is_disposed());
        assert_eq!(
            ctrl.acquire_async(AccessType::SharedRead).err(),
            Some(AccessError::Disposed {
                name: "store".into()
            })
        );
        assert!(ctrl.acquire(AccessType::ExclusiveWrite).is_err());
    }

    #[test]
    fn release_without_acquire_is_an_error() {
        let ctrl = AccessController::new("test");
        assert!(matches!(ctrl.release(), Err(AccessError::NotAcquired { .. })));
    }

    #[test]
    fn guard_releases_on_drop() {
        let ctrl = AccessController::new("test");
        {
            let guard = ctrl.acquire_with_handle(AccessType::ExclusiveWrite).unwrap();
            assert_eq!(guard.access(), AccessType::ExclusiveWrite);
        }
        assert!(ctrl.acquire_async(AccessType::SharedRead).is_ok());
    }

    #[test]
    fn blocking_exclusive_waits_for_shared_holder() {
        let ctrl = Arc::new(AccessController::new("test"));
        ctrl.acquire(AccessType::SharedRead).unwrap();
        let granted = Arc::new(AtomicBool::new(false));

        let ctrl2 = Arc::clone(&ctrl);
        let granted2 = Arc::clone(&granted);
        let writer = thread::spawn(move || {
            let _guard = ctrl2.acquire_with_handle(AccessType::ExclusiveWrite).unwrap();
            granted2.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(20));
        assert!(!granted.load(Ordering::SeqCst));
        ctrl.release().unwrap();
        writer.join().unwrap();
        assert!(granted.load(Ordering::SeqCst));
    }

    #[test]
    fn failed_gate_surfaces_and_releases() {
        let ctrl = AccessController::new("test");
        ctrl.acquire_async(AccessType::ExclusiveWrite).unwrap();
        let failure = JobError::Failed {
            job: "writer".into(),
            message: "x".into(),
        };
        ctrl.release_async(JobHandle::failed(failure.clone())).unwrap();
        assert_eq!(
            ctrl.acquire(AccessType::SharedRead).err(),
            Some(AccessError::Job(failure))
        );
        assert!(ctrl.acquire_async(AccessType::ExclusiveWrite).is_ok());
    }

    #[test]
    fn conflict_table() {
        use AccessType::*;
        assert!(!SharedRead.conflicts_with(SharedRead));
        assert!(!SharedWrite.conflicts_with(SharedWrite));
        assert!(SharedRead.conflicts_with(SharedWrite));
        assert!(ExclusiveWrite.conflicts_with(ExclusiveWrite));
        assert_eq!(SharedRead.strongest(SharedWrite), ExclusiveWrite);
        assert_eq!(SharedRead.strongest(ExclusiveWrite), ExclusiveWrite);
    }
}
