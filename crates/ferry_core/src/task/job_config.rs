use super::TaskGraph;
use crate::access::{AccessType, Guarded};
use crate::data::OwnerId;
use crate::error::{FerryError, GraphError};
use crate::job::{JobHandle, JobScheduler};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Index of a configured job in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u32);

impl JobId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

pub(crate) type ScheduleFn =
    Box<dyn FnMut(&JobScheduler, &JobHandle) -> Result<JobHandle, FerryError> + Send>;

/// One declared access of a job.
#[derive(Clone)]
pub(crate) struct AccessRequirement {
    pub target: Arc<dyn Guarded>,
    pub access: AccessType,
}

impl AccessRequirement {
    fn controller_id(&self) -> u64 {
        self.target.access().id()
    }
}

impl fmt::Debug for AccessRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.access, self.target.access().name())
    }
}

/// A job as the bulk scheduler sees it: declared accesses plus the
/// function that schedules the actual work once per frame.
pub(crate) struct JobConfig {
    pub id: JobId,
    pub name: String,
    pub owner: OwnerId,
    pub requirements: Vec<AccessRequirement>,
    schedule: ScheduleFn,
}

impl JobConfig {
    /// Whether both jobs touch one container and at least one of them
    /// needs it alone.
    pub fn conflicts_with(&self, other: &JobConfig) -> bool {
        self.requirements.iter().any(|mine| {
            other.requirements.iter().any(|theirs| {
                mine.controller_id() == theirs.controller_id() && mine.access.conflicts_with(theirs.access)
            })
        })
    }

    /// Acquire every declared access, schedule the work behind them and
    /// release them with the work's token.
    pub fn schedule(&mut self, scheduler: &JobScheduler, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let mut gates = Vec::with_capacity(self.requirements.len() + 1);
        gates.push(deps.clone());
        for (acquired, requirement) in self.requirements.iter().enumerate() {
            match requirement.target.access().acquire_async(requirement.access) {
                Ok(gate) => gates.push(gate),
                Err(err) => {
                    let gate = JobHandle::combine(&gates);
                    release_all(&self.requirements[..acquired], &gate);
                    return Err(err.into());
                }
            }
        }

        let gate = JobHandle::combine(&gates);
        let done = (self.schedule)(scheduler, &gate);
        let token = done.as_ref().map_or_else(|_| gate.clone(), Clone::clone);
        for requirement in &self.requirements {
            requirement.target.access().release_async(token.clone())?;
        }
        done
    }
}

fn release_all(requirements: &[AccessRequirement], token: &JobHandle) {
    for requirement in requirements {
        if let Err(err) = requirement.target.access().release_async(token.clone()) {
            warn!(error = %err, "could not hand back access after a failed acquire");
        }
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("owner", &self.owner)
            .field("requirements", &self.requirements)
            .finish()
    }
}

/// Declares what a job reads and writes, then registers it.
///
/// Each container is listed once; declaring both read and write access to
/// the same container upgrades the requirement to exclusive access.
///
/// ```ignore
/// graph
///     .configure_job(driver, "tick timers")?
///     .updates(&timers)
///     .writes(&expired)
///     .schedule(move |scheduler, deps| {
///         Ok(timers.update_job(tick).complete_into(&expired).schedule(scheduler, deps))
///     });
/// ```
pub struct JobConfigBuilder<'g> {
    graph: &'g mut TaskGraph,
    owner: OwnerId,
    name: String,
    requirements: Vec<AccessRequirement>,
}

impl<'g> JobConfigBuilder<'g> {
    pub(crate) fn new(graph: &'g mut TaskGraph, owner: OwnerId, name: String) -> Self {
        Self {
            graph,
            owner,
            name,
            requirements: Vec::new(),
        }
    }

    fn require(mut self, target: Arc<dyn Guarded>, access: AccessType) -> Self {
        let id = target.access().id();
        match self.requirements.iter_mut().find(|r| r.controller_id() == id) {
            Some(existing) => existing.access = existing.access.strongest(access),
            None => self.requirements.push(AccessRequirement { target, access }),
        }
        self
    }

    /// Read the live snapshot of `source`.
    pub fn reads<S: Guarded + 'static>(self, source: &Arc<S>) -> Self {
        self.require(source.clone(), AccessType::SharedRead)
    }

    /// Read the cancelled snapshot of `source`.
    pub fn reads_cancelled<S: Guarded + 'static>(self, source: &Arc<S>) -> Self {
        self.require(source.clone(), AccessType::SharedRead)
    }

    /// Read the live snapshot of `source` and continue records into it.
    pub fn updates<S: Guarded + 'static>(self, source: &Arc<S>) -> Self {
        self.require(source.clone(), AccessType::SharedWrite)
    }

    /// Append new records, or completed results, to `target`.
    pub fn writes<S: Guarded + 'static>(self, target: &Arc<S>) -> Self {
        self.require(target.clone(), AccessType::SharedWrite)
    }

    pub fn reads_cancel_requests(self) -> Self {
        let requests = self.graph.cancel_signals().requests().clone();
        self.require(requests, AccessType::SharedRead)
    }

    pub fn reports_cancel_progress(self) -> Self {
        let progress = self.graph.cancel_signals().progress().clone();
        self.require(progress, AccessType::SharedWrite)
    }

    pub fn reads_cancel_complete(self) -> Self {
        let complete = self.graph.cancel_signals().complete().clone();
        self.require(complete, AccessType::SharedRead)
    }

    /// Register the job with `schedule`, which is called once per frame
    /// with the token gating every declared access.
    pub fn schedule<F>(self, schedule: F) -> JobId
    where
        F: FnMut(&JobScheduler, &JobHandle) -> Result<JobHandle, FerryError> + Send + 'static,
    {
        let id = JobId::new(self.graph.job_count() as u32);
        debug!(
            job = %self.name,
            owner = %self.owner,
            requirements = ?self.requirements,
            "job configured"
        );
        self.graph.push_job(JobConfig {
            id,
            name: self.name,
            owner: self.owner,
            requirements: self.requirements,
            schedule: Box::new(schedule),
        });
        id
    }
}

/// Group jobs into stages: each job lands one stage after the latest
/// earlier job it conflicts with. Jobs in one stage may run concurrently.
pub(crate) fn execution_stages(jobs: &[JobConfig]) -> Vec<Vec<JobId>> {
    let mut stage_of: Vec<usize> = Vec::with_capacity(jobs.len());
    let mut stages: Vec<Vec<JobId>> = Vec::new();
    for (index, job) in jobs.iter().enumerate() {
        let stage = jobs[..index]
            .iter()
            .zip(&stage_of)
            .filter(|(earlier, _)| earlier.conflicts_with(job))
            .map(|(_, stage)| stage + 1)
            .max()
            .unwrap_or(0);
        stage_of.push(stage);
        if stages.len() <= stage {
            stages.resize_with(stage + 1, Vec::new);
        }
        stages[stage].push(job.id);
    }
    stages
}

/// Fails once the graph is hardened.
pub(crate) fn ensure_configurable(hardened: bool) -> Result<(), GraphError> {
    if hardened {
        Err(GraphError::AlreadyHardened)
    } else {
        Ok(())
    }
}
