//! Error types for every layer of the pipeline.
//!
//! Each subsystem has its own enum; [`FerryError`] wraps them so job bodies
//! and graph methods can use `?` across layers.

use crate::access::AccessType;
use crate::data::OwnerId;
use thiserror::Error;

/// Failure of a scheduled unit of work. Cloned into every dependent handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("job '{job}' panicked: {message}")]
    Panicked { job: String, message: String },

    #[error("job '{job}' failed: {message}")]
    Failed { job: String, message: String },

    #[error("job '{job}' skipped because a dependency failed: {cause}")]
    DependencyFailed { job: String, cause: String },

    #[error("could not build worker pool: {0}")]
    PoolBuild(String),
}

impl JobError {
    /// Name of the job the error originated from.
    pub fn job(&self) -> Option<&str> {
        match self {
            JobError::Panicked { job, .. }
            | JobError::Failed { job, .. }
            | JobError::DependencyFailed { job, .. } => Some(job),
            JobError::PoolBuild(_) => None,
        }
    }
}

/// Errors raised by deferred arrays and lane streams.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollectionError {
    #[error("deferred array requires a real allocator policy")]
    InvalidAllocator,

    #[error("deferred array was already created this cycle")]
    AlreadyCreated,

    #[error("container has been disposed")]
    Disposed,

    #[error("lane {lane} is out of range (stream has {lanes} lanes)")]
    LaneOutOfRange { lane: usize, lanes: usize },

    #[error("lane {lane} is already claimed by another writer")]
    LaneBusy { lane: usize },

    #[error("destination holds {available} slots but {needed} are required")]
    DestinationTooSmall { needed: usize, available: usize },
}

/// Errors raised by [`crate::AccessController`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("'{name}' has been disposed")]
    Disposed { name: String },

    #[error("'{name}' cannot grant {requested:?} while {held:?} is outstanding")]
    Conflict {
        name: String,
        held: AccessType,
        requested: AccessType,
    },

    #[error("'{name}' was released without a matching acquire")]
    NotAcquired { name: String },

    #[error(transparent)]
    Job(#[from] JobError),
}

/// Misuse of readers, writers and destinations handed out by stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("store '{store}' cannot create a writer with an unset context")]
    UnsetContext { store: String },

    #[error("'{handle}' was used before being bound to a worker lane")]
    NotBoundToLane { handle: &'static str },

    #[error("update job over '{store}' completed a record without a results destination")]
    MissingDestination { store: String },

    #[error("update job over '{store}' reported cancel progress without a progress writer")]
    MissingProgressWriter { store: String },
}

/// Errors raised while registering, hardening or running a task graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("owner '{name}' is already registered")]
    DuplicateName { name: String },

    #[error("owner {0} is not registered")]
    UnknownOwner(OwnerId),

    #[error("owner {owner} is a {actual}, expected a {expected}")]
    WrongOwnerKind {
        owner: OwnerId,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("task graph is already hardened")]
    AlreadyHardened,

    #[error("task graph must be hardened first")]
    NotHardened,
}

/// Umbrella error for the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FerryError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
