//! Access arbitration for containers shared between jobs.

mod controller;

pub use controller::{AccessController, AccessGuard, AccessType};

/// Anything whose shared state is arbitrated by an [`AccessController`].
pub trait Guarded: Send + Sync {
    fn access(&self) -> &AccessController;
}
