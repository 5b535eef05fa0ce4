//! Task graph orchestration: the registry of task systems and task
//! drivers, their stores and jobs, hardening, and the per-frame update.

mod graph;
mod job_config;
mod owner;

pub use graph::TaskGraph;
pub use job_config::{JobConfigBuilder, JobId};
pub use owner::OwnerKind;
