//! Instance data: identities, stores and the handles jobs use on them.

mod handles;
mod ids;
mod store;
mod update;

pub use handles::{InstanceReader, InstanceUpdater, InstanceWriter, ResultsDestination};
pub use ids::{ContextId, Entity, InstanceId, OwnerId, ProxyInstance};
pub use store::{CancelBehaviour, DataSource, InstanceData, InstanceStore, StoreProfile};
pub use update::{UpdateContext, UpdateJob};
