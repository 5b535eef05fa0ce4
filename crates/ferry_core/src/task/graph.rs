use super::job_config::{ensure_configurable, execution_stages, JobConfig, JobConfigBuilder};
use super::owner::{OwnerKind, OwnerNode};
use crate::cancel::{
    CancelCompleteReader, CancelProgressFlow, CancelSignals, FlowNode, FlowNodeKind, IdLookup,
};
use crate::data::{
    CancelBehaviour, DataSource, Entity, InstanceData, InstanceId, InstanceStore, OwnerId,
    StoreProfile,
};
use crate::error::{FerryError, GraphError};
use crate::job::{BulkScheduler, JobHandle, JobScheduler};
use ferry_metrics::{time_stage, Counter, StageProfiler};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Central registry of task systems, task drivers, their stores and jobs.
///
/// Owners, stores and jobs are registered up front. [`harden`](Self::harden)
/// locks the configuration and builds the cancel progress flows; after that
/// [`update`](Self::update) schedules one frame:
///
/// 1. consolidate cancel requests and progress,
/// 2. run the cancel progress flows,
/// 3. consolidate every store against the request lookup,
/// 4. schedule every job once, ordered by declared access,
/// 5. consolidate cancel completion.
pub struct TaskGraph {
    scheduler: JobScheduler,
    owners: Vec<OwnerNode>,
    names: HashMap<String, OwnerId>,
    stores: BulkScheduler<Arc<dyn DataSource>>,
    jobs: BulkScheduler<JobConfig>,
    cancel: CancelSignals,
    flows: BulkScheduler<CancelProgressFlow>,
    hardened: bool,
    frame: u64,
    last_frame: JobHandle,
    profiler: StageProfiler,
}

impl TaskGraph {
    pub fn new(scheduler: &JobScheduler) -> Result<Self, FerryError> {
        Ok(Self {
            cancel: CancelSignals::new(scheduler)?,
            scheduler: scheduler.clone(),
            owners: Vec::new(),
            names: HashMap::new(),
            stores: BulkScheduler::default(),
            jobs: BulkScheduler::default(),
            flows: BulkScheduler::default(),
            hardened: false,
            frame: 0,
            last_frame: JobHandle::completed(),
            profiler: StageProfiler::new(),
        })
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_system(&mut self, name: impl Into<String>) -> Result<OwnerId, GraphError> {
        self.register(name.into(), OwnerKind::System)
    }

    /// Register a task driver governed by `system`, nested under `parent`
    /// when it is a sub task driver.
    pub fn register_driver(
        &mut self,
        name: impl Into<String>,
        system: OwnerId,
        parent: Option<OwnerId>,
    ) -> Result<OwnerId, GraphError> {
        ensure_configurable(self.hardened)?;
        self.expect_kind(system, OwnerKind::System)?;
        if let Some(parent) = parent {
            self.expect_kind(parent, OwnerKind::Driver)?;
        }

        let id = self.register(name.into(), OwnerKind::Driver)?;
        self.owners[index(id)].system = Some(system);
        self.owners[index(id)].parent = parent;
        self.owners[index(system)].drivers.push(id);
        if let Some(parent) = parent {
            self.owners[index(parent)].sub_drivers.push(id);
        }
        Ok(id)
    }

    fn register(&mut self, name: String, kind: OwnerKind) -> Result<OwnerId, GraphError> {
        ensure_configurable(self.hardened)?;
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }

        let id = OwnerId::new(self.owners.len() as u32);
        debug!(owner = %name, %id, %kind, "owner registered");
        self.names.insert(name.clone(), id);
        self.owners.push(OwnerNode::new(id, name, kind));
        Ok(id)
    }

    /// Create a store owned by `owner`. Stores are consolidated every frame
    /// and disposed with the graph.
    pub fn create_store<T: InstanceData>(
        &mut self,
        owner: OwnerId,
        behaviour: CancelBehaviour,
    ) -> Result<Arc<InstanceStore<T>>, FerryError> {
        ensure_configurable(self.hardened)?;
        let name = format!("{}/{}", self.node(owner)?.name, short_type_name::<T>());
        let store = Arc::new(InstanceStore::<T>::new(name, owner, behaviour, &self.scheduler)?);

        let slot = self.stores.len();
        let node = &mut self.owners[index(owner)];
        node.stores.push(slot);
        node.has_unwind_store |= behaviour == CancelBehaviour::Unwind;
        debug!(store = %store.name(), ?behaviour, "store created");
        self.stores.push(store.clone());
        Ok(store)
    }

    /// Start configuring a job owned by `owner`.
    pub fn configure_job(
        &mut self,
        owner: OwnerId,
        name: impl Into<String>,
    ) -> Result<JobConfigBuilder<'_>, GraphError> {
        ensure_configurable(self.hardened)?;
        let name = format!("{}: {}", self.node(owner)?.name, name.into());
        Ok(JobConfigBuilder::new(self, owner, name))
    }

    pub(crate) fn push_job(&mut self, config: JobConfig) {
        self.jobs.push(config);
    }

    // ------------------------------------------------------------------
    // Hardening
    // ------------------------------------------------------------------

    /// Lock the configuration: compute which owners have cancellable data
    /// and build one cancel progress flow per top-level driver that does.
    pub fn harden(&mut self) -> Result<(), GraphError> {
        ensure_configurable(self.hardened)?;
        self.compute_cancellable_data();
        self.build_flows();
        self.hardened = true;
        debug!(
            owners = self.owners.len(),
            stores = self.stores.len(),
            jobs = self.jobs.len(),
            flows = self.flows.len(),
            "task graph hardened"
        );
        Ok(())
    }

    fn compute_cancellable_data(&mut self) {
        for node in self.owners.iter_mut().filter(|n| n.kind == OwnerKind::System) {
            node.has_cancellable_data = node.has_unwind_store;
        }
        // Sub drivers are registered after their parent.
        for i in (0..self.owners.len()).rev() {
            let node = &self.owners[i];
            if !node.is_driver() {
                continue;
            }
            let flagged = node.has_unwind_store
                || node
                    .system
                    .is_some_and(|system| self.owners[index(system)].has_cancellable_data)
                || node
                    .sub_drivers
                    .iter()
                    .any(|sub| self.owners[index(*sub)].has_cancellable_data);
            self.owners[i].has_cancellable_data = flagged;
        }
    }

    fn build_flows(&mut self) {
        let roots: Vec<OwnerId> = self
            .owners
            .iter()
            .filter(|n| n.is_driver() && n.parent.is_none() && n.has_cancellable_data)
            .map(|n| n.id)
            .collect();

        for root in roots {
            let mut flow = CancelProgressFlow::new(root);
            self.add_flow_nodes(&mut flow, root, 0);
            debug!(root = %root, nodes = flow.node_count(), "cancel flow built\n{flow}");
            self.flows.push(flow);
        }
    }

    fn add_flow_nodes(&self, flow: &mut CancelProgressFlow, driver: OwnerId, depth: usize) {
        let node = &self.owners[index(driver)];
        let system = node
            .system
            .map(|system| &self.owners[index(system)])
            .filter(|system| system.has_cancellable_data);
        let sub_drivers: Vec<OwnerId> = node
            .sub_drivers
            .iter()
            .copied()
            .filter(|sub| self.owners[index(*sub)].has_cancellable_data)
            .collect();

        let mut children: Vec<OwnerId> = system.iter().map(|s| s.id).collect();
        children.extend(&sub_drivers);
        flow.add_node(
            depth,
            FlowNode {
                owner: driver,
                name: node.name.clone(),
                kind: FlowNodeKind::Driver,
                watched: driver,
                children,
            },
        );
        if let Some(system) = system {
            flow.add_node(
                depth + 1,
                FlowNode {
                    owner: system.id,
                    name: system.name.clone(),
                    kind: FlowNodeKind::System,
                    watched: driver,
                    children: Vec::new(),
                },
            );
        }
        for sub in sub_drivers {
            self.add_flow_nodes(flow, sub, depth + 1);
        }
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Whether `owner`, its governing system or any sub driver has a store
    /// whose cancellation needs unwinding.
    pub fn has_cancellable_data(&self, owner: OwnerId) -> Result<bool, GraphError> {
        if !self.hardened {
            return Err(GraphError::NotHardened);
        }
        Ok(self.node(owner)?.has_cancellable_data)
    }

    /// Whether cancelling `owner` can affect any store at all. A system is
    /// cancellable through any of the drivers it governs.
    pub fn is_cancellable(&self, owner: OwnerId) -> Result<bool, GraphError> {
        let node = self.node(owner)?;
        Ok(match node.kind {
            OwnerKind::Driver => self.subtree_has_stores(node),
            OwnerKind::System => node
                .drivers
                .iter()
                .any(|driver| self.subtree_has_stores(&self.owners[index(*driver)])),
        })
    }

    fn subtree_has_stores(&self, node: &OwnerNode) -> bool {
        !node.stores.is_empty()
            || node
                .system
                .is_some_and(|system| !self.owners[index(system)].stores.is_empty())
            || node
                .sub_drivers
                .iter()
                .any(|sub| self.subtree_has_stores(&self.owners[index(*sub)]))
    }

    /// Request cancellation of `entity` under the driver `owner` and every
    /// driver nested below it. Visible from the next [`update`](Self::update).
    ///
    /// Drivers with cancellable data are seeded as in progress so their
    /// flow observes at least one frame of unwinding. Drivers without it
    /// complete with the frame the request becomes visible in.
    pub fn request_cancel(&self, owner: OwnerId, entity: Entity) -> Result<(), FerryError> {
        if !self.hardened {
            return Err(GraphError::NotHardened.into());
        }
        let node = self.expect_kind(owner, OwnerKind::Driver)?;
        if !self.subtree_has_stores(node) {
            warn!(driver = %node.name, %entity, "cancel requested for a driver without data; ignored");
            return Ok(());
        }

        let mut requests = Vec::new();
        let mut progress = Vec::new();
        let mut complete = Vec::new();
        let mut pending = vec![owner];
        while let Some(id) = pending.pop() {
            let driver = &self.owners[index(id)];
            let key = InstanceId::new(entity, id);
            requests.push(key);
            if driver.has_cancellable_data {
                progress.push(key);
                let system = driver
                    .system
                    .filter(|system| self.owners[index(*system)].has_cancellable_data);
                if let Some(system) = system {
                    progress.push(key.for_owner(system));
                }
            } else {
                complete.push(key);
            }
            pending.extend(driver.sub_drivers.iter().copied());
        }

        debug!(
            driver = %node.name,
            %entity,
            drivers = requests.len(),
            "cancel requested"
        );
        self.cancel.requests().signal_now(requests)?;
        if !progress.is_empty() {
            self.cancel.progress().signal_now(progress)?;
        }
        if !complete.is_empty() {
            self.cancel.complete().signal_now(complete)?;
        }
        Ok(())
    }

    /// Cancel requests visible this frame.
    pub fn cancel_lookup(&self) -> IdLookup {
        self.cancel.request_lookup()
    }

    /// Cancellations that completed in the last frame.
    pub fn complete_reader(&self) -> CancelCompleteReader {
        self.cancel.complete_reader()
    }

    pub fn cancel_signals(&self) -> &CancelSignals {
        &self.cancel
    }

    /// Debug rendering of every cancel progress flow.
    pub fn describe_cancel_flows(&self) -> String {
        self.flows
            .items()
            .iter()
            .map(|flow| format!("Flow for {}\n{flow}", self.owners[index(flow.root())].name))
            .collect()
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Schedule one frame behind `deps` and the previous frame.
    pub fn update(&mut self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        if !self.hardened {
            return Err(GraphError::NotHardened.into());
        }
        self.frame += 1;
        trace!(frame = self.frame, "scheduling frame");

        let scheduler = self.scheduler.clone();
        let deps = JobHandle::combine(&[deps.clone(), self.last_frame.clone()]);

        let incoming = time_stage!(self.profiler, "cancel requests", {
            self.cancel.consolidate_incoming(&deps)
        })?;
        let flows = time_stage!(self.profiler, "cancel flows", {
            self.cancel.schedule_flows(&scheduler, &mut self.flows, &incoming)
        })?;
        let lookup = self.cancel.request_lookup();
        let stores = time_stage!(self.profiler, "consolidate stores", {
            self.stores
                .schedule(&flows, |store, deps| store.consolidate_for_frame(deps, &lookup))
        })?;
        let jobs = time_stage!(self.profiler, "jobs", {
            self.jobs.schedule(&stores, |job, deps| job.schedule(&scheduler, deps))
        })?;
        let complete = time_stage!(self.profiler, "cancel complete", {
            self.cancel.consolidate_complete(&jobs)
        })?;

        self.last_frame = complete.clone();
        Ok(complete)
    }

    /// Job names grouped by stage; jobs within a stage touch no container
    /// in conflicting ways.
    pub fn execution_stages(&self) -> Vec<Vec<String>> {
        let jobs = self.jobs.items();
        execution_stages(jobs)
            .into_iter()
            .map(|stage| {
                stage
                    .into_iter()
                    .map(|id| jobs[id.index() as usize].name.clone())
                    .collect()
            })
            .collect()
    }

    /// Release every store and signal once `deps` and the last frame are
    /// done. The graph is unusable afterwards.
    pub fn dispose_async(&mut self, deps: &JobHandle) -> Result<JobHandle, FerryError> {
        let deps = JobHandle::combine(&[deps.clone(), self.last_frame.clone()]);
        let stores = self.stores.schedule(&deps, |store, deps| store.dispose_async(deps))?;
        let signals = self.cancel.dispose_async(&deps)?;
        self.last_frame = JobHandle::combine(&[stores, signals]);
        Ok(self.last_frame.clone())
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub fn profiles(&self) -> Vec<StoreProfile> {
        self.stores.items().iter().map(|store| store.profile()).collect()
    }

    /// Publish per-store occupancy into `counter`.
    pub fn record_metrics(&self, counter: &mut Counter) {
        counter.set("graph.frame", self.frame as usize);
        for profile in self.profiles() {
            counter.set(&format!("{}.live", profile.name), profile.live);
            counter.set(&format!("{}.cancelled", profile.name), profile.cancelled);
            counter.set(&format!("{}.pending", profile.name), profile.pending);
        }
        counter.set("cancel.complete", self.complete_reader().len());
    }

    pub fn profiler(&self) -> &StageProfiler {
        &self.profiler
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn owner_by_name(&self, name: &str) -> Option<OwnerId> {
        self.names.get(name).copied()
    }

    pub fn owner_name(&self, owner: OwnerId) -> Option<&str> {
        self.owners.get(index(owner)).map(|node| node.name.as_str())
    }

    pub fn owner_kind(&self, owner: OwnerId) -> Option<OwnerKind> {
        self.owners.get(index(owner)).map(|node| node.kind)
    }

    /// Governing system of a driver.
    pub fn system_of(&self, driver: OwnerId) -> Option<OwnerId> {
        self.owners.get(index(driver)).and_then(|node| node.system)
    }

    pub fn parent_of(&self, driver: OwnerId) -> Option<OwnerId> {
        self.owners.get(index(driver)).and_then(|node| node.parent)
    }

    fn node(&self, owner: OwnerId) -> Result<&OwnerNode, GraphError> {
        self.owners
            .get(index(owner))
            .ok_or(GraphError::UnknownOwner(owner))
    }

    fn expect_kind(&self, owner: OwnerId, kind: OwnerKind) -> Result<&OwnerNode, GraphError> {
        let node = self.node(owner)?;
        if node.kind != kind {
            return Err(GraphError::WrongOwnerKind {
                owner,
                expected: kind.label(),
                actual: node.kind.label(),
            });
        }
        Ok(node)
    }
}

#[inline]
fn index(owner: OwnerId) -> usize {
    owner.index() as usize
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let path = full.split('<').next().unwrap_or(full);
    path.rsplit("::").next().unwrap_or(path)
}
