//! Cancel progress flow.
//!
//! One flow per top-level task driver that has cancellable data. Nodes
//! mirror the driver hierarchy (a governing system sits one level below its
//! driver) and are scheduled deepest level first, so a child that finishes
//! unwinding lets its parent complete within the same frame.

use super::signal::{IdLookup, SignalWriter};
use super::CancelSignals;
use crate::data::OwnerId;
use crate::error::FerryError;
use crate::job::{BulkScheduler, JobHandle, JobScheduler};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowNodeKind {
    Driver,
    System,
}

/// One owner's place in a flow.
#[derive(Debug, Clone)]
pub struct FlowNode {
    pub owner: OwnerId,
    pub name: String,
    pub kind: FlowNodeKind,
    /// Owner whose cancel requests this node answers. A driver watches
    /// itself; a system watches the driver it governs.
    pub watched: OwnerId,
    /// Owners of the nodes one level below that report to this node.
    pub children: Vec<OwnerId>,
}

impl fmt::Display for FlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} '{}' ({})", self.kind, self.name, self.owner)
    }
}

/// Everything a node check job needs, bundled per frame.
#[derive(Clone)]
struct FlowFrame {
    scheduler: JobScheduler,
    requests: IdLookup,
    progress: IdLookup,
    unresolved: IdLookup,
    resubmit: SignalWriter,
    complete: SignalWriter,
}

pub struct CancelProgressFlow {
    root: OwnerId,
    levels: Vec<Vec<FlowNode>>,
    unresolved: IdLookup,
}

impl CancelProgressFlow {
    pub(crate) fn new(root: OwnerId) -> Self {
        Self {
            root,
            levels: Vec::new(),
            unresolved: IdLookup::new(),
        }
    }

    pub(crate) fn add_node(&mut self, depth: usize, node: FlowNode) {
        if self.levels.len() <= depth {
            self.levels.resize_with(depth + 1, Vec::new);
        }
        self.levels[depth].push(node);
    }

    pub fn root(&self) -> OwnerId {
        self.root
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn nodes_at(&self, depth: usize) -> &[FlowNode] {
        self.levels.get(depth).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Schedule every node check behind `deps`, deepest level first.
    ///
    /// Callers hold read access to progress and requests and write access
    /// to requests and completion for the whole call.
    pub fn schedule(
        &self,
        scheduler: &JobScheduler,
        signals: &CancelSignals,
        deps: &JobHandle,
    ) -> Result<JobHandle, FerryError> {
        if self.levels.is_empty() {
            return Ok(deps.clone());
        }

        let frame = FlowFrame {
            scheduler: scheduler.clone(),
            requests: signals.requests().lookup(),
            progress: signals.progress().lookup(),
            unresolved: self.unresolved.clone(),
            resubmit: signals.requests().writer(),
            complete: signals.complete().writer(),
        };

        let unresolved = self.unresolved.clone();
        let mut deps = scheduler.schedule("cancel flow: reset", deps, move || {
            unresolved.clear();
            Ok::<(), FerryError>(())
        });

        for level in self.levels.iter().rev() {
            let mut bulk: BulkScheduler<&FlowNode> = level.iter().collect();
            deps = bulk.schedule(&deps, |node, deps| {
                let node = (*node).clone();
                let frame = frame.clone();
                Ok(scheduler.schedule(format!("cancel flow: {}", node.name), deps, move || {
                    check_node(&node, frame)
                }))
            })?;
        }
        Ok(deps)
    }
}

/// Classify every request `node` answers as still unwinding or resolved.
fn check_node(node: &FlowNode, mut frame: FlowFrame) -> Result<(), FerryError> {
    let keys = frame.requests.keys_for_owner(node.watched);
    if keys.is_empty() {
        return Ok(());
    }
    if node.kind == FlowNodeKind::Driver {
        let lane = frame.scheduler.current_lane();
        frame.resubmit.init_for_thread(lane)?;
        frame.complete.init_for_thread(lane)?;
    }

    for key in keys {
        let mine = key.for_owner(node.owner);
        let busy = frame.progress.contains(&mine)
            || node
                .children
                .iter()
                .any(|child| frame.unresolved.contains(&key.for_owner(*child)));

        match (busy, node.kind) {
            (true, FlowNodeKind::Driver) => {
                frame.unresolved.insert(mine);
                frame.resubmit.signal(key);
            }
            (true, FlowNodeKind::System) => {
                frame.unresolved.insert(mine);
            }
            (false, FlowNodeKind::Driver) => frame.complete.signal(key),
            (false, FlowNodeKind::System) => {}
        }
    }
    Ok(())
}

impl fmt::Display for CancelProgressFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (depth, level) in self.levels.iter().enumerate() {
            writeln!(f, "Depth: {depth}")?;
            for node in level {
                writeln!(f, "  {node}")?;
            }
        }
        Ok(())
    }
}
