use crate::data::OwnerId;
use std::fmt;

/// What kind of node an owner is in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    /// Governs shared data for one or more task drivers.
    System,
    /// Drives tasks for entities; drivers nest under other drivers.
    Driver,
}

impl OwnerKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            OwnerKind::System => "system",
            OwnerKind::Driver => "driver",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One registered task system or task driver.
#[derive(Debug, Clone)]
pub(crate) struct OwnerNode {
    pub id: OwnerId,
    pub name: String,
    pub kind: OwnerKind,
    /// Governing system of a driver; `None` for systems.
    pub system: Option<OwnerId>,
    /// Parent driver; `None` for systems and top-level drivers.
    pub parent: Option<OwnerId>,
    pub sub_drivers: Vec<OwnerId>,
    /// Drivers governed by a system.
    pub drivers: Vec<OwnerId>,
    /// Indices into the graph's store list.
    pub stores: Vec<usize>,
    pub has_unwind_store: bool,
    pub has_cancellable_data: bool,
}

impl OwnerNode {
    pub fn new(id: OwnerId, name: String, kind: OwnerKind) -> Self {
        Self {
            id,
            name,
            kind,
            system: None,
            parent: None,
            sub_drivers: Vec::new(),
            drivers: Vec::new(),
            stores: Vec::new(),
            has_unwind_store: false,
            has_cancellable_data: false,
        }
    }

    pub fn is_driver(&self) -> bool {
        self.kind == OwnerKind::Driver
    }
}
