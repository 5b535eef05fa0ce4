//! Identity types for instance records.

use serde::Serialize;
use std::fmt;

/// Entity-like handle a record originates from.
///
/// Format: [32-bit index | 32-bit generation]. The host decides what the
/// index means; the generation keeps a recycled index from matching the
/// records of its previous occupant.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pack into 64 bits.
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    pub fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: (bits >> 32) as u32,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Handle assigned to each task driver and task system in a graph.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct OwnerId(u32);

impl OwnerId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the raw index backing this handle.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The owner a writer produces records on behalf of.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl ContextId {
    pub const UNSET: ContextId = ContextId(u32::MAX);

    pub fn of(owner: OwnerId) -> Self {
        Self(owner.0)
    }

    pub fn is_set(self) -> bool {
        self != Self::UNSET
    }

    /// Owner this context stands for, if set.
    pub fn owner(self) -> Option<OwnerId> {
        self.is_set().then_some(OwnerId(self.0))
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::UNSET
    }
}

impl From<OwnerId> for ContextId {
    fn from(owner: OwnerId) -> Self {
        Self::of(owner)
    }
}

/// Cancellation key of a record: which entity, on behalf of which owner.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub entity: Entity,
    pub owner: OwnerId,
}

impl InstanceId {
    pub const fn new(entity: Entity, owner: OwnerId) -> Self {
        Self { entity, owner }
    }

    /// The same entity, keyed under another owner.
    pub fn for_owner(self, owner: OwnerId) -> Self {
        Self { owner, ..self }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.entity, self.owner)
    }
}

/// A record as stored: its identity plus the caller's payload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ProxyInstance<T> {
    pub id: InstanceId,
    pub data: T,
}

impl<T> ProxyInstance<T> {
    pub fn new(id: InstanceId, data: T) -> Self {
        Self { id, data }
    }

    /// Same identity, new payload.
    pub fn with_data<U>(&self, data: U) -> ProxyInstance<U> {
        ProxyInstance { id: self.id, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_bits_pack_index_low() {
        let entity = Entity::new(7, 3);
        assert_eq!(entity.to_bits(), (3u64 << 32) | 7);
        assert_eq!(Entity::from_bits(entity.to_bits()), entity);
    }

    #[test]
    fn unset_context_has_no_owner() {
        assert_eq!(ContextId::default(), ContextId::UNSET);
        assert_eq!(ContextId::UNSET.owner(), None);
        let owner = OwnerId::new(4);
        assert_eq!(ContextId::from(owner).owner(), Some(owner));
    }

    #[test]
    fn rekeying_keeps_the_entity() {
        let id = InstanceId::new(Entity::new(1, 0), OwnerId::new(2));
        let moved = id.for_owner(OwnerId::new(5));
        assert_eq!(moved.entity, id.entity);
        assert_eq!(moved.owner, OwnerId::new(5));
        assert_eq!(moved.to_string(), "1v0@5");
    }
}
