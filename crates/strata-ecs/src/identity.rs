//! Identities with generational indices and wildcard sentinels.
//!
//! Real entity handles use a generational index pattern to safely reuse
//! slots while detecting use-after-free. The `Identity` sum type extends
//! handles with the target vocabulary used by component keys: the plain
//! (no target) value, interned object links, and the wildcard sentinels
//! understood by match expressions.

use std::fmt;

use crate::{error::IdentityError, link::LinkId};

/// Generation counter to detect stale entity references.
/// Incremented each time an entity slot is recycled.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u32);

impl Generation {
    /// Create a new generation (starts at 0).
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create a generation from a raw counter value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Increment the generation counter.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Get the raw generation value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Raw slot index into the identity table.
pub type EntityIndex = u32;

/// A live handle to an entity: slot index plus generation.
///
/// Two handles are equal only if both index and generation agree, so a
/// handle kept across a recycle of its slot never aliases the reissued
/// one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    /// Index into the identity table.
    index: EntityIndex,
    /// Generation counter for this slot.
    generation: Generation,
}

impl Entity {
    /// Create an entity handle from an index and generation.
    #[must_use]
    pub const fn new(index: EntityIndex, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Get the slot index.
    #[must_use]
    pub const fn index(self) -> EntityIndex {
        self.index
    }

    /// Get the generation.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Pack into a single u64 for compact storage.
    #[must_use]
    pub const fn to_bits(self) -> u64 {
        ((self.generation.0 as u64) << 32) | (self.index as u64)
    }

    /// Unpack from a u64.
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self {
            index: bits as u32,
            generation: Generation((bits >> 32) as u32),
        }
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}:{})", self.index, self.generation.0)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation.0)
    }
}

/// The target slot of a component key or match expression.
///
/// Real values are entity handles and interned object links. The
/// remaining variants are sentinels: `Plain` marks a component with no
/// target, and the four wildcards are only meaningful inside match
/// expressions. Sentinels carry no index or generation, so asking one
/// for entity data fails instead of yielding garbage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Identity {
    /// No target. The default value of the type.
    #[default]
    Plain,
    /// A specific entity target (a relation).
    Entity(Entity),
    /// A specific interned object target (a link).
    Object(LinkId),
    /// Wildcard: matches every stored target, including `Plain`.
    Any,
    /// Wildcard: matches any stored target except `Plain`.
    AnyTarget,
    /// Wildcard: matches entity targets only.
    AnyEntity,
    /// Wildcard: matches object targets only.
    AnyObject,
}

impl Identity {
    /// Check whether this is one of the four wildcard sentinels.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        matches!(
            self,
            Self::Any | Self::AnyTarget | Self::AnyEntity | Self::AnyObject
        )
    }

    /// Check whether this is the plain (no target) value.
    #[must_use]
    pub const fn is_plain(self) -> bool {
        matches!(self, Self::Plain)
    }

    /// Check whether this is an entity target.
    #[must_use]
    pub const fn is_entity(self) -> bool {
        matches!(self, Self::Entity(_))
    }

    /// Check whether this is an object target.
    #[must_use]
    pub const fn is_object(self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Get the entity handle, if this is an entity target.
    #[must_use]
    pub const fn entity(self) -> Option<Entity> {
        match self {
            Self::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Get the link id, if this is an object target.
    #[must_use]
    pub const fn object(self) -> Option<LinkId> {
        match self {
            Self::Object(id) => Some(id),
            _ => None,
        }
    }

    /// Get the entity handle, or an error for every other variant.
    pub fn as_entity(self) -> Result<Entity, IdentityError> {
        match self {
            Self::Entity(entity) => Ok(entity),
            other => Err(IdentityError::NotAnEntity(other)),
        }
    }

    /// The handle this slot will carry after its next recycle.
    ///
    /// Only entity targets have successors; sentinels and object links
    /// are not slots, so asking for their successor is an error.
    pub fn successor(self) -> Result<Identity, IdentityError> {
        match self {
            Self::Entity(entity) => Ok(Self::Entity(Entity::new(
                entity.index(),
                entity.generation().next(),
            ))),
            other => Err(IdentityError::NotAnEntity(other)),
        }
    }

    /// Decide whether this query target accepts a stored target.
    ///
    /// This is the whole wildcard algebra in one place:
    /// - `Any` accepts everything, `Plain` included
    /// - `AnyTarget` accepts everything except `Plain`
    /// - `AnyEntity` accepts entity targets only
    /// - `AnyObject` accepts object targets only
    /// - anything else accepts exactly itself (`Plain` accepts `Plain`,
    ///   a handle accepts the same index and generation)
    #[must_use]
    pub fn accepts(self, stored: Identity) -> bool {
        match self {
            Self::Any => true,
            Self::AnyTarget => stored != Self::Plain,
            Self::AnyEntity => matches!(stored, Self::Entity(_)),
            Self::AnyObject => matches!(stored, Self::Object(_)),
            exact => exact == stored,
        }
    }
}

impl From<Entity> for Identity {
    fn from(entity: Entity) -> Self {
        Self::Entity(entity)
    }
}

impl From<LinkId> for Identity {
    fn from(id: LinkId) -> Self {
        Self::Object(id)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("Plain"),
            Self::Entity(entity) => write!(f, "Entity({entity})"),
            Self::Object(id) => write!(f, "Object({id})"),
            Self::Any => f.write_str("Any"),
            Self::AnyTarget => f.write_str("AnyTarget"),
            Self::AnyEntity => f.write_str("AnyEntity"),
            Self::AnyObject => f.write_str("AnyObject"),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Entity(entity) => write!(f, "{entity}"),
            Self::Object(id) => write!(f, "{id}"),
            Self::Any => f.write_str("any"),
            Self::AnyTarget => f.write_str("any-target"),
            Self::AnyEntity => f.write_str("any-entity"),
            Self::AnyObject => f.write_str("any-object"),
        }
    }
}

/// One slot of the identity table.
#[derive(Clone, Copy)]
struct Slot {
    /// Generation of the current occupant, or of the next occupant if
    /// the slot is free (the bump happens at recycle time).
    generation: Generation,
    /// Whether the slot currently holds a live entity.
    live: bool,
}

/// Allocator for entity handles with generation tracking.
///
/// Maintains a free list of recycled slots. Recycling bumps the slot's
/// generation, so the freed handle can never pass a liveness check
/// again and the next occupant gets a strictly newer handle.
pub struct IdentityAllocator {
    /// Per-slot state.
    slots: Vec<Slot>,
    /// Free list of recycled slot indices.
    free_list: Vec<EntityIndex>,
    /// Number of currently live entities.
    live_count: u32,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityAllocator {
    /// Create a new allocator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live_count: 0,
        }
    }

    /// Create an allocator with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::with_capacity(capacity / 4),
            live_count: 0,
        }
    }

    /// Allocate a fresh entity handle.
    ///
    /// Reuses a recycled slot at its bumped generation when one is
    /// available, otherwise grows the table at generation 0.
    pub fn allocate(&mut self) -> Entity {
        self.live_count += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            Entity::new(index, slot.generation)
        } else {
            let index = self.slots.len() as EntityIndex;
            let generation = Generation::new();
            self.slots.push(Slot {
                generation,
                live: true,
            });
            Entity::new(index, generation)
        }
    }

    /// Recycle an entity handle, freeing its slot for reuse.
    ///
    /// The slot's generation is bumped immediately, which invalidates
    /// every copy of the handle. Recycling a handle that is not the
    /// live occupant of its slot (double free, never allocated, or
    /// already superseded) is a stale-handle error.
    pub fn recycle(&mut self, entity: Entity) -> Result<(), IdentityError> {
        let index = entity.index() as usize;

        let Some(slot) = self.slots.get_mut(index) else {
            return Err(IdentityError::Stale(entity));
        };

        if !slot.live || slot.generation != entity.generation() {
            return Err(IdentityError::Stale(entity));
        }

        slot.generation = slot.generation.next();
        slot.live = false;
        self.free_list.push(entity.index());
        self.live_count -= 1;
        Ok(())
    }

    /// Check whether a handle names the live occupant of its slot.
    #[must_use]
    pub fn is_live(&self, entity: Entity) -> bool {
        self.slots
            .get(entity.index() as usize)
            .is_some_and(|slot| slot.live && slot.generation == entity.generation())
    }

    /// Get the number of currently live entities.
    #[must_use]
    pub const fn live_count(&self) -> u32 {
        self.live_count
    }

    /// Get the total number of slots (live plus recycled).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for IdentityAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityAllocator")
            .field("slots", &self.slots.len())
            .field("free", &self.free_list.len())
            .field("live", &self.live_count)
            .finish()
    }
}


#[cfg(test)]
mod proptests {
    use std::{
        collections::hash_map::DefaultHasher,
        hash::{Hash, Hasher},
    };

    use proptest::prelude::*;

    use super::*;

    fn hash_entity(entity: &Entity) -> u64 {
        let mut hasher = DefaultHasher::new();
        entity.hash(&mut hasher);
        hasher.finish()
    }

    proptest! {
        #[test]
        fn eq_reflexive_and_hash_consistent(index in 0u32..u32::MAX, generation in 0u32..u32::MAX) {
            let a = Entity::new(index, Generation(generation));
            let b = Entity::new(index, Generation(generation));
            prop_assert_eq!(a, b);
            prop_assert_eq!(hash_entity(&a), hash_entity(&b));
        }

        #[test]
        fn equality_requires_both_fields(
            index_a in 0u32..1000,
            generation_a in 0u32..1000,
            index_b in 0u32..1000,
            generation_b in 0u32..1000,
        ) {
            let a = Entity::new(index_a, Generation(generation_a));
            let b = Entity::new(index_b, Generation(generation_b));
            prop_assert_eq!(a == b, index_a == index_b && generation_a == generation_b);
        }

        #[test]
        fn bits_roundtrip(index in 0u32..u32::MAX, generation in 0u32..u32::MAX) {
            let entity = Entity::new(index, Generation(generation));
            prop_assert_eq!(Entity::from_bits(entity.to_bits()), entity);
        }

        #[test]
        fn wrapped_identity_preserves_equality(
            index_a in 0u32..1000,
            generation_a in 0u32..1000,
            index_b in 0u32..1000,
            generation_b in 0u32..1000,
        ) {
            let a = Identity::Entity(Entity::new(index_a, Generation(generation_a)));
            let b = Identity::Entity(Entity::new(index_b, Generation(generation_b)));
            prop_assert_eq!(a == b, index_a == index_b && generation_a == generation_b);
            // An entity identity never collides with a sentinel.
            prop_assert_ne!(a, Identity::Plain);
            prop_assert_ne!(a, Identity::Any);
        }
    }
}
