//! The world: entity lifecycle plus keyed component storage.
//!
//! A [`World`] owns an identity allocator and the archetype tables.
//! Components are addressed by [`ComponentKey`], so the same component
//! type can appear on an entity several times under different targets:
//! once plain, once per relation target, once per linked object.
//!
//! Accessors return owned clones; mutation goes through `attach`,
//! which inserts or replaces. Despawning an entity also strips every
//! relation stored on other entities that targets it, so stored
//! targets never dangle.

use std::{fmt, sync::Arc};

use tracing::trace;

use crate::{
    archetype::{ArchetypeId, ArchetypeStorage},
    component::{Component, ComponentInfo, register},
    error::{WorldError, WorldResult},
    expr::{ComponentKey, Match},
    identity::{Entity, Identity, IdentityAllocator},
    query::QueryBuilder,
};

/// Where an entity's row lives.
#[derive(Clone, Copy, Debug)]
struct EntityLocation {
    archetype: ArchetypeId,
    row: usize,
}

/// Container for entities, their keyed components, and the archetype
/// tables that store them.
pub struct World {
    /// Identity allocator.
    identities: IdentityAllocator,
    /// Entity locations indexed by entity index.
    locations: Vec<Option<EntityLocation>>,
    /// Archetype tables.
    archetypes: ArchetypeStorage,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self {
            identities: IdentityAllocator::new(),
            locations: Vec::new(),
            archetypes: ArchetypeStorage::new(),
        }
    }

    /// Create a world with entity capacity pre-allocated.
    #[must_use]
    pub fn with_capacity(entity_capacity: usize) -> Self {
        Self {
            identities: IdentityAllocator::with_capacity(entity_capacity),
            locations: Vec::with_capacity(entity_capacity),
            archetypes: ArchetypeStorage::new(),
        }
    }

    // ==================== Entity Lifecycle ====================

    /// Spawn a new entity with no components.
    pub fn spawn(&mut self) -> Entity {
        let entity = self.identities.allocate();
        self.ensure_location_slot(entity);

        let archetype = self.archetypes.index_mut(ArchetypeId::EMPTY);
        let row = archetype.allocate(entity);

        self.locations[entity.index() as usize] = Some(EntityLocation {
            archetype: ArchetypeId::EMPTY,
            row,
        });

        entity
    }

    /// Spawn a new entity carrying one plain component.
    pub fn spawn_with<T: Component>(&mut self, value: T) -> Entity {
        let entity = self.identities.allocate();
        self.ensure_location_slot(entity);

        let key = ComponentKey::plain::<T>();
        let arch_id = self.archetypes.get_or_create(&[(key, register::<T>())]);

        let archetype = self.archetypes.index_mut(arch_id);
        let row = archetype.allocate(entity);
        // SAFETY: the row was just allocated and T is the column type
        unsafe {
            archetype.write_value(key, row, value);
        }

        self.locations[entity.index() as usize] = Some(EntityLocation {
            archetype: arch_id,
            row,
        });

        entity
    }

    /// Despawn an entity, dropping all its components.
    ///
    /// Every relation stored on other entities that targets the
    /// despawned one is stripped as well, before the identity is
    /// recycled, so no stored key ever holds a dangling target.
    pub fn despawn(&mut self, entity: Entity) -> WorldResult<()> {
        let location = self.require(entity)?;

        // SAFETY: the location row is in bounds by construction
        let swapped = unsafe {
            self.archetypes
                .index_mut(location.archetype)
                .drop_row(location.row)
        };
        self.retarget_swapped(swapped, location.row);
        self.locations[entity.index() as usize] = None;

        self.strip_target(Identity::Entity(entity));

        // Recycle last: the index stays reserved while cleanup runs.
        self.identities.recycle(entity)?;
        Ok(())
    }

    /// Check whether an entity handle is live.
    #[must_use]
    pub fn is_live(&self, entity: Entity) -> bool {
        self.identities.is_live(entity)
    }

    /// Get the number of live entities.
    #[must_use]
    pub fn live_count(&self) -> u32 {
        self.identities.live_count()
    }

    // ==================== Attach ====================

    /// Attach a plain component, replacing any existing value.
    pub fn attach<T: Component>(&mut self, entity: Entity, value: T) -> WorldResult<()> {
        self.attach_by_key(entity, ComponentKey::plain::<T>(), &register::<T>(), value)
    }

    /// Attach a relation component targeting `target`, replacing any
    /// existing value for the same target.
    ///
    /// The target must be live; relations to despawned entities cannot
    /// be created.
    pub fn attach_relation<T: Component>(
        &mut self,
        entity: Entity,
        target: Entity,
        value: T,
    ) -> WorldResult<()> {
        if !self.identities.is_live(target) {
            return Err(WorldError::NotFound(target));
        }

        self.attach_by_key(
            entity,
            ComponentKey::relation::<T>(target),
            &register::<T>(),
            value,
        )
    }

    /// Attach a link to a shared object.
    ///
    /// The object is interned on first use; attaching the same object
    /// again replaces the stored handle (a no-op in effect, since both
    /// point at the same allocation).
    pub fn attach_link<T: Component>(&mut self, entity: Entity, object: &Arc<T>) -> WorldResult<()> {
        self.attach_by_key(
            entity,
            ComponentKey::link(object),
            &register::<Arc<T>>(),
            Arc::clone(object),
        )
    }

    // ==================== Detach ====================

    /// Detach a plain component, returning its value.
    pub fn detach<T: Component>(&mut self, entity: Entity) -> WorldResult<T> {
        self.detach_by_key(entity, ComponentKey::plain::<T>())
    }

    /// Detach the relation component targeting `target`, returning its
    /// value.
    pub fn detach_relation<T: Component>(
        &mut self,
        entity: Entity,
        target: Entity,
    ) -> WorldResult<T> {
        self.detach_by_key(entity, ComponentKey::relation::<T>(target))
    }

    /// Detach a link, returning the stored handle.
    pub fn detach_link<T: Component>(
        &mut self,
        entity: Entity,
        object: &Arc<T>,
    ) -> WorldResult<Arc<T>> {
        self.detach_by_key(entity, ComponentKey::link(object))
    }

    // ==================== Access ====================

    /// Get a copy of a plain component.
    pub fn get<T: Component + Clone>(&self, entity: Entity) -> WorldResult<T> {
        self.get_by_key::<T>(entity, ComponentKey::plain::<T>())
            .map(Clone::clone)
    }

    /// Get a copy of the relation component targeting `target`.
    pub fn get_relation<T: Component + Clone>(
        &self,
        entity: Entity,
        target: Entity,
    ) -> WorldResult<T> {
        self.get_by_key::<T>(entity, ComponentKey::relation::<T>(target))
            .map(Clone::clone)
    }

    /// Get the stored handle for a link.
    pub fn get_link<T: Component>(&self, entity: Entity, object: &Arc<T>) -> WorldResult<Arc<T>> {
        self.get_by_key::<Arc<T>>(entity, ComponentKey::link(object))
            .map(Arc::clone)
    }

    /// Check for a plain component.
    #[must_use]
    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        self.has_key(entity, ComponentKey::plain::<T>())
    }

    /// Check for a relation component targeting exactly `target`.
    #[must_use]
    pub fn has_relation<T: Component>(&self, entity: Entity, target: Entity) -> bool {
        self.has_key(entity, ComponentKey::relation::<T>(target))
    }

    /// Check for a link to exactly this object.
    #[must_use]
    pub fn has_link<T: Component>(&self, entity: Entity, object: &Arc<T>) -> bool {
        self.has_key(entity, ComponentKey::link(object))
    }

    /// Check whether any key on the entity matches the expression.
    ///
    /// This is the wildcard-capable form of `has`.
    #[must_use]
    pub fn has_matching(&self, entity: Entity, matcher: Match) -> bool {
        match self.require(entity) {
            Ok(location) => self.archetypes.index(location.archetype).has_matching(matcher),
            Err(_) => false,
        }
    }

    /// List the targets of every `T`-relation on the entity.
    pub fn relations<T: Component>(&self, entity: Entity) -> WorldResult<Vec<Entity>> {
        let location = self.require(entity)?;
        let matcher = Match::any_entity::<T>();

        Ok(self
            .archetypes
            .index(location.archetype)
            .keys()
            .iter()
            .filter(|&&key| matcher.matches(key))
            .filter_map(|key| key.target().entity())
            .collect())
    }

    /// Start building a query over this world.
    #[must_use]
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Get the archetype tables.
    #[must_use]
    pub(crate) fn archetypes(&self) -> &ArchetypeStorage {
        &self.archetypes
    }

    // ==================== Internals ====================

    /// Look up a live entity's location.
    fn require(&self, entity: Entity) -> WorldResult<EntityLocation> {
        if !self.identities.is_live(entity) {
            return Err(WorldError::NotFound(entity));
        }

        self.locations
            .get(entity.index() as usize)
            .copied()
            .flatten()
            .ok_or(WorldError::NotFound(entity))
    }

    fn ensure_location_slot(&mut self, entity: Entity) {
        let index = entity.index() as usize;
        if index >= self.locations.len() {
            self.locations.resize(index + 1, None);
        }
    }

    /// Point a swap-displaced entity at the row it now occupies.
    fn retarget_swapped(&mut self, swapped: Option<Entity>, row: usize) {
        if let Some(swapped_entity) = swapped {
            if let Some(Some(location)) = self.locations.get_mut(swapped_entity.index() as usize) {
                location.row = row;
            }
        }
    }

    fn attach_by_key<V: Component>(
        &mut self,
        entity: Entity,
        key: ComponentKey,
        info: &ComponentInfo,
        value: V,
    ) -> WorldResult<()> {
        let location = self.require(entity)?;
        let src = location.archetype;

        if self.archetypes.index(src).contains(key) {
            // Replace in place; the old value is dropped.
            // SAFETY: the row is in bounds and V is the column type
            unsafe {
                self.archetypes
                    .index_mut(src)
                    .write_value(key, location.row, value);
            }
            return Ok(());
        }

        let dst = self.archetypes.with_key(src, key, info);

        // SAFETY: the row is in bounds, and src gained no key, so dst
        // differs from it and covers every src column
        let (dst_row, swapped) = unsafe { self.archetypes.move_row(src, location.row, dst, false) };

        // SAFETY: dst_row is the freshly moved row; the new column's
        // value slot is the one still unfilled
        unsafe {
            self.archetypes.index_mut(dst).write_value(key, dst_row, value);
        }

        self.retarget_swapped(swapped, location.row);
        self.locations[entity.index() as usize] = Some(EntityLocation {
            archetype: dst,
            row: dst_row,
        });

        Ok(())
    }

    fn detach_by_key<V: Component>(&mut self, entity: Entity, key: ComponentKey) -> WorldResult<V> {
        let location = self.require(entity)?;
        let src = location.archetype;

        let value = {
            let archetype = self.archetypes.index(src);
            let column = archetype
                .column(key)
                .ok_or(WorldError::MissingComponent { entity, key })?;
            debug_assert!(column.info().is::<V>(), "detach type mismatch");

            // SAFETY: the row is in bounds; the slot is retired below
            // by move_row without dropping
            unsafe { std::ptr::read(column.get_unchecked_raw(location.row).cast::<V>()) }
        };

        let dst = self.archetypes.without_key(src, key);

        // SAFETY: the row is in bounds, the archetypes differ, and the
        // one missing column's value was read out above
        let (dst_row, swapped) = unsafe { self.archetypes.move_row(src, location.row, dst, false) };

        self.retarget_swapped(swapped, location.row);
        self.locations[entity.index() as usize] = Some(EntityLocation {
            archetype: dst,
            row: dst_row,
        });

        Ok(value)
    }

    fn get_by_key<V: Component>(&self, entity: Entity, key: ComponentKey) -> WorldResult<&V> {
        let location = self.require(entity)?;
        let archetype = self.archetypes.index(location.archetype);

        // SAFETY: the row is in bounds; get_value checks the key and
        // the column type is V by key construction
        unsafe { archetype.get_value::<V>(key, location.row) }
            .ok_or(WorldError::MissingComponent { entity, key })
    }

    fn has_key(&self, entity: Entity, key: ComponentKey) -> bool {
        match self.require(entity) {
            Ok(location) => self.archetypes.index(location.archetype).contains(key),
            Err(_) => false,
        }
    }

    /// Strip every stored key with exactly this target, migrating
    /// affected entities to the narrowed archetype.
    fn strip_target(&mut self, target: Identity) {
        for arch_id in self.archetypes.targeting(target) {
            let dst = self.archetypes.without_target(arch_id, target);
            debug_assert_ne!(dst, arch_id);

            let migrated = self.archetypes.index(arch_id).len();
            trace!("stripping {} rows targeting {} from {:?}", migrated, target, arch_id);

            // Drain from the back so no row ever gets backfilled.
            loop {
                let source = self.archetypes.index(arch_id);
                let Some(&victim) = source.entities().last() else {
                    break;
                };
                let row = source.len() - 1;

                // SAFETY: row is the last in-bounds index, the
                // archetypes differ, and stripped values are dropped
                let (dst_row, swapped) = unsafe { self.archetypes.move_row(arch_id, row, dst, true) };
                debug_assert!(swapped.is_none());

                self.locations[victim.index() as usize] = Some(EntityLocation {
                    archetype: dst,
                    row: dst_row,
                });
            }
        }
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("live_entities", &self.identities.live_count())
            .field("archetypes", &self.archetypes.len())
            .finish()
    }
}
