//! Archetype tables grouping entities with identical key sets.
//!
//! An archetype is one table per distinct set of component keys. Every
//! entity whose keys form that set lives in the table, one row each,
//! so matching and iteration work on whole tables instead of single
//! entities. Adding or removing a key moves the row to another table.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::{
    component::ComponentInfo,
    expr::{ComponentKey, Match},
    identity::{Entity, Identity},
    storage::Column,
};

/// Inline capacity for key sets; most entities carry few keys.
type Signature = SmallVec<[ComponentKey; 8]>;

/// Unique identifier for an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// The empty archetype (no keys).
    pub const EMPTY: Self = Self(0);

    /// Create an archetype id from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArchetypeId({})", self.0)
    }
}

/// A table of entities sharing one set of component keys.
pub struct Archetype {
    id: ArchetypeId,
    /// Keys in this archetype, sorted.
    keys: Signature,
    /// Value columns, one per key, in `keys` order.
    columns: Vec<Column>,
    /// Map from key to column position.
    key_indices: FxHashMap<ComponentKey, usize>,
    /// Entities stored here, one per row.
    entities: Vec<Entity>,
}

impl Archetype {
    /// Create an archetype for the given keys and their column types.
    ///
    /// Entries are sorted by key, so equal key sets produce identical
    /// layouts regardless of insertion order.
    #[must_use]
    pub fn new(id: ArchetypeId, entries: &[(ComponentKey, ComponentInfo)]) -> Self {
        let mut entries: Vec<(ComponentKey, ComponentInfo)> = entries.to_vec();
        entries.sort_unstable_by_key(|(key, _)| *key);

        let mut keys = Signature::with_capacity(entries.len());
        let mut columns = Vec::with_capacity(entries.len());
        let mut key_indices = FxHashMap::default();

        for (idx, (key, info)) in entries.into_iter().enumerate() {
            keys.push(key);
            key_indices.insert(key, idx);
            columns.push(Column::new(info));
        }

        Self {
            id,
            keys,
            columns,
            key_indices,
            entities: Vec::new(),
        }
    }

    /// Create the empty archetype.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(ArchetypeId::EMPTY, &[])
    }

    /// Get the archetype id.
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Get the keys stored here, sorted.
    #[must_use]
    pub fn keys(&self) -> &[ComponentKey] {
        &self.keys
    }

    /// Iterate over the keys paired with their column types.
    pub fn entries(&self) -> impl Iterator<Item = (ComponentKey, ComponentInfo)> + '_ {
        self.keys
            .iter()
            .zip(&self.columns)
            .map(|(&key, column)| (key, column.info().clone()))
    }

    /// Check whether this archetype stores a key.
    #[must_use]
    pub fn contains(&self, key: ComponentKey) -> bool {
        self.key_indices.contains_key(&key)
    }

    /// Check whether any stored key matches the expression.
    #[must_use]
    pub fn has_matching(&self, matcher: Match) -> bool {
        self.keys.iter().any(|&key| matcher.matches(key))
    }

    /// Check whether any stored key has exactly this target.
    #[must_use]
    pub fn has_target(&self, target: Identity) -> bool {
        self.keys.iter().any(|key| key.target() == target)
    }

    /// Iterate over the column positions whose key matches the
    /// expression, in key order.
    pub fn columns_matching(&self, matcher: Match) -> impl Iterator<Item = usize> + '_ {
        self.keys
            .iter()
            .enumerate()
            .filter(move |&(_, &key)| matcher.matches(key))
            .map(|(idx, _)| idx)
    }

    /// Get the number of entities stored here.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check whether the archetype has no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Get the entities stored here, in row order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Get the column position for a key.
    #[must_use]
    pub fn key_index(&self, key: ComponentKey) -> Option<usize> {
        self.key_indices.get(&key).copied()
    }

    /// Get the column for a key.
    #[must_use]
    pub fn column(&self, key: ComponentKey) -> Option<&Column> {
        self.key_index(key).map(|idx| &self.columns[idx])
    }

    /// Get the column for a key, mutably.
    #[must_use]
    pub fn column_mut(&mut self, key: ComponentKey) -> Option<&mut Column> {
        self.key_index(key).map(|idx| &mut self.columns[idx])
    }

    /// Get a column by position.
    #[must_use]
    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Add a row for `entity` and return its index.
    ///
    /// Columns are not touched; the caller must fill every column so
    /// lengths stay in sync.
    pub fn allocate(&mut self, entity: Entity) -> usize {
        let row = self.entities.len();
        self.entities.push(entity);
        row
    }

    /// Remove the row at `row` by swap-remove.
    ///
    /// Returns the entity that now occupies `row`, if any.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds, and every column must already have had
    /// its value at `row` removed.
    pub unsafe fn deallocate(&mut self, row: usize) -> Option<Entity> {
        debug_assert!(row < self.entities.len());

        let last_row = self.entities.len() - 1;
        self.entities.swap_remove(row);

        if row < last_row {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Remove the row at `row` entirely, dropping every column value.
    ///
    /// Returns the entity that now occupies `row`, if any.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds.
    pub unsafe fn drop_row(&mut self, row: usize) -> Option<Entity> {
        for column in &mut self.columns {
            // SAFETY: caller ensures row is in bounds for every column
            unsafe {
                column.swap_remove_drop(row);
            }
        }

        // SAFETY: every column was just shortened to match
        unsafe { self.deallocate(row) }
    }

    /// Write a value for `key` at `row`, either filling a freshly
    /// allocated row or replacing (and dropping) the previous value.
    ///
    /// # Panics
    ///
    /// Panics if the archetype does not store `key`.
    ///
    /// # Safety
    ///
    /// `row` must be at most the column length, and `T` must be the
    /// column's value type.
    pub unsafe fn write_value<T: 'static>(&mut self, key: ComponentKey, row: usize, value: T) {
        let idx = self
            .key_indices
            .get(&key)
            .copied()
            .expect("key not stored in this archetype");
        let column = &mut self.columns[idx];

        if row == column.len() {
            column.push(value);
        } else {
            // SAFETY: caller ensures row is in bounds and the type matches
            unsafe {
                *column.get_unchecked_mut::<T>(row) = value;
            }
        }
    }

    /// Get the value for `key` at `row`.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds, and `T` must be the column's value type.
    #[must_use]
    pub unsafe fn get_value<T: 'static>(&self, key: ComponentKey, row: usize) -> Option<&T> {
        let idx = self.key_index(key)?;
        // SAFETY: caller ensures row is in bounds and the type matches
        Some(unsafe { self.columns[idx].get_unchecked::<T>(row) })
    }

    /// Get the value for `key` at `row`, mutably.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds, `T` must be the column's value type,
    /// and no other reference to the value may exist.
    #[must_use]
    pub unsafe fn get_value_mut<T: 'static>(
        &mut self,
        key: ComponentKey,
        row: usize,
    ) -> Option<&mut T> {
        let idx = self.key_index(key)?;
        // SAFETY: caller ensures bounds, type, and exclusivity
        Some(unsafe { self.columns[idx].get_unchecked_mut::<T>(row) })
    }
}

impl fmt::Debug for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archetype")
            .field("id", &self.id)
            .field("keys", &self.keys)
            .field("entity_count", &self.entities.len())
            .finish()
    }
}

/// All archetypes of one world, interned by key set.
pub struct ArchetypeStorage {
    archetypes: Vec<Archetype>,
    /// Map from sorted key set to archetype id.
    archetype_map: FxHashMap<Signature, ArchetypeId>,
}

impl Default for ArchetypeStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchetypeStorage {
    /// Create storage holding just the empty archetype.
    #[must_use]
    pub fn new() -> Self {
        let mut storage = Self {
            archetypes: Vec::new(),
            archetype_map: FxHashMap::default(),
        };

        storage.archetypes.push(Archetype::empty());
        storage
            .archetype_map
            .insert(Signature::new(), ArchetypeId::EMPTY);

        storage
    }

    /// Get or create the archetype for the given entries.
    pub fn get_or_create(&mut self, entries: &[(ComponentKey, ComponentInfo)]) -> ArchetypeId {
        self.intern(entries.to_vec())
    }

    /// Get an archetype by id.
    #[must_use]
    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.as_raw() as usize)
    }

    /// Get an archetype by id, mutably.
    #[must_use]
    pub fn get_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.as_raw() as usize)
    }

    /// Get the number of archetypes, the empty one included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    /// Check whether only the empty archetype exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.archetypes.len() <= 1
    }

    /// Iterate over all archetypes.
    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Get the archetype reached from `base` by adding a key.
    ///
    /// Returns `base` itself when it already stores the key.
    pub fn with_key(
        &mut self,
        base: ArchetypeId,
        key: ComponentKey,
        info: &ComponentInfo,
    ) -> ArchetypeId {
        let base_arch = &self.archetypes[base.as_raw() as usize];

        if base_arch.contains(key) {
            return base;
        }

        let mut entries: Vec<_> = base_arch.entries().collect();
        entries.push((key, info.clone()));
        self.intern(entries)
    }

    /// Get the archetype reached from `base` by removing a key.
    ///
    /// Returns `base` itself when it does not store the key.
    pub fn without_key(&mut self, base: ArchetypeId, key: ComponentKey) -> ArchetypeId {
        let base_arch = &self.archetypes[base.as_raw() as usize];

        if !base_arch.contains(key) {
            return base;
        }

        let entries: Vec<_> = base_arch.entries().filter(|(k, _)| *k != key).collect();
        self.intern(entries)
    }

    /// Get the archetype reached from `base` by removing every key
    /// with exactly this target.
    ///
    /// Returns `base` itself when no key has the target.
    pub fn without_target(&mut self, base: ArchetypeId, target: Identity) -> ArchetypeId {
        let base_arch = &self.archetypes[base.as_raw() as usize];

        if !base_arch.has_target(target) {
            return base;
        }

        let entries: Vec<_> = base_arch
            .entries()
            .filter(|(k, _)| k.target() != target)
            .collect();
        self.intern(entries)
    }

    /// Collect the non-empty archetypes storing any key with exactly
    /// this target.
    #[must_use]
    pub fn targeting(&self, target: Identity) -> Vec<ArchetypeId> {
        self.archetypes
            .iter()
            .filter(|arch| !arch.is_empty() && arch.has_target(target))
            .map(Archetype::id)
            .collect()
    }

    /// Move the row at `src`/`row` to the tail of `dst`.
    ///
    /// Columns present in both archetypes carry their values over.
    /// Values of columns missing from `dst` are dropped when
    /// `drop_missing` is set, and simply abandoned otherwise (for
    /// callers that already read them out).
    ///
    /// Returns the row index in `dst`, and the entity swapped into
    /// `row` at `src`, if any.
    ///
    /// # Safety
    ///
    /// `row` must be in bounds for `src`, `src` and `dst` must be
    /// distinct, and when `drop_missing` is false every value missing
    /// from `dst` must already have been moved out by the caller.
    pub unsafe fn move_row(
        &mut self,
        src: ArchetypeId,
        row: usize,
        dst: ArchetypeId,
        drop_missing: bool,
    ) -> (usize, Option<Entity>) {
        let (src_arch, dst_arch) = self.pair_mut(src, dst);

        let entity = src_arch.entities[row];
        let dst_row = dst_arch.allocate(entity);

        for idx in 0..src_arch.keys.len() {
            let key = src_arch.keys[idx];
            let src_column = &mut src_arch.columns[idx];

            match dst_arch.key_index(key) {
                // SAFETY: row is in bounds and both columns share a type
                Some(dst_idx) => unsafe {
                    src_column.transfer(row, &mut dst_arch.columns[dst_idx]);
                },
                // SAFETY: row is in bounds; the caller vouches for
                // moved-out values when drop_missing is false
                None => unsafe {
                    if drop_missing {
                        src_column.swap_remove_drop(row);
                    } else {
                        src_column.forget_swap_remove(row);
                    }
                },
            }
        }

        // SAFETY: row is in bounds and every column was just shortened
        let swapped = unsafe { src_arch.deallocate(row) };

        (dst_row, swapped)
    }

    /// Index an archetype whose id is known to be valid.
    pub(crate) fn index(&self, id: ArchetypeId) -> &Archetype {
        &self.archetypes[id.as_raw() as usize]
    }

    /// Index an archetype whose id is known to be valid, mutably.
    pub(crate) fn index_mut(&mut self, id: ArchetypeId) -> &mut Archetype {
        &mut self.archetypes[id.as_raw() as usize]
    }

    /// Borrow two distinct archetypes mutably.
    fn pair_mut(&mut self, a: ArchetypeId, b: ArchetypeId) -> (&mut Archetype, &mut Archetype) {
        let a_idx = a.as_raw() as usize;
        let b_idx = b.as_raw() as usize;
        debug_assert_ne!(a_idx, b_idx, "pair_mut requires distinct archetypes");

        if a_idx < b_idx {
            let (left, right) = self.archetypes.split_at_mut(b_idx);
            (&mut left[a_idx], &mut right[0])
        } else {
            let (left, right) = self.archetypes.split_at_mut(a_idx);
            (&mut right[0], &mut left[b_idx])
        }
    }

    fn intern(&mut self, entries: Vec<(ComponentKey, ComponentInfo)>) -> ArchetypeId {
        let mut signature: Signature = entries.iter().map(|(key, _)| *key).collect();
        signature.sort_unstable();

        if let Some(&id) = self.archetype_map.get(&signature) {
            return id;
        }

        let id = ArchetypeId::from_raw(self.archetypes.len() as u32);
        trace!("creating archetype {:?} with {} keys", id, entries.len());
        self.archetypes.push(Archetype::new(id, &entries));
        self.archetype_map.insert(signature, id);

        id
    }
}

impl fmt::Debug for ArchetypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchetypeStorage")
            .field("archetype_count", &self.archetypes.len())
            .finish()
    }
}
