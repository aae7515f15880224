//! Runtime-built queries over keyed components.
//!
//! Queries are assembled by method chaining and hold [`Match`]
//! expressions, so a single term can name one exact key or, through a
//! wildcard, a whole family of keys.
//!
//! When a fetch term's wildcard matches several columns of one
//! archetype, iteration enumerates every combination: an entity with a
//! plain `Strength` and two `Strength` relations yields three rows for
//! `Match::any`, one per matched column. With several wildcard terms
//! the combinations multiply. Nothing is deduplicated.
//!
//! ```ignore
//! let query = world.query()
//!     .with_plain::<Position>()
//!     .with_any_entity::<Targets>()
//!     .without(Match::plain::<Dead>())
//!     .build();
//!
//! for row in query.iter(&world) {
//!     let pos: Position = row.get_at(0);
//!     let target = row.target(1);
//!     println!("{} targets {}", row.entity(), target);
//! }
//! ```

use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    archetype::{Archetype, ArchetypeId},
    component::Component,
    expr::{ComponentKey, Match},
    identity::{Entity, Identity},
    link::LinkId,
    storage::Column,
    world::World,
};

/// How a term takes part in matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TermAccess {
    /// Must match; matched columns are fetched.
    Fetch,
    /// Must match; nothing is fetched.
    Filter,
    /// Must not match anything.
    Without,
}

/// A single term of a query.
#[derive(Clone, Copy, Debug)]
pub struct QueryTerm {
    /// The expression this term matches keys against.
    pub matcher: Match,
    /// How the term takes part in matching.
    pub access: TermAccess,
}

/// Builder for queries, chained off [`World::query`].
pub struct QueryBuilder<'w> {
    world: &'w World,
    terms: Vec<QueryTerm>,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self {
            world,
            terms: Vec::new(),
        }
    }

    /// Add a fetch term for an arbitrary expression.
    #[must_use]
    pub fn with(mut self, matcher: Match) -> Self {
        self.terms.push(QueryTerm {
            matcher,
            access: TermAccess::Fetch,
        });
        self
    }

    /// Fetch the plain component.
    #[must_use]
    pub fn with_plain<T: Component>(self) -> Self {
        self.with(Match::plain::<T>())
    }

    /// Fetch the relation targeting exactly `target`.
    #[must_use]
    pub fn with_relation<T: Component>(self, target: Entity) -> Self {
        self.with(Match::relation::<T>(target))
    }

    /// Fetch the link to exactly this object.
    #[must_use]
    pub fn with_link<T: Component>(self, object: &Arc<T>) -> Self {
        self.with(Match::link(object))
    }

    /// Fetch every target kind, plain included.
    #[must_use]
    pub fn with_any<T: Component>(self) -> Self {
        self.with(Match::any::<T>())
    }

    /// Fetch every non-plain target.
    #[must_use]
    pub fn with_any_target<T: Component>(self) -> Self {
        self.with(Match::any_target::<T>())
    }

    /// Fetch every entity-targeted relation.
    #[must_use]
    pub fn with_any_entity<T: Component>(self) -> Self {
        self.with(Match::any_entity::<T>())
    }

    /// Fetch every object link.
    #[must_use]
    pub fn with_any_object<T: Component>(self) -> Self {
        self.with(Match::any_object::<T>())
    }

    /// Require a match without fetching anything.
    #[must_use]
    pub fn filter(mut self, matcher: Match) -> Self {
        self.terms.push(QueryTerm {
            matcher,
            access: TermAccess::Filter,
        });
        self
    }

    /// Exclude archetypes where the expression matches anything.
    #[must_use]
    pub fn without(mut self, matcher: Match) -> Self {
        self.terms.push(QueryTerm {
            matcher,
            access: TermAccess::Without,
        });
        self
    }

    /// Build the query, snapshotting the matching archetypes and the
    /// columns each fetch term matched in them.
    ///
    /// Rows added to a matched archetype later are visible to the
    /// query; archetypes created later are not.
    #[must_use]
    pub fn build(self) -> Query {
        let mut plans = Vec::new();

        'archetypes: for archetype in self.world.archetypes().iter() {
            let mut fetch_columns: Vec<SmallVec<[usize; 4]>> = Vec::new();

            for term in &self.terms {
                match term.access {
                    TermAccess::Fetch => {
                        let columns: SmallVec<[usize; 4]> =
                            archetype.columns_matching(term.matcher).collect();
                        if columns.is_empty() {
                            continue 'archetypes;
                        }
                        fetch_columns.push(columns);
                    }
                    TermAccess::Filter => {
                        if !archetype.has_matching(term.matcher) {
                            continue 'archetypes;
                        }
                    }
                    TermAccess::Without => {
                        if archetype.has_matching(term.matcher) {
                            continue 'archetypes;
                        }
                    }
                }
            }

            plans.push(ArchetypePlan {
                archetype: archetype.id(),
                fetch_columns,
            });
        }

        Query {
            terms: self.terms,
            plans,
        }
    }
}

/// One matched archetype with the columns each fetch term matched.
struct ArchetypePlan {
    archetype: ArchetypeId,
    /// Matched column positions, one list per fetch term.
    fetch_columns: Vec<SmallVec<[usize; 4]>>,
}

impl ArchetypePlan {
    /// Number of column combinations this plan produces per row.
    fn combinations(&self) -> usize {
        self.fetch_columns
            .iter()
            .fold(1, |product, columns| product * columns.len())
    }
}

/// An executable query: terms plus the archetype snapshot.
pub struct Query {
    terms: Vec<QueryTerm>,
    plans: Vec<ArchetypePlan>,
}

impl Query {
    /// Get the number of matched archetypes.
    #[must_use]
    pub fn archetype_count(&self) -> usize {
        self.plans.len()
    }

    /// Get the query terms.
    #[must_use]
    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }

    /// Iterate the query against the world it was built from.
    pub fn iter<'w, 'q>(&'q self, world: &'w World) -> QueryIter<'w, 'q> {
        QueryIter {
            world,
            query: self,
            plan_idx: 0,
            combo: Vec::new(),
            row: 0,
            fresh: true,
        }
    }

    /// Run a closure for every row.
    pub fn each<F>(&self, world: &World, mut f: F)
    where
        F: FnMut(QueryRow<'_>),
    {
        for row in self.iter(world) {
            f(row);
        }
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("term_count", &self.terms.len())
            .field("archetype_count", &self.plans.len())
            .finish()
    }
}

/// Iterator over query rows.
///
/// Order is archetype, then column combination, then storage row. One
/// entity appears once per combination.
pub struct QueryIter<'w, 'q> {
    world: &'w World,
    query: &'q Query,
    plan_idx: usize,
    /// Odometer over the fetch terms' column lists.
    combo: Vec<usize>,
    row: usize,
    fresh: bool,
}

impl QueryIter<'_, '_> {
    /// Step the odometer; false when every combination is spent.
    fn advance_combo(combo: &mut [usize], lists: &[SmallVec<[usize; 4]>]) -> bool {
        for i in (0..combo.len()).rev() {
            combo[i] += 1;
            if combo[i] < lists[i].len() {
                return true;
            }
            combo[i] = 0;
        }
        false
    }
}

impl<'w> Iterator for QueryIter<'w, '_> {
    type Item = QueryRow<'w>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let plan = self.query.plans.get(self.plan_idx)?;
            let archetype = self.world.archetypes().get(plan.archetype)?;

            if self.fresh {
                self.combo.clear();
                self.combo.resize(plan.fetch_columns.len(), 0);
                self.row = 0;
                self.fresh = false;
            }

            if archetype.is_empty() {
                self.plan_idx += 1;
                self.fresh = true;
                continue;
            }

            if self.row >= archetype.len() {
                self.row = 0;
                if !Self::advance_combo(&mut self.combo, &plan.fetch_columns) {
                    self.plan_idx += 1;
                    self.fresh = true;
                }
                continue;
            }

            let columns: SmallVec<[usize; 4]> = self
                .combo
                .iter()
                .zip(&plan.fetch_columns)
                .map(|(&choice, list)| list[choice])
                .collect();

            let entity = archetype.entities()[self.row];
            let row = self.row;
            self.row += 1;

            return Some(QueryRow {
                archetype,
                entity,
                row,
                columns,
            });
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let mut remaining = 0;

        for (i, plan) in self.query.plans.iter().enumerate().skip(self.plan_idx) {
            let Some(archetype) = self.world.archetypes().get(plan.archetype) else {
                continue;
            };

            let total = plan.combinations() * archetype.len();
            if i == self.plan_idx && !self.fresh {
                // Mixed-radix position of the current combination.
                let position = self
                    .combo
                    .iter()
                    .zip(&plan.fetch_columns)
                    .fold(0, |pos, (&choice, list)| pos * list.len() + choice);
                remaining += total - (position * archetype.len() + self.row);
            } else {
                remaining += total;
            }
        }

        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for QueryIter<'_, '_> {}

/// One row of a query result: an entity under one column combination.
pub struct QueryRow<'w> {
    archetype: &'w Archetype,
    entity: Entity,
    row: usize,
    /// Chosen column per fetch term.
    columns: SmallVec<[usize; 4]>,
}

impl QueryRow<'_> {
    /// Get the entity for this row.
    #[must_use]
    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Get the value of the first fetched column storing a `T`.
    ///
    /// Link columns are read through their handle. With several fetch
    /// terms of one component type, prefer [`Self::get_at`].
    ///
    /// # Panics
    ///
    /// Panics if no fetched column stores a `T`.
    #[must_use]
    pub fn get<T: Component + Clone>(&self) -> T {
        self.columns
            .iter()
            .find_map(|&idx| {
                let column = self.archetype.column_at(idx)?;
                self.read(column)
            })
            .expect("no fetched column stores this type; use get_at for an explicit term")
    }

    /// Get the value fetched by the term at `term` (fetch terms only,
    /// counted in builder order).
    ///
    /// # Panics
    ///
    /// Panics if `term` is out of range or fetched a different type.
    #[must_use]
    pub fn get_at<T: Component + Clone>(&self, term: usize) -> T {
        let column = self
            .archetype
            .column_at(self.columns[term])
            .expect("fetched column out of range");
        self.read(column)
            .expect("fetched column stores a different type")
    }

    /// Get the key matched by the term at `term`.
    #[must_use]
    pub fn key(&self, term: usize) -> ComponentKey {
        self.archetype.keys()[self.columns[term]]
    }

    /// Get the target of the key matched by the term at `term`.
    #[must_use]
    pub fn target(&self, term: usize) -> Identity {
        self.key(term).target()
    }

    /// Get the link id of the key matched by the term at `term`, if it
    /// is a link.
    #[must_use]
    pub fn link(&self, term: usize) -> Option<LinkId> {
        self.target(term).object()
    }

    /// Check whether any key of this row's archetype matches.
    #[must_use]
    pub fn has(&self, matcher: Match) -> bool {
        self.archetype.has_matching(matcher)
    }

    /// Read a value out of a column, dereferencing link handles.
    fn read<T: Component + Clone>(&self, column: &Column) -> Option<T> {
        if column.info().is::<T>() {
            // SAFETY: the row is in bounds for its archetype and the
            // type was just checked
            Some(unsafe { column.get_unchecked::<T>(self.row) }.clone())
        } else if column.info().is::<Arc<T>>() {
            // SAFETY: as above, with the value behind a link handle
            Some(unsafe { column.get_unchecked::<Arc<T>>(self.row) }.as_ref().clone())
        } else {
            None
        }
    }
}

impl std::fmt::Debug for QueryRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRow")
            .field("entity", &self.entity)
            .field("columns", &self.columns)
            .finish()
    }
}
