//! Type expressions and the matching algebra.
//!
//! A [`TypeExpr`] pairs a component type with a target [`Identity`] and
//! is the unit of comparison everywhere: archetype signatures, query
//! terms, and component lookups all speak expressions. Two newtypes
//! keep the two sides of the algebra from mixing:
//!
//! - [`ComponentKey`] is the storage side. Its target is always
//!   concrete (plain, entity, or object), enforced at construction.
//! - [`Match`] is the query side. Its target may additionally be one
//!   of the wildcards, and matching is deliberately asymmetric: a
//!   `Match` is asked whether it accepts a `ComponentKey`, never the
//!   other way round.

use std::{fmt, sync::Arc};

use crate::{
    component::{Component, ComponentId},
    error::KeyError,
    identity::{Entity, Identity},
    link::{LinkId, link_of},
};

/// A component type paired with a target identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeExpr {
    ty: ComponentId,
    target: Identity,
}

impl TypeExpr {
    #[must_use]
    pub const fn new(ty: ComponentId, target: Identity) -> Self {
        Self { ty, target }
    }

    /// Get the component type.
    #[must_use]
    pub const fn ty(self) -> ComponentId {
        self.ty
    }

    /// Get the target identity.
    #[must_use]
    pub const fn target(self) -> Identity {
        self.target
    }

    /// Check whether this expression, read as a query, accepts `stored`.
    ///
    /// The component type must be identical; the target then decides
    /// via [`Identity::accepts`]. Wildcards only ever widen the query
    /// side, so `stored` is expected to be concrete.
    #[must_use]
    pub fn matches(self, stored: Self) -> bool {
        self.ty == stored.ty && self.target.accepts(stored.target)
    }

    /// Check whether the target is a wildcard.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.target.is_wildcard()
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.target.is_plain() {
            write!(f, "{}", self.ty.short_name())
        } else {
            write!(f, "{}({})", self.ty.short_name(), self.target)
        }
    }
}

impl fmt::Debug for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeExpr({self})")
    }
}

/// A stored component key: a [`TypeExpr`] with a concrete target.
///
/// Keys are what archetype signatures are made of. Construction
/// guarantees the target is never a wildcard, so storage code can
/// compare keys with plain equality.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentKey(TypeExpr);

impl ComponentKey {
    /// Key for a plain component.
    #[must_use]
    pub fn plain<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::Plain))
    }

    /// Key for a relation component targeting `target`.
    #[must_use]
    pub fn relation<T: Component>(target: Entity) -> Self {
        Self(TypeExpr::new(
            ComponentId::of::<T>(),
            Identity::Entity(target),
        ))
    }

    /// Key for a link to an interned object.
    #[must_use]
    pub fn link<T: Component>(object: &Arc<T>) -> Self {
        Self(TypeExpr::new(
            ComponentId::of::<T>(),
            Identity::Object(link_of(object)),
        ))
    }

    /// Key with a caller-supplied target identity.
    ///
    /// Rejects wildcard targets, and object targets whose interned
    /// type differs from `T`.
    pub fn with_target<T: Component>(target: Identity) -> Result<Self, KeyError> {
        let ty = ComponentId::of::<T>();

        if target.is_wildcard() {
            return Err(KeyError::WildcardTarget(target));
        }

        if let Identity::Object(link) = target {
            if link.ty() != ty {
                return Err(KeyError::TargetTypeMismatch {
                    expected: ty,
                    found: link.ty(),
                });
            }
        }

        Ok(Self(TypeExpr::new(ty, target)))
    }

    /// Get the underlying expression.
    #[must_use]
    pub const fn expr(self) -> TypeExpr {
        self.0
    }

    /// Get the component type.
    #[must_use]
    pub const fn ty(self) -> ComponentId {
        self.0.ty()
    }

    /// Get the target identity.
    #[must_use]
    pub const fn target(self) -> Identity {
        self.0.target()
    }

    /// Check whether this key has a plain target.
    #[must_use]
    pub const fn is_plain(self) -> bool {
        self.0.target().is_plain()
    }

    /// Check whether this key targets an entity.
    #[must_use]
    pub const fn is_relation(self) -> bool {
        self.0.target().is_entity()
    }

    /// Check whether this key targets a linked object.
    #[must_use]
    pub const fn is_link(self) -> bool {
        self.0.target().is_object()
    }
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentKey({})", self.0)
    }
}

/// A query-side expression: a [`TypeExpr`] whose target may be a
/// wildcard.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Match(TypeExpr);

impl Match {
    /// Match the plain component only.
    #[must_use]
    pub fn plain<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::Plain))
    }

    /// Match the relation targeting exactly `target`.
    #[must_use]
    pub fn relation<T: Component>(target: Entity) -> Self {
        Self(TypeExpr::new(
            ComponentId::of::<T>(),
            Identity::Entity(target),
        ))
    }

    /// Match the link to exactly this object.
    #[must_use]
    pub fn link<T: Component>(object: &Arc<T>) -> Self {
        Self(TypeExpr::new(
            ComponentId::of::<T>(),
            Identity::Object(link_of(object)),
        ))
    }

    /// Match the link with exactly this id.
    #[must_use]
    pub fn link_id<T: Component>(link: LinkId) -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::Object(link)))
    }

    /// Match any target, including plain.
    #[must_use]
    pub fn any<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::Any))
    }

    /// Match any non-plain target.
    #[must_use]
    pub fn any_target<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::AnyTarget))
    }

    /// Match any entity target.
    #[must_use]
    pub fn any_entity<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::AnyEntity))
    }

    /// Match any object target.
    #[must_use]
    pub fn any_object<T: Component>() -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), Identity::AnyObject))
    }

    /// Match a caller-supplied target identity, wildcards included.
    #[must_use]
    pub fn with_target<T: Component>(target: Identity) -> Self {
        Self(TypeExpr::new(ComponentId::of::<T>(), target))
    }

    /// Check whether this expression accepts `key`.
    #[must_use]
    pub fn matches(self, key: ComponentKey) -> bool {
        self.0.matches(key.expr())
    }

    /// Get the underlying expression.
    #[must_use]
    pub const fn expr(self) -> TypeExpr {
        self.0
    }

    /// Get the component type.
    #[must_use]
    pub const fn ty(self) -> ComponentId {
        self.0.ty()
    }

    /// Get the target identity.
    #[must_use]
    pub const fn target(self) -> Identity {
        self.0.target()
    }

    /// Check whether the target is a wildcard.
    #[must_use]
    pub const fn is_wildcard(self) -> bool {
        self.0.is_wildcard()
    }
}

impl From<ComponentKey> for Match {
    /// A stored key used as a query matches exactly itself.
    fn from(key: ComponentKey) -> Self {
        Self(key.expr())
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Debug for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Match({})", self.0)
    }
}
