//! Error types for identity, key, link, and world operations.

use thiserror::Error;

use crate::{
    component::ComponentId,
    expr::ComponentKey,
    identity::{Entity, Identity},
    link::LinkId,
};

/// Errors from identity allocation and inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The handle does not name the current occupant of its slot.
    /// Raised on recycling a handle that is already dead (double free)
    /// or was never allocated.
    #[error("stale handle: {0}")]
    Stale(Entity),

    /// A sentinel or object identity was used where a real entity
    /// handle is required.
    #[error("not an entity: {0}")]
    NotAnEntity(Identity),
}

/// Errors from constructing storable component keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Wildcards may appear in match expressions only, never in a
    /// stored key.
    #[error("wildcard target `{0}` cannot be stored")]
    WildcardTarget(Identity),

    /// A link target must carry an object of the key's component type.
    #[error("link target type mismatch: key is {expected:?}, object is {found:?}")]
    TargetTypeMismatch {
        expected: ComponentId,
        found: ComponentId,
    },
}

/// Errors from the link registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link resolves to an object of a different type.
    #[error("link {id} does not hold a `{expected}`")]
    TypeMismatch { id: LinkId, expected: &'static str },

    /// The link id was never issued by the registry.
    #[error("unknown link: {0}")]
    Unknown(LinkId),
}

/// Errors from world operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WorldError {
    /// The entity is not (or no longer) alive in this world.
    #[error("entity no longer exists: {0}")]
    NotFound(Entity),

    /// The entity is alive but does not carry the requested key.
    #[error("missing component {key} on {entity}")]
    MissingComponent { entity: Entity, key: ComponentKey },

    /// Identity error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Key construction error.
    #[error("key error: {0}")]
    Key(#[from] KeyError),

    /// Link registry error.
    #[error("link error: {0}")]
    Link(#[from] LinkError),
}

/// Result type for world operations.
pub type WorldResult<T> = Result<T, WorldError>;
