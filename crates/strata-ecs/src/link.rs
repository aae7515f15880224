//! Interned object links.
//!
//! A link attaches a shared object to entities, keyed by the object's
//! identity rather than its value. The registry interns each distinct
//! object once (by component type and allocation address) and issues a
//! small copyable [`LinkId`] in return. The registry keeps a strong
//! reference, so an issued id stays resolvable for the process
//! lifetime and the address cannot be reused behind its back.

use std::{
    any::Any,
    fmt,
    sync::{Arc, OnceLock},
};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::{
    component::{Component, ComponentId},
    error::LinkError,
};

/// Identity of an interned linked object.
///
/// Two ids are equal iff they were issued for the same object. Equal
/// values in different allocations get distinct ids.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkId {
    /// Component type of the linked object.
    ty: ComponentId,
    /// Index into the registry's object table.
    slot: u32,
}

impl LinkId {
    pub(crate) const fn new(ty: ComponentId, slot: u32) -> Self {
        Self { ty, slot }
    }

    /// Get the component type of the linked object.
    #[must_use]
    pub const fn ty(self) -> ComponentId {
        self.ty
    }

    /// Get the registry slot.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }
}

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkId({self})")
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ty.short_name(), self.slot)
    }
}

/// Process-global link registry state.
#[derive(Default)]
struct LinkRegistry {
    /// Map from (component type, allocation address) to slot.
    by_ptr: FxHashMap<(ComponentId, usize), u32>,
    /// Interned objects indexed by slot.
    objects: Vec<Arc<dyn Any + Send + Sync>>,
}

fn registry() -> &'static RwLock<LinkRegistry> {
    static REGISTRY: OnceLock<RwLock<LinkRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(LinkRegistry::default()))
}

/// Intern an object and get its link id.
///
/// Interning the same `Arc` twice returns the same id. The registry
/// clones the `Arc`, keeping the object alive as long as the process.
#[must_use]
pub fn link_of<T: Component>(object: &Arc<T>) -> LinkId {
    let ty = ComponentId::of::<T>();
    let addr = Arc::as_ptr(object) as usize;

    if let Some(&slot) = registry().read().by_ptr.get(&(ty, addr)) {
        return LinkId::new(ty, slot);
    }

    let mut reg = registry().write();

    // Re-check under the write lock; another thread may have won.
    if let Some(&slot) = reg.by_ptr.get(&(ty, addr)) {
        return LinkId::new(ty, slot);
    }

    let slot = reg.objects.len() as u32;
    reg.objects.push(Arc::clone(object) as Arc<dyn Any + Send + Sync>);
    reg.by_ptr.insert((ty, addr), slot);

    LinkId::new(ty, slot)
}

/// Resolve a link id back to its object.
///
/// Fails loudly if the id was never issued or names an object of a
/// different type; a link id is never silently reinterpreted.
pub fn resolve<T: Component>(id: LinkId) -> Result<Arc<T>, LinkError> {
    let object = registry()
        .read()
        .objects
        .get(id.slot as usize)
        .cloned()
        .ok_or(LinkError::Unknown(id))?;

    object.downcast::<T>().map_err(|_| LinkError::TypeMismatch {
        id,
        expected: std::any::type_name::<T>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Settings {
        verbose: bool,
    }

    #[derive(Debug, PartialEq)]
    struct Palette(Vec<u8>);

    #[test]
    fn test_intern_is_idempotent() {
        let settings = Arc::new(Settings { verbose: true });

        let a = link_of(&settings);
        let b = link_of(&settings);

        assert_eq!(a, b);
        assert_eq!(a.ty(), ComponentId::of::<Settings>());
    }

    #[test]
    fn test_distinct_objects_get_distinct_ids() {
        // Equal values, different allocations: object identity wins.
        let a = Arc::new(Settings { verbose: false });
        let b = Arc::new(Settings { verbose: false });

        assert_eq!(*a, *b);
        assert_ne!(link_of(&a), link_of(&b));
    }

    #[test]
    fn test_resolve_returns_the_same_object() {
        let palette = Arc::new(Palette(vec![1, 2, 3]));
        let id = link_of(&palette);

        let resolved = resolve::<Palette>(id).unwrap();
        assert!(Arc::ptr_eq(&palette, &resolved));
    }

    #[test]
    fn test_resolve_wrong_type_fails() {
        let palette = Arc::new(Palette(vec![9]));
        let id = link_of(&palette);

        let err = resolve::<Settings>(id).unwrap_err();
        assert!(matches!(err, LinkError::TypeMismatch { .. }));
    }

    #[test]
    fn test_resolve_unknown_slot_fails() {
        let id = LinkId::new(ComponentId::of::<Settings>(), u32::MAX - 1);
        assert_eq!(resolve::<Settings>(id), Err(LinkError::Unknown(id)));
    }

    #[test]
    fn test_display_names_type_and_slot() {
        let settings = Arc::new(Settings { verbose: true });
        let id = link_of(&settings);

        let rendered = id.to_string();
        assert!(rendered.starts_with("Settings@"));
    }
}
