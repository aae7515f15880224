//! Component type registration and metadata.
//!
//! Components are data types attached to entities. Each component type
//! gets a dense runtime id and metadata for the type-erased column
//! machinery. The registry is process-global so that keys and match
//! expressions can be built from a type parameter alone, without a
//! world in hand.

use std::{
    alloc::Layout,
    any::TypeId,
    fmt,
    sync::{
        OnceLock,
        atomic::{AtomicU32, Ordering},
    },
};

use hashbrown::HashMap;
use parking_lot::RwLock;

/// Marker trait for types that can be used as components.
///
/// # Example
///
/// ```ignore
/// struct Position { x: f32, y: f32 }
///
/// let key = ComponentKey::plain::<Position>();
/// ```
pub trait Component: Send + Sync + 'static {}

// Blanket implementation for all suitable types
impl<T: Send + Sync + 'static> Component for T {}

/// Unique identifier for a component type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u32);

impl ComponentId {
    /// Get the id for a component type, registering it on first use.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        register::<T>().id()
    }

    /// Create a component id from a raw value.
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Get the registered type name for this id.
    #[must_use]
    pub fn name(self) -> &'static str {
        ComponentInfo::lookup(self).map_or("<unregistered>", |info| info.name())
    }

    /// Get the last path segment of the registered type name.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        let name = self.name();
        name.rsplit("::").next().unwrap_or(name)
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComponentId({})", self.0)
    }
}

/// Runtime information about a component type.
#[derive(Clone)]
pub struct ComponentInfo {
    /// Unique id for this component type.
    id: ComponentId,
    /// Type name for diagnostics.
    name: &'static str,
    /// Memory layout of the component.
    layout: Layout,
    /// Function to drop a component in place.
    drop_fn: Option<unsafe fn(*mut u8)>,
    /// Rust TypeId for type checking.
    type_id: TypeId,
}

impl ComponentInfo {
    /// Create component info for a concrete type under the given id.
    #[must_use]
    pub fn of<T: Component>(id: ComponentId) -> Self {
        Self {
            id,
            name: std::any::type_name::<T>(),
            layout: Layout::new::<T>(),
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr.cast::<T>()) })
            } else {
                None
            },
            type_id: TypeId::of::<T>(),
        }
    }

    /// Look up the registered info for an id.
    #[must_use]
    pub fn lookup(id: ComponentId) -> Option<Self> {
        registry().read().infos.get(id.as_raw() as usize).cloned()
    }

    /// Get the component id.
    #[must_use]
    pub const fn id(&self) -> ComponentId {
        self.id
    }

    /// Get the component type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Get the memory layout.
    #[must_use]
    pub const fn layout(&self) -> Layout {
        self.layout
    }

    /// Get the size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.layout.size()
    }

    /// Get the alignment requirement.
    #[must_use]
    pub const fn align(&self) -> usize {
        self.layout.align()
    }

    /// Check if the component needs drop.
    #[must_use]
    pub const fn needs_drop(&self) -> bool {
        self.drop_fn.is_some()
    }

    /// Drop a component at the given pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must point to a valid, initialized instance of this component type.
    /// - The memory at `ptr` must not be accessed after this call.
    pub unsafe fn drop_in_place(&self, ptr: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            unsafe { drop_fn(ptr) };
        }
    }

    /// Check if this info is for the given type.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ComponentInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .finish()
    }
}

/// Global counter for generating unique component ids.
static NEXT_COMPONENT_ID: AtomicU32 = AtomicU32::new(0);

/// Process-global component registry state.
#[derive(Default)]
struct Registry {
    /// Map from TypeId to ComponentId.
    type_to_id: HashMap<TypeId, ComponentId>,
    /// Component info indexed by ComponentId.
    infos: Vec<ComponentInfo>,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(Registry::default()))
}

/// Register a component type and return its info.
///
/// Registration is idempotent; after the first call for a type this is
/// a read-locked map lookup.
pub fn register<T: Component>() -> ComponentInfo {
    let type_id = TypeId::of::<T>();

    {
        let reg = registry().read();
        if let Some(&id) = reg.type_to_id.get(&type_id) {
            if let Some(info) = reg.infos.get(id.as_raw() as usize) {
                return info.clone();
            }
        }
    }

    let mut reg = registry().write();

    // Re-check under the write lock; another thread may have won.
    if let Some(&id) = reg.type_to_id.get(&type_id) {
        if let Some(info) = reg.infos.get(id.as_raw() as usize) {
            return info.clone();
        }
    }

    let id = ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed));
    let info = ComponentInfo::of::<T>(id);

    // The counter only advances under the write lock, so ids index the
    // info table densely.
    debug_assert_eq!(id.as_raw() as usize, reg.infos.len());

    reg.type_to_id.insert(type_id, id);
    reg.infos.push(info.clone());

    info
}

/// Get the number of registered component types.
#[must_use]
pub fn registered_count() -> usize {
    registry().read().type_to_id.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position {
        x: f32,
        y: f32,
    }

    struct Velocity {
        x: f32,
        y: f32,
    }

    struct Name(String);

    #[test]
    fn test_registration_is_idempotent() {
        let id1 = ComponentId::of::<Position>();
        let id2 = ComponentId::of::<Position>();

        assert_eq!(id1, id2);
        assert_ne!(id1, ComponentId::of::<Velocity>());
    }

    #[test]
    fn test_component_info() {
        let info = register::<Position>();

        assert_eq!(info.id(), ComponentId::of::<Position>());
        assert_eq!(info.size(), std::mem::size_of::<Position>());
        assert_eq!(info.align(), std::mem::align_of::<Position>());
        assert!(!info.needs_drop());
        assert!(info.is::<Position>());
        assert!(!info.is::<Velocity>());
    }

    #[test]
    fn test_component_with_drop() {
        let info = register::<Name>();
        assert!(info.needs_drop());
    }

    #[test]
    fn test_lookup() {
        let id = ComponentId::of::<Velocity>();
        let info = ComponentInfo::lookup(id).unwrap();

        assert_eq!(info.id(), id);
        assert!(info.is::<Velocity>());
        assert_eq!(id.short_name(), "Velocity");
    }

    #[test]
    fn test_unregistered_id_name() {
        assert!(ComponentInfo::lookup(ComponentId::from_raw(u32::MAX - 1)).is_none());
        assert_eq!(ComponentId::from_raw(u32::MAX - 1).name(), "<unregistered>");
    }
}
