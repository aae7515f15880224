//! Type-erased column storage backing archetype tables.
//!
//! A column holds every value of one component key in one contiguous
//! allocation, so iterating an archetype walks flat arrays.

use std::{alloc::Layout, ptr::NonNull};

use crate::component::ComponentInfo;

/// A contiguous, type-erased array of one component type.
///
/// The column owns its allocation and drops remaining values when it
/// is dropped.
pub struct Column {
    /// Pointer to the value array.
    data: NonNull<u8>,
    /// Number of values stored.
    len: usize,
    /// Allocated capacity, in values.
    capacity: usize,
    /// Type information for the stored values.
    info: ComponentInfo,
}

// SAFETY: the column owns its allocation, and ComponentInfo is only
// constructible for Send + Sync types
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    /// Create an empty column for the given component type.
    #[must_use]
    pub const fn new(info: ComponentInfo) -> Self {
        Self {
            data: NonNull::dangling(),
            len: 0,
            capacity: 0,
            info,
        }
    }

    /// Get the number of values stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check whether the column is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the component info for the stored values.
    #[must_use]
    pub const fn info(&self) -> &ComponentInfo {
        &self.info
    }

    /// Append a value by copying it from `value`.
    ///
    /// # Safety
    ///
    /// `value` must point to a valid instance of the column's component
    /// type. The bytes are copied; ownership of the pointee transfers
    /// to the column, so the caller must not drop it.
    pub unsafe fn push_raw(&mut self, value: *const u8) {
        self.reserve(1);

        // SAFETY: reserve made room, so the slot at self.len is writable
        let dst = unsafe { self.get_unchecked_raw(self.len) };

        // SAFETY: both pointers are valid for the component size and
        // cannot overlap
        unsafe {
            std::ptr::copy_nonoverlapping(value, dst, self.info.size());
        }

        self.len += 1;
    }

    /// Append a typed value.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `T` is not the column's component type.
    pub fn push<T: 'static>(&mut self, value: T) {
        debug_assert!(self.info.is::<T>(), "type mismatch in Column::push");

        // SAFETY: the type matches, and mem::forget below hands
        // ownership to the column
        unsafe {
            self.push_raw(std::ptr::from_ref(&value).cast());
        }

        std::mem::forget(value);
    }

    /// Remove the value at `index`, dropping it, and backfill the hole
    /// with the last value.
    ///
    /// Returns the old index of the value that moved into `index`, or
    /// `None` if `index` was last.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`.
    pub unsafe fn swap_remove_drop(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "index out of bounds in swap_remove_drop");

        // SAFETY: caller ensures index is in bounds
        let ptr = unsafe { self.get_unchecked_raw(index) };

        // SAFETY: ptr addresses an initialized value
        unsafe {
            self.info.drop_in_place(ptr);
        }

        self.forget_remove_at(index, ptr)
    }

    /// Remove the value at `index` without dropping it, backfilling
    /// with the last value. The value is considered moved out; the
    /// caller must already have taken ownership of its bytes.
    ///
    /// Returns the old index of the value that moved into `index`, or
    /// `None` if `index` was last.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, and the value there must not be
    /// used again through this column.
    pub unsafe fn forget_swap_remove(&mut self, index: usize) -> Option<usize> {
        debug_assert!(index < self.len, "index out of bounds in forget_swap_remove");

        // SAFETY: caller ensures index is in bounds
        let ptr = unsafe { self.get_unchecked_raw(index) };
        self.forget_remove_at(index, ptr)
    }

    /// Shrink by one, moving the last value into the hole at `index`.
    fn forget_remove_at(&mut self, index: usize, hole: *mut u8) -> Option<usize> {
        self.len -= 1;

        if index < self.len {
            // SAFETY: self.len shrank, so it indexes the old last value;
            // distinct indices cannot overlap
            unsafe {
                let last = self.get_unchecked_raw(self.len);
                std::ptr::copy_nonoverlapping(last, hole, self.info.size());
            }
            Some(self.len)
        } else {
            None
        }
    }

    /// Move the value at `index` to the end of `dst`, backfilling the
    /// hole with this column's last value.
    ///
    /// Returns the old index of the value that moved into `index`, or
    /// `None` if `index` was last.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, and `dst` must store the same
    /// component type.
    pub unsafe fn transfer(&mut self, index: usize, dst: &mut Self) -> Option<usize> {
        debug_assert!(index < self.len, "index out of bounds in transfer");
        debug_assert_eq!(
            self.info.id(),
            dst.info.id(),
            "component type mismatch in Column::transfer"
        );

        dst.reserve(1);

        // SAFETY: index is in bounds, the destination slot was just
        // reserved, and separate allocations cannot overlap
        unsafe {
            let src = self.get_unchecked_raw(index);
            let slot = dst.get_unchecked_raw(dst.len);
            std::ptr::copy_nonoverlapping(src, slot, self.info.size());
        }
        dst.len += 1;

        // SAFETY: caller's bounds guarantee still holds
        unsafe { self.forget_swap_remove(index) }
    }

    /// Get a raw pointer to the value at `index`.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len` (or equal to it when writing
    /// into reserved space).
    #[must_use]
    pub unsafe fn get_unchecked_raw(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.len || (index == self.len && self.len < self.capacity));
        // SAFETY: caller ensures index is in bounds
        unsafe { self.data.as_ptr().add(index * self.info.size()) }
    }

    /// Get a reference to the value at `index`.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, and `T` must be the column's
    /// component type.
    #[must_use]
    pub unsafe fn get_unchecked<T: 'static>(&self, index: usize) -> &T {
        debug_assert!(self.info.is::<T>(), "type mismatch in Column::get_unchecked");
        // SAFETY: caller ensures index is in bounds and the type matches
        unsafe { &*self.get_unchecked_raw(index).cast::<T>() }
    }

    /// Get a mutable reference to the value at `index`.
    ///
    /// # Safety
    ///
    /// `index` must be less than `len`, `T` must be the column's
    /// component type, and no other reference to the value may exist.
    #[must_use]
    pub unsafe fn get_unchecked_mut<T: 'static>(&mut self, index: usize) -> &mut T {
        debug_assert!(
            self.info.is::<T>(),
            "type mismatch in Column::get_unchecked_mut"
        );
        // SAFETY: caller ensures bounds, type, and exclusivity
        unsafe { &mut *self.get_unchecked_raw(index).cast::<T>() }
    }

    /// Reserve room for at least `additional` more values.
    pub fn reserve(&mut self, additional: usize) {
        let required = self
            .len
            .checked_add(additional)
            .expect("column capacity overflow");

        if required > self.capacity {
            self.grow(required);
        }
    }

    /// Grow the allocation to hold at least `min_capacity` values.
    fn grow(&mut self, min_capacity: usize) {
        if self.info.size() == 0 {
            // Zero-sized values never allocate.
            self.capacity = usize::MAX;
            return;
        }

        // Double the capacity, with a small floor for fresh columns.
        let new_capacity = self
            .capacity
            .checked_mul(2)
            .unwrap_or(min_capacity)
            .max(min_capacity)
            .max(4);

        let new_layout = Self::array_layout(&self.info, new_capacity);

        // SAFETY: layouts are non-zero here, and the realloc branch
        // passes the layout the block was allocated with
        let new_data = unsafe {
            let ptr = if self.capacity == 0 {
                std::alloc::alloc(new_layout)
            } else {
                let old_layout = Self::array_layout(&self.info, self.capacity);
                std::alloc::realloc(self.data.as_ptr(), old_layout, new_layout.size())
            };

            if ptr.is_null() {
                std::alloc::handle_alloc_error(new_layout);
            }
            NonNull::new_unchecked(ptr)
        };

        self.data = new_data;
        self.capacity = new_capacity;
    }

    /// Drop every stored value and reset the length to zero.
    pub fn clear(&mut self) {
        if self.info.needs_drop() {
            for i in 0..self.len {
                // SAFETY: i is in bounds and the value is initialized
                unsafe {
                    let ptr = self.get_unchecked_raw(i);
                    self.info.drop_in_place(ptr);
                }
            }
        }
        self.len = 0;
    }

    fn array_layout(info: &ComponentInfo, count: usize) -> Layout {
        let size = info.size().checked_mul(count).expect("column layout overflow");
        // SAFETY: the alignment came from a Layout, so it is a power of two
        unsafe { Layout::from_size_align_unchecked(size, info.align()) }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        self.clear();

        if self.capacity > 0 && self.info.size() > 0 {
            let layout = Self::array_layout(&self.info, self.capacity);
            // SAFETY: data was allocated with exactly this layout
            unsafe {
                std::alloc::dealloc(self.data.as_ptr(), layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Name(String);

    struct Tag;

    #[test]
    fn test_push_and_get() {
        let info = ComponentInfo::of::<Position>(ComponentId::from_raw(0));
        let mut col = Column::new(info);

        col.push(Position { x: 1.0, y: 2.0 });
        col.push(Position { x: 3.0, y: 4.0 });

        assert_eq!(col.len(), 2);

        // SAFETY: indices are in bounds and the type matches
        unsafe {
            assert_eq!(
                col.get_unchecked::<Position>(0),
                &Position { x: 1.0, y: 2.0 }
            );
            assert_eq!(
                col.get_unchecked::<Position>(1),
                &Position { x: 3.0, y: 4.0 }
            );
        }
    }

    #[test]
    fn test_swap_remove_backfills() {
        let info = ComponentInfo::of::<Position>(ComponentId::from_raw(0));
        let mut col = Column::new(info);

        col.push(Position { x: 1.0, y: 2.0 });
        col.push(Position { x: 3.0, y: 4.0 });
        col.push(Position { x: 5.0, y: 6.0 });

        // SAFETY: index 0 is in bounds
        let swapped = unsafe { col.swap_remove_drop(0) };

        assert_eq!(swapped, Some(2));
        assert_eq!(col.len(), 2);

        // SAFETY: indices are in bounds and the type matches
        unsafe {
            assert_eq!(
                col.get_unchecked::<Position>(0),
                &Position { x: 5.0, y: 6.0 }
            );
            assert_eq!(
                col.get_unchecked::<Position>(1),
                &Position { x: 3.0, y: 4.0 }
            );
        }
    }

    #[test]
    fn test_transfer_moves_value_between_columns() {
        let info = ComponentInfo::of::<Name>(ComponentId::from_raw(0));
        let mut src = Column::new(info.clone());
        let mut dst = Column::new(info);

        src.push(Name("alpha".to_string()));
        src.push(Name("beta".to_string()));

        // SAFETY: index 0 is in bounds and both columns store Name
        let swapped = unsafe { src.transfer(0, &mut dst) };

        assert_eq!(swapped, Some(1));
        assert_eq!(src.len(), 1);
        assert_eq!(dst.len(), 1);

        // SAFETY: indices are in bounds and the type matches
        unsafe {
            assert_eq!(src.get_unchecked::<Name>(0).0, "beta");
            assert_eq!(dst.get_unchecked::<Name>(0).0, "alpha");
        }
    }

    #[test]
    fn test_forget_swap_remove_after_read_out() {
        let info = ComponentInfo::of::<Name>(ComponentId::from_raw(0));
        let mut col = Column::new(info);

        col.push(Name("keep".to_string()));
        col.push(Name("take".to_string()));

        // Read the value out, then forget the slot. Dropping `taken`
        // and the column must free each string exactly once.
        // SAFETY: index 1 is in bounds, and forget_swap_remove retires
        // the slot the value was read from
        let taken = unsafe {
            let value = std::ptr::read(col.get_unchecked_raw(1).cast::<Name>());
            col.forget_swap_remove(1);
            value
        };

        assert_eq!(taken.0, "take");
        assert_eq!(col.len(), 1);

        // SAFETY: index 0 is in bounds and the type matches
        unsafe {
            assert_eq!(col.get_unchecked::<Name>(0).0, "keep");
        }
    }

    #[test]
    fn test_drop_runs_for_remaining_values() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

        struct DropCounter;

        impl Drop for DropCounter {
            fn drop(&mut self) {
                DROP_COUNT.fetch_add(1, Ordering::SeqCst);
            }
        }

        DROP_COUNT.store(0, Ordering::SeqCst);

        {
            let info = ComponentInfo::of::<DropCounter>(ComponentId::from_raw(0));
            let mut col = Column::new(info);

            col.push(DropCounter);
            col.push(DropCounter);
            col.push(DropCounter);

            assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 0);
        }

        assert_eq!(DROP_COUNT.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_sized_values() {
        let info = ComponentInfo::of::<Tag>(ComponentId::from_raw(0));
        let mut col = Column::new(info);

        for _ in 0..100 {
            col.push(Tag);
        }

        assert_eq!(col.len(), 100);

        // SAFETY: index 3 is in bounds
        unsafe {
            col.swap_remove_drop(3);
        }
        assert_eq!(col.len(), 99);
    }
}
