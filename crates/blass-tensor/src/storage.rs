//! Arc-based storage shared between a tensor and all of its views.
//!
//! A [`TensorStorage`] is a window (`offset`, `len`) over a reference-counted
//! buffer. Cloning a storage or taking a sub-view never copies element data;
//! the buffer is released when the last window onto it is dropped.

use std::{alloc::Layout, any::Any, ptr::NonNull, sync::Arc};

use crate::{
    allocator::{buffer_layout, TensorAllocatorError},
    TensorAllocator, TensorError,
};

/// Who is responsible for releasing the buffer.
enum Ownership {
    /// Allocated through the storage allocator with the given layout.
    Allocated(Layout),
    /// Borrowed from external memory kept alive by the boxed owner.
    External(#[allow(dead_code)] Box<dyn Any + Send + Sync>),
}

/// Inner storage implementation that holds the actual memory.
struct StorageImpl<T, A: TensorAllocator> {
    /// The pointer to the first element, dangling when `len == 0`.
    ptr: NonNull<T>,
    /// The number of elements in the buffer.
    len: usize,
    ownership: Ownership,
    alloc: A,
}

impl<T, A: TensorAllocator> Drop for StorageImpl<T, A> {
    fn drop(&mut self) {
        if let Ownership::Allocated(layout) = self.ownership {
            if layout.size() != 0 {
                self.alloc.dealloc(self.ptr.as_ptr() as *mut u8, layout);
            }
        }
    }
}

/// Reference-counted element buffer with a view window.
///
/// # Thread Safety
///
/// `TensorStorage` is `Send + Sync` when `T` is. Safe code can only read a
/// shared buffer; mutation needs either [`TensorStorage::as_mut_slice`] on a
/// unique storage or the `unsafe` [`TensorStorage::write`], whose caller
/// guarantees no other thread or borrow observes the element.
pub struct TensorStorage<T, A: TensorAllocator> {
    inner: Arc<StorageImpl<T, A>>,
    /// Offset of this window into the buffer, in elements.
    offset: usize,
    /// Number of elements visible from this window.
    len: usize,
}

impl<T: Copy, A: TensorAllocator> TensorStorage<T, A> {
    /// Allocates an uninitialized buffer of `len` elements.
    fn allocate(len: usize, alloc: A) -> Result<StorageImpl<T, A>, TensorError> {
        let layout = buffer_layout::<T>(len)?;

        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            let raw = alloc.alloc(layout)? as *mut T;
            NonNull::new(raw).ok_or(TensorAllocatorError::NullPointer)?
        };

        Ok(StorageImpl {
            ptr,
            len,
            ownership: Ownership::Allocated(layout),
            alloc,
        })
    }

    fn from_impl(inner: StorageImpl<T, A>) -> Self {
        let len = inner.len;
        Self {
            inner: Arc::new(inner),
            offset: 0,
            len,
        }
    }

    /// Creates a new storage by copying the elements of a vector.
    ///
    /// # Arguments
    ///
    /// * `data` - The elements to store.
    /// * `alloc` - The allocator used for the new buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocation fails.
    pub fn from_vec(data: Vec<T>, alloc: A) -> Result<Self, TensorError> {
        Self::from_slice(&data, alloc)
    }

    /// Creates a new storage by copying the elements of a slice.
    pub fn from_slice(data: &[T], alloc: A) -> Result<Self, TensorError> {
        let inner = Self::allocate(data.len(), alloc)?;
        // SAFETY: the buffer was just allocated for `data.len()` elements and
        // cannot overlap with `data`.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), inner.ptr.as_ptr(), data.len());
        }
        Ok(Self::from_impl(inner))
    }

    /// Creates a new storage of `len` copies of `value`.
    pub fn from_elem(value: T, len: usize, alloc: A) -> Result<Self, TensorError> {
        let inner = Self::allocate(len, alloc)?;
        for i in 0..len {
            // SAFETY: `i < len` and the buffer holds `len` elements.
            unsafe { inner.ptr.as_ptr().add(i).write(value) };
        }
        Ok(Self::from_impl(inner))
    }

    /// Wraps external memory without copying it.
    ///
    /// # Arguments
    ///
    /// * `ptr` - Pointer to the first element.
    /// * `len` - Number of elements readable from `ptr`.
    /// * `owner` - Keeps the memory alive; dropped together with the last view.
    /// * `alloc` - Allocator recorded for tensors derived from this storage.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `ptr` is non-null, aligned for `T` and valid for `len` reads and writes
    /// - the memory stays valid for as long as `owner` is alive
    pub unsafe fn from_raw_parts(
        ptr: *mut T,
        len: usize,
        owner: Box<dyn Any + Send + Sync>,
        alloc: A,
    ) -> Result<Self, TensorError> {
        let ptr = NonNull::new(ptr).ok_or(TensorAllocatorError::NullPointer)?;
        Ok(Self::from_impl(StorageImpl {
            ptr,
            len,
            ownership: Ownership::External(owner),
            alloc,
        }))
    }
}

impl<T, A: TensorAllocator> TensorStorage<T, A> {
    /// Returns the pointer to the first element of this window.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        // SAFETY: offset <= inner.len is checked whenever a window is created.
        unsafe { self.inner.ptr.as_ptr().add(self.offset) }
    }

    /// Returns a mutable pointer to the first element of this window.
    ///
    /// Writes through the pointer are visible to every storage sharing the buffer.
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut T {
        // SAFETY: offset <= inner.len is checked whenever a window is created.
        unsafe { self.inner.ptr.as_ptr().add(self.offset) }
    }

    /// Returns the elements visible from this window.
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: the window lies inside the buffer and the buffer is initialized.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }
    }

    /// Returns the elements visible from this window as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared with another storage.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        assert!(
            self.is_unique(),
            "Cannot get mutable slice when storage is shared. Materialize the tensor first."
        );
        // SAFETY: the window lies inside the buffer and we hold the only reference.
        unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) }
    }

    /// Reads the element at `index` within this window.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the window.
    #[inline]
    pub fn read(&self, index: usize) -> T
    where
        T: Copy,
    {
        assert!(index < self.len, "storage index {index} out of range {}", self.len);
        // SAFETY: bounds checked above.
        unsafe { self.as_ptr().add(index).read() }
    }

    /// Writes `value` at `index` within this window.
    ///
    /// The write is visible through every view sharing this buffer.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the window.
    ///
    /// # Safety
    ///
    /// The caller must ensure that, for the duration of the call:
    /// - no slice obtained from any storage sharing this buffer is alive
    /// - no other thread reads or writes the buffer
    #[inline]
    pub unsafe fn write(&self, index: usize, value: T) {
        assert!(index < self.len, "storage index {index} out of range {}", self.len);
        self.as_mut_ptr().add(index).write(value)
    }

    /// Returns the number of elements visible from this window.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if this window has a length of 0.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the current offset into the underlying buffer (in elements).
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns true if no other storage shares the buffer.
    #[inline]
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// Returns the number of storages sharing the buffer.
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns true if both storages point into the same buffer.
    #[inline]
    pub fn shares_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns the allocator that owns the buffer.
    #[inline]
    pub fn alloc(&self) -> &A {
        &self.inner.alloc
    }

    /// Creates a new window into this storage with the specified offset and length.
    ///
    /// This is a zero-copy operation; the returned storage shares the buffer.
    ///
    /// # Arguments
    ///
    /// * `offset` - Offset in elements, relative to this window.
    /// * `len` - Length in elements.
    ///
    /// # Errors
    ///
    /// Returns an error if the new window does not fit inside this one.
    pub fn view(&self, offset: usize, len: usize) -> Result<Self, TensorError> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| TensorError::index_out_of_bounds(usize::MAX, self.len))?;
        if end > self.len {
            return Err(TensorError::index_out_of_bounds(end, self.len));
        }

        Ok(Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset + offset,
            len,
        })
    }
}

// SAFETY: the buffer is only reachable through the Arc. Safe methods mutate it
// only through `&mut self` on a unique storage; shared writes are `unsafe`.
unsafe impl<T: Send, A: TensorAllocator> Send for TensorStorage<T, A> {}

// SAFETY: see above; shared reads are safe when `T: Sync`.
unsafe impl<T: Sync, A: TensorAllocator> Sync for TensorStorage<T, A> {}

impl<T, A: TensorAllocator> Clone for TensorStorage<T, A> {
    /// Creates a cheap clone by incrementing the Arc reference count.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset,
            len: self.len,
        }
    }
}

impl<T, A: TensorAllocator> std::fmt::Debug for TensorStorage<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorStorage")
            .field("ptr", &self.inner.ptr)
            .field("buffer_len", &self.inner.len)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("is_unique", &self.is_unique())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::CpuAllocator;

    #[test]
    fn test_storage_from_vec() -> Result<(), TensorError> {
        let storage = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3, 4, 5], CpuAllocator)?;
        assert_eq!(storage.as_slice(), &[1, 2, 3, 4, 5]);
        assert_eq!(storage.len(), 5);
        assert!(storage.is_unique());
        Ok(())
    }

    #[test]
    fn test_storage_empty() -> Result<(), TensorError> {
        let storage = TensorStorage::<f32, _>::from_vec(vec![], CpuAllocator)?;
        assert!(storage.is_empty());
        assert_eq!(storage.as_slice(), &[] as &[f32]);
        Ok(())
    }

    #[test]
    fn test_storage_from_elem() -> Result<(), TensorError> {
        let storage = TensorStorage::<u8, _>::from_elem(7, 4, CpuAllocator)?;
        assert_eq!(storage.as_slice(), &[7, 7, 7, 7]);
        Ok(())
    }

    #[test]
    fn test_storage_cheap_clone() -> Result<(), TensorError> {
        let storage1 = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3], CpuAllocator)?;
        let storage2 = storage1.clone();
        assert!(!storage1.is_unique());
        assert!(storage1.shares_buffer(&storage2));
        assert_eq!(storage2.as_slice(), &[1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_storage_view() -> Result<(), TensorError> {
        let storage = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3, 4, 5], CpuAllocator)?;
        let view = storage.view(1, 3)?;
        assert_eq!(view.as_slice(), &[2, 3, 4]);
        assert_eq!(view.offset(), 1);

        let nested = view.view(1, 2)?;
        assert_eq!(nested.as_slice(), &[3, 4]);
        assert_eq!(nested.offset(), 2);

        assert!(view.view(2, 2).is_err());
        Ok(())
    }

    #[test]
    fn test_storage_write_is_shared() -> Result<(), TensorError> {
        let storage = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3, 4], CpuAllocator)?;
        let view = storage.view(2, 2)?;
        // SAFETY: single thread and no slice of the buffer is alive.
        unsafe { view.write(0, 30) };
        assert_eq!(storage.as_slice(), &[1, 2, 30, 4]);
        assert_eq!(storage.read(2), 30);
        Ok(())
    }

    #[test]
    fn test_storage_unique_after_sibling_dropped() -> Result<(), TensorError> {
        let mut storage = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3], CpuAllocator)?;
        let sibling = storage.view(1, 2)?;
        assert!(!storage.is_unique());
        drop(sibling);
        assert!(storage.is_unique());
        storage.as_mut_slice()[0] = 10;
        assert_eq!(storage.as_slice(), &[10, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_storage_shared_mutation_panics() -> Result<(), TensorError> {
        let mut storage1 = TensorStorage::<i32, _>::from_vec(vec![1, 2, 3], CpuAllocator)?;
        let _storage2 = storage1.clone();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = storage1.as_mut_slice();
        }));
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_storage_from_raw_parts() -> Result<(), TensorError> {
        let mut data = Box::new([1.0f32, 2.0, 3.0]);
        let ptr = data.as_mut_ptr();
        let storage = unsafe { TensorStorage::from_raw_parts(ptr, 3, Box::new(data), CpuAllocator)? };
        assert_eq!(storage.as_slice(), &[1.0, 2.0, 3.0]);
        Ok(())
    }
}
