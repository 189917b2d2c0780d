//! Memory source for tensor buffers.
//!
//! Storages never call the global allocator directly; they go through a
//! [`TensorAllocator`] so a tensor can carry its allocator into every buffer
//! derived from it (materialized copies, operation outputs).

use std::alloc::{self, Layout, LayoutError};
use std::ptr::NonNull;

use thiserror::Error;

/// Failure to obtain memory for a tensor buffer.
#[derive(Debug, Error, PartialEq)]
pub enum TensorAllocatorError {
    /// The element count times the element size does not fit in a layout.
    #[error("Invalid tensor layout {0}")]
    LayoutError(#[from] LayoutError),

    /// The allocator could not provide the memory.
    #[error("Allocator returned a null pointer")]
    NullPointer,
}

/// Computes the layout of a buffer of `len` elements of `T`.
///
/// # Errors
///
/// Returns [`TensorAllocatorError::LayoutError`] if the byte size overflows `isize`.
pub fn buffer_layout<T>(len: usize) -> Result<Layout, TensorAllocatorError> {
    Ok(Layout::array::<T>(len)?)
}

/// Source of the raw memory behind tensor storages.
///
/// Implementations are cloned into every storage they allocate and may be used
/// from any thread, since buffers are released wherever their last view drops.
pub trait TensorAllocator: Clone + Send + Sync {
    /// Returns a block of memory fitting `layout`.
    ///
    /// Storages never request zero-sized layouts.
    fn alloc(&self, layout: Layout) -> Result<*mut u8, TensorAllocatorError>;

    /// Releases a block previously returned by [`TensorAllocator::alloc`] with the same layout.
    fn dealloc(&self, ptr: *mut u8, layout: Layout);
}

/// Allocates tensor buffers from the global allocator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuAllocator;

impl TensorAllocator for CpuAllocator {
    fn alloc(&self, layout: Layout) -> Result<*mut u8, TensorAllocatorError> {
        debug_assert!(layout.size() != 0, "zero-sized tensor buffers are never allocated");
        // SAFETY: storages only request layouts with a non-zero size.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr)
            .map(NonNull::as_ptr)
            .ok_or(TensorAllocatorError::NullPointer)
    }

    #[allow(clippy::not_unsafe_ptr_arg_deref)]
    fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            // SAFETY: `ptr` came from `alloc` with this layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_allocator_respects_alignment() -> Result<(), TensorAllocatorError> {
        let allocator = CpuAllocator;
        let layout = buffer_layout::<f64>(128)?;
        assert_eq!(layout.size(), 128 * 8);

        let ptr = allocator.alloc(layout)?;
        assert_eq!(ptr as usize % std::mem::align_of::<f64>(), 0);
        allocator.dealloc(ptr, layout);
        Ok(())
    }

    #[test]
    fn oversized_buffer_has_no_layout() {
        assert!(matches!(
            buffer_layout::<f64>(usize::MAX),
            Err(TensorAllocatorError::LayoutError(_))
        ));
    }

    #[test]
    fn dealloc_ignores_null() -> Result<(), TensorAllocatorError> {
        let layout = buffer_layout::<u8>(16)?;
        CpuAllocator.dealloc(std::ptr::null_mut(), layout);
        Ok(())
    }
}
