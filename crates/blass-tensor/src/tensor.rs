use num_traits::Zero;
use rand::distr::{uniform::SampleUniform, Distribution, Uniform};
use thiserror::Error;

use super::{
    allocator::{CpuAllocator, TensorAllocator, TensorAllocatorError},
    shape::{get_strides_from_shape, max_offset, numel, strided_offset},
    storage::TensorStorage,
};

/// Error type for tensor operations.
///
/// This enum provides detailed error information for tensor creation,
/// view manipulation and broadcasting.
#[derive(Error, Debug, PartialEq)]
pub enum TensorError {
    /// Two shapes cannot be broadcast against each other.
    ///
    /// Broadcasting right-aligns both shapes; every aligned pair of dimensions
    /// must be equal or one of them must be 1.
    ///
    /// # Example
    /// ```ignore
    /// // Error: trailing dimensions 3 and 4 differ and neither is 1
    /// broadcast_shape(&[2, 3], &[4])?;
    /// ```
    #[error("Shape mismatch: {lhs:?} is not compatible with {rhs:?}")]
    ShapeMismatch {
        /// The left-hand shape
        lhs: Vec<usize>,
        /// The right-hand shape
        rhs: Vec<usize>,
    },

    /// An index or axis exceeds the size of the dimension it addresses.
    #[error("Index {index} out of range for dimension of size {size}")]
    DimensionOutOfRange {
        /// The invalid index that was attempted
        index: usize,
        /// The size of the dimension being indexed
        size: usize,
    },

    /// Index exceeds storage bounds.
    ///
    /// This occurs when a view would reach outside the buffer it shares.
    #[error("Index {index} out of bounds for storage of size {size}")]
    IndexOutOfBounds {
        /// The invalid index that was attempted
        index: usize,
        /// The number of elements in the storage
        size: usize,
    },

    /// The axes passed to `permute` are not a permutation of `0..rank`.
    #[error("Invalid permutation {axes:?} for a tensor of rank {rank}")]
    InvalidPermutation {
        /// The requested axes
        axes: Vec<usize>,
        /// The rank of the tensor
        rank: usize,
    },

    /// A reshape request cannot be satisfied.
    ///
    /// # Common Causes
    /// - The product of the requested dimensions differs from the element count
    /// - More than one `-1` inference marker
    /// - Negative dimensions other than `-1`
    #[error("Cannot view {numel} elements as {requested:?}: {reason}")]
    InvalidReshape {
        /// The requested shape, including inference markers
        requested: Vec<isize>,
        /// The number of elements of the source tensor
        numel: usize,
        /// Why the request was rejected
        reason: String,
    },

    /// An operation was applied to a tensor of the wrong rank.
    #[error("{op} expects rank {expected}, got rank {actual}")]
    RankError {
        /// Name of the operation
        op: &'static str,
        /// The rank the operation requires
        expected: usize,
        /// The rank of the tensor
        actual: usize,
    },

    /// Tensor shape does not match the provided data.
    ///
    /// # Example
    /// ```ignore
    /// // Error: shape [2, 3] expects 6 elements, but got 5
    /// let tensor = Tensor::from_shape_vec(&[2, 3], vec![1, 2, 3, 4, 5], CpuAllocator)?;
    /// ```
    #[error("Shape mismatch: expected {expected} elements for shape, but got {actual} elements in data")]
    InvalidShape {
        /// Expected number of elements based on shape
        expected: usize,
        /// Actual number of elements in the data
        actual: usize,
    },

    /// Nested literal data is ragged.
    #[error("Ragged literal at depth {depth}: expected {expected} entries, got {actual}")]
    InvalidLiteral {
        /// Nesting depth of the offending list
        depth: usize,
        /// Length inferred from the first list at this depth
        expected: usize,
        /// Length actually found
        actual: usize,
    },

    /// A safe write was attempted on a tensor whose buffer is shared.
    ///
    /// Clones and views share one buffer; [`Tensor::set`] and [`Tensor::fill`]
    /// only write when the tensor holds the sole reference to it.
    #[error("Cannot write through a tensor whose storage is shared by {refs} references")]
    SharedStorage {
        /// Number of storages sharing the buffer
        refs: usize,
    },

    /// The bounds of a uniform random fill are empty or not finite.
    #[error("Invalid random range: low must be strictly less than high")]
    InvalidRange,

    /// Underlying storage operation failed.
    ///
    /// This error wraps lower-level memory allocation errors.
    /// See [`TensorAllocatorError`] for details.
    #[error("Storage error: {0}")]
    StorageError(#[from] TensorAllocatorError),
}

impl TensorError {
    /// Creates a ShapeMismatch error naming both shapes.
    pub fn shape_mismatch(lhs: &[usize], rhs: &[usize]) -> Self {
        Self::ShapeMismatch {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }

    /// Creates an InvalidShape error with clear context.
    pub fn invalid_shape(expected: usize, actual: usize) -> Self {
        Self::InvalidShape { expected, actual }
    }

    /// Creates an IndexOutOfBounds error with clear context.
    pub fn index_out_of_bounds(index: usize, size: usize) -> Self {
        Self::IndexOutOfBounds { index, size }
    }

    /// Creates a DimensionOutOfRange error with clear context.
    pub fn dimension_out_of_range(index: usize, size: usize) -> Self {
        Self::DimensionOutOfRange { index, size }
    }

    /// Creates an InvalidReshape error.
    pub fn invalid_reshape(requested: &[isize], numel: usize, reason: impl Into<String>) -> Self {
        Self::InvalidReshape {
            requested: requested.to_vec(),
            numel,
            reason: reason.into(),
        }
    }

    /// Creates a RankError for the named operation.
    pub fn rank_error(op: &'static str, expected: usize, actual: usize) -> Self {
        Self::RankError {
            op,
            expected,
            actual,
        }
    }

    /// Returns a user-friendly suggestion for resolving the error.
    pub fn suggestion(&self) -> &str {
        match self {
            Self::ShapeMismatch { .. } => {
                "Aligned from the right, each pair of dimensions must be equal or one of them 1"
            }
            Self::DimensionOutOfRange { .. } | Self::IndexOutOfBounds { .. } => {
                "Verify indices are within bounds (0 <= index < dimension_size)"
            }
            Self::InvalidPermutation { .. } => "Pass every axis in 0..rank exactly once",
            Self::InvalidReshape { .. } => {
                "Ensure the requested dimensions multiply to the element count, using at most one -1"
            }
            Self::RankError { .. } => "Check the number of dimensions the operation requires",
            Self::InvalidShape { .. } => {
                "Ensure the product of shape dimensions equals the number of data elements"
            }
            Self::InvalidLiteral { .. } => "All lists at the same nesting depth must have the same length",
            Self::SharedStorage { .. } => {
                "Drop the other views or call materialize() to get an independent copy"
            }
            Self::InvalidRange => "Use finite bounds with low < high",
            Self::StorageError(_) => "Free unused tensors or reduce the tensor size",
        }
    }
}

/// A strided multi-dimensional array over shared storage.
///
/// `Tensor` combines an `Arc`-shared element buffer with a shape and per-dimension
/// element strides. Several tensors may view the same buffer with different
/// shapes, strides and offsets; none of the view operations copy data.
///
/// # Type Parameters
///
/// * `T` - The element type stored in the tensor
/// * `A` - The allocator that owns the buffer
///
/// # Memory Layout
///
/// Freshly constructed tensors are row-major (C-contiguous). A stride of 0 means the
/// dimension is broadcast: every index along it reads the same element.
///
/// # Aliasing
///
/// [`Tensor::set`] and [`Tensor::fill`] refuse to write while any other tensor
/// shares the buffer. Use [`Tensor::materialize`] to obtain an independent copy,
/// or the `unsafe` [`Tensor::set_shared`] and [`Tensor::fill_shared`] to write
/// through a view into the buffer every other view sees.
///
/// # Examples
///
/// ```rust
/// use blass_tensor::{CpuAllocator, Tensor};
///
/// let t = Tensor::<u8>::from_shape_vec(&[2, 2], vec![1, 2, 3, 4], CpuAllocator).unwrap();
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.strides(), &[2, 1]);
/// ```
pub struct Tensor<T, A: TensorAllocator = CpuAllocator> {
    /// The storage of the tensor; its window starts at the tensor's first element.
    pub storage: TensorStorage<T, A>,
    /// The shape of the tensor.
    pub shape: Vec<usize>,
    /// The strides of the tensor data in memory.
    pub strides: Vec<usize>,
}

impl<T, A: TensorAllocator> Tensor<T, A> {
    /// Returns the shape of the tensor.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the element strides of the tensor.
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Returns the number of dimensions.
    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns the size of dimension `axis`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::DimensionOutOfRange`] if `axis >= rank`.
    pub fn dim(&self, axis: usize) -> Result<usize, TensorError> {
        self.shape
            .get(axis)
            .copied()
            .ok_or_else(|| TensorError::dimension_out_of_range(axis, self.rank()))
    }

    /// Returns the number of elements in the tensor (1 for a scalar).
    #[inline]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Returns true if the tensor has rank 0.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Get the data of the tensor as a pointer to its first element.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.storage.as_ptr()
    }

    /// Get the data of the tensor as a mutable pointer to its first element.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.storage.as_mut_ptr()
    }

    /// Returns the storage window starting at the first element.
    ///
    /// For a contiguous tensor the first [`Tensor::numel`] entries are the
    /// elements in row-major order. For other layouts the slice must be read
    /// through [`Tensor::strides`].
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        self.storage.as_slice()
    }

    /// Returns the storage window as a mutable slice.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is shared with another tensor.
    #[inline]
    pub fn as_slice_mut(&mut self) -> &mut [T] {
        self.storage.as_mut_slice()
    }

    /// Computes the storage offset of a multi-index, checking bounds.
    pub(crate) fn offset_of(&self, index: &[usize]) -> Result<usize, TensorError> {
        if index.len() != self.rank() {
            return Err(TensorError::rank_error("index", self.rank(), index.len()));
        }
        let mut offset = 0;
        for ((&idx, &size), &stride) in index.iter().zip(&self.shape).zip(&self.strides) {
            if idx >= size {
                return Err(TensorError::dimension_out_of_range(idx, size));
            }
            offset += idx * stride;
        }
        Ok(offset)
    }

    /// Creates a tensor over existing storage with an explicit layout.
    ///
    /// The resulting tensor shares ownership of the buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if `shape` and `strides` have different lengths or if any
    /// reachable element lies outside the storage window.
    pub fn from_storage(
        storage: TensorStorage<T, A>,
        shape: Vec<usize>,
        strides: Vec<usize>,
    ) -> Result<Self, TensorError> {
        if shape.len() != strides.len() {
            return Err(TensorError::rank_error(
                "from_storage",
                shape.len(),
                strides.len(),
            ));
        }
        if let Some(last) = max_offset(&shape, &strides) {
            if last >= storage.len() {
                return Err(TensorError::index_out_of_bounds(last, storage.len()));
            }
        }
        Ok(Self {
            storage,
            shape,
            strides,
        })
    }
}

impl<T: Copy, A: TensorAllocator> Tensor<T, A> {
    /// Wraps contiguous storage in a row-major tensor of the given shape.
    pub(crate) fn from_contiguous(
        shape: &[usize],
        storage: TensorStorage<T, A>,
    ) -> Result<Self, TensorError> {
        let n = numel(shape);
        if n != storage.len() {
            return Err(TensorError::invalid_shape(n, storage.len()));
        }
        Ok(Self {
            storage,
            shape: shape.to_vec(),
            strides: get_strides_from_shape(shape),
        })
    }

    /// Creates a new `Tensor` with the given shape and vector of data.
    ///
    /// # Arguments
    ///
    /// * `shape` - The shape of the tensor.
    /// * `data` - The elements in row-major order.
    /// * `alloc` - The allocator used for the buffer.
    ///
    /// # Errors
    ///
    /// If the number of elements in the data does not match the shape of the tensor, an error is returned.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<u8>::from_shape_vec(&[2, 2], vec![1, 2, 3, 4], CpuAllocator).unwrap();
    /// assert_eq!(t.shape(), &[2, 2]);
    /// ```
    pub fn from_shape_vec(shape: &[usize], data: Vec<T>, alloc: A) -> Result<Self, TensorError> {
        Self::from_shape_slice(shape, &data, alloc)
    }

    /// Creates a new `Tensor` with the given shape and slice of data.
    ///
    /// # Errors
    ///
    /// If the number of elements in the data does not match the shape of the tensor, an error is returned.
    pub fn from_shape_slice(shape: &[usize], data: &[T], alloc: A) -> Result<Self, TensorError> {
        let n = numel(shape);
        if n != data.len() {
            return Err(TensorError::invalid_shape(n, data.len()));
        }
        Self::from_contiguous(shape, TensorStorage::from_slice(data, alloc)?)
    }

    /// Creates a new `Tensor` with the given shape and a default value.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<u8>::from_shape_val(&[2, 1, 3], 2, CpuAllocator).unwrap();
    /// assert_eq!(t.to_vec(), vec![2, 2, 2, 2, 2, 2]);
    /// ```
    pub fn from_shape_val(shape: &[usize], value: T, alloc: A) -> Result<Self, TensorError> {
        Self::from_contiguous(shape, TensorStorage::from_elem(value, numel(shape), alloc)?)
    }

    /// Creates a new zero-initialized `Tensor` with the given shape.
    pub fn zeros(shape: &[usize], alloc: A) -> Result<Self, TensorError>
    where
        T: Zero,
    {
        Self::from_shape_val(shape, T::zero(), alloc)
    }

    /// Create a new `Tensor` with the given shape and a function to generate the data.
    ///
    /// The function `f` is called with the multi-index of each element, in row-major order.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<usize>::from_shape_fn(&[2, 2], CpuAllocator, |idx| idx[0] * 2 + idx[1]).unwrap();
    /// assert_eq!(t.to_vec(), vec![0, 1, 2, 3]);
    /// ```
    pub fn from_shape_fn<F>(shape: &[usize], alloc: A, f: F) -> Result<Self, TensorError>
    where
        F: Fn(&[usize]) -> T,
    {
        let n = numel(shape);
        let mut index = vec![0; shape.len()];
        let data: Vec<T> = (0..n)
            .map(|i| {
                let mut j = i;
                for k in (0..shape.len()).rev() {
                    index[k] = j % shape[k];
                    j /= shape[k];
                }
                f(&index)
            })
            .collect();
        Self::from_contiguous(shape, TensorStorage::from_vec(data, alloc)?)
    }

    /// Creates a tensor filled with samples from the uniform distribution `[low, high)`.
    ///
    /// # Arguments
    ///
    /// * `shape` - The shape of the tensor.
    /// * `low` - Inclusive lower bound.
    /// * `high` - Exclusive upper bound.
    /// * `rng` - The random number generator to draw from.
    /// * `alloc` - The allocator used for the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidRange`] if `low >= high` or a bound is not finite.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    /// use rand::{rngs::StdRng, SeedableRng};
    ///
    /// let mut rng = StdRng::seed_from_u64(42);
    /// let t = Tensor::<f32>::from_shape_random(&[3, 4], -1.0, 1.0, &mut rng, CpuAllocator).unwrap();
    /// assert!(t.to_vec().iter().all(|v| (-1.0..1.0).contains(v)));
    /// ```
    pub fn from_shape_random<R>(
        shape: &[usize],
        low: T,
        high: T,
        rng: &mut R,
        alloc: A,
    ) -> Result<Self, TensorError>
    where
        T: SampleUniform,
        R: rand::Rng + ?Sized,
    {
        let dist = Uniform::new(low, high).map_err(|_| TensorError::InvalidRange)?;
        let data: Vec<T> = (0..numel(shape)).map(|_| dist.sample(rng)).collect();
        Self::from_contiguous(shape, TensorStorage::from_vec(data, alloc)?)
    }

    /// Creates a new `Tensor` over externally owned memory without copying it.
    ///
    /// # Arguments
    ///
    /// * `shape` - The shape of the tensor.
    /// * `data` - A pointer to the first element.
    /// * `len` - The number of elements readable from `data`.
    /// * `owner` - Keeps the memory alive until the last view is dropped.
    /// * `alloc` - The allocator recorded for derived tensors.
    ///
    /// # Safety
    ///
    /// The pointer must be non-null, aligned and valid for `len` elements for as
    /// long as `owner` is alive.
    pub unsafe fn from_raw_parts(
        shape: &[usize],
        data: *mut T,
        len: usize,
        owner: Box<dyn std::any::Any + Send + Sync>,
        alloc: A,
    ) -> Result<Self, TensorError> {
        let storage = TensorStorage::from_raw_parts(data, len, owner, alloc)?;
        Self::from_contiguous(shape, storage)
    }

    /// Reads the element at a multi-index.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::RankError`] if the index has the wrong length and
    /// [`TensorError::DimensionOutOfRange`] if any component is out of range.
    pub fn get(&self, index: &[usize]) -> Result<T, TensorError> {
        let offset = self.offset_of(index)?;
        Ok(self.storage.read(offset))
    }

    /// Writes the element at a multi-index.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SharedStorage`] if another tensor shares the buffer,
    /// otherwise the same errors as [`Tensor::get`].
    pub fn set(&mut self, index: &[usize], value: T) -> Result<(), TensorError> {
        let offset = self.offset_of(index)?;
        self.ensure_unique()?;
        // SAFETY: `&mut self` holds the only reference to the buffer.
        unsafe { self.storage.write(offset, value) };
        Ok(())
    }

    /// Assigns `value` to every logical element of the tensor.
    ///
    /// Broadcast dimensions are written once per distinct element.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::SharedStorage`] if another tensor shares the buffer.
    pub fn fill(&mut self, value: T) -> Result<(), TensorError> {
        self.ensure_unique()?;
        // SAFETY: `&mut self` holds the only reference to the buffer.
        unsafe { self.fill_shared(value) };
        Ok(())
    }

    /// Writes the element at a multi-index into the shared buffer.
    ///
    /// Every view of the buffer observes the new value.
    ///
    /// # Errors
    ///
    /// Same as [`Tensor::get`].
    ///
    /// # Safety
    ///
    /// The caller must ensure that, for the duration of the call, no slice
    /// borrowed from any tensor sharing the buffer is alive and no other
    /// thread accesses the buffer.
    pub unsafe fn set_shared(&self, index: &[usize], value: T) -> Result<(), TensorError> {
        let offset = self.offset_of(index)?;
        self.storage.write(offset, value);
        Ok(())
    }

    /// Assigns `value` to every logical element, writing into the shared buffer.
    ///
    /// # Safety
    ///
    /// Same contract as [`Tensor::set_shared`].
    pub unsafe fn fill_shared(&self, value: T) {
        let n = self.numel();
        if crate::shape::is_contiguous(&self.shape, &self.strides) {
            for i in 0..n {
                self.storage.write(i, value);
            }
            return;
        }
        for i in 0..n {
            let offset = strided_offset(i, &self.shape, &self.strides);
            self.storage.write(offset, value);
        }
    }

    fn ensure_unique(&self) -> Result<(), TensorError> {
        if self.storage.is_unique() {
            return Ok(());
        }
        Err(TensorError::SharedStorage {
            refs: self.storage.ref_count(),
        })
    }

    /// Returns the value of a tensor holding exactly one element.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidShape`] if the tensor has more or fewer elements.
    pub fn item(&self) -> Result<T, TensorError> {
        let n = self.numel();
        if n != 1 {
            return Err(TensorError::invalid_shape(1, n));
        }
        Ok(self.storage.read(0))
    }

    /// Returns the logical elements in row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        let n = self.numel();
        if crate::shape::is_contiguous(&self.shape, &self.strides) {
            return self.storage.as_slice()[..n].to_vec();
        }
        (0..n)
            .map(|i| self.storage.read(strided_offset(i, &self.shape, &self.strides)))
            .collect()
    }
}

impl<T, A: TensorAllocator> Clone for Tensor<T, A> {
    /// Creates a cheap clone sharing the buffer.
    ///
    /// Use [`Tensor::materialize`] for a deep copy.
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
        }
    }
}

impl<T, A: TensorAllocator> std::fmt::Debug for Tensor<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("storage", &self.storage)
            .finish()
    }
}

impl<T, A> Tensor<T, A>
where
    T: Copy + std::fmt::Display,
    A: TensorAllocator,
{
    fn fmt_nested(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        depth: usize,
        offset: usize,
    ) -> std::fmt::Result {
        if depth == self.rank() {
            return std::fmt::Display::fmt(&self.storage.read(offset), f);
        }
        write!(f, "[")?;
        for i in 0..self.shape[depth] {
            if i > 0 {
                write!(f, ", ")?;
            }
            self.fmt_nested(f, depth + 1, offset + i * self.strides[depth])?;
        }
        write!(f, "]")
    }
}

impl<T, A> std::fmt::Display for Tensor<T, A>
where
    T: Copy + std::fmt::Display,
    A: TensorAllocator,
{
    /// Renders the tensor as nested brackets, e.g. `[[1, 2], [3, 4]]`.
    ///
    /// Formatting flags such as precision are applied to every element.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.numel() == 0 {
            let depth = self.rank().max(1);
            return write!(f, "{}{}", "[".repeat(depth), "]".repeat(depth));
        }
        self.fmt_nested(f, 0, 0)
    }
}
