//! Construction of tensors from nested literal data.
//!
//! The rank is the nesting depth of the type; each dimension is the length of
//! the first list at that depth, and every other list at that depth must match
//! it. Dimensions below an empty list are 0, so `Vec::<Vec<f32>>::new()` is a
//! `[0, 0]` tensor.

use crate::{storage::TensorStorage, Tensor, TensorAllocator, TensorError};

/// Nested, rectangular data that can be flattened into a tensor.
///
/// Implemented for the numeric scalars, `Vec<U>` and `[U; N]` where `U` is itself
/// nested data, so `vec![vec![1.0, 2.0], vec![3.0, 4.0]]` and `[[1, 2], [3, 4]]`
/// both work.
pub trait NestedData<T> {
    /// Number of list levels above the scalars.
    const DEPTH: usize;

    /// Appends the dimensions of this level and the ones below to `shape`.
    fn infer_shape(&self, shape: &mut Vec<usize>);

    /// Appends the leaf values in row-major order, checking each list against `shape`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidLiteral`] if a list does not have the length
    /// recorded for its depth.
    fn flatten_into(&self, shape: &[usize], depth: usize, out: &mut Vec<T>)
        -> Result<(), TensorError>;
}

macro_rules! impl_nested_scalar {
    ($($t:ty),*) => {
        $(
            impl NestedData<$t> for $t {
                const DEPTH: usize = 0;

                fn infer_shape(&self, _shape: &mut Vec<usize>) {}

                fn flatten_into(
                    &self,
                    _shape: &[usize],
                    _depth: usize,
                    out: &mut Vec<$t>,
                ) -> Result<(), TensorError> {
                    out.push(*self);
                    Ok(())
                }
            }
        )*
    };
}

impl_nested_scalar!(f32, f64, i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

fn flatten_list<T, U: NestedData<T>>(
    items: &[U],
    shape: &[usize],
    depth: usize,
    out: &mut Vec<T>,
) -> Result<(), TensorError> {
    let expected = shape[depth];
    if items.len() != expected {
        return Err(TensorError::InvalidLiteral {
            depth,
            expected,
            actual: items.len(),
        });
    }
    for item in items {
        item.flatten_into(shape, depth + 1, out)?;
    }
    Ok(())
}

fn infer_list<T, U: NestedData<T>>(items: &[U], shape: &mut Vec<usize>) {
    shape.push(items.len());
    match items.first() {
        Some(first) => first.infer_shape(shape),
        None => shape.resize(shape.len() + U::DEPTH, 0),
    }
}

impl<T, U: NestedData<T>> NestedData<T> for Vec<U> {
    const DEPTH: usize = U::DEPTH + 1;

    fn infer_shape(&self, shape: &mut Vec<usize>) {
        infer_list(self, shape);
    }

    fn flatten_into(
        &self,
        shape: &[usize],
        depth: usize,
        out: &mut Vec<T>,
    ) -> Result<(), TensorError> {
        flatten_list(self, shape, depth, out)
    }
}

impl<T, U: NestedData<T>, const N: usize> NestedData<T> for [U; N] {
    const DEPTH: usize = U::DEPTH + 1;

    fn infer_shape(&self, shape: &mut Vec<usize>) {
        infer_list(self, shape);
    }

    fn flatten_into(
        &self,
        shape: &[usize],
        depth: usize,
        out: &mut Vec<T>,
    ) -> Result<(), TensorError> {
        flatten_list(self, shape, depth, out)
    }
}

impl<T: Copy, A: TensorAllocator> Tensor<T, A> {
    /// Creates a tensor from nested literal data, inferring its shape.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidLiteral`] if the data is ragged.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let data: Vec<Vec<f32>> = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
    /// let t = Tensor::<f32>::from_nested(&data, CpuAllocator).unwrap();
    /// assert_eq!(t.shape(), &[2, 3]);
    ///
    /// let ragged: Vec<Vec<f32>> = vec![vec![1.0, 2.0], vec![3.0]];
    /// let ragged = Tensor::<f32>::from_nested(&ragged, CpuAllocator);
    /// assert!(ragged.is_err());
    /// ```
    pub fn from_nested<D: NestedData<T> + ?Sized>(data: &D, alloc: A) -> Result<Self, TensorError> {
        let mut shape = Vec::new();
        data.infer_shape(&mut shape);

        let mut flat = Vec::with_capacity(shape.iter().product());
        data.flatten_into(&shape, 0, &mut flat)?;

        Tensor::from_contiguous(&shape, TensorStorage::from_vec(flat, alloc)?)
    }
}
