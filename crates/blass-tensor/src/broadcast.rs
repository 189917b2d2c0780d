//! Broadcasting of shapes and zero-stride views.
//!
//! Two shapes are aligned from the right; a missing leading dimension behaves
//! like a dimension of size 1. Each aligned pair must be equal or contain a 1,
//! and the broadcast shape takes the larger of the two.

use crate::{Tensor, TensorAllocator, TensorError};

/// Computes the shape two operands broadcast to.
///
/// # Arguments
///
/// * `a` - The first shape.
/// * `b` - The second shape.
///
/// # Errors
///
/// Returns [`TensorError::ShapeMismatch`] naming both shapes if any aligned pair
/// of dimensions differs and neither is 1.
///
/// # Example
///
/// ```
/// use blass_tensor::broadcast::broadcast_shape;
///
/// assert_eq!(broadcast_shape(&[8, 1, 6, 1], &[7, 1, 5]).unwrap(), vec![8, 7, 6, 5]);
/// assert!(broadcast_shape(&[2, 3], &[4]).is_err());
/// ```
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Vec<usize>, TensorError> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];

    for i in 0..rank {
        let da = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let db = if i < b.len() { b[b.len() - 1 - i] } else { 1 };
        out[rank - 1 - i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return Err(TensorError::shape_mismatch(a, b)),
        };
    }

    Ok(out)
}

/// Computes the strides that stretch `shape`/`strides` to `target`.
///
/// Padded leading dimensions and stretched size-1 dimensions get stride 0.
///
/// # Errors
///
/// Returns [`TensorError::ShapeMismatch`] if `shape` cannot be broadcast to `target`.
pub fn broadcast_strides(
    shape: &[usize],
    strides: &[usize],
    target: &[usize],
) -> Result<Vec<usize>, TensorError> {
    if shape.len() > target.len() {
        return Err(TensorError::shape_mismatch(shape, target));
    }
    let pad = target.len() - shape.len();
    let mut out = vec![0; target.len()];

    for (i, &t) in target.iter().enumerate().skip(pad) {
        let d = shape[i - pad];
        out[i] = if d == t {
            strides[i - pad]
        } else if d == 1 {
            0
        } else {
            return Err(TensorError::shape_mismatch(shape, target));
        };
    }

    Ok(out)
}

impl<T, A: TensorAllocator> Tensor<T, A> {
    /// Returns a view of the tensor stretched to `shape` without copying.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::ShapeMismatch`] if the tensor cannot be broadcast to `shape`.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<i32>::from_shape_vec(&[3], vec![1, 2, 3], CpuAllocator).unwrap();
    /// let b = t.broadcast_to(&[2, 3]).unwrap();
    /// assert_eq!(b.strides(), &[0, 1]);
    /// assert_eq!(b.to_vec(), vec![1, 2, 3, 1, 2, 3]);
    /// ```
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let strides = broadcast_strides(&self.shape, &self.strides, shape)?;
        Ok(Self {
            storage: self.storage.clone(),
            shape: shape.to_vec(),
            strides,
        })
    }
}
