//! Shape and stride arithmetic shared by the view layer and the kernels.

use crate::TensorError;

/// Computes the strides for a row-major (C-contiguous) tensor layout.
///
/// The rightmost dimension has stride 1 and each dimension's stride is the
/// product of all dimensions to its right.
///
/// # Arguments
///
/// * `shape` - The shape of the tensor
///
/// # Returns
///
/// A vector of strides corresponding to each dimension.
///
/// # Examples
///
/// ```rust
/// use blass_tensor::shape::get_strides_from_shape;
///
/// assert_eq!(get_strides_from_shape(&[2, 3]), vec![3, 1]);
/// assert_eq!(get_strides_from_shape(&[2, 3, 4]), vec![12, 4, 1]);
/// assert!(get_strides_from_shape(&[]).is_empty());
/// ```
pub fn get_strides_from_shape(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut stride = 1;
    for i in (0..shape.len()).rev() {
        strides[i] = stride;
        stride *= shape[i];
    }
    strides
}

/// Returns the number of elements described by `shape` (1 for a scalar).
#[inline]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Returns true if `strides` are the canonical row-major strides of `shape`.
///
/// Dimensions of size 0 or 1 never move the offset, so their stride is not checked.
pub fn is_contiguous(shape: &[usize], strides: &[usize]) -> bool {
    let mut expected = 1;
    for (&dim, &stride) in shape.iter().zip(strides.iter()).rev() {
        if dim > 1 && stride != expected {
            return false;
        }
        expected *= dim;
    }
    true
}

/// Maps a row-major linear index to an element offset through `strides`.
///
/// # Arguments
///
/// * `linear` - The position of the element in row-major order.
/// * `shape` - The logical shape.
/// * `strides` - The element strides of each dimension.
#[inline]
pub fn strided_offset(mut linear: usize, shape: &[usize], strides: &[usize]) -> usize {
    let mut offset = 0;
    for (&dim, &stride) in shape.iter().zip(strides.iter()).rev() {
        offset += (linear % dim) * stride;
        linear /= dim;
    }
    offset
}

/// Returns the largest element offset reachable through `shape` and `strides`.
///
/// Returns `None` for tensors with no elements.
pub fn max_offset(shape: &[usize], strides: &[usize]) -> Option<usize> {
    if shape.iter().any(|&d| d == 0) {
        return None;
    }
    Some(
        shape
            .iter()
            .zip(strides.iter())
            .map(|(&d, &s)| (d - 1) * s)
            .sum(),
    )
}

/// Resolves a requested view shape with at most one `-1` inference marker.
///
/// # Arguments
///
/// * `numel` - The number of elements the view must cover.
/// * `requested` - The requested dimensions; `-1` is inferred from the others.
///
/// # Errors
///
/// Returns [`TensorError::InvalidReshape`] on negative sizes, multiple markers,
/// an unresolvable marker, a dimension product that overflows `usize` or an
/// element count mismatch.
pub fn resolve_view_shape(numel: usize, requested: &[isize]) -> Result<Vec<usize>, TensorError> {
    let mut marker = None;
    let mut known: usize = 1;

    for (i, &d) in requested.iter().enumerate() {
        match d {
            -1 => {
                if marker.is_some() {
                    return Err(TensorError::invalid_reshape(
                        requested,
                        numel,
                        "only one dimension can be inferred",
                    ));
                }
                marker = Some(i);
            }
            d if d < 0 => {
                return Err(TensorError::invalid_reshape(
                    requested,
                    numel,
                    "dimensions must be non-negative",
                ));
            }
            d => {
                known = known.checked_mul(d as usize).ok_or_else(|| {
                    TensorError::invalid_reshape(requested, numel, "element count overflows usize")
                })?;
            }
        }
    }

    let mut shape: Vec<usize> = requested.iter().map(|&d| d.max(0) as usize).collect();

    if let Some(i) = marker {
        if known == 0 || numel % known != 0 {
            return Err(TensorError::invalid_reshape(
                requested,
                numel,
                "cannot infer the size of the -1 dimension",
            ));
        }
        shape[i] = numel / known;
    } else if known != numel {
        return Err(TensorError::invalid_reshape(
            requested,
            numel,
            "element count does not match",
        ));
    }

    Ok(shape)
}
