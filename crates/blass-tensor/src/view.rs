use log::trace;
use rayon::prelude::*;

use crate::{
    shape::{get_strides_from_shape, is_contiguous, resolve_view_shape, strided_offset},
    storage::TensorStorage,
    Tensor, TensorAllocator, TensorError,
};

/// Minimum number of elements before materialization runs on the rayon pool.
pub const MATERIALIZE_PARALLEL_THRESHOLD: usize = 1 << 14;

impl<T, A: TensorAllocator> Tensor<T, A> {
    /// Returns the sub-tensor at `index` along the leading dimension.
    ///
    /// The result is a view one dimension narrower that shares the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::RankError`] for a scalar and
    /// [`TensorError::DimensionOutOfRange`] if `index >= shape[0]`.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<i32>::from_shape_vec(&[2, 3], vec![1, 2, 3, 4, 5, 6], CpuAllocator).unwrap();
    /// let row = t.at(1).unwrap();
    /// assert_eq!(row.shape(), &[3]);
    /// assert_eq!(row.to_vec(), vec![4, 5, 6]);
    /// ```
    pub fn at(&self, index: usize) -> Result<Self, TensorError> {
        if self.is_scalar() {
            return Err(TensorError::rank_error("at", 1, 0));
        }
        if index >= self.shape[0] {
            return Err(TensorError::dimension_out_of_range(index, self.shape[0]));
        }
        // an empty tensor may carry strides that point past its (empty) window
        let storage = if self.numel() == 0 {
            self.storage.view(0, 0)?
        } else {
            let offset = index * self.strides[0];
            self.storage.view(offset, self.storage.len() - offset)?
        };
        Ok(Self {
            storage,
            shape: self.shape[1..].to_vec(),
            strides: self.strides[1..].to_vec(),
        })
    }

    /// Applies [`Tensor::at`] for each entry of `index`, leading dimension first.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::RankError`] if `index` is longer than the rank.
    pub fn at_index(&self, index: &[usize]) -> Result<Self, TensorError> {
        if index.len() > self.rank() {
            return Err(TensorError::rank_error("at_index", self.rank(), index.len()));
        }
        let mut view = self.clone();
        for &i in index {
            view = view.at(i)?;
        }
        Ok(view)
    }

    /// Reorders the dimensions of the tensor without copying.
    ///
    /// Dimension `k` of the result is dimension `axes[k]` of `self`.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidPermutation`] if `axes` has the wrong length or
    /// repeats an axis, and [`TensorError::DimensionOutOfRange`] if an axis is `>= rank`.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<i32>::zeros(&[2, 3, 4], CpuAllocator).unwrap();
    /// let p = t.permute(&[2, 0, 1]).unwrap();
    /// assert_eq!(p.shape(), &[4, 2, 3]);
    /// assert_eq!(p.strides(), &[1, 12, 4]);
    /// ```
    pub fn permute(&self, axes: &[usize]) -> Result<Self, TensorError> {
        let rank = self.rank();
        if axes.len() != rank {
            return Err(TensorError::InvalidPermutation {
                axes: axes.to_vec(),
                rank,
            });
        }
        let mut seen = vec![false; rank];
        for &axis in axes {
            if axis >= rank {
                return Err(TensorError::dimension_out_of_range(axis, rank));
            }
            if seen[axis] {
                return Err(TensorError::InvalidPermutation {
                    axes: axes.to_vec(),
                    rank,
                });
            }
            seen[axis] = true;
        }
        Ok(Self {
            storage: self.storage.clone(),
            shape: axes.iter().map(|&a| self.shape[a]).collect(),
            strides: axes.iter().map(|&a| self.strides[a]).collect(),
        })
    }

    /// Reverses the order of all dimensions without copying.
    pub fn transpose(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            shape: self.shape.iter().rev().copied().collect(),
            strides: self.strides.iter().rev().copied().collect(),
        }
    }

    /// Returns true if the tensor is laid out in row-major order without gaps.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        is_contiguous(&self.shape, &self.strides)
    }
}

impl<T, A> Tensor<T, A>
where
    T: Copy + Send + Sync,
    A: TensorAllocator,
{
    /// Copies the tensor into a new, independently owned row-major buffer.
    ///
    /// Each output position is decomposed into a multi-index and read through the
    /// source strides, so any layout (transposed, sliced, broadcast) is supported.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<i32>::from_shape_vec(&[2, 2], vec![1, 2, 3, 4], CpuAllocator).unwrap();
    /// let m = t.transpose().materialize().unwrap();
    /// assert!(m.is_contiguous());
    /// assert_eq!(m.as_slice(), &[1, 3, 2, 4]);
    /// ```
    pub fn materialize(&self) -> Result<Self, TensorError> {
        let n = self.numel();
        trace!("materialize: shape={:?} strides={:?}", self.shape, self.strides);
        let data: Vec<T> = if n >= MATERIALIZE_PARALLEL_THRESHOLD {
            (0..n)
                .into_par_iter()
                .map(|i| self.storage.read(strided_offset(i, &self.shape, &self.strides)))
                .collect()
        } else {
            self.to_vec()
        };
        let storage = TensorStorage::from_vec(data, self.storage.alloc().clone())?;
        Tensor::from_contiguous(&self.shape, storage)
    }

    /// Returns the tensor itself when contiguous, otherwise a materialized copy.
    ///
    /// The contiguous case is a cheap clone that shares the buffer.
    pub fn contiguous(&self) -> Result<Self, TensorError> {
        if self.is_contiguous() {
            Ok(self.clone())
        } else {
            self.materialize()
        }
    }

    /// Reinterprets the elements under a new shape.
    ///
    /// At most one dimension may be `-1`; it is inferred from the element count.
    /// A non-contiguous tensor is materialized first, otherwise the result shares the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidReshape`] if the request cannot be satisfied.
    ///
    /// # Example
    ///
    /// ```
    /// use blass_tensor::{CpuAllocator, Tensor};
    ///
    /// let t = Tensor::<f32>::zeros(&[4, 6], CpuAllocator).unwrap();
    /// let v = t.view(&[2, -1, 3]).unwrap();
    /// assert_eq!(v.shape(), &[2, 4, 3]);
    /// ```
    pub fn view(&self, shape: &[isize]) -> Result<Self, TensorError> {
        let shape = resolve_view_shape(self.numel(), shape)?;
        let base = self.contiguous()?;
        Ok(Self {
            storage: base.storage,
            strides: get_strides_from_shape(&shape),
            shape,
        })
    }

    /// Reinterprets the elements under a new shape with explicit sizes.
    ///
    /// # Errors
    ///
    /// Returns [`TensorError::InvalidReshape`] if the element counts differ or a
    /// dimension does not fit in an `isize`.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self, TensorError> {
        let mut requested = Vec::with_capacity(shape.len());
        for &d in shape {
            let d = isize::try_from(d).map_err(|_| {
                let reason = format!("dimension {d} exceeds isize::MAX");
                TensorError::invalid_reshape(&requested, self.numel(), reason)
            })?;
            requested.push(d);
        }
        self.view(&requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CpuAllocator;

    fn arange(shape: &[usize]) -> Result<Tensor<i32>, TensorError> {
        let n = shape.iter().product::<usize>();
        Tensor::from_shape_vec(shape, (0..n as i32).collect(), CpuAllocator)
    }

    #[test]
    fn at_shares_buffer() -> Result<(), TensorError> {
        let t = arange(&[3, 2])?;
        let mut row = t.at(2)?;
        assert_eq!(row.to_vec(), vec![4, 5]);
        assert!(row.storage.shares_buffer(&t.storage));
        assert!(matches!(row.set(&[0], 40), Err(TensorError::SharedStorage { .. })));

        // SAFETY: single thread and no slice of the buffer is alive.
        unsafe { row.set_shared(&[0], 40)? };
        assert_eq!(t.get(&[2, 0])?, 40);
        Ok(())
    }

    #[test]
    fn at_on_empty_tensor_with_leading_stride() -> Result<(), TensorError> {
        let t = Tensor::<f32>::zeros(&[0, 2], CpuAllocator)?.transpose();
        assert_eq!(t.shape(), &[2, 0]);
        assert_eq!(t.strides(), &[1, 2]);

        let row = t.at(1)?;
        assert_eq!(row.shape(), &[0]);
        assert_eq!(row.numel(), 0);
        assert!(row.to_vec().is_empty());
        assert_eq!(t.at(2).err(), Some(TensorError::dimension_out_of_range(2, 2)));
        Ok(())
    }

    #[test]
    fn at_errors() -> Result<(), TensorError> {
        let t = arange(&[3, 2])?;
        assert_eq!(t.at(3).err(), Some(TensorError::dimension_out_of_range(3, 3)));

        let s = t.at_index(&[1, 1])?;
        assert!(s.is_scalar());
        assert_eq!(s.item()?, 3);
        assert!(matches!(s.at(0), Err(TensorError::RankError { .. })));
        assert!(t.at_index(&[0, 0, 0]).is_err());
        Ok(())
    }

    #[test]
    fn at_on_transposed() -> Result<(), TensorError> {
        let t = arange(&[2, 3])?.transpose();
        assert_eq!(t.at(1)?.to_vec(), vec![1, 4]);
        assert_eq!(t.at(2)?.to_vec(), vec![2, 5]);
        Ok(())
    }

    #[test]
    fn permute_validation() -> Result<(), TensorError> {
        let t = arange(&[2, 3, 4])?;
        assert!(matches!(
            t.permute(&[0, 1]),
            Err(TensorError::InvalidPermutation { .. })
        ));
        assert!(matches!(
            t.permute(&[0, 0, 1]),
            Err(TensorError::InvalidPermutation { .. })
        ));
        assert_eq!(
            t.permute(&[0, 1, 3]).err(),
            Some(TensorError::dimension_out_of_range(3, 3))
        );
        let p = t.permute(&[1, 2, 0])?;
        assert_eq!(p.get(&[2, 3, 1])?, t.get(&[1, 2, 3])?);
        Ok(())
    }

    #[test]
    fn transpose_twice_is_identity() -> Result<(), TensorError> {
        let t = arange(&[2, 3, 4])?;
        let tt = t.transpose().transpose();
        assert_eq!(tt.shape(), t.shape());
        assert_eq!(tt.strides(), t.strides());
        assert_eq!(tt.to_vec(), t.to_vec());
        Ok(())
    }

    #[test]
    fn contiguous_is_cheap_when_possible() -> Result<(), TensorError> {
        let t = arange(&[4, 4])?;
        let c = t.contiguous()?;
        assert!(c.storage.shares_buffer(&t.storage));

        let tr = t.transpose();
        assert!(!tr.is_contiguous());
        let c = tr.contiguous()?;
        assert!(c.is_contiguous());
        assert!(!c.storage.shares_buffer(&t.storage));
        assert_eq!(c.get(&[1, 0])?, 1);
        Ok(())
    }

    #[test]
    fn materialize_is_independent() -> Result<(), TensorError> {
        let t = arange(&[2, 2])?;
        let mut m = t.materialize()?;
        m.set(&[0, 0], 100)?;
        assert_eq!(t.get(&[0, 0])?, 0);
        assert!(m.storage.is_unique());
        Ok(())
    }

    #[test]
    fn materialize_large_transposed() -> Result<(), TensorError> {
        let t = arange(&[200, 100])?;
        let m = t.transpose().materialize()?;
        assert_eq!(m.shape(), &[100, 200]);
        for (i, j) in [(0, 0), (7, 150), (99, 199)] {
            assert_eq!(m.get(&[i, j])?, t.get(&[j, i])?);
        }
        Ok(())
    }

    #[test]
    fn view_round_trip() -> Result<(), TensorError> {
        let t = arange(&[100, 100])?;
        let v = t.view(&[50, 20, 10])?;
        assert!(v.storage.shares_buffer(&t.storage));
        let back = v.view(&[100, 100])?;
        assert_eq!(back.to_vec(), t.to_vec());
        Ok(())
    }

    #[test]
    fn view_of_transposed_materializes() -> Result<(), TensorError> {
        let t = arange(&[2, 3])?;
        let v = t.transpose().view(&[-1])?;
        assert_eq!(v.to_vec(), vec![0, 3, 1, 4, 2, 5]);
        Ok(())
    }

    #[test]
    fn view_errors() -> Result<(), TensorError> {
        let t = arange(&[3, 4])?;
        assert!(matches!(
            t.view(&[5, -1]),
            Err(TensorError::InvalidReshape { .. })
        ));
        assert!(t.view(&[-1, -1]).is_err());
        assert!(t.reshape(&[5, 2]).is_err());
        assert_eq!(t.reshape(&[12])?.shape(), &[12]);
        Ok(())
    }

    #[test]
    fn oversized_dimensions_are_rejected() -> Result<(), TensorError> {
        let t = arange(&[3, 4])?;
        assert!(matches!(
            t.view(&[isize::MAX, 4]),
            Err(TensorError::InvalidReshape { .. })
        ));
        assert!(matches!(
            t.view(&[isize::MAX, -1]),
            Err(TensorError::InvalidReshape { .. })
        ));
        assert!(matches!(
            t.reshape(&[usize::MAX]),
            Err(TensorError::InvalidReshape { .. })
        ));
        assert!(matches!(
            t.reshape(&[usize::MAX, 2]),
            Err(TensorError::InvalidReshape { .. })
        ));
        Ok(())
    }

    #[test]
    fn scalar_view() -> Result<(), TensorError> {
        let t = arange(&[1])?;
        let s = t.view(&[])?;
        assert!(s.is_scalar());
        assert_eq!(s.item()?, 0);
        Ok(())
    }
}
