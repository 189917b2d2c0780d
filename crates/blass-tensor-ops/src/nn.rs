use blass_tensor::{Tensor, TensorAllocator};
use num_traits::Float;
use rayon::prelude::*;

use crate::{
    error::TensorOpsError,
    parallel::{ExecutionStrategy, ELEMENTWISE_PARALLEL_THRESHOLD},
};

/// Softmax over the last dimension.
///
/// Each row is shifted by its maximum before exponentiation, so large inputs do not overflow.
///
/// # Errors
///
/// Returns [`TensorOpsError::RankError`] for a rank-0 tensor.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::nn::softmax;
///
/// let x = Tensor::<f64>::from_shape_vec(&[2, 2], vec![0.0, 0.0, 1000.0, 1000.0], CpuAllocator).unwrap();
/// let y = softmax(&x).unwrap();
/// assert_eq!(y.as_slice(), &[0.5, 0.5, 0.5, 0.5]);
/// ```
pub fn softmax<T, A>(input: &Tensor<T, A>) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Float + Send + Sync + 'static,
    A: TensorAllocator,
{
    softmax_with(input, ExecutionStrategy::default())
}

/// Same as [`softmax`] with an explicit execution strategy.
pub fn softmax_with<T, A>(
    input: &Tensor<T, A>,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Float + Send + Sync + 'static,
    A: TensorAllocator,
{
    if input.is_scalar() {
        return Err(TensorOpsError::RankError {
            op: "softmax",
            expected: 1,
            actual: 0,
        });
    }

    let mut out = input.materialize()?;
    let n = out.numel();
    let row_len = input.shape()[input.rank() - 1];
    if n == 0 {
        return Ok(out);
    }

    let dst = &mut out.as_slice_mut()[..n];
    let parallel = strategy.allows_parallel() && n >= ELEMENTWISE_PARALLEL_THRESHOLD;

    strategy.install(|| {
        if parallel {
            dst.par_chunks_exact_mut(row_len).for_each(softmax_row);
        } else {
            dst.chunks_exact_mut(row_len).for_each(softmax_row);
        }
    })?;

    Ok(out)
}

fn softmax_row<T: Float>(row: &mut [T]) {
    let max = row.iter().fold(T::neg_infinity(), |m, &v| m.max(v));
    let mut sum = T::zero();
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum = sum + *v;
    }
    let inv = sum.recip();
    row.iter_mut().for_each(|v| *v = *v * inv);
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use blass_tensor::CpuAllocator;

    #[test]
    fn test_softmax_rows_sum_to_one() -> Result<(), TensorOpsError> {
        let x = Tensor::<f32>::from_shape_vec(
            &[2, 3],
            vec![1.0, 2.0, 3.0, -1.0, 0.0, 1.0],
            CpuAllocator,
        )?;
        let y = softmax(&x)?;
        for r in 0..2 {
            let row = y.at(r)?.to_vec();
            assert_relative_eq!(row.iter().sum::<f32>(), 1.0, epsilon = 1e-6);
        }
        // shifting a row does not change its softmax
        assert_relative_eq!(y.get(&[0, 2])?, y.get(&[1, 2])?, epsilon = 1e-6);
        assert_relative_eq!(y.get(&[0, 0])?, 0.09003057, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_softmax_transposed_input() -> Result<(), TensorOpsError> {
        let x = Tensor::<f64>::from_shape_vec(&[2, 2], vec![0.0, 1.0, 0.0, 1.0], CpuAllocator)?;
        let y = softmax(&x.transpose())?;
        assert_relative_eq!(y.get(&[0, 0])?, 0.5);
        assert_relative_eq!(y.get(&[1, 1])?, 0.5);
        Ok(())
    }

    #[test]
    fn test_softmax_parallel_matches_serial() -> Result<(), TensorOpsError> {
        let x = Tensor::<f64>::from_shape_fn(&[64, 32], CpuAllocator, |idx| {
            (idx[0] as f64 * 0.1).sin() + idx[1] as f64 * 0.01
        })?;
        let auto = softmax(&x)?;
        let serial = softmax_with(&x, ExecutionStrategy::Serial)?;
        assert_eq!(auto.to_vec(), serial.to_vec());
        Ok(())
    }

    #[test]
    fn test_softmax_scalar_rejected() -> Result<(), TensorOpsError> {
        let x = Tensor::<f32>::from_shape_val(&[], 1.0, CpuAllocator)?;
        assert!(matches!(
            softmax(&x),
            Err(TensorOpsError::RankError { op: "softmax", .. })
        ));
        Ok(())
    }
}
