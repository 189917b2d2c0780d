use blass_tensor::{broadcast_shape, Tensor, TensorAllocator};
use log::trace;
use rayon::prelude::*;

use crate::{
    error::TensorOpsError,
    kernels::{batch_offsets, matmul_bt, Element},
    parallel::{ExecutionStrategy, MATMUL_BATCH_PARALLEL_THRESHOLD},
};

/// Multiplies two matrices.
///
/// # Arguments
///
/// * `a` - The left matrix with shape `[m, n]`.
/// * `b` - The right matrix with shape `[n, p]`.
///
/// # Returns
///
/// A new contiguous tensor with shape `[m, p]`.
///
/// # Errors
///
/// Returns [`TensorOpsError::RankError`] if either operand is not rank 2 and
/// [`TensorOpsError::ShapeMismatch`] if the inner dimensions differ.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::matmul::matmul_2d;
///
/// let a = Tensor::<f64>::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
/// let b = Tensor::<f64>::from_shape_vec(&[2, 1], vec![1.0, 1.0], CpuAllocator).unwrap();
/// let c = matmul_2d(&a, &b).unwrap();
/// assert_eq!(c.shape(), &[2, 1]);
/// assert_eq!(c.as_slice(), &[3.0, 7.0]);
/// ```
pub fn matmul_2d<T, A>(a: &Tensor<T, A>, b: &Tensor<T, A>) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    matmul_2d_with(a, b, ExecutionStrategy::default())
}

/// Same as [`matmul_2d`] with an explicit execution strategy.
pub fn matmul_2d_with<T, A>(
    a: &Tensor<T, A>,
    b: &Tensor<T, A>,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    for t in [a, b] {
        if t.rank() != 2 {
            return Err(TensorOpsError::RankError {
                op: "matmul_2d",
                expected: 2,
                actual: t.rank(),
            });
        }
    }
    let (m, n) = (a.shape()[0], a.shape()[1]);
    let p = b.shape()[1];
    if b.shape()[0] != n {
        return Err(TensorOpsError::ShapeMismatch(
            a.shape().to_vec(),
            b.shape().to_vec(),
        ));
    }

    let lhs = a.contiguous()?;
    let rhs_t = b.transpose().contiguous()?;

    let mut out = Tensor::zeros(&[m, p], a.storage.alloc().clone())?;
    let a_data = &lhs.as_slice()[..m * n];
    let bt_data = &rhs_t.as_slice()[..p * n];
    let dst = out.as_slice_mut();
    let parallel = strategy.allows_parallel();

    trace!("matmul_2d: [{m}, {n}] x [{n}, {p}] parallel={parallel}");
    strategy.install(|| matmul_bt(a_data, bt_data, dst, m, n, p, parallel))?;

    Ok(out)
}

/// Batched matrix multiplication with broadcasting of the batch dimensions.
///
/// The last two dimensions of each operand are the matrices; all leading dimensions
/// are batch dimensions and broadcast like elementwise operands.
///
/// # Arguments
///
/// * `a` - The left operand with shape `[..., m, n]`.
/// * `b` - The right operand with shape `[..., n, p]`.
///
/// # Returns
///
/// A new contiguous tensor with shape `[broadcast batch..., m, p]`.
///
/// # Errors
///
/// Returns [`TensorOpsError::RankError`] if an operand has rank < 2 and
/// [`TensorOpsError::ShapeMismatch`] if the inner dimensions differ or the batch
/// dimensions cannot be broadcast.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::matmul::matmul;
///
/// let a = Tensor::<f32>::from_shape_val(&[4, 2, 3], 1.0, CpuAllocator).unwrap();
/// let b = Tensor::<f32>::from_shape_val(&[1, 3, 5], 2.0, CpuAllocator).unwrap();
/// let c = matmul(&a, &b).unwrap();
/// assert_eq!(c.shape(), &[4, 2, 5]);
/// assert!(c.as_slice().iter().all(|&v| v == 6.0));
/// ```
pub fn matmul<T, A>(a: &Tensor<T, A>, b: &Tensor<T, A>) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    matmul_with(a, b, ExecutionStrategy::default())
}

/// Same as [`matmul`] with an explicit execution strategy.
pub fn matmul_with<T, A>(
    a: &Tensor<T, A>,
    b: &Tensor<T, A>,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    for t in [a, b] {
        if t.rank() < 2 {
            return Err(TensorOpsError::RankError {
                op: "matmul",
                expected: 2,
                actual: t.rank(),
            });
        }
    }
    if a.rank() == 2 && b.rank() == 2 {
        return matmul_2d_with(a, b, strategy);
    }

    let shape_mismatch = || TensorOpsError::ShapeMismatch(a.shape().to_vec(), b.shape().to_vec());

    let (ra, rb) = (a.rank(), b.rank());
    let (m, n) = (a.shape()[ra - 2], a.shape()[ra - 1]);
    let p = b.shape()[rb - 1];
    if b.shape()[rb - 2] != n {
        return Err(shape_mismatch());
    }
    let batch_shape =
        broadcast_shape(&a.shape()[..ra - 2], &b.shape()[..rb - 2]).map_err(|_| shape_mismatch())?;
    let nb = batch_shape.len();
    let batch: usize = batch_shape.iter().product();

    // B with its matrix dims swapped so each output cell is a contiguous dot product
    let mut axes: Vec<usize> = (0..rb).collect();
    axes.swap(rb - 2, rb - 1);
    let rhs_t = b.permute(&axes)?.contiguous()?;
    let lhs = a.contiguous()?;

    let with_matrix = |rows: usize, cols: usize| {
        let mut s = batch_shape.clone();
        s.extend([rows, cols]);
        s
    };
    let lhs = lhs.broadcast_to(&with_matrix(m, n))?;
    let rhs_t = rhs_t.broadcast_to(&with_matrix(p, n))?;

    let mut out = Tensor::zeros(&with_matrix(m, p), a.storage.alloc().clone())?;
    if out.numel() == 0 {
        return Ok(out);
    }

    let a_data = lhs.as_slice();
    let bt_data = rhs_t.as_slice();
    let strides_a = &lhs.strides()[..nb];
    let strides_b = &rhs_t.strides()[..nb];
    let dst = out.as_slice_mut();

    let par_batches = strategy.allows_parallel() && batch >= MATMUL_BATCH_PARALLEL_THRESHOLD;
    let par_inner = strategy.allows_parallel() && !par_batches;
    trace!(
        "matmul: batch={batch_shape:?} [{m}, {n}] x [{n}, {p}] \
         par_batches={par_batches} par_inner={par_inner}"
    );

    let product = |index: usize, dst: &mut [T], parallel: bool| {
        let (off_a, off_b) = batch_offsets(index, &batch_shape, strides_a, strides_b);
        matmul_bt(
            &a_data[off_a..off_a + m * n],
            &bt_data[off_b..off_b + p * n],
            dst,
            m,
            n,
            p,
            parallel,
        );
    };

    strategy.install(|| {
        if par_batches {
            dst.par_chunks_exact_mut(m * p)
                .enumerate()
                .for_each(|(index, dst)| product(index, dst, false));
        } else {
            dst.chunks_exact_mut(m * p)
                .enumerate()
                .for_each(|(index, dst)| product(index, dst, par_inner));
        }
    })?;

    Ok(out)
}
