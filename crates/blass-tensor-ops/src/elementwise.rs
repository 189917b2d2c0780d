use blass_tensor::{broadcast_shape, Tensor, TensorAllocator};
use log::{debug, trace};
use rayon::prelude::*;

use crate::{
    error::TensorOpsError,
    kernels::{
        batch_offsets, binary_run, AddKernel, BinaryKernel, DivKernel, Element, MulKernel,
        SubKernel,
    },
    parallel::{
        ExecutionStrategy, BATCH_PARALLEL_THRESHOLD, ELEMENTWISE_PARALLEL_THRESHOLD,
        INNER_PARALLEL_THRESHOLD,
    },
};

/// Binary elementwise operator tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `lhs + rhs`
    Add,
    /// `lhs - rhs`
    Sub,
    /// `lhs * rhs`
    Mul,
    /// `lhs / rhs`
    Div,
}

/// Which code path a call is allowed to take.
#[derive(Clone, Copy, PartialEq)]
enum Path {
    Dispatch,
    BroadcastOnly,
}

/// Applies `op` elementwise with broadcasting.
///
/// # Arguments
///
/// * `lhs` - The left operand.
/// * `rhs` - The right operand.
/// * `op` - The operator to apply.
///
/// # Returns
///
/// A new contiguous tensor with the broadcast shape of both operands.
///
/// # Errors
///
/// Returns [`TensorOpsError::ShapeMismatch`] if the shapes cannot be broadcast.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::elementwise::{binary_op, BinaryOp};
///
/// let a = Tensor::<i32>::from_shape_vec(&[2, 3], vec![1, 2, 3, 4, 5, 6], CpuAllocator).unwrap();
/// let b = Tensor::<i32>::from_shape_vec(&[3], vec![10, 20, 30], CpuAllocator).unwrap();
/// let c = binary_op(&a, &b, BinaryOp::Add).unwrap();
/// assert_eq!(c.as_slice(), &[11, 22, 33, 14, 25, 36]);
/// ```
pub fn binary_op<T, A>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    op: BinaryOp,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    binary_op_with(lhs, rhs, op, ExecutionStrategy::default())
}

/// Same as [`binary_op`] with an explicit execution strategy.
pub fn binary_op_with<T, A>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    op: BinaryOp,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    dispatch_op(lhs, rhs, op, strategy, Path::Dispatch)
}

/// Runs `op` through the strided broadcast engine only.
///
/// Same-shape operands skip the flat fast path and non-contiguous operands are read
/// through their strides instead of being materialized. The result is identical to
/// [`binary_op`].
pub fn broadcast_binary_op<T, A>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    op: BinaryOp,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    dispatch_op(lhs, rhs, op, strategy, Path::BroadcastOnly)
}

/// Applies `op` between every element of `lhs` and the scalar `value`.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::elementwise::{binary_op_scalar, BinaryOp};
///
/// let a = Tensor::<f32>::from_shape_vec(&[3], vec![2.0, 4.0, 6.0], CpuAllocator).unwrap();
/// let c = binary_op_scalar(&a, 2.0, BinaryOp::Div).unwrap();
/// assert_eq!(c.as_slice(), &[1.0, 2.0, 3.0]);
/// ```
pub fn binary_op_scalar<T, A>(
    lhs: &Tensor<T, A>,
    value: T,
    op: BinaryOp,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    let rhs = Tensor::from_shape_val(&[], value, lhs.storage.alloc().clone())?;
    binary_op(lhs, &rhs, op)
}

/// Elementwise `lhs + rhs` with broadcasting.
pub fn add<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op(lhs, rhs, BinaryOp::Add)
}

/// Elementwise `lhs - rhs` with broadcasting.
pub fn sub<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op(lhs, rhs, BinaryOp::Sub)
}

/// Elementwise `lhs * rhs` with broadcasting.
pub fn mul<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op(lhs, rhs, BinaryOp::Mul)
}

/// Elementwise `lhs / rhs` with broadcasting.
///
/// Integer division by zero panics.
pub fn div<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op(lhs, rhs, BinaryOp::Div)
}

/// Adds `value` to every element.
pub fn add_scalar<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    value: T,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op_scalar(lhs, value, BinaryOp::Add)
}

/// Subtracts `value` from every element.
pub fn sub_scalar<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    value: T,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op_scalar(lhs, value, BinaryOp::Sub)
}

/// Multiplies every element by `value`.
pub fn mul_scalar<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    value: T,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op_scalar(lhs, value, BinaryOp::Mul)
}

/// Divides every element by `value`.
pub fn div_scalar<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    value: T,
) -> Result<Tensor<T, A>, TensorOpsError> {
    binary_op_scalar(lhs, value, BinaryOp::Div)
}

fn dispatch_op<T: Element, A: TensorAllocator>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    op: BinaryOp,
    strategy: ExecutionStrategy,
    path: Path,
) -> Result<Tensor<T, A>, TensorOpsError> {
    match op {
        BinaryOp::Add => dispatch::<T, A, AddKernel>(lhs, rhs, strategy, path),
        BinaryOp::Sub => dispatch::<T, A, SubKernel>(lhs, rhs, strategy, path),
        BinaryOp::Mul => dispatch::<T, A, MulKernel>(lhs, rhs, strategy, path),
        BinaryOp::Div => dispatch::<T, A, DivKernel>(lhs, rhs, strategy, path),
    }
}

fn dispatch<T, A, K>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    strategy: ExecutionStrategy,
    path: Path,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
    K: BinaryKernel<T>,
{
    if path == Path::BroadcastOnly {
        return broadcast_path::<T, A, K>(lhs, rhs, strategy);
    }

    if !lhs.is_contiguous() || !rhs.is_contiguous() {
        debug!(
            "materializing non-contiguous operands: lhs {:?}/{:?}, rhs {:?}/{:?}",
            lhs.shape(),
            lhs.strides(),
            rhs.shape(),
            rhs.strides()
        );
        let lhs = lhs.contiguous()?;
        let rhs = rhs.contiguous()?;
        return dispatch::<T, A, K>(&lhs, &rhs, strategy, path);
    }

    if lhs.shape() == rhs.shape() {
        flat_path::<T, A, K>(lhs, rhs, strategy)
    } else {
        broadcast_path::<T, A, K>(lhs, rhs, strategy)
    }
}

/// Both operands contiguous with the same shape: one linear pass.
fn flat_path<T, A, K>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
    K: BinaryKernel<T>,
{
    let n = lhs.numel();
    let a = &lhs.as_slice()[..n];
    let b = &rhs.as_slice()[..n];

    let mut out = Tensor::zeros(lhs.shape(), lhs.storage.alloc().clone())?;
    let dst = out.as_slice_mut();

    let parallel = strategy.allows_parallel() && n >= ELEMENTWISE_PARALLEL_THRESHOLD;
    trace!("elementwise flat path: n={n} parallel={parallel}");

    strategy.install(|| {
        if parallel {
            dst.par_chunks_mut(ELEMENTWISE_PARALLEL_THRESHOLD)
                .zip(a.par_chunks(ELEMENTWISE_PARALLEL_THRESHOLD))
                .zip(b.par_chunks(ELEMENTWISE_PARALLEL_THRESHOLD))
                .for_each(|((dst, a), b)| binary_run::<T, K>(a, 1, b, 1, dst));
        } else {
            binary_run::<T, K>(a, 1, b, 1, dst);
        }
    })?;

    Ok(out)
}

/// General path: broadcast both operands and walk batches of inner runs.
///
/// The inner run is the last dimension with size > 1; every dimension before it is
/// a batch dimension. Batches are split across workers when there are many of them,
/// otherwise a long inner run is split instead.
fn broadcast_path<T, A, K>(
    lhs: &Tensor<T, A>,
    rhs: &Tensor<T, A>,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
    K: BinaryKernel<T>,
{
    let shape = broadcast_shape(lhs.shape(), rhs.shape())
        .map_err(|_| TensorOpsError::ShapeMismatch(lhs.shape().to_vec(), rhs.shape().to_vec()))?;
    let a = lhs.broadcast_to(&shape)?;
    let b = rhs.broadcast_to(&shape)?;

    let mut out = Tensor::zeros(&shape, lhs.storage.alloc().clone())?;
    if out.numel() == 0 {
        return Ok(out);
    }

    let (batch_dims, inner, stride_a, stride_b) = match shape.iter().rposition(|&d| d > 1) {
        Some(k) => (k, shape[k], a.strides()[k], b.strides()[k]),
        None => (0, 1, 0, 0),
    };
    let batch_shape = &shape[..batch_dims];
    let batch_strides_a = &a.strides()[..batch_dims];
    let batch_strides_b = &b.strides()[..batch_dims];
    let batch: usize = batch_shape.iter().product();

    let a_data = a.as_slice();
    let b_data = b.as_slice();
    let dst = out.as_slice_mut();

    let par_batches = strategy.allows_parallel() && batch > BATCH_PARALLEL_THRESHOLD;
    let par_inner =
        strategy.allows_parallel() && !par_batches && inner >= INNER_PARALLEL_THRESHOLD;
    trace!(
        "elementwise broadcast path: shape={shape:?} batch={batch} inner={inner} \
         par_batches={par_batches} par_inner={par_inner}"
    );

    let run = |index: usize, dst: &mut [T]| {
        let (off_a, off_b) = batch_offsets(index, batch_shape, batch_strides_a, batch_strides_b);
        if par_inner {
            dst.par_chunks_mut(INNER_PARALLEL_THRESHOLD)
                .enumerate()
                .for_each(|(c, piece)| {
                    let start = c * INNER_PARALLEL_THRESHOLD;
                    binary_run::<T, K>(
                        &a_data[off_a + start * stride_a..],
                        stride_a,
                        &b_data[off_b + start * stride_b..],
                        stride_b,
                        piece,
                    );
                });
        } else {
            binary_run::<T, K>(&a_data[off_a..], stride_a, &b_data[off_b..], stride_b, dst);
        }
    };

    strategy.install(|| {
        if par_batches {
            dst.par_chunks_exact_mut(inner)
                .enumerate()
                .for_each(|(index, dst)| run(index, dst));
        } else {
            dst.chunks_exact_mut(inner)
                .enumerate()
                .for_each(|(index, dst)| run(index, dst));
        }
    })?;

    Ok(out)
}
