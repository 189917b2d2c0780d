use blass_tensor::TensorError;
use thiserror::Error;

use crate::parallel::ParallelError;

/// An error type for tensor operations.
#[derive(Error, Debug, PartialEq)]
pub enum TensorOpsError {
    /// Tensor error
    #[error("Error with the tensor: {0}")]
    TensorError(#[from] TensorError),

    /// The operand shapes are incompatible for the operation.
    #[error("Shape mismatch: {0:?} != {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// An operand has the wrong number of dimensions.
    #[error("{op} expects rank {expected}, got rank {actual}")]
    RankError {
        /// Name of the operation
        op: &'static str,
        /// The rank the operation requires (the minimum for batched ops)
        expected: usize,
        /// The rank of the offending operand
        actual: usize,
    },

    /// The execution strategy could not be applied.
    #[error(transparent)]
    Parallel(#[from] ParallelError),
}
