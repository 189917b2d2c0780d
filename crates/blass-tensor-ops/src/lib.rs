#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// 1-D convolution with valid or centered padding.
pub mod conv;

/// Elementwise arithmetic with broadcasting.
///
/// Same-shape contiguous operands take a flat path; everything else goes through
/// the strided broadcast engine.
pub mod elementwise;

/// Error types for tensor operations.
///
/// Defines [`TensorOpsError`] for handling failures during tensor computations.
pub mod error;

/// Low-level computational kernels for tensor operations.
pub mod kernels;

/// Matrix multiplication, plain and batched.
pub mod matmul;

/// Neural-network building blocks.
pub mod nn;

/// High-level tensor operations and traits.
///
/// Provides the [`TensorOps`] trait with method forms of the arithmetic,
/// matmul and convolution operations.
pub mod ops;

/// Execution strategies and parallelization thresholds.
pub mod parallel;

pub use conv::Padding;
pub use elementwise::BinaryOp;
pub use error::TensorOpsError;
pub use ops::TensorOps;
pub use parallel::{ExecutionStrategy, ParallelError};
