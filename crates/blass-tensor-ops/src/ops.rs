use blass_tensor::{Tensor, TensorAllocator};

use crate::{
    conv::{convolve1d, Padding},
    elementwise::{binary_op, binary_op_scalar, BinaryOp},
    error::TensorOpsError,
    kernels::Element,
    matmul::{matmul, matmul_2d},
};

/// Arithmetic and linear-algebra operations as tensor methods.
///
/// Every method returns a new contiguous tensor; the operands are never modified.
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::TensorOps;
///
/// let a = Tensor::<f32>::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
/// let b = a.mul_scalar(2.0).unwrap().add(&a).unwrap();
/// assert_eq!(b.as_slice(), &[3.0, 6.0, 9.0, 12.0]);
/// ```
pub trait TensorOps<T>: Sized {
    /// Elementwise addition with broadcasting.
    fn add(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// Elementwise subtraction with broadcasting.
    fn sub(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// Elementwise multiplication with broadcasting.
    fn mul(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// Elementwise division with broadcasting.
    fn div(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// Adds a scalar to every element.
    fn add_scalar(&self, value: T) -> Result<Self, TensorOpsError>;

    /// Subtracts a scalar from every element.
    fn sub_scalar(&self, value: T) -> Result<Self, TensorOpsError>;

    /// Multiplies every element by a scalar.
    fn mul_scalar(&self, value: T) -> Result<Self, TensorOpsError>;

    /// Divides every element by a scalar.
    fn div_scalar(&self, value: T) -> Result<Self, TensorOpsError>;

    /// Matrix product of two rank-2 tensors.
    fn matmul_2d(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// Batched matrix product with broadcast batch dimensions.
    fn matmul(&self, other: &Self) -> Result<Self, TensorOpsError>;

    /// 1-D convolution of a `[B, C, L]` signal with a `[1, C, K]` kernel.
    fn convolve1d(&self, kernel: &Self, padding: Padding) -> Result<Self, TensorOpsError>;
}

impl<T: Element, A: TensorAllocator> TensorOps<T> for Tensor<T, A> {
    fn add(&self, other: &Self) -> Result<Self, TensorOpsError> {
        binary_op(self, other, BinaryOp::Add)
    }

    fn sub(&self, other: &Self) -> Result<Self, TensorOpsError> {
        binary_op(self, other, BinaryOp::Sub)
    }

    fn mul(&self, other: &Self) -> Result<Self, TensorOpsError> {
        binary_op(self, other, BinaryOp::Mul)
    }

    fn div(&self, other: &Self) -> Result<Self, TensorOpsError> {
        binary_op(self, other, BinaryOp::Div)
    }

    fn add_scalar(&self, value: T) -> Result<Self, TensorOpsError> {
        binary_op_scalar(self, value, BinaryOp::Add)
    }

    fn sub_scalar(&self, value: T) -> Result<Self, TensorOpsError> {
        binary_op_scalar(self, value, BinaryOp::Sub)
    }

    fn mul_scalar(&self, value: T) -> Result<Self, TensorOpsError> {
        binary_op_scalar(self, value, BinaryOp::Mul)
    }

    fn div_scalar(&self, value: T) -> Result<Self, TensorOpsError> {
        binary_op_scalar(self, value, BinaryOp::Div)
    }

    fn matmul_2d(&self, other: &Self) -> Result<Self, TensorOpsError> {
        matmul_2d(self, other)
    }

    fn matmul(&self, other: &Self) -> Result<Self, TensorOpsError> {
        matmul(self, other)
    }

    fn convolve1d(&self, kernel: &Self, padding: Padding) -> Result<Self, TensorOpsError> {
        convolve1d(self, kernel, padding)
    }
}
