#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `blass-tensor` provides a strided, N-dimensional array over reference-counted storage.
//! Slicing, transposing, reshaping and broadcasting produce views that share the buffer of
//! the tensor they come from; only [`Tensor::materialize`] and [`Tensor::contiguous`] on a
//! non-contiguous tensor copy data.
//!
//! # Architecture
//!
//! - **Tensor**: shape, strides and a storage window; the rank is dynamic
//! - **TensorStorage**: `Arc`-shared element buffer with an element offset
//! - **TensorAllocator**: trait-based memory allocation, [`CpuAllocator`] by default
//! - **shape** / **broadcast**: stride arithmetic and the broadcasting rules
//! - **literal**: construction from nested `Vec`s and arrays
//!
//! # Quick Start
//!
//! ```rust
//! use blass_tensor::{CpuAllocator, Tensor};
//!
//! let t = Tensor::<f32>::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], CpuAllocator).unwrap();
//! assert_eq!(t.get(&[1, 2]).unwrap(), 6.0);
//!
//! // views share the buffer
//! let tr = t.transpose();
//! assert_eq!(tr.shape(), &[3, 2]);
//! assert!(!tr.is_contiguous());
//!
//! // broadcasting stretches with zero strides
//! let row = t.at(0).unwrap().broadcast_to(&[4, 3]).unwrap();
//! assert_eq!(row.strides(), &[0, 1]);
//!
//! // reshape with an inferred dimension
//! let flat = tr.view(&[-1]).unwrap();
//! assert_eq!(flat.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
//! ```

/// Allocator module containing memory management utilities.
///
/// This module provides the [`TensorAllocator`] trait and the default [`CpuAllocator`].
pub mod allocator;

/// Broadcasting of shapes and zero-stride views.
pub mod broadcast;

/// Construction from nested literal data.
pub mod literal;

/// Shape and stride arithmetic.
pub mod shape;

/// Storage module containing the reference-counted element buffer.
pub mod storage;

/// Tensor module containing the main tensor implementation and error types.
pub mod tensor;

/// View operations: indexing, permutation, reshaping and materialization.
pub mod view;

pub use crate::allocator::{CpuAllocator, TensorAllocator};
pub use crate::broadcast::{broadcast_shape, broadcast_strides};
pub use crate::literal::NestedData;
pub use crate::storage::TensorStorage;
pub use crate::tensor::{Tensor, TensorError};
