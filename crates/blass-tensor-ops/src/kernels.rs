//! Slice-level kernels shared by the elementwise, matmul and convolution engines.
//!
//! Nothing in this module touches tensors or reference counts; callers resolve
//! layouts first and hand over plain slices.

use num_traits::Num;
use rayon::prelude::*;

/// Numeric element type accepted by the kernels.
pub trait Element: Num + Copy + Send + Sync + 'static {}

impl<T: Num + Copy + Send + Sync + 'static> Element for T {}

/// A binary elementwise operator, monomorphized into each kernel loop.
pub trait BinaryKernel<T>: Send + Sync + 'static {
    /// Combines one element of each operand.
    fn apply(a: T, b: T) -> T;
}

/// `a + b`
pub struct AddKernel;

/// `a - b`
pub struct SubKernel;

/// `a * b`
pub struct MulKernel;

/// `a / b`
///
/// Integer division by zero panics; float division follows IEEE-754.
pub struct DivKernel;

impl<T: Element> BinaryKernel<T> for AddKernel {
    #[inline(always)]
    fn apply(a: T, b: T) -> T {
        a + b
    }
}

impl<T: Element> BinaryKernel<T> for SubKernel {
    #[inline(always)]
    fn apply(a: T, b: T) -> T {
        a - b
    }
}

impl<T: Element> BinaryKernel<T> for MulKernel {
    #[inline(always)]
    fn apply(a: T, b: T) -> T {
        a * b
    }
}

impl<T: Element> BinaryKernel<T> for DivKernel {
    #[inline(always)]
    fn apply(a: T, b: T) -> T {
        a / b
    }
}

/// Applies `K` to one run of `out.len()` elements.
///
/// Element `i` of the run reads `a[i * stride_a]` and `b[i * stride_b]`. Unit and zero
/// strides get dedicated loops so a stretched operand is loaded once.
///
/// # Arguments
///
/// * `a` - The left operand, starting at the first element of the run.
/// * `stride_a` - The element stride of `a` along the run.
/// * `b` - The right operand, starting at the first element of the run.
/// * `stride_b` - The element stride of `b` along the run.
/// * `out` - The contiguous destination run.
pub fn binary_run<T: Element, K: BinaryKernel<T>>(
    a: &[T],
    stride_a: usize,
    b: &[T],
    stride_b: usize,
    out: &mut [T],
) {
    let n = out.len();
    if n == 0 {
        return;
    }
    match (stride_a, stride_b) {
        (1, 1) => {
            out.iter_mut()
                .zip(a[..n].iter().zip(&b[..n]))
                .for_each(|(o, (&x, &y))| *o = K::apply(x, y));
        }
        (1, 0) => {
            let y = b[0];
            out.iter_mut()
                .zip(&a[..n])
                .for_each(|(o, &x)| *o = K::apply(x, y));
        }
        (0, 1) => {
            let x = a[0];
            out.iter_mut()
                .zip(&b[..n])
                .for_each(|(o, &y)| *o = K::apply(x, y));
        }
        (0, 0) => out.fill(K::apply(a[0], b[0])),
        (sa, sb) => {
            for (i, o) in out.iter_mut().enumerate() {
                *o = K::apply(a[i * sa], b[i * sb]);
            }
        }
    }
}

/// Contiguous dot product with four independent accumulators.
///
/// # Panics
///
/// Panics if the slices have different lengths.
pub fn dot_product<T: Element>(a: &[T], b: &[T]) -> T {
    assert_eq!(a.len(), b.len(), "dot product operands must have the same length");

    const LANES: usize = 4;
    let mut acc = [T::zero(); LANES];

    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let tail = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .fold(T::zero(), |s, (&x, &y)| s + x * y);

    a_chunks.zip(b_chunks).for_each(|(x, y)| {
        acc[0] = acc[0] + x[0] * y[0];
        acc[1] = acc[1] + x[1] * y[1];
        acc[2] = acc[2] + x[2] * y[2];
        acc[3] = acc[3] + x[3] * y[3];
    });

    (acc[0] + acc[1]) + (acc[2] + acc[3]) + tail
}

/// Multiplies `a` (`m x n`) by the transpose of `bt` (`p x n`) into `out` (`m x p`).
///
/// All three slices are dense and row-major, so every output cell is a contiguous
/// dot product. With `parallel` set and at least
/// [`MATMUL_SMALL_OUTPUT`](crate::parallel::MATMUL_SMALL_OUTPUT) cells, rows are split
/// across workers when `m >= p` and columns otherwise.
pub fn matmul_bt<T: Element>(
    a: &[T],
    bt: &[T],
    out: &mut [T],
    m: usize,
    n: usize,
    p: usize,
    parallel: bool,
) {
    debug_assert_eq!(a.len(), m * n);
    debug_assert_eq!(bt.len(), p * n);
    debug_assert_eq!(out.len(), m * p);

    if m * p == 0 {
        return;
    }

    let row = |i: usize| &a[i * n..(i + 1) * n];
    let col = |j: usize| &bt[j * n..(j + 1) * n];

    if !parallel || m * p < crate::parallel::MATMUL_SMALL_OUTPUT {
        for (i, out_row) in out.chunks_exact_mut(p).enumerate() {
            for (j, o) in out_row.iter_mut().enumerate() {
                *o = dot_product(row(i), col(j));
            }
        }
    } else if m >= p {
        out.par_chunks_exact_mut(p)
            .enumerate()
            .for_each(|(i, out_row)| {
                let a_row = row(i);
                for (j, o) in out_row.iter_mut().enumerate() {
                    *o = dot_product(a_row, col(j));
                }
            });
    } else {
        let mut columns = vec![T::zero(); m * p];
        columns
            .par_chunks_exact_mut(m)
            .enumerate()
            .for_each(|(j, out_col)| {
                let b_col = col(j);
                for (i, o) in out_col.iter_mut().enumerate() {
                    *o = dot_product(row(i), b_col);
                }
            });
        for (j, out_col) in columns.chunks_exact(m).enumerate() {
            for (i, &v) in out_col.iter().enumerate() {
                out[i * p + j] = v;
            }
        }
    }
}

/// Decomposes a flat batch index into element offsets of two operands.
///
/// # Arguments
///
/// * `index` - Row-major position among the batches.
/// * `batch_shape` - The shape of the batch dimensions.
/// * `strides_a` - The batch strides of the first operand.
/// * `strides_b` - The batch strides of the second operand.
#[inline]
pub fn batch_offsets(
    mut index: usize,
    batch_shape: &[usize],
    strides_a: &[usize],
    strides_b: &[usize],
) -> (usize, usize) {
    let mut off_a = 0;
    let mut off_b = 0;
    for d in (0..batch_shape.len()).rev() {
        let i = index % batch_shape[d];
        index /= batch_shape[d];
        off_a += i * strides_a[d];
        off_b += i * strides_b[d];
    }
    (off_a, off_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_run_strides() {
        let a = [1, 2, 3, 4];
        let b = [10, 20, 30, 40];
        let mut out = [0; 4];

        binary_run::<i32, AddKernel>(&a, 1, &b, 1, &mut out);
        assert_eq!(out, [11, 22, 33, 44]);

        binary_run::<i32, SubKernel>(&a, 1, &b, 0, &mut out);
        assert_eq!(out, [-9, -8, -7, -6]);

        binary_run::<i32, MulKernel>(&a, 0, &b, 1, &mut out);
        assert_eq!(out, [10, 20, 30, 40]);

        binary_run::<i32, DivKernel>(&b, 0, &a, 0, &mut out);
        assert_eq!(out, [10, 10, 10, 10]);

        let mut out2 = [0; 2];
        binary_run::<i32, AddKernel>(&a, 2, &b, 3, &mut out2);
        assert_eq!(out2, [11, 43]);
    }

    #[test]
    fn test_binary_run_empty() {
        let mut out: [f32; 0] = [];
        binary_run::<f32, AddKernel>(&[], 1, &[], 1, &mut out);
    }

    #[test]
    fn test_dot_product() {
        let a: Vec<f64> = (0..11).map(|x| x as f64).collect();
        let b = vec![2.0; 11];
        assert_eq!(dot_product(&a, &b), 110.0);
        assert_eq!(dot_product::<i32>(&[], &[]), 0);
    }

    #[test]
    fn test_matmul_bt_paths_agree() {
        // 8 x 5 times (5 x 6): serial reference vs rows; 3 x 5 times (5 x 40): columns
        for (m, n, p) in [(8, 5, 6), (3, 5, 40)] {
            let a: Vec<i64> = (0..m * n).map(|x| x as i64 % 7 - 3).collect();
            let bt: Vec<i64> = (0..p * n).map(|x| x as i64 % 5 - 2).collect();
            let mut serial = vec![0; m * p];
            let mut parallel = vec![0; m * p];
            matmul_bt(&a, &bt, &mut serial, m, n, p, false);
            matmul_bt(&a, &bt, &mut parallel, m, n, p, true);
            assert_eq!(serial, parallel);

            let i = m - 1;
            let j = p - 1;
            let expected: i64 = (0..n).map(|k| a[i * n + k] * bt[j * n + k]).sum();
            assert_eq!(serial[i * p + j], expected);
        }
    }

    #[test]
    fn test_batch_offsets() {
        // batch shape [2, 3]; a is stretched along the first dim
        assert_eq!(batch_offsets(4, &[2, 3], &[0, 10], &[30, 10]), (10, 40));
        assert_eq!(batch_offsets(0, &[], &[], &[]), (0, 0));
    }
}
