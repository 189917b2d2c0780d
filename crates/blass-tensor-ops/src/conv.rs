use blass_tensor::{Tensor, TensorAllocator};
use log::trace;
use rayon::prelude::*;

use crate::{
    error::TensorOpsError,
    kernels::Element,
    parallel::{ExecutionStrategy, CONV_PARALLEL_WORK},
};

/// Border handling of [`convolve1d`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// Only positions where the kernel fits entirely: `L - K + 1` outputs.
    #[default]
    Valid,
    /// Kernel centered on every input position: `L` outputs.
    ///
    /// Tap `t` at output `pos` reads input `pos + t - K / 2`; taps falling outside
    /// the input contribute zero.
    Same,
}

/// Channel-summing 1-D cross-correlation.
///
/// `out[b, 0, pos] = sum over c, t of input[b, c, pos + t - shift] * kernel[0, c, t]`
/// with `shift = 0` for [`Padding::Valid`] and `K / 2` for [`Padding::Same`].
///
/// # Arguments
///
/// * `input` - Tensor with shape `[B, C, L]`.
/// * `kernel` - Tensor with shape `[1, C, K]`.
/// * `padding` - Border handling.
///
/// # Returns
///
/// A new tensor with shape `[B, 1, L_out]`.
///
/// # Errors
///
/// Returns [`TensorOpsError::RankError`] if an operand is not rank 3 and
/// [`TensorOpsError::ShapeMismatch`] if the kernel does not have one output channel,
/// the channel counts differ, `K` is zero, or `K > L` with [`Padding::Valid`].
///
/// # Example
///
/// ```
/// use blass_tensor::{CpuAllocator, Tensor};
/// use blass_tensor_ops::conv::{convolve1d, Padding};
///
/// let x = Tensor::<f32>::from_shape_vec(&[1, 1, 4], vec![1.0, 2.0, 3.0, 4.0], CpuAllocator).unwrap();
/// let k = Tensor::<f32>::from_shape_vec(&[1, 1, 2], vec![1.0, 1.0], CpuAllocator).unwrap();
///
/// let valid = convolve1d(&x, &k, Padding::Valid).unwrap();
/// assert_eq!(valid.as_slice(), &[3.0, 5.0, 7.0]);
///
/// let same = convolve1d(&x, &k, Padding::Same).unwrap();
/// assert_eq!(same.as_slice(), &[1.0, 3.0, 5.0, 7.0]);
/// ```
pub fn convolve1d<T, A>(
    input: &Tensor<T, A>,
    kernel: &Tensor<T, A>,
    padding: Padding,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    convolve1d_with(input, kernel, padding, ExecutionStrategy::default())
}

/// Same as [`convolve1d`] with an explicit execution strategy.
pub fn convolve1d_with<T, A>(
    input: &Tensor<T, A>,
    kernel: &Tensor<T, A>,
    padding: Padding,
    strategy: ExecutionStrategy,
) -> Result<Tensor<T, A>, TensorOpsError>
where
    T: Element,
    A: TensorAllocator,
{
    for t in [input, kernel] {
        if t.rank() != 3 {
            return Err(TensorOpsError::RankError {
                op: "convolve1d",
                expected: 3,
                actual: t.rank(),
            });
        }
    }

    let (batch, channels, len) = (input.shape()[0], input.shape()[1], input.shape()[2]);
    let (kout, kchannels, taps) = (kernel.shape()[0], kernel.shape()[1], kernel.shape()[2]);

    let valid_too_long = padding == Padding::Valid && taps > len;
    if kout != 1 || kchannels != channels || taps == 0 || valid_too_long {
        return Err(TensorOpsError::ShapeMismatch(
            input.shape().to_vec(),
            kernel.shape().to_vec(),
        ));
    }

    let (out_len, shift) = match padding {
        Padding::Valid => (len - taps + 1, 0),
        Padding::Same => (len, taps / 2),
    };

    let mut out = Tensor::zeros(&[batch, 1, out_len], input.storage.alloc().clone())?;
    if out.numel() == 0 {
        return Ok(out);
    }

    let x = input.contiguous()?;
    let w = kernel.contiguous()?;
    let x_data = &x.as_slice()[..batch * channels * len];
    let w_data = &w.as_slice()[..channels * taps];

    let point = |index: usize| -> T {
        let b = index / out_len;
        let pos = index % out_len;
        let row = &x_data[b * channels * len..(b + 1) * channels * len];
        let mut acc = T::zero();
        for c in 0..channels {
            let signal = &row[c * len..(c + 1) * len];
            let weights = &w_data[c * taps..(c + 1) * taps];
            for (t, &wt) in weights.iter().enumerate() {
                // pos + t - shift, skipped when it falls outside [0, len)
                let Some(i) = (pos + t).checked_sub(shift) else {
                    continue;
                };
                if i < len {
                    acc = acc + signal[i] * wt;
                }
            }
        }
        acc
    };

    let work = out.numel() * channels * taps;
    let parallel = strategy.allows_parallel() && work >= CONV_PARALLEL_WORK;
    trace!("convolve1d: [{batch}, {channels}, {len}] * [1, {channels}, {taps}] parallel={parallel}");

    let dst = out.as_slice_mut();
    strategy.install(|| {
        if parallel {
            dst.par_iter_mut()
                .enumerate()
                .for_each(|(index, o)| *o = point(index));
        } else {
            dst.iter_mut()
                .enumerate()
                .for_each(|(index, o)| *o = point(index));
        }
    })?;

    Ok(out)
}
