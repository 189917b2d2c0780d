use approx::assert_relative_eq;
use blass_tensor::{CpuAllocator, Tensor};
use blass_tensor_ops::{
    conv::{convolve1d, convolve1d_with},
    ExecutionStrategy, Padding, TensorOpsError,
};
use rand::{rngs::StdRng, SeedableRng};

const BATCH: usize = 10;
const CHANNELS: usize = 50;
const LEN: usize = 100;
const TAPS: usize = 7;

fn random(shape: &[usize], rng: &mut StdRng) -> Result<Tensor<f64>, TensorOpsError> {
    Ok(Tensor::from_shape_random(shape, 0.0, 10.0, rng, CpuAllocator)?)
}

fn naive(
    x: &Tensor<f64>,
    w: &Tensor<f64>,
    out_len: usize,
    shift: usize,
) -> Result<Vec<f64>, TensorOpsError> {
    let mut out = Vec::with_capacity(BATCH * out_len);
    for b in 0..BATCH {
        for pos in 0..out_len {
            let mut acc = 0.0;
            for c in 0..CHANNELS {
                for t in 0..TAPS {
                    let i = pos as isize + t as isize - shift as isize;
                    if i >= 0 && (i as usize) < LEN {
                        acc += x.get(&[b, c, i as usize])? * w.get(&[0, c, t])?;
                    }
                }
            }
            out.push(acc);
        }
    }
    Ok(out)
}

#[test]
fn valid_convolution() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(20);
    let x = random(&[BATCH, CHANNELS, LEN], &mut rng)?;
    let w = random(&[1, CHANNELS, TAPS], &mut rng)?;

    let y = convolve1d(&x, &w, Padding::Valid)?;
    assert_eq!(y.shape(), &[BATCH, 1, LEN - TAPS + 1]);
    for (a, b) in y.to_vec().iter().zip(naive(&x, &w, LEN - TAPS + 1, 0)?) {
        assert_relative_eq!(*a, b, epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn same_convolution() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(21);
    let x = random(&[BATCH, CHANNELS, LEN], &mut rng)?;
    let w = random(&[1, CHANNELS, TAPS], &mut rng)?;

    let y = convolve1d(&x, &w, Padding::Same)?;
    assert_eq!(y.shape(), &[BATCH, 1, LEN]);
    for (a, b) in y.to_vec().iter().zip(naive(&x, &w, LEN, TAPS / 2)?) {
        assert_relative_eq!(*a, b, epsilon = 1e-9);
    }

    let serial = convolve1d_with(&x, &w, Padding::Same, ExecutionStrategy::Serial)?;
    assert_eq!(serial.to_vec(), y.to_vec());
    Ok(())
}

#[test]
fn convolution_of_strided_input() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(22);
    let x = random(&[LEN, CHANNELS, BATCH], &mut rng)?.transpose();
    let w = random(&[1, CHANNELS, TAPS], &mut rng)?;
    assert!(!x.is_contiguous());

    let y = convolve1d(&x, &w, Padding::Valid)?;
    let expected = convolve1d(&x.materialize()?, &w, Padding::Valid)?;
    assert_eq!(y.to_vec(), expected.to_vec());
    Ok(())
}
