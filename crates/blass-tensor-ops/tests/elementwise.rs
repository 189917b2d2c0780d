use approx::assert_relative_eq;
use blass_tensor::{broadcast_shape, CpuAllocator, Tensor};
use blass_tensor_ops::{
    elementwise::{add, binary_op, broadcast_binary_op, mul, sub},
    BinaryOp, ExecutionStrategy, TensorOps, TensorOpsError,
};
use rand::{rngs::StdRng, SeedableRng};

fn random(shape: &[usize], rng: &mut StdRng) -> Result<Tensor<f64>, TensorOpsError> {
    Ok(Tensor::from_shape_random(shape, 0.0, 10.0, rng, CpuAllocator)?)
}

/// Elementwise reference through broadcast views and per-index reads.
fn reference(
    a: &Tensor<f64>,
    b: &Tensor<f64>,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Tensor<f64>, TensorOpsError> {
    let shape = broadcast_shape(a.shape(), b.shape())?;
    let a = a.broadcast_to(&shape)?;
    let b = b.broadcast_to(&shape)?;
    Ok(Tensor::from_shape_fn(&shape, CpuAllocator, |idx| {
        match (a.get(idx), b.get(idx)) {
            (Ok(x), Ok(y)) => f(x, y),
            _ => f64::NAN,
        }
    })?)
}

fn assert_tensors_eq(actual: &Tensor<f64>, expected: &Tensor<f64>) {
    assert_eq!(actual.shape(), expected.shape());
    for (x, y) in actual.to_vec().iter().zip(expected.to_vec()) {
        assert_relative_eq!(*x, y, epsilon = 1e-9);
    }
}

#[test]
fn scalar_operations() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(0);
    let a = random(&[100, 100], &mut rng)?;

    let plus = a.add_scalar(2.5)?;
    let minus = a.sub_scalar(2.5)?;
    let times = a.mul_scalar(2.5)?;
    let over = a.div_scalar(2.5)?;

    for i in 0..100 {
        for j in 0..100 {
            let v = a.get(&[i, j])?;
            assert_relative_eq!(plus.get(&[i, j])?, v + 2.5, epsilon = 1e-9);
            assert_relative_eq!(minus.get(&[i, j])?, v - 2.5, epsilon = 1e-9);
            assert_relative_eq!(times.get(&[i, j])?, v * 2.5, epsilon = 1e-9);
            assert_relative_eq!(over.get(&[i, j])?, v / 2.5, epsilon = 1e-9);
        }
    }
    Ok(())
}

#[test]
fn same_shape_operations() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(1);
    let a = random(&[100, 100], &mut rng)?;
    let b = random(&[100, 100], &mut rng)?;

    assert_tensors_eq(&add(&a, &b)?, &reference(&a, &b, |x, y| x + y)?);
    assert_tensors_eq(&sub(&a, &b)?, &reference(&a, &b, |x, y| x - y)?);
    assert_tensors_eq(&mul(&a, &b)?, &reference(&a, &b, |x, y| x * y)?);

    let divisor = b.add_scalar(1.0)?;
    assert_tensors_eq(&a.div(&divisor)?, &reference(&a, &divisor, |x, y| x / y)?);
    Ok(())
}

#[test]
fn broadcast_shapes() -> Result<(), TensorOpsError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut rng = StdRng::seed_from_u64(2);

    let cases: [(&[usize], &[usize], &[usize]); 3] = [
        (&[100, 100], &[1, 100], &[100, 100]),
        (&[30, 50, 1, 20], &[1, 50, 40, 1], &[30, 50, 40, 20]),
        (&[40, 30, 20], &[30, 1], &[40, 30, 20]),
    ];

    for (lhs, rhs, expected) in cases {
        let a = random(lhs, &mut rng)?;
        let b = random(rhs, &mut rng)?;

        let sum = add(&a, &b)?;
        assert_eq!(sum.shape(), expected);
        assert!(sum.is_contiguous());
        assert_tensors_eq(&sum, &reference(&a, &b, |x, y| x + y)?);

        let product = mul(&a, &b)?;
        assert_tensors_eq(&product, &reference(&a, &b, |x, y| x * y)?);

        // operand order only changes the operator semantics, not the shape
        let swapped = add(&b, &a)?;
        assert_tensors_eq(&swapped, &sum);
    }
    Ok(())
}

#[test]
fn non_contiguous_operands() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(3);

    let a = random(&[20, 20, 20], &mut rng)?;
    let b = random(&[20, 20, 20], &mut rng)?.transpose();
    assert!(!b.is_contiguous());
    let sum = add(&a, &b)?;
    assert_tensors_eq(&sum, &reference(&a, &b, |x, y| x + y)?);
    assert_tensors_eq(&sum, &add(&a, &b.materialize()?)?);

    let c = random(&[50, 20, 1], &mut rng)?;
    let d = random(&[20, 1, 50], &mut rng)?.permute(&[2, 1, 0])?;
    assert_eq!(d.shape(), &[50, 1, 20]);
    let diff = sub(&c, &d)?;
    assert_eq!(diff.shape(), &[50, 20, 20]);
    assert_tensors_eq(&diff, &reference(&c, &d, |x, y| x - y)?);

    let e = random(&[10, 200], &mut rng)?.view(&[20, 100])?.transpose();
    let f = random(&[100, 1], &mut rng)?;
    let product = mul(&e, &f)?;
    assert_eq!(product.shape(), &[100, 20]);
    assert_tensors_eq(&product, &reference(&e, &f, |x, y| x * y)?);
    Ok(())
}

#[test]
fn flat_and_broadcast_paths_agree() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(4);
    let a = random(&[64, 48], &mut rng)?;
    let b = random(&[64, 48], &mut rng)?;

    for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul] {
        let flat = binary_op(&a, &b, op)?;
        let strided = broadcast_binary_op(&a, &b, op, ExecutionStrategy::Auto)?;
        assert_eq!(flat.to_vec(), strided.to_vec());

        let b_view = b.transpose().transpose();
        let serial = broadcast_binary_op(&a, &b_view, op, ExecutionStrategy::Serial)?;
        assert_eq!(flat.to_vec(), serial.to_vec());
    }
    Ok(())
}

#[test]
fn thread_pool_strategies_agree() -> Result<(), TensorOpsError> {
    let mut rng = StdRng::seed_from_u64(5);
    let a = random(&[8, 50, 40], &mut rng)?;
    let b = random(&[50, 1], &mut rng)?;

    let baseline = broadcast_binary_op(&a, &b, BinaryOp::Mul, ExecutionStrategy::Serial)?;
    for strategy in [ExecutionStrategy::Auto, ExecutionStrategy::Fixed(3)] {
        let out = broadcast_binary_op(&a, &b, BinaryOp::Mul, strategy)?;
        assert_eq!(out.to_vec(), baseline.to_vec());
    }
    Ok(())
}

#[test]
fn incompatible_shapes_are_rejected() -> Result<(), TensorOpsError> {
    let a = Tensor::<f64>::zeros(&[3, 4], CpuAllocator)?;
    let b = Tensor::<f64>::zeros(&[5], CpuAllocator)?;

    match add(&a, &b) {
        Err(TensorOpsError::ShapeMismatch(lhs, rhs)) => {
            assert_eq!(lhs, vec![3, 4]);
            assert_eq!(rhs, vec![5]);
        }
        other => panic!("expected a shape mismatch, got {other:?}"),
    }
    Ok(())
}

#[test]
fn operands_are_not_modified() -> Result<(), TensorOpsError> {
    let data: Vec<Vec<i64>> = vec![vec![1, 2], vec![3, 4]];
    let a = Tensor::<i64>::from_nested(&data, CpuAllocator)?;
    let b = Tensor::<i64>::from_nested(&[10i64, 20], CpuAllocator)?;
    let c = a.add(&b)?;

    assert_eq!(c.to_vec(), vec![11, 22, 13, 24]);
    assert_eq!(a.to_vec(), vec![1, 2, 3, 4]);
    assert_eq!(b.to_vec(), vec![10, 20]);
    assert!(!c.storage.shares_buffer(&a.storage));
    Ok(())
}
