use crate::tensor::{Tensor, TensorError};

#[test]
fn test_arithmetic() {
    let a = Tensor::<f32, 1>::new(vec![1.0, 2.0], [2]).unwrap();
    let b = Tensor::<f32, 1>::new(vec![3.0, 4.0], [2]).unwrap();

    let c = (&a + &b).unwrap();
    assert_eq!(c.data(), &[4.0, 6.0]);

    let d = (&a * &b).unwrap();
    assert_eq!(d.data(), &[3.0, 8.0]);

    let f = Tensor::<f32, 1>::new(vec![1.0, 2.0, 3.0], [3]).unwrap();
    let err = &a + &f;
    assert!(matches!(err, Err(TensorError::ShapeMismatch { .. })));
}

#[test]
fn test_matmul_2d() {
    // A: [2, 3], B: [3, 2] -> C: [2, 2]
    let a = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
    let b = Tensor::<f32, 2>::new(vec![7.0, 8.0, 9.0, 1.0, 2.0, 3.0], [3, 2]).unwrap();

    let c = a.matmul(&b).unwrap();
    assert_eq!(c.shape(), &[2, 2]);

    // Row 0: 1*7 + 2*9 + 3*2 = 31, 1*8 + 2*1 + 3*3 = 19
    // Row 1: 4*7 + 5*9 + 6*2 = 85, 4*8 + 5*1 + 6*3 = 55
    assert_eq!(c.data(), &[31.0, 19.0, 85.0, 55.0]);
}

#[test]
fn test_matmul_batched() {
    // Two independent [2, 2] x [2, 2] products stacked on the batch axis.
    let a = Tensor::<f32, 3>::new(
        vec![1.0, 0.0, 0.0, 1.0, 2.0, 0.0, 0.0, 2.0],
        [2, 2, 2],
    )
    .unwrap();
    let b = Tensor::<f32, 3>::new(
        vec![5.0, 6.0, 7.0, 8.0, 5.0, 6.0, 7.0, 8.0],
        [2, 2, 2],
    )
    .unwrap();

    let c = a.matmul(&b).unwrap();
    assert_eq!(c.shape(), &[2, 2, 2]);
    // Batch 0: identity -> B. Batch 1: 2*I -> 2*B.
    assert_eq!(c.data(), &[5.0, 6.0, 7.0, 8.0, 10.0, 12.0, 14.0, 16.0]);
}

#[test]
fn test_matmul_k_mismatch() {
    let a = Tensor::<f32, 2>::zeros([2, 3]);
    let b = Tensor::<f32, 2>::zeros([4, 2]); // K mismatch (3 vs 4)

    let err = a.matmul(&b);
    assert!(matches!(err, Err(TensorError::ShapeMismatch { .. })));
}

#[test]
fn test_transpose() {
    let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
    // [ 1 2 3 ]
    // [ 4 5 6 ]

    let t_t = t.transpose().unwrap();
    assert_eq!(t_t.shape(), &[3, 2]);
    assert_eq!(t_t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
}

#[test]
fn test_permute_rank3() {
    let data: Vec<f32> = (0..24).map(|i| i as f32).collect();
    let t = Tensor::<f32, 3>::new(data, [2, 3, 4]).unwrap();

    let p = t.permute([2, 0, 1]).unwrap();
    assert_eq!(p.shape(), &[4, 2, 3]);

    // p[k, i, j] == t[i, j, k]
    for i in 0..2 {
        for j in 0..3 {
            for k in 0..4 {
                let orig = t.data()[i * 12 + j * 4 + k];
                let perm = p.data()[k * 6 + i * 3 + j];
                assert_eq!(orig, perm);
            }
        }
    }
}

#[test]
fn test_permute_identity_and_inverse() {
    let data: Vec<f32> = (0..120).map(|i| i as f32).collect();
    let t = Tensor::<f32, 5>::new(data.clone(), [2, 3, 4, 1, 5]).unwrap();

    let id = t.permute([0, 1, 2, 3, 4]).unwrap();
    assert_eq!(id.data(), &data[..]);

    // Applying a permutation then its inverse is the identity.
    let p = t.permute([3, 1, 4, 0, 2]).unwrap();
    let back = p.permute([3, 1, 4, 0, 2].iter().enumerate().fold(
        [0usize; 5],
        |mut inv, (i, &a)| {
            inv[a] = i;
            inv
        },
    ));
    assert_eq!(back.unwrap().data(), &data[..]);
}

#[test]
fn test_permute_invalid_axes() {
    let t = Tensor::<f32, 2>::zeros([2, 2]);
    assert!(matches!(
        t.permute([0, 0]),
        Err(TensorError::IndexOutOfBounds { .. })
    ));
    assert!(matches!(
        t.permute([0, 2]),
        Err(TensorError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn test_pad_high_and_slice_to_roundtrip() {
    let data: Vec<f32> = (0..12).map(|i| i as f32 + 1.0).collect();
    let t = Tensor::<f32, 3>::new(data.clone(), [2, 2, 3]).unwrap();

    let padded = t.pad_high([1, 0, 2]);
    assert_eq!(padded.shape(), &[3, 2, 5]);

    // Low corner holds the original values.
    assert_eq!(padded.data()[0], 1.0);
    assert_eq!(padded.data()[1], 2.0);
    assert_eq!(padded.data()[2], 3.0);
    // Padding stays zero.
    assert_eq!(padded.data()[3], 0.0);
    assert_eq!(padded.data()[4], 0.0);

    let sliced = padded.slice_to([2, 2, 3]).unwrap();
    assert_eq!(sliced.data(), &data[..]);
}

#[test]
fn test_pad_high_noop() {
    let t = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
    let p = t.pad_high([0, 0]);
    assert_eq!(p.shape(), &[2, 2]);
    assert_eq!(p.data(), t.data());
}

#[test]
fn test_slice_to_out_of_range() {
    let t = Tensor::<f32, 2>::zeros([2, 2]);
    assert!(matches!(
        t.slice_to([3, 2]),
        Err(TensorError::IndexOutOfBounds { .. })
    ));
}

#[test]
fn test_map() {
    let t = Tensor::<f32, 1>::new(vec![1.0, -2.0, 3.0], [3]).unwrap();
    let doubled = t.map(|v| v * 2.0);
    assert_eq!(doubled.data(), &[2.0, -4.0, 6.0]);
}
