use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rayon::prelude::*;

/// Average pooling over the two trailing spatial axes of a `(B, C, H, W)`
/// tensor.
///
/// The encoder down-samples its fixed 1024-resolution positional table with
/// two passes of this (kernel 4, then kernel 3 / stride 1).
pub fn avg_pool2d<T: TensorElem + Float>(
    x: &Tensor<T, 4, Cpu>,
    kernel: usize,
    stride: usize,
) -> Result<Tensor<T, 4, Cpu>> {
    let [b, c, h, w] = *x.shape();
    if kernel == 0 || stride == 0 || h < kernel || w < kernel {
        return Err(TensorError::ShapeMismatch {
            expected: vec![kernel, kernel],
            got: vec![h, w],
        });
    }

    let oh = (h - kernel) / stride + 1;
    let ow = (w - kernel) / stride + 1;

    let mut out = Tensor::zeros([b, c, oh, ow]);
    let src = x.data();
    let inv_area = T::one() / T::from_usize(kernel * kernel).unwrap();

    out.data_mut()
        .par_chunks_mut(oh * ow)
        .enumerate()
        .for_each(|(plane_idx, plane)| {
            let src_base = plane_idx * h * w;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = T::zero();
                    for ky in 0..kernel {
                        let row = src_base + (oy * stride + ky) * w + ox * stride;
                        for kx in 0..kernel {
                            acc += src[row + kx];
                        }
                    }
                    plane[oy * ow + ox] = acc * inv_area;
                }
            }
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avg_pool_kernel2() {
        let x = Tensor::<f32, 4>::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0],
            [1, 1, 4, 4],
        )
        .unwrap();

        let y = avg_pool2d(&x, 2, 2).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2]);
        assert_eq!(y.data(), &[3.5, 5.5, 11.5, 13.5]);
    }

    #[test]
    fn test_avg_pool_stride1() {
        let x = Tensor::<f32, 4>::new(vec![0.0, 2.0, 4.0, 6.0], [1, 1, 1, 4]).unwrap();
        // 1D-style pooling along W with kernel 1x... kernel must fit H too,
        // so use kernel 1 here.
        let y = avg_pool2d(&x, 1, 1).unwrap();
        assert_eq!(y.data(), x.data());
    }

    #[test]
    fn test_avg_pool_kernel_too_large() {
        let x = Tensor::<f32, 4>::zeros([1, 1, 2, 2]);
        assert!(avg_pool2d(&x, 3, 1).is_err());
    }
}
