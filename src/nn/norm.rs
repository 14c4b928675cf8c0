use crate::nn::Module;
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rayon::prelude::*;

/// Layer Normalization over the trailing channel axis.
///
/// Normalizes each channel vector to zero mean and unit variance, then
/// applies a learned scale and shift. Applied before attention and before
/// the MLP in every transformer block.
#[derive(Debug)]
pub struct LayerNorm<T: TensorElem> {
    pub weight: Tensor<T, 1, Cpu>,
    pub bias: Tensor<T, 1, Cpu>,
    pub eps: T,
}

impl<T: TensorElem> Module<T> for LayerNorm<T> {}

impl<T: TensorElem + Float> LayerNorm<T> {
    pub fn new(weight: Tensor<T, 1, Cpu>, bias: Tensor<T, 1, Cpu>, eps: T) -> Self {
        Self { weight, bias, eps }
    }

    /// Builds a layer norm in its identity configuration (unit scale, zero shift).
    pub fn identity(dim: usize, eps: T) -> Self {
        Self::new(Tensor::ones([dim]), Tensor::zeros([dim]), eps)
    }

    pub fn forward<const RANK: usize>(
        &self,
        x: &Tensor<T, RANK, Cpu>,
    ) -> Result<Tensor<T, RANK, Cpu>> {
        let shape = x.shape();
        let last_dim = shape[RANK - 1];
        if last_dim != self.weight.shape()[0] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.weight.shape()[0]],
                got: vec![last_dim],
            });
        }

        let mut out = Tensor::zeros(*shape);
        let inv_n = T::one() / T::from_usize(last_dim).unwrap();

        out.data_mut()
            .par_chunks_mut(last_dim)
            .zip(x.data().par_chunks(last_dim))
            .for_each(|(out_row, in_row)| {
                let mut mean = T::zero();
                for &val in in_row {
                    mean += val;
                }
                mean = mean * inv_n;

                let mut var = T::zero();
                for &val in in_row {
                    let d = val - mean;
                    var += d * d;
                }
                var = var * inv_n;

                let rstd = T::one() / (var + self.eps).sqrt();
                for i in 0..last_dim {
                    out_row[i] =
                        (in_row[i] - mean) * rstd * self.weight.data()[i] + self.bias.data()[i];
                }
            });

        Ok(out)
    }
}

/// Layer Normalization over the channel axis of a channel-first volume.
///
/// Operates on (B, C, H, W, Z): each spatial location is normalized across
/// its C channels. Used between the neck's convolutions, where the feature
/// volume is channel-first.
#[derive(Debug)]
pub struct LayerNorm3d<T: TensorElem> {
    pub weight: Tensor<T, 1, Cpu>,
    pub bias: Tensor<T, 1, Cpu>,
    pub eps: T,
}

impl<T: TensorElem> Module<T> for LayerNorm3d<T> {}

impl<T: TensorElem + Float> LayerNorm3d<T> {
    pub fn new(weight: Tensor<T, 1, Cpu>, bias: Tensor<T, 1, Cpu>, eps: T) -> Self {
        Self { weight, bias, eps }
    }

    pub fn identity(dim: usize, eps: T) -> Self {
        Self::new(Tensor::ones([dim]), Tensor::zeros([dim]), eps)
    }

    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [b, c, h, w, z] = *x.shape();
        if c != self.weight.shape()[0] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.weight.shape()[0]],
                got: vec![c],
            });
        }

        let spatial = h * w * z;
        let mut out = Tensor::zeros([b, c, h, w, z]);
        let src = x.data();
        let inv_c = T::one() / T::from_usize(c).unwrap();

        out.data_mut()
            .par_chunks_mut(c * spatial)
            .enumerate()
            .for_each(|(bi, chunk)| {
                let base = bi * c * spatial;
                // The channel axis is strided here, so each location gathers
                // its C values at stride `spatial`.
                for s in 0..spatial {
                    let mut mean = T::zero();
                    for ci in 0..c {
                        mean += src[base + ci * spatial + s];
                    }
                    mean = mean * inv_c;

                    let mut var = T::zero();
                    for ci in 0..c {
                        let d = src[base + ci * spatial + s] - mean;
                        var += d * d;
                    }
                    var = var * inv_c;

                    let rstd = T::one() / (var + self.eps).sqrt();
                    for ci in 0..c {
                        let v = (src[base + ci * spatial + s] - mean) * rstd;
                        chunk[ci * spatial + s] =
                            v * self.weight.data()[ci] + self.bias.data()[ci];
                    }
                }
            });

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_norm_zero_mean_unit_var() {
        let x = Tensor::<f32, 2>::new(vec![1.0, 2.0, 3.0, 4.0], [1, 4]).unwrap();
        let ln = LayerNorm::identity(4, 1e-6);
        let y = ln.forward(&x).unwrap();

        let mean: f32 = y.data().iter().sum::<f32>() / 4.0;
        let var: f32 = y.data().iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-5);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_scale_shift() {
        let x = Tensor::<f32, 2>::new(vec![1.0, 3.0], [1, 2]).unwrap();
        let ln = LayerNorm::new(
            Tensor::new(vec![2.0, 2.0], [2]).unwrap(),
            Tensor::new(vec![0.5, 0.5], [2]).unwrap(),
            1e-6,
        );
        let y = ln.forward(&x).unwrap();
        // Normalized values are -1, 1 (up to eps); scaled to -2, 2; shifted.
        assert!((y.data()[0] + 1.5).abs() < 1e-3);
        assert!((y.data()[1] - 2.5).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm_dim_mismatch() {
        let x = Tensor::<f32, 2>::zeros([1, 4]);
        let ln = LayerNorm::<f32>::identity(3, 1e-6);
        assert!(matches!(
            ln.forward(&x),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_layer_norm3d_per_location() {
        // Two channels, one spatial location differing per channel.
        let x = Tensor::<f32, 5>::new(vec![1.0, 3.0], [1, 2, 1, 1, 1]).unwrap();
        let ln = LayerNorm3d::identity(2, 1e-6);
        let y = ln.forward(&x).unwrap();
        assert!((y.data()[0] + 1.0).abs() < 1e-3);
        assert!((y.data()[1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_layer_norm3d_constant_input_is_zero() {
        let x = Tensor::<f32, 5>::ones([1, 3, 2, 2, 2]);
        let ln = LayerNorm3d::identity(3, 1e-6);
        let y = ln.forward(&x).unwrap();
        for &v in y.data() {
            assert!(v.abs() < 1e-5);
        }
    }
}
