use crate::nn::Module;
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;

/// 2D convolution with a square kernel and symmetric zero padding.
///
/// The patch projection uses this with `kernel == stride` and no padding,
/// which reduces each in-plane axis by the patch size.
#[derive(Debug)]
pub struct Conv2d<T: TensorElem> {
    /// Weights of shape `[out_channels, in_channels, kernel, kernel]`.
    pub weight: Tensor<T, 4, Cpu>,
    /// Optional bias of shape `[out_channels]`.
    pub bias: Option<Tensor<T, 1, Cpu>>,
    pub stride: usize,
    pub padding: usize,
}

impl<T: TensorElem> Module<T> for Conv2d<T> {}

impl<T: TensorElem> Conv2d<T> {
    pub fn new(
        weight: Tensor<T, 4, Cpu>,
        bias: Option<Tensor<T, 1, Cpu>>,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            weight,
            bias,
            stride,
            padding,
        }
    }

    /// Forward pass over an input of shape `(B, C, H, W)`.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the channel count does not
    /// match the weight, or if the padded input is smaller than the kernel.
    pub fn forward(&self, x: &Tensor<T, 4, Cpu>) -> Result<Tensor<T, 4, Cpu>> {
        let [b, c, h, w] = *x.shape();
        let [oc, ic, kh, kw] = *self.weight.shape();

        if c != ic {
            return Err(TensorError::ShapeMismatch {
                expected: vec![ic],
                got: vec![c],
            });
        }
        let (s, p) = (self.stride, self.padding);
        if h + 2 * p < kh || w + 2 * p < kw {
            return Err(TensorError::ShapeMismatch {
                expected: vec![kh, kw],
                got: vec![h + 2 * p, w + 2 * p],
            });
        }

        let oh = (h + 2 * p - kh) / s + 1;
        let ow = (w + 2 * p - kw) / s + 1;

        let mut out = Tensor::zeros([b, oc, oh, ow]);
        let src = x.data();
        let wdat = self.weight.data();

        // One rayon task per (batch, out-channel) plane.
        out.data_mut()
            .par_chunks_mut(oh * ow)
            .enumerate()
            .for_each(|(plane_idx, plane)| {
                let bi = plane_idx / oc;
                let o = plane_idx % oc;
                let x_base = bi * c * h * w;
                let w_base = o * ic * kh * kw;
                let bias = self
                    .bias
                    .as_ref()
                    .map(|bv| bv.data()[o])
                    .unwrap_or_else(T::zero);

                for oy in 0..oh {
                    for ox in 0..ow {
                        let mut acc = bias;
                        for cc in 0..ic {
                            for ky in 0..kh {
                                let iy = oy * s + ky;
                                if iy < p || iy - p >= h {
                                    continue;
                                }
                                let iy = iy - p;
                                for kx in 0..kw {
                                    let ix = ox * s + kx;
                                    if ix < p || ix - p >= w {
                                        continue;
                                    }
                                    let ix = ix - p;
                                    acc += src[x_base + cc * h * w + iy * w + ix]
                                        * wdat[w_base + cc * kh * kw + ky * kw + kx];
                                }
                            }
                        }
                        plane[oy * ow + ox] = acc;
                    }
                }
            });

        Ok(out)
    }
}

/// 3D convolution with a cubic kernel, stride 1 and symmetric zero padding.
///
/// The neck's 1x1x1 channel projection and 3x3x3 refinement both go
/// through here.
#[derive(Debug)]
pub struct Conv3d<T: TensorElem> {
    /// Weights of shape `[out_channels, in_channels, kernel, kernel, kernel]`.
    pub weight: Tensor<T, 5, Cpu>,
    /// Optional bias of shape `[out_channels]`.
    pub bias: Option<Tensor<T, 1, Cpu>>,
    pub padding: usize,
}

impl<T: TensorElem> Module<T> for Conv3d<T> {}

impl<T: TensorElem> Conv3d<T> {
    pub fn new(
        weight: Tensor<T, 5, Cpu>,
        bias: Option<Tensor<T, 1, Cpu>>,
        padding: usize,
    ) -> Self {
        Self {
            weight,
            bias,
            padding,
        }
    }

    /// Forward pass over an input of shape `(B, C, H, W, Z)`.
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [b, c, h, w, z] = *x.shape();
        let [oc, ic, kh, kw, kz] = *self.weight.shape();

        if c != ic {
            return Err(TensorError::ShapeMismatch {
                expected: vec![ic],
                got: vec![c],
            });
        }
        let p = self.padding;
        if h + 2 * p < kh || w + 2 * p < kw || z + 2 * p < kz {
            return Err(TensorError::ShapeMismatch {
                expected: vec![kh, kw, kz],
                got: vec![h + 2 * p, w + 2 * p, z + 2 * p],
            });
        }

        let oh = h + 2 * p - kh + 1;
        let ow = w + 2 * p - kw + 1;
        let oz = z + 2 * p - kz + 1;

        let mut out = Tensor::zeros([b, oc, oh, ow, oz]);
        let src = x.data();
        let wdat = self.weight.data();

        out.data_mut()
            .par_chunks_mut(oh * ow * oz)
            .enumerate()
            .for_each(|(vol_idx, vol)| {
                let bi = vol_idx / oc;
                let o = vol_idx % oc;
                let x_base = bi * c * h * w * z;
                let w_base = o * ic * kh * kw * kz;
                let bias = self
                    .bias
                    .as_ref()
                    .map(|bv| bv.data()[o])
                    .unwrap_or_else(T::zero);

                for oy in 0..oh {
                    for ox in 0..ow {
                        for od in 0..oz {
                            let mut acc = bias;
                            for cc in 0..ic {
                                for ky in 0..kh {
                                    let iy = oy + ky;
                                    if iy < p || iy - p >= h {
                                        continue;
                                    }
                                    let iy = iy - p;
                                    for kx in 0..kw {
                                        let ix = ox + kx;
                                        if ix < p || ix - p >= w {
                                            continue;
                                        }
                                        let ix = ix - p;
                                        for kd in 0..kz {
                                            let id = od + kd;
                                            if id < p || id - p >= z {
                                                continue;
                                            }
                                            let id = id - p;
                                            acc += src[x_base
                                                + cc * h * w * z
                                                + iy * w * z
                                                + ix * z
                                                + id]
                                                * wdat[w_base
                                                    + cc * kh * kw * kz
                                                    + ky * kw * kz
                                                    + kx * kz
                                                    + kd];
                                        }
                                    }
                                }
                            }
                            vol[oy * ow * oz + ox * oz + od] = acc;
                        }
                    }
                }
            });

        Ok(out)
    }
}
