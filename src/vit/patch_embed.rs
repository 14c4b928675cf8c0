use crate::nn::{Conv2d, Linear, Module};
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rayon::prelude::*;

/// Tri-planar patch embedding for volumes.
///
/// A single shared 2D convolution (kernel == stride == patch size) projects
/// every axis-aligned slice of the volume: each of the three orthogonal
/// plane families is swept by batching its slices along the batch axis.
/// A plane reduces its two in-plane axes by the patch size while the third
/// axis keeps full resolution, so each patch location ends up with `3 * p`
/// directional embeddings which a learned linear layer fuses down to one.
#[derive(Debug)]
pub struct PatchEmbed<T: TensorElem> {
    /// Shared slice projection, `[embed_dim, in_chans, p, p]` with stride p.
    pub proj: Conv2d<T>,
    /// Fuses the `3 * p` per-direction embeddings, `[1, 3 * p]`.
    pub fuse: Linear<T>,
    pub patch_size: usize,
    pub embed_dim: usize,
}

impl<T: TensorElem> Module<T> for PatchEmbed<T> {}

impl<T: TensorElem + Float> PatchEmbed<T> {
    pub fn new(proj: Conv2d<T>, fuse: Linear<T>, patch_size: usize, embed_dim: usize) -> Self {
        Self {
            proj,
            fuse,
            patch_size,
            embed_dim,
        }
    }

    /// Embeds a `(B, C, H, W, Z)` volume into a `(B, H/p, W/p, Z/p, E)`
    /// token grid.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if any spatial axis is not
    /// divisible by the patch size.
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [b, _, h, w, z] = *x.shape();
        let p = self.patch_size;
        if p == 0 || h % p != 0 || w % p != 0 || z % p != 0 {
            return Err(TensorError::ShapeMismatch {
                expected: vec![p, p, p],
                got: vec![h, w, z],
            });
        }
        let (hp, wp, zp) = (h / p, w / p, z / p);
        let e = self.embed_dim;

        // Each sweep batches one plane family through the shared conv, then
        // splits the full-resolution axis into (patch index, offset) so all
        // three land on (B, E, H/p, W/p, Z/p, p).
        let yz = self.sweep_yz(x)?;
        let xz = self.sweep_xz(x)?;
        let xy = self.sweep_xy(x)?;

        let stacked = cat_last([&yz, &xz, &xy])?;
        let fused = self.fuse.forward(&stacked)?;
        fused
            .reshape([b, e, hp, wp, zp])?
            .permute([0, 2, 3, 4, 1])
    }

    /// In-plane axes (W, Z); H keeps full resolution.
    fn sweep_yz(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 6, Cpu>> {
        let [b, c, h, w, z] = *x.shape();
        let p = self.patch_size;
        let (hp, wp, zp) = (h / p, w / p, z / p);
        let e = self.embed_dim;

        let slices = x.permute([0, 2, 1, 3, 4])?.reshape([b * h, c, w, z])?;
        self.proj
            .forward(&slices)?
            .reshape([b, h, e, wp, zp])?
            .permute([0, 2, 1, 3, 4])?
            .reshape([b, e, hp, p, wp, zp])?
            .permute([0, 1, 2, 4, 5, 3])
    }

    /// In-plane axes (H, Z); W keeps full resolution.
    fn sweep_xz(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 6, Cpu>> {
        let [b, c, h, w, z] = *x.shape();
        let p = self.patch_size;
        let (hp, wp, zp) = (h / p, w / p, z / p);
        let e = self.embed_dim;

        let slices = x.permute([0, 3, 1, 2, 4])?.reshape([b * w, c, h, z])?;
        self.proj
            .forward(&slices)?
            .reshape([b, w, e, hp, zp])?
            .permute([0, 2, 3, 1, 4])?
            .reshape([b, e, hp, wp, p, zp])?
            .permute([0, 1, 2, 3, 5, 4])
    }

    /// In-plane axes (H, W); Z keeps full resolution.
    fn sweep_xy(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 6, Cpu>> {
        let [b, c, h, w, z] = *x.shape();
        let p = self.patch_size;
        let (hp, wp, zp) = (h / p, w / p, z / p);
        let e = self.embed_dim;

        let slices = x.permute([0, 4, 1, 2, 3])?.reshape([b * z, c, h, w])?;
        self.proj
            .forward(&slices)?
            .reshape([b, z, e, hp, wp])?
            .permute([0, 2, 3, 4, 1])?
            .reshape([b, e, hp, wp, zp, p])
    }
}

/// Concatenates three equally shaped tensors along the trailing axis.
fn cat_last<T: TensorElem>(parts: [&Tensor<T, 6, Cpu>; 3]) -> Result<Tensor<T, 6, Cpu>> {
    let shape = *parts[0].shape();
    for t in &parts[1..] {
        if t.shape() != &shape {
            return Err(TensorError::ShapeMismatch {
                expected: shape.to_vec(),
                got: t.shape().to_vec(),
            });
        }
    }

    let last = shape[5];
    let mut out_shape = shape;
    out_shape[5] = 3 * last;

    let mut out = Tensor::zeros(out_shape);
    out.data_mut()
        .par_chunks_mut(3 * last)
        .enumerate()
        .for_each(|(row, chunk)| {
            let off = row * last;
            chunk[..last].copy_from_slice(&parts[0].data()[off..off + last]);
            chunk[last..2 * last].copy_from_slice(&parts[1].data()[off..off + last]);
            chunk[2 * last..].copy_from_slice(&parts[2].data()[off..off + last]);
        });

    Ok(out)
}
