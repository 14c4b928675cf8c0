use crate::nn::{Linear, Module};
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use crate::vit::rel_pos::add_decomposed_rel_pos;
use num_traits::Float;
use rayon::prelude::*;

/// Learned relative positional tables, one per spatial axis.
///
/// Each table has shape `(2 * input_size - 1, head_dim)` for the axis's
/// attended extent.
#[derive(Debug)]
pub struct RelPos3d<T: TensorElem> {
    pub h: Tensor<T, 2, Cpu>,
    pub w: Tensor<T, 2, Cpu>,
    pub z: Tensor<T, 2, Cpu>,
}

/// Multi-head self-attention over a 3D token grid.
///
/// Queries, keys and values come out of one fused projection; scores are
/// scaled by `head_dim^-0.5` and optionally biased with decomposed relative
/// positional embeddings before the softmax.
#[derive(Debug)]
pub struct Attention<T: TensorElem> {
    pub qkv: Linear<T>,
    pub proj: Linear<T>,
    pub num_heads: usize,
    scale: T,
    pub rel_pos: Option<RelPos3d<T>>,
}

impl<T: TensorElem> Module<T> for Attention<T> {}

impl<T: TensorElem + Float> Attention<T> {
    /// Builds the layer from its projections.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::Config` if the fused projection is not three
    /// times the embedding width, or if the width is not divisible by
    /// `num_heads`.
    pub fn new(
        qkv: Linear<T>,
        proj: Linear<T>,
        num_heads: usize,
        rel_pos: Option<RelPos3d<T>>,
    ) -> Result<Self> {
        let [qkv_out, dim] = *qkv.weight.shape();
        if qkv_out != 3 * dim {
            return Err(TensorError::Config(format!(
                "fused qkv projection must map dim {} to {}, got {}",
                dim,
                3 * dim,
                qkv_out
            )));
        }
        if num_heads == 0 || dim % num_heads != 0 {
            return Err(TensorError::Config(format!(
                "embedding width {} is not divisible into {} heads",
                dim, num_heads
            )));
        }

        let head_dim = dim / num_heads;
        let scale = T::one() / T::from_usize(head_dim).unwrap().sqrt();
        Ok(Self {
            qkv,
            proj,
            num_heads,
            scale,
            rel_pos,
        })
    }

    /// Forward pass over a `(B, H, W, Z, C)` token grid. The grid keeps its
    /// shape; every token attends to every other token in the grid.
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [b, h, w, z, dim] = *x.shape();
        let n = h * w * z;
        let heads = self.num_heads;
        let head_dim = dim / heads;

        // (B, H, W, Z, 3C) -> (3, B*heads, N, head_dim); the leading axis
        // makes each of q, k, v a contiguous third of the buffer.
        let qkv = self
            .qkv
            .forward(x)?
            .reshape([b, n, 3, heads, head_dim])?
            .permute([2, 0, 3, 1, 4])?
            .reshape([3, b * heads, n, head_dim])?;

        let third = b * heads * n * head_dim;
        let buf = qkv.data();
        let q = Tensor::new(buf[..third].to_vec(), [b * heads, n, head_dim])?;
        let k = Tensor::new(buf[third..2 * third].to_vec(), [b * heads, n, head_dim])?;
        let v = Tensor::new(buf[2 * third..].to_vec(), [b * heads, n, head_dim])?;

        let scale = self.scale;
        let q_scaled = q.map(|val| val * scale);
        let mut attn = q_scaled.matmul(&k.transpose()?)?;

        if let Some(rp) = &self.rel_pos {
            attn = add_decomposed_rel_pos(attn, &q, &rp.h, &rp.w, &rp.z, [h, w, z], [h, w, z])?;
        }

        Self::softmax_inplace(&mut attn);

        let out = attn
            .matmul(&v)?
            .reshape([b, heads, h, w, z, head_dim])?
            .permute([0, 2, 3, 4, 1, 5])?
            .reshape([b, h, w, z, dim])?;

        self.proj.forward(&out)
    }

    /// Row-wise softmax over the trailing axis, with the usual max-shift
    /// for numerical stability.
    fn softmax_inplace(x: &mut Tensor<T, 3, Cpu>) {
        let [_, _, cols] = *x.shape();
        x.data_mut().par_chunks_mut(cols).for_each(|row| {
            let mut max_val = row[0];
            for &v in row.iter() {
                if v > max_val {
                    max_val = v;
                }
            }

            let mut sum_exp = T::zero();
            for v in row.iter_mut() {
                let e = (*v - max_val).exp();
                *v = e;
                sum_exp += e;
            }

            let inv_sum = T::one() / sum_exp;
            for v in row.iter_mut() {
                *v *= inv_sum;
            }
        });
    }
}
