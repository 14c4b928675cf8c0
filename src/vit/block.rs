use crate::nn::{LayerNorm, MlpBlock, Module};
use crate::tensor::{Cpu, Result, Tensor, TensorElem};
use crate::vit::attention::Attention;
use crate::vit::window::{window_partition, window_unpartition};
use num_traits::Float;

/// One transformer block: pre-norm attention and a pre-norm MLP, each with
/// a residual connection.
///
/// With `window_size > 0` the attention runs independently inside cubic
/// windows of that size; with `window_size == 0` it is global over the
/// whole grid.
#[derive(Debug)]
pub struct Block<T: TensorElem> {
    pub norm1: LayerNorm<T>,
    pub attn: Attention<T>,
    pub norm2: LayerNorm<T>,
    pub mlp: MlpBlock<T>,
    pub window_size: usize,
}

impl<T: TensorElem> Module<T> for Block<T> {}

impl<T: TensorElem + Float> Block<T> {
    pub fn new(
        norm1: LayerNorm<T>,
        attn: Attention<T>,
        norm2: LayerNorm<T>,
        mlp: MlpBlock<T>,
        window_size: usize,
    ) -> Self {
        Self {
            norm1,
            attn,
            norm2,
            mlp,
            window_size,
        }
    }

    /// Forward pass over a `(B, H, W, Z, C)` token grid.
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [_, h, w, z, _] = *x.shape();

        let normed = self.norm1.forward(x)?;
        let attended = if self.window_size > 0 {
            let (windows, padded) = window_partition(&normed, self.window_size)?;
            let windows = self.attn.forward(&windows)?;
            window_unpartition(&windows, self.window_size, padded, [h, w, z])?
        } else {
            self.attn.forward(&normed)?
        };
        let x = (x + &attended)?;

        let mlp_out = self.mlp.forward(&self.norm2.forward(&x)?)?;
        &x + &mlp_out
    }
}
