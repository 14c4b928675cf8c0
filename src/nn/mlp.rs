use crate::nn::{Activation, Linear, Module};
use crate::tensor::{Cpu, Result, Tensor, TensorElem};
use num_traits::Float;

/// Two-layer feed-forward block: Linear -> GELU -> Linear.
///
/// The hidden width is `mlp_ratio * dim` in the encoder's blocks.
#[derive(Debug)]
pub struct MlpBlock<T: TensorElem> {
    pub lin1: Linear<T>,
    pub lin2: Linear<T>,
}

impl<T: TensorElem> Module<T> for MlpBlock<T> {}

impl<T: TensorElem + Float> MlpBlock<T> {
    pub fn new(lin1: Linear<T>, lin2: Linear<T>) -> Self {
        Self { lin1, lin2 }
    }

    pub fn forward<const RANK: usize>(
        &self,
        x: &Tensor<T, RANK, Cpu>,
    ) -> Result<Tensor<T, RANK, Cpu>> {
        let hidden = self.lin1.forward(x)?;
        let hidden = Activation::gelu(&hidden);
        self.lin2.forward(&hidden)
    }
}
