use crate::nn::Module;
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};

use rayon::prelude::*;

/// Linear Layer: `y = xA^T + b`
///
/// Performs a linear transformation over the trailing axis of the input.
/// The weight is always a matrix mapping `in_features` to `out_features`
/// and the bias a vector of `out_features`; higher-rank inputs are handled
/// by flattening every leading axis into a single row axis, running one
/// matmul, and reshaping back. The encoder applies this to rank-3
/// attention sequences, rank-5 token grids and the rank-6 patch-fusion
/// tensor alike.
///
/// # Examples
/// ```rust
/// use voxvit::nn::Linear;
/// use voxvit::tensor::Tensor;
/// // Create a layer with 10 inputs and 5 outputs
/// let layer = Linear::<f32>::new(
///     Tensor::zeros([5, 10]), // Weights: [out, in]
///     Some(Tensor::zeros([5])) // Bias: [out]
/// );
/// ```
#[derive(Debug)]
pub struct Linear<T: TensorElem> {
    /// The learnable weights of the layer.
    /// - Shape: `[out_features, in_features]`
    pub weight: Tensor<T, 2, Cpu>,

    /// The learnable bias of the layer.
    /// - Shape: `[out_features]`
    pub bias: Option<Tensor<T, 1, Cpu>>,
}

impl<T: TensorElem> Module<T> for Linear<T> {}

impl<T: TensorElem> Linear<T> {
    /// Creates a new Linear layer.
    ///
    /// # Arguments
    ///
    /// * `weight` - The weight tensor of shape `[out_features, in_features]`.
    /// * `bias` - The optional bias tensor of shape `[out_features]`.
    pub fn new(weight: Tensor<T, 2, Cpu>, bias: Option<Tensor<T, 1, Cpu>>) -> Self {
        Self { weight, bias }
    }

    /// Performs the forward pass of the Linear layer.
    ///
    /// The trailing axis of `x` must equal `in_features`; every leading axis
    /// is preserved.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::ShapeMismatch` if the trailing axis or the bias
    /// length is inconsistent with the weight.
    pub fn forward<const RANK: usize>(
        &self,
        x: &Tensor<T, RANK, Cpu>,
    ) -> Result<Tensor<T, RANK, Cpu>> {
        let [out_features, in_features] = *self.weight.shape();
        let shape = *x.shape();

        if shape[RANK - 1] != in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![in_features],
                got: vec![shape[RANK - 1]],
            });
        }

        let rows: usize = shape[..RANK - 1].iter().product();

        let w_t = self.weight.transpose()?;
        let flat: Tensor<T, 2, Cpu> = x.clone().reshape([rows, in_features])?;
        let out_flat = flat.matmul(&w_t)?;

        let out_biased = if let Some(bias) = &self.bias {
            Self::add_bias(&out_flat, bias)?
        } else {
            out_flat
        };

        let mut out_shape = shape;
        out_shape[RANK - 1] = out_features;
        out_biased.reshape(out_shape)
    }

    /// Helper to add bias to a 2D tensor.
    fn add_bias(
        x: &Tensor<T, 2, Cpu>,
        bias: &Tensor<T, 1, Cpu>,
    ) -> Result<Tensor<T, 2, Cpu>> {
        let [_, cols] = *x.shape();
        let [b_cols] = *bias.shape();

        if cols != b_cols {
            return Err(TensorError::ShapeMismatch {
                expected: vec![cols],
                got: vec![b_cols],
            });
        }

        let mut out = x.clone();

        out.data_mut().par_chunks_mut(cols).for_each(|row| {
            for (r, b) in row.iter_mut().zip(bias.data().iter()) {
                *r += *b;
            }
        });

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn test_linear_new() {
        let weight = Tensor::<f32, 2, Cpu>::zeros([5, 10]);
        let bias = Tensor::<f32, 1, Cpu>::zeros([5]);
        let layer = Linear::new(weight, Some(bias));
        assert!(layer.bias.is_some());
    }

    #[test]
    fn test_linear_forward_rank2() {
        // Input: [2, 3]
        // Weight: [4, 3] (out=4, in=3)
        // Bias: [4]
        let input = Tensor::<f32, 2, Cpu>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();

        let weight_data = vec![
            1.0, 0.0, 0.0, // 1st neuron
            0.0, 1.0, 0.0, // 2nd neuron
            0.0, 0.0, 1.0, // 3rd neuron
            1.0, 1.0, 1.0, // 4th neuron
        ];
        let weight = Tensor::<f32, 2, Cpu>::new(weight_data, [4, 3]).unwrap();
        let bias = Tensor::<f32, 1, Cpu>::new(vec![0.1, 0.2, 0.3, 0.4], [4]).unwrap();

        let layer = Linear::new(weight, Some(bias));
        let output = layer.forward(&input).unwrap();

        assert_eq!(output.shape(), &[2, 4]);
        // Row 1: [1, 2, 3]
        // Out: 1.1, 2.2, 3.3, (1+2+3)+0.4 = 6.4
        let out_data = output.data();
        assert!((out_data[0] - 1.1).abs() < 1e-6);
        assert!((out_data[1] - 2.2).abs() < 1e-6);
        assert!((out_data[2] - 3.3).abs() < 1e-6);
        assert!((out_data[3] - 6.4).abs() < 1e-6);
    }

    #[test]
    fn test_linear_forward_rank3() {
        // Input: [1, 2, 3] (Batch=1, Seq=2, In=3)
        let input = Tensor::<f32, 3, Cpu>::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], [1, 2, 3]).unwrap();

        let weight_data = vec![
            1.0, 1.0, 1.0, // 1st neuron
            2.0, 2.0, 2.0, // 2nd neuron
        ];
        let weight = Tensor::<f32, 2, Cpu>::new(weight_data, [2, 3]).unwrap();

        let layer = Linear::new(weight, None);
        let output = layer.forward(&input).unwrap();

        assert_eq!(output.shape(), &[1, 2, 2]);
        // Row 1: sum 6 -> [6, 12]; Row 2: sum 15 -> [15, 30]
        let out_data = output.data();
        assert!((out_data[0] - 6.0).abs() < 1e-6);
        assert!((out_data[1] - 12.0).abs() < 1e-6);
        assert!((out_data[2] - 15.0).abs() < 1e-6);
        assert!((out_data[3] - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_linear_forward_rank5_token_grid() {
        // The encoder's token grid is rank 5 (B, H, W, Z, C).
        let input = Tensor::<f32, 5, Cpu>::ones([1, 2, 2, 2, 3]);

        let weight = Tensor::<f32, 2, Cpu>::new(vec![1.0, 1.0, 1.0, 0.5, 0.5, 0.5], [2, 3]).unwrap();
        let layer = Linear::new(weight, None);

        let output = layer.forward(&input).unwrap();
        assert_eq!(output.shape(), &[1, 2, 2, 2, 2]);
        for pair in output.data().chunks(2) {
            assert!((pair[0] - 3.0).abs() < 1e-6);
            assert!((pair[1] - 1.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_linear_bias_mismatch() {
        let weight = Tensor::<f32, 2, Cpu>::zeros([5, 10]);
        let bias = Tensor::<f32, 1, Cpu>::zeros([4]); // Wrong size
        let layer = Linear::new(weight, Some(bias));

        let input = Tensor::<f32, 2, Cpu>::zeros([2, 10]);
        let res = layer.forward(&input);
        assert!(res.is_err());
    }

    #[test]
    fn test_linear_input_mismatch() {
        let weight = Tensor::<f32, 2, Cpu>::zeros([5, 10]);
        let layer = Linear::new(weight, None);

        let input = Tensor::<f32, 2, Cpu>::zeros([2, 9]);
        let res = layer.forward(&input);
        assert!(matches!(res, Err(TensorError::ShapeMismatch { .. })));
    }
}
