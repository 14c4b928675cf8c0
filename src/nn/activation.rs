use crate::tensor::{Cpu, Tensor, TensorElem};
use num_traits::Float;

/// GELU activation (tanh approximation), the nonlinearity used throughout
/// the encoder's MLP sub-blocks.
pub fn gelu<T: TensorElem + Float>(x: T) -> T {
    let val = x.to_f32().unwrap();
    let c = (2.0f32 / std::f32::consts::PI).sqrt();
    let inner = c * (val + 0.044_715 * val * val * val);
    T::from_f32(0.5 * val * (1.0 + inner.tanh())).unwrap()
}

pub struct Activation;

impl Activation {
    pub fn gelu<const RANK: usize, T: TensorElem + Float>(
        x: &Tensor<T, RANK, Cpu>,
    ) -> Tensor<T, RANK, Cpu> {
        x.map(gelu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gelu_reference_points() {
        // gelu(0) = 0, gelu(x) -> x for large x, gelu(-x) -> 0 for large x.
        assert!(gelu(0.0f32).abs() < 1e-7);
        assert!((gelu(10.0f32) - 10.0).abs() < 1e-3);
        assert!(gelu(-10.0f32).abs() < 1e-3);
        // gelu(1) ~ 0.8412 (tanh approximation)
        assert!((gelu(1.0f32) - 0.8412).abs() < 1e-3);
    }

    #[test]
    fn test_gelu_tensor() {
        let x = Tensor::<f32, 1>::new(vec![-1.0, 0.0, 1.0], [3]).unwrap();
        let y = Activation::gelu(&x);
        assert!((y.data()[0] + 0.1588).abs() < 1e-3);
        assert!(y.data()[1].abs() < 1e-7);
        assert!((y.data()[2] - 0.8412).abs() < 1e-3);
    }
}
