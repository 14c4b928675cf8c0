//! # voxvit
//!
//! `voxvit` is a pure Rust implementation of a volumetric (3D) vision-transformer
//! image encoder, generalizing a 2D segmentation-model backbone to three spatial
//! axes. It runs on **CPU only**.
//!
//! ## Modules
//!
//! - [`mod@tensor`]: Core N-dimensional tensor implementation.
//! - [`nn`]: Generic neural network layers (Linear, LayerNorm, Conv, MLP).
//! - [`vit`]: The 3D ViT encoder: tri-planar patch embedding, windowed
//!   attention with decomposed relative position bias, and the projection neck.
//!
//! ## Example
//!
//! ```rust
//! use voxvit::tensor::Tensor;
//! use voxvit::vit::{EncoderConfig, ImageEncoder};
//!
//! let cfg = EncoderConfig {
//!     img_size: 16,
//!     patch_size: 8,
//!     embed_dim: 8,
//!     depth: 1,
//!     num_heads: 2,
//!     out_chans: 8,
//!     use_abs_pos: false,
//!     ..Default::default()
//! };
//! let encoder = ImageEncoder::<f32>::new(&cfg).unwrap();
//! let x = Tensor::<f32, 5>::ones([1, 3, 16, 16, 16]);
//! let features = encoder.forward(&x).unwrap();
//! assert_eq!(features.shape(), &[1, 8, 2, 2, 2]);
//! ```

/// Macro for creating a Tensor with compile-time shape checking.
///
/// # Examples
///
/// ```rust
/// use voxvit::tensor;
/// use voxvit::tensor::Tensor;
///
/// // Works
/// let t = tensor!([1.0, 2.0, 3.0, 4.0], [2, 2]);
///
/// // Fails to compile:
/// // let t = tensor!([1.0, 2.0, 3.0], [2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($data:expr, $shape:expr) => {{
        // Constants to force compile-time evaluation
        const DATA_LEN: usize = $data.len();
        const SHAPE: [usize; $shape.len()] = $shape;
        const EXPECTED_SIZE: usize = {
            let mut size = 1;
            let mut i = 0;
            while i < SHAPE.len() {
                size *= SHAPE[i];
                i += 1;
            }
            size
        };

        // This assertion triggers a compile-time error if false
        const _: () = assert!(
            DATA_LEN == EXPECTED_SIZE,
            "Shape mismatch: data length does not match shape product"
        );

        // Safe to unwrap because we checked at compile time
        $crate::tensor::Tensor::new($data.to_vec(), $shape).unwrap()
    }};
}

pub mod nn;
pub mod tensor;
pub mod vit;

pub use tensor::Tensor;
