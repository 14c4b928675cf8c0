//! Generic neural network layers.
//!
//! These are the building blocks the 3D encoder composes: linear maps,
//! layer normalization (channel-last and channel-first), square-kernel
//! convolutions, average pooling and the two-layer MLP.

pub mod activation;
pub mod conv;
pub mod linear;
pub mod mlp;
pub mod module;
pub mod norm;
pub mod pooling;

pub use activation::{gelu, Activation};
pub use conv::{Conv2d, Conv3d};
pub use linear::Linear;
pub use mlp::MlpBlock;
pub use module::Module;
pub use norm::{LayerNorm, LayerNorm3d};
pub use pooling::avg_pool2d;
