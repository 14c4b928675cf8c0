//! 3D vision-transformer image encoder.
//!
//! Volumes come in channel-first as `(B, C, H, W, Z)`, are embedded into a
//! token grid by a tri-planar patch projection, refined by a stack of
//! windowed/global attention blocks, and compressed by a convolutional neck
//! into a `(B, out_chans, H/p, W/p, Z/p)` feature volume.

pub mod attention;
pub mod block;
pub mod patch_embed;
pub mod pos_embed;
pub mod rel_pos;
pub mod window;

pub use attention::{Attention, RelPos3d};
pub use block::Block;
pub use patch_embed::PatchEmbed;
pub use pos_embed::resample_abs_pos;
pub use rel_pos::{add_decomposed_rel_pos, get_rel_pos};
pub use window::{window_partition, window_unpartition};

use crate::nn::{Conv2d, Conv3d, LayerNorm, LayerNorm3d, Linear, MlpBlock, Module};
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;

/// Native in-plane resolution the positional table is stored for.
const POS_TABLE_RESOLUTION: usize = 1024;

/// Hyper-parameters of the encoder.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Spatial extent of the (cubic) input volume.
    pub img_size: usize,
    /// Patch size; every spatial axis of the input must divide by it.
    pub patch_size: usize,
    /// Input channels.
    pub in_chans: usize,
    /// Token embedding width.
    pub embed_dim: usize,
    /// Number of transformer blocks.
    pub depth: usize,
    /// Attention heads per block; must divide `embed_dim`.
    pub num_heads: usize,
    /// MLP hidden width as a multiple of `embed_dim`.
    pub mlp_ratio: f32,
    /// Channels of the neck's output feature volume.
    pub out_chans: usize,
    /// Whether the fused qkv projection carries a bias.
    pub qkv_bias: bool,
    /// Whether to add the absolute positional bias after patch embedding.
    pub use_abs_pos: bool,
    /// Whether blocks carry decomposed relative positional tables.
    pub use_rel_pos: bool,
    /// Keep relative tables at zero on random initialization.
    pub rel_pos_zero_init: bool,
    /// Window size for windowed blocks; 0 means every block is global.
    pub window_size: usize,
    /// Indices of blocks that attend globally regardless of `window_size`.
    pub global_attn_indexes: Vec<usize>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            img_size: 224,
            patch_size: 16,
            in_chans: 3,
            embed_dim: 768,
            depth: 12,
            num_heads: 12,
            mlp_ratio: 4.0,
            out_chans: 256,
            qkv_bias: true,
            use_abs_pos: true,
            use_rel_pos: false,
            rel_pos_zero_init: true,
            window_size: 0,
            global_attn_indexes: Vec::new(),
        }
    }
}

impl EncoderConfig {
    /// Checks the internal consistency of the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(TensorError::Config("patch_size must be positive".into()));
        }
        if self.img_size == 0 || self.img_size % self.patch_size != 0 {
            return Err(TensorError::Config(format!(
                "img_size {} is not a positive multiple of patch_size {}",
                self.img_size, self.patch_size
            )));
        }
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(TensorError::Config(format!(
                "embed_dim {} is not divisible into {} heads",
                self.embed_dim, self.num_heads
            )));
        }
        if self.embed_dim == 0 || self.out_chans == 0 || self.in_chans == 0 {
            return Err(TensorError::Config(
                "channel widths must be positive".into(),
            ));
        }
        if self.mlp_hidden() == 0 {
            return Err(TensorError::Config(format!(
                "mlp_ratio {} collapses the hidden width to zero",
                self.mlp_ratio
            )));
        }
        if let Some(&idx) = self
            .global_attn_indexes
            .iter()
            .find(|&&idx| idx >= self.depth)
        {
            return Err(TensorError::Config(format!(
                "global attention index {} exceeds depth {}",
                idx, self.depth
            )));
        }
        Ok(())
    }

    /// Tokens per spatial axis after patch embedding.
    pub fn grid_size(&self) -> usize {
        self.img_size / self.patch_size
    }

    fn mlp_hidden(&self) -> usize {
        (self.embed_dim as f32 * self.mlp_ratio) as usize
    }
}

/// Draws a uniformly distributed parameter tensor in `[-bound, bound]`.
fn uniform<T: TensorElem + Float, const RANK: usize>(
    rng: &mut StdRng,
    shape: [usize; RANK],
    bound: f64,
) -> Tensor<T, RANK, Cpu> {
    let mut out = Tensor::zeros(shape);
    for v in out.data_mut() {
        *v = T::from_f64(rng.gen_range(-bound..bound)).unwrap_or_else(T::zero);
    }
    out
}

/// Parameter factory: zeros without an RNG, scaled uniform with one.
fn param<T: TensorElem + Float, const RANK: usize>(
    rng: &mut Option<&mut StdRng>,
    shape: [usize; RANK],
    fan_in: usize,
) -> Tensor<T, RANK, Cpu> {
    match rng {
        Some(r) => {
            let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
            uniform(r, shape, bound)
        }
        None => Tensor::zeros(shape),
    }
}

/// Convolutional neck mapping tokens to the output feature volume.
///
/// 1x1x1 channel projection, layer norm, 3x3x3 refinement with padding 1,
/// layer norm. Both convolutions are bias-free; the norms carry the
/// learned affine.
#[derive(Debug)]
pub struct Neck<T: TensorElem> {
    pub conv1: Conv3d<T>,
    pub norm1: LayerNorm3d<T>,
    pub conv2: Conv3d<T>,
    pub norm2: LayerNorm3d<T>,
}

impl<T: TensorElem> Module<T> for Neck<T> {}

impl<T: TensorElem + Float> Neck<T> {
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let x = self.norm1.forward(&self.conv1.forward(x)?)?;
        self.norm2.forward(&self.conv2.forward(&x)?)
    }
}

/// The full 3D image encoder.
#[derive(Debug)]
pub struct ImageEncoder<T: TensorElem> {
    pub patch_embed: PatchEmbed<T>,
    /// Fixed in-plane positional table, `(1, S, S, E)` at the native
    /// resolution. Present only with `use_abs_pos`.
    pub pos_embed: Option<Tensor<T, 4, Cpu>>,
    /// Learned depth embedding, `(1, Z/p, E)`.
    pub depth_embed: Option<Tensor<T, 3, Cpu>>,
    pub blocks: Vec<Block<T>>,
    pub neck: Neck<T>,
    in_chans: usize,
    patch_size: usize,
}

impl<T: TensorElem> Module<T> for ImageEncoder<T> {}

impl<T: TensorElem + Float> ImageEncoder<T> {
    /// Builds the encoder with all learnable parameters at zero.
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Builds the encoder with uniformly initialized parameters drawn from
    /// `rng`. Relative positional tables stay at zero unless
    /// `rel_pos_zero_init` is disabled.
    pub fn with_rng(config: &EncoderConfig, rng: &mut StdRng) -> Result<Self> {
        Self::build(config, Some(rng))
    }

    fn build(config: &EncoderConfig, rng: Option<&mut StdRng>) -> Result<Self> {
        config.validate()?;
        let mut rng = rng;

        let p = config.patch_size;
        let e = config.embed_dim;
        let head_dim = e / config.num_heads;
        let grid = config.grid_size();
        let eps = T::from_f64(1e-6).unwrap_or_else(T::zero);

        let patch_fan = config.in_chans * p * p;
        let proj = Conv2d::new(
            param(&mut rng, [e, config.in_chans, p, p], patch_fan),
            Some(param(&mut rng, [e], patch_fan)),
            p,
            0,
        );
        let fuse = Linear::new(
            param(&mut rng, [1, 3 * p], 3 * p),
            Some(param(&mut rng, [1], 3 * p)),
        );
        let patch_embed = PatchEmbed::new(proj, fuse, p, e);

        let (pos_embed, depth_embed) = if config.use_abs_pos {
            let table_res = POS_TABLE_RESOLUTION / p;
            (
                Some(Tensor::zeros([1, table_res, table_res, e])),
                Some(Tensor::zeros([1, grid, e])),
            )
        } else {
            (None, None)
        };

        let mut blocks = Vec::with_capacity(config.depth);
        for i in 0..config.depth {
            let window_size = if config.global_attn_indexes.contains(&i) {
                0
            } else {
                config.window_size
            };
            let input_size = if window_size == 0 { grid } else { window_size };

            let rel_pos = if config.use_rel_pos {
                let len = 2 * input_size - 1;
                let table = |rng: &mut Option<&mut StdRng>| {
                    if config.rel_pos_zero_init {
                        Tensor::zeros([len, head_dim])
                    } else {
                        param(rng, [len, head_dim], head_dim)
                    }
                };
                Some(RelPos3d {
                    h: table(&mut rng),
                    w: table(&mut rng),
                    z: table(&mut rng),
                })
            } else {
                None
            };

            let qkv = Linear::new(
                param(&mut rng, [3 * e, e], e),
                if config.qkv_bias {
                    Some(param(&mut rng, [3 * e], e))
                } else {
                    None
                },
            );
            let proj = Linear::new(param(&mut rng, [e, e], e), Some(param(&mut rng, [e], e)));
            let attn = Attention::new(qkv, proj, config.num_heads, rel_pos)?;

            let hidden = config.mlp_hidden();
            let mlp = MlpBlock::new(
                Linear::new(
                    param(&mut rng, [hidden, e], e),
                    Some(param(&mut rng, [hidden], e)),
                ),
                Linear::new(
                    param(&mut rng, [e, hidden], hidden),
                    Some(param(&mut rng, [e], hidden)),
                ),
            );

            blocks.push(Block::new(
                LayerNorm::identity(e, eps),
                attn,
                LayerNorm::identity(e, eps),
                mlp,
                window_size,
            ));
        }

        let oc = config.out_chans;
        let neck = Neck {
            conv1: Conv3d::new(param(&mut rng, [oc, e, 1, 1, 1], e), None, 0),
            norm1: LayerNorm3d::identity(oc, eps),
            conv2: Conv3d::new(param(&mut rng, [oc, oc, 3, 3, 3], oc * 27), None, 1),
            norm2: LayerNorm3d::identity(oc, eps),
        };

        Ok(Self {
            patch_embed,
            pos_embed,
            depth_embed,
            blocks,
            neck,
            in_chans: config.in_chans,
            patch_size: p,
        })
    }

    /// Replaces the fixed positional table, e.g. with a precomputed
    /// sin-cos embedding. The replacement must match the existing shape.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::Config` if absolute positions are disabled,
    /// `TensorError::ShapeMismatch` if the table has the wrong shape.
    pub fn load_pos_embed(&mut self, table: Tensor<T, 4, Cpu>) -> Result<()> {
        match &self.pos_embed {
            Some(existing) => {
                if existing.shape() != table.shape() {
                    return Err(TensorError::ShapeMismatch {
                        expected: existing.shape().to_vec(),
                        got: table.shape().to_vec(),
                    });
                }
                self.pos_embed = Some(table);
                Ok(())
            }
            None => Err(TensorError::Config(
                "absolute positional embedding is disabled".into(),
            )),
        }
    }

    /// Encodes a `(B, C, H, W, Z)` volume into a
    /// `(B, out_chans, H/p, W/p, Z/p)` feature volume.
    pub fn forward(&self, x: &Tensor<T, 5, Cpu>) -> Result<Tensor<T, 5, Cpu>> {
        let [_, c, _, _, _] = *x.shape();
        if c != self.in_chans {
            return Err(TensorError::ShapeMismatch {
                expected: vec![self.in_chans],
                got: vec![c],
            });
        }

        let mut tokens = self.patch_embed.forward(x)?;

        if let (Some(pos), Some(depth)) = (&self.pos_embed, &self.depth_embed) {
            let [_, hp, wp, zp, _] = *tokens.shape();
            let bias = resample_abs_pos(pos, depth, [hp, wp, zp])?;
            tokens = add_broadcast_batch(&tokens, &bias)?;
        }

        for block in &self.blocks {
            tokens = block.forward(&tokens)?;
        }

        let features = tokens.permute([0, 4, 1, 2, 3])?;
        self.neck.forward(&features)
    }

    /// Patch size the encoder was built with.
    pub fn patch_size(&self) -> usize {
        self.patch_size
    }
}

/// Adds a batch-1 bias tensor to every batch entry of `x`.
fn add_broadcast_batch<T: TensorElem>(
    x: &Tensor<T, 5, Cpu>,
    bias: &Tensor<T, 5, Cpu>,
) -> Result<Tensor<T, 5, Cpu>> {
    let per_batch = bias.size();
    if bias.shape()[0] != 1 || x.shape()[1..] != bias.shape()[1..] {
        return Err(TensorError::BroadcastError(
            x.shape().to_vec(),
            bias.shape().to_vec(),
        ));
    }

    let mut out = x.clone();
    let bd = bias.data();
    out.data_mut().par_chunks_mut(per_batch).for_each(|chunk| {
        for (o, b) in chunk.iter_mut().zip(bd.iter()) {
            *o += *b;
        }
    });
    Ok(out)
}
