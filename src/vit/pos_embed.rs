use crate::nn::avg_pool2d;
use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rayon::prelude::*;

/// Resamples the fixed in-plane positional table to the token grid and
/// broadcasts the depth embedding over it.
///
/// The table is stored at the native `1024 / patch` resolution and is
/// down-sampled with a fixed schedule: average pooling with kernel 4, then
/// kernel 3 at stride 1. The pooled result must land exactly on the
/// `(H/p, W/p)` grid, and the depth table must match `Z/p`; the combined
/// bias is `pos[h, w] + depth[z]` per token.
pub fn resample_abs_pos<T: TensorElem + Float>(
    pos: &Tensor<T, 4, Cpu>,
    depth: &Tensor<T, 3, Cpu>,
    grid: [usize; 3],
) -> Result<Tensor<T, 5, Cpu>> {
    let [pb, _, _, e] = *pos.shape();
    let [db, dz, de] = *depth.shape();
    if pb != 1 || db != 1 || de != e {
        return Err(TensorError::ShapeMismatch {
            expected: vec![1, 1, e],
            got: vec![pb, db, de],
        });
    }

    let pooled = avg_pool2d(&pos.permute([0, 3, 1, 2])?, 4, 4)?;
    let pooled = avg_pool2d(&pooled, 3, 1)?;

    let [_, _, gh, gw] = *pooled.shape();
    let [th, tw, tz] = grid;
    if gh != th || gw != tw || dz != tz {
        return Err(TensorError::ShapeMismatch {
            expected: vec![th, tw, tz],
            got: vec![gh, gw, dz],
        });
    }

    let pooled = pooled.permute([0, 2, 3, 1])?;
    let pd = pooled.data();
    let dd = depth.data();

    let mut out = Tensor::zeros([1, th, tw, tz, e]);
    out.data_mut()
        .par_chunks_mut(e)
        .enumerate()
        .for_each(|(idx, row)| {
            let d = idx % tz;
            let hw = idx / tz;
            for c in 0..e {
                row[c] = pd[hw * e + c] + dd[d * e + c];
            }
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_constant_table() {
        // A 16x16 table pools to 4x4 (k4) then 2x2 (k3 s1); a constant
        // table stays constant through averaging.
        let pos = Tensor::<f32, 4>::new(vec![5.0; 16 * 16 * 2], [1, 16, 16, 2]).unwrap();
        let depth = Tensor::<f32, 3>::new(vec![1.0, 2.0, 10.0, 20.0], [1, 2, 2]).unwrap();

        let bias = resample_abs_pos(&pos, &depth, [2, 2, 2]).unwrap();
        assert_eq!(bias.shape(), &[1, 2, 2, 2, 2]);

        // Token (h, w, z=0) = 5 + depth[0], z=1 = 5 + depth[1].
        let d = bias.data();
        for hw in 0..4 {
            let base = hw * 2 * 2;
            assert!((d[base] - 6.0).abs() < 1e-5);
            assert!((d[base + 1] - 7.0).abs() < 1e-5);
            assert!((d[base + 2] - 15.0).abs() < 1e-5);
            assert!((d[base + 3] - 25.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_resample_grid_mismatch_rejected() {
        let pos = Tensor::<f32, 4>::zeros([1, 16, 16, 2]);
        let depth = Tensor::<f32, 3>::zeros([1, 3, 2]);
        // 16 pools to 2, not 3.
        assert!(matches!(
            resample_abs_pos(&pos, &depth, [3, 3, 3]),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_resample_channel_mismatch_rejected() {
        let pos = Tensor::<f32, 4>::zeros([1, 16, 16, 2]);
        let depth = Tensor::<f32, 3>::zeros([1, 2, 3]);
        assert!(matches!(
            resample_abs_pos(&pos, &depth, [2, 2, 2]),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
