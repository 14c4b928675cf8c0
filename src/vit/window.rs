use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};

/// Partitions a token grid into non-overlapping cubic windows.
///
/// Pads H, W and Z independently up to the next multiple of `window_size`
/// (zero-fill at the high end of each axis), then flattens the windows into
/// the batch axis. Returns the windows of shape
/// `(B * num_windows, ws, ws, ws, C)` together with the padded extents
/// needed to reverse the operation.
///
/// # Errors
///
/// Returns `TensorError::Config` for a zero window size.
pub fn window_partition<T: TensorElem>(
    x: &Tensor<T, 5, Cpu>,
    window_size: usize,
) -> Result<(Tensor<T, 5, Cpu>, [usize; 3])> {
    if window_size == 0 {
        return Err(TensorError::Config(
            "window_partition requires a positive window size".into(),
        ));
    }

    let [b, h, w, z, c] = *x.shape();
    let ws = window_size;
    let pad = |d: usize| (ws - d % ws) % ws;
    let (pad_h, pad_w, pad_z) = (pad(h), pad(w), pad(z));

    let x = x.pad_high([0, pad_h, pad_w, pad_z, 0]);
    let (hp, wp, zp) = (h + pad_h, w + pad_w, z + pad_z);
    let (nh, nw, nz) = (hp / ws, wp / ws, zp / ws);

    let windows = x
        .reshape([b, nh, ws, nw, ws, nz, ws, c])?
        .permute([0, 1, 3, 5, 2, 4, 6, 7])?
        .reshape([b * nh * nw * nz, ws, ws, ws, c])?;

    Ok((windows, [hp, wp, zp]))
}

/// Reassembles windows into the original token grid, stripping padding.
///
/// Exact inverse of [`window_partition`]:
/// `window_unpartition(window_partition(x, ws), ws, padded, original) == x`.
pub fn window_unpartition<T: TensorElem>(
    windows: &Tensor<T, 5, Cpu>,
    window_size: usize,
    padded: [usize; 3],
    original: [usize; 3],
) -> Result<Tensor<T, 5, Cpu>> {
    if window_size == 0 {
        return Err(TensorError::Config(
            "window_unpartition requires a positive window size".into(),
        ));
    }

    let [hp, wp, zp] = padded;
    let [h, w, z] = original;
    let ws = window_size;
    let (nh, nw, nz) = (hp / ws, wp / ws, zp / ws);
    let num_windows = nh * nw * nz;

    let [bw, s1, s2, s3, c] = *windows.shape();
    if num_windows == 0
        || bw % num_windows != 0
        || s1 != ws
        || s2 != ws
        || s3 != ws
        || hp % ws != 0
        || wp % ws != 0
        || zp % ws != 0
    {
        return Err(TensorError::ShapeMismatch {
            expected: vec![num_windows, ws, ws, ws],
            got: vec![bw, s1, s2, s3],
        });
    }
    let b = bw / num_windows;

    // The grid axes were moved ahead of the window offsets by
    // (0,1,3,5,2,4,6,7); interleaving them back needs the true inverse
    // permutation, not the forward one again.
    windows
        .clone()
        .reshape([b, nh, nw, nz, ws, ws, ws, c])?
        .permute([0, 1, 4, 2, 5, 3, 6, 7])?
        .reshape([b, hp, wp, zp, c])?
        .slice_to([b, h, w, z, c])
}
