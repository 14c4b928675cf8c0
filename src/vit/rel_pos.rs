use crate::tensor::{Cpu, Result, Tensor, TensorElem, TensorError};
use num_traits::Float;
use rayon::prelude::*;

/// Selects per-axis relative positional embeddings for a query/key pair.
///
/// The learned table covers `2 * max(q_size, k_size) - 1` relative offsets;
/// a table of any other length is first resampled to that length by linear
/// interpolation. Rows are then gathered so that entry `(i, j)` holds the
/// embedding for relative offset `i - j`, rescaled when the query and key
/// grids differ in resolution.
pub fn get_rel_pos<T: TensorElem + Float>(
    q_size: usize,
    k_size: usize,
    rel_pos: &Tensor<T, 2, Cpu>,
) -> Result<Tensor<T, 3, Cpu>> {
    if q_size == 0 || k_size == 0 {
        return Err(TensorError::InterpolationDegeneracy(0));
    }
    let max_rel_dist = 2 * q_size.max(k_size) - 1;

    let [len, dim] = *rel_pos.shape();
    let resized = if len == max_rel_dist {
        rel_pos.clone()
    } else {
        interpolate_rows(rel_pos, max_rel_dist)?
    };

    // Scale coordinates with the shorter side when resolutions differ.
    let q_ratio = (k_size as f64 / q_size as f64).max(1.0);
    let k_ratio = (q_size as f64 / k_size as f64).max(1.0);

    let mut out = Tensor::zeros([q_size, k_size, dim]);
    let src = resized.data();
    out.data_mut()
        .par_chunks_mut(dim)
        .enumerate()
        .for_each(|(pos, row)| {
            let i = pos / k_size;
            let j = pos % k_size;
            // Integral and non-negative for all (i, j) by construction.
            let coord =
                i as f64 * q_ratio - j as f64 * k_ratio + (k_size - 1) as f64 * k_ratio;
            let idx = coord as usize;
            row.copy_from_slice(&src[idx * dim..(idx + 1) * dim]);
        });

    Ok(out)
}

/// Resamples a `(len, dim)` table along its first axis to `new_len` rows,
/// using linear interpolation with half-pixel centers.
fn interpolate_rows<T: TensorElem + Float>(
    table: &Tensor<T, 2, Cpu>,
    new_len: usize,
) -> Result<Tensor<T, 2, Cpu>> {
    let [len, dim] = *table.shape();
    if len == 0 || new_len == 0 {
        return Err(TensorError::InterpolationDegeneracy(new_len));
    }

    let mut out = Tensor::zeros([new_len, dim]);
    let src = table.data();
    let scale = len as f64 / new_len as f64;

    out.data_mut()
        .par_chunks_mut(dim)
        .enumerate()
        .for_each(|(i, row)| {
            let pos = ((i as f64 + 0.5) * scale - 0.5)
                .max(0.0)
                .min((len - 1) as f64);
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(len - 1);
            let frac = pos - lo as f64;
            for d in 0..dim {
                let a = src[lo * dim + d].to_f64().unwrap_or(0.0);
                let b = src[hi * dim + d].to_f64().unwrap_or(0.0);
                row[d] = T::from_f64(a + (b - a) * frac).unwrap_or_else(T::zero);
            }
        });

    Ok(out)
}

/// Adds decomposed relative positional bias to raw attention scores.
///
/// For query position `(h, w, z)` and key position `(kh, kw, kz)` the bias
/// is `q . R_h[h, kh] + q . R_w[w, kw] + q . R_z[z, kz]`, where each axis
/// contributes independently. `attn` is `(B * heads, Nq, Nk)` and `q` is the
/// matching `(B * heads, Nq, head_dim)` query tensor before scaling.
pub fn add_decomposed_rel_pos<T: TensorElem + Float>(
    attn: Tensor<T, 3, Cpu>,
    q: &Tensor<T, 3, Cpu>,
    rel_pos_h: &Tensor<T, 2, Cpu>,
    rel_pos_w: &Tensor<T, 2, Cpu>,
    rel_pos_z: &Tensor<T, 2, Cpu>,
    q_size: [usize; 3],
    k_size: [usize; 3],
) -> Result<Tensor<T, 3, Cpu>> {
    let [qh, qw, qz] = q_size;
    let [kh, kw, kz] = k_size;

    let r_h = get_rel_pos(qh, kh, rel_pos_h)?;
    let r_w = get_rel_pos(qw, kw, rel_pos_w)?;
    let r_z = get_rel_pos(qz, kz, rel_pos_z)?;

    let [bh, nq, dim] = *q.shape();
    let nk = kh * kw * kz;
    if nq != qh * qw * qz || attn.shape() != &[bh, nq, nk] {
        return Err(TensorError::ShapeMismatch {
            expected: vec![bh, qh * qw * qz, nk],
            got: attn.shape().to_vec(),
        });
    }

    let qdat = q.data();
    let (rhd, rwd, rzd) = (r_h.data(), r_w.data(), r_z.data());

    let mut out = attn;
    out.data_mut()
        .par_chunks_mut(nq * nk)
        .enumerate()
        .for_each(|(b, scores)| {
            let q_base = b * nq * dim;
            let mut bias_h = vec![T::zero(); kh];
            let mut bias_w = vec![T::zero(); kw];
            let mut bias_z = vec![T::zero(); kz];

            for qi in 0..nq {
                let h = qi / (qw * qz);
                let w = (qi / qz) % qw;
                let z = qi % qz;
                let qrow = &qdat[q_base + qi * dim..q_base + (qi + 1) * dim];

                for (k, slot) in bias_h.iter_mut().enumerate() {
                    let tbl = &rhd[(h * kh + k) * dim..(h * kh + k + 1) * dim];
                    *slot = dot(qrow, tbl);
                }
                for (k, slot) in bias_w.iter_mut().enumerate() {
                    let tbl = &rwd[(w * kw + k) * dim..(w * kw + k + 1) * dim];
                    *slot = dot(qrow, tbl);
                }
                for (k, slot) in bias_z.iter_mut().enumerate() {
                    let tbl = &rzd[(z * kz + k) * dim..(z * kz + k + 1) * dim];
                    *slot = dot(qrow, tbl);
                }

                let row = &mut scores[qi * nk..(qi + 1) * nk];
                let mut idx = 0;
                for &bh_val in &bias_h {
                    for &bw_val in &bias_w {
                        for &bz_val in &bias_z {
                            row[idx] += bh_val + bw_val + bz_val;
                            idx += 1;
                        }
                    }
                }
            }
        });

    Ok(out)
}

fn dot<T: TensorElem>(a: &[T], b: &[T]) -> T {
    let mut acc = T::zero();
    for (&x, &y) in a.iter().zip(b.iter()) {
        acc += x * y;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_rel_pos_exact_length() {
        // q = k = 2 -> max_rel_dist = 3, table already matches.
        let table = Tensor::<f32, 2>::new(
            vec![10.0, 20.0, 30.0], // dim = 1
            [3, 1],
        )
        .unwrap();
        let r = get_rel_pos(2, 2, &table).unwrap();
        assert_eq!(r.shape(), &[2, 2, 1]);
        // Offset index is i - j + (k - 1): row (0,0) -> 1, (0,1) -> 0,
        // (1,0) -> 2, (1,1) -> 1.
        assert_eq!(r.data(), &[20.0, 10.0, 30.0, 20.0]);
    }

    #[test]
    fn test_get_rel_pos_offset_symmetry() {
        // Entries with equal relative offset i - j share an embedding row.
        let table = Tensor::<f32, 2>::new((0..7).map(|v| v as f32).collect(), [7, 1]).unwrap();
        let r = get_rel_pos(4, 4, &table).unwrap();
        let d = r.data();
        for i in 0..4usize {
            for j in 0..4usize {
                for i2 in 0..4usize {
                    for j2 in 0..4usize {
                        if i as isize - j as isize == i2 as isize - j2 as isize {
                            assert_eq!(d[i * 4 + j], d[i2 * 4 + j2]);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_get_rel_pos_interpolates() {
        // Table of length 2 resampled to max_rel_dist = 3; linear ramp stays
        // a ramp under half-pixel interpolation with clamped edges.
        let table = Tensor::<f32, 2>::new(vec![0.0, 3.0], [2, 1]).unwrap();
        let r = get_rel_pos(2, 2, &table).unwrap();
        assert_eq!(r.shape(), &[2, 2, 1]);
        // Resampled rows: clamp(0.5*2/3*..) -> [0, 1.5, 3] ramp endpoints
        // clamped, midpoint exact.
        let d = r.data();
        assert!((d[0] - 1.5).abs() < 1e-6); // offset 0 -> middle row
        assert!((d[2] - 3.0).abs() < 1e-6); // offset +1 -> last row
        assert!(d[1].abs() < 1e-6); // offset -1 -> first row
    }

    #[test]
    fn test_get_rel_pos_zero_size_rejected() {
        let table = Tensor::<f32, 2>::zeros([3, 1]);
        assert!(matches!(
            get_rel_pos(0, 2, &table),
            Err(TensorError::InterpolationDegeneracy(_))
        ));
    }

    #[test]
    fn test_decomposed_bias_additivity() {
        // With zero tables for two axes, the bias reduces to the remaining
        // axis alone; with all three populated it is the sum.
        let dims = [2usize, 2, 2];
        let nq = 8;
        let head_dim = 1;
        let q = Tensor::<f32, 3>::ones([1, nq, head_dim]);
        let attn = Tensor::<f32, 3>::zeros([1, nq, nq]);

        let ramp = Tensor::<f32, 2>::new(vec![1.0, 2.0, 4.0], [3, 1]).unwrap();
        let zero = Tensor::<f32, 2>::zeros([3, 1]);

        let only_h =
            add_decomposed_rel_pos(attn.clone(), &q, &ramp, &zero, &zero, dims, dims).unwrap();
        let only_w =
            add_decomposed_rel_pos(attn.clone(), &q, &zero, &ramp, &zero, dims, dims).unwrap();
        let only_z =
            add_decomposed_rel_pos(attn.clone(), &q, &zero, &zero, &ramp, dims, dims).unwrap();
        let all =
            add_decomposed_rel_pos(attn.clone(), &q, &ramp, &ramp, &ramp, dims, dims).unwrap();

        for i in 0..nq * nq {
            let sum = only_h.data()[i] + only_w.data()[i] + only_z.data()[i];
            assert!((all.data()[i] - sum).abs() < 1e-5);
        }

        // Cross-check against the dense definition: with unit queries and
        // dim 1, bias(q, k) = ramp[h-kh+1] + ramp[w-kw+1] + ramp[z-kz+1].
        let ramp_at = |i: usize, j: usize| [1.0f32, 2.0, 4.0][i + 1 - j];
        for qi in 0..nq {
            let (qh, qw, qz) = (qi / 4, (qi / 2) % 2, qi % 2);
            for ki in 0..nq {
                let (kh, kw, kz) = (ki / 4, (ki / 2) % 2, ki % 2);
                let expected = ramp_at(qh, kh) + ramp_at(qw, kw) + ramp_at(qz, kz);
                assert!((all.data()[qi * nq + ki] - expected).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_decomposed_bias_shape_check() {
        let q = Tensor::<f32, 3>::zeros([1, 8, 2]);
        let attn = Tensor::<f32, 3>::zeros([1, 8, 7]); // wrong Nk
        let table = Tensor::<f32, 2>::zeros([3, 2]);
        assert!(matches!(
            add_decomposed_rel_pos(attn, &q, &table, &table, &table, [2, 2, 2], [2, 2, 2]),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }
}
