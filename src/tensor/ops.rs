use super::{Cpu, Result, Tensor, TensorElem, TensorError};
use rayon::prelude::*;
use std::ops::{Add, Div, Mul, Sub};

// Simple macro to implement arithmetic traits
macro_rules! impl_bin_op {
    ($trait:ident, $method:ident) => {
        impl<T, const RANK: usize> $trait for &Tensor<T, RANK, Cpu>
        where
            T: TensorElem,
        {
            type Output = Result<Tensor<T, RANK, Cpu>>;

            fn $method(self, rhs: Self) -> Self::Output {
                if self.shape != rhs.shape {
                    return Err(TensorError::ShapeMismatch {
                        expected: self.shape.to_vec(),
                        got: rhs.shape.to_vec(),
                    });
                }

                let mut out = Tensor::zeros(self.shape);
                // Seamless parallelism using rayon
                out.data
                    .as_mut_slice()
                    .par_iter_mut()
                    .zip(self.data.as_slice().par_iter())
                    .zip(rhs.data.as_slice().par_iter())
                    .for_each(|((o, a), b)| {
                        *o = a.$method(*b);
                    });

                Ok(out)
            }
        }
    };
}

impl_bin_op!(Add, add);
impl_bin_op!(Sub, sub);
impl_bin_op!(Mul, mul);
impl_bin_op!(Div, div);

impl<T, const RANK: usize> Tensor<T, RANK, Cpu>
where
    T: TensorElem,
{
    /// Applies a function element-wise.
    pub fn map<F>(&self, f: F) -> Self
    where
        F: Fn(T) -> T + Sync + Send,
    {
        let mut out = Tensor::zeros(self.shape);
        out.data
            .as_mut_slice()
            .par_iter_mut()
            .zip(self.data.as_slice().par_iter())
            .for_each(|(o, i)| *o = f(*i));
        out
    }

    /// Matrix Multiplication.
    /// Supports:
    /// - 2D x 2D: [M, K] x [K, N] -> [M, N]
    /// - 3D x 3D: [B, M, K] x [B, K, N] -> [B, M, N] (Batched Matmul)
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        if RANK == 2 || RANK == 3 {
            self.matmul_impl(rhs)
        } else {
            Err(TensorError::Unsupported(format!(
                "Matmul not implemented for rank {}",
                RANK
            )))
        }
    }

    fn matmul_impl(&self, rhs: &Self) -> Result<Self> {
        if RANK == 2 {
            let [m, k] = self.shape[0..2] else {
                unreachable!()
            };
            let [k2, n] = rhs.shape[0..2] else {
                unreachable!()
            };

            if k != k2 {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![m, k],
                    got: vec![k2, n],
                });
            }

            let mut out_shape = [0; RANK];
            out_shape[0] = m;
            out_shape[1] = n;

            let mut out = Tensor::zeros(out_shape);

            // Optimization: Use TensorElem::gemm
            if let Some(c) = T::gemm(m, k, n, self.data.as_slice(), rhs.data.as_slice()) {
                out.data.as_mut_slice().copy_from_slice(&c);
                return Ok(out);
            }

            // Fallback to naive parallel
            out.data
                .as_mut_slice()
                .par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, out_row)| {
                    for j in 0..n {
                        let mut sum = T::zero();
                        for l in 0..k {
                            let val_a =
                                self.data.as_slice()[i * self.strides[0] + l * self.strides[1]];
                            let val_b = rhs.data.as_slice()[l * rhs.strides[0] + j * rhs.strides[1]];
                            sum += val_a * val_b;
                        }
                        out_row[j] = sum;
                    }
                });
            Ok(out)
        } else if RANK == 3 {
            let [b, m, k] = self.shape[0..3] else {
                unreachable!()
            };
            let [b2, k2, n] = rhs.shape[0..3] else {
                unreachable!()
            };

            if b != b2 || k != k2 {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![b, m, k],
                    got: vec![b2, k2, n],
                });
            }

            let mut out_shape = [0; RANK];
            out_shape[0] = b;
            out_shape[1] = m;
            out_shape[2] = n;

            let mut out = Tensor::zeros(out_shape);

            out.data
                .as_mut_slice()
                .par_chunks_mut(m * n)
                .enumerate()
                .for_each(|(batch_idx, out_matrix)| {
                    let a_offset = batch_idx * m * k;
                    let b_offset = batch_idx * k * n;

                    let a_slice = &self.data.as_slice()[a_offset..a_offset + m * k];
                    let b_slice = &rhs.data.as_slice()[b_offset..b_offset + k * n];

                    if let Some(c) = T::gemm(m, k, n, a_slice, b_slice) {
                        out_matrix.copy_from_slice(&c);
                    } else {
                        // Fallback naive 2D
                        for r in 0..m {
                            for c in 0..n {
                                let mut sum = T::zero();
                                for l in 0..k {
                                    let val_a = a_slice[r * k + l];
                                    let val_b = b_slice[l * n + c];
                                    sum += val_a * val_b;
                                }
                                out_matrix[r * n + c] = sum;
                            }
                        }
                    }
                });
            Ok(out)
        } else {
            Err(TensorError::Unsupported(format!(
                "Matmul not implemented for rank {}",
                RANK
            )))
        }
    }

    /// Swaps the last two axes.
    pub fn transpose(&self) -> Result<Self> {
        if RANK < 2 {
            return Err(TensorError::Unsupported(
                "Transpose requires rank >= 2".into(),
            ));
        }

        let mut axes = [0; RANK];
        for (i, a) in axes.iter_mut().enumerate() {
            *a = i;
        }
        axes.swap(RANK - 1, RANK - 2);
        self.permute(axes)
    }

    /// Reorders the axes of the tensor.
    ///
    /// `axes` lists, for every output axis, which input axis it takes its
    /// data from. The 3D encoder leans on this heavily: rank-5 token grids,
    /// rank-6 patch volumes and rank-8 window grids all move through here.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if `axes` is not a
    /// permutation of `0..RANK`.
    pub fn permute(&self, axes: [usize; RANK]) -> Result<Self> {
        let mut seen = [false; RANK];
        for &a in axes.iter() {
            if a >= RANK || seen[a] {
                return Err(TensorError::IndexOutOfBounds {
                    index: axes.to_vec(),
                    shape: self.shape.to_vec(),
                });
            }
            seen[a] = true;
        }

        let mut new_shape = [0; RANK];
        for i in 0..RANK {
            new_shape[i] = self.shape[axes[i]];
        }

        let mut out = Tensor::zeros(new_shape);
        let out_strides = out.strides;
        let in_strides = self.strides;
        let src = self.data.as_slice();

        out.data
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(flat, o)| {
                let mut rem = flat;
                let mut src_idx = 0;
                for i in 0..RANK {
                    let coord = rem / out_strides[i];
                    rem %= out_strides[i];
                    src_idx += coord * in_strides[axes[i]];
                }
                *o = src[src_idx];
            });

        Ok(out)
    }

    /// Zero-pads each axis at its high end by the given amount.
    ///
    /// Used by the window partitioner to round spatial extents up to the
    /// next multiple of the window size. The original contents occupy the
    /// low corner of the result.
    pub fn pad_high(&self, pad: [usize; RANK]) -> Self {
        if pad.iter().all(|&p| p == 0) {
            return self.clone();
        }

        let mut new_shape = self.shape;
        for i in 0..RANK {
            new_shape[i] += pad[i];
        }

        let mut out = Tensor::zeros(new_shape);
        let out_last = new_shape[RANK - 1];
        let in_last = self.shape[RANK - 1];
        let in_shape = self.shape;
        let in_strides = self.strides;
        let src = self.data.as_slice();

        out.data
            .as_mut_slice()
            .par_chunks_mut(out_last)
            .enumerate()
            .for_each(|(row_idx, row)| {
                // Decompose the row index over the leading output axes; rows
                // that fall into the padding stay zero.
                let mut rem = row_idx;
                let mut src_off = 0;
                let mut in_range = true;
                for i in (0..RANK - 1).rev() {
                    let coord = rem % new_shape[i];
                    rem /= new_shape[i];
                    if coord >= in_shape[i] {
                        in_range = false;
                        break;
                    }
                    src_off += coord * in_strides[i];
                }
                if in_range && in_last > 0 {
                    row[..in_last].copy_from_slice(&src[src_off..src_off + in_last]);
                }
            });

        out
    }

    /// Slices the low corner of the tensor down to the given extents.
    ///
    /// The exact inverse of [`Tensor::pad_high`] when applied with the
    /// pre-padding extents.
    ///
    /// # Errors
    ///
    /// Returns `TensorError::IndexOutOfBounds` if any extent exceeds the
    /// corresponding axis length.
    pub fn slice_to(&self, extents: [usize; RANK]) -> Result<Self> {
        for i in 0..RANK {
            if extents[i] > self.shape[i] {
                return Err(TensorError::IndexOutOfBounds {
                    index: extents.to_vec(),
                    shape: self.shape.to_vec(),
                });
            }
        }

        let mut out = Tensor::zeros(extents);
        let out_last = extents[RANK - 1];
        if out.size() == 0 {
            return Ok(out);
        }

        let in_strides = self.strides;
        let src = self.data.as_slice();

        out.data
            .as_mut_slice()
            .par_chunks_mut(out_last)
            .enumerate()
            .for_each(|(row_idx, row)| {
                let mut rem = row_idx;
                let mut src_off = 0;
                for i in (0..RANK - 1).rev() {
                    let coord = rem % extents[i];
                    rem /= extents[i];
                    src_off += coord * in_strides[i];
                }
                row.copy_from_slice(&src[src_off..src_off + out_last]);
            });

        Ok(out)
    }
}
