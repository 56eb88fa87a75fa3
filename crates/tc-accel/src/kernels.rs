//! Kernel bodies for the tiled backend.

use rayon::prelude::*;
use tc_core::backend::NodeInput;
use tc_core::cpu_kernels::matmul_dims;
use tc_core::{Result, Shape};

/// Below this many elements the parallel loops run sequentially.
const PAR_THRESHOLD: usize = 4096;

/// Cache-blocked transpose of a row-major `[rows, cols]` matrix into `[cols, rows]`.
///
/// Output is split into bands of `tile` rows that are filled in parallel; each
/// band is walked tile by tile so both reads and writes stay within a block.
/// A tile wider than the matrix is clamped to `cols`.
pub(crate) fn transpose_2d_tiled(src: &[f32], rows: usize, cols: usize, tile: usize) -> Vec<f32> {
    let tile = tile.min(cols.max(1));
    let mut dst = vec![0.0f32; rows * cols];
    if dst.is_empty() {
        return dst;
    }

    let fill_band = |(band, out): (usize, &mut [f32])| {
        // Output rows j0..j1 correspond to input columns j0..j1.
        let j0 = band * tile;
        let j1 = (j0 + tile).min(cols);
        for i0 in (0..rows).step_by(tile) {
            let i1 = (i0 + tile).min(rows);
            for j in j0..j1 {
                let out_row = &mut out[(j - j0) * rows..(j - j0 + 1) * rows];
                for i in i0..i1 {
                    out_row[i] = src[i * cols + j];
                }
            }
        }
    };

    if dst.len() < PAR_THRESHOLD {
        dst.chunks_mut(tile * rows).enumerate().for_each(fill_band);
    } else {
        dst.par_chunks_mut(tile * rows)
            .enumerate()
            .for_each(fill_band);
    }
    dst
}

/// General axis permutation: output dim `k` is input dim `perm[k]`.
///
/// Each innermost output row is produced independently by walking the input
/// with the permuted stride of the last output axis.
pub(crate) fn transpose_nd(src: &[f32], dims: &[usize], perm: &[usize]) -> Vec<f32> {
    let ndim = perm.len();
    if ndim <= 1 {
        return src.to_vec();
    }
    let mut dst = vec![0.0f32; src.len()];
    if dst.is_empty() {
        return dst;
    }

    let in_strides = Shape::new(dims.iter().map(|&d| d as i64).collect::<Vec<_>>()).strides();
    let out_dims: Vec<usize> = perm.iter().map(|&p| dims[p]).collect();
    let out_strides: Vec<usize> = perm.iter().map(|&p| in_strides[p]).collect();
    let inner = out_dims[ndim - 1];
    let inner_stride = out_strides[ndim - 1];

    dst.par_chunks_mut(inner)
        .enumerate()
        .for_each(|(row, out)| {
            let mut remaining = row;
            let mut base = 0usize;
            for k in (0..ndim - 1).rev() {
                base += (remaining % out_dims[k]) * out_strides[k];
                remaining /= out_dims[k];
            }
            for (t, o) in out.iter_mut().enumerate() {
                *o = src[base + t * inner_stride];
            }
        });
    dst
}

pub(crate) fn unary(a: &[f32], f: fn(f32) -> f32) -> Vec<f32> {
    if a.len() < PAR_THRESHOLD {
        a.iter().map(|&x| f(x)).collect()
    } else {
        a.par_iter().map(|&x| f(x)).collect()
    }
}

pub(crate) fn binary(a: &[f32], b: &[f32], f: fn(f32, f32) -> f32) -> Vec<f32> {
    if a.len() < PAR_THRESHOLD {
        a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect()
    } else {
        a.par_iter().zip(b.par_iter()).map(|(&x, &y)| f(x, y)).collect()
    }
}

/// Row-parallel matmul with an i-k-j loop order.
pub(crate) fn matmul(a: &NodeInput<'_>, b: &NodeInput<'_>) -> Result<Vec<f32>> {
    let (m, k, n) = matmul_dims(a, b)?;
    let mut out = vec![0.0f32; m * n];
    if out.is_empty() {
        return Ok(out);
    }
    out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for p in 0..k {
            let av = a.data[i * k + p];
            let b_row = &b.data[p * n..(p + 1) * n];
            for (o, &bv) in row.iter_mut().zip(b_row) {
                *o += av * bv;
            }
        }
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_transpose(src: &[f32], rows: usize, cols: usize) -> Vec<f32> {
        let mut out = vec![0.0; rows * cols];
        for i in 0..rows {
            for j in 0..cols {
                out[j * rows + i] = src[i * cols + j];
            }
        }
        out
    }

    #[test]
    fn test_tiled_matches_naive_on_ragged_tiles() {
        for &(rows, cols, tile) in &[(2, 3, 32), (7, 5, 2), (33, 65, 8), (128, 96, 32), (1, 9, 4)] {
            let src: Vec<f32> = (0..rows * cols).map(|x| x as f32).collect();
            assert_eq!(
                transpose_2d_tiled(&src, rows, cols, tile),
                naive_transpose(&src, rows, cols),
                "rows={rows} cols={cols} tile={tile}"
            );
        }
    }

    #[test]
    fn test_tiled_empty() {
        assert!(transpose_2d_tiled(&[], 0, 4, 8).is_empty());
    }

    #[test]
    fn test_oversized_tile_is_clamped() {
        let src: Vec<f32> = (0..6).map(|x| x as f32).collect();
        assert_eq!(
            transpose_2d_tiled(&src, 2, 3, usize::MAX),
            naive_transpose(&src, 2, 3)
        );
    }

    #[test]
    fn test_nd_matches_2d() {
        let src: Vec<f32> = (0..12).map(|x| x as f32).collect();
        assert_eq!(
            transpose_nd(&src, &[3, 4], &[1, 0]),
            naive_transpose(&src, 3, 4)
        );
    }

    #[test]
    fn test_nd_identity_perm() {
        let src: Vec<f32> = (0..24).map(|x| x as f32).collect();
        assert_eq!(transpose_nd(&src, &[2, 3, 4], &[0, 1, 2]), src);
    }

    #[test]
    fn test_nd_3d() {
        let src: Vec<f32> = (0..24).map(|x| x as f32).collect();
        let out = transpose_nd(&src, &[2, 3, 4], &[0, 2, 1]);
        assert_eq!(&out[..6], &[0.0, 4.0, 8.0, 1.0, 5.0, 9.0]);
        assert_eq!(&out[12..15], &[12.0, 16.0, 20.0]);
    }
}
