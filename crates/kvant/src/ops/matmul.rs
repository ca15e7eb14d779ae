//! Tiled matrix multiplication against packed quantized weights.
//!
//! Both kernels walk the output in `(block_m, block_n)` (forward) or
//! `(block_m, block_k)` (transposed) tiles, decode one weight sub-tile at a
//! time via `kernels::scalar`, and accumulate in f32, wider than the f16
//! precision the scales are stored at. The full dequantized matrix is never
//! materialized.
//!
//! Tiles are independent: the output is split into contiguous row bands and
//! each band is processed by one rayon task. Within a tile the contraction
//! loop is sequential. Boundary tiles clamp their ranges instead of reading
//! or writing out of bounds, so dimensions need not be multiples of the
//! block sizes.

use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

use crate::error::{KvantError, Result};
use crate::kernels::scalar::{dequant_tile, dequant_tile_t};
use crate::tensor::QuantizedMatrix;

/// Block sizes for the tiled kernels.
///
/// Purely a performance knob: any configuration produces the same result up
/// to floating-point rounding noise. `block_m`/`block_n`/`block_k` are the
/// tile extents; `m_group` is how many consecutive M-tiles one parallel
/// task claims, trading scheduling overhead against load balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub block_m: usize,
    pub block_n: usize,
    pub block_k: usize,
    pub m_group: usize,
}

impl Default for TileConfig {
    fn default() -> Self {
        // Sized so one weight sub-tile and its accumulator stay L1-resident.
        Self {
            block_m: 32,
            block_n: 64,
            block_k: 64,
            m_group: 4,
        }
    }
}

impl TileConfig {
    /// Degenerate (zero) block sizes clamp to 1 rather than panic.
    fn sanitized(&self) -> (usize, usize, usize, usize) {
        (
            self.block_m.max(1),
            self.block_n.max(1),
            self.block_k.max(1),
            self.m_group.max(1),
        )
    }
}

/// Forward kernel: `C(M, N) = A(M, K) x dequantize(B)(K, N)`.
///
/// `A` is dense activations; `B` is the packed weight with `in_features = K`
/// and `out_features = N`. Shape and group-index validation happen before
/// any tile runs; the launch either completes or fails up front.
pub fn matmul_2d_quant(
    a: &ArrayView2<f32>,
    b: &QuantizedMatrix,
    cfg: TileConfig,
) -> Result<Array2<f32>> {
    let (m, k) = a.dim();
    if k != b.in_features {
        return Err(KvantError::ShapeMismatch {
            axis: "input columns (in_features)",
            expected: b.in_features,
            got: k,
        });
    }
    b.validate_groups()?;

    let n = b.out_features;
    let mut c = Array2::<f32>::zeros((m, n));
    if m == 0 || n == 0 {
        return Ok(c);
    }

    let (block_m, block_n, block_k, m_group) = cfg.sanitized();
    let a_s = a.as_standard_layout();
    let a_slice = a_s.as_slice().unwrap();
    let out_slice = c.as_slice_mut().unwrap();

    let band_rows = block_m * m_group;
    out_slice
        .par_chunks_mut(band_rows * n)
        .enumerate()
        .for_each(|(band_idx, band)| {
            let m0 = band_idx * band_rows;
            let band_m = band.len() / n;
            let mut wtile = vec![0f32; block_k * block_n];

            for mt in (0..band_m).step_by(block_m) {
                let bm = block_m.min(band_m - mt);
                for nt in (0..n).step_by(block_n) {
                    let bn = block_n.min(n - nt);
                    let mut acc = vec![0f32; bm * bn];

                    for kt in (0..k).step_by(block_k) {
                        let bk = block_k.min(k - kt);
                        dequant_tile(b, kt, bk, nt, bn, &mut wtile);

                        for i in 0..bm {
                            let row = (m0 + mt + i) * k + kt;
                            let a_row = &a_slice[row..row + bk];
                            let acc_row = &mut acc[i * bn..(i + 1) * bn];
                            for (kk, &av) in a_row.iter().enumerate() {
                                let w_row = &wtile[kk * bn..(kk + 1) * bn];
                                for j in 0..bn {
                                    acc_row[j] += av * w_row[j];
                                }
                            }
                        }
                    }

                    for i in 0..bm {
                        let dst = (mt + i) * n + nt;
                        band[dst..dst + bn].copy_from_slice(&acc[i * bn..(i + 1) * bn]);
                    }
                }
            }
        });

    Ok(c)
}

/// Transposed kernel: `C(M, K) = G(M, N) x dequantize(B)ᵗ(N, K)`.
///
/// Contracts over the output-feature axis instead of the input-feature
/// axis; the packed buffer is never physically transposed. This is the
/// gradient of the forward product with respect to the activation, the
/// only gradient a quantized layer propagates, since the packed weight is
/// frozen calibration data.
pub fn matmul_2d_quant_t(
    g: &ArrayView2<f32>,
    b: &QuantizedMatrix,
    cfg: TileConfig,
) -> Result<Array2<f32>> {
    let (m, n) = g.dim();
    if n != b.out_features {
        return Err(KvantError::ShapeMismatch {
            axis: "input columns (out_features)",
            expected: b.out_features,
            got: n,
        });
    }
    b.validate_groups()?;

    let k = b.in_features;
    let mut c = Array2::<f32>::zeros((m, k));
    if m == 0 || k == 0 {
        return Ok(c);
    }

    let (block_m, block_n, block_k, m_group) = cfg.sanitized();
    let g_s = g.as_standard_layout();
    let g_slice = g_s.as_slice().unwrap();
    let out_slice = c.as_slice_mut().unwrap();

    let band_rows = block_m * m_group;
    out_slice
        .par_chunks_mut(band_rows * k)
        .enumerate()
        .for_each(|(band_idx, band)| {
            let m0 = band_idx * band_rows;
            let band_m = band.len() / k;
            let mut wtile = vec![0f32; block_k * block_n];

            for mt in (0..band_m).step_by(block_m) {
                let bm = block_m.min(band_m - mt);
                for kt in (0..k).step_by(block_k) {
                    let bk = block_k.min(k - kt);
                    let mut acc = vec![0f32; bm * bk];

                    for nt in (0..n).step_by(block_n) {
                        let bn = block_n.min(n - nt);
                        dequant_tile_t(b, kt, bk, nt, bn, &mut wtile);

                        for i in 0..bm {
                            let row = (m0 + mt + i) * n + nt;
                            let g_row = &g_slice[row..row + bn];
                            let acc_row = &mut acc[i * bk..(i + 1) * bk];
                            for (j, &gv) in g_row.iter().enumerate() {
                                let w_row = &wtile[j * bk..(j + 1) * bk];
                                for kk in 0..bk {
                                    acc_row[kk] += gv * w_row[kk];
                                }
                            }
                        }
                    }

                    for i in 0..bm {
                        let dst = (mt + i) * k + kt;
                        band[dst..dst + bk].copy_from_slice(&acc[i * bk..(i + 1) * bk]);
                    }
                }
            }
        });

    Ok(c)
}
