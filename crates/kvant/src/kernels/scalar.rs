//! Scalar tile-decode kernels.
//!
//! These fill a small dequantized weight tile from the packed buffers; the
//! surrounding loops in `ops::matmul` do the accumulation. Scale and
//! decoded zero rows are cached per group run, since the group id changes
//! only every `groupsize` input features.

use crate::tensor::QuantizedMatrix;

/// Dequantizes the `(k0.., n0..)` tile of `b` into `out`, row-major:
/// `out[kk * bn + j] = w[k0 + kk, n0 + j]`.
pub(crate) fn dequant_tile(
    b: &QuantizedMatrix,
    k0: usize,
    bk: usize,
    n0: usize,
    bn: usize,
    out: &mut [f32],
) {
    let bits = b.bits.bits();
    let cpw = b.bits.codes_per_word();
    let mask = b.bits.max_code();

    let mut cur_group = u32::MAX;
    let mut scale_row = vec![0f32; bn];
    let mut zero_row = vec![0i32; bn];

    for kk in 0..bk {
        let k = k0 + kk;
        let g = b.g_idx[k];
        if g != cur_group {
            cur_group = g;
            let g = g as usize;
            for j in 0..bn {
                scale_row[j] = b.scale(g, n0 + j);
                zero_row[j] = b.zero_code(g, n0 + j) as i32 + 1;
            }
        }

        let shift = bits * (k % cpw) as u32;
        let words = &b.qweight[(k / cpw) * b.out_features..];
        let out_row = &mut out[kk * bn..(kk + 1) * bn];
        for j in 0..bn {
            let code = ((words[n0 + j] >> shift) & mask) as i32;
            out_row[j] = (code - zero_row[j]) as f32 * scale_row[j];
        }
    }
}

/// Same decode as [`dequant_tile`], stored transposed for the backward
/// kernel: `out[j * bk + kk] = w[k0 + kk, n0 + j]`.
pub(crate) fn dequant_tile_t(
    b: &QuantizedMatrix,
    k0: usize,
    bk: usize,
    n0: usize,
    bn: usize,
    out: &mut [f32],
) {
    let bits = b.bits.bits();
    let cpw = b.bits.codes_per_word();
    let mask = b.bits.max_code();

    let mut cur_group = u32::MAX;
    let mut scale_row = vec![0f32; bn];
    let mut zero_row = vec![0i32; bn];

    for kk in 0..bk {
        let k = k0 + kk;
        let g = b.g_idx[k];
        if g != cur_group {
            cur_group = g;
            let g = g as usize;
            for j in 0..bn {
                scale_row[j] = b.scale(g, n0 + j);
                zero_row[j] = b.zero_code(g, n0 + j) as i32 + 1;
            }
        }

        let shift = bits * (k % cpw) as u32;
        let words = &b.qweight[(k / cpw) * b.out_features..];
        for j in 0..bn {
            let code = ((words[n0 + j] >> shift) & mask) as i32;
            out[j * bk + kk] = (code - zero_row[j]) as f32 * scale_row[j];
        }
    }
}
