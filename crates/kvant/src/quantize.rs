//! Round-to-nearest grouped quantization of a dense weight matrix.
//!
//! Scale and zero-point tables come from an external calibration pass; this
//! module only applies them. The dense input uses the `[out_features,
//! in_features]` layout every loader in this codebase produces, while the
//! packed output is laid out along the input-feature axis (see
//! [`crate::tensor::QuantizedMatrix`]).

use half::f16;
use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::error::{KvantError, Result};
use crate::packing::{pack_codes, BitWidth};
use crate::tensor::QuantizedMatrix;

/// Calibration output consumed by [`quantize_matrix`].
///
/// Both tables are `(num_groups, out_features)`. `zeros` is the pre-round
/// floating zero-point; the packed representation stores `zero - 1`
/// (truncated), and the kernels re-add the 1 at decode time.
#[derive(Debug, Clone)]
pub struct CalibrationParams {
    pub scales: Array2<f32>,
    pub zeros: Array2<f32>,
    /// Explicit group assignment per input feature. When absent, the
    /// contiguous `k / groupsize` mapping is used.
    pub g_idx: Option<Vec<u32>>,
}

/// The contiguous group assignment: input feature `k` belongs to group
/// `k / groupsize`.
pub fn default_group_index(in_features: usize, groupsize: usize) -> Vec<u32> {
    (0..in_features).map(|k| (k / groupsize) as u32).collect()
}

/// Quantizes a dense `[out_features, in_features]` weight matrix into its
/// packed representation.
///
/// `code[k, n] = round((w[n, k] + scale[g, n] * zero[g, n]) / scale[g, n])`
/// with `g` the group of input feature `k`. Codes are expected to land in
/// `[0, max_code]` by construction of the calibration tables; values outside
/// that range indicate a calibration defect and are not re-clamped here.
pub fn quantize_matrix(
    weight: &ArrayView2<f32>,
    bits: BitWidth,
    groupsize: usize,
    params: &CalibrationParams,
) -> Result<QuantizedMatrix> {
    assert!(groupsize > 0, "groupsize must be positive");
    let (out_features, in_features) = weight.dim();
    let num_groups = (in_features + groupsize - 1) / groupsize;

    check_table_shape("calibration scales", &params.scales, num_groups, out_features)?;
    check_table_shape("calibration zeros", &params.zeros, num_groups, out_features)?;

    let g_idx = match &params.g_idx {
        Some(g) => g.clone(),
        None => default_group_index(in_features, groupsize),
    };
    if g_idx.len() != in_features {
        return Err(KvantError::ShapeMismatch {
            axis: "group index length",
            expected: in_features,
            got: g_idx.len(),
        });
    }
    for &g in &g_idx {
        if g as usize >= num_groups {
            return Err(KvantError::GroupIndexOutOfRange {
                index: g,
                num_groups,
            });
        }
    }

    // Pack one output-feature column at a time: the codes for a column are
    // contiguous along k, but their words are strided by out_features.
    let cpw = bits.codes_per_word();
    let k_words = (in_features + cpw - 1) / cpw;
    let mut qweight = vec![0u32; k_words * out_features];
    let mut column = vec![0u32; in_features];
    for n in 0..out_features {
        for k in 0..in_features {
            let g = g_idx[k] as usize;
            let scale = params.scales[(g, n)];
            let zero = params.zeros[(g, n)];
            column[k] = ((weight[(n, k)] + scale * zero) / scale).round() as u32;
        }
        for (kw, word) in pack_codes(&column, bits).into_iter().enumerate() {
            qweight[kw * out_features + n] = word;
        }
    }

    // Zero-points are stored pre-decremented by one, packed per group row.
    let mut qzeros = Vec::with_capacity(num_groups * ((out_features + cpw - 1) / cpw));
    let mut zero_row = vec![0u32; out_features];
    for g in 0..num_groups {
        for n in 0..out_features {
            zero_row[n] = (params.zeros[(g, n)] - 1.0) as u32;
        }
        qzeros.extend(pack_codes(&zero_row, bits));
    }

    let scales = params.scales.mapv(f16::from_f32);

    debug!(
        "quantized {}x{} weight to {} bits, {} groups of {}",
        out_features,
        in_features,
        bits.bits(),
        num_groups,
        groupsize
    );

    QuantizedMatrix::new(
        qweight,
        qzeros,
        scales,
        g_idx,
        bits,
        in_features,
        out_features,
    )
}

fn check_table_shape(
    axis: &'static str,
    table: &Array2<f32>,
    rows: usize,
    cols: usize,
) -> Result<()> {
    if table.nrows() != rows {
        return Err(KvantError::ShapeMismatch {
            axis,
            expected: rows,
            got: table.nrows(),
        });
    }
    if table.ncols() != cols {
        return Err(KvantError::ShapeMismatch {
            axis,
            expected: cols,
            got: table.ncols(),
        });
    }
    Ok(())
}
