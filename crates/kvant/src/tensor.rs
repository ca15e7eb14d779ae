//! The packed representation of a quantized weight matrix.
//!
//! Logical shape is `(in_features, out_features)`. Weight codes are packed
//! along the input-feature axis, so word `(kw, n)` of `qweight` lives at
//! `kw * out_features + n` and holds the codes for input features
//! `kw * codes_per_word ..`. Zero-point codes are packed the same way but
//! along the output-feature axis, one row of words per group. Scales are
//! kept at half precision and widened inside the kernels.

use half::f16;
use ndarray::Array2;

use crate::error::{KvantError, Result};
use crate::packing::BitWidth;

/// A weight matrix quantized to `bits`-wide codes with per-(group, output
/// feature) scale and zero-point parameters.
///
/// Instances are built once from calibration data (see
/// [`crate::quantize::quantize_matrix`]) and are read-only afterwards;
/// every matmul invocation may share one instance across threads.
///
/// Decode convention: stored zero codes are pre-decremented by one, so the
/// reconstructed weight is `(code - (zero_code + 1)) * scale`. The offset is
/// a compatibility convention of the calibration artifacts this crate
/// consumes and must not be altered.
#[derive(Debug, Clone)]
pub struct QuantizedMatrix {
    /// Packed weight codes, `k_words() * out_features` words.
    pub qweight: Vec<u32>,
    /// Packed zero-point codes, `num_groups * zero_words_per_group()` words.
    pub qzeros: Vec<u32>,
    /// Per-(group, output feature) scales, `(num_groups, out_features)`.
    pub scales: Array2<f16>,
    /// Group id for every input feature, non-decreasing.
    pub g_idx: Vec<u32>,
    pub bits: BitWidth,
    pub in_features: usize,
    pub out_features: usize,
}

impl QuantizedMatrix {
    /// Assembles a packed matrix, validating buffer geometry and the group
    /// index against the scale table.
    pub fn new(
        qweight: Vec<u32>,
        qzeros: Vec<u32>,
        scales: Array2<f16>,
        g_idx: Vec<u32>,
        bits: BitWidth,
        in_features: usize,
        out_features: usize,
    ) -> Result<Self> {
        let m = Self {
            qweight,
            qzeros,
            scales,
            g_idx,
            bits,
            in_features,
            out_features,
        };

        if m.scales.ncols() != out_features {
            return Err(KvantError::ShapeMismatch {
                axis: "scale table columns",
                expected: out_features,
                got: m.scales.ncols(),
            });
        }
        if m.g_idx.len() != in_features {
            return Err(KvantError::ShapeMismatch {
                axis: "group index length",
                expected: in_features,
                got: m.g_idx.len(),
            });
        }
        if m.qweight.len() != m.k_words() * out_features {
            return Err(KvantError::ShapeMismatch {
                axis: "packed weight words",
                expected: m.k_words() * out_features,
                got: m.qweight.len(),
            });
        }
        if m.qzeros.len() != m.num_groups() * m.zero_words_per_group() {
            return Err(KvantError::ShapeMismatch {
                axis: "packed zero-point words",
                expected: m.num_groups() * m.zero_words_per_group(),
                got: m.qzeros.len(),
            });
        }
        m.validate_groups()?;
        Ok(m)
    }

    pub fn num_groups(&self) -> usize {
        self.scales.nrows()
    }

    /// Word rows along the packed input-feature axis.
    pub fn k_words(&self) -> usize {
        let cpw = self.bits.codes_per_word();
        (self.in_features + cpw - 1) / cpw
    }

    /// Words per group row of `qzeros`.
    pub fn zero_words_per_group(&self) -> usize {
        let cpw = self.bits.codes_per_word();
        (self.out_features + cpw - 1) / cpw
    }

    /// Checks every group-index entry against the scale table. Kernels call
    /// this before launching any tile.
    pub fn validate_groups(&self) -> Result<()> {
        let num_groups = self.num_groups();
        for &g in &self.g_idx {
            if g as usize >= num_groups {
                return Err(KvantError::GroupIndexOutOfRange {
                    index: g,
                    num_groups,
                });
            }
        }
        Ok(())
    }

    /// Extracts the raw weight code for `(input feature k, output feature n)`.
    #[inline]
    pub fn weight_code(&self, k: usize, n: usize) -> u32 {
        let cpw = self.bits.codes_per_word();
        let word = self.qweight[(k / cpw) * self.out_features + n];
        (word >> (self.bits.bits() * (k % cpw) as u32)) & self.bits.max_code()
    }

    /// Extracts the stored (pre-decremented) zero-point code for
    /// `(group g, output feature n)`.
    #[inline]
    pub fn zero_code(&self, g: usize, n: usize) -> u32 {
        let cpw = self.bits.codes_per_word();
        let word = self.qzeros[g * self.zero_words_per_group() + n / cpw];
        (word >> (self.bits.bits() * (n % cpw) as u32)) & self.bits.max_code()
    }

    #[inline]
    pub fn scale(&self, g: usize, n: usize) -> f32 {
        self.scales[(g, n)].to_f32()
    }

    /// Materializes the full dequantized matrix, `(in_features, out_features)`.
    ///
    /// The kernels never do this; it exists as the reference decode path for
    /// tests and offline inspection.
    pub fn dequantize(&self) -> Array2<f32> {
        let mut w = Array2::<f32>::zeros((self.in_features, self.out_features));
        for k in 0..self.in_features {
            let g = self.g_idx[k] as usize;
            for n in 0..self.out_features {
                let zero = self.zero_code(g, n) as i32 + 1;
                let code = self.weight_code(k, n) as i32;
                w[(k, n)] = (code - zero) as f32 * self.scale(g, n);
            }
        }
        w
    }

    /// Raw byte view of the packed weight words, for storage or upload.
    pub fn qweight_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.qweight)
    }

    /// Raw byte view of the packed zero-point words.
    pub fn qzeros_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.qzeros)
    }
}
