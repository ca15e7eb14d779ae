use log::debug;
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis, IxDyn};

use crate::error::{KvantError, Result};
use crate::ops::matmul::{matmul_2d_quant, matmul_2d_quant_t, TileConfig};
use crate::packing::BitWidth;
use crate::quantize::{quantize_matrix, CalibrationParams};
use crate::tensor::QuantizedMatrix;

/// A dense reference layer, `[out_features, in_features]` weight layout.
///
/// This is what `pack` consumes and what the conversion walk replaces; it
/// mirrors the layout every weight loader in this codebase produces.
pub struct DenseLinear {
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl DenseLinear {
    pub fn new(weight: Array2<f32>, bias: impl Into<Option<Array1<f32>>>) -> Self {
        Self {
            weight,
            bias: bias.into(),
        }
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }
}

/// Gradients produced by [`QuantLinear::backward`].
///
/// There is deliberately no slot for the weight, scales, zero-points or
/// group index: those are frozen calibration data and never receive a
/// gradient.
#[derive(Debug)]
pub struct Gradients {
    pub input: ArrayD<f32>,
    pub bias: Option<Array1<f32>>,
}

/// A linear layer whose weight is stored as packed low-bit codes.
///
/// Lifecycle: `new` fixes the geometry, `pack` fills the buffers once from
/// a dense reference weight and calibration tables, then `forward` and
/// `backward` may run concurrently from any number of threads. `pack`
/// mutates and must be externally serialized against readers.
#[derive(Debug)]
pub struct QuantLinear {
    bits: BitWidth,
    groupsize: usize,
    in_features: usize,
    out_features: usize,
    tile: TileConfig,
    weight: Option<QuantizedMatrix>,
    bias: Option<Array1<f32>>,
    use_bias: bool,
}

impl QuantLinear {
    /// Creates an empty layer. `groupsize == -1` means a single group
    /// spanning all input features.
    ///
    /// Fails with `UnsupportedBitWidth` before any buffer is allocated.
    pub fn new(
        bits: u32,
        groupsize: i64,
        in_features: usize,
        out_features: usize,
        bias: bool,
    ) -> Result<Self> {
        let bits = BitWidth::new(bits)?;
        assert!(
            groupsize == -1 || groupsize > 0,
            "groupsize must be positive or -1"
        );
        let groupsize = if groupsize == -1 {
            in_features
        } else {
            groupsize as usize
        };

        Ok(Self {
            bits,
            groupsize,
            in_features,
            out_features,
            tile: TileConfig::default(),
            weight: None,
            bias: None,
            use_bias: bias,
        })
    }

    pub fn with_tile_config(mut self, tile: TileConfig) -> Self {
        self.tile = tile;
        self
    }

    pub fn bits(&self) -> u32 {
        self.bits.bits()
    }

    pub fn groupsize(&self) -> usize {
        self.groupsize
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn is_packed(&self) -> bool {
        self.weight.is_some()
    }

    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Read access to the packed weight, once packed.
    pub fn quantized_weight(&self) -> Option<&QuantizedMatrix> {
        self.weight.as_ref()
    }

    /// Quantizes and packs a dense reference layer into this one.
    ///
    /// This is the only mutation in the lifecycle. Calling it again
    /// overwrites the packed buffers wholesale from the new calibration
    /// tables; there is no partial re-pack.
    pub fn pack(&mut self, linear: &DenseLinear, params: &CalibrationParams) -> Result<()> {
        if linear.out_features() != self.out_features {
            return Err(KvantError::ShapeMismatch {
                axis: "dense weight rows (out_features)",
                expected: self.out_features,
                got: linear.out_features(),
            });
        }
        if linear.in_features() != self.in_features {
            return Err(KvantError::ShapeMismatch {
                axis: "dense weight columns (in_features)",
                expected: self.in_features,
                got: linear.in_features(),
            });
        }

        let packed = quantize_matrix(&linear.weight.view(), self.bits, self.groupsize, params)?;
        debug!(
            "packed {}x{} linear at {} bits ({} words)",
            self.out_features,
            self.in_features,
            self.bits.bits(),
            packed.qweight.len()
        );
        self.weight = Some(packed);
        if self.use_bias {
            self.bias = linear.bias.clone();
        }
        Ok(())
    }

    /// Computes `y = x @ dequantize(W) + b` for an input whose trailing
    /// dimension is `in_features`; leading dimensions are preserved.
    pub fn forward(&self, input: &ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        let weight = self.weight.as_ref().ok_or(KvantError::UninitializedWeights)?;
        let (m, lead) =
            self.flatten_dims(input.shape(), self.in_features, "input trailing dimension")?;

        let input_std = input.as_standard_layout();
        let flat = input_std
            .view()
            .into_shape((m, self.in_features))
            .expect("contiguous reshape after as_standard_layout");

        let mut out = matmul_2d_quant(&flat, weight, self.tile)?;
        if let Some(bias) = &self.bias {
            out.outer_iter_mut().for_each(|mut row| row += bias);
        }

        let mut out_shape = lead;
        out_shape.push(self.out_features);
        Ok(out
            .into_shape(IxDyn(&out_shape))
            .expect("forward output reshape"))
    }

    /// Propagates a gradient through the layer: `grad_input = grad_output @
    /// dequantize(W)ᵗ`, plus the bias gradient when a bias is present.
    ///
    /// The packed weight, scales, zero-points and group index never receive
    /// a gradient.
    pub fn backward(&self, grad_output: &ArrayViewD<f32>) -> Result<Gradients> {
        let weight = self.weight.as_ref().ok_or(KvantError::UninitializedWeights)?;
        let (m, lead) = self.flatten_dims(
            grad_output.shape(),
            self.out_features,
            "grad_output trailing dimension",
        )?;

        let grad_std = grad_output.as_standard_layout();
        let flat = grad_std
            .view()
            .into_shape((m, self.out_features))
            .expect("contiguous reshape after as_standard_layout");

        let grad_in = matmul_2d_quant_t(&flat, weight, self.tile)?;
        let bias_grad = self.bias.as_ref().map(|_| flat.sum_axis(Axis(0)));

        let mut in_shape = lead;
        in_shape.push(self.in_features);
        Ok(Gradients {
            input: grad_in
                .into_shape(IxDyn(&in_shape))
                .expect("backward output reshape"),
            bias: bias_grad,
        })
    }

    /// Splits a shape into (flattened leading size, leading dims), checking
    /// the trailing dimension.
    fn flatten_dims(
        &self,
        shape: &[usize],
        expected: usize,
        axis: &'static str,
    ) -> Result<(usize, Vec<usize>)> {
        let got = shape.last().copied().unwrap_or(0);
        if shape.is_empty() || got != expected {
            return Err(KvantError::ShapeMismatch {
                axis,
                expected,
                got,
            });
        }
        let lead = shape[..shape.len() - 1].to_vec();
        Ok((lead.iter().product(), lead))
    }
}
