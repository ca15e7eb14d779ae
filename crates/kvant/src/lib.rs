//! Grouped low-bit weight quantization for linear layers.
//!
//! This crate stores a linear layer's weight matrix as 2/4/8-bit integer
//! codes packed into `u32` words, with one scale/zero-point pair per
//! (group, output feature). The matmul kernels dequantize tile-by-tile on
//! the fly, so the full-precision weight matrix is never materialized.
//!
//! The weight is frozen calibration data: `QuantLinear::backward` propagates
//! a gradient to the activation (and bias) only, never to the packed codes,
//! scales, zero-points or group index.

pub mod convert;
pub mod error;
pub mod linear_layer;
pub mod ops;
pub mod packing;
pub mod quantize;
pub mod tensor;

pub(crate) mod kernels;

pub use convert::LayerSet;
pub use error::{KvantError, Result};
pub use linear_layer::{DenseLinear, Gradients, QuantLinear};
pub use ops::matmul::TileConfig;
pub use packing::BitWidth;
pub use quantize::CalibrationParams;
pub use tensor::QuantizedMatrix;

#[cfg(test)]
pub mod tests;
