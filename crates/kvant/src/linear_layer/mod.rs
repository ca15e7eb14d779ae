//! A linear layer backed by packed low-bit weights.
//!
//! `QuantLinear` is constructed with a fixed geometry, filled exactly once
//! by `pack` from a dense reference layer plus externally calibrated
//! scale/zero tables, and is read-only afterwards. The forward pass behaves
//! like a standard dense linear transform; the backward pass propagates a
//! gradient to the activation (and bias) only, the packed weight is frozen.

mod quant_linear;

pub use quant_linear::{DenseLinear, Gradients, QuantLinear};
