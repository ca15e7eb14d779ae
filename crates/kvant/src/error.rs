//! Common error types for kvant.

use thiserror::Error;

/// Errors surfaced by quantization, packing and the kernel entry points.
///
/// All of these indicate caller or configuration defects. They are raised
/// before any tile work starts and are never retried internally.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KvantError {
    /// Quantization width outside the supported set.
    #[error("unsupported bit width: {0} (only 2, 4 and 8 bits are supported)")]
    UnsupportedBitWidth(u32),

    /// `forward`/`backward` called on a layer whose weights were never packed.
    #[error("quantized weights are not initialized; call pack() first")]
    UninitializedWeights,

    /// A tensor dimension does not match the layer or calibration geometry.
    #[error("shape mismatch on {axis}: expected {expected}, got {got}")]
    ShapeMismatch {
        axis: &'static str,
        expected: usize,
        got: usize,
    },

    /// A group-index entry references a group that does not exist. This
    /// means the calibration artifact is corrupted or belongs to a
    /// different layer geometry.
    #[error("group index {index} out of range for {num_groups} groups")]
    GroupIndexOutOfRange { index: u32, num_groups: usize },
}

/// Result type for kvant operations.
pub type Result<T> = std::result::Result<T, KvantError>;
