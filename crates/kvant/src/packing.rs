//! Bit-level packing of narrow integer codes into `u32` words.
//!
//! Codes are placed low-bit-first: code `j` of a word sits at bit offset
//! `bits * (j % codes_per_word)`. A width must divide 32 evenly, which is
//! why only 2, 4 and 8 bits are supported. The same layout is used for both
//! the weight codes (packed along the input-feature axis) and the zero-point
//! codes (packed along the output-feature axis).

use crate::error::{KvantError, Result};

/// A validated quantization width.
///
/// Constructing a `BitWidth` is the single gate for the supported set; the
/// rest of the crate never sees a raw, unchecked bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitWidth {
    W2,
    W4,
    W8,
}

impl BitWidth {
    pub fn new(bits: u32) -> Result<Self> {
        match bits {
            2 => Ok(BitWidth::W2),
            4 => Ok(BitWidth::W4),
            8 => Ok(BitWidth::W8),
            other => Err(KvantError::UnsupportedBitWidth(other)),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            BitWidth::W2 => 2,
            BitWidth::W4 => 4,
            BitWidth::W8 => 8,
        }
    }

    /// The largest representable code, `2^bits - 1`. Doubles as the shift
    /// mask in the kernels.
    pub fn max_code(self) -> u32 {
        (1u32 << self.bits()) - 1
    }

    /// How many codes fit in one 32-bit word.
    pub fn codes_per_word(self) -> usize {
        (32 / self.bits()) as usize
    }
}

/// Packs a sequence of codes into `u32` words, low-bit-first.
///
/// The final word is zero-padded when the code count is not a multiple of
/// `codes_per_word`. Codes are masked to the width; feeding codes outside
/// `[0, max_code]` is a calibration defect upstream of this function.
pub fn pack_codes(codes: &[u32], width: BitWidth) -> Vec<u32> {
    let cpw = width.codes_per_word();
    let bits = width.bits();
    let mask = width.max_code();

    let mut words = vec![0u32; (codes.len() + cpw - 1) / cpw];
    for (i, &code) in codes.iter().enumerate() {
        words[i / cpw] |= (code & mask) << (bits * (i % cpw) as u32);
    }
    words
}

/// Unpacks `count` codes from packed words. Exact inverse of [`pack_codes`].
pub fn unpack_codes(words: &[u32], width: BitWidth, count: usize) -> Vec<u32> {
    let cpw = width.codes_per_word();
    let bits = width.bits();
    let mask = width.max_code();

    (0..count)
        .map(|i| (words[i / cpw] >> (bits * (i % cpw) as u32)) & mask)
        .collect()
}
