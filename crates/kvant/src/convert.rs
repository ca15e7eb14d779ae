//! Replacing dense linear layers with quantized ones.
//!
//! Models declare their replaceable layers as an explicit, ordered list of
//! named `DenseLinear`s; the walk here is a plain typed traversal with a
//! capability check and a name-based exclusion list (the LM head stays
//! dense). No runtime reflection is involved.

use log::info;

use crate::error::Result;
use crate::linear_layer::{DenseLinear, QuantLinear};
use crate::quantize::CalibrationParams;

/// An ordered set of named dense layers offered up for replacement.
#[derive(Default)]
pub struct LayerSet {
    layers: Vec<(String, DenseLinear)>,
}

impl LayerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, layer: DenseLinear) {
        self.layers.push((name.into(), layer));
    }

    pub fn get(&self, name: &str) -> Option<&DenseLinear> {
        self.layers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, l)| l)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DenseLinear)> {
        self.layers.iter().map(|(n, l)| (n.as_str(), l))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

/// Whether a layer can be swapped for a `QuantLinear` at all.
fn is_eligible(layer: &DenseLinear) -> bool {
    layer.in_features() > 0 && layer.out_features() > 0
}

/// Names of the layers that would be replaced, after the capability check
/// and exclusion list.
pub fn find_eligible<'a>(set: &'a LayerSet, exclude: &[&str]) -> Vec<&'a str> {
    set.iter()
        .filter(|&(name, layer)| !exclude.contains(&name) && is_eligible(layer))
        .map(|(name, _)| name)
        .collect()
}

/// Builds a packed `QuantLinear` for every eligible layer in the set.
///
/// `params_for` supplies the externally calibrated scale/zero tables per
/// layer; calibration itself is out of scope here. Excluded or ineligible
/// layers are skipped, not errors.
pub fn quantize_layer_set<F>(
    set: &LayerSet,
    bits: u32,
    groupsize: i64,
    exclude: &[&str],
    mut params_for: F,
) -> Result<Vec<(String, QuantLinear)>>
where
    F: FnMut(&str, &DenseLinear) -> CalibrationParams,
{
    let mut replaced = Vec::new();
    for (name, layer) in set.iter() {
        if exclude.contains(&name) || !is_eligible(layer) {
            continue;
        }
        let params = params_for(name, layer);
        let mut quant = QuantLinear::new(
            bits,
            groupsize,
            layer.in_features(),
            layer.out_features(),
            layer.bias.is_some(),
        )?;
        quant.pack(layer, &params)?;
        info!(
            "replaced dense layer '{}' with {}-bit quantized linear ({}x{})",
            name,
            bits,
            layer.out_features(),
            layer.in_features()
        );
        replaced.push((name.to_string(), quant));
    }
    Ok(replaced)
}
