//! Shared fixtures for the kernel and layer tests.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packing::BitWidth;
use crate::quantize::CalibrationParams;

/// Generates a seeded random F32 matrix with values in [-1.0, 1.0].
pub fn random_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-1.0..1.0))
}

/// Plain `C = A(MxK) @ B(KxN)` accumulated in f64, as ground truth.
pub fn reference_matmul(a: &Array2<f32>, b: &Array2<f32>) -> Array2<f32> {
    let (m, k) = a.dim();
    let (k2, n) = b.dim();
    assert_eq!(k, k2, "ground truth dimension mismatch");

    let mut c = Array2::zeros((m, n));
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f64;
            for x in 0..k {
                sum += (a[[i, x]] as f64) * (b[[x, j]] as f64);
            }
            c[[i, j]] = sum as f32;
        }
    }
    c
}

/// Asserts that two matrices are close under an RMSE tolerance, printing a
/// sample of the worst offenders on failure.
pub fn assert_matrices_close(
    actual: &Array2<f32>,
    expected: &Array2<f32>,
    tolerance: f32,
    label: &str,
) {
    assert_eq!(actual.shape(), expected.shape(), "shape mismatch in {}", label);

    let diff = actual - expected;
    let mse = diff.mapv(|x| x.powi(2)).sum() / diff.len().max(1) as f32;
    let rmse = mse.sqrt();

    if rmse > tolerance {
        println!("failure in {}: RMSE {} > tolerance {}", label, rmse, tolerance);
        let mut count = 0;
        for ((idx, val_a), val_b) in actual.indexed_iter().zip(expected.iter()) {
            if (val_a - val_b).abs() > tolerance * 2.0 {
                println!(
                    "  [{:?}] actual: {:.5}, expected: {:.5}, diff: {:.5}",
                    idx,
                    val_a,
                    val_b,
                    (val_a - val_b).abs()
                );
                count += 1;
                if count > 10 {
                    break;
                }
            }
        }
        panic!("matrices not close enough");
    }
}

/// A minimal symmetric calibration for tests: zero-point fixed at mid-range
/// (`2^(bits-1)`), scale chosen per (group, column) so that every code lands
/// strictly inside `[1, max_code]`, which keeps the stored `zero - 1`
/// representable at any width.
pub fn calibrate_symmetric(
    weight: &Array2<f32>, // [out_features, in_features]
    groupsize: usize,
    bits: BitWidth,
) -> CalibrationParams {
    let (out_features, in_features) = weight.dim();
    let num_groups = (in_features + groupsize - 1) / groupsize;
    let zero = (1u32 << (bits.bits() - 1)) as f32;
    let half_range = zero - 1.0;

    let mut scales = Array2::<f32>::zeros((num_groups, out_features));
    for g in 0..num_groups {
        let k_lo = g * groupsize;
        let k_hi = (k_lo + groupsize).min(in_features);
        for n in 0..out_features {
            let mut max_abs = 0.0f32;
            for k in k_lo..k_hi {
                max_abs = max_abs.max(weight[(n, k)].abs());
            }
            scales[(g, n)] = if max_abs > 0.0 {
                max_abs / half_range.max(1.0)
            } else {
                1.0
            };
        }
    }

    CalibrationParams {
        scales,
        zeros: Array2::from_elem((num_groups, out_features), zero),
        g_idx: None,
    }
}
