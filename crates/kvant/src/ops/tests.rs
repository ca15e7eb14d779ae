use ndarray::Array2;

use crate::error::KvantError;
use crate::ops::matmul::{matmul_2d_quant, matmul_2d_quant_t, TileConfig};
use crate::packing::BitWidth;
use crate::quantize::quantize_matrix;
use crate::tensor::QuantizedMatrix;
use crate::tests::common::{
    assert_matrices_close, calibrate_symmetric, random_matrix, reference_matmul,
};

/// Quantizes a random `[out, in]` weight for the given width and groupsize.
fn quantized_fixture(
    out_features: usize,
    in_features: usize,
    groupsize: usize,
    bits: BitWidth,
    seed: u64,
) -> (Array2<f32>, QuantizedMatrix) {
    let weight = random_matrix(out_features, in_features, seed);
    let params = calibrate_symmetric(&weight, groupsize, bits);
    let packed = quantize_matrix(&weight.view(), bits, groupsize, &params).unwrap();
    (weight, packed)
}

// ========================================================================
//  Forward kernel
// ========================================================================

#[test]
fn forward_matches_dequantized_reference() {
    let (_, b) = quantized_fixture(3, 8, 4, BitWidth::W4, 42);
    let a = random_matrix(4, 8, 43);

    // The kernel and the reference share the decoded weights, so the only
    // difference is accumulation order.
    let expected = reference_matmul(&a, &b.dequantize());
    let actual = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();

    assert_matrices_close(&actual, &expected, 1e-5, "forward vs dequantized reference");
}

#[test]
fn forward_tracks_the_dense_weight() {
    let (weight, b) = quantized_fixture(64, 128, 32, BitWidth::W8, 200);
    let a = random_matrix(5, 128, 201);

    // Against the original dense weight the error budget is quantization
    // noise, not kernel error.
    let expected = reference_matmul(&a, &weight.t().to_owned());
    let actual = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();

    assert_matrices_close(&actual, &expected, 0.05, "forward vs dense weight");
}

#[test]
fn forward_all_supported_widths() {
    for (bits, seed) in [(BitWidth::W2, 10), (BitWidth::W4, 11), (BitWidth::W8, 12)] {
        let (_, b) = quantized_fixture(16, 64, 16, bits, seed);
        let a = random_matrix(7, 64, seed + 100);

        let expected = reference_matmul(&a, &b.dequantize());
        let actual = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();

        assert_matrices_close(
            &actual,
            &expected,
            1e-4,
            &format!("forward at {} bits", b.bits.bits()),
        );
    }
}

#[test]
fn forward_boundary_tiles() {
    // Dimensions deliberately not multiples of the block sizes; every edge
    // of the output grid gets a partial tile.
    let cfg = TileConfig {
        block_m: 4,
        block_n: 4,
        block_k: 8,
        m_group: 2,
    };
    let (_, b) = quantized_fixture(13, 20, 4, BitWidth::W4, 77);
    let a = random_matrix(5, 20, 78);

    let expected = reference_matmul(&a, &b.dequantize());
    let actual = matmul_2d_quant(&a.view(), &b, cfg).unwrap();

    assert_matrices_close(&actual, &expected, 1e-5, "forward boundary tiles");
}

#[test]
fn tile_config_does_not_change_the_result() {
    let (_, b) = quantized_fixture(24, 48, 16, BitWidth::W4, 90);
    let a = random_matrix(9, 48, 91);

    let baseline = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();
    let configs = [
        TileConfig { block_m: 1, block_n: 1, block_k: 1, m_group: 1 },
        TileConfig { block_m: 3, block_n: 5, block_k: 7, m_group: 2 },
        TileConfig { block_m: 64, block_n: 64, block_k: 64, m_group: 8 },
        // Degenerate sizes clamp to 1 instead of panicking.
        TileConfig { block_m: 0, block_n: 0, block_k: 0, m_group: 0 },
    ];
    for cfg in configs {
        let out = matmul_2d_quant(&a.view(), &b, cfg).unwrap();
        assert_matrices_close(&out, &baseline, 1e-5, &format!("tile config {:?}", cfg));
    }
}

#[test]
fn forward_single_group_spans_all_features() {
    // groupsize == in_features, the "no grouping" case.
    let (_, b) = quantized_fixture(6, 32, 32, BitWidth::W4, 55);
    assert_eq!(b.num_groups(), 1);

    let a = random_matrix(3, 32, 56);
    let expected = reference_matmul(&a, &b.dequantize());
    let actual = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();

    assert_matrices_close(&actual, &expected, 1e-5, "single group forward");
}

// ========================================================================
//  Transposed kernel
// ========================================================================

#[test]
fn transposed_matches_dequantized_reference() {
    let (_, b) = quantized_fixture(3, 8, 4, BitWidth::W4, 42);
    let grad = random_matrix(4, 3, 60);

    let expected = reference_matmul(&grad, &b.dequantize().t().to_owned());
    let actual = matmul_2d_quant_t(&grad.view(), &b, TileConfig::default()).unwrap();

    assert_matrices_close(&actual, &expected, 1e-5, "transposed vs reference");
}

#[test]
fn transposed_boundary_tiles() {
    let cfg = TileConfig {
        block_m: 4,
        block_n: 8,
        block_k: 4,
        m_group: 2,
    };
    let (_, b) = quantized_fixture(19, 21, 7, BitWidth::W8, 81);
    let grad = random_matrix(6, 19, 82);

    let expected = reference_matmul(&grad, &b.dequantize().t().to_owned());
    let actual = matmul_2d_quant_t(&grad.view(), &b, cfg).unwrap();

    assert_matrices_close(&actual, &expected, 1e-4, "transposed boundary tiles");
}

#[test]
fn transposed_all_supported_widths() {
    for (bits, seed) in [(BitWidth::W2, 20), (BitWidth::W4, 21), (BitWidth::W8, 22)] {
        let (_, b) = quantized_fixture(32, 48, 16, bits, seed);
        let grad = random_matrix(5, 32, seed + 100);

        let expected = reference_matmul(&grad, &b.dequantize().t().to_owned());
        let actual = matmul_2d_quant_t(&grad.view(), &b, TileConfig::default()).unwrap();

        assert_matrices_close(
            &actual,
            &expected,
            1e-4,
            &format!("transposed at {} bits", b.bits.bits()),
        );
    }
}

// ========================================================================
//  Launch validation
// ========================================================================

#[test]
fn forward_rejects_mismatched_k() {
    let (_, b) = quantized_fixture(4, 8, 4, BitWidth::W4, 1);
    let a = random_matrix(2, 9, 2); // K = 9 != 8

    let err = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap_err();
    assert_eq!(
        err,
        KvantError::ShapeMismatch {
            axis: "input columns (in_features)",
            expected: 8,
            got: 9
        }
    );
}

#[test]
fn transposed_rejects_mismatched_n() {
    let (_, b) = quantized_fixture(4, 8, 4, BitWidth::W4, 1);
    let grad = random_matrix(2, 5, 2); // N = 5 != 4

    let err = matmul_2d_quant_t(&grad.view(), &b, TileConfig::default()).unwrap_err();
    assert!(matches!(err, KvantError::ShapeMismatch { .. }));
}

#[test]
fn corrupted_group_index_fails_before_launch() {
    let (_, mut b) = quantized_fixture(4, 8, 4, BitWidth::W4, 1);
    b.g_idx[3] = 99;

    let a = random_matrix(2, 8, 2);
    let err = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap_err();
    assert_eq!(
        err,
        KvantError::GroupIndexOutOfRange {
            index: 99,
            num_groups: 2
        }
    );
}

#[test]
fn empty_batch_yields_empty_output() {
    let (_, b) = quantized_fixture(4, 8, 4, BitWidth::W4, 1);
    let a = Array2::<f32>::zeros((0, 8));

    let out = matmul_2d_quant(&a.view(), &b, TileConfig::default()).unwrap();
    assert_eq!(out.dim(), (0, 4));
}
