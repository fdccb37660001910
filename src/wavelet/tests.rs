// Compressor tests: padding, thresholds, error behaviour
//
// Monotonicity and energy checks use Haar; CDF 9/7 is biorthogonal and only
// round-trips exactly.

use super::*;

fn signal(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 / 4.0;
            t.sin() * 5.0 + (t * 3.0).cos() + 10.0
        })
        .collect()
}

fn squared_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn with_threshold(threshold: Threshold) -> WaveletConfig {
    WaveletConfig {
        threshold,
        ..WaveletConfig::default()
    }
}

#[test]
fn test_empty_series_rejected() {
    assert_eq!(
        compress(&[], &WaveletConfig::default()),
        Err(WaveletError::EmptySeries)
    );
}

#[test]
fn test_non_finite_sample_rejected() {
    let err = compress(&[1.0, f64::NAN], &WaveletConfig::default()).unwrap_err();
    assert!(matches!(err, WaveletError::NonFinite { index: 1, .. }));
}

#[test]
fn test_invalid_relative_energy_rejected() {
    for f in [0.0, -0.5, 1.5, f64::NAN] {
        let err = compress(&[1.0, 2.0], &with_threshold(Threshold::RelativeEnergy(f)));
        assert!(matches!(err, Err(WaveletError::InvalidThreshold(_))));
    }
}

#[test]
fn test_lossless_round_trip_for_both_kinds() {
    for kind in [WaveletKind::Haar, WaveletKind::Cdf97] {
        for n in [1usize, 3, 16, 37, 128] {
            let series = signal(n);
            let config = WaveletConfig {
                kind,
                levels: None,
                threshold: Threshold::None,
            };
            let sig = compress(&series, &config).unwrap();
            let back = decompress(&sig);
            assert_eq!(back.len(), n);
            let scale = series.iter().map(|v| v.abs()).fold(1.0, f64::max);
            for (a, b) in series.iter().zip(&back) {
                assert!((a - b).abs() <= 1e-9 * scale, "{:?} n={}", kind, n);
            }
        }
    }
}

#[test]
fn test_padding_repeats_last_value() {
    assert_eq!(pad_to_power_of_two(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0, 3.0]);
    assert_eq!(pad_to_power_of_two(&[5.0]), vec![5.0]);
    assert_eq!(pad_to_power_of_two(&[1.0; 8]).len(), 8);

    let sig = compress(&signal(5), &WaveletConfig::default()).unwrap();
    assert_eq!(sig.original_len(), 5);
    assert_eq!(sig.padded_len(), 8);
    assert_eq!(decompress_padded(&sig).len(), 8);
}

#[test]
fn test_single_sample_series() {
    let sig = compress(&[4.5], &WaveletConfig::default()).unwrap();
    assert_eq!(sig.levels(), 0);
    assert_eq!(decompress(&sig), vec![4.5]);
}

#[test]
fn test_keep_largest_counts_and_ties_by_index() {
    let series = signal(64);
    let sig = compress(&series, &with_threshold(Threshold::KeepLargest(10))).unwrap();
    assert_eq!(sig.retained(), 10);

    // four equal-magnitude details: the two lowest indices win
    let coeffs = [0.0, 1.0, -1.0, 1.0, -1.0, 0.5, 0.0, 0.0];
    assert_eq!(select_retained(&coeffs, Threshold::KeepLargest(2)), vec![1, 2]);
    assert_eq!(
        select_retained(&coeffs, Threshold::KeepLargest(100)),
        vec![1, 2, 3, 4, 5]
    );
}

#[test]
fn test_relative_energy_keeps_coefficients_near_the_peak() {
    let coeffs = [3.0, 0.0, -4.0, 1.0];
    // peak energy 16: 9 >= 0.5 * 16, 1 is not
    assert_eq!(select_retained(&coeffs, Threshold::RelativeEnergy(0.5)), vec![0, 2]);
    assert_eq!(select_retained(&coeffs, Threshold::RelativeEnergy(1.0)), vec![2]);
    assert_eq!(
        select_retained(&coeffs, Threshold::RelativeEnergy(0.01)),
        vec![0, 2, 3]
    );
    assert!(select_retained(&[0.0; 4], Threshold::RelativeEnergy(0.5)).is_empty());
}

#[test]
fn test_default_threshold_compresses() {
    let sig = compress(&signal(64), &WaveletConfig::default()).unwrap();
    assert_eq!(sig.retained(), DEFAULT_KEEP);
}

#[test]
fn test_haar_error_equals_dropped_energy() {
    let series = signal(64);
    let full = compress(&series, &with_threshold(Threshold::None)).unwrap();
    let kept = compress(&series, &with_threshold(Threshold::KeepLargest(12))).unwrap();

    let dropped = full.energy() - kept.energy();
    let err = squared_error(&series, &decompress(&kept));
    assert!((err - dropped).abs() < 1e-8 * full.energy());
}

#[test]
fn test_error_non_decreasing_as_coefficients_dropped() {
    let series = signal(128);
    let mut previous = 0.0;
    for keep in (1..=128).rev().step_by(7) {
        let sig = compress(&series, &with_threshold(Threshold::KeepLargest(keep))).unwrap();
        let err = squared_error(&series, &decompress(&sig));
        assert!(err + 1e-9 >= previous, "keep={} err={} prev={}", keep, err, previous);
        previous = err;
    }
}

#[test]
fn test_compress_decompress_compress_is_idempotent() {
    let thresholds = [
        Threshold::None,
        Threshold::KeepLargest(9),
        Threshold::RelativeEnergy(0.001),
        Threshold::RelativeEnergy(0.2),
    ];
    let indices = |s: &Signature| s.coefficients().iter().map(|(i, _)| *i).collect::<Vec<_>>();

    for kind in [WaveletKind::Haar, WaveletKind::Cdf97] {
        for threshold in thresholds {
            let config = WaveletConfig {
                kind,
                levels: None,
                threshold,
            };
            let first = compress(&signal(64), &config).unwrap();
            let second = compress(&decompress(&first), &config).unwrap();

            assert_eq!(indices(&first), indices(&second), "{:?} {:?}", kind, threshold);
            for (a, b) in first.to_dense().iter().zip(second.to_dense()) {
                assert!((a - b).abs() < 1e-9, "{:?} {:?}", kind, threshold);
            }
        }
    }
}

#[test]
fn test_partial_depth_respected() {
    let config = WaveletConfig {
        levels: Some(2),
        ..WaveletConfig::default()
    };
    let sig = compress(&signal(32), &config).unwrap();
    assert_eq!(sig.levels(), 2);

    let deep = WaveletConfig {
        levels: Some(40),
        ..WaveletConfig::default()
    };
    assert_eq!(compress(&signal(32), &deep).unwrap().levels(), 5);
}

#[test]
fn test_nrmse() {
    assert_eq!(nrmse(&[0.0, 10.0], &[0.0, 10.0]), 0.0);
    assert!((nrmse(&[0.0, 10.0], &[1.0, 9.0]) - 0.1).abs() < 1e-12);
    // flat original falls back to plain rmse
    assert!((nrmse(&[2.0, 2.0], &[3.0, 3.0]) - 1.0).abs() < 1e-12);
    assert_eq!(nrmse(&[], &[]), 0.0);
}

#[test]
fn test_threshold_config_from_toml() {
    let config: WaveletConfig =
        toml::from_str("kind = \"cdf97\"\nthreshold = { mode = \"keep_largest\", value = 16 }\n")
            .unwrap();
    assert_eq!(config.kind, WaveletKind::Cdf97);
    assert_eq!(config.threshold, Threshold::KeepLargest(16));
    assert_eq!(config.levels, None);
}
