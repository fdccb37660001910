//! Property-based tests for the packing, compression and progress layers
//!
//! Properties covered:
//! 1. IdPair packing is exact and position-advancing
//! 2. CountingSink counts every write
//! 3. Lossless compression reconstructs any finite series
//! 4. Haar reconstruction error never shrinks as coefficients are dropped
//! 5. Listener firing cadence
//! 6. Call path ids are stable and dense

use libra_effort::callpath::{CallPathTable, RawFrame};
use libra_effort::pack::{make_id_pair, pack_all, unpack_all, CountingSink, IdPair, Packable};
use libra_effort::progress::{EffortAccumulator, EffortSnapshot};
use libra_effort::wavelet::{
    compress, decompress, CoefficientWeights, Threshold, WaveletConfig, WaveletKind,
};
use proptest::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_id_pair_round_trip(value in any::<f64>().prop_filter("finite", |v| v.is_finite()), id in any::<u64>()) {
        let pair = make_id_pair(value, id);
        let mut buf = vec![0u8; pair.packed_size()];
        let mut pos = 0;
        pair.pack(&mut buf, &mut pos).unwrap();
        prop_assert_eq!(pos, pair.packed_size());

        let mut read = 0;
        let back = IdPair::<f64>::unpack(&buf, &mut read).unwrap();
        prop_assert_eq!(back, pair);
        prop_assert_eq!(read, pos);
    }

    #[test]
    fn prop_concatenated_pairs(values in prop::collection::vec((any::<u32>(), any::<u64>()), 0..50)) {
        let pairs: Vec<IdPair<u32>> = values.iter().map(|(v, id)| make_id_pair(*v, *id)).collect();
        let buf = pack_all(&pairs).unwrap();
        prop_assert_eq!(buf.len(), 8 + pairs.len() * 12);
        let back: Vec<IdPair<u32>> = unpack_all(&buf).unwrap();
        prop_assert_eq!(back, pairs);
    }

    #[test]
    fn prop_truncated_buffers_never_panic(values in prop::collection::vec(any::<u64>(), 1..10), cut in 1usize..16) {
        let pairs: Vec<IdPair<u64>> = values.iter().map(|v| make_id_pair(*v, *v)).collect();
        let buf = pack_all(&pairs).unwrap();
        let cut = cut.min(buf.len());
        let result: Result<Vec<IdPair<u64>>, _> = unpack_all(&buf[..buf.len() - cut]);
        prop_assert!(result.is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_counting_sink_counts(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 0..20)) {
        let mut extended = CountingSink::new();
        let mut written = CountingSink::<u8>::new();
        let mut expected = 0;
        for chunk in &chunks {
            extended.extend(chunk.iter().copied());
            written.write_all(chunk).unwrap();
            expected += chunk.len();
        }
        prop_assert_eq!(extended.count(), expected);
        prop_assert_eq!(written.count(), expected);
    }
}

fn finite_series() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-1000.0f64..1000.0, 1..200)
}

/// Unpadded series, so the orthonormal error identity holds sample for sample
fn power_of_two_series() -> impl Strategy<Value = Vec<f64>> {
    (0u32..8).prop_flat_map(|k| prop::collection::vec(-1000.0f64..1000.0, 1usize << k))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_lossless_round_trip(series in finite_series(), cdf in any::<bool>()) {
        let kind = if cdf { WaveletKind::Cdf97 } else { WaveletKind::Haar };
        let config = WaveletConfig { kind, levels: None, threshold: Threshold::None };
        let sig = compress(&series, &config).unwrap();
        let back = decompress(&sig);

        prop_assert_eq!(back.len(), series.len());
        let scale = series.iter().fold(1.0f64, |m, v| m.max(v.abs()));
        for (a, b) in series.iter().zip(&back) {
            prop_assert!((a - b).abs() <= 1e-9 * scale, "{} vs {}", a, b);
        }
    }

    #[test]
    fn prop_haar_error_monotone(series in power_of_two_series(), fewer in 1usize..64, more in 1usize..64) {
        let (fewer, more) = (fewer.min(more), fewer.max(more));
        let err = |keep: usize| {
            let config = WaveletConfig { threshold: Threshold::KeepLargest(keep), ..WaveletConfig::default() };
            let back = decompress(&compress(&series, &config).unwrap());
            series.iter().zip(&back).map(|(a, b)| (a - b).powi(2)).sum::<f64>()
        };
        let energy: f64 = series.iter().map(|v| v * v).sum();
        prop_assert!(err(fewer) + 1e-9 * energy.max(1.0) >= err(more));
    }

    #[test]
    fn prop_distance_symmetric_and_zero_on_self(a in finite_series(), b in finite_series()) {
        let len = a.len().min(b.len());
        let config = WaveletConfig::default();
        let sa = compress(&a[..len], &config).unwrap();
        let sb = compress(&b[..len], &config).unwrap();
        for weights in [CoefficientWeights::Uniform, CoefficientWeights::CoarseBias(0.5)] {
            let ab = sa.distance(&sb, &weights).unwrap();
            let ba = sb.distance(&sa, &weights).unwrap();
            prop_assert!((ab - ba).abs() <= 1e-9 * ab.max(1.0));
            prop_assert_eq!(sa.distance(&sa, &weights).unwrap(), 0.0);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_listener_fires_every_k_steps(k in 1u64..10, steps in 0u64..60) {
        let mut acc = EffortAccumulator::new(false);
        acc.init_metrics(&["work"]).unwrap();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        acc.register_listener(Arc::new(move |s: &EffortSnapshot| sink.lock().unwrap().push(s.step)), k).unwrap();

        for _ in 0..steps {
            acc.advance_step();
        }
        let expected: Vec<u64> = (1..=steps).filter(|s| s % k == 0).collect();
        prop_assert_eq!(&*fired.lock().unwrap(), &expected);
    }

    #[test]
    fn prop_call_path_ids_dense_and_stable(offsets in prop::collection::vec(0u64..8, 1..40)) {
        let mut table = CallPathTable::new();
        let walks: Vec<Vec<RawFrame>> = offsets
            .iter()
            .map(|o| vec![RawFrame::unresolved("app", 0x100), RawFrame::unresolved("app", *o)])
            .collect();
        let ids: Vec<_> = walks.iter().map(|w| table.resolve(w)).collect();
        let again: Vec<_> = walks.iter().map(|w| table.resolve(w)).collect();
        prop_assert_eq!(&ids, &again);

        let mut distinct = offsets.clone();
        distinct.sort_unstable();
        distinct.dedup();
        prop_assert_eq!(table.len(), distinct.len() + 1);
        prop_assert!(ids.iter().all(|id| (id.as_u32() as usize) < table.len()));
    }
}
