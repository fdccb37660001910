#![no_main]

use libfuzzer_sys::fuzz_target;
use libra_effort::pack::{pack_all, unpack_all, IdPair};
use libra_effort::wavelet::Signature;

fuzz_target!(|data: &[u8]| {
    // Arbitrary peer bytes must decode or fail, never panic
    if let Ok(pairs) = unpack_all::<IdPair<Signature>>(data) {
        // Anything accepted re-packs to the same bytes
        let repacked = pack_all(&pairs).expect("decoded signatures repack");
        assert_eq!(repacked, data);
    }
});
