#![no_main]

use libfuzzer_sys::fuzz_target;
use libra_effort::config::EffortConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Parsing and validating should not panic regardless of input
        if let Ok(config) = EffortConfig::from_toml_str(input) {
            let _ = config.validate();
        }
    }
});
