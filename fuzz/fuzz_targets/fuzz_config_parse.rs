#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<explorer::Config>(s) {
            // Validation must reject bad values, never panic on them.
            let _ = config.validate();
        }
    }
});
