#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(decision) = explorer::routing::parse_decision(s) {
            assert!(decision.len() >= 1);
            assert!(decision.len() <= 3);
        }
    }
});
