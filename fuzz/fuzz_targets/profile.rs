#![no_main]

use aotscope::compiler::{ProfileEntries, ProfileGate, ProfileOptions};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let profile = ProfileEntries::parse(text);
    if let Some(entries) = &profile {
        assert!(entries.total_samples() > 0);
    }
    let gate = ProfileGate::new(profile, ProfileOptions::default());
    let _ = gate.should_skip("Ljava/lang/Object;.<init>");
});
