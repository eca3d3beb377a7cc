#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(entries) = aiecc::parse_core_list(text) {
        let mut seen = std::collections::BTreeSet::new();
        for e in &entries {
            assert!(seen.insert(e.tile), "duplicate tile accepted: {}", e.tile);
        }
    }
});
