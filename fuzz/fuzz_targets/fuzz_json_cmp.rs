#![no_main]

use bmp_conformance::json_cmp_exact;
use libfuzzer_sys::fuzz_target;
use serde_json::Value;

fuzz_target!(|data: &[u8]| {
    let Some(split) = data.iter().position(|byte| *byte == b'\n') else {
        return;
    };
    let (Ok(actual), Ok(expected)) = (
        serde_json::from_slice::<Value>(&data[..split]),
        serde_json::from_slice::<Value>(&data[split + 1..]),
    ) else {
        return;
    };
    assert!(json_cmp_exact(&actual, &actual).is_none());
    if let Some(diff) = json_cmp_exact(&actual, &expected) {
        assert!(!diff.is_empty());
    }
});
