#![no_main]
use florentine::events::{decode_with_fallback, strip_code_fence};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = strip_code_fence(text);
        let value = decode_with_fallback(text, &["type", "title"], Default::default);
        if !value.is_null() {
            assert!(value.get("type").is_some());
            assert!(value.get("title").is_some());
        }
    }
});
