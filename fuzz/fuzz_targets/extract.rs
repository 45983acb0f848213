#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_syntax::extract_params;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(params) = extract_params(s) {
            for param in &params {
                assert!(!param.name.is_empty());
                assert!(!param.alias.is_empty());
            }
        }
    }
});
