#![no_main]
use libfuzzer_sys::fuzz_target;
use vspace::typeparse::{CTypeParser, TypeParser};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let parser = CTypeParser::new(8);
        let _ = parser.parse_type_string(text);
        let _ = parser.parse_types_from_string(text);
    }
});
