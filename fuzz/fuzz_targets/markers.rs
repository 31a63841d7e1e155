#![no_main]

use libfuzzer_sys::fuzz_target;
use md_sections_doc::{extract_segments, strip_markers};

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let stripped = strip_markers(&input);
    assert_eq!(strip_markers(&stripped), stripped);
    let _ = extract_segments(&input);
});
