#![no_main]

use libfuzzer_sys::fuzz_target;
use md_sections_doc::{Parser, assemble};
use md_sections_storage::BlockStore;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let fragments = Parser::parse(&input);
    let _ = assemble(&fragments);

    let mut store = BlockStore::in_memory("Fuzz");
    if store.replace_all(&input, None).is_ok() {
        let first = store.document();
        store.replace_all(&first, None).unwrap();
        assert_eq!(store.document(), first);
    }
});
