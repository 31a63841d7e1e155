#![no_main]

use libfuzzer_sys::fuzz_target;
use md_sections_core::OrderWindow;
use md_sections_storage::BlockStore;
use md_sections_sync::{EditorAdapter, TreeAdapter, ValidationLimits, validate_change_set};

const WORDS: [&str; 8] = ["# Head", "## Sub", "body", "- item", "> quote", "1. step", "<!-- ::break:: -->", "text\n\nmore"];

fuzz_target!(|data: &[u8]| {
    let mut store = BlockStore::in_memory("Fuzz");
    if store.replace_all("# One\n\nbody\n\n# Two\n\nmore", None).is_err() {
        return;
    }
    let mut adapter = TreeAdapter::new();
    if adapter.load_with_ids(&store.view(OrderWindow::unbounded())).is_err() {
        return;
    }

    for round in data.chunks(8) {
        for op in round.chunks(2) {
            let index = op.get(1).copied().unwrap_or(0) as usize;
            let word = WORDS[(op[0] / 3) as usize % WORDS.len()];
            match op[0] % 3 {
                0 => {
                    adapter.edit(index % adapter.nodes().len().max(1), word);
                }
                1 => adapter.insert(index, word),
                _ => {
                    adapter.remove(index % adapter.nodes().len().max(1));
                }
            }
        }

        let changes = adapter.get_change_set();
        if validate_change_set(&changes, &ValidationLimits::default()).is_err() {
            continue;
        }
        let applied = store.apply_change_set(&changes, None).unwrap();
        if applied.needs_reload() {
            adapter
                .load_with_ids(&store.view(OrderWindow::unbounded()))
                .unwrap();
        } else {
            adapter.confirm_ids(&applied.confirmations);
        }
        assert_eq!(store.document(), adapter.content());
    }
});
