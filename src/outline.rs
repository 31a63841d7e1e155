//! The outline projection.

use crate::state::ContentStateMachine;
use md_sections_core::{BlockId, SectionStatus};
use md_sections_storage::BlockStore;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineEntry {
    pub id: BlockId,
    pub title: String,
    pub level: u8,
    pub is_pseudo_section: bool,
    pub status: Option<SectionStatus>,
    pub tags: Vec<String>,
    pub word_count: u32,
    /// Present for sections that have subsections.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_word_count: Option<u32>,
}

/// Outline entries for the whole project, or only for `members` while
/// zoomed.
pub fn outline_entries(store: &BlockStore, members: Option<&BTreeSet<BlockId>>) -> Vec<OutlineEntry> {
    let Some(project_id) = store.project_id() else {
        return Vec::new();
    };
    let sections = store.fetch_outline(project_id);
    let blocks = store.fetch_all();
    let mut entries = Vec::with_capacity(sections.len());
    for (index, block) in sections.iter().enumerate() {
        if members.is_some_and(|members| !members.contains(&block.id)) {
            continue;
        }
        let level = block.level().unwrap_or(1);
        let has_subsections = sections
            .get(index + 1)
            .and_then(|next| next.level())
            .is_some_and(|next| next > level);
        let position = blocks.iter().position(|candidate| candidate.id == block.id);
        let aggregate = position
            .filter(|_| has_subsections)
            .map(|position| md_sections_core::aggregate_word_count(&blocks, position));
        entries.push(OutlineEntry {
            id: block.id,
            title: block.title().unwrap_or_default().to_string(),
            level,
            is_pseudo_section: block.is_pseudo_section,
            status: block.meta.status,
            tags: block.meta.tags.clone(),
            word_count: position.map_or(block.meta.word_count, |position| {
                md_sections_core::section_word_count(&blocks, position)
            }),
            aggregate_word_count: aggregate,
        });
    }
    entries
}

/// Publishes outline snapshots to the display side.
///
/// Store changes arriving while an operation is running are dropped rather
/// than queued; the return to idle republishes once to recover them.
#[derive(Debug)]
pub struct OutlineProjection {
    feed: watch::Sender<Arc<Vec<OutlineEntry>>>,
    dropped: AtomicU64,
}

impl Default for OutlineProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl OutlineProjection {
    pub fn new() -> Self {
        let (feed, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            feed,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<OutlineEntry>>> {
        self.feed.subscribe()
    }

    pub fn current(&self) -> Arc<Vec<OutlineEntry>> {
        self.feed.borrow().clone()
    }

    /// Handles a store change. Returns whether it was published.
    pub fn consume(
        &self,
        state: &ContentStateMachine,
        entries: impl FnOnce() -> Vec<OutlineEntry>,
    ) -> bool {
        if !state.is_idle() {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(state = %state.current(), dropped, "outline update dropped");
            return false;
        }
        self.publish(entries());
        true
    }

    /// Publishes `entries` unless they equal what subscribers already have.
    pub fn publish(&self, entries: Vec<OutlineEntry>) -> bool {
        self.feed.send_if_modified(|current| {
            if **current == entries {
                return false;
            }
            *current = Arc::new(entries);
            true
        })
    }

    /// Updates dropped while not idle, since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ContentState;
    use std::time::Duration;

    fn store(markdown: &str) -> BlockStore {
        let mut store = BlockStore::in_memory("Test");
        store.replace_all(markdown, None).unwrap();
        store
    }

    #[test]
    fn entries_carry_counts_and_levels() {
        let store = store("# One\n\nthree words here\n\n## Two\n\ntwo words\n\n# Three");
        let entries = outline_entries(&store, None);
        let summary: Vec<_> = entries
            .iter()
            .map(|entry| (entry.title.as_str(), entry.level, entry.word_count, entry.aggregate_word_count))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("One", 1, 3, Some(5)),
                ("Two", 2, 2, None),
                ("Three", 1, 0, None),
            ]
        );
    }

    #[test]
    fn members_filter_the_outline() {
        let store = store("# One\n\n# Two");
        let two = store.fetch_all()[1].id;
        let members = BTreeSet::from([two]);
        let entries = outline_entries(&store, Some(&members));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, two);
    }

    #[test]
    fn serializes_camel_case() {
        let store = store("# One\n\nbody");
        let json = serde_json::to_value(&outline_entries(&store, None)[0]).unwrap();
        assert_eq!(json["wordCount"], 1);
        assert_eq!(json["isPseudoSection"], false);
        assert!(json.get("aggregateWordCount").is_none());
    }

    #[test]
    fn updates_are_dropped_while_busy() {
        let state = ContentStateMachine::new(Duration::from_secs(5));
        let projection = OutlineProjection::new();
        let store = store("# One");

        let transition = state.enter(ContentState::Reordering).unwrap();
        assert!(!projection.consume(&state, || outline_entries(&store, None)));
        assert!(projection.current().is_empty());
        assert_eq!(projection.dropped(), 1);

        transition.finish();
        assert!(projection.consume(&state, || outline_entries(&store, None)));
        assert_eq!(projection.current().len(), 1);
    }

    #[test]
    fn identical_snapshots_are_not_republished() {
        let projection = OutlineProjection::new();
        let store = store("# One");
        assert!(projection.publish(outline_entries(&store, None)));
        assert!(!projection.publish(outline_entries(&store, None)));
    }
}
