//! Identity carried across a re-parse.
//!
//! Sections are matched by title, first match wins, and every prior identity
//! is handed out at most once.

use chrono::{DateTime, Utc};
use md_sections_core::{Block, BlockId, SectionMeta};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarriedIdentity {
    pub id: BlockId,
    pub meta: SectionMeta,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityHints {
    by_title: HashMap<String, VecDeque<CarriedIdentity>>,
}

impl IdentityHints {
    /// Collects the headings and pseudo-sections of `blocks`, in order.
    pub fn from_blocks<'a>(blocks: impl IntoIterator<Item = &'a Block>) -> Self {
        let mut hints = Self::default();
        for block in blocks {
            if let Some(title) = block.title() {
                hints.push(
                    title,
                    CarriedIdentity {
                        id: block.id,
                        meta: block.meta.carried(),
                        created_at: block.created_at,
                    },
                );
            }
        }
        hints
    }

    pub fn push(&mut self, title: &str, identity: CarriedIdentity) {
        self.by_title
            .entry(title.to_string())
            .or_default()
            .push_back(identity);
    }

    /// Takes the earliest unconsumed identity recorded under `title`.
    pub fn claim(&mut self, title: &str) -> Option<CarriedIdentity> {
        let queue = self.by_title.get_mut(title)?;
        let identity = queue.pop_front();
        if queue.is_empty() {
            self.by_title.remove(title);
        }
        identity
    }

    pub fn len(&self) -> usize {
        self.by_title.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_title.is_empty()
    }

    /// Merges `other` in after this set's own entries.
    pub fn extend(&mut self, other: IdentityHints) {
        for (title, queue) in other.by_title {
            self.by_title.entry(title).or_default().extend(queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_sections_core::{BlockType, SectionStatus, SortOrder};
    use uuid::Uuid;

    fn heading(title: &str) -> Block {
        let mut block = Block::new(
            Uuid::nil(),
            BlockType::Heading,
            format!("# {title}"),
            SortOrder::ZERO,
        );
        block.heading_level = Some(1);
        block.text_content = title.to_string();
        block
    }

    #[test]
    fn duplicate_titles_are_claimed_in_order() {
        let first = heading("Same");
        let second = heading("Same");
        let mut hints = IdentityHints::from_blocks([&first, &second]);
        assert_eq!(hints.len(), 2);
        assert_eq!(hints.claim("Same").map(|carried| carried.id), Some(first.id));
        assert_eq!(hints.claim("Same").map(|carried| carried.id), Some(second.id));
        assert!(hints.claim("Same").is_none());
        assert!(hints.is_empty());
    }

    #[test]
    fn metadata_travels_without_cached_count() {
        let mut block = heading("Intro");
        block.meta.status = Some(SectionStatus::Final);
        block.meta.word_count = 99;
        let mut hints = IdentityHints::from_blocks([&block]);
        let carried = hints.claim("Intro").unwrap();
        assert_eq!(carried.meta.status, Some(SectionStatus::Final));
        assert_eq!(carried.meta.word_count, 0);
        assert_eq!(carried.created_at, block.created_at);
    }

    #[test]
    fn paragraphs_are_not_hints() {
        let para = Block::new(Uuid::nil(), BlockType::Paragraph, "x", SortOrder::ZERO);
        assert!(IdentityHints::from_blocks([&para]).is_empty());
    }
}
