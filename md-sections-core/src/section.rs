//! Section arithmetic over blocks in document order.
//!
//! Every function here takes the project's blocks already sorted by
//! [`SortOrder`](crate::SortOrder). Child blocks (list items) never delimit a
//! section and never count twice toward word totals.

use crate::{Block, BlockId, BlockType, SortOrder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ZoomMode {
    /// Include every structurally nested heading and pseudo-section.
    Full,
    /// Stop at the very next heading of any level.
    Shallow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionScope {
    /// Up to the next boundary of any level.
    Own,
    /// Up to the next non-pseudo heading at the same or a shallower level.
    Nested,
}

/// Exclusive end index of the section that starts at `index`.
pub fn section_end(blocks: &[Block], index: usize, scope: SectionScope) -> usize {
    let Some(target) = blocks.get(index) else {
        return blocks.len();
    };
    let Some(level) = target.level() else {
        return (index + 1).min(blocks.len());
    };

    for (position, block) in blocks.iter().enumerate().skip(index + 1) {
        if !block.is_top_level() {
            continue;
        }
        let Some(other) = block.level() else {
            continue;
        };
        match scope {
            SectionScope::Own => return position,
            SectionScope::Nested => {
                // Pseudo-sections belong to the heading before them, never end it.
                if block.is_pseudo_section && !target.is_pseudo_section {
                    continue;
                }
                if other <= level {
                    return position;
                }
            }
        }
    }
    blocks.len()
}

pub fn word_count(text: &str) -> u32 {
    text.unicode_words().count() as u32
}

fn body_words(blocks: &[Block], range: Range<usize>, include_excluded: bool) -> u32 {
    blocks[range]
        .iter()
        .filter(|block| block.is_top_level() && !block.is_section_boundary())
        .filter(|block| include_excluded || !block.is_excluded())
        .map(|block| word_count(&block.text_content))
        .sum()
}

/// Words from a boundary to the next boundary of any level.
pub fn section_word_count(blocks: &[Block], index: usize) -> u32 {
    let Some(target) = blocks.get(index) else {
        return 0;
    };
    let end = section_end(blocks, index, SectionScope::Own);
    body_words(blocks, index + 1..end, target.is_excluded())
}

/// Words from a boundary through all of its descendants.
pub fn aggregate_word_count(blocks: &[Block], index: usize) -> u32 {
    let Some(target) = blocks.get(index) else {
        return 0;
    };
    let end = section_end(blocks, index, SectionScope::Nested);
    body_words(blocks, index + 1..end, target.is_excluded())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Notes,
    Bibliography,
}

impl Region {
    pub fn from_title(title: &str) -> Option<Region> {
        match title.trim().to_lowercase().as_str() {
            "notes" => Some(Region::Notes),
            "bibliography" | "references" => Some(Region::Bibliography),
            _ => None,
        }
    }
}

/// Tracks the notes/bibliography region while walking blocks in order.
#[derive(Debug, Default, Clone)]
pub struct RegionTracker {
    active: Option<(Region, u8)>,
}

impl RegionTracker {
    /// Feeds a heading and returns the region it opens or continues.
    pub fn enter_heading(&mut self, level: u8, title: &str) -> Option<Region> {
        if let Some((_, active_level)) = self.active {
            if level <= active_level {
                self.active = None;
            }
        }
        if let Some(region) = Region::from_title(title) {
            self.active = Some((region, level));
        }
        self.current()
    }

    pub fn current(&self) -> Option<Region> {
        self.active.map(|(region, _)| region)
    }
}

/// Re-derives the fields that depend on preceding blocks: pseudo-section
/// levels and notes/bibliography flags. Children follow their parent.
pub fn refresh_context(blocks: &mut [Block]) {
    let mut regions = RegionTracker::default();
    let mut last_level = 1u8;
    let mut parents: HashMap<BlockId, (bool, bool)> = HashMap::new();
    for block in blocks.iter_mut().filter(|block| block.is_top_level()) {
        let region = if block.block_type == BlockType::Heading {
            let level = block.heading_level.unwrap_or(1);
            last_level = level;
            regions.enter_heading(level, &block.text_content)
        } else {
            if block.is_pseudo_section {
                block.heading_level = Some(last_level);
            }
            regions.current()
        };
        block.is_notes = region == Some(Region::Notes);
        block.is_bibliography =
            region == Some(Region::Bibliography) || block.block_type == BlockType::Bibliography;
        parents.insert(block.id, (block.is_notes, block.is_bibliography));
    }
    for block in blocks.iter_mut() {
        if let Some((notes, bibliography)) = block.parent_id.and_then(|id| parents.get(&id)) {
            block.is_notes = *notes;
            block.is_bibliography = *bibliography;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoomScope {
    pub heading_id: BlockId,
    pub mode: ZoomMode,
    pub start: SortOrder,
    /// Order of the first block after the window, absent at document end.
    pub end: Option<SortOrder>,
    /// The block sitting at `end`.
    pub end_anchor: Option<BlockId>,
    pub members: BTreeSet<BlockId>,
}

/// Resolves the window for zooming into `heading_id`.
///
/// The display subset and the store range both come from this one walk.
pub fn resolve_zoom(blocks: &[Block], heading_id: BlockId, mode: ZoomMode) -> Option<ZoomScope> {
    let index = blocks.iter().position(|block| block.id == heading_id)?;
    let target = &blocks[index];
    if !target.is_section_boundary() || !target.is_top_level() {
        return None;
    }

    let end_index = match mode {
        ZoomMode::Full => section_end(blocks, index, SectionScope::Nested),
        ZoomMode::Shallow => section_end(blocks, index, SectionScope::Own),
    };

    let mut members: BTreeSet<BlockId> = blocks[index..end_index]
        .iter()
        .map(|block| block.id)
        .collect();
    loop {
        let before = members.len();
        for block in blocks {
            if let Some(parent) = block.parent_id {
                if members.contains(&parent) {
                    members.insert(block.id);
                }
            }
        }
        if members.len() == before {
            break;
        }
    }

    let boundary = blocks.get(end_index);
    Some(ZoomScope {
        heading_id,
        mode,
        start: target.sort_order,
        end: boundary.map(|block| block.sort_order),
        end_anchor: boundary.map(|block| block.id),
        members,
    })
}
