//! Rendered views handed to editing surfaces.

use crate::{annotate_blocks, assemble_with_ids};
use md_sections_core::{Block, BlockId};

/// The plain and the marker-annotated rendering of one set of blocks.
///
/// Both are built in the same constructor, so a surface can never be handed
/// one while the other is stale.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentView {
    markdown: String,
    annotated: String,
    ids: Vec<BlockId>,
    units: Vec<String>,
}

impl DocumentView {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let (markdown, ids) = assemble_with_ids(blocks);
        let units = blocks
            .iter()
            .filter(|block| block.is_top_level() && !block.markdown.trim().is_empty())
            .map(|block| block.markdown.clone())
            .collect();
        Self {
            markdown,
            annotated: annotate_blocks(blocks),
            ids,
            units,
        }
    }

    pub fn markdown(&self) -> &str {
        &self.markdown
    }

    pub fn annotated(&self) -> &str {
        &self.annotated
    }

    /// Ids of the assembled units, by position.
    pub fn ids(&self) -> &[BlockId] {
        &self.ids
    }

    /// Each assembled unit with its id, in order.
    pub fn units(&self) -> impl Iterator<Item = (BlockId, &str)> + '_ {
        self.ids
            .iter()
            .copied()
            .zip(self.units.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
