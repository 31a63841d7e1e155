//! Block model shared by the translator, the block store and the editor adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod change;
pub mod hierarchy;
pub mod order;
pub mod section;

pub use change::{
    AppliedChangeSet, BlockInsert, BlockRef, BlockUpdate, ChangeSet, IdConfirmations, TempId,
};
pub use hierarchy::{LevelFix, correct_levels, plan_level_fixes};
pub use order::{OrderWindow, SortOrder};
pub use section::{
    Region, RegionTracker, SectionScope, ZoomMode, ZoomScope, aggregate_word_count,
    refresh_context, resolve_zoom, section_end, section_word_count, word_count,
};

pub type BlockId = Uuid;
pub type ProjectId = Uuid;

pub const MAX_HEADING_LEVEL: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockType {
    Paragraph,
    Heading,
    BulletList,
    OrderedList,
    ListItem,
    Blockquote,
    CodeBlock,
    HorizontalRule,
    SectionBreak,
    Bibliography,
    Table,
    Image,
}

impl BlockType {
    const ALL: [BlockType; 12] = [
        BlockType::Paragraph,
        BlockType::Heading,
        BlockType::BulletList,
        BlockType::OrderedList,
        BlockType::ListItem,
        BlockType::Blockquote,
        BlockType::CodeBlock,
        BlockType::HorizontalRule,
        BlockType::SectionBreak,
        BlockType::Bibliography,
        BlockType::Table,
        BlockType::Image,
    ];

    /// Stable numeric code used by the on-disk block table.
    pub fn code(self) -> u8 {
        Self::ALL
            .iter()
            .position(|kind| *kind == self)
            .map(|index| index as u8)
            .unwrap_or(0)
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn is_list(self) -> bool {
        matches!(self, BlockType::BulletList | BlockType::OrderedList)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SectionStatus {
    Todo,
    Writing,
    Review,
    Final,
}

impl SectionStatus {
    pub fn code(self) -> u8 {
        match self {
            SectionStatus::Todo => 0,
            SectionStatus::Writing => 1,
            SectionStatus::Review => 2,
            SectionStatus::Final => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SectionStatus::Todo),
            1 => Some(SectionStatus::Writing),
            2 => Some(SectionStatus::Review),
            3 => Some(SectionStatus::Final),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GoalType {
    #[default]
    Approximate,
    Minimum,
    Maximum,
}

impl GoalType {
    pub fn code(self) -> u8 {
        match self {
            GoalType::Approximate => 0,
            GoalType::Minimum => 1,
            GoalType::Maximum => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(GoalType::Approximate),
            1 => Some(GoalType::Minimum),
            2 => Some(GoalType::Maximum),
            _ => None,
        }
    }
}

/// Per-section metadata. Only meaningful on headings and pseudo-sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMeta {
    pub status: Option<SectionStatus>,
    pub tags: Vec<String>,
    pub word_goal: Option<u32>,
    pub goal_type: GoalType,
    pub aggregate_goal: Option<u32>,
    pub aggregate_goal_type: GoalType,
    /// Cached section-only word count, refreshed by the store on every write.
    pub word_count: u32,
}

impl SectionMeta {
    /// Metadata with the cached count cleared, used when identity is carried
    /// across a re-parse.
    pub fn carried(&self) -> Self {
        Self {
            word_count: 0,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: BlockId,
    pub project_id: ProjectId,
    pub parent_id: Option<BlockId>,
    pub sort_order: SortOrder,
    pub block_type: BlockType,
    pub heading_level: Option<u8>,
    pub markdown: String,
    pub text_content: String,
    pub is_pseudo_section: bool,
    pub is_notes: bool,
    pub is_bibliography: bool,
    pub meta: SectionMeta,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    pub fn new(
        project_id: ProjectId,
        block_type: BlockType,
        markdown: impl Into<String>,
        sort_order: SortOrder,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            parent_id: None,
            sort_order,
            block_type,
            heading_level: None,
            markdown: markdown.into(),
            text_content: String::new(),
            is_pseudo_section: false,
            is_notes: false,
            is_bibliography: false,
            meta: SectionMeta::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Headings and pseudo-sections both delimit sections.
    pub fn is_section_boundary(&self) -> bool {
        self.block_type == BlockType::Heading || self.is_pseudo_section
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Level used for section arithmetic. Pseudo-sections carry the level
    /// inherited from the preceding heading.
    pub fn level(&self) -> Option<u8> {
        if self.is_section_boundary() {
            Some(self.heading_level.unwrap_or(1).clamp(1, MAX_HEADING_LEVEL))
        } else {
            None
        }
    }

    /// Title used to match sections across a re-parse. Pseudo-sections have
    /// no heading text and match each other in document order.
    pub fn title(&self) -> Option<&str> {
        if self.block_type == BlockType::Heading {
            Some(self.text_content.as_str())
        } else if self.is_pseudo_section {
            Some("")
        } else {
            None
        }
    }

    /// Excluded from normal outline, zoom and hierarchy handling.
    pub fn is_excluded(&self) -> bool {
        self.is_notes || self.is_bibliography
    }
}

/// Root record of a project. Every block names it through `project_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }
}

/// Sorts blocks into document order.
pub fn sort_blocks(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| a.sort_order.cmp(&b.sort_order));
}
