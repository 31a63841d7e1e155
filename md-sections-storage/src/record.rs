//! On-disk form of the block table, archived with rkyv.
//!
//! Ids travel as raw bytes, timestamps as epoch milliseconds and enums as
//! their stable numeric codes.

use crate::StorageError;
use chrono::{DateTime, Utc};
use md_sections_core::{
    Block, BlockType, GoalType, ProjectRecord, SectionMeta, SectionStatus, SortOrder,
};
use rkyv::{Archive, Deserialize, Serialize};
use uuid::Uuid;

pub(crate) const TABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub(crate) struct StoredProject {
    pub id: [u8; 16],
    pub title: String,
    pub created_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub(crate) struct StoredBlock {
    pub id: [u8; 16],
    pub project_id: [u8; 16],
    pub parent_id: Option<[u8; 16]>,
    pub sort_order: f64,
    pub block_type: u8,
    pub heading_level: Option<u8>,
    pub markdown: String,
    pub text_content: String,
    pub is_pseudo_section: bool,
    pub is_notes: bool,
    pub is_bibliography: bool,
    pub status: Option<u8>,
    pub tags: Vec<String>,
    pub word_goal: Option<u32>,
    pub goal_type: u8,
    pub aggregate_goal: Option<u32>,
    pub aggregate_goal_type: u8,
    pub word_count: u32,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub(crate) struct StoredTable {
    pub version: u32,
    pub project: Option<StoredProject>,
    pub blocks: Vec<StoredBlock>,
}

impl From<&ProjectRecord> for StoredProject {
    fn from(project: &ProjectRecord) -> Self {
        Self {
            id: *project.id.as_bytes(),
            title: project.title.clone(),
            created_at_ms: project.created_at.timestamp_millis(),
        }
    }
}

impl TryFrom<StoredProject> for ProjectRecord {
    type Error = StorageError;

    fn try_from(stored: StoredProject) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::from_bytes(stored.id),
            title: stored.title,
            created_at: timestamp(stored.created_at_ms)?,
        })
    }
}

impl From<&Block> for StoredBlock {
    fn from(block: &Block) -> Self {
        Self {
            id: *block.id.as_bytes(),
            project_id: *block.project_id.as_bytes(),
            parent_id: block.parent_id.map(|id| *id.as_bytes()),
            sort_order: block.sort_order.value(),
            block_type: block.block_type.code(),
            heading_level: block.heading_level,
            markdown: block.markdown.clone(),
            text_content: block.text_content.clone(),
            is_pseudo_section: block.is_pseudo_section,
            is_notes: block.is_notes,
            is_bibliography: block.is_bibliography,
            status: block.meta.status.map(SectionStatus::code),
            tags: block.meta.tags.clone(),
            word_goal: block.meta.word_goal,
            goal_type: block.meta.goal_type.code(),
            aggregate_goal: block.meta.aggregate_goal,
            aggregate_goal_type: block.meta.aggregate_goal_type.code(),
            word_count: block.meta.word_count,
            created_at_ms: block.created_at.timestamp_millis(),
            updated_at_ms: block.updated_at.timestamp_millis(),
        }
    }
}

impl TryFrom<StoredBlock> for Block {
    type Error = StorageError;

    fn try_from(stored: StoredBlock) -> Result<Self, Self::Error> {
        let status = match stored.status {
            Some(code) => Some(
                SectionStatus::from_code(code).ok_or(StorageError::Corrupt("section status"))?,
            ),
            None => None,
        };
        Ok(Self {
            id: Uuid::from_bytes(stored.id),
            project_id: Uuid::from_bytes(stored.project_id),
            parent_id: stored.parent_id.map(Uuid::from_bytes),
            sort_order: SortOrder::new(stored.sort_order),
            block_type: BlockType::from_code(stored.block_type)
                .ok_or(StorageError::Corrupt("block type"))?,
            heading_level: stored.heading_level,
            markdown: stored.markdown,
            text_content: stored.text_content,
            is_pseudo_section: stored.is_pseudo_section,
            is_notes: stored.is_notes,
            is_bibliography: stored.is_bibliography,
            meta: SectionMeta {
                status,
                tags: stored.tags,
                word_goal: stored.word_goal,
                goal_type: goal_type(stored.goal_type)?,
                aggregate_goal: stored.aggregate_goal,
                aggregate_goal_type: goal_type(stored.aggregate_goal_type)?,
                word_count: stored.word_count,
            },
            created_at: timestamp(stored.created_at_ms)?,
            updated_at: timestamp(stored.updated_at_ms)?,
        })
    }
}

fn goal_type(code: u8) -> Result<GoalType, StorageError> {
    GoalType::from_code(code).ok_or(StorageError::Corrupt("goal type"))
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_millis(millis).ok_or(StorageError::Corrupt("timestamp"))
}

pub(crate) fn encode<'a>(
    project: Option<&ProjectRecord>,
    blocks: impl Iterator<Item = &'a Block>,
) -> Result<Vec<u8>, StorageError> {
    let table = StoredTable {
        version: TABLE_VERSION,
        project: project.map(StoredProject::from),
        blocks: blocks.map(StoredBlock::from).collect(),
    };
    rkyv::to_bytes::<rkyv::rancor::Error>(&table)
        .map(|bytes| bytes.to_vec())
        .map_err(|_| StorageError::Corrupt("encode"))
}

pub(crate) fn decode(bytes: &[u8]) -> Result<(Option<ProjectRecord>, Vec<Block>), StorageError> {
    // Segment files are read into plain byte vectors; the archive needs alignment.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    let table = rkyv::from_bytes::<StoredTable, rkyv::rancor::Error>(&aligned)
        .map_err(|_| StorageError::Corrupt("decode"))?;
    if table.version != TABLE_VERSION {
        return Err(StorageError::Corrupt("table version"));
    }
    let project = table.project.map(ProjectRecord::try_from).transpose()?;
    let blocks = table
        .blocks
        .into_iter()
        .map(Block::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((project, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_survives_encoding() {
        let project = ProjectRecord::new("Novel");
        let mut block = Block::new(project.id, BlockType::Heading, "## Two", SortOrder::new(2.5));
        block.heading_level = Some(2);
        block.text_content = "Two".into();
        block.meta.status = Some(SectionStatus::Writing);
        block.meta.tags = vec!["act-1".into()];
        block.meta.word_goal = Some(1500);
        block.meta.goal_type = GoalType::Minimum;
        let mut child = Block::new(project.id, BlockType::ListItem, "- x", SortOrder::new(2.75));
        child.parent_id = Some(block.id);

        let bytes = encode(Some(&project), [&block, &child].into_iter()).unwrap();
        let (decoded_project, decoded) = decode(&bytes).unwrap();

        let decoded_project = decoded_project.unwrap();
        assert_eq!(decoded_project.id, project.id);
        assert_eq!(decoded_project.title, "Novel");
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].meta, block.meta);
        assert_eq!(decoded[0].sort_order, block.sort_order);
        assert_eq!(decoded[1].parent_id, Some(block.id));
        assert_eq!(
            decoded[0].created_at.timestamp_millis(),
            block.created_at.timestamp_millis()
        );
    }

    #[test]
    fn missing_project_is_preserved() {
        let bytes = encode(None, std::iter::empty()).unwrap();
        let (project, blocks) = decode(&bytes).unwrap();
        assert!(project.is_none());
        assert!(blocks.is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode(b"definitely not an archive").unwrap_err();
        match err {
            StorageError::Corrupt(_) => {}
            other => panic!("Expected corruption error, got {other:?}"),
        }
    }
}
