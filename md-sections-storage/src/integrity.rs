use crate::BlockTable;
use md_sections_core::{BlockId, ProjectId, ProjectRecord};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub root_missing: bool,
    /// Children whose parent pointer names a block that does not exist.
    pub orphans: Vec<BlockId>,
    /// Blocks naming a project other than the root record's.
    pub foreign_blocks: Vec<BlockId>,
    pub project_ids: BTreeSet<ProjectId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        !self.root_missing && self.orphans.is_empty() && self.foreign_blocks.is_empty()
    }
}

/// Where a repaired project identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentitySource {
    Root,
    NestedContent,
    TopLevelContent,
    Minted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub project_id: ProjectId,
    pub source: IdentitySource,
    pub recreated_root: bool,
    pub removed_orphans: usize,
    pub reassigned: usize,
}

pub(crate) fn inspect(project: Option<&ProjectRecord>, table: &BlockTable) -> IntegrityReport {
    let mut report = IntegrityReport {
        root_missing: project.is_none(),
        ..IntegrityReport::default()
    };
    for block in table.iter() {
        report.project_ids.insert(block.project_id);
        if let Some(parent) = block.parent_id {
            if !table.contains(&parent) {
                report.orphans.push(block.id);
            }
        }
        if let Some(project) = project {
            if block.project_id != project.id {
                report.foreign_blocks.push(block.id);
            }
        }
    }
    report
}

/// Picks the project id most blocks agree on, preferring nested content over
/// top-level blocks, and mints one only when no block survives.
pub(crate) fn recover_project_id(table: &BlockTable) -> (ProjectId, IdentitySource) {
    let nested = most_common(table.iter().filter(|block| !block.is_top_level()).map(|block| block.project_id));
    if let Some(id) = nested {
        return (id, IdentitySource::NestedContent);
    }
    let top_level = most_common(table.iter().map(|block| block.project_id));
    if let Some(id) = top_level {
        return (id, IdentitySource::TopLevelContent);
    }
    (Uuid::new_v4(), IdentitySource::Minted)
}

/// Most frequent id; ties go to the one seen first.
fn most_common(ids: impl Iterator<Item = ProjectId>) -> Option<ProjectId> {
    let mut counts: HashMap<ProjectId, (usize, usize)> = HashMap::new();
    for (seen, id) in ids.enumerate() {
        counts.entry(id).or_insert((0, seen)).0 += 1;
    }
    counts
        .into_iter()
        .max_by(|(_, (count_a, first_a)), (_, (count_b, first_b))| {
            count_a.cmp(count_b).then(first_b.cmp(first_a))
        })
        .map(|(id, _)| id)
}
