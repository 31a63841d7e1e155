//! Editor adapters.
//!
//! Both editing surfaces sit behind [`EditorAdapter`]: the store only ever
//! sees change-sets coming out and views going in. [`TreeAdapter`] diffs
//! native block nodes; [`MarkerAdapter`] scans flat text for identity markers.

use md_sections_core::{BlockRef, ChangeSet, IdConfirmations, TempId};
use md_sections_doc::DocumentView;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

mod marker;
mod tracker;
mod tree;

pub use marker::MarkerAdapter;
pub use tree::{NodeKey, TreeAdapter, TreeNode};

/// Which kind of editing surface an adapter fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Surface {
    Tree,
    Marker,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Tree => f.write_str("tree"),
            Surface::Marker => f.write_str("marker"),
        }
    }
}

/// Whether a surface took new content synchronously or will acknowledge it
/// later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Applied,
    AwaitingAck,
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("surface rejected content: {0}")]
    Rejected(String),
    #[error("surface is detached")]
    Detached,
}

/// Contract between an editing surface and the sync service.
///
/// `get_change_set` must work from the adapter's local state alone. The
/// adapter remembers what it reported; `confirm_ids` commits that report as
/// the new baseline. A report that is never confirmed (because applying it
/// failed) is simply reported again on the next poll.
pub trait EditorAdapter: Send {
    fn surface(&self) -> Surface;

    /// Differences between the surface and the last confirmed baseline.
    fn get_change_set(&mut self) -> ChangeSet;

    /// Swaps temp ids for permanent ones and adopts the last report as the
    /// baseline. Content is not touched.
    fn confirm_ids(&mut self, confirmations: &IdConfirmations);

    /// Replaces everything on the surface with `view`, every unit already
    /// carrying its id. Nothing unidentified is ever visible to a poll.
    fn load_with_ids(&mut self, view: &DocumentView) -> Result<LoadStatus, AdapterError>;

    /// The surface's text with identity markers removed.
    fn content(&self) -> String;
}

/// Problems that make a change-set unsafe to apply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("change-set has {actual} entries, limit is {limit}")]
    TooManyEntries { limit: usize, actual: usize },
    #[error("unit of {actual} bytes exceeds limit of {limit}")]
    UnitTooLarge { limit: usize, actual: usize },
    #[error("temp id {0} is inserted twice")]
    DuplicateTemp(TempId),
    #[error("insert {insert} is anchored to {anchor}, which is not inserted before it")]
    DanglingTempAnchor { insert: TempId, anchor: TempId },
}

/// Size limits for a single change-set. Deletions are never limited.
#[derive(Debug, Clone)]
pub struct ValidationLimits {
    pub max_entries: usize,
    pub max_unit_bytes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
            max_unit_bytes: 10 * 1024 * 1024, // 10 MB
        }
    }
}

/// Checks a change-set before it is handed to the store.
pub fn validate_change_set(
    changes: &ChangeSet,
    limits: &ValidationLimits,
) -> Result<(), ValidationError> {
    let entries = changes.updates.len() + changes.inserts.len();
    if entries > limits.max_entries {
        return Err(ValidationError::TooManyEntries {
            limit: limits.max_entries,
            actual: entries,
        });
    }

    let units = changes
        .updates
        .iter()
        .map(|update| update.markdown.len())
        .chain(changes.inserts.iter().map(|insert| insert.markdown.len()));
    for actual in units {
        if actual > limits.max_unit_bytes {
            return Err(ValidationError::UnitTooLarge {
                limit: limits.max_unit_bytes,
                actual,
            });
        }
    }

    let mut inserted: HashSet<TempId> = HashSet::new();
    for insert in &changes.inserts {
        if let Some(BlockRef::Temp(anchor)) = insert.after {
            if !inserted.contains(&anchor) {
                return Err(ValidationError::DanglingTempAnchor {
                    insert: insert.temp_id,
                    anchor,
                });
            }
        }
        if !inserted.insert(insert.temp_id) {
            return Err(ValidationError::DuplicateTemp(insert.temp_id));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_sections_core::{BlockInsert, BlockUpdate};
    use uuid::Uuid;

    fn insert(temp: u64, after: Option<BlockRef>) -> BlockInsert {
        BlockInsert {
            temp_id: TempId(temp),
            markdown: "text".into(),
            after,
        }
    }

    #[test]
    fn whole_document_deletion_is_valid() {
        let changes = ChangeSet {
            deletes: (0..500).map(|_| Uuid::new_v4()).collect(),
            ..ChangeSet::default()
        };
        assert!(validate_change_set(&changes, &ValidationLimits::default()).is_ok());
    }

    #[test]
    fn deletions_past_the_entry_limit_are_valid() {
        let changes = ChangeSet {
            deletes: (0..11).map(|_| Uuid::new_v4()).collect(),
            ..ChangeSet::default()
        };
        let limits = ValidationLimits {
            max_entries: 10,
            ..Default::default()
        };
        assert!(validate_change_set(&changes, &limits).is_ok());

        let changes = ChangeSet {
            deletes: (0..100_001).map(|_| Uuid::new_v4()).collect(),
            ..ChangeSet::default()
        };
        assert!(validate_change_set(&changes, &ValidationLimits::default()).is_ok());
    }

    #[test]
    fn entry_limit() {
        let changes = ChangeSet {
            updates: (0..6)
                .map(|_| BlockUpdate {
                    id: Uuid::new_v4(),
                    markdown: "text".into(),
                })
                .collect(),
            inserts: (0..5).map(|temp| insert(temp, None)).collect(),
            deletes: vec![Uuid::new_v4(); 3],
        };
        let limits = ValidationLimits {
            max_entries: 10,
            ..Default::default()
        };
        assert!(matches!(
            validate_change_set(&changes, &limits),
            Err(ValidationError::TooManyEntries { limit: 10, actual: 11 })
        ));
    }

    #[test]
    fn unit_size_limit() {
        let changes = ChangeSet {
            updates: vec![BlockUpdate {
                id: Uuid::new_v4(),
                markdown: "x".repeat(1001),
            }],
            ..ChangeSet::default()
        };
        let limits = ValidationLimits {
            max_unit_bytes: 1000,
            ..Default::default()
        };
        assert!(matches!(
            validate_change_set(&changes, &limits),
            Err(ValidationError::UnitTooLarge { limit: 1000, .. })
        ));
    }

    #[test]
    fn temp_anchors_must_point_backwards() {
        let changes = ChangeSet {
            inserts: vec![insert(1, Some(BlockRef::Temp(TempId(2)))), insert(2, None)],
            ..ChangeSet::default()
        };
        assert_eq!(
            validate_change_set(&changes, &ValidationLimits::default()),
            Err(ValidationError::DanglingTempAnchor {
                insert: TempId(1),
                anchor: TempId(2)
            })
        );

        let chained = ChangeSet {
            inserts: vec![insert(1, None), insert(2, Some(BlockRef::Temp(TempId(1))))],
            ..ChangeSet::default()
        };
        assert!(validate_change_set(&chained, &ValidationLimits::default()).is_ok());
    }

    #[test]
    fn duplicate_temps_are_rejected() {
        let changes = ChangeSet {
            inserts: vec![insert(1, None), insert(1, None)],
            ..ChangeSet::default()
        };
        assert_eq!(
            validate_change_set(&changes, &ValidationLimits::default()),
            Err(ValidationError::DuplicateTemp(TempId(1)))
        );
    }
}
