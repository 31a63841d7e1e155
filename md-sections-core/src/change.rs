//! Change-sets reported by editor adapters and the result of applying one.

use crate::BlockId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Provisional identity an adapter gives a unit it created, until the store
/// assigns a permanent one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TempId(pub u64);

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTempIdError;

impl fmt::Display for ParseTempIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("expected tmp-<n>")
    }
}

impl std::error::Error for ParseTempIdError {}

impl FromStr for TempId {
    type Err = ParseTempIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix("tmp-")
            .and_then(|digits| digits.parse().ok())
            .map(TempId)
            .ok_or(ParseTempIdError)
    }
}

/// Anchor for an insert. Temp anchors resolve against earlier inserts of the
/// same change-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "id")]
pub enum BlockRef {
    Permanent(BlockId),
    Temp(TempId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUpdate {
    pub id: BlockId,
    pub markdown: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInsert {
    pub temp_id: TempId,
    pub markdown: String,
    /// `None` places the block at the start of the current scope.
    pub after: Option<BlockRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub updates: Vec<BlockUpdate>,
    pub inserts: Vec<BlockInsert>,
    pub deletes: Vec<BlockId>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty() && self.deletes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.updates.len() + self.inserts.len() + self.deletes.len()
    }
}

pub type IdConfirmations = BTreeMap<TempId, BlockId>;

/// Outcome of a committed change-set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedChangeSet {
    pub confirmations: IdConfirmations,
    pub updated: usize,
    pub inserted: usize,
    pub deleted: usize,
    /// Updates naming an id the store did not know, applied as inserts.
    pub converted: usize,
    /// A single reported unit parsed into several blocks, so the adapter's
    /// view no longer lines up one-to-one with the store.
    pub reshaped: bool,
    /// The store renumbered every block because a midpoint ran out of room.
    pub rebalanced: bool,
}

impl AppliedChangeSet {
    /// Net change in the number of top-level blocks.
    pub fn count_delta(&self) -> isize {
        (self.inserted + self.converted) as isize - self.deleted as isize
    }

    /// Whether the adapter must be reloaded from the store instead of just
    /// having its temp ids confirmed.
    pub fn needs_reload(&self) -> bool {
        self.reshaped || self.rebalanced
    }
}
