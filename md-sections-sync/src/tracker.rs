//! Baseline bookkeeping shared by both adapters.
//!
//! The baseline is what the store is known to hold: one markdown string per
//! permanent id. A diff compares the surface against it and is held as the
//! outstanding report until the store confirms it.

use md_sections_core::{
    BlockId, BlockInsert, BlockRef, BlockUpdate, ChangeSet, IdConfirmations, TempId,
};
use md_sections_doc::{DocumentView, Parser};
use std::collections::{HashMap, HashSet};

/// What a surface says a stretch of its content is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Known(BlockId),
    Temp(TempId),
    Fresh,
}

/// Exactly one block's markdown and the identity it travels under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Unit {
    pub key: BlockRef,
    pub markdown: String,
}

#[derive(Debug, Default)]
pub(crate) struct Tracker {
    baseline: HashMap<BlockId, String>,
    order: Vec<BlockId>,
    reported: Option<Vec<Unit>>,
    next_temp: u64,
}

impl Tracker {
    /// Adopts `view` as both the surface content and the baseline.
    pub fn load(&mut self, view: &DocumentView) -> Vec<Unit> {
        self.baseline.clear();
        self.order.clear();
        self.reported = None;
        let mut units = Vec::new();
        for (id, markdown) in view.units() {
            self.baseline.insert(id, markdown.to_string());
            self.order.push(id);
            units.push(Unit {
                key: BlockRef::Permanent(id),
                markdown: markdown.to_string(),
            });
        }
        units
    }

    /// Diffs claimed stretches of surface content against the baseline.
    ///
    /// Each stretch is split into blocks: the first keeps the claim, the
    /// rest become inserts chained after it. Returns the change-set and the
    /// surface content normalised to one unit per block.
    pub fn diff(&mut self, stretches: impl IntoIterator<Item = (Claim, String)>) -> (ChangeSet, Vec<Unit>) {
        let mut changes = ChangeSet::default();
        let mut units = Vec::new();
        let mut seen: HashSet<BlockId> = HashSet::new();
        let mut temps: HashSet<TempId> = HashSet::new();
        let mut previous: Option<BlockRef> = None;

        for (claim, text) in stretches {
            let mut pieces = Parser::parse_unit(&text)
                .into_iter()
                .map(|fragment| fragment.markdown);
            let Some(first) = pieces.next() else {
                continue;
            };

            let key = match claim {
                Claim::Known(id) if self.baseline.contains_key(&id) && seen.insert(id) => {
                    if self.baseline.get(&id) != Some(&first) {
                        changes.updates.push(BlockUpdate {
                            id,
                            markdown: first.clone(),
                        });
                    }
                    BlockRef::Permanent(id)
                }
                Claim::Temp(temp) if temps.insert(temp) => {
                    self.next_temp = self.next_temp.max(temp.0);
                    changes.inserts.push(BlockInsert {
                        temp_id: temp,
                        markdown: first.clone(),
                        after: previous,
                    });
                    BlockRef::Temp(temp)
                }
                _ => {
                    let temp = issue(&mut self.next_temp, &mut temps);
                    changes.inserts.push(BlockInsert {
                        temp_id: temp,
                        markdown: first.clone(),
                        after: previous,
                    });
                    BlockRef::Temp(temp)
                }
            };
            units.push(Unit {
                key,
                markdown: first,
            });
            previous = Some(key);

            for piece in pieces {
                let temp = issue(&mut self.next_temp, &mut temps);
                changes.inserts.push(BlockInsert {
                    temp_id: temp,
                    markdown: piece.clone(),
                    after: previous,
                });
                units.push(Unit {
                    key: BlockRef::Temp(temp),
                    markdown: piece,
                });
                previous = Some(BlockRef::Temp(temp));
            }
        }

        changes.deletes = self
            .order
            .iter()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        self.reported = Some(units.clone());
        (changes, units)
    }

    /// Commits the outstanding report as the new baseline.
    pub fn confirm(&mut self, confirmations: &IdConfirmations) {
        let Some(reported) = self.reported.take() else {
            return;
        };
        self.baseline.clear();
        self.order.clear();
        for unit in reported {
            let id = match unit.key {
                BlockRef::Permanent(id) => id,
                BlockRef::Temp(temp) => match confirmations.get(&temp) {
                    Some(id) => *id,
                    None => continue,
                },
            };
            self.baseline.insert(id, unit.markdown);
            self.order.push(id);
        }
    }

    pub fn baseline_len(&self) -> usize {
        self.order.len()
    }
}

fn issue(next_temp: &mut u64, taken: &mut HashSet<TempId>) -> TempId {
    loop {
        *next_temp += 1;
        let temp = TempId(*next_temp);
        if taken.insert(temp) {
            return temp;
        }
    }
}
