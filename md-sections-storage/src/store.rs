//! The block store.
//!
//! Every write clones the table, edits the copy, re-derives the
//! context-dependent fields, persists, and only then swaps the copy in. A
//! failure anywhere leaves the previous table untouched.

use crate::integrity::{IdentitySource, IntegrityReport, RepairReport, inspect, recover_project_id};
use crate::record::{decode, encode};
use crate::{BlockTable, Storage, StorageError};
use chrono::Utc;
use md_sections_core::{
    AppliedChangeSet, Block, BlockId, BlockRef, BlockType, BlockUpdate, ChangeSet, LevelFix,
    OrderWindow, ProjectId, ProjectRecord, SectionMeta, SortOrder, TempId, plan_level_fixes,
    refresh_context, section,
};
use md_sections_doc::{DocumentView, Fragment, IdentityHints, Parser, set_heading_level, strip_markers};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const RECOVERED_TITLE: &str = "Recovered project";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no project at {0}")]
    NotInitialized(PathBuf),
    #[error("a project already exists at {0}")]
    AlreadyInitialized(PathBuf),
    #[error("project root record is missing")]
    RootMissing,
    #[error("unknown block {0}")]
    UnknownBlock(BlockId),
    #[error("block {0} is not a heading or pseudo-section")]
    NotASection(BlockId),
    #[error("sort order {0} is already taken")]
    OrderCollision(SortOrder),
    #[error("reorder must name every section exactly once")]
    InvalidReorder,
}

/// Result of a range or whole-document replacement.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplaceOutcome {
    /// Top-level blocks written, in order.
    pub ids: Vec<BlockId>,
    pub removed: usize,
    /// How far blocks at or after the old end were pushed.
    pub shift: f64,
    /// The old end after shifting.
    pub end: Option<SortOrder>,
}

#[derive(Debug)]
pub struct BlockStore {
    project: Option<ProjectRecord>,
    table: BlockTable,
    storage: Option<Storage>,
    revision: watch::Sender<u64>,
}

impl BlockStore {
    /// A store that never touches disk.
    pub fn in_memory(title: impl Into<String>) -> Self {
        Self::with_parts(Some(ProjectRecord::new(title)), BlockTable::new(), None)
    }

    /// Creates an empty project under `root`.
    pub fn create(root: impl AsRef<Path>, title: impl Into<String>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let storage = Storage::open(root)?;
        match storage.read_snapshot() {
            Ok(_) => return Err(StoreError::AlreadyInitialized(root.to_path_buf())),
            Err(StorageError::Missing) => {}
            Err(err) => return Err(err.into()),
        }
        let mut store = Self::with_parts(
            Some(ProjectRecord::new(title)),
            BlockTable::new(),
            Some(storage),
        );
        persist(&mut store.storage, store.project.as_ref(), &store.table)?;
        info!(root = %root.display(), "created project");
        Ok(store)
    }

    /// Loads the newest snapshot as-is, without checking integrity.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let storage = Storage::open(root)?;
        let bytes = match storage.read_snapshot() {
            Ok(bytes) => bytes,
            Err(StorageError::Missing) => {
                return Err(StoreError::NotInitialized(root.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        let (project, blocks) = decode(&bytes)?;
        let table = BlockTable::from_blocks(blocks)?;
        debug!(root = %root.display(), blocks = table.len(), "loaded snapshot");
        Ok(Self::with_parts(project, table, Some(storage)))
    }

    /// Loads and repairs whatever integrity damage the snapshot carries.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut store = Self::load(root)?;
        let report = store.check_integrity();
        if !report.is_clean() {
            warn!(
                root_missing = report.root_missing,
                orphans = report.orphans.len(),
                foreign = report.foreign_blocks.len(),
                "store failed integrity check, repairing"
            );
            store.repair()?;
        }
        Ok(store)
    }

    fn with_parts(
        project: Option<ProjectRecord>,
        table: BlockTable,
        storage: Option<Storage>,
    ) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            project,
            table,
            storage,
            revision,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.storage.as_ref().map(Storage::root)
    }

    pub fn project(&self) -> Option<&ProjectRecord> {
        self.project.as_ref()
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project.as_ref().map(|project| project.id)
    }

    /// Change feed. The value is a revision counter; receivers only see the
    /// latest one, so bursts of writes coalesce.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.table.get(id)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn fetch_all(&self) -> Vec<Block> {
        self.table.to_vec()
    }

    pub fn fetch_in_range(&self, window: OrderWindow) -> Vec<Block> {
        self.table.range(window).cloned().collect()
    }

    /// Top-level headings and pseudo-sections of `project_id`, in order.
    pub fn fetch_outline(&self, project_id: ProjectId) -> Vec<Block> {
        self.table
            .iter()
            .filter(|block| {
                block.project_id == project_id
                    && block.is_top_level()
                    && block.is_section_boundary()
            })
            .cloned()
            .collect()
    }

    /// The whole document as markdown.
    pub fn document(&self) -> String {
        md_sections_doc::assemble_blocks(&self.fetch_all())
    }

    pub fn view(&self, window: OrderWindow) -> DocumentView {
        DocumentView::from_blocks(&self.fetch_in_range(window))
    }

    /// Words from a section boundary up to the next boundary of any level.
    pub fn section_word_count(&self, id: BlockId) -> Option<u32> {
        let blocks = self.table.to_vec();
        let index = blocks.iter().position(|block| block.id == id)?;
        blocks[index]
            .is_section_boundary()
            .then(|| section::section_word_count(&blocks, index))
    }

    /// Words from a section boundary through all of its descendants.
    pub fn aggregate_word_count(&self, id: BlockId) -> Option<u32> {
        let blocks = self.table.to_vec();
        let index = blocks.iter().position(|block| block.id == id)?;
        blocks[index]
            .is_section_boundary()
            .then(|| section::aggregate_word_count(&blocks, index))
    }

    /// Replaces the whole document, carrying section identity by title.
    pub fn replace_all(
        &mut self,
        markdown: &str,
        hints: Option<IdentityHints>,
    ) -> Result<ReplaceOutcome, StoreError> {
        self.replace_scope(OrderWindow::unbounded(), SortOrder::ZERO, markdown, hints)
    }

    /// Replaces the blocks in `window`, carrying section identity by title.
    ///
    /// New blocks take orders stepping up from the window start. When they
    /// need more room than the window had, everything at or after its end is
    /// shifted forward first.
    pub fn replace_in_range(
        &mut self,
        window: OrderWindow,
        markdown: &str,
        hints: Option<IdentityHints>,
    ) -> Result<ReplaceOutcome, StoreError> {
        let base = if window.start.value().is_finite() {
            window.start
        } else {
            SortOrder::ZERO
        };
        self.replace_scope(window, base, markdown, hints)
    }

    fn replace_scope(
        &mut self,
        select: OrderWindow,
        base: SortOrder,
        markdown: &str,
        extra_hints: Option<IdentityHints>,
    ) -> Result<ReplaceOutcome, StoreError> {
        let project_id = self.require_project()?;
        let fragments = Parser::parse_unit(&strip_markers(markdown));

        let outcome = self.commit(|table| {
            let scoped: Vec<Block> = table.range(select).cloned().collect();
            let mut hints = IdentityHints::from_blocks(&scoped);
            if let Some(extra) = extra_hints {
                hints.extend(extra);
            }
            let removed = scoped.iter().filter(|block| block.is_top_level()).count();
            for block in &scoped {
                table.remove(&block.id);
            }

            let mut shift = 0.0;
            if let Some(end) = select.end {
                let needed = base.step(fragments.len());
                if needed > end {
                    shift = needed.value() - end.value();
                    shift_from(table, end, shift)?;
                }
            }

            let ids = place_in_steps(table, project_id, &fragments, base, &mut hints)?;
            Ok(ReplaceOutcome {
                ids,
                removed,
                shift,
                end: select.end.map(|end| end.offset(shift)),
            })
        })?;

        debug!(
            written = outcome.ids.len(),
            removed = outcome.removed,
            shift = outcome.shift,
            "replaced range"
        );
        Ok(outcome)
    }

    /// Applies an adapter's change-set in one transaction.
    ///
    /// Updates go first, then inserts in the order given (so temp anchors can
    /// name earlier inserts), then deletes. `scope` is the zoom window, if
    /// any; inserts without a usable anchor land inside it.
    pub fn apply_change_set(
        &mut self,
        changes: &ChangeSet,
        scope: Option<OrderWindow>,
    ) -> Result<AppliedChangeSet, StoreError> {
        if changes.is_empty() {
            return Ok(AppliedChangeSet::default());
        }
        let project_id = self.require_project()?;

        let applied = self.commit(|table| {
            let anchors = ScopeAnchors::resolve(table, scope);
            let mut placer = Placer {
                table,
                project_id,
                rebalanced: false,
            };
            let mut applied = AppliedChangeSet::default();

            for update in &changes.updates {
                if placer.table.contains(&update.id) {
                    apply_update(&mut placer, update, &mut applied)?;
                    continue;
                }
                let fragments = Parser::parse_unit(&update.markdown);
                if fragments.is_empty() {
                    continue;
                }
                warn!(id = %update.id, "update for unknown block, inserting instead");
                placer.place(&fragments, anchors.end())?;
                applied.converted += 1;
                applied.reshaped = true;
            }

            let mut last_piece: HashMap<TempId, BlockId> = HashMap::new();
            for insert in &changes.inserts {
                let fragments = Parser::parse_unit(&insert.markdown);
                if fragments.is_empty() {
                    continue;
                }
                let position = match insert.after {
                    None => anchors.start(),
                    Some(BlockRef::Permanent(id)) if placer.table.contains(&id) => {
                        Position::After(id)
                    }
                    Some(BlockRef::Permanent(_)) => anchors.end(),
                    Some(BlockRef::Temp(temp)) => last_piece
                        .get(&temp)
                        .map_or(anchors.end(), |id| Position::After(*id)),
                };
                let ids = placer.place(&fragments, position)?;
                if let (Some(first), Some(last)) = (ids.first(), ids.last()) {
                    applied.confirmations.insert(insert.temp_id, *first);
                    last_piece.insert(insert.temp_id, *last);
                }
                applied.inserted += 1;
                if ids.len() > 1 {
                    applied.reshaped = true;
                }
            }

            for id in &changes.deletes {
                if placer.table.remove_with_children(id).is_some() {
                    applied.deleted += 1;
                }
            }

            applied.rebalanced = placer.rebalanced;
            Ok(applied)
        })?;

        debug!(
            updated = applied.updated,
            inserted = applied.inserted,
            deleted = applied.deleted,
            converted = applied.converted,
            rebalanced = applied.rebalanced,
            "applied change-set"
        );
        Ok(applied)
    }

    /// Level corrections the next [`fix_hierarchy`](Self::fix_hierarchy) would make.
    pub fn pending_level_fixes(&self) -> Vec<LevelFix> {
        plan_level_fixes(&self.table.to_vec())
    }

    /// Demotes headings that skip a level. Writes nothing when the
    /// hierarchy is already valid.
    pub fn fix_hierarchy(&mut self) -> Result<Vec<LevelFix>, StoreError> {
        let fixes = self.pending_level_fixes();
        if fixes.is_empty() {
            return Ok(fixes);
        }
        self.commit(|table| {
            for fix in &fixes {
                table.update(&fix.id, |block| {
                    block.heading_level = Some(fix.to);
                    if block.block_type == BlockType::Heading {
                        block.markdown = set_heading_level(&block.markdown, fix.to);
                        block.updated_at = Utc::now();
                    }
                })?;
            }
            Ok(())
        })?;
        info!(count = fixes.len(), "corrected heading levels");
        Ok(fixes)
    }

    /// Moves whole sections into the order given by their heading ids.
    ///
    /// `order` must name every top-level heading exactly once. Content before
    /// the first heading stays first. Returns `false` when the order is
    /// already the current one.
    pub fn reorder_sections(&mut self, order: &[BlockId]) -> Result<bool, StoreError> {
        let mut preamble: Vec<BlockId> = Vec::new();
        let mut units: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        for block in self.table.iter().filter(|block| block.is_top_level()) {
            if block.block_type == BlockType::Heading {
                units.push((block.id, vec![block.id]));
            } else if let Some((_, unit)) = units.last_mut() {
                unit.push(block.id);
            } else {
                preamble.push(block.id);
            }
        }

        let current: Vec<BlockId> = units.iter().map(|(id, _)| *id).collect();
        let mut expected = current.clone();
        expected.sort();
        let mut requested = order.to_vec();
        requested.sort();
        if expected != requested {
            return Err(StoreError::InvalidReorder);
        }
        if current == order {
            return Ok(false);
        }

        let mut by_heading: HashMap<BlockId, Vec<BlockId>> = units.into_iter().collect();
        let mut sequence = preamble;
        for id in order {
            if let Some(unit) = by_heading.remove(id) {
                sequence.extend(unit);
            }
        }

        self.commit(|table| renumber(table, &sequence))?;
        info!(sections = order.len(), "reordered sections");
        Ok(true)
    }

    /// Replaces a section's metadata. The cached word count is kept.
    pub fn update_section_meta(&mut self, id: BlockId, meta: SectionMeta) -> Result<(), StoreError> {
        let block = self.table.get(&id).ok_or(StoreError::UnknownBlock(id))?;
        if !block.is_section_boundary() {
            return Err(StoreError::NotASection(id));
        }
        self.commit(|table| {
            table.update(&id, |block| {
                let word_count = block.meta.word_count;
                block.meta = meta;
                block.meta.word_count = word_count;
                block.updated_at = Utc::now();
            })
        })
    }

    pub fn check_integrity(&self) -> IntegrityReport {
        inspect(self.project.as_ref(), &self.table)
    }

    /// Restores the root record, drops orphans and points every block at the
    /// project.
    pub fn repair(&mut self) -> Result<RepairReport, StoreError> {
        let report = self.check_integrity();
        let (project, source) = match &self.project {
            Some(project) => (project.clone(), IdentitySource::Root),
            None => {
                let (id, source) = recover_project_id(&self.table);
                let title = self
                    .table
                    .iter()
                    .find(|block| block.block_type == BlockType::Heading)
                    .map(|block| block.text_content.clone())
                    .filter(|title| !title.trim().is_empty())
                    .unwrap_or_else(|| RECOVERED_TITLE.to_string());
                let created_at = self
                    .table
                    .iter()
                    .map(|block| block.created_at)
                    .min()
                    .unwrap_or_else(Utc::now);
                (
                    ProjectRecord {
                        id,
                        title,
                        created_at,
                    },
                    source,
                )
            }
        };

        let mut working = self.table.clone();
        for orphan in &report.orphans {
            working.remove(orphan);
        }
        let foreign: Vec<BlockId> = working
            .iter()
            .filter(|block| block.project_id != project.id)
            .map(|block| block.id)
            .collect();
        for id in &foreign {
            working.update(id, |block| block.project_id = project.id)?;
        }
        refresh_derived(&mut working)?;
        persist(&mut self.storage, Some(&project), &working)?;

        let repaired = RepairReport {
            project_id: project.id,
            source,
            recreated_root: report.root_missing,
            removed_orphans: report.orphans.len(),
            reassigned: foreign.len(),
        };
        self.project = Some(project);
        self.table = working;
        self.bump();
        info!(
            project = %repaired.project_id,
            source = ?repaired.source,
            removed_orphans = repaired.removed_orphans,
            reassigned = repaired.reassigned,
            "repaired store"
        );
        Ok(repaired)
    }

    fn require_project(&self) -> Result<ProjectId, StoreError> {
        self.project_id().ok_or(StoreError::RootMissing)
    }

    fn commit<T>(
        &mut self,
        edit: impl FnOnce(&mut BlockTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut working = self.table.clone();
        let value = edit(&mut working)?;
        refresh_derived(&mut working)?;
        persist(&mut self.storage, self.project.as_ref(), &working)?;
        self.table = working;
        self.bump();
        Ok(value)
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

fn persist(
    storage: &mut Option<Storage>,
    project: Option<&ProjectRecord>,
    table: &BlockTable,
) -> Result<(), StoreError> {
    if let Some(storage) = storage {
        let bytes = encode(project, table.iter())?;
        storage.write_snapshot(&bytes)?;
    }
    Ok(())
}

/// Re-derives pseudo-section levels, region flags and cached section word
/// counts, writing back only the blocks that changed.
fn refresh_derived(table: &mut BlockTable) -> Result<(), StoreError> {
    let mut blocks = table.to_vec();
    refresh_context(&mut blocks);
    for index in 0..blocks.len() {
        if blocks[index].is_section_boundary() {
            let count = section::section_word_count(&blocks, index);
            blocks[index].meta.word_count = count;
        }
    }
    for block in blocks {
        if table.get(&block.id) != Some(&block) {
            table.insert(block)?;
        }
    }
    Ok(())
}

/// Pushes every block at or after `from` forward by `by`. Highest first, so
/// no block ever lands on one that has not moved yet.
fn shift_from(table: &mut BlockTable, from: SortOrder, by: f64) -> Result<(), StoreError> {
    let mut moving: Vec<(SortOrder, BlockId)> = table
        .range(OrderWindow::new(from, None))
        .map(|block| (block.sort_order, block.id))
        .collect();
    moving.reverse();
    for (order, id) in moving {
        table.update(&id, |block| block.sort_order = order.offset(by))?;
    }
    Ok(())
}

/// Writes fragments at whole steps from `base`, claiming carried identities
/// for their sections.
fn place_in_steps(
    table: &mut BlockTable,
    project_id: ProjectId,
    fragments: &[Fragment],
    base: SortOrder,
    hints: &mut IdentityHints,
) -> Result<Vec<BlockId>, StoreError> {
    let mut ids = Vec::with_capacity(fragments.len());
    for (index, fragment) in fragments.iter().enumerate() {
        let order = base.step(index);
        let mut block = fragment.to_block(project_id, order);
        if let Some(carried) = fragment.title().and_then(|title| hints.claim(title)) {
            // A hint whose block still exists elsewhere cannot be reused.
            if !table.contains(&carried.id) {
                block.id = carried.id;
                block.meta = carried.meta;
                block.created_at = carried.created_at;
            }
        }
        let id = block.id;
        table.insert(block)?;
        let count = fragment.children.len();
        for (child_index, child) in fragment.children.iter().enumerate() {
            let child_order = SortOrder::spread(order, order.step(1), child_index, count);
            let mut child_block = child.to_block(project_id, child_order);
            child_block.parent_id = Some(id);
            table.insert(child_block)?;
        }
        ids.push(id);
    }
    Ok(ids)
}

/// Renumbers the table with `tops` first, in that order, at whole steps.
/// Children keep their relative order inside their parent's step. Blocks not
/// reached that way follow at the end in their current order.
fn renumber(table: &mut BlockTable, tops: &[BlockId]) -> Result<(), StoreError> {
    let mut rebuilt = BlockTable::new();
    let mut placed: HashSet<BlockId> = HashSet::new();
    let mut next = SortOrder::ZERO;

    for id in tops {
        let Some(top) = table.get(id) else {
            continue;
        };
        let order = next;
        next = next.step(1);
        let mut top = top.clone();
        top.sort_order = order;
        rebuilt.insert(top)?;
        placed.insert(*id);

        let children: Vec<Block> = table.children_of(id).cloned().collect();
        let count = children.len();
        for (index, mut child) in children.into_iter().enumerate() {
            child.sort_order = SortOrder::spread(order, order.step(1), index, count);
            placed.insert(child.id);
            rebuilt.insert(child)?;
        }
    }

    for block in table.iter().filter(|block| !placed.contains(&block.id)) {
        let mut block = block.clone();
        block.sort_order = next;
        next = next.step(1);
        rebuilt.insert(block)?;
    }

    *table = rebuilt;
    Ok(())
}

fn top_level_ids(table: &BlockTable) -> Vec<BlockId> {
    table
        .iter()
        .filter(|block| block.is_top_level())
        .map(|block| block.id)
        .collect()
}

#[derive(Debug, Clone, Copy)]
enum Position {
    After(BlockId),
    Before(BlockId),
    End,
}

/// Where "start of scope" and "end of scope" are for a change-set.
struct ScopeAnchors {
    first: Option<BlockId>,
    boundary: Option<BlockId>,
}

impl ScopeAnchors {
    fn resolve(table: &BlockTable, scope: Option<OrderWindow>) -> Self {
        let window = scope.unwrap_or_else(OrderWindow::unbounded);
        Self {
            first: table
                .range(window)
                .find(|block| block.is_top_level())
                .map(|block| block.id),
            boundary: window
                .end
                .and_then(|end| table.first_from(end))
                .map(|block| block.id),
        }
    }

    fn start(&self) -> Position {
        self.first
            .or(self.boundary)
            .map_or(Position::End, Position::Before)
    }

    fn end(&self) -> Position {
        self.boundary.map_or(Position::End, Position::Before)
    }
}

/// Places new blocks between existing neighbours, rebalancing the table when
/// a gap runs out.
struct Placer<'a> {
    table: &'a mut BlockTable,
    project_id: ProjectId,
    rebalanced: bool,
}

impl Placer<'_> {
    fn place(
        &mut self,
        fragments: &[Fragment],
        mut position: Position,
    ) -> Result<Vec<BlockId>, StoreError> {
        let mut ids = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            let order = self.slot(position)?;
            let block = fragment.to_block(self.project_id, order);
            let id = block.id;
            self.table.insert(block)?;
            self.attach_children(id, &fragment.children)?;
            ids.push(id);
            position = Position::After(id);
        }
        Ok(ids)
    }

    fn attach_children(&mut self, parent: BlockId, children: &[Fragment]) -> Result<(), StoreError> {
        if children.is_empty() {
            return Ok(());
        }
        let slots = match child_slots(self.table, parent, children.len()) {
            Some(slots) => slots,
            None => {
                self.rebalance()?;
                child_slots(self.table, parent, children.len())
                    .ok_or(StoreError::UnknownBlock(parent))?
            }
        };
        for (child, order) in children.iter().zip(slots) {
            let mut block = child.to_block(self.project_id, order);
            block.parent_id = Some(parent);
            self.table.insert(block)?;
        }
        Ok(())
    }

    fn slot(&mut self, position: Position) -> Result<SortOrder, StoreError> {
        if let Some(order) = open_slot(self.bounds(position)) {
            return Ok(order);
        }
        self.rebalance()?;
        let bounds = self.bounds(position);
        open_slot(bounds).ok_or(StoreError::OrderCollision(bounds.0.unwrap_or(SortOrder::ZERO)))
    }

    fn rebalance(&mut self) -> Result<(), StoreError> {
        let tops = top_level_ids(self.table);
        renumber(self.table, &tops)?;
        self.rebalanced = true;
        info!(blocks = self.table.len(), "sort order gap exhausted, rebalanced");
        Ok(())
    }

    /// Orders of the neighbours a block placed at `position` sits between.
    fn bounds(&self, position: Position) -> (Option<SortOrder>, Option<SortOrder>) {
        match position {
            Position::After(id) => {
                let Some(block) = self.table.get(&id) else {
                    return self.bounds(Position::End);
                };
                if let Some(parent) = block.parent_id {
                    return self.bounds(Position::After(parent));
                }
                // Step over the anchor's own children.
                let mut low = block.sort_order;
                while let Some(next) = self.table.next_after(low) {
                    if next.parent_id != Some(id) {
                        return (Some(low), Some(next.sort_order));
                    }
                    low = next.sort_order;
                }
                (Some(low), None)
            }
            Position::Before(id) => match self.table.get(&id) {
                Some(block) => (
                    self.table
                        .last_before(block.sort_order)
                        .map(|before| before.sort_order),
                    Some(block.sort_order),
                ),
                None => self.bounds(Position::End),
            },
            Position::End => (self.table.last().map(|block| block.sort_order), None),
        }
    }
}

fn open_slot(bounds: (Option<SortOrder>, Option<SortOrder>)) -> Option<SortOrder> {
    match bounds {
        (Some(low), Some(high)) => SortOrder::between(low, high),
        (Some(low), None) => Some(low.step(1)),
        (None, Some(high)) => Some(high.offset(-SortOrder::STEP)),
        (None, None) => Some(SortOrder::ZERO),
    }
}

/// Evenly spaced orders for `count` children between `parent` and whatever
/// follows it, or `None` when they would not fit strictly inside.
fn child_slots(table: &BlockTable, parent: BlockId, count: usize) -> Option<Vec<SortOrder>> {
    let low = table.get(&parent)?.sort_order;
    let high = table
        .next_after(low)
        .map_or(low.step(1), |next| next.sort_order);
    let slots: Vec<SortOrder> = (0..count)
        .map(|index| SortOrder::spread(low, high, index, count))
        .collect();
    let fits = slots.first().is_some_and(|first| *first > low)
        && slots.last().is_some_and(|last| *last < high)
        && slots.windows(2).all(|pair| pair[0] < pair[1]);
    fits.then_some(slots)
}

fn apply_update(
    placer: &mut Placer<'_>,
    update: &BlockUpdate,
    applied: &mut AppliedChangeSet,
) -> Result<(), StoreError> {
    let fragments = Parser::parse_unit(&update.markdown);
    let Some((first, rest)) = fragments.split_first() else {
        placer.table.remove_with_children(&update.id);
        applied.deleted += 1;
        return Ok(());
    };

    let unchanged = placer
        .table
        .get(&update.id)
        .is_some_and(|block| block.markdown == first.markdown);
    if !unchanged {
        let children: Vec<BlockId> = placer
            .table
            .children_of(&update.id)
            .map(|child| child.id)
            .collect();
        for child in &children {
            placer.table.remove(child);
        }
        placer.table.update(&update.id, |block| {
            block.block_type = first.block_type;
            block.heading_level = first.heading_level;
            block.markdown = first.markdown.clone();
            block.text_content = first.text_content.clone();
            block.is_pseudo_section = first.is_pseudo_section;
            block.updated_at = Utc::now();
        })?;
        placer.attach_children(update.id, &first.children)?;
        applied.updated += 1;
    }

    if !rest.is_empty() {
        placer.place(rest, Position::After(update.id))?;
        applied.inserted += rest.len();
        applied.reshaped = true;
    }
    Ok(())
}
