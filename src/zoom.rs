//! The active zoom window.

use md_sections_core::{
    AppliedChangeSet, BlockId, OrderWindow, SortOrder, ZoomMode, ZoomScope, resolve_zoom,
};
use md_sections_doc::DocumentView;
use md_sections_storage::{BlockStore, ReplaceOutcome, StoreError};
use std::collections::BTreeSet;
use tracing::debug;

/// A sort-order range restricting the surface to one section, with the
/// member set and both renderings of its content kept in step.
///
/// The end of the window never moves because of the levels of headings
/// inside it. It only moves by the shift the store reports for a range
/// replacement, or follows the block sitting at it after a renumbering.
#[derive(Debug, Clone)]
pub struct ZoomWindow {
    scope: ZoomScope,
    /// First block inside the window, followed across renumbering.
    first: Option<BlockId>,
    view: DocumentView,
}

impl ZoomWindow {
    pub fn open(store: &BlockStore, heading_id: BlockId, mode: ZoomMode) -> Result<Self, StoreError> {
        let blocks = store.fetch_all();
        let scope = match resolve_zoom(&blocks, heading_id, mode) {
            Some(scope) => scope,
            None if store.get(&heading_id).is_some() => {
                return Err(StoreError::NotASection(heading_id));
            }
            None => return Err(StoreError::UnknownBlock(heading_id)),
        };
        let window = OrderWindow::new(scope.start, scope.end);
        debug!(
            heading = %heading_id,
            start = scope.start.value(),
            end = scope.end.map(SortOrder::value),
            members = scope.members.len(),
            "resolved zoom window"
        );
        Ok(Self {
            view: store.view(window),
            first: Some(heading_id),
            scope,
        })
    }

    pub fn heading_id(&self) -> BlockId {
        self.scope.heading_id
    }

    pub fn mode(&self) -> ZoomMode {
        self.scope.mode
    }

    pub fn window(&self) -> OrderWindow {
        OrderWindow::new(self.scope.start, self.scope.end)
    }

    /// Blocks shown while zoomed, the same set the window range holds.
    pub fn members(&self) -> &BTreeSet<BlockId> {
        &self.scope.members
    }

    pub fn view(&self) -> &DocumentView {
        &self.view
    }

    /// Follows a scoped change-set.
    ///
    /// Inserts at the top of the window land just before its first block,
    /// so the start is lowered to take them in.
    pub fn absorb_change_set(&mut self, applied: &AppliedChangeSet, store: &BlockStore) {
        if applied.rebalanced {
            self.follow_anchors(store);
        }
        let lowest = applied
            .confirmations
            .values()
            .filter_map(|id| store.get(id))
            .map(|block| block.sort_order)
            .filter(|order| *order < self.scope.start)
            .min();
        if let Some(order) = lowest {
            self.scope.start = order;
        }
        self.refresh(store);
    }

    /// Follows a range replacement of the window's content.
    pub fn absorb_replace(&mut self, outcome: &ReplaceOutcome, store: &BlockStore) {
        self.scope.end = outcome.end;
        self.refresh(store);
    }

    fn follow_anchors(&mut self, store: &BlockStore) {
        if let Some(block) = self.first.and_then(|id| store.get(&id)) {
            self.scope.start = block.sort_order;
        }
        if let Some(block) = self.scope.end_anchor.and_then(|id| store.get(&id)) {
            self.scope.end = Some(block.sort_order);
        }
        debug!(
            start = self.scope.start.value(),
            end = self.scope.end.map(SortOrder::value),
            "zoom window followed renumbering"
        );
    }

    fn refresh(&mut self, store: &BlockStore) {
        let blocks = store.fetch_in_range(self.window());
        self.scope.members = blocks.iter().map(|block| block.id).collect();
        self.first = blocks
            .iter()
            .find(|block| block.is_top_level())
            .map(|block| block.id)
            .or(self.first);
        self.view = DocumentView::from_blocks(&blocks);
    }
}
