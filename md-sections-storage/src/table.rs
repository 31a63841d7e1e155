use crate::StoreError;
use md_sections_core::{Block, BlockId, OrderWindow, SortOrder};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

/// Blocks by id plus an index by sort order. Orders are unique.
#[derive(Debug, Clone, Default)]
pub struct BlockTable {
    blocks: HashMap<BlockId, Block>,
    order: BTreeMap<SortOrder, BlockId>,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, StoreError> {
        let mut table = Self::new();
        for block in blocks {
            table.insert(block)?;
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn insert(&mut self, block: Block) -> Result<(), StoreError> {
        if let Some(existing) = self.order.get(&block.sort_order) {
            if *existing != block.id {
                return Err(StoreError::OrderCollision(block.sort_order));
            }
        }
        if let Some(previous) = self.blocks.get(&block.id) {
            self.order.remove(&previous.sort_order);
        }
        self.order.insert(block.sort_order, block.id);
        self.blocks.insert(block.id, block);
        Ok(())
    }

    pub fn remove(&mut self, id: &BlockId) -> Option<Block> {
        let block = self.blocks.remove(id)?;
        self.order.remove(&block.sort_order);
        Some(block)
    }

    /// Removes a block together with its children.
    pub fn remove_with_children(&mut self, id: &BlockId) -> Option<Block> {
        let children: Vec<BlockId> = self.children_of(id).map(|child| child.id).collect();
        for child in children {
            self.remove(&child);
        }
        self.remove(id)
    }

    /// Applies `edit` to a block in place and re-indexes it.
    pub fn update(
        &mut self,
        id: &BlockId,
        edit: impl FnOnce(&mut Block),
    ) -> Result<(), StoreError> {
        let mut block = self
            .blocks
            .get(id)
            .cloned()
            .ok_or(StoreError::UnknownBlock(*id))?;
        edit(&mut block);
        self.insert(block)
    }

    /// All blocks in document order.
    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.order.values().filter_map(|id| self.blocks.get(id))
    }

    pub fn to_vec(&self) -> Vec<Block> {
        self.iter().cloned().collect()
    }

    pub fn range(&self, window: OrderWindow) -> impl Iterator<Item = &Block> + '_ {
        let upper = match window.end {
            Some(end) => Bound::Excluded(end),
            None => Bound::Unbounded,
        };
        self.order
            .range((Bound::Included(window.start), upper))
            .filter_map(|(_, id)| self.blocks.get(id))
    }

    pub fn children_of<'a>(&'a self, id: &'a BlockId) -> impl Iterator<Item = &'a Block> + 'a {
        self.iter()
            .filter(move |block| block.parent_id.as_ref() == Some(id))
    }

    pub fn first(&self) -> Option<&Block> {
        self.iter().next()
    }

    pub fn last(&self) -> Option<&Block> {
        self.order
            .values()
            .next_back()
            .and_then(|id| self.blocks.get(id))
    }

    /// The block immediately after `order`.
    pub fn next_after(&self, order: SortOrder) -> Option<&Block> {
        self.order
            .range((Bound::Excluded(order), Bound::Unbounded))
            .next()
            .and_then(|(_, id)| self.blocks.get(id))
    }

    /// The block immediately before `order`.
    pub fn last_before(&self, order: SortOrder) -> Option<&Block> {
        self.order
            .range(..order)
            .next_back()
            .and_then(|(_, id)| self.blocks.get(id))
    }

    /// The first block at or after `order`.
    pub fn first_from(&self, order: SortOrder) -> Option<&Block> {
        self.order
            .range(order..)
            .next()
            .and_then(|(_, id)| self.blocks.get(id))
    }
}
