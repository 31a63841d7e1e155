use crate::tracker::{Claim, Tracker, Unit};
use crate::{AdapterError, EditorAdapter, LoadStatus, Surface};
use md_sections_core::{BlockId, BlockRef, ChangeSet, IdConfirmations, TempId};
use md_sections_doc::DocumentView;
use tracing::debug;

/// Identity of a node on a tree surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKey {
    Block(BlockId),
    Temp(TempId),
    /// Created on the surface and not yet reported.
    New,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeNode {
    pub key: NodeKey,
    pub markdown: String,
}

impl From<Unit> for TreeNode {
    fn from(unit: Unit) -> Self {
        let key = match unit.key {
            BlockRef::Permanent(id) => NodeKey::Block(id),
            BlockRef::Temp(temp) => NodeKey::Temp(temp),
        };
        Self {
            key,
            markdown: unit.markdown,
        }
    }
}

/// Adapter for a surface whose document model already has block nodes.
///
/// Change detection is a structural diff of the node list against the
/// baseline; text is only parsed to split a node that now holds more than
/// one block.
#[derive(Debug, Default)]
pub struct TreeAdapter {
    nodes: Vec<TreeNode>,
    tracker: Tracker,
}

impl TreeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Replaces the text of the node at `index`.
    pub fn edit(&mut self, index: usize, markdown: impl Into<String>) -> bool {
        match self.nodes.get_mut(index) {
            Some(node) => {
                node.markdown = markdown.into();
                true
            }
            None => false,
        }
    }

    /// Adds a new node at `index`, or at the end when out of range.
    pub fn insert(&mut self, index: usize, markdown: impl Into<String>) {
        let node = TreeNode {
            key: NodeKey::New,
            markdown: markdown.into(),
        };
        let index = index.min(self.nodes.len());
        self.nodes.insert(index, node);
    }

    pub fn remove(&mut self, index: usize) -> Option<TreeNode> {
        (index < self.nodes.len()).then(|| self.nodes.remove(index))
    }
}

impl EditorAdapter for TreeAdapter {
    fn surface(&self) -> Surface {
        Surface::Tree
    }

    fn get_change_set(&mut self) -> ChangeSet {
        let stretches = self.nodes.iter().map(|node| {
            let claim = match node.key {
                NodeKey::Block(id) => Claim::Known(id),
                NodeKey::Temp(temp) => Claim::Temp(temp),
                NodeKey::New => Claim::Fresh,
            };
            (claim, node.markdown.clone())
        });
        let (changes, units) = self.tracker.diff(stretches);
        // Splits and new nodes come back as separate, keyed nodes.
        self.nodes = units.into_iter().map(TreeNode::from).collect();
        changes
    }

    fn confirm_ids(&mut self, confirmations: &IdConfirmations) {
        self.tracker.confirm(confirmations);
        for node in &mut self.nodes {
            if let NodeKey::Temp(temp) = node.key {
                if let Some(id) = confirmations.get(&temp) {
                    node.key = NodeKey::Block(*id);
                }
            }
        }
    }

    fn load_with_ids(&mut self, view: &DocumentView) -> Result<LoadStatus, AdapterError> {
        self.nodes = self
            .tracker
            .load(view)
            .into_iter()
            .map(TreeNode::from)
            .collect();
        debug!(nodes = self.tracker.baseline_len(), "tree surface loaded");
        Ok(LoadStatus::Applied)
    }

    fn content(&self) -> String {
        self.nodes
            .iter()
            .map(|node| node.markdown.as_str())
            .filter(|markdown| !markdown.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
