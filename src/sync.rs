//! The sync step: poll the surface, apply, confirm.

use crate::coordinator::CoordinatorError;
use crate::zoom::ZoomWindow;
use md_sections_core::{AppliedChangeSet, OrderWindow};
use md_sections_storage::BlockStore;
use md_sections_sync::{EditorAdapter, LoadStatus, ValidationLimits, validate_change_set};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// A store-driven rewrite is in progress.
    Suppressed,
    /// An operation holds the state machine.
    Busy,
    /// The surface reported nothing.
    Clean,
    Applied(AppliedChangeSet),
}

/// Pauses polling while the store rewrites the surface's content.
/// Holds nest.
#[derive(Debug, Default)]
pub struct Suppression {
    depth: AtomicUsize,
}

impl Suppression {
    pub fn hold(&self) -> SuppressionGuard<'_> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        SuppressionGuard { suppression: self }
    }

    pub fn is_active(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }
}

#[derive(Debug)]
pub struct SuppressionGuard<'a> {
    suppression: &'a Suppression,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.suppression.depth.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Moves whatever the surface has into the store in one transaction.
///
/// Returns `None` when there was nothing to apply. A change-set that fails
/// validation or application is not confirmed, so the surface reports it
/// again on the next poll.
pub(crate) fn sync_once(
    store: &mut BlockStore,
    zoom: Option<&mut ZoomWindow>,
    adapter: &mut dyn EditorAdapter,
    limits: &ValidationLimits,
) -> Result<Option<AppliedChangeSet>, CoordinatorError> {
    let changes = adapter.get_change_set();
    if changes.is_empty() {
        return Ok(None);
    }
    debug!(
        surface = %adapter.surface(),
        updates = changes.updates.len(),
        inserts = changes.inserts.len(),
        deletes = changes.deletes.len(),
        "surface reported changes"
    );
    if let Err(err) = validate_change_set(&changes, limits) {
        error!(%err, "change-set rejected");
        return Err(err.into());
    }

    let scope = zoom.as_ref().map(|window| window.window());
    let applied = match store.apply_change_set(&changes, scope) {
        Ok(applied) => applied,
        Err(err) => {
            error!(%err, "change-set failed to apply");
            return Err(err.into());
        }
    };

    adapter.confirm_ids(&applied.confirmations);
    let view = match zoom {
        Some(window) => {
            window.absorb_change_set(&applied, store);
            window.view().clone()
        }
        None if applied.needs_reload() => store.view(OrderWindow::unbounded()),
        None => return Ok(Some(applied)),
    };
    if applied.needs_reload() {
        debug!(
            converted = applied.converted,
            rebalanced = applied.rebalanced,
            "reloading surface from the store"
        );
        if adapter.load_with_ids(&view)? == LoadStatus::AwaitingAck {
            debug!("surface will acknowledge the reload later");
        }
    }
    Ok(Some(applied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use md_sections_sync::{MarkerAdapter, TreeAdapter};

    fn loaded(markdown: &str) -> (BlockStore, TreeAdapter) {
        let mut store = BlockStore::in_memory("Test");
        store.replace_all(markdown, None).unwrap();
        let mut adapter = TreeAdapter::new();
        adapter
            .load_with_ids(&store.view(OrderWindow::unbounded()))
            .unwrap();
        (store, adapter)
    }

    #[test]
    fn suppression_nests() {
        let suppression = Suppression::default();
        let outer = suppression.hold();
        {
            let _inner = suppression.hold();
            assert!(suppression.is_active());
        }
        assert!(suppression.is_active());
        drop(outer);
        assert!(!suppression.is_active());
    }

    #[test]
    fn clean_surface_applies_nothing() {
        let (mut store, mut adapter) = loaded("a");
        let revision = store.revision();
        let applied = sync_once(&mut store, None, &mut adapter, &ValidationLimits::default()).unwrap();
        assert!(applied.is_none());
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn whole_document_deletion_goes_through() {
        let (mut store, mut adapter) = loaded("# A\n\na\n\n# B\n\nb");
        while adapter.remove(0).is_some() {}
        let applied = sync_once(&mut store, None, &mut adapter, &ValidationLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(applied.deleted, 4);
        assert!(store.is_empty());
    }

    #[test]
    fn rejected_change_set_is_reported_again() {
        let (mut store, mut adapter) = loaded("a");
        adapter.edit(0, "x".repeat(64));
        let limits = ValidationLimits {
            max_unit_bytes: 16,
            ..ValidationLimits::default()
        };
        match sync_once(&mut store, None, &mut adapter, &limits).unwrap_err() {
            CoordinatorError::Validation(_) => {}
            other => panic!("Expected Validation, got {other:?}"),
        }
        assert_eq!(store.document(), "a");

        let applied = sync_once(&mut store, None, &mut adapter, &ValidationLimits::default())
            .unwrap()
            .unwrap();
        assert_eq!(applied.updated, 1);
        assert_eq!(store.document(), "x".repeat(64));
    }

    #[test]
    fn zoomed_sync_is_scoped_and_keeps_both_renderings_current() {
        let mut store = BlockStore::in_memory("Test");
        store.replace_all("# A\n\na\n\n# B\n\nb", None).unwrap();
        let a = store.fetch_all()[0].id;
        let mut window = ZoomWindow::open(&store, a, md_sections_core::ZoomMode::Full).unwrap();
        let mut adapter = MarkerAdapter::new();
        adapter.load_with_ids(window.view()).unwrap();

        adapter.set_text(format!("{}\n\nadded", adapter.text()));
        sync_once(&mut store, Some(&mut window), &mut adapter, &ValidationLimits::default())
            .unwrap()
            .unwrap();

        assert_eq!(store.document(), "# A\n\na\n\nadded\n\n# B\n\nb");
        assert_eq!(window.view().markdown(), "# A\n\na\n\nadded");
        assert_eq!(
            md_sections_doc::strip_markers(window.view().annotated()),
            window.view().markdown()
        );
        assert_eq!(adapter.content(), window.view().markdown());
    }
}
