use md_sections::{
    BlockId, BlockStore, ContentState, Coordinator, CoordinatorConfig, CoordinatorError,
    DocumentView, EditorAdapter, IdConfirmations, LoadStatus, MarkerAdapter, PollOutcome, Surface,
    TreeAdapter, ZoomMode,
};
use md_sections::{AdapterError, ChangeSet};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A tree surface the test keeps a handle to after handing it over.
#[derive(Clone, Default)]
struct SharedTree {
    tree: Arc<Mutex<TreeAdapter>>,
    deferred: bool,
}

impl SharedTree {
    fn deferred() -> Self {
        Self {
            deferred: true,
            ..Self::default()
        }
    }

    fn insert(&self, index: usize, markdown: &str) {
        self.tree.lock().insert(index, markdown);
    }

    fn edit(&self, index: usize, markdown: &str) {
        self.tree.lock().edit(index, markdown);
    }
}

impl EditorAdapter for SharedTree {
    fn surface(&self) -> Surface {
        Surface::Tree
    }

    fn get_change_set(&mut self) -> ChangeSet {
        self.tree.lock().get_change_set()
    }

    fn confirm_ids(&mut self, confirmations: &IdConfirmations) {
        self.tree.lock().confirm_ids(confirmations);
    }

    fn load_with_ids(&mut self, view: &DocumentView) -> Result<LoadStatus, AdapterError> {
        self.tree.lock().load_with_ids(view)?;
        Ok(if self.deferred {
            LoadStatus::AwaitingAck
        } else {
            LoadStatus::Applied
        })
    }

    fn content(&self) -> String {
        self.tree.lock().content()
    }
}

fn store(markdown: &str) -> BlockStore {
    let mut store = BlockStore::in_memory("Test");
    store.replace_all(markdown, None).unwrap();
    store
}

fn heading(coordinator: &Coordinator, title: &str) -> BlockId {
    coordinator.with_store(|store| {
        store
            .fetch_all()
            .into_iter()
            .find(|block| block.title() == Some(title))
            .map(|block| block.id)
            .unwrap()
    })
}

async fn started(markdown: &str, surface: SharedTree, config: CoordinatorConfig) -> Coordinator {
    let coordinator = Coordinator::new(store(markdown), Box::new(surface), config);
    coordinator.bootstrap().await.unwrap();
    coordinator
}

#[tokio::test(start_paused = true)]
async fn zoom_round_trip_is_byte_identical() {
    let markdown = "intro\n\n# A\n\n- one\n- two\n\n## A.1\n\ntext\n\n# B\n\n> quote";
    let coordinator = started(markdown, SharedTree::default(), CoordinatorConfig::default()).await;
    let before = coordinator.document();

    coordinator
        .zoom_in(heading(&coordinator, "A"), ZoomMode::Full)
        .await
        .unwrap();
    assert_eq!(
        coordinator.surface_content(),
        "# A\n\n- one\n- two\n\n## A.1\n\ntext"
    );
    assert!(coordinator.zoom_out().await.unwrap().is_empty());

    assert_eq!(coordinator.document(), before);
    assert_eq!(coordinator.surface_content(), before);
}

#[tokio::test(start_paused = true)]
async fn pseudo_sections_belong_to_the_heading_before_them() {
    let markdown = "# H1\n\n<!-- ::break:: -->\n\none\n\n<!-- ::break:: -->\n\ntwo\n\n# H2\n\nthree";
    let coordinator = started(markdown, SharedTree::default(), CoordinatorConfig::default()).await;
    let pseudo: Vec<BlockId> = coordinator.with_store(|store| {
        store
            .fetch_all()
            .into_iter()
            .filter(|block| block.is_pseudo_section)
            .map(|block| block.id)
            .collect()
    });
    assert_eq!(pseudo.len(), 2);

    coordinator
        .zoom_in(heading(&coordinator, "H1"), ZoomMode::Full)
        .await
        .unwrap();
    let members = coordinator.members().unwrap();
    assert!(pseudo.iter().all(|id| members.contains(id)));
    coordinator.zoom_out().await.unwrap();

    coordinator
        .zoom_in(heading(&coordinator, "H2"), ZoomMode::Full)
        .await
        .unwrap();
    let members = coordinator.members().unwrap();
    assert!(pseudo.iter().all(|id| !members.contains(id)));
    assert_eq!(coordinator.surface_content(), "# H2\n\nthree");
}

#[tokio::test(start_paused = true)]
async fn zoomed_edits_keep_the_window_and_defer_hierarchy_fixes() {
    let surface = SharedTree::default();
    let coordinator = started("# A\n\na\n\n# B\n\nb", surface.clone(), CoordinatorConfig::default()).await;
    let b = heading(&coordinator, "B");
    coordinator
        .zoom_in(heading(&coordinator, "A"), ZoomMode::Full)
        .await
        .unwrap();
    let window = coordinator.zoom_window().unwrap();

    surface.insert(2, "### Deep");
    surface.edit(1, "a edited");
    match coordinator.poll().unwrap() {
        PollOutcome::Applied(applied) => {
            assert_eq!(applied.inserted, 1);
            assert_eq!(applied.updated, 1);
        }
        other => panic!("Expected Applied, got {other:?}"),
    }
    assert_eq!(coordinator.zoom_window(), Some(window));
    assert!(coordinator.fix_hierarchy().await.unwrap().is_empty());
    assert_eq!(coordinator.with_store(|store| store.get(&b).map(|block| block.sort_order)), window.end);

    let fixes = coordinator.zoom_out().await.unwrap();
    assert_eq!(fixes.len(), 1);
    assert_eq!((fixes[0].from, fixes[0].to), (3, 2));
    assert_eq!(coordinator.document(), "# A\n\na edited\n\n## Deep\n\n# B\n\nb");
    assert_eq!(coordinator.surface_content(), coordinator.document());
}

#[tokio::test(start_paused = true)]
async fn replacing_zoomed_content_moves_the_window_end() {
    let coordinator = started("# A\n\na\n\n# B\n\nb", SharedTree::default(), CoordinatorConfig::default()).await;
    let b = heading(&coordinator, "B");
    coordinator
        .zoom_in(heading(&coordinator, "A"), ZoomMode::Full)
        .await
        .unwrap();

    let outcome = coordinator
        .replace_zoomed_content("# A\n\none\n\ntwo\n\nthree")
        .await
        .unwrap();
    assert_eq!(outcome.shift, 2.0);
    let b_order = coordinator.with_store(|store| store.get(&b).map(|block| block.sort_order));
    assert_eq!(coordinator.zoom_window().and_then(|window| window.end), b_order);
    assert_eq!(coordinator.surface_content(), "# A\n\none\n\ntwo\n\nthree");

    coordinator.zoom_out().await.unwrap();
    assert_eq!(coordinator.document(), "# A\n\none\n\ntwo\n\nthree\n\n# B\n\nb");
}

#[tokio::test(start_paused = true)]
async fn replacing_requires_a_zoom() {
    let coordinator = started("text", SharedTree::default(), CoordinatorConfig::default()).await;
    match coordinator.replace_zoomed_content("other").await.unwrap_err() {
        CoordinatorError::NotZoomed => {}
        other => panic!("Expected NotZoomed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rapid_reorders_persist_only_the_last() {
    let coordinator = started("# A\n\na\n\n# B\n\nb\n\n# C\n\nc", SharedTree::default(), CoordinatorConfig::default()).await;
    let (a, b, c) = (
        heading(&coordinator, "A"),
        heading(&coordinator, "B"),
        heading(&coordinator, "C"),
    );
    let revision = coordinator.with_store(BlockStore::revision);

    coordinator.reorder_sections(vec![c, b, a]).unwrap();
    coordinator.reorder_sections(vec![b, a, c]).unwrap();
    assert!(coordinator.settle_reorder().await.unwrap());

    assert_eq!(coordinator.document(), "# B\n\nb\n\n# A\n\na\n\n# C\n\nc");
    assert_eq!(coordinator.surface_content(), coordinator.document());
    assert_eq!(coordinator.with_store(BlockStore::revision), revision + 1);
}

#[tokio::test(start_paused = true)]
async fn reorder_is_refused_while_zoomed() {
    let coordinator = started("# A\n\n# B", SharedTree::default(), CoordinatorConfig::default()).await;
    let (a, b) = (heading(&coordinator, "A"), heading(&coordinator, "B"));
    coordinator.zoom_in(a, ZoomMode::Full).await.unwrap();
    match coordinator.reorder_sections(vec![b, a]).unwrap_err() {
        CoordinatorError::Zoomed(_) => {}
        other => panic!("Expected Zoomed, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn watchdog_unblocks_a_stuck_transition() {
    let config = CoordinatorConfig {
        watchdog_timeout_ms: 5_000,
        ack_timeout_ms: 60_000,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(store("# A\n\na"), Box::new(SharedTree::deferred()), config);
    let a = heading(&coordinator, "A");

    match coordinator.zoom_in(a, ZoomMode::Full).await.unwrap_err() {
        CoordinatorError::Superseded => {}
        other => panic!("Expected Superseded, got {other:?}"),
    }
    assert_eq!(coordinator.state(), ContentState::Idle);
    assert!(!coordinator.is_zoomed());
    assert!(!coordinator.acknowledge_load());

    // Nothing stays blocked: the next operation runs.
    let acker = coordinator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        acker.acknowledge_load();
    });
    coordinator.zoom_in(a, ZoomMode::Full).await.unwrap();
    assert!(coordinator.is_zoomed());
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_load_times_out_and_leaves_the_zoom_unset() {
    let config = CoordinatorConfig {
        ack_timeout_ms: 1_000,
        ..CoordinatorConfig::default()
    };
    let coordinator = Coordinator::new(store("# A\n\na\n\n# B"), Box::new(SharedTree::deferred()), config);
    match coordinator
        .zoom_in(heading(&coordinator, "A"), ZoomMode::Full)
        .await
        .unwrap_err()
    {
        CoordinatorError::AckTimeout(timeout) => assert_eq!(timeout, Duration::from_secs(1)),
        other => panic!("Expected AckTimeout, got {other:?}"),
    }
    assert!(!coordinator.is_zoomed());
    assert_eq!(coordinator.state(), ContentState::Idle);
    assert_eq!(coordinator.surface_content(), "# A\n\na\n\n# B");
}

#[tokio::test(start_paused = true)]
async fn polling_pauses_during_transitions() {
    let coordinator = Coordinator::new(store("# A\n\na"), Box::new(SharedTree::deferred()), CoordinatorConfig::default());
    let a = heading(&coordinator, "A");

    let zooming = coordinator.clone();
    let task = tokio::spawn(async move { zooming.zoom_in(a, ZoomMode::Full).await });
    tokio::task::yield_now().await;

    assert_eq!(coordinator.state(), ContentState::ZoomingIn);
    assert_eq!(coordinator.poll().unwrap(), PollOutcome::Suppressed);

    assert!(coordinator.acknowledge_load());
    task.await.unwrap().unwrap();
    assert_eq!(coordinator.poll().unwrap(), PollOutcome::Clean);
}

#[tokio::test(start_paused = true)]
async fn switching_surfaces_keeps_the_window() {
    let coordinator = started("# A\n\na\n\n# B\n\nb", SharedTree::default(), CoordinatorConfig::default()).await;
    coordinator
        .zoom_in(heading(&coordinator, "A"), ZoomMode::Full)
        .await
        .unwrap();

    let previous = coordinator
        .switch_surface(Box::new(MarkerAdapter::new()))
        .await
        .unwrap();
    assert_eq!(previous.surface(), Surface::Tree);
    assert_eq!(coordinator.surface_content(), "# A\n\na");
    assert_eq!(coordinator.poll().unwrap(), PollOutcome::Clean);

    coordinator.zoom_out().await.unwrap();
    assert_eq!(coordinator.surface_content(), "# A\n\na\n\n# B\n\nb");
}

#[tokio::test(start_paused = true)]
async fn hierarchy_is_fixed_when_not_zoomed() {
    let coordinator = started("# A\n\n### C\n\n##### E", SharedTree::default(), CoordinatorConfig::default()).await;
    let fixes = coordinator.fix_hierarchy().await.unwrap();
    assert_eq!(fixes.len(), 2);
    assert_eq!(coordinator.document(), "# A\n\n## C\n\n### E");
    assert_eq!(coordinator.surface_content(), coordinator.document());
    assert!(coordinator.fix_hierarchy().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_loop_syncs_and_publishes_the_outline() {
    let surface = SharedTree::default();
    let coordinator = started("# A\n\na", surface.clone(), CoordinatorConfig::default()).await;
    let mut outline = coordinator.outline();

    let runner = coordinator.clone();
    let running = tokio::spawn(async move { runner.run().await });

    surface.insert(2, "# New");
    tokio::time::timeout(
        Duration::from_secs(5),
        outline.wait_for(|entries| entries.iter().any(|entry| entry.title == "New")),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(coordinator.document(), "# A\n\na\n\n# New");

    running.abort();
}
