//! Ties the store, the active surface, the state machine and the outline
//! together.

use crate::ack::{AckOutcome, AckSlot};
use crate::config::CoordinatorConfig;
use crate::outline::{OutlineEntry, OutlineProjection, outline_entries};
use crate::state::{ContentState, ContentStateMachine, StateError, Transition};
use crate::sync::{PollOutcome, Suppression, sync_once};
use crate::zoom::ZoomWindow;
use md_sections_core::{BlockId, LevelFix, OrderWindow, SectionMeta, ZoomMode};
use md_sections_doc::DocumentView;
use md_sections_storage::{BlockStore, ReplaceOutcome, StoreError};
use md_sections_sync::{
    AdapterError, EditorAdapter, LoadStatus, ValidationError, ValidationLimits,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not zoomed in")]
    NotZoomed,
    #[error("cannot {0} while zoomed in")]
    Zoomed(&'static str),
    #[error("surface did not acknowledge new content within {0:?}")]
    AckTimeout(Duration),
    #[error("operation was reset by the watchdog")]
    Superseded,
    #[error("pending reorder was cancelled")]
    Cancelled,
    #[error("no async runtime to schedule on")]
    NoRuntime,
}

struct Session {
    store: BlockStore,
    adapter: Box<dyn EditorAdapter>,
    zoom: Option<ZoomWindow>,
}

impl Session {
    fn flush(&mut self, limits: &ValidationLimits) -> Result<(), CoordinatorError> {
        sync_once(
            &mut self.store,
            self.zoom.as_mut(),
            self.adapter.as_mut(),
            limits,
        )?;
        Ok(())
    }

    /// What the surface should show: the window if zoomed, else everything.
    fn current_view(&self) -> DocumentView {
        match &self.zoom {
            Some(window) => window.view().clone(),
            None => self.store.view(OrderWindow::unbounded()),
        }
    }

    fn outline(&self) -> Vec<OutlineEntry> {
        outline_entries(&self.store, self.zoom.as_ref().map(ZoomWindow::members))
    }
}

struct Inner {
    config: CoordinatorConfig,
    limits: ValidationLimits,
    session: Mutex<Session>,
    state: ContentStateMachine,
    ack: AckSlot,
    outline: OutlineProjection,
    suppression: Suppression,
    reorder: Mutex<Option<JoinHandle<Result<bool, CoordinatorError>>>>,
}

/// The coordination service.
///
/// Cheap to clone; clones share everything. Structural operations
/// (`zoom_in`, `zoom_out`, `reorder_sections`, `switch_surface`,
/// `replace_zoomed_content`, `fix_hierarchy`, `bootstrap`) each own the
/// content state machine for their duration, so at most one of them writes
/// to the store at a time.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("state", &self.inner.state.current())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Coordinator {
    pub fn new(
        store: BlockStore,
        adapter: Box<dyn EditorAdapter>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_limits(store, adapter, config, ValidationLimits::default())
    }

    pub fn with_limits(
        store: BlockStore,
        adapter: Box<dyn EditorAdapter>,
        config: CoordinatorConfig,
        limits: ValidationLimits,
    ) -> Self {
        let inner = Arc::new(Inner {
            state: ContentStateMachine::new(config.watchdog_timeout()),
            config,
            limits,
            session: Mutex::new(Session {
                store,
                adapter,
                zoom: None,
            }),
            ack: AckSlot::new(),
            outline: OutlineProjection::new(),
            suppression: Suppression::default(),
            reorder: Mutex::new(None),
        });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.state.on_forced_reset(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.ack.clear();
                debug!(state = %state, "cleared pending acknowledgement");
            }
        });
        Self { inner }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ContentState {
        self.inner.state.current()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ContentState> {
        self.inner.state.subscribe()
    }

    pub async fn wait_idle(&self) {
        self.inner.state.wait_idle().await
    }

    pub fn outline(&self) -> watch::Receiver<Arc<Vec<OutlineEntry>>> {
        self.inner.outline.subscribe()
    }

    pub fn current_outline(&self) -> Arc<Vec<OutlineEntry>> {
        self.inner.outline.current()
    }

    pub fn is_zoomed(&self) -> bool {
        self.inner.session.lock().zoom.is_some()
    }

    /// Ids shown while zoomed.
    pub fn members(&self) -> Option<BTreeSet<BlockId>> {
        self.inner
            .session
            .lock()
            .zoom
            .as_ref()
            .map(|window| window.members().clone())
    }

    pub fn zoom_window(&self) -> Option<OrderWindow> {
        self.inner.session.lock().zoom.as_ref().map(ZoomWindow::window)
    }

    /// Reads the store under the session lock.
    pub fn with_store<R>(&self, read: impl FnOnce(&BlockStore) -> R) -> R {
        read(&self.inner.session.lock().store)
    }

    pub fn document(&self) -> String {
        self.with_store(BlockStore::document)
    }

    /// The active surface's content without markers.
    pub fn surface_content(&self) -> String {
        self.inner.session.lock().adapter.content()
    }

    /// Called by a surface that answered a load with
    /// [`LoadStatus::AwaitingAck`]. False when nothing was waiting.
    pub fn acknowledge_load(&self) -> bool {
        self.inner.ack.acknowledge()
    }

    pub fn update_section_meta(&self, id: BlockId, meta: SectionMeta) -> Result<(), CoordinatorError> {
        self.inner.session.lock().store.update_section_meta(id, meta)?;
        Ok(())
    }

    /// One sync step. Skipped while suppressed or while an operation owns
    /// the state machine.
    pub fn poll(&self) -> Result<PollOutcome, CoordinatorError> {
        if self.inner.suppression.is_active() {
            return Ok(PollOutcome::Suppressed);
        }
        if !self.inner.state.is_idle() {
            debug!(state = %self.inner.state.current(), "poll skipped");
            return Ok(PollOutcome::Busy);
        }
        let mut session = self.inner.session.lock();
        let session = &mut *session;
        let applied = sync_once(
            &mut session.store,
            session.zoom.as_mut(),
            session.adapter.as_mut(),
            &self.inner.limits,
        )?;
        Ok(applied.map_or(PollOutcome::Clean, PollOutcome::Applied))
    }

    /// Loads the whole document into the surface.
    pub async fn bootstrap(&self) -> Result<(), CoordinatorError> {
        let transition = self.inner.state.enter(ContentState::Bootstrapping)?;
        let _quiet = self.inner.suppression.hold();
        let view = {
            let mut session = self.inner.session.lock();
            session.zoom = None;
            session.store.view(OrderWindow::unbounded())
        };
        self.load_surface(&view, &transition).await?;
        info!(units = view.ids().len(), "surface bootstrapped");
        self.finish(transition);
        Ok(())
    }

    pub async fn zoom_in(&self, heading_id: BlockId, mode: ZoomMode) -> Result<(), CoordinatorError> {
        let transition = self.inner.state.enter(ContentState::ZoomingIn)?;
        let _quiet = self.inner.suppression.hold();
        let window = {
            let mut session = self.inner.session.lock();
            session.flush(&self.inner.limits)?;
            ZoomWindow::open(&session.store, heading_id, mode)?
        };
        if let Err(err) = self.load_surface(window.view(), &transition).await {
            self.restore_surface();
            return Err(err);
        }
        let members = window.members().len();
        self.inner.session.lock().zoom = Some(window);
        info!(heading = %heading_id, ?mode, members, "zoomed in");
        self.finish(transition);
        Ok(())
    }

    /// Leaves the window and reloads the whole document from the store,
    /// then runs the hierarchy correction deferred while zoomed.
    pub async fn zoom_out(&self) -> Result<Vec<LevelFix>, CoordinatorError> {
        if !self.is_zoomed() {
            return Err(CoordinatorError::NotZoomed);
        }
        let transition = self.inner.state.enter(ContentState::ZoomingOut)?;
        {
            let _quiet = self.inner.suppression.hold();
            let view = {
                let mut session = self.inner.session.lock();
                session.flush(&self.inner.limits)?;
                session.zoom = None;
                session.store.view(OrderWindow::unbounded())
            };
            self.load_surface(&view, &transition).await?;
        }
        info!("zoomed out");
        self.finish(transition);
        self.fix_hierarchy().await
    }

    /// Hands a new whole-window text to the store and moves the window end
    /// by the shift the store reports.
    pub async fn replace_zoomed_content(&self, markdown: &str) -> Result<ReplaceOutcome, CoordinatorError> {
        if !self.is_zoomed() {
            return Err(CoordinatorError::NotZoomed);
        }
        let transition = self.inner.state.enter(ContentState::Replacing)?;
        let _quiet = self.inner.suppression.hold();
        let (outcome, view) = {
            let mut session = self.inner.session.lock();
            let session = &mut *session;
            let window = session.zoom.as_mut().ok_or(CoordinatorError::NotZoomed)?;
            let outcome = session
                .store
                .replace_in_range(window.window(), markdown, None)?;
            window.absorb_replace(&outcome, &session.store);
            (outcome, window.view().clone())
        };
        self.load_surface(&view, &transition).await?;
        self.finish(transition);
        Ok(outcome)
    }

    /// Swaps the active surface, flushing the outgoing one first. Returns
    /// the outgoing adapter.
    pub async fn switch_surface(
        &self,
        adapter: Box<dyn EditorAdapter>,
    ) -> Result<Box<dyn EditorAdapter>, CoordinatorError> {
        let transition = self.inner.state.enter(ContentState::SwitchingSurface)?;
        let _quiet = self.inner.suppression.hold();
        let (previous, view) = {
            let mut session = self.inner.session.lock();
            session.flush(&self.inner.limits)?;
            let previous = std::mem::replace(&mut session.adapter, adapter);
            (previous, session.current_view())
        };
        let incoming = self.inner.session.lock().adapter.surface();
        self.load_surface(&view, &transition).await?;
        info!(from = %previous.surface(), to = %incoming, "switched surface");
        self.finish(transition);
        Ok(previous)
    }

    /// Demotes headings that skip a level. Skipped while zoomed; zooming out
    /// runs it.
    pub async fn fix_hierarchy(&self) -> Result<Vec<LevelFix>, CoordinatorError> {
        {
            let session = self.inner.session.lock();
            if session.zoom.is_some() {
                debug!("hierarchy correction deferred while zoomed");
                return Ok(Vec::new());
            }
            if session.store.pending_level_fixes().is_empty() {
                return Ok(Vec::new());
            }
        }
        let transition = self.inner.state.enter(ContentState::FixingHierarchy)?;
        let _quiet = self.inner.suppression.hold();
        let (fixes, view) = {
            let mut session = self.inner.session.lock();
            session.flush(&self.inner.limits)?;
            let fixes = session.store.fix_hierarchy()?;
            (fixes, session.store.view(OrderWindow::unbounded()))
        };
        if !fixes.is_empty() {
            self.load_surface(&view, &transition).await?;
        }
        self.finish(transition);
        Ok(fixes)
    }

    /// Schedules a section reorder. Persistence is debounced; a newer call
    /// cancels an older one that has not landed yet.
    pub fn reorder_sections(&self, order: Vec<BlockId>) -> Result<(), CoordinatorError> {
        if self.is_zoomed() {
            return Err(CoordinatorError::Zoomed("reorder sections"));
        }
        let runtime = Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;
        let worker = self.clone();
        let mut pending = self.inner.reorder.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
            debug!("superseded pending reorder");
        }
        *pending = Some(runtime.spawn(async move {
            let result = worker.persist_reorder(order).await;
            if let Err(err) = &result {
                error!(%err, "reorder failed");
            }
            result
        }));
        Ok(())
    }

    /// Waits for the latest scheduled reorder. `Ok(false)` when none was
    /// pending or it changed nothing.
    pub async fn settle_reorder(&self) -> Result<bool, CoordinatorError> {
        let handle = self.inner.reorder.lock().take();
        match handle {
            Some(handle) => handle.await.map_err(|_| CoordinatorError::Cancelled)?,
            None => Ok(false),
        }
    }

    async fn persist_reorder(&self, order: Vec<BlockId>) -> Result<bool, CoordinatorError> {
        tokio::time::sleep(self.inner.config.reorder_debounce()).await;
        let transition = self
            .inner
            .state
            .enter_when_idle(ContentState::Reordering)
            .await?;
        let _quiet = self.inner.suppression.hold();
        let view = {
            let mut session = self.inner.session.lock();
            if session.zoom.is_some() {
                return Err(CoordinatorError::Zoomed("reorder sections"));
            }
            session.flush(&self.inner.limits)?;
            session
                .store
                .reorder_sections(&order)?
                .then(|| session.store.view(OrderWindow::unbounded()))
        };
        let moved = view.is_some();
        if let Some(view) = view {
            self.load_surface(&view, &transition).await?;
        }
        self.finish(transition);
        Ok(moved)
    }

    /// Polls on the configured interval and keeps the outline current until
    /// the store goes away.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.inner.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut revisions = self.inner.session.lock().store.subscribe();
        let mut states = self.inner.state.subscribe();
        self.republish();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.poll() {
                        error!(%err, "sync poll failed");
                    }
                }
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_store_changed().await;
                }
                changed = states.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *states.borrow_and_update();
                    if state == ContentState::Idle {
                        self.republish();
                    }
                }
            }
        }
    }

    async fn on_store_changed(&self) {
        let published = self
            .inner
            .outline
            .consume(&self.inner.state, || self.inner.session.lock().outline());
        if !published {
            return;
        }
        if let Err(err) = self.fix_hierarchy().await {
            warn!(%err, "hierarchy correction failed");
        }
    }

    fn republish(&self) {
        let entries = self.inner.session.lock().outline();
        if self.inner.outline.publish(entries) {
            debug!("outline republished");
        }
    }

    /// Returns to idle and republishes the outline once, recovering any
    /// update dropped while the operation ran.
    fn finish(&self, transition: Transition) {
        let state = transition.state();
        if !transition.finish() {
            warn!(state = %state, "operation finished after a watchdog reset");
        }
        self.republish();
    }

    async fn load_surface(
        &self,
        view: &DocumentView,
        transition: &Transition,
    ) -> Result<(), CoordinatorError> {
        let pending = self.inner.ack.arm();
        let status = self.inner.session.lock().adapter.load_with_ids(view);
        match status {
            Ok(LoadStatus::Applied) => {
                self.inner.ack.clear();
                Ok(())
            }
            Ok(LoadStatus::AwaitingAck) => {
                let timeout = self.inner.config.ack_timeout();
                match self.inner.ack.wait(pending, timeout).await {
                    AckOutcome::Acknowledged if transition.is_current() => Ok(()),
                    AckOutcome::Acknowledged | AckOutcome::Abandoned => {
                        Err(CoordinatorError::Superseded)
                    }
                    AckOutcome::TimedOut => Err(CoordinatorError::AckTimeout(timeout)),
                }
            }
            Err(err) => {
                self.inner.ack.clear();
                Err(err.into())
            }
        }
    }

    /// Best-effort reload of whatever the store says the surface should
    /// show, after a transition failed part way.
    fn restore_surface(&self) {
        let mut session = self.inner.session.lock();
        let view = session.current_view();
        if let Err(err) = session.adapter.load_with_ids(&view) {
            warn!(%err, "surface could not be restored");
        }
    }
}
