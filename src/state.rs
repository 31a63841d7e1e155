//! The content state machine.
//!
//! One enumerated state serializes every structural operation against the
//! store. Only `idle -> X` and `X -> idle` are legal. A [`Transition`] is the
//! proof that an operation owns the machine; it is obtained synchronously, so
//! callers hold it before their first suspension point.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentState {
    Idle,
    Bootstrapping,
    ZoomingIn,
    ZoomingOut,
    Reordering,
    SwitchingSurface,
    Replacing,
    FixingHierarchy,
}

impl ContentState {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Bootstrapping => "bootstrapping",
            Self::ZoomingIn => "zooming in",
            Self::ZoomingOut => "zooming out",
            Self::Reordering => "reordering",
            Self::SwitchingSurface => "switching surface",
            Self::Replacing => "replacing",
            Self::FixingHierarchy => "fixing hierarchy",
        }
    }
}

impl fmt::Display for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("cannot start {requested} while {current}")]
    Busy {
        current: ContentState,
        requested: ContentState,
    },
    #[error("idle is not an operation")]
    IdleRequested,
}

type ResetHook = Box<dyn Fn(ContentState) + Send + Sync>;

struct Slot {
    state: ContentState,
    /// Bumped on every entry and every forced reset, so a stale
    /// [`Transition`] can never return someone else's state to idle.
    epoch: u64,
    watchdog: Option<JoinHandle<()>>,
}

struct Shared {
    slot: Mutex<Slot>,
    feed: watch::Sender<ContentState>,
    watchdog_timeout: Duration,
    reset_hooks: Mutex<Vec<ResetHook>>,
}

#[derive(Clone)]
pub struct ContentStateMachine {
    shared: Arc<Shared>,
}

impl fmt::Debug for ContentStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.shared.slot.lock();
        f.debug_struct("ContentStateMachine")
            .field("state", &slot.state)
            .field("epoch", &slot.epoch)
            .finish()
    }
}

impl ContentStateMachine {
    pub fn new(watchdog_timeout: Duration) -> Self {
        let (feed, _) = watch::channel(ContentState::Idle);
        Self {
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    state: ContentState::Idle,
                    epoch: 0,
                    watchdog: None,
                }),
                feed,
                watchdog_timeout,
                reset_hooks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn current(&self) -> ContentState {
        self.shared.slot.lock().state
    }

    pub fn is_idle(&self) -> bool {
        self.current() == ContentState::Idle
    }

    /// Every state change, including forced resets.
    pub fn subscribe(&self) -> watch::Receiver<ContentState> {
        self.shared.feed.subscribe()
    }

    /// Runs `hook` with the stuck state whenever the watchdog forces idle.
    pub fn on_forced_reset(&self, hook: impl Fn(ContentState) + Send + Sync + 'static) {
        self.shared.reset_hooks.lock().push(Box::new(hook));
    }

    /// Leaves idle for `state` and arms the watchdog.
    pub fn enter(&self, state: ContentState) -> Result<Transition, StateError> {
        if state == ContentState::Idle {
            return Err(StateError::IdleRequested);
        }
        let epoch = {
            let mut slot = self.shared.slot.lock();
            if slot.state != ContentState::Idle {
                return Err(StateError::Busy {
                    current: slot.state,
                    requested: state,
                });
            }
            slot.state = state;
            slot.epoch += 1;
            slot.watchdog = self.arm(slot.epoch);
            slot.epoch
        };
        self.shared.feed.send_replace(state);
        info!(state = %state, "left idle");
        Ok(Transition {
            machine: self.clone(),
            epoch,
            state,
            finished: false,
        })
    }

    /// Like [`enter`](Self::enter), but waits out whatever is running first.
    pub async fn enter_when_idle(&self, state: ContentState) -> Result<Transition, StateError> {
        let mut feed = self.subscribe();
        loop {
            match self.enter(state) {
                Err(StateError::Busy { current, .. }) => {
                    debug!(waiting = %state, current = %current, "waiting for idle");
                }
                other => return other,
            }
            // The sender lives as long as `self`, so this cannot fail.
            let _ = feed.wait_for(|state| *state == ContentState::Idle).await;
        }
    }

    pub async fn wait_idle(&self) {
        let mut feed = self.subscribe();
        let _ = feed.wait_for(|state| *state == ContentState::Idle).await;
    }

    fn arm(&self, epoch: u64) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            debug!("no runtime, watchdog not armed");
            return None;
        };
        let shared = Arc::downgrade(&self.shared);
        let timeout = self.shared.watchdog_timeout;
        Some(runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            force_reset(shared, epoch);
        }))
    }

    fn leave(&self, epoch: u64) -> bool {
        let state = {
            let mut slot = self.shared.slot.lock();
            if slot.epoch != epoch || slot.state == ContentState::Idle {
                return false;
            }
            if let Some(watchdog) = slot.watchdog.take() {
                watchdog.abort();
            }
            std::mem::replace(&mut slot.state, ContentState::Idle)
        };
        self.shared.feed.send_replace(ContentState::Idle);
        info!(state = %state, "returned to idle");
        true
    }
}

fn force_reset(shared: Weak<Shared>, epoch: u64) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let stuck = {
        let mut slot = shared.slot.lock();
        if slot.epoch != epoch || slot.state == ContentState::Idle {
            return;
        }
        slot.epoch += 1;
        slot.watchdog = None;
        std::mem::replace(&mut slot.state, ContentState::Idle)
    };
    warn!(
        state = %stuck,
        timeout_ms = shared.watchdog_timeout.as_millis() as u64,
        "watchdog forced return to idle"
    );
    for hook in shared.reset_hooks.lock().iter() {
        hook(stuck);
    }
    shared.feed.send_replace(ContentState::Idle);
}

/// Ownership of the machine for one operation. Dropping it returns to idle.
pub struct Transition {
    machine: ContentStateMachine,
    epoch: u64,
    state: ContentState,
    finished: bool,
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("state", &self.state)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Transition {
    pub fn state(&self) -> ContentState {
        self.state
    }

    /// False once the watchdog has reset the machine under this operation.
    pub fn is_current(&self) -> bool {
        self.machine.shared.slot.lock().epoch == self.epoch
    }

    /// Returns to idle. False if the watchdog got there first.
    pub fn finish(mut self) -> bool {
        self.finished = true;
        self.machine.leave(self.epoch)
    }
}

impl Drop for Transition {
    fn drop(&mut self) {
        if !self.finished {
            self.machine.leave(self.epoch);
        }
    }
}
