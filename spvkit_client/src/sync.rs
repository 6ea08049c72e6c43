//! The synchronization state machine.
//!
//! The [`SyncManager`] starts and stops the network collaborators, a [`PeerGroup`] for
//! block download and optionally an [`ApiSyncer`] that restores history from an
//! indexing API first. The collaborators report back through the `on_*` methods, which
//! drive the wallet's [`KitState`].

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    locks,
    notify::{EventOutbox, EventSink, WalletEvent},
};

/// How a new wallet discovers its history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Download and filter blocks from peers only.
    Full,
    /// Restore history from an indexing API, then continue with peers.
    Api,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncStateError {
    #[error("Sync is not started")]
    NotStarted,
    #[error("Sync failed: {0}")]
    Failed(String),
}

/// The synchronization state of the wallet.
///
/// Two `NotSynced` states are equal when their errors render to the same message, even
/// if the errors are of different types.
#[derive(Clone, Debug)]
pub enum KitState {
    Synced,
    /// Restoring from an indexing API; `transactions` found so far.
    ApiSyncing { transactions: usize },
    /// Downloading blocks; `progress` runs from 0 to 1.
    Syncing { progress: f64 },
    NotSynced(Arc<dyn Error + Send + Sync>),
}

impl KitState {
    pub fn not_synced(error: impl Error + Send + Sync + 'static) -> Self {
        KitState::NotSynced(Arc::new(error))
    }

    pub fn is_synced(&self) -> bool {
        matches!(self, KitState::Synced)
    }
}

impl PartialEq for KitState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (KitState::Synced, KitState::Synced) => true,
            (
                KitState::ApiSyncing { transactions: a },
                KitState::ApiSyncing { transactions: b },
            ) => a == b,
            (KitState::Syncing { progress: a }, KitState::Syncing { progress: b }) => a == b,
            (KitState::NotSynced(a), KitState::NotSynced(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

impl fmt::Display for KitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KitState::Synced => write!(f, "Synced"),
            KitState::ApiSyncing { transactions } => write!(f, "ApiSyncing-{}", transactions),
            KitState::Syncing { progress } => write!(f, "Syncing-{}", (progress * 100.0) as u32),
            KitState::NotSynced(e) => write!(f, "NotSynced-{}", e),
        }
    }
}

/// Block download from peers.
pub trait PeerGroup: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

/// History restoration from an indexing API.
pub trait ApiSyncer: Send + Sync {
    fn start(&self);
    fn stop(&self);
}

struct Control {
    running: bool,
    api_synced: bool,
}

/// Owns the wallet's [`KitState`].
///
/// Every state change is published as [`WalletEvent::KitStateUpdated`], once: a report
/// that would not change the state publishes nothing. Reports arriving while the
/// manager is stopped are ignored.
pub struct SyncManager {
    peer_group: Arc<dyn PeerGroup>,
    api_syncer: Option<Arc<dyn ApiSyncer>>,
    sync_mode: SyncMode,
    control: Mutex<Control>,
    state: RwLock<KitState>,
    events: EventOutbox,
}

impl SyncManager {
    pub fn new(
        peer_group: Arc<dyn PeerGroup>,
        api_syncer: Option<Arc<dyn ApiSyncer>>,
        sync_mode: SyncMode,
        sink: EventSink,
    ) -> Self {
        SyncManager {
            peer_group,
            api_syncer,
            sync_mode,
            control: Mutex::new(Control {
                running: false,
                api_synced: false,
            }),
            state: RwLock::new(KitState::not_synced(SyncStateError::NotStarted)),
            events: EventOutbox::new(sink),
        }
    }

    pub fn state(&self) -> KitState {
        locks::read(&self.state).clone()
    }

    /// Sets the state and queues it for publication if it changed. Callers hold the
    /// control lock, which keeps publications in transition order, and drain the outbox
    /// once they have released it.
    fn transition(&self, _control: &Control, new_state: KitState) {
        {
            let mut state = locks::write(&self.state);
            if *state == new_state {
                return;
            }
            *state = new_state.clone();
        }
        info!("Kit state: {}", new_state);
        self.events.push(WalletEvent::KitStateUpdated(new_state));
    }

    fn api_syncer_pending(&self, control: &Control) -> Option<Arc<dyn ApiSyncer>> {
        match self.sync_mode {
            SyncMode::Api if !control.api_synced => self.api_syncer.clone(),
            _ => None,
        }
    }

    /// Starts syncing. Does nothing if already running.
    pub fn start(&self) {
        let api_syncer = {
            let mut control = locks::lock(&self.control);
            if control.running {
                return;
            }
            control.running = true;
            info!("Starting sync");

            let api_syncer = self.api_syncer_pending(&control);
            let initial = match api_syncer {
                Some(_) => KitState::ApiSyncing { transactions: 0 },
                None => KitState::Syncing { progress: 0.0 },
            };
            self.transition(&control, initial);
            api_syncer
        };
        self.events.drain();

        match api_syncer {
            Some(api_syncer) => api_syncer.start(),
            None => self.peer_group.start(),
        }
    }

    /// Stops syncing and publishes `NotSynced(NotStarted)`. Does nothing if not running.
    pub fn stop(&self) {
        {
            let mut control = locks::lock(&self.control);
            if !control.running {
                return;
            }
            control.running = false;
            info!("Stopping sync");
            self.transition(&control, KitState::not_synced(SyncStateError::NotStarted));
        }
        self.events.drain();
        self.stop_collaborators();
    }

    fn stop_collaborators(&self) {
        if let Some(api_syncer) = &self.api_syncer {
            api_syncer.stop();
        }
        self.peer_group.stop();
    }

    /// Applies `f` to the control state if running, then publishes what it queued.
    fn if_running(&self, f: impl FnOnce(&mut Control)) {
        {
            let mut control = locks::lock(&self.control);
            if control.running {
                f(&mut control);
            }
        }
        self.events.drain();
    }

    pub fn on_api_sync_progress(&self, transactions: usize) {
        self.if_running(|control| {
            self.transition(control, KitState::ApiSyncing { transactions })
        });
    }

    /// The indexing API has delivered the wallet's history; continue with peers.
    pub fn on_api_synced(&self) {
        let mut start_peers = false;
        self.if_running(|control| {
            control.api_synced = true;
            self.transition(control, KitState::Syncing { progress: 0.0 });
            start_peers = true;
        });
        if start_peers {
            self.peer_group.start();
        }
    }

    pub fn on_initial_download_progress(&self, progress: f64) {
        self.if_running(|control| {
            let state = if progress >= 1.0 {
                KitState::Synced
            } else {
                KitState::Syncing {
                    progress: progress.max(0.0),
                }
            };
            self.transition(control, state)
        });
    }

    pub fn on_initial_download_synced(&self) {
        self.if_running(|control| self.transition(control, KitState::Synced));
    }

    /// A collaborator failed. Sync stops until [`Self::start`] is called again.
    pub fn on_error(&self, error: impl Error + Send + Sync + 'static) {
        let mut failed = false;
        self.if_running(|control| {
            control.running = false;
            self.transition(control, KitState::not_synced(error));
            failed = true;
        });
        if failed {
            self.stop_collaborators();
        }
    }
}
