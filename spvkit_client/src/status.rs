//! Diagnostic views of the wallet.

use std::fmt;

use crate::{config::Purpose, data_api::BlockInfo, sync::KitState};

/// A connected peer, as reported by the P2P collaborator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub host: String,
    pub synced: bool,
    pub best_block: u32,
    pub user_agent: String,
    /// Human-readable descriptions of the tasks running on this peer.
    pub tasks: Vec<String>,
}

/// Read-only view of the peer-to-peer layer.
pub trait PeerManager: Send + Sync {
    fn connected_peers(&self) -> Vec<PeerInfo>;

    /// The host of the peer that blocks are downloaded from.
    fn sync_peer(&self) -> Option<String> {
        None
    }
}

/// A value in a status report: either text or a nested list of named values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusValue {
    Text(String),
    Group(Vec<(String, StatusValue)>),
}

impl From<&str> for StatusValue {
    fn from(s: &str) -> Self {
        StatusValue::Text(s.to_owned())
    }
}

impl From<String> for StatusValue {
    fn from(s: String) -> Self {
        StatusValue::Text(s)
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Text(s) => f.write_str(s),
            StatusValue::Group(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

pub type StatusInfo = Vec<(String, StatusValue)>;

pub(crate) fn status_info(
    state: &KitState,
    last_block: Option<&BlockInfo>,
    purpose: Purpose,
    peer_manager: Option<&dyn PeerManager>,
) -> StatusInfo {
    let na = || StatusValue::from("n/a");
    let mut status: StatusInfo = vec![
        ("state".into(), state.to_string().into()),
        (
            "synced until".into(),
            last_block
                .and_then(|b| b.timestamp)
                .map_or_else(na, |t| t.to_string().into()),
        ),
        (
            "syncing peer".into(),
            peer_manager
                .and_then(|p| p.sync_peer())
                .map_or_else(na, StatusValue::from),
        ),
        ("derivation".into(), purpose.description().into()),
    ];

    let peers = peer_manager.map(|p| p.connected_peers()).unwrap_or_default();
    for (index, peer) in peers.into_iter().enumerate() {
        let tasks = if peer.tasks.is_empty() {
            StatusValue::from("no tasks")
        } else {
            StatusValue::Group(
                peer.tasks
                    .into_iter()
                    .enumerate()
                    .map(|(i, t)| ((i + 1).to_string(), StatusValue::Text(t)))
                    .collect(),
            )
        };
        status.push((
            format!("peer {}", index + 1),
            StatusValue::Group(vec![
                (
                    "status".into(),
                    if peer.synced { "synced" } else { "not synced" }.into(),
                ),
                ("host".into(), peer.host.into()),
                ("best block".into(), peer.best_block.to_string().into()),
                ("user agent".into(), peer.user_agent.into()),
                ("tasks".into(), tasks),
            ]),
        ));
    }
    status
}
