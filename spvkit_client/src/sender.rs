//! Hand-off of signed transactions to the network.

use crate::transaction::Transaction;

#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("Not connected to any peer")]
    NoConnectedPeers,
    #[error("Peers are not synced")]
    PeersNotSynced,
    #[error("Broadcast failed: {0}")]
    Broadcast(String),
}

/// Relays transactions built by the wallet. Peer-to-peer networking happens outside
/// of this crate.
pub trait TransactionSender: Send + Sync {
    /// Checked before a transaction is built, so that a send that cannot be relayed
    /// fails without touching storage or keys.
    fn verify_can_send(&self) -> Result<(), SenderError> {
        Ok(())
    }

    /// Queues `transaction` for relay. The transaction has already been recorded in
    /// storage.
    fn send(&self, transaction: &Transaction) -> Result<(), SenderError>;
}
