//! Interfaces for wallet data persistence & retrieval.
//!
//! The wallet engine does not own a storage engine. The host supplies one that
//! implements [`WalletRead`] for the read side (balances, history, unspent outputs and
//! keys) and [`WalletWrite`] for the handful of mutations that the engine itself
//! performs: recording derived keys, marking keys used, and recording transactions
//! that it created.

use std::error::Error;

use spvkit_protocol::{consensus::BlockHeight, value::Satoshis, OutPoint, TxId};

use crate::{
    transaction::Transaction,
    wallet::{PublicKey, PublicKeyWithUsedState, UnspentOutput},
};

/// Balance totals of the wallet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceInfo {
    /// Value of outputs that can be spent right away.
    pub spendable: Satoshis,
    /// Value of outputs locked by a plugin (for example a time lock).
    pub unspendable_time_locked: Satoshis,
    /// Value of outputs whose creating transaction has not yet been relayed.
    pub unspendable_not_relayed: Satoshis,
}

/// The best block known to the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: String,
    pub height: BlockHeight,
    pub timestamp: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    New,
    Relayed,
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionType {
    Incoming,
    Outgoing,
    SentToSelf,
}

/// Restricts a history query to one direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionFilterType {
    Incoming,
    Outgoing,
}

impl TransactionFilterType {
    pub fn matches(&self, tx_type: TransactionType) -> bool {
        match self {
            TransactionFilterType::Incoming => {
                matches!(tx_type, TransactionType::Incoming | TransactionType::SentToSelf)
            }
            TransactionFilterType::Outgoing => {
                matches!(tx_type, TransactionType::Outgoing | TransactionType::SentToSelf)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInputInfo {
    pub mine: bool,
    pub value: Option<Satoshis>,
    pub address: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionOutputInfo {
    pub mine: bool,
    pub change_output: bool,
    pub value: Satoshis,
    pub address: Option<String>,
    pub memo: Option<String>,
    pub plugin_id: Option<u8>,
    pub plugin_data: Option<Vec<u8>>,
}

/// The wallet's view of a transaction.
///
/// `uid` is assigned by storage when the transaction is first seen and survives
/// replacement of the transaction (for example by a fee bump), unlike `txid`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionInfo {
    pub uid: String,
    pub txid: TxId,
    pub transaction_index: u32,
    pub inputs: Vec<TransactionInputInfo>,
    pub outputs: Vec<TransactionOutputInfo>,
    /// Net change in the wallet's balance, in satoshis.
    pub amount: i64,
    pub tx_type: TransactionType,
    pub fee: Option<Satoshis>,
    pub block_height: Option<BlockHeight>,
    pub timestamp: u64,
    pub status: TransactionStatus,
    pub conflicting_txid: Option<TxId>,
    pub rbf_enabled: bool,
}

/// An error reported by the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The backend failed.
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn Error + Send + Sync>),
}

/// Read-only operations required for wallet functionality.
///
/// This trait defines the read-only portion of the storage interface; it is not
/// expected to be a complete view of the persisted data, only what the engine needs.
pub trait WalletRead: Send + Sync {
    /// Returns the best block known to storage, if any.
    fn last_block(&self) -> Result<Option<BlockInfo>, StorageError>;

    /// Returns history ordered from newest to oldest, starting after the transaction
    /// with uid `from_uid` when given.
    fn transactions(
        &self,
        from_uid: Option<&str>,
        filter: Option<TransactionFilterType>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionInfo>, StorageError>;

    fn transaction(&self, txid: &TxId) -> Result<Option<TransactionInfo>, StorageError>;

    /// Returns the network serialization of a transaction known to the wallet.
    fn raw_transaction(&self, txid: &TxId) -> Result<Option<Vec<u8>>, StorageError>;

    /// Returns every unspent output of the wallet, spendable or not.
    fn unspent_outputs(&self) -> Result<Vec<UnspentOutput>, StorageError>;

    /// Returns all derived keys of the given account.
    fn public_keys(&self, account: u32) -> Result<Vec<PublicKeyWithUsedState>, StorageError>;
}

/// The mutations that the wallet engine performs itself.
pub trait WalletWrite: WalletRead {
    /// Persists newly derived public keys. Keys already known are ignored.
    fn add_public_keys(&self, keys: Vec<PublicKey>) -> Result<(), StorageError>;

    fn mark_public_keys_used(&self, keys: &[PublicKey]) -> Result<(), StorageError>;

    /// Records a transaction built by this wallet and marks `spent` as no longer
    /// unspent. Called before the transaction is handed to the network.
    fn process_created(
        &self,
        transaction: &Transaction,
        spent: &[OutPoint],
    ) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::{TransactionFilterType, TransactionType};

    #[test]
    fn sent_to_self_matches_both_directions() {
        assert!(TransactionFilterType::Incoming.matches(TransactionType::SentToSelf));
        assert!(TransactionFilterType::Outgoing.matches(TransactionType::SentToSelf));
        assert!(!TransactionFilterType::Outgoing.matches(TransactionType::Incoming));
    }
}
