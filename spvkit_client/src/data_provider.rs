//! The read side of the wallet, with change notifications.

use std::sync::{Arc, Mutex, RwLock};

use spvkit_protocol::TxId;
use tracing::warn;

use crate::{
    data_api::{
        BalanceInfo, BlockInfo, StorageError, TransactionFilterType, TransactionInfo, WalletRead,
    },
    input_selection::UnspentOutputProvider,
    locks,
    notify::{EventOutbox, EventSink, WalletEvent},
};

/// Caches the balance and the best block, and publishes changes to them along with
/// changes to the transaction history.
///
/// The storage collaborator calls the `on_*` methods after it has applied a change.
pub struct DataProvider {
    storage: Arc<dyn WalletRead>,
    unspent_outputs: Arc<UnspentOutputProvider>,
    balance: RwLock<BalanceInfo>,
    last_block: RwLock<Option<BlockInfo>>,
    /// Serializes updates so that events are queued in the order the caches change.
    publish: Mutex<()>,
    events: EventOutbox,
}

impl DataProvider {
    pub fn new(
        storage: Arc<dyn WalletRead>,
        unspent_outputs: Arc<UnspentOutputProvider>,
        sink: EventSink,
    ) -> Result<Self, crate::Error> {
        let balance = unspent_outputs.balance()?;
        let last_block = storage.last_block()?;
        Ok(DataProvider {
            storage,
            unspent_outputs,
            balance: RwLock::new(balance),
            last_block: RwLock::new(last_block),
            publish: Mutex::new(()),
            events: EventOutbox::new(sink),
        })
    }

    pub fn balance(&self) -> BalanceInfo {
        *locks::read(&self.balance)
    }

    pub fn last_block_info(&self) -> Option<BlockInfo> {
        locks::read(&self.last_block).clone()
    }

    fn refresh_balance(&self) {
        match self.unspent_outputs.balance() {
            Ok(balance) => {
                {
                    let mut cached = locks::write(&self.balance);
                    if *cached == balance {
                        return;
                    }
                    *cached = balance;
                }
                self.events.push(WalletEvent::BalanceUpdated(balance));
            }
            Err(e) => warn!("Failed to recompute balance: {}", e),
        }
    }

    pub fn on_transactions_updated(
        &self,
        inserted: Vec<TransactionInfo>,
        updated: Vec<TransactionInfo>,
    ) {
        {
            let _publish = locks::lock(&self.publish);
            self.events
                .push(WalletEvent::TransactionsUpdated { inserted, updated });
            self.refresh_balance();
        }
        self.events.drain();
    }

    pub fn on_transactions_deleted(&self, txids: Vec<TxId>) {
        {
            let _publish = locks::lock(&self.publish);
            self.events.push(WalletEvent::TransactionsDeleted(txids));
            self.refresh_balance();
        }
        self.events.drain();
    }

    /// A new best block can make plugin-locked outputs spendable, so the balance is
    /// recomputed as well.
    pub fn on_last_block_updated(&self, block: BlockInfo) {
        {
            let _publish = locks::lock(&self.publish);
            *locks::write(&self.last_block) = Some(block.clone());
            self.events.push(WalletEvent::LastBlockInfoUpdated(block));
            self.refresh_balance();
        }
        self.events.drain();
    }

    pub fn transactions(
        &self,
        from_uid: Option<&str>,
        filter: Option<TransactionFilterType>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionInfo>, StorageError> {
        self.storage.transactions(from_uid, filter, limit)
    }

    pub fn transaction(&self, txid: &TxId) -> Result<Option<TransactionInfo>, StorageError> {
        self.storage.transaction(txid)
    }

    /// The hex-encoded network serialization of a wallet transaction.
    pub fn raw_transaction(&self, txid: &TxId) -> Result<Option<String>, StorageError> {
        Ok(self.storage.raw_transaction(txid)?.map(hex::encode))
    }
}
