//! Notifications about specific transactions of interest.

use std::sync::{Arc, Mutex};

use spvkit_protocol::{OutPoint, ScriptType, TxId};
use tracing::debug;

use crate::{locks, notify::SerialQueue, transaction::Transaction};

/// What to look for in incoming transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionFilter {
    /// An output paying to the P2SH script with this hash.
    P2shOutput { script_hash: [u8; 20] },
    /// An input spending this output.
    Outpoint { txid: TxId, index: u32 },
}

pub trait WatchedTransactionObserver: Send + Sync {
    fn output_received(&self, transaction: &Transaction, output_index: usize) {
        let _ = (transaction, output_index);
    }

    fn outpoint_spent(&self, transaction: &Transaction, input_index: usize) {
        let _ = (transaction, input_index);
    }
}

/// Matches incoming transactions against registered [`TransactionFilter`]s and notifies
/// their observers on the notification queue.
///
/// An outpoint can only be spent once, so an [`TransactionFilter::Outpoint`] watch is
/// removed after it fires. Script hash watches stay until [`Self::remove`]d.
pub struct WatchedTransactionManager {
    watches: Mutex<Vec<(TransactionFilter, Arc<dyn WatchedTransactionObserver>)>>,
    queue: Arc<SerialQueue>,
}

impl WatchedTransactionManager {
    pub fn new(queue: Arc<SerialQueue>) -> Self {
        WatchedTransactionManager {
            watches: Mutex::new(vec![]),
            queue,
        }
    }

    pub fn add(&self, filter: TransactionFilter, observer: Arc<dyn WatchedTransactionObserver>) {
        debug!("Watching for {:?}", filter);
        locks::lock(&self.watches).push((filter, observer));
    }

    /// Drops every watch registered for `filter`. Returns whether there was one.
    pub fn remove(&self, filter: &TransactionFilter) -> bool {
        let mut watches = locks::lock(&self.watches);
        let before = watches.len();
        watches.retain(|(f, _)| f != filter);
        before != watches.len()
    }

    pub fn len(&self) -> usize {
        locks::lock(&self.watches).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn on_transaction_received(&self, transaction: &Transaction) {
        let watches = locks::lock(&self.watches).clone();
        let mut spent = vec![];
        for (filter, observer) in watches {
            match filter {
                TransactionFilter::P2shOutput { script_hash } => {
                    for (index, output) in transaction.outputs.iter().enumerate() {
                        let pays_to_hash = matches!(
                            output.script_pubkey.classify(),
                            Some((ScriptType::P2sh, hash)) if hash == script_hash
                        );
                        if pays_to_hash {
                            let tx = transaction.clone();
                            let observer = observer.clone();
                            self.queue
                                .dispatch(move || observer.output_received(&tx, index));
                        }
                    }
                }
                TransactionFilter::Outpoint { txid, index } => {
                    let watched = OutPoint::new(txid, index);
                    for (input_index, input) in transaction.inputs.iter().enumerate() {
                        if input.prevout == watched {
                            let tx = transaction.clone();
                            let observer = observer.clone();
                            self.queue
                                .dispatch(move || observer.outpoint_spent(&tx, input_index));
                            spent.push(filter);
                        }
                    }
                }
            }
        }
        if !spent.is_empty() {
            debug!("Outpoint watches fired: {}", spent.len());
            locks::lock(&self.watches).retain(|(f, _)| !spent.contains(f));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use spvkit_protocol::{
        script::Script, value::Satoshis, OutPoint, ScriptType, TxId,
    };

    use super::{TransactionFilter, WatchedTransactionManager, WatchedTransactionObserver};
    use crate::{
        notify::SerialQueue,
        transaction::{Transaction, TxIn, TxOut},
    };

    #[derive(Default)]
    struct Hits(Mutex<Vec<(&'static str, usize)>>);

    impl WatchedTransactionObserver for Hits {
        fn output_received(&self, _: &Transaction, output_index: usize) {
            self.0.lock().unwrap().push(("output", output_index));
        }

        fn outpoint_spent(&self, _: &Transaction, input_index: usize) {
            self.0.lock().unwrap().push(("spent", input_index));
        }
    }

    #[test]
    fn matches_script_hashes_and_outpoints() {
        let queue = Arc::new(SerialQueue::new("test-watch", 8).unwrap());
        let manager = WatchedTransactionManager::new(queue.clone());
        let hits = Arc::new(Hits::default());
        let watched = OutPoint::new(TxId::from_bytes([9; 32]), 3);
        manager.add(
            TransactionFilter::P2shOutput {
                script_hash: [7; 20],
            },
            hits.clone(),
        );
        manager.add(
            TransactionFilter::Outpoint {
                txid: *watched.txid(),
                index: watched.index(),
            },
            hits.clone(),
        );

        let tx = Transaction {
            version: 2,
            inputs: vec![
                TxIn::new(OutPoint::new(TxId::from_bytes([1; 32]), 0), 0),
                TxIn::new(watched, 0),
            ],
            outputs: vec![
                TxOut::new(
                    Satoshis::const_from_u64(1_000),
                    Script::locking(ScriptType::P2pkh, &[7; 20]).unwrap(),
                ),
                TxOut::new(
                    Satoshis::const_from_u64(2_000),
                    Script::locking(ScriptType::P2sh, &[7; 20]).unwrap(),
                ),
            ],
            lock_time: 0,
        };
        manager.on_transaction_received(&tx);
        queue.flush();
        assert_eq!(*hits.0.lock().unwrap(), vec![("output", 1), ("spent", 1)]);

        // The spent outpoint is no longer watched; the script hash still is.
        assert_eq!(manager.len(), 1);
        manager.on_transaction_received(&tx);
        queue.flush();
        assert_eq!(
            *hits.0.lock().unwrap(),
            vec![("output", 1), ("spent", 1), ("output", 1)]
        );

        assert!(manager.remove(&TransactionFilter::P2shOutput {
            script_hash: [7; 20],
        }));
        assert!(manager.is_empty());
        assert!(!manager.remove(&TransactionFilter::P2shOutput {
            script_hash: [7; 20],
        }));
    }
}
