//! Utilities for testing wallets based upon this crate.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use spvkit_protocol::{
    hash::{hash160, sha256},
    script::Script,
    value::Satoshis,
    OutPoint, ScriptType, TxId,
};

use crate::{
    builder::InputToSign,
    data_api::{
        BalanceInfo, BlockInfo, StorageError, TransactionFilterType, TransactionInfo,
        WalletRead, WalletWrite,
    },
    keys::{KeyError, PublicKeyDeriver},
    locks,
    notify::{WalletEvent, WalletObserver},
    sender::{SenderError, TransactionSender},
    signer::{InputSigner, SignerError},
    sync::{ApiSyncer, KitState, PeerGroup},
    transaction::{Transaction, TxOut},
    wallet::{PublicKey, PublicKeyWithUsedState, UnspentOutput},
};

/// A mainnet P2PKH address (of the secp256k1 generator point).
pub const P2PKH_ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

fn mock_key(account: u32, external: bool, index: u32) -> Vec<u8> {
    let mut seed = account.to_le_bytes().to_vec();
    seed.push(external as u8);
    seed.extend_from_slice(&index.to_le_bytes());
    let mut key = vec![0x02];
    key.extend_from_slice(&sha256(&seed));
    key
}

/// A P2PKH output of `value` satoshis, paying to receive key `i` of account 0.
///
/// The outpoint is distinct for each `i`.
pub fn utxo(i: u8, value: u64) -> UnspentOutput {
    let key = PublicKey::new(0, i.into(), true, mock_key(0, true, i.into()));
    let script = Script::locking(ScriptType::P2pkh, &hash160(key.raw()))
        .expect("P2PKH scripts take a 20-byte hash");
    UnspentOutput::new(
        OutPoint::new(TxId::from_bytes(sha256(&[i])), u32::from(i % 3)),
        TxOut::new(Satoshis::const_from_u64(value), script),
        ScriptType::P2pkh,
        key,
    )
}

#[derive(Default)]
struct MemoryState {
    last_block: Option<BlockInfo>,
    /// Oldest first.
    transactions: Vec<TransactionInfo>,
    raw: BTreeMap<TxId, Vec<u8>>,
    unspent_outputs: Vec<UnspentOutput>,
    keys: BTreeMap<(u32, bool, u32), PublicKeyWithUsedState>,
    created: Vec<Transaction>,
}

/// Wallet storage held in memory.
#[derive(Default)]
pub struct MemoryWalletDb {
    state: Mutex<MemoryState>,
}

impl MemoryWalletDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_unspent_output(&self, output: UnspentOutput) {
        locks::lock(&self.state).unspent_outputs.push(output);
    }

    pub fn add_transaction(&self, info: TransactionInfo, raw: Vec<u8>) {
        let mut state = locks::lock(&self.state);
        state.raw.insert(info.txid, raw);
        state.transactions.push(info);
    }

    pub fn set_last_block(&self, block: BlockInfo) {
        locks::lock(&self.state).last_block = Some(block);
    }

    /// Transactions recorded through [`WalletWrite::process_created`].
    pub fn created(&self) -> Vec<Transaction> {
        locks::lock(&self.state).created.clone()
    }

    pub fn unspent_outputs_snapshot(&self) -> Vec<UnspentOutput> {
        locks::lock(&self.state).unspent_outputs.clone()
    }

    pub fn public_keys_snapshot(&self, account: u32) -> Vec<PublicKeyWithUsedState> {
        locks::lock(&self.state)
            .keys
            .iter()
            .filter(|((a, _, _), _)| *a == account)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// The balance implied by the stored outputs, ignoring plugins.
    pub fn balance(&self) -> BalanceInfo {
        let state = locks::lock(&self.state);
        let sum = |relayed: bool| {
            state
                .unspent_outputs
                .iter()
                .filter(|o| o.relayed() == relayed)
                .map(|o| o.value())
                .sum::<Option<Satoshis>>()
                .unwrap_or(Satoshis::ZERO)
        };
        BalanceInfo {
            spendable: sum(true),
            unspendable_time_locked: Satoshis::ZERO,
            unspendable_not_relayed: sum(false),
        }
    }
}

impl WalletRead for MemoryWalletDb {
    fn last_block(&self) -> Result<Option<BlockInfo>, StorageError> {
        Ok(locks::lock(&self.state).last_block.clone())
    }

    fn transactions(
        &self,
        from_uid: Option<&str>,
        filter: Option<TransactionFilterType>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionInfo>, StorageError> {
        let state = locks::lock(&self.state);
        let newest_first = state.transactions.iter().rev();
        let after: Vec<&TransactionInfo> = match from_uid {
            Some(uid) => newest_first.skip_while(|t| t.uid != uid).skip(1).collect(),
            None => newest_first.collect(),
        };
        Ok(after
            .into_iter()
            .filter(|t| filter.map_or(true, |f| f.matches(t.tx_type)))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn transaction(&self, txid: &TxId) -> Result<Option<TransactionInfo>, StorageError> {
        Ok(locks::lock(&self.state)
            .transactions
            .iter()
            .find(|t| t.txid == *txid)
            .cloned())
    }

    fn raw_transaction(&self, txid: &TxId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(locks::lock(&self.state).raw.get(txid).cloned())
    }

    fn unspent_outputs(&self) -> Result<Vec<UnspentOutput>, StorageError> {
        Ok(self.unspent_outputs_snapshot())
    }

    fn public_keys(&self, account: u32) -> Result<Vec<PublicKeyWithUsedState>, StorageError> {
        Ok(self.public_keys_snapshot(account))
    }
}

impl WalletWrite for MemoryWalletDb {
    fn add_public_keys(&self, keys: Vec<PublicKey>) -> Result<(), StorageError> {
        let mut state = locks::lock(&self.state);
        for key in keys {
            state
                .keys
                .entry((key.account(), key.external(), key.index()))
                .or_insert(PublicKeyWithUsedState {
                    public_key: key,
                    used: false,
                });
        }
        Ok(())
    }

    fn mark_public_keys_used(&self, keys: &[PublicKey]) -> Result<(), StorageError> {
        let mut state = locks::lock(&self.state);
        for key in keys {
            let entry = state
                .keys
                .get_mut(&(key.account(), key.external(), key.index()))
                .ok_or_else(|| StorageError::NotFound(key.path()))?;
            entry.used = true;
        }
        Ok(())
    }

    fn process_created(
        &self,
        transaction: &Transaction,
        spent: &[OutPoint],
    ) -> Result<(), StorageError> {
        let mut state = locks::lock(&self.state);
        state.unspent_outputs.retain(|o| !spent.contains(&o.outpoint()));
        state.raw.insert(transaction.txid(), transaction.serialize());
        state.created.push(transaction.clone());
        Ok(())
    }
}

/// Derives deterministic pseudo-keys, the same for every instance.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockKeyDeriver;

impl PublicKeyDeriver for MockKeyDeriver {
    fn derive(
        &self,
        account: u32,
        external: bool,
        indices: Range<u32>,
    ) -> Result<Vec<PublicKey>, KeyError> {
        Ok(indices
            .map(|index| PublicKey::new(account, index, external, mock_key(account, external, index)))
            .collect())
    }
}

/// Produces deterministic 72-byte pseudo-signatures over the unsigned transaction.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockSigner;

impl InputSigner for MockSigner {
    fn sig_script_data(
        &self,
        tx: &Transaction,
        inputs: &[InputToSign],
        index: usize,
    ) -> Result<Vec<Vec<u8>>, SignerError> {
        let input = inputs
            .get(index)
            .ok_or_else(|| SignerError::Signing(format!("no input {}", index)))?;
        let mut preimage = tx.serialize();
        preimage.extend_from_slice(&(index as u32).to_le_bytes());
        let digest = sha256(&preimage);

        let mut signature = vec![0x30];
        signature.extend_from_slice(&digest);
        signature.extend_from_slice(&digest);
        signature.extend_from_slice(&digest[..6]);
        signature.push(0x01);

        Ok(match input.unspent_output.script_type() {
            ScriptType::P2pk | ScriptType::P2tr => vec![signature],
            _ => vec![signature, input.unspent_output.public_key().raw().clone()],
        })
    }
}

/// Records the transactions it is asked to relay.
#[derive(Default)]
pub struct MockSender {
    failing: bool,
    sent: Mutex<Vec<Transaction>>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender that is never able to relay.
    pub fn failing() -> Self {
        MockSender {
            failing: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Transaction> {
        locks::lock(&self.sent).clone()
    }
}

impl TransactionSender for MockSender {
    fn verify_can_send(&self) -> Result<(), SenderError> {
        if self.failing {
            Err(SenderError::NoConnectedPeers)
        } else {
            Ok(())
        }
    }

    fn send(&self, transaction: &Transaction) -> Result<(), SenderError> {
        self.verify_can_send()?;
        locks::lock(&self.sent).push(transaction.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StartStopCounter {
    starts: AtomicUsize,
    stops: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MockPeerGroup(StartStopCounter);

impl MockPeerGroup {
    pub fn starts(&self) -> usize {
        self.0.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.0.stops.load(Ordering::SeqCst)
    }
}

impl PeerGroup for MockPeerGroup {
    fn start(&self) {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MockApiSyncer(StartStopCounter);

impl MockApiSyncer {
    pub fn starts(&self) -> usize {
        self.0.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.0.stops.load(Ordering::SeqCst)
    }
}

impl ApiSyncer for MockApiSyncer {
    fn start(&self) {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Forwards every delivered event to a channel.
pub struct RecordingObserver {
    events: Sender<WalletEvent>,
}

impl RecordingObserver {
    pub fn new() -> (Self, Receiver<WalletEvent>) {
        let (events, receiver) = unbounded();
        (RecordingObserver { events }, receiver)
    }

    fn record(&self, event: WalletEvent) {
        let _ = self.events.send(event);
    }
}

impl WalletObserver for RecordingObserver {
    fn transactions_updated(&self, inserted: &[TransactionInfo], updated: &[TransactionInfo]) {
        self.record(WalletEvent::TransactionsUpdated {
            inserted: inserted.to_vec(),
            updated: updated.to_vec(),
        });
    }

    fn transactions_deleted(&self, txids: &[TxId]) {
        self.record(WalletEvent::TransactionsDeleted(txids.to_vec()));
    }

    fn balance_updated(&self, balance: &BalanceInfo) {
        self.record(WalletEvent::BalanceUpdated(*balance));
    }

    fn last_block_info_updated(&self, block: &BlockInfo) {
        self.record(WalletEvent::LastBlockInfoUpdated(block.clone()));
    }

    fn kit_state_updated(&self, state: &KitState) {
        self.record(WalletEvent::KitStateUpdated(state.clone()));
    }
}

#[cfg(feature = "test-dependencies")]
pub mod strategies {
    use proptest::prelude::*;

    /// Values of wallet outputs, each comfortably above the dust threshold.
    pub fn arb_output_values(max_count: usize) -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(1_000u64..5_000_000, 1..=max_count)
    }
}
