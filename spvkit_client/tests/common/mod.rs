//! Collaborators for driving a wallet through its public API.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Receiver, Sender};
use spvkit_client::{
    builder::InputToSign,
    config::{Purpose, WalletConfig},
    data_api::{
        BlockInfo, StorageError, TransactionFilterType, TransactionInfo, WalletRead, WalletWrite,
    },
    keys::{KeyError, PublicKeyDeriver},
    notify::WalletObserver,
    sender::{SenderError, TransactionSender},
    signer::{InputSigner, SignerError},
    sync::{KitState, PeerGroup},
    transaction::{Transaction, TxOut},
    wallet::{PublicKey, PublicKeyWithUsedState, UnspentOutput},
    BitcoinCore, BitcoinCoreBuilder,
};
use spvkit_protocol::{
    consensus::BlockHeight,
    hash::{hash160, sha256},
    script::Script,
    value::Satoshis,
    OutPoint, ScriptType, TxId,
};

/// Pays to the hash160 of the compressed secp256k1 generator point.
pub const RECIPIENT: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

fn key_bytes(external: bool, index: u32) -> Vec<u8> {
    let mut seed = vec![external as u8];
    seed.extend_from_slice(&index.to_be_bytes());
    let mut key = vec![0x03];
    key.extend_from_slice(&sha256(&seed));
    key
}

#[derive(Default)]
struct Inner {
    tip: Option<BlockInfo>,
    keys: BTreeMap<(bool, u32), PublicKeyWithUsedState>,
    outputs: Vec<UnspentOutput>,
    raw: BTreeMap<TxId, Vec<u8>>,
    process_created_calls: usize,
}

#[derive(Default)]
pub struct Store(Mutex<Inner>);

impl Store {
    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.0.lock().unwrap()
    }

    /// Adds a confirmed P2PKH output paying to receive key `index`.
    pub fn fund(&self, index: u32, value: u64, height: u32) -> UnspentOutput {
        let key = PublicKey::new(0, index, true, key_bytes(true, index));
        let script = Script::locking(ScriptType::P2pkh, &hash160(key.raw())).unwrap();
        let mut txid = [0u8; 32];
        txid[..4].copy_from_slice(&index.to_le_bytes());
        txid[4..12].copy_from_slice(&value.to_le_bytes());
        let output = UnspentOutput::new(
            OutPoint::new(TxId::from_bytes(txid), 0),
            TxOut::new(Satoshis::const_from_u64(value), script),
            ScriptType::P2pkh,
            key,
        )
        .with_block_height(BlockHeight::from_u32(height));
        self.inner().outputs.push(output.clone());
        output
    }

    pub fn set_tip(&self, height: u32) {
        self.inner().tip = Some(BlockInfo {
            hash: format!("{:064x}", height),
            height: BlockHeight::from_u32(height),
            timestamp: Some(1_600_000_000 + u64::from(height) * 600),
        });
    }

    pub fn outputs(&self) -> Vec<UnspentOutput> {
        self.inner().outputs.clone()
    }

    pub fn keys(&self) -> Vec<PublicKeyWithUsedState> {
        self.inner().keys.values().cloned().collect()
    }

    pub fn process_created_calls(&self) -> usize {
        self.inner().process_created_calls
    }
}

impl WalletRead for Store {
    fn last_block(&self) -> Result<Option<BlockInfo>, StorageError> {
        Ok(self.inner().tip.clone())
    }

    fn transactions(
        &self,
        _from_uid: Option<&str>,
        _filter: Option<TransactionFilterType>,
        _limit: Option<usize>,
    ) -> Result<Vec<TransactionInfo>, StorageError> {
        Ok(vec![])
    }

    fn transaction(&self, _txid: &TxId) -> Result<Option<TransactionInfo>, StorageError> {
        Ok(None)
    }

    fn raw_transaction(&self, txid: &TxId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner().raw.get(txid).cloned())
    }

    fn unspent_outputs(&self) -> Result<Vec<UnspentOutput>, StorageError> {
        Ok(self.outputs())
    }

    fn public_keys(&self, account: u32) -> Result<Vec<PublicKeyWithUsedState>, StorageError> {
        Ok(self
            .keys()
            .into_iter()
            .filter(|k| k.public_key.account() == account)
            .collect())
    }
}

impl WalletWrite for Store {
    fn add_public_keys(&self, keys: Vec<PublicKey>) -> Result<(), StorageError> {
        let mut inner = self.inner();
        for public_key in keys {
            inner
                .keys
                .entry((public_key.external(), public_key.index()))
                .or_insert(PublicKeyWithUsedState {
                    public_key,
                    used: false,
                });
        }
        Ok(())
    }

    fn mark_public_keys_used(&self, keys: &[PublicKey]) -> Result<(), StorageError> {
        let mut inner = self.inner();
        for key in keys {
            if let Some(k) = inner.keys.get_mut(&(key.external(), key.index())) {
                k.used = true;
            }
        }
        Ok(())
    }

    fn process_created(
        &self,
        transaction: &Transaction,
        spent: &[OutPoint],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner();
        inner.outputs.retain(|o| !spent.contains(&o.outpoint()));
        inner.raw.insert(transaction.txid(), transaction.serialize());
        inner.process_created_calls += 1;
        Ok(())
    }
}

pub struct Deriver;

impl PublicKeyDeriver for Deriver {
    fn derive(
        &self,
        account: u32,
        external: bool,
        indices: Range<u32>,
    ) -> Result<Vec<PublicKey>, KeyError> {
        Ok(indices
            .map(|i| PublicKey::new(account, i, external, key_bytes(external, i)))
            .collect())
    }
}

/// Signs with a fixed-length digest of the transaction so that sizes match estimates.
pub struct Signer;

impl InputSigner for Signer {
    fn sig_script_data(
        &self,
        tx: &Transaction,
        inputs: &[InputToSign],
        index: usize,
    ) -> Result<Vec<Vec<u8>>, SignerError> {
        let mut message = tx.serialize();
        message.push(index as u8);
        let digest = sha256(&message);
        let mut signature = vec![0x30];
        for _ in 0..2 {
            signature.extend_from_slice(&digest);
        }
        signature.extend_from_slice(&[0; 6]);
        signature.push(0x01);
        let key = inputs[index].unspent_output.public_key().raw().clone();
        Ok(vec![signature, key])
    }
}

#[derive(Default)]
pub struct Relay(Mutex<Vec<Transaction>>);

impl Relay {
    pub fn relayed(&self) -> Vec<Transaction> {
        self.0.lock().unwrap().clone()
    }
}

impl TransactionSender for Relay {
    fn send(&self, transaction: &Transaction) -> Result<(), SenderError> {
        self.0.lock().unwrap().push(transaction.clone());
        Ok(())
    }
}

pub struct Peers;

impl PeerGroup for Peers {
    fn start(&self) {}
    fn stop(&self) {}
}

/// Forwards kit state changes to a channel.
pub struct StateObserver(Sender<KitState>);

impl StateObserver {
    pub fn new() -> (Arc<Self>, Receiver<KitState>) {
        let (tx, rx) = unbounded();
        (Arc::new(StateObserver(tx)), rx)
    }
}

impl WalletObserver for StateObserver {
    fn kit_state_updated(&self, state: &KitState) {
        let _ = self.0.send(state.clone());
    }
}

pub struct TestWallet {
    pub store: Arc<Store>,
    pub relay: Arc<Relay>,
    pub wallet: BitcoinCore,
}

fn builder(store: &Arc<Store>) -> BitcoinCoreBuilder<Store> {
    BitcoinCoreBuilder::new(
        WalletConfig {
            purpose: Purpose::Bip44,
            gap_limit: 5,
            ..Default::default()
        },
        store.clone(),
        Arc::new(Deriver),
        Arc::new(Peers),
    )
}

/// Routes wallet logs to the test harness. Set `RUST_LOG` to see them.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A spending wallet funded with one confirmed output per value.
pub fn spending_wallet(values: &[u64]) -> TestWallet {
    init_tracing();
    let store = Arc::new(Store::default());
    for (i, value) in values.iter().enumerate() {
        store.fund(i as u32, *value, 100);
    }
    store.set_tip(110);
    let relay = Arc::new(Relay::default());
    let wallet = builder(&store)
        .with_signer(Arc::new(Signer))
        .with_sender(relay.clone())
        .build()
        .unwrap();
    TestWallet {
        store,
        relay,
        wallet,
    }
}

pub fn watch_only_wallet(values: &[u64]) -> TestWallet {
    init_tracing();
    let store = Arc::new(Store::default());
    for (i, value) in values.iter().enumerate() {
        store.fund(i as u32, *value, 100);
    }
    let wallet = builder(&store).build().unwrap();
    TestWallet {
        store,
        relay: Arc::new(Relay::default()),
        wallet,
    }
}

/// Sums output values, panicking on overflow.
pub fn total(values: impl IntoIterator<Item = Satoshis>) -> Satoshis {
    values
        .into_iter()
        .sum::<Option<Satoshis>>()
        .expect("no overflow")
}
