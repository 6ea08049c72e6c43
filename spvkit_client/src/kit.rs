//! The wallet engine.
//!
//! A [`BitcoinCore`] is assembled by a [`BitcoinCoreBuilder`] from the host's
//! collaborators: storage, a key deriver, the network layer and, for a spending wallet,
//! a signer and a sender. A wallet built without a signer is watch-only; every
//! operation that builds or estimates a transaction then fails with
//! [`Error::ReadOnlyCore`].
//!
//! ```ignore
//! # use std::sync::Arc;
//! # use spvkit_client::{
//! #     config::WalletConfig,
//! #     testing::{MemoryWalletDb, MockKeyDeriver, MockPeerGroup},
//! #     BitcoinCoreBuilder, Error,
//! # };
//! let wallet = BitcoinCoreBuilder::new(
//!     WalletConfig::default(),
//!     Arc::new(MemoryWalletDb::new()),
//!     Arc::new(MockKeyDeriver),
//!     Arc::new(MockPeerGroup::default()),
//! )
//! .build()
//! .unwrap();
//!
//! assert!(wallet.watch_account());
//! assert!(matches!(wallet.min_spendable_value(None), Err(Error::ReadOnlyCore)));
//! assert!(!wallet.receive_address().is_empty());
//! ```

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use spvkit_address::{Address, AddressConverter};
use spvkit_protocol::{consensus::Parameters, value::Satoshis, ScriptType, TxId};
use tracing::{info, warn};

use crate::{
    address::AddressConverterChain,
    builder::{SendParameters, TransactionBuilder, TransactionDataSortType},
    config::WalletConfig,
    creator::{CreatedTransaction, TransactionCreator},
    data_api::{BalanceInfo, BlockInfo, TransactionFilterType, TransactionInfo, WalletWrite},
    data_provider::DataProvider,
    error::{Error, Result},
    fees::{dust::DustCalculator, size::TransactionSizeCalculator, SendInfo, TransactionFeeCalculator},
    input_selection::{UnspentOutputProvider, UnspentOutputSelector, UnspentOutputSelectorChain},
    keys::{KeyError, PublicKeyDeriver, PublicKeyManager},
    notify::{NotificationBridge, SerialQueue, Subscription, WalletObserver},
    payment::{parse_payment_address, BitcoinPaymentData},
    plugin::{Plugin, PluginData, PluginError, PluginManager},
    restore::{RestoreKeyConverter, RestoreKeyConverterChain, ScriptTypeRestoreKeyConverter},
    sender::TransactionSender,
    signer::{InputSigner, TransactionSigner},
    status::{status_info, PeerManager, StatusInfo},
    sync::{ApiSyncer, KitState, PeerGroup, SyncManager},
    wallet::{PublicKey, UnspentOutput, UnspentOutputInfo, UsedAddress, UtxoFilters},
    watch::{TransactionFilter, WatchedTransactionManager, WatchedTransactionObserver},
};

const NOTIFICATION_THREAD: &str = "spvkit-notifications";

/// Errors that prevent a [`BitcoinCore`] from being built.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("A signer was supplied without a transaction sender")]
    MissingSender,
    #[error("The notification queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("Failed to start the notification thread: {0}")]
    NotificationQueue(#[source] io::Error),
    #[error("Failed to register plugin: {0}")]
    Plugin(#[source] PluginError),
    #[error("Failed to derive initial public keys: {0}")]
    Key(#[source] KeyError),
    #[error("Failed to load wallet state: {0}")]
    InitialState(#[source] Box<Error>),
}

/// The components that only a wallet able to sign has.
pub struct Spending {
    creator: TransactionCreator,
    fee_calculator: TransactionFeeCalculator,
    dust_calculator: DustCalculator,
}

/// Whether a wallet can spend.
pub enum Mode {
    Full(Box<Spending>),
    WatchOnly,
}

/// Assembles a [`BitcoinCore`].
///
/// Extra address converters and unspent output selectors are installed ahead of the
/// built-in ones, in the order given, so the one added last has the highest priority.
/// Extra restore key converters are appended after the built-in ones.
pub struct BitcoinCoreBuilder<S> {
    config: WalletConfig,
    storage: Arc<S>,
    deriver: Arc<dyn PublicKeyDeriver>,
    peer_group: Arc<dyn PeerGroup>,
    api_syncer: Option<Arc<dyn ApiSyncer>>,
    peer_manager: Option<Arc<dyn PeerManager>>,
    signer: Option<Arc<dyn InputSigner>>,
    sender: Option<Arc<dyn TransactionSender>>,
    plugins: Vec<Arc<dyn Plugin>>,
    address_converters: Vec<Arc<dyn AddressConverter>>,
    selectors: Vec<Arc<dyn UnspentOutputSelector>>,
    restore_key_converters: Vec<Arc<dyn RestoreKeyConverter>>,
}

impl<S: WalletWrite + 'static> BitcoinCoreBuilder<S> {
    pub fn new(
        config: WalletConfig,
        storage: Arc<S>,
        deriver: Arc<dyn PublicKeyDeriver>,
        peer_group: Arc<dyn PeerGroup>,
    ) -> Self {
        BitcoinCoreBuilder {
            config,
            storage,
            deriver,
            peer_group,
            api_syncer: None,
            peer_manager: None,
            signer: None,
            sender: None,
            plugins: vec![],
            address_converters: vec![],
            selectors: vec![],
            restore_key_converters: vec![],
        }
    }

    /// Makes the wallet able to spend. Requires [`Self::with_sender`] as well.
    pub fn with_signer(mut self, signer: Arc<dyn InputSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_sender(mut self, sender: Arc<dyn TransactionSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_api_syncer(mut self, api_syncer: Arc<dyn ApiSyncer>) -> Self {
        self.api_syncer = Some(api_syncer);
        self
    }

    pub fn with_peer_manager(mut self, peer_manager: Arc<dyn PeerManager>) -> Self {
        self.peer_manager = Some(peer_manager);
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_address_converter(mut self, converter: Arc<dyn AddressConverter>) -> Self {
        self.address_converters.push(converter);
        self
    }

    pub fn with_unspent_output_selector(mut self, selector: Arc<dyn UnspentOutputSelector>) -> Self {
        self.selectors.push(selector);
        self
    }

    pub fn with_restore_key_converter(mut self, converter: Arc<dyn RestoreKeyConverter>) -> Self {
        self.restore_key_converters.push(converter);
        self
    }

    pub fn build(self) -> std::result::Result<BitcoinCore, BuildError> {
        let config = self.config;
        if config.notification_queue_capacity == 0 {
            return Err(BuildError::ZeroQueueCapacity);
        }
        let script_type = config.purpose.script_type();

        let address_converter = Arc::new(AddressConverterChain::for_network(config.network));
        for converter in self.address_converters {
            address_converter.prepend(converter);
        }

        let plugin_manager = Arc::new(PluginManager::new());
        for plugin in self.plugins {
            plugin_manager.add(plugin).map_err(BuildError::Plugin)?;
        }

        let key_manager = Arc::new(PublicKeyManager::new(
            self.storage.clone(),
            self.deriver,
            config.account,
            config.gap_limit,
        ));
        key_manager.fill_gap().map_err(BuildError::Key)?;

        let restore_key_converter = Arc::new(RestoreKeyConverterChain::new());
        restore_key_converter.add(Arc::new(ScriptTypeRestoreKeyConverter::for_purpose(
            address_converter.clone(),
            config.purpose,
        )));
        restore_key_converter.add(plugin_manager.clone());
        for converter in self.restore_key_converters {
            restore_key_converter.add(converter);
        }

        let size_calculator = TransactionSizeCalculator;
        let dust_calculator = DustCalculator::new(config.dust_relay_fee_rate, size_calculator);
        let unspent_outputs = Arc::new(UnspentOutputProvider::new(
            self.storage.clone(),
            plugin_manager.clone(),
        ));
        let selector = Arc::new(UnspentOutputSelectorChain::with_default_selectors(
            unspent_outputs.clone(),
            size_calculator,
            dust_calculator,
        ));
        for extra in self.selectors {
            selector.prepend(extra);
        }

        let queue = Arc::new(
            SerialQueue::new(NOTIFICATION_THREAD, config.notification_queue_capacity)
                .map_err(BuildError::NotificationQueue)?,
        );
        let bridge = Arc::new(NotificationBridge::new(queue.clone()));
        let sink = bridge.sink();

        let data_provider = Arc::new(
            DataProvider::new(self.storage.clone(), unspent_outputs, sink.clone())
                .map_err(|e| BuildError::InitialState(Box::new(e)))?,
        );
        let sync_manager = Arc::new(SyncManager::new(
            self.peer_group,
            self.api_syncer,
            config.sync_mode,
            sink,
        ));

        let mode = match (self.signer, self.sender) {
            (Some(signer), Some(sender)) => {
                let builder = Arc::new(TransactionBuilder::new(
                    address_converter.clone(),
                    plugin_manager.clone(),
                    script_type,
                ));
                Mode::Full(Box::new(Spending {
                    creator: TransactionCreator::new(
                        builder.clone(),
                        selector.clone(),
                        address_converter.clone(),
                        plugin_manager.clone(),
                        key_manager.clone(),
                        TransactionSigner::new(signer),
                        sender,
                        self.storage.clone(),
                    ),
                    fee_calculator: TransactionFeeCalculator::new(
                        selector.clone(),
                        builder,
                        address_converter.clone(),
                        key_manager.clone(),
                        plugin_manager.clone(),
                    ),
                    dust_calculator,
                }))
            }
            (Some(_), None) => return Err(BuildError::MissingSender),
            (None, _) => Mode::WatchOnly,
        };

        info!(
            "Built {} {} wallet for account {}",
            if matches!(mode, Mode::WatchOnly) { "watch-only" } else { "spending" },
            config.purpose.description(),
            config.account
        );
        Ok(BitcoinCore {
            config,
            storage: self.storage,
            address_converter,
            restore_key_converter,
            plugin_manager,
            key_manager,
            selector,
            data_provider,
            sync_manager,
            watched_transactions: WatchedTransactionManager::new(queue),
            bridge,
            peer_manager: self.peer_manager,
            mode,
        })
    }
}

/// A Bitcoin SPV wallet.
///
/// All methods take `&self` and may be called from any thread. The operations that
/// build or estimate transactions block on storage and signing, and must not be
/// called from a [`WalletObserver`] callback.
pub struct BitcoinCore {
    config: WalletConfig,
    storage: Arc<dyn WalletWrite>,
    address_converter: Arc<AddressConverterChain>,
    restore_key_converter: Arc<RestoreKeyConverterChain>,
    plugin_manager: Arc<PluginManager>,
    key_manager: Arc<PublicKeyManager>,
    selector: Arc<UnspentOutputSelectorChain>,
    data_provider: Arc<DataProvider>,
    sync_manager: Arc<SyncManager>,
    watched_transactions: WatchedTransactionManager,
    bridge: Arc<NotificationBridge>,
    peer_manager: Option<Arc<dyn PeerManager>>,
    mode: Mode,
}

impl BitcoinCore {
    fn spending(&self) -> Result<&Spending> {
        match &self.mode {
            Mode::Full(spending) => Ok(spending.as_ref()),
            Mode::WatchOnly => Err(Error::ReadOnlyCore),
        }
    }

    fn script_type(&self) -> ScriptType {
        self.config.purpose.script_type()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn start(&self) {
        self.sync_manager.start();
    }

    pub fn stop(&self) {
        self.sync_manager.stop();
    }

    /// Whether this wallet was built without signing capability.
    pub fn watch_account(&self) -> bool {
        matches!(self.mode, Mode::WatchOnly)
    }

    pub fn last_block_info(&self) -> Option<BlockInfo> {
        self.data_provider.last_block_info()
    }

    pub fn balance(&self) -> BalanceInfo {
        self.data_provider.balance()
    }

    pub fn sync_state(&self) -> KitState {
        self.sync_manager.state()
    }

    pub fn transactions(
        &self,
        from_uid: Option<&str>,
        filter: Option<TransactionFilterType>,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionInfo>> {
        Ok(self.data_provider.transactions(from_uid, filter, limit)?)
    }

    pub fn transaction(&self, txid: &TxId) -> Result<Option<TransactionInfo>> {
        Ok(self.data_provider.transaction(txid)?)
    }

    /// The hex-encoded serialization of a wallet transaction.
    pub fn raw_transaction(&self, txid: &TxId) -> Result<Option<String>> {
        Ok(self.data_provider.raw_transaction(txid)?)
    }

    /// Every unspent output of the wallet, spendable or not.
    pub fn unspent_outputs(&self, filters: &UtxoFilters) -> Result<Vec<UnspentOutput>> {
        Ok(filters.filter(self.selector.provider().all_utxo()?))
    }

    pub fn unspent_outputs_info(&self, filters: &UtxoFilters) -> Result<Vec<UnspentOutputInfo>> {
        let tip = self.last_block_info().map(|b| b.height);
        Ok(self
            .unspent_outputs(filters)?
            .into_iter()
            .map(|o| {
                let confirmations = o.confirmations(tip);
                UnspentOutputInfo {
                    outpoint: o.outpoint(),
                    value: o.value(),
                    script_type: o.script_type(),
                    address: self.output_address(&o).map(|a| a.string_value().to_owned()),
                    path: o.public_key().path(),
                    confirmations,
                    confirmed: confirmations >= self.config.confirmations_threshold,
                    plugin_id: o.plugin_id(),
                }
            })
            .collect())
    }

    fn output_address(&self, output: &UnspentOutput) -> Option<Address> {
        let (script_type, payload) = output.output().script_pubkey.classify()?;
        self.address_converter
            .convert_payload(payload, script_type)
            .ok()
    }

    /// Builds, signs, records and relays a payment.
    pub fn send(&self, params: &SendParameters) -> Result<CreatedTransaction> {
        self.spending()?.creator.create(params)
    }

    /// Pays to the output script of `script_type` with the given payload (a key hash,
    /// script hash or witness program). Plugin data in `params` is ignored.
    pub fn send_to_script(
        &self,
        payload: &[u8],
        script_type: ScriptType,
        params: SendParameters,
    ) -> Result<CreatedTransaction> {
        let spending = self.spending()?;
        let address = self
            .address_converter
            .convert_payload(payload, script_type)?;
        let params = SendParameters {
            address: Some(address.string_value().to_owned()),
            plugin_data: PluginData::new(),
            ..params
        };
        spending.creator.create(&params)
    }

    /// Spends a single output, typically one locked by a plugin, to `address`. The fee
    /// is paid out of the output's value.
    pub fn redeem(
        &self,
        unspent_output: &UnspentOutput,
        address: &str,
        memo: Option<&str>,
        fee_rate: u64,
        sort_type: TransactionDataSortType,
    ) -> Result<CreatedTransaction> {
        self.spending()?
            .creator
            .create_from(unspent_output, address, memo, fee_rate, sort_type)
    }

    /// Builds and signs a payment without recording or relaying it.
    pub fn create_raw_transaction(&self, params: &SendParameters) -> Result<Vec<u8>> {
        self.spending()?.creator.create_raw_transaction(params)
    }

    pub fn send_info(&self, params: &SendParameters) -> Result<SendInfo> {
        self.spending()?.fee_calculator.send_info(params)
    }

    /// See [`TransactionFeeCalculator::max_spendable_value`].
    pub fn max_spendable_value(&self, params: &SendParameters) -> Result<Satoshis> {
        self.spending()?.fee_calculator.max_spendable_value(params)
    }

    /// The dust threshold for payments to `address`, or to a P2PKH output when no
    /// address is given or it cannot be decoded.
    pub fn min_spendable_value(&self, address: Option<&str>) -> Result<Satoshis> {
        let spending = self.spending()?;
        let script_type = address
            .and_then(|a| self.address_converter.convert_str(a).ok())
            .map_or(ScriptType::P2pkh, |a| a.script_type());
        Ok(spending.dust_calculator.dust(script_type))
    }

    pub fn max_spend_limit(&self, plugin_data: &PluginData) -> Result<Option<Satoshis>> {
        Ok(self.plugin_manager.max_spend_limit(plugin_data)?)
    }

    /// Checks that `address` can be paid with `plugin_data` attached.
    pub fn validate(&self, address: &str, plugin_data: &PluginData) -> Result<()> {
        let address = self.address_converter.convert_str(address)?;
        Ok(self.plugin_manager.validate(&address, plugin_data)?)
    }

    pub fn parse_payment_address(&self, uri: &str) -> Result<BitcoinPaymentData> {
        Ok(parse_payment_address(
            self.config.network.payment_uri_scheme(),
            uri,
        )?)
    }

    /// The wallet's current receive address, or an empty string if none is available.
    ///
    /// The address stays the same until funds are received on it.
    pub fn receive_address(&self) -> String {
        let address = self
            .key_manager
            .current_receive_public_key()
            .map_err(Error::from)
            .and_then(|key| {
                Ok(self
                    .address_converter
                    .convert_public_key(&key.key_bytes(), self.script_type())?)
            });
        match address {
            Ok(address) => address.string_value().to_owned(),
            Err(e) => {
                warn!("No receive address available: {}", e);
                String::new()
            }
        }
    }

    /// Leases a receive key. See [`PublicKeyManager`].
    pub fn receive_public_key(&self) -> Result<PublicKey> {
        Ok(self.key_manager.receive_public_key()?)
    }

    /// Leases a change key. See [`PublicKeyManager`].
    pub fn change_public_key(&self) -> Result<PublicKey> {
        Ok(self.key_manager.change_public_key()?)
    }

    /// Returns a key leased by [`Self::receive_public_key`] or
    /// [`Self::change_public_key`] without using it.
    pub fn release_public_key(&self, key: &PublicKey) {
        self.key_manager.release(key);
    }

    pub fn public_key_by_path(&self, path: &str) -> Result<PublicKey> {
        Ok(self.key_manager.public_key_by_path(path)?)
    }

    /// Marks keys as used after they were seen on chain.
    pub fn on_public_keys_used(&self, keys: &[PublicKey]) -> Result<()> {
        Ok(self.key_manager.mark_used(keys)?)
    }

    pub fn used_addresses(&self, change: bool) -> Vec<UsedAddress> {
        let keys = match self.key_manager.used_public_keys(change) {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Failed to read used public keys: {}", e);
                return vec![];
            }
        };
        keys.into_iter()
            .filter_map(|key| {
                self.address_converter
                    .convert_public_key(&key.key_bytes(), self.script_type())
                    .ok()
                    .map(|address| UsedAddress {
                        index: key.index(),
                        address: address.string_value().to_owned(),
                    })
            })
            .collect()
    }

    /// Addresses to query while restoring `key`'s history from an indexing API.
    pub fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String> {
        self.restore_key_converter.keys_for_api_restore(key)
    }

    pub fn bloom_filter_elements(&self, key: &PublicKey) -> Vec<Vec<u8>> {
        self.restore_key_converter.bloom_filter_elements(key)
    }

    pub fn watch(&self, filter: TransactionFilter, observer: Arc<dyn WatchedTransactionObserver>) {
        self.watched_transactions.add(filter, observer);
    }

    /// Stops watching for `filter`. Returns whether it was being watched.
    pub fn unwatch(&self, filter: &TransactionFilter) -> bool {
        self.watched_transactions.remove(filter)
    }

    /// Registers `observer` for wallet events, replacing any previous observer, until
    /// the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, observer: Arc<dyn WalletObserver>) -> Subscription {
        self.bridge.subscribe(observer)
    }

    pub fn status_info(&self) -> StatusInfo {
        status_info(
            &self.sync_state(),
            self.last_block_info().as_ref(),
            self.config.purpose,
            self.peer_manager.as_deref(),
        )
    }

    /// A dump of the wallet's keys and unspent outputs.
    pub fn debug_info(&self) -> String {
        let mut info = format!(
            "{} {} account {}\n",
            self.config.network,
            self.config.purpose.description(),
            self.config.account
        );
        match self.storage.public_keys(self.key_manager.account()) {
            Ok(keys) => {
                for k in keys {
                    let address = self
                        .address_converter
                        .convert_public_key(&k.public_key.key_bytes(), self.script_type())
                        .map(|a| a.string_value().to_owned())
                        .unwrap_or_default();
                    let _ = writeln!(
                        info,
                        "{} {} {}",
                        k.public_key.path(),
                        address,
                        if k.used { "used" } else { "unused" }
                    );
                }
            }
            Err(e) => {
                let _ = writeln!(info, "public keys unavailable: {}", e);
            }
        }
        match self.selector.provider().all_utxo() {
            Ok(outputs) => {
                for o in outputs {
                    let _ = writeln!(info, "{} {} {}", o.outpoint(), o.value(), o.script_type());
                }
            }
            Err(e) => {
                let _ = writeln!(info, "unspent outputs unavailable: {}", e);
            }
        }
        info
    }

    pub fn prepend_address_converter(&self, converter: Arc<dyn AddressConverter>) {
        self.address_converter.prepend(converter);
    }

    pub fn prepend_unspent_output_selector(&self, selector: Arc<dyn UnspentOutputSelector>) {
        self.selector.prepend(selector);
    }

    pub fn add_restore_key_converter(&self, converter: Arc<dyn RestoreKeyConverter>) {
        self.restore_key_converter.add(converter);
    }

    pub fn add_plugin(&self, plugin: Arc<dyn Plugin>) -> Result<()> {
        Ok(self.plugin_manager.add(plugin)?)
    }

    /// Entry points for the storage collaborator.
    pub fn data_provider(&self) -> &DataProvider {
        &self.data_provider
    }

    /// Entry points for the sync collaborators.
    pub fn sync_manager(&self) -> &SyncManager {
        &self.sync_manager
    }

    /// Entry point for transactions received from the network.
    pub fn watched_transactions(&self) -> &WatchedTransactionManager {
        &self.watched_transactions
    }
}
