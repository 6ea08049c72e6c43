//! Construction, signing and hand-off of the wallet's own transactions.

use std::sync::Arc;

use spvkit_address::AddressConverter;
use spvkit_protocol::{value::Satoshis, OutPoint, TxId};
use tracing::{debug, info};

use crate::{
    address::AddressConverterChain,
    builder::{BuilderError, SendParameters, TransactionBuilder, TransactionDataSortType},
    data_api::WalletWrite,
    error::Error,
    input_selection::{Reservation, UnspentOutputSelectorChain},
    keys::PublicKeyManager,
    plugin::PluginManager,
    sender::TransactionSender,
    signer::TransactionSigner,
    transaction::Transaction,
    wallet::{PublicKey, UnspentOutput},
};

/// A signed transaction built by [`TransactionCreator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedTransaction {
    pub transaction: Transaction,
    pub fee: Satoshis,
    /// The outputs it spends, in input order.
    pub spent: Vec<OutPoint>,
}

impl CreatedTransaction {
    pub fn txid(&self) -> TxId {
        self.transaction.txid()
    }
}

/// Returns a leased change key to the pool when dropped. Releasing a key that has
/// since been marked used is a no-op.
struct ChangeKeyLease<'a> {
    manager: &'a PublicKeyManager,
    key: Option<PublicKey>,
}

impl Drop for ChangeKeyLease<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.manager.release(&key);
        }
    }
}

/// A signed transaction together with the guards that keep its inputs and change key
/// from being handed to anyone else until it is recorded.
struct Built<'a> {
    created: CreatedTransaction,
    change_key: ChangeKeyLease<'a>,
    _reservation: Reservation,
}

pub struct TransactionCreator {
    builder: Arc<TransactionBuilder>,
    selector: Arc<UnspentOutputSelectorChain>,
    address_converter: Arc<AddressConverterChain>,
    plugin_manager: Arc<PluginManager>,
    key_manager: Arc<PublicKeyManager>,
    signer: TransactionSigner,
    sender: Arc<dyn TransactionSender>,
    storage: Arc<dyn WalletWrite>,
}

impl TransactionCreator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        builder: Arc<TransactionBuilder>,
        selector: Arc<UnspentOutputSelectorChain>,
        address_converter: Arc<AddressConverterChain>,
        plugin_manager: Arc<PluginManager>,
        key_manager: Arc<PublicKeyManager>,
        signer: TransactionSigner,
        sender: Arc<dyn TransactionSender>,
        storage: Arc<dyn WalletWrite>,
    ) -> Self {
        TransactionCreator {
            builder,
            selector,
            address_converter,
            plugin_manager,
            key_manager,
            signer,
            sender,
            storage,
        }
    }

    fn build(&self, params: &SendParameters) -> Result<Built<'_>, Error> {
        let address = self
            .address_converter
            .convert_str(params.address.as_deref().ok_or(BuilderError::NoRecipient)?)?;
        self.plugin_manager.validate(&address, &params.plugin_data)?;

        let mut mtx = self.builder.prepare_outputs(
            Some(address),
            params.memo.as_deref(),
            &params.plugin_data,
        )?;
        let request = self.builder.selection_request(&mtx, params);
        let (selection, reservation) = self
            .selector
            .select_and_reserve(&request, params.unspent_outputs.as_deref())?;

        let change_key = ChangeKeyLease {
            manager: &self.key_manager,
            key: match selection.change_value {
                Some(_) => Some(self.key_manager.change_public_key()?),
                None => None,
            },
        };

        self.builder.complete(
            &mut mtx,
            &selection,
            change_key.key.as_ref(),
            params.rbf_enabled,
        )?;
        let (mut transaction, inputs) =
            mtx.unsigned_transaction(params.sort_type, &mut rand::thread_rng())?;
        self.signer.sign(&mut transaction, &inputs)?;

        debug!(
            "Built transaction {} spending {} outputs",
            transaction.txid(),
            inputs.len()
        );
        Ok(Built {
            created: CreatedTransaction {
                transaction,
                fee: selection.fee,
                spent: inputs
                    .iter()
                    .map(|i| i.unspent_output.outpoint())
                    .collect(),
            },
            change_key,
            _reservation: reservation,
        })
    }

    /// Builds and signs a payment, records it in storage and hands it to the sender.
    ///
    /// Nothing is recorded and no key is consumed unless the transaction was built and
    /// signed successfully.
    pub fn create(&self, params: &SendParameters) -> Result<CreatedTransaction, Error> {
        self.sender.verify_can_send()?;
        let built = self.build(params)?;
        let created = &built.created;

        self.storage
            .process_created(&created.transaction, &created.spent)?;
        info!(
            "Created transaction {} with fee {}",
            created.txid(),
            created.fee
        );
        if let Some(key) = &built.change_key.key {
            self.key_manager.mark_used(std::slice::from_ref(key))?;
        }
        self.sender.send(&created.transaction)?;

        Ok(built.created.clone())
    }

    /// Builds and signs a payment without recording or relaying it, returning its
    /// network serialization.
    pub fn create_raw_transaction(&self, params: &SendParameters) -> Result<Vec<u8>, Error> {
        let built = self.build(params)?;
        Ok(built.created.transaction.serialize())
    }

    /// Spends a single output to `address`, paying the fee out of its value.
    pub fn create_from(
        &self,
        unspent_output: &UnspentOutput,
        address: &str,
        memo: Option<&str>,
        fee_rate: u64,
        sort_type: TransactionDataSortType,
    ) -> Result<CreatedTransaction, Error> {
        let mut params = SendParameters::new(
            Some(address.to_owned()),
            unspent_output.value(),
            fee_rate,
        )
        .receiver_pays()
        .with_sort_type(sort_type)
        .with_unspent_outputs(vec![unspent_output.outpoint()]);
        params.memo = memo.map(str::to_owned);
        self.create(&params)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spvkit_protocol::{consensus::Network, value::Satoshis, ScriptType};

    use super::TransactionCreator;
    use crate::{
        address::AddressConverterChain,
        builder::{SendParameters, TransactionBuilder, TransactionDataSortType},
        error::Error,
        fees::{dust::DustCalculator, size::TransactionSizeCalculator},
        input_selection::{SelectionError, UnspentOutputProvider, UnspentOutputSelectorChain},
        keys::PublicKeyManager,
        plugin::PluginManager,
        sender::SenderError,
        signer::TransactionSigner,
        testing::{utxo, MemoryWalletDb, MockKeyDeriver, MockSender, MockSigner, P2PKH_ADDRESS},
    };

    struct Fixture {
        db: Arc<MemoryWalletDb>,
        sender: Arc<MockSender>,
        keys: Arc<PublicKeyManager>,
        creator: TransactionCreator,
    }

    fn fixture(values: &[u64], sender: MockSender) -> Fixture {
        let db = Arc::new(MemoryWalletDb::new());
        for (i, value) in values.iter().enumerate() {
            db.add_unspent_output(utxo(i as u8, *value));
        }
        let sender = Arc::new(sender);
        let plugins = Arc::new(PluginManager::new());
        let addresses = Arc::new(AddressConverterChain::for_network(Network::Main));
        let keys = Arc::new(PublicKeyManager::new(
            db.clone(),
            Arc::new(MockKeyDeriver),
            0,
            3,
        ));
        keys.fill_gap().unwrap();
        let size = TransactionSizeCalculator;
        let selector = Arc::new(UnspentOutputSelectorChain::with_default_selectors(
            Arc::new(UnspentOutputProvider::new(db.clone(), plugins.clone())),
            size,
            DustCalculator::new(3, size),
        ));
        let builder = Arc::new(TransactionBuilder::new(
            addresses.clone(),
            plugins.clone(),
            ScriptType::P2pkh,
        ));
        let creator = TransactionCreator::new(
            builder,
            selector,
            addresses,
            plugins,
            keys.clone(),
            TransactionSigner::new(Arc::new(MockSigner)),
            sender.clone(),
            db.clone(),
        );
        Fixture {
            db,
            sender,
            keys,
            creator,
        }
    }

    fn params(value: u64) -> SendParameters {
        SendParameters::new(
            Some(P2PKH_ADDRESS.to_owned()),
            Satoshis::const_from_u64(value),
            10,
        )
        .with_sort_type(TransactionDataSortType::Bip69)
    }

    #[test]
    fn created_transactions_conserve_value() {
        let f = fixture(&[100_000], MockSender::new());
        let created = f.creator.create(&params(50_000)).unwrap();

        let outputs = created.transaction.total_output_value().unwrap();
        assert_eq!(
            (outputs + created.fee).unwrap(),
            Satoshis::const_from_u64(100_000)
        );
        assert_eq!(f.sender.sent().len(), 1);
        assert_eq!(f.db.created().len(), 1);
        assert!(f.db.unspent_outputs_snapshot().is_empty());
        // The change key was consumed.
        assert_eq!(f.keys.used_public_keys(true).unwrap().len(), 1);
    }

    #[test]
    fn raw_transactions_are_reproducible() {
        let f = fixture(&[30_000, 40_000, 50_000], MockSender::new());
        let first = f.creator.create_raw_transaction(&params(60_000)).unwrap();
        let second = f.creator.create_raw_transaction(&params(60_000)).unwrap();
        assert_eq!(first, second);
        assert!(f.db.created().is_empty());
        assert!(f.sender.sent().is_empty());
    }

    #[test]
    fn failures_leave_no_trace() {
        let f = fixture(&[100_000], MockSender::failing());
        assert_matches!(
            f.creator.create(&params(50_000)),
            Err(Error::Sender(SenderError::NoConnectedPeers))
        );
        assert!(f.db.created().is_empty());

        let f = fixture(&[1_000], MockSender::new());
        assert_matches!(
            f.creator.create(&params(50_000)),
            Err(Error::Selection(SelectionError::InsufficientFunds { .. }))
        );
        assert!(f.keys.used_public_keys(true).unwrap().is_empty());
        // The change key was not leased away.
        assert_eq!(f.keys.change_public_key().unwrap().index(), 0);
    }

    #[test]
    fn redeem_spends_one_output_without_change() {
        let f = fixture(&[20_000, 80_000], MockSender::new());
        let output = utxo(0, 20_000);
        let created = f
            .creator
            .create_from(&output, P2PKH_ADDRESS, None, 10, TransactionDataSortType::None)
            .unwrap();
        assert_eq!(created.spent, vec![output.outpoint()]);
        assert_eq!(created.transaction.outputs.len(), 1);
        assert_eq!(
            created.transaction.outputs[0].value,
            Satoshis::const_from_u64(20_000 - 1_920)
        );
        assert!(f.keys.used_public_keys(true).unwrap().is_empty());
    }
}
