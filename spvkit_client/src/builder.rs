//! Assembly of unsigned transactions.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{seq::SliceRandom, Rng};
use spvkit_address::{Address, AddressConverter};
use spvkit_protocol::{
    constants::{MAX_NULL_DATA_SIZE, SEQUENCE_FINAL, TX_VERSION},
    script::Script,
    value::{BalanceError, Satoshis},
    OutPoint, ScriptType,
};

use crate::{
    address::AddressConverterChain,
    error::Error,
    input_selection::{SelectedUnspentOutputInfo, SelectionRequest},
    plugin::{PluginData, PluginManager},
    transaction::{Transaction, TxIn, TxOut},
    wallet::{PublicKey, UnspentOutput},
};

/// Sequence number signalling opt-in replace-by-fee (BIP 125).
pub const SEQUENCE_RBF: u32 = 0xffff_fffd;

#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    #[error("Null data payload of {size} bytes exceeds the limit of {max} bytes")]
    NullDataTooLarge { size: usize, max: usize },
    #[error("The transaction has no recipient")]
    NoRecipient,
    #[error("A change output was selected but no change key is available")]
    NoChangeKey,
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

/// A payment as requested by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendParameters {
    /// The recipient. Estimates may leave this unset, in which case the recipient
    /// output is assumed to have the change script type.
    pub address: Option<String>,
    pub value: Satoshis,
    /// Satoshis per virtual byte.
    pub fee_rate: u64,
    /// Whether the fee is paid on top of `value` rather than out of it.
    pub sender_pay: bool,
    pub memo: Option<String>,
    pub sort_type: TransactionDataSortType,
    pub rbf_enabled: bool,
    /// Spend exactly these outputs instead of letting the selectors choose.
    pub unspent_outputs: Option<Vec<OutPoint>>,
    pub plugin_data: PluginData,
}

impl SendParameters {
    pub fn new(address: Option<String>, value: Satoshis, fee_rate: u64) -> Self {
        SendParameters {
            address,
            value,
            fee_rate,
            sender_pay: true,
            memo: None,
            sort_type: TransactionDataSortType::default(),
            rbf_enabled: true,
            unspent_outputs: None,
            plugin_data: PluginData::new(),
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn with_sort_type(mut self, sort_type: TransactionDataSortType) -> Self {
        self.sort_type = sort_type;
        self
    }

    pub fn with_rbf(mut self, enabled: bool) -> Self {
        self.rbf_enabled = enabled;
        self
    }

    pub fn with_unspent_outputs(mut self, outpoints: Vec<OutPoint>) -> Self {
        self.unspent_outputs = Some(outpoints);
        self
    }

    pub fn with_plugin_data(mut self, plugin_data: PluginData) -> Self {
        self.plugin_data = plugin_data;
        self
    }

    /// Deducts the fee from `value` instead of adding it.
    pub fn receiver_pays(mut self) -> Self {
        self.sender_pay = false;
        self
    }
}

/// An input of a transaction under construction, with what is needed to sign it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputToSign {
    pub unspent_output: UnspentOutput,
    pub sequence: u32,
}

/// A transaction under construction.
///
/// Plugins modify this in [`crate::plugin::Plugin::process_outputs`] and
/// [`crate::plugin::Plugin::process_inputs`].
#[derive(Clone, Debug, Default)]
pub struct MutableTransaction {
    pub recipient_address: Option<Address>,
    pub recipient_value: Satoshis,
    pub change_address: Option<Address>,
    pub change_value: Satoshis,
    pub change_public_key: Option<PublicKey>,
    pub inputs: Vec<InputToSign>,
    pub lock_time: u32,
    memo: Option<Vec<u8>>,
    plugin_payloads: BTreeMap<u8, Vec<u8>>,
}

impl MutableTransaction {
    pub fn new(recipient_address: Option<Address>) -> Self {
        MutableTransaction {
            recipient_address,
            ..Default::default()
        }
    }

    pub fn set_memo(&mut self, memo: Option<&str>) {
        self.memo = memo.filter(|m| !m.is_empty()).map(|m| m.as_bytes().to_vec());
    }

    pub fn add_plugin_payload(&mut self, plugin_id: u8, payload: Vec<u8>) {
        self.plugin_payloads.insert(plugin_id, payload);
    }

    /// Total bytes of data carried in the null-data output.
    pub fn null_data_payload_len(&self) -> usize {
        self.memo.as_ref().map_or(0, Vec::len)
            + self
                .plugin_payloads
                .values()
                .map(|p| 1 + p.len())
                .sum::<usize>()
    }

    /// The `OP_RETURN` output script: the memo push, followed by a `[id] [payload]` pair
    /// of pushes for each plugin in ascending id order. The memo push is empty when
    /// only plugin data is present.
    pub fn null_data_script(&self) -> Option<Script> {
        if self.memo.is_none() && self.plugin_payloads.is_empty() {
            return None;
        }
        let memo = self.memo.as_deref().unwrap_or(&[]);
        let ids: Vec<[u8; 1]> = self.plugin_payloads.keys().map(|id| [*id]).collect();
        let pushes = std::iter::once(memo).chain(
            ids.iter()
                .zip(self.plugin_payloads.values())
                .flat_map(|(id, payload)| [&id[..], &payload[..]]),
        );
        Some(Script::null_data(pushes))
    }

    /// Script type of the recipient output, when known.
    pub fn recipient_script_type(&self) -> Option<ScriptType> {
        self.recipient_address.as_ref().map(Address::script_type)
    }

    /// The outputs of this transaction in construction order: recipient, change,
    /// null data.
    pub fn outputs(&self) -> Result<Vec<TxOut>, BuilderError> {
        let recipient = self
            .recipient_address
            .as_ref()
            .ok_or(BuilderError::NoRecipient)?;
        let mut outputs = vec![TxOut::new(
            self.recipient_value,
            recipient.locking_script(),
        )];
        if let Some(change) = &self.change_address {
            outputs.push(TxOut::new(self.change_value, change.locking_script()));
        }
        if let Some(script) = self.null_data_script() {
            outputs.push(TxOut::new(Satoshis::ZERO, script));
        }
        Ok(outputs)
    }

    /// Sorts inputs and outputs and returns the unsigned transaction, along with the
    /// inputs in their final order.
    pub fn unsigned_transaction<R: Rng>(
        &self,
        sort_type: TransactionDataSortType,
        rng: &mut R,
    ) -> Result<(Transaction, Vec<InputToSign>), BuilderError> {
        let mut inputs = self.inputs.clone();
        let mut outputs = self.outputs()?;
        sort_type.sort(&mut inputs, &mut outputs, rng);

        let tx = Transaction {
            version: TX_VERSION,
            inputs: inputs
                .iter()
                .map(|i| TxIn::new(i.unspent_output.outpoint(), i.sequence))
                .collect(),
            outputs,
            lock_time: self.lock_time,
        };
        Ok((tx, inputs))
    }
}

/// How the inputs and outputs of a new transaction are ordered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransactionDataSortType {
    /// Keep construction order.
    None,
    /// Random order.
    #[default]
    Shuffle,
    /// Lexicographic ordering as specified in BIP 69.
    Bip69,
}

impl TransactionDataSortType {
    pub fn sort<R: Rng>(&self, inputs: &mut [InputToSign], outputs: &mut [TxOut], rng: &mut R) {
        match self {
            TransactionDataSortType::None => (),
            TransactionDataSortType::Shuffle => {
                inputs.shuffle(rng);
                outputs.shuffle(rng);
            }
            TransactionDataSortType::Bip69 => {
                inputs.sort_by(bip69_input_order);
                outputs.sort_by(bip69_output_order);
            }
        }
    }
}

fn bip69_input_order(a: &InputToSign, b: &InputToSign) -> Ordering {
    let (a, b) = (a.unspent_output.outpoint(), b.unspent_output.outpoint());
    // Transaction hashes compare in their displayed (byte-reversed) form.
    let reversed = |txid: &[u8; 32]| {
        let mut bytes = *txid;
        bytes.reverse();
        bytes
    };
    reversed(a.txid().as_ref())
        .cmp(&reversed(b.txid().as_ref()))
        .then(a.index().cmp(&b.index()))
}

fn bip69_output_order(a: &TxOut, b: &TxOut) -> Ordering {
    a.value
        .cmp(&b.value)
        .then_with(|| a.script_pubkey.0.cmp(&b.script_pubkey.0))
}

/// Builds [`MutableTransaction`]s in two steps: outputs first, so that their sizes are
/// known to coin selection, then inputs and change once selection is done.
pub struct TransactionBuilder {
    address_converter: Arc<AddressConverterChain>,
    plugin_manager: Arc<PluginManager>,
    change_script_type: ScriptType,
}

impl TransactionBuilder {
    pub fn new(
        address_converter: Arc<AddressConverterChain>,
        plugin_manager: Arc<PluginManager>,
        change_script_type: ScriptType,
    ) -> Self {
        TransactionBuilder {
            address_converter,
            plugin_manager,
            change_script_type,
        }
    }

    pub fn change_script_type(&self) -> ScriptType {
        self.change_script_type
    }

    /// Describes the prepared transaction `mtx` to coin selection.
    pub fn selection_request(
        &self,
        mtx: &MutableTransaction,
        params: &SendParameters,
    ) -> SelectionRequest {
        SelectionRequest {
            value: params.value,
            fee_rate: params.fee_rate,
            output_script_type: mtx
                .recipient_script_type()
                .unwrap_or(self.change_script_type),
            change_type: self.change_script_type,
            sender_pay: params.sender_pay,
            null_data_len: mtx.null_data_script().map(|s| s.0.len()),
        }
    }

    /// Starts a transaction to `recipient`, attaching the memo and letting plugins add
    /// their data.
    pub fn prepare_outputs(
        &self,
        recipient: Option<Address>,
        memo: Option<&str>,
        plugin_data: &PluginData,
    ) -> Result<MutableTransaction, Error> {
        let mut mtx = MutableTransaction::new(recipient);
        mtx.set_memo(memo);
        self.plugin_manager.process_outputs(&mut mtx, plugin_data)?;

        let size = mtx.null_data_payload_len();
        if size > MAX_NULL_DATA_SIZE {
            return Err(BuilderError::NullDataTooLarge {
                size,
                max: MAX_NULL_DATA_SIZE,
            }
            .into());
        }
        Ok(mtx)
    }

    /// Fills in the values, inputs and change of a prepared transaction from a coin
    /// selection result.
    pub fn complete(
        &self,
        mtx: &mut MutableTransaction,
        selection: &SelectedUnspentOutputInfo,
        change_key: Option<&PublicKey>,
        rbf_enabled: bool,
    ) -> Result<(), Error> {
        mtx.recipient_value = selection.recipient_value;

        match (selection.change_value, change_key) {
            (Some(value), Some(key)) => {
                let address = self
                    .address_converter
                    .convert_public_key(&key.key_bytes(), self.change_script_type)?;
                mtx.change_address = Some(address);
                mtx.change_value = value;
                mtx.change_public_key = Some(key.clone());
            }
            (Some(_), None) => return Err(BuilderError::NoChangeKey.into()),
            (None, _) => {
                mtx.change_address = None;
                mtx.change_value = Satoshis::ZERO;
                mtx.change_public_key = None;
            }
        }

        let sequence = if rbf_enabled {
            SEQUENCE_RBF
        } else {
            SEQUENCE_FINAL
        };
        mtx.inputs = selection
            .outputs
            .iter()
            .map(|o| InputToSign {
                unspent_output: o.clone(),
                sequence,
            })
            .collect();

        self.plugin_manager.process_inputs(mtx)?;
        Ok(())
    }
}
