//! Structs representing keys and outputs owned by the wallet.

use getset::{CopyGetters, Getters};
use spvkit_address::PublicKeyBytes;
use spvkit_protocol::{
    consensus::BlockHeight, hash::hash160, script::Script, value::Satoshis, OutPoint,
    ScriptType,
};

use crate::transaction::TxOut;

/// A public key derived from the wallet's account key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct PublicKey {
    #[getset(get_copy = "pub")]
    account: u32,
    #[getset(get_copy = "pub")]
    index: u32,
    /// `true` for receive keys, `false` for change keys.
    #[getset(get_copy = "pub")]
    external: bool,
    #[getset(get = "pub")]
    raw: Vec<u8>,
    /// The BIP 86 output key, when the deriver provides one.
    taproot_output_key: Option<[u8; 32]>,
}

impl PublicKey {
    pub fn new(account: u32, index: u32, external: bool, raw: Vec<u8>) -> Self {
        PublicKey {
            account,
            index,
            external,
            raw,
            taproot_output_key: None,
        }
    }

    pub fn with_taproot_output_key(mut self, key: [u8; 32]) -> Self {
        self.taproot_output_key = Some(key);
        self
    }

    /// The derivation path relative to the purpose and coin type, as
    /// `"<account>'/<change>/<index>"`.
    pub fn path(&self) -> String {
        format!(
            "{}'/{}/{}",
            self.account,
            if self.external { 0 } else { 1 },
            self.index
        )
    }

    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.raw)
    }

    pub fn key_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes::new(self.raw.clone(), self.taproot_output_key)
    }
}

/// A public key together with whether the wallet has seen it used on chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyWithUsedState {
    pub public_key: PublicKey,
    pub used: bool,
}

/// A transaction output controlled by the wallet that has not been spent.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct UnspentOutput {
    #[getset(get_copy = "pub")]
    outpoint: OutPoint,
    #[getset(get = "pub")]
    output: TxOut,
    #[getset(get_copy = "pub")]
    script_type: ScriptType,
    #[getset(get = "pub")]
    public_key: PublicKey,
    /// Height of the block that mined the creating transaction.
    #[getset(get_copy = "pub")]
    block_height: Option<BlockHeight>,
    /// Whether the creating transaction has been relayed to the network.
    #[getset(get_copy = "pub")]
    relayed: bool,
    /// Identifier of the plugin that locked this output, if any.
    #[getset(get_copy = "pub")]
    plugin_id: Option<u8>,
    #[getset(get = "pub")]
    plugin_data: Option<Vec<u8>>,
    #[getset(get = "pub")]
    redeem_script: Option<Script>,
}

impl UnspentOutput {
    pub fn new(
        outpoint: OutPoint,
        output: TxOut,
        script_type: ScriptType,
        public_key: PublicKey,
    ) -> Self {
        UnspentOutput {
            outpoint,
            output,
            script_type,
            public_key,
            block_height: None,
            relayed: true,
            plugin_id: None,
            plugin_data: None,
            redeem_script: None,
        }
    }

    pub fn with_block_height(mut self, height: BlockHeight) -> Self {
        self.block_height = Some(height);
        self
    }

    pub fn with_relayed(mut self, relayed: bool) -> Self {
        self.relayed = relayed;
        self
    }

    /// Marks this output as locked by a plugin, spendable only with `redeem_script`.
    pub fn with_plugin(mut self, plugin_id: u8, redeem_script: Script, data: Vec<u8>) -> Self {
        self.plugin_id = Some(plugin_id);
        self.redeem_script = Some(redeem_script);
        self.plugin_data = Some(data);
        self
    }

    pub fn value(&self) -> Satoshis {
        self.output.value
    }

    /// Number of confirmations at the given chain tip, or zero if unmined.
    pub fn confirmations(&self, tip: Option<BlockHeight>) -> u32 {
        match (self.block_height, tip) {
            (Some(height), Some(tip)) if tip >= height => (tip - height) + 1,
            _ => 0,
        }
    }
}

/// A summary of an unspent output for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnspentOutputInfo {
    pub outpoint: OutPoint,
    pub value: Satoshis,
    pub script_type: ScriptType,
    pub address: Option<String>,
    pub path: String,
    pub confirmations: u32,
    /// Whether `confirmations` reached the wallet's confirmation threshold.
    pub confirmed: bool,
    pub plugin_id: Option<u8>,
}

/// Restricts which unspent outputs an operation considers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UtxoFilters {
    pub script_types: Option<Vec<ScriptType>>,
    pub max_outputs_count_for_inputs: Option<usize>,
}

impl UtxoFilters {
    pub fn filter(&self, mut outputs: Vec<UnspentOutput>) -> Vec<UnspentOutput> {
        if let Some(types) = &self.script_types {
            outputs.retain(|o| types.contains(&o.script_type));
        }
        if let Some(max) = self.max_outputs_count_for_inputs {
            outputs.truncate(max);
        }
        outputs
    }
}

/// An address of the wallet that has received funds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsedAddress {
    pub index: u32,
    pub address: String,
}
