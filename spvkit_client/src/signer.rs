//! Placement of signatures into a built transaction.
//!
//! Producing signatures is the job of an [`InputSigner`] supplied by the host, which
//! holds the private keys. [`TransactionSigner`] knows where each script type expects
//! the signer's stack items: in the `scriptSig`, in the witness, or both.

use std::sync::Arc;

use spvkit_protocol::{
    script::{push_data, Script},
    ScriptType,
};

use crate::{builder::InputToSign, transaction::Transaction};

#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("Cannot sign inputs spending {0} outputs")]
    UnsupportedScriptType(ScriptType),
    #[error("Input {0} spends a script-hash output without a redeem script")]
    NoRedeemScript(usize),
    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Produces the stack items that unlock one input.
pub trait InputSigner: Send + Sync {
    /// Returns the items for input `index` of `tx`, which spends `inputs[index]`.
    ///
    /// For key-hash outputs these are the signature followed by the public key; for a
    /// bare public key or Taproot key path spend, the signature alone.
    fn sig_script_data(
        &self,
        tx: &Transaction,
        inputs: &[InputToSign],
        index: usize,
    ) -> Result<Vec<Vec<u8>>, SignerError>;
}

pub struct TransactionSigner {
    input_signer: Arc<dyn InputSigner>,
}

impl TransactionSigner {
    pub fn new(input_signer: Arc<dyn InputSigner>) -> Self {
        TransactionSigner { input_signer }
    }

    /// Signs every input of `tx`. `inputs` must be in the same order as `tx.inputs`.
    ///
    /// All signatures are computed against the unsigned transaction before any of them
    /// is written.
    pub fn sign(&self, tx: &mut Transaction, inputs: &[InputToSign]) -> Result<(), SignerError> {
        let unlocks = (0..inputs.len())
            .map(|index| {
                let items = self.input_signer.sig_script_data(tx, inputs, index)?;
                unlocking_data(&inputs[index], index, items)
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (input, (script_sig, witness)) in tx.inputs.iter_mut().zip(unlocks) {
            input.script_sig = script_sig;
            input.witness = witness;
        }
        Ok(())
    }
}

fn pushes(items: &[Vec<u8>]) -> Vec<u8> {
    let mut script = vec![];
    for item in items {
        push_data(&mut script, item);
    }
    script
}

fn unlocking_data(
    input: &InputToSign,
    index: usize,
    items: Vec<Vec<u8>>,
) -> Result<(Script, Vec<Vec<u8>>), SignerError> {
    let output = &input.unspent_output;
    match output.script_type() {
        ScriptType::P2pkh => Ok((Script(pushes(&items)), vec![])),
        ScriptType::P2pk => Ok((Script(pushes(&items[..items.len().min(1)])), vec![])),
        ScriptType::P2wpkh | ScriptType::P2tr => Ok((Script::default(), items)),
        ScriptType::P2wpkhSh => {
            let redeem =
                Script::nested_witness_redeem_script(&output.public_key().hash160());
            let mut script_sig = vec![];
            push_data(&mut script_sig, &redeem.0);
            Ok((Script(script_sig), items))
        }
        ScriptType::P2sh => {
            let redeem = output
                .redeem_script()
                .as_ref()
                .ok_or(SignerError::NoRedeemScript(index))?;
            let mut script_sig = pushes(&items);
            push_data(&mut script_sig, &redeem.0);
            Ok((Script(script_sig), vec![]))
        }
        other => Err(SignerError::UnsupportedScriptType(other)),
    }
}
