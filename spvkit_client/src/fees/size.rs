//! Transaction size estimation.
//!
//! Sizes are estimated from script types alone, before any signature exists, assuming
//! 72-byte DER signatures and compressed public keys. Sizes are reported in virtual
//! bytes (BIP 141), rounding up.

use spvkit_protocol::{encoding::CompactSize, ScriptType};

/// `version` (4) + input count (1) + output count (1) + `lock_time` (4).
const TX_OVERHEAD: u64 = 10;
/// The SegWit marker and flag bytes, counted in weight units.
const SEGWIT_MARKER_WEIGHT: u64 = 2;
/// Outpoint (36) + sequence (4).
const INPUT_OVERHEAD: u64 = 40;

const SIGNATURE_PUSH: u64 = 1 + 72;
const PUBKEY_PUSH: u64 = 1 + 33;

#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionSizeCalculator;

impl TransactionSizeCalculator {
    /// The non-witness size of an input spending an output of `script_type`.
    pub fn input_size(&self, script_type: ScriptType) -> u64 {
        let script_sig = match script_type {
            ScriptType::P2pk => SIGNATURE_PUSH,
            ScriptType::P2wpkh | ScriptType::P2wsh | ScriptType::P2tr => 0,
            // Push of the 22-byte P2WPKH redeem script.
            ScriptType::P2wpkhSh => 23,
            _ => SIGNATURE_PUSH + PUBKEY_PUSH,
        };
        INPUT_OVERHEAD + 1 + script_sig
    }

    /// The witness size, in weight units, of an input spending `script_type`.
    pub fn witness_size(&self, script_type: ScriptType) -> u64 {
        match script_type {
            ScriptType::P2wpkh | ScriptType::P2wpkhSh | ScriptType::P2wsh => {
                1 + SIGNATURE_PUSH + PUBKEY_PUSH
            }
            // One 64-byte Schnorr signature (default sighash).
            ScriptType::P2tr => 1 + 1 + 64,
            _ => 0,
        }
    }

    /// The virtual size of an input, including its share of the witness.
    pub fn input_vsize(&self, script_type: ScriptType) -> u64 {
        self.input_size(script_type) + self.witness_size(script_type).div_ceil(4)
    }

    pub fn output_size(&self, script_type: ScriptType) -> u64 {
        let script = match script_type {
            ScriptType::P2pkh => 25,
            ScriptType::P2sh | ScriptType::P2wpkhSh => 23,
            ScriptType::P2wpkh => 22,
            ScriptType::P2wsh | ScriptType::P2tr => 34,
            ScriptType::P2pk => 35,
            ScriptType::NullData | ScriptType::Unknown => 0,
        };
        8 + 1 + script
    }

    /// The size of an output whose locking script is `script_len` bytes long.
    pub fn output_size_for_script(&self, script_len: usize) -> u64 {
        8 + CompactSize::serialized_size(script_len) as u64 + script_len as u64
    }

    /// Estimates the virtual size of a transaction spending outputs of the given
    /// `inputs` types, paying to outputs of the given types, plus an optional
    /// null-data output with a locking script of `null_data_len` bytes.
    pub fn transaction_size(
        &self,
        inputs: &[ScriptType],
        outputs: &[ScriptType],
        null_data_len: Option<usize>,
    ) -> u64 {
        let base = TX_OVERHEAD
            + inputs.iter().map(|t| self.input_size(*t)).sum::<u64>()
            + outputs.iter().map(|t| self.output_size(*t)).sum::<u64>()
            + null_data_len.map_or(0, |len| self.output_size_for_script(len));

        if inputs.iter().any(|t| t.is_witness()) {
            // Non-witness inputs still carry an empty witness stack (one byte).
            let witness: u64 = inputs
                .iter()
                .map(|t| match self.witness_size(*t) {
                    0 => 1,
                    w => w,
                })
                .sum();
            (base * 4 + SEGWIT_MARKER_WEIGHT + witness).div_ceil(4)
        } else {
            base
        }
    }
}

#[cfg(test)]
mod tests {
    use spvkit_protocol::ScriptType;

    use super::TransactionSizeCalculator;

    #[test]
    fn input_sizes() {
        let calc = TransactionSizeCalculator;
        assert_eq!(calc.input_size(ScriptType::P2pkh), 148);
        assert_eq!(calc.input_size(ScriptType::P2pk), 114);
        assert_eq!(calc.input_size(ScriptType::P2wpkh), 41);
        assert_eq!(calc.witness_size(ScriptType::P2wpkh), 108);
        assert_eq!(calc.input_size(ScriptType::P2wpkhSh), 64);
        assert_eq!(calc.input_vsize(ScriptType::P2tr), 41 + 17);
    }

    #[test]
    fn output_sizes() {
        let calc = TransactionSizeCalculator;
        assert_eq!(calc.output_size(ScriptType::P2pkh), 34);
        assert_eq!(calc.output_size(ScriptType::P2sh), 32);
        assert_eq!(calc.output_size(ScriptType::P2wpkh), 31);
        assert_eq!(calc.output_size(ScriptType::P2tr), 43);
        assert_eq!(calc.output_size_for_script(10), 19);
    }

    #[test]
    fn legacy_transaction() {
        let calc = TransactionSizeCalculator;
        // One P2PKH input paying to two P2PKH outputs: the canonical 226-byte spend.
        assert_eq!(
            calc.transaction_size(
                &[ScriptType::P2pkh],
                &[ScriptType::P2pkh, ScriptType::P2pkh],
                None
            ),
            226
        );
    }

    #[test]
    fn segwit_transaction() {
        let calc = TransactionSizeCalculator;
        // 10 + 41 + 31 + 31 = 113 base bytes; weight 452 + 2 + 108 = 562 -> 141 vB.
        assert_eq!(
            calc.transaction_size(
                &[ScriptType::P2wpkh],
                &[ScriptType::P2wpkh, ScriptType::P2wpkh],
                None
            ),
            141
        );
        let with_memo = calc.transaction_size(
            &[ScriptType::P2wpkh],
            &[ScriptType::P2wpkh],
            Some(6),
        );
        assert_eq!(with_memo, 141 - 31 + 15);
    }
}
