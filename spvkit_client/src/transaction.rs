//! Bitcoin transactions, as built and signed by this crate.

use std::io::{self, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use spvkit_protocol::{
    encoding::{CompactSize, Vector},
    hash::sha256d,
    script::Script,
    value::Satoshis,
    OutPoint, TxId,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// Returns an unsigned input spending `prevout`.
    pub fn new(prevout: OutPoint, sequence: u32) -> Self {
        TxIn {
            prevout,
            script_sig: Script::default(),
            sequence,
            witness: vec![],
        }
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.prevout.write(&mut writer)?;
        self.script_sig.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.sequence)
    }

    fn write_witness<W: Write>(&self, mut writer: W) -> io::Result<()> {
        CompactSize::write(&mut writer, self.witness.len())?;
        for item in &self.witness {
            Vector::write_bytes(&mut writer, item)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Satoshis,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Satoshis, script_pubkey: Script) -> Self {
        TxOut {
            value,
            script_pubkey,
        }
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.value.to_u64_le_bytes())?;
        self.script_pubkey.write(&mut writer)
    }
}

/// A complete Bitcoin transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Returns `true` if any input carries witness data, in which case the transaction
    /// is serialized in the BIP 144 format.
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Writes the transaction, including witness data if `include_witness` is set and
    /// any input has a witness.
    pub fn write<W: Write>(&self, mut writer: W, include_witness: bool) -> io::Result<()> {
        let segwit = include_witness && self.has_witness();

        writer.write_u32::<LittleEndian>(self.version)?;
        if segwit {
            writer.write_all(&[0x00, 0x01])?;
        }
        CompactSize::write(&mut writer, self.inputs.len())?;
        for input in &self.inputs {
            input.write(&mut writer)?;
        }
        CompactSize::write(&mut writer, self.outputs.len())?;
        for output in &self.outputs {
            output.write(&mut writer)?;
        }
        if segwit {
            for input in &self.inputs {
                input.write_witness(&mut writer)?;
            }
        }
        writer.write_u32::<LittleEndian>(self.lock_time)
    }

    fn to_bytes(&self, include_witness: bool) -> Vec<u8> {
        let mut buf = vec![];
        self.write(&mut buf, include_witness)
            .expect("writing to a Vec cannot fail");
        buf
    }

    /// The network serialization of this transaction.
    pub fn serialize(&self) -> Vec<u8> {
        self.to_bytes(true)
    }

    pub fn txid(&self) -> TxId {
        TxId::from_bytes(sha256d(&self.to_bytes(false)))
    }

    /// The virtual size of this transaction, as defined in BIP 141.
    pub fn vsize(&self) -> usize {
        let base = self.to_bytes(false).len();
        let total = self.serialize().len();
        (base * 3 + total + 3) / 4
    }

    pub fn total_output_value(&self) -> Option<Satoshis> {
        self.outputs.iter().map(|o| o.value).sum()
    }
}
