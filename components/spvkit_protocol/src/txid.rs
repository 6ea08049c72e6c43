use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The identifier for a Bitcoin transaction: the double-SHA-256 hash of the transaction
/// serialized without witness data.
///
/// Internally the bytes are kept in the order produced by the hash function; the
/// [`Display`] and [`FromStr`] forms use the byte-reversed hex that block explorers and
/// RPC methods show.
///
/// [`Display`]: fmt::Display
#[derive(Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash, Default)]
pub struct TxId([u8; 32]);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The (byte-flipped) hex string is more useful than the raw bytes, because we can
        // look that up in RPC methods and block explorers.
        let txid_str = self.to_string();
        f.debug_tuple("TxId").field(&txid_str).finish()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.0;
        data.reverse();
        formatter.write_str(&hex::encode(data))
    }
}

impl FromStr for TxId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(TxId(bytes))
    }
}

impl AsRef<[u8; 32]> for TxId {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<TxId> for [u8; 32] {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl TxId {
    /// Wraps the given byte array as a TxId value
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        TxId(bytes)
    }

    /// Reads a 32-byte txid directly from the provided reader.
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hash = [0u8; 32];
        reader.read_exact(&mut hash)?;
        Ok(TxId::from_bytes(hash))
    }

    /// Writes the 32-byte payload directly to the provided writer.
    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }

    /// Returns true when the txid consists of all zeros; this only occurs for coinbase
    /// transactions.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

/// A reference to a specific output of a previous transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    txid: TxId,
    index: u32,
}

impl OutPoint {
    pub const fn new(txid: TxId, index: u32) -> Self {
        OutPoint { txid, index }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let txid = TxId::read(&mut reader)?;
        let index = reader.read_u32::<LittleEndian>()?;
        Ok(OutPoint { txid, index })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.txid.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.index)
    }

    /// Returns the transaction that created the referenced output.
    pub fn txid(&self) -> &TxId {
        &self.txid
    }

    /// Returns the index of the referenced output within its transaction.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::{OutPoint, TxId};

    #[test]
    fn display_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let txid = TxId::from_bytes(bytes);
        let s = txid.to_string();
        assert!(s.ends_with("ab"));
        assert_eq!(s.parse::<TxId>().unwrap(), txid);
    }

    #[test]
    fn outpoint_encoding() {
        let outpoint = OutPoint::new(TxId::from_bytes([7; 32]), 3);
        let mut buf = vec![];
        outpoint.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[32..], &[3, 0, 0, 0]);
        assert_eq!(OutPoint::read(&buf[..]).unwrap(), outpoint);
    }
}
