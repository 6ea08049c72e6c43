//! *Parser and encoder for Bitcoin addresses.*
//!
//! This crate recognises the Base58Check and SegWit (bech32 / bech32m) address encodings
//! and maps each of them to a [`ScriptType`] plus the payload that the corresponding
//! locking script commits to.
//!
//! Codecs implement [`AddressConverter`]. Each codec only overrides the conversions that
//! it supports; the default methods report the conversion as unsupported, so that a
//! caller composing several codecs can fall through to the next one.
//!
//! # Examples
//!
//! ```
//! use spvkit_address::{AddressConverter, Base58AddressConverter};
//! use spvkit_protocol::{consensus::Network, ScriptType};
//!
//! let converter = Base58AddressConverter::new(Network::Main);
//! let addr = converter
//!     .convert_str("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2")
//!     .unwrap();
//! assert_eq!(addr.script_type(), ScriptType::P2pkh);
//! assert_eq!(addr.to_string(), "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2");
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;
use std::fmt;

use spvkit_protocol::{hash::hash160, script::Script, ScriptType};

mod base58;
mod segwit;

pub use base58::Base58AddressConverter;
pub use segwit::SegWitBech32AddressConverter;

/// A decoded Bitcoin address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Address {
    script_type: ScriptType,
    payload: Vec<u8>,
    witness_version: Option<u8>,
    encoded: String,
}

impl Address {
    /// Constructs an address from its parts. Codecs use this after they have checked
    /// that `encoded` is the canonical encoding of the payload.
    pub fn from_parts(
        script_type: ScriptType,
        payload: Vec<u8>,
        witness_version: Option<u8>,
        encoded: String,
    ) -> Self {
        Address {
            script_type,
            payload,
            witness_version,
            encoded,
        }
    }

    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// The hash or witness program that the locking script commits to.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The SegWit version, for native SegWit addresses.
    pub fn witness_version(&self) -> Option<u8> {
        self.witness_version
    }

    /// The canonical string form of this address.
    pub fn string_value(&self) -> &str {
        &self.encoded
    }

    /// Returns the locking script that pays to this address.
    pub fn locking_script(&self) -> Script {
        match self.witness_version {
            Some(version) if version > 0 => Script::witness_program(version, &self.payload),
            _ => Script::locking(self.script_type, &self.payload),
        }
        .unwrap_or_default()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// The serialized form of a public key, as needed to derive the addresses that pay to it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PublicKeyBytes {
    raw: Vec<u8>,
    taproot_output_key: Option<[u8; 32]>,
}

impl PublicKeyBytes {
    /// Wraps a serialized (normally compressed, 33-byte) public key.
    ///
    /// `taproot_output_key` is the BIP 86 tweaked x-only key for this public key, if the
    /// key deriver computed one.
    pub fn new(raw: Vec<u8>, taproot_output_key: Option<[u8; 32]>) -> Self {
        PublicKeyBytes {
            raw,
            taproot_output_key,
        }
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn taproot_output_key(&self) -> Option<&[u8; 32]> {
        self.taproot_output_key.as_ref()
    }

    /// `HASH160` of the serialized key.
    pub fn hash160(&self) -> [u8; 20] {
        hash160(&self.raw)
    }

    /// `HASH160` of the P2WPKH redeem script that nests this key inside a P2SH output.
    pub fn nested_witness_script_hash(&self) -> [u8; 20] {
        hash160(&Script::nested_witness_redeem_script(&self.hash160()).0)
    }
}

/// An error while attempting to convert between an address and its components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversionError {
    /// The string is not valid in the encoding handled by the converter.
    InvalidEncoding,
    /// The address is well-formed but belongs to a different network.
    WrongNetwork,
    /// The payload has the wrong length for the requested script type.
    InvalidPayloadLength(usize),
    /// The converter does not handle this kind of address.
    Unsupported(&'static str),
    /// No converter recognised the address.
    UnknownAddressType,
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionError::InvalidEncoding => write!(f, "Invalid address encoding"),
            ConversionError::WrongNetwork => {
                write!(f, "Address is for a different network")
            }
            ConversionError::InvalidPayloadLength(len) => {
                write!(f, "Invalid address payload length {}", len)
            }
            ConversionError::Unsupported(kind) => {
                write!(f, "{} addresses are not supported", kind)
            }
            ConversionError::UnknownAddressType => write!(f, "Unknown address type"),
        }
    }
}

impl Error for ConversionError {}

/// A codec between address strings, locking-script payloads, public keys and
/// [`Address`] values.
///
/// Implement the methods matching the formats your codec handles; the remaining default
/// methods return [`ConversionError::Unsupported`].
///
/// ```
/// use spvkit_address::{Address, AddressConverter, ConversionError};
/// use spvkit_protocol::ScriptType;
///
/// struct Upper;
///
/// impl AddressConverter for Upper {
///     fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
///         if s.starts_with("X") {
///             Ok(Address::from_parts(ScriptType::Unknown, vec![], None, s.to_owned()))
///         } else {
///             Err(ConversionError::InvalidEncoding)
///         }
///     }
/// }
///
/// assert!(Upper.convert_str("Xyz").is_ok());
/// assert_eq!(
///     Upper.convert_payload(&[0; 20], ScriptType::P2pkh).unwrap_err().to_string(),
///     "payload addresses are not supported",
/// );
/// ```
pub trait AddressConverter: Send + Sync {
    fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
        let _ = s;
        Err(ConversionError::Unsupported("string"))
    }

    fn convert_payload(
        &self,
        payload: &[u8],
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        let _ = (payload, script_type);
        Err(ConversionError::Unsupported("payload"))
    }

    fn convert_public_key(
        &self,
        key: &PublicKeyBytes,
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        let _ = (key, script_type);
        Err(ConversionError::Unsupported("public key"))
    }
}

#[cfg(test)]
mod tests {
    use spvkit_protocol::ScriptType;

    use super::{Address, PublicKeyBytes};

    #[test]
    fn locking_script_for_witness_v1() {
        let addr = Address::from_parts(ScriptType::P2tr, vec![7; 32], Some(1), "x".into());
        let script = addr.locking_script();
        assert_eq!(script.0[0], 0x51);
        assert_eq!(script.0.len(), 34);
    }

    #[test]
    fn nested_witness_hash_differs_from_key_hash() {
        let key = PublicKeyBytes::new(vec![2; 33], None);
        assert_ne!(key.hash160(), key.nested_witness_script_hash());
    }
}
