//! *A crate for Bitcoin protocol constants and value types.*
//!
//! `spvkit_protocol` contains the network constants for the Bitcoin main, test and
//! regression-test networks, the [`value::Satoshis`] type for representing BTC amounts,
//! the classification of locking scripts into [`ScriptType`]s, and the small set of
//! encodings and digests that the rest of the `spvkit` crates share.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]
// Temporary until we have addressed all Result<T, ()> cases.
#![allow(clippy::result_unit_err)]

use core::fmt;

pub mod consensus;
pub mod constants;
pub mod encoding;
pub mod hash;
pub mod script;
pub mod value;

mod txid;
pub use txid::{OutPoint, TxId};

/// The locking-script pattern used by a transaction output.
///
/// The script type determines both how an output is encoded as an address and the
/// size of the input that will eventually be required to spend it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub enum ScriptType {
    /// Pay to public key hash.
    P2pkh,
    /// Pay to (bare) public key.
    P2pk,
    /// Pay to script hash.
    P2sh,
    /// Pay to witness public key hash (native SegWit v0).
    P2wpkh,
    /// Pay to witness public key hash, nested inside a P2SH output.
    P2wpkhSh,
    /// Pay to witness script hash (native SegWit v0).
    P2wsh,
    /// Pay to Taproot (SegWit v1).
    P2tr,
    /// Provably unspendable `OP_RETURN` output carrying data.
    NullData,
    /// A script the wallet does not recognize.
    Unknown,
}

impl ScriptType {
    /// Returns `true` if spending an output of this type places signature data in the
    /// witness rather than in the `scriptSig`.
    pub fn is_witness(&self) -> bool {
        matches!(
            self,
            ScriptType::P2wpkh | ScriptType::P2wpkhSh | ScriptType::P2wsh | ScriptType::P2tr
        )
    }

    /// Returns `true` for witness programs that are wrapped in a P2SH output.
    pub fn is_segwit_nested(&self) -> bool {
        matches!(self, ScriptType::P2wpkhSh)
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScriptType::P2pkh => "p2pkh",
            ScriptType::P2pk => "p2pk",
            ScriptType::P2sh => "p2sh",
            ScriptType::P2wpkh => "p2wpkh",
            ScriptType::P2wpkhSh => "p2wpkh(sh)",
            ScriptType::P2wsh => "p2wsh",
            ScriptType::P2tr => "p2tr",
            ScriptType::NullData => "nulldata",
            ScriptType::Unknown => "unknown",
        })
    }
}
