//! Constants for a local regression-test network.
//!
//! Regtest shares its Base58 prefixes with testnet but uses its own SegWit HRP.

pub use super::testnet::{B58_PUBKEY_ADDRESS_PREFIX, B58_SCRIPT_ADDRESS_PREFIX, COIN_TYPE};

/// The HRP for a Bech32-encoded regtest SegWit address.
pub const HRP_SEGWIT_ADDRESS: &str = "bcrt";
