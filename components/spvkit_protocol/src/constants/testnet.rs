//! Constants for the Bitcoin test network.

/// The testnet coin type, as defined by [SLIP 44].
///
/// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
pub const COIN_TYPE: u32 = 1;

/// The HRP for a Bech32-encoded testnet SegWit address.
pub const HRP_SEGWIT_ADDRESS: &str = "tb";

/// The prefix for a Base58Check-encoded testnet pay-to-public-key-hash address.
pub const B58_PUBKEY_ADDRESS_PREFIX: u8 = 0x6f;

/// The prefix for a Base58Check-encoded testnet pay-to-script-hash address.
pub const B58_SCRIPT_ADDRESS_PREFIX: u8 = 0xc4;
