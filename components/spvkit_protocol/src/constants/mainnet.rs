//! Constants for the Bitcoin main network.

/// The mainnet coin type for BTC, as defined by [SLIP 44].
///
/// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
pub const COIN_TYPE: u32 = 0;

/// The HRP for a Bech32-encoded mainnet SegWit address.
///
/// Defined in [BIP 173].
///
/// [BIP 173]: https://github.com/bitcoin/bips/blob/master/bip-0173.mediawiki
pub const HRP_SEGWIT_ADDRESS: &str = "bc";

/// The prefix for a Base58Check-encoded mainnet pay-to-public-key-hash address.
pub const B58_PUBKEY_ADDRESS_PREFIX: u8 = 0x00;

/// The prefix for a Base58Check-encoded mainnet pay-to-script-hash address.
pub const B58_SCRIPT_ADDRESS_PREFIX: u8 = 0x05;
