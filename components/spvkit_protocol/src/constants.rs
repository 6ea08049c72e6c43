//! Network-specific Bitcoin constants.

pub mod mainnet;
pub mod regtest;
pub mod testnet;

/// The URI scheme of [BIP 21] payment requests.
///
/// [BIP 21]: https://github.com/bitcoin/bips/blob/master/bip-0021.mediawiki
pub const PAYMENT_URI_SCHEME: &str = "bitcoin";

/// The largest payload that standard relay policy accepts in a null-data output.
pub const MAX_NULL_DATA_SIZE: usize = 80;

/// The fee rate, in satoshis per virtual byte, below which an output is dust if it
/// would cost more to spend than it is worth.
pub const DUST_RELAY_FEE_RATE: u64 = 3;

/// The default `nSequence` value for inputs that do not signal replaceability.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// The version used for transactions created by the wallet.
pub const TX_VERSION: u32 = 2;
