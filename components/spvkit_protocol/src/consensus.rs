//! Consensus parameters.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

use crate::constants::{self, mainnet, regtest, testnet};

/// A block height.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BlockHeight(u32);

pub const H0: BlockHeight = BlockHeight(0);

impl BlockHeight {
    pub const fn from_u32(v: u32) -> BlockHeight {
        BlockHeight(v)
    }

    /// Subtracts the provided value from this height, returning `H0` if this would result in
    /// underflow of the wrapped `u32`.
    pub fn saturating_sub(self, v: u32) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(v))
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl Ord for BlockHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BlockHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u32> for BlockHeight {
    fn from(value: u32) -> Self {
        BlockHeight(value)
    }
}

impl From<BlockHeight> for u32 {
    fn from(value: BlockHeight) -> u32 {
        value.0
    }
}

impl Add<u32> for BlockHeight {
    type Output = Self;

    fn add(self, other: u32) -> Self {
        BlockHeight(self.0 + other)
    }
}

impl Sub<u32> for BlockHeight {
    type Output = Self;

    fn sub(self, other: u32) -> Self {
        if other > self.0 {
            panic!("Subtraction resulted in negative block height.");
        }

        BlockHeight(self.0 - other)
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u32;

    fn sub(self, other: BlockHeight) -> u32 {
        self.0 - other
    }
}

impl Sub<BlockHeight> for u32 {
    type Output = u32;

    fn sub(self, other: BlockHeight) -> u32 {
        if other.0 > self {
            panic!("Subtraction resulted in negative block height.");
        }
        self - other.0
    }
}

/// Constants associated with a given Bitcoin network.
pub trait Parameters: Clone + Send + Sync + 'static {
    /// The type of network these parameters describe.
    fn network_type(&self) -> Network;

    /// Returns the Base58Check version byte for pay-to-public-key-hash addresses.
    fn b58_pubkey_address_prefix(&self) -> u8 {
        match self.network_type() {
            Network::Main => mainnet::B58_PUBKEY_ADDRESS_PREFIX,
            Network::Test => testnet::B58_PUBKEY_ADDRESS_PREFIX,
            Network::Regtest => regtest::B58_PUBKEY_ADDRESS_PREFIX,
        }
    }

    /// Returns the Base58Check version byte for pay-to-script-hash addresses.
    fn b58_script_address_prefix(&self) -> u8 {
        match self.network_type() {
            Network::Main => mainnet::B58_SCRIPT_ADDRESS_PREFIX,
            Network::Test => testnet::B58_SCRIPT_ADDRESS_PREFIX,
            Network::Regtest => regtest::B58_SCRIPT_ADDRESS_PREFIX,
        }
    }

    /// Returns the human-readable part of SegWit addresses.
    fn hrp_segwit_address(&self) -> &'static str {
        match self.network_type() {
            Network::Main => mainnet::HRP_SEGWIT_ADDRESS,
            Network::Test => testnet::HRP_SEGWIT_ADDRESS,
            Network::Regtest => regtest::HRP_SEGWIT_ADDRESS,
        }
    }

    /// Returns the BIP 44 coin type, as defined by [SLIP 44].
    ///
    /// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
    fn coin_type(&self) -> u32 {
        match self.network_type() {
            Network::Main => mainnet::COIN_TYPE,
            Network::Test | Network::Regtest => testnet::COIN_TYPE,
        }
    }

    /// Returns the URI scheme used for payment requests on this network.
    fn payment_uri_scheme(&self) -> &'static str {
        constants::PAYMENT_URI_SCHEME
    }
}

/// The Bitcoin networks known to this crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Network {
    /// The production network.
    Main,
    /// The public test network.
    Test,
    /// A local regression-test network.
    Regtest,
}

impl Parameters for Network {
    fn network_type(&self) -> Network {
        *self
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Network::Main => "mainnet",
            Network::Test => "testnet",
            Network::Regtest => "regtest",
        })
    }
}
