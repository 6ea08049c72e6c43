//! Wallet configuration.
//!
//! [`WalletConfig`] is a plain data structure that the host loads from wherever it keeps
//! its settings, for example as JSON via `serde_json`:
//!
//! ```
//! # use spvkit_client::config::{Purpose, WalletConfig};
//! let config: WalletConfig = serde_json::from_str(r#"{ "network": "test", "purpose": "bip84" }"#)
//!     .unwrap();
//! assert_eq!(config.purpose, Purpose::Bip84);
//! assert_eq!(config.gap_limit, 20);
//! ```

use serde::{Deserialize, Serialize};
use spvkit_protocol::{consensus::Network, constants::DUST_RELAY_FEE_RATE, ScriptType};

use crate::sync::SyncMode;

/// The BIP 43 purpose of the account's derivation path, which fixes the script type
/// used for receive and change outputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Bip44,
    Bip49,
    Bip84,
    Bip86,
}

impl Purpose {
    pub fn script_type(&self) -> ScriptType {
        match self {
            Purpose::Bip44 => ScriptType::P2pkh,
            Purpose::Bip49 => ScriptType::P2wpkhSh,
            Purpose::Bip84 => ScriptType::P2wpkh,
            Purpose::Bip86 => ScriptType::P2tr,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Purpose::Bip44 => "BIP44",
            Purpose::Bip49 => "BIP49",
            Purpose::Bip84 => "BIP84",
            Purpose::Bip86 => "BIP86",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub network: Network,
    pub purpose: Purpose,
    pub account: u32,
    /// Number of unused keys kept derived past the last used key of each chain.
    pub gap_limit: u32,
    /// Confirmations after which an unspent output is reported as confirmed.
    pub confirmations_threshold: u32,
    /// Fee rate in satoshis per virtual byte used to compute dust thresholds.
    pub dust_relay_fee_rate: u64,
    pub notification_queue_capacity: usize,
    pub sync_mode: SyncMode,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            network: Network::Main,
            purpose: Purpose::Bip44,
            account: 0,
            gap_limit: 20,
            confirmations_threshold: 6,
            dust_relay_fee_rate: DUST_RELAY_FEE_RATE,
            notification_queue_capacity: 1024,
            sync_mode: SyncMode::Full,
        }
    }
}

#[cfg(test)]
mod tests {
    use spvkit_protocol::{consensus::Network, ScriptType};

    use super::{Purpose, WalletConfig};
    use crate::sync::SyncMode;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: WalletConfig =
            serde_json::from_str(r#"{ "purpose": "bip86", "sync_mode": "api" }"#).unwrap();
        assert_eq!(config.network, Network::Main);
        assert_eq!(config.purpose.script_type(), ScriptType::P2tr);
        assert_eq!(config.sync_mode, SyncMode::Api);
        assert_eq!(config.confirmations_threshold, 6);
        assert_eq!(config.dust_relay_fee_rate, 3);
    }

    #[test]
    fn round_trips_through_json() {
        let config = WalletConfig {
            purpose: Purpose::Bip49,
            account: 2,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<WalletConfig>(&json).unwrap(), config);
    }
}
