//! Derivation of the watch targets for restoring a wallet.
//!
//! When a wallet is restored from its keys, the sync collaborators need to know which
//! addresses to query from an indexing API and which elements to put in the bloom
//! filter sent to peers. A [`RestoreKeyConverter`] provides these for one script type;
//! the [`RestoreKeyConverterChain`] combines all registered converters.

use std::sync::{Arc, RwLock};

use spvkit_address::AddressConverter;
use spvkit_protocol::ScriptType;
use tracing::debug;

use crate::{address::AddressConverterChain, config::Purpose, locks, wallet::PublicKey};

pub trait RestoreKeyConverter: Send + Sync {
    /// Addresses paying to `key` to query while restoring from an indexing API.
    fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String>;

    /// Elements matching outputs paying to `key`, for a BIP 37 bloom filter.
    fn bloom_filter_elements(&self, key: &PublicKey) -> Vec<Vec<u8>>;
}

/// Derives the address of one script type from a public key.
pub struct ScriptTypeRestoreKeyConverter {
    address_converter: Arc<AddressConverterChain>,
    script_type: ScriptType,
}

impl ScriptTypeRestoreKeyConverter {
    pub fn new(address_converter: Arc<AddressConverterChain>, script_type: ScriptType) -> Self {
        ScriptTypeRestoreKeyConverter {
            address_converter,
            script_type,
        }
    }

    /// The converter watching the script type of a BIP 44, 49, 84 or 86 account.
    pub fn for_purpose(address_converter: Arc<AddressConverterChain>, purpose: Purpose) -> Self {
        Self::new(address_converter, purpose.script_type())
    }
}

impl RestoreKeyConverter for ScriptTypeRestoreKeyConverter {
    fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String> {
        self.address_converter
            .convert_public_key(&key.key_bytes(), self.script_type)
            .map(|a| vec![a.string_value().to_owned()])
            .unwrap_or_default()
    }

    fn bloom_filter_elements(&self, key: &PublicKey) -> Vec<Vec<u8>> {
        let bytes = key.key_bytes();
        match self.script_type {
            ScriptType::P2pkh | ScriptType::P2wpkh => {
                vec![bytes.hash160().to_vec(), key.raw().clone()]
            }
            ScriptType::P2wpkhSh => vec![bytes.nested_witness_script_hash().to_vec()],
            ScriptType::P2tr => bytes
                .taproot_output_key()
                .map(|k| vec![k.to_vec()])
                .unwrap_or_default(),
            _ => vec![],
        }
    }
}

/// An ordered set of [`RestoreKeyConverter`]s.
///
/// Unlike the other chains, every converter contributes: a restored wallet has to watch
/// all script types that any converter knows about. Results are concatenated in chain
/// order with duplicates removed.
#[derive(Default)]
pub struct RestoreKeyConverterChain {
    converters: RwLock<Arc<Vec<Arc<dyn RestoreKeyConverter>>>>,
}

impl RestoreKeyConverterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, converter: Arc<dyn RestoreKeyConverter>) {
        let mut guard = locks::write(&self.converters);
        let mut converters = guard.as_ref().clone();
        converters.push(converter);
        *guard = Arc::new(converters);
        debug!("Added restore key converter; chain length {}", guard.len());
    }

    pub fn prepend(&self, converter: Arc<dyn RestoreKeyConverter>) {
        let mut guard = locks::write(&self.converters);
        let mut converters = guard.as_ref().clone();
        converters.insert(0, converter);
        *guard = Arc::new(converters);
        debug!("Prepended restore key converter; chain length {}", guard.len());
    }

    fn collect<T: PartialEq>(
        &self,
        f: impl Fn(&dyn RestoreKeyConverter) -> Vec<T>,
    ) -> Vec<T> {
        let snapshot = locks::read(&self.converters).clone();
        let mut result: Vec<T> = vec![];
        for item in snapshot.iter().flat_map(|c| f(c.as_ref())) {
            if !result.contains(&item) {
                result.push(item);
            }
        }
        result
    }
}

impl RestoreKeyConverter for RestoreKeyConverterChain {
    fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String> {
        self.collect(|c| c.keys_for_api_restore(key))
    }

    fn bloom_filter_elements(&self, key: &PublicKey) -> Vec<Vec<u8>> {
        self.collect(|c| c.bloom_filter_elements(key))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use spvkit_protocol::{consensus::Network, ScriptType};

    use super::{RestoreKeyConverter, RestoreKeyConverterChain, ScriptTypeRestoreKeyConverter};
    use crate::{address::AddressConverterChain, config::Purpose, wallet::PublicKey};

    fn generator_key() -> PublicKey {
        PublicKey::new(
            0,
            0,
            true,
            hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap(),
        )
    }

    #[test]
    fn union_of_all_converters() {
        let addresses = Arc::new(AddressConverterChain::for_network(Network::Main));
        let chain = RestoreKeyConverterChain::new();
        chain.add(Arc::new(ScriptTypeRestoreKeyConverter::for_purpose(
            addresses.clone(),
            Purpose::Bip84,
        )));
        chain.prepend(Arc::new(ScriptTypeRestoreKeyConverter::for_purpose(
            addresses.clone(),
            Purpose::Bip44,
        )));
        // A duplicate contributes nothing new.
        chain.add(Arc::new(ScriptTypeRestoreKeyConverter::new(
            addresses,
            ScriptType::P2wpkh,
        )));

        let key = generator_key();
        assert_eq!(
            chain.keys_for_api_restore(&key),
            vec![
                "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH".to_owned(),
                "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".to_owned(),
            ]
        );
        // P2PKH and P2WPKH share their bloom filter elements.
        assert_eq!(chain.bloom_filter_elements(&key).len(), 2);
    }

    #[test]
    fn taproot_needs_an_output_key() {
        let addresses = Arc::new(AddressConverterChain::for_network(Network::Main));
        let converter = ScriptTypeRestoreKeyConverter::for_purpose(addresses, Purpose::Bip86);
        let key = generator_key();
        assert!(converter.keys_for_api_restore(&key).is_empty());

        let tweaked = key.with_taproot_output_key([7; 32]);
        let keys = converter.keys_for_api_restore(&tweaked);
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("bc1p"));
        assert_eq!(converter.bloom_filter_elements(&tweaked), vec![vec![7; 32]]);
    }
}
