//! The ordered chain of address codecs consulted by the wallet.

use std::sync::{Arc, RwLock};

use spvkit_address::{
    Address, AddressConverter, Base58AddressConverter, ConversionError, PublicKeyBytes,
    SegWitBech32AddressConverter,
};
use spvkit_protocol::{consensus::Parameters, ScriptType};
use tracing::debug;

use crate::locks;

type Converters = Arc<Vec<Arc<dyn AddressConverter>>>;

/// An ordered list of [`AddressConverter`]s.
///
/// Each conversion is attempted with every converter in order and the first success
/// wins. [`AddressConverterChain::prepend`] installs a converter ahead of all existing
/// ones. Lookups iterate over a snapshot of the list, so they never observe a
/// half-applied mutation and never block on one.
pub struct AddressConverterChain {
    converters: RwLock<Converters>,
}

impl AddressConverterChain {
    pub fn new(converters: Vec<Arc<dyn AddressConverter>>) -> Self {
        AddressConverterChain {
            converters: RwLock::new(Arc::new(converters)),
        }
    }

    /// The default chain for a network: native SegWit first, then Base58Check.
    pub fn for_network<P: Parameters>(params: P) -> Self {
        AddressConverterChain::new(vec![
            Arc::new(SegWitBech32AddressConverter::new(params.clone())),
            Arc::new(Base58AddressConverter::new(params)),
        ])
    }

    pub fn prepend(&self, converter: Arc<dyn AddressConverter>) {
        let mut guard = locks::write(&self.converters);
        let mut converters = Vec::with_capacity(guard.len() + 1);
        converters.push(converter);
        converters.extend(guard.iter().cloned());
        *guard = Arc::new(converters);
        debug!("Prepended address converter; chain length {}", guard.len());
    }

    fn snapshot(&self) -> Converters {
        locks::read(&self.converters).clone()
    }

    fn first_success<F>(&self, f: F) -> Result<Address, ConversionError>
    where
        F: Fn(&dyn AddressConverter) -> Result<Address, ConversionError>,
    {
        self.snapshot()
            .iter()
            .find_map(|c| f(c.as_ref()).ok())
            .ok_or(ConversionError::UnknownAddressType)
    }
}

impl AddressConverter for AddressConverterChain {
    fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
        self.first_success(|c| c.convert_str(s))
    }

    fn convert_payload(
        &self,
        payload: &[u8],
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        self.first_success(|c| c.convert_payload(payload, script_type))
    }

    fn convert_public_key(
        &self,
        key: &PublicKeyBytes,
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        self.first_success(|c| c.convert_public_key(key, script_type))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use spvkit_address::{Address, AddressConverter, ConversionError};
    use spvkit_protocol::{consensus::Network, ScriptType};

    use super::AddressConverterChain;

    /// Accepts strings with a fixed prefix.
    struct PrefixConverter(&'static str);

    impl AddressConverter for PrefixConverter {
        fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
            if s.starts_with(self.0) {
                Ok(Address::from_parts(
                    ScriptType::Unknown,
                    vec![],
                    None,
                    format!("{}:{}", self.0, s),
                ))
            } else {
                Err(ConversionError::InvalidEncoding)
            }
        }
    }

    #[test]
    fn defaults_resolve_both_encodings() {
        let chain = AddressConverterChain::for_network(Network::Main);
        assert_eq!(
            chain
                .convert_str("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4")
                .unwrap()
                .script_type(),
            ScriptType::P2wpkh
        );
        assert_eq!(
            chain
                .convert_str("1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH")
                .unwrap()
                .script_type(),
            ScriptType::P2pkh
        );
        assert_matches!(
            chain.convert_str("not an address"),
            Err(ConversionError::UnknownAddressType)
        );
    }

    #[test]
    fn empty_chain_reports_unknown() {
        let chain = AddressConverterChain::new(vec![]);
        assert_matches!(
            chain.convert_payload(&[0; 20], ScriptType::P2pkh),
            Err(ConversionError::UnknownAddressType)
        );
    }

    proptest! {
        #[test]
        fn prepended_converter_takes_priority(s in "[a-z]{1,12}") {
            let chain = AddressConverterChain::new(vec![Arc::new(PrefixConverter(""))]);
            let before = chain.convert_str(&s).unwrap();

            chain.prepend(Arc::new(PrefixConverter("a")));
            let after = chain.convert_str(&s).unwrap();

            if s.starts_with('a') {
                prop_assert_eq!(after.string_value(), format!("a:{}", s));
            } else {
                // Inputs rejected by the new converter resolve exactly as before.
                prop_assert_eq!(after, before);
            }
        }
    }
}
