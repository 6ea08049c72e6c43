use spvkit_protocol::{consensus::Parameters, ScriptType};

use crate::{Address, AddressConverter, ConversionError, PublicKeyBytes};

/// Encodes and decodes legacy Base58Check addresses: P2PKH, P2SH, and P2WPKH nested in
/// P2SH.
#[derive(Clone, Debug)]
pub struct Base58AddressConverter<P> {
    params: P,
}

impl<P: Parameters> Base58AddressConverter<P> {
    pub fn new(params: P) -> Self {
        Base58AddressConverter { params }
    }

    fn encode(&self, prefix: u8, data: &[u8]) -> String {
        let mut decoded = Vec::with_capacity(1 + data.len());
        decoded.push(prefix);
        decoded.extend_from_slice(data);
        bs58::encode(decoded).with_check().into_string()
    }
}

impl<P: Parameters> AddressConverter for Base58AddressConverter<P> {
    fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
        let decoded = bs58::decode(s.trim())
            .with_check(None)
            .into_vec()
            .map_err(|_| ConversionError::InvalidEncoding)?;

        let (prefix, hash) = decoded
            .split_first()
            .ok_or(ConversionError::InvalidEncoding)?;
        if hash.len() != 20 {
            return Err(ConversionError::InvalidPayloadLength(hash.len()));
        }

        let script_type = if *prefix == self.params.b58_pubkey_address_prefix() {
            ScriptType::P2pkh
        } else if *prefix == self.params.b58_script_address_prefix() {
            ScriptType::P2sh
        } else {
            return Err(ConversionError::WrongNetwork);
        };

        Ok(Address::from_parts(
            script_type,
            hash.to_vec(),
            None,
            self.encode(*prefix, hash),
        ))
    }

    fn convert_payload(
        &self,
        payload: &[u8],
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        let prefix = match script_type {
            ScriptType::P2pkh | ScriptType::P2pk => self.params.b58_pubkey_address_prefix(),
            ScriptType::P2sh | ScriptType::P2wpkhSh => self.params.b58_script_address_prefix(),
            _ => return Err(ConversionError::Unsupported("non-Base58")),
        };
        if payload.len() != 20 {
            return Err(ConversionError::InvalidPayloadLength(payload.len()));
        }

        Ok(Address::from_parts(
            script_type,
            payload.to_vec(),
            None,
            self.encode(prefix, payload),
        ))
    }

    fn convert_public_key(
        &self,
        key: &PublicKeyBytes,
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        match script_type {
            ScriptType::P2pkh | ScriptType::P2pk => {
                self.convert_payload(&key.hash160(), ScriptType::P2pkh)
            }
            ScriptType::P2wpkhSh => {
                self.convert_payload(&key.nested_witness_script_hash(), ScriptType::P2wpkhSh)
            }
            _ => Err(ConversionError::Unsupported("non-Base58")),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use spvkit_protocol::{consensus::Network, ScriptType};

    use super::Base58AddressConverter;
    use crate::{AddressConverter, ConversionError, PublicKeyBytes};

    #[test]
    fn mainnet_p2pkh() {
        let converter = Base58AddressConverter::new(Network::Main);
        let addr = converter
            .convert_str("1PMycacnJaSqwwJqjawXBErnLsZ7RkXUAs")
            .unwrap();
        assert_eq!(addr.script_type(), ScriptType::P2pkh);
        assert_eq!(
            hex::encode(addr.payload()),
            "f54a5851e9372b87810a8e60cdd2e7cfd80b6e31"
        );
        let again = converter
            .convert_payload(addr.payload(), ScriptType::P2pkh)
            .unwrap();
        assert_eq!(again, addr);
    }

    #[test]
    fn p2pkh_from_public_key() {
        let converter = Base58AddressConverter::new(Network::Main);
        let key = PublicKeyBytes::new(
            hex::decode("0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798")
                .unwrap(),
            None,
        );
        let addr = converter
            .convert_public_key(&key, ScriptType::P2pkh)
            .unwrap();
        assert_eq!(addr.string_value(), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
    }

    #[test]
    fn p2sh_round_trip() {
        let converter = Base58AddressConverter::new(Network::Main);
        let addr = converter
            .convert_str("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy")
            .unwrap();
        assert_eq!(addr.script_type(), ScriptType::P2sh);
        assert_eq!(addr.locking_script().0.len(), 23);
    }

    #[test]
    fn wrong_network() {
        let converter = Base58AddressConverter::new(Network::Test);
        assert_matches!(
            converter.convert_str("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"),
            Err(ConversionError::WrongNetwork)
        );
    }

    #[test]
    fn bad_checksum() {
        let converter = Base58AddressConverter::new(Network::Main);
        assert_matches!(
            converter.convert_str("1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN3"),
            Err(ConversionError::InvalidEncoding)
        );
    }

    #[test]
    fn segwit_payloads_are_unsupported() {
        let converter = Base58AddressConverter::new(Network::Main);
        assert_matches!(
            converter.convert_payload(&[0; 20], ScriptType::P2wpkh),
            Err(ConversionError::Unsupported(_))
        );
    }
}
