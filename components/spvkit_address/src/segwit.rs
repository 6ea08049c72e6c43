use bech32::{segwit, Hrp};
use spvkit_protocol::{consensus::Parameters, ScriptType};

use crate::{Address, AddressConverter, ConversionError, PublicKeyBytes};

/// Encodes and decodes native SegWit addresses: bech32 for witness version 0 (P2WPKH,
/// P2WSH) and bech32m for witness version 1 (P2TR).
#[derive(Clone, Debug)]
pub struct SegWitBech32AddressConverter<P> {
    params: P,
}

impl<P: Parameters> SegWitBech32AddressConverter<P> {
    pub fn new(params: P) -> Self {
        SegWitBech32AddressConverter { params }
    }

    fn hrp(&self) -> Result<Hrp, ConversionError> {
        Hrp::parse(self.params.hrp_segwit_address()).map_err(|_| ConversionError::InvalidEncoding)
    }
}

fn script_type_for(version: u8, program_len: usize) -> Result<ScriptType, ConversionError> {
    match (version, program_len) {
        (0, 20) => Ok(ScriptType::P2wpkh),
        (0, 32) => Ok(ScriptType::P2wsh),
        (0, n) => Err(ConversionError::InvalidPayloadLength(n)),
        (1, 32) => Ok(ScriptType::P2tr),
        _ => Err(ConversionError::Unsupported("future SegWit version")),
    }
}

impl<P: Parameters> AddressConverter for SegWitBech32AddressConverter<P> {
    fn convert_str(&self, s: &str) -> Result<Address, ConversionError> {
        let (hrp, version, program) =
            segwit::decode(s.trim()).map_err(|_| ConversionError::InvalidEncoding)?;
        if !hrp
            .as_str()
            .eq_ignore_ascii_case(self.params.hrp_segwit_address())
        {
            return Err(ConversionError::WrongNetwork);
        }

        let script_type = script_type_for(version.to_u8(), program.len())?;
        let encoded = segwit::encode(self.hrp()?, version, &program)
            .map_err(|_| ConversionError::InvalidEncoding)?;

        Ok(Address::from_parts(
            script_type,
            program,
            Some(version.to_u8()),
            encoded,
        ))
    }

    fn convert_payload(
        &self,
        payload: &[u8],
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        let version = match script_type {
            ScriptType::P2wpkh | ScriptType::P2wsh => segwit::VERSION_0,
            ScriptType::P2tr => segwit::VERSION_1,
            _ => return Err(ConversionError::Unsupported("non-SegWit")),
        };
        let version_u8 = version.to_u8();
        if script_type_for(version_u8, payload.len())? != script_type {
            return Err(ConversionError::InvalidPayloadLength(payload.len()));
        }

        let encoded = segwit::encode(self.hrp()?, version, payload)
            .map_err(|_| ConversionError::InvalidEncoding)?;
        Ok(Address::from_parts(
            script_type,
            payload.to_vec(),
            Some(version_u8),
            encoded,
        ))
    }

    fn convert_public_key(
        &self,
        key: &PublicKeyBytes,
        script_type: ScriptType,
    ) -> Result<Address, ConversionError> {
        match script_type {
            ScriptType::P2wpkh => self.convert_payload(&key.hash160(), script_type),
            ScriptType::P2tr => match key.taproot_output_key() {
                Some(output_key) => self.convert_payload(output_key, script_type),
                None => Err(ConversionError::Unsupported("untweaked Taproot")),
            },
            _ => Err(ConversionError::Unsupported("non-SegWit")),
        }
    }
}
