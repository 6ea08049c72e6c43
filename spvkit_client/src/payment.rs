//! Parsing of [BIP 21] payment URIs.
//!
//! [BIP 21]: https://github.com/bitcoin/bips/blob/master/bip-0021.mediawiki

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use spvkit_protocol::value::{Satoshis, COIN};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PaymentUriError {
    #[error("Unexpected URI scheme \"{0}\"")]
    WrongScheme(String),
    #[error("Invalid amount \"{0}\"")]
    InvalidAmount(String),
    /// A `req-` parameter that this wallet does not understand.
    #[error("Unsupported required parameter \"{0}\"")]
    UnsupportedRequiredParameter(String),
    #[error("Parameter value \"{0}\" is not valid UTF-8")]
    InvalidEncoding(String),
}

/// The contents of a payment URI.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitcoinPaymentData {
    pub address: String,
    pub version: Option<String>,
    pub amount: Option<Satoshis>,
    pub label: Option<String>,
    pub message: Option<String>,
    /// Parameters other than `amount`, `label` and `message`.
    pub parameters: BTreeMap<String, String>,
}

/// Parses a decimal BTC amount such as `"0.0015"` into satoshis.
fn parse_amount(s: &str) -> Result<Satoshis, PaymentUriError> {
    let invalid = || PaymentUriError::InvalidAmount(s.to_owned());
    let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
    let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty())
        || fraction.len() > 8
        || !all_digits(whole)
        || !all_digits(fraction)
    {
        return Err(invalid());
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<8}", fraction).parse().map_err(|_| invalid())?
    };
    whole
        .checked_mul(COIN)
        .and_then(|w| w.checked_add(fraction))
        .and_then(|v| Satoshis::from_u64(v).ok())
        .ok_or_else(invalid)
}

fn decode(value: &str) -> Result<String, PaymentUriError> {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| PaymentUriError::InvalidEncoding(value.to_owned()))
}

/// Parses `"<scheme>:<address>[;version=<v>][?<key>=<value>&...]"`.
///
/// A string without a scheme is taken to be a bare address. The scheme is matched
/// case-insensitively.
pub fn parse_payment_address(
    scheme: &str,
    uri: &str,
) -> Result<BitcoinPaymentData, PaymentUriError> {
    let uri = uri.trim();
    let rest = match uri.split_once(':') {
        Some((s, rest)) if s.eq_ignore_ascii_case(scheme) => rest,
        Some((s, _)) => return Err(PaymentUriError::WrongScheme(s.to_owned())),
        None => uri,
    };

    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let (address, version) = match path.split_once(';') {
        Some((address, version)) => (
            address,
            Some(version.strip_prefix("version=").unwrap_or(version).to_owned()),
        ),
        None => (path, None),
    };

    let mut data = BitcoinPaymentData {
        address: address.to_owned(),
        version,
        ..Default::default()
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = decode(value)?;
        match key {
            "amount" => data.amount = Some(parse_amount(&value)?),
            "label" => data.label = Some(value),
            "message" => data.message = Some(value),
            k if k.starts_with("req-") => {
                return Err(PaymentUriError::UnsupportedRequiredParameter(k.to_owned()))
            }
            k => {
                data.parameters.insert(k.to_owned(), value);
            }
        }
    }
    Ok(data)
}
