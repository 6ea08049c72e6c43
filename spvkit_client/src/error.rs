//! Types for wallet error handling.

use spvkit_address::ConversionError;
use spvkit_protocol::value::BalanceError;

use crate::{
    builder::BuilderError, data_api::StorageError, input_selection::SelectionError,
    keys::KeyError, payment::PaymentUriError, plugin::PluginError,
    sender::SenderError, signer::SignerError,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur as a consequence of wallet operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wallet was constructed without signing capability.
    #[error("The wallet is watch-only and cannot create or estimate transactions")]
    ReadOnlyCore,
    #[error("Address conversion error: {0}")]
    Address(#[from] ConversionError),
    #[error("Unspent output selection failed: {0}")]
    Selection(#[from] SelectionError),
    #[error("Public key error: {0}")]
    Key(#[from] KeyError),
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transaction builder error: {0}")]
    Builder(#[from] BuilderError),
    #[error("Signing error: {0}")]
    Signer(#[from] SignerError),
    #[error("Error sending transaction: {0}")]
    Sender(#[from] SenderError),
    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),
    #[error("Invalid payment URI: {0}")]
    PaymentUri(#[from] PaymentUriError),
}
