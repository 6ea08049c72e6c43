//! *The orchestration core of a Bitcoin SPV light wallet.*
//!
//! `spvkit_client` composes synchronization, UTXO tracking, transaction construction,
//! fee and dust accounting and address handling into a single wallet engine,
//! [`kit::BitcoinCore`]. The engine is open to runtime extension: address codecs, coin
//! selection strategies, restore-key converters and protocol plugins can be registered
//! ahead of the built-in ones without changing the core.
//!
//! ## Collaborators
//!
//! The P2P stack, persistent storage, HD key derivation and signing live outside this
//! crate. They are consumed through the narrow traits in [`data_api`], [`keys`],
//! [`signer`], [`sender`], [`sync`] and [`status`].
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

pub mod address;
pub mod builder;
pub mod config;
pub mod creator;
pub mod data_api;
pub mod data_provider;
pub mod error;
pub mod fees;
pub mod input_selection;
pub mod keys;
pub mod kit;
mod locks;
pub mod notify;
pub mod payment;
pub mod plugin;
pub mod restore;
pub mod sender;
pub mod signer;
pub mod status;
pub mod sync;
pub mod transaction;
pub mod wallet;
pub mod watch;

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing;

pub use error::{Error, Result};
pub use kit::{BitcoinCore, BitcoinCoreBuilder};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
