//! Issuance and bookkeeping of the wallet's public keys.
//!
//! Keys are derived ahead of use up to a gap limit and persisted by storage. A key
//! handed out by [`PublicKeyManager::receive_public_key`] or
//! [`PublicKeyManager::change_public_key`] is leased: it will not be handed out again in
//! this process until it is either released or marked used.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::{
    data_api::{StorageError, WalletWrite},
    locks,
    wallet::{PublicKey, PublicKeyWithUsedState},
};

/// Derives public keys of an account. HD derivation happens outside of this crate.
pub trait PublicKeyDeriver: Send + Sync {
    fn derive(
        &self,
        account: u32,
        external: bool,
        indices: Range<u32>,
    ) -> Result<Vec<PublicKey>, KeyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("No unused public key is available")]
    NoUnusedPublicKey,
    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),
    #[error("Derivation path {path} is outside of account {account}")]
    OutOfScope { path: String, account: u32 },
    #[error("Key derivation failed: {0}")]
    Derivation(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct PublicKeyManager {
    storage: Arc<dyn WalletWrite>,
    deriver: Arc<dyn PublicKeyDeriver>,
    account: u32,
    gap_limit: u32,
    /// `(external, index)` of keys currently handed out.
    leased: Mutex<HashSet<(bool, u32)>>,
}

impl PublicKeyManager {
    pub fn new(
        storage: Arc<dyn WalletWrite>,
        deriver: Arc<dyn PublicKeyDeriver>,
        account: u32,
        gap_limit: u32,
    ) -> Self {
        PublicKeyManager {
            storage,
            deriver,
            account,
            gap_limit,
            leased: Mutex::new(HashSet::new()),
        }
    }

    pub fn account(&self) -> u32 {
        self.account
    }

    fn chain_keys(&self, external: bool) -> Result<Vec<PublicKeyWithUsedState>, KeyError> {
        let mut keys: Vec<_> = self
            .storage
            .public_keys(self.account)?
            .into_iter()
            .filter(|k| k.public_key.external() == external)
            .collect();
        keys.sort_by_key(|k| k.public_key.index());
        Ok(keys)
    }

    /// Derives keys so that each chain has `gap_limit` unused keys past its last used
    /// key.
    pub fn fill_gap(&self) -> Result<(), KeyError> {
        for external in [true, false] {
            let keys = self.chain_keys(external)?;
            let first_after_used = keys
                .iter()
                .filter(|k| k.used)
                .map(|k| k.public_key.index().saturating_add(1))
                .max()
                .unwrap_or(0);
            let next_index = keys
                .last()
                .map_or(0, |k| k.public_key.index().saturating_add(1));
            let required_end = first_after_used.saturating_add(self.gap_limit);

            if next_index < required_end {
                let derived = self
                    .deriver
                    .derive(self.account, external, next_index..required_end)?;
                debug!(
                    "Derived {} {} keys from index {}",
                    derived.len(),
                    if external { "receive" } else { "change" },
                    next_index
                );
                self.storage.add_public_keys(derived)?;
            }
        }
        Ok(())
    }

    fn next_unused(&self, external: bool, lease: bool) -> Result<PublicKey, KeyError> {
        let mut leased = locks::lock(&self.leased);
        let key = self
            .chain_keys(external)?
            .into_iter()
            .find(|k| !k.used && !leased.contains(&(external, k.public_key.index())))
            .map(|k| k.public_key)
            .ok_or(KeyError::NoUnusedPublicKey)?;
        if lease {
            leased.insert((external, key.index()));
        }
        Ok(key)
    }

    /// Leases the next unused receive key.
    pub fn receive_public_key(&self) -> Result<PublicKey, KeyError> {
        self.next_unused(true, true)
    }

    /// Leases the next unused change key.
    pub fn change_public_key(&self) -> Result<PublicKey, KeyError> {
        self.next_unused(false, true)
    }

    /// Returns the first unused receive key that is not leased, without leasing it.
    ///
    /// Repeated calls return the same key until it is used, so this is the key to show
    /// as the wallet's current receive address.
    pub fn current_receive_public_key(&self) -> Result<PublicKey, KeyError> {
        self.next_unused(true, false)
    }

    /// Returns the change key that the next [`Self::change_public_key`] would lease,
    /// without leasing it.
    pub fn current_change_public_key(&self) -> Result<PublicKey, KeyError> {
        self.next_unused(false, false)
    }

    /// Returns a leased key to the pool without marking it used.
    pub fn release(&self, key: &PublicKey) {
        locks::lock(&self.leased).remove(&(key.external(), key.index()));
    }

    /// Marks keys as used, ends their leases, and derives replacements.
    pub fn mark_used(&self, keys: &[PublicKey]) -> Result<(), KeyError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.storage.mark_public_keys_used(keys)?;
        {
            let mut leased = locks::lock(&self.leased);
            for key in keys {
                leased.remove(&(key.external(), key.index()));
            }
        }
        self.fill_gap()
    }

    /// Returns the used keys of the change chain (`change = true`) or the receive
    /// chain, ordered by index.
    pub fn used_public_keys(&self, change: bool) -> Result<Vec<PublicKey>, KeyError> {
        Ok(self
            .chain_keys(!change)?
            .into_iter()
            .filter(|k| k.used)
            .map(|k| k.public_key)
            .collect())
    }

    /// Resolves a key from a path of the form `"<account>'/<change>/<index>"`.
    pub fn public_key_by_path(&self, path: &str) -> Result<PublicKey, KeyError> {
        let (account, external, index) = parse_path(path)?;
        if account != self.account {
            return Err(KeyError::OutOfScope {
                path: path.to_owned(),
                account: self.account,
            });
        }

        if let Some(found) = self
            .chain_keys(external)?
            .into_iter()
            .find(|k| k.public_key.index() == index)
        {
            return Ok(found.public_key);
        }

        self.deriver
            .derive(account, external, index..index.saturating_add(1))?
            .into_iter()
            .next()
            .ok_or_else(|| KeyError::Derivation(format!("no key derived for {}", path)))
    }
}

fn parse_path(path: &str) -> Result<(u32, bool, u32), KeyError> {
    let invalid = || KeyError::InvalidPath(path.to_owned());
    let parts: Vec<&str> = path.split('/').collect();
    let [account, change, index] = parts[..] else {
        return Err(invalid());
    };

    let account = account
        .strip_suffix('\'')
        .unwrap_or(account)
        .parse::<u32>()
        .map_err(|_| invalid())?;
    let external = match change {
        "0" => true,
        "1" => false,
        _ => return Err(invalid()),
    };
    let index = index.parse::<u32>().map_err(|_| invalid())?;
    Ok((account, external, index))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{parse_path, KeyError, PublicKeyManager};
    use crate::testing::{MemoryWalletDb, MockKeyDeriver};

    fn manager(gap: u32) -> (Arc<MemoryWalletDb>, PublicKeyManager) {
        let db = Arc::new(MemoryWalletDb::new());
        let manager = PublicKeyManager::new(db.clone(), Arc::new(MockKeyDeriver), 0, gap);
        manager.fill_gap().unwrap();
        (db, manager)
    }

    #[test]
    fn paths() {
        assert_eq!(parse_path("0'/0/5").unwrap(), (0, true, 5));
        assert_eq!(parse_path("2/1/0").unwrap(), (2, false, 0));
        assert_matches!(parse_path("0'/2/0"), Err(KeyError::InvalidPath(_)));
        assert_matches!(parse_path("0'/0"), Err(KeyError::InvalidPath(_)));
        assert_matches!(parse_path("x'/0/1"), Err(KeyError::InvalidPath(_)));
    }

    #[test]
    fn fills_gap_on_both_chains() {
        let (db, _) = manager(3);
        let keys = db.public_keys_snapshot(0);
        assert_eq!(keys.iter().filter(|k| k.public_key.external()).count(), 3);
        assert_eq!(keys.iter().filter(|k| !k.public_key.external()).count(), 3);
    }

    #[test]
    fn leased_keys_are_not_reissued() {
        let (_, manager) = manager(2);
        let first = manager.receive_public_key().unwrap();
        let second = manager.receive_public_key().unwrap();
        assert_ne!(first, second);
        assert_matches!(manager.receive_public_key(), Err(KeyError::NoUnusedPublicKey));

        manager.release(&first);
        assert_eq!(manager.receive_public_key().unwrap(), first);
    }

    #[test]
    fn current_receive_key_is_stable_until_used() {
        let (_, manager) = manager(2);
        let shown = manager.current_receive_public_key().unwrap();
        assert_eq!(manager.current_receive_public_key().unwrap(), shown);

        manager.mark_used(&[shown.clone()]).unwrap();
        let next = manager.current_receive_public_key().unwrap();
        assert_eq!(next.index(), 1);
        assert_eq!(manager.used_public_keys(false).unwrap(), vec![shown]);
        assert!(manager.used_public_keys(true).unwrap().is_empty());
    }

    #[test]
    fn marking_used_extends_the_gap() {
        let (db, manager) = manager(2);
        let key = manager.receive_public_key().unwrap();
        manager.mark_used(&[key]).unwrap();
        let receive = db
            .public_keys_snapshot(0)
            .into_iter()
            .filter(|k| k.public_key.external())
            .count();
        assert_eq!(receive, 3);
    }

    #[test]
    fn key_by_path() {
        let (_, manager) = manager(2);
        assert_eq!(manager.public_key_by_path("0'/1/1").unwrap().path(), "0'/1/1");
        // Beyond the gap, the key is derived on demand.
        assert_eq!(manager.public_key_by_path("0'/0/40").unwrap().index(), 40);
        assert_matches!(
            manager.public_key_by_path("1'/0/0"),
            Err(KeyError::OutOfScope { account: 0, .. })
        );
    }
}
