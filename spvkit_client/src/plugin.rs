//! Protocol extensions that attach data to transactions.
//!
//! A [`Plugin`] is identified by a single byte. Callers pass [`PluginData`], a map from
//! plugin id to an opaque payload, to the send and estimate operations; the
//! [`PluginManager`] routes each payload to its plugin, which validates it and writes
//! it into the transaction. Plugins can also lock outputs (for example behind a time
//! lock) and later unlock them when they are spent.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use spvkit_address::Address;
use spvkit_protocol::{script::Script, value::Satoshis};
use tracing::debug;

use crate::{
    builder::{InputToSign, MutableTransaction},
    locks,
    restore::RestoreKeyConverter,
    wallet::{PublicKey, UnspentOutput},
};

/// Payloads for plugins, keyed by plugin id.
pub type PluginData = BTreeMap<u8, Vec<u8>>;

#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("No plugin is registered with id {0}")]
    NotRegistered(u8),
    #[error("A plugin is already registered with id {0}")]
    AlreadyRegistered(u8),
    #[error("Plugin {id} rejected its data: {reason}")]
    InvalidData { id: u8, reason: String },
    #[error("Plugin {id} cannot spend output: {reason}")]
    CannotSpend { id: u8, reason: String },
    #[error("Malformed null data output")]
    MalformedNullData,
}

pub trait Plugin: Send + Sync {
    fn id(&self) -> u8;

    /// Checks that `data` is well-formed for a payment to `address`.
    fn validate(&self, address: &Address, data: &[u8]) -> Result<(), PluginError> {
        let _ = (address, data);
        Ok(())
    }

    /// An upper bound on the value that may be sent with this plugin's data.
    fn max_spend_limit(&self, data: &[u8]) -> Result<Option<Satoshis>, PluginError> {
        let _ = data;
        Ok(None)
    }

    /// Writes this plugin's data into a transaction under construction.
    ///
    /// The default implementation appends `data` to the null-data output.
    fn process_outputs(
        &self,
        mtx: &mut MutableTransaction,
        data: &[u8],
    ) -> Result<(), PluginError> {
        mtx.add_plugin_payload(self.id(), data.to_vec());
        Ok(())
    }

    /// Prepares an input spending an output that this plugin locked, for example by
    /// setting its sequence number and the transaction lock time.
    fn process_input(
        &self,
        mtx_lock_time: &mut u32,
        input: &mut InputToSign,
    ) -> Result<(), PluginError> {
        let _ = (mtx_lock_time, input);
        Ok(())
    }

    /// Whether an output locked by this plugin can currently be spent.
    fn is_spendable(&self, output: &UnspentOutput) -> bool {
        let _ = output;
        true
    }

    /// Renders a payload found in a received transaction in human-readable form.
    fn parse_plugin_data(&self, payload: &[u8]) -> Result<String, PluginError> {
        Ok(hex::encode(payload))
    }

    /// Additional addresses to query while restoring from an indexing API.
    fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String> {
        let _ = key;
        vec![]
    }
}

/// The contents of a null-data output written by this wallet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NullDataContents {
    pub memo: Option<String>,
    /// Payloads by plugin id; rendered by the plugin when it is registered, hex-encoded
    /// otherwise.
    pub plugin_data: BTreeMap<u8, String>,
}

/// The registry of [`Plugin`]s.
#[derive(Default)]
pub struct PluginManager {
    plugins: RwLock<BTreeMap<u8, Arc<dyn Plugin>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let id = plugin.id();
        let mut plugins = locks::write(&self.plugins);
        if plugins.contains_key(&id) {
            return Err(PluginError::AlreadyRegistered(id));
        }
        plugins.insert(id, plugin);
        debug!("Registered plugin {}", id);
        Ok(())
    }

    fn plugin(&self, id: u8) -> Result<Arc<dyn Plugin>, PluginError> {
        locks::read(&self.plugins)
            .get(&id)
            .cloned()
            .ok_or(PluginError::NotRegistered(id))
    }

    /// Validates every payload against its plugin, stopping at the first rejection.
    pub fn validate(&self, address: &Address, data: &PluginData) -> Result<(), PluginError> {
        for (id, payload) in data {
            self.plugin(*id)?.validate(address, payload)?;
        }
        Ok(())
    }

    /// The smallest spend limit imposed by any of the referenced plugins.
    pub fn max_spend_limit(&self, data: &PluginData) -> Result<Option<Satoshis>, PluginError> {
        let mut limit: Option<Satoshis> = None;
        for (id, payload) in data {
            if let Some(l) = self.plugin(*id)?.max_spend_limit(payload)? {
                limit = Some(limit.map_or(l, |current| current.min(l)));
            }
        }
        Ok(limit)
    }

    pub fn process_outputs(
        &self,
        mtx: &mut MutableTransaction,
        data: &PluginData,
    ) -> Result<(), PluginError> {
        for (id, payload) in data {
            self.plugin(*id)?.process_outputs(mtx, payload)?;
        }
        Ok(())
    }

    /// Lets the owning plugin prepare each input that spends a plugin-locked output.
    pub fn process_inputs(&self, mtx: &mut MutableTransaction) -> Result<(), PluginError> {
        let MutableTransaction {
            inputs, lock_time, ..
        } = mtx;
        for input in inputs.iter_mut() {
            if let Some(id) = input.unspent_output.plugin_id() {
                self.plugin(id)?.process_input(lock_time, input)?;
            }
        }
        Ok(())
    }

    /// Outputs locked by an unknown plugin are never spendable.
    pub fn is_spendable(&self, output: &UnspentOutput) -> bool {
        match output.plugin_id() {
            None => true,
            Some(id) => self
                .plugin(id)
                .map(|p| p.is_spendable(output))
                .unwrap_or(false),
        }
    }

    /// Decodes a null-data output in the layout written by
    /// [`MutableTransaction::null_data_script`].
    pub fn parse_null_data(&self, script: &Script) -> Result<NullDataContents, PluginError> {
        let pushes = script
            .null_data_pushes()
            .ok_or(PluginError::MalformedNullData)?;
        let Some((memo, pairs)) = pushes.split_first() else {
            return Ok(NullDataContents::default());
        };
        if pairs.len() % 2 != 0 {
            return Err(PluginError::MalformedNullData);
        }

        let mut contents = NullDataContents {
            memo: (!memo.is_empty()).then(|| String::from_utf8_lossy(memo).into_owned()),
            plugin_data: BTreeMap::new(),
        };
        for pair in pairs.chunks(2) {
            let [id] = *pair[0] else {
                return Err(PluginError::MalformedNullData);
            };
            let rendered = match self.plugin(id) {
                Ok(plugin) => plugin.parse_plugin_data(pair[1])?,
                Err(_) => hex::encode(pair[1]),
            };
            contents.plugin_data.insert(id, rendered);
        }
        Ok(contents)
    }
}

impl RestoreKeyConverter for PluginManager {
    fn keys_for_api_restore(&self, key: &PublicKey) -> Vec<String> {
        locks::read(&self.plugins)
            .values()
            .flat_map(|p| p.keys_for_api_restore(key))
            .collect()
    }

    fn bloom_filter_elements(&self, key: &PublicKey) -> Vec<Vec<u8>> {
        let _ = key;
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use spvkit_address::Address;
    use spvkit_protocol::{value::Satoshis, ScriptType};

    use super::{Plugin, PluginData, PluginError, PluginManager};
    use crate::builder::MutableTransaction;

    struct CapPlugin {
        id: u8,
        cap: u64,
    }

    impl Plugin for CapPlugin {
        fn id(&self) -> u8 {
            self.id
        }

        fn validate(&self, _: &Address, data: &[u8]) -> Result<(), PluginError> {
            if data.is_empty() {
                Err(PluginError::InvalidData {
                    id: self.id,
                    reason: "empty".into(),
                })
            } else {
                Ok(())
            }
        }

        fn max_spend_limit(&self, _: &[u8]) -> Result<Option<Satoshis>, PluginError> {
            Ok(Some(Satoshis::const_from_u64(self.cap)))
        }

        fn parse_plugin_data(&self, payload: &[u8]) -> Result<String, PluginError> {
            Ok(format!("cap:{}", payload.len()))
        }
    }

    struct Silent;

    impl Plugin for Silent {
        fn id(&self) -> u8 {
            9
        }
    }

    fn manager() -> PluginManager {
        let manager = PluginManager::new();
        manager.add(Arc::new(CapPlugin { id: 1, cap: 5000 })).unwrap();
        manager.add(Arc::new(CapPlugin { id: 2, cap: 700 })).unwrap();
        manager.add(Arc::new(Silent)).unwrap();
        manager
    }

    fn address() -> Address {
        Address::from_parts(ScriptType::P2pkh, vec![0; 20], None, "a".into())
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let manager = manager();
        assert_matches!(
            manager.add(Arc::new(Silent)),
            Err(PluginError::AlreadyRegistered(9))
        );
    }

    #[test]
    fn validation_fails_fast() {
        let manager = manager();
        let data: PluginData = BTreeMap::from([(1, vec![]), (7, vec![1])]);
        assert_matches!(
            manager.validate(&address(), &data),
            Err(PluginError::InvalidData { id: 1, .. })
        );
        let data: PluginData = BTreeMap::from([(7, vec![1])]);
        assert_matches!(
            manager.validate(&address(), &data),
            Err(PluginError::NotRegistered(7))
        );
    }

    #[test]
    fn spend_limit_is_the_minimum() {
        let manager = manager();
        assert_eq!(manager.max_spend_limit(&BTreeMap::new()).unwrap(), None);
        let data: PluginData = BTreeMap::from([(1, vec![1]), (2, vec![1]), (9, vec![1])]);
        assert_eq!(
            manager.max_spend_limit(&data).unwrap(),
            Some(Satoshis::const_from_u64(700))
        );
    }

    #[test]
    fn null_data_round_trip() {
        let manager = manager();
        let mut mtx = MutableTransaction::new(Some(address()));
        mtx.set_memo(Some("rent"));
        let data: PluginData = BTreeMap::from([(2, vec![1, 2, 3]), (9, vec![0xff])]);
        manager.process_outputs(&mut mtx, &data).unwrap();

        let parsed = manager
            .parse_null_data(&mtx.null_data_script().unwrap())
            .unwrap();
        assert_eq!(parsed.memo.as_deref(), Some("rent"));
        assert_eq!(parsed.plugin_data[&2], "cap:3");
        assert_eq!(parsed.plugin_data[&9], "ff");
    }
}
