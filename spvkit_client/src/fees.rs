//! Fee estimation for prospective payments.
//!
//! Sizes come from [`size::TransactionSizeCalculator`], the smallest useful output
//! values from [`dust::DustCalculator`]. [`TransactionFeeCalculator`] runs coin
//! selection without reserving anything, so an estimate never blocks a concurrent send.

use std::sync::Arc;

use spvkit_address::{Address, AddressConverter};
use spvkit_protocol::value::{BalanceError, Satoshis};

use crate::{
    address::AddressConverterChain,
    builder::{SendParameters, TransactionBuilder},
    error::Error,
    input_selection::{SelectionError, UnspentOutputSelectorChain},
    keys::PublicKeyManager,
    plugin::PluginManager,
    wallet::UnspentOutput,
};

pub mod dust;
pub mod size;

/// The breakdown of a prospective payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendInfo {
    pub fee: Satoshis,
    /// The outputs that would be spent.
    pub unspent_outputs: Vec<UnspentOutput>,
    pub change_value: Option<Satoshis>,
    /// The address that would receive the change, when there is any.
    pub change_address: Option<Address>,
}

pub struct TransactionFeeCalculator {
    selector: Arc<UnspentOutputSelectorChain>,
    builder: Arc<TransactionBuilder>,
    address_converter: Arc<AddressConverterChain>,
    key_manager: Arc<PublicKeyManager>,
    plugin_manager: Arc<PluginManager>,
}

impl TransactionFeeCalculator {
    pub fn new(
        selector: Arc<UnspentOutputSelectorChain>,
        builder: Arc<TransactionBuilder>,
        address_converter: Arc<AddressConverterChain>,
        key_manager: Arc<PublicKeyManager>,
        plugin_manager: Arc<PluginManager>,
    ) -> Self {
        TransactionFeeCalculator {
            selector,
            builder,
            address_converter,
            key_manager,
            plugin_manager,
        }
    }

    pub fn send_info(&self, params: &SendParameters) -> Result<SendInfo, Error> {
        let recipient = params
            .address
            .as_deref()
            .map(|a| self.address_converter.convert_str(a))
            .transpose()?;
        if let Some(address) = &recipient {
            self.plugin_manager.validate(address, &params.plugin_data)?;
        }

        let mtx = self
            .builder
            .prepare_outputs(recipient, params.memo.as_deref(), &params.plugin_data)?;
        let request = self.builder.selection_request(&mtx, params);
        let selection = self
            .selector
            .select(&request, params.unspent_outputs.as_deref())?;

        let change_address = match selection.change_value {
            Some(_) => Some(self.change_address()?),
            None => None,
        };
        Ok(SendInfo {
            fee: selection.fee,
            unspent_outputs: selection.outputs.into(),
            change_value: selection.change_value,
            change_address,
        })
    }

    fn change_address(&self) -> Result<Address, Error> {
        let key = self.key_manager.current_change_public_key()?;
        Ok(self
            .address_converter
            .convert_public_key(&key.key_bytes(), self.builder.change_script_type())?)
    }

    /// The largest value that can be sent with `params`, ignoring `params.value` and
    /// `params.sender_pay`.
    ///
    /// This is the spendable balance (or the value of `params.unspent_outputs`) less
    /// the fee of spending all of it, capped by the plugins' spend limits. It is zero
    /// when the fee would consume the whole balance or leave only dust.
    pub fn max_spendable_value(&self, params: &SendParameters) -> Result<Satoshis, Error> {
        let provider = self.selector.provider();
        let balance = match &params.unspent_outputs {
            Some(outpoints) => provider
                .spendable_utxo()?
                .iter()
                .filter(|o| outpoints.contains(&o.outpoint()))
                .map(|o| o.value())
                .sum::<Option<Satoshis>>()
                .ok_or(BalanceError::Overflow)?,
            None => provider.balance()?.spendable,
        };

        let max = if balance.is_zero() {
            Satoshis::ZERO
        } else {
            let mut send_all = params.clone();
            send_all.value = balance;
            send_all.sender_pay = false;
            match self.send_info(&send_all) {
                Ok(info) => balance.saturating_sub(info.fee),
                Err(Error::Selection(
                    SelectionError::InsufficientFunds { .. }
                    | SelectionError::Dust { .. }
                    | SelectionError::EmptyOutputs,
                )) => Satoshis::ZERO,
                Err(e) => return Err(e),
            }
        };

        let limit = self.plugin_manager.max_spend_limit(&params.plugin_data)?;
        Ok(limit.map_or(max, |limit| max.min(limit)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use spvkit_protocol::{consensus::Network, value::Satoshis, ScriptType};

    use super::TransactionFeeCalculator;
    use crate::{
        address::AddressConverterChain,
        builder::{SendParameters, TransactionBuilder},
        error::Error,
        fees::{dust::DustCalculator, size::TransactionSizeCalculator},
        input_selection::{SelectionError, UnspentOutputProvider, UnspentOutputSelectorChain},
        keys::PublicKeyManager,
        plugin::PluginManager,
        testing::{utxo, MemoryWalletDb, MockKeyDeriver, P2PKH_ADDRESS},
    };

    fn calculator(values: &[u64]) -> TransactionFeeCalculator {
        let db = Arc::new(MemoryWalletDb::new());
        for (i, value) in values.iter().enumerate() {
            db.add_unspent_output(utxo(i as u8, *value));
        }
        let plugins = Arc::new(PluginManager::new());
        let addresses = Arc::new(AddressConverterChain::for_network(Network::Main));
        let keys = Arc::new(PublicKeyManager::new(
            db.clone(),
            Arc::new(MockKeyDeriver),
            0,
            5,
        ));
        keys.fill_gap().unwrap();
        let size = TransactionSizeCalculator;
        let selector = Arc::new(UnspentOutputSelectorChain::with_default_selectors(
            Arc::new(UnspentOutputProvider::new(db, plugins.clone())),
            size,
            DustCalculator::new(3, size),
        ));
        let builder = Arc::new(TransactionBuilder::new(
            addresses.clone(),
            plugins.clone(),
            ScriptType::P2pkh,
        ));
        TransactionFeeCalculator::new(selector, builder, addresses, keys, plugins)
    }

    fn params(value: u64, fee_rate: u64) -> SendParameters {
        SendParameters::new(
            Some(P2PKH_ADDRESS.to_owned()),
            Satoshis::const_from_u64(value),
            fee_rate,
        )
    }

    #[test]
    fn send_info_reports_change() {
        let info = calculator(&[100_000]).send_info(&params(10_000, 10)).unwrap();
        // One input, recipient and change outputs.
        assert_eq!(info.fee, Satoshis::const_from_u64(2_260));
        assert_eq!(info.change_value, Some(Satoshis::const_from_u64(87_740)));
        assert!(info.change_address.is_some());
        assert_eq!(info.unspent_outputs.len(), 1);
    }

    #[test]
    fn send_info_without_recipient_uses_change_type() {
        let mut params = params(10_000, 10);
        params.address = None;
        let info = calculator(&[100_000]).send_info(&params).unwrap();
        assert_eq!(info.fee, Satoshis::const_from_u64(2_260));
    }

    #[test]
    fn insufficient_funds_are_reported() {
        assert_matches!(
            calculator(&[1_000]).send_info(&params(10_000, 10)),
            Err(Error::Selection(SelectionError::InsufficientFunds { .. }))
        );
    }

    #[test]
    fn max_spendable_is_balance_less_fee() {
        let calc = calculator(&[50_000, 50_000]);
        // Two inputs, one output: 340 vB.
        assert_eq!(
            calc.max_spendable_value(&params(0, 10)).unwrap(),
            Satoshis::const_from_u64(100_000 - 3_400)
        );
        assert_eq!(
            calc.max_spendable_value(&params(0, 1_000)).unwrap(),
            Satoshis::ZERO
        );
        assert_eq!(
            calculator(&[]).max_spendable_value(&params(0, 10)).unwrap(),
            Satoshis::ZERO
        );
    }

    proptest! {
        #[test]
        fn max_spendable_grows_as_fee_rate_falls(
            values in prop::collection::vec(1_000u64..500_000, 1..8),
            rate in 1u64..500,
            lower in 0u64..500,
        ) {
            let calc = calculator(&values);
            let lower_rate = rate.saturating_sub(lower).max(1);
            let at_rate = calc.max_spendable_value(&params(0, rate)).unwrap();
            let at_lower = calc.max_spendable_value(&params(0, lower_rate)).unwrap();
            prop_assert!(at_lower >= at_rate);
        }
    }
}
