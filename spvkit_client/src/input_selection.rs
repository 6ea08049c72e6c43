//! Selection of the unspent outputs that fund a new transaction.
//!
//! Selection strategies implement [`UnspentOutputSelector`] and are consulted in order
//! by an [`UnspentOutputSelectorChain`]. The chain also owns the reservation table that
//! keeps two transactions under construction from spending the same output.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use nonempty::NonEmpty;
use spvkit_protocol::{
    value::{BalanceError, Satoshis},
    OutPoint, ScriptType,
};
use tracing::debug;

use crate::{
    data_api::{BalanceInfo, StorageError, WalletRead},
    error::Error,
    fees::{dust::DustCalculator, size::TransactionSizeCalculator},
    locks,
    plugin::PluginManager,
    wallet::UnspentOutput,
};

#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    #[error("No unspent outputs are available")]
    EmptyOutputs,
    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientFunds {
        available: Satoshis,
        required: Satoshis,
    },
    #[error("The amount received would be below the dust threshold of {threshold}")]
    Dust { threshold: Satoshis },
    #[error("No single output pays the amount without change")]
    NoSingleOutput,
    #[error("No unspent output selectors are registered")]
    NoSelectors,
    #[error("Output {0} is reserved by a transaction under construction")]
    OutputsReserved(OutPoint),
    #[error("Output {0} is not spendable by this wallet")]
    UnknownOutput(OutPoint),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
}

/// What a new transaction has to pay for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectionRequest {
    pub value: Satoshis,
    /// Fee rate in satoshis per virtual byte.
    pub fee_rate: u64,
    pub output_script_type: ScriptType,
    pub change_type: ScriptType,
    /// When `true` the fee is paid on top of `value`; otherwise it is deducted from it.
    pub sender_pay: bool,
    /// Length of the null-data output script, if the transaction has one.
    pub null_data_len: Option<usize>,
}

impl SelectionRequest {
    fn fee(
        &self,
        size: &TransactionSizeCalculator,
        inputs: &[UnspentOutput],
        with_change: bool,
    ) -> Result<Satoshis, SelectionError> {
        let input_types: Vec<_> = inputs.iter().map(|o| o.script_type()).collect();
        let mut outputs = vec![self.output_script_type];
        if with_change {
            outputs.push(self.change_type);
        }
        let vsize = size.transaction_size(&input_types, &outputs, self.null_data_len);
        Ok(Satoshis::from_u64(vsize.saturating_mul(self.fee_rate))
            .map_err(|_| BalanceError::Overflow)?)
    }

    /// The input value needed to pay `fee`.
    fn required(&self, fee: Satoshis) -> Result<Satoshis, SelectionError> {
        if self.sender_pay {
            Ok((self.value + fee).ok_or(BalanceError::Overflow)?)
        } else {
            Ok(self.value)
        }
    }
}

/// The outcome of coin selection.
///
/// Inputs always equal `recipient_value + change_value + fee`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedUnspentOutputInfo {
    pub outputs: NonEmpty<UnspentOutput>,
    pub recipient_value: Satoshis,
    pub change_value: Option<Satoshis>,
    pub fee: Satoshis,
}

impl SelectedUnspentOutputInfo {
    pub fn total_value(&self) -> Option<Satoshis> {
        self.outputs.iter().map(|o| o.value()).sum()
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.outputs.iter().map(|o| o.outpoint()).collect()
    }
}

/// A coin selection strategy.
pub trait UnspentOutputSelector: Send + Sync {
    fn select(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectedUnspentOutputInfo, SelectionError>;
}

fn sum_values(outputs: &[UnspentOutput]) -> Result<Satoshis, BalanceError> {
    outputs
        .iter()
        .map(|o| o.value())
        .sum::<Option<Satoshis>>()
        .ok_or(BalanceError::Overflow)
}

/// Settles values for a chosen set of inputs, adding a change output when
/// `allow_change` is set and the remainder is above the change dust threshold.
fn settle(
    request: &SelectionRequest,
    size: &TransactionSizeCalculator,
    dust: &DustCalculator,
    inputs: Vec<UnspentOutput>,
    allow_change: bool,
) -> Result<SelectedUnspentOutputInfo, SelectionError> {
    let total = sum_values(&inputs)?;

    let fee_no_change = request.fee(size, &inputs, false)?;
    let required = request.required(fee_no_change)?;
    if total < required {
        return Err(SelectionError::InsufficientFunds {
            available: total,
            required,
        });
    }

    let recipient_dust = dust.dust(request.output_script_type);
    let recipient_value = |fee: Satoshis| -> Result<Satoshis, SelectionError> {
        let value = if request.sender_pay {
            Some(request.value)
        } else {
            request.value - fee
        };
        value
            .filter(|v| *v >= recipient_dust)
            .ok_or(SelectionError::Dust {
                threshold: recipient_dust,
            })
    };

    if allow_change {
        let fee = request.fee(size, &inputs, true)?;
        let change = (total - request.required(fee)?)
            .filter(|change| *change > dust.dust(request.change_type));
        if let Some(change) = change {
            return Ok(SelectedUnspentOutputInfo {
                outputs: NonEmpty::from_vec(inputs).ok_or(SelectionError::EmptyOutputs)?,
                recipient_value: recipient_value(fee)?,
                change_value: Some(change),
                fee,
            });
        }
    }

    let recipient_value = recipient_value(fee_no_change)?;
    let fee = (total - recipient_value).ok_or(BalanceError::Underflow)?;
    Ok(SelectedUnspentOutputInfo {
        outputs: NonEmpty::from_vec(inputs).ok_or(SelectionError::EmptyOutputs)?,
        recipient_value,
        change_value: None,
        fee,
    })
}

/// Spends exactly one output whose value exceeds the requirement by less than the
/// change dust threshold, so that no change output is needed. The excess goes to the
/// fee.
#[derive(Clone, Copy, Debug)]
pub struct SingleNoChangeSelector {
    size: TransactionSizeCalculator,
    dust: DustCalculator,
}

impl SingleNoChangeSelector {
    pub fn new(size: TransactionSizeCalculator, dust: DustCalculator) -> Self {
        SingleNoChangeSelector { size, dust }
    }
}

impl UnspentOutputSelector for SingleNoChangeSelector {
    fn select(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectedUnspentOutputInfo, SelectionError> {
        if available.is_empty() {
            return Err(SelectionError::EmptyOutputs);
        }
        let change_dust = self.dust.dust(request.change_type);

        let mut sorted = available.to_vec();
        sorted.sort_by_key(|o| o.value());
        for candidate in sorted {
            let fee = request.fee(&self.size, std::slice::from_ref(&candidate), false)?;
            let required = request.required(fee)?;
            match candidate.value() - required {
                Some(excess) if excess < change_dust => {
                    return settle(request, &self.size, &self.dust, vec![candidate], false);
                }
                _ => continue,
            }
        }
        Err(SelectionError::NoSingleOutput)
    }
}

/// Accumulates outputs from the smallest upwards until they pay for the transaction,
/// optionally keeping at most `outputs_limit` of the largest ones in the window.
#[derive(Clone, Copy, Debug)]
pub struct GreedySelector {
    size: TransactionSizeCalculator,
    dust: DustCalculator,
    outputs_limit: Option<usize>,
}

impl GreedySelector {
    pub fn new(
        size: TransactionSizeCalculator,
        dust: DustCalculator,
        outputs_limit: Option<usize>,
    ) -> Self {
        GreedySelector {
            size,
            dust,
            outputs_limit,
        }
    }
}

impl UnspentOutputSelector for GreedySelector {
    fn select(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectedUnspentOutputInfo, SelectionError> {
        if available.is_empty() {
            return Err(SelectionError::EmptyOutputs);
        }

        let mut sorted = available.to_vec();
        sorted.sort_by_key(|o| o.value());

        let mut selected: Vec<UnspentOutput> = vec![];
        for output in sorted {
            selected.push(output);
            if matches!(self.outputs_limit, Some(limit) if selected.len() > limit) {
                selected.remove(0);
            }
            let required = request.required(request.fee(&self.size, &selected, false)?)?;
            if sum_values(&selected)? >= required {
                break;
            }
        }

        settle(request, &self.size, &self.dust, selected, true)
    }
}

/// The wallet's unspent outputs, classified by whether they can be spent now.
pub struct UnspentOutputProvider {
    storage: Arc<dyn WalletRead>,
    plugin_manager: Arc<PluginManager>,
}

impl UnspentOutputProvider {
    pub fn new(storage: Arc<dyn WalletRead>, plugin_manager: Arc<PluginManager>) -> Self {
        UnspentOutputProvider {
            storage,
            plugin_manager,
        }
    }

    pub fn all_utxo(&self) -> Result<Vec<UnspentOutput>, StorageError> {
        self.storage.unspent_outputs()
    }

    /// Outputs from relayed transactions that are not locked by a plugin.
    pub fn spendable_utxo(&self) -> Result<Vec<UnspentOutput>, StorageError> {
        let mut outputs = self.all_utxo()?;
        outputs.retain(|o| o.relayed() && self.plugin_manager.is_spendable(o));
        Ok(outputs)
    }

    pub fn balance(&self) -> Result<BalanceInfo, Error> {
        let mut spendable = vec![];
        let mut time_locked = vec![];
        let mut not_relayed = vec![];
        for output in self.all_utxo()? {
            if !self.plugin_manager.is_spendable(&output) {
                time_locked.push(output);
            } else if !output.relayed() {
                not_relayed.push(output);
            } else {
                spendable.push(output);
            }
        }
        Ok(BalanceInfo {
            spendable: sum_values(&spendable)?,
            unspendable_time_locked: sum_values(&time_locked)?,
            unspendable_not_relayed: sum_values(&not_relayed)?,
        })
    }
}

/// Outputs held back from selection until this guard is dropped.
#[derive(Debug)]
pub struct Reservation {
    reserved: Arc<Mutex<HashSet<OutPoint>>>,
    outpoints: Vec<OutPoint>,
}

impl Reservation {
    pub fn outpoints(&self) -> &[OutPoint] {
        &self.outpoints
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let mut reserved = locks::lock(&self.reserved);
        for outpoint in &self.outpoints {
            reserved.remove(outpoint);
        }
        debug!("Released {} reserved outputs", self.outpoints.len());
    }
}

type Selectors = Arc<Vec<Arc<dyn UnspentOutputSelector>>>;

/// An ordered list of [`UnspentOutputSelector`]s over the wallet's spendable outputs.
///
/// Selectors are consulted in order and the first success wins. If every selector
/// fails, the error of the last one is returned, so that the final fallback strategy
/// (normally [`GreedySelector`]) explains why the payment cannot be made.
pub struct UnspentOutputSelectorChain {
    selectors: RwLock<Selectors>,
    provider: Arc<UnspentOutputProvider>,
    reserved: Arc<Mutex<HashSet<OutPoint>>>,
}

impl UnspentOutputSelectorChain {
    pub fn new(
        provider: Arc<UnspentOutputProvider>,
        selectors: Vec<Arc<dyn UnspentOutputSelector>>,
    ) -> Self {
        UnspentOutputSelectorChain {
            selectors: RwLock::new(Arc::new(selectors)),
            provider,
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The built-in strategies: an exact single output first, then greedy accumulation.
    pub fn with_default_selectors(
        provider: Arc<UnspentOutputProvider>,
        size: TransactionSizeCalculator,
        dust: DustCalculator,
    ) -> Self {
        Self::new(
            provider,
            vec![
                Arc::new(SingleNoChangeSelector::new(size, dust)),
                Arc::new(GreedySelector::new(size, dust, None)),
            ],
        )
    }

    pub fn provider(&self) -> &Arc<UnspentOutputProvider> {
        &self.provider
    }

    pub fn prepend(&self, selector: Arc<dyn UnspentOutputSelector>) {
        let mut guard = locks::write(&self.selectors);
        let mut selectors = Vec::with_capacity(guard.len() + 1);
        selectors.push(selector);
        selectors.extend(guard.iter().cloned());
        *guard = Arc::new(selectors);
        debug!("Prepended unspent output selector; chain length {}", guard.len());
    }

    fn available(
        &self,
        explicit: Option<&[OutPoint]>,
    ) -> Result<Vec<UnspentOutput>, SelectionError> {
        let spendable = self.provider.spendable_utxo()?;
        match explicit {
            None => Ok(spendable),
            Some(outpoints) => outpoints
                .iter()
                .map(|outpoint| {
                    spendable
                        .iter()
                        .find(|o| o.outpoint() == *outpoint)
                        .cloned()
                        .ok_or(SelectionError::UnknownOutput(*outpoint))
                })
                .collect(),
        }
    }

    fn run(
        &self,
        request: &SelectionRequest,
        available: &[UnspentOutput],
    ) -> Result<SelectedUnspentOutputInfo, SelectionError> {
        let selectors = locks::read(&self.selectors).clone();
        let mut last_error = SelectionError::NoSelectors;
        for selector in selectors.iter() {
            match selector.select(request, available) {
                Ok(selection) => {
                    debug!(
                        "Selected {} outputs, fee {}, change {:?}",
                        selection.outputs.len(),
                        selection.fee,
                        selection.change_value
                    );
                    return Ok(selection);
                }
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    /// Selects outputs for an estimate. Reservations are ignored, so the result
    /// describes the wallet as if nothing else were being built.
    pub fn select(
        &self,
        request: &SelectionRequest,
        explicit: Option<&[OutPoint]>,
    ) -> Result<SelectedUnspentOutputInfo, SelectionError> {
        let available = self.available(explicit)?;
        self.run(request, &available)
    }

    /// Selects outputs for a transaction that will be built, reserving them until the
    /// returned [`Reservation`] is dropped.
    ///
    /// Outputs reserved by another call are not available for selection. If `explicit`
    /// names a reserved output, this fails with [`SelectionError::OutputsReserved`].
    pub fn select_and_reserve(
        &self,
        request: &SelectionRequest,
        explicit: Option<&[OutPoint]>,
    ) -> Result<(SelectedUnspentOutputInfo, Reservation), SelectionError> {
        let mut reserved = locks::lock(&self.reserved);

        let mut available = self.available(explicit)?;
        if explicit.is_some() {
            if let Some(o) = available.iter().find(|o| reserved.contains(&o.outpoint())) {
                return Err(SelectionError::OutputsReserved(o.outpoint()));
            }
        } else {
            available.retain(|o| !reserved.contains(&o.outpoint()));
        }

        let selection = self.run(request, &available)?;
        let outpoints = selection.outpoints();
        reserved.extend(outpoints.iter().copied());

        Ok((
            selection,
            Reservation {
                reserved: self.reserved.clone(),
                outpoints,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use proptest::prelude::*;
    use spvkit_protocol::{value::Satoshis, ScriptType};

    use super::{
        GreedySelector, SelectionError, SelectionRequest, SingleNoChangeSelector,
        UnspentOutputProvider, UnspentOutputSelector, UnspentOutputSelectorChain,
    };
    use crate::{
        fees::{dust::DustCalculator, size::TransactionSizeCalculator},
        plugin::PluginManager,
        testing::{utxo, MemoryWalletDb},
        wallet::UnspentOutput,
    };

    fn calculators() -> (TransactionSizeCalculator, DustCalculator) {
        let size = TransactionSizeCalculator;
        (size, DustCalculator::new(3, size))
    }

    fn request(value: u64, sender_pay: bool) -> SelectionRequest {
        SelectionRequest {
            value: Satoshis::const_from_u64(value),
            fee_rate: 10,
            output_script_type: ScriptType::P2pkh,
            change_type: ScriptType::P2pkh,
            sender_pay,
            null_data_len: None,
        }
    }

    fn outputs(values: &[u64]) -> Vec<UnspentOutput> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| utxo(i as u8, *v))
            .collect()
    }

    fn chain(values: &[u64]) -> UnspentOutputSelectorChain {
        let db = Arc::new(MemoryWalletDb::new());
        for output in outputs(values) {
            db.add_unspent_output(output);
        }
        let (size, dust) = calculators();
        UnspentOutputSelectorChain::with_default_selectors(
            Arc::new(UnspentOutputProvider::new(db, Arc::new(PluginManager::new()))),
            size,
            dust,
        )
    }

    #[test]
    fn single_output_without_change() {
        let (size, dust) = calculators();
        // One P2PKH input to one P2PKH output: 192 vB, 1920 sat at 10 sat/vB.
        let selection = SingleNoChangeSelector::new(size, dust)
            .select(&request(10_000, true), &outputs(&[5_000, 12_000, 50_000]))
            .unwrap();
        assert_eq!(selection.outputs.len(), 1);
        assert_eq!(selection.outputs.head.value(), Satoshis::const_from_u64(12_000));
        assert_eq!(selection.change_value, None);
        assert_eq!(selection.fee, Satoshis::const_from_u64(2_000));

        assert_matches!(
            SingleNoChangeSelector::new(size, dust)
                .select(&request(10_000, true), &outputs(&[5_000, 50_000])),
            Err(SelectionError::NoSingleOutput)
        );
    }

    #[test]
    fn greedy_accumulates_and_makes_change() {
        let (size, dust) = calculators();
        let selection = GreedySelector::new(size, dust, None)
            .select(&request(10_000, true), &outputs(&[4_000, 4_000, 9_000]))
            .unwrap();
        assert_eq!(selection.outputs.len(), 3);
        let change = selection.change_value.unwrap();
        assert_eq!(
            (selection.recipient_value + change + selection.fee).unwrap(),
            selection.total_value().unwrap()
        );
    }

    #[test]
    fn greedy_window_is_limited() {
        let (size, dust) = calculators();
        let selection = GreedySelector::new(size, dust, Some(2))
            .select(&request(10_000, true), &outputs(&[1_000, 2_000, 9_000, 9_000]))
            .unwrap();
        assert_eq!(selection.outputs.len(), 2);
        assert!(selection.outputs.iter().all(|o| o.value() == Satoshis::const_from_u64(9_000)));
    }

    #[test]
    fn receiver_pays_the_fee() {
        let (size, dust) = calculators();
        let selection = GreedySelector::new(size, dust, None)
            .select(&request(20_000, false), &outputs(&[20_000]))
            .unwrap();
        assert_eq!(selection.change_value, None);
        assert_eq!(selection.recipient_value, Satoshis::const_from_u64(20_000 - 1_920));
        assert_eq!(selection.fee, Satoshis::const_from_u64(1_920));
    }

    #[test]
    fn dust_recipient_is_rejected() {
        let (size, dust) = calculators();
        assert_matches!(
            GreedySelector::new(size, dust, None).select(&request(2_000, false), &outputs(&[2_000])),
            Err(SelectionError::Dust { .. })
        );
    }

    #[test]
    fn chain_surfaces_the_last_error() {
        let chain = chain(&[1_000, 2_000]);
        assert_matches!(
            chain.select(&request(10_000, true), None),
            Err(SelectionError::InsufficientFunds { .. })
        );

        let empty = UnspentOutputSelectorChain::new(chain.provider().clone(), vec![]);
        assert_matches!(
            empty.select(&request(100, true), None),
            Err(SelectionError::NoSelectors)
        );
    }

    #[test]
    fn reservations_exclude_outputs_until_dropped() {
        let chain = chain(&[12_000]);
        let (selection, reservation) = chain
            .select_and_reserve(&request(10_000, true), None)
            .unwrap();
        assert_eq!(reservation.outpoints(), &selection.outpoints()[..]);

        assert_matches!(
            chain.select_and_reserve(&request(10_000, true), None),
            Err(SelectionError::EmptyOutputs)
        );
        let explicit = selection.outpoints();
        assert_matches!(
            chain.select_and_reserve(&request(10_000, true), Some(&explicit)),
            Err(SelectionError::OutputsReserved(_))
        );
        // Estimates ignore reservations.
        assert!(chain.select(&request(10_000, true), None).is_ok());

        drop(reservation);
        assert!(chain.select_and_reserve(&request(10_000, true), None).is_ok());
    }

    #[test]
    fn concurrent_selections_never_overlap() {
        let chain = Arc::new(chain(&[
            3_000, 3_500, 4_000, 4_500, 5_000, 5_500, 6_000, 6_500, 7_000, 7_500,
        ]));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let chain = chain.clone();
                thread::spawn(move || {
                    chain
                        .select_and_reserve(&request(6_000, true), None)
                        .map(|(selection, reservation)| (selection.outpoints(), reservation))
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter_map(Result::ok)
            .collect();
        assert!(!results.is_empty());

        let mut seen = HashSet::new();
        for (outpoints, _) in &results {
            for outpoint in outpoints {
                assert!(seen.insert(*outpoint), "output selected twice");
            }
        }
    }

    proptest! {
        #[test]
        fn selection_conserves_value(
            values in prop::collection::vec(1_000u64..100_000, 1..12),
            value in 1_000u64..200_000,
            sender_pay in any::<bool>(),
        ) {
            let (size, dust) = calculators();
            if let Ok(selection) = GreedySelector::new(size, dust, None)
                .select(&request(value, sender_pay), &outputs(&values))
            {
                let outputs_total = (selection.recipient_value
                    + selection.change_value.unwrap_or(Satoshis::ZERO)
                    + selection.fee)
                    .unwrap();
                prop_assert_eq!(outputs_total, selection.total_value().unwrap());
                if sender_pay {
                    prop_assert_eq!(selection.recipient_value, Satoshis::const_from_u64(value));
                }
            }
        }
    }
}
