//! Coin selection for bitcoinish payments.
//!
//! Picks UTXOs largest-first until the outputs and the fee are covered,
//! re-estimating the fee as each input is added, then splits whatever is
//! left over across the caller's weighted change outputs. Change that would
//! be dust is dropped into the fee instead of being created.

use tracing::{debug, warn};

use crate::address::{decode_address, AddressType, OutputScriptKind};
use crate::error::BitcoinishError;
use crate::fee::{estimate_fee, FeeEstimate, FeeRateSpec};
use crate::network::NetworkProfile;
use crate::transaction::{estimate_tx_size, TxOutput, WeightedChangeOutput};
use crate::utxo::{eligible_utxos, total_value, UtxoInfo};

/// What the selected inputs should pay for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionTarget {
    /// Pay these outputs, returning any excess as change.
    Send(Vec<TxOutput>),
    /// Spend every eligible UTXO into a single output, minus the fee.
    Sweep { address: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionOptions {
    pub use_unconfirmed_utxos: bool,
    /// Spend extra small UTXOs until the wallet is left with at most this
    /// many unspent outputs (change included), as long as each one is worth
    /// more than the fee to spend it.
    pub target_utxo_pool_size: Option<usize>,
}

/// Result of coin selection: which UTXOs to spend and the fee/change breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<UtxoInfo>,
    pub external_outputs: Vec<TxOutput>,
    /// Empty when the change would have been dust.
    pub change_outputs: Vec<TxOutput>,
    pub fee: u64,
    /// Sum of `change_outputs`.
    pub change: u64,
    /// The fee was raised to the network's minimum relay fee.
    pub fee_clamped: bool,
}

impl Selection {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).sum()
    }

    pub fn external_total(&self) -> u64 {
        self.external_outputs.iter().map(|o| o.value).sum()
    }
}

/// Split `change` across `outputs` in proportion to their weights.
///
/// Shares are floored; the remainder left by flooring goes to the first
/// output, so the shares always add up to exactly `change`.
pub fn distribute_change(change: u64, outputs: &[WeightedChangeOutput]) -> Vec<TxOutput> {
    let total_weight: u128 = outputs.iter().map(|o| u128::from(o.weight)).sum();
    if total_weight == 0 {
        return Vec::new();
    }

    let mut shares: Vec<TxOutput> = outputs
        .iter()
        .map(|o| {
            let share = u128::from(change) * u128::from(o.weight) / total_weight;
            // share <= change, so this always fits.
            TxOutput::new(o.address.clone(), u64::try_from(share).unwrap_or(change))
        })
        .collect();

    let allocated: u64 = shares.iter().map(|o| o.value).sum();
    if let Some(first) = shares.first_mut() {
        first.value += change - allocated;
    }
    shares
}

fn checked_total(total: u64, value: u64) -> Result<u64, BitcoinishError> {
    total
        .checked_add(value)
        .ok_or_else(|| BitcoinishError::InvalidAmount("utxo total overflows".into()))
}

/// Greedy largest-first coin selector for one network and input type.
pub struct CoinSelector<'a> {
    profile: &'a NetworkProfile,
    input_type: AddressType,
}

impl<'a> CoinSelector<'a> {
    pub fn new(profile: &'a NetworkProfile, input_type: AddressType) -> Self {
        Self { profile, input_type }
    }

    /// Select inputs from `utxos` for `target`.
    ///
    /// Only confirmed, non-dust UTXOs are considered unless
    /// `options.use_unconfirmed_utxos` is set. `change_outputs` is ignored
    /// for sweeps.
    pub fn select(
        &self,
        utxos: &[UtxoInfo],
        target: &SelectionTarget,
        fee_spec: &FeeRateSpec,
        change_outputs: &[WeightedChangeOutput],
        options: &SelectionOptions,
    ) -> Result<Selection, BitcoinishError> {
        let eligible = eligible_utxos(utxos, self.profile, options.use_unconfirmed_utxos);
        debug!(
            network = self.profile.name,
            available = utxos.len(),
            eligible = eligible.len(),
            "selecting coins"
        );

        let selection = match target {
            SelectionTarget::Send(outputs) => {
                self.select_send(&eligible, outputs, fee_spec, change_outputs, options)?
            }
            SelectionTarget::Sweep { address } => self.select_sweep(&eligible, address, fee_spec)?,
        };

        if selection.fee_clamped {
            warn!(
                network = self.profile.name,
                fee = selection.fee,
                "fee below minimum relay fee, raised to floor"
            );
        }
        debug!(
            network = self.profile.name,
            inputs = selection.inputs.len(),
            fee = selection.fee,
            change = selection.change,
            change_outputs = selection.change_outputs.len(),
            "coin selection complete"
        );
        Ok(selection)
    }

    fn estimate(
        &self,
        input_count: usize,
        outputs: &[OutputScriptKind],
        fee_spec: &FeeRateSpec,
    ) -> Result<FeeEstimate, BitcoinishError> {
        let size = estimate_tx_size(self.input_type, input_count, outputs);
        estimate_fee(fee_spec, size, self.profile)
    }

    fn output_kinds<'o>(
        &self,
        addresses: impl IntoIterator<Item = &'o str>,
    ) -> Result<Vec<OutputScriptKind>, BitcoinishError> {
        addresses
            .into_iter()
            .map(|a| decode_address(a, self.profile).map(|d| d.kind))
            .collect()
    }

    fn validate_outputs(&self, outputs: &[TxOutput]) -> Result<u64, BitcoinishError> {
        if outputs.is_empty() {
            return Err(BitcoinishError::InvalidAmount("no outputs to pay".into()));
        }
        for output in outputs {
            if self.profile.is_dust(output.value) {
                return Err(BitcoinishError::DustOutput {
                    value: output.value,
                    threshold: self.profile.dust_threshold,
                });
            }
        }
        outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or_else(|| BitcoinishError::InvalidAmount("output total overflows".into()))
    }

    fn select_send(
        &self,
        eligible: &[&UtxoInfo],
        outputs: &[TxOutput],
        fee_spec: &FeeRateSpec,
        change_outputs: &[WeightedChangeOutput],
        options: &SelectionOptions,
    ) -> Result<Selection, BitcoinishError> {
        let target = self.validate_outputs(outputs)?;
        if let Some(zero) = change_outputs.iter().find(|c| c.weight == 0) {
            return Err(BitcoinishError::InvalidAmount(format!(
                "change output {} has zero weight",
                zero.address
            )));
        }
        let external_kinds = self.output_kinds(outputs.iter().map(|o| o.address.as_str()))?;
        let change_kinds = self.output_kinds(change_outputs.iter().map(|c| c.address.as_str()))?;

        let mut selected: Vec<&UtxoInfo> = Vec::new();
        let mut total: u64 = 0;
        let mut covered = false;
        for utxo in eligible {
            selected.push(*utxo);
            total = checked_total(total, utxo.value)?;
            let fee = self.estimate(selected.len(), &external_kinds, fee_spec)?.fee;
            if total >= target.saturating_add(fee) {
                covered = true;
                break;
            }
        }

        if !covered {
            let fee = self
                .estimate(selected.len().max(1), &external_kinds, fee_spec)?
                .fee;
            return Err(BitcoinishError::InsufficientFunds {
                have: total,
                need: target.saturating_add(fee),
            });
        }

        if let Some(pool_target) = options.target_utxo_pool_size {
            let all_kinds: Vec<OutputScriptKind> =
                external_kinds.iter().chain(change_kinds.iter()).copied().collect();
            total = self.consolidate(
                eligible,
                &mut selected,
                total,
                pool_target,
                change_outputs.len(),
                &all_kinds,
                fee_spec,
            )?;
        }

        let inputs: Vec<UtxoInfo> = selected.into_iter().cloned().collect();
        let input_count = inputs.len();

        // Try all change outputs, then drop the lowest-weight one at a time
        // until every share clears the dust threshold.
        let mut active: Vec<(&WeightedChangeOutput, OutputScriptKind)> =
            change_outputs.iter().zip(change_kinds).collect();
        while !active.is_empty() {
            let kinds: Vec<OutputScriptKind> = external_kinds
                .iter()
                .copied()
                .chain(active.iter().map(|(_, kind)| *kind))
                .collect();
            let estimate = self.estimate(input_count, &kinds, fee_spec)?;

            if let Some(change) = total.checked_sub(target.saturating_add(estimate.fee)) {
                let weighted: Vec<WeightedChangeOutput> =
                    active.iter().map(|(c, _)| (*c).clone()).collect();
                let shares = distribute_change(change, &weighted);
                if shares.iter().all(|s| !self.profile.is_dust(s.value)) {
                    return Ok(Selection {
                        inputs,
                        external_outputs: outputs.to_vec(),
                        change_outputs: shares,
                        fee: estimate.fee,
                        change,
                        fee_clamped: estimate.clamped,
                    });
                }
            }

            let lowest = active
                .iter()
                .enumerate()
                .min_by(|(ia, (a, _)), (ib, (b, _))| a.weight.cmp(&b.weight).then(ib.cmp(ia)))
                .map(|(i, _)| i)
                .unwrap_or(0);
            active.remove(lowest);
        }

        let estimate = self.estimate(input_count, &external_kinds, fee_spec)?;
        let fee = total - target;
        if change_outputs.is_empty() && fee > estimate.fee && !self.profile.is_dust(fee - estimate.fee) {
            return Err(BitcoinishError::TransactionBuild(format!(
                "{} base units of change but no change output to receive it",
                fee - estimate.fee
            )));
        }

        Ok(Selection {
            inputs,
            external_outputs: outputs.to_vec(),
            change_outputs: Vec::new(),
            fee,
            change: 0,
            fee_clamped: estimate.clamped,
        })
    }

    /// Add the smallest unspent UTXOs to `selected` while the wallet would
    /// be left with more than `pool_target` outputs. Returns the new input
    /// total.
    #[allow(clippy::too_many_arguments)]
    fn consolidate<'u>(
        &self,
        eligible: &[&'u UtxoInfo],
        selected: &mut Vec<&'u UtxoInfo>,
        mut total: u64,
        pool_target: usize,
        change_count: usize,
        output_kinds: &[OutputScriptKind],
        fee_spec: &FeeRateSpec,
    ) -> Result<u64, BitcoinishError> {
        // Selection takes a prefix of the eligible list, so what is left is
        // the tail, smallest last.
        let unspent = &eligible[selected.len()..];
        let mut pool = unspent.len() + change_count;

        for utxo in unspent.iter().rev() {
            if pool <= pool_target {
                break;
            }
            let before = self.estimate(selected.len(), output_kinds, fee_spec)?.fee;
            let after = self.estimate(selected.len() + 1, output_kinds, fee_spec)?.fee;
            if utxo.value <= after.saturating_sub(before) {
                continue;
            }
            total = checked_total(total, utxo.value)?;
            selected.push(*utxo);
            pool -= 1;
        }

        debug!(pool, pool_target, inputs = selected.len(), "consolidated utxo pool");
        Ok(total)
    }

    fn select_sweep(
        &self,
        eligible: &[&UtxoInfo],
        address: &str,
        fee_spec: &FeeRateSpec,
    ) -> Result<Selection, BitcoinishError> {
        let kinds = self.output_kinds([address])?;
        let estimate = self.estimate(eligible.len().max(1), &kinds, fee_spec)?;
        let need = estimate.fee.saturating_add(self.profile.dust_threshold);

        let total = total_value(eligible.iter().copied())
            .ok_or_else(|| BitcoinishError::InvalidAmount("utxo total overflows".into()))?;
        let value = match total.checked_sub(estimate.fee) {
            Some(value) if !eligible.is_empty() && !self.profile.is_dust(value) => value,
            _ => return Err(BitcoinishError::InsufficientFunds { have: total, need }),
        };

        Ok(Selection {
            inputs: eligible.iter().map(|u| (*u).clone()).collect(),
            external_outputs: vec![TxOutput::new(address, value)],
            change_outputs: Vec::new(),
            fee: estimate.fee,
            change: 0,
            fee_clamped: estimate.clamped,
        })
    }
}
