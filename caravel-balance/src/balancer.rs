//! Component G: the balancing fixpoint loop (§4.G).
//!
//! Mirrors the source's top-level `transaction_balancing.c` driver: size,
//! collateralize, select inputs, compute change (resetting to the pristine
//! output set on an underflow), evaluate scripts, re-estimate the fee
//! (resetting again if the fee grew), and verify. Each `continue` below
//! corresponds to one of those reset points.

use std::collections::BTreeSet;

use pallas_addresses::Address;

use crate::codec::{body_size, output_size, witness_set_size};
use crate::collateral;
use crate::evaluator::ScriptEvaluator;
use crate::fee::{compute_transaction_fee, vk_witness_cost};
use crate::implicit::{compute_implicit_coin, ImplicitCoin};
use crate::model::{TransactionBody, TransactionOutput, Utxo, UtxoSet, WitnessSet};
use crate::selector::{self, CoinSelector};
use crate::signers::unique_required_signers;
use crate::value::{compute_min_ada_required, Value};
use crate::{BalanceError, ProtocolParameters};

/// The longest the loop will iterate before giving up. §8's Termination
/// property expects convergence in a handful of rounds; this bound exists to
/// turn a non-converging algorithm (a bug, or genuinely insufficient funds)
/// into an error rather than a hang.
const MAX_ITERATIONS: usize = 32;

/// Everything the balancer needs to turn a partially-built body into a
/// fully-balanced one.
pub struct BalanceRequest<'a> {
    pub body: TransactionBody,
    pub witness_set: WitnessSet,
    pub utxos: &'a UtxoSet,
    pub available_inputs: Vec<Utxo>,
    pub change_address: Address,
    pub collateral_change_address: Option<Address>,
    pub available_collateral: Vec<Utxo>,
    pub params: &'a ProtocolParameters,
    pub selector: &'a dyn CoinSelector,
    pub evaluator: &'a dyn ScriptEvaluator,
}

/// The engine's output: a body and witness set whose fee, change, and
/// collateral are all mutually consistent, per `is_transaction_balanced`.
pub struct BalancedTransaction {
    pub body: TransactionBody,
    pub witness_set: WitnessSet,
    pub fee: u64,
}

pub fn balance_transaction(request: BalanceRequest) -> Result<BalancedTransaction, BalanceError> {
    let span = tracing::info_span!("balance_transaction");
    let _enter = span.enter();

    let BalanceRequest {
        mut body,
        mut witness_set,
        utxos,
        available_inputs,
        change_address,
        collateral_change_address,
        available_collateral,
        params,
        selector,
        evaluator,
    } = request;

    let pristine_outputs = body.outputs.clone();
    let mut fee = body.fee;
    let mut change_padding = Value::zero();

    for iteration in 0..MAX_ITERATIONS {
        tracing::debug!(iteration, fee, "starting balancer iteration");
        body.outputs = pristine_outputs.clone();

        let implicit = compute_implicit_coin(&body, params)?;
        let has_redeemers = body.has_redeemers(&witness_set);

        if has_redeemers {
            tracing::debug!("entering collateral sub-loop");
            if let Some(result) = collateral::set_collateral_output(
                true,
                fee,
                params,
                &available_collateral,
                collateral_change_address.as_ref(),
                selector,
            )? {
                tracing::debug!(
                    total_collateral = result.total_collateral,
                    inputs = result.collateral_inputs.len(),
                    "collateral sub-loop converged"
                );
                body.collateral = result
                    .collateral_inputs
                    .iter()
                    .map(|u| u.input.clone())
                    .collect::<BTreeSet<_>>();
                body.collateral_return = result.collateral_return;
                body.total_collateral = Some(result.total_collateral);
            }
        }

        let required = required_value(&body, &implicit, fee, &change_padding)?;

        let pre_selected = selector::resolve(
            &body.inputs.iter().cloned().collect::<Vec<_>>(),
            utxos,
        )?;
        let available: Vec<Utxo> = available_inputs
            .iter()
            .filter(|u| !body.inputs.contains(&u.input))
            .cloned()
            .collect();

        let selection = selector.select(&pre_selected, &available, &required)?;
        body.inputs = selection
            .selected
            .iter()
            .map(|u| u.input.clone())
            .collect();

        let total_selected = sum_values(&selection.selected)?;
        let change_value = total_selected.subtract(&required)?.normalize();

        if !change_value.is_zero() {
            let non_negative = change_value.clone().into_non_negative()?;
            let candidate = TransactionOutput::new(change_address.clone(), change_value);
            let size = output_size(&candidate)?;
            let min = compute_min_ada_required(size, params.ada_per_utxo_byte)?;

            if non_negative.coin < min {
                tracing::debug!(
                    change = non_negative.coin,
                    min_ada_required = min,
                    "change below min-UTxO, resetting to pristine outputs"
                );
                change_padding = change_padding.add(&Value::from_coin(
                    (min - non_negative.coin) as i64,
                ))?;
                continue;
            }

            body.outputs.push(candidate);
        }

        if !witness_set.redeemers.is_empty() {
            let ex_units = evaluator.evaluate(&witness_set.redeemers, &selection.selected)?;
            for (redeemer, units) in witness_set.redeemers.iter_mut().zip(ex_units) {
                redeemer.ex_units = units;
            }
        }

        let ref_bytes = reference_script_bytes(&body, utxos);
        let tx_len = body_size(&body)? + witness_set_size(&witness_set)?;
        let fee_without_vk =
            compute_transaction_fee(tx_len, ref_bytes, &witness_set.redeemers, params)?;

        let signers = unique_required_signers(&body, utxos)?;
        let vk_cost = vk_witness_cost(signers.len(), params.min_fee_coefficient)?;
        let new_fee = fee_without_vk
            .checked_add(vk_cost)
            .ok_or(BalanceError::ArithmeticOverflow)?;

        if new_fee > fee {
            tracing::debug!(old_fee = fee, new_fee, "fee grew, resetting to pristine outputs");
            fee = new_fee;
            change_padding = Value::zero();
            continue;
        }

        body.fee = fee;

        if is_transaction_balanced(&body, utxos, &implicit, fee)? {
            tracing::info!(fee, iteration, "balancer converged");
            return Ok(BalancedTransaction {
                body,
                witness_set,
                fee,
            });
        }
    }

    tracing::warn!("balancer did not converge within the iteration bound");
    Err(BalanceError::BalanceInsufficient)
}

/// The coin-and-asset amount the selected inputs must cover: outputs plus
/// fee plus deposits, less withdrawals, reclaimed deposits, and any minted
/// value (a net burn increases the requirement instead), plus whatever
/// padding a prior underflow round added (§4.G).
fn required_value(
    body: &TransactionBody,
    implicit: &ImplicitCoin,
    fee: u64,
    change_padding: &Value,
) -> Result<Value, BalanceError> {
    let outputs_total = sum_outputs(&body.outputs)?;
    let mint = body.mint.clone().unwrap_or_default();

    outputs_total
        .add(&Value::from_coin(fee as i64))?
        .add(&Value::from_coin(implicit.deposits as i64))?
        .subtract(&Value::from_coin(implicit.withdrawals as i64))?
        .subtract(&Value::from_coin(implicit.reclaim_deposits as i64))?
        .subtract(&mint)?
        .add(change_padding)
}

fn sum_outputs(outputs: &[TransactionOutput]) -> Result<Value, BalanceError> {
    let mut total = Value::zero();
    for output in outputs {
        total = total.add(&output.value)?;
    }
    Ok(total)
}

fn sum_values(utxos: &[Utxo]) -> Result<Value, BalanceError> {
    let mut total = Value::zero();
    for utxo in utxos {
        total = total.add(&utxo.output.value)?;
    }
    Ok(total)
}

fn reference_script_bytes(body: &TransactionBody, utxos: &UtxoSet) -> u64 {
    body.reference_inputs
        .iter()
        .filter_map(|input| utxos.get(input))
        .filter_map(|output| output.script_ref.as_ref())
        .map(|script| script.len() as u64)
        .sum()
}

/// The balance equation of §4.G/§8: selected inputs plus withdrawals plus
/// reclaimed deposits plus minted value must equal outputs plus fee plus
/// deposits, exactly (not merely not-less-than) — any surplus belongs in a
/// change output the loop above already folded into `body.outputs`.
fn is_transaction_balanced(
    body: &TransactionBody,
    utxos: &UtxoSet,
    implicit: &ImplicitCoin,
    fee: u64,
) -> Result<bool, BalanceError> {
    let inputs = selector::resolve(&body.inputs.iter().cloned().collect::<Vec<_>>(), utxos)?;

    let mut left = sum_values(&inputs)?
        .add(&Value::from_coin(implicit.withdrawals as i64))?
        .add(&Value::from_coin(implicit.reclaim_deposits as i64))?;
    if let Some(mint) = &body.mint {
        left = left.add(mint)?;
    }

    let right = sum_outputs(&body.outputs)?
        .add(&Value::from_coin(fee as i64))?
        .add(&Value::from_coin(implicit.deposits as i64))?;

    Ok(left.equals(&right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::NoopEvaluator;
    use crate::model::TransactionInput;
    use crate::selector::LargestFirst;
    use pallas_addresses::{Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};
    use pallas_crypto::hash::Hash;

    fn addr(byte: u8) -> Address {
        Address::Shelley(ShelleyAddress::new(
            Network::Testnet,
            ShelleyPaymentPart::Key(Hash::new([byte; 28])),
            ShelleyDelegationPart::Key(Hash::new([byte; 28])),
        ))
    }

    fn utxo(idx: u64, coin: i64) -> Utxo {
        Utxo {
            input: TransactionInput {
                transaction_id: Hash::new([idx as u8; 32]),
                index: idx,
            },
            output: TransactionOutput::new(addr(1), Value::from_coin(coin)),
        }
    }

    #[test]
    fn balances_a_simple_ada_only_payment() {
        let params = ProtocolParameters::default();
        let mut body = TransactionBody::default();
        body.outputs
            .push(TransactionOutput::new(addr(2), Value::from_coin(5_000_000)));

        let mut utxos = UtxoSet::new();
        let funding = utxo(0, 20_000_000);
        utxos.insert(funding.clone());

        let selector = LargestFirst;
        let evaluator = NoopEvaluator;

        let result = balance_transaction(BalanceRequest {
            body,
            witness_set: WitnessSet::default(),
            utxos: &utxos,
            available_inputs: vec![funding],
            change_address: addr(3),
            collateral_change_address: None,
            available_collateral: vec![],
            params: &params,
            selector: &selector,
            evaluator: &evaluator,
        })
        .unwrap();

        assert!(result.fee > 0);
        assert_eq!(result.body.inputs.len(), 1);
        assert!(result
            .body
            .outputs
            .iter()
            .any(|o| o.address == addr(3) && o.value.coin > 0));
    }

    #[test]
    fn insufficient_funds_is_reported_as_balance_insufficient() {
        let params = ProtocolParameters::default();
        let mut body = TransactionBody::default();
        body.outputs
            .push(TransactionOutput::new(addr(2), Value::from_coin(50_000_000)));

        let utxos = UtxoSet::new();
        let selector = LargestFirst;
        let evaluator = NoopEvaluator;

        let result = balance_transaction(BalanceRequest {
            body,
            witness_set: WitnessSet::default(),
            utxos: &utxos,
            available_inputs: vec![utxo(0, 1_000_000)],
            change_address: addr(3),
            collateral_change_address: None,
            available_collateral: vec![],
            params: &params,
            selector: &selector,
            evaluator: &evaluator,
        });

        assert!(result.is_err());
    }
}
