//! Component F: collateral balancer (§4.F), grounded on
//! `internals/collateral.c`'s change-padding fixpoint.

use pallas_addresses::Address;

use crate::codec::output_size;
use crate::model::{TransactionOutput, Utxo};
use crate::selector::{CoinSelector, Selection};
use crate::value::{compute_min_ada_required, Value};
use crate::{BalanceError, ProtocolParameters, DEFAULT_COLLATERAL_AMOUNT};

/// The outcome of a successful collateral pass: the UTxOs selected as
/// collateral and an optional collateral-return output, per §4.F step (e).
pub struct CollateralResult {
    pub collateral_inputs: Vec<Utxo>,
    pub collateral_return: Option<TransactionOutput>,
    pub total_collateral: u64,
}

/// Runs the collateral sub-loop. A no-op (returns `Ok(None)`) when any
/// pre-condition from §4.F is unmet: no redeemers, no collateral-eligible
/// UTxOs, or no collateral-change address.
#[allow(clippy::too_many_arguments)]
pub fn set_collateral_output(
    has_redeemers: bool,
    fee: u64,
    params: &ProtocolParameters,
    available_collateral: &[Utxo],
    collateral_change_address: Option<&Address>,
    selector: &dyn CoinSelector,
) -> Result<Option<CollateralResult>, BalanceError> {
    if !has_redeemers || available_collateral.is_empty() {
        return Ok(None);
    }
    let Some(change_address) = collateral_change_address else {
        return Ok(None);
    };

    let collateral_amount = {
        let raw = fee
            .checked_mul(params.collateral_percentage)
            .ok_or(BalanceError::ArithmeticOverflow)?;
        let amount = (raw + 99) / 100;
        if amount == 0 {
            DEFAULT_COLLATERAL_AMOUNT
        } else {
            amount
        }
    };

    let mut change_padding: u64 = 0;

    loop {
        let target = Value::from_coin(
            (collateral_amount + change_padding)
                .try_into()
                .map_err(|_| BalanceError::ArithmeticOverflow)?,
        );

        let Selection { selected, .. } = selector.select(&[], available_collateral, &target)?;

        let mut accumulated = Value::zero();
        for utxo in &selected {
            accumulated = accumulated.add(&utxo.output.value)?;
        }

        let change_value = accumulated.subtract(&Value::from_coin(collateral_amount as i64))?;

        if change_value.is_zero() {
            return Ok(Some(CollateralResult {
                collateral_inputs: selected,
                collateral_return: None,
                total_collateral: collateral_amount,
            }));
        }

        let candidate_output = TransactionOutput::new(change_address.clone(), change_value.clone());
        let size = output_size(&candidate_output)?;
        let min = compute_min_ada_required(size, params.ada_per_utxo_byte)?;

        let change_coin: u64 = change_value
            .coin
            .try_into()
            .map_err(|_| BalanceError::ArithmeticOverflow)?;

        if change_coin < min {
            change_padding = change_padding
                .checked_add(min - change_coin)
                .ok_or(BalanceError::ArithmeticOverflow)?;
            continue;
        }

        return Ok(Some(CollateralResult {
            collateral_inputs: selected,
            collateral_return: Some(candidate_output),
            total_collateral: collateral_amount,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
            input: crate::model::TransactionInput {
                transaction_id: Hash::new([idx as u8; 32]),
                index: idx,
            },
            output: TransactionOutput::new(addr(1), Value::from_coin(coin)),
        }
    }

    #[test]
    fn no_op_without_redeemers() {
        let params = ProtocolParameters::default();
        let result = set_collateral_output(
            false,
            175_000,
            &params,
            &[utxo(0, 20_000_000)],
            Some(&addr(2)),
            &LargestFirst,
        )
        .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn scripted_spend_selects_collateral_and_computes_total() {
        let params = ProtocolParameters {
            collateral_percentage: 150,
            ..ProtocolParameters::default()
        };
        let fee = 175_000;
        let result = set_collateral_output(
            true,
            fee,
            &params,
            &[utxo(0, 20_000_000)],
            Some(&addr(2)),
            &LargestFirst,
        )
        .unwrap()
        .expect("collateral should be selected");

        assert_eq!(result.total_collateral, 262_500);
        assert_eq!(result.collateral_inputs.len(), 1);
        assert!(result.collateral_return.is_some());
    }
}
