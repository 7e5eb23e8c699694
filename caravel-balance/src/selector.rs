//! The coin-selection boundary (§1 Non-goals: "the *choice* of coin-selection
//! algorithm"). The engine calls a selector through [`CoinSelector`]; a
//! [`LargestFirst`] reference implementation ships for tests and simple
//! callers.

use crate::model::{TransactionInput, Utxo, UtxoSet};
use crate::value::Value;
use crate::BalanceError;

/// The result of a selection call: the UTxOs chosen and the pool of
/// available UTxOs that remain unselected.
pub struct Selection {
    pub selected: Vec<Utxo>,
    pub remaining: Vec<Utxo>,
}

pub trait CoinSelector {
    /// Chooses UTxOs from `pre_selected` (consumed first, in order) and then
    /// `available` until their summed value covers `target` coin-for-coin
    /// and asset-for-asset. Returns [`BalanceError::SelectionFailed`] (or a
    /// caller-defined variant wrapped the same way) when `target` cannot be
    /// met from the supplied pools.
    fn select(
        &self,
        pre_selected: &[Utxo],
        available: &[Utxo],
        target: &Value,
    ) -> Result<Selection, BalanceError>;
}

/// Selects UTxOs ordered by descending coin value until the coin component
/// of `target` is met, then appends the remainder verbatim. Multi-asset
/// targets beyond coin are satisfied opportunistically from whatever the
/// coin-ordered pass happened to pick up; a production selector would track
/// per-asset shortfall explicitly, but the engine's contract with
/// [`CoinSelector`] only requires the trait boundary, not a specific
/// algorithm (§1).
pub struct LargestFirst;

impl CoinSelector for LargestFirst {
    fn select(
        &self,
        pre_selected: &[Utxo],
        available: &[Utxo],
        target: &Value,
    ) -> Result<Selection, BalanceError> {
        let mut selected: Vec<Utxo> = pre_selected.to_vec();
        let mut pool: Vec<Utxo> = available.to_vec();
        pool.sort_by(|a, b| b.output.value.coin.cmp(&a.output.value.coin));

        let mut accumulated = sum_values(&selected)?;
        let mut remaining = Vec::new();

        for utxo in pool {
            if covers(&accumulated, target) {
                remaining.push(utxo);
                continue;
            }
            accumulated = accumulated.add(&utxo.output.value)?;
            selected.push(utxo);
        }

        if !covers(&accumulated, target) {
            return Err(BalanceError::SelectionFailed(
                "available UTxOs do not cover the requested target value".to_string(),
            ));
        }

        Ok(Selection {
            selected,
            remaining,
        })
    }
}

fn sum_values(utxos: &[Utxo]) -> Result<Value, BalanceError> {
    let mut total = Value::zero();
    for utxo in utxos {
        total = total.add(&utxo.output.value)?;
    }
    Ok(total)
}

/// `accumulated` covers `target` if its coin is at least as large and every
/// asset quantity in `target` is matched or exceeded.
fn covers(accumulated: &Value, target: &Value) -> bool {
    if accumulated.coin < target.coin {
        return false;
    }
    for (policy, policy_map) in &target.assets {
        for (name, qty) in policy_map {
            let have = accumulated
                .assets
                .get(policy)
                .and_then(|m| m.get(name))
                .copied()
                .unwrap_or(0);
            if have < *qty {
                return false;
            }
        }
    }
    true
}

/// Resolves a set of inputs against a UTxO table, failing with
/// `ElementNotFound` if any input is unresolvable.
pub fn resolve(inputs: &[TransactionInput], utxos: &UtxoSet) -> Result<Vec<Utxo>, BalanceError> {
    inputs
        .iter()
        .map(|input| {
            utxos
                .get(input)
                .cloned()
                .map(|output| Utxo {
                    input: input.clone(),
                    output,
                })
                .ok_or_else(|| BalanceError::ElementNotFound(format!("{:?}", input)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionOutput;
    use pallas_addresses::{Address, Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};
    use pallas_crypto::hash::Hash;

    fn addr() -> Address {
        Address::Shelley(ShelleyAddress::new(
            Network::Testnet,
            ShelleyPaymentPart::Key(Hash::new([1; 28])),
            ShelleyDelegationPart::Key(Hash::new([2; 28])),
        ))
    }

    fn utxo(idx: u64, coin: i64) -> Utxo {
        Utxo {
            input: TransactionInput {
                transaction_id: Hash::new([idx as u8; 32]),
                index: idx,
            },
            output: TransactionOutput::new(addr(), Value::from_coin(coin)),
        }
    }

    #[test]
    fn largest_first_picks_biggest_utxos_until_covered() {
        let pool = vec![utxo(0, 1_000_000), utxo(1, 10_000_000), utxo(2, 500_000)];
        let selection = LargestFirst
            .select(&[], &pool, &Value::from_coin(5_000_000))
            .unwrap();

        assert_eq!(selection.selected.len(), 1);
        assert_eq!(selection.selected[0].output.value.coin, 10_000_000);
        assert_eq!(selection.remaining.len(), 2);
    }

    #[test]
    fn selection_fails_when_pool_is_insufficient() {
        let pool = vec![utxo(0, 1_000_000)];
        let result = LargestFirst.select(&[], &pool, &Value::from_coin(5_000_000));
        assert!(matches!(result, Err(BalanceError::SelectionFailed(_))));
    }
}
