//! Component A: multi-asset value arithmetic (§4.A).
//!
//! The intermediate arithmetic type carries a signed coin so that
//! subtraction can represent a deficit mid-computation (§9, Open Question 1
//! resolved in favor of a signed intermediate / unsigned public boundary).
//! `BTreeMap` gives deterministic iteration order for free; final CBOR key
//! order is still driven explicitly by the codec (§9), not by map iteration.

use std::collections::BTreeMap;

use crate::model::{AssetName, PolicyId};
use crate::BalanceError;

pub type AssetMap = BTreeMap<PolicyId, BTreeMap<AssetName, i64>>;

/// A multi-asset value used throughout the balancing loop. `coin` may be
/// negative mid-computation; call [`Value::into_non_negative`] at the
/// public `TransactionOutput`/`Mint` boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Value {
    pub coin: i64,
    pub assets: AssetMap,
}

impl Value {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_coin(coin: i64) -> Self {
        Self {
            coin,
            assets: BTreeMap::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.coin == 0 && self.assets.values().all(|m| m.values().all(|q| *q == 0))
    }

    /// Normalizes away zero-quantity asset entries and empty policy maps, per
    /// §3's zero-elision invariant.
    pub fn normalize(mut self) -> Self {
        for policy_map in self.assets.values_mut() {
            policy_map.retain(|_, qty| *qty != 0);
        }
        self.assets.retain(|_, policy_map| !policy_map.is_empty());
        self
    }

    pub fn add(&self, other: &Value) -> Result<Value, BalanceError> {
        let coin = self
            .coin
            .checked_add(other.coin)
            .ok_or(BalanceError::ArithmeticOverflow)?;

        let mut assets = self.assets.clone();
        for (policy, other_policy_map) in &other.assets {
            let policy_map = assets.entry(*policy).or_default();
            for (asset_name, qty) in other_policy_map {
                let entry = policy_map.entry(asset_name.clone()).or_insert(0);
                *entry = entry
                    .checked_add(*qty)
                    .ok_or(BalanceError::ArithmeticOverflow)?;
            }
        }

        Ok(Value { coin, assets }.normalize())
    }

    pub fn subtract(&self, other: &Value) -> Result<Value, BalanceError> {
        let negated = Value {
            coin: other.coin.checked_neg().ok_or(BalanceError::ArithmeticOverflow)?,
            assets: other
                .assets
                .iter()
                .map(|(policy, policy_map)| {
                    let negated_policy_map = policy_map
                        .iter()
                        .map(|(name, qty)| Ok((name.clone(), qty.checked_neg().ok_or(BalanceError::ArithmeticOverflow)?)))
                        .collect::<Result<BTreeMap<_, _>, BalanceError>>()?;
                    Ok((*policy, negated_policy_map))
                })
                .collect::<Result<BTreeMap<_, _>, BalanceError>>()?,
        };

        self.add(&negated)
    }

    pub fn add_coin_inplace(&mut self, coin: i64) -> Result<(), BalanceError> {
        self.coin = self
            .coin
            .checked_add(coin)
            .ok_or(BalanceError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn equals(&self, other: &Value) -> bool {
        let a = self.clone().normalize();
        let b = other.clone().normalize();
        a.coin == b.coin && a.assets == b.assets
    }

    /// Converts a signed intermediate value into the unsigned public form
    /// required at output/mint boundaries, failing if the coin or any asset
    /// quantity is negative.
    pub fn into_non_negative(self) -> Result<NonNegativeValue, BalanceError> {
        let coin: u64 = self
            .coin
            .try_into()
            .map_err(|_| BalanceError::ArithmeticOverflow)?;

        let mut assets = BTreeMap::new();
        for (policy, policy_map) in self.assets {
            let mut out = BTreeMap::new();
            for (name, qty) in policy_map {
                let qty: u64 = qty.try_into().map_err(|_| BalanceError::ArithmeticOverflow)?;
                if qty != 0 {
                    out.insert(name, qty);
                }
            }
            if !out.is_empty() {
                assets.insert(policy, out);
            }
        }

        Ok(NonNegativeValue { coin, assets })
    }
}

/// The unsigned form of [`Value`] required by any encoded `TransactionOutput`
/// or `mint` field.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NonNegativeValue {
    pub coin: u64,
    pub assets: BTreeMap<PolicyId, BTreeMap<AssetName, u64>>,
}

impl From<NonNegativeValue> for Value {
    fn from(v: NonNegativeValue) -> Self {
        Value {
            coin: v.coin as i64,
            assets: v
                .assets
                .into_iter()
                .map(|(policy, policy_map)| {
                    (
                        policy,
                        policy_map.into_iter().map(|(n, q)| (n, q as i64)).collect(),
                    )
                })
                .collect(),
        }
    }
}

/// The ledger-defined constant overhead (in bytes) added to a post-Alonzo
/// output's serialized size before multiplying by `ada_per_utxo_byte`,
/// per §4.A.
pub const MIN_UTXO_CONSTANT_OVERHEAD: u64 = 160;

/// Serializes `output` in its chosen CBOR form, adds the constant overhead,
/// and multiplies by `ada_per_utxo_byte` (§4.A). The caller supplies the
/// already-serialized output so that the same serializer used for
/// transmission drives the prediction (`crate::codec::encode_output`).
pub fn compute_min_ada_required(serialized_output_len: usize, ada_per_utxo_byte: u64) -> Result<u64, BalanceError> {
    let size = serialized_output_len as u64 + MIN_UTXO_CONSTANT_OVERHEAD;
    size.checked_mul(ada_per_utxo_byte)
        .ok_or(BalanceError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(byte: u8) -> PolicyId {
        pallas_crypto::hash::Hash::new([byte; 28])
    }

    #[test]
    fn add_combines_assets_and_elides_zero_quantities() {
        let mut a = Value::from_coin(10);
        a.assets
            .entry(policy(1))
            .or_default()
            .insert(vec![1, 2, 3], 5);

        let mut b = Value::from_coin(5);
        b.assets
            .entry(policy(1))
            .or_default()
            .insert(vec![1, 2, 3], -5);

        let sum = a.add(&b).unwrap();
        assert_eq!(sum.coin, 15);
        assert!(sum.assets.is_empty());
    }

    #[test]
    fn subtract_is_inverse_of_add() {
        let mut a = Value::from_coin(100);
        a.assets.entry(policy(9)).or_default().insert(vec![7], 3);

        let b = Value::from_coin(40);

        let diff = a.subtract(&b).unwrap();
        let back = diff.add(&b).unwrap();
        assert!(back.equals(&a));
    }

    #[test]
    fn overflow_on_coin_addition_is_reported() {
        let a = Value::from_coin(i64::MAX);
        let b = Value::from_coin(1);
        assert!(matches!(a.add(&b), Err(BalanceError::ArithmeticOverflow)));
    }

    #[test]
    fn zero_value_is_zero_after_normalize() {
        let mut v = Value::from_coin(0);
        v.assets.entry(policy(2)).or_default().insert(vec![1], 0);
        let v = v.normalize();
        assert!(v.is_zero());
    }

    #[test]
    fn into_non_negative_rejects_negative_coin() {
        let v = Value::from_coin(-1);
        assert!(v.into_non_negative().is_err());
    }
}
