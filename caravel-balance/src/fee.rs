//! Component E: fee estimator (§4.E), grounded on the source's
//! `compute_vk_witnesses_cost` and `cbor_array_header_size`.

use crate::model::{ExUnits, Redeemer};
use crate::{BalanceError, ProtocolParameters};

/// The ledger's `RefScriptCostStride` parameters (§4.E): the tier size in
/// bytes and the multiplier applied once per full tier.
const REF_SCRIPT_TIER_SIZE: u64 = 25_600;
const REF_SCRIPT_TIER_MULTIPLIER_NUM: u64 = 12;
const REF_SCRIPT_TIER_MULTIPLIER_DEN: u64 = 10;

/// `base + ref + exec` of §4.E, excluding the anticipated witness cost
/// (added separately by the balancer via [`vk_witness_cost`]).
pub fn compute_transaction_fee(
    serialized_tx_len: usize,
    reference_script_bytes: u64,
    redeemers: &[Redeemer],
    params: &ProtocolParameters,
) -> Result<u64, BalanceError> {
    let base = (serialized_tx_len as u64)
        .checked_mul(params.min_fee_coefficient)
        .and_then(|x| x.checked_add(params.min_fee_constant))
        .ok_or(BalanceError::ArithmeticOverflow)?;

    let ref_cost = tiered_ref_script_cost(
        reference_script_bytes,
        params.min_fee_ref_script_cost_per_byte,
    )?;

    let mut exec: u64 = 0;
    for redeemer in redeemers {
        exec = exec
            .checked_add(ex_unit_cost(redeemer.ex_units, params)?)
            .ok_or(BalanceError::ArithmeticOverflow)?;
    }

    base.checked_add(ref_cost)
        .and_then(|x| x.checked_add(exec))
        .ok_or(BalanceError::ArithmeticOverflow)
}

/// Applies the tier multiplier once per full 25 600-byte tier and linearly
/// inside the current tier, per §4.E.
fn tiered_ref_script_cost(total_bytes: u64, cost_per_byte: u64) -> Result<u64, BalanceError> {
    let mut remaining = total_bytes;
    let mut price_num = 1u64;
    let mut price_den = 1u64;
    let mut total: u64 = 0;

    while remaining > 0 {
        let tier_bytes = remaining.min(REF_SCRIPT_TIER_SIZE);

        let tier_cost = tier_bytes
            .checked_mul(cost_per_byte)
            .and_then(|x| x.checked_mul(price_num))
            .ok_or(BalanceError::ArithmeticOverflow)?;
        let tier_cost = ceil_div(tier_cost, price_den)?;

        total = total
            .checked_add(tier_cost)
            .ok_or(BalanceError::ArithmeticOverflow)?;

        remaining -= tier_bytes;

        price_num = price_num
            .checked_mul(REF_SCRIPT_TIER_MULTIPLIER_NUM)
            .ok_or(BalanceError::ArithmeticOverflow)?;
        price_den = price_den
            .checked_mul(REF_SCRIPT_TIER_MULTIPLIER_DEN)
            .ok_or(BalanceError::ArithmeticOverflow)?;
    }

    Ok(total)
}

fn ex_unit_cost(ex_units: ExUnits, params: &ProtocolParameters) -> Result<u64, BalanceError> {
    let mem_cost = ceil_div(
        (ex_units.mem as u128 * params.ex_unit_price_mem_numerator as u128) as u64,
        params.ex_unit_price_mem_denominator,
    )?;
    let step_cost = ceil_div(
        (ex_units.steps as u128 * params.ex_unit_price_step_numerator as u128) as u64,
        params.ex_unit_price_step_denominator,
    )?;
    mem_cost
        .checked_add(step_cost)
        .ok_or(BalanceError::ArithmeticOverflow)
}

fn ceil_div(numerator: u64, denominator: u64) -> Result<u64, BalanceError> {
    if denominator == 0 {
        return Err(BalanceError::ArithmeticOverflow);
    }
    numerator
        .checked_add(denominator - 1)
        .map(|x| x / denominator)
        .ok_or(BalanceError::ArithmeticOverflow)
}

/// CBOR definite-length array header size in bytes, bucketed by element
/// count (§4.E): 1 byte up to 23 elements, 2 up to 255, 3 up to 65535,
/// otherwise 5 (32-bit length prefix; the ledger never needs the 9-byte
/// 64-bit form for witness counts).
pub fn cbor_array_header_size(count: usize) -> u64 {
    match count {
        0..=23 => 1,
        24..=255 => 2,
        256..=65_535 => 3,
        _ => 5,
    }
}

/// The anticipated verification-key-witness cost, added separately by the
/// balancer (§4.G): 3 tag bytes, the array header, and 101 bytes per
/// witness (32-byte vkey + 64-byte signature + 5-byte envelope).
pub fn vk_witness_cost(signer_count: usize, min_fee_coefficient: u64) -> Result<u64, BalanceError> {
    let per_witness_bytes = 101u64
        .checked_mul(signer_count as u64)
        .ok_or(BalanceError::ArithmeticOverflow)?;

    let total_bytes = 3u64
        .checked_add(cbor_array_header_size(signer_count))
        .and_then(|x| x.checked_add(per_witness_bytes))
        .ok_or(BalanceError::ArithmeticOverflow)?;

    total_bytes
        .checked_mul(min_fee_coefficient)
        .ok_or(BalanceError::ArithmeticOverflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbor_array_header_size_buckets() {
        assert_eq!(cbor_array_header_size(0), 1);
        assert_eq!(cbor_array_header_size(23), 1);
        assert_eq!(cbor_array_header_size(24), 2);
        assert_eq!(cbor_array_header_size(255), 2);
        assert_eq!(cbor_array_header_size(256), 3);
        assert_eq!(cbor_array_header_size(70_000), 5);
    }

    #[test]
    fn vk_witness_cost_matches_the_formula_for_small_signer_counts() {
        let cost = vk_witness_cost(2, 44).unwrap();
        // 3 + header(1) + 101*2 = 206 bytes, * 44
        assert_eq!(cost, 206 * 44);
    }

    #[test]
    fn tiered_ref_script_cost_is_linear_within_a_single_tier() {
        let cost = tiered_ref_script_cost(1_000, 15).unwrap();
        assert_eq!(cost, 1_000 * 15);
    }

    #[test]
    fn tiered_ref_script_cost_applies_multiplier_across_tiers() {
        let single_tier = tiered_ref_script_cost(REF_SCRIPT_TIER_SIZE, 15).unwrap();
        let two_tiers = tiered_ref_script_cost(REF_SCRIPT_TIER_SIZE + 1, 15).unwrap();
        assert!(two_tiers > single_tier);
    }

    #[test]
    fn base_fee_matches_size_times_coefficient_plus_constant() {
        let params = ProtocolParameters::default();
        let fee = compute_transaction_fee(250, 0, &[], &params).unwrap();
        assert_eq!(fee, 250 * params.min_fee_coefficient + params.min_fee_constant);
    }
}
