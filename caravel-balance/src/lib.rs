//! Transaction construction and balancing engine.
//!
//! Given a partially-built transaction, a wallet of UTxOs, protocol
//! parameters, a coin selector, and a script evaluator, [`balancer::balance_transaction`]
//! produces a fully-balanced transaction ready for signature.

pub mod codec;
pub mod collateral;
pub mod evaluator;
pub mod fee;
pub mod implicit;
pub mod model;
pub mod selector;
pub mod signers;
pub mod value;

pub mod balancer;

use serde::{Deserialize, Serialize};

/// The engine's configuration surface (§3). Covers the subset of ledger
/// protocol parameters the balancer itself interprets, plus the fields
/// required for CBOR round-trip of a `ProtocolParamUpdate` even though the
/// engine never acts on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParameters {
    pub min_fee_coefficient: u64,
    pub min_fee_constant: u64,
    pub ada_per_utxo_byte: u64,
    pub collateral_percentage: u64,
    pub max_tx_size: u64,
    pub max_value_size: u64,
    pub ex_unit_price_mem_numerator: u64,
    pub ex_unit_price_mem_denominator: u64,
    pub ex_unit_price_step_numerator: u64,
    pub ex_unit_price_step_denominator: u64,
    pub min_fee_ref_script_cost_per_byte: u64,
    pub key_deposit: u64,
    pub pool_deposit: u64,
    pub drep_deposit: u64,
}

impl Default for ProtocolParameters {
    fn default() -> Self {
        Self {
            min_fee_coefficient: 44,
            min_fee_constant: 155_381,
            ada_per_utxo_byte: 4_310,
            collateral_percentage: 150,
            max_tx_size: 16_384,
            max_value_size: 5_000,
            ex_unit_price_mem_numerator: 577,
            ex_unit_price_mem_denominator: 10_000,
            ex_unit_price_step_numerator: 721,
            ex_unit_price_step_denominator: 10_000_000,
            min_fee_ref_script_cost_per_byte: 15,
            key_deposit: 2_000_000,
            pool_deposit: 500_000_000,
            drep_deposit: 500_000_000,
        }
    }
}

/// The default collateral amount (in lovelace) substituted by the
/// collateral balancer (§4.F) when the computed target is zero.
pub const DEFAULT_COLLATERAL_AMOUNT: u64 = 5_000_000;

/// The stable error surface of §6/§7, composed with the codec's own error
/// types via `#[from]`.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("malformed CBOR: {0}")]
    MalformedCbor(String),

    #[error("unexpected CBOR type encountered while decoding")]
    UnexpectedCborType,

    #[error("CBOR array has an invalid fixed length")]
    InvalidCborArraySize,

    #[error("CBOR map carries an unknown or out-of-range key")]
    InvalidCborMapKey,

    #[error("address type is not valid for this operation")]
    InvalidAddressType,

    #[error("credential type is not valid for this operation")]
    InvalidCredentialType,

    #[error("required element was not found: {0}")]
    ElementNotFound(String),

    #[error("available funds are insufficient to balance the transaction")]
    BalanceInsufficient,

    #[error("arithmetic overflow")]
    ArithmeticOverflow,

    #[error("coin selector could not satisfy the request: {0}")]
    SelectionFailed(String),

    #[error("script evaluator failed: {0}")]
    EvaluationFailed(String),
}

impl From<pallas_codec::minicbor::decode::Error> for BalanceError {
    fn from(e: pallas_codec::minicbor::decode::Error) -> Self {
        BalanceError::MalformedCbor(e.to_string())
    }
}
