//! The script-evaluation boundary (§1 Non-goals: "the *choice* of script
//! evaluator"). The engine calls an evaluator through [`ScriptEvaluator`];
//! it never interprets Plutus itself.

use crate::model::{ExUnits, Redeemer, Utxo};
use crate::BalanceError;

pub trait ScriptEvaluator {
    /// Evaluates every redeemer in `redeemers` against the candidate input
    /// set `selection`, returning updated execution-unit budgets in the same
    /// order. Redeemer indices are stable across the call: the evaluator
    /// sees the same candidate set the balancer is about to install, per
    /// §4.G step 5.
    fn evaluate(
        &self,
        redeemers: &[Redeemer],
        selection: &[Utxo],
    ) -> Result<Vec<ExUnits>, BalanceError>;
}

/// Returns the redeemers' own execution units unchanged. Useful for tests
/// and for callers who pre-compute ex-units out of band.
pub struct NoopEvaluator;

impl ScriptEvaluator for NoopEvaluator {
    fn evaluate(
        &self,
        redeemers: &[Redeemer],
        _selection: &[Utxo],
    ) -> Result<Vec<ExUnits>, BalanceError> {
        Ok(redeemers.iter().map(|r| r.ex_units).collect())
    }
}

/// Returns a fixed execution-unit budget for every redeemer, regardless of
/// its declared units. Used by the scripted-spend end-to-end scenario
/// (§8 scenario 3) to stand in for a real Plutus evaluator.
pub struct FixedEvaluator(pub ExUnits);

impl ScriptEvaluator for FixedEvaluator {
    fn evaluate(
        &self,
        redeemers: &[Redeemer],
        _selection: &[Utxo],
    ) -> Result<Vec<ExUnits>, BalanceError> {
        Ok(redeemers.iter().map(|_| self.0).collect())
    }
}
