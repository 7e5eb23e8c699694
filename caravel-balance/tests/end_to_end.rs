//! End-to-end balancing scenarios, one per distinct path through the engine.

use std::collections::BTreeSet;

use pallas_addresses::{Address, Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};
use caravel_balance::balancer::{balance_transaction, BalanceRequest};
use caravel_balance::evaluator::{FixedEvaluator, NoopEvaluator};
use caravel_balance::model::{
    Certificate, Credential, ExUnits, Redeemer, RedeemerTag, TransactionBody, TransactionInput,
    TransactionOutput, Utxo, UtxoSet, WitnessSet,
};
use caravel_balance::selector::LargestFirst;
use caravel_balance::signers::unique_required_signers;
use caravel_balance::value::Value;
use caravel_balance::ProtocolParameters;
use pallas_crypto::hash::Hash;

fn shelley_key_addr(payment: u8, stake: u8) -> Address {
    Address::Shelley(ShelleyAddress::new(
        Network::Testnet,
        ShelleyPaymentPart::Key(Hash::new([payment; 28])),
        ShelleyDelegationPart::Key(Hash::new([stake; 28])),
    ))
}

fn shelley_script_payment_addr(script: u8, stake: u8) -> Address {
    Address::Shelley(ShelleyAddress::new(
        Network::Testnet,
        ShelleyPaymentPart::Script(Hash::new([script; 28])),
        ShelleyDelegationPart::Key(Hash::new([stake; 28])),
    ))
}

fn input(txid_byte: u8, index: u64) -> TransactionInput {
    TransactionInput {
        transaction_id: Hash::new([txid_byte; 32]),
        index,
    }
}

fn ada_utxo(txid_byte: u8, address: Address, coin: i64) -> Utxo {
    Utxo {
        input: input(txid_byte, 0),
        output: TransactionOutput::new(address, Value::from_coin(coin)),
    }
}

/// Scenario 1: a single ada-only input covers a single ada-only payment,
/// with the remainder returned as an ordinary change output.
#[test]
fn pure_ada_payment_balances_with_a_change_output() {
    let params = ProtocolParameters::default();
    let address_a = shelley_key_addr(1, 1);
    let address_b = shelley_key_addr(2, 2);

    let funding = ada_utxo(0, address_a.clone(), 10_000_000);
    let mut utxos = UtxoSet::new();
    utxos.insert(funding.clone());

    let mut body = TransactionBody::default();
    body.outputs
        .push(TransactionOutput::new(address_b.clone(), Value::from_coin(2_000_000)));

    let selector = LargestFirst;
    let evaluator = NoopEvaluator;

    let result = balance_transaction(BalanceRequest {
        body,
        witness_set: WitnessSet::default(),
        utxos: &utxos,
        available_inputs: vec![funding],
        change_address: address_a.clone(),
        collateral_change_address: None,
        available_collateral: vec![],
        params: &params,
        selector: &selector,
        evaluator: &evaluator,
    })
    .expect("a single 10 ada input should cover a 2 ada payment plus fee");

    assert_eq!(result.body.inputs.len(), 1);
    assert_eq!(result.body.outputs.len(), 2);
    assert!(result.fee > 0 && result.fee < 1_000_000);

    let change = result
        .body
        .outputs
        .iter()
        .find(|o| o.address == address_a)
        .expect("change output to the source address");
    assert_eq!(change.value.coin, 10_000_000 - 2_000_000 - result.fee as i64);
}

/// Scenario 2: spending a UTxO that carries a native-token balance must
/// return that token in the change output, and the change coin must clear
/// the (now larger) min-UTxO threshold for a multi-asset output.
#[test]
fn multi_asset_input_returns_its_token_in_change() {
    let params = ProtocolParameters::default();
    let address_a = shelley_key_addr(1, 1);
    let address_b = shelley_key_addr(2, 2);
    let policy = Hash::new([9u8; 28]);

    let mut funding_value = Value::from_coin(10_000_000);
    funding_value
        .assets
        .entry(policy)
        .or_default()
        .insert(b"tkn".to_vec(), 1);

    let funding = Utxo {
        input: input(0, 0),
        output: TransactionOutput::new(address_a.clone(), funding_value),
    };
    let mut utxos = UtxoSet::new();
    utxos.insert(funding.clone());

    let mut body = TransactionBody::default();
    body.outputs
        .push(TransactionOutput::new(address_b, Value::from_coin(2_000_000)));

    let selector = LargestFirst;
    let evaluator = NoopEvaluator;

    let result = balance_transaction(BalanceRequest {
        body,
        witness_set: WitnessSet::default(),
        utxos: &utxos,
        available_inputs: vec![funding],
        change_address: address_a.clone(),
        collateral_change_address: None,
        available_collateral: vec![],
        params: &params,
        selector: &selector,
        evaluator: &evaluator,
    })
    .expect("the token-carrying UTxO should balance against an ada-only payment");

    let change = result
        .body
        .outputs
        .iter()
        .find(|o| o.address == address_a)
        .expect("change output");

    assert_eq!(
        change.value.assets.get(&policy).and_then(|m| m.get(b"tkn".as_slice())),
        Some(&1)
    );

    let change_size = caravel_balance::codec::output_size(change).unwrap();
    let min = caravel_balance::value::compute_min_ada_required(change_size, params.ada_per_utxo_byte)
        .unwrap();
    assert!(change.value.coin >= min as i64);
}

/// Scenario 3: a scripted spend needs collateral sized at
/// `ceil(fee * collateral_percentage / 100)`, drawn from a dedicated
/// collateral UTxO, with any excess returned via collateral-return.
#[test]
fn scripted_spend_adds_collateral_sized_from_the_fee() {
    let params = ProtocolParameters {
        collateral_percentage: 150,
        ..ProtocolParameters::default()
    };
    let address_a = shelley_key_addr(1, 1);
    let address_b = shelley_key_addr(2, 2);
    let script_payment_addr = shelley_script_payment_addr(7, 1);

    let script_input = Utxo {
        input: input(3, 0),
        output: TransactionOutput::new(script_payment_addr, Value::from_coin(10_000_000)),
    };
    let collateral_input = ada_utxo(4, address_a.clone(), 20_000_000);

    let mut utxos = UtxoSet::new();
    utxos.insert(script_input.clone());
    utxos.insert(collateral_input.clone());

    let mut body = TransactionBody::default();
    body.inputs.insert(script_input.input.clone());
    body.outputs
        .push(TransactionOutput::new(address_b, Value::from_coin(2_000_000)));

    let mut witness_set = WitnessSet::default();
    witness_set.redeemers.push(Redeemer {
        tag: RedeemerTag::Spend,
        index: 0,
        data: vec![],
        ex_units: ExUnits { mem: 0, steps: 0 },
    });

    let selector = LargestFirst;
    let evaluator = FixedEvaluator(ExUnits {
        mem: 1_000,
        steps: 500_000,
    });

    let result = balance_transaction(BalanceRequest {
        body,
        witness_set,
        utxos: &utxos,
        available_inputs: vec![script_input],
        change_address: address_a.clone(),
        collateral_change_address: Some(address_a),
        available_collateral: vec![collateral_input],
        params: &params,
        selector: &selector,
        evaluator: &evaluator,
    })
    .expect("a scripted spend with collateral available should balance");

    assert_eq!(result.body.collateral.len(), 1);
    let expected_total_collateral = (result.fee * 150 + 99) / 100;
    assert_eq!(result.body.total_collateral, Some(expected_total_collateral));
}

/// Scenario 4: required signers are the deduplicated union of the five
/// contributor categories, independent of input order.
#[test]
fn required_signers_are_the_union_of_all_contributor_categories() {
    let h1 = Hash::new([1u8; 28]);
    let h2 = Hash::new([2u8; 28]);
    let h3 = Hash::new([3u8; 28]);
    let h4 = Hash::new([4u8; 28]);
    let h5 = Hash::new([5u8; 28]);

    let base_key_key = shelley_key_addr(1, 50);
    let enterprise_script = shelley_script_payment_addr(6, 51);
    let base_script_key = shelley_script_payment_addr(7, 52);

    let in1 = input(10, 0);
    let in2 = input(11, 0);
    let in3 = input(12, 0);

    let mut utxos = UtxoSet::new();
    utxos.insert(Utxo {
        input: in1.clone(),
        output: TransactionOutput::new(base_key_key, Value::from_coin(5_000_000)),
    });
    utxos.insert(Utxo {
        input: in2.clone(),
        output: TransactionOutput::new(enterprise_script, Value::from_coin(5_000_000)),
    });
    utxos.insert(Utxo {
        input: in3.clone(),
        output: TransactionOutput::new(base_script_key, Value::from_coin(5_000_000)),
    });

    let mut body = TransactionBody::default();
    body.inputs = BTreeSet::from([in1, in2, in3]);

    // Reward-account header for a Testnet stake-key address (type id 0b1110),
    // built directly since `StakeAddress` exposes no public constructor.
    let mut reward_account = vec![0b1110_0000u8];
    reward_account.extend_from_slice(h2.as_ref());
    body.withdrawals.insert(reward_account, 1_000_000);

    body.certificates.push(Certificate::PoolRegistration {
        operator: h3,
        pool_owners: vec![h4],
    });
    body.certificates
        .push(Certificate::StakeDelegation(Credential::KeyHash(h5), Hash::new([99; 28])));

    let signers = unique_required_signers(&body, &utxos).unwrap();
    assert_eq!(signers, BTreeSet::from([h1, h2, h3, h4, h5]));
}

/// Scenario 6: when even the full available UTxO pool can't cover the
/// requested outputs, the engine reports `BalanceInsufficient` rather than
/// looping forever or silently under-funding the transaction.
#[test]
fn insufficient_funds_reports_balance_insufficient() {
    let params = ProtocolParameters::default();
    let address_a = shelley_key_addr(1, 1);
    let address_b = shelley_key_addr(2, 2);

    let funding = ada_utxo(0, address_a.clone(), 2_000_000);
    let mut utxos = UtxoSet::new();
    utxos.insert(funding.clone());

    let mut body = TransactionBody::default();
    body.outputs
        .push(TransactionOutput::new(address_b, Value::from_coin(5_000_000)));

    let selector = LargestFirst;
    let evaluator = NoopEvaluator;

    let result = balance_transaction(BalanceRequest {
        body,
        witness_set: WitnessSet::default(),
        utxos: &utxos,
        available_inputs: vec![funding],
        change_address: address_a,
        collateral_change_address: None,
        available_collateral: vec![],
        params: &params,
        selector: &selector,
        evaluator: &evaluator,
    });

    assert!(matches!(
        result,
        Err(caravel_balance::BalanceError::SelectionFailed(_))
            | Err(caravel_balance::BalanceError::BalanceInsufficient)
    ));
}
