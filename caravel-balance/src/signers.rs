//! Component D: required-signers extractor (§4.D).
//!
//! Grounded on the source's `unique_signers.c`, which scans the same five
//! contributor categories and collapses them into a set. Here the
//! collapsing is `BTreeSet` construction itself, so permutation-invariance
//! (§8 Unique-signers) holds by construction rather than by an explicit
//! dedup pass.

use std::collections::BTreeSet;

use pallas_addresses::{Address, ShelleyDelegationPart, ShelleyPaymentPart};

use crate::model::{AddrKeyhash, Credential, TransactionBody, UtxoSet, Voter};
use crate::BalanceError;

/// Derives the set of 28-byte key hashes whose signatures the ledger will
/// check for `body`. `utxos` must resolve every input referenced by the
/// body, both spending and collateral.
pub fn unique_required_signers(
    body: &TransactionBody,
    utxos: &UtxoSet,
) -> Result<BTreeSet<AddrKeyhash>, BalanceError> {
    let mut signers = BTreeSet::new();

    // 1. explicit required-signers field.
    signers.extend(body.required_signers.iter().copied());

    // 2. spending and collateral inputs' payment credentials.
    for input in body.inputs.iter().chain(body.collateral.iter()) {
        let output = utxos
            .get(input)
            .ok_or_else(|| BalanceError::ElementNotFound(format!("{:?}", input)))?;

        if let Some(hash) = payment_key_hash(&output.address) {
            signers.insert(hash);
        }
    }

    // 3. withdrawal reward-address credentials.
    for reward_account in body.withdrawals.keys() {
        if let Some(hash) = reward_account_key_hash(reward_account) {
            signers.insert(hash);
        }
    }

    // 4. certificate credentials.
    for cert in &body.certificates {
        if let Some(credential) = cert.signing_credential() {
            if let Some(hash) = credential.key_hash() {
                signers.insert(hash);
            }
        }
        signers.extend(cert.pool_signers());
    }

    // 5. voting-procedure voters.
    for (voter, _) in body.voting_procedures.keys() {
        if let Some(hash) = voter.key_hash() {
            signers.insert(hash);
        }
    }

    Ok(signers)
}

/// Extracts the payment-part key hash for the address shapes §4.D item 2
/// names: Base-PaymentKey-StakeKey, Base-PaymentKey-StakeScript,
/// Pointer-Key, Enterprise-Key. Byron, reward, and script-paying addresses
/// contribute nothing.
fn payment_key_hash(address: &Address) -> Option<AddrKeyhash> {
    match address {
        Address::Shelley(shelley) => match shelley.payment() {
            ShelleyPaymentPart::Key(hash) => Some(*hash),
            ShelleyPaymentPart::Script(_) => None,
        },
        Address::Byron(_) | Address::Stake(_) => None,
    }
}

fn reward_account_key_hash(reward_account: &[u8]) -> Option<AddrKeyhash> {
    let address = Address::from_bytes(reward_account).ok()?;
    match address {
        Address::Stake(stake) => match stake_credential(&stake) {
            Credential::KeyHash(hash) => Some(hash),
            Credential::ScriptHash(_) => None,
        },
        _ => None,
    }
}

fn stake_credential(stake: &pallas_addresses::StakeAddress) -> Credential {
    use pallas_addresses::StakePayload;
    match stake.payload() {
        StakePayload::Stake(hash) => Credential::KeyHash(*hash),
        StakePayload::Script(hash) => Credential::ScriptHash(*hash),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Certificate, GovActionId, TransactionInput, TransactionOutput, Utxo, Vote,
        VotingProcedure,
    };
    use crate::value::Value;
    use pallas_addresses::{Network, ShelleyAddress};
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

    #[test]
    fn extracts_distinct_sources_as_a_deduplicated_set() {
        let mut body = TransactionBody::default();

        let input1 = TransactionInput {
            transaction_id: Hash::new([1; 32]),
            index: 0,
        };
        let input2 = TransactionInput {
            transaction_id: Hash::new([2; 32]),
            index: 0,
        };
        body.inputs.insert(input1.clone());
        body.inputs.insert(input2.clone());

        body.certificates.push(Certificate::PoolRegistration {
            operator: Hash::new([3; 28]),
            pool_owners: vec![Hash::new([4; 28])],
        });
        body.certificates.push(Certificate::StakeDelegation(
            Credential::KeyHash(Hash::new([5; 28])),
            Hash::new([9; 28]),
        ));

        let mut utxos = UtxoSet::new();
        utxos.insert(Utxo {
            input: input1,
            output: TransactionOutput::new(shelley_key_addr(1, 50), Value::from_coin(10_000_000)),
        });
        utxos.insert(Utxo {
            input: input2,
            output: TransactionOutput::new(
                shelley_script_payment_addr(6, 51),
                Value::from_coin(10_000_000),
            ),
        });

        let signers = unique_required_signers(&body, &utxos).unwrap();

        assert_eq!(
            signers,
            [
                Hash::new([1; 28]),
                Hash::new([3; 28]),
                Hash::new([4; 28]),
                Hash::new([5; 28]),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn missing_resolution_is_an_element_not_found_error() {
        let mut body = TransactionBody::default();
        body.inputs.insert(TransactionInput {
            transaction_id: Hash::new([7; 32]),
            index: 0,
        });

        let utxos = UtxoSet::new();
        assert!(matches!(
            unique_required_signers(&body, &utxos),
            Err(BalanceError::ElementNotFound(_))
        ));
    }

    #[test]
    fn voting_procedure_voter_contributes_a_signer() {
        let mut body = TransactionBody::default();
        body.voting_procedures.insert(
            (
                Voter::DRepKey(Hash::new([8; 28])),
                GovActionId {
                    transaction_id: Hash::new([0; 32]),
                    action_index: 0,
                },
            ),
            VotingProcedure {
                vote: Vote::Yes,
                anchor: None,
            },
        );

        let utxos = UtxoSet::new();
        let signers = unique_required_signers(&body, &utxos).unwrap();
        assert!(signers.contains(&Hash::new([8; 28])));
    }
}
