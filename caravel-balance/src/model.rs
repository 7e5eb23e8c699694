//! Owned, lifetime-free domain model for the balancing engine.
//!
//! A borrowed ledger-CBOR decode tree can carry a `KeepRaw<'b, T>`
//! cached-bytes field tied to the buffer it was parsed from, which cannot
//! represent a value the balancer builds or mutates in place. The engine
//! therefore works against the owned types below, the way
//! `pallas-txbuilder`'s `StagingTransaction` works against its own model
//! rather than `pallas_primitives::babbage` directly, and only formats as
//! CBOR at the encode/decode boundary (see `crate::codec`); the cached-bytes
//! invariant is reproduced here via the owned [`Cached<T>`] wrapper below.

use std::collections::{BTreeMap, BTreeSet};

use pallas_addresses::Address;
use pallas_crypto::hash::Hash;

use crate::value::Value;
use crate::BalanceError;

/// Decodes an address from its raw on-chain byte form, wrapping the
/// underlying parse failure as a [`BalanceError::MalformedCbor`] so the
/// codec's error taxonomy stays uniform across record types.
pub fn address_from_bytes(bytes: &[u8]) -> Result<Address, BalanceError> {
    Address::from_bytes(bytes).map_err(|e| BalanceError::MalformedCbor(e.to_string()))
}

/// A value recovered from CBOR together with the exact bytes it was parsed
/// from (§9's cached-bytes invariant), so re-encoding an untouched value
/// reproduces its original bytes even if they weren't canonical. The owned
/// model's answer to `pallas_codec::utils::KeepRaw<'b, T>`, which cannot be
/// used here directly since it borrows from the decode buffer; this wrapper
/// owns a copy of the slice instead, at the cost of one allocation per
/// decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<T> {
    pub value: T,
    raw: Vec<u8>,
}

impl<T> Cached<T> {
    pub fn new(value: T, raw: Vec<u8>) -> Self {
        Self { value, raw }
    }

    /// The bytes this value was decoded from, verbatim.
    pub fn to_cbor(&self) -> Vec<u8> {
        self.raw.clone()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for Cached<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for Cached<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

pub type AddrKeyhash = Hash<28>;
pub type ScriptHash = Hash<28>;
pub type PolicyId = Hash<28>;
pub type DatumHash = Hash<32>;
pub type TransactionId = Hash<32>;
pub type RewardAccount = Vec<u8>;
pub type AssetName = Vec<u8>;

/// A credential: either a verification-key hash or a script hash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Credential {
    KeyHash(AddrKeyhash),
    ScriptHash(ScriptHash),
}

impl Credential {
    pub fn key_hash(&self) -> Option<AddrKeyhash> {
        match self {
            Credential::KeyHash(h) => Some(*h),
            Credential::ScriptHash(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionInput {
    pub transaction_id: TransactionId,
    pub index: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatumOption {
    Hash(DatumHash),
    Inline(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOutput {
    pub address: Address,
    pub value: Value,
    pub datum: Option<DatumOption>,
    pub script_ref: Option<Vec<u8>>,
}

impl TransactionOutput {
    pub fn new(address: Address, value: Value) -> Self {
        Self {
            address,
            value,
            datum: None,
            script_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub input: TransactionInput,
    pub output: TransactionOutput,
}

/// A deposit-or-refund amount attached to a certificate. Certificates
/// predating explicit amounts (pre-Conway) carry `None`, in which case the
/// implicit-coin accountant falls back to the current protocol parameter.
pub type CertCoin = Option<u64>;

/// The 19 certificate constructors of §3, reduced to the fields the
/// balancing engine actually consumes: the credential(s) that contribute a
/// required signer, and the deposit/refund amount that feeds
/// `compute_implicit_coin`. Full ledger fidelity for certificate-specific
/// payloads (pool relays, anchors, ...) lives in the CBOR codec
/// (`crate::codec`), not in this arithmetic-facing model.
#[derive(Debug, Clone, PartialEq)]
pub enum Certificate {
    StakeRegistration(Credential),
    StakeDeregistration(Credential),
    StakeDelegation(Credential, ScriptHash),
    PoolRegistration {
        operator: ScriptHash,
        pool_owners: Vec<AddrKeyhash>,
    },
    PoolRetirement(ScriptHash),
    GenesisKeyDelegation,
    MoveInstantaneousRewards,
    Reg(Credential, CertCoin),
    UnReg(Credential, CertCoin),
    VoteDeleg(Credential),
    StakeVoteDeleg(Credential, ScriptHash),
    StakeRegDeleg(Credential, ScriptHash, CertCoin),
    VoteRegDeleg(Credential, CertCoin),
    StakeVoteRegDeleg(Credential, ScriptHash, CertCoin),
    AuthCommitteeHot(Credential, Credential),
    ResignCommitteeCold(Credential),
    RegDRepCert(Credential, CertCoin),
    UnRegDRepCert(Credential, CertCoin),
    UpdateDRepCert(Credential),
}

impl Certificate {
    /// The deposit this certificate adds (positive) when present in the
    /// body, per §4.C. `None` when the certificate is not deposit-bearing.
    pub fn deposit(&self) -> Option<CertCoin> {
        match self {
            Certificate::StakeRegistration(_) => Some(None),
            Certificate::Reg(_, amount) => Some(*amount),
            Certificate::StakeRegDeleg(_, _, amount) => Some(*amount),
            Certificate::VoteRegDeleg(_, amount) => Some(*amount),
            Certificate::StakeVoteRegDeleg(_, _, amount) => Some(*amount),
            Certificate::RegDRepCert(_, amount) => Some(*amount),
            _ => None,
        }
    }

    /// Whether this certificate releases a deposit refund, and the explicit
    /// amount it carries (`None` means fall back to the current protocol
    /// parameter), per §4.C.
    pub fn reclaim(&self) -> Option<CertCoin> {
        match self {
            Certificate::StakeDeregistration(_) => Some(None),
            Certificate::UnReg(_, amount) => Some(*amount),
            Certificate::UnRegDRepCert(_, amount) => Some(*amount),
            _ => None,
        }
    }

    /// The credential the required-signers extractor (§4.D) should pull a
    /// key-hash from for this certificate, if any.
    pub fn signing_credential(&self) -> Option<&Credential> {
        match self {
            Certificate::StakeRegistration(c) => Some(c),
            Certificate::StakeDeregistration(c) => Some(c),
            Certificate::StakeDelegation(c, _) => Some(c),
            Certificate::Reg(c, _) => Some(c),
            Certificate::UnReg(c, _) => Some(c),
            Certificate::VoteDeleg(c) => Some(c),
            Certificate::StakeVoteDeleg(c, _) => Some(c),
            Certificate::StakeRegDeleg(c, _, _) => Some(c),
            Certificate::VoteRegDeleg(c, _) => Some(c),
            Certificate::StakeVoteRegDeleg(c, _, _) => Some(c),
            Certificate::AuthCommitteeHot(cold, _) => Some(cold),
            Certificate::ResignCommitteeCold(cold) => Some(cold),
            Certificate::RegDRepCert(c, _) => Some(c),
            Certificate::UnRegDRepCert(c, _) => Some(c),
            Certificate::UpdateDRepCert(c) => Some(c),
            Certificate::PoolRegistration { .. } => None,
            Certificate::PoolRetirement(_) => None,
            Certificate::GenesisKeyDelegation => None,
            Certificate::MoveInstantaneousRewards => None,
        }
    }

    /// Pool-operator and pool-owner key hashes that contribute a required
    /// signer in addition to (or instead of) `signing_credential`.
    pub fn pool_signers(&self) -> Vec<AddrKeyhash> {
        match self {
            Certificate::PoolRegistration {
                operator,
                pool_owners,
            } => {
                let mut signers = pool_owners.clone();
                signers.push(*operator);
                signers
            }
            Certificate::PoolRetirement(operator) => vec![*operator],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    No,
    Yes,
    Abstain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VotingProcedure {
    pub vote: Vote,
    pub anchor: Option<Anchor>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Voter {
    ConstitutionalCommitteeHotKey(AddrKeyhash),
    ConstitutionalCommitteeHotScript(ScriptHash),
    DRepKey(AddrKeyhash),
    DRepScript(ScriptHash),
    StakePoolKey(AddrKeyhash),
}

impl Voter {
    pub fn key_hash(&self) -> Option<AddrKeyhash> {
        match self {
            Voter::ConstitutionalCommitteeHotKey(h) => Some(*h),
            Voter::DRepKey(h) => Some(*h),
            Voter::StakePoolKey(h) => Some(*h),
            Voter::ConstitutionalCommitteeHotScript(_) => None,
            Voter::DRepScript(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GovActionId {
    pub transaction_id: TransactionId,
    pub action_index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub url: String,
    pub data_hash: Hash<32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GovAction {
    ParameterChange,
    HardForkInitiation,
    TreasuryWithdrawals(BTreeMap<RewardAccount, u64>),
    NoConfidence,
    UpdateCommittee,
    NewConstitution,
    Information,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProposalProcedure {
    pub deposit: u64,
    pub reward_account: RewardAccount,
    pub anchor: Anchor,
    pub gov_action: GovAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeemerTag {
    Spend,
    Mint,
    Cert,
    Reward,
    Voting,
    Proposing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    pub index: u32,
    pub data: Vec<u8>,
    pub ex_units: ExUnits,
}

#[derive(Debug, Clone, Default)]
pub struct WitnessSet {
    /// Raw, pre-encoded `[vkey, signature]` pairs, kept as opaque bytes so a
    /// decoded witness set re-encodes bit-for-bit without this crate needing
    /// to model verification keys or signatures itself.
    pub vkey_witnesses: Vec<Vec<u8>>,
    pub native_scripts: Vec<Vec<u8>>,
    pub plutus_v1_scripts: Vec<Vec<u8>>,
    pub plutus_v2_scripts: Vec<Vec<u8>>,
    pub plutus_v3_scripts: Vec<Vec<u8>>,
    pub plutus_data: Vec<Vec<u8>>,
    pub redeemers: Vec<Redeemer>,
}

/// The transaction body the balancer mutates in place across its fixpoint
/// loop, per §3 and the pristine-outputs snapshot of §4.G.
#[derive(Debug, Clone, Default)]
pub struct TransactionBody {
    pub inputs: BTreeSet<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub fee: u64,
    pub ttl: Option<u64>,
    pub certificates: Vec<Certificate>,
    pub withdrawals: BTreeMap<RewardAccount, u64>,
    pub auxiliary_data_hash: Option<Hash<32>>,
    pub validity_interval_start: Option<u64>,
    pub mint: Option<Value>,
    pub script_data_hash: Option<Hash<32>>,
    pub collateral: BTreeSet<TransactionInput>,
    pub required_signers: BTreeSet<AddrKeyhash>,
    pub network_id: Option<u8>,
    pub collateral_return: Option<TransactionOutput>,
    pub total_collateral: Option<u64>,
    pub reference_inputs: BTreeSet<TransactionInput>,
    pub voting_procedures: BTreeMap<(Voter, GovActionId), VotingProcedure>,
    pub proposal_procedures: Vec<ProposalProcedure>,
    pub treasury_value: Option<u64>,
    pub donation: Option<u64>,
}

impl TransactionBody {
    pub fn has_redeemers(&self, witness_set: &WitnessSet) -> bool {
        !witness_set.redeemers.is_empty()
    }
}

/// A resolved lookup table of inputs to outputs, covering both spending and
/// collateral inputs (§4.D item 2).
#[derive(Debug, Clone, Default)]
pub struct UtxoSet(pub BTreeMap<TransactionInput, TransactionOutput>);

impl UtxoSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, utxo: Utxo) {
        self.0.insert(utxo.input, utxo.output);
    }

    pub fn get(&self, input: &TransactionInput) -> Option<&TransactionOutput> {
        self.0.get(input)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransactionInput, &TransactionOutput)> {
        self.0.iter()
    }
}

impl FromIterator<Utxo> for UtxoSet {
    fn from_iter<I: IntoIterator<Item = Utxo>>(iter: I) -> Self {
        let mut set = Self::new();
        for utxo in iter {
            set.insert(utxo);
        }
        set
    }
}
