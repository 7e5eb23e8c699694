//! Component B: canonical CBOR codec for the owned domain model (§4.B).
//!
//! Every §3 record type gets a symmetric `to_cbor`/`from_cbor` pair over
//! `pallas_codec::minicbor`'s `Encoder`/`Decoder`, written by hand rather than
//! via `#[derive(Encode, Decode)]`: the owned model needs legacy-shape input
//! support (pre-Alonzo tuple outputs alongside the post-Alonzo map form),
//! explicit control of canonical ascending map-key order, and the
//! cached-bytes invariant below, none of which the derive macros express.
//!
//! A value decoded with [`TransactionOutput::from_cbor`] is wrapped in
//! [`crate::model::Cached`] so that re-encoding an output nobody has touched
//! reproduces its original bytes exactly, including any non-canonical
//! encoding it happened to arrive with; this is the owned-model analogue of
//! `pallas_codec::utils::KeepRaw`, which cannot be used directly here
//! because `KeepRaw<'b, T>` borrows from the buffer it was parsed from and
//! the balancer needs to mutate and rebuild values in place.

use pallas_codec::minicbor::data::{Tag, Type};
use pallas_codec::minicbor::encode::Write;
use pallas_codec::minicbor::{Decoder, Encoder};

use crate::model::{
    Anchor, Cached, Certificate, Credential, DatumOption, ExUnits, GovAction, GovActionId,
    Redeemer, RedeemerTag, TransactionBody, TransactionInput, TransactionOutput, Vote, Voter,
    VotingProcedure, WitnessSet,
};
use crate::value::Value;
use crate::BalanceError;

/// CIP-21 canonical sets are tagged 258; pre-Conway producers may omit the
/// tag, so decode accepts either form while encode always emits it.
const SET_TAG: u64 = 258;

/// The largest length this codec will accept or emit for a CBOR array or map
/// (§4.B): matches the encoder's own `u32` length field, so a length that
/// cannot round-trip is rejected up front rather than silently truncated.
const MAX_CBOR_LEN: u64 = u32::MAX as u64;

fn checked_len(len: usize) -> Result<u64, BalanceError> {
    let len = len as u64;
    if len > MAX_CBOR_LEN {
        return Err(BalanceError::InvalidCborArraySize);
    }
    Ok(len)
}

fn expect_array_len(d: &mut Decoder<'_>, expected: u64) -> Result<(), BalanceError> {
    match d.array()? {
        Some(len) if len == expected => Ok(()),
        Some(_) | None => Err(BalanceError::InvalidCborArraySize),
    }
}

fn decode_array_len(d: &mut Decoder<'_>) -> Result<u64, BalanceError> {
    let len = d.array()?.ok_or(BalanceError::InvalidCborArraySize)?;
    if len > MAX_CBOR_LEN {
        return Err(BalanceError::InvalidCborArraySize);
    }
    Ok(len)
}

fn decode_map_len(d: &mut Decoder<'_>) -> Result<u64, BalanceError> {
    let len = d.map()?.ok_or(BalanceError::InvalidCborMapKey)?;
    if len > MAX_CBOR_LEN {
        return Err(BalanceError::InvalidCborMapKey);
    }
    Ok(len)
}

/// Consumes and discards the optional set tag (258), tolerating its absence
/// for pre-Conway encodings per §4.B's historical-decode requirement.
fn skip_optional_set_tag(d: &mut Decoder<'_>) -> Result<(), BalanceError> {
    if d.datatype()? == Type::Tag {
        let tag = d.tag()?;
        if tag != Tag::new(SET_TAG) {
            return Err(BalanceError::UnexpectedCborType);
        }
    }
    Ok(())
}

fn hash_from_bytes<const N: usize>(bytes: &[u8]) -> Result<pallas_crypto::hash::Hash<N>, BalanceError> {
    if bytes.len() != N {
        return Err(BalanceError::MalformedCbor(format!(
            "expected a {N}-byte hash, got {}",
            bytes.len()
        )));
    }
    let mut buf = [0u8; N];
    buf.copy_from_slice(bytes);
    Ok(pallas_crypto::hash::Hash::new(buf))
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Encodes a value's coin-only or coin-plus-multiasset CBOR shape, matching
/// the ledger's `value` CDDL: a bare integer when no assets are present,
/// otherwise a two-element array of `[coin, multiasset]`.
fn encode_value<W: Write>(e: &mut Encoder<W>, value: &Value) -> Result<(), BalanceError> {
    if value.assets.is_empty() {
        e.u64(value.coin.max(0) as u64)
            .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
        return Ok(());
    }

    e.array(2)
        .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
    e.u64(value.coin.max(0) as u64)
        .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
    e.map(checked_len(value.assets.len())?)
        .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;

    for (policy, policy_map) in &value.assets {
        e.bytes(policy.as_ref())
            .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
        e.map(checked_len(policy_map.len())?)
            .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
        for (name, qty) in policy_map {
            e.bytes(name)
                .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
            e.i64(*qty)
                .map_err(|_| BalanceError::MalformedCbor("value encode".into()))?;
        }
    }

    Ok(())
}

/// Decodes either form of the `value` CDDL, tolerating a bare integer
/// (pre-multiasset eras) and the two-element array form alike.
fn decode_value(d: &mut Decoder<'_>) -> Result<Value, BalanceError> {
    match d.datatype()? {
        Type::U8 | Type::U16 | Type::U32 | Type::U64 => {
            Ok(Value::from_coin(d.u64()? as i64))
        }
        Type::Array => {
            expect_array_len(d, 2)?;
            let coin = d.u64()? as i64;
            let mut value = Value::from_coin(coin);

            let policy_count = decode_map_len(d)?;
            for _ in 0..policy_count {
                let policy = hash_from_bytes(d.bytes()?)?;
                let asset_count = decode_map_len(d)?;
                let policy_map = value.assets.entry(policy).or_default();
                for _ in 0..asset_count {
                    let name = d.bytes()?.to_vec();
                    let qty = d.i64()?;
                    policy_map.insert(name, qty);
                }
            }

            Ok(value.normalize())
        }
        _ => Err(BalanceError::UnexpectedCborType),
    }
}

impl Value {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_value(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Value, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_value(&mut d)
    }
}

// ---------------------------------------------------------------------------
// TransactionInput
// ---------------------------------------------------------------------------

fn encode_input<W: Write>(e: &mut Encoder<W>, input: &TransactionInput) -> Result<(), BalanceError> {
    e.array(2)
        .map_err(|_| BalanceError::MalformedCbor("input encode".into()))?;
    e.bytes(input.transaction_id.as_ref())
        .map_err(|_| BalanceError::MalformedCbor("input encode".into()))?;
    e.u64(input.index)
        .map_err(|_| BalanceError::MalformedCbor("input encode".into()))?;
    Ok(())
}

fn decode_input(d: &mut Decoder<'_>) -> Result<TransactionInput, BalanceError> {
    expect_array_len(d, 2)?;
    let transaction_id = hash_from_bytes(d.bytes()?)?;
    let index = d.u64()?;
    Ok(TransactionInput {
        transaction_id,
        index,
    })
}

impl TransactionInput {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_input(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<TransactionInput, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_input(&mut d)
    }
}

fn encode_input_set<W: Write>(e: &mut Encoder<W>, inputs: &std::collections::BTreeSet<TransactionInput>) -> Result<(), BalanceError> {
    e.tag(Tag::new(SET_TAG))
        .map_err(|_| BalanceError::MalformedCbor("input set encode".into()))?;
    e.array(checked_len(inputs.len())?)
        .map_err(|_| BalanceError::MalformedCbor("input set encode".into()))?;
    for input in inputs {
        encode_input(e, input)?;
    }
    Ok(())
}

fn decode_input_set(d: &mut Decoder<'_>) -> Result<std::collections::BTreeSet<TransactionInput>, BalanceError> {
    skip_optional_set_tag(d)?;
    let len = decode_array_len(d)?;
    let mut set = std::collections::BTreeSet::new();
    for _ in 0..len {
        set.insert(decode_input(d)?);
    }
    Ok(set)
}

// ---------------------------------------------------------------------------
// DatumOption
// ---------------------------------------------------------------------------

/// Inline datums are wrapped in CBOR tag 24 (`#6.24`, "CBOR encoded in
/// bytes"), per the ledger's `DatumOption` CDDL.
const INLINE_DATUM_TAG: u64 = 24;

fn encode_datum<W: Write>(e: &mut Encoder<W>, datum: &DatumOption) -> Result<(), BalanceError> {
    e.array(2)
        .map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
    match datum {
        DatumOption::Hash(hash) => {
            e.u8(0).map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
            e.bytes(hash.as_ref())
                .map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
        }
        DatumOption::Inline(bytes) => {
            e.u8(1).map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
            e.tag(Tag::new(INLINE_DATUM_TAG))
                .map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
            e.bytes(bytes)
                .map_err(|_| BalanceError::MalformedCbor("datum encode".into()))?;
        }
    }
    Ok(())
}

fn decode_datum(d: &mut Decoder<'_>) -> Result<DatumOption, BalanceError> {
    expect_array_len(d, 2)?;
    match d.u8()? {
        0 => Ok(DatumOption::Hash(hash_from_bytes(d.bytes()?)?)),
        1 => {
            let tag = d.tag()?;
            if tag != Tag::new(INLINE_DATUM_TAG) {
                return Err(BalanceError::UnexpectedCborType);
            }
            Ok(DatumOption::Inline(d.bytes()?.to_vec()))
        }
        _ => Err(BalanceError::InvalidCborMapKey),
    }
}

// ---------------------------------------------------------------------------
// TransactionOutput
// ---------------------------------------------------------------------------

/// Script references are wrapped in tag 24 the same way inline datums are.
const SCRIPT_REF_TAG: u64 = 24;

/// Encodes a transaction output in the post-Alonzo map form (§3): every
/// output the balancer constructs from scratch — change, collateral-return —
/// has no legacy-tuple form to preserve, so freshly built outputs always take
/// this canonical shape, with map keys in ascending order per §9.
pub fn encode_output<W: Write>(e: &mut Encoder<W>, output: &TransactionOutput) -> Result<(), BalanceError> {
    let field_count = 2 + output.datum.is_some() as u64 + output.script_ref.is_some() as u64;
    e.map(field_count)
        .map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;

    e.u8(0).map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
    e.bytes(&output.address.to_vec())
        .map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;

    e.u8(1).map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
    encode_value(e, &output.value)?;

    if let Some(datum) = &output.datum {
        e.u8(2).map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
        encode_datum(e, datum)?;
    }

    if let Some(script_ref) = &output.script_ref {
        e.u8(3).map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
        e.tag(Tag::new(SCRIPT_REF_TAG))
            .map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
        e.bytes(script_ref)
            .map_err(|_| BalanceError::MalformedCbor("output encode".into()))?;
    }

    Ok(())
}

/// Decodes either the legacy pre-Alonzo tuple form
/// (`[address, amount]` / `[address, amount, datum_hash]`) or the
/// post-Alonzo map form, per §4.B's historical-decode requirement.
fn decode_output(d: &mut Decoder<'_>) -> Result<TransactionOutput, BalanceError> {
    match d.datatype()? {
        Type::Array => {
            let len = decode_array_len(d)?;
            if len != 2 && len != 3 {
                return Err(BalanceError::InvalidCborArraySize);
            }
            let address = crate::model::address_from_bytes(d.bytes()?)?;
            let value = decode_value(d)?;
            let datum = if len == 3 {
                Some(DatumOption::Hash(hash_from_bytes(d.bytes()?)?))
            } else {
                None
            };
            Ok(TransactionOutput {
                address,
                value,
                datum,
                script_ref: None,
            })
        }
        Type::Map | Type::MapIndef => {
            let len = decode_map_len(d)?;
            let mut address = None;
            let mut value = None;
            let mut datum = None;
            let mut script_ref = None;

            for _ in 0..len {
                match d.u8()? {
                    0 => address = Some(crate::model::address_from_bytes(d.bytes()?)?),
                    1 => value = Some(decode_value(d)?),
                    2 => datum = Some(decode_datum(d)?),
                    3 => {
                        let tag = d.tag()?;
                        if tag != Tag::new(SCRIPT_REF_TAG) {
                            return Err(BalanceError::UnexpectedCborType);
                        }
                        script_ref = Some(d.bytes()?.to_vec());
                    }
                    _ => return Err(BalanceError::InvalidCborMapKey),
                }
            }

            Ok(TransactionOutput {
                address: address.ok_or_else(|| BalanceError::ElementNotFound("output address".into()))?,
                value: value.ok_or_else(|| BalanceError::ElementNotFound("output value".into()))?,
                datum,
                script_ref,
            })
        }
        _ => Err(BalanceError::UnexpectedCborType),
    }
}

impl TransactionOutput {
    /// Canonical, map-form encoding of this output's current field values.
    /// Use this for outputs the balancer builds itself; a decoded,
    /// unmodified output should instead be re-emitted via
    /// `Cached::to_cbor`, which reproduces its original bytes exactly.
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_output(&mut e, self)?;
        Ok(buf)
    }

    /// Decodes an output and caches the exact bytes it came from (§9), so
    /// that re-encoding it unchanged is bit-exact regardless of which
    /// historical shape it was decoded from.
    pub fn from_cbor(bytes: &[u8]) -> Result<Cached<TransactionOutput>, BalanceError> {
        let mut d = Decoder::new(bytes);
        let output = decode_output(&mut d)?;
        let end = d.position();
        Ok(Cached::new(output, bytes[..end].to_vec()))
    }
}

/// The predicted serialized length of `output`, used by
/// [`crate::value::compute_min_ada_required`] so that the same serializer
/// drives both the prediction and the eventual transmission.
pub fn output_size(output: &TransactionOutput) -> Result<usize, BalanceError> {
    Ok(output.to_cbor()?.len())
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------
//
// The owned `Certificate` model (§3) keeps only the fields the balancing
// engine consumes — the credential(s) that contribute a required signer and
// the deposit/refund amount — so round-tripping a certificate this codec
// didn't itself construct reproduces the modeled subset of its fields, not
// every byte of a pool registration's relay list or metadata URL. A caller
// that needs bit-exact certificate payloads submits the original bytes
// alongside, the same way `caravel-balance` defers bit-exact ledger
// transmission to the adapted submission codec at the CBOR boundary
// (see the crate-level docs).

fn encode_credential<W: Write>(e: &mut Encoder<W>, credential: &Credential) -> Result<(), BalanceError> {
    e.array(2)
        .map_err(|_| BalanceError::MalformedCbor("credential encode".into()))?;
    match credential {
        Credential::KeyHash(h) => {
            e.u8(0).map_err(|_| BalanceError::MalformedCbor("credential encode".into()))?;
            e.bytes(h.as_ref())
                .map_err(|_| BalanceError::MalformedCbor("credential encode".into()))?;
        }
        Credential::ScriptHash(h) => {
            e.u8(1).map_err(|_| BalanceError::MalformedCbor("credential encode".into()))?;
            e.bytes(h.as_ref())
                .map_err(|_| BalanceError::MalformedCbor("credential encode".into()))?;
        }
    }
    Ok(())
}

fn decode_credential(d: &mut Decoder<'_>) -> Result<Credential, BalanceError> {
    expect_array_len(d, 2)?;
    match d.u8()? {
        0 => Ok(Credential::KeyHash(hash_from_bytes(d.bytes()?)?)),
        1 => Ok(Credential::ScriptHash(hash_from_bytes(d.bytes()?)?)),
        _ => Err(BalanceError::InvalidCborMapKey),
    }
}

fn encode_cert_coin<W: Write>(e: &mut Encoder<W>, coin: Option<u64>) -> Result<(), BalanceError> {
    match coin {
        Some(c) => e.u64(c).map_err(|_| BalanceError::MalformedCbor("certificate encode".into()))?,
        None => e.null().map_err(|_| BalanceError::MalformedCbor("certificate encode".into()))?,
    };
    Ok(())
}

fn decode_required_coin(d: &mut Decoder<'_>) -> Result<u64, BalanceError> {
    d.u64().map_err(BalanceError::from)
}

/// Encodes `cert` using the real Conway certificate discriminators (0–18),
/// keeping only the fields the owned model carries for that variant.
fn encode_certificate<W: Write>(e: &mut Encoder<W>, cert: &Certificate) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("certificate encode".into());
    match cert {
        Certificate::StakeRegistration(c) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(0).map_err(|_| fail())?;
            encode_credential(e, c)?;
        }
        Certificate::StakeDeregistration(c) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(1).map_err(|_| fail())?;
            encode_credential(e, c)?;
        }
        Certificate::StakeDelegation(c, pool) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(2).map_err(|_| fail())?;
            encode_credential(e, c)?;
            e.bytes(pool.as_ref()).map_err(|_| fail())?;
        }
        Certificate::PoolRegistration { operator, pool_owners } => {
            e.array(3).map_err(|_| fail())?;
            e.u8(3).map_err(|_| fail())?;
            e.bytes(operator.as_ref()).map_err(|_| fail())?;
            e.array(checked_len(pool_owners.len())?).map_err(|_| fail())?;
            for owner in pool_owners {
                e.bytes(owner.as_ref()).map_err(|_| fail())?;
            }
        }
        Certificate::PoolRetirement(pool) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(4).map_err(|_| fail())?;
            e.bytes(pool.as_ref()).map_err(|_| fail())?;
        }
        Certificate::GenesisKeyDelegation => {
            e.array(1).map_err(|_| fail())?;
            e.u8(5).map_err(|_| fail())?;
        }
        Certificate::MoveInstantaneousRewards => {
            e.array(1).map_err(|_| fail())?;
            e.u8(6).map_err(|_| fail())?;
        }
        Certificate::Reg(c, coin) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(7).map_err(|_| fail())?;
            encode_credential(e, c)?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::UnReg(c, coin) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(8).map_err(|_| fail())?;
            encode_credential(e, c)?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::VoteDeleg(c) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(9).map_err(|_| fail())?;
            encode_credential(e, c)?;
        }
        Certificate::StakeVoteDeleg(c, pool) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(10).map_err(|_| fail())?;
            encode_credential(e, c)?;
            e.bytes(pool.as_ref()).map_err(|_| fail())?;
        }
        Certificate::StakeRegDeleg(c, pool, coin) => {
            e.array(4).map_err(|_| fail())?;
            e.u8(11).map_err(|_| fail())?;
            encode_credential(e, c)?;
            e.bytes(pool.as_ref()).map_err(|_| fail())?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::VoteRegDeleg(c, coin) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(12).map_err(|_| fail())?;
            encode_credential(e, c)?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::StakeVoteRegDeleg(c, pool, coin) => {
            e.array(4).map_err(|_| fail())?;
            e.u8(13).map_err(|_| fail())?;
            encode_credential(e, c)?;
            e.bytes(pool.as_ref()).map_err(|_| fail())?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::AuthCommitteeHot(cold, hot) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(14).map_err(|_| fail())?;
            encode_credential(e, cold)?;
            encode_credential(e, hot)?;
        }
        Certificate::ResignCommitteeCold(cold) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(15).map_err(|_| fail())?;
            encode_credential(e, cold)?;
        }
        Certificate::RegDRepCert(c, coin) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(16).map_err(|_| fail())?;
            encode_credential(e, c)?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::UnRegDRepCert(c, coin) => {
            e.array(3).map_err(|_| fail())?;
            e.u8(17).map_err(|_| fail())?;
            encode_credential(e, c)?;
            encode_cert_coin(e, *coin)?;
        }
        Certificate::UpdateDRepCert(c) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(18).map_err(|_| fail())?;
            encode_credential(e, c)?;
        }
    }
    Ok(())
}

/// Decodes a certificate, consuming and discarding any trailing array
/// elements the owned model doesn't represent (pool relays and metadata,
/// for instance) rather than failing on them.
fn decode_certificate(d: &mut Decoder<'_>) -> Result<Certificate, BalanceError> {
    let len = decode_array_len(d)?;
    if len == 0 {
        return Err(BalanceError::InvalidCborArraySize);
    }
    let tag = d.u8()?;
    let mut consumed = 1u64;

    let cert = match tag {
        0 => Certificate::StakeRegistration(decode_credential_counted(d, &mut consumed)?),
        1 => Certificate::StakeDeregistration(decode_credential_counted(d, &mut consumed)?),
        2 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let pool = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            Certificate::StakeDelegation(c, pool)
        }
        3 => {
            let operator = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            let owner_count = decode_array_len(d)?;
            let mut pool_owners = Vec::new();
            for _ in 0..owner_count {
                pool_owners.push(hash_from_bytes(d.bytes()?)?);
            }
            consumed += 1;
            Certificate::PoolRegistration { operator, pool_owners }
        }
        4 => {
            let pool = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            Certificate::PoolRetirement(pool)
        }
        5 => Certificate::GenesisKeyDelegation,
        6 => Certificate::MoveInstantaneousRewards,
        7 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::Reg(c, coin)
        }
        8 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::UnReg(c, coin)
        }
        9 => Certificate::VoteDeleg(decode_credential_counted(d, &mut consumed)?),
        10 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let pool = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            Certificate::StakeVoteDeleg(c, pool)
        }
        11 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let pool = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::StakeRegDeleg(c, pool, coin)
        }
        12 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::VoteRegDeleg(c, coin)
        }
        13 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let pool = hash_from_bytes(d.bytes()?)?;
            consumed += 1;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::StakeVoteRegDeleg(c, pool, coin)
        }
        14 => {
            let cold = decode_credential_counted(d, &mut consumed)?;
            let hot = decode_credential_counted(d, &mut consumed)?;
            Certificate::AuthCommitteeHot(cold, hot)
        }
        15 => Certificate::ResignCommitteeCold(decode_credential_counted(d, &mut consumed)?),
        16 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::RegDRepCert(c, coin)
        }
        17 => {
            let c = decode_credential_counted(d, &mut consumed)?;
            let coin = decode_optional_coin(d)?;
            consumed += 1;
            Certificate::UnRegDRepCert(c, coin)
        }
        18 => Certificate::UpdateDRepCert(decode_credential_counted(d, &mut consumed)?),
        _ => return Err(BalanceError::InvalidCborMapKey),
    };

    for _ in consumed..len {
        d.skip()?;
    }

    Ok(cert)
}

fn decode_credential_counted(d: &mut Decoder<'_>, consumed: &mut u64) -> Result<Credential, BalanceError> {
    let c = decode_credential(d)?;
    *consumed += 1;
    Ok(c)
}

/// Certificates index an explicit-or-default deposit amount as `null` or a
/// `uint` (§3's `CertCoin`); an anchor slot some variants also carry is left
/// to the trailing-element skip in [`decode_certificate`].
fn decode_optional_coin(d: &mut Decoder<'_>) -> Result<Option<u64>, BalanceError> {
    match d.datatype()? {
        Type::Null => {
            d.null()?;
            Ok(None)
        }
        _ => Ok(Some(decode_required_coin(d)?)),
    }
}

impl Certificate {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_certificate(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Certificate, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_certificate(&mut d)
    }
}

// ---------------------------------------------------------------------------
// Governance: Voter, GovActionId, Anchor, GovAction, ProposalProcedure
// ---------------------------------------------------------------------------

fn encode_voter<W: Write>(e: &mut Encoder<W>, voter: &Voter) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("voter encode".into());
    e.array(2).map_err(|_| fail())?;
    match voter {
        Voter::ConstitutionalCommitteeHotKey(h) => {
            e.u8(0).map_err(|_| fail())?;
            e.bytes(h.as_ref()).map_err(|_| fail())?;
        }
        Voter::ConstitutionalCommitteeHotScript(h) => {
            e.u8(1).map_err(|_| fail())?;
            e.bytes(h.as_ref()).map_err(|_| fail())?;
        }
        Voter::DRepKey(h) => {
            e.u8(2).map_err(|_| fail())?;
            e.bytes(h.as_ref()).map_err(|_| fail())?;
        }
        Voter::DRepScript(h) => {
            e.u8(3).map_err(|_| fail())?;
            e.bytes(h.as_ref()).map_err(|_| fail())?;
        }
        Voter::StakePoolKey(h) => {
            e.u8(4).map_err(|_| fail())?;
            e.bytes(h.as_ref()).map_err(|_| fail())?;
        }
    }
    Ok(())
}

fn decode_voter(d: &mut Decoder<'_>) -> Result<Voter, BalanceError> {
    expect_array_len(d, 2)?;
    match d.u8()? {
        0 => Ok(Voter::ConstitutionalCommitteeHotKey(hash_from_bytes(d.bytes()?)?)),
        1 => Ok(Voter::ConstitutionalCommitteeHotScript(hash_from_bytes(d.bytes()?)?)),
        2 => Ok(Voter::DRepKey(hash_from_bytes(d.bytes()?)?)),
        3 => Ok(Voter::DRepScript(hash_from_bytes(d.bytes()?)?)),
        4 => Ok(Voter::StakePoolKey(hash_from_bytes(d.bytes()?)?)),
        _ => Err(BalanceError::InvalidCborMapKey),
    }
}

fn encode_gov_action_id<W: Write>(e: &mut Encoder<W>, id: &GovActionId) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("gov action id encode".into());
    e.array(2).map_err(|_| fail())?;
    e.bytes(id.transaction_id.as_ref()).map_err(|_| fail())?;
    e.u32(id.action_index).map_err(|_| fail())?;
    Ok(())
}

fn decode_gov_action_id(d: &mut Decoder<'_>) -> Result<GovActionId, BalanceError> {
    expect_array_len(d, 2)?;
    let transaction_id = hash_from_bytes(d.bytes()?)?;
    let action_index = d.u32()?;
    Ok(GovActionId {
        transaction_id,
        action_index,
    })
}

fn encode_anchor<W: Write>(e: &mut Encoder<W>, anchor: &Anchor) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("anchor encode".into());
    e.array(2).map_err(|_| fail())?;
    e.str(&anchor.url).map_err(|_| fail())?;
    e.bytes(anchor.data_hash.as_ref()).map_err(|_| fail())?;
    Ok(())
}

fn decode_anchor(d: &mut Decoder<'_>) -> Result<Anchor, BalanceError> {
    expect_array_len(d, 2)?;
    let url = d.str()?.to_string();
    let data_hash = hash_from_bytes(d.bytes()?)?;
    Ok(Anchor { url, data_hash })
}

fn encode_optional_anchor<W: Write>(e: &mut Encoder<W>, anchor: &Option<Anchor>) -> Result<(), BalanceError> {
    match anchor {
        Some(a) => encode_anchor(e, a),
        None => e
            .null()
            .map(|_| ())
            .map_err(|_| BalanceError::MalformedCbor("anchor encode".into())),
    }
}

fn decode_optional_anchor(d: &mut Decoder<'_>) -> Result<Option<Anchor>, BalanceError> {
    if d.datatype()? == Type::Null {
        d.null()?;
        return Ok(None);
    }
    Ok(Some(decode_anchor(d)?))
}

fn encode_gov_action<W: Write>(e: &mut Encoder<W>, action: &GovAction) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("gov action encode".into());
    match action {
        GovAction::ParameterChange => {
            e.array(1).map_err(|_| fail())?;
            e.u8(0).map_err(|_| fail())?;
        }
        GovAction::HardForkInitiation => {
            e.array(1).map_err(|_| fail())?;
            e.u8(1).map_err(|_| fail())?;
        }
        GovAction::TreasuryWithdrawals(withdrawals) => {
            e.array(2).map_err(|_| fail())?;
            e.u8(2).map_err(|_| fail())?;
            e.map(checked_len(withdrawals.len())?).map_err(|_| fail())?;
            for (account, coin) in withdrawals {
                e.bytes(account).map_err(|_| fail())?;
                e.u64(*coin).map_err(|_| fail())?;
            }
        }
        GovAction::NoConfidence => {
            e.array(1).map_err(|_| fail())?;
            e.u8(3).map_err(|_| fail())?;
        }
        GovAction::UpdateCommittee => {
            e.array(1).map_err(|_| fail())?;
            e.u8(4).map_err(|_| fail())?;
        }
        GovAction::NewConstitution => {
            e.array(1).map_err(|_| fail())?;
            e.u8(5).map_err(|_| fail())?;
        }
        GovAction::Information => {
            e.array(1).map_err(|_| fail())?;
            e.u8(6).map_err(|_| fail())?;
        }
    }
    Ok(())
}

fn decode_gov_action(d: &mut Decoder<'_>) -> Result<GovAction, BalanceError> {
    let len = decode_array_len(d)?;
    if len == 0 {
        return Err(BalanceError::InvalidCborArraySize);
    }
    let tag = d.u8()?;
    let mut consumed = 1u64;

    let action = match tag {
        0 => GovAction::ParameterChange,
        1 => GovAction::HardForkInitiation,
        2 => {
            let count = decode_map_len(d)?;
            let mut withdrawals = std::collections::BTreeMap::new();
            for _ in 0..count {
                let account = d.bytes()?.to_vec();
                let coin = d.u64()?;
                withdrawals.insert(account, coin);
            }
            consumed += 1;
            GovAction::TreasuryWithdrawals(withdrawals)
        }
        3 => GovAction::NoConfidence,
        4 => GovAction::UpdateCommittee,
        5 => GovAction::NewConstitution,
        6 => GovAction::Information,
        _ => return Err(BalanceError::InvalidCborMapKey),
    };

    for _ in consumed..len {
        d.skip()?;
    }

    Ok(action)
}

fn encode_voting_procedure<W: Write>(e: &mut Encoder<W>, procedure: &VotingProcedure) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("voting procedure encode".into());
    e.array(2).map_err(|_| fail())?;
    let vote = match procedure.vote {
        Vote::No => 0u8,
        Vote::Yes => 1,
        Vote::Abstain => 2,
    };
    e.u8(vote).map_err(|_| fail())?;
    encode_optional_anchor(e, &procedure.anchor)?;
    Ok(())
}

fn decode_voting_procedure(d: &mut Decoder<'_>) -> Result<VotingProcedure, BalanceError> {
    expect_array_len(d, 2)?;
    let vote = match d.u8()? {
        0 => Vote::No,
        1 => Vote::Yes,
        2 => Vote::Abstain,
        _ => return Err(BalanceError::InvalidCborMapKey),
    };
    let anchor = decode_optional_anchor(d)?;
    Ok(VotingProcedure { vote, anchor })
}

fn encode_proposal_procedure<W: Write>(e: &mut Encoder<W>, proposal: &crate::model::ProposalProcedure) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("proposal procedure encode".into());
    e.array(4).map_err(|_| fail())?;
    e.u64(proposal.deposit).map_err(|_| fail())?;
    e.bytes(&proposal.reward_account).map_err(|_| fail())?;
    encode_gov_action(e, &proposal.gov_action)?;
    encode_anchor(e, &proposal.anchor)?;
    Ok(())
}

fn decode_proposal_procedure(d: &mut Decoder<'_>) -> Result<crate::model::ProposalProcedure, BalanceError> {
    expect_array_len(d, 4)?;
    let deposit = d.u64()?;
    let reward_account = d.bytes()?.to_vec();
    let gov_action = decode_gov_action(d)?;
    let anchor = decode_anchor(d)?;
    Ok(crate::model::ProposalProcedure {
        deposit,
        reward_account,
        anchor,
        gov_action,
    })
}

// ---------------------------------------------------------------------------
// Redeemers / ExUnits / WitnessSet
// ---------------------------------------------------------------------------

fn redeemer_tag_code(tag: RedeemerTag) -> u8 {
    match tag {
        RedeemerTag::Spend => 0,
        RedeemerTag::Mint => 1,
        RedeemerTag::Cert => 2,
        RedeemerTag::Reward => 3,
        RedeemerTag::Voting => 4,
        RedeemerTag::Proposing => 5,
    }
}

fn redeemer_tag_from_code(code: u8) -> Result<RedeemerTag, BalanceError> {
    match code {
        0 => Ok(RedeemerTag::Spend),
        1 => Ok(RedeemerTag::Mint),
        2 => Ok(RedeemerTag::Cert),
        3 => Ok(RedeemerTag::Reward),
        4 => Ok(RedeemerTag::Voting),
        5 => Ok(RedeemerTag::Proposing),
        _ => Err(BalanceError::InvalidCborMapKey),
    }
}

fn encode_ex_units<W: Write>(e: &mut Encoder<W>, units: ExUnits) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("ex units encode".into());
    e.array(2).map_err(|_| fail())?;
    e.u64(units.mem).map_err(|_| fail())?;
    e.u64(units.steps).map_err(|_| fail())?;
    Ok(())
}

fn decode_ex_units(d: &mut Decoder<'_>) -> Result<ExUnits, BalanceError> {
    expect_array_len(d, 2)?;
    let mem = d.u64()?;
    let steps = d.u64()?;
    Ok(ExUnits { mem, steps })
}

fn encode_redeemer<W: Write>(e: &mut Encoder<W>, redeemer: &Redeemer) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("redeemer encode".into());
    e.array(4).map_err(|_| fail())?;
    e.u8(redeemer_tag_code(redeemer.tag)).map_err(|_| fail())?;
    e.u32(redeemer.index).map_err(|_| fail())?;
    e.bytes(&redeemer.data).map_err(|_| fail())?;
    encode_ex_units(e, redeemer.ex_units)?;
    Ok(())
}

fn decode_redeemer(d: &mut Decoder<'_>) -> Result<Redeemer, BalanceError> {
    expect_array_len(d, 4)?;
    let tag = redeemer_tag_from_code(d.u8()?)?;
    let index = d.u32()?;
    let data = d.bytes()?.to_vec();
    let ex_units = decode_ex_units(d)?;
    Ok(Redeemer {
        tag,
        index,
        data,
        ex_units,
    })
}

impl Redeemer {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_redeemer(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Redeemer, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_redeemer(&mut d)
    }
}

fn encode_script_array<W: Write>(e: &mut Encoder<W>, scripts: &[Vec<u8>]) -> Result<(), BalanceError> {
    e.array(checked_len(scripts.len())?)
        .map_err(|_| BalanceError::MalformedCbor("script array encode".into()))?;
    for script in scripts {
        e.bytes(script)
            .map_err(|_| BalanceError::MalformedCbor("script array encode".into()))?;
    }
    Ok(())
}

fn decode_script_array(d: &mut Decoder<'_>) -> Result<Vec<Vec<u8>>, BalanceError> {
    skip_optional_set_tag(d)?;
    let len = decode_array_len(d)?;
    let mut scripts = Vec::new();
    for _ in 0..len {
        scripts.push(d.bytes()?.to_vec());
    }
    Ok(scripts)
}

fn encode_vkey_witnesses<W: Write>(e: &mut Encoder<W>, witnesses: &[Vec<u8>]) -> Result<(), BalanceError> {
    e.array(checked_len(witnesses.len())?)
        .map_err(|_| BalanceError::MalformedCbor("vkey witness encode".into()))?;
    for witness in witnesses {
        e.writer_mut()
            .write_all(witness)
            .map_err(|_| BalanceError::MalformedCbor("vkey witness encode".into()))?;
    }
    Ok(())
}

/// The map keys the owned `WitnessSet` populates, in canonical ascending
/// order (§9): `0` vkey witnesses, `1` native scripts, `3`/`6`/`7` the three
/// Plutus language versions, `4` Plutus data, `5` redeemers. Key `2`
/// (bootstrap witnesses) is never emitted since the owned model doesn't
/// represent Byron-style witnesses.
pub fn encode_witness_set<W: Write>(e: &mut Encoder<W>, witness_set: &WitnessSet) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("witness set encode".into());

    let present = (!witness_set.vkey_witnesses.is_empty()) as u64
        + (!witness_set.native_scripts.is_empty()) as u64
        + (!witness_set.plutus_v1_scripts.is_empty()) as u64
        + (!witness_set.plutus_data.is_empty()) as u64
        + (!witness_set.redeemers.is_empty()) as u64
        + (!witness_set.plutus_v2_scripts.is_empty()) as u64
        + (!witness_set.plutus_v3_scripts.is_empty()) as u64;

    e.map(present).map_err(|_| fail())?;

    if !witness_set.vkey_witnesses.is_empty() {
        e.u8(0).map_err(|_| fail())?;
        encode_vkey_witnesses(e, &witness_set.vkey_witnesses)?;
    }
    if !witness_set.native_scripts.is_empty() {
        e.u8(1).map_err(|_| fail())?;
        encode_script_array(e, &witness_set.native_scripts)?;
    }
    if !witness_set.plutus_v1_scripts.is_empty() {
        e.u8(3).map_err(|_| fail())?;
        encode_script_array(e, &witness_set.plutus_v1_scripts)?;
    }
    if !witness_set.plutus_data.is_empty() {
        e.u8(4).map_err(|_| fail())?;
        encode_script_array(e, &witness_set.plutus_data)?;
    }
    if !witness_set.redeemers.is_empty() {
        e.u8(5).map_err(|_| fail())?;
        e.array(checked_len(witness_set.redeemers.len())?).map_err(|_| fail())?;
        for redeemer in &witness_set.redeemers {
            encode_redeemer(e, redeemer)?;
        }
    }
    if !witness_set.plutus_v2_scripts.is_empty() {
        e.u8(6).map_err(|_| fail())?;
        encode_script_array(e, &witness_set.plutus_v2_scripts)?;
    }
    if !witness_set.plutus_v3_scripts.is_empty() {
        e.u8(7).map_err(|_| fail())?;
        encode_script_array(e, &witness_set.plutus_v3_scripts)?;
    }

    Ok(())
}

fn decode_witness_set(d: &mut Decoder<'_>) -> Result<WitnessSet, BalanceError> {
    let len = decode_map_len(d)?;
    let mut witness_set = WitnessSet::default();

    for _ in 0..len {
        match d.u8()? {
            0 => {
                skip_optional_set_tag(d)?;
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    let start = d.position();
                    expect_array_len(d, 2)?;
                    d.skip()?; // vkey
                    d.skip()?; // signature
                    let end = d.position();
                    witness_set.vkey_witnesses.push(d.input()[start..end].to_vec());
                }
            }
            1 => witness_set.native_scripts = decode_script_array(d)?,
            2 => {
                // bootstrap witnesses: not represented in the owned model.
                skip_optional_set_tag(d)?;
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    d.skip()?;
                }
            }
            3 => witness_set.plutus_v1_scripts = decode_script_array(d)?,
            4 => witness_set.plutus_data = decode_script_array(d)?,
            5 => {
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    witness_set.redeemers.push(decode_redeemer(d)?);
                }
            }
            6 => witness_set.plutus_v2_scripts = decode_script_array(d)?,
            7 => witness_set.plutus_v3_scripts = decode_script_array(d)?,
            _ => return Err(BalanceError::InvalidCborMapKey),
        }
    }

    Ok(witness_set)
}

impl WitnessSet {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_witness_set(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<WitnessSet, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_witness_set(&mut d)
    }
}

/// Estimated serialized size (in bytes) of the non-vkey-witness content of
/// `witness_set`: native and Plutus scripts, Plutus data, and redeemers.
/// Verification-key witnesses are costed separately, by
/// `crate::fee::vk_witness_cost`, since the balancer doesn't know the final
/// signer count until `crate::signers::unique_required_signers` runs.
pub fn witness_set_size(witness_set: &WitnessSet) -> Result<usize, BalanceError> {
    let stripped = WitnessSet {
        vkey_witnesses: Vec::new(),
        ..witness_set.clone()
    };
    Ok(stripped.to_cbor()?.len())
}

// ---------------------------------------------------------------------------
// TransactionBody
// ---------------------------------------------------------------------------

/// The real Conway `transaction_body` map keys the owned model populates, in
/// canonical ascending order (§9): gaps (6, 10, 12) belong to fields the
/// ledger defines but the balancing engine never constructs (pool updates,
/// the deprecated `update` field, script-integrity-only reserved slots).
pub fn body_map_key_count(body: &TransactionBody) -> u64 {
    3 + (body.ttl.is_some() as u64)
        + (!body.certificates.is_empty() as u64)
        + (!body.withdrawals.is_empty() as u64)
        + (body.auxiliary_data_hash.is_some() as u64)
        + (body.validity_interval_start.is_some() as u64)
        + (body.mint.is_some() as u64)
        + (body.script_data_hash.is_some() as u64)
        + (!body.collateral.is_empty() as u64)
        + (!body.required_signers.is_empty() as u64)
        + (body.network_id.is_some() as u64)
        + (body.collateral_return.is_some() as u64)
        + (body.total_collateral.is_some() as u64)
        + (!body.reference_inputs.is_empty() as u64)
        + (!body.voting_procedures.is_empty() as u64)
        + (!body.proposal_procedures.is_empty() as u64)
        + (body.treasury_value.is_some() as u64)
        + (body.donation.is_some() as u64)
}

pub fn encode_body<W: Write>(e: &mut Encoder<W>, body: &TransactionBody) -> Result<(), BalanceError> {
    let fail = || BalanceError::MalformedCbor("body encode".into());

    e.map(body_map_key_count(body)).map_err(|_| fail())?;

    e.u8(0).map_err(|_| fail())?;
    encode_input_set(e, &body.inputs)?;

    e.u8(1).map_err(|_| fail())?;
    e.array(checked_len(body.outputs.len())?).map_err(|_| fail())?;
    for output in &body.outputs {
        encode_output(e, output)?;
    }

    e.u8(2).map_err(|_| fail())?;
    e.u64(body.fee).map_err(|_| fail())?;

    if let Some(ttl) = body.ttl {
        e.u8(3).map_err(|_| fail())?;
        e.u64(ttl).map_err(|_| fail())?;
    }

    if !body.certificates.is_empty() {
        e.u8(4).map_err(|_| fail())?;
        e.array(checked_len(body.certificates.len())?).map_err(|_| fail())?;
        for cert in &body.certificates {
            encode_certificate(e, cert)?;
        }
    }

    if !body.withdrawals.is_empty() {
        e.u8(5).map_err(|_| fail())?;
        e.map(checked_len(body.withdrawals.len())?).map_err(|_| fail())?;
        for (account, coin) in &body.withdrawals {
            e.bytes(account).map_err(|_| fail())?;
            e.u64(*coin).map_err(|_| fail())?;
        }
    }

    if let Some(hash) = &body.auxiliary_data_hash {
        e.u8(7).map_err(|_| fail())?;
        e.bytes(hash.as_ref()).map_err(|_| fail())?;
    }

    if let Some(start) = body.validity_interval_start {
        e.u8(8).map_err(|_| fail())?;
        e.u64(start).map_err(|_| fail())?;
    }

    if let Some(mint) = &body.mint {
        e.u8(9).map_err(|_| fail())?;
        e.map(checked_len(mint.assets.len())?).map_err(|_| fail())?;
        for (policy, policy_map) in &mint.assets {
            e.bytes(policy.as_ref()).map_err(|_| fail())?;
            e.map(checked_len(policy_map.len())?).map_err(|_| fail())?;
            for (name, qty) in policy_map {
                e.bytes(name).map_err(|_| fail())?;
                e.i64(*qty).map_err(|_| fail())?;
            }
        }
    }

    if let Some(hash) = &body.script_data_hash {
        e.u8(11).map_err(|_| fail())?;
        e.bytes(hash.as_ref()).map_err(|_| fail())?;
    }

    if !body.collateral.is_empty() {
        e.u8(13).map_err(|_| fail())?;
        encode_input_set(e, &body.collateral)?;
    }

    if !body.required_signers.is_empty() {
        e.u8(14).map_err(|_| fail())?;
        e.tag(Tag::new(SET_TAG)).map_err(|_| fail())?;
        e.array(checked_len(body.required_signers.len())?).map_err(|_| fail())?;
        for signer in &body.required_signers {
            e.bytes(signer.as_ref()).map_err(|_| fail())?;
        }
    }

    if let Some(network_id) = body.network_id {
        e.u8(15).map_err(|_| fail())?;
        e.u8(network_id).map_err(|_| fail())?;
    }

    if let Some(output) = &body.collateral_return {
        e.u8(16).map_err(|_| fail())?;
        encode_output(e, output)?;
    }

    if let Some(total) = body.total_collateral {
        e.u8(17).map_err(|_| fail())?;
        e.u64(total).map_err(|_| fail())?;
    }

    if !body.reference_inputs.is_empty() {
        e.u8(18).map_err(|_| fail())?;
        encode_input_set(e, &body.reference_inputs)?;
    }

    if !body.voting_procedures.is_empty() {
        e.u8(19).map_err(|_| fail())?;
        e.map(checked_len(body.voting_procedures.len())?).map_err(|_| fail())?;
        for ((voter, action_id), procedure) in &body.voting_procedures {
            encode_voter(e, voter)?;
            e.map(1).map_err(|_| fail())?;
            encode_gov_action_id(e, action_id)?;
            encode_voting_procedure(e, procedure)?;
        }
    }

    if !body.proposal_procedures.is_empty() {
        e.u8(20).map_err(|_| fail())?;
        e.array(checked_len(body.proposal_procedures.len())?).map_err(|_| fail())?;
        for proposal in &body.proposal_procedures {
            encode_proposal_procedure(e, proposal)?;
        }
    }

    if let Some(value) = body.treasury_value {
        e.u8(21).map_err(|_| fail())?;
        e.u64(value).map_err(|_| fail())?;
    }

    if let Some(donation) = body.donation {
        e.u8(22).map_err(|_| fail())?;
        e.u64(donation).map_err(|_| fail())?;
    }

    Ok(())
}

fn decode_body(d: &mut Decoder<'_>) -> Result<TransactionBody, BalanceError> {
    let len = decode_map_len(d)?;
    let mut body = TransactionBody::default();

    for _ in 0..len {
        match d.u8()? {
            0 => body.inputs = decode_input_set(d)?,
            1 => {
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    body.outputs.push(decode_output(d)?);
                }
            }
            2 => body.fee = d.u64()?,
            3 => body.ttl = Some(d.u64()?),
            4 => {
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    body.certificates.push(decode_certificate(d)?);
                }
            }
            5 => {
                let count = decode_map_len(d)?;
                for _ in 0..count {
                    let account = d.bytes()?.to_vec();
                    let coin = d.u64()?;
                    body.withdrawals.insert(account, coin);
                }
            }
            7 => body.auxiliary_data_hash = Some(hash_from_bytes(d.bytes()?)?),
            8 => body.validity_interval_start = Some(d.u64()?),
            9 => {
                let count = decode_map_len(d)?;
                let mut mint = Value::zero();
                for _ in 0..count {
                    let policy = hash_from_bytes(d.bytes()?)?;
                    let asset_count = decode_map_len(d)?;
                    let policy_map = mint.assets.entry(policy).or_default();
                    for _ in 0..asset_count {
                        let name = d.bytes()?.to_vec();
                        let qty = d.i64()?;
                        policy_map.insert(name, qty);
                    }
                }
                body.mint = Some(mint.normalize());
            }
            11 => body.script_data_hash = Some(hash_from_bytes(d.bytes()?)?),
            13 => body.collateral = decode_input_set(d)?,
            14 => {
                skip_optional_set_tag(d)?;
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    body.required_signers.insert(hash_from_bytes(d.bytes()?)?);
                }
            }
            15 => body.network_id = Some(d.u8()?),
            16 => body.collateral_return = Some(decode_output(d)?),
            17 => body.total_collateral = Some(d.u64()?),
            18 => body.reference_inputs = decode_input_set(d)?,
            19 => {
                let voter_count = decode_map_len(d)?;
                for _ in 0..voter_count {
                    let voter = decode_voter(d)?;
                    let action_count = decode_map_len(d)?;
                    for _ in 0..action_count {
                        let action_id = decode_gov_action_id(d)?;
                        let procedure = decode_voting_procedure(d)?;
                        body.voting_procedures.insert((voter.clone(), action_id), procedure);
                    }
                }
            }
            20 => {
                let count = decode_array_len(d)?;
                for _ in 0..count {
                    body.proposal_procedures.push(decode_proposal_procedure(d)?);
                }
            }
            21 => body.treasury_value = Some(d.u64()?),
            22 => body.donation = Some(d.u64()?),
            _ => return Err(BalanceError::InvalidCborMapKey),
        }
    }

    Ok(body)
}

impl TransactionBody {
    pub fn to_cbor(&self) -> Result<Vec<u8>, BalanceError> {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        encode_body(&mut e, self)?;
        Ok(buf)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<TransactionBody, BalanceError> {
        let mut d = Decoder::new(bytes);
        decode_body(&mut d)
    }
}

/// The predicted serialized length of `body`'s current field values, used by
/// the balancer to size the transaction for fee estimation (§4.G). Driven by
/// the same [`encode_body`] that produces the bytes a caller would actually
/// transmit, so prediction and transmission never disagree.
pub fn body_size(body: &TransactionBody) -> Result<usize, BalanceError> {
    Ok(body.to_cbor()?.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransactionOutput;
    use crate::value::Value;
    use pallas_addresses::{Address, Network, ShelleyAddress, ShelleyDelegationPart, ShelleyPaymentPart};
    use pallas_crypto::hash::Hash;

    fn addr() -> Address {
        Address::Shelley(ShelleyAddress::new(
            Network::Testnet,
            ShelleyPaymentPart::Key(Hash::new([1; 28])),
            ShelleyDelegationPart::Key(Hash::new([2; 28])),
        ))
    }

    #[test]
    fn value_round_trips_through_cbor() {
        let mut value = Value::from_coin(2_000_000);
        value.assets.entry(Hash::new([9; 28])).or_default().insert(vec![1, 2, 3], 10);

        let bytes = value.to_cbor().unwrap();
        let decoded = Value::from_cbor(&bytes).unwrap();
        assert!(decoded.equals(&value));
    }

    #[test]
    fn coin_only_value_encodes_as_a_bare_integer() {
        let bytes = Value::from_coin(42).to_cbor().unwrap();
        let mut d = Decoder::new(&bytes);
        assert_eq!(d.datatype().unwrap(), Type::U8);
    }

    #[test]
    fn output_round_trips_and_caches_its_original_bytes() {
        let output = TransactionOutput::new(addr(), Value::from_coin(2_000_000));
        let bytes = output.to_cbor().unwrap();

        let cached = TransactionOutput::from_cbor(&bytes).unwrap();
        assert_eq!(cached.value.address, output.address);
        assert!(cached.value.value.equals(&output.value));
        assert_eq!(cached.to_cbor(), bytes);
    }

    #[test]
    fn legacy_tuple_output_decodes_without_a_datum() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.array(2).unwrap();
        e.bytes(&addr().to_vec()).unwrap();
        e.u64(1_000_000).unwrap();

        let cached = TransactionOutput::from_cbor(&buf).unwrap();
        assert_eq!(cached.value.value.coin, 1_000_000);
        assert!(cached.value.datum.is_none());
    }

    #[test]
    fn oversized_length_is_rejected_before_overflowing_the_encoder() {
        assert!(matches!(
            checked_len(u32::MAX as usize + 1),
            Err(BalanceError::InvalidCborArraySize)
        ));
    }

    #[test]
    fn unknown_output_map_key_is_rejected() {
        let mut buf = Vec::new();
        let mut e = Encoder::new(&mut buf);
        e.map(1).unwrap();
        e.u8(9).unwrap();
        e.u64(0).unwrap();

        assert!(matches!(
            TransactionOutput::from_cbor(&buf),
            Err(BalanceError::InvalidCborMapKey)
        ));
    }

    #[test]
    fn certificate_round_trips_through_cbor() {
        let cert = Certificate::StakeDelegation(Credential::KeyHash(Hash::new([5; 28])), Hash::new([9; 28]));
        let bytes = cert.to_cbor().unwrap();
        let decoded = Certificate::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, cert);
    }

    #[test]
    fn redeemer_round_trips_through_cbor() {
        let redeemer = Redeemer {
            tag: RedeemerTag::Spend,
            index: 0,
            data: vec![1, 2, 3],
            ex_units: ExUnits { mem: 1_000, steps: 500_000 },
        };
        let bytes = redeemer.to_cbor().unwrap();
        let decoded = Redeemer::from_cbor(&bytes).unwrap();
        assert_eq!(decoded, redeemer);
    }

    #[test]
    fn body_round_trips_inputs_and_outputs() {
        let mut body = TransactionBody::default();
        body.inputs.insert(TransactionInput {
            transaction_id: Hash::new([1; 32]),
            index: 0,
        });
        body.outputs.push(TransactionOutput::new(addr(), Value::from_coin(2_000_000)));
        body.fee = 175_000;

        let bytes = body.to_cbor().unwrap();
        let decoded = TransactionBody::from_cbor(&bytes).unwrap();

        assert_eq!(decoded.inputs, body.inputs);
        assert_eq!(decoded.fee, body.fee);
        assert_eq!(decoded.outputs.len(), 1);
    }

    #[test]
    fn larger_multiasset_value_increases_output_size() {
        let mut with_assets = Value::from_coin(2_000_000);
        with_assets
            .assets
            .entry(Hash::new([9; 28]))
            .or_default()
            .insert(vec![1, 2, 3], 10);

        let plain = TransactionOutput::new(addr(), Value::from_coin(2_000_000));
        let rich = TransactionOutput::new(addr(), with_assets);

        assert!(output_size(&rich).unwrap() > output_size(&plain).unwrap());
    }
}
