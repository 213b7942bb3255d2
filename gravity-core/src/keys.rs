//! The ledger's string key space.
//!
//! Keys are flat strings of the form
//! `<namespace>_<hex nebula>_<height>_<hex key material>` (shorter for
//! registration records), queried over the ledger RPC either exactly (`"key"`)
//! or by prefix scan (`"prefix"`). Both the state machine and the oracle node
//! build keys through the typed structs below, never by hand, so the wire
//! format has a single source of truth.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use strum_macros::EnumIter;

use crate::hash::Hash256;
use crate::transaction::VoteEntry;
use crate::types::{
    ChainType, ConsulPubKey, Nebula, NebulaId, OraclePubKey, OracleSignature, PulseId, RawValue,
    Score,
};

/// Namespaces of the ledger key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum DbKeyPrefix {
    /// Per-oracle value commitments, one per (nebula, pulse, oracle)
    Commit,
    /// Revealed values, one per (nebula, pulse, commitment)
    Reveal,
    /// Oracle signatures over the aggregated value hash
    Result,
    /// Data feed definitions
    Nebula,
    /// The authorized oracle set of each nebula
    NebulaOracles,
    /// Validator -> chain type -> oracle key registrations
    Oracle,
    /// Round-start markers, one per (chain type, ledger height)
    Round,
    /// Reputation scores of validators
    Score,
    /// Raw vote lists consumed by the external score calculator
    Vote,
}

impl DbKeyPrefix {
    pub fn as_str(self) -> &'static str {
        match self {
            DbKeyPrefix::Commit => "commit",
            DbKeyPrefix::Reveal => "reveal",
            DbKeyPrefix::Result => "result",
            DbKeyPrefix::Nebula => "nebula",
            DbKeyPrefix::NebulaOracles => "nebula_oracles",
            DbKeyPrefix::Oracle => "oracle",
            DbKeyPrefix::Round => "round",
            DbKeyPrefix::Score => "score",
            DbKeyPrefix::Vote => "vote",
        }
    }
}

impl fmt::Display for DbKeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed record of the ledger store: a key renderable to its wire string
/// and the JSON value stored under it.
pub trait LedgerKey: fmt::Debug {
    type Value: Serialize + DeserializeOwned + fmt::Debug;

    fn key_string(&self) -> String;
}

/// A typed prefix usable to scan one or more [`LedgerKey`] records.
pub trait LedgerKeyPrefix: fmt::Debug {
    type Record: LedgerKey;

    fn prefix_string(&self) -> String;
}

pub fn encode_value<K: LedgerKey>(value: &K::Value) -> Vec<u8> {
    serde_json::to_vec(value).expect("ledger values serialize infallibly")
}

pub fn decode_value<K: LedgerKey>(bytes: &[u8]) -> anyhow::Result<K::Value> {
    Ok(serde_json::from_slice(bytes)?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitKey {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub oracle: OraclePubKey,
}

impl LedgerKey for CommitKey {
    type Value = Hash256;

    fn key_string(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            DbKeyPrefix::Commit,
            self.nebula,
            self.pulse_id,
            self.oracle
        )
    }
}

/// All commits of one pulse.
#[derive(Debug, Clone, Copy)]
pub struct CommitByPulsePrefix {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
}

impl LedgerKeyPrefix for CommitByPulsePrefix {
    type Record = CommitKey;

    fn prefix_string(&self) -> String {
        format!("{}_{}_{}_", DbKeyPrefix::Commit, self.nebula, self.pulse_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevealKey {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub commitment: Hash256,
}

impl LedgerKey for RevealKey {
    type Value = RawValue;

    fn key_string(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            DbKeyPrefix::Reveal,
            self.nebula,
            self.pulse_id,
            self.commitment
        )
    }
}

/// All reveals of one pulse.
#[derive(Debug, Clone, Copy)]
pub struct RevealByPulsePrefix {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
}

impl LedgerKeyPrefix for RevealByPulsePrefix {
    type Record = RevealKey;

    fn prefix_string(&self) -> String {
        format!("{}_{}_{}_", DbKeyPrefix::Reveal, self.nebula, self.pulse_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultKey {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub oracle: OraclePubKey,
}

impl LedgerKey for ResultKey {
    type Value = OracleSignature;

    fn key_string(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            DbKeyPrefix::Result,
            self.nebula,
            self.pulse_id,
            self.oracle
        )
    }
}

/// All result signatures of one pulse.
#[derive(Debug, Clone, Copy)]
pub struct ResultByPulsePrefix {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
}

impl LedgerKeyPrefix for ResultByPulsePrefix {
    type Record = ResultKey;

    fn prefix_string(&self) -> String {
        format!("{}_{}_{}_", DbKeyPrefix::Result, self.nebula, self.pulse_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NebulaKey {
    pub nebula: NebulaId,
}

impl LedgerKey for NebulaKey {
    type Value = Nebula;

    fn key_string(&self) -> String {
        format!("{}_{}", DbKeyPrefix::Nebula, self.nebula)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NebulaOraclesKey {
    pub nebula: NebulaId,
}

impl LedgerKey for NebulaOraclesKey {
    /// Sorted, so every node sees the same oracle ordering
    type Value = BTreeSet<OraclePubKey>;

    fn key_string(&self) -> String {
        format!("{}_{}", DbKeyPrefix::NebulaOracles, self.nebula)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OracleByConsulKey {
    pub chain_type: ChainType,
    pub consul: ConsulPubKey,
}

impl LedgerKey for OracleByConsulKey {
    type Value = OraclePubKey;

    fn key_string(&self) -> String {
        format!("{}_{}_{}", DbKeyPrefix::Oracle, self.chain_type, self.consul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundKey {
    pub chain_type: ChainType,
    pub ledger_height: u64,
}

impl LedgerKey for RoundKey {
    /// The target chain height recorded at this ledger height
    type Value = u64;

    fn key_string(&self) -> String {
        format!(
            "{}_{}_{}",
            DbKeyPrefix::Round,
            self.chain_type,
            self.ledger_height
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreKey {
    pub consul: ConsulPubKey,
}

impl LedgerKey for ScoreKey {
    type Value = Score;

    fn key_string(&self) -> String {
        format!("{}_{}", DbKeyPrefix::Score, self.consul)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteKey {
    pub consul: ConsulPubKey,
}

impl LedgerKey for VoteKey {
    type Value = Vec<VoteEntry>;

    fn key_string(&self) -> String {
        format!("{}_{}", DbKeyPrefix::Vote, self.consul)
    }
}
