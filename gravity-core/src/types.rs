use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ledger-native validator key. Consuls sign ledger transactions with schnorr
/// over the transaction id.
pub type ConsulPubKey = secp256k1::XOnlyPublicKey;

/// Target chains a nebula can publish to.
///
/// The protocol engine never branches on a concrete chain beyond carrying this
/// tag; everything chain-specific lives behind the target-chain adaptor.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Ethereum,
    Waves,
    Solana,
}

impl ChainType {
    pub const ALL: [ChainType; 3] = [ChainType::Ethereum, ChainType::Waves, ChainType::Solana];

    pub fn as_str(self) -> &'static str {
        match self {
            ChainType::Ethereum => "ethereum",
            ChainType::Waves => "waves",
            ChainType::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainType::ALL
            .into_iter()
            .find(|chain| chain.as_str() == s)
            .ok_or_else(|| anyhow::format_err!("unknown chain type: {s}"))
    }
}

/// Identifier of a registered data feed.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NebulaId(#[serde(with = "crate::encoding::as_hex")] [u8; 32]);

impl NebulaId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_byte_array(self) -> [u8; 32] {
        self.0
    }
}

impl fmt::Display for NebulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NebulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NebulaId({})", hex::encode(self.0))
    }
}

impl FromStr for NebulaId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 32] = hex::decode(s)?
            .try_into()
            .map_err(|_| anyhow::format_err!("expected 32 bytes of hex"))?;
        Ok(Self(bytes))
    }
}

/// Chain-specific signer key of an oracle (compressed key material).
///
/// The byte order of `Ord` doubles as the deterministic oracle ordering used
/// for the relay rotation, so all nodes agree on it without coordination.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OraclePubKey(#[serde(with = "crate::encoding::as_hex")] [u8; 33]);

impl OraclePubKey {
    pub const fn new(bytes: [u8; 33]) -> Self {
        Self(bytes)
    }

    pub const fn to_byte_array(self) -> [u8; 33] {
        self.0
    }
}

impl fmt::Display for OraclePubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for OraclePubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OraclePubKey({})", hex::encode(self.0))
    }
}

impl FromStr for OraclePubKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes: [u8; 33] = hex::decode(s)?
            .try_into()
            .map_err(|_| anyhow::format_err!("expected 33 bytes of hex"))?;
        Ok(Self(bytes))
    }
}

/// Target-chain height being attested. One full
/// commit-reveal-result-relay cycle exists per (nebula, pulse).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PulseId(pub u64);

impl fmt::Display for PulseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reputation score of a validator.
///
/// A missing or negative score means the validator is unknown or banned;
/// every ledger mutation requires a non-negative sender score. One unit is
/// the smallest representable reputation step.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Score(pub i64);

impl Score {
    pub const ZERO: Score = Score(0);

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a subscriber contract on the target chain.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SubscriberId(#[serde(with = "crate::encoding::as_hex")] [u8; 32]);

impl SubscriberId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriberId({})", hex::encode(self.0))
    }
}

/// Observation bytes produced by an extractor and revealed on the ledger.
///
/// Opaque to the protocol: only the extractor's aggregation function
/// interprets them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawValue(#[serde(with = "crate::encoding::as_hex")] pub Vec<u8>);

impl RawValue {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawValue({})", hex::encode(&self.0))
    }
}

/// Chain-specific signature an oracle produced over an aggregated value hash.
///
/// Verified by the target chain's contract, never by the ledger, so it stays
/// opaque here.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleSignature(#[serde(with = "crate::encoding::as_hex")] pub Vec<u8>);

impl OracleSignature {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }
}

impl fmt::Debug for OracleSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OracleSignature({})", hex::encode(&self.0))
    }
}

/// A registered data feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nebula {
    pub owner: ConsulPubKey,
    pub chain_type: ChainType,
    /// Oracles are admitted only by validators whose score reaches this bar
    pub min_score: Score,
    pub subscriptions: BTreeSet<SubscriberId>,
}
