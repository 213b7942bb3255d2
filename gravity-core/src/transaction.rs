use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use secp256k1::schnorr::Signature;
use secp256k1::{Keypair, Message, SECP256K1};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::Hash256;
use crate::round::SubRound;
use crate::types::{
    ChainType, ConsulPubKey, NebulaId, OraclePubKey, OracleSignature, PulseId, RawValue, Score,
    SubscriberId,
};

/// The ledger functions a validator can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxFunc {
    Commit,
    Reveal,
    Result,
    AddOracle,
    AddOracleInNebula,
    NewRound,
    Vote,
    SetNebula,
}

impl TxFunc {
    pub const ALL: [TxFunc; 8] = [
        TxFunc::Commit,
        TxFunc::Reveal,
        TxFunc::Result,
        TxFunc::AddOracle,
        TxFunc::AddOracleInNebula,
        TxFunc::NewRound,
        TxFunc::Vote,
        TxFunc::SetNebula,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TxFunc::Commit => "commit",
            TxFunc::Reveal => "reveal",
            TxFunc::Result => "result",
            TxFunc::AddOracle => "addOracle",
            TxFunc::AddOracleInNebula => "addOracleInNebula",
            TxFunc::NewRound => "newRound",
            TxFunc::Vote => "vote",
            TxFunc::SetNebula => "setNebula",
        }
    }

    /// The sub-round this function is gated to, if any.
    ///
    /// Registration and bookkeeping functions may land at any height.
    pub fn sub_round(self) -> Option<SubRound> {
        match self {
            TxFunc::Commit => Some(SubRound::Commit),
            TxFunc::Reveal => Some(SubRound::Reveal),
            TxFunc::Result => Some(SubRound::Result),
            _ => None,
        }
    }
}

impl fmt::Display for TxFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxFunc {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TxFunc::ALL
            .into_iter()
            .find(|func| func.as_str() == s)
            .ok_or_else(|| anyhow::format_err!("unknown ledger function: {s}"))
    }
}

/// A signed ledger transaction, JSON-encoded on the wire.
///
/// `id` is the keccak digest of the canonical preimage of all signed fields
/// and `signature` is schnorr over `id`, so a transaction cannot be replayed
/// with altered arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Hash256,
    pub sender_pub_key: ConsulPubKey,
    pub signature: Signature,
    /// Kept as a string so an unknown function is a rejection, not a parse
    /// failure of the whole envelope
    pub func: String,
    pub timestamp: u64,
    pub args: serde_json::Value,
}

impl Transaction {
    /// Build and sign a transaction with the validator's ledger key.
    pub fn create(
        keypair: &Keypair,
        func: TxFunc,
        args: &impl Serialize,
        timestamp: u64,
    ) -> anyhow::Result<Transaction> {
        Transaction::create_raw(keypair, func.as_str(), args, timestamp)
    }

    /// [`Transaction::create`] for a function the local build does not know.
    ///
    /// The wire carries the function as a string, so a newer peer may submit
    /// functions this build cannot name; the ledger answers those with a
    /// `FuncNotFound` rejection rather than a parse failure.
    pub fn create_raw(
        keypair: &Keypair,
        func: &str,
        args: &impl Serialize,
        timestamp: u64,
    ) -> anyhow::Result<Transaction> {
        let sender_pub_key = keypair.x_only_public_key().0;
        let args = serde_json::to_value(args)?;
        let id = Transaction::compute_id(&sender_pub_key, func, timestamp, &args)?;
        let signature =
            SECP256K1.sign_schnorr(&Message::from_digest(id.to_byte_array()), keypair);

        Ok(Transaction {
            id,
            sender_pub_key,
            signature,
            func: func.to_owned(),
            timestamp,
            args,
        })
    }

    /// Check that `id` matches the transaction's contents and that
    /// `signature` is a valid schnorr signature over `id` by the sender.
    pub fn verify(&self) -> bool {
        let Ok(expected_id) =
            Transaction::compute_id(&self.sender_pub_key, &self.func, self.timestamp, &self.args)
        else {
            return false;
        };
        if expected_id != self.id {
            return false;
        }

        SECP256K1
            .verify_schnorr(
                &self.signature,
                &Message::from_digest(self.id.to_byte_array()),
                &self.sender_pub_key,
            )
            .is_ok()
    }

    pub fn typed_args<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.args.clone())
    }

    fn compute_id(
        sender: &ConsulPubKey,
        func: &str,
        timestamp: u64,
        args: &serde_json::Value,
    ) -> anyhow::Result<Hash256> {
        // canonical: serde_json orders object keys, so equal args hash equally
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&sender.serialize());
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(func.as_bytes());
        preimage.push(0x00);
        preimage.extend_from_slice(&serde_json::to_vec(args)?);
        Ok(Hash256::digest(&preimage))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitArgs {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    /// keccak of the not-yet-revealed value
    pub commitment: Hash256,
    pub oracle: OraclePubKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevealArgs {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub oracle: OraclePubKey,
    pub commitment: Hash256,
    pub value: RawValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultArgs {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub oracle: OraclePubKey,
    pub chain_type: ChainType,
    /// chain-specific signature over the aggregated value's hash
    pub signature: OracleSignature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOracleArgs {
    pub chain_type: ChainType,
    pub oracle: OraclePubKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOracleInNebulaArgs {
    pub nebula: NebulaId,
    pub oracle: OraclePubKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoundArgs {
    pub chain_type: ChainType,
    /// the submitter's own view of the target chain height
    pub target_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteEntry {
    pub target: ConsulPubKey,
    pub score: Score,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteArgs {
    pub votes: Vec<VoteEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetNebulaArgs {
    pub nebula: NebulaId,
    pub chain_type: ChainType,
    pub min_score: Score,
    pub subscriptions: BTreeSet<SubscriberId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> Keypair {
        Keypair::new(SECP256K1, &mut rand::thread_rng())
    }

    #[test]
    fn func_str_round_trip() {
        for func in TxFunc::ALL {
            assert_eq!(func.as_str().parse::<TxFunc>().unwrap(), func);
        }
        assert!("mintMoney".parse::<TxFunc>().is_err());
    }

    #[test]
    fn signed_transaction_verifies() {
        let keypair = test_keypair();
        let args = NewRoundArgs {
            chain_type: ChainType::Ethereum,
            target_height: 1337,
        };
        let tx = Transaction::create(&keypair, TxFunc::NewRound, &args, 1_700_000_000_000)
            .expect("create");

        assert!(tx.verify());
        assert_eq!(tx.typed_args::<NewRoundArgs>().unwrap(), args);
    }

    #[test]
    fn tampered_args_fail_verification() {
        let keypair = test_keypair();
        let args = NewRoundArgs {
            chain_type: ChainType::Ethereum,
            target_height: 1337,
        };
        let mut tx = Transaction::create(&keypair, TxFunc::NewRound, &args, 1_700_000_000_000)
            .expect("create");
        tx.args["targetHeight"] = serde_json::json!(1338);

        assert!(!tx.verify());
    }

    #[test]
    fn json_round_trip() {
        let keypair = test_keypair();
        let args = AddOracleArgs {
            chain_type: ChainType::Waves,
            oracle: OraclePubKey::new([7; 33]),
        };
        let tx =
            Transaction::create(&keypair, TxFunc::AddOracle, &args, 42).expect("create");

        let json = serde_json::to_string(&tx).expect("serializes");
        let decoded: Transaction = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(decoded, tx);
        assert!(decoded.verify());
    }
}
