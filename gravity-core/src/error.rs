use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the ledger rejected a transaction.
///
/// Every variant is an expected, recoverable outcome of the protocol's
/// idempotency and ordering checks: the submitting node drops the rejection
/// and retries (or moves on) at its next poll. None of these ever corrupt
/// ledger state.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("invalid transaction signature")]
    InvalidSignature,
    #[error("sender score is negative or unknown")]
    InvalidScore,
    #[error("function is not allowed in the current sub-round")]
    InvalidSubRound,
    #[error("commit already exists")]
    CommitIsExist,
    #[error("commit does not exist")]
    CommitIsNotExist,
    #[error("reveal does not match the stored commit")]
    InvalidReveal,
    #[error("reveal already exists")]
    RevealIsExist,
    #[error("no reveal exists for the pulse yet")]
    RevealIsNotExist,
    #[error("round already started at this ledger height")]
    RoundIsExist,
    #[error("claimed target chain height does not match the chain")]
    InvalidHeight,
    #[error("no height source for the chain type")]
    InvalidChainType,
    #[error("oracle is already registered in the nebula")]
    OracleInNebulaIsExist,
    #[error("sender has no oracle key registered for the chain")]
    OracleNotFound,
    #[error("sender does not own the nebula")]
    InvalidNebulaOwner,
    #[error("nebula not found")]
    NebulaNotFound,
    #[error("unknown ledger function: {0}")]
    FuncNotFound(String),
    #[error("malformed arguments for {func}: {reason}")]
    MalformedArgs { func: String, reason: String },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn storage(err: impl std::fmt::Display) -> LedgerError {
        LedgerError::Storage(err.to_string())
    }

    pub fn malformed_args(func: &str, err: impl std::fmt::Display) -> LedgerError {
        LedgerError::MalformedArgs {
            func: func.to_owned(),
            reason: err.to_string(),
        }
    }
}
