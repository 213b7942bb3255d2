#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

//! Protocol types shared between the ledger state machine and the oracle node.
//!
//! Everything that crosses the wire lives here: identifiers, keccak digests,
//! signed transactions and their per-function argument payloads, the sub-round
//! clock that synchronizes independent nodes, and the string key space of the
//! replicated ledger.

pub mod encoding;
pub mod error;
pub mod hash;
pub mod keys;
pub mod round;
pub mod task;
pub mod transaction;
pub mod types;
pub mod util;

pub use error::LedgerError;
pub use hash::Hash256;
pub use round::SubRound;
pub use transaction::{Transaction, TxFunc};
pub use types::{
    ChainType, ConsulPubKey, Nebula, OraclePubKey, NebulaId, PulseId, Score, SubscriberId,
};
