#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

//! The oracle node.
//!
//! A node owns one nebula on one target chain. A single polling loop reads
//! the replicated ledger height and the target chain height, derives the
//! current sub-round and drives every tracked pulse through
//! commit/reveal/result/relay, issuing at most one signed ledger transaction
//! per phase. All external collaborators sit behind dyn façades: the ledger
//! ([`ledger_rpc::ILedgerRpc`]), the target chain
//! ([`adaptor::ITargetChainRpc`]) and the data source
//! ([`extractor::IExtractor`]).

pub mod adaptor;
pub mod config;
pub mod executor;
pub mod extractor;
pub mod ledger_rpc;
pub mod node;

pub use adaptor::{DynTargetChainRpc, ITargetChainRpc};
pub use config::OracleConfig;
pub use executor::{OracleRoundExecutor, RoundState};
pub use extractor::{DynExtractor, IExtractor};
pub use ledger_rpc::{DynLedgerRpc, ILedgerRpc};
pub use node::OracleNode;
