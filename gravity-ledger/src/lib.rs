#![deny(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

//! The ledger-side state-transition function of the oracle network.
//!
//! Every replica of the ledger applies submitted transactions through
//! [`store::process_transaction`] against a key/value store. The function is
//! deterministic given the store contents and the transaction, so replicas
//! that apply the same sequence reach the same state. The surrounding
//! consensus engine is the serializing authority: it applies transactions one
//! at a time per ledger height and supplies the storage transaction, so the
//! store performs no locking of its own.

pub mod db;
pub mod mem_impl;
pub mod store;

pub use db::{IRawDatabase, IRawDatabaseTransaction, LedgerTransaction};
pub use mem_impl::MemDatabase;
pub use store::{ChainHeightView, ProcessContext, process_transaction, seed_genesis, set_score};
