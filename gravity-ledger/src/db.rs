//! Key/value storage abstraction the state machine runs against.
//!
//! The shape mirrors the host ledger's storage layer: a database hands out
//! single-writer transactions with raw string-keyed operations, and
//! [`LedgerTransaction`] layers the typed key space of
//! [`gravity_core::keys`] on top. The consensus engine begins one transaction
//! per ledger height, applies every submitted transaction through it and
//! commits the batch; rejected transactions leave no writes behind because
//! the state machine only writes after all checks of a function passed.

use std::fmt::Debug;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use gravity_core::keys::{LedgerKey, LedgerKeyPrefix, decode_value, encode_value};

/// Stream of raw `(key, value)` pairs in ascending key order.
pub type PrefixStream<'a> = Pin<Box<dyn Stream<Item = (String, Vec<u8>)> + Send + 'a>>;

#[async_trait]
pub trait IRawDatabase: Debug + Send + Sync + 'static {
    async fn begin_transaction<'a>(&'a self) -> Box<dyn IRawDatabaseTransaction + 'a>;
}

/// A single-use storage transaction.
///
/// Uncommitted writes must be visible to reads through the same transaction;
/// nothing is visible to other transactions until [`Self::commit_tx`].
#[async_trait]
pub trait IRawDatabaseTransaction: Debug + Send + Sync {
    async fn raw_insert_entry(
        &mut self,
        key: &str,
        value: Vec<u8>,
    ) -> anyhow::Result<Option<Vec<u8>>>;

    async fn raw_get_value(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    async fn raw_remove_entry(&mut self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Scan all entries whose key starts with `prefix`, ascending.
    async fn raw_find_by_prefix(&self, prefix: &str) -> anyhow::Result<PrefixStream<'_>>;

    async fn commit_tx(self: Box<Self>) -> anyhow::Result<()>;
}

/// Typed view over a raw storage transaction.
pub struct LedgerTransaction<'a> {
    raw: Box<dyn IRawDatabaseTransaction + 'a>,
}

impl Debug for LedgerTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerTransaction").finish_non_exhaustive()
    }
}

impl<'a> LedgerTransaction<'a> {
    pub fn new(raw: Box<dyn IRawDatabaseTransaction + 'a>) -> Self {
        Self { raw }
    }

    pub async fn get_value<K: LedgerKey>(&self, key: &K) -> anyhow::Result<Option<K::Value>> {
        self.raw
            .raw_get_value(&key.key_string())
            .await?
            .map(|bytes| decode_value::<K>(&bytes))
            .transpose()
    }

    /// Insert a value, returning the previous one if any.
    pub async fn insert_entry<K: LedgerKey>(
        &mut self,
        key: &K,
        value: &K::Value,
    ) -> anyhow::Result<Option<K::Value>> {
        self.raw
            .raw_insert_entry(&key.key_string(), encode_value::<K>(value))
            .await?
            .map(|bytes| decode_value::<K>(&bytes))
            .transpose()
    }

    pub async fn remove_entry<K: LedgerKey>(&mut self, key: &K) -> anyhow::Result<Option<K::Value>> {
        self.raw
            .raw_remove_entry(&key.key_string())
            .await?
            .map(|bytes| decode_value::<K>(&bytes))
            .transpose()
    }

    /// Collect every record under the typed prefix, in ascending key order.
    pub async fn find_by_prefix<P: LedgerKeyPrefix>(
        &self,
        prefix: &P,
    ) -> anyhow::Result<Vec<(String, <P::Record as LedgerKey>::Value)>> {
        use futures::StreamExt as _;

        let mut stream = self.raw.raw_find_by_prefix(&prefix.prefix_string()).await?;
        let mut entries = Vec::new();
        while let Some((key, bytes)) = stream.next().await {
            entries.push((key, decode_value::<P::Record>(&bytes)?));
        }
        Ok(entries)
    }

    pub async fn commit_tx(self) -> anyhow::Result<()> {
        self.raw.commit_tx().await
    }
}
