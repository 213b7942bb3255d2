//! Query/submit façade toward the replicated ledger.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gravity_core::Transaction;
use gravity_core::keys::{LedgerKey, LedgerKeyPrefix, decode_value};
use serde::{Deserialize, Serialize};

pub type DynLedgerRpc = Arc<dyn ILedgerRpc + Send + Sync>;

/// Trait that allows interacting with the ledger's query and broadcast
/// endpoints.
///
/// Queries run against the namespaced string key space; values are the JSON
/// encodings of the typed records in [`gravity_core::keys`].
#[async_trait]
pub trait ILedgerRpc: Debug + Send + Sync + 'static {
    /// Height of the latest applied ledger block.
    async fn ledger_height(&self) -> anyhow::Result<u64>;

    /// Exact key lookup (`"key"` query path).
    async fn query_key(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Prefix scan (`"prefix"` query path); keys ascending.
    async fn query_prefix(&self, prefix: &str) -> anyhow::Result<BTreeMap<String, Vec<u8>>>;

    /// Submit a signed transaction. A ledger-side rejection surfaces as an
    /// error here; the caller treats it like any other transient failure.
    async fn broadcast_tx(&self, tx: &Transaction) -> anyhow::Result<()>;

    fn into_dyn(self) -> DynLedgerRpc
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

/// Typed exact lookup over a dyn ledger rpc.
pub async fn query_typed<K: LedgerKey + Sync>(
    rpc: &DynLedgerRpc,
    key: &K,
) -> anyhow::Result<Option<K::Value>> {
    rpc.query_key(&key.key_string())
        .await?
        .map(|bytes| decode_value::<K>(&bytes))
        .transpose()
}

/// Typed prefix scan over a dyn ledger rpc, values in ascending key order.
pub async fn query_typed_prefix<P: LedgerKeyPrefix + Sync>(
    rpc: &DynLedgerRpc,
    prefix: &P,
) -> anyhow::Result<Vec<<P::Record as LedgerKey>::Value>> {
    rpc.query_prefix(&prefix.prefix_string())
        .await?
        .into_values()
        .map(|bytes| decode_value::<P::Record>(&bytes))
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    path: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyQueryResponse {
    value: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrefixQueryResponse {
    #[serde(default)]
    values: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastResponse {
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for a ledger node's RPC.
#[derive(Debug)]
pub struct HttpLedgerRpc {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLedgerRpc {
    pub fn new(base_url: &str) -> HttpLedgerRpc {
        HttpLedgerRpc {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn query(&self, path: &str, data: &str) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .json(&QueryRequest { path, data })
            .send()
            .await
            .context("ledger query failed")?
            .error_for_status()
            .context("ledger query rejected")?;
        Ok(response)
    }
}

#[async_trait]
impl ILedgerRpc for HttpLedgerRpc {
    async fn ledger_height(&self) -> anyhow::Result<u64> {
        #[derive(Deserialize)]
        struct HeightResponse {
            height: u64,
        }

        let response: HeightResponse = self
            .client
            .get(format!("{}/height", self.base_url))
            .send()
            .await
            .context("ledger height query failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.height)
    }

    async fn query_key(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let response: KeyQueryResponse = self.query("key", key).await?.json().await?;
        response
            .value
            .map(|value| serde_json::to_vec(&value).map_err(Into::into))
            .transpose()
    }

    async fn query_prefix(&self, prefix: &str) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let response: PrefixQueryResponse = self.query("prefix", prefix).await?.json().await?;
        response
            .values
            .into_iter()
            .map(|(key, value)| Ok((key, serde_json::to_vec(&value)?)))
            .collect()
    }

    async fn broadcast_tx(&self, tx: &Transaction) -> anyhow::Result<()> {
        let response: BroadcastResponse = self
            .client
            .post(format!("{}/broadcast", self.base_url))
            .json(tx)
            .send()
            .await
            .context("ledger broadcast failed")?
            .error_for_status()?
            .json()
            .await?;

        match response.error {
            Some(rejection) => Err(anyhow::format_err!("transaction rejected: {rejection}")),
            None => Ok(()),
        }
    }
}
