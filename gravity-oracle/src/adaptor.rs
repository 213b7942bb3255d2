//! The narrow per-target-chain adaptor contract.
//!
//! Everything chain-specific (transaction construction, contract bindings,
//! key handling for Ethereum/Waves/Solana) lives behind this trait; the
//! protocol engine only ever talks to a `DynTargetChainRpc`. The in-repo
//! implementation is an HTTP client for a chain bridge service exposing the
//! same five operations.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gravity_core::types::{NebulaId, OraclePubKey, OracleSignature, PulseId, RawValue};
use gravity_core::Hash256;
use serde::{Deserialize, Serialize};

pub type DynTargetChainRpc = Arc<dyn ITargetChainRpc + Send + Sync>;

/// Trait that allows interacting with one target blockchain.
#[async_trait]
pub trait ITargetChainRpc: Debug + Send + Sync + 'static {
    /// Current height of the chain.
    async fn get_height(&self) -> anyhow::Result<u64>;

    /// Sign a value hash with this node's chain-local oracle key.
    async fn sign(&self, hash: Hash256) -> anyhow::Result<OracleSignature>;

    /// Submit the agreed value hash together with the collected oracle
    /// signatures to the verifier contract. Returns the chain transaction id.
    async fn send_data_result(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        signatures: &BTreeMap<OraclePubKey, OracleSignature>,
        hash: Hash256,
    ) -> anyhow::Result<String>;

    /// Fan the agreed value out to every subscriber contract of the nebula.
    async fn send_data_to_subs(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        value: &RawValue,
    ) -> anyhow::Result<()>;

    /// Wait until the chain transaction is final.
    async fn wait_tx(&self, tx_id: &str) -> anyhow::Result<()>;

    fn into_dyn(self) -> DynTargetChainRpc
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    hash: Hash256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signature: OracleSignature,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResultRequest<'a> {
    nebula: NebulaId,
    pulse_id: PulseId,
    hash: Hash256,
    signatures: &'a BTreeMap<OraclePubKey, OracleSignature>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendResultResponse {
    tx_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendSubsRequest<'a> {
    nebula: NebulaId,
    pulse_id: PulseId,
    value: &'a RawValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaitTxRequest<'a> {
    tx_id: &'a str,
}

/// HTTP client for a chain bridge service satisfying the adaptor contract.
#[derive(Debug)]
pub struct HttpTargetChainRpc {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTargetChainRpc {
    pub fn new(base_url: &str) -> HttpTargetChainRpc {
        HttpTargetChainRpc {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn post<Req: Serialize + Sync>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> anyhow::Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/{endpoint}", self.base_url))
            .json(request)
            .send()
            .await
            .with_context(|| format!("target chain {endpoint} request failed"))?
            .error_for_status()
            .with_context(|| format!("target chain {endpoint} request rejected"))?;
        Ok(response)
    }
}

#[async_trait]
impl ITargetChainRpc for HttpTargetChainRpc {
    async fn get_height(&self) -> anyhow::Result<u64> {
        #[derive(Deserialize)]
        struct HeightResponse {
            height: u64,
        }

        let response: HeightResponse = self
            .client
            .get(format!("{}/height", self.base_url))
            .send()
            .await
            .context("target chain height request failed")?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.height)
    }

    async fn sign(&self, hash: Hash256) -> anyhow::Result<OracleSignature> {
        let response: SignResponse = self.post("sign", &SignRequest { hash }).await?.json().await?;
        Ok(response.signature)
    }

    async fn send_data_result(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        signatures: &BTreeMap<OraclePubKey, OracleSignature>,
        hash: Hash256,
    ) -> anyhow::Result<String> {
        let response: SendResultResponse = self
            .post(
                "send-result",
                &SendResultRequest {
                    nebula,
                    pulse_id,
                    hash,
                    signatures,
                },
            )
            .await?
            .json()
            .await?;
        Ok(response.tx_id)
    }

    async fn send_data_to_subs(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        value: &RawValue,
    ) -> anyhow::Result<()> {
        self.post(
            "send-subs",
            &SendSubsRequest {
                nebula,
                pulse_id,
                value,
            },
        )
        .await?;
        Ok(())
    }

    async fn wait_tx(&self, tx_id: &str) -> anyhow::Result<()> {
        self.post("wait-tx", &WaitTxRequest { tx_id }).await?;
        Ok(())
    }
}
