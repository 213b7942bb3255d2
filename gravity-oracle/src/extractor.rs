//! Contract toward the external data extraction service.

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use gravity_core::types::RawValue;
use serde::{Deserialize, Serialize};

pub type DynExtractor = Arc<dyn IExtractor + Send + Sync>;

/// Produces observations and knows how to aggregate revealed ones.
///
/// Values are opaque bytes to the protocol; only the extractor interprets
/// them, so commit/reveal/result stay agnostic to what is being observed.
#[async_trait]
pub trait IExtractor: Debug + Send + Sync + 'static {
    /// A fresh observation of the external data source.
    async fn extract(&self) -> anyhow::Result<RawValue>;

    /// Fold all revealed values of a pulse into the single agreed value.
    async fn aggregate(&self, values: Vec<RawValue>) -> anyhow::Result<RawValue>;

    fn into_dyn(self) -> DynExtractor
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValueResponse {
    value: RawValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregateRequest<'a> {
    values: &'a [RawValue],
}

/// HTTP client for the extraction service.
#[derive(Debug)]
pub struct HttpExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(base_url: &str) -> HttpExtractor {
        HttpExtractor {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl IExtractor for HttpExtractor {
    async fn extract(&self) -> anyhow::Result<RawValue> {
        let response: ValueResponse = self
            .client
            .get(format!("{}/extract", self.base_url))
            .send()
            .await
            .context("extractor unavailable")?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.value)
    }

    async fn aggregate(&self, values: Vec<RawValue>) -> anyhow::Result<RawValue> {
        let response: ValueResponse = self
            .client
            .post(format!("{}/aggregate", self.base_url))
            .json(&AggregateRequest { values: &values })
            .send()
            .await
            .context("extractor unavailable")?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.value)
    }
}
