#![deny(clippy::pedantic)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use gravity_core::task::TaskGroup;
use gravity_logging::{LOG_ORACLE, TracingSetup};
use gravity_oracle::adaptor::HttpTargetChainRpc;
use gravity_oracle::extractor::HttpExtractor;
use gravity_oracle::ledger_rpc::HttpLedgerRpc;
use gravity_oracle::{
    IExtractor as _, ILedgerRpc as _, ITargetChainRpc as _, OracleConfig, OracleNode,
};
use tracing::info;

/// Time we will wait before forcefully shutting down tasks
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "gravity-oracled", version)]
struct ServerOpts {
    /// Path to the JSON node configuration
    #[arg(long = "config", env = "GRAVITY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = ServerOpts::parse();
    TracingSetup::default().init()?;

    let config_bytes = std::fs::read(&opts.config)
        .with_context(|| format!("failed to read config {}", opts.config.display()))?;
    let config: OracleConfig =
        serde_json::from_slice(&config_bytes).context("failed to parse config")?;

    let ledger = HttpLedgerRpc::new(&config.ledger_url).into_dyn();
    let target_chain = HttpTargetChainRpc::new(&config.target_chain_url).into_dyn();
    let extractor = HttpExtractor::new(&config.extractor_url).into_dyn();

    let task_group = TaskGroup::new();
    let node = OracleNode::new(&config, ledger, target_chain, extractor, task_group.clone())?;
    task_group.spawn("oracle poll loop", |handle| node.run(handle));

    tokio::signal::ctrl_c()
        .await
        .context("failed to install the shutdown signal handler")?;
    info!(target: LOG_ORACLE, "shutdown signal received");
    task_group.shutdown();
    task_group.join_all(Some(SHUTDOWN_TIMEOUT)).await
}
