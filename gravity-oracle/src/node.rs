//! The single polling loop that owns an executor.

use std::time::Duration;

use gravity_core::keys::RoundKey;
use gravity_core::task::{TaskGroup, TaskHandle};
use gravity_core::transaction::NewRoundArgs;
use gravity_core::types::{ChainType, NebulaId, PulseId};
use gravity_core::util::now_millis;
use gravity_core::{SubRound, Transaction, TxFunc};
use gravity_logging::LOG_ORACLE;
use secp256k1::Keypair;
use tracing::{debug, info, warn};

use crate::adaptor::DynTargetChainRpc;
use crate::config::OracleConfig;
use crate::executor::OracleRoundExecutor;
use crate::extractor::DynExtractor;
use crate::ledger_rpc::{DynLedgerRpc, query_typed};

/// One oracle node instance: one nebula, one target chain, one poll loop.
///
/// The loop is intentionally sequential; the protocol only needs eventual
/// progress and a single owner of the round-state map avoids every
/// synchronization question. The only concurrency is the post-relay
/// subscriber fan-out, which the executor spawns onto the task group.
#[derive(Debug)]
pub struct OracleNode {
    chain_type: ChainType,
    nebula: NebulaId,
    consul: Keypair,
    poll_interval: Duration,
    ledger: DynLedgerRpc,
    target_chain: DynTargetChainRpc,
    executor: OracleRoundExecutor,
}

impl OracleNode {
    pub fn new(
        config: &OracleConfig,
        ledger: DynLedgerRpc,
        target_chain: DynTargetChainRpc,
        extractor: DynExtractor,
        task_group: TaskGroup,
    ) -> anyhow::Result<OracleNode> {
        let consul = config.consul_keypair()?;
        let executor = OracleRoundExecutor::new(
            config.nebula,
            config.chain_type,
            consul,
            config.oracle,
            ledger.clone(),
            target_chain.clone(),
            extractor,
            task_group,
        );

        Ok(OracleNode {
            chain_type: config.chain_type,
            nebula: config.nebula,
            consul,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            ledger,
            target_chain,
            executor,
        })
    }

    /// Run until the task group shuts down.
    pub async fn run(mut self, handle: TaskHandle) {
        info!(
            target: LOG_ORACLE,
            chain = %self.chain_type,
            nebula = %self.nebula,
            "oracle node started"
        );
        while !handle.is_shutting_down() {
            if let Err(err) = self.poll_once().await {
                warn!(target: LOG_ORACLE, %err, "poll iteration failed");
            }
            tokio::select! {
                () = handle.shutdown_signal() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!(target: LOG_ORACLE, "oracle node stopped");
    }

    /// One polling iteration: observe both heights, make sure the round is
    /// started, then step every tracked pulse through the current sub-round.
    ///
    /// Public so harnesses can drive the loop deterministically.
    pub async fn poll_once(&mut self) -> anyhow::Result<()> {
        let ledger_height = self.ledger.ledger_height().await?;
        let target_height = self.target_chain.get_height().await?;
        let sub_round = SubRound::from_height(ledger_height);

        self.ensure_round_started(ledger_height, target_height)
            .await?;

        let newest = PulseId(target_height);
        self.executor.evict_completed(newest);
        self.executor.track(newest);
        self.executor.prune_stale(newest);

        for pulse in self.executor.tracked_pulses() {
            // one failing pulse must not stall the others
            if let Err(err) = self.executor.process_pulse(pulse, sub_round).await {
                warn!(
                    target: LOG_ORACLE,
                    %pulse,
                    %err,
                    "pulse processing failed, will retry next poll"
                );
            }
        }
        Ok(())
    }

    pub fn executor(&self) -> &OracleRoundExecutor {
        &self.executor
    }

    /// Record the round-start marker for this ledger height if nobody has
    /// yet. Losing the race to a peer is the common case and not an error.
    async fn ensure_round_started(
        &self,
        ledger_height: u64,
        target_height: u64,
    ) -> anyhow::Result<()> {
        let key = RoundKey {
            chain_type: self.chain_type,
            ledger_height,
        };
        if query_typed(&self.ledger, &key).await?.is_some() {
            return Ok(());
        }

        let args = NewRoundArgs {
            chain_type: self.chain_type,
            target_height,
        };
        let tx = Transaction::create(&self.consul, TxFunc::NewRound, &args, now_millis())?;
        match self.ledger.broadcast_tx(&tx).await {
            Ok(()) => {
                info!(
                    target: LOG_ORACLE,
                    ledger_height,
                    target_height,
                    "recorded round start"
                );
            }
            Err(err) => {
                debug!(target: LOG_ORACLE, %err, "round start not accepted");
            }
        }
        Ok(())
    }
}
