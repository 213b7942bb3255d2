//! The oracle round protocol engine.
//!
//! One executor drives one nebula on one target chain. Per poll it steps a
//! pulse through the phase the ledger height dictates, guarded twice over:
//! by the in-memory [`RoundState`] (what this process already did) and by
//! ledger lookups (what already landed, possibly from a previous life of
//! this node). Transient failures leave the state untouched and are simply
//! retried at the next poll.

use std::collections::{BTreeMap, BTreeSet};

use gravity_core::keys::{CommitKey, NebulaOraclesKey, ResultKey, RevealByPulsePrefix, RevealKey};
use gravity_core::task::TaskGroup;
use gravity_core::transaction::{CommitArgs, ResultArgs, RevealArgs};
use gravity_core::types::{NebulaId, OraclePubKey, PulseId, RawValue};
use gravity_core::util::{backoff_util, now_millis, retry};
use gravity_core::{ChainType, Hash256, SubRound, Transaction, TxFunc};
use gravity_logging::{LOG_ORACLE, LOG_RELAY};
use secp256k1::Keypair;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adaptor::DynTargetChainRpc;
use crate::extractor::DynExtractor;
use crate::ledger_rpc::{DynLedgerRpc, query_typed, query_typed_prefix};

/// Entries older than this many pulses behind the newest observed one are
/// dropped even if they never finished; a pulse that stalls for that long
/// lost its relay window anyway and its facts live on the ledger.
const ROUND_RETENTION: u64 = 32;

/// Locally tracked progress of one pulse.
///
/// Never persisted: a crash loses in-flight progress but no ledger-committed
/// facts, so a restarted node re-derives what it can from the ledger before
/// acting again. Mutated only by the single polling loop that owns the
/// executor.
#[derive(Debug, Clone, Default)]
pub struct RoundState {
    /// Our own observation, kept until reveal; lost on restart
    pub observed: Option<RawValue>,
    pub commitment: Option<Hash256>,
    pub reveal_exists: bool,
    pub result_value: Option<RawValue>,
    pub result_hash: Option<Hash256>,
    pub is_sent: bool,
    /// Set by the background fan-out's completion report; the entry is
    /// dropped once the pulse also stops being the newest one
    pub fanout_complete: bool,
}

/// Whether the rotation selects `oracle` to relay `pulse`.
///
/// Relay duty is spread round-robin over the sorted authorized set instead of
/// every oracle racing to submit the same result.
pub fn is_relay_turn(oracles: &BTreeSet<OraclePubKey>, oracle: OraclePubKey, pulse: PulseId) -> bool {
    let Some(position) = oracles.iter().position(|authorized| *authorized == oracle) else {
        return false;
    };
    pulse.0 % oracles.len() as u64 == position as u64
}

#[derive(Debug)]
pub struct OracleRoundExecutor {
    nebula: NebulaId,
    chain_type: ChainType,
    consul: Keypair,
    oracle: OraclePubKey,
    ledger: DynLedgerRpc,
    target_chain: DynTargetChainRpc,
    extractor: DynExtractor,
    task_group: TaskGroup,
    rounds: BTreeMap<PulseId, RoundState>,
    completed_tx: mpsc::UnboundedSender<PulseId>,
    completed_rx: mpsc::UnboundedReceiver<PulseId>,
}

impl OracleRoundExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nebula: NebulaId,
        chain_type: ChainType,
        consul: Keypair,
        oracle: OraclePubKey,
        ledger: DynLedgerRpc,
        target_chain: DynTargetChainRpc,
        extractor: DynExtractor,
        task_group: TaskGroup,
    ) -> OracleRoundExecutor {
        let (completed_tx, completed_rx) = mpsc::unbounded_channel();
        OracleRoundExecutor {
            nebula,
            chain_type,
            consul,
            oracle,
            ledger,
            target_chain,
            extractor,
            task_group,
            rounds: BTreeMap::new(),
            completed_tx,
            completed_rx,
        }
    }

    /// Start tracking a pulse if it is not tracked yet.
    pub fn track(&mut self, pulse: PulseId) {
        self.rounds.entry(pulse).or_default();
    }

    pub fn tracked_pulses(&self) -> Vec<PulseId> {
        self.rounds.keys().copied().collect()
    }

    pub fn round_state(&self, pulse: PulseId) -> Option<&RoundState> {
        self.rounds.get(&pulse)
    }

    /// Drop entries whose subscriber fan-out finished since the last poll.
    ///
    /// An entry whose pulse is still the newest one is only marked: its
    /// `is_sent` guard must survive while the pulse keeps being observed, or
    /// the next poll would re-track it from scratch and relay it again.
    pub fn evict_completed(&mut self, newest: PulseId) {
        while let Ok(pulse) = self.completed_rx.try_recv() {
            if let Some(state) = self.rounds.get_mut(&pulse) {
                state.fanout_complete = true;
            }
        }
        self.rounds.retain(|pulse, state| {
            let finished = state.fanout_complete && *pulse < newest;
            if finished {
                debug!(target: LOG_ORACLE, %pulse, "evicted finished round");
            }
            !finished
        });
    }

    /// Drop entries that fell out of the retention window.
    pub fn prune_stale(&mut self, newest: PulseId) {
        let cutoff = newest.0.saturating_sub(ROUND_RETENTION);
        self.rounds.retain(|pulse, _| pulse.0 >= cutoff);
    }

    /// Advance one pulse by one phase. Called once per poll per tracked
    /// pulse; every branch is idempotent.
    pub async fn process_pulse(
        &mut self,
        pulse: PulseId,
        sub_round: SubRound,
    ) -> anyhow::Result<()> {
        self.track(pulse);
        match sub_round {
            SubRound::Commit => self.commit_phase(pulse).await,
            SubRound::Reveal => self.reveal_phase(pulse).await,
            SubRound::Result => self.result_phase(pulse).await,
            SubRound::Relay => self.relay_phase(pulse).await,
        }
    }

    async fn commit_phase(&mut self, pulse: PulseId) -> anyhow::Result<()> {
        if self
            .rounds
            .get(&pulse)
            .is_some_and(|state| state.commitment.is_some())
        {
            return Ok(());
        }

        // an earlier attempt or a previous life of this node may have landed
        // a commit already
        let key = CommitKey {
            nebula: self.nebula,
            pulse_id: pulse,
            oracle: self.oracle,
        };
        if let Some(existing) = query_typed(&self.ledger, &key).await? {
            debug!(target: LOG_ORACLE, %pulse, "adopting commit found on the ledger");
            self.rounds.entry(pulse).or_default().commitment = Some(existing);
            return Ok(());
        }

        let value = match self.extractor.extract().await {
            Ok(value) => value,
            Err(err) => {
                debug!(target: LOG_ORACLE, %pulse, %err, "extractor unavailable, deferring commit");
                return Ok(());
            }
        };
        let commitment = Hash256::digest(value.as_slice());

        let args = CommitArgs {
            nebula: self.nebula,
            pulse_id: pulse,
            commitment,
            oracle: self.oracle,
        };
        let tx = Transaction::create(&self.consul, TxFunc::Commit, &args, now_millis())?;
        self.ledger.broadcast_tx(&tx).await?;
        info!(target: LOG_ORACLE, %pulse, %commitment, "committed observation");

        let state = self.rounds.entry(pulse).or_default();
        state.observed = Some(value);
        state.commitment = Some(commitment);
        Ok(())
    }

    async fn reveal_phase(&mut self, pulse: PulseId) -> anyhow::Result<()> {
        let Some(commitment) = self.rounds.get(&pulse).and_then(|state| state.commitment) else {
            return Ok(());
        };
        if self
            .rounds
            .get(&pulse)
            .is_some_and(|state| state.reveal_exists)
        {
            return Ok(());
        }

        let key = RevealKey {
            nebula: self.nebula,
            pulse_id: pulse,
            commitment,
        };
        if query_typed(&self.ledger, &key).await?.is_some() {
            self.rounds.entry(pulse).or_default().reveal_exists = true;
            return Ok(());
        }

        let Some(value) = self
            .rounds
            .get(&pulse)
            .and_then(|state| state.observed.clone())
        else {
            // committed in a previous life, preimage is gone; this pulse can
            // no longer be revealed by us
            debug!(target: LOG_ORACLE, %pulse, "no preimage for our commit, skipping reveal");
            return Ok(());
        };

        let args = RevealArgs {
            nebula: self.nebula,
            pulse_id: pulse,
            oracle: self.oracle,
            commitment,
            value,
        };
        let tx = Transaction::create(&self.consul, TxFunc::Reveal, &args, now_millis())?;
        self.ledger.broadcast_tx(&tx).await?;
        info!(target: LOG_ORACLE, %pulse, %commitment, "revealed observation");

        self.rounds.entry(pulse).or_default().reveal_exists = true;
        Ok(())
    }

    async fn result_phase(&mut self, pulse: PulseId) -> anyhow::Result<()> {
        if self
            .rounds
            .get(&pulse)
            .is_some_and(|state| state.result_hash.is_some())
        {
            return Ok(());
        }
        if !self
            .rounds
            .get(&pulse)
            .is_some_and(|state| state.reveal_exists)
        {
            return Ok(());
        }

        // liveness-sensitive: this is the one step that depends on *other*
        // oracles' reveals being visible
        let reveals: Vec<RawValue> = query_typed_prefix(
            &self.ledger,
            &RevealByPulsePrefix {
                nebula: self.nebula,
                pulse_id: pulse,
            },
        )
        .await?;
        if reveals.is_empty() {
            return Ok(());
        }

        let aggregate = match self.extractor.aggregate(reveals).await {
            Ok(aggregate) => aggregate,
            Err(err) => {
                debug!(target: LOG_ORACLE, %pulse, %err, "aggregation unavailable, deferring result");
                return Ok(());
            }
        };
        let result_hash = Hash256::digest(aggregate.as_slice());

        let signature = self.target_chain.sign(result_hash).await?;
        let args = ResultArgs {
            nebula: self.nebula,
            pulse_id: pulse,
            oracle: self.oracle,
            chain_type: self.chain_type,
            signature,
        };
        let tx = Transaction::create(&self.consul, TxFunc::Result, &args, now_millis())?;
        self.ledger.broadcast_tx(&tx).await?;
        info!(target: LOG_ORACLE, %pulse, %result_hash, "signed aggregated result");

        let state = self.rounds.entry(pulse).or_default();
        state.result_value = Some(aggregate);
        state.result_hash = Some(result_hash);
        Ok(())
    }

    async fn relay_phase(&mut self, pulse: PulseId) -> anyhow::Result<()> {
        if self
            .rounds
            .get(&pulse)
            .is_some_and(|state| state.is_sent)
        {
            return Ok(());
        }
        let Some((result_hash, result_value)) = self.rounds.get(&pulse).and_then(|state| {
            Some((state.result_hash?, state.result_value.clone()?))
        }) else {
            return Ok(());
        };

        let oracles: BTreeSet<OraclePubKey> = query_typed(
            &self.ledger,
            &NebulaOraclesKey {
                nebula: self.nebula,
            },
        )
        .await?
        .unwrap_or_default();
        if !is_relay_turn(&oracles, self.oracle, pulse) {
            return Ok(());
        }

        let mut signatures = BTreeMap::new();
        for oracle in &oracles {
            let key = ResultKey {
                nebula: self.nebula,
                pulse_id: pulse,
                oracle: *oracle,
            };
            if let Some(signature) = query_typed(&self.ledger, &key).await? {
                signatures.insert(*oracle, signature);
            }
        }

        let tx_id = self
            .target_chain
            .send_data_result(self.nebula, pulse, &signatures, result_hash)
            .await?;
        info!(
            target: LOG_RELAY,
            %pulse,
            %result_hash,
            signatures = signatures.len(),
            %tx_id,
            "relayed result to the target chain"
        );
        self.rounds.entry(pulse).or_default().is_sent = true;

        // fan-out runs independently of the poll loop; it only reads its own
        // copies and reports back for eviction when done
        let target_chain = self.target_chain.clone();
        let completed = self.completed_tx.clone();
        let nebula = self.nebula;
        self.task_group
            .spawn_cancellable(format!("fan-out pulse {pulse}"), async move {
                let finalized = retry(
                    "wait for relay transaction",
                    backoff_util::aggressive_backoff(),
                    || async { target_chain.wait_tx(&tx_id).await },
                )
                .await;
                match finalized {
                    Ok(()) => {
                        if let Err(err) = retry(
                            "subscriber fan-out",
                            backoff_util::background_backoff(),
                            || async {
                                target_chain
                                    .send_data_to_subs(nebula, pulse, &result_value)
                                    .await
                            },
                        )
                        .await
                        {
                            warn!(target: LOG_RELAY, %pulse, %err, "subscriber fan-out failed");
                        }
                    }
                    Err(err) => {
                        warn!(
                            target: LOG_RELAY,
                            %pulse,
                            %err,
                            "relay transaction did not finalize, skipping subscriber fan-out"
                        );
                    }
                }
                let _ = completed.send(pulse);
            });
        Ok(())
    }
}
