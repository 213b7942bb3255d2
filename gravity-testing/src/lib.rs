#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]

//! In-process fakes for exercising the oracle round protocol.
//!
//! [`FakeLedger`] is a real ledger in miniature: it applies broadcast
//! transactions through the actual state machine against an in-memory
//! database, at a height the test controls, so sub-round gating and every
//! rejection path behave exactly as in production. [`FakeTargetChain`] and
//! [`FakeExtractor`] record what the node does to them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt as _;
use gravity_core::keys::LedgerKey;
use gravity_core::transaction::{
    AddOracleArgs, AddOracleInNebulaArgs, SetNebulaArgs,
};
use gravity_core::types::{
    ChainType, ConsulPubKey, NebulaId, OraclePubKey, OracleSignature, PulseId, RawValue, Score,
    SubscriberId,
};
use gravity_core::util::now_millis;
use gravity_core::{Hash256, LedgerError, Transaction, TxFunc};
use gravity_ledger::store::{ChainHeightView, ProcessContext};
use gravity_ledger::{IRawDatabase as _, LedgerTransaction, MemDatabase, process_transaction, seed_genesis};
use gravity_oracle::adaptor::ITargetChainRpc;
use gravity_oracle::extractor::IExtractor;
use gravity_oracle::ledger_rpc::ILedgerRpc;
use gravity_oracle::OracleConfig;
use secp256k1::Keypair;

/// Target chain heights shared between the fake ledger's `newRound`
/// validation and the fake chains themselves, exactly like production where
/// both observe the same chain.
#[derive(Debug, Clone, Default)]
pub struct SharedChainHeights(Arc<Mutex<BTreeMap<ChainType, u64>>>);

impl SharedChainHeights {
    pub fn set(&self, chain_type: ChainType, height: u64) {
        self.0
            .lock()
            .expect("lock poisoned")
            .insert(chain_type, height);
    }

    pub fn get(&self, chain_type: ChainType) -> Option<u64> {
        self.0.lock().expect("lock poisoned").get(&chain_type).copied()
    }
}

#[async_trait]
impl ChainHeightView for SharedChainHeights {
    async fn height(&self, chain_type: ChainType) -> anyhow::Result<Option<u64>> {
        Ok(self.get(chain_type))
    }
}

/// A single-replica ledger: the genuine state machine over a [`MemDatabase`],
/// with the ledger height under test control.
#[derive(Debug, Clone)]
pub struct FakeLedger {
    db: MemDatabase,
    height: Arc<AtomicU64>,
    chain_heights: SharedChainHeights,
}

impl FakeLedger {
    pub async fn new(consuls: &[ConsulPubKey], chain_heights: SharedChainHeights) -> FakeLedger {
        let ledger = FakeLedger {
            db: MemDatabase::new(),
            height: Arc::new(AtomicU64::new(0)),
            chain_heights,
        };
        let mut dbtx = LedgerTransaction::new(ledger.db.begin_transaction().await);
        seed_genesis(&mut dbtx, consuls).await.expect("seeds");
        dbtx.commit_tx().await.expect("commits");
        ledger
    }

    pub fn set_height(&self, ledger_height: u64) {
        self.height.store(ledger_height, Ordering::SeqCst);
    }

    pub fn current_height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Apply a transaction at the current height, as a consensus round would.
    pub async fn apply(&self, tx: &Transaction) -> Result<(), LedgerError> {
        let mut dbtx = LedgerTransaction::new(self.db.begin_transaction().await);
        let ctx = ProcessContext {
            ledger_height: self.current_height(),
            chain_heights: &self.chain_heights,
        };
        process_transaction(&mut dbtx, tx, &ctx).await?;
        dbtx.commit_tx().await.map_err(LedgerError::storage)?;
        Ok(())
    }

    /// Typed read of the current ledger state, for assertions.
    pub async fn get<K: LedgerKey>(&self, key: &K) -> Option<K::Value> {
        LedgerTransaction::new(self.db.begin_transaction().await)
            .get_value(key)
            .await
            .expect("reads")
    }
}

#[async_trait]
impl ILedgerRpc for FakeLedger {
    async fn ledger_height(&self) -> anyhow::Result<u64> {
        Ok(self.current_height())
    }

    async fn query_key(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.db.begin_transaction().await.raw_get_value(key).await
    }

    async fn query_prefix(&self, prefix: &str) -> anyhow::Result<BTreeMap<String, Vec<u8>>> {
        let dbtx = self.db.begin_transaction().await;
        let entries: Vec<(String, Vec<u8>)> =
            dbtx.raw_find_by_prefix(prefix).await?.collect().await;
        Ok(entries.into_iter().collect())
    }

    async fn broadcast_tx(&self, tx: &Transaction) -> anyhow::Result<()> {
        self.apply(tx)
            .await
            .map_err(|rejection| anyhow::format_err!("transaction rejected: {rejection}"))
    }
}

/// What a fake chain saw relayed to its verifier contract.
#[derive(Debug, Clone)]
pub struct RelayedResult {
    pub nebula: NebulaId,
    pub pulse_id: PulseId,
    pub hash: Hash256,
    pub signatures: BTreeMap<OraclePubKey, OracleSignature>,
}

/// Relay and fan-out records of one chain, shared between the per-node
/// adaptor handles.
#[derive(Debug, Clone, Default)]
pub struct FakeChainState {
    relayed: Arc<Mutex<Vec<RelayedResult>>>,
    fanouts: Arc<Mutex<Vec<(NebulaId, PulseId, RawValue)>>>,
}

impl FakeChainState {
    pub fn relayed(&self) -> Vec<RelayedResult> {
        self.relayed.lock().expect("lock poisoned").clone()
    }

    pub fn fanouts(&self) -> Vec<(NebulaId, PulseId, RawValue)> {
        self.fanouts.lock().expect("lock poisoned").clone()
    }
}

/// The deterministic stand-in for a chain-local oracle signature.
pub fn expected_signature(oracle: OraclePubKey, hash: Hash256) -> OracleSignature {
    let mut preimage = oracle.to_byte_array().to_vec();
    preimage.extend_from_slice(hash.as_slice());
    OracleSignature::new(Hash256::digest(&preimage).to_byte_array().to_vec())
}

/// One node's handle onto a fake target chain; `signer` plays the role of
/// the chain-local key held by the adaptor.
#[derive(Debug, Clone)]
pub struct FakeTargetChain {
    chain_type: ChainType,
    heights: SharedChainHeights,
    state: FakeChainState,
    signer: OraclePubKey,
}

impl FakeTargetChain {
    pub fn new(
        chain_type: ChainType,
        heights: SharedChainHeights,
        state: FakeChainState,
        signer: OraclePubKey,
    ) -> FakeTargetChain {
        FakeTargetChain {
            chain_type,
            heights,
            state,
            signer,
        }
    }
}

#[async_trait]
impl ITargetChainRpc for FakeTargetChain {
    async fn get_height(&self) -> anyhow::Result<u64> {
        self.heights
            .get(self.chain_type)
            .ok_or_else(|| anyhow::format_err!("chain {} is unreachable", self.chain_type))
    }

    async fn sign(&self, hash: Hash256) -> anyhow::Result<OracleSignature> {
        Ok(expected_signature(self.signer, hash))
    }

    async fn send_data_result(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        signatures: &BTreeMap<OraclePubKey, OracleSignature>,
        hash: Hash256,
    ) -> anyhow::Result<String> {
        let mut relayed = self.state.relayed.lock().expect("lock poisoned");
        relayed.push(RelayedResult {
            nebula,
            pulse_id,
            hash,
            signatures: signatures.clone(),
        });
        Ok(format!("faketx-{}", relayed.len()))
    }

    async fn send_data_to_subs(
        &self,
        nebula: NebulaId,
        pulse_id: PulseId,
        value: &RawValue,
    ) -> anyhow::Result<()> {
        self.state
            .fanouts
            .lock()
            .expect("lock poisoned")
            .push((nebula, pulse_id, value.clone()));
        Ok(())
    }

    async fn wait_tx(&self, _tx_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observes a settable integer; aggregates revealed values by integer mean.
/// Values travel as decimal ASCII, so `mean(40, 44)` is exactly `42`.
#[derive(Debug, Clone, Default)]
pub struct FakeExtractor {
    value: Arc<Mutex<Option<i64>>>,
}

impl FakeExtractor {
    pub fn new(value: i64) -> FakeExtractor {
        FakeExtractor {
            value: Arc::new(Mutex::new(Some(value))),
        }
    }

    pub fn set_value(&self, value: i64) {
        *self.value.lock().expect("lock poisoned") = Some(value);
    }

    /// Make `extract` fail until a value is set again.
    pub fn set_unavailable(&self) {
        *self.value.lock().expect("lock poisoned") = None;
    }

    pub fn encode(value: i64) -> RawValue {
        RawValue::new(value.to_string().into_bytes())
    }

    fn decode(value: &RawValue) -> anyhow::Result<i64> {
        Ok(std::str::from_utf8(value.as_slice())?.parse()?)
    }
}

#[async_trait]
impl IExtractor for FakeExtractor {
    async fn extract(&self) -> anyhow::Result<RawValue> {
        self.value
            .lock()
            .expect("lock poisoned")
            .map(Self::encode)
            .ok_or_else(|| anyhow::format_err!("extractor offline"))
    }

    async fn aggregate(&self, values: Vec<RawValue>) -> anyhow::Result<RawValue> {
        anyhow::ensure!(!values.is_empty(), "nothing to aggregate");
        let mut sum: i64 = 0;
        for value in &values {
            sum = sum
                .checked_add(Self::decode(value)?)
                .ok_or_else(|| anyhow::format_err!("aggregate overflow"))?;
        }
        Ok(Self::encode(sum / values.len() as i64))
    }
}

/// Node configuration pointing at in-process fakes; the urls are never
/// dialled.
pub fn oracle_config(
    consul: &Keypair,
    oracle: OraclePubKey,
    nebula: NebulaId,
    chain_type: ChainType,
) -> OracleConfig {
    OracleConfig {
        ledger_url: "http://ledger.invalid".to_owned(),
        extractor_url: "http://extractor.invalid".to_owned(),
        target_chain_url: "http://chain.invalid".to_owned(),
        chain_type,
        nebula,
        oracle,
        consul_secret_key: hex::encode(consul.secret_key().secret_bytes()),
        poll_interval_secs: 1,
    }
}

/// Create a nebula owned by `owner`.
pub async fn create_nebula(
    ledger: &FakeLedger,
    owner: &Keypair,
    nebula: NebulaId,
    chain_type: ChainType,
    min_score: Score,
    subscriptions: impl IntoIterator<Item = SubscriberId>,
) {
    let args = SetNebulaArgs {
        nebula,
        chain_type,
        min_score,
        subscriptions: subscriptions.into_iter().collect(),
    };
    ledger
        .apply(
            &Transaction::create(owner, TxFunc::SetNebula, &args, now_millis()).expect("creates"),
        )
        .await
        .expect("nebula lands");
}

/// Register `oracle` as the consul's signer for `chain_type` and admit it
/// into the nebula.
pub async fn register_and_admit_oracle(
    ledger: &FakeLedger,
    consul: &Keypair,
    nebula: NebulaId,
    chain_type: ChainType,
    oracle: OraclePubKey,
) {
    let register = AddOracleArgs { chain_type, oracle };
    ledger
        .apply(
            &Transaction::create(consul, TxFunc::AddOracle, &register, now_millis())
                .expect("creates"),
        )
        .await
        .expect("registration lands");

    let admit = AddOracleInNebulaArgs { nebula, oracle };
    ledger
        .apply(
            &Transaction::create(consul, TxFunc::AddOracleInNebula, &admit, now_millis())
                .expect("creates"),
        )
        .await
        .expect("admission lands");
}
