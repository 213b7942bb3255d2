//! Transaction validation and application.
//!
//! [`process_transaction`] is the single entry point the host consensus
//! engine calls for every submitted transaction, in block order. It
//! short-circuits on the first failed check and only mutates the store once
//! every check of a function has passed, so a rejection never leaves partial
//! writes behind.

use std::fmt::Debug;

use async_trait::async_trait;
use gravity_core::keys::{
    CommitKey, NebulaKey, NebulaOraclesKey, OracleByConsulKey, ResultKey, RevealByPulsePrefix,
    RevealKey, RoundKey, ScoreKey, VoteKey,
};
use gravity_core::transaction::{
    AddOracleArgs, AddOracleInNebulaArgs, CommitArgs, NewRoundArgs, ResultArgs, RevealArgs,
    SetNebulaArgs, VoteArgs,
};
use gravity_core::{
    ChainType, ConsulPubKey, Hash256, LedgerError, Nebula, Score, SubRound, Transaction, TxFunc,
};
use gravity_logging::LOG_LEDGER;
use tracing::debug;

use crate::db::LedgerTransaction;

/// The ledger node's own view of the target chains, consulted only to check
/// the claimed height of a `newRound` transaction.
#[async_trait]
pub trait ChainHeightView: Debug + Send + Sync {
    /// Current height of the chain, `Ok(None)` if this node serves no such
    /// chain.
    async fn height(&self, chain_type: ChainType) -> anyhow::Result<Option<u64>>;
}

/// Per-application context supplied by the consensus engine.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    pub ledger_height: u64,
    pub chain_heights: &'a dyn ChainHeightView,
}

/// Validate `tx` against the current store contents and apply its single
/// state mutation if every check passes.
///
/// Deterministic given the store contents and the transaction; the one
/// externally-sourced input (the target chain height consulted for
/// `newRound`) is part of the validation contract, exactly like the original
/// round-start rule.
pub async fn process_transaction(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
    ctx: &ProcessContext<'_>,
) -> Result<(), LedgerError> {
    if !tx.verify() {
        return Err(LedgerError::InvalidSignature);
    }

    let score = dbtx
        .get_value(&ScoreKey {
            consul: tx.sender_pub_key,
        })
        .await
        .map_err(LedgerError::storage)?;
    match score {
        Some(score) if !score.is_negative() => {}
        _ => return Err(LedgerError::InvalidScore),
    }

    let func: TxFunc = tx
        .func
        .parse()
        .map_err(|_| LedgerError::FuncNotFound(tx.func.clone()))?;

    // the sub-round gate is what stops a node from skipping ahead or
    // repeating a phase out of turn
    if let Some(required) = func.sub_round() {
        if SubRound::from_height(ctx.ledger_height) != required {
            return Err(LedgerError::InvalidSubRound);
        }
    }

    match func {
        TxFunc::Commit => apply_commit(dbtx, tx).await,
        TxFunc::Reveal => apply_reveal(dbtx, tx).await,
        TxFunc::Result => apply_result(dbtx, tx).await,
        TxFunc::AddOracle => apply_add_oracle(dbtx, tx).await,
        TxFunc::AddOracleInNebula => apply_add_oracle_in_nebula(dbtx, tx).await,
        TxFunc::NewRound => apply_new_round(dbtx, tx, ctx).await,
        TxFunc::Vote => apply_vote(dbtx, tx).await,
        TxFunc::SetNebula => apply_set_nebula(dbtx, tx).await,
    }
}

fn typed_args<T: serde::de::DeserializeOwned>(tx: &Transaction) -> Result<T, LedgerError> {
    tx.typed_args()
        .map_err(|err| LedgerError::malformed_args(&tx.func, err))
}

async fn apply_commit(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: CommitArgs = typed_args(tx)?;

    let key = CommitKey {
        nebula: args.nebula,
        pulse_id: args.pulse_id,
        oracle: args.oracle,
    };
    if dbtx
        .get_value(&key)
        .await
        .map_err(LedgerError::storage)?
        .is_some()
    {
        return Err(LedgerError::CommitIsExist);
    }

    dbtx.insert_entry(&key, &args.commitment)
        .await
        .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        nebula = %args.nebula,
        pulse = %args.pulse_id,
        oracle = %args.oracle,
        "stored commit"
    );
    Ok(())
}

async fn apply_reveal(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: RevealArgs = typed_args(tx)?;

    let stored_commitment = dbtx
        .get_value(&CommitKey {
            nebula: args.nebula,
            pulse_id: args.pulse_id,
            oracle: args.oracle,
        })
        .await
        .map_err(LedgerError::storage)?
        .ok_or(LedgerError::CommitIsNotExist)?;

    // the revealed bytes must hash to the commitment that was actually
    // stored, not merely to whatever commitment the reveal claims
    if args.commitment != stored_commitment
        || Hash256::digest(args.value.as_slice()) != stored_commitment
    {
        return Err(LedgerError::InvalidReveal);
    }

    let key = RevealKey {
        nebula: args.nebula,
        pulse_id: args.pulse_id,
        commitment: args.commitment,
    };
    if dbtx
        .get_value(&key)
        .await
        .map_err(LedgerError::storage)?
        .is_some()
    {
        return Err(LedgerError::RevealIsExist);
    }

    dbtx.insert_entry(&key, &args.value)
        .await
        .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        nebula = %args.nebula,
        pulse = %args.pulse_id,
        commitment = %args.commitment,
        "stored reveal"
    );
    Ok(())
}

async fn apply_result(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: ResultArgs = typed_args(tx)?;

    let registered = dbtx
        .get_value(&OracleByConsulKey {
            chain_type: args.chain_type,
            consul: tx.sender_pub_key,
        })
        .await
        .map_err(LedgerError::storage)?;
    if registered != Some(args.oracle) {
        return Err(LedgerError::OracleNotFound);
    }

    let reveals = dbtx
        .find_by_prefix(&RevealByPulsePrefix {
            nebula: args.nebula,
            pulse_id: args.pulse_id,
        })
        .await
        .map_err(LedgerError::storage)?;
    if reveals.is_empty() {
        return Err(LedgerError::RevealIsNotExist);
    }

    dbtx.insert_entry(
        &ResultKey {
            nebula: args.nebula,
            pulse_id: args.pulse_id,
            oracle: args.oracle,
        },
        &args.signature,
    )
    .await
    .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        nebula = %args.nebula,
        pulse = %args.pulse_id,
        oracle = %args.oracle,
        "stored result signature"
    );
    Ok(())
}

async fn apply_add_oracle(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: AddOracleArgs = typed_args(tx)?;

    // exactly one oracle key per (validator, chain type); re-registration
    // replaces the previous key
    dbtx.insert_entry(
        &OracleByConsulKey {
            chain_type: args.chain_type,
            consul: tx.sender_pub_key,
        },
        &args.oracle,
    )
    .await
    .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        consul = %tx.sender_pub_key,
        chain = %args.chain_type,
        oracle = %args.oracle,
        "registered oracle key"
    );
    Ok(())
}

async fn apply_add_oracle_in_nebula(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: AddOracleInNebulaArgs = typed_args(tx)?;

    let nebula: Nebula = dbtx
        .get_value(&NebulaKey {
            nebula: args.nebula,
        })
        .await
        .map_err(LedgerError::storage)?
        .ok_or(LedgerError::NebulaNotFound)?;

    let score = dbtx
        .get_value(&ScoreKey {
            consul: tx.sender_pub_key,
        })
        .await
        .map_err(LedgerError::storage)?
        .unwrap_or(Score(-1));
    if score < nebula.min_score {
        return Err(LedgerError::InvalidScore);
    }

    let oracles_key = NebulaOraclesKey {
        nebula: args.nebula,
    };
    let mut oracles = dbtx
        .get_value(&oracles_key)
        .await
        .map_err(LedgerError::storage)?
        .unwrap_or_default();
    if !oracles.insert(args.oracle) {
        return Err(LedgerError::OracleInNebulaIsExist);
    }

    dbtx.insert_entry(&oracles_key, &oracles)
        .await
        .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        nebula = %args.nebula,
        oracle = %args.oracle,
        authorized = oracles.len(),
        "admitted oracle into nebula"
    );
    Ok(())
}

async fn apply_new_round(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
    ctx: &ProcessContext<'_>,
) -> Result<(), LedgerError> {
    let args: NewRoundArgs = typed_args(tx)?;

    let key = RoundKey {
        chain_type: args.chain_type,
        ledger_height: ctx.ledger_height,
    };
    if dbtx
        .get_value(&key)
        .await
        .map_err(LedgerError::storage)?
        .is_some()
    {
        return Err(LedgerError::RoundIsExist);
    }

    let observed = ctx
        .chain_heights
        .height(args.chain_type)
        .await
        .map_err(LedgerError::storage)?
        .ok_or(LedgerError::InvalidChainType)?;
    if observed != args.target_height {
        return Err(LedgerError::InvalidHeight);
    }

    dbtx.insert_entry(&key, &args.target_height)
        .await
        .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        chain = %args.chain_type,
        ledger_height = ctx.ledger_height,
        target_height = args.target_height,
        "recorded round start"
    );
    Ok(())
}

async fn apply_vote(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: VoteArgs = typed_args(tx)?;

    dbtx.insert_entry(
        &VoteKey {
            consul: tx.sender_pub_key,
        },
        &args.votes,
    )
    .await
    .map_err(LedgerError::storage)?;
    Ok(())
}

async fn apply_set_nebula(
    dbtx: &mut LedgerTransaction<'_>,
    tx: &Transaction,
) -> Result<(), LedgerError> {
    let args: SetNebulaArgs = typed_args(tx)?;

    let key = NebulaKey {
        nebula: args.nebula,
    };
    if let Some(existing) = dbtx.get_value(&key).await.map_err(LedgerError::storage)? {
        if existing.owner != tx.sender_pub_key {
            return Err(LedgerError::InvalidNebulaOwner);
        }
    }

    dbtx.insert_entry(
        &key,
        &Nebula {
            owner: tx.sender_pub_key,
            chain_type: args.chain_type,
            min_score: args.min_score,
            subscriptions: args.subscriptions,
        },
    )
    .await
    .map_err(LedgerError::storage)?;
    debug!(
        target: LOG_LEDGER,
        nebula = %args.nebula,
        owner = %tx.sender_pub_key,
        "set nebula"
    );
    Ok(())
}

/// Record the initial validator set. Without a non-negative score no sender
/// passes validation, so a fresh ledger seeds its genesis consuls at zero.
pub async fn seed_genesis(
    dbtx: &mut LedgerTransaction<'_>,
    consuls: &[ConsulPubKey],
) -> anyhow::Result<()> {
    for consul in consuls {
        dbtx.insert_entry(&ScoreKey { consul: *consul }, &Score::ZERO)
            .await?;
    }
    Ok(())
}

/// Write a validator's reputation score; called by the external score
/// calculator after each recalculation epoch.
pub async fn set_score(
    dbtx: &mut LedgerTransaction<'_>,
    consul: ConsulPubKey,
    score: Score,
) -> anyhow::Result<()> {
    dbtx.insert_entry(&ScoreKey { consul }, &score).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use assert_matches::assert_matches;
    use gravity_core::keys::LedgerKey;
    use gravity_core::transaction::VoteEntry;
    use gravity_core::types::{
        NebulaId, OraclePubKey, OracleSignature, PulseId, RawValue, SubscriberId,
    };
    use gravity_core::util::now_millis;
    use secp256k1::{Keypair, SECP256K1};

    use super::*;
    use crate::db::IRawDatabase;
    use crate::mem_impl::MemDatabase;

    // heights picked so `height % 4` lands on the named sub-round
    const COMMIT_HEIGHT: u64 = 100;
    const REVEAL_HEIGHT: u64 = 101;
    const RESULT_HEIGHT: u64 = 102;
    const ANY_HEIGHT: u64 = 103;

    const NEBULA: NebulaId = NebulaId::new([0xaa; 32]);
    const PULSE: PulseId = PulseId(100);

    fn consul() -> Keypair {
        Keypair::new(SECP256K1, &mut secp256k1::rand::thread_rng())
    }

    fn oracle(tag: u8) -> OraclePubKey {
        OraclePubKey::new([tag; 33])
    }

    #[derive(Debug)]
    struct FixedHeights(BTreeMap<ChainType, u64>);

    #[async_trait]
    impl ChainHeightView for FixedHeights {
        async fn height(&self, chain_type: ChainType) -> anyhow::Result<Option<u64>> {
            Ok(self.0.get(&chain_type).copied())
        }
    }

    struct Fixture {
        db: MemDatabase,
        heights: FixedHeights,
    }

    impl Fixture {
        async fn new(consuls: &[ConsulPubKey]) -> Fixture {
            let fixture = Fixture {
                db: MemDatabase::new(),
                heights: FixedHeights(BTreeMap::from([(ChainType::Ethereum, 5000)])),
            };
            let mut dbtx = fixture.begin().await;
            seed_genesis(&mut dbtx, consuls).await.expect("seeds");
            dbtx.commit_tx().await.expect("commits");
            fixture
        }

        async fn begin(&self) -> LedgerTransaction<'_> {
            LedgerTransaction::new(self.db.begin_transaction().await)
        }

        async fn apply_at(&self, tx: &Transaction, ledger_height: u64) -> Result<(), LedgerError> {
            let mut dbtx = self.begin().await;
            let ctx = ProcessContext {
                ledger_height,
                chain_heights: &self.heights,
            };
            process_transaction(&mut dbtx, tx, &ctx).await?;
            dbtx.commit_tx().await.expect("commits");
            Ok(())
        }

        async fn get<K: LedgerKey>(&self, key: &K) -> Option<K::Value> {
            self.begin().await.get_value(key).await.expect("reads")
        }

        async fn write_score(&self, consul: ConsulPubKey, score: Score) {
            let mut dbtx = self.begin().await;
            set_score(&mut dbtx, consul, score).await.expect("writes");
            dbtx.commit_tx().await.expect("commits");
        }
    }

    fn commit_tx(keypair: &Keypair, oracle_key: OraclePubKey, value: &[u8]) -> Transaction {
        let args = CommitArgs {
            nebula: NEBULA,
            pulse_id: PULSE,
            commitment: Hash256::digest(value),
            oracle: oracle_key,
        };
        Transaction::create(keypair, TxFunc::Commit, &args, now_millis()).expect("creates")
    }

    fn reveal_tx(
        keypair: &Keypair,
        oracle_key: OraclePubKey,
        commitment: Hash256,
        value: &[u8],
    ) -> Transaction {
        let args = RevealArgs {
            nebula: NEBULA,
            pulse_id: PULSE,
            oracle: oracle_key,
            commitment,
            value: RawValue::new(value),
        };
        Transaction::create(keypair, TxFunc::Reveal, &args, now_millis()).expect("creates")
    }

    #[tokio::test]
    async fn commit_is_accepted_once_per_oracle() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;
        let oracle_key = oracle(1);

        fixture
            .apply_at(&commit_tx(&keypair, oracle_key, b"42"), COMMIT_HEIGHT)
            .await
            .expect("first commit lands");

        // replay with a different value: rejected, stored hash untouched
        let second = fixture
            .apply_at(&commit_tx(&keypair, oracle_key, b"43"), COMMIT_HEIGHT)
            .await;
        assert_matches!(second, Err(LedgerError::CommitIsExist));
        assert_eq!(
            fixture
                .get(&CommitKey {
                    nebula: NEBULA,
                    pulse_id: PULSE,
                    oracle: oracle_key,
                })
                .await,
            Some(Hash256::digest(b"42"))
        );
    }

    #[tokio::test]
    async fn reveal_requires_a_commit() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;

        let result = fixture
            .apply_at(
                &reveal_tx(&keypair, oracle(1), Hash256::digest(b"42"), b"42"),
                REVEAL_HEIGHT,
            )
            .await;
        assert_matches!(result, Err(LedgerError::CommitIsNotExist));
    }

    #[tokio::test]
    async fn reveal_must_hash_to_the_stored_commitment() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;
        let oracle_key = oracle(1);
        fixture
            .apply_at(&commit_tx(&keypair, oracle_key, b"42"), COMMIT_HEIGHT)
            .await
            .expect("commit lands");

        // value mutated after committing
        let mutated = fixture
            .apply_at(
                &reveal_tx(&keypair, oracle_key, Hash256::digest(b"42"), b"43"),
                REVEAL_HEIGHT,
            )
            .await;
        assert_matches!(mutated, Err(LedgerError::InvalidReveal));

        // internally consistent reveal for a different value
        let substituted = fixture
            .apply_at(
                &reveal_tx(&keypair, oracle_key, Hash256::digest(b"43"), b"43"),
                REVEAL_HEIGHT,
            )
            .await;
        assert_matches!(substituted, Err(LedgerError::InvalidReveal));
    }

    #[tokio::test]
    async fn reveal_is_accepted_once_per_commitment() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;
        let oracle_key = oracle(1);
        fixture
            .apply_at(&commit_tx(&keypair, oracle_key, b"42"), COMMIT_HEIGHT)
            .await
            .expect("commit lands");

        let reveal = reveal_tx(&keypair, oracle_key, Hash256::digest(b"42"), b"42");
        fixture
            .apply_at(&reveal, REVEAL_HEIGHT)
            .await
            .expect("first reveal lands");
        assert_matches!(
            fixture.apply_at(&reveal, REVEAL_HEIGHT).await,
            Err(LedgerError::RevealIsExist)
        );
        assert_eq!(
            fixture
                .get(&RevealKey {
                    nebula: NEBULA,
                    pulse_id: PULSE,
                    commitment: Hash256::digest(b"42"),
                })
                .await,
            Some(RawValue::new(b"42".to_vec()))
        );
    }

    #[tokio::test]
    async fn result_requires_registration_and_a_reveal() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;
        let oracle_key = oracle(1);

        let result_args = ResultArgs {
            nebula: NEBULA,
            pulse_id: PULSE,
            oracle: oracle_key,
            chain_type: ChainType::Ethereum,
            signature: OracleSignature::new(vec![9; 64]),
        };
        let result_tx =
            Transaction::create(&keypair, TxFunc::Result, &result_args, now_millis())
                .expect("creates");

        // no oracle key registered for the chain yet
        assert_matches!(
            fixture.apply_at(&result_tx, RESULT_HEIGHT).await,
            Err(LedgerError::OracleNotFound)
        );

        let register = AddOracleArgs {
            chain_type: ChainType::Ethereum,
            oracle: oracle_key,
        };
        fixture
            .apply_at(
                &Transaction::create(&keypair, TxFunc::AddOracle, &register, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("registration lands");

        // registered, but nothing has been revealed for the pulse
        assert_matches!(
            fixture.apply_at(&result_tx, RESULT_HEIGHT).await,
            Err(LedgerError::RevealIsNotExist)
        );

        fixture
            .apply_at(&commit_tx(&keypair, oracle_key, b"42"), COMMIT_HEIGHT)
            .await
            .expect("commit lands");
        fixture
            .apply_at(
                &reveal_tx(&keypair, oracle_key, Hash256::digest(b"42"), b"42"),
                REVEAL_HEIGHT,
            )
            .await
            .expect("reveal lands");

        fixture
            .apply_at(&result_tx, RESULT_HEIGHT)
            .await
            .expect("result lands");
        assert_eq!(
            fixture
                .get(&ResultKey {
                    nebula: NEBULA,
                    pulse_id: PULSE,
                    oracle: oracle_key,
                })
                .await,
            Some(OracleSignature::new(vec![9; 64]))
        );
    }

    #[tokio::test]
    async fn round_functions_are_gated_to_their_sub_round() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;
        let oracle_key = oracle(1);

        assert_matches!(
            fixture
                .apply_at(&commit_tx(&keypair, oracle_key, b"42"), REVEAL_HEIGHT)
                .await,
            Err(LedgerError::InvalidSubRound)
        );
        assert_matches!(
            fixture
                .apply_at(
                    &reveal_tx(&keypair, oracle_key, Hash256::digest(b"42"), b"42"),
                    COMMIT_HEIGHT
                )
                .await,
            Err(LedgerError::InvalidSubRound)
        );
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;

        let mut tx = commit_tx(&keypair, oracle(1), b"42");
        tx.args["pulseId"] = serde_json::json!(101);
        assert_matches!(
            fixture.apply_at(&tx, COMMIT_HEIGHT).await,
            Err(LedgerError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn unknown_or_banned_sender_is_rejected() {
        let keypair = consul();
        // not part of genesis
        let fixture = Fixture::new(&[]).await;

        assert_matches!(
            fixture
                .apply_at(&commit_tx(&keypair, oracle(1), b"42"), COMMIT_HEIGHT)
                .await,
            Err(LedgerError::InvalidScore)
        );

        fixture.write_score(keypair.x_only_public_key().0, Score(-5)).await;
        assert_matches!(
            fixture
                .apply_at(&commit_tx(&keypair, oracle(1), b"42"), COMMIT_HEIGHT)
                .await,
            Err(LedgerError::InvalidScore)
        );
    }

    #[tokio::test]
    async fn nebula_admission_enforces_the_score_bar() {
        let owner = consul();
        let admitter = consul();
        let fixture =
            Fixture::new(&[owner.x_only_public_key().0, admitter.x_only_public_key().0]).await;

        let set = SetNebulaArgs {
            nebula: NEBULA,
            chain_type: ChainType::Ethereum,
            min_score: Score(10),
            subscriptions: BTreeSet::new(),
        };
        fixture
            .apply_at(
                &Transaction::create(&owner, TxFunc::SetNebula, &set, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("nebula lands");

        let admit = AddOracleInNebulaArgs {
            nebula: NEBULA,
            oracle: oracle(1),
        };
        let admit_tx = Transaction::create(
            &admitter,
            TxFunc::AddOracleInNebula,
            &admit,
            now_millis(),
        )
        .expect("creates");

        // one below the bar fails, exactly at the bar succeeds
        fixture.write_score(admitter.x_only_public_key().0, Score(9)).await;
        assert_matches!(
            fixture.apply_at(&admit_tx, ANY_HEIGHT).await,
            Err(LedgerError::InvalidScore)
        );

        fixture.write_score(admitter.x_only_public_key().0, Score(10)).await;
        fixture
            .apply_at(&admit_tx, ANY_HEIGHT)
            .await
            .expect("admission lands");
        assert_matches!(
            fixture.apply_at(&admit_tx, ANY_HEIGHT).await,
            Err(LedgerError::OracleInNebulaIsExist)
        );

        let missing = AddOracleInNebulaArgs {
            nebula: NebulaId::new([0xbb; 32]),
            oracle: oracle(1),
        };
        assert_matches!(
            fixture
                .apply_at(
                    &Transaction::create(
                        &admitter,
                        TxFunc::AddOracleInNebula,
                        &missing,
                        now_millis()
                    )
                    .expect("creates"),
                    ANY_HEIGHT
                )
                .await,
            Err(LedgerError::NebulaNotFound)
        );
    }

    #[tokio::test]
    async fn round_start_is_unique_per_ledger_height() {
        let first = consul();
        let second = consul();
        let fixture =
            Fixture::new(&[first.x_only_public_key().0, second.x_only_public_key().0]).await;

        let args = NewRoundArgs {
            chain_type: ChainType::Ethereum,
            target_height: 5000,
        };
        fixture
            .apply_at(
                &Transaction::create(&first, TxFunc::NewRound, &args, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("round start lands");

        // regardless of submitter
        assert_matches!(
            fixture
                .apply_at(
                    &Transaction::create(&second, TxFunc::NewRound, &args, now_millis())
                        .expect("creates"),
                    ANY_HEIGHT
                )
                .await,
            Err(LedgerError::RoundIsExist)
        );

        // a different ledger height is a fresh marker, but the claimed
        // height must match the chain
        let stale = NewRoundArgs {
            chain_type: ChainType::Ethereum,
            target_height: 4999,
        };
        assert_matches!(
            fixture
                .apply_at(
                    &Transaction::create(&second, TxFunc::NewRound, &stale, now_millis())
                        .expect("creates"),
                    ANY_HEIGHT + 1
                )
                .await,
            Err(LedgerError::InvalidHeight)
        );

        let unserved = NewRoundArgs {
            chain_type: ChainType::Solana,
            target_height: 1,
        };
        assert_matches!(
            fixture
                .apply_at(
                    &Transaction::create(&second, TxFunc::NewRound, &unserved, now_millis())
                        .expect("creates"),
                    ANY_HEIGHT + 1
                )
                .await,
            Err(LedgerError::InvalidChainType)
        );
    }

    #[tokio::test]
    async fn nebula_updates_are_owner_only() {
        let owner = consul();
        let intruder = consul();
        let fixture =
            Fixture::new(&[owner.x_only_public_key().0, intruder.x_only_public_key().0]).await;

        let set = SetNebulaArgs {
            nebula: NEBULA,
            chain_type: ChainType::Ethereum,
            min_score: Score::ZERO,
            subscriptions: BTreeSet::from([SubscriberId::new([1; 32])]),
        };
        fixture
            .apply_at(
                &Transaction::create(&owner, TxFunc::SetNebula, &set, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("nebula lands");

        let update = SetNebulaArgs {
            min_score: Score(3),
            ..set.clone()
        };
        fixture
            .apply_at(
                &Transaction::create(&owner, TxFunc::SetNebula, &update, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("owner update lands");

        assert_matches!(
            fixture
                .apply_at(
                    &Transaction::create(&intruder, TxFunc::SetNebula, &update, now_millis())
                        .expect("creates"),
                    ANY_HEIGHT
                )
                .await,
            Err(LedgerError::InvalidNebulaOwner)
        );
        assert_eq!(
            fixture.get(&NebulaKey { nebula: NEBULA }).await.map(|n| n.min_score),
            Some(Score(3))
        );
    }

    #[tokio::test]
    async fn unknown_function_and_malformed_args_are_distinct() {
        let keypair = consul();
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;

        let unknown = Transaction::create_raw(
            &keypair,
            "mintGold",
            &serde_json::json!({}),
            now_millis(),
        )
        .expect("creates");
        assert_matches!(
            fixture.apply_at(&unknown, ANY_HEIGHT).await,
            Err(LedgerError::FuncNotFound(func)) if func == "mintGold"
        );

        let malformed = Transaction::create_raw(
            &keypair,
            "commit",
            &serde_json::json!({ "votes": [] }),
            now_millis(),
        )
        .expect("creates");
        assert_matches!(
            fixture.apply_at(&malformed, COMMIT_HEIGHT).await,
            Err(LedgerError::MalformedArgs { .. })
        );
    }

    #[tokio::test]
    async fn votes_are_stored_per_sender() {
        let keypair = consul();
        let target = consul().x_only_public_key().0;
        let fixture = Fixture::new(&[keypair.x_only_public_key().0]).await;

        let args = VoteArgs {
            votes: vec![VoteEntry {
                target,
                score: Score(7),
            }],
        };
        fixture
            .apply_at(
                &Transaction::create(&keypair, TxFunc::Vote, &args, now_millis())
                    .expect("creates"),
                ANY_HEIGHT,
            )
            .await
            .expect("vote lands");

        assert_eq!(
            fixture
                .get(&VoteKey {
                    consul: keypair.x_only_public_key().0
                })
                .await,
            Some(args.votes)
        );
    }
}
