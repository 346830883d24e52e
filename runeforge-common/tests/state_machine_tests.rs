//! End-to-end etching flows through the engine and mock collaborators


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::Txid;
use chrono::{Duration as ChronoDuration, Utc};
use runeforge_common::engine::{EngineError, EtchingEngine};
use runeforge_common::events::EtchingEvent;
use runeforge_common::mock::MockChain;
use runeforge_common::process::{FailureKind, ProcessState, TransitionError};
use runeforge_common::provider::{ChainClient, ProviderError, TxStatus};
use runeforge_common::runestone::{Runestone, Terms};
use runeforge_common::storage::ProcessStore;
use runeforge_common::types::{ProcessId, RuneEtchingRequest};
use runeforge_common::utxo_selection::SelectionError;
use runeforge_common::validation::ValidationError;
use test_utils::{advance_until, test_settings, Harness};

fn test_rune() -> RuneEtchingRequest {
    RuneEtchingRequest::new("Test", "TEST", 8).with_premine(1_000_000)
}

/// Chain client in front of a [`MockChain`] that can lose the node's answer
/// to a broadcast after the node accepted it, and can go blind for queries.
struct LossyChain {
    inner: Arc<MockChain>,
    lose_answers: AtomicBool,
    blind: AtomicBool,
}

impl LossyChain {
    fn new(inner: Arc<MockChain>) -> Self {
        Self {
            inner,
            lose_answers: AtomicBool::new(true),
            blind: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChainClient for LossyChain {
    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<Txid, ProviderError> {
        let accepted = self.inner.broadcast_tx(tx_bytes).await;
        if self.lose_answers.load(Ordering::SeqCst) {
            return Err(ProviderError::Timeout);
        }
        accepted
    }

    async fn get_confirmations(&self, txid: &Txid) -> Result<Option<u32>, ProviderError> {
        Ok(self.get_tx_status(txid).await?.confirmations)
    }

    async fn get_block_height(&self) -> Result<u64, ProviderError> {
        self.inner.get_block_height().await
    }

    async fn get_tx_status(&self, txid: &Txid) -> Result<TxStatus, ProviderError> {
        if self.blind.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable("node unreachable".to_string()));
        }
        self.inner.get_tx_status(txid).await
    }
}

fn lossy_engine(h: &Harness, chain: Arc<LossyChain>) -> EtchingEngine {
    EtchingEngine::new(
        test_settings(),
        h.store.clone(),
        h.supply.clone(),
        h.signer.clone(),
        chain,
    )
}

/// Confirm twice, then make the transaction vanish from the chain so the
/// process goes back to re-announcing it. Returns the lost txid.
async fn evicted_after_confirming(h: &Harness, id: &ProcessId) -> Txid {
    advance_until(&h.engine, id, ProcessState::Confirming).await;
    let txid = h.engine.process(id).unwrap().txid.unwrap();

    h.chain.advance_blocks(2);
    assert_eq!(h.engine.advance(id).await.unwrap(), ProcessState::Confirming);

    h.chain.evict(&txid);
    assert_eq!(h.engine.advance(id).await.unwrap(), ProcessState::Broadcasting);
    assert_eq!(h.engine.process(id).unwrap().reorg_count, 1);
    txid
}

#[tokio::test]
async fn etching_reaches_completed_after_six_blocks() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let events = h.engine.subscribe();

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    assert_eq!(h.engine.process(&id).unwrap().state, ProcessState::Pending);
    assert_eq!(h.engine.table().ledger().reserved_by(&id).len(), 1);

    assert_eq!(advance_until(&h.engine, &id, ProcessState::Confirming).await, ProcessState::Confirming);
    let txid = h.engine.process(&id).unwrap().txid.unwrap();
    assert!(h.chain.in_mempool(&txid));

    h.chain.advance_blocks(5);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Confirming);
    assert_eq!(h.engine.process(&id).unwrap().confirmation.confirmations, 5);

    h.chain.advance_blocks(1);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Completed);

    let process = h.engine.process(&id).unwrap();
    assert!(process.is_terminal());
    assert!(h.engine.table().ledger().is_empty());

    let tx = h.chain.transaction(&txid).unwrap();
    let etching = Runestone::decipher(&tx).unwrap().unwrap().etching.unwrap();
    assert_eq!(etching.rune.unwrap().to_string(), "TEST");
    assert_eq!(etching.divisibility, Some(8));
    assert_eq!(etching.premine, Some(1_000_000));

    let stored = h.store.load(&id).unwrap().unwrap();
    assert_eq!(stored.state, ProcessState::Completed);

    let states: Vec<ProcessState> = events
        .try_iter()
        .filter_map(|event| match event {
            EtchingEvent::Transition { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ProcessState::Building,
            ProcessState::Signing,
            ProcessState::Broadcasting,
            ProcessState::Confirming,
            ProcessState::Completed,
        ]
    );
}

#[tokio::test]
async fn open_mint_etching_is_accepted() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let request = RuneEtchingRequest::new("Mint", "MINT", 2).with_terms(Terms {
        amount: Some(100),
        cap: Some(10_000),
        height: (Some(840_000), Some(850_000)),
        offset: (None, None),
    });

    let id = h.engine.submit(request, None).await.unwrap();
    advance_until(&h.engine, &id, ProcessState::Confirming).await;

    let txid = h.engine.process(&id).unwrap().txid.unwrap();
    let tx = h.chain.transaction(&txid).unwrap();
    assert!(tx.output[0].script_pubkey.len() <= 80);
    let terms = Runestone::decipher(&tx).unwrap().unwrap().etching.unwrap().terms.unwrap();
    assert_eq!(terms.cap, Some(10_000));
}

#[tokio::test]
async fn invalid_requests_create_nothing() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let result = h
        .engine
        .submit(RuneEtchingRequest::new("Too long", "TOOLONGSYMBOL", 0), None)
        .await;

    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert!(h.engine.processes().is_empty());
    assert!(h.store.is_empty());
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn contradictory_mint_windows_are_refused_at_submit() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let request = RuneEtchingRequest::new("Late", "LATE", 0).with_terms(Terms {
        amount: Some(1),
        cap: Some(10),
        height: (None, Some(840_010)),
        offset: (Some(100), None),
    });

    let result = h.engine.submit(request, None).await;

    assert!(matches!(
        result,
        Err(EngineError::Validation(ValidationError::ContradictoryMintWindows(840_001)))
    ));
    assert!(h.engine.processes().is_empty());
    assert!(h.store.is_empty());
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn insufficient_funds_create_nothing() {
    let h = Harness::new();
    h.fund(1, 5_000);

    let result = h.engine.submit(test_rune(), None).await;

    match result {
        Err(EngineError::Selection(SelectionError::InsufficientFunds { available, required })) => {
            assert_eq!(available, 5_000);
            assert!(required > 10_000);
        }
        other => panic!("expected insufficient funds, got {:?}", other),
    }
    assert!(h.engine.processes().is_empty());
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn reorg_returns_to_broadcasting_and_completes() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let events = h.engine.subscribe();

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    advance_until(&h.engine, &id, ProcessState::Confirming).await;
    let txid = h.engine.process(&id).unwrap().txid.unwrap();

    h.chain.advance_blocks(2);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Confirming);

    h.chain.reorg(2);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Broadcasting);
    let process = h.engine.process(&id).unwrap();
    assert_eq!(process.reorg_count, 1);
    assert_eq!(process.txid, Some(txid));

    // the transaction is back in the mempool, so re-announcing is a no-op
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Confirming);

    h.chain.advance_blocks(6);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Completed);
    assert_eq!(h.engine.process(&id).unwrap().txid, Some(txid));

    assert!(events
        .try_iter()
        .any(|event| matches!(event, EtchingEvent::ReorgDetected { .. })));
}

#[tokio::test]
async fn reannounce_rejected_for_fee_is_rebuilt_with_a_higher_fee() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    let initial_rate = h.engine.process(&id).unwrap().fee_rate;
    let lost = evicted_after_confirming(&h, &id).await;

    h.chain.reject_next("mempool min fee not met");
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Failed);
    let failed = h.engine.process(&id).unwrap();
    let failure = failed.failure.clone().unwrap();
    assert_eq!(failure.stage, ProcessState::Broadcasting);
    assert!(failure.needs_fee_bump);
    assert!(failed.can_retry());

    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Building);
    let retried = h.engine.process(&id).unwrap();
    assert_eq!(retried.retry_count, 1);
    assert!(retried.fee_rate > initial_rate);

    assert_eq!(
        advance_until(&h.engine, &id, ProcessState::Confirming).await,
        ProcessState::Confirming
    );
    let replacement = h.engine.process(&id).unwrap();
    assert_ne!(replacement.txid, Some(lost));
    assert_eq!(replacement.announced.len(), 2);

    h.chain.advance_blocks(6);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Completed);
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn reannounce_times_out_from_the_reorg() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    evicted_after_confirming(&h, &id).await;

    assert!(h.engine.check_timeouts(Utc::now()).unwrap().is_empty());

    let limit = ChronoDuration::from_std(h.engine.settings().broadcast_timeout).unwrap();
    let later = Utc::now() + limit + ChronoDuration::seconds(1);
    assert_eq!(h.engine.check_timeouts(later).unwrap(), vec![id.clone()]);

    let failed = h.engine.process(&id).unwrap();
    assert_eq!(failed.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert!(failed.can_retry());

    // the old transaction may still surface, so its coins stay held
    assert!(matches!(h.engine.cancel(&id), Err(EngineError::CancelRefused { .. })));
    assert_eq!(h.engine.table().ledger().reserved_by(&id).len(), 1);
}

#[tokio::test]
async fn reannounce_rejections_are_bounded() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    evicted_after_confirming(&h, &id).await;

    for _ in 0..16 {
        h.chain.reject_next("mempool min fee not met");
    }
    for _ in 0..32 {
        if h.engine.process(&id).unwrap().is_terminal() {
            break;
        }
        h.engine.advance(&id).await.unwrap();
    }

    let process = h.engine.process(&id).unwrap();
    assert_eq!(process.state, ProcessState::Failed);
    assert!(process.is_terminal());
    assert_eq!(process.retry_count, h.engine.settings().max_retries);
    assert!(process.failure.unwrap().exhausted);
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn double_spent_etching_fails_as_conflict() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    advance_until(&h.engine, &id, ProcessState::Confirming).await;
    let txid = h.engine.process(&id).unwrap().txid.unwrap();

    h.chain.double_spend(&txid);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Broadcasting);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Failed);

    let process = h.engine.process(&id).unwrap();
    assert!(process.is_terminal());
    assert_eq!(process.failure.unwrap().kind, FailureKind::Conflict);
    assert!(h.engine.table().ledger().is_empty());
}

#[tokio::test]
async fn same_idempotency_key_returns_same_process() {
    let h = Harness::new();
    h.fund(1, 100_000);
    h.fund(2, 100_000);

    let first = h.engine.submit(test_rune(), Some("order-1")).await.unwrap();
    let second = h.engine.submit(test_rune(), Some("order-1")).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(h.engine.processes().len(), 1);
    assert_eq!(h.engine.table().ledger().len(), 1);

    let conflict = h
        .engine
        .submit(test_rune().with_premine(5), Some("order-1"))
        .await;
    assert!(matches!(conflict, Err(EngineError::IdempotencyConflict(_))));

    let other = h.engine.submit(test_rune(), Some("order-2")).await.unwrap();
    assert_ne!(other, first);
    assert_eq!(h.engine.table().ledger().len(), 2);
}

#[tokio::test]
async fn concurrent_submissions_never_share_coins() {
    let h = Harness::new();
    for seed in 1..=3 {
        h.fund(seed, 30_000);
    }

    let results = futures::future::join_all(
        (0..5).map(|_| h.engine.submit(test_rune(), None)),
    )
    .await;

    let accepted: Vec<_> = results.into_iter().filter_map(Result::ok).collect();
    assert_eq!(accepted.len(), 3);

    let mut owners = std::collections::HashSet::new();
    for id in &accepted {
        for outpoint in h.engine.table().ledger().reserved_by(id) {
            assert!(owners.insert(outpoint));
        }
    }
}

#[tokio::test]
async fn pending_process_can_be_cancelled() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    let cancelled = h.engine.cancel(&id).unwrap();

    assert_eq!(cancelled.state, ProcessState::Failed);
    assert!(cancelled.is_terminal());
    assert_eq!(cancelled.failure.unwrap().kind, FailureKind::Cancelled);
    assert!(h.engine.table().ledger().is_empty());

    assert!(matches!(
        h.engine.cancel(&id),
        Err(EngineError::Transition(TransitionError::Terminal(_)))
    ));
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Failed);
}

#[tokio::test]
async fn broadcast_process_cannot_be_cancelled() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    advance_until(&h.engine, &id, ProcessState::Confirming).await;

    assert!(matches!(
        h.engine.cancel(&id),
        Err(EngineError::CancelRefused { .. })
    ));
    assert_eq!(h.engine.process(&id).unwrap().state, ProcessState::Confirming);
}

#[tokio::test]
async fn lost_broadcast_answer_is_reconciled_with_the_chain() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let chain = Arc::new(LossyChain::new(h.chain.clone()));
    let engine = lossy_engine(&h, chain);

    let id = engine.submit(test_rune(), None).await.unwrap();
    assert_eq!(
        advance_until(&engine, &id, ProcessState::Confirming).await,
        ProcessState::Confirming
    );

    let process = engine.process(&id).unwrap();
    let txid = process.txid.unwrap();
    assert!(h.chain.in_mempool(&txid));
    assert_eq!(process.retry_count, 0);
    assert!(matches!(engine.cancel(&id), Err(EngineError::CancelRefused { .. })));
}

#[tokio::test]
async fn ambiguous_broadcast_cannot_be_cancelled() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let chain = Arc::new(LossyChain::new(h.chain.clone()));
    chain.blind.store(true, Ordering::SeqCst);
    let engine = lossy_engine(&h, chain.clone());

    let id = engine.submit(test_rune(), None).await.unwrap();
    assert_eq!(
        advance_until(&engine, &id, ProcessState::Failed).await,
        ProcessState::Failed
    );

    let failed = engine.process(&id).unwrap();
    let sent = failed.signed.as_ref().unwrap().txid;
    assert_eq!(failed.txid, None);
    assert_eq!(failed.announced, vec![sent]);
    assert_eq!(failed.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert!(h.chain.in_mempool(&sent));

    assert!(matches!(engine.cancel(&id), Err(EngineError::CancelRefused { .. })));
    assert_eq!(engine.table().ledger().reserved_by(&id).len(), 1);

    // once the node answers again the same transaction is found, not replaced
    chain.lose_answers.store(false, Ordering::SeqCst);
    chain.blind.store(false, Ordering::SeqCst);
    assert_eq!(
        advance_until(&engine, &id, ProcessState::Confirming).await,
        ProcessState::Confirming
    );
    assert_eq!(engine.process(&id).unwrap().txid, Some(sent));
}

#[tokio::test]
async fn stuck_signing_times_out_and_is_retried() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Building);

    // a crash after entering Signing leaves this record behind
    let mut stuck = h.engine.process(&id).unwrap();
    stuck.transition_to(ProcessState::Signing, Utc::now()).unwrap();
    h.store.persist(&stuck).unwrap();

    let engine = h.restarted(h.store.clone());
    assert_eq!(engine.restore().unwrap(), 1);
    assert_eq!(engine.table().ledger().reserved_by(&id).len(), 1);

    assert!(engine.check_timeouts(Utc::now()).unwrap().is_empty());

    let later = Utc::now() + ChronoDuration::minutes(3);
    assert_eq!(engine.check_timeouts(later).unwrap(), vec![id.clone()]);

    let failed = engine.process(&id).unwrap();
    assert_eq!(failed.state, ProcessState::Failed);
    assert_eq!(failed.failure.as_ref().unwrap().kind, FailureKind::Timeout);
    assert!(failed.can_retry());

    assert_eq!(engine.advance(&id).await.unwrap(), ProcessState::Building);
    assert_eq!(engine.process(&id).unwrap().retry_count, 1);
    assert_eq!(
        advance_until(&engine, &id, ProcessState::Confirming).await,
        ProcessState::Confirming
    );
}

#[tokio::test]
async fn low_fee_rejection_bumps_the_fee() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let events = h.engine.subscribe();

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    let initial_rate = h.engine.process(&id).unwrap().fee_rate;
    h.chain.reject_next("min relay fee not met, 200 < 250");

    assert_eq!(advance_until(&h.engine, &id, ProcessState::Failed).await, ProcessState::Failed);
    let failure = h.engine.process(&id).unwrap().failure.unwrap();
    assert!(failure.needs_fee_bump);
    assert!(!failure.terminal);

    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Building);
    let retried = h.engine.process(&id).unwrap();
    assert!(retried.fee_rate > initial_rate);
    assert_eq!(retried.reserved_outpoints(), retried.selection.outpoints());

    assert_eq!(
        advance_until(&h.engine, &id, ProcessState::Confirming).await,
        ProcessState::Confirming
    );
    let signed = h.engine.process(&id).unwrap().signed.unwrap();
    assert_eq!(signed.fee_rate, retried.fee_rate);

    assert!(events.try_iter().any(|event| matches!(
        event,
        EtchingEvent::RetryScheduled { attempt: 1, .. }
    )));
}

#[tokio::test]
async fn signing_outage_exhausts_retries() {
    let h = Harness::new();
    h.fund(1, 100_000);
    h.signer.set_always_fail(true);

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    for _ in 0..16 {
        if h.engine.process(&id).unwrap().is_terminal() {
            break;
        }
        h.engine.advance(&id).await.unwrap();
    }

    let process = h.engine.process(&id).unwrap();
    assert_eq!(process.state, ProcessState::Failed);
    assert_eq!(process.retry_count, h.engine.settings().max_retries);

    let failure = process.failure.unwrap();
    assert_eq!(failure.kind, FailureKind::Signing);
    assert!(failure.exhausted);
    assert!(failure.terminal);
    assert!(h.engine.table().ledger().is_empty());
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test]
async fn published_transitions_follow_the_state_graph() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let events = h.engine.subscribe();

    h.signer.fail_next(1);
    h.chain.reject_next("mempool full");

    let id = h.engine.submit(test_rune(), None).await.unwrap();
    advance_until(&h.engine, &id, ProcessState::Confirming).await;
    h.chain.advance_blocks(2);
    h.engine.advance(&id).await.unwrap();
    h.chain.reorg(2);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Broadcasting);
    advance_until(&h.engine, &id, ProcessState::Confirming).await;
    h.chain.advance_blocks(6);
    assert_eq!(
        advance_until(&h.engine, &id, ProcessState::Completed).await,
        ProcessState::Completed
    );

    let mut transitions = 0;
    for event in events.try_iter() {
        if let EtchingEvent::Transition { from, to, .. } = event {
            assert!(from.can_transition_to(to), "{} -> {}", from, to);
            transitions += 1;
        }
    }
    assert!(transitions >= 9);
}

#[tokio::test]
async fn file_store_survives_restart() {
    let h = Harness::new();
    h.fund(1, 100_000);
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(runeforge_common::storage::JsonFileProcessStore::open(dir.path()).unwrap());

    let first = h.restarted(store.clone());
    let id = first.submit(test_rune(), Some("restart")).await.unwrap();
    assert_eq!(advance_until(&first, &id, ProcessState::Broadcasting).await, ProcessState::Broadcasting);
    drop(first);

    let reopened = Arc::new(runeforge_common::storage::JsonFileProcessStore::open(dir.path()).unwrap());
    let second = h.restarted(reopened);
    assert_eq!(second.restore().unwrap(), 1);
    assert_eq!(second.table().ledger().reserved_by(&id).len(), 1);

    // the key still maps to the restored process
    assert_eq!(second.submit(test_rune(), Some("restart")).await.unwrap(), id);

    advance_until(&second, &id, ProcessState::Confirming).await;
    h.chain.advance_blocks(6);
    assert_eq!(
        advance_until(&second, &id, ProcessState::Completed).await,
        ProcessState::Completed
    );
    assert!(second.table().ledger().is_empty());
}

#[tokio::test]
async fn poll_all_drives_every_process() {
    let mut settings = test_settings();
    settings.required_confirmations = 1;
    let h = Harness::with_settings(settings);
    h.fund(1, 100_000);
    h.fund(2, 100_000);

    let a = h.engine.submit(test_rune(), None).await.unwrap();
    let b = h
        .engine
        .submit(RuneEtchingRequest::new("Other", "OTHER", 0), None)
        .await
        .unwrap();

    for _ in 0..4 {
        for (_, result) in h.engine.poll_all().await {
            result.unwrap();
        }
    }
    h.chain.advance_blocks(1);
    h.engine.poll_all().await;

    for id in [&a, &b] {
        assert_eq!(h.engine.process(id).unwrap().state, ProcessState::Completed);
    }
    assert!(h.engine.table().active_ids().is_empty());
    assert!(h.engine.table().ledger().is_empty());
}
