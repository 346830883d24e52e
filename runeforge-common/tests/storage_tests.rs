
use std::fs;

use chrono::{Duration, Utc};
use runeforge_common::engine::EngineError;
use runeforge_common::math::P2TR_SCRIPT_LEN;
use runeforge_common::process::{EtchingProcess, ProcessState};
use runeforge_common::storage::{JsonFileProcessStore, MemoryProcessStore, ProcessStore, StorageError};
use runeforge_common::types::{ProcessId, RuneEtchingRequest, DEFAULT_POSTAGE};
use runeforge_common::utxo_selection::{OutputShape, UtxoSelector};
use tempfile::tempdir;
use test_utils::{funding_utxo, setup, Harness, SIGNER_SCRIPT};

fn process(id: &str, age_minutes: i64) -> EtchingProcess {
    let selection = UtxoSelector::new(OutputShape::new(vec![20, P2TR_SCRIPT_LEN], P2TR_SCRIPT_LEN))
        .select(&[funding_utxo(1, 50_000)], DEFAULT_POSTAGE, 2)
        .unwrap();

    EtchingProcess::new(
        ProcessId::from(id),
        Some(format!("key-{}", id)),
        RuneEtchingRequest::new("Test", "TEST", 8).with_premine(1_000_000),
        selection,
        SIGNER_SCRIPT.clone(),
        SIGNER_SCRIPT.clone(),
        Utc::now() - Duration::minutes(age_minutes),
    )
}

#[test]
fn file_store_round_trips_records() {
    setup();
    let dir = tempdir().unwrap();
    let store = JsonFileProcessStore::open(dir.path().join("processes")).unwrap();

    let mut record = process("alpha", 0);
    store.persist(&record).unwrap();
    assert_eq!(store.load(&record.id).unwrap(), Some(record.clone()));

    record.transition_to(ProcessState::Building, Utc::now()).unwrap();
    store.persist(&record).unwrap();
    assert_eq!(store.load(&record.id).unwrap().unwrap().state, ProcessState::Building);

    let files: Vec<String> = fs::read_dir(store.directory())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(files, vec!["alpha.json".to_string()]);
}

#[test]
fn missing_records_load_as_none() {
    let dir = tempdir().unwrap();
    let store = JsonFileProcessStore::open(dir.path()).unwrap();
    assert_eq!(store.load(&ProcessId::from("nobody")).unwrap(), None);
    assert!(store.load_all().unwrap().is_empty());
}

#[test]
fn load_all_returns_oldest_first() {
    let dir = tempdir().unwrap();
    let store = JsonFileProcessStore::open(dir.path()).unwrap();

    store.persist(&process("newer", 1)).unwrap();
    store.persist(&process("older", 10)).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let ids: Vec<String> = store
        .load_all()
        .unwrap()
        .into_iter()
        .map(|p| p.id.to_string())
        .collect();
    assert_eq!(ids, vec!["older".to_string(), "newer".to_string()]);
}

#[test]
fn corrupt_records_are_not_retryable() {
    let dir = tempdir().unwrap();
    let store = JsonFileProcessStore::open(dir.path()).unwrap();
    fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

    let err = store.load(&ProcessId::from("broken")).unwrap_err();
    assert!(matches!(err, StorageError::Serialization(_)));
    assert!(!err.is_retryable());
}

#[test]
fn io_failures_carry_their_context() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "not a directory").unwrap();

    let err = match JsonFileProcessStore::open(blocker.join("processes")) {
        Err(err) => err,
        Ok(_) => panic!("a file in the path must block the store directory"),
    };
    match &err {
        StorageError::Io { context, .. } => assert!(context.contains("Failed to create store directory")),
        other => panic!("expected an I/O error, got {:?}", other),
    }
    assert!(err.is_retryable());
}

#[test]
fn memory_store_keeps_latest_record() {
    let store = MemoryProcessStore::new();
    let mut record = process("m", 0);
    store.persist(&record).unwrap();
    record.transition_to(ProcessState::Building, Utc::now()).unwrap();
    store.persist(&record).unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(store.load_all().unwrap()[0].state, ProcessState::Building);
}

#[tokio::test]
async fn failed_write_rolls_back_the_reservation() {
    let h = Harness::new();
    h.fund(1, 100_000);
    h.store.set_fail_writes(true);

    let result = h
        .engine
        .submit(RuneEtchingRequest::new("Test", "TEST", 8), None)
        .await;

    match result {
        Err(err @ EngineError::Storage(_)) => assert!(err.is_retryable()),
        other => panic!("expected a storage error, got {:?}", other),
    }
    assert!(h.engine.table().ledger().is_empty());
    assert!(h.engine.processes().is_empty());

    h.store.set_fail_writes(false);
    let id = h
        .engine
        .submit(RuneEtchingRequest::new("Test", "TEST", 8), None)
        .await
        .unwrap();
    assert!(h.store.load(&id).unwrap().is_some());
}

#[tokio::test]
async fn failed_write_leaves_state_unchanged() {
    let h = Harness::new();
    h.fund(1, 100_000);

    let id = h
        .engine
        .submit(RuneEtchingRequest::new("Test", "TEST", 8), None)
        .await
        .unwrap();

    h.store.set_fail_writes(true);
    assert!(matches!(h.engine.advance(&id).await, Err(EngineError::Storage(_))));
    assert_eq!(h.engine.process(&id).unwrap().state, ProcessState::Pending);

    h.store.set_fail_writes(false);
    assert_eq!(h.engine.advance(&id).await.unwrap(), ProcessState::Building);
}
