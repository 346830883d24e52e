//! Etching engine
//!
//! Orchestrates every process from acceptance to a terminal state. Each call
//! to [`EtchingEngine::advance`] performs one stage step:
//!
//! | state          | step                                                   |
//! |----------------|--------------------------------------------------------|
//! | `Pending`      | build the unsigned transaction                         |
//! | `Building`     | collect signatures                                     |
//! | `Signing`      | collect signatures again (resumed after a restart)     |
//! | `Broadcasting` | announce the signed transaction                        |
//! | `Confirming`   | poll the chain through the confirmation tracker        |
//! | `Failed`       | rebuild from the reserved coins, if retries remain     |
//!
//! Every change is written to the [`ProcessStore`] before it becomes visible
//! in the [`ProcessTable`], and every state change is published on the
//! [`EtchingEventBus`]. Collaborator calls are awaited without holding any
//! table lock; the in-flight guard keeps a process from being advanced by two
//! callers at once.
//!
//! Coins are reserved when a request is accepted and released when the
//! process reaches a terminal state.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Network, ScriptBuf, Txid};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use futures::future::join_all;
use serde_json::json;
use thiserror::Error;

use crate::broadcast::{BroadcastError, Broadcaster};
use crate::config::Config;
use crate::events::{EtchingEvent, EtchingEventBus};
use crate::fee_estimation::FeePolicy;
use crate::logging::{log_engine, sanitize_for_logging, LogLevel};
use crate::math::P2TR_SCRIPT_LEN;
use crate::process::{EtchingProcess, FailureKind, ProcessState, TransitionError};
use crate::process_table::ProcessTable;
use crate::provider::{ChainClient, ProviderError, ThresholdSigner, UtxoSupply};
use crate::runestone::CodecError;
use crate::signing::{SignatureCoordinator, SigningError};
use crate::storage::{ProcessStore, StorageError};
use crate::tracker::{ConfirmationTracker, TrackerError, TrackerOutcome};
use crate::transaction::{BuildError, TransactionBuilder, UnsignedTransaction};
use crate::types::{
    ProcessId, RuneEtchingRequest, DEFAULT_MAX_SYMBOL_LENGTH, DEFAULT_POSTAGE, DUST_THRESHOLD,
};
use crate::utxo_selection::{OutputShape, Selection, SelectionError, UtxoRecord, UtxoSelector};
use crate::validation::{EtchingValidator, ValidationError};

/// Errors surfaced by engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Idempotency key {0} was already used for a different request")]
    IdempotencyConflict(String),

    #[error("Process {0} not found")]
    NotFound(ProcessId),

    #[error("Process {0} is being advanced by another caller")]
    Busy(ProcessId),

    #[error("Process {id} cannot be cancelled: {reason}")]
    CancelRefused { id: ProcessId, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Provider(_) | EngineError::Busy(_) => true,
            EngineError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Settings the engine runs with
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub network: Network,
    /// Owner whose coins fund etchings
    pub owner: String,
    pub change_address: Option<String>,
    pub postage: u64,
    pub dust_threshold: u64,
    pub min_confirmations: u32,
    pub max_symbol_length: usize,
    pub fee_policy: FeePolicy,
    pub max_retries: u32,
    pub signing_timeout: Duration,
    pub broadcast_timeout: Duration,
    pub required_confirmations: u32,
    pub poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            owner: String::new(),
            change_address: None,
            postage: DEFAULT_POSTAGE,
            dust_threshold: DUST_THRESHOLD,
            min_confirmations: 1,
            max_symbol_length: DEFAULT_MAX_SYMBOL_LENGTH,
            fee_policy: FeePolicy::default(),
            max_retries: 3,
            signing_timeout: Duration::from_secs(120),
            broadcast_timeout: Duration::from_secs(60),
            required_confirmations: 6,
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl EngineSettings {
    /// Settings from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let network = config
            .bitcoin_network()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        let fee_policy = config
            .fee_policy()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(Self {
            network,
            owner: config.network.owner.clone(),
            change_address: config.network.change_address.clone(),
            postage: config.etching.postage,
            dust_threshold: config.etching.dust_threshold,
            min_confirmations: config.etching.min_confirmations,
            max_symbol_length: config.etching.max_symbol_length,
            fee_policy,
            max_retries: config.retry.max_retries,
            signing_timeout: config.signing_timeout(),
            broadcast_timeout: config.broadcast_timeout(),
            required_confirmations: config.tracker.required_confirmations,
            poll_interval: config.poll_interval(),
        })
    }
}

/// The etching state machine and its collaborators
pub struct EtchingEngine {
    settings: EngineSettings,
    validator: EtchingValidator,
    table: ProcessTable,
    store: Arc<dyn ProcessStore>,
    supply: Arc<dyn UtxoSupply>,
    chain: Arc<dyn ChainClient>,
    coordinator: SignatureCoordinator,
    broadcaster: Broadcaster,
    tracker: ConfirmationTracker,
    events: EtchingEventBus,
}

impl EtchingEngine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn ProcessStore>,
        supply: Arc<dyn UtxoSupply>,
        signer: Arc<dyn ThresholdSigner>,
        chain: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            validator: EtchingValidator::new(settings.network, settings.max_symbol_length),
            coordinator: SignatureCoordinator::new(signer, settings.signing_timeout),
            broadcaster: Broadcaster::new(chain.clone(), settings.broadcast_timeout),
            tracker: ConfirmationTracker::new(settings.required_confirmations),
            table: ProcessTable::new(),
            events: EtchingEventBus::new(),
            settings,
            store,
            supply,
            chain,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<EtchingEvent> {
        self.events.subscribe()
    }

    pub fn process(&self, id: &ProcessId) -> Option<EtchingProcess> {
        self.table.get(id)
    }

    /// All known processes, oldest first.
    pub fn processes(&self) -> Vec<EtchingProcess> {
        self.table.list()
    }

    /// Accept an etching request.
    ///
    /// Validates the request, selects and reserves funding coins and records
    /// a `Pending` process. Nothing is recorded when any of these fail. With
    /// an idempotency key, resubmitting the same request returns the original
    /// process id; a different request under the same key is refused.
    pub async fn submit(
        &self,
        request: RuneEtchingRequest,
        idempotency_key: Option<&str>,
    ) -> Result<ProcessId, EngineError> {
        let fingerprint = request.fingerprint();

        let id = match idempotency_key {
            Some(key) => {
                let id = ProcessId::for_idempotency_key(key);
                if let Some(existing) = self.existing_for_key(&id, key, &fingerprint)? {
                    return Ok(existing);
                }
                id
            }
            None => ProcessId::generate(),
        };

        let etching_height = self.chain.get_block_height().await.ok().map(|tip| tip + 1);
        self.validator.validate_at(&request, etching_height)?;

        let op_return_len = request.to_runestone()?.to_script()?.len();

        let available = self.supply.list_utxos(&self.settings.owner).await?;
        let change_script = self.change_script(&available)?;
        let destination_script = match &request.destination {
            Some(destination) => self.validator.validate_destination(destination)?.script_pubkey(),
            None => change_script.clone(),
        };

        let estimated = self
            .supply
            .estimate_fee_rate(self.settings.fee_policy.priority)
            .await
            .ok();
        let fee_rate = self.settings.fee_policy.initial_rate(estimated);

        let selector = self.selector(OutputShape::new(
            vec![op_return_len, destination_script.len()],
            change_script.len(),
        ));
        let postage = self.settings.postage;

        let selection = match self.table.ledger().reserve_with(&id, &available, |unreserved| {
            selector.select(unreserved, postage, fee_rate)
        }) {
            Ok(selection) => selection,
            Err(SelectionError::AlreadyReserved(_)) => {
                if let Some(key) = idempotency_key {
                    if let Some(existing) = self.existing_for_key(&id, key, &fingerprint)? {
                        return Ok(existing);
                    }
                }
                return Err(EngineError::Busy(id));
            }
            Err(e) => return Err(e.into()),
        };

        let now = Utc::now();
        let process = EtchingProcess::new(
            id.clone(),
            idempotency_key.map(str::to_string),
            request,
            selection,
            destination_script,
            change_script,
            now,
        );

        if let Err(e) = self.store.persist(&process) {
            self.table.ledger().release(&id);
            return Err(e.into());
        }

        log_engine(
            LogLevel::Info,
            "etching accepted",
            Some(json!({
                "process_id": id.to_string(),
                "symbol": process.request.symbol,
                "inputs": process.selection.inputs.len(),
                "fee_rate": process.fee_rate,
            })),
        );

        self.table.upsert(process);
        self.events.publish(EtchingEvent::Submitted {
            process_id: id.clone(),
            at: now,
        });

        Ok(id)
    }

    /// Perform one stage step for `id` and return the resulting state.
    pub async fn advance(&self, id: &ProcessId) -> Result<ProcessState, EngineError> {
        let _guard = self
            .table
            .try_begin(id)
            .ok_or_else(|| EngineError::Busy(id.clone()))?;

        let process = self
            .table
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        if process.is_terminal() {
            return Ok(process.state);
        }

        let process = match process.state {
            ProcessState::Pending => self.build(process)?,
            ProcessState::Building | ProcessState::Signing => self.sign(process).await?,
            ProcessState::Broadcasting => self.broadcast(process).await?,
            ProcessState::Confirming => self.confirm(process).await?,
            ProcessState::Failed => self.retry(process)?,
            ProcessState::Completed => process,
        };

        Ok(process.state)
    }

    /// Step every non-terminal process once, concurrently.
    pub async fn poll_all(&self) -> Vec<(ProcessId, Result<ProcessState, EngineError>)> {
        let ids = self.table.active_ids();
        let results = join_all(ids.iter().map(|id| self.advance(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Poll until no process is left active, sleeping `poll_interval`
    /// between rounds.
    pub async fn run_until_idle(&self) {
        loop {
            if let Err(e) = self.check_timeouts(Utc::now()) {
                log_engine(
                    LogLevel::Warn,
                    "timeout sweep failed",
                    Some(json!({ "error": e.to_string() })),
                );
            }

            for (id, result) in self.poll_all().await {
                if let Err(e) = result {
                    log_engine(
                        LogLevel::Warn,
                        "advance failed",
                        Some(json!({ "process_id": id.to_string(), "error": e.to_string() })),
                    );
                }
            }

            if self.table.active_ids().is_empty() {
                break;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Cancel a process that has not handed a transaction to the chain.
    ///
    /// Once a broadcast has been attempted the outcome may be unknown (a lost
    /// answer), so the coins stay reserved and cancellation is refused.
    pub fn cancel(&self, id: &ProcessId) -> Result<EtchingProcess, EngineError> {
        let _guard = self.table.try_begin(id).ok_or_else(|| EngineError::CancelRefused {
            id: id.clone(),
            reason: "process is being advanced".to_string(),
        })?;

        let mut process = self
            .table
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;

        if process.is_terminal() {
            return Err(TransitionError::Terminal(process.state).into());
        }

        if process.broadcast_attempted() {
            return Err(EngineError::CancelRefused {
                id: id.clone(),
                reason: "transaction may already be on chain".to_string(),
            });
        }

        let now = Utc::now();
        if process.state == ProcessState::Failed {
            process.pin(FailureKind::Cancelled, "cancelled by caller", now)?;
        } else {
            process.fail(
                FailureKind::Cancelled,
                "cancelled by caller",
                false,
                false,
                self.settings.max_retries,
                now,
            )?;
        }

        self.commit(process)
    }

    /// Fail processes stuck in `Signing` or `Broadcasting` longer than the
    /// configured timeout. Returns the ids that timed out.
    pub fn check_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<ProcessId>, EngineError> {
        let mut timed_out = Vec::new();

        for candidate in self.table.list() {
            if candidate.is_terminal() || timeout_for(&self.settings, &candidate).is_none() {
                continue;
            }

            let Some(_guard) = self.table.try_begin(&candidate.id) else {
                continue;
            };
            let Some(mut process) = self.table.get(&candidate.id) else {
                continue;
            };
            let Some(limit) = timeout_for(&self.settings, &process) else {
                continue;
            };

            let expired = process
                .time_in_stage(now)
                .to_std()
                .map_or(false, |elapsed| elapsed > limit);
            if !expired {
                continue;
            }

            let message = format!("{} timed out after {}s", process.state, limit.as_secs());
            process.fail(
                FailureKind::Timeout,
                message,
                true,
                false,
                self.settings.max_retries,
                now,
            )?;
            self.commit(process)?;
            timed_out.push(candidate.id);
        }

        Ok(timed_out)
    }

    /// Load every stored process and re-establish the reservations of the
    /// ones still in progress. Returns the number of processes loaded.
    pub fn restore(&self) -> Result<usize, EngineError> {
        let processes = self.store.load_all()?;
        let count = processes.len();

        for process in processes {
            if process.holds_reservation() {
                self.table
                    .ledger()
                    .restore(&process.id, &process.reserved_outpoints())?;
            }
            self.table.upsert(process);
        }

        log_engine(
            LogLevel::Info,
            "restored processes",
            Some(json!({ "count": count })),
        );
        Ok(count)
    }

    fn existing_for_key(
        &self,
        id: &ProcessId,
        key: &str,
        fingerprint: &str,
    ) -> Result<Option<ProcessId>, EngineError> {
        match self.table.get(id) {
            Some(existing) if existing.request_fingerprint == fingerprint => Ok(Some(existing.id)),
            Some(_) => Err(EngineError::IdempotencyConflict(key.to_string())),
            None => Ok(None),
        }
    }

    fn selector(&self, shape: OutputShape) -> UtxoSelector {
        UtxoSelector::new(shape)
            .with_dust_threshold(self.settings.dust_threshold)
            .with_min_confirmations(self.settings.min_confirmations)
    }

    /// The configured change address, or the script of the largest coin.
    fn change_script(&self, available: &[UtxoRecord]) -> Result<ScriptBuf, EngineError> {
        if let Some(address) = &self.settings.change_address {
            return Ok(self.validator.validate_destination(address)?.script_pubkey());
        }

        self.selector(OutputShape::new(Vec::new(), P2TR_SCRIPT_LEN))
            .eligible(available)
            .first()
            .map(|utxo| utxo.script_pubkey.clone())
            .ok_or_else(|| {
                SelectionError::InsufficientFunds {
                    available: 0,
                    required: self.settings.postage,
                }
                .into()
            })
    }

    fn assemble(
        &self,
        process: &EtchingProcess,
        selection: &Selection,
    ) -> Result<UnsignedTransaction, BuildError> {
        let runestone = process.request.to_runestone()?;

        TransactionBuilder::new(process.destination_script.clone(), process.selection.target_value)
            .with_dust_threshold(self.settings.dust_threshold)
            .build(selection, &runestone, &process.change_script)
    }

    /// Persist `process`, then publish it to the table.
    fn commit(&self, process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        self.store.persist(&process)?;

        let previous = self.table.get(&process.id);
        self.table.upsert(process.clone());

        let was_terminal = previous.as_ref().map_or(false, |p| p.is_terminal());
        if process.is_terminal() && !was_terminal {
            self.table.ledger().release(&process.id);
        }

        if let Some(from) = previous.map(|p| p.state) {
            if from != process.state {
                self.log_transition(&process, from);
                self.events.publish(EtchingEvent::Transition {
                    process_id: process.id.clone(),
                    from,
                    to: process.state,
                    at: process.updated_at,
                });
            }
        }

        if process.is_terminal() && !was_terminal && process.state == ProcessState::Failed {
            log_engine(
                LogLevel::Error,
                "etching failed",
                Some(json!({
                    "process_id": process.id.to_string(),
                    "retry_count": process.retry_count,
                    "error": process.last_error,
                })),
            );
        }

        Ok(process)
    }

    fn log_transition(&self, process: &EtchingProcess, from: ProcessState) {
        log_engine(
            LogLevel::Info,
            "state transition",
            Some(json!({
                "process_id": process.id.to_string(),
                "from": from,
                "to": process.state,
            })),
        );
    }

    fn build(&self, mut process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        let now = Utc::now();

        match self.assemble(&process, &process.selection) {
            Ok(unsigned) => {
                process.transition_to(ProcessState::Building, now)?;
                process.unsigned = Some(unsigned);
            }
            Err(e) => {
                process.fail(
                    FailureKind::Build,
                    e.to_string(),
                    false,
                    false,
                    self.settings.max_retries,
                    now,
                )?;
            }
        }

        self.commit(process)
    }

    async fn sign(&self, mut process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        let unsigned = match process.unsigned.clone() {
            Some(unsigned) => unsigned,
            None => match self.assemble(&process, &process.selection) {
                Ok(unsigned) => {
                    process.unsigned = Some(unsigned.clone());
                    unsigned
                }
                Err(e) => {
                    process.fail(
                        FailureKind::Build,
                        e.to_string(),
                        false,
                        false,
                        self.settings.max_retries,
                        Utc::now(),
                    )?;
                    return self.commit(process);
                }
            },
        };

        if process.state == ProcessState::Building {
            process.transition_to(ProcessState::Signing, Utc::now())?;
            process = self.commit(process)?;
        }

        let result = self.coordinator.sign(&process.id, &unsigned).await;
        let now = Utc::now();

        match result {
            Ok(signed) => {
                process.transition_to(ProcessState::Broadcasting, now)?;
                process.signed = Some(signed);
            }
            Err(e) => {
                let kind = match e {
                    SigningError::Timeout { .. } => FailureKind::Timeout,
                    _ => FailureKind::Signing,
                };
                process.fail(
                    kind,
                    e.to_string(),
                    e.is_retryable(),
                    false,
                    self.settings.max_retries,
                    now,
                )?;
            }
        }

        self.commit(process)
    }

    async fn broadcast(&self, mut process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        let Some(signed) = process.signed.clone() else {
            process.fail(
                FailureKind::Broadcast,
                "no signed transaction to broadcast",
                true,
                false,
                self.settings.max_retries,
                Utc::now(),
            )?;
            return self.commit(process);
        };

        // The announcement is durable before the transaction leaves.
        if process.record_announcement(signed.txid, Utc::now()) {
            process = self.commit(process)?;
        }

        let result = self.broadcaster.broadcast(&signed).await;
        let now = Utc::now();

        let error = match result {
            Ok(txid) => {
                process.mark_broadcast(txid, now)?;
                return self.commit(process);
            }
            Err(e) => e,
        };

        if let Some(txid) = self.live_announcement(&process).await {
            log_engine(
                LogLevel::Warn,
                "transaction already on chain, tracking it",
                Some(json!({
                    "process_id": process.id.to_string(),
                    "txid": sanitize_for_logging(&txid.to_string()),
                    "error": error.to_string(),
                })),
            );
            process.mark_broadcast(txid, now)?;
            return self.commit(process);
        }

        let kind = match error {
            BroadcastError::Timeout => FailureKind::Timeout,
            BroadcastError::Conflict(_) => FailureKind::Conflict,
            _ => FailureKind::Broadcast,
        };
        process.fail(
            kind,
            error.to_string(),
            error.is_retryable(),
            error.needs_fee_bump(),
            self.settings.max_retries,
            now,
        )?;

        self.commit(process)
    }

    /// The newest announced transaction the chain still knows, if any.
    ///
    /// Covers answers lost after the node accepted the transaction, and an
    /// earlier announcement that stayed in the mempool while a rebuild was
    /// rejected.
    async fn live_announcement(&self, process: &EtchingProcess) -> Option<Txid> {
        for txid in process.announced.iter().rev() {
            match self.chain.get_tx_status(txid).await {
                Ok(status) if status.confirmations.is_some() => return Some(*txid),
                Ok(_) => {}
                Err(e) => {
                    log_engine(
                        LogLevel::Warn,
                        "could not check announced transaction",
                        Some(json!({
                            "process_id": process.id.to_string(),
                            "txid": sanitize_for_logging(&txid.to_string()),
                            "error": e.to_string(),
                        })),
                    );
                    return None;
                }
            }
        }
        None
    }

    async fn confirm(&self, process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        match self
            .tracker
            .poll(self.chain.as_ref(), &process, Utc::now())
            .await
        {
            Ok((next, outcome)) => {
                if outcome == TrackerOutcome::Reorged {
                    self.events.publish(EtchingEvent::ReorgDetected {
                        process_id: process.id.clone(),
                        txid: process.txid.map(|txid| txid.to_string()).unwrap_or_default(),
                        at: next.updated_at,
                    });
                }

                if next == process {
                    Ok(next)
                } else {
                    self.commit(next)
                }
            }
            Err(TrackerError::Chain(e)) => {
                log_engine(
                    LogLevel::Warn,
                    "confirmation poll failed",
                    Some(json!({ "process_id": process.id.to_string(), "error": e.to_string() })),
                );
                Ok(process)
            }
            Err(TrackerError::Transition(e)) => Err(e.into()),
            Err(TrackerError::NotBroadcast) => {
                let mut process = process;
                process.fail(
                    FailureKind::Broadcast,
                    TrackerError::NotBroadcast.to_string(),
                    true,
                    false,
                    self.settings.max_retries,
                    Utc::now(),
                )?;
                self.commit(process)
            }
        }
    }

    /// Rebuild a retryable failure from the coins the process already holds.
    fn retry(&self, mut process: EtchingProcess) -> Result<EtchingProcess, EngineError> {
        if !process.can_retry() {
            return Ok(process);
        }

        let now = Utc::now();
        let needs_fee_bump = process
            .failure
            .as_ref()
            .map_or(false, |failure| failure.needs_fee_bump);
        let fee_rate = if needs_fee_bump {
            self.settings.fee_policy.bump_fee_rate(process.fee_rate)
        } else {
            process.fee_rate
        };

        let op_return_len = process.request.to_runestone()?.to_script()?.len();
        let selector = self.selector(OutputShape::new(
            vec![op_return_len, process.destination_script.len()],
            process.change_script.len(),
        ));

        let selection = match selector.select(&process.reserved, process.selection.target_value, fee_rate) {
            Ok(selection) => selection,
            Err(e) => {
                process.pin(FailureKind::Selection, e.to_string(), now)?;
                return self.commit(process);
            }
        };

        let unsigned = match self.assemble(&process, &selection) {
            Ok(unsigned) => unsigned,
            Err(e) => {
                process.pin(FailureKind::Build, e.to_string(), now)?;
                return self.commit(process);
            }
        };

        process.transition_to(ProcessState::Building, now)?;
        process.selection = selection;
        process.fee_rate = fee_rate;
        process.unsigned = Some(unsigned);
        process.signed = None;

        log_engine(
            LogLevel::Warn,
            "retrying etching",
            Some(json!({
                "process_id": process.id.to_string(),
                "attempt": process.retry_count,
                "fee_rate": fee_rate,
            })),
        );
        let process = self.commit(process)?;
        self.events.publish(EtchingEvent::RetryScheduled {
            process_id: process.id.clone(),
            attempt: process.retry_count,
            fee_rate,
            at: now,
        });

        Ok(process)
    }
}

/// How long a process may stay in its current stage. Re-announcing after a
/// reorg counts from the moment the process went back to `Broadcasting`.
fn timeout_for(settings: &EngineSettings, process: &EtchingProcess) -> Option<Duration> {
    match process.state {
        ProcessState::Signing => Some(settings.signing_timeout),
        ProcessState::Broadcasting => Some(settings.broadcast_timeout),
        _ => None,
    }
}
