//! Etching process records and their state machine
//!
//! An [`EtchingProcess`] is the durable record of one etching, from
//! acceptance to a terminal state:
//!
//! ```text
//! Pending -> Building -> Signing -> Broadcasting -> Confirming -> Completed
//!                ^                       ^               |
//!                |                       +---- reorg ----+
//!              retry
//!                |
//!             Failed  (reachable from every non-terminal state)
//! ```
//!
//! A `Failed` process whose failure is retryable and that has retries left
//! may go back to `Building`; otherwise it is pinned. Every change
//! goes through [`EtchingProcess::transition_to`], which refuses any edge not
//! drawn above.

use std::fmt;

use bitcoin::{BlockHash, ScriptBuf, Txid};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signing::SignedTransaction;
use crate::transaction::UnsignedTransaction;
use crate::types::{ProcessId, RuneEtchingRequest};
use crate::utxo_selection::{Selection, UtxoRecord};

/// Lifecycle states of an etching process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    Pending,
    Building,
    Signing,
    Broadcasting,
    Confirming,
    Completed,
    Failed,
}

impl ProcessState {
    /// Position along the forward chain; `Failed` sits outside it.
    pub fn rank(self) -> Option<u8> {
        match self {
            ProcessState::Pending => Some(0),
            ProcessState::Building => Some(1),
            ProcessState::Signing => Some(2),
            ProcessState::Broadcasting => Some(3),
            ProcessState::Confirming => Some(4),
            ProcessState::Completed => Some(5),
            ProcessState::Failed => None,
        }
    }

    /// Whether the edge `self -> to` exists in the state graph.
    ///
    /// `Failed -> Building` additionally requires a retryable failure, which
    /// only the process record knows.
    pub fn can_transition_to(self, to: ProcessState) -> bool {
        use ProcessState::*;

        matches!(
            (self, to),
            (Pending, Building)
                | (Building, Signing)
                | (Signing, Broadcasting)
                | (Broadcasting, Confirming)
                | (Confirming, Completed)
                | (Confirming, Broadcasting)
                | (Failed, Building)
                | (Pending, Failed)
                | (Building, Failed)
                | (Signing, Failed)
                | (Broadcasting, Failed)
                | (Confirming, Failed)
        )
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Pending => "pending",
            ProcessState::Building => "building",
            ProcessState::Signing => "signing",
            ProcessState::Broadcasting => "broadcasting",
            ProcessState::Confirming => "confirming",
            ProcessState::Completed => "completed",
            ProcessState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Illegal state changes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Illegal transition from {from} to {to}")]
    Illegal { from: ProcessState, to: ProcessState },

    #[error("Process is in terminal state {0}")]
    Terminal(ProcessState),
}

/// What went wrong, for retry dispatch and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Selection,
    Build,
    Signing,
    Broadcast,
    Timeout,
    Conflict,
    Cancelled,
}

/// The last failure of a process.
///
/// `exhausted` separates "ran out of retries" from "permanently invalid"
/// on terminal records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// State the process was in when it failed
    pub stage: ProcessState,
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
    pub terminal: bool,
    pub exhausted: bool,
    pub needs_fee_bump: bool,
    pub at: DateTime<Utc>,
}

/// Latest chain view of the broadcast transaction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub confirmations: u32,
    pub block_hash: Option<BlockHash>,
    pub last_seen_height: Option<u64>,
}

/// Durable record of one etching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtchingProcess {
    pub id: ProcessId,
    pub idempotency_key: Option<String>,
    pub request: RuneEtchingRequest,
    pub request_fingerprint: String,
    pub state: ProcessState,

    /// Coins reserved for this process, kept across retries
    pub reserved: Vec<UtxoRecord>,
    pub selection: Selection,
    pub destination_script: ScriptBuf,
    pub change_script: ScriptBuf,
    pub fee_rate: u64,

    pub unsigned: Option<UnsignedTransaction>,
    pub signed: Option<SignedTransaction>,
    /// Accepted transaction being tracked
    pub txid: Option<Txid>,
    /// Every txid handed to the chain, oldest first, accepted or not
    #[serde(default)]
    pub announced: Vec<Txid>,

    pub retry_count: u32,
    #[serde(default)]
    pub reorg_count: u32,
    pub last_error: Option<String>,
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub confirmation: ConfirmationRecord,

    pub stage_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EtchingProcess {
    /// A freshly accepted process holding `selection`.
    pub fn new(
        id: ProcessId,
        idempotency_key: Option<String>,
        request: RuneEtchingRequest,
        selection: Selection,
        destination_script: ScriptBuf,
        change_script: ScriptBuf,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            request_fingerprint: request.fingerprint(),
            request,
            state: ProcessState::Pending,
            reserved: selection.inputs.clone(),
            fee_rate: selection.fee_rate,
            selection,
            destination_script,
            change_script,
            unsigned: None,
            signed: None,
            txid: None,
            announced: Vec::new(),
            retry_count: 0,
            reorg_count: 0,
            last_error: None,
            failure: None,
            confirmation: ConfirmationRecord::default(),
            stage_started_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Completed, or failed with no way back.
    pub fn is_terminal(&self) -> bool {
        match self.state {
            ProcessState::Completed => true,
            ProcessState::Failed => self.failure.as_ref().map_or(true, |f| f.terminal),
            _ => false,
        }
    }

    /// Failed, but allowed to go back to `Building`.
    pub fn can_retry(&self) -> bool {
        self.state == ProcessState::Failed && !self.is_terminal()
    }

    pub fn time_in_stage(&self, now: DateTime<Utc>) -> Duration {
        now - self.stage_started_at
    }

    /// Move to `to`, refusing edges outside the state graph.
    ///
    /// `Failed -> Building` counts as a retry.
    pub fn transition_to(&mut self, to: ProcessState, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.state));
        }
        if !self.state.can_transition_to(to) {
            return Err(TransitionError::Illegal { from: self.state, to });
        }

        if self.state == ProcessState::Failed && to == ProcessState::Building {
            self.retry_count += 1;
        }

        self.state = to;
        self.stage_started_at = now;
        self.updated_at = now;
        Ok(())
    }

    /// Record a failure and move to `Failed`.
    ///
    /// The failure is terminal when it is not retryable or when
    /// `max_retries` retries have already been spent.
    pub fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        retryable: bool,
        needs_fee_bump: bool,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        let stage = self.state;
        self.transition_to(ProcessState::Failed, now)?;

        let message = message.into();
        let exhausted = retryable && self.retry_count >= max_retries;
        self.last_error = Some(message.clone());
        self.failure = Some(FailureRecord {
            stage,
            kind,
            message,
            retryable,
            terminal: !retryable || exhausted,
            exhausted,
            needs_fee_bump,
            at: now,
        });
        Ok(())
    }

    /// Pin a `Failed` process so it is never retried.
    pub fn pin(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.state != ProcessState::Failed {
            return Err(TransitionError::Illegal {
                from: self.state,
                to: ProcessState::Failed,
            });
        }
        if self.is_terminal() {
            return Err(TransitionError::Terminal(self.state));
        }

        let message = message.into();
        let stage = self.failure.as_ref().map_or(ProcessState::Failed, |f| f.stage);
        self.last_error = Some(message.clone());
        self.failure = Some(FailureRecord {
            stage,
            kind,
            message,
            retryable: false,
            terminal: true,
            exhausted: false,
            needs_fee_bump: false,
            at: now,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Record a broadcast and start waiting for confirmations.
    pub fn mark_broadcast(&mut self, txid: Txid, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition_to(ProcessState::Confirming, now)?;
        self.txid = Some(txid);
        Ok(())
    }

    /// Record that `txid` is about to be handed to the chain.
    ///
    /// Returns false when it was announced before.
    pub fn record_announcement(&mut self, txid: Txid, now: DateTime<Utc>) -> bool {
        if self.announced.contains(&txid) {
            return false;
        }
        self.announced.push(txid);
        self.updated_at = now;
        true
    }

    /// Whether any transaction of this process may have reached the chain.
    pub fn broadcast_attempted(&self) -> bool {
        self.txid.is_some() || !self.announced.is_empty()
    }

    /// Outpoints this process holds.
    pub fn reserved_outpoints(&self) -> Vec<bitcoin::OutPoint> {
        self.reserved.iter().map(|utxo| utxo.outpoint).collect()
    }

    /// Whether the reservation should still be held by the ledger.
    pub fn holds_reservation(&self) -> bool {
        !self.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RuneEtchingRequest;
    use bitcoin::hashes::Hash;
    use ProcessState::*;

    fn process() -> EtchingProcess {
        let selection = Selection {
            inputs: Vec::new(),
            target_value: 10_000,
            fee: 500,
            change: None,
            fee_rate: 2,
            vsize: 250,
        };
        EtchingProcess::new(
            ProcessId::from("p"),
            None,
            RuneEtchingRequest::new("Test", "TEST", 0),
            selection,
            ScriptBuf::new(),
            ScriptBuf::new(),
            Utc::now(),
        )
    }

    #[test]
    fn forward_chain_is_legal() {
        let mut p = process();
        for to in [Building, Signing, Broadcasting, Confirming, Completed] {
            p.transition_to(to, Utc::now()).unwrap();
        }
        assert!(p.is_terminal());
    }

    #[test]
    fn skipping_stages_is_refused() {
        let mut p = process();
        assert_eq!(
            p.transition_to(Signing, Utc::now()),
            Err(TransitionError::Illegal { from: Pending, to: Signing })
        );
        assert_eq!(p.state, Pending);
    }

    #[test]
    fn retryable_failure_can_rebuild() {
        let mut p = process();
        p.transition_to(Building, Utc::now()).unwrap();
        p.fail(FailureKind::Signing, "quorum offline", true, false, 3, Utc::now())
            .unwrap();

        assert!(p.can_retry());
        p.transition_to(Building, Utc::now()).unwrap();
        assert_eq!(p.retry_count, 1);
    }

    #[test]
    fn exhausted_retries_pin_the_process() {
        let mut p = process();
        p.transition_to(Building, Utc::now()).unwrap();

        for _ in 0..3 {
            p.fail(FailureKind::Signing, "quorum offline", true, false, 3, Utc::now())
                .unwrap();
            p.transition_to(Building, Utc::now()).unwrap();
        }
        p.fail(FailureKind::Signing, "quorum offline", true, false, 3, Utc::now())
            .unwrap();

        let failure = p.failure.clone().unwrap();
        assert!(failure.terminal);
        assert!(failure.exhausted);
        assert_eq!(p.retry_count, 3);
        assert_eq!(
            p.transition_to(Building, Utc::now()),
            Err(TransitionError::Terminal(Failed))
        );
    }

    #[test]
    fn permanent_failure_is_not_exhaustion() {
        let mut p = process();
        p.fail(FailureKind::Build, "bad script", false, false, 3, Utc::now())
            .unwrap();

        let failure = p.failure.unwrap();
        assert!(failure.terminal);
        assert!(!failure.exhausted);
        assert_eq!(failure.stage, Pending);
    }

    #[test]
    fn pinned_failures_cannot_retry() {
        let mut p = process();
        p.fail(FailureKind::Broadcast, "fee too low", true, true, 3, Utc::now())
            .unwrap();
        p.pin(FailureKind::Cancelled, "cancelled", Utc::now()).unwrap();

        assert!(p.is_terminal());
        assert!(!p.can_retry());
        assert_eq!(p.last_error.as_deref(), Some("cancelled"));
    }

    #[test]
    fn announcements_are_recorded_once() {
        let mut p = process();
        assert!(!p.broadcast_attempted());

        let txid = Txid::all_zeros();
        assert!(p.record_announcement(txid, Utc::now()));
        assert!(!p.record_announcement(txid, Utc::now()));
        assert_eq!(p.announced, vec![txid]);
        assert!(p.broadcast_attempted());
        assert_eq!(p.txid, None);
    }

    #[test]
    fn reorg_edge_goes_back_to_broadcasting() {
        assert!(Confirming.can_transition_to(Broadcasting));
        assert!(!Completed.can_transition_to(Broadcasting));
        assert!(!Broadcasting.can_transition_to(Signing));
    }
}
