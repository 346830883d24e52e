//! Confirmation tracking
//!
//! The tracker turns chain observations into state changes for processes in
//! `Confirming`. [`ConfirmationTracker::observe`] is a pure function of the
//! process and one observation, so every confirmation, reorg and drop case
//! can be exercised without a chain. [`ConfirmationTracker::poll`] gathers
//! the observation from a [`ChainClient`] and applies it.

use bitcoin::{BlockHash, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::logging::{log_tracker, sanitize_for_logging, LogLevel};
use crate::process::{EtchingProcess, ProcessState, TransitionError};
use crate::provider::{ChainClient, ProviderError};

/// Default confirmation depth for a finished etching
pub const DEFAULT_REQUIRED_CONFIRMATIONS: u32 = 6;

/// What the chain reports about a transaction at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainObservation {
    /// `Some(0)` in the mempool, `None` when unknown to the chain
    pub confirmations: Option<u32>,
    pub block_hash: Option<BlockHash>,
    pub tip_height: u64,
}

/// Result of applying an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Still waiting for depth
    Waiting,
    Completed,
    /// The confirming block left the best chain
    Reorged,
    /// The transaction vanished before it ever confirmed
    Dropped,
}

/// Errors raised while polling
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Process has no broadcast transaction")]
    NotBroadcast,

    #[error("Chain query failed: {0}")]
    Chain(#[from] ProviderError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Drives `Confirming` processes to `Completed`, or back to `Broadcasting`.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationTracker {
    required_confirmations: u32,
}

impl Default for ConfirmationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_CONFIRMATIONS)
    }
}

impl ConfirmationTracker {
    pub fn new(required_confirmations: u32) -> Self {
        Self {
            required_confirmations: required_confirmations.max(1),
        }
    }

    pub fn required_confirmations(&self) -> u32 {
        self.required_confirmations
    }

    /// Apply `observation` to `process`, returning the updated record.
    ///
    /// Processes outside `Confirming` are returned unchanged.
    pub fn observe(
        &self,
        process: &EtchingProcess,
        observation: &ChainObservation,
        now: DateTime<Utc>,
    ) -> Result<(EtchingProcess, TrackerOutcome), TransitionError> {
        let mut next = process.clone();
        if process.state != ProcessState::Confirming {
            return Ok((next, TrackerOutcome::Waiting));
        }

        let seen = process.confirmation.confirmations;
        let outcome = match (observation.confirmations, observation.block_hash) {
            (Some(confirmations), hash) if confirmations > 0 => {
                let moved = matches!(
                    (process.confirmation.block_hash, hash),
                    (Some(previous), Some(current)) if previous != current
                );

                if moved {
                    TrackerOutcome::Reorged
                } else {
                    next.confirmation.confirmations = confirmations;
                    next.confirmation.block_hash = hash.or(process.confirmation.block_hash);
                    next.confirmation.last_seen_height = Some(observation.tip_height);
                    next.updated_at = now;

                    if confirmations >= self.required_confirmations {
                        TrackerOutcome::Completed
                    } else {
                        TrackerOutcome::Waiting
                    }
                }
            }
            (Some(_), _) if seen > 0 => TrackerOutcome::Reorged,
            (Some(_), _) => {
                next.confirmation.last_seen_height = Some(observation.tip_height);
                TrackerOutcome::Waiting
            }
            (None, _) if seen > 0 => TrackerOutcome::Reorged,
            (None, _) => TrackerOutcome::Dropped,
        };

        match outcome {
            TrackerOutcome::Completed => next.transition_to(ProcessState::Completed, now)?,
            TrackerOutcome::Reorged | TrackerOutcome::Dropped => {
                next.transition_to(ProcessState::Broadcasting, now)?;
                next.confirmation = Default::default();
                if outcome == TrackerOutcome::Reorged {
                    next.reorg_count += 1;
                }
            }
            TrackerOutcome::Waiting => {}
        }

        Ok((next, outcome))
    }

    /// Query the chain for `process`'s transaction and apply the answer.
    pub async fn poll(
        &self,
        chain: &dyn ChainClient,
        process: &EtchingProcess,
        now: DateTime<Utc>,
    ) -> Result<(EtchingProcess, TrackerOutcome), TrackerError> {
        let txid = process.txid.ok_or(TrackerError::NotBroadcast)?;

        let status = chain.get_tx_status(&txid).await?;
        let tip_height = chain.get_block_height().await?;

        let observation = ChainObservation {
            confirmations: status.confirmations,
            block_hash: status.block_hash,
            tip_height,
        };

        let (next, outcome) = self.observe(process, &observation, now)?;
        log_outcome(&txid, &observation, outcome);
        Ok((next, outcome))
    }
}

fn log_outcome(txid: &Txid, observation: &ChainObservation, outcome: TrackerOutcome) {
    let params = json!({
        "txid": sanitize_for_logging(&txid.to_string()),
        "confirmations": observation.confirmations,
        "tip_height": observation.tip_height,
    });

    match outcome {
        TrackerOutcome::Waiting => log_tracker(LogLevel::Debug, "waiting for confirmations", Some(params)),
        TrackerOutcome::Completed => log_tracker(LogLevel::Info, "etching confirmed", Some(params)),
        TrackerOutcome::Reorged => log_tracker(LogLevel::Warn, "reorg detected", Some(params)),
        TrackerOutcome::Dropped => log_tracker(LogLevel::Warn, "transaction dropped", Some(params)),
    }
}
