//! Broadcasting signed etchings
//!
//! Submits a signed transaction through the [`ChainClient`] and classifies
//! the node's answer. A node that already knows the transaction counts as a
//! success, so announcing the same transaction twice (after a reorg, or after
//! a lost response) is harmless.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::Txid;
use serde_json::json;
use thiserror::Error;

use crate::logging::{log_broadcast, sanitize_for_logging, LogLevel};
use crate::provider::{ChainClient, ProviderError};
use crate::signing::SignedTransaction;

/// Errors raised while broadcasting
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BroadcastError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Broadcast timed out")]
    Timeout,

    #[error("Fee too low: {0}")]
    FeeTooLow(String),

    #[error("Mempool full: {0}")]
    MempoolFull(String),

    #[error("Malformed transaction: {0}")]
    Malformed(String),

    #[error("Inputs already spent: {0}")]
    Conflict(String),

    #[error("Rejected: {0}")]
    Rejected(String),
}

impl BroadcastError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BroadcastError::Network(_)
                | BroadcastError::Timeout
                | BroadcastError::FeeTooLow(_)
                | BroadcastError::MempoolFull(_)
        )
    }

    /// The next attempt should pay a higher fee rate
    pub fn needs_fee_bump(&self) -> bool {
        matches!(self, BroadcastError::FeeTooLow(_) | BroadcastError::MempoolFull(_))
    }
}

/// Outcome of classifying a node rejection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// The node already has the transaction
    AlreadyKnown,
    Error(BroadcastError),
}

/// Map a node reject message to its meaning.
pub fn classify_rejection(message: &str) -> Rejection {
    let lower = message.to_lowercase();

    if lower.contains("already in block chain")
        || lower.contains("already-in-mempool")
        || lower.contains("already known")
        || lower.contains("txn-already-known")
    {
        return Rejection::AlreadyKnown;
    }

    let error = if lower.contains("min relay fee")
        || lower.contains("mempool min fee")
        || lower.contains("insufficient fee")
        || lower.contains("fee too low")
    {
        BroadcastError::FeeTooLow(message.to_string())
    } else if lower.contains("mempool full") {
        BroadcastError::MempoolFull(message.to_string())
    } else if lower.contains("missingorspent")
        || lower.contains("mempool-conflict")
        || lower.contains("missing inputs")
        || lower.contains("inputs-spent")
    {
        BroadcastError::Conflict(message.to_string())
    } else if lower.contains("decode failed")
        || lower.contains("bad-txns")
        || lower.contains("scriptpubkey")
        || lower.contains("non-mandatory-script-verify-flag")
        || lower.contains("mandatory-script-verify-flag")
    {
        BroadcastError::Malformed(message.to_string())
    } else {
        BroadcastError::Rejected(message.to_string())
    };

    Rejection::Error(error)
}

/// Submits signed transactions to the chain client.
pub struct Broadcaster {
    chain: Arc<dyn ChainClient>,
    timeout: Duration,
}

impl Broadcaster {
    pub fn new(chain: Arc<dyn ChainClient>, timeout: Duration) -> Self {
        Self { chain, timeout }
    }

    /// Announce `signed`, returning its txid on acceptance.
    pub async fn broadcast(&self, signed: &SignedTransaction) -> Result<Txid, BroadcastError> {
        let bytes = signed.serialize();
        let txid_label = sanitize_for_logging(&signed.txid.to_string());

        let response = match tokio::time::timeout(self.timeout, self.chain.broadcast_tx(&bytes)).await {
            Ok(response) => response,
            Err(_) => {
                log_broadcast(LogLevel::Warn, "broadcast timed out", Some(json!({ "txid": txid_label })));
                return Err(BroadcastError::Timeout);
            }
        };

        let error = match response {
            Ok(txid) => {
                if txid != signed.txid {
                    log_broadcast(
                        LogLevel::Warn,
                        "chain reported a different txid",
                        Some(json!({ "txid": txid_label, "reported": txid.to_string() })),
                    );
                }
                log_broadcast(LogLevel::Info, "transaction accepted", Some(json!({ "txid": txid_label })));
                return Ok(signed.txid);
            }
            Err(ProviderError::Timeout) => BroadcastError::Timeout,
            Err(ProviderError::Unavailable(message)) => BroadcastError::Network(message),
            Err(ProviderError::Rejected(message)) => match classify_rejection(&message) {
                Rejection::AlreadyKnown => {
                    log_broadcast(
                        LogLevel::Info,
                        "transaction already known",
                        Some(json!({ "txid": txid_label })),
                    );
                    return Ok(signed.txid);
                }
                Rejection::Error(error) => error,
            },
        };

        log_broadcast(
            if error.is_retryable() { LogLevel::Warn } else { LogLevel::Error },
            "broadcast failed",
            Some(json!({ "txid": txid_label, "error": error.to_string() })),
        );
        Err(error)
    }
}
