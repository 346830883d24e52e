//! Collaborator interfaces
//!
//! The pipeline never talks to a node, an indexer or a signing service
//! directly. It consumes three narrow async interfaces:
//!
//! - [`UtxoSupply`]: spendable outputs and fee estimates
//! - [`ThresholdSigner`]: one Schnorr signature per request, produced by a
//!   remote signer that never exposes key material
//! - [`ChainClient`]: broadcast and confirmation queries
//!
//! Deterministic in-process implementations live in [`crate::mock`].

use async_trait::async_trait;
use bitcoin::secp256k1::schnorr;
use bitcoin::{BlockHash, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{FeePriority, ProcessId};
use crate::utxo_selection::UtxoRecord;

/// Errors reported by collaborators
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The collaborator could not be reached or did not answer
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with a rejection; the message is passed on
    /// verbatim so that callers can classify it
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Collaborator timed out")]
    Timeout,
}

/// Source of spendable outputs
#[async_trait]
pub trait UtxoSupply: Send + Sync {
    async fn list_utxos(&self, owner: &str) -> Result<Vec<UtxoRecord>, ProviderError>;

    /// Fee rate in sat/vB for the given priority
    async fn estimate_fee_rate(&self, priority: FeePriority) -> Result<u64, ProviderError>;
}

/// Identity of one signature request.
///
/// A signer may deduplicate on it. Resending the same transaction reuses the
/// keys; any rebuild (a fee bump, a new selection) changes `unsigned_txid`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureKey {
    pub process_id: ProcessId,
    pub unsigned_txid: Txid,
    pub input_index: usize,
}

/// A request for one input's signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub process_id: ProcessId,
    /// Txid of the unsigned transaction being signed
    pub unsigned_txid: Txid,
    pub input_index: usize,
    /// BIP-341 key-spend sighash to sign
    pub sighash: [u8; 32],
    /// Script of the output being spent
    pub prevout_script: ScriptBuf,
}

impl SignatureRequest {
    pub fn key(&self) -> SignatureKey {
        SignatureKey {
            process_id: self.process_id.clone(),
            unsigned_txid: self.unsigned_txid,
            input_index: self.input_index,
        }
    }
}

/// Remote threshold signer
#[async_trait]
pub trait ThresholdSigner: Send + Sync {
    async fn request_signature(
        &self,
        request: SignatureRequest,
    ) -> Result<schnorr::Signature, ProviderError>;
}

/// Confirmation status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatus {
    /// None when the chain does not know the transaction at all
    pub confirmations: Option<u32>,
    /// Block containing the transaction, when confirmed
    pub block_hash: Option<BlockHash>,
}

/// Access to the Bitcoin network
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Submit a consensus-encoded transaction
    async fn broadcast_tx(&self, tx_bytes: &[u8]) -> Result<Txid, ProviderError>;

    /// Confirmations of `txid`: `Some(0)` in the mempool, `None` if unknown
    async fn get_confirmations(&self, txid: &Txid) -> Result<Option<u32>, ProviderError>;

    async fn get_block_height(&self) -> Result<u64, ProviderError>;

    /// Confirmations together with the confirming block
    async fn get_tx_status(&self, txid: &Txid) -> Result<TxStatus, ProviderError> {
        Ok(TxStatus {
            confirmations: self.get_confirmations(txid).await?,
            block_hash: None,
        })
    }
}
