//! Threshold signature coordination
//!
//! Keys never exist locally. For each input the coordinator computes the
//! BIP-341 key-spend sighash, asks the remote signer for a Schnorr signature
//! and checks the answer against the output key of the coin being spent
//! before it is placed in the witness.
//!
//! Requests for all inputs are issued together; the first failure fails the
//! whole step and the engine decides whether to retry.

use std::sync::Arc;
use std::time::Duration;

use bitcoin::consensus::encode;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{schnorr, Message, Secp256k1, VerifyOnly, XOnlyPublicKey};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::{taproot, Transaction, Txid, Witness};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::logging::{log_signing, LogLevel};
use crate::provider::{ProviderError, SignatureRequest, ThresholdSigner};
use crate::transaction::UnsignedTransaction;
use crate::types::ProcessId;

/// Errors raised while collecting signatures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Signer failed for input {input}: {message}")]
    Collaborator { input: usize, message: String },

    #[error("Signer timed out for input {input}")]
    Timeout { input: usize },

    #[error("Sighash computation failed: {0}")]
    Sighash(String),

    #[error("Signature for input {input} does not verify")]
    InvalidSignature { input: usize },

    #[error("Input {0} is not a taproot key-path spend")]
    UnsupportedScript(usize),
}

impl SigningError {
    /// Every failure except an unsignable input may succeed on a new attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SigningError::UnsupportedScript(_))
    }
}

/// A fully witnessed transaction, ready to broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub fee: u64,
    pub fee_rate: u64,
    pub txid: Txid,
}

impl SignedTransaction {
    /// Consensus encoding, as handed to the chain client
    pub fn serialize(&self) -> Vec<u8> {
        encode::serialize(&self.tx)
    }

    pub fn vsize(&self) -> usize {
        self.tx.vsize()
    }
}

/// Fans signature requests out to the threshold signer.
pub struct SignatureCoordinator {
    signer: Arc<dyn ThresholdSigner>,
    timeout: Duration,
    secp: Secp256k1<VerifyOnly>,
}

impl SignatureCoordinator {
    pub fn new(signer: Arc<dyn ThresholdSigner>, timeout: Duration) -> Self {
        Self {
            signer,
            timeout,
            secp: Secp256k1::verification_only(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Collect and verify one signature per input of `unsigned`.
    pub async fn sign(
        &self,
        process_id: &ProcessId,
        unsigned: &UnsignedTransaction,
    ) -> Result<SignedTransaction, SigningError> {
        let keys = unsigned
            .prevouts
            .iter()
            .enumerate()
            .map(|(index, prevout)| output_key(index, prevout))
            .collect::<Result<Vec<_>, _>>()?;

        let sighashes = sighashes(unsigned)?;

        log_signing(
            LogLevel::Info,
            "requesting signatures",
            Some(json!({
                "process_id": process_id.to_string(),
                "inputs": sighashes.len(),
            })),
        );

        let unsigned_txid = unsigned.txid();
        let requests = sighashes.iter().enumerate().map(|(index, sighash)| {
            let request = SignatureRequest {
                process_id: process_id.clone(),
                unsigned_txid,
                input_index: index,
                sighash: *sighash,
                prevout_script: unsigned.prevouts[index].script_pubkey.clone(),
            };
            self.request(request)
        });

        let signatures = try_join_all(requests).await?;

        let mut tx = unsigned.tx.clone();
        for (index, signature) in signatures.into_iter().enumerate() {
            let message = Message::from_slice(&sighashes[index])
                .map_err(|e| SigningError::Sighash(e.to_string()))?;

            if self
                .secp
                .verify_schnorr(&signature, &message, &keys[index])
                .is_err()
            {
                log_signing(
                    LogLevel::Error,
                    "signature failed verification",
                    Some(json!({ "process_id": process_id.to_string(), "input": index })),
                );
                return Err(SigningError::InvalidSignature { input: index });
            }

            let signature = taproot::Signature {
                sig: signature,
                hash_ty: TapSighashType::Default,
            };
            let mut witness = Witness::new();
            witness.push(signature.to_vec());
            tx.input[index].witness = witness;
        }

        let txid = tx.txid();
        log_signing(
            LogLevel::Info,
            "transaction signed",
            Some(json!({ "process_id": process_id.to_string(), "txid": txid.to_string() })),
        );

        Ok(SignedTransaction {
            tx,
            fee: unsigned.fee,
            fee_rate: unsigned.fee_rate,
            txid,
        })
    }

    async fn request(&self, request: SignatureRequest) -> Result<schnorr::Signature, SigningError> {
        let input = request.input_index;

        match tokio::time::timeout(self.timeout, self.signer.request_signature(request)).await {
            Ok(Ok(signature)) => Ok(signature),
            Ok(Err(ProviderError::Timeout)) | Err(_) => {
                log_signing(LogLevel::Warn, "signer timed out", Some(json!({ "input": input })));
                Err(SigningError::Timeout { input })
            }
            Ok(Err(e)) => {
                log_signing(
                    LogLevel::Warn,
                    "signer failed",
                    Some(json!({ "input": input, "error": e.to_string() })),
                );
                Err(SigningError::Collaborator {
                    input,
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Key-spend sighash of every input.
pub fn sighashes(unsigned: &UnsignedTransaction) -> Result<Vec<[u8; 32]>, SigningError> {
    let prevouts = Prevouts::All(&unsigned.prevouts);
    let mut cache = SighashCache::new(&unsigned.tx);

    (0..unsigned.tx.input.len())
        .map(|index| {
            cache
                .taproot_key_spend_signature_hash(index, &prevouts, TapSighashType::Default)
                .map(|sighash| sighash.to_byte_array())
                .map_err(|e| SigningError::Sighash(e.to_string()))
        })
        .collect()
}

/// Output key of a P2TR script.
fn output_key(index: usize, prevout: &bitcoin::TxOut) -> Result<XOnlyPublicKey, SigningError> {
    let script = &prevout.script_pubkey;
    if !script.is_v1_p2tr() {
        return Err(SigningError::UnsupportedScript(index));
    }

    XOnlyPublicKey::from_slice(&script.as_bytes()[2..34])
        .map_err(|_| SigningError::UnsupportedScript(index))
}
