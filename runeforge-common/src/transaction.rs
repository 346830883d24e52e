//! Etching transaction assembly
//!
//! Builds the unsigned transaction for one attempt from a [`Selection`] and
//! the encoded [`Runestone`]. The layout is fixed:
//!
//! | index | output                                        |
//! |-------|-----------------------------------------------|
//! | 0     | OP_RETURN carrying the runestone              |
//! | 1     | destination, receiving the premine and postage |
//! | 2     | change, when the selection produced any       |
//!
//! Inputs keep selection order, the version is 2, the lock time is zero and
//! every input signals replaceability. Given the same selection and runestone
//! the builder always produces the same transaction.

use bitcoin::absolute::LockTime;
use bitcoin::{ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::logging::{log_transaction, LogLevel};
use crate::runestone::{CodecError, Runestone};
use crate::types::DUST_THRESHOLD;
use crate::utxo_selection::Selection;

/// Errors raised while assembling a transaction
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("Selection has no inputs")]
    NoInputs,

    #[error("Selection funds {actual} sats but the destination needs {expected} sats")]
    TargetMismatch { expected: u64, actual: u64 },

    #[error("Output {index} of {value} sats is below the dust threshold")]
    DustOutput { index: usize, value: u64 },

    #[error("Fee mismatch: outputs leave {actual} sats, selection expected {expected} sats")]
    FeeMismatch { expected: u64, actual: u64 },

    #[error("Runestone encoding failed: {0}")]
    Codec(#[from] CodecError),
}

/// A built transaction awaiting signatures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// Outputs spent by each input, in input order
    pub prevouts: Vec<TxOut>,
    pub fee: u64,
    pub fee_rate: u64,
}

impl UnsignedTransaction {
    pub fn input_value(&self) -> u64 {
        self.prevouts.iter().map(|prevout| prevout.value).sum()
    }

    pub fn output_value(&self) -> u64 {
        self.tx.output.iter().map(|output| output.value).sum()
    }

    /// Txid of the transaction; witnesses do not change it.
    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }
}

/// Deterministic builder for etching transactions
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    destination_script: ScriptBuf,
    postage: u64,
    dust_threshold: u64,
}

impl TransactionBuilder {
    pub fn new(destination_script: ScriptBuf, postage: u64) -> Self {
        Self {
            destination_script,
            postage,
            dust_threshold: DUST_THRESHOLD,
        }
    }

    pub fn with_dust_threshold(mut self, dust_threshold: u64) -> Self {
        self.dust_threshold = dust_threshold;
        self
    }

    pub fn postage(&self) -> u64 {
        self.postage
    }

    pub fn destination_script(&self) -> &ScriptBuf {
        &self.destination_script
    }

    /// Assemble the unsigned transaction for `selection`.
    pub fn build(
        &self,
        selection: &Selection,
        runestone: &Runestone,
        change_script: &ScriptBuf,
    ) -> Result<UnsignedTransaction, BuildError> {
        if selection.inputs.is_empty() {
            return Err(BuildError::NoInputs);
        }

        if selection.target_value != self.postage {
            return Err(BuildError::TargetMismatch {
                expected: self.postage,
                actual: selection.target_value,
            });
        }

        let op_return = runestone.to_script()?;

        let mut output = vec![
            TxOut {
                value: 0,
                script_pubkey: op_return,
            },
            TxOut {
                value: self.postage,
                script_pubkey: self.destination_script.clone(),
            },
        ];

        if let Some(change) = selection.change {
            output.push(TxOut {
                value: change,
                script_pubkey: change_script.clone(),
            });
        }

        for (index, out) in output.iter().enumerate().skip(1) {
            if out.value < self.dust_threshold {
                return Err(BuildError::DustOutput {
                    index,
                    value: out.value,
                });
            }
            if !out.script_pubkey.is_v1_p2tr() {
                log_transaction(
                    LogLevel::Warn,
                    "non-taproot output",
                    Some(json!({ "index": index, "script_len": out.script_pubkey.len() })),
                );
            }
        }

        let input = selection
            .inputs
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect();

        let prevouts: Vec<TxOut> = selection
            .inputs
            .iter()
            .map(|utxo| TxOut {
                value: utxo.value,
                script_pubkey: utxo.script_pubkey.clone(),
            })
            .collect();

        let tx = Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input,
            output,
        };

        let unsigned = UnsignedTransaction {
            tx,
            prevouts,
            fee: selection.fee,
            fee_rate: selection.fee_rate,
        };

        let actual = unsigned
            .input_value()
            .checked_sub(unsigned.output_value())
            .ok_or(BuildError::FeeMismatch {
                expected: selection.fee,
                actual: 0,
            })?;
        if actual != selection.fee {
            return Err(BuildError::FeeMismatch {
                expected: selection.fee,
                actual,
            });
        }

        log_transaction(
            LogLevel::Info,
            "built etching transaction",
            Some(json!({
                "inputs": unsigned.tx.input.len(),
                "outputs": unsigned.tx.output.len(),
                "fee": unsigned.fee,
                "fee_rate": unsigned.fee_rate,
            })),
        );

        Ok(unsigned)
    }
}
