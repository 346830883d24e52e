//! Core types for UTXO selection
//!
//! # Key Types
//!
//! - [`UtxoRecord`]: a spendable output offered by the UTXO supply
//! - [`OutputShape`]: the outputs the etching transaction will carry, used to
//!   size the transaction while inputs are being added
//! - [`Selection`]: the chosen inputs with their fee and change
//! - [`SelectionError`]: why a selection could not be made

use bitcoin::{OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

use crate::types::ProcessId;

/// Unspent transaction output offered for funding an etching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// Reference to the transaction output (txid and vout)
    pub outpoint: OutPoint,

    /// Value in satoshis
    pub value: u64,

    /// Number of confirmations (0 for unconfirmed)
    pub confirmations: u32,

    /// Block height the output confirmed at, None while unconfirmed
    pub height: Option<u64>,

    /// Script locking the output; P2TR for outputs the signer controls
    pub script_pubkey: ScriptBuf,

    /// Optional address associated with this UTXO
    #[serde(default)]
    pub address: Option<String>,
}

impl UtxoRecord {
    pub fn new(outpoint: OutPoint, value: u64, script_pubkey: ScriptBuf) -> Self {
        Self {
            outpoint,
            value,
            confirmations: 0,
            height: None,
            script_pubkey,
            address: None,
        }
    }

    pub fn confirmed_at(mut self, height: u64, confirmations: u32) -> Self {
        self.height = Some(height);
        self.confirmations = confirmations;
        self
    }

    /// Selection order: larger value first, then older, then by outpoint.
    pub fn selection_order(&self, other: &Self) -> Ordering {
        other
            .value
            .cmp(&self.value)
            .then_with(|| {
                self.height
                    .unwrap_or(u64::MAX)
                    .cmp(&other.height.unwrap_or(u64::MAX))
            })
            .then_with(|| self.outpoint.vout.cmp(&other.outpoint.vout))
            .then_with(|| self.outpoint.txid.cmp(&other.outpoint.txid))
    }
}

/// Script lengths of the outputs the transaction will carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputShape {
    /// OP_RETURN script and value outputs, in order
    pub fixed_script_lens: Vec<usize>,
    /// Script length of a change output, should one be added
    pub change_script_len: usize,
}

impl OutputShape {
    pub fn new(fixed_script_lens: Vec<usize>, change_script_len: usize) -> Self {
        Self {
            fixed_script_lens,
            change_script_len,
        }
    }

    pub fn with_change(&self) -> Vec<usize> {
        let mut lens = self.fixed_script_lens.clone();
        lens.push(self.change_script_len);
        lens
    }
}

/// Result of a successful selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Chosen inputs in spending order
    pub inputs: Vec<UtxoRecord>,
    /// Sum of the value outputs being funded
    pub target_value: u64,
    /// Fee paid; includes any leftover too small for change
    pub fee: u64,
    /// Change value, if a change output is created
    pub change: Option<u64>,
    /// Fee rate used, in sat/vB
    pub fee_rate: u64,
    /// Estimated virtual size of the signed transaction
    pub vsize: usize,
}

impl Selection {
    pub fn total_input(&self) -> u64 {
        self.inputs.iter().map(|utxo| utxo.value).sum()
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(|utxo| utxo.outpoint).collect()
    }
}

/// Errors that can occur during selection and reservation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("Insufficient funds: {available} sats available, {required} sats required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Process {0} already holds a reservation")]
    AlreadyReserved(ProcessId),

    #[error("Outpoint {outpoint} is reserved by process {owner}")]
    ReservationConflict { outpoint: OutPoint, owner: ProcessId },
}
