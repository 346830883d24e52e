//! Largest-first UTXO selector
//!
//! Inputs are added in a fixed order (value descending, then height, vout and
//! txid ascending) and the fee is recomputed from the estimated virtual size
//! of the complete transaction after every addition. The same inputs and
//! parameters therefore always produce the same selection.
//!
//! # Change Policy
//!
//! A change output is added only when the value left over after paying for
//! it exceeds the dust threshold. Smaller leftovers are paid to miners.
//!
//! # Usage
//!
//! ```
//! use runeforge_common::utxo_selection::{OutputShape, UtxoRecord, UtxoSelector};
//! use bitcoin::{OutPoint, ScriptBuf};
//!
//! let shape = OutputShape::new(vec![20, 34], 34);
//! let selector = UtxoSelector::new(shape);
//!
//! let utxos = vec![UtxoRecord::new(OutPoint::null(), 100_000, ScriptBuf::new())];
//! let selection = selector.select(&utxos, 10_000, 2).unwrap();
//! assert_eq!(selection.inputs.len(), 1);
//! assert!(selection.change.is_some());
//! ```

use crate::logging::{log_selection, LogLevel};
use crate::math::{calculate_fee, estimate_vsize};
use crate::types::DUST_THRESHOLD;
use crate::utxo_selection::types::{OutputShape, Selection, SelectionError, UtxoRecord};
use serde_json::json;

/// Deterministic largest-first selector for one transaction shape
#[derive(Debug, Clone)]
pub struct UtxoSelector {
    shape: OutputShape,
    dust_threshold: u64,
    min_confirmations: u32,
}

impl UtxoSelector {
    /// Create a selector for `shape` with the standard dust threshold and no
    /// confirmation requirement.
    pub fn new(shape: OutputShape) -> Self {
        Self {
            shape,
            dust_threshold: DUST_THRESHOLD,
            min_confirmations: 0,
        }
    }

    pub fn with_dust_threshold(mut self, dust_threshold: u64) -> Self {
        self.dust_threshold = dust_threshold;
        self
    }

    /// Exclude UTXOs with fewer confirmations
    pub fn with_min_confirmations(mut self, min_confirmations: u32) -> Self {
        self.min_confirmations = min_confirmations;
        self
    }

    pub fn shape(&self) -> &OutputShape {
        &self.shape
    }

    pub fn dust_threshold(&self) -> u64 {
        self.dust_threshold
    }

    /// UTXOs this selector would consider, in selection order.
    pub fn eligible(&self, available: &[UtxoRecord]) -> Vec<UtxoRecord> {
        let mut candidates: Vec<UtxoRecord> = available
            .iter()
            .filter(|utxo| utxo.value > 0 && utxo.confirmations >= self.min_confirmations)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.selection_order(b));
        candidates
    }

    /// Select inputs funding `target_value` at `fee_rate` sat/vB.
    pub fn select(
        &self,
        available: &[UtxoRecord],
        target_value: u64,
        fee_rate: u64,
    ) -> Result<Selection, SelectionError> {
        let candidates = self.eligible(available);
        let with_change = self.shape.with_change();

        let mut inputs = Vec::new();
        let mut total: u64 = 0;

        for utxo in candidates {
            total = total.saturating_add(utxo.value);
            inputs.push(utxo);

            let vsize = estimate_vsize(inputs.len(), &self.shape.fixed_script_lens);
            let fee = calculate_fee(vsize, fee_rate);
            let required = target_value.saturating_add(fee);

            if total < required {
                continue;
            }

            let change_vsize = estimate_vsize(inputs.len(), &with_change);
            let change_fee = calculate_fee(change_vsize, fee_rate);
            let change = total
                .checked_sub(target_value.saturating_add(change_fee))
                .filter(|change| *change > self.dust_threshold);

            let selection = match change {
                Some(change) => Selection {
                    inputs,
                    target_value,
                    fee: change_fee,
                    change: Some(change),
                    fee_rate,
                    vsize: change_vsize,
                },
                None => Selection {
                    inputs,
                    target_value,
                    fee: total - target_value,
                    change: None,
                    fee_rate,
                    vsize,
                },
            };

            log_selection(
                LogLevel::Debug,
                "selected inputs",
                Some(json!({
                    "inputs": selection.inputs.len(),
                    "fee": selection.fee,
                    "change": selection.change,
                    "fee_rate": fee_rate,
                })),
            );

            return Ok(selection);
        }

        let vsize = estimate_vsize(inputs.len().max(1), &self.shape.fixed_script_lens);
        let required = target_value.saturating_add(calculate_fee(vsize, fee_rate));

        log_selection(
            LogLevel::Warn,
            "insufficient funds",
            Some(json!({ "available": total, "required": required })),
        );

        Err(SelectionError::InsufficientFunds {
            available: total,
            required,
        })
    }
}
