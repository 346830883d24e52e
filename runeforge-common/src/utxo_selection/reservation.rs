//! Reservation ledger
//!
//! Records which in-flight process owns each outpoint. Selection and marking
//! happen under a single lock in [`ReservationLedger::reserve_with`], so two
//! processes racing for the same UTXOs can never both win.

use bitcoin::OutPoint;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::logging::{log_selection, log_sensitive_param, LogLevel};
use crate::types::ProcessId;
use crate::utxo_selection::types::{Selection, SelectionError, UtxoRecord};

#[derive(Debug, Default)]
struct LedgerState {
    owners: HashMap<OutPoint, ProcessId>,
    by_process: HashMap<ProcessId, Vec<OutPoint>>,
}

/// Outpoint ownership for in-flight processes
#[derive(Debug, Default)]
pub struct ReservationLedger {
    state: Mutex<LedgerState>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `select` over the UTXOs nobody has reserved and reserve its result
    /// for `process_id`, atomically.
    pub fn reserve_with<F>(
        &self,
        process_id: &ProcessId,
        available: &[UtxoRecord],
        select: F,
    ) -> Result<Selection, SelectionError>
    where
        F: FnOnce(&[UtxoRecord]) -> Result<Selection, SelectionError>,
    {
        let mut state = self.state.lock();

        if state.by_process.contains_key(process_id) {
            return Err(SelectionError::AlreadyReserved(process_id.clone()));
        }

        let unreserved: Vec<UtxoRecord> = available
            .iter()
            .filter(|utxo| !state.owners.contains_key(&utxo.outpoint))
            .cloned()
            .collect();

        let selection = select(&unreserved)?;
        let outpoints = selection.outpoints();

        for outpoint in &outpoints {
            state.owners.insert(*outpoint, process_id.clone());
        }
        state.by_process.insert(process_id.clone(), outpoints);

        log_selection(
            LogLevel::Info,
            "reserved inputs",
            Some(log_sensitive_param("process_id", process_id)),
        );

        Ok(selection)
    }

    /// Re-establish a reservation recorded before a restart.
    pub fn restore(&self, process_id: &ProcessId, outpoints: &[OutPoint]) -> Result<(), SelectionError> {
        let mut state = self.state.lock();

        for outpoint in outpoints {
            if let Some(owner) = state.owners.get(outpoint) {
                if owner != process_id {
                    return Err(SelectionError::ReservationConflict {
                        outpoint: *outpoint,
                        owner: owner.clone(),
                    });
                }
            }
        }

        for outpoint in outpoints {
            state.owners.insert(*outpoint, process_id.clone());
        }
        state
            .by_process
            .insert(process_id.clone(), outpoints.to_vec());
        Ok(())
    }

    /// Free every outpoint held by `process_id`.
    pub fn release(&self, process_id: &ProcessId) -> Vec<OutPoint> {
        let mut state = self.state.lock();
        let released = state.by_process.remove(process_id).unwrap_or_default();
        for outpoint in &released {
            state.owners.remove(outpoint);
        }

        if !released.is_empty() {
            log_selection(
                LogLevel::Info,
                "released inputs",
                Some(log_sensitive_param("process_id", process_id)),
            );
        }
        released
    }

    pub fn reserved_by(&self, process_id: &ProcessId) -> Vec<OutPoint> {
        self.state
            .lock()
            .by_process
            .get(process_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn owner(&self, outpoint: &OutPoint) -> Option<ProcessId> {
        self.state.lock().owners.get(outpoint).cloned()
    }

    /// Number of reserved outpoints
    pub fn len(&self) -> usize {
        self.state.lock().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
