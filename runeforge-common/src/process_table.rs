//! Keyed table of live etching processes
//!
//! The table is the single in-memory view of every process the engine knows
//! about. It owns the [`ReservationLedger`], so "no outpoint is reserved by
//! two processes" is a property of the table that can be checked on its own,
//! and it tracks which processes are currently being advanced so that a
//! process is never stepped by two callers at once.

use std::collections::{HashMap, HashSet};

use parking_lot::{Mutex, RwLock};

use crate::process::EtchingProcess;
use crate::types::ProcessId;
use crate::utxo_selection::ReservationLedger;

/// In-memory process table with its reservation ledger
#[derive(Debug, Default)]
pub struct ProcessTable {
    processes: RwLock<HashMap<ProcessId, EtchingProcess>>,
    in_flight: Mutex<HashSet<ProcessId>>,
    ledger: ReservationLedger,
}

/// Exclusive right to advance one process; released on drop.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    table: &'a ProcessTable,
    id: ProcessId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.table.in_flight.lock().remove(&self.id);
    }
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    pub fn get(&self, id: &ProcessId) -> Option<EtchingProcess> {
        self.processes.read().get(id).cloned()
    }

    pub fn contains(&self, id: &ProcessId) -> bool {
        self.processes.read().contains_key(id)
    }

    /// Insert or replace the record for `process.id`.
    pub fn upsert(&self, process: EtchingProcess) {
        self.processes.write().insert(process.id.clone(), process);
    }

    /// All processes, oldest first.
    pub fn list(&self) -> Vec<EtchingProcess> {
        let mut all: Vec<EtchingProcess> = self.processes.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Ids of processes that have not reached a terminal state.
    pub fn active_ids(&self) -> Vec<ProcessId> {
        self.list()
            .into_iter()
            .filter(|process| !process.is_terminal())
            .map(|process| process.id)
            .collect()
    }

    /// Claim `id` for advancing, or None if another caller holds it.
    pub fn try_begin(&self, id: &ProcessId) -> Option<InFlightGuard<'_>> {
        let mut in_flight = self.in_flight.lock();
        if !in_flight.insert(id.clone()) {
            return None;
        }
        Some(InFlightGuard {
            table: self,
            id: id.clone(),
        })
    }

    pub fn is_in_flight(&self, id: &ProcessId) -> bool {
        self.in_flight.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.processes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
