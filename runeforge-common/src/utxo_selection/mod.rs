//! UTXO selection module
//!
//! Funding an etching happens in two steps that must look atomic to every
//! other process: choose inputs for the transaction shape at the current fee
//! rate, then mark them as owned by the process until it reaches a terminal
//! state.
//!
//! # Module Structure
//!
//! - `types.rs` - UTXO records, transaction shape, selection results and errors
//! - `selector.rs` - Deterministic largest-first selection with fee recomputation
//! - `reservation.rs` - Ledger of outpoints owned by in-flight processes
//!
//! # Security Considerations
//!
//! - The selector never sees signing material
//! - A UTXO reserved by one process is invisible to selection for every other
//!   process, which prevents two etchings from spending the same coins

pub mod reservation;
pub mod selector;
pub mod types;

pub use reservation::ReservationLedger;
pub use selector::UtxoSelector;
pub use types::{OutputShape, Selection, SelectionError, UtxoRecord};
