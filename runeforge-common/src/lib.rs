//! Runeforge Common Library
//!
//! This crate implements the pipeline that etches Bitcoin Runes: it encodes
//! the runestone, funds and builds the etching transaction, gathers
//! signatures from a remote threshold signer, broadcasts the result and
//! follows it to the required confirmation depth, surviving restarts, retries
//! and reorgs along the way.
//!
//! # Modules
//!
//! - `runestone`: Runestone wire format (LEB128 fields, OP_13 magic, 80-byte ceiling)
//! - `validation`: Etching parameter rules
//! - `utxo_selection`: Largest-first selection and the reservation ledger
//! - `transaction`: Deterministic unsigned transaction assembly
//! - `signing`: Threshold signature coordination
//! - `broadcast`: Broadcast and node response classification
//! - `process`: Process records and the state machine
//! - `tracker`: Confirmation tracking and reorg detection
//! - `engine`: Orchestration, retries, cancellation, timeouts, idempotency
//! - `process_table`: Keyed process table with in-flight guards
//! - `storage`: Durable process stores
//! - `provider`: Collaborator interfaces
//! - `mock`: Deterministic collaborators for tests and development
//! - `types`, `math`, `fee_estimation`, `events`, `config`, `error`, `logging`
//!
//! # Security Considerations
//!
//! - No private key material ever exists in this crate; every signature comes
//!   from the threshold signer and is verified before use
//! - Decoding runestones never trusts lengths found in chain data
//! - Logs carry truncated identifiers only

/// Core domain types for etching
pub mod types;

/// Transaction weight and fee arithmetic
pub mod math;

/// Secure logging functionality
pub mod logging;

/// Configuration management
pub mod config;

/// Etching event bus
pub mod events;

/// Fee estimation utilities
pub mod fee_estimation;

/// Standardized error handling
pub mod error;

pub mod runestone;
pub mod validation;
pub mod utxo_selection;
pub mod transaction;
pub mod signing;
pub mod broadcast;
pub mod process;
pub mod tracker;
pub mod process_table;
pub mod storage;
pub mod provider;
pub mod engine;

/// Deterministic collaborators
pub mod mock;

pub use bitcoin::{Network, OutPoint, ScriptBuf, Transaction, Txid};

/// Re-export common types for convenience
pub use types::{
    FeePriority, MintTerms, ProcessId, RuneEtchingRequest, DEFAULT_POSTAGE, DUST_THRESHOLD,
};

pub use runestone::{CodecError, Edict, Etching, Rune, RuneId, Runestone, SpacedRune, Terms};

pub use validation::{validate, EtchingValidator, ValidationError};

pub use utxo_selection::{
    OutputShape, ReservationLedger, Selection, SelectionError, UtxoRecord, UtxoSelector,
};

pub use transaction::{BuildError, TransactionBuilder, UnsignedTransaction};

pub use signing::{SignatureCoordinator, SignedTransaction, SigningError};

pub use broadcast::{classify_rejection, BroadcastError, Broadcaster, Rejection};

pub use process::{EtchingProcess, FailureKind, FailureRecord, ProcessState, TransitionError};

pub use tracker::{ChainObservation, ConfirmationTracker, TrackerOutcome};

pub use engine::{EngineError, EngineSettings, EtchingEngine};

pub use storage::{JsonFileProcessStore, MemoryProcessStore, ProcessStore, StorageError};

pub use provider::{ChainClient, ProviderError, SignatureKey, SignatureRequest, ThresholdSigner, UtxoSupply};

pub use events::{EtchingEvent, EtchingEventBus};

pub use error::{ErrorCategory, RuneforgeError, RuneforgeResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

use std::sync::Once;

static INIT: Once = Once::new();

/// Library initialization
///
/// Initializes logging with the default configuration. Safe to call more
/// than once; only the first call has an effect.
pub fn init() -> Result<(), String> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = logging::init(&logging::LogConfig::default())
            .map_err(|e| format!("Failed to initialize logging: {}", e));
    });
    result
}
