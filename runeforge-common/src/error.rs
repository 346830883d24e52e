//! Standardized error handling for Runeforge
//!
//! Every component reports failures through its own closed error enum
//! ([`CodecError`], [`ValidationError`], [`SelectionError`], [`BuildError`],
//! [`SigningError`], [`BroadcastError`], [`StorageError`], [`TransitionError`],
//! [`EngineError`]). [`RuneforgeError`] wraps them all for callers that want
//! a single type, and adds a category, a user-facing message and a retry
//! classification.
//!
//! # Security Considerations
//!
//! - User messages never include signatures, sighashes or collaborator payloads
//! - Signing failures are reported without the signer's raw response
//!
//! # Usage
//!
//! ```
//! use runeforge_common::error::{RuneforgeError, RuneforgeResult};
//! use runeforge_common::validation::validate;
//! use runeforge_common::types::RuneEtchingRequest;
//!
//! fn check(request: &RuneEtchingRequest) -> RuneforgeResult<()> {
//!     validate(request)?;
//!     Ok(())
//! }
//!
//! let err = check(&RuneEtchingRequest::new("Too long", "TOOLONGSYMBOL", 0)).unwrap_err();
//! assert!(!err.is_retryable());
//! ```

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

use crate::broadcast::BroadcastError;
use crate::engine::EngineError;
use crate::fee_estimation::FeeEstimationError;
use crate::process::TransitionError;
use crate::provider::ProviderError;
use crate::runestone::CodecError;
use crate::signing::SigningError;
use crate::storage::StorageError;
use crate::transaction::BuildError;
use crate::utxo_selection::SelectionError;
use crate::validation::ValidationError;

/// The main error type for Runeforge
#[derive(Debug, Error)]
pub enum RuneforgeError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("State error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Collaborator error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Fee estimation error: {0}")]
    FeeEstimation(#[from] FeeEstimationError),

    #[error("Engine error: {0}")]
    Engine(EngineError),

    /// Configuration errors
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },

    /// I/O errors
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

/// Type alias for a Result with RuneforgeError
pub type RuneforgeResult<T> = Result<T, RuneforgeError>;

/// Error categories, for logging and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed or oversized runestones
    Codec,
    /// Rejected etching parameters
    Validation,
    /// Funding problems
    Funds,
    /// Transaction assembly
    Transaction,
    /// Threshold signing
    Signing,
    /// Broadcast and chain queries
    Network,
    /// Durable storage
    Storage,
    /// Process lifecycle violations
    State,
    Config,
    Io,
    Serialization,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Codec => "Codec",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Funds => "Funds",
            ErrorCategory::Transaction => "Transaction",
            ErrorCategory::Signing => "Signing",
            ErrorCategory::Network => "Network",
            ErrorCategory::Storage => "Storage",
            ErrorCategory::State => "State",
            ErrorCategory::Config => "Config",
            ErrorCategory::Io => "Io",
            ErrorCategory::Serialization => "Serialization",
        }
    }
}

impl From<EngineError> for RuneforgeError {
    /// Flattens engine errors that merely wrap a component error.
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => RuneforgeError::Validation(e),
            EngineError::Codec(e) => RuneforgeError::Codec(e),
            EngineError::Selection(e) => RuneforgeError::Selection(e),
            EngineError::Build(e) => RuneforgeError::Build(e),
            EngineError::Provider(e) => RuneforgeError::Provider(e),
            EngineError::Storage(e) => RuneforgeError::Storage(e),
            EngineError::Transition(e) => RuneforgeError::Transition(e),
            EngineError::Config(context) => RuneforgeError::Config {
                context,
                source: None,
            },
            other => RuneforgeError::Engine(other),
        }
    }
}

impl From<io::Error> for RuneforgeError {
    fn from(err: io::Error) -> Self {
        RuneforgeError::Io {
            context: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for RuneforgeError {
    fn from(err: serde_json::Error) -> Self {
        RuneforgeError::Serialization {
            context: format!("JSON serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for RuneforgeError {
    fn from(err: toml::de::Error) -> Self {
        RuneforgeError::Serialization {
            context: format!("TOML deserialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

/// Error types that can carry an I/O failure together with its context
pub trait FromIoError {
    fn from_io(context: String, source: io::Error) -> Self;
}

impl FromIoError for RuneforgeError {
    fn from_io(context: String, source: io::Error) -> Self {
        RuneforgeError::Io { context, source }
    }
}

/// Attach context to an I/O failure
pub fn with_io_context<T, E: FromIoError>(
    result: Result<T, io::Error>,
    context: impl Into<String>,
) -> Result<T, E> {
    result.map_err(|err| E::from_io(context.into(), err))
}

/// Create a configuration error with context
pub fn config_error<S: Into<String>>(context: S) -> RuneforgeError {
    RuneforgeError::Config {
        context: context.into(),
        source: None,
    }
}

impl RuneforgeError {
    /// Convert an error from the configuration layer
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        config_error(format!("{:#}", err))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RuneforgeError::Codec(_) => ErrorCategory::Codec,
            RuneforgeError::Validation(_) => ErrorCategory::Validation,
            RuneforgeError::Selection(_) => ErrorCategory::Funds,
            RuneforgeError::Build(_) => ErrorCategory::Transaction,
            RuneforgeError::Signing(_) => ErrorCategory::Signing,
            RuneforgeError::Broadcast(_) | RuneforgeError::Provider(_) => ErrorCategory::Network,
            RuneforgeError::FeeEstimation(_) => ErrorCategory::Network,
            RuneforgeError::Storage(_) => ErrorCategory::Storage,
            RuneforgeError::Transition(_) | RuneforgeError::Engine(_) => ErrorCategory::State,
            RuneforgeError::Config { .. } => ErrorCategory::Config,
            RuneforgeError::Io { .. } => ErrorCategory::Io,
            RuneforgeError::Serialization { .. } => ErrorCategory::Serialization,
        }
    }

    /// Whether repeating the operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RuneforgeError::Signing(e) => e.is_retryable(),
            RuneforgeError::Broadcast(e) => e.is_retryable(),
            RuneforgeError::Storage(e) => e.is_retryable(),
            RuneforgeError::Engine(e) => e.is_retryable(),
            RuneforgeError::Provider(_) | RuneforgeError::FeeEstimation(_) | RuneforgeError::Io { .. } => true,
            _ => false,
        }
    }

    /// Get a sanitized message suitable for displaying to users
    pub fn user_message(&self) -> String {
        match self {
            RuneforgeError::Codec(CodecError::PayloadTooLarge { size, max }) => {
                format!("The runestone is {} bytes, more than the {} bytes allowed", size, max)
            }
            RuneforgeError::Codec(_) => "The runestone could not be encoded".to_string(),
            RuneforgeError::Validation(e) => format!("Invalid etching parameters: {}", e),
            RuneforgeError::Selection(SelectionError::InsufficientFunds { available, required }) => {
                format!(
                    "Not enough funds: {} sats available, {} sats required",
                    available, required
                )
            }
            RuneforgeError::Selection(e) => e.to_string(),
            RuneforgeError::Build(e) => format!("The etching transaction could not be built: {}", e),
            RuneforgeError::Signing(_) => "The signing service did not produce a valid signature".to_string(),
            RuneforgeError::Broadcast(e) => format!("The network rejected the transaction: {}", e),
            RuneforgeError::Provider(_) | RuneforgeError::FeeEstimation(_) => {
                "A network service is unavailable".to_string()
            }
            RuneforgeError::Storage(_) => "Process storage is unavailable".to_string(),
            RuneforgeError::Transition(e) => e.to_string(),
            RuneforgeError::Engine(e) => e.to_string(),
            RuneforgeError::Config { context, .. } => format!("Configuration error: {}", context),
            RuneforgeError::Io { context, .. } => format!("File operation error: {}", context),
            RuneforgeError::Serialization { context, .. } => format!("Data format error: {}", context),
        }
    }
}
