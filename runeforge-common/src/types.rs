//! Common data types for the etching pipeline
//!
//! These types are shared by the validator, the selector, the engine and the
//! stores. They are all serializable so that a process record can be written
//! to durable storage and restored after a restart.
//!
//! IMPORTANT: These types MUST NOT contain private keys or other signing
//! material. Signatures are produced by the remote threshold signer only.

use bitcoin::hashes::{sha256, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::runestone::{CodecError, Etching, Runestone, SpacedRune, Terms};

// Constants for Bitcoin-specific values

/// Constant for dust threshold (minimum output value)
pub const DUST_THRESHOLD: u64 = 546;

/// Default value of the output receiving the premine
pub const DEFAULT_POSTAGE: u64 = 10_000;

/// Letters a rune name may have under the protocol
pub const MAX_RUNE_LETTERS: usize = 26;

/// Default ticker cap applied by the etcher
pub const DEFAULT_MAX_SYMBOL_LENGTH: usize = 12;

/// Open-mint terms attached to an etching request.
pub type MintTerms = Terms;

/// Identifier of an etching process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// A fresh random identifier.
    pub fn generate() -> Self {
        ProcessId(hex::encode(rand::random::<[u8; 16]>()))
    }

    /// The identifier owned by an idempotency key.
    ///
    /// Hashing keeps arbitrary caller tokens safe for use as file names.
    pub fn for_idempotency_key(key: &str) -> Self {
        let digest = sha256::Hash::hash(key.as_bytes());
        ProcessId(hex::encode(&digest.to_byte_array()[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        ProcessId(value.to_string())
    }
}

/// Fee priority levels for etching transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeePriority {
    /// Low priority (several hours)
    Low,
    /// Medium priority (within an hour)
    Medium,
    /// High priority (next block)
    High,
    /// Explicit rate in sat/vB
    Custom(u64),
}

impl fmt::Display for FeePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeePriority::Low => write!(f, "Low"),
            FeePriority::Medium => write!(f, "Medium"),
            FeePriority::High => write!(f, "High"),
            FeePriority::Custom(rate) => write!(f, "Custom({} sat/vB)", rate),
        }
    }
}

impl std::str::FromStr for FeePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(FeePriority::Low),
            "medium" => Ok(FeePriority::Medium),
            "high" => Ok(FeePriority::High),
            other => other
                .parse::<u64>()
                .map(FeePriority::Custom)
                .map_err(|_| format!("Unknown fee priority: {}", s)),
        }
    }
}

/// A request to etch a new rune.
///
/// Immutable once submitted. `symbol` is the rune itself in spaced form
/// (`UNCOMMON•GOODS`), `name` is a display label kept with the process and
/// never written on chain, and `currency` is the one-character currency
/// symbol carried by the runestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuneEtchingRequest {
    pub name: String,
    pub symbol: String,
    pub divisibility: u8,
    #[serde(default)]
    pub premine: u128,
    #[serde(default)]
    pub terms: Option<MintTerms>,
    #[serde(default)]
    pub currency: Option<char>,
    #[serde(default)]
    pub turbo: bool,
    /// Address receiving the premine and postage
    #[serde(default)]
    pub destination: Option<String>,
}

impl RuneEtchingRequest {
    /// Minimal request with no premine and no open mint.
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, divisibility: u8) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            divisibility,
            premine: 0,
            terms: None,
            currency: None,
            turbo: false,
            destination: None,
        }
    }

    pub fn with_premine(mut self, premine: u128) -> Self {
        self.premine = premine;
        self
    }

    pub fn with_terms(mut self, terms: MintTerms) -> Self {
        self.terms = Some(terms);
        self
    }

    pub fn with_currency(mut self, currency: char) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn spaced_rune(&self) -> Result<SpacedRune, CodecError> {
        self.symbol.parse()
    }

    /// The etching this request describes.
    pub fn to_etching(&self) -> Result<Etching, CodecError> {
        let spaced = self.spaced_rune()?;

        Ok(Etching {
            divisibility: Some(self.divisibility),
            premine: (self.premine > 0).then_some(self.premine),
            rune: Some(spaced.rune),
            spacers: (spaced.spacers > 0).then_some(spaced.spacers),
            symbol: self.currency,
            terms: self.terms,
            turbo: self.turbo,
        })
    }

    /// The runestone committed to by the etching transaction.
    ///
    /// The premine goes to the first non-OP_RETURN output, which is where the
    /// protocol sends unallocated runes when no pointer is present.
    pub fn to_runestone(&self) -> Result<Runestone, CodecError> {
        Ok(Runestone {
            etching: Some(self.to_etching()?),
            ..Default::default()
        })
    }

    /// Stable digest of the request, used to detect idempotency key reuse
    /// with a different request.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        sha256::Hash::hash(&encoded).to_string()
    }
}
