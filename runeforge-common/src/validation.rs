//! Etching request validation
//!
//! Every request is validated before any UTXO is touched. Rules are checked in
//! a fixed order and the first violation is returned, each as its own
//! [`ValidationError`] variant:
//!
//! 1. Symbol shape and ticker cap
//! 2. Divisibility range
//! 3. Mint terms shape (cap needs amount, windows ordered)
//! 4. Maximum supply fits in 128 bits
//! 5. Height and offset windows overlap at the prospective etching height
//! 6. Currency symbol is printable
//! 7. Destination address parses for the configured network
//!
//! The field ranges enforced here are the same ones the runestone codec
//! enforces, so a request that validates always encodes.
//!
//! ## Security Considerations
//!
//! - Validation runs on caller input before it reaches the reservation ledger
//! - Arithmetic on supply uses checked operations only

use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network};
use std::str::FromStr;
use thiserror::Error;

use crate::runestone::rune::is_spacer;
use crate::runestone::MAX_DIVISIBILITY;
use crate::types::{MintTerms, RuneEtchingRequest, DEFAULT_MAX_SYMBOL_LENGTH, MAX_RUNE_LETTERS};

/// Errors that can occur during request validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Symbol is empty")]
    EmptySymbol,

    #[error("Symbol contains invalid character {0:?}")]
    InvalidSymbolCharacter(char),

    #[error("Symbol has a spacer at position {0}")]
    MisplacedSpacer(usize),

    #[error("Symbol has consecutive spacers at position {0}")]
    ConsecutiveSpacers(usize),

    #[error("Symbol has {letters} letters, maximum is {max}")]
    SymbolTooLong { letters: usize, max: usize },

    #[error("Divisibility {0} exceeds maximum of 38")]
    DivisibilityOutOfRange(u8),

    #[error("Mint cap requires a mint amount")]
    CapWithoutAmount,

    #[error("Height window start {start} is after end {end}")]
    InvalidHeightWindow { start: u64, end: u64 },

    #[error("Offset window start {start} is after end {end}")]
    InvalidOffsetWindow { start: u64, end: u64 },

    #[error("Premine plus cap times amount overflows")]
    SupplyOverflow,

    #[error("Height and offset windows never overlap when etched at height {0}")]
    ContradictoryMintWindows(u64),

    #[error("Currency symbol {0:?} is not printable")]
    InvalidCurrencySymbol(char),

    #[error("Invalid destination address: {0}")]
    InvalidDestination(String),

    #[error("Destination {address} is not valid for network {network}")]
    NetworkMismatch { address: String, network: Network },
}

/// Validator with the etcher's policy: network and ticker cap
#[derive(Debug, Clone, Copy)]
pub struct EtchingValidator {
    network: Network,
    max_symbol_length: usize,
}

impl Default for EtchingValidator {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            max_symbol_length: DEFAULT_MAX_SYMBOL_LENGTH,
        }
    }
}

impl EtchingValidator {
    pub fn new(network: Network, max_symbol_length: usize) -> Self {
        Self {
            network,
            max_symbol_length: max_symbol_length.min(MAX_RUNE_LETTERS),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Validate without knowledge of the etching height
    pub fn validate(&self, request: &RuneEtchingRequest) -> Result<(), ValidationError> {
        self.validate_at(request, None)
    }

    /// Validate, checking mint windows against the height the etching would
    /// confirm at, when known.
    pub fn validate_at(
        &self,
        request: &RuneEtchingRequest,
        etching_height: Option<u64>,
    ) -> Result<(), ValidationError> {
        self.validate_symbol(&request.symbol)?;

        if request.divisibility > MAX_DIVISIBILITY {
            return Err(ValidationError::DivisibilityOutOfRange(request.divisibility));
        }

        if let Some(terms) = &request.terms {
            validate_terms_shape(terms)?;
        }

        validate_supply(request.premine, request.terms.as_ref())?;

        if let (Some(terms), Some(height)) = (&request.terms, etching_height) {
            validate_window_overlap(terms, height)?;
        }

        if let Some(currency) = request.currency {
            if currency.is_control() {
                return Err(ValidationError::InvalidCurrencySymbol(currency));
            }
        }

        if let Some(destination) = &request.destination {
            self.validate_destination(destination)?;
        }

        Ok(())
    }

    fn validate_symbol(&self, symbol: &str) -> Result<(), ValidationError> {
        if symbol.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let chars: Vec<char> = symbol.chars().collect();
        let mut letters = 0;

        for (i, c) in chars.iter().enumerate() {
            if c.is_ascii_uppercase() {
                letters += 1;
            } else if is_spacer(*c) {
                if i == 0 || i == chars.len() - 1 {
                    return Err(ValidationError::MisplacedSpacer(i));
                }
                if is_spacer(chars[i - 1]) {
                    return Err(ValidationError::ConsecutiveSpacers(i));
                }
            } else {
                return Err(ValidationError::InvalidSymbolCharacter(*c));
            }
        }

        if letters > self.max_symbol_length {
            return Err(ValidationError::SymbolTooLong {
                letters,
                max: self.max_symbol_length,
            });
        }

        Ok(())
    }

    /// Parse a destination and check it belongs to the configured network.
    pub fn validate_destination(&self, destination: &str) -> Result<Address, ValidationError> {
        let unchecked = Address::<NetworkUnchecked>::from_str(destination)
            .map_err(|e| ValidationError::InvalidDestination(e.to_string()))?;

        if !unchecked.is_valid_for_network(self.network) {
            return Err(ValidationError::NetworkMismatch {
                address: destination.to_string(),
                network: self.network,
            });
        }

        Ok(unchecked.assume_checked())
    }
}

/// Validate with the default policy (mainnet, default ticker cap)
pub fn validate(request: &RuneEtchingRequest) -> Result<(), ValidationError> {
    EtchingValidator::default().validate(request)
}

fn validate_terms_shape(terms: &MintTerms) -> Result<(), ValidationError> {
    if terms.cap.is_some() && terms.amount.is_none() {
        return Err(ValidationError::CapWithoutAmount);
    }

    if let (Some(start), Some(end)) = terms.height {
        if start > end {
            return Err(ValidationError::InvalidHeightWindow { start, end });
        }
    }

    if let (Some(start), Some(end)) = terms.offset {
        if start > end {
            return Err(ValidationError::InvalidOffsetWindow { start, end });
        }
    }

    Ok(())
}

fn validate_supply(premine: u128, terms: Option<&MintTerms>) -> Result<(), ValidationError> {
    let mintable = match terms {
        Some(terms) => terms.mintable().ok_or(ValidationError::SupplyOverflow)?,
        None => 0,
    };

    premine
        .checked_add(mintable)
        .map(|_| ())
        .ok_or(ValidationError::SupplyOverflow)
}

/// Minting is open while every present bound holds, so the windows combine by
/// intersection: `[max(starts), min(ends))`.
fn validate_window_overlap(terms: &MintTerms, etching_height: u64) -> Result<(), ValidationError> {
    let has_height = terms.height.0.is_some() || terms.height.1.is_some();
    let has_offset = terms.offset.0.is_some() || terms.offset.1.is_some();
    if !(has_height && has_offset) {
        return Ok(());
    }

    let absolute = |offset: Option<u64>| offset.map(|o| etching_height.saturating_add(o));

    let start = [terms.height.0, absolute(terms.offset.0)]
        .into_iter()
        .flatten()
        .max();
    let end = [terms.height.1, absolute(terms.offset.1)]
        .into_iter()
        .flatten()
        .min();

    match (start, end) {
        (Some(start), Some(end)) if start >= end => {
            Err(ValidationError::ContradictoryMintWindows(etching_height))
        }
        _ => Ok(()),
    }
}
