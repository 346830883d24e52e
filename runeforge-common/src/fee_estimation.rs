//! Fee rate sourcing and bumping for etching transactions
//!
//! Rates are handled as `Decimal` sat/vB while they are being derived and
//! rounded up to whole sat/vB before they reach the selector, so that a fee
//! never undershoots the requested rate.
//!
//! # Fee Strategy
//!
//! - The UTXO supply's estimate is used when it answers
//! - Otherwise network defaults per priority are used
//! - Every rate is clamped to the configured bounds
//! - A retry after a fee-related broadcast failure multiplies the previous rate

use crate::types::FeePriority;
use bitcoin::Network;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

/// Errors related to fee estimation operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeeEstimationError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Constants for network-specific fee rate defaults
pub mod defaults {
    use super::*;

    /// Default fee rates by network and priority (in sat/vB)
    pub fn get_default_fee_rate(network: Network, priority: FeePriority) -> Decimal {
        match network {
            Network::Bitcoin => match priority {
                FeePriority::High => dec!(20.0),
                FeePriority::Medium => dec!(10.0),
                FeePriority::Low => dec!(3.0),
                FeePriority::Custom(rate) => Decimal::from(rate),
            },
            Network::Testnet | Network::Signet => match priority {
                FeePriority::High => dec!(4.0),
                FeePriority::Medium => dec!(2.0),
                FeePriority::Low => dec!(1.0),
                FeePriority::Custom(rate) => Decimal::from(rate),
            },
            Network::Regtest => match priority {
                FeePriority::High => dec!(2.0),
                FeePriority::Medium => dec!(1.0),
                FeePriority::Low => dec!(1.0),
                FeePriority::Custom(rate) => Decimal::from(rate),
            },
            _ => match priority {
                FeePriority::High => dec!(6.0),
                FeePriority::Medium => dec!(3.0),
                FeePriority::Low => dec!(1.0),
                FeePriority::Custom(rate) => Decimal::from(rate),
            },
        }
    }
}

/// Bounds and bump policy applied to every fee rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub network: Network,
    pub priority: FeePriority,
    /// Lowest rate ever used (sat/vB)
    pub min_fee_rate: u64,
    /// Highest rate ever used (sat/vB)
    pub max_fee_rate: u64,
    /// Multiplier applied on each fee-related retry
    pub bump_multiplier: Decimal,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            priority: FeePriority::Medium,
            min_fee_rate: 1,
            max_fee_rate: 500,
            bump_multiplier: dec!(1.5),
        }
    }
}

impl FeePolicy {
    pub fn validate(&self) -> Result<(), FeeEstimationError> {
        if self.min_fee_rate == 0 {
            return Err(FeeEstimationError::InvalidParameters(
                "minimum fee rate must be at least 1 sat/vB".to_string(),
            ));
        }
        if self.min_fee_rate > self.max_fee_rate {
            return Err(FeeEstimationError::InvalidParameters(format!(
                "minimum fee rate {} exceeds maximum {}",
                self.min_fee_rate, self.max_fee_rate
            )));
        }
        if self.bump_multiplier <= Decimal::ONE {
            return Err(FeeEstimationError::InvalidParameters(
                "bump multiplier must be greater than 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Round `rate` up to whole sat/vB and clamp it to the policy bounds.
    pub fn clamp(&self, rate: Decimal) -> u64 {
        let rounded = rate.ceil().to_u64().unwrap_or(self.max_fee_rate);
        rounded.clamp(self.min_fee_rate, self.max_fee_rate)
    }

    /// Rate for a new process.
    ///
    /// `estimated` is the collaborator's estimate, if it produced one.
    pub fn initial_rate(&self, estimated: Option<u64>) -> u64 {
        let rate = match (self.priority, estimated) {
            (FeePriority::Custom(rate), _) => Decimal::from(rate),
            (_, Some(rate)) => Decimal::from(rate),
            (priority, None) => defaults::get_default_fee_rate(self.network, priority),
        };
        self.clamp(rate)
    }

    /// Next rate after a fee-related failure: strictly higher unless already
    /// at the maximum.
    pub fn bump_fee_rate(&self, current: u64) -> u64 {
        let bumped = Decimal::from_u64(current)
            .and_then(|rate| rate.checked_mul(self.bump_multiplier))
            .map(|rate| self.clamp(rate))
            .unwrap_or(self.max_fee_rate);

        bumped.max(current.saturating_add(1).min(self.max_fee_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_priority_overrides_estimate() {
        let policy = FeePolicy {
            priority: FeePriority::Custom(7),
            ..Default::default()
        };
        assert_eq!(policy.initial_rate(Some(30)), 7);
    }

    #[test]
    fn estimate_is_clamped() {
        let policy = FeePolicy::default();
        assert_eq!(policy.initial_rate(Some(0)), 1);
        assert_eq!(policy.initial_rate(Some(10_000)), 500);
        assert_eq!(policy.initial_rate(None), 10);
    }

    #[test]
    fn bump_is_strictly_increasing_below_max() {
        let policy = FeePolicy::default();
        assert_eq!(policy.bump_fee_rate(1), 2);
        assert_eq!(policy.bump_fee_rate(10), 15);
        assert_eq!(policy.bump_fee_rate(499), 500);
        assert_eq!(policy.bump_fee_rate(500), 500);
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let policy = FeePolicy {
            bump_multiplier: dec!(1.0),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
