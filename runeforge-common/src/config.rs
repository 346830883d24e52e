//! Configuration management for the etching service.
//!
//! Settings are stored in TOML. Every section has serde defaults, so a
//! partial file (or an empty one) yields a usable configuration.
//!
//! ## Security Considerations
//!
//! - No signing material is ever stored in this configuration
//! - Values are validated before the engine is built from them
//! - Network mismatches between configuration and addresses are rejected by
//!   the validator, not silently corrected

use anyhow::{anyhow, Result};
use bitcoin::Network;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::fee_estimation::FeePolicy;
use crate::logging::LogConfig;
use crate::types::{FeePriority, DEFAULT_MAX_SYMBOL_LENGTH, DEFAULT_POSTAGE, DUST_THRESHOLD, MAX_RUNE_LETTERS};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub etching: EtchingConfig,

    #[serde(default)]
    pub fees: FeeConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

/// Chain and funding configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// Bitcoin, Testnet, Signet or Regtest
    #[serde(default = "default_network")]
    pub network: String,

    /// Owner whose UTXOs fund etchings
    #[serde(default)]
    pub owner: String,

    /// Change destination; defaults to the script of the first input spent
    #[serde(default)]
    pub change_address: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            owner: String::new(),
            change_address: None,
        }
    }
}

/// Etching policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EtchingConfig {
    /// Sats attached to the premine output
    #[serde(default = "default_postage")]
    pub postage: u64,

    /// Ticker cap on rune letters
    #[serde(default = "default_max_symbol_length")]
    pub max_symbol_length: usize,

    /// Outputs below this value are never created
    #[serde(default = "default_dust_threshold")]
    pub dust_threshold: u64,

    /// UTXOs with fewer confirmations are not selected
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
}

impl Default for EtchingConfig {
    fn default() -> Self {
        Self {
            postage: default_postage(),
            max_symbol_length: default_max_symbol_length(),
            dust_threshold: default_dust_threshold(),
            min_confirmations: default_min_confirmations(),
        }
    }
}

/// Fee configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeeConfig {
    /// low, medium, high or a rate in sat/vB
    #[serde(default = "default_fee_priority")]
    pub priority: String,

    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate: u64,

    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate: u64,

    /// Multiplier applied to the fee rate on fee-related retries
    #[serde(default = "default_bump_multiplier")]
    pub bump_multiplier: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            priority: default_fee_priority(),
            min_fee_rate: default_min_fee_rate(),
            max_fee_rate: default_max_fee_rate(),
            bump_multiplier: default_bump_multiplier(),
        }
    }
}

/// Retry and timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_signing_timeout")]
    pub signing_timeout_seconds: u64,

    #[serde(default = "default_broadcast_timeout")]
    pub broadcast_timeout_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            signing_timeout_seconds: default_signing_timeout(),
            broadcast_timeout_seconds: default_broadcast_timeout(),
        }
    }
}

/// Confirmation tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "default_required_confirmations")]
    pub required_confirmations: u32,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            required_confirmations: default_required_confirmations(),
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

/// Process storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default = "default_storage_directory")]
    pub directory: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: default_storage_directory(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("Failed to parse config file: {}", e))?;

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| anyhow!("Failed to write config file: {}", e))?;

        log::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.bitcoin_network()?;
        self.fee_priority()?;

        if self.etching.max_symbol_length == 0 || self.etching.max_symbol_length > MAX_RUNE_LETTERS {
            anyhow::bail!(
                "Invalid max_symbol_length {}: must be between 1 and {}",
                self.etching.max_symbol_length,
                MAX_RUNE_LETTERS
            );
        }

        if self.etching.postage < self.etching.dust_threshold {
            anyhow::bail!(
                "Invalid postage {}: below dust threshold {}",
                self.etching.postage,
                self.etching.dust_threshold
            );
        }

        if self.tracker.required_confirmations == 0 {
            return Err(anyhow!("Invalid required_confirmations: must be greater than 0"));
        }

        if self.retry.signing_timeout_seconds == 0 || self.retry.broadcast_timeout_seconds == 0 {
            return Err(anyhow!("Invalid timeout: must be greater than 0"));
        }

        self.fee_policy()?
            .validate()
            .map_err(|e| anyhow!("Invalid fee configuration: {}", e))?;

        Ok(())
    }

    pub fn bitcoin_network(&self) -> Result<Network> {
        match self.network.network.as_str() {
            "Bitcoin" | "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "Testnet" | "testnet" => Ok(Network::Testnet),
            "Signet" | "signet" => Ok(Network::Signet),
            "Regtest" | "regtest" => Ok(Network::Regtest),
            other => Err(anyhow!("Invalid network type: {}", other)),
        }
    }

    pub fn fee_priority(&self) -> Result<FeePriority> {
        FeePriority::from_str(&self.fees.priority).map_err(|e| anyhow!(e))
    }

    pub fn fee_policy(&self) -> Result<FeePolicy> {
        Ok(FeePolicy {
            network: self.bitcoin_network()?,
            priority: self.fee_priority()?,
            min_fee_rate: self.fees.min_fee_rate,
            max_fee_rate: self.fees.max_fee_rate,
            bump_multiplier: self.fees.bump_multiplier,
        })
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.signing_timeout_seconds)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_secs(self.retry.broadcast_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.poll_interval_seconds)
    }

    pub fn storage_directory(&self) -> PathBuf {
        PathBuf::from(&self.storage.directory)
    }
}

/// Ensure a configuration file exists at the specified path
/// If it doesn't exist, create it with default values
pub fn ensure_config_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        let default_config = Config::default();
        let content = toml::to_string_pretty(&default_config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;
            }
        }

        fs::write(path, content)
            .map_err(|e| anyhow!("Failed to write default config file: {}", e))?;
    }

    Ok(())
}

// Default value functions

fn default_network() -> String {
    "Bitcoin".to_string()
}

fn default_postage() -> u64 {
    DEFAULT_POSTAGE
}

fn default_max_symbol_length() -> usize {
    DEFAULT_MAX_SYMBOL_LENGTH
}

fn default_dust_threshold() -> u64 {
    DUST_THRESHOLD
}

fn default_min_confirmations() -> u32 {
    1
}

fn default_fee_priority() -> String {
    "medium".to_string()
}

fn default_min_fee_rate() -> u64 {
    1
}

fn default_max_fee_rate() -> u64 {
    500
}

fn default_bump_multiplier() -> Decimal {
    dec!(1.5)
}

fn default_max_retries() -> u32 {
    3
}

fn default_signing_timeout() -> u64 {
    120
}

fn default_broadcast_timeout() -> u64 {
    60
}

fn default_required_confirmations() -> u32 {
    6
}

fn default_poll_interval() -> u64 {
    30
}

fn default_storage_directory() -> String {
    dirs::data_dir()
        .map(|dir| dir.join("runeforge").join("processes"))
        .unwrap_or_else(|| PathBuf::from("./runeforge-data/processes"))
        .to_string_lossy()
        .into_owned()
}
