use std::fs;
use std::time::Duration;

use bitcoin::Network;
use runeforge_common::config::{ensure_config_exists, Config};
use runeforge_common::engine::{EngineError, EngineSettings};
use runeforge_common::error::{ErrorCategory, RuneforgeError};
use runeforge_common::types::FeePriority;
use rust_decimal_macros::dec;
use tempfile::tempdir;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.bitcoin_network().unwrap(), Network::Bitcoin);
    assert_eq!(config.fee_priority().unwrap(), FeePriority::Medium);
    assert_eq!(config.signing_timeout(), Duration::from_secs(120));
}

#[test]
fn config_survives_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("runeforge.toml");

    let mut config = Config::default();
    config.network.network = "regtest".to_string();
    config.network.owner = "treasury".to_string();
    config.fees.bump_multiplier = dec!(2.0);
    config.tracker.required_confirmations = 3;
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn partial_files_fall_back_to_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("partial.toml");
    fs::write(&path, "[network]\nnetwork = \"signet\"\n\n[retry]\nmax_retries = 5\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.bitcoin_network().unwrap(), Network::Signet);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.etching.postage, Config::default().etching.postage);
    assert!(config.validate().is_ok());
}

#[test]
fn ensure_config_exists_writes_defaults_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("runeforge.toml");

    ensure_config_exists(&path).unwrap();
    assert!(path.exists());
    assert_eq!(Config::load(&path).unwrap(), Config::default());

    fs::write(&path, "[tracker]\nrequired_confirmations = 2\n").unwrap();
    ensure_config_exists(&path).unwrap();
    assert_eq!(Config::load(&path).unwrap().tracker.required_confirmations, 2);
}

#[test]
fn invalid_values_are_rejected() {
    let mut config = Config::default();
    config.network.network = "moonnet".to_string();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.fees.min_fee_rate = 50;
    config.fees.max_fee_rate = 10;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.etching.postage = 100;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.tracker.required_confirmations = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.fees.priority = "whenever".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn engine_settings_follow_the_config() {
    let mut config = Config::default();
    config.network.network = "testnet".to_string();
    config.network.owner = "vault".to_string();
    config.etching.max_symbol_length = 20;
    config.retry.max_retries = 7;
    config.tracker.poll_interval_seconds = 5;
    config.fees.priority = "high".to_string();

    let settings = EngineSettings::from_config(&config).unwrap();
    assert_eq!(settings.network, Network::Testnet);
    assert_eq!(settings.owner, "vault");
    assert_eq!(settings.max_symbol_length, 20);
    assert_eq!(settings.max_retries, 7);
    assert_eq!(settings.poll_interval, Duration::from_secs(5));
    assert_eq!(settings.fee_policy.priority, FeePriority::High);
    assert_eq!(settings.fee_policy.network, Network::Testnet);
}

#[test]
fn bad_config_surfaces_as_config_error() {
    let mut config = Config::default();
    config.etching.max_symbol_length = 0;

    let err = EngineSettings::from_config(&config).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let err = RuneforgeError::from(err);
    assert_eq!(err.category(), ErrorCategory::Config);
    assert!(!err.is_retryable());
}

#[test]
fn unreadable_files_are_errors() {
    let dir = tempdir().unwrap();
    assert!(Config::load(&dir.path().join("missing.toml")).is_err());

    let path = dir.path().join("broken.toml");
    fs::write(&path, "[network\n").unwrap();
    let err = RuneforgeError::from_anyhow(Config::load(&path).unwrap_err());
    assert_eq!(err.category(), ErrorCategory::Config);
}
