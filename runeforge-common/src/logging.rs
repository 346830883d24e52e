//! Structured logging for the etching pipeline
//!
//! This module wraps the `log` facade with per-stage helpers:
//! - Every record is tagged with the pipeline stage it came from
//! - Potentially identifying values (txids, addresses, outpoints) are
//!   truncated before they reach the log
//! - Output is either human-readable or one JSON object per line
//!
//! # Security Considerations
//!
//! - NEVER log signatures, sighashes or raw signed transactions
//! - Truncate txids and addresses when logging
//! - Structured logging (JSON) is available for machine processing
//!
//! # Usage
//!
//! ```
//! use runeforge_common::logging::{self, LogConfig, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_engine(
//!     LogLevel::Info,
//!     "process submitted",
//!     Some(json!({ "process_id": "4f2a" })),
//! );
//! ```

use chrono::Local;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Pipeline stage a log record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Runestone encoding and decoding
    Codec,
    /// UTXO selection and reservation
    Selection,
    /// Transaction assembly
    Transaction,
    /// Threshold signature requests
    Signing,
    /// Submission to the network
    Broadcast,
    /// Confirmation tracking
    Tracker,
    /// Durable process storage
    Storage,
    /// State machine orchestration
    Engine,
}

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default log level
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    pub include_source_location: bool,
    /// Whether to use JSON format for logs (machine-readable)
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_file: None,
            include_timestamps: true,
            include_source_location: false,
            json_format: false,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

// Ensure logging is only initialized once
static LOGGING_INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Safe to call more than once: only the first call configures the logger,
/// later calls return Ok without touching it.
pub fn init(config: &LogConfig) -> Result<(), String> {
    let mut result = Ok(());

    let include_timestamps = config.include_timestamps;
    let include_source_location = config.include_source_location;
    let json_format = config.json_format;
    let log_file = config.log_file.clone();
    let level = config.level;

    LOGGING_INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(level.into());

        builder.format(move |buf, record| {
            let timestamp = if include_timestamps {
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
            } else {
                String::new()
            };

            let source_location = if include_source_location {
                format!(
                    " [{}:{}]",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )
            } else {
                String::new()
            };

            if json_format {
                let json = json!({
                    "timestamp": timestamp,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "location": source_location.trim(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", json)
            } else {
                if include_timestamps {
                    write!(buf, "{} ", timestamp)?;
                }
                let mut style = buf.style();
                style.set_bold(true);
                writeln!(
                    buf,
                    "[{}{}] {}",
                    style.value(record.level()),
                    source_location,
                    record.args()
                )
            }
        });

        if let Some(file_path) = &log_file {
            match OpenOptions::new().create(true).append(true).open(file_path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => {
                    result = Err(format!("Failed to open log file {}: {}", file_path, e));
                    return;
                }
            }
        }

        // another logger may already be installed, e.g. by a test harness
        if let Err(e) = builder.try_init() {
            log::debug!("Logger already initialized: {}", e);
        }
    });

    result
}

/// Logger for tests: captured by the harness, silent unless RUST_LOG is set.
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Update the log level dynamically
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.into());
}

/// Truncate an identifying value for logging
///
/// Keeps the first and last 4 characters of values longer than 8 characters,
/// masks shorter ones entirely.
pub fn sanitize_for_logging(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "*****".to_string();
    }

    let first: String = chars[..4].iter().collect();
    let last: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", first, last)
}

/// Trait for types that can be safely logged
pub trait SafeLog {
    /// Return a sanitized string representation safe for logging
    fn safe_log_format(&self) -> String;
}

impl SafeLog for bitcoin::Txid {
    fn safe_log_format(&self) -> String {
        sanitize_for_logging(&self.to_string())
    }
}

impl SafeLog for bitcoin::OutPoint {
    fn safe_log_format(&self) -> String {
        format!("{}:{}", self.txid.safe_log_format(), self.vout)
    }
}

impl SafeLog for crate::types::ProcessId {
    fn safe_log_format(&self) -> String {
        self.to_string()
    }
}

fn log_with_context(
    level: LogLevel,
    context: LogContext,
    message: &str,
    params: Option<serde_json::Value>,
) {
    match params {
        Some(params) => log::log!(level.into(), "[{:?}] {} {}", context, message, params),
        None => log::log!(level.into(), "[{:?}] {}", context, message),
    }
}

/// Log a codec event
pub fn log_codec(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Codec, message, params);
}

/// Log a selection or reservation event
pub fn log_selection(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Selection, message, params);
}

/// Log a transaction assembly event
pub fn log_transaction(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Transaction, message, params);
}

/// Log a signing event
pub fn log_signing(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Signing, message, params);
}

/// Log a broadcast event
pub fn log_broadcast(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Broadcast, message, params);
}

/// Log a confirmation tracking event
pub fn log_tracker(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Tracker, message, params);
}

/// Log a storage event
pub fn log_storage(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Storage, message, params);
}

/// Log a state machine event
pub fn log_engine(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_with_context(level, LogContext::Engine, message, params);
}

/// Build a parameter object from already sanitized values
pub fn log_params(params: Vec<(&str, String)>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in params {
        map.insert(name.to_string(), serde_json::Value::String(value));
    }
    serde_json::Value::Object(map)
}

/// Parameter object for a single identifying value
pub fn log_sensitive_param(name: &str, value: &impl SafeLog) -> serde_json::Value {
    json!({ name: value.safe_log_format() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_truncates_long_values() {
        assert_eq!(sanitize_for_logging(""), "");
        assert_eq!(sanitize_for_logging("short"), "*****");
        assert_eq!(sanitize_for_logging("0123456789abcdef"), "0123...cdef");
    }

    #[test]
    fn params_are_collected_into_an_object() {
        let params = log_params(vec![("state", "Signing".to_string())]);
        assert_eq!(params["state"], "Signing");
    }
}
