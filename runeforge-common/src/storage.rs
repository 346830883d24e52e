//! Durable process storage
//!
//! Every state change of an etching process is persisted before it becomes
//! visible in the process table, so a restarted engine resumes from exactly
//! the last acknowledged state.
//!
//! Two implementations are provided:
//! - [`MemoryProcessStore`] keeps records in memory (tests, ephemeral runs)
//! - [`JsonFileProcessStore`] writes one JSON document per process, replacing
//!   it atomically through a temporary file and a rename

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

use crate::error::{with_io_context, FromIoError};
use crate::logging::{log_storage, LogLevel};
use crate::process::EtchingProcess;
use crate::types::ProcessId;
use serde_json::json;

/// Errors raised by process stores
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// I/O failures and outages may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StorageError::Serialization(_))
    }
}

impl FromIoError for StorageError {
    fn from_io(context: String, source: io::Error) -> Self {
        StorageError::Io { context, source }
    }
}

/// Durable store for process records
pub trait ProcessStore: Send + Sync {
    /// Write (or replace) the record of `process`
    fn persist(&self, process: &EtchingProcess) -> Result<(), StorageError>;

    fn load(&self, id: &ProcessId) -> Result<Option<EtchingProcess>, StorageError>;

    fn load_all(&self) -> Result<Vec<EtchingProcess>, StorageError>;
}

/// In-memory store
#[derive(Default)]
pub struct MemoryProcessStore {
    records: RwLock<HashMap<ProcessId, EtchingProcess>>,
    fail_writes: AtomicBool,
}

impl MemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessStore for MemoryProcessStore {
    fn persist(&self, process: &EtchingProcess) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        self.records
            .write()
            .insert(process.id.clone(), process.clone());
        Ok(())
    }

    fn load(&self, id: &ProcessId) -> Result<Option<EtchingProcess>, StorageError> {
        Ok(self.records.read().get(id).cloned())
    }

    fn load_all(&self) -> Result<Vec<EtchingProcess>, StorageError> {
        let mut all: Vec<EtchingProcess> = self.records.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// One JSON file per process under a directory
pub struct JsonFileProcessStore {
    directory: PathBuf,
}

impl JsonFileProcessStore {
    /// Open (and create, if needed) the store directory
    pub fn open(directory: impl AsRef<Path>) -> Result<Self, StorageError> {
        let directory = directory.as_ref().to_path_buf();
        with_io_context::<_, StorageError>(
            fs::create_dir_all(&directory),
            format!("Failed to create store directory {}", directory.display()),
        )?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, id: &ProcessId) -> PathBuf {
        self.directory.join(format!("{}.json", id))
    }
}

impl ProcessStore for JsonFileProcessStore {
    fn persist(&self, process: &EtchingProcess) -> Result<(), StorageError> {
        let path = self.path_for(&process.id);
        let temp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(process)?;

        with_io_context::<_, StorageError>(
            fs::write(&temp, content),
            format!("Failed to write {}", temp.display()),
        )?;
        with_io_context::<_, StorageError>(
            fs::rename(&temp, &path),
            format!("Failed to replace {}", path.display()),
        )?;

        log_storage(
            LogLevel::Debug,
            "persisted process",
            Some(json!({ "process_id": process.id.to_string(), "state": process.state })),
        );
        Ok(())
    }

    fn load(&self, id: &ProcessId) -> Result<Option<EtchingProcess>, StorageError> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }

        let content = with_io_context::<_, StorageError>(
            fs::read(&path),
            format!("Failed to read {}", path.display()),
        )?;
        Ok(Some(serde_json::from_slice(&content)?))
    }

    fn load_all(&self) -> Result<Vec<EtchingProcess>, StorageError> {
        let entries = with_io_context::<_, StorageError>(
            fs::read_dir(&self.directory),
            format!("Failed to list {}", self.directory.display()),
        )?;

        let mut all = Vec::new();
        for entry in entries {
            let path = with_io_context::<_, StorageError>(entry, "Failed to read directory entry")?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }

            let content = with_io_context::<_, StorageError>(
                fs::read(&path),
                format!("Failed to read {}", path.display()),
            )?;
            all.push(serde_json::from_slice::<EtchingProcess>(&content)?);
        }

        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}
