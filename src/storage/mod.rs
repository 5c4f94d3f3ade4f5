//! Storage module for persisting checkpoint state
//!
//! This module handles all checkpoint file operations, including:
//! - Bootstrapping the checkpoint file and its directory
//! - Lock-guarded full-file reads and atomic full-file rewrites
//! - Atomic read-modify-write for completion flags and discovery results
//! - The policy applied when the file cannot be parsed

mod lock;
mod store;

pub use lock::{CheckpointLock, LockPolicy};
pub use store::CheckpointStore;

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not lock {} after {attempts} attempts", path.display())]
    Lock { path: PathBuf, attempts: u32 },

    #[error("Checkpoint file {} is not valid JSON: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to replace checkpoint file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// What to do when the checkpoint file exists but cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorruptionPolicy {
    /// Read as an empty list; the next locked write moves the unreadable
    /// file aside before starting from an empty list
    #[default]
    Quarantine,

    /// Start from an empty list; the unreadable content is overwritten on the next write
    Reset,

    /// Refuse to continue; reads and writes return `StorageError::Corrupt`
    Abort,
}

impl CorruptionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quarantine => "quarantine",
            Self::Reset => "reset",
            Self::Abort => "abort",
        }
    }
}
