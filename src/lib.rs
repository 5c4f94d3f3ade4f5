//! Sumi-Harvest: a resumable, checkpointed extraction engine
//!
//! This crate drives long-running extraction jobs over a two-level work
//! hierarchy (documents and the chapters discovered under them). Progress is
//! kept in a lock-guarded JSON checkpoint file so a job can crash, be
//! restarted, or share its checkpoint file with another process without
//! losing or double-counting work.

pub mod checkpoint;
pub mod config;
pub mod crawler;
pub mod output;
pub mod policy;
pub mod state;
pub mod storage;
pub mod url;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for Sumi-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Operation exceeded its deadline of {limit:?}")]
    DeadlineExceeded { limit: Duration },

    #[error("Failed to write output {}: {source}", path.display())]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Output {} was already written for this subtask", path.display())]
    OutputCollision { path: PathBuf },

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvestError {
    /// Returns true if this error came from a deadline rather than the operation itself
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Missing required collaborator: {0}")]
    MissingCollaborator(&'static str),
}

/// Content rejected by a handler's schema contract
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result type alias for Sumi-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use checkpoint::{CheckpointRecord, Params, SubtaskRecord};
pub use config::Config;
pub use crawler::{Crawler, RunReport};
pub use state::UnitState;
pub use storage::CheckpointStore;
