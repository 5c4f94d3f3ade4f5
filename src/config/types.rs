use crate::storage::CorruptionPolicy;
use serde::Deserialize;
use std::path::PathBuf;

/// Default directory for checkpoint files
pub const DEFAULT_CHECKPOINT_DIR: &str = "dist/task-data";

/// Default directory for extracted content
pub const DEFAULT_OUTPUT_DIR: &str = "dist/corpus";

/// Default per-operation deadline (15 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 15 * 60 * 1000;

/// Main configuration structure for a Sumi-Harvest job
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub job: JobConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Creates a configuration with every optional setting at its default
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            job: JobConfig::new(name),
            store: StoreConfig::default(),
        }
    }
}

/// Per-job behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Job name, also used to derive the default checkpoint file name
    pub name: String,

    /// Explicit checkpoint file; derived from `checkpoint_dir` when absent
    #[serde(rename = "checkpoint-file-path", default)]
    pub checkpoint_file_path: Option<PathBuf>,

    #[serde(rename = "checkpoint-dir", default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Root directory for serialized content
    #[serde(rename = "output-dir", default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Deadline applied to every discovery call, handler and secondary step (milliseconds)
    #[serde(rename = "timeout-ms", default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Select every checkpoint regardless of completion
    #[serde(rename = "force-all", default)]
    pub force_all: bool,

    /// Select only these checkpoint ids regardless of completion
    #[serde(rename = "force-checkpoint-id", default)]
    pub force_checkpoint_id: Vec<String>,

    /// Re-run discovery even for checkpoints that already have subtasks
    #[serde(rename = "force-rediscovery", default)]
    pub force_rediscovery: bool,

    /// Do not ask the source for its item list when the store already has records
    #[serde(rename = "skip-initial-sync", default)]
    pub skip_initial_sync: bool,

    /// File extension for alternate (plain-text) content
    #[serde(rename = "alternate-extension", default = "default_alternate_extension")]
    pub alternate_extension: String,
}

impl JobConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checkpoint_file_path: None,
            checkpoint_dir: default_checkpoint_dir(),
            output_dir: default_output_dir(),
            timeout_ms: default_timeout_ms(),
            force_all: false,
            force_checkpoint_id: Vec::new(),
            force_rediscovery: false,
            skip_initial_sync: false,
            alternate_extension: default_alternate_extension(),
        }
    }

    /// The checkpoint file this job reads and writes
    pub fn checkpoint_path(&self) -> PathBuf {
        match &self.checkpoint_file_path {
            Some(path) => path.clone(),
            None => self
                .checkpoint_dir
                .join(format!("{}-checkpoint.json", self.name)),
        }
    }

    /// Returns true if selection ignores the completion filter
    pub fn is_forced(&self) -> bool {
        self.force_all || !self.force_checkpoint_id.is_empty()
    }
}

/// Checkpoint store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Retries after the first failed lock attempt
    #[serde(rename = "lock-retries", default = "default_lock_retries")]
    pub lock_retries: u32,

    #[serde(rename = "lock-min-backoff-ms", default = "default_lock_min_backoff_ms")]
    pub lock_min_backoff_ms: u64,

    #[serde(rename = "lock-max-backoff-ms", default = "default_lock_max_backoff_ms")]
    pub lock_max_backoff_ms: u64,

    /// Age after which a lock file is presumed abandoned (milliseconds)
    #[serde(rename = "lock-stale-ms", default = "default_lock_stale_ms")]
    pub lock_stale_ms: u64,

    /// What to do with a checkpoint file that is not valid JSON
    #[serde(rename = "on-corrupt", default)]
    pub on_corrupt: CorruptionPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_retries: default_lock_retries(),
            lock_min_backoff_ms: default_lock_min_backoff_ms(),
            lock_max_backoff_ms: default_lock_max_backoff_ms(),
            lock_stale_ms: default_lock_stale_ms(),
            on_corrupt: CorruptionPolicy::default(),
        }
    }
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CHECKPOINT_DIR)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_alternate_extension() -> String {
    "md".to_string()
}

fn default_lock_retries() -> u32 {
    10
}

fn default_lock_min_backoff_ms() -> u64 {
    100
}

fn default_lock_max_backoff_ms() -> u64 {
    2000
}

fn default_lock_stale_ms() -> u64 {
    10_000
}
