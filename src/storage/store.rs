//! JSON checkpoint store
//!
//! The whole record list lives in one pretty-printed JSON array. Every
//! mutation re-reads the file, changes it in memory and rewrites the full list
//! through a temp file that is renamed over the original, all while holding
//! the checkpoint lock. A reader taking the lock therefore never sees a
//! half-applied change.
//!
//! Reads never modify the file. An unreadable file is only moved aside by a
//! mutation, while it holds the lock.

use crate::checkpoint::{self, CheckpointRecord, Params, SubtaskRecord};
use crate::config::StoreConfig;
use crate::storage::{CheckpointLock, CorruptionPolicy, LockPolicy, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Durable, lock-guarded list of checkpoint records
#[derive(Debug, Clone)]
pub struct CheckpointStore<T = Params, K = Params> {
    path: PathBuf,
    lock_policy: LockPolicy,
    on_corrupt: CorruptionPolicy,
    _records: PhantomData<fn() -> (T, K)>,
}

impl<T, K> CheckpointStore<T, K>
where
    T: Serialize + DeserializeOwned,
    K: Serialize + DeserializeOwned,
{
    /// Creates a store for the checkpoint file at `path`
    ///
    /// Nothing touches the filesystem until `ensure` or the first read.
    pub fn new(path: impl Into<PathBuf>, config: &StoreConfig) -> Self {
        Self {
            path: path.into(),
            lock_policy: LockPolicy::from_config(config),
            on_corrupt: config.on_corrupt,
            _records: PhantomData,
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the parent directory and an empty checkpoint list if missing
    ///
    /// Safe to call repeatedly; an existing file is never touched.
    pub fn ensure(&self) -> StorageResult<()> {
        if let Some(dir) = self.parent_dir() {
            fs::create_dir_all(dir)?;
        }

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                file.write_all(b"[]")?;
                tracing::info!("Created checkpoint file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every record under the checkpoint lock
    ///
    /// If the lock cannot be obtained the file is read without it. Such a read
    /// may be slightly stale, which is harmless for candidate selection since
    /// completion flags only ever move forward.
    pub async fn read_all(&self) -> StorageResult<Vec<CheckpointRecord<T, K>>> {
        match CheckpointLock::acquire(&self.path, &self.lock_policy).await {
            Ok(_lock) => self.load(LoadMode::ReadOnly),
            Err(e) => {
                tracing::warn!(
                    "Reading {} without lock: {}",
                    self.path.display(),
                    e
                );
                self.load(LoadMode::ReadOnly)
            }
        }
    }

    /// Replaces the whole file with `records` under the checkpoint lock
    ///
    /// An unreadable file is moved aside first under the quarantine policy;
    /// the other policies overwrite it.
    pub async fn write_all(&self, records: &[CheckpointRecord<T, K>]) -> StorageResult<()> {
        let _lock = CheckpointLock::acquire(&self.path, &self.lock_policy).await?;
        if self.on_corrupt == CorruptionPolicy::Quarantine {
            self.load(LoadMode::Locked)?;
        }
        self.persist(records)
    }

    /// Atomic read-modify-write
    ///
    /// The lock is held from the re-read of the current file until the
    /// rewrite finishes. `f` returns its result and whether it changed
    /// anything; unchanged lists are not rewritten.
    pub async fn update<R, F>(&self, f: F) -> StorageResult<R>
    where
        F: FnOnce(&mut Vec<CheckpointRecord<T, K>>) -> (R, bool),
    {
        let _lock = CheckpointLock::acquire(&self.path, &self.lock_policy).await?;
        let mut records = self.load(LoadMode::Locked)?;
        let (result, changed) = f(&mut records);
        if changed {
            self.persist(&records)?;
        }
        Ok(result)
    }

    /// Looks up one record by id in the current file
    pub async fn find(&self, id: &str) -> StorageResult<Option<CheckpointRecord<T, K>>> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    /// Appends records for items whose ids are not yet present
    ///
    /// # Returns
    ///
    /// The number of records appended
    pub async fn initialize<F>(&self, items: Vec<T>, id_of: F) -> StorageResult<usize>
    where
        F: Fn(&T) -> String,
    {
        self.update(|records| {
            let appended = checkpoint::initialize(records, items, id_of);
            (appended, appended > 0)
        })
        .await
    }

    /// Stores discovered subtasks on the record `parent_id`
    ///
    /// The freshly read file is merged rather than overwritten with a stale
    /// copy, so updates other processes made since discovery started survive.
    ///
    /// # Returns
    ///
    /// The record as persisted, or `None` if `parent_id` is not in the file
    pub async fn attach_subtasks(
        &self,
        parent_id: &str,
        subtasks: Vec<SubtaskRecord<K>>,
        force: bool,
    ) -> StorageResult<Option<CheckpointRecord<T, K>>>
    where
        T: Clone,
        K: Clone,
    {
        self.update(|records| match records.iter_mut().find(|r| r.id == parent_id) {
            Some(record) => {
                let changed = checkpoint::attach_subtasks(record, subtasks, force);
                (Some(record.clone()), changed)
            }
            None => {
                tracing::error!(
                    "Checkpoint with id {} not found while attaching subtasks",
                    parent_id
                );
                (None, false)
            }
        })
        .await
    }

    /// Sets the `completed` flag of a top-level record
    ///
    /// A missing id is logged and nothing is written. Completion never goes
    /// backwards: clearing the flag of a completed record is refused.
    ///
    /// # Returns
    ///
    /// True if the file was rewritten
    pub async fn set_completed(&self, id: &str, value: bool) -> StorageResult<bool> {
        self.update(|records| match records.iter_mut().find(|r| r.id == id) {
            Some(record) => apply_completion(&mut record.completed, value, id),
            None => {
                tracing::error!("Checkpoint with id {} not found in saved checkpoints", id);
                (false, false)
            }
        })
        .await
    }

    /// Sets the `completed` flag of one subtask
    ///
    /// Same rules as `set_completed`.
    pub async fn set_subtask_completed(
        &self,
        parent_id: &str,
        subtask_id: &str,
        value: bool,
    ) -> StorageResult<bool> {
        self.update(|records| {
            let Some(parent) = records.iter_mut().find(|r| r.id == parent_id) else {
                tracing::error!(
                    "Parent checkpoint with id {} not found in saved checkpoints",
                    parent_id
                );
                return (false, false);
            };

            match parent.find_subtask_mut(subtask_id) {
                Some(subtask) => apply_completion(&mut subtask.completed, value, subtask_id),
                None => {
                    tracing::error!(
                        "Subtask with id {} not found in parent checkpoint {}",
                        subtask_id,
                        parent_id
                    );
                    (false, false)
                }
            }
        })
        .await
    }

    fn parent_dir(&self) -> Option<&Path> {
        self.path.parent().filter(|p| !p.as_os_str().is_empty())
    }

    /// Reads and parses the file; the caller decides whether it holds the lock
    fn load(&self, mode: LoadMode) -> StorageResult<Vec<CheckpointRecord<T, K>>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&content) {
            Ok(records) => Ok(records),
            Err(e) => self.recover_from_corruption(e, mode),
        }
    }

    fn recover_from_corruption(
        &self,
        error: serde_json::Error,
        mode: LoadMode,
    ) -> StorageResult<Vec<CheckpointRecord<T, K>>> {
        match (self.on_corrupt, mode) {
            (CorruptionPolicy::Abort, _) => Err(StorageError::Corrupt {
                path: self.path.clone(),
                source: error,
            }),
            (CorruptionPolicy::Quarantine, LoadMode::ReadOnly) => {
                tracing::error!(
                    "Checkpoint file {} is unreadable ({}), reading it as empty until the next write moves it aside",
                    self.path.display(),
                    error
                );
                Ok(Vec::new())
            }
            (CorruptionPolicy::Reset, _) => {
                tracing::error!(
                    "Checkpoint file {} is unreadable ({}), starting from an empty list",
                    self.path.display(),
                    error
                );
                Ok(Vec::new())
            }
            (CorruptionPolicy::Quarantine, LoadMode::Locked) => {
                let backup = self.quarantine_path();
                fs::rename(&self.path, &backup)?;
                self.persist(&[])?;
                tracing::error!(
                    "Checkpoint file {} is unreadable ({}), moved to {} and starting from an empty list",
                    self.path.display(),
                    error,
                    backup.display()
                );
                Ok(Vec::new())
            }
        }
    }

    fn quarantine_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".corrupt-{stamp}"));
        PathBuf::from(name)
    }

    /// Writes the full list to a temp file and renames it over the checkpoint
    fn persist(&self, records: &[CheckpointRecord<T, K>]) -> StorageResult<()> {
        let json = serde_json::to_string_pretty(records)?;
        let dir = self.parent_dir().unwrap_or_else(|| Path::new("."));

        let mut temp_file = NamedTempFile::new_in(dir)?;
        temp_file.write_all(json.as_bytes())?;
        temp_file.flush()?;
        temp_file.persist(&self.path)?;

        tracing::debug!(
            "Wrote {} checkpoints to {}",
            records.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Whether a load happens under the checkpoint lock on behalf of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    ReadOnly,
    Locked,
}

/// Applies a completion change to one flag, refusing to move it backwards
///
/// Returns `(written, changed)` for `CheckpointStore::update`.
fn apply_completion(flag: &mut bool, value: bool, id: &str) -> (bool, bool) {
    if *flag == value {
        return (false, false);
    }
    if *flag && !value {
        tracing::warn!("Refusing to mark completed checkpoint {} as incomplete", id);
        return (false, false);
    }
    *flag = value;
    (true, true)
}
