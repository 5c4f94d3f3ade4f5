//! File-based lock guarding the checkpoint file
//!
//! The lock is a sidecar file (`<checkpoint>.lock`) created with
//! `create_new`, so only one process can hold it at a time. The holder writes
//! its pid, a unique token and a timestamp into it, and keeps touching it
//! while held. A lock file that has not been touched within the stale
//! threshold is presumed abandoned by a crashed holder and is reclaimed.
//! Only the holder whose token is in the file ever removes it.
//!
//! Advisory only: every process touching the checkpoint file must go through
//! `CheckpointStore` for this to mean anything.

use crate::config::StoreConfig;
use crate::storage::{StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;

/// Retry and staleness parameters for acquiring a `CheckpointLock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Retries after the first failed attempt
    pub retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    /// Age after which an existing lock file is considered abandoned
    pub stale_after: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            min_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
            stale_after: Duration::from_secs(10),
        }
    }
}

impl LockPolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            retries: config.lock_retries,
            min_backoff: Duration::from_millis(config.lock_min_backoff_ms),
            max_backoff: Duration::from_millis(config.lock_max_backoff_ms),
            stale_after: Duration::from_millis(config.lock_stale_ms),
        }
    }

    /// Delay before retry number `attempt` (zero-based), doubling up to the cap
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.min_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Exclusive lock on a checkpoint file, released on drop
///
/// While held, a background task refreshes the lock file's mtime so a slow
/// holder is never mistaken for a crashed one.
#[derive(Debug)]
pub struct CheckpointLock {
    lock_path: PathBuf,
    token: String,
    held: bool,
    heartbeat: Option<JoinHandle<()>>,
}

impl CheckpointLock {
    /// Path of the sidecar lock file for a checkpoint file
    pub fn lock_path_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Acquires the lock for `path`, backing off exponentially between attempts
    ///
    /// # Returns
    ///
    /// * `Ok(CheckpointLock)` - The lock is held until the guard is dropped
    /// * `Err(StorageError::Lock)` - Still held elsewhere after all retries
    /// * `Err(StorageError::Io)` - The lock file could not be created
    pub async fn acquire(path: &Path, policy: &LockPolicy) -> StorageResult<Self> {
        let lock_path = Self::lock_path_for(path);
        let token = new_token();
        let mut attempt = 0;

        loop {
            if try_create(&lock_path, &token, policy.stale_after, true)? {
                let heartbeat = spawn_heartbeat(
                    lock_path.clone(),
                    token.clone(),
                    heartbeat_interval(policy.stale_after),
                );
                return Ok(Self {
                    lock_path,
                    token,
                    held: true,
                    heartbeat: Some(heartbeat),
                });
            }

            if attempt >= policy.retries {
                return Err(StorageError::Lock {
                    path: path.to_path_buf(),
                    attempts: attempt + 1,
                });
            }

            let delay = policy.backoff(attempt);
            tracing::trace!(
                "Checkpoint lock {} busy, retrying in {:?}",
                lock_path.display(),
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Removes the lock file if it still carries our token
    ///
    /// A lock that was reclaimed from us belongs to someone else now and is
    /// left alone.
    fn release_inner(&mut self) {
        if !self.held {
            return;
        }
        self.held = false;
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }

        if !owns(&self.lock_path, &self.token) {
            tracing::warn!(
                "Checkpoint lock {} was reclaimed by another holder, leaving it in place",
                self.lock_path.display()
            );
            return;
        }

        let aside = aside_path(&self.lock_path, &self.token);
        if let Err(e) = fs::rename(&self.lock_path, &aside) {
            tracing::warn!(
                "Failed to remove checkpoint lock {}: {}",
                self.lock_path.display(),
                e
            );
            return;
        }

        // Replaced between the ownership check and the rename
        if !owns(&aside, &self.token) {
            restore(&aside, &self.lock_path);
        }
        fs::remove_file(&aside).ok();
    }
}

impl Drop for CheckpointLock {
    fn drop(&mut self) {
        self.release_inner();
    }
}

static LOCK_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique per acquisition, across processes and within one
fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let sequence = LOCK_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", std::process::id(), nanos, sequence)
}

/// Tries to create the lock file once, reclaiming it first if it is stale
///
/// Returns `Ok(false)` while another live holder has it.
fn try_create(
    lock_path: &Path,
    token: &str,
    stale_after: Duration,
    reclaim: bool,
) -> io::Result<bool> {
    match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(mut file) => {
            let pid = std::process::id();
            let timestamp = chrono::Utc::now().to_rfc3339();
            writeln!(file, "pid={pid}")?;
            writeln!(file, "token={token}")?;
            writeln!(file, "timestamp={timestamp}")?;
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            if reclaim && is_stale(lock_path, stale_after)? {
                reclaim_stale(lock_path, token, stale_after)?;
                try_create(lock_path, token, stale_after, false)
            } else {
                Ok(false)
            }
        }
        Err(e) => Err(e),
    }
}

/// Moves a stale lock aside and deletes it
///
/// The staleness check is repeated on the moved file: if a live holder
/// refreshed or replaced the lock in the meantime, it is put back.
fn reclaim_stale(lock_path: &Path, token: &str, stale_after: Duration) -> io::Result<()> {
    let aside = aside_path(lock_path, token);
    match fs::rename(lock_path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }

    if is_stale(&aside, stale_after)? {
        tracing::warn!("Reclaiming stale checkpoint lock {}", lock_path.display());
    } else {
        restore(&aside, lock_path);
    }
    fs::remove_file(&aside).ok();
    Ok(())
}

/// Puts a lock file moved aside back in place, unless a new one took its place
fn restore(aside: &Path, lock_path: &Path) {
    if let Err(e) = fs::hard_link(aside, lock_path) {
        tracing::warn!(
            "Failed to restore checkpoint lock {}: {}",
            lock_path.display(),
            e
        );
    }
}

fn aside_path(lock_path: &Path, token: &str) -> PathBuf {
    let mut name = lock_path.as_os_str().to_os_string();
    name.push(format!(".{token}"));
    PathBuf::from(name)
}

/// Checks whether an existing lock file is older than `stale_after`
fn is_stale(lock_path: &Path, stale_after: Duration) -> io::Result<bool> {
    let modified = match fs::metadata(lock_path) {
        Ok(metadata) => metadata.modified()?,
        // Released between our create attempt and now
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Ok(age > stale_after)
}

fn read_token(lock_path: &Path) -> io::Result<Option<String>> {
    let content = fs::read_to_string(lock_path)?;
    Ok(content
        .lines()
        .find_map(|line| line.strip_prefix("token="))
        .map(str::to_string))
}

fn owns(lock_path: &Path, token: &str) -> bool {
    matches!(read_token(lock_path), Ok(Some(current)) if current == token)
}

fn heartbeat_interval(stale_after: Duration) -> Duration {
    (stale_after / 3).max(Duration::from_millis(1))
}

/// Keeps the lock file fresh until aborted or until the lock is lost
fn spawn_heartbeat(lock_path: PathBuf, token: String, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            if !owns(&lock_path, &token) {
                tracing::warn!("Lost checkpoint lock {}", lock_path.display());
                break;
            }
            let touched = OpenOptions::new()
                .append(true)
                .open(&lock_path)
                .and_then(|file| file.set_modified(SystemTime::now()));
            if let Err(e) = touched {
                tracing::warn!(
                    "Failed to refresh checkpoint lock {}: {}",
                    lock_path.display(),
                    e
                );
            }
        }
    })
}
