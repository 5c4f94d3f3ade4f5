//! Content writer for serialized handler output
//!
//! Files land under the job's output directory at a path chosen by an
//! `OutputPathFn`. Writes go through a temp file in the target directory that
//! is renamed into place, so a crash never leaves a half-written file behind.

use crate::crawler::SubtaskContext;
use crate::HarvestError;
use sanitize_filename::Options;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Maps a subtask and its output naming to a path relative to the output root
pub type OutputPathFn =
    Arc<dyn Fn(&SubtaskContext, &str, Option<&str>) -> PathBuf + Send + Sync>;

/// Writes handler output below a root directory
#[derive(Clone)]
pub struct OutputWriter {
    root: PathBuf,
    path_fn: OutputPathFn,
}

impl std::fmt::Debug for OutputWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputWriter")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl OutputWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_fn: Arc::new(default_layout),
        }
    }

    pub fn with_path_fn(mut self, path_fn: OutputPathFn) -> Self {
        self.path_fn = path_fn;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path an output would be written to
    pub fn path_for(&self, ctx: &SubtaskContext, extension: &str, suffix: Option<&str>) -> PathBuf {
        self.root.join((self.path_fn)(ctx, extension, suffix))
    }

    /// Writes `content` to a path already resolved with `path_for`
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The file is in place
    /// * `Err(HarvestError::Output)` - The file or its directory could not be written
    pub fn write_at(&self, path: &Path, content: &[u8]) -> crate::Result<()> {
        write_atomic(path, content).map_err(|source| HarvestError::Output {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(())
    }
}

/// `{checkpoint id}/{subtask id}[_{suffix}].{extension}`, each segment sanitized
pub fn default_layout(ctx: &SubtaskContext, extension: &str, suffix: Option<&str>) -> PathBuf {
    let stem = match suffix {
        Some(suffix) => format!("{}_{}", ctx.subtask.id, suffix),
        None => ctx.subtask.id.clone(),
    };

    PathBuf::from(sanitize_segment(&ctx.parent.id)).join(format!(
        "{}.{}",
        sanitize_segment(&stem),
        sanitize_segment(extension)
    ))
}

/// Longest segment kept before the disambiguating hash, in bytes
const MAX_SEGMENT_BYTES: usize = 180;

/// Makes a string safe to use as (part of) a single path segment
///
/// Names that are already safe pass through unchanged. Anything else is
/// cleaned, cut to a bounded length and suffixed with a short hash of the
/// original, so two different names never end up as the same file.
pub fn sanitize_segment(name: &str) -> String {
    let options = Options {
        truncate: false,
        windows: true,
        replacement: "_",
    };
    let mut sanitized = sanitize_filename::sanitize_with_options(name, options);
    if sanitized == name && !name.is_empty() && name.len() <= MAX_SEGMENT_BYTES {
        return sanitized;
    }

    let mut cut = sanitized.len().min(MAX_SEGMENT_BYTES);
    while !sanitized.is_char_boundary(cut) {
        cut -= 1;
    }
    sanitized.truncate(cut);
    if sanitized.is_empty() {
        sanitized.push('_');
    }

    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    format!("{}-{}", sanitized, &digest[..8])
}

fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
