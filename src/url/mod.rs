//! Locator handling for Sumi-Harvest
//!
//! Sources that key their subtasks by URL use these helpers so the same page
//! always maps to the same subtask id, however the site happened to spell the
//! link on a given day.

mod normalize;

pub use normalize::{normalize_locator, subtask_id_from_href};

use thiserror::Error;

/// Locator-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("Unsupported scheme: {0}")]
    InvalidScheme(String),

    #[error("URL has no host")]
    MissingHost,
}
