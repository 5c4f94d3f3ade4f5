//! Output module for writing extracted content and reporting progress
//!
//! This module handles:
//! - Writing serialized handler output under the job's output directory
//! - Summarizing checkpoint progress for display

pub mod stats;
mod writer;

pub use stats::{load_statistics, print_statistics, CheckpointStatistics};
pub use writer::{default_layout, sanitize_segment, OutputPathFn, OutputWriter};
