//! Candidate filters
//!
//! Filters decide which records are eligible for processing in a run. They
//! only look at the completion flag and at params keys the caller names, so
//! the params payload stays opaque to the engine.

use crate::checkpoint::{CheckpointRecord, Params, SubtaskRecord};
use serde_json::Value;
use std::sync::Arc;

/// Predicate over top-level records
pub type RecordFilter = Arc<dyn Fn(&CheckpointRecord) -> bool + Send + Sync>;

/// Predicate over subtasks of one record
pub type SubtaskFilter = Arc<dyn Fn(&CheckpointRecord, &SubtaskRecord) -> bool + Send + Sync>;

/// Params key marking documents whose content is split into chapters
pub const HAS_CHAPTERS_KEY: &str = "hasChapters";

/// Selects records that are not yet complete
pub fn incomplete() -> RecordFilter {
    Arc::new(|record: &CheckpointRecord| !record.completed)
}

/// Selects incomplete records flagged as having chapters
pub fn with_chapters() -> RecordFilter {
    Arc::new(|record: &CheckpointRecord| !record.completed && has_chapters(&record.params))
}

/// Selects incomplete records that are a single resource
pub fn without_chapters() -> RecordFilter {
    Arc::new(|record: &CheckpointRecord| !record.completed && !has_chapters(&record.params))
}

/// Selects incomplete records whose `params[key]` equals `value`
pub fn param_equals(key: impl Into<String>, value: Value) -> RecordFilter {
    let key = key.into();
    Arc::new(move |record: &CheckpointRecord| {
        !record.completed && record.params.get(&key) == Some(&value)
    })
}

/// Selects subtasks that are not yet complete
pub fn incomplete_subtasks() -> SubtaskFilter {
    Arc::new(|_: &CheckpointRecord, subtask: &SubtaskRecord| !subtask.completed)
}

fn has_chapters(params: &Params) -> bool {
    matches!(params.get(HAS_CHAPTERS_KEY), Some(Value::Bool(true)))
}
