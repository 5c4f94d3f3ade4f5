//! Candidate ordering
//!
//! Comparators are applied with a stable sort, so records that compare equal
//! keep their checkpoint file order.

use crate::checkpoint::{CheckpointRecord, Params, SubtaskRecord};
use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;

/// Comparator over top-level records
pub type RecordOrder = Arc<dyn Fn(&CheckpointRecord, &CheckpointRecord) -> Ordering + Send + Sync>;

/// Comparator over subtasks of one record
pub type SubtaskOrder = Arc<dyn Fn(&SubtaskRecord, &SubtaskRecord) -> Ordering + Send + Sync>;

pub const MANUAL_REVIEW_KEY: &str = "requiresManualCheck";
pub const DOCUMENT_NUMBER_KEY: &str = "documentNumber";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Orders records needing manual review after the rest, then by a numeric key
///
/// `params[review_key] == true` marks a record for manual review. The number
/// may be a JSON number or a numeric string; records without a usable number
/// go last regardless of direction.
pub fn manual_review_last(
    review_key: impl Into<String>,
    number_key: impl Into<String>,
    direction: Direction,
) -> RecordOrder {
    let review_key = review_key.into();
    let number_key = number_key.into();

    Arc::new(move |a: &CheckpointRecord, b: &CheckpointRecord| {
        needs_review(&a.params, &review_key)
            .cmp(&needs_review(&b.params, &review_key))
            .then_with(|| {
                compare_numbers(
                    numeric_param(&a.params, &number_key),
                    numeric_param(&b.params, &number_key),
                    direction,
                )
            })
    })
}

/// The comparator used when a job configures none
pub fn default_order() -> RecordOrder {
    manual_review_last(MANUAL_REVIEW_KEY, DOCUMENT_NUMBER_KEY, Direction::Ascending)
}

/// Orders subtasks by a numeric params key
pub fn by_subtask_number(number_key: impl Into<String>, direction: Direction) -> SubtaskOrder {
    let number_key = number_key.into();
    Arc::new(move |a: &SubtaskRecord, b: &SubtaskRecord| {
        compare_numbers(
            numeric_param(&a.params, &number_key),
            numeric_param(&b.params, &number_key),
            direction,
        )
    })
}

fn needs_review(params: &Params, key: &str) -> bool {
    matches!(params.get(key), Some(Value::Bool(true)))
}

fn numeric_param(params: &Params, key: &str) -> Option<f64> {
    match params.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

fn compare_numbers(a: Option<f64>, b: Option<f64>, direction: Direction) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match direction {
            Direction::Ascending => a.total_cmp(&b),
            Direction::Descending => b.total_cmp(&a),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
