//! Candidate selection policy
//!
//! A `CandidatePolicy` bundles the filter and ordering applied to records at
//! the start of a run, plus the optional subtask filter and ordering applied
//! when a record is processed. The force options in `JobConfig` override the
//! record filter (never the ordering).

pub mod filter;
pub mod sort;

pub use filter::{RecordFilter, SubtaskFilter};
pub use sort::{Direction, RecordOrder, SubtaskOrder};

use crate::checkpoint::{CheckpointRecord, SubtaskRecord};
use std::collections::HashSet;
use std::fmt;

/// How a job picks and orders its work
#[derive(Clone)]
pub struct CandidatePolicy {
    filter: RecordFilter,
    order: RecordOrder,
    subtask_filter: Option<SubtaskFilter>,
    subtask_order: Option<SubtaskOrder>,
}

impl Default for CandidatePolicy {
    fn default() -> Self {
        Self {
            filter: filter::incomplete(),
            order: sort::default_order(),
            subtask_filter: None,
            subtask_order: None,
        }
    }
}

impl fmt::Debug for CandidatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidatePolicy")
            .field("subtask_filter", &self.subtask_filter.is_some())
            .field("subtask_order", &self.subtask_order.is_some())
            .finish_non_exhaustive()
    }
}

impl CandidatePolicy {
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: RecordOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_subtask_filter(mut self, filter: SubtaskFilter) -> Self {
        self.subtask_filter = Some(filter);
        self
    }

    pub fn with_subtask_order(mut self, order: SubtaskOrder) -> Self {
        self.subtask_order = Some(order);
        self
    }

    /// Picks and orders the records to process this run
    ///
    /// `force_all` takes every record. Otherwise a non-empty `force_ids`
    /// takes exactly the records with those ids. Otherwise the configured
    /// filter decides. Completion is ignored whenever a force option applies.
    pub fn select(
        &self,
        records: Vec<CheckpointRecord>,
        force_all: bool,
        force_ids: &[String],
    ) -> Vec<CheckpointRecord> {
        let mut selected: Vec<CheckpointRecord> = if force_all {
            records
        } else if !force_ids.is_empty() {
            let wanted: HashSet<&str> = force_ids.iter().map(String::as_str).collect();
            let selected: Vec<_> = records
                .into_iter()
                .filter(|r| wanted.contains(r.id.as_str()))
                .collect();
            if selected.len() < wanted.len() {
                tracing::warn!(
                    "{} forced checkpoint id(s) not present in the checkpoint file",
                    wanted.len() - selected.len()
                );
            }
            selected
        } else {
            records.into_iter().filter(|r| (self.filter)(r)).collect()
        };

        selected.sort_by(|a, b| (self.order)(a, b));
        selected
    }

    /// Picks and orders the subtasks of `parent` to process
    ///
    /// Without a configured subtask filter, incomplete subtasks are taken, or
    /// all of them when `forced`. Undiscovered records yield nothing.
    pub fn select_subtasks(&self, parent: &CheckpointRecord, forced: bool) -> Vec<SubtaskRecord> {
        let Some(subtasks) = parent.subtasks.as_ref() else {
            return Vec::new();
        };

        let mut selected: Vec<SubtaskRecord> = subtasks
            .iter()
            .filter(|s| match &self.subtask_filter {
                Some(filter) => filter(parent, s),
                None => forced || !s.completed,
            })
            .cloned()
            .collect();

        if let Some(order) = &self.subtask_order {
            selected.sort_by(|a, b| order(a, b));
        }
        selected
    }
}
