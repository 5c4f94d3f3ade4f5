//! Statistics generation from a checkpoint file
//!
//! This module provides functionality for summarizing job progress from the
//! records in a checkpoint file.

use crate::checkpoint::CheckpointRecord;
use crate::state::UnitState;
use std::collections::HashMap;

/// Checkpoint progress summary
#[derive(Debug, Clone, Default)]
pub struct CheckpointStatistics {
    /// Total number of checkpoint records
    pub total: u64,

    /// Count of records by lifecycle state
    pub records_by_state: HashMap<UnitState, u64>,

    /// Total number of discovered subtasks
    pub subtasks_total: u64,

    pub subtasks_completed: u64,

    /// Ids of records not yet complete, in file order
    pub incomplete_ids: Vec<String>,
}

impl CheckpointStatistics {
    pub fn count(&self, state: UnitState) -> u64 {
        self.records_by_state.get(&state).copied().unwrap_or(0)
    }

    pub fn completed(&self) -> u64 {
        self.count(UnitState::Complete)
    }

    /// Records whose subtasks have not been discovered yet
    pub fn awaiting_discovery(&self) -> u64 {
        self.count(UnitState::Pending)
    }

    /// Records with discovered subtasks that are not all complete
    pub fn active(&self) -> u64 {
        self.count(UnitState::Active)
    }
}

/// Computes statistics over checkpoint records
pub fn load_statistics(records: &[CheckpointRecord]) -> CheckpointStatistics {
    let mut stats = CheckpointStatistics::default();

    for record in records {
        stats.total += 1;
        *stats.records_by_state.entry(record.state()).or_insert(0) += 1;

        if let Some(subtasks) = &record.subtasks {
            stats.subtasks_total += subtasks.len() as u64;
            stats.subtasks_completed += subtasks.iter().filter(|s| s.completed).count() as u64;
        }

        if !record.completed {
            stats.incomplete_ids.push(record.id.clone());
        }
    }

    stats
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &CheckpointStatistics) {
    println!("=== Checkpoint Statistics ===\n");

    println!("Overview:");
    println!("  Total checkpoints: {}", stats.total);
    println!("  Completed: {}", stats.completed());
    println!("  Awaiting discovery: {}", stats.awaiting_discovery());
    println!("  In progress: {}", stats.active());
    println!();

    println!("Subtasks:");
    println!(
        "  {} / {} completed",
        stats.subtasks_completed, stats.subtasks_total
    );
    println!();

    if !stats.incomplete_ids.is_empty() {
        println!("Incomplete Checkpoints ({}):", stats.incomplete_ids.len());
        for id in stats.incomplete_ids.iter().take(20) {
            println!("  - {}", id);
        }
        if stats.incomplete_ids.len() > 20 {
            println!("  ... and {} more", stats.incomplete_ids.len() - 20);
        }
        println!();
    }

    let completion_rate = if stats.total > 0 {
        (stats.completed() as f64 / stats.total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Completion Rate: {:.1}% ({} / {} checkpoints complete)",
        completion_rate,
        stats.completed(),
        stats.total
    );
}
