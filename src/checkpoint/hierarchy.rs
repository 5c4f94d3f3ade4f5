//! Initialization and discovery protocol for the two-level hierarchy
//!
//! These functions only touch in-memory lists. The store calls them inside a
//! locked read-modify-write so they always operate on the freshest on-disk
//! state.

use crate::checkpoint::{CheckpointRecord, SubtaskRecord};
use std::collections::HashSet;

/// Appends a fresh record for every item whose id is not already present
///
/// Ids already in `existing` are left untouched (their completion and
/// subtasks survive), and duplicate ids within `items` keep the first
/// occurrence.
///
/// # Returns
///
/// The number of records appended
pub fn initialize<T, K, F>(existing: &mut Vec<CheckpointRecord<T, K>>, items: Vec<T>, id_of: F) -> usize
where
    F: Fn(&T) -> String,
{
    let mut known: HashSet<String> = existing.iter().map(|r| r.id.clone()).collect();
    let mut appended = 0;

    for item in items {
        let id = id_of(&item);
        if !known.insert(id.clone()) {
            tracing::trace!("Checkpoint {} already present, skipping", id);
            continue;
        }
        existing.push(CheckpointRecord::new(id, item));
        appended += 1;
    }

    appended
}

/// Wraps discovered subtask items as fresh, incomplete subtask records
///
/// Duplicate ids keep their first occurrence; later ones are logged and
/// dropped so a parent never holds two subtasks with the same id.
pub fn build_subtasks<T, K, F>(
    parent: &CheckpointRecord<T, K>,
    items: Vec<K>,
    id_of: F,
) -> Vec<SubtaskRecord<K>>
where
    F: Fn(&CheckpointRecord<T, K>, &K) -> String,
{
    let mut seen = HashSet::new();
    let mut subtasks = Vec::with_capacity(items.len());

    for item in items {
        let id = id_of(parent, &item);
        if !seen.insert(id.clone()) {
            tracing::warn!(
                checkpoint_id = %parent.id,
                subtask_id = %id,
                "Discovery returned a duplicate subtask id, keeping the first"
            );
            continue;
        }
        subtasks.push(SubtaskRecord::new(id, item));
    }

    subtasks
}

/// Attaches discovered subtasks to a record
///
/// An undiscovered record simply takes the new list. When `force` is set and
/// the record already has subtasks, the lists are merged by id: existing
/// subtasks keep their completion flag and position, new ids are appended,
/// and ids the collaborator no longer reports are kept.
///
/// # Returns
///
/// True if the record changed
pub fn attach_subtasks<T, K>(
    record: &mut CheckpointRecord<T, K>,
    discovered: Vec<SubtaskRecord<K>>,
    force: bool,
) -> bool {
    match record.subtasks.as_mut() {
        None => {
            record.subtasks = Some(discovered);
            true
        }
        Some(_) if !force => false,
        Some(current) => {
            let known: HashSet<String> = current.iter().map(|s| s.id.clone()).collect();
            let before = current.len();
            current.extend(discovered.into_iter().filter(|s| !known.contains(&s.id)));
            current.len() != before
        }
    }
}
