//! Persisted record shapes
//!
//! The field order of these structs is the field order of the checkpoint
//! file, so reordering them changes the bytes written to disk.

use crate::state::UnitState;
use serde::{Deserialize, Serialize};

/// Opaque payload attached to a record
///
/// The engine never interprets params beyond the optional sort/filter keys a
/// policy asks for; site collaborators own their shape.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Persisted state for one top-level unit of work (a document)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord<T = Params, K = Params> {
    /// Caller-derived id, unique within the checkpoint file
    pub id: String,

    /// Set once every subtask has completed; never reset
    pub completed: bool,

    pub params: T,

    /// `None` until discovery has run. An empty list means discovery found
    /// nothing, which is different from not having looked.
    pub subtasks: Option<Vec<SubtaskRecord<K>>>,
}

/// Persisted state for one discovered sub-unit (a chapter or page)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskRecord<K = Params> {
    /// Derived from the subtask's natural key, unique within its parent
    pub id: String,

    pub completed: bool,

    pub params: K,
}

impl<T, K> CheckpointRecord<T, K> {
    /// Creates a fresh record that has not been discovered yet
    pub fn new(id: impl Into<String>, params: T) -> Self {
        Self {
            id: id.into(),
            completed: false,
            params,
            subtasks: None,
        }
    }

    /// Returns true if discovery has run for this record
    pub fn is_discovered(&self) -> bool {
        self.subtasks.is_some()
    }

    /// Returns true if every known subtask is complete
    ///
    /// A record with an empty subtask list is trivially complete; one that has
    /// not been discovered is not.
    pub fn all_subtasks_completed(&self) -> bool {
        match &self.subtasks {
            Some(subtasks) => subtasks.iter().all(|s| s.completed),
            None => false,
        }
    }

    pub fn find_subtask(&self, subtask_id: &str) -> Option<&SubtaskRecord<K>> {
        self.subtasks
            .as_ref()
            .and_then(|subtasks| subtasks.iter().find(|s| s.id == subtask_id))
    }

    pub fn find_subtask_mut(&mut self, subtask_id: &str) -> Option<&mut SubtaskRecord<K>> {
        self.subtasks
            .as_mut()
            .and_then(|subtasks| subtasks.iter_mut().find(|s| s.id == subtask_id))
    }

    /// Number of subtasks not yet completed (zero when undiscovered)
    pub fn pending_subtasks(&self) -> usize {
        self.subtasks
            .as_ref()
            .map(|subtasks| subtasks.iter().filter(|s| !s.completed).count())
            .unwrap_or(0)
    }

    /// Lifecycle state derived from the persisted fields
    pub fn state(&self) -> UnitState {
        if self.completed {
            UnitState::Complete
        } else if self.subtasks.is_none() {
            UnitState::Pending
        } else {
            UnitState::Active
        }
    }
}

impl<K> SubtaskRecord<K> {
    pub fn new(id: impl Into<String>, params: K) -> Self {
        Self {
            id: id.into(),
            completed: false,
            params,
        }
    }
}
