//! Task hierarchy model
//!
//! A checkpoint file holds a flat list of top-level records (documents), each
//! carrying the list of subtasks (chapters) discovered for it. Records are
//! created once, subtasks attached once, and afterwards only the `completed`
//! flags move, always from false to true.

mod hierarchy;
mod record;

pub use hierarchy::{attach_subtasks, build_subtasks, initialize};
pub use record::{CheckpointRecord, Params, SubtaskRecord};
