//! State module for tracking unit-of-work progress
//!
//! # Components
//!
//! - `UnitState`: lifecycle of a top-level checkpoint (pending, expanding, active, complete)

mod unit_state;

pub use unit_state::UnitState;
