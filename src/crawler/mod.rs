//! Crawler module for resumable, checkpointed extraction
//!
//! This module contains the core orchestration logic, including:
//! - The collaborator traits a site integration implements
//! - Deadline enforcement with cancellation hooks
//! - The per-job run loop and multi-job sequencing

mod collaborator;
mod coordinator;
mod deadline;

pub use collaborator::{
    AlternateContentProducer, ContentFetcher, ContentHandler, ContentSchema, ContentSerializer,
    JsonSerializer, SecondaryStep, SerializedOutput, SubtaskContext, TaskSource,
};
pub use coordinator::{run_jobs, Crawler, CrawlerBuilder, RunReport};
pub use deadline::{with_deadline, CancelHandle};
