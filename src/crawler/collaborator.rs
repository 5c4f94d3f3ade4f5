//! Collaborator seams supplied by site integrations
//!
//! The engine knows nothing about any particular source. A job is wired from:
//! - a `TaskSource` that lists documents and discovers their chapters
//! - one or more `ContentHandler`s, each a fetch, an optional schema check,
//!   one or more serializers and optional secondary steps
//! - an optional `AlternateContentProducer` for a plain-text rendition
//!
//! All async calls receive a `CancelHandle` so they can release resources
//! when their deadline elapses.

use crate::checkpoint::{CheckpointRecord, Params, SubtaskRecord};
use crate::crawler::deadline::CancelHandle;
use crate::output::{OutputPathFn, OutputWriter};
use crate::ValidationError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Lists top-level items and expands them into subtasks
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Returns every item the job should know about
    async fn initial_items(&self, cancel: CancelHandle) -> anyhow::Result<Vec<Params>>;

    /// Derives the checkpoint id of an item
    fn item_id(&self, item: &Params) -> String;

    /// Returns the subtask items of a record
    async fn discover_subtasks(
        &self,
        parent: &CheckpointRecord,
        cancel: CancelHandle,
    ) -> anyhow::Result<Vec<Params>>;

    /// Derives the id of a subtask item, unique within its parent
    fn subtask_id(&self, parent: &CheckpointRecord, item: &Params) -> String;
}

/// Everything a handler knows about the subtask it is working on
#[derive(Debug, Clone)]
pub struct SubtaskContext {
    pub parent: CheckpointRecord,
    pub subtask: SubtaskRecord,
    /// Position of the handler in the job's handler list
    pub handler_index: usize,
}

impl SubtaskContext {
    pub fn new(parent: CheckpointRecord, subtask: SubtaskRecord, handler_index: usize) -> Self {
        Self {
            parent,
            subtask,
            handler_index,
        }
    }
}

/// Fetches and extracts the content of one subtask
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, ctx: &SubtaskContext, cancel: CancelHandle) -> anyhow::Result<Value>;
}

/// Contract that fetched content must satisfy before it is written
pub trait ContentSchema: Send + Sync {
    fn validate(&self, content: &Value) -> Result<(), ValidationError>;
}

/// Bytes to write for one subtask and how to name them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedOutput {
    pub content: Vec<u8>,
    /// File extension without the leading dot
    pub extension: String,
    /// Appended to the file stem as `_{suffix}`, for handlers sharing a subtask
    pub suffix: Option<String>,
}

impl SerializedOutput {
    pub fn new(content: impl Into<Vec<u8>>, extension: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            extension: extension.into(),
            suffix: None,
        }
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

/// Turns validated content into bytes
pub trait ContentSerializer: Send + Sync {
    fn serialize(&self, ctx: &SubtaskContext, content: &Value) -> anyhow::Result<SerializedOutput>;
}

/// Writes content as pretty-printed JSON
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    suffix: Option<String>,
}

impl JsonSerializer {
    pub fn with_suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: Some(suffix.into()),
        }
    }
}

impl ContentSerializer for JsonSerializer {
    fn serialize(&self, _ctx: &SubtaskContext, content: &Value) -> anyhow::Result<SerializedOutput> {
        let bytes = serde_json::to_vec_pretty(content)?;
        let mut output = SerializedOutput::new(bytes, "json");
        output.suffix = self.suffix.clone();
        Ok(output)
    }
}

/// Side effect run after a handler's output has been written
#[async_trait]
pub trait SecondaryStep: Send + Sync {
    async fn run(
        &self,
        ctx: &SubtaskContext,
        content: &Value,
        cancel: CancelHandle,
    ) -> anyhow::Result<()>;
}

/// Produces a plain-text rendition of a subtask
#[async_trait]
pub trait AlternateContentProducer: Send + Sync {
    async fn produce(&self, ctx: &SubtaskContext, cancel: CancelHandle) -> anyhow::Result<String>;
}

/// One way of turning a subtask into output
///
/// Every serializer writes its own file from the same fetched content. By
/// default files go through the job's output layout; a handler can move its
/// files to another directory or lay them out itself. When several handlers
/// share the job's layout, those after the first that leave the suffix unset
/// get their position as suffix (`c1_1.json`), so they never overwrite each
/// other.
#[derive(Clone)]
pub struct ContentHandler {
    pub(crate) fetcher: Arc<dyn ContentFetcher>,
    pub(crate) schema: Option<Arc<dyn ContentSchema>>,
    pub(crate) serializers: Vec<Arc<dyn ContentSerializer>>,
    pub(crate) secondary_steps: Vec<Arc<dyn SecondaryStep>>,
    output_dir: Option<PathBuf>,
    path_fn: Option<OutputPathFn>,
}

impl fmt::Debug for ContentHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentHandler")
            .field("schema", &self.schema.is_some())
            .field("serializers", &self.serializers.len())
            .field("secondary_steps", &self.secondary_steps.len())
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl ContentHandler {
    /// Creates a handler that writes fetched content as JSON
    pub fn new(fetcher: impl ContentFetcher + 'static) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            schema: None,
            serializers: vec![Arc::new(JsonSerializer::default())],
            secondary_steps: Vec::new(),
            output_dir: None,
            path_fn: None,
        }
    }

    pub fn with_schema(mut self, schema: impl ContentSchema + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Replaces the serializers, including the default JSON one
    pub fn with_serializer(mut self, serializer: impl ContentSerializer + 'static) -> Self {
        self.serializers = vec![Arc::new(serializer)];
        self
    }

    /// Adds another representation of the same content
    pub fn add_serializer(mut self, serializer: impl ContentSerializer + 'static) -> Self {
        self.serializers.push(Arc::new(serializer));
        self
    }

    /// Writes this handler's files below `dir` instead of the job's output directory
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Lays out this handler's files with `path_fn` instead of the job's layout
    pub fn with_path_fn(mut self, path_fn: OutputPathFn) -> Self {
        self.path_fn = Some(path_fn);
        self
    }

    /// Returns true if the handler overrides the job's output directory or layout
    pub fn has_own_layout(&self) -> bool {
        self.output_dir.is_some() || self.path_fn.is_some()
    }

    /// The job's writer with this handler's overrides applied
    pub(crate) fn writer(&self, job_writer: &OutputWriter) -> OutputWriter {
        let mut writer = job_writer.clone();
        if let Some(dir) = &self.output_dir {
            writer = writer.with_root(dir);
        }
        if let Some(path_fn) = &self.path_fn {
            writer = writer.with_path_fn(Arc::clone(path_fn));
        }
        writer
    }

    pub fn with_secondary_step(mut self, step: impl SecondaryStep + 'static) -> Self {
        self.secondary_steps.push(Arc::new(step));
        self
    }

    /// Applies the schema contract, if any
    pub fn validate(&self, content: &Value) -> Result<(), ValidationError> {
        match &self.schema {
            Some(schema) => schema.validate(content),
            None => Ok(()),
        }
    }
}
