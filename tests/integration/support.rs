//! Scripted collaborators shared by the integration tests

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumi_harvest::config::Config;
use sumi_harvest::crawler::{
    AlternateContentProducer, CancelHandle, ContentFetcher, ContentSchema, ContentSerializer,
    SecondaryStep, SerializedOutput, SubtaskContext, TaskSource,
};
use sumi_harvest::url::subtask_id_from_href;
use sumi_harvest::{CheckpointRecord, CheckpointStore, Params, ValidationError};
use tempfile::TempDir;

pub fn params(value: Value) -> Params {
    value.as_object().cloned().unwrap()
}

/// Job configuration rooted in a temporary directory
pub fn job_config(dir: &TempDir, name: &str) -> Config {
    let mut config = Config::new(name);
    config.job.checkpoint_dir = dir.path().join("task-data");
    config.job.output_dir = dir.path().join("corpus");
    config.job.timeout_ms = 2_000;
    config
}

pub fn store_for(config: &Config) -> CheckpointStore {
    CheckpointStore::new(config.job.checkpoint_path(), &config.store)
}

pub fn chapter_href(document: &str, chapter: u32) -> String {
    format!("https://example.com/{}/{}", document, chapter)
}

/// Number of files with the given extension directly inside `dir`
pub fn count_files(dir: &Path, extension: &str) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some(extension))
            .count(),
        Err(_) => 0,
    }
}

/// Source with a fixed document list and chapter lists
#[derive(Clone, Default)]
pub struct ScriptedSource {
    items: Vec<Params>,
    chapters: HashMap<String, Vec<Params>>,
    failing: HashSet<String>,
    listing_fails: bool,
    listing_delay: Duration,
    pub discover_calls: Arc<AtomicUsize>,
    pub listing_cancelled: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a document whose discovery yields `chapters` chapter links
    pub fn document(mut self, id: &str, chapters: u32) -> Self {
        let number = self.items.len() + 1;
        self.items
            .push(params(json!({ "documentId": id, "documentNumber": number })));
        self.chapters.insert(
            id.to_string(),
            (1..=chapters)
                .map(|c| params(json!({ "href": chapter_href(id, c) })))
                .collect(),
        );
        self
    }

    pub fn failing_discovery(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn failing_listing(mut self) -> Self {
        self.listing_fails = true;
        self
    }

    pub fn slow_listing(mut self, delay: Duration) -> Self {
        self.listing_delay = delay;
        self
    }

    pub fn set_chapters(&mut self, id: &str, chapters: u32) {
        self.chapters.insert(
            id.to_string(),
            (1..=chapters)
                .map(|c| params(json!({ "href": chapter_href(id, c) })))
                .collect(),
        );
    }
}

#[async_trait]
impl TaskSource for ScriptedSource {
    async fn initial_items(&self, cancel: CancelHandle) -> anyhow::Result<Vec<Params>> {
        let cancelled = self.listing_cancelled.clone();
        cancel.on_cancel(move || cancelled.store(true, Ordering::SeqCst));

        if !self.listing_delay.is_zero() {
            tokio::time::sleep(self.listing_delay).await;
        }
        if self.listing_fails {
            anyhow::bail!("document listing unavailable");
        }
        Ok(self.items.clone())
    }

    fn item_id(&self, item: &Params) -> String {
        item.get("documentId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    async fn discover_subtasks(
        &self,
        parent: &CheckpointRecord,
        _cancel: CancelHandle,
    ) -> anyhow::Result<Vec<Params>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&parent.id) {
            anyhow::bail!("source unreachable for {}", parent.id);
        }
        Ok(self.chapters.get(&parent.id).cloned().unwrap_or_default())
    }

    fn subtask_id(&self, _parent: &CheckpointRecord, item: &Params) -> String {
        subtask_id_from_href(item.get("href").and_then(Value::as_str).unwrap_or_default())
    }
}

/// Fetcher that can be slowed down or told to fail for given subtask ids
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    delay: Duration,
    failing: HashSet<String>,
    pub calls: Arc<AtomicUsize>,
    pub cancelled: Arc<AtomicBool>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn failing_for(mut self, subtask_id: impl Into<String>) -> Self {
        self.failing.insert(subtask_id.into());
        self
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch(&self, ctx: &SubtaskContext, cancel: CancelHandle) -> anyhow::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let cancelled = self.cancelled.clone();
        cancel.on_cancel(move || cancelled.store(true, Ordering::SeqCst));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.failing.contains(&ctx.subtask.id) {
            anyhow::bail!("fetch failed for {}", ctx.subtask.id);
        }

        Ok(json!({
            "title": format!("Chapter of {}", ctx.parent.id),
            "href": ctx.subtask.id,
        }))
    }
}

/// Requires a string field in fetched content
pub struct RequireField(pub &'static str);

impl ContentSchema for RequireField {
    fn validate(&self, content: &Value) -> Result<(), ValidationError> {
        match content.get(self.0) {
            Some(Value::String(_)) => Ok(()),
            _ => Err(ValidationError::new(format!("missing field {}", self.0))),
        }
    }
}

/// Writes the chapter title as plain text
pub struct TitleText;

impl ContentSerializer for TitleText {
    fn serialize(&self, _ctx: &SubtaskContext, content: &Value) -> anyhow::Result<SerializedOutput> {
        let title = content.get("title").and_then(Value::as_str).unwrap_or_default();
        Ok(SerializedOutput::new(title, "txt"))
    }
}

/// Secondary step that always fails
pub struct FailingStep;

#[async_trait]
impl SecondaryStep for FailingStep {
    async fn run(
        &self,
        ctx: &SubtaskContext,
        _content: &Value,
        _cancel: CancelHandle,
    ) -> anyhow::Result<()> {
        anyhow::bail!("index update failed for {}", ctx.subtask.id)
    }
}

/// Secondary step that counts its invocations
#[derive(Clone, Default)]
pub struct CountingStep {
    pub runs: Arc<AtomicUsize>,
}

#[async_trait]
impl SecondaryStep for CountingStep {
    async fn run(
        &self,
        _ctx: &SubtaskContext,
        _content: &Value,
        _cancel: CancelHandle,
    ) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plain-text producer, optionally failing
pub struct TextProducer {
    pub fail: bool,
}

#[async_trait]
impl AlternateContentProducer for TextProducer {
    async fn produce(&self, ctx: &SubtaskContext, _cancel: CancelHandle) -> anyhow::Result<String> {
        if self.fail {
            anyhow::bail!("plain-text rendition unavailable");
        }
        Ok(format!("# {}\n\n{}\n", ctx.parent.id, ctx.subtask.id))
    }
}
