//! Crawler coordinator - main job orchestration logic
//!
//! One `Crawler` drives one job over its checkpoint file:
//! - Syncing the source's item list into the checkpoint file
//! - Selecting and ordering candidates once, up front
//! - Discovering subtasks for each candidate just before it is processed
//! - Running every content handler for every selected subtask
//! - Promoting checkpoints whose subtasks are all complete
//!
//! Candidates and subtasks are processed strictly one at a time. Nothing
//! that goes wrong with a single document or chapter stops the run; it is
//! logged, left incomplete in the checkpoint file, and retried next run.

use crate::checkpoint::{self, CheckpointRecord, SubtaskRecord};
use crate::config::{self, Config};
use crate::crawler::collaborator::{
    AlternateContentProducer, ContentHandler, SubtaskContext, TaskSource,
};
use crate::crawler::deadline::with_deadline;
use crate::output::{OutputPathFn, OutputWriter};
use crate::policy::CandidatePolicy;
use crate::state::UnitState;
use crate::storage::CheckpointStore;
use crate::{ConfigError, ConfigResult, HarvestError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Outcome counters for one `Crawler::run`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub job: String,

    /// Records selected for this run
    pub candidates: usize,

    /// Records whose subtask list was (re)discovered
    pub discovered: usize,

    pub discovery_failures: usize,

    /// Subtasks whose handlers all succeeded this run
    pub subtasks_completed: usize,

    pub subtasks_failed: usize,

    /// Records flipped to complete this run
    pub promoted: usize,

    /// Checkpoint file operations that failed (lock, IO, corrupt file)
    pub store_errors: usize,

    pub elapsed: Duration,
}

impl RunReport {
    fn new(job: &str) -> Self {
        Self {
            job: job.to_string(),
            ..Self::default()
        }
    }

    /// Returns true if nothing failed during the run
    pub fn is_clean(&self) -> bool {
        self.discovery_failures == 0 && self.subtasks_failed == 0 && self.store_errors == 0
    }
}

/// A content handler paired with the writer its files go through
struct BoundHandler {
    handler: ContentHandler,
    writer: OutputWriter,
}

/// Resumable extraction job
pub struct Crawler {
    config: Config,
    store: CheckpointStore,
    source: Arc<dyn TaskSource>,
    handlers: Vec<BoundHandler>,
    alternate: Option<Arc<dyn AlternateContentProducer>>,
    policy: CandidatePolicy,
    writer: OutputWriter,
}

impl std::fmt::Debug for Crawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crawler")
            .field("job", &self.config.job.name)
            .field("checkpoint", &self.store.path())
            .field("handlers", &self.handlers.len())
            .field("alternate", &self.alternate.is_some())
            .finish_non_exhaustive()
    }
}

/// Assembles a `Crawler` from its configuration and collaborators
pub struct CrawlerBuilder {
    config: Config,
    source: Option<Arc<dyn TaskSource>>,
    handlers: Vec<ContentHandler>,
    alternate: Option<Arc<dyn AlternateContentProducer>>,
    policy: CandidatePolicy,
    path_fn: Option<OutputPathFn>,
}

impl CrawlerBuilder {
    pub fn source(mut self, source: impl TaskSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Adds a content handler; handlers run in the order they are added
    pub fn handler(mut self, handler: ContentHandler) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn alternate(mut self, producer: impl AlternateContentProducer + 'static) -> Self {
        self.alternate = Some(Arc::new(producer));
        self
    }

    pub fn policy(mut self, policy: CandidatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn output_path_fn(mut self, path_fn: OutputPathFn) -> Self {
        self.path_fn = Some(path_fn);
        self
    }

    /// Validates the configuration and checks required collaborators
    ///
    /// # Returns
    ///
    /// * `Ok(Crawler)` - Ready to run
    /// * `Err(ConfigError::Validation)` - The configuration is invalid
    /// * `Err(ConfigError::MissingCollaborator)` - No task source or no content handler
    pub fn build(self) -> ConfigResult<Crawler> {
        config::validate(&self.config)?;

        let source = self
            .source
            .ok_or(ConfigError::MissingCollaborator("task source"))?;

        if self.handlers.is_empty() {
            return Err(ConfigError::MissingCollaborator("content handler"));
        }

        let store = CheckpointStore::new(self.config.job.checkpoint_path(), &self.config.store);

        let mut writer = OutputWriter::new(&self.config.job.output_dir);
        if let Some(path_fn) = self.path_fn {
            writer = writer.with_path_fn(path_fn);
        }

        let handlers = self
            .handlers
            .into_iter()
            .map(|handler| BoundHandler {
                writer: handler.writer(&writer),
                handler,
            })
            .collect();

        Ok(Crawler {
            config: self.config,
            store,
            source,
            handlers,
            alternate: self.alternate,
            policy: self.policy,
            writer,
        })
    }
}

impl Crawler {
    pub fn builder(config: Config) -> CrawlerBuilder {
        CrawlerBuilder {
            config,
            source: None,
            handlers: Vec::new(),
            alternate: None,
            policy: CandidatePolicy::default(),
            path_fn: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.job.timeout_ms)
    }

    fn is_forced(&self) -> bool {
        self.config.job.is_forced()
    }

    /// Records this run would process, in order, without touching the file
    pub async fn candidates(&self) -> crate::Result<Vec<CheckpointRecord>> {
        let records = self.store.read_all().await?;
        Ok(self.policy.select(
            records,
            self.config.job.force_all,
            &self.config.job.force_checkpoint_id,
        ))
    }

    /// Runs the job once over its checkpoint file
    ///
    /// Never fails: every error is logged and reflected in the report and in
    /// which checkpoints remain incomplete.
    pub async fn run(&self) -> RunReport {
        let span = tracing::info_span!("job", job = %self.config.job.name);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(&self) -> RunReport {
        let start_time = Instant::now();
        let mut report = RunReport::new(&self.config.job.name);

        tracing::info!("Starting job with checkpoint file {}", self.store.path().display());

        if let Err(e) = self.store.ensure() {
            tracing::error!(error = %e, "Failed to prepare checkpoint file");
            report.store_errors += 1;
            report.elapsed = start_time.elapsed();
            return report;
        }

        if let Err(e) = self.sync_initial_items().await {
            // Existing checkpoints can still make progress
            tracing::error!(error = %e, "Failed to sync initial items");
            if matches!(e, HarvestError::Storage(_)) {
                report.store_errors += 1;
            }
        }

        let candidates = match self.candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read checkpoints");
                report.store_errors += 1;
                report.elapsed = start_time.elapsed();
                return report;
            }
        };

        report.candidates = candidates.len();
        tracing::info!("Processing {} candidate checkpoint(s)", candidates.len());

        for (position, candidate) in candidates.into_iter().enumerate() {
            tracing::debug!(
                checkpoint_id = %candidate.id,
                "Processing candidate {}/{}",
                position + 1,
                report.candidates
            );
            self.process_candidate(candidate, &mut report).await;
        }

        report.elapsed = start_time.elapsed();
        tracing::info!(
            "Job finished in {:?}: {} subtask(s) completed, {} failed, {} checkpoint(s) promoted",
            report.elapsed,
            report.subtasks_completed,
            report.subtasks_failed,
            report.promoted
        );

        report
    }

    /// Adds checkpoints for source items not yet in the file
    async fn sync_initial_items(&self) -> crate::Result<()> {
        if self.config.job.skip_initial_sync {
            let existing = self.store.read_all().await?;
            if !existing.is_empty() {
                tracing::debug!(
                    "Skipping initial sync, {} checkpoint(s) already present",
                    existing.len()
                );
                return Ok(());
            }
        }

        let source = &self.source;
        let items = with_deadline(self.timeout(), |cancel| source.initial_items(cancel)).await?;
        let item_count = items.len();
        let added = self
            .store
            .initialize(items, |item| source.item_id(item))
            .await?;

        tracing::info!(
            "Source listed {} item(s), {} new checkpoint(s) added",
            item_count,
            added
        );
        Ok(())
    }

    async fn process_candidate(&self, candidate: CheckpointRecord, report: &mut RunReport) {
        let id = candidate.id.clone();
        let mut record = candidate;

        if record.subtasks.is_none() || self.config.job.force_rediscovery {
            log_transition(&id, record.state(), UnitState::Expanding);
            match self.discover(&record).await {
                Ok(Some(updated)) => {
                    log_transition(&id, UnitState::Expanding, updated.state());
                    report.discovered += 1;
                    record = updated;
                }
                Ok(None) => return,
                Err(e) => {
                    log_transition(&id, UnitState::Expanding, record.state());
                    report.discovery_failures += 1;
                    if matches!(e, HarvestError::Storage(_)) {
                        report.store_errors += 1;
                    }
                    tracing::error!(
                        checkpoint_id = %id,
                        error = %e,
                        "Discovery failed, checkpoint will be retried next run"
                    );
                    return;
                }
            }
        }

        if !self.is_forced() && record.all_subtasks_completed() {
            self.promote(&id, report).await;
            return;
        }

        let subtasks = self.policy.select_subtasks(&record, self.is_forced());
        for subtask in subtasks {
            if !self.process_subtask(&record, &subtask).await {
                report.subtasks_failed += 1;
                continue;
            }

            match self.store.set_subtask_completed(&id, &subtask.id, true).await {
                Ok(_) => report.subtasks_completed += 1,
                Err(e) => {
                    report.store_errors += 1;
                    tracing::error!(
                        checkpoint_id = %id,
                        subtask_id = %subtask.id,
                        error = %e,
                        "Failed to record subtask completion"
                    );
                }
            }
        }

        // Re-check against the file, not the copy selected at the start
        match self.store.find(&id).await {
            Ok(Some(current)) if current.all_subtasks_completed() => {
                self.promote(&id, report).await
            }
            Ok(Some(current)) => tracing::info!(
                checkpoint_id = %id,
                "{} subtask(s) still pending",
                current.pending_subtasks()
            ),
            Ok(None) => tracing::warn!(
                checkpoint_id = %id,
                "Checkpoint disappeared from the checkpoint file"
            ),
            Err(e) => {
                report.store_errors += 1;
                tracing::error!(checkpoint_id = %id, error = %e, "Failed to re-read checkpoint");
            }
        }
    }

    /// Asks the source for subtasks and merges them into the file
    ///
    /// Returns `None` if the record is no longer in the file.
    async fn discover(&self, record: &CheckpointRecord) -> crate::Result<Option<CheckpointRecord>> {
        let source = &self.source;
        let items =
            with_deadline(self.timeout(), |cancel| source.discover_subtasks(record, cancel))
                .await?;

        let subtasks =
            checkpoint::build_subtasks(record, items, |parent, item| source.subtask_id(parent, item));
        tracing::info!(
            checkpoint_id = %record.id,
            "Discovered {} subtask(s)",
            subtasks.len()
        );

        let updated = self
            .store
            .attach_subtasks(&record.id, subtasks, self.config.job.force_rediscovery)
            .await?;

        if updated.is_none() {
            tracing::warn!(
                checkpoint_id = %record.id,
                "Checkpoint disappeared before its subtasks could be saved"
            );
        }
        Ok(updated)
    }

    /// Runs every handler, then the alternate producer, for one subtask
    ///
    /// Returns true only if all of them succeeded.
    async fn process_subtask(&self, record: &CheckpointRecord, subtask: &SubtaskRecord) -> bool {
        let mut succeeded = true;
        let mut written = HashSet::new();

        for (index, bound) in self.handlers.iter().enumerate() {
            let ctx = SubtaskContext::new(record.clone(), subtask.clone(), index);
            if let Err(e) = self.run_handler(bound, &ctx, &mut written).await {
                succeeded = false;
                tracing::error!(
                    checkpoint_id = %record.id,
                    subtask_id = %subtask.id,
                    handler_index = index,
                    error = %e,
                    "Content handler failed"
                );
            }
        }

        if let Some(producer) = &self.alternate {
            let ctx = SubtaskContext::new(record.clone(), subtask.clone(), self.handlers.len());
            if let Err(e) = self.run_alternate(producer.as_ref(), &ctx, &mut written).await {
                succeeded = false;
                tracing::error!(
                    checkpoint_id = %record.id,
                    subtask_id = %subtask.id,
                    error = %e,
                    "Alternate content producer failed"
                );
            }
        }

        succeeded
    }

    /// Fetches, validates and writes one file per serializer, then runs the
    /// secondary steps
    async fn run_handler(
        &self,
        bound: &BoundHandler,
        ctx: &SubtaskContext,
        written: &mut HashSet<PathBuf>,
    ) -> crate::Result<()> {
        let handler = &bound.handler;
        let limit = self.timeout();

        let content = with_deadline(limit, |cancel| handler.fetcher.fetch(ctx, cancel)).await?;
        handler.validate(&content)?;

        for serializer in &handler.serializers {
            let mut output = serializer.serialize(ctx, &content)?;
            if output.suffix.is_none() && ctx.handler_index > 0 && !handler.has_own_layout() {
                output.suffix = Some(ctx.handler_index.to_string());
            }

            let path = bound
                .writer
                .path_for(ctx, &output.extension, output.suffix.as_deref());
            claim_output(written, &path)?;
            bound.writer.write_at(&path, &output.content)?;
            tracing::debug!(
                checkpoint_id = %ctx.parent.id,
                subtask_id = %ctx.subtask.id,
                handler_index = ctx.handler_index,
                "Saved {}",
                path.display()
            );
        }

        // The primary output stays on disk even if a step fails
        let mut step_error = None;
        for (step_index, step) in handler.secondary_steps.iter().enumerate() {
            if let Err(e) = with_deadline(limit, |cancel| step.run(ctx, &content, cancel)).await {
                tracing::warn!(
                    checkpoint_id = %ctx.parent.id,
                    subtask_id = %ctx.subtask.id,
                    handler_index = ctx.handler_index,
                    step_index,
                    error = %e,
                    "Secondary step failed"
                );
                step_error = Some(e);
            }
        }

        match step_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn run_alternate(
        &self,
        producer: &dyn AlternateContentProducer,
        ctx: &SubtaskContext,
        written: &mut HashSet<PathBuf>,
    ) -> crate::Result<()> {
        let text = with_deadline(self.timeout(), |cancel| producer.produce(ctx, cancel)).await?;
        let path = self
            .writer
            .path_for(ctx, &self.config.job.alternate_extension, None);
        claim_output(written, &path)?;
        self.writer.write_at(&path, text.as_bytes())?;
        tracing::debug!(subtask_id = %ctx.subtask.id, "Saved {}", path.display());
        Ok(())
    }

    async fn promote(&self, id: &str, report: &mut RunReport) {
        match self.store.set_completed(id, true).await {
            Ok(true) => {
                report.promoted += 1;
                log_transition(id, UnitState::Active, UnitState::Complete);
                tracing::info!(checkpoint_id = %id, "Checkpoint complete");
            }
            Ok(false) => {}
            Err(e) => {
                report.store_errors += 1;
                tracing::error!(checkpoint_id = %id, error = %e, "Failed to mark checkpoint complete");
            }
        }
    }
}

/// Records that this subtask's run is about to write `path`
///
/// Two outputs of one subtask resolving to the same file would silently
/// replace each other, so the second one fails instead.
fn claim_output(written: &mut HashSet<PathBuf>, path: &Path) -> crate::Result<()> {
    if written.insert(path.to_path_buf()) {
        Ok(())
    } else {
        Err(HarvestError::OutputCollision {
            path: path.to_path_buf(),
        })
    }
}

fn log_transition(id: &str, from: UnitState, to: UnitState) {
    if from.can_transition_to(to) {
        tracing::debug!(checkpoint_id = %id, "{} -> {}", from, to);
    } else {
        tracing::warn!(checkpoint_id = %id, "Unexpected state change {} -> {}", from, to);
    }
}

/// Runs several jobs one after another
///
/// A job that fails completely still yields a report, and the next job
/// starts regardless.
pub async fn run_jobs(crawlers: &[Crawler]) -> Vec<RunReport> {
    let mut reports = Vec::with_capacity(crawlers.len());
    for crawler in crawlers {
        reports.push(crawler.run().await);
    }
    reports
}
