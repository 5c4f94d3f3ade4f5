//! End-to-end job runs against scripted collaborators

use crate::support::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use sumi_harvest::crawler::{run_jobs, ContentHandler, Crawler, JsonSerializer};
use sumi_harvest::url::subtask_id_from_href;
use sumi_harvest::{CheckpointRecord, ConfigError, SubtaskRecord};
use tempfile::TempDir;

fn crawler(config: sumi_harvest::Config, source: ScriptedSource, fetcher: ScriptedFetcher) -> Crawler {
    Crawler::builder(config)
        .source(source)
        .handler(ContentHandler::new(fetcher))
        .build()
        .unwrap()
}

fn completed_subtask(id: &str) -> SubtaskRecord {
    let mut subtask = SubtaskRecord::new(id, Default::default());
    subtask.completed = true;
    subtask
}

#[tokio::test]
async fn test_single_document_runs_to_completion() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);
    let output_dir = config.job.output_dir.clone();

    let source = ScriptedSource::new().document("d1", 1);
    let report = crawler(config, source, ScriptedFetcher::new()).run().await;

    assert!(report.is_clean());
    assert_eq!(report.candidates, 1);
    assert_eq!(report.discovered, 1);
    assert_eq!(report.subtasks_completed, 1);
    assert_eq!(report.promoted, 1);

    let records = store.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "d1");
    assert!(records[0].completed);

    let subtasks = records[0].subtasks.as_ref().unwrap();
    assert_eq!(subtasks.len(), 1);
    assert_eq!(subtasks[0].id, chapter_href("d1", 1));
    assert!(subtasks[0].completed);

    assert_eq!(count_files(&output_dir.join("d1"), "json"), 1);
}

#[tokio::test]
async fn test_timed_out_handler_is_retried_next_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    config.job.timeout_ms = 50;
    let store = store_for(&config);

    let slow = ScriptedFetcher::slow(Duration::from_millis(200));
    let cancelled = slow.cancelled.clone();
    let source = ScriptedSource::new().document("d1", 1);

    let report = crawler(config.clone(), source.clone(), slow).run().await;
    assert_eq!(report.subtasks_failed, 1);
    assert_eq!(report.promoted, 0);
    assert!(cancelled.load(Ordering::SeqCst));

    let record = store.find("d1").await.unwrap().unwrap();
    assert!(!record.completed);
    assert!(!record.subtasks.as_ref().unwrap()[0].completed);

    let report = crawler(config, source, ScriptedFetcher::new()).run().await;
    assert_eq!(report.discovered, 0);
    assert_eq!(report.subtasks_completed, 1);
    assert_eq!(report.promoted, 1);

    let record = store.find("d1").await.unwrap().unwrap();
    assert!(record.completed);
    assert!(record.subtasks.as_ref().unwrap()[0].completed);
}

#[tokio::test]
async fn test_force_all_selects_every_record_without_mutating() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    config.job.force_all = true;
    config.job.skip_initial_sync = true;
    let store = store_for(&config);
    store.ensure().unwrap();

    let done_href = chapter_href("d1", 1);
    let mut done = CheckpointRecord::new("d1", params(serde_json::json!({"documentNumber": 1})));
    done.completed = true;
    done.subtasks = Some(vec![completed_subtask(&done_href)]);
    let pending = CheckpointRecord::new("d2", params(serde_json::json!({"documentNumber": 2})));
    store.write_all(&[done, pending]).await.unwrap();
    let before = std::fs::read(store.path()).unwrap();

    let fetcher = ScriptedFetcher::new();
    let calls = fetcher.calls.clone();
    let job = crawler(
        config,
        ScriptedSource::new().document("d1", 1).document("d2", 2),
        fetcher,
    );

    let candidates = job.candidates().await.unwrap();
    let ids: Vec<_> = candidates.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["d1", "d2"]);
    assert_eq!(std::fs::read(store.path()).unwrap(), before);

    let report = job.run().await;
    assert_eq!(report.candidates, 2);
    // d1's completed chapter is re-exported, d2's two chapters are new
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(report.promoted, 1);

    let records = store.read_all().await.unwrap();
    assert!(records.iter().all(|r| r.completed));
}

#[tokio::test]
async fn test_second_run_leaves_checkpoint_file_unchanged() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let source = ScriptedSource::new().document("d1", 2).document("d2", 1);
    let discover_calls = source.discover_calls.clone();
    let fetcher = ScriptedFetcher::new();
    let fetch_calls = fetcher.calls.clone();
    let job = crawler(config, source, fetcher);

    job.run().await;
    let first = std::fs::read(store.path()).unwrap();
    let discovered = discover_calls.load(Ordering::SeqCst);
    let fetched = fetch_calls.load(Ordering::SeqCst);
    assert_eq!(discovered, 2);
    assert_eq!(fetched, 3);

    let report = job.run().await;
    assert_eq!(report.candidates, 0);
    assert_eq!(std::fs::read(store.path()).unwrap(), first);
    assert_eq!(discover_calls.load(Ordering::SeqCst), discovered);
    assert_eq!(fetch_calls.load(Ordering::SeqCst), fetched);
}

#[tokio::test]
async fn test_failing_subtask_does_not_block_its_sibling() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let failing_id = subtask_id_from_href(&chapter_href("d1", 1));
    let fetcher = ScriptedFetcher::new().failing_for(failing_id.clone());
    let report = crawler(config, ScriptedSource::new().document("d1", 2), fetcher)
        .run()
        .await;

    assert_eq!(report.subtasks_failed, 1);
    assert_eq!(report.subtasks_completed, 1);

    let record = store.find("d1").await.unwrap().unwrap();
    assert!(!record.completed);
    assert!(!record.find_subtask(&failing_id).unwrap().completed);
    assert!(record.find_subtask(&chapter_href("d1", 2)).unwrap().completed);
}

#[tokio::test]
async fn test_discovery_failure_is_retried() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let broken = ScriptedSource::new()
        .document("d1", 1)
        .document("d2", 1)
        .failing_discovery("d1");
    let report = crawler(config.clone(), broken, ScriptedFetcher::new())
        .run()
        .await;

    assert_eq!(report.discovery_failures, 1);
    assert_eq!(report.promoted, 1);
    let d1 = store.find("d1").await.unwrap().unwrap();
    assert!(d1.subtasks.is_none());
    assert!(store.find("d2").await.unwrap().unwrap().completed);

    let fixed = ScriptedSource::new().document("d1", 1).document("d2", 1);
    let report = crawler(config, fixed, ScriptedFetcher::new()).run().await;
    assert_eq!(report.candidates, 1);
    assert_eq!(report.discovered, 1);
    assert!(store.find("d1").await.unwrap().unwrap().completed);
}

#[tokio::test]
async fn test_empty_discovery_promotes_record() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let report = crawler(config, ScriptedSource::new().document("d1", 0), ScriptedFetcher::new())
        .run()
        .await;

    assert_eq!(report.promoted, 1);
    let record = store.find("d1").await.unwrap().unwrap();
    assert_eq!(record.subtasks, Some(vec![]));
    assert!(record.completed);
}

#[tokio::test]
async fn test_validation_failure_fails_subtask() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);
    let output_dir = config.job.output_dir.clone();

    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 1))
        .handler(ContentHandler::new(ScriptedFetcher::new()).with_schema(RequireField("body")))
        .build()
        .unwrap();
    let report = job.run().await;

    assert_eq!(report.subtasks_failed, 1);
    assert!(!store.find("d1").await.unwrap().unwrap().completed);
    assert_eq!(count_files(&output_dir.join("d1"), "json"), 0);
}

#[tokio::test]
async fn test_secondary_step_failure_keeps_primary_output() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);
    let output_dir = config.job.output_dir.clone();

    let counting = CountingStep::default();
    let runs = counting.runs.clone();
    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 1))
        .handler(
            ContentHandler::new(ScriptedFetcher::new())
                .with_secondary_step(FailingStep)
                .with_secondary_step(counting),
        )
        .build()
        .unwrap();
    let report = job.run().await;

    assert_eq!(report.subtasks_failed, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(count_files(&output_dir.join("d1"), "json"), 1);
    let record = store.find("d1").await.unwrap().unwrap();
    assert!(!record.subtasks.as_ref().unwrap()[0].completed);
}

#[tokio::test]
async fn test_every_handler_must_succeed() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let failing_id = chapter_href("d1", 1);
    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 1))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .handler(ContentHandler::new(
            ScriptedFetcher::new().failing_for(failing_id.clone()),
        ))
        .build()
        .unwrap();
    job.run().await;

    let record = store.find("d1").await.unwrap().unwrap();
    assert!(!record.find_subtask(&failing_id).unwrap().completed);
}

#[tokio::test]
async fn test_parallel_handlers_write_separate_files() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let output_dir = config.job.output_dir.clone();

    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 1))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .build()
        .unwrap();
    let report = job.run().await;

    assert!(report.is_clean());
    assert_eq!(report.subtasks_completed, 1);
    assert_eq!(count_files(&output_dir.join("d1"), "json"), 2);
}

#[tokio::test]
async fn test_handler_serializers_and_output_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let output_dir = config.job.output_dir.clone();
    let mirror_dir = temp_dir.path().join("mirror");

    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 2))
        .handler(ContentHandler::new(ScriptedFetcher::new()).add_serializer(TitleText))
        .handler(ContentHandler::new(ScriptedFetcher::new()).with_output_dir(&mirror_dir))
        .build()
        .unwrap();
    let report = job.run().await;

    assert!(report.is_clean());
    assert_eq!(report.promoted, 1);
    assert_eq!(count_files(&output_dir.join("d1"), "json"), 2);
    assert_eq!(count_files(&output_dir.join("d1"), "txt"), 2);
    assert_eq!(count_files(&mirror_dir.join("d1"), "json"), 2);
}

#[tokio::test]
async fn test_outputs_resolving_to_one_file_fail_the_subtask() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let job = Crawler::builder(config)
        .source(ScriptedSource::new().document("d1", 1))
        .handler(
            ContentHandler::new(ScriptedFetcher::new()).add_serializer(JsonSerializer::default()),
        )
        .build()
        .unwrap();
    let report = job.run().await;

    assert_eq!(report.subtasks_failed, 1);
    let record = store.find("d1").await.unwrap().unwrap();
    assert!(!record.completed);
    assert!(!record.subtasks.as_ref().unwrap()[0].completed);
}

#[tokio::test]
async fn test_alternate_content_is_written_and_required() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);
    let output_dir = config.job.output_dir.clone();

    let job = Crawler::builder(config.clone())
        .source(ScriptedSource::new().document("d1", 1))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .alternate(TextProducer { fail: false })
        .build()
        .unwrap();
    job.run().await;
    assert_eq!(count_files(&output_dir.join("d1"), "md"), 1);
    assert!(store.find("d1").await.unwrap().unwrap().completed);

    let mut other = config;
    other.job.name = "commentary".to_string();
    let other_store = store_for(&other);
    let job = Crawler::builder(other)
        .source(ScriptedSource::new().document("c1", 1))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .alternate(TextProducer { fail: true })
        .build()
        .unwrap();
    let report = job.run().await;
    assert_eq!(report.subtasks_failed, 1);
    assert!(!other_store.find("c1").await.unwrap().unwrap().completed);
}

#[tokio::test]
async fn test_force_checkpoint_id_restricts_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    config.job.force_checkpoint_id = vec!["d2".to_string()];
    let store = store_for(&config);

    let source = ScriptedSource::new().document("d1", 1).document("d2", 1);
    let report = crawler(config, source, ScriptedFetcher::new()).run().await;

    assert_eq!(report.candidates, 1);
    assert!(!store.find("d1").await.unwrap().unwrap().completed);
    assert!(store.find("d2").await.unwrap().unwrap().completed);
}

#[tokio::test]
async fn test_skip_initial_sync_keeps_existing_list() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    crawler(config.clone(), ScriptedSource::new().document("d1", 1), ScriptedFetcher::new())
        .run()
        .await;

    config.job.skip_initial_sync = true;
    let grown = ScriptedSource::new().document("d1", 1).document("d2", 1);
    crawler(config.clone(), grown.clone(), ScriptedFetcher::new())
        .run()
        .await;
    assert!(store.find("d2").await.unwrap().is_none());

    config.job.skip_initial_sync = false;
    crawler(config, grown, ScriptedFetcher::new()).run().await;
    assert!(store.find("d2").await.unwrap().unwrap().completed);
}

#[tokio::test]
async fn test_listing_failure_still_processes_existing_records() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);
    store.ensure().unwrap();
    store
        .write_all(&[CheckpointRecord::new("d1", Default::default())])
        .await
        .unwrap();

    let source = ScriptedSource::new().document("d1", 1).failing_listing();
    let report = crawler(config, source, ScriptedFetcher::new()).run().await;

    assert_eq!(report.candidates, 1);
    assert_eq!(report.promoted, 1);
}

#[tokio::test]
async fn test_timed_out_listing_is_cancelled() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    config.job.timeout_ms = 50;
    let store = store_for(&config);

    let source = ScriptedSource::new()
        .document("d1", 1)
        .slow_listing(Duration::from_millis(200));
    let cancelled = source.listing_cancelled.clone();
    let report = crawler(config, source, ScriptedFetcher::new()).run().await;

    assert!(cancelled.load(Ordering::SeqCst));
    assert_eq!(report.candidates, 0);
    assert!(store.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_candidates_leave_corrupt_checkpoint_file_untouched() {
    let temp_dir = TempDir::new().unwrap();
    let config = job_config(&temp_dir, "sutra");
    let path = config.job.checkpoint_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ half-written").unwrap();

    let job = crawler(config, ScriptedSource::new().document("d1", 1), ScriptedFetcher::new());
    assert!(job.candidates().await.unwrap().is_empty());

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ half-written");
}

#[tokio::test]
async fn test_forced_rediscovery_merges_new_subtasks() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = job_config(&temp_dir, "sutra");
    let store = store_for(&config);

    let failing_id = chapter_href("d1", 2);
    let mut source = ScriptedSource::new().document("d1", 2);
    crawler(
        config.clone(),
        source.clone(),
        ScriptedFetcher::new().failing_for(failing_id.clone()),
    )
    .run()
    .await;

    source.set_chapters("d1", 3);
    config.job.force_rediscovery = true;
    let fetcher = ScriptedFetcher::new().failing_for(failing_id.clone());
    let report = crawler(config, source, fetcher).run().await;
    assert_eq!(report.discovered, 1);

    let record = store.find("d1").await.unwrap().unwrap();
    let subtasks = record.subtasks.as_ref().unwrap();
    assert_eq!(subtasks.len(), 3);
    assert!(record.find_subtask(&chapter_href("d1", 1)).unwrap().completed);
    assert!(!record.find_subtask(&failing_id).unwrap().completed);
    assert!(record.find_subtask(&chapter_href("d1", 3)).unwrap().completed);
    assert!(!record.completed);
}

#[tokio::test]
async fn test_run_jobs_isolates_failures() {
    let temp_dir = TempDir::new().unwrap();
    let broken_config = job_config(&temp_dir, "broken");
    let healthy_config = job_config(&temp_dir, "healthy");
    let healthy_store = store_for(&healthy_config);

    let jobs = vec![
        crawler(
            broken_config,
            ScriptedSource::new().document("d1", 1).failing_discovery("d1"),
            ScriptedFetcher::new(),
        ),
        crawler(
            healthy_config,
            ScriptedSource::new().document("d1", 1),
            ScriptedFetcher::new(),
        ),
    ];

    let reports = run_jobs(&jobs).await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].job, "broken");
    assert_eq!(reports[0].discovery_failures, 1);
    assert_eq!(reports[1].job, "healthy");
    assert!(reports[1].is_clean());
    assert!(healthy_store.find("d1").await.unwrap().unwrap().completed);
}

#[test]
fn test_builder_requires_collaborators() {
    let temp_dir = TempDir::new().unwrap();

    let missing_source = Crawler::builder(job_config(&temp_dir, "sutra"))
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .build();
    assert!(matches!(
        missing_source,
        Err(ConfigError::MissingCollaborator("task source"))
    ));

    let missing_handler = Crawler::builder(job_config(&temp_dir, "sutra"))
        .source(ScriptedSource::new())
        .build();
    assert!(matches!(
        missing_handler,
        Err(ConfigError::MissingCollaborator("content handler"))
    ));

    let mut invalid = job_config(&temp_dir, "sutra");
    invalid.job.timeout_ms = 0;
    let result = Crawler::builder(invalid)
        .source(ScriptedSource::new())
        .handler(ContentHandler::new(ScriptedFetcher::new()))
        .build();
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}
