//! Checkpoint store behavior with several writers on one file

use crate::support::params;
use serde_json::json;
use std::time::Duration;
use sumi_harvest::config::StoreConfig;
use sumi_harvest::storage::{CheckpointLock, LockPolicy};
use sumi_harvest::{CheckpointRecord, CheckpointStore, SubtaskRecord};
use tempfile::TempDir;

const WRITERS: usize = 8;

fn contended_policy() -> LockPolicy {
    LockPolicy {
        retries: 50,
        min_backoff: Duration::from_millis(2),
        max_backoff: Duration::from_millis(40),
        stale_after: Duration::from_secs(10),
    }
}

/// A fresh store instance per writer, as separate processes would have
fn open(path: &std::path::Path) -> CheckpointStore {
    CheckpointStore::new(path, &StoreConfig::default()).with_lock_policy(contended_policy())
}

async fn seed(path: &std::path::Path, count: usize) {
    let store = open(path);
    store.ensure().unwrap();
    let items = (0..count)
        .map(|i| params(json!({ "documentId": format!("d{}", i) })))
        .collect();
    let added = store
        .initialize(items, |item| item["documentId"].as_str().unwrap().to_string())
        .await
        .unwrap();
    assert_eq!(added, count);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_no_updates() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("task-data/sutra-checkpoint.json");
    seed(&path, WRITERS).await;

    let mut tasks = Vec::new();
    for i in 0..WRITERS {
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            open(&path).set_completed(&format!("d{}", i), true).await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }

    let records = open(&path).read_all().await.unwrap();
    assert_eq!(records.len(), WRITERS);
    assert!(records.iter().all(|r| r.completed));
    assert!(!CheckpointLock::lock_path_for(&path).exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subtask_completion_and_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sutra-checkpoint.json");
    seed(&path, 2).await;

    let subtasks: Vec<SubtaskRecord> = (0..WRITERS)
        .map(|i| SubtaskRecord::new(format!("c{}", i), Default::default()))
        .collect();
    open(&path)
        .attach_subtasks("d0", subtasks, false)
        .await
        .unwrap()
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..WRITERS {
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            open(&path)
                .set_subtask_completed("d0", &format!("c{}", i), true)
                .await
        }));
    }

    // Discovery for another record interleaves with the completions
    let path_for_discovery = path.clone();
    tasks.push(tokio::spawn(async move {
        open(&path_for_discovery)
            .attach_subtasks(
                "d1",
                vec![SubtaskRecord::new("only", Default::default())],
                false,
            )
            .await
            .map(|record| record.is_some())
    }));

    for task in tasks {
        assert!(task.await.unwrap().unwrap());
    }

    let store = open(&path);
    let d0 = store.find("d0").await.unwrap().unwrap();
    assert!(d0.all_subtasks_completed());
    assert_eq!(d0.subtasks.as_ref().unwrap().len(), WRITERS);

    let d1 = store.find("d1").await.unwrap().unwrap();
    assert_eq!(d1.subtasks.as_ref().unwrap().len(), 1);
}

#[tokio::test]
async fn test_completion_is_monotonic_across_instances() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sutra-checkpoint.json");
    seed(&path, 1).await;

    assert!(open(&path).set_completed("d0", true).await.unwrap());
    assert!(!open(&path).set_completed("d0", false).await.unwrap());
    assert!(!open(&path).set_completed("d0", true).await.unwrap());

    let record: CheckpointRecord = open(&path).find("d0").await.unwrap().unwrap();
    assert!(record.completed);
}

#[tokio::test]
async fn test_stale_lock_from_crashed_writer_is_reclaimed() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sutra-checkpoint.json");
    seed(&path, 1).await;

    std::fs::write(CheckpointLock::lock_path_for(&path), "pid=0\n").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let store: CheckpointStore =
        CheckpointStore::new(&path, &StoreConfig::default()).with_lock_policy(LockPolicy {
            stale_after: Duration::from_millis(20),
            ..contended_policy()
        });
    assert!(store.set_completed("d0", true).await.unwrap());
    assert!(!CheckpointLock::lock_path_for(&path).exists());
}

#[tokio::test]
async fn test_unknown_ids_write_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sutra-checkpoint.json");
    seed(&path, 1).await;
    let before = std::fs::read(&path).unwrap();

    let store = open(&path);
    assert!(!store.set_completed("missing", true).await.unwrap());
    assert!(!store.set_subtask_completed("d0", "missing", true).await.unwrap());
    assert!(store
        .attach_subtasks("missing", Vec::new(), false)
        .await
        .unwrap()
        .is_none());

    assert_eq!(std::fs::read(&path).unwrap(), before);
}
