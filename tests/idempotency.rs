//! Idempotency Integration Tests
//!
//! A step that reached a terminal result is never executed again for the
//! same instance, whether the ledger lives in memory or on disk.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use uuid::Uuid;

use common::{memory_log, three_images, FixedClassifier};
use durabatch::config::BatchSettings;
use durabatch::core::{
    BatchCoordinator, EventStore, RetryPolicy, StepError, StepMemoStore, StepName, StepPurpose,
    StepRunner,
};
use durabatch::domain::WorkItem;

fn runner(log: Arc<dyn durabatch::core::EventLog>) -> StepRunner {
    StepRunner::new(StepMemoStore::new(log))
}

#[tokio::test]
async fn test_succeeded_step_is_not_reinvoked() {
    let runner = runner(memory_log());
    let instance_id = Uuid::new_v4();
    let step = StepName::new(StepPurpose::Classify, "images/1.jpg");
    let calls = AtomicU32::new(0);
    let counter = &calls;

    for _ in 0..2 {
        let label: String = runner
            .run(instance_id, &step, &RetryPolicy::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok("tabby".to_string())
            })
            .await
            .unwrap();
        assert_eq!(label, "tabby");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_memoized_result_survives_restart() {
    let temp = TempDir::new().unwrap();
    let instance_id = Uuid::new_v4();
    let step = StepName::new(StepPurpose::Update, "images/1.jpg");
    let calls = AtomicU32::new(0);
    let counter = &calls;

    let first = runner(Arc::new(EventStore::new(temp.path())));
    let value: u32 = first
        .run(instance_id, &step, &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await
        .unwrap();
    assert_eq!(value, 42);
    drop(first);

    // A fresh store over the same directory stands in for a new process
    let second = runner(Arc::new(EventStore::new(temp.path())));
    let value: u32 = second
        .run(instance_id, &step, &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recorded_failure_is_replayed() {
    let runner = runner(memory_log());
    let instance_id = Uuid::new_v4();
    let step = StepName::new(StepPurpose::Classify, "images/1.jpg");
    let calls = AtomicU32::new(0);
    let counter = &calls;

    for _ in 0..2 {
        let err = runner
            .run::<String, _, _>(instance_id, &step, &RetryPolicy::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("inference unavailable")
            })
            .await
            .unwrap_err();

        match err {
            StepError::Permanent { attempts, message, .. } => {
                assert_eq!(attempts, 1);
                assert!(message.contains("inference unavailable"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_same_step_name_in_other_instance_runs() {
    let runner = runner(memory_log());
    let step = StepName::new(StepPurpose::Classify, "images/1.jpg");
    let calls = AtomicU32::new(0);
    let counter = &calls;

    for _ in 0..2 {
        let _: bool = runner
            .run(Uuid::new_v4(), &step, &RetryPolicy::default(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_reprocessing_a_batch_reuses_every_step() {
    let log = memory_log();
    let store = Arc::new(three_images().await);
    let classifier = Arc::new(FixedClassifier::new("tabby", 0.9));
    let coordinator = BatchCoordinator::new(
        runner(log),
        store.clone(),
        classifier.clone(),
        BatchSettings::default(),
    );
    let instance_id = Uuid::new_v4();
    let items: Vec<WorkItem> = store_items(&coordinator, instance_id).await;

    let first = coordinator.process(instance_id, &items).await.unwrap();
    let second = coordinator.process(instance_id, &items).await.unwrap();

    assert_eq!(first.results, second.results);
    assert_eq!(classifier.calls(), 3);
    assert_eq!(store.puts(), 3);
    assert_eq!(store.lists(), 1);
}

async fn store_items(coordinator: &BatchCoordinator, instance_id: Uuid) -> Vec<WorkItem> {
    let first = coordinator.list_items(instance_id, "images/").await.unwrap();
    let again = coordinator.list_items(instance_id, "images/").await.unwrap();
    assert_eq!(first, again);
    first
}
