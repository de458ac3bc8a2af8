//! Integration tests for task execution, retries, and engine lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use collecthub_core::config::SchedulerConfig;
use collecthub_core::error::ErrorKind;
use collecthub_core::events::{EngineEvent, EventPayload, TaskEvent};
use collecthub_core::types::PageRequest;
use collecthub_entity::task::TaskStatus;
use collecthub_worker::{JobManager, TaskRequest, UnitError, UnitRegistry};

use crate::helpers::{FlakyStore, GatedUnit, ScriptedUnit, TestEngine, test_config};

#[tokio::test]
async fn test_task_runs_to_completion() {
    let unit = ScriptedUnit::succeeding();
    let engine = TestEngine::new(unit.clone()).await;
    let mut events = engine.manager.subscribe();

    let task = engine.create("tech-daily", 3).await;
    assert_eq!(task.status, TaskStatus::Pending);

    let done = engine.drive_until(task.id, TaskStatus::Completed).await;
    assert_eq!(unit.calls(), 1);
    assert_eq!(done.retry_count, 0);
    assert_eq!(done.result.as_ref().unwrap()["collected"], 1);
    assert!(done.started_at.is_some());
    assert!(done.ended_at.is_some());

    let mut seen = Vec::new();
    while !matches!(seen.last(), Some(TaskEvent::Completed { .. })) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("no completion event")
            .unwrap();
        if let EventPayload::Task(event) = event.payload {
            seen.push(event);
        }
    }
    assert!(matches!(seen.first(), Some(TaskEvent::Created { .. })));
    assert!(seen.iter().any(|e| matches!(e, TaskEvent::Started { attempt: 1, .. })));
    assert!(seen.iter().any(|e| matches!(e, TaskEvent::ItemCollected { .. })));
}

#[tokio::test]
async fn test_transient_failures_retry_until_success() {
    let unit = ScriptedUnit::flaky(2);
    let engine = TestEngine::new(unit.clone()).await;

    let task = engine.create("flaky", 3).await;
    let done = engine.drive_until(task.id, TaskStatus::Completed).await;

    assert_eq!(unit.calls(), 3);
    assert_eq!(done.retry_count, 2);
    assert_eq!(done.result.as_ref().unwrap()["attempt"], 3);
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let unit = ScriptedUnit::flaky(10);
    let engine = TestEngine::new(unit.clone()).await;

    let task = engine.create("down", 2).await;
    let failed = engine.drive_until(task.id, TaskStatus::Failed).await;

    assert_eq!(unit.calls(), 2);
    assert_eq!(failed.retry_count, 2);
    assert!(failed.error_message.as_deref().unwrap().contains("timeout #2"));
}

#[tokio::test]
async fn test_zero_budget_fails_on_first_error() {
    let unit = ScriptedUnit::flaky(1);
    let engine = TestEngine::new(unit.clone()).await;

    let task = engine.create("once", 0).await;
    let failed = engine.drive_until(task.id, TaskStatus::Failed).await;

    assert_eq!(unit.calls(), 1);
    assert_eq!(failed.retry_count, 0);
}

#[tokio::test]
async fn test_permanent_failure_skips_retries() {
    let unit = ScriptedUnit::scripted(vec![Err(UnitError::Permanent("bad account".into()))]);
    let engine = TestEngine::new(unit.clone()).await;

    let task = engine.create("bad", 5).await;
    let failed = engine.drive_until(task.id, TaskStatus::Failed).await;

    assert_eq!(unit.calls(), 1);
    assert_eq!(failed.retry_count, 0);
    assert!(failed.error_message.as_deref().unwrap().contains("bad account"));
}

#[tokio::test]
async fn test_concurrency_bound_holds() {
    let unit = GatedUnit::new();
    let engine = TestEngine::new(unit.clone()).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(engine.create(&format!("gated-{i}"), 0).await.id);
    }

    let report = engine.manager.poll_now().await.unwrap();
    assert_eq!(report.submitted, 2);
    engine.wait_in_flight(2).await;

    let again = engine.manager.poll_now().await.unwrap();
    assert_eq!(again.submitted, 0);
    assert!(again.at_capacity);

    let counts = engine.manager.status_counts().await.unwrap();
    assert_eq!(counts.running, 2);
    assert_eq!(counts.pending, 3);

    unit.release(5);
    for id in ids {
        engine.drive_until(id, TaskStatus::Completed).await;
    }
    assert_eq!(engine.manager.status_counts().await.unwrap().completed, 5);
}

#[tokio::test]
async fn test_future_task_waits_until_due() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;

    let mut request = TaskRequest::new("later", "collect_articles", json!({}));
    request.run_at = Some(Utc::now() + chrono::Duration::hours(1));
    let task = engine.manager.create_task(request).await.unwrap();

    let report = engine.manager.poll_now().await.unwrap();
    assert_eq!(report.due, 0);

    let requeued = engine.manager.retry_task(task.id).await.unwrap();
    assert!(requeued.next_run_time.unwrap() <= Utc::now());
    engine.drive_until(task.id, TaskStatus::Completed).await;
}

#[tokio::test]
async fn test_cancel_and_requeue() {
    let unit = ScriptedUnit::flaky(1);
    let engine = TestEngine::new(unit.clone()).await;

    let pending = engine.create("cancel-me", 3).await;
    let cancelled = engine.manager.cancel_task(pending.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);

    let err = engine.manager.cancel_task(pending.id).await.unwrap_err();
    assert!(err.is(ErrorKind::Conflict));

    assert_eq!(engine.manager.poll_now().await.unwrap().due, 0);

    let failing = engine.create("requeue-me", 0).await;
    let failed = engine.drive_until(failing.id, TaskStatus::Failed).await;
    assert_eq!(failed.retry_count, 0);

    let requeued = engine.manager.retry_task(failing.id).await.unwrap();
    assert_eq!(requeued.status, TaskStatus::Pending);
    let done = engine.drive_until(failing.id, TaskStatus::Completed).await;
    assert!(done.error_message.is_none());

    let err = engine
        .manager
        .cancel_task(uuid::Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
}

#[tokio::test]
async fn test_list_tasks_by_status() {
    let unit = GatedUnit::new();
    let engine = TestEngine::new(unit.clone()).await;

    for i in 0..3 {
        engine.create(&format!("t{i}"), 0).await;
    }
    engine.manager.poll_now().await.unwrap();
    engine.wait_in_flight(2).await;

    let running = engine
        .manager
        .list_tasks(Some(TaskStatus::Running), &PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(running.total_items, 2);

    let all = engine
        .manager
        .list_tasks(None, &PageRequest::new(1, 2))
        .await
        .unwrap();
    assert_eq!(all.total_items, 3);
    assert_eq!(all.items.len(), 2);
    assert!(all.has_next);

    let snapshot = engine.manager.snapshot().await;
    assert_eq!(snapshot.in_flight.len(), 2);
    assert_eq!(snapshot.max_concurrent_tasks, 2);
    unit.release(3);
}

#[tokio::test]
async fn test_stop_waits_for_running_tasks() {
    let unit = GatedUnit::new();
    let engine = TestEngine::new(unit.clone()).await;
    let mut events = engine.manager.subscribe();

    let task = engine.create("slow", 0).await;
    engine.manager.start().await.unwrap();
    engine.wait_in_flight(1).await;

    let releaser = {
        let unit = unit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            unit.release(1);
        })
    };

    let abandoned = engine.manager.stop().await.unwrap();
    releaser.await.unwrap();
    assert_eq!(abandoned, 0);
    assert!(!engine.manager.is_running().await);
    assert_eq!(
        engine.manager.get_task(task.id).await.unwrap().status,
        TaskStatus::Completed
    );

    let mut stopped = None;
    while let Ok(event) = events.try_recv() {
        if let EventPayload::Engine(EngineEvent::Stopped { abandoned }) = event.payload {
            stopped = Some(abandoned);
        }
    }
    assert_eq!(stopped, Some(0));
    engine.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_reports_abandoned_tasks() {
    let unit = GatedUnit::new();
    let engine = TestEngine::new(unit.clone()).await;

    engine.create("stuck", 0).await;
    engine.manager.start().await.unwrap();
    engine.wait_in_flight(1).await;

    let abandoned = engine.manager.stop().await.unwrap();
    assert_eq!(abandoned, 1);

    // a stopped engine accepts no new work
    engine.create("late", 0).await;
    let report = engine.manager.poll_now().await.unwrap();
    assert_eq!(report.submitted, 0);

    unit.release(1);
    engine.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_readable_while_stopping() {
    let unit = GatedUnit::new();
    let config = SchedulerConfig {
        shutdown_grace_seconds: 3,
        ..test_config()
    };
    let engine = TestEngine::with_config(config, unit.clone()).await;

    engine.create("long-running", 0).await;
    engine.manager.start().await.unwrap();
    engine.wait_in_flight(1).await;

    let observe = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = tokio::time::timeout(Duration::from_millis(500), engine.manager.snapshot())
            .await
            .expect("snapshot blocked by a draining stop");
        let running = tokio::time::timeout(Duration::from_millis(500), engine.manager.is_running())
            .await
            .expect("is_running blocked by a draining stop");
        unit.release(1);
        (snapshot, running)
    };
    let (abandoned, (snapshot, running)) = tokio::join!(engine.manager.stop(), observe);

    assert_eq!(abandoned.unwrap(), 0);
    assert!(!snapshot.running);
    assert!(!running);
    assert_eq!(snapshot.in_flight.len(), 1);
    engine.manager.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_poller_survives_store_errors() {
    let store = Arc::new(FlakyStore::default());
    let manager = JobManager::new(
        test_config(),
        store.clone(),
        UnitRegistry::new().with(ScriptedUnit::succeeding()),
    )
    .await
    .unwrap();

    let task = manager
        .create_task(TaskRequest::new("resilient", "collect_articles", json!({})))
        .await
        .unwrap();

    store.set_failing(true);
    let err = manager.poll_now().await.unwrap_err();
    assert!(err.is(ErrorKind::Database));

    manager.start().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while store.failed_queries() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "poller stopped polling");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(manager.is_running().await);

    store.set_failing(false);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let status = manager.get_task(task.id).await.unwrap().status;
        if status == TaskStatus::Completed {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    manager.shutdown().await.unwrap();
}
