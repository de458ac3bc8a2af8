//! Integration tests for recurring triggers.

use std::time::Duration;

use serde_json::json;

use collecthub_core::config::TriggerConfig;
use collecthub_core::error::ErrorKind;
use collecthub_core::events::{EventPayload, TriggerEvent};
use collecthub_core::types::PageRequest;
use collecthub_entity::task::{TaskKind, TaskStatus};
use collecthub_entity::trigger::TaskTemplate;
use collecthub_worker::manager::HISTORY_CLEANUP_TRIGGER;

use crate::helpers::{ScriptedUnit, TestEngine};

fn template(priority: i32) -> TaskTemplate {
    TaskTemplate {
        task_type: TaskKind::CollectArticles,
        config: json!({"account": "tech-daily", "urls": ["https://example.com/a"]}),
        priority,
        max_retries: 3,
    }
}

fn trigger_config(name: &str, cron: &str) -> TriggerConfig {
    TriggerConfig {
        name: name.to_string(),
        cron: cron.to_string(),
        task_type: "collect_articles".to_string(),
        config: json!({"account": name}),
        priority: 1,
        max_retries: None,
    }
}

#[tokio::test]
async fn test_run_trigger_now_spawns_task() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;
    engine
        .manager
        .schedule("tech-daily", "0 8 * * *", template(7))
        .await
        .unwrap();

    let task = engine.manager.run_trigger_now("tech-daily").await.unwrap();
    assert!(task.name.starts_with("tech-daily-"));
    assert_eq!(task.trigger_name.as_deref(), Some("tech-daily"));
    assert_eq!(task.priority, 7);
    assert_eq!(task.config["account"], "tech-daily");

    let done = engine.drive_until(task.id, TaskStatus::Completed).await;
    assert_eq!(done.trigger_name.as_deref(), Some("tech-daily"));
}

#[tokio::test]
async fn test_schedule_replace_and_unschedule() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;
    let mut events = engine.manager.subscribe();

    let replaced = engine
        .manager
        .schedule("feed", "*/15 * * * *", template(0))
        .await
        .unwrap();
    assert!(!replaced);

    let replaced = engine
        .manager
        .schedule("feed", "0 9 * * 1-5", template(3))
        .await
        .unwrap();
    assert!(replaced);

    let triggers = engine.manager.list_triggers();
    let names: Vec<&str> = triggers.iter().map(|t| t.trigger.name.as_str()).collect();
    assert_eq!(names, vec!["feed", HISTORY_CLEANUP_TRIGGER]);
    let feed = &triggers[0];
    assert_eq!(feed.trigger.cron, "0 9 * * 1-5");
    assert_eq!(feed.trigger.template.priority, 3);
    assert!(feed.next_fire_time.is_some());
    assert!(!feed.trigger.active);

    assert!(engine.manager.unschedule("feed").await);
    assert!(!engine.manager.unschedule("feed").await);
    assert_eq!(engine.manager.list_triggers().len(), 1);

    let mut scheduled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let EventPayload::Trigger(event) = event.payload {
            scheduled.push(event);
        }
    }
    assert!(matches!(
        scheduled.as_slice(),
        [
            TriggerEvent::Scheduled { replaced: false, .. },
            TriggerEvent::Scheduled { replaced: true, .. },
            TriggerEvent::Removed { .. },
        ]
    ));
}

#[tokio::test]
async fn test_invalid_triggers_rejected() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;

    let err = engine
        .manager
        .schedule("bad", "0 8 * *", template(0))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = engine
        .manager
        .schedule("bad", "61 * * * *", template(0))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = engine
        .manager
        .schedule(" ", "0 8 * * *", template(0))
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let mut negative = template(0);
    negative.max_retries = -1;
    let err = engine
        .manager
        .schedule("neg", "0 8 * * *", negative)
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Validation));

    let err = engine.manager.run_trigger_now("missing").await.unwrap_err();
    assert!(err.is(ErrorKind::NotFound));
    assert_eq!(engine.manager.list_triggers().len(), 1);
}

#[tokio::test]
async fn test_bootstrap_triggers_from_config() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;

    let count = engine
        .manager
        .bootstrap_triggers(&[
            trigger_config("morning", "0 8 * * *"),
            trigger_config("evening", "30 18 * * *"),
        ])
        .await
        .unwrap();
    assert_eq!(count, 2);
    assert_eq!(engine.manager.list_triggers().len(), 3);

    let task = engine.manager.run_trigger_now("evening").await.unwrap();
    assert_eq!(task.max_retries, 3);
    assert_eq!(task.priority, 1);

    let err = engine
        .manager
        .bootstrap_triggers(&[trigger_config("broken", "every minute")])
        .await
        .unwrap_err();
    assert!(err.is(ErrorKind::Configuration));
    assert!(err.message.contains("broken"));

    let mut unknown = trigger_config("scraper", "0 * * * *");
    unknown.task_type = "scrape_everything".to_string();
    let err = engine.manager.schedule_config(&unknown).await.unwrap_err();
    assert!(err.is(ErrorKind::Validation));
}

#[tokio::test]
async fn test_history_cleanup_trigger_runs() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;

    let task = engine
        .manager
        .run_trigger_now(HISTORY_CLEANUP_TRIGGER)
        .await
        .unwrap();
    assert_eq!(task.task_type, TaskKind::HistoryCleanup);
    assert_eq!(task.max_retries, 0);

    let done = engine.drive_until(task.id, TaskStatus::Completed).await;
    let result = done.result.unwrap();
    assert_eq!(result["deleted"], 0);
    assert_eq!(result["retention_days"], 30);
}

#[tokio::test]
async fn test_triggers_active_while_running() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;
    assert!(engine.manager.list_triggers().iter().all(|t| !t.trigger.active));

    engine.manager.start().await.unwrap();
    let snapshot = engine.manager.snapshot().await;
    assert!(snapshot.running);
    assert!(snapshot.triggers.iter().all(|t| t.trigger.active));

    engine.manager.stop().await.unwrap();
    assert!(engine.manager.list_triggers().iter().all(|t| !t.trigger.active));
    engine.manager.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cron_trigger_fires_on_schedule() {
    let engine = TestEngine::new(ScriptedUnit::succeeding()).await;
    engine
        .manager
        .schedule("every-minute", "* * * * *", template(0))
        .await
        .unwrap();
    engine.manager.start().await.unwrap();

    // Fires at the next minute boundary.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(75);
    let task = loop {
        let page = engine
            .manager
            .list_tasks(None, &PageRequest::new(1, 50))
            .await
            .unwrap();
        if let Some(task) = page
            .items
            .into_iter()
            .find(|t| t.trigger_name.as_deref() == Some("every-minute"))
        {
            break task;
        }
        assert!(tokio::time::Instant::now() < deadline, "trigger never fired");
        tokio::time::sleep(Duration::from_millis(250)).await;
    };

    assert!(task.name.starts_with("every-minute-"));
    assert_eq!(task.config["account"], "tech-daily");
    engine.manager.shutdown().await.unwrap();
}
