//! Job manager: the engine façade used by the server binary and callers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing;
use uuid::Uuid;

use collecthub_core::config::{SchedulerConfig, TriggerConfig};
use collecthub_core::error::AppError;
use collecthub_core::events::{DomainEvent, EngineEvent, TaskEvent};
use collecthub_core::result::AppResult;
use collecthub_core::types::{PageRequest, PageResponse};
use collecthub_database::TaskStore;
use collecthub_entity::task::{CreateTask, StatusCounts, Task, TaskKind, TaskStatus};
use collecthub_entity::trigger::TaskTemplate;

use crate::cron::CronExpr;
use crate::events::EventBus;
use crate::executor::{InFlightSnapshot, TaskExecutor};
use crate::jobs::HistoryCleanupUnit;
use crate::registry::UnitRegistry;
use crate::retry::{self, RetryPolicy};
use crate::runner::{PollReport, TaskPoller};
use crate::scheduler::{TriggerInfo, TriggerRegistry};

/// Name of the built-in trigger that purges old task history.
pub const HISTORY_CLEANUP_TRIGGER: &str = "history-cleanup";

/// A caller's request to create a one-off task.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    /// Task name.
    pub name: String,
    /// Task type string, e.g. `"collect_articles"`.
    pub task_type: String,
    /// Unit configuration; must be a JSON object.
    pub config: serde_json::Value,
    /// Priority (higher runs first).
    pub priority: i32,
    /// Retry budget; the engine default when `None`.
    pub max_retries: Option<i32>,
    /// Earliest run time; due immediately when `None`.
    pub run_at: Option<DateTime<Utc>>,
}

impl TaskRequest {
    /// A request with default priority, budget, and run time.
    pub fn new(name: impl Into<String>, task_type: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            config,
            priority: 0,
            max_retries: None,
            run_at: None,
        }
    }

    /// Validate the request and build the insert payload for a resolved kind.
    pub fn into_create(self, task_type: TaskKind, default_max_retries: i32) -> AppResult<CreateTask> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AppError::validation("task name must not be empty"));
        }
        let max_retries = resolve_max_retries(self.max_retries, default_max_retries)?;
        ensure_object(&self.config)?;

        Ok(CreateTask {
            name: name.to_string(),
            task_type,
            config: self.config,
            priority: self.priority,
            max_retries,
            next_run_time: self.run_at,
            trigger_name: None,
        })
    }
}

/// Point-in-time view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    /// Whether the engine is started.
    pub running: bool,
    /// Slot count.
    pub max_concurrent_tasks: usize,
    /// Registered triggers with next fire times.
    pub triggers: Vec<TriggerInfo>,
    /// Tasks currently running, with elapsed time.
    pub in_flight: Vec<InFlightSnapshot>,
}

#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    shutdown: Option<watch::Sender<bool>>,
    poller: Option<JoinHandle<()>>,
}

/// Composes the poller, executor, retry state machine, and trigger registry.
#[derive(Debug)]
pub struct JobManager {
    config: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    units: Arc<UnitRegistry>,
    executor: Arc<TaskExecutor>,
    poller: Arc<TaskPoller>,
    triggers: TriggerRegistry,
    events: EventBus,
    lifecycle: Mutex<Lifecycle>,
}

impl JobManager {
    /// Build an engine over `store` running the given units.
    ///
    /// A [`HistoryCleanupUnit`] is registered when `units` has none, and the
    /// built-in history cleanup trigger is scheduled on
    /// `config.cleanup_cron`. The engine is created stopped.
    pub async fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        mut units: UnitRegistry,
    ) -> AppResult<Self> {
        config.validate()?;
        let timezone = config.timezone_offset()?;
        let cleanup_cron = CronExpr::parse(&config.cleanup_cron)
            .map_err(|e| AppError::configuration(format!("scheduler.cleanup_cron: {}", e.message)))?;

        if !units.contains(TaskKind::HistoryCleanup) {
            units.register(Arc::new(HistoryCleanupUnit::new(
                Arc::clone(&store),
                config.retention_days,
            )));
        }
        let units = Arc::new(units);
        let events = EventBus::new();

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&store),
            Arc::clone(&units),
            RetryPolicy::new(config.retry_base_delay()),
            config.max_concurrent_tasks,
            events.clone(),
        ));
        let poller = Arc::new(TaskPoller::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            config.poll_interval(),
            config.poll_batch_size,
        ));
        let triggers = TriggerRegistry::new(Arc::clone(&store), events.clone(), timezone).await?;

        triggers
            .schedule(
                HISTORY_CLEANUP_TRIGGER,
                cleanup_cron.as_str(),
                TaskTemplate {
                    task_type: TaskKind::HistoryCleanup,
                    config: serde_json::json!({ "retention_days": config.retention_days }),
                    priority: 0,
                    max_retries: 0,
                },
            )
            .await?;

        Ok(Self {
            config,
            store,
            units,
            executor,
            poller,
            triggers,
            events,
            lifecycle: Mutex::new(Lifecycle::default()),
        })
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start polling and trigger firing. Starting twice is a no-op.
    pub async fn start(&self) -> AppResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.running {
            tracing::warn!("Job manager already running, start ignored");
            return Ok(());
        }

        self.executor.resume();
        self.triggers.start().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let poller = Arc::clone(&self.poller);
        let handle = tokio::spawn(async move { poller.run(shutdown_rx).await });

        lifecycle.running = true;
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.poller = Some(handle);

        tracing::info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            poll_interval_secs = self.config.poll_interval_seconds,
            triggers = self.triggers.len(),
            "Job manager started"
        );
        self.events.publish(EngineEvent::Started {
            max_concurrent_tasks: self.executor.max_concurrent(),
        });
        Ok(())
    }

    /// Stop accepting work and wait up to the configured grace period for
    /// running tasks. Stopping a stopped engine is a no-op.
    ///
    /// Returns the number of tasks still running when the wait ended.
    pub async fn stop(&self) -> AppResult<usize> {
        let poller = {
            let mut lifecycle = self.lifecycle.lock().await;
            if !lifecycle.running {
                tracing::warn!("Job manager not running, stop ignored");
                return Ok(0);
            }
            lifecycle.running = false;
            self.triggers.pause();
            self.executor.stop_accepting();
            if let Some(shutdown) = lifecycle.shutdown.take() {
                let _ = shutdown.send(true);
            }
            lifecycle.poller.take()
        };

        // The lock is released: snapshots stay readable while draining.
        if let Some(handle) = poller {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Poller task ended abnormally");
            }
        }

        let grace = self.config.shutdown_grace();
        tracing::info!(
            in_flight = self.executor.active_count(),
            grace_secs = grace.as_secs(),
            "Waiting for in-flight tasks"
        );
        let remaining = self.executor.in_flight();
        let abandoned = self.executor.drain(grace).await;
        if abandoned > 0 {
            let still_running: Vec<Uuid> = remaining
                .iter()
                .map(|t| t.task_id)
                .filter(|id| self.executor.is_in_flight(*id))
                .collect();
            tracing::warn!(
                abandoned,
                tasks = ?still_running,
                "Tasks still running after shutdown grace period"
            );
        }

        tracing::info!(abandoned, "Job manager stopped");
        self.events.publish(EngineEvent::Stopped { abandoned });
        Ok(abandoned)
    }

    /// Whether the engine is started.
    pub async fn is_running(&self) -> bool {
        self.lifecycle.lock().await.running
    }

    /// Run one poll cycle now, independent of the poll timer.
    pub async fn poll_now(&self) -> AppResult<PollReport> {
        self.poller.poll_once().await
    }

    // ── Tasks ──────────────────────────────────────────────────────

    /// Validate and insert a one-off task.
    pub async fn create_task(&self, request: TaskRequest) -> AppResult<Task> {
        let task_type = self.units.resolve(&request.task_type)?;
        let data = request.into_create(task_type, self.config.default_max_retries)?;
        let task = self.store.insert(&data).await?;

        tracing::info!(task_id = %task.id, name = %task.name, task_type = %task.task_type, "Task created");
        self.events.publish(TaskEvent::Created {
            task_id: task.id,
            name: task.name.clone(),
            task_type: task.task_type.to_string(),
        });
        Ok(task)
    }

    /// Fetch a task by ID.
    pub async fn get_task(&self, id: Uuid) -> AppResult<Task> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Task {id} not found")))
    }

    /// Page through tasks, optionally filtered by status.
    pub async fn list_tasks(
        &self,
        status: Option<TaskStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        self.store.list(status, page).await
    }

    /// Number of tasks per status.
    pub async fn status_counts(&self) -> AppResult<StatusCounts> {
        self.store.count_by_status().await
    }

    /// Cancel a pending or failed task.
    pub async fn cancel_task(&self, id: Uuid) -> AppResult<Task> {
        let task = retry::cancel(self.store.as_ref(), id).await?;
        self.events.publish(TaskEvent::Cancelled { task_id: id });
        Ok(task)
    }

    /// Make a non-running task due now, keeping its retry count.
    pub async fn retry_task(&self, id: Uuid) -> AppResult<Task> {
        let task = retry::retry_now(self.store.as_ref(), id, Utc::now()).await?;
        self.events.publish(TaskEvent::Requeued { task_id: id });
        Ok(task)
    }

    // ── Triggers ───────────────────────────────────────────────────

    /// Register or replace a recurring trigger. Returns `true` on replace.
    pub async fn schedule(&self, name: &str, cron: &str, template: TaskTemplate) -> AppResult<bool> {
        if !self.units.contains(template.task_type) {
            return Err(AppError::validation(format!(
                "no collection unit registered for task type '{}'",
                template.task_type
            )));
        }
        if template.max_retries < 0 {
            return Err(AppError::validation("max_retries must not be negative"));
        }
        ensure_object(&template.config)?;
        self.triggers.schedule(name, cron, template).await
    }

    /// Register a trigger declared in configuration.
    pub async fn schedule_config(&self, trigger: &TriggerConfig) -> AppResult<bool> {
        let template = TaskTemplate {
            task_type: self.units.resolve(&trigger.task_type)?,
            config: trigger.config.clone(),
            priority: trigger.priority,
            max_retries: resolve_max_retries(trigger.max_retries, self.config.default_max_retries)?,
        };
        self.schedule(&trigger.name, &trigger.cron, template).await
    }

    /// Register every configured trigger, stopping at the first invalid one.
    pub async fn bootstrap_triggers(&self, triggers: &[TriggerConfig]) -> AppResult<usize> {
        for trigger in triggers {
            self.schedule_config(trigger).await.map_err(|e| {
                AppError::configuration(format!("trigger '{}': {}", trigger.name, e.message))
            })?;
        }
        Ok(triggers.len())
    }

    /// Remove a trigger. Returns whether it existed.
    pub async fn unschedule(&self, name: &str) -> bool {
        self.triggers.unschedule(name).await
    }

    /// Registered triggers with next fire times.
    pub fn list_triggers(&self) -> Vec<TriggerInfo> {
        self.triggers.list()
    }

    /// Spawn one task from a trigger immediately.
    pub async fn run_trigger_now(&self, name: &str) -> AppResult<Task> {
        self.triggers.fire_now(name).await
    }

    // ── Observation ────────────────────────────────────────────────

    /// Running state, triggers, and in-flight tasks.
    pub async fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            running: self.is_running().await,
            max_concurrent_tasks: self.executor.max_concurrent(),
            triggers: self.triggers.list(),
            in_flight: self.executor.in_flight(),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    /// Stop the engine if running and release the cron scheduler.
    pub async fn shutdown(&self) -> AppResult<usize> {
        let abandoned = if self.is_running().await {
            self.stop().await?
        } else {
            0
        };
        self.triggers.shutdown().await?;
        Ok(abandoned)
    }
}

fn resolve_max_retries(max_retries: Option<i32>, default: i32) -> AppResult<i32> {
    let max_retries = max_retries.unwrap_or(default);
    if max_retries < 0 {
        return Err(AppError::validation("max_retries must not be negative"));
    }
    Ok(max_retries)
}

fn ensure_object(config: &serde_json::Value) -> AppResult<()> {
    if config.is_object() {
        Ok(())
    } else {
        Err(AppError::validation("task config must be a JSON object"))
    }
}
