//! Shared test helpers for integration tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use collecthub_core::config::SchedulerConfig;
use collecthub_core::error::AppError;
use collecthub_core::result::AppResult;
use collecthub_core::types::{PageRequest, PageResponse};
use collecthub_database::TaskStore;
use collecthub_database::memory::MemoryTaskStore;
use collecthub_entity::task::{
    CreateTask, StatusCounts, Task, TaskKind, TaskOutcome, TaskStatus,
};
use collecthub_worker::{
    CollectionUnit, JobManager, TaskRequest, UnitContext, UnitError, UnitRegistry,
};

/// Test engine context
pub struct TestEngine {
    /// The engine under test
    pub manager: JobManager,
    /// Backing store for direct inspection
    pub store: Arc<MemoryTaskStore>,
}

impl TestEngine {
    /// Engine with two slots running `unit` for `collect_articles`.
    pub async fn new(unit: Arc<dyn CollectionUnit>) -> Self {
        Self::with_config(test_config(), unit).await
    }

    /// Engine with a custom scheduler config.
    pub async fn with_config(config: SchedulerConfig, unit: Arc<dyn CollectionUnit>) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        let manager = JobManager::new(config, store.clone(), UnitRegistry::new().with(unit))
            .await
            .expect("Failed to build job manager");
        Self { manager, store }
    }

    /// Create a `collect_articles` task with the given retry budget.
    pub async fn create(&self, name: &str, max_retries: i32) -> Task {
        let mut request = TaskRequest::new(name, "collect_articles", json!({"account": name}));
        request.max_retries = Some(max_retries);
        self.manager
            .create_task(request)
            .await
            .expect("Failed to create task")
    }

    /// Poll until `id` reaches `status`, failing after five seconds.
    pub async fn drive_until(&self, id: Uuid, status: TaskStatus) -> Task {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let task = self.manager.get_task(id).await.expect("task exists");
            if task.status == status {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {} waiting for {status}",
                task.status
            );
            let _ = self.manager.poll_now().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until `count` tasks are in flight.
    pub async fn wait_in_flight(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.manager.snapshot().await.in_flight.len() != count {
            assert!(tokio::time::Instant::now() < deadline, "expected {count} in flight");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Scheduler config sized for tests: two slots, one-second poll and grace.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_interval_seconds: 1,
        max_concurrent_tasks: 2,
        shutdown_grace_seconds: 1,
        ..SchedulerConfig::default()
    }
}

/// Unit that replays a scripted sequence of outcomes, then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedUnit {
    script: Mutex<VecDeque<Result<Option<Value>, UnitError>>>,
    calls: AtomicUsize,
}

impl ScriptedUnit {
    /// Unit that always succeeds.
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Unit that replays `outcomes` in order.
    pub fn scripted(outcomes: Vec<Result<Option<Value>, UnitError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Unit that fails transiently `n` times.
    pub fn flaky(n: usize) -> Arc<Self> {
        Self::scripted(
            (0..n)
                .map(|i| Err(UnitError::Transient(format!("timeout #{}", i + 1))))
                .collect(),
        )
    }

    /// Number of attempts run.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectionUnit for ScriptedUnit {
    fn kind(&self) -> TaskKind {
        TaskKind::CollectArticles
    }

    fn retry_base_delay(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }

    async fn run(&self, task: &Task, ctx: &UnitContext) -> Result<Option<Value>, UnitError> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.script.lock().await.pop_front() {
            Some(outcome) => outcome,
            None => {
                ctx.item_collected(json!({"task": task.name, "attempt": attempt}));
                Ok(Some(json!({"collected": 1, "attempt": attempt})))
            }
        }
    }
}

/// Unit whose runs block until permits are released.
#[derive(Debug)]
pub struct GatedUnit {
    gate: Semaphore,
}

impl GatedUnit {
    /// Create a closed gate.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
        })
    }

    /// Let `n` runs finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

#[async_trait]
impl CollectionUnit for GatedUnit {
    fn kind(&self) -> TaskKind {
        TaskKind::CollectArticles
    }

    async fn run(&self, _task: &Task, _ctx: &UnitContext) -> Result<Option<Value>, UnitError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| UnitError::Transient(e.to_string()))?;
        permit.forget();
        Ok(None)
    }
}

/// Store wrapper whose due-task query can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryTaskStore,
    fail_queries: AtomicBool,
    failed_queries: AtomicUsize,
}

impl FlakyStore {
    /// Make `find_pending` fail until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.fail_queries.store(failing, Ordering::SeqCst);
    }

    /// Number of rejected `find_pending` calls.
    pub fn failed_queries(&self) -> usize {
        self.failed_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn insert(&self, data: &CreateTask) -> AppResult<Task> {
        self.inner.insert(data).await
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Task>> {
        self.inner.find_by_id(id).await
    }

    async fn find_pending(&self, now: DateTime<Utc>, limit: u64) -> AppResult<Vec<Task>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            self.failed_queries.fetch_add(1, Ordering::SeqCst);
            return Err(AppError::database("connection reset by peer"));
        }
        self.inner.find_pending(now, limit).await
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        self.inner.list(status, page).await
    }

    async fn count_by_status(&self) -> AppResult<StatusCounts> {
        self.inner.count_by_status().await
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        status: TaskStatus,
    ) -> AppResult<bool> {
        self.inner.compare_and_set_status(id, expected, status).await
    }

    async fn requeue(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.inner.requeue(id, expected, at).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        outcome: Option<&TaskOutcome>,
    ) -> AppResult<()> {
        self.inner.update_status(id, status, outcome).await
    }

    async fn increment_retry(&self, id: Uuid) -> AppResult<i32> {
        self.inner.increment_retry(id).await
    }

    async fn set_next_run_time(&self, id: Uuid, at: Option<DateTime<Utc>>) -> AppResult<()> {
        self.inner.set_next_run_time(id, at).await
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> AppResult<u64> {
        self.inner.delete_older_than(cutoff, statuses).await
    }
}
