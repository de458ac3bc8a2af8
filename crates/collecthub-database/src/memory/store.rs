//! In-process task store.
//!
//! Holds tasks in a map guarded by a tokio `RwLock`. Used by the test suites
//! and for running the engine without PostgreSQL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use collecthub_core::error::AppError;
use collecthub_core::result::AppResult;
use collecthub_core::types::{PageRequest, PageResponse};
use collecthub_entity::task::{CreateTask, StatusCounts, Task, TaskOutcome, TaskStatus};

use crate::store::{StatusTimestamps, TaskStore};

#[derive(Debug)]
struct Entry {
    /// Insertion order; breaks `created_at` ties.
    seq: u64,
    task: Task,
}

/// Task store that lives entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Entry>>,
    next_seq: AtomicU64,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Whether the store holds no tasks.
    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Snapshot of every stored task in insertion order.
    pub async fn all(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut entries: Vec<&Entry> = tasks.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.task.clone()).collect()
    }
}

fn missing(id: Uuid) -> AppError {
    AppError::not_found(format!("Task {id} not found"))
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, data: &CreateTask) -> AppResult<Task> {
        let task = Task::from_create(Uuid::new_v4(), data, Utc::now());
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.tasks.write().await.insert(
            task.id,
            Entry {
                seq,
                task: task.clone(),
            },
        );
        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).map(|e| e.task.clone()))
    }

    async fn find_pending(&self, now: DateTime<Utc>, limit: u64) -> AppResult<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut due: Vec<&Entry> = tasks.values().filter(|e| e.task.is_due(now)).collect();
        due.sort_by(|a, b| {
            b.task
                .priority
                .cmp(&a.task.priority)
                .then(a.task.created_at.cmp(&b.task.created_at))
                .then(a.seq.cmp(&b.seq))
        });
        Ok(due
            .into_iter()
            .take(limit as usize)
            .map(|e| e.task.clone())
            .collect())
    }

    async fn list(
        &self,
        status: Option<TaskStatus>,
        page: &PageRequest,
    ) -> AppResult<PageResponse<Task>> {
        let tasks = self.tasks.read().await;
        let mut matching: Vec<&Entry> = tasks
            .values()
            .filter(|e| status.is_none_or(|s| e.task.status == s))
            .collect();
        matching.sort_by(|a, b| {
            b.task
                .created_at
                .cmp(&a.task.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .map(|e| e.task.clone())
            .collect();
        Ok(PageResponse::new(items, page, total))
    }

    async fn count_by_status(&self) -> AppResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for entry in self.tasks.read().await.values() {
            counts.add(entry.task.status, 1);
        }
        Ok(counts)
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        status: TaskStatus,
    ) -> AppResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&entry.task.status) {
            return Ok(false);
        }
        entry.task.status = status;
        StatusTimestamps::entering(status).apply(&mut entry.task, Utc::now());
        Ok(true)
    }

    async fn requeue(
        &self,
        id: Uuid,
        expected: &[TaskStatus],
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&entry.task.status) {
            return Ok(false);
        }
        entry.task.status = TaskStatus::Pending;
        entry.task.next_run_time = Some(at);
        StatusTimestamps::entering(TaskStatus::Pending).apply(&mut entry.task, Utc::now());
        Ok(true)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        outcome: Option<&TaskOutcome>,
    ) -> AppResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = &mut tasks.get_mut(&id).ok_or_else(|| missing(id))?.task;

        task.status = status;
        match outcome {
            Some(TaskOutcome::Success(value)) => {
                task.result = Some(value.clone());
                task.error_message = None;
            }
            Some(TaskOutcome::Failure(message)) => task.error_message = Some(message.clone()),
            None => {}
        }
        StatusTimestamps::entering(status).apply(task, Utc::now());
        Ok(())
    }

    async fn increment_retry(&self, id: Uuid) -> AppResult<i32> {
        let mut tasks = self.tasks.write().await;
        let task = &mut tasks.get_mut(&id).ok_or_else(|| missing(id))?.task;
        task.retry_count += 1;
        task.updated_at = Utc::now();
        Ok(task.retry_count)
    }

    async fn set_next_run_time(&self, id: Uuid, at: Option<DateTime<Utc>>) -> AppResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = &mut tasks.get_mut(&id).ok_or_else(|| missing(id))?.task;
        task.next_run_time = at;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_older_than(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[TaskStatus],
    ) -> AppResult<u64> {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, e| {
            let ended = e.task.ended_at.unwrap_or(e.task.updated_at);
            !(statuses.contains(&e.task.status) && ended < cutoff)
        });
        Ok((before - tasks.len()) as u64)
    }
}
