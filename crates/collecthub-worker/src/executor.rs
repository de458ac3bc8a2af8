//! Concurrency-bounded task executor.
//!
//! A task is run at most once at a time: the in-flight map rejects duplicate
//! submissions within this process and the store-side compare-and-set from
//! `pending` to `running` rejects tasks another claimant got to first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing;
use uuid::Uuid;

use collecthub_core::events::TaskEvent;
use collecthub_database::TaskStore;
use collecthub_entity::task::{Task, TaskKind, TaskStatus};

use crate::events::EventBus;
use crate::registry::UnitRegistry;
use crate::retry::{self, RetryDecision, RetryPolicy};
use crate::unit::{UnitContext, UnitError};

/// Result of [`TaskExecutor::submit`]. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Claimed and started.
    Accepted,
    /// The same task is already running here.
    AlreadyInFlight,
    /// Every slot is taken.
    AtCapacity,
    /// The task was no longer pending in the store.
    NotClaimable,
    /// The executor is draining.
    ShuttingDown,
}

#[derive(Debug, Clone)]
struct InFlightTask {
    name: String,
    task_type: TaskKind,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// A running task as reported by [`TaskExecutor::in_flight`].
#[derive(Debug, Clone, Serialize)]
pub struct InFlightSnapshot {
    /// Task ID.
    pub task_id: Uuid,
    /// Task name.
    pub name: String,
    /// Task type.
    pub task_type: TaskKind,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Time spent running so far.
    pub elapsed_ms: u64,
}

/// Removes a task from the in-flight map when the attempt ends, however it ends.
struct InFlightGuard {
    task_id: Uuid,
    in_flight: Arc<DashMap<Uuid, InFlightTask>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.task_id);
    }
}

/// Runs claimed tasks on the tokio runtime, bounded by a semaphore.
#[derive(Debug)]
pub struct TaskExecutor {
    store: Arc<dyn TaskStore>,
    units: Arc<UnitRegistry>,
    policy: RetryPolicy,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    in_flight: Arc<DashMap<Uuid, InFlightTask>>,
    accepting: AtomicBool,
    events: EventBus,
}

impl TaskExecutor {
    /// Create an executor with `max_concurrent` slots, clamped to at least
    /// one and at most what [`drain`](Self::drain) can reclaim in one call.
    pub fn new(
        store: Arc<dyn TaskStore>,
        units: Arc<UnitRegistry>,
        policy: RetryPolicy,
        max_concurrent: usize,
        events: EventBus,
    ) -> Self {
        let max_slots = usize::try_from(u32::MAX)
            .unwrap_or(usize::MAX)
            .min(Semaphore::MAX_PERMITS);
        let max_concurrent = max_concurrent.clamp(1, max_slots);
        Self {
            store,
            units,
            policy,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            in_flight: Arc::new(DashMap::new()),
            accepting: AtomicBool::new(true),
            events,
        }
    }

    /// Try to claim `task` and start running it.
    pub async fn submit(&self, task: Task) -> SubmitOutcome {
        if !self.accepting.load(Ordering::Acquire) {
            return SubmitOutcome::ShuttingDown;
        }

        let permit = match self.in_flight.entry(task.id) {
            Entry::Occupied(_) => {
                tracing::debug!(task_id = %task.id, "Task already in flight");
                return SubmitOutcome::AlreadyInFlight;
            }
            Entry::Vacant(slot) => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    slot.insert(InFlightTask {
                        name: task.name.clone(),
                        task_type: task.task_type,
                        started_at: Utc::now(),
                        started: Instant::now(),
                    });
                    permit
                }
                Err(_) => {
                    tracing::trace!(task_id = %task.id, "All executor slots occupied");
                    return SubmitOutcome::AtCapacity;
                }
            },
        };
        let guard = InFlightGuard {
            task_id: task.id,
            in_flight: Arc::clone(&self.in_flight),
        };

        match self
            .store
            .compare_and_set_status(task.id, &[TaskStatus::Pending], TaskStatus::Running)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(task_id = %task.id, "Task no longer pending, skipping");
                return SubmitOutcome::NotClaimable;
            }
            Err(e) => {
                tracing::error!(task_id = %task.id, error = %e, "Failed to claim task");
                return SubmitOutcome::NotClaimable;
            }
        }

        let attempt = Attempt {
            store: Arc::clone(&self.store),
            units: Arc::clone(&self.units),
            policy: self.policy,
            events: self.events.clone(),
        };
        tokio::spawn(attempt.run(task, permit, guard));
        SubmitOutcome::Accepted
    }

    /// Reject further submissions.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Accept submissions again after a drain.
    pub fn resume(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Whether submissions are accepted.
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Wait up to `grace` for running tasks to finish.
    ///
    /// Returns the number of tasks still running when the wait ended.
    pub async fn drain(&self, grace: Duration) -> usize {
        let permits = u32::try_from(self.max_concurrent).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, self.semaphore.acquire_many(permits)).await {
            Ok(Ok(all)) => {
                drop(all);
                0
            }
            Ok(Err(_)) | Err(_) => self.in_flight.len(),
        }
    }

    /// Slot count.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free slots.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Number of running tasks.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Check if `task_id` is running here.
    pub fn is_in_flight(&self, task_id: Uuid) -> bool {
        self.in_flight.contains_key(&task_id)
    }

    /// Running tasks, longest-running first.
    pub fn in_flight(&self) -> Vec<InFlightSnapshot> {
        let mut tasks: Vec<InFlightSnapshot> = self
            .in_flight
            .iter()
            .map(|entry| InFlightSnapshot {
                task_id: *entry.key(),
                name: entry.name.clone(),
                task_type: entry.task_type,
                started_at: entry.started_at,
                elapsed_ms: entry.started.elapsed().as_millis() as u64,
            })
            .collect();
        tasks.sort_by_key(|t| t.started_at);
        tasks
    }
}

/// Everything one spawned attempt needs.
struct Attempt {
    store: Arc<dyn TaskStore>,
    units: Arc<UnitRegistry>,
    policy: RetryPolicy,
    events: EventBus,
}

impl Attempt {
    async fn run(self, task: Task, permit: OwnedSemaphorePermit, guard: InFlightGuard) {
        let _permit = permit;
        let _guard = guard;
        let attempt = task.retry_count + 1;

        tracing::info!(
            task_id = %task.id,
            name = %task.name,
            task_type = %task.task_type,
            attempt,
            "Task started"
        );
        self.events.publish(TaskEvent::Started {
            task_id: task.id,
            name: task.name.clone(),
            attempt,
        });

        let started = Instant::now();
        let (outcome, policy) = match self.units.get(task.task_type) {
            Some(unit) => {
                let policy = self.policy.with_base(unit.retry_base_delay());
                let ctx = UnitContext::new(task.id, self.events.clone());
                let body = {
                    let task = task.clone();
                    tokio::spawn(async move { unit.run(&task, &ctx).await })
                };
                let outcome = match body.await {
                    Ok(outcome) => outcome,
                    Err(e) => Err(UnitError::Transient(format!(
                        "collection unit aborted: {e}"
                    ))),
                };
                (outcome, policy)
            }
            None => (
                Err(UnitError::Permanent(format!(
                    "no collection unit registered for task type '{}'",
                    task.task_type
                ))),
                self.policy,
            ),
        };

        match outcome {
            Ok(output) => self.succeed(&task, output, started).await,
            Err(error) => self.fail(&task, &policy, error).await,
        }
    }

    async fn succeed(&self, task: &Task, output: Option<serde_json::Value>, started: Instant) {
        if let Err(e) = retry::record_success(self.store.as_ref(), task, output).await {
            tracing::error!(task_id = %task.id, error = %e, "Failed to record task success");
            return;
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(task_id = %task.id, duration_ms, "Task completed");
        self.events.publish(TaskEvent::Completed {
            task_id: task.id,
            duration_ms,
        });
    }

    async fn fail(&self, task: &Task, policy: &RetryPolicy, error: UnitError) {
        let decision =
            match retry::record_failure(self.store.as_ref(), task, policy, &error, Utc::now()).await
            {
                Ok(decision) => decision,
                Err(e) => {
                    tracing::error!(
                        task_id = %task.id,
                        error = %e,
                        unit_error = %error,
                        "Failed to record task failure"
                    );
                    return;
                }
            };

        match decision {
            RetryDecision::Retry {
                retry_count,
                delay,
                next_run_time,
            } => {
                tracing::warn!(
                    task_id = %task.id,
                    retry_count,
                    max_retries = task.max_retries,
                    delay_secs = delay.as_secs(),
                    error = %error,
                    "Task failed, retry scheduled"
                );
                self.events.publish(TaskEvent::RetryScheduled {
                    task_id: task.id,
                    retry_count,
                    next_run_time,
                    error: error.to_string(),
                });
            }
            RetryDecision::Fail { retry_count } => {
                tracing::error!(
                    task_id = %task.id,
                    retry_count,
                    max_retries = task.max_retries,
                    error = %error,
                    "Task failed"
                );
                self.events.publish(TaskEvent::Failed {
                    task_id: task.id,
                    error: error.to_string(),
                });
            }
        }
    }
}
