//! Recurring trigger registry backed by `tokio-cron-scheduler`.
//!
//! Each trigger owns one cron job. Every job closure carries the generation
//! of the trigger it was created for; a firing whose generation no longer
//! matches the registered trigger is ignored, so a replaced or removed
//! trigger can never fire again even if its job is still queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, FixedOffset, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing;
use uuid::Uuid;

use collecthub_core::error::AppError;
use collecthub_core::events::{TaskEvent, TriggerEvent};
use collecthub_core::result::AppResult;
use collecthub_database::TaskStore;
use collecthub_entity::task::Task;
use collecthub_entity::trigger::{TaskTemplate, Trigger};

use crate::cron::CronExpr;
use crate::events::EventBus;

/// A trigger together with its upcoming fire time.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerInfo {
    /// The trigger definition.
    #[serde(flatten)]
    pub trigger: Trigger,
    /// Next fire time, if one exists.
    pub next_fire_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct TriggerEntry {
    trigger: Trigger,
    schedule: CronExpr,
    job_id: Uuid,
    generation: u64,
}

/// State shared with the cron job closures.
#[derive(Debug)]
struct Firing {
    store: Arc<dyn TaskStore>,
    events: EventBus,
    triggers: DashMap<String, TriggerEntry>,
    enabled: AtomicBool,
}

impl Firing {
    /// Handle a scheduled firing of `name` at `generation`.
    async fn fire(&self, name: &str, generation: u64) {
        let template = match self.triggers.get(name) {
            Some(entry) if entry.generation == generation => entry.trigger.template.clone(),
            _ => {
                tracing::debug!(trigger = %name, generation, "Ignoring stale trigger firing");
                return;
            }
        };
        if !self.enabled.load(Ordering::Acquire) {
            tracing::debug!(trigger = %name, "Engine stopped, trigger firing skipped");
            return;
        }

        if let Err(e) = self.spawn_task(name, &template).await {
            tracing::error!(trigger = %name, error = %e, "Failed to insert task for trigger firing");
        }
    }

    /// Insert one task from `template`.
    async fn spawn_task(&self, name: &str, template: &TaskTemplate) -> AppResult<Task> {
        let data = template.instantiate(name, Utc::now());
        let task = self.store.insert(&data).await?;

        tracing::debug!(trigger = %name, task_id = %task.id, "Trigger fired");
        self.events.publish(TriggerEvent::Fired {
            name: name.to_string(),
            task_id: task.id,
        });
        self.events.publish(TaskEvent::Created {
            task_id: task.id,
            name: task.name.clone(),
            task_type: task.task_type.to_string(),
        });
        Ok(task)
    }
}

/// Named cron triggers that spawn tasks into the store.
pub struct TriggerRegistry {
    scheduler: JobScheduler,
    firing: Arc<Firing>,
    timezone: FixedOffset,
    generation: AtomicU64,
    started: AtomicBool,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("triggers", &self.firing.triggers.len())
            .field("timezone", &self.timezone)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl TriggerRegistry {
    /// Create a registry evaluating schedules in `timezone`.
    ///
    /// Firing is disabled until [`start`](Self::start) is called.
    pub async fn new(
        store: Arc<dyn TaskStore>,
        events: EventBus,
        timezone: FixedOffset,
    ) -> AppResult<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::internal(format!("Failed to create trigger scheduler: {e}")))?;

        Ok(Self {
            scheduler,
            firing: Arc::new(Firing {
                store,
                events,
                triggers: DashMap::new(),
                enabled: AtomicBool::new(false),
            }),
            timezone,
            generation: AtomicU64::new(0),
            started: AtomicBool::new(false),
        })
    }

    /// Register or replace the trigger `name`.
    ///
    /// Returns `true` when an existing trigger was replaced. The replaced
    /// trigger stops firing; tasks it already created are left alone.
    pub async fn schedule(&self, name: &str, cron: &str, template: TaskTemplate) -> AppResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::validation("trigger name must not be empty"));
        }
        let schedule = CronExpr::parse(cron)?;
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

        let firing = Arc::clone(&self.firing);
        let job_name = name.to_string();
        let job = CronJob::new_async_tz(
            schedule.scheduler_expression().as_str(),
            self.timezone,
            move |_uuid, _lock| {
                let firing = Arc::clone(&firing);
                let name = job_name.clone();
                Box::pin(async move {
                    firing.fire(&name, generation).await;
                })
            },
        )
        .map_err(|e| {
            AppError::validation(format!("Failed to create schedule for trigger '{name}': {e}"))
        })?;

        let job_id = self.scheduler.add(job).await.map_err(|e| {
            AppError::internal(format!("Failed to add schedule for trigger '{name}': {e}"))
        })?;

        let entry = TriggerEntry {
            trigger: Trigger {
                name: name.to_string(),
                cron: schedule.as_str().to_string(),
                template,
                created_at: Utc::now(),
                active: true,
            },
            schedule,
            job_id,
            generation,
        };
        let cron = entry.trigger.cron.clone();
        let previous = self.firing.triggers.insert(name.to_string(), entry);

        let replaced = previous.is_some();
        if let Some(previous) = previous {
            self.remove_job(name, previous.job_id).await;
        }

        tracing::info!(trigger = %name, cron = %cron, replaced, "Trigger scheduled");
        self.firing.events.publish(TriggerEvent::Scheduled {
            name: name.to_string(),
            cron,
            replaced,
        });
        Ok(replaced)
    }

    /// Remove the trigger `name`. Returns whether it existed.
    pub async fn unschedule(&self, name: &str) -> bool {
        let Some((_, entry)) = self.firing.triggers.remove(name) else {
            return false;
        };
        self.remove_job(name, entry.job_id).await;

        tracing::info!(trigger = %name, "Trigger removed");
        self.firing.events.publish(TriggerEvent::Removed {
            name: name.to_string(),
        });
        true
    }

    async fn remove_job(&self, name: &str, job_id: Uuid) {
        if let Err(e) = self.scheduler.remove(&job_id).await {
            tracing::warn!(trigger = %name, error = %e, "Failed to remove cron job");
        }
    }

    /// Insert one task for `name` right now, regardless of its schedule.
    pub async fn fire_now(&self, name: &str) -> AppResult<Task> {
        let template = self
            .firing
            .triggers
            .get(name)
            .map(|entry| entry.trigger.template.clone())
            .ok_or_else(|| AppError::not_found(format!("Trigger '{name}' not found")))?;
        self.firing.spawn_task(name, &template).await
    }

    /// Look up a trigger.
    pub fn get(&self, name: &str) -> Option<Trigger> {
        self.firing.triggers.get(name).map(|entry| {
            let mut trigger = entry.trigger.clone();
            trigger.active = self.is_enabled();
            trigger
        })
    }

    /// All triggers sorted by name, with their next fire time.
    pub fn list(&self) -> Vec<TriggerInfo> {
        let now = Utc::now();
        let enabled = self.is_enabled();
        let mut triggers: Vec<TriggerInfo> = self
            .firing
            .triggers
            .iter()
            .map(|entry| {
                let mut trigger = entry.trigger.clone();
                trigger.active = enabled;
                TriggerInfo {
                    next_fire_time: entry.schedule.next_after(now, self.timezone).ok(),
                    trigger,
                }
            })
            .collect();
        triggers.sort_by(|a, b| a.trigger.name.cmp(&b.trigger.name));
        triggers
    }

    /// Number of registered triggers.
    pub fn len(&self) -> usize {
        self.firing.triggers.len()
    }

    /// Whether no triggers are registered.
    pub fn is_empty(&self) -> bool {
        self.firing.triggers.is_empty()
    }

    /// Enable firing, starting the cron scheduler on first use.
    pub async fn start(&self) -> AppResult<()> {
        if !self.started.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.scheduler.start().await {
                self.started.store(false, Ordering::Release);
                return Err(AppError::internal(format!(
                    "Failed to start trigger scheduler: {e}"
                )));
            }
            tracing::info!("Trigger scheduler started");
        }
        self.firing.enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop spawning tasks; schedules stay registered.
    pub fn pause(&self) {
        self.firing.enabled.store(false, Ordering::Release);
    }

    /// Whether firings currently spawn tasks.
    pub fn is_enabled(&self) -> bool {
        self.firing.enabled.load(Ordering::Acquire)
    }

    /// Shut the cron scheduler down for good.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.pause();
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::internal(format!("Failed to shut down trigger scheduler: {e}")))?;
        tracing::info!("Trigger scheduler shut down");
        Ok(())
    }
}
