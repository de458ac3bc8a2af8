//! Poller: discovers due tasks and hands them to the executor.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing;

use collecthub_core::result::AppResult;
use collecthub_database::TaskStore;

use crate::executor::{SubmitOutcome, TaskExecutor};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Due tasks returned by the store.
    pub due: usize,
    /// Tasks the executor accepted.
    pub submitted: usize,
    /// Tasks skipped as in-flight or no longer pending.
    pub skipped: usize,
    /// The cycle stopped because the executor was full.
    pub at_capacity: bool,
}

/// Periodic task poller.
#[derive(Debug)]
pub struct TaskPoller {
    store: Arc<dyn TaskStore>,
    executor: Arc<TaskExecutor>,
    interval: Duration,
    batch_size: u64,
}

impl TaskPoller {
    /// Create a poller running every `interval`, fetching at most
    /// `batch_size` due tasks per cycle.
    pub fn new(
        store: Arc<dyn TaskStore>,
        executor: Arc<TaskExecutor>,
        interval: Duration,
        batch_size: u64,
    ) -> Self {
        Self {
            store,
            executor,
            interval,
            batch_size: batch_size.max(1),
        }
    }

    /// Run one cycle.
    ///
    /// Due tasks are submitted in store order (priority, then age) until the
    /// executor reports it is full; the rest wait for a later cycle.
    pub async fn poll_once(&self) -> AppResult<PollReport> {
        let mut report = PollReport::default();
        if self.executor.available_slots() == 0 {
            tracing::trace!("All executor slots occupied, skipping poll");
            report.at_capacity = true;
            return Ok(report);
        }

        let due = self.store.find_pending(Utc::now(), self.batch_size).await?;
        report.due = due.len();

        for task in due {
            match self.executor.submit(task).await {
                SubmitOutcome::Accepted => report.submitted += 1,
                SubmitOutcome::AlreadyInFlight | SubmitOutcome::NotClaimable => {
                    report.skipped += 1
                }
                SubmitOutcome::AtCapacity => {
                    report.at_capacity = true;
                    break;
                }
                SubmitOutcome::ShuttingDown => break,
            }
        }

        if report.due > 0 {
            tracing::debug!(
                due = report.due,
                submitted = report.submitted,
                skipped = report.skipped,
                at_capacity = report.at_capacity,
                "Poll cycle finished"
            );
        }
        Ok(report)
    }

    /// Poll until `shutdown` flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            batch_size = self.batch_size,
            "Task poller started"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!(error = %e, "Poll cycle skipped: failed to query due tasks");
                    }
                }
            }
        }

        tracing::info!("Task poller stopped");
    }
}
