//! Task scheduling and execution engine for CollectHub.
//!
//! This crate provides:
//! - A poller that discovers due tasks and hands them to the executor
//! - A concurrency-bounded executor with single-claim semantics
//! - The retry/backoff state machine and manual cancel/retry transitions
//! - A cron-driven trigger registry that spawns tasks from templates
//! - The [`JobManager`] façade composing all of the above
//! - Built-in collection units for article fetching and history cleanup

pub mod cron;
pub mod events;
pub mod executor;
pub mod jobs;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod unit;

pub use events::EventBus;
pub use executor::{SubmitOutcome, TaskExecutor};
pub use manager::{EngineSnapshot, JobManager, TaskRequest};
pub use registry::UnitRegistry;
pub use runner::TaskPoller;
pub use scheduler::TriggerRegistry;
pub use unit::{CollectionUnit, UnitContext, UnitError};
