//! Scheduled task entities.

pub mod kind;
pub mod model;
pub mod status;

pub use kind::TaskKind;
pub use model::{CreateTask, StatusCounts, Task, TaskOutcome};
pub use status::TaskStatus;
