//! PostgreSQL repository implementations.

pub mod task;

pub use task::TaskRepository;
