//! Recurring trigger entities.

pub mod model;

pub use model::{TaskTemplate, Trigger};
