//! Core type definitions used across the CollectHub workspace.

pub mod pagination;

pub use pagination::{PageRequest, PageResponse};
