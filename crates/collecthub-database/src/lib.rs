//! # collecthub-database
//!
//! The [`TaskStore`] abstraction consumed by the scheduling engine, with a
//! PostgreSQL implementation ([`repositories::TaskRepository`]) and an
//! in-process one ([`memory::MemoryTaskStore`]).

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;
pub mod store;

pub use connection::DatabasePool;
pub use store::TaskStore;
