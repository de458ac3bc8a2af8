//! # collecthub-entity
//!
//! Entity models for CollectHub. [`task::Task`] mirrors a row of the
//! `tasks` table and derives `sqlx::FromRow`; [`trigger::Trigger`] is an
//! in-memory registry entry owned by the job manager.

pub mod task;
pub mod trigger;
