//! Built-in collection units.

pub mod articles;
pub mod cleanup;

pub use articles::ArticleFetchUnit;
pub use cleanup::{HistoryCleanupUnit, history_cutoff, purge_history};
