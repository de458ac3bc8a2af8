//! The closed set of task types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use collecthub_core::error::AppError;

/// Selects which collection unit runs a task.
///
/// Parsing an unknown type string fails, so an unrecognized type is a
/// configuration error at creation time rather than a task failure at run
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Fetch article pages for an account.
    CollectArticles,
    /// Purge old completed and failed task rows.
    HistoryCleanup,
}

impl TaskKind {
    /// All task kinds.
    pub const ALL: [TaskKind; 2] = [Self::CollectArticles, Self::HistoryCleanup];

    /// Return the kind as its wire string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectArticles => "collect_articles",
            Self::HistoryCleanup => "history_cleanup",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(TaskKind::as_str).collect();
                AppError::validation(format!(
                    "unknown task type '{s}' (expected one of: {})",
                    known.join(", ")
                ))
            })
    }
}
