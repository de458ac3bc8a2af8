//! Convenience result type alias for CollectHub.

use crate::error::AppError;

/// A specialized `Result` type for CollectHub operations.
pub type AppResult<T> = Result<T, AppError>;
