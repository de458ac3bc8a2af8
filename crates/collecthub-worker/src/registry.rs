//! Task kind to collection unit dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use tracing;

use collecthub_core::error::AppError;
use collecthub_entity::task::TaskKind;

use crate::unit::CollectionUnit;

/// Registered collection units by task kind.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: HashMap<TaskKind, Arc<dyn CollectionUnit>>,
}

impl UnitRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit, replacing any previous unit for its kind.
    pub fn register(&mut self, unit: Arc<dyn CollectionUnit>) {
        let kind = unit.kind();
        if self.units.insert(kind, unit).is_some() {
            tracing::warn!(kind = %kind, "Replaced collection unit");
        } else {
            tracing::info!(kind = %kind, "Registered collection unit");
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, unit: Arc<dyn CollectionUnit>) -> Self {
        self.register(unit);
        self
    }

    /// Unit for `kind`, if registered.
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn CollectionUnit>> {
        self.units.get(&kind).cloned()
    }

    /// Check if a unit is registered for `kind`.
    pub fn contains(&self, kind: TaskKind) -> bool {
        self.units.contains_key(&kind)
    }

    /// Parse a task type string and require a registered unit for it.
    pub fn resolve(&self, task_type: &str) -> Result<TaskKind, AppError> {
        let kind: TaskKind = task_type.parse()?;
        if !self.contains(kind) {
            return Err(AppError::validation(format!(
                "no collection unit registered for task type '{kind}'"
            )));
        }
        Ok(kind)
    }

    /// Registered kinds.
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.units.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use collecthub_entity::task::Task;
    use serde_json::Value;

    use crate::unit::{UnitContext, UnitError};

    #[derive(Debug)]
    struct Noop;

    #[async_trait]
    impl CollectionUnit for Noop {
        fn kind(&self) -> TaskKind {
            TaskKind::CollectArticles
        }

        async fn run(&self, _task: &Task, _ctx: &UnitContext) -> Result<Option<Value>, UnitError> {
            Ok(None)
        }
    }

    #[test]
    fn test_resolve_requires_registration() {
        let registry = UnitRegistry::new().with(Arc::new(Noop));
        assert_eq!(
            registry.resolve("collect_articles").unwrap(),
            TaskKind::CollectArticles
        );
        assert!(registry.resolve("history_cleanup").is_err());
        assert!(registry.resolve("nope").is_err());
        assert_eq!(registry.kinds(), vec![TaskKind::CollectArticles]);
    }
}
