//! Step executors, dispatched by step kind
//!
//! No protocol drivers ship with the engine. Callers register an executor per
//! [`StepKind`]; steps of a kind with no executor are skipped.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::common::Result;
use crate::context::ContextStore;
use crate::definition::StepKind;

/// Performs one protocol or UI action
pub trait StepExecutor: Send + Sync {
    /// Run a step whose fields are already resolved and return its result
    fn execute(&self, kind: &StepKind, fields: &Value, ctx: &ContextStore) -> Result<Value>;
}

/// Closure adapter for [`StepExecutor`]
pub struct FnExecutor<F>(pub F);

impl<F> StepExecutor for FnExecutor<F>
where
    F: Fn(&StepKind, &Value, &ContextStore) -> Result<Value> + Send + Sync,
{
    fn execute(&self, kind: &StepKind, fields: &Value, ctx: &ContextStore) -> Result<Value> {
        (self.0)(kind, fields, ctx)
    }
}

/// Executors keyed by step kind
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<StepKind, Arc<dyn StepExecutor>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor; a later registration for the same kind wins
    pub fn register(&mut self, kind: StepKind, executor: Arc<dyn StepExecutor>) {
        if self.executors.insert(kind.clone(), executor).is_some() {
            tracing::debug!("replaced executor for '{}' steps", kind);
        }
    }

    pub fn register_fn<F>(&mut self, kind: StepKind, f: F)
    where
        F: Fn(&StepKind, &Value, &ContextStore) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(FnExecutor(f)));
    }

    pub fn get(&self, kind: &StepKind) -> Option<&Arc<dyn StepExecutor>> {
        self.executors.get(kind)
    }

    pub fn contains(&self, kind: &StepKind) -> bool {
        self.executors.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &StepKind> {
        self.executors.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_by_kind() {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn(StepKind::Request, |_, fields, _| Ok(json!({"echo": fields})));
        registry.register_fn(StepKind::Other("ftp".into()), |kind, _, _| Ok(json!(kind.as_str())));

        let ctx = ContextStore::new();
        let request = registry.get(&StepKind::Request).unwrap();
        assert_eq!(
            request.execute(&StepKind::Request, &json!({"url": "/"}), &ctx).unwrap(),
            json!({"echo": {"url": "/"}})
        );
        let ftp = StepKind::Other("ftp".into());
        assert_eq!(registry.get(&ftp).unwrap().execute(&ftp, &Value::Null, &ctx).unwrap(), json!("ftp"));
        assert!(!registry.contains(&StepKind::WebDriver));
    }

    #[test]
    fn test_later_registration_wins() {
        let mut registry = ExecutorRegistry::new();
        registry.register_fn(StepKind::Request, |_, _, _| Ok(json!(1)));
        registry.register_fn(StepKind::Request, |_, _, _| Ok(json!(2)));
        let ctx = ContextStore::new();
        let value = registry
            .get(&StepKind::Request)
            .unwrap()
            .execute(&StepKind::Request, &Value::Null, &ctx)
            .unwrap();
        assert_eq!(value, json!(2));
        assert_eq!(registry.kinds().count(), 1);
    }
}
