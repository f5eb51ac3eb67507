//! Run-scoped variable and function environment
//!
//! One [`ContextStore`] lives for exactly one run. Pre/post-command and
//! verify actions mutate it; steps read it. Writes are last-write-wins.

pub mod builtins;
pub mod functions;

use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::common::{Error, Result};
use crate::template::Resolver;

pub use functions::{Args, FnFunction, Function, FunctionRegistry, Signature};

/// Default maximum nesting of template evaluation
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Variables, verbs and extracted results for one run
#[derive(Debug, Clone)]
pub struct ContextStore {
    variables: BTreeMap<String, Value>,
    /// Variables whose string content is itself a template, expanded on read
    deferred: BTreeSet<String>,
    functions: FunctionRegistry,
    patterns: BTreeMap<String, Regex>,
    last_result: Option<Value>,
    max_depth: usize,
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore {
    /// An empty store with no functions registered
    pub fn new() -> Self {
        Self::with_functions(FunctionRegistry::new())
    }

    /// A store starting from an existing registry
    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self {
            variables: BTreeMap::new(),
            deferred: BTreeSet::new(),
            functions,
            patterns: BTreeMap::new(),
            last_result: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// A store with the built-in verbs registered
    pub fn with_builtins() -> Self {
        Self::with_functions(builtins::default_registry())
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.max_depth = max_depth.max(1);
    }

    // === Variables ===

    /// Raw bound value, without expanding deferred templates
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Bound value or `UnresolvedVariable`
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::UnresolvedVariable(name.to_string()))
    }

    /// Bind a concrete value
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.deferred.remove(&name);
        self.variables.insert(name, value);
    }

    /// Bind a value whose strings are templates, resolved each time it is read
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        self.deferred.insert(name.clone());
        self.variables.insert(name, value);
    }

    pub fn is_deferred(&self, name: &str) -> bool {
        self.deferred.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.deferred.remove(name);
        self.variables.remove(name)
    }

    /// Copy of every binding, deferred values left unexpanded
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.variables.clone()
    }

    // === Functions ===

    /// Register a verb; later registrations replace earlier ones
    pub fn register_function(&mut self, name: impl Into<String>, function: std::sync::Arc<dyn Function>) {
        self.functions.register(name, function);
    }

    /// Register a closure as a verb
    pub fn register_fn<F>(&mut self, name: impl Into<String>, signature: Signature, f: F)
    where
        F: Fn(&mut ContextStore, Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.functions.register_fn(name, signature, f);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains(name)
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Invoke a verb by name with already-evaluated arguments
    pub fn call(&mut self, name: &str, args: Args) -> Result<Value> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        let args = function.signature().bind(name, args)?;
        function.call(self, args)
    }

    // === Patterns and results ===

    /// Register a named extraction pattern
    pub fn set_pattern(&mut self, name: impl Into<String>, pattern: Regex) {
        self.patterns.insert(name.into(), pattern);
    }

    pub fn pattern(&self, name: &str) -> Option<&Regex> {
        self.patterns.get(name)
    }

    /// Result of the most recent step
    pub fn last_result(&self) -> Option<&Value> {
        self.last_result.as_ref()
    }

    pub fn set_last_result(&mut self, value: Value) {
        self.last_result = Some(value);
    }

    // === Resolution ===

    /// Template evaluator bound to this store
    pub fn resolver(&mut self) -> Resolver<'_> {
        Resolver::new(self)
    }

    /// Resolve a string, returning the raw value when it is a single placeholder
    pub fn resolve_str(&mut self, text: &str) -> Result<Value> {
        self.resolver().resolve_str(text)
    }

    /// Resolve every string inside a structured value
    pub fn resolve_value(&mut self, value: &Value) -> Result<Value> {
        self.resolver().resolve_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_overwrites() {
        let mut ctx = ContextStore::new();
        ctx.set("a", json!(1));
        ctx.set("a", json!("two"));
        assert_eq!(ctx.get("a"), Some(&json!("two")));
        assert!(matches!(ctx.require("b"), Err(Error::UnresolvedVariable(n)) if n == "b"));
    }

    #[test]
    fn test_set_clears_deferred() {
        let mut ctx = ContextStore::new();
        ctx.define("url", json!("http://$host"));
        assert!(ctx.is_deferred("url"));
        ctx.set("url", json!("fixed"));
        assert!(!ctx.is_deferred("url"));
    }

    #[test]
    fn test_call_unknown_function() {
        let mut ctx = ContextStore::new();
        let err = ctx.call("Missing", Args::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownFunction(name) if name == "Missing"));
    }

    #[test]
    fn test_call_checks_signature() {
        let mut ctx = ContextStore::new();
        ctx.register_fn("Double", Signature::exact(&["n"]), |_, args| {
            let n = args.get(0).and_then(Value::as_i64).unwrap_or(0);
            Ok(json!(n * 2))
        });
        assert_eq!(ctx.call("Double", Args::new(vec![json!(21)])).unwrap(), json!(42));
        assert!(matches!(
            ctx.call("Double", Args::default()),
            Err(Error::ArgumentError { .. })
        ));
    }

    #[test]
    fn test_functions_can_mutate_store() {
        let mut ctx = ContextStore::new();
        ctx.register_fn("Mark", Signature::exact(&["name"]), |ctx, args| {
            ctx.set(args.str(0), json!(true));
            Ok(Value::Null)
        });
        ctx.call("Mark", Args::new(vec![json!("seen")])).unwrap();
        assert_eq!(ctx.get("seen"), Some(&json!(true)));
    }

    #[test]
    fn test_independent_stores_share_registry() {
        let base = ContextStore::with_builtins();
        let mut first = ContextStore::with_functions(base.functions().clone());
        let second = ContextStore::with_functions(base.functions().clone());
        first.set("x", json!(1));
        assert!(second.get("x").is_none());
        assert!(second.has_function("SetVar"));
    }
}
