//! Function registry
//!
//! Verbs such as `SetVar` or `VerifyCode` are looked up by name when a
//! `${...}` call is evaluated. Each verb declares a [`Signature`], and
//! arguments are bound against it before the verb runs.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::ContextStore;
use crate::common::{Error, Result};
use crate::template::render;

/// Evaluated arguments of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            named: Vec::new(),
        }
    }

    pub fn push(&mut self, value: Value) {
        self.positional.push(value);
    }

    pub fn push_named(&mut self, name: impl Into<String>, value: Value) {
        self.named.push((name.into(), value));
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    /// Keyword arguments that did not map onto a declared parameter
    pub fn named(&self) -> &[(String, Value)] {
        &self.named
    }

    /// Positional argument rendered as text; only valid after binding
    pub fn str(&self, index: usize) -> String {
        self.positional.get(index).map(render).unwrap_or_default()
    }
}

/// Declared parameters of a verb
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Parameter names, in positional order
    pub params: &'static [&'static str],
    /// How many leading parameters are mandatory
    pub required: usize,
    /// Whether arbitrary keyword arguments are accepted
    pub keywords: bool,
}

impl Signature {
    /// Exactly these parameters, all mandatory
    pub const fn exact(params: &'static [&'static str]) -> Self {
        Self {
            params,
            required: params.len(),
            keywords: false,
        }
    }

    /// These parameters, the first `required` of them mandatory
    pub const fn optional(params: &'static [&'static str], required: usize) -> Self {
        Self {
            params,
            required,
            keywords: false,
        }
    }

    /// Free-form keyword arguments only
    pub const fn keywords_only() -> Self {
        Self {
            params: &[],
            required: 0,
            keywords: true,
        }
    }

    /// Bind call-site arguments, moving matching keywords into position
    pub fn bind(&self, function: &str, args: Args) -> Result<Args> {
        if args.positional.len() > self.params.len() {
            return Err(Error::argument(
                function,
                format!(
                    "expected at most {} argument(s), got {}",
                    self.params.len(),
                    args.positional.len()
                ),
            ));
        }

        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (slot, value) in slots.iter_mut().zip(args.positional) {
            *slot = Some(value);
        }

        let mut extra = Vec::new();
        for (name, value) in args.named {
            match self.params.iter().position(|p| *p == name) {
                Some(index) if slots[index].is_some() => {
                    return Err(Error::argument(
                        function,
                        format!("argument '{}' given twice", name),
                    ));
                }
                Some(index) => slots[index] = Some(value),
                None if self.keywords => extra.push((name, value)),
                None => {
                    return Err(Error::argument(
                        function,
                        format!("unexpected keyword argument '{}'", name),
                    ));
                }
            }
        }

        let mut positional = Vec::with_capacity(slots.len());
        let mut gap = None;
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(value) => {
                    if let Some(missing) = gap {
                        return Err(Error::argument(
                            function,
                            format!("missing argument '{}'", self.params[missing]),
                        ));
                    }
                    positional.push(value);
                }
                None => {
                    gap.get_or_insert(index);
                }
            }
        }

        if positional.len() < self.required {
            return Err(Error::argument(
                function,
                format!(
                    "expected {} argument(s), got {}",
                    self.arity(),
                    positional.len()
                ),
            ));
        }

        Ok(Args {
            positional,
            named: extra,
        })
    }

    /// Human-readable arity, e.g. `2`, `2-3` or `keywords`
    pub fn arity(&self) -> String {
        if self.keywords && self.params.is_empty() {
            "keywords".to_string()
        } else if self.required == self.params.len() {
            self.required.to_string()
        } else {
            format!("{}-{}", self.required, self.params.len())
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i < self.required {
                    p.to_string()
                } else {
                    format!("{}?", p)
                }
            })
            .collect();
        if self.keywords {
            parts.push("key=value...".to_string());
        }
        write!(f, "({})", parts.join(", "))
    }
}

/// A callable verb
pub trait Function: Send + Sync {
    fn signature(&self) -> Signature;

    fn call(&self, ctx: &mut ContextStore, args: Args) -> Result<Value>;
}

/// Adapter turning a closure or fn pointer into a [`Function`]
pub struct FnFunction<F> {
    signature: Signature,
    f: F,
}

impl<F> FnFunction<F>
where
    F: Fn(&mut ContextStore, Args) -> Result<Value> + Send + Sync,
{
    pub fn new(signature: Signature, f: F) -> Self {
        Self { signature, f }
    }
}

impl<F> Function for FnFunction<F>
where
    F: Fn(&mut ContextStore, Args) -> Result<Value> + Send + Sync,
{
    fn signature(&self) -> Signature {
        self.signature
    }

    fn call(&self, ctx: &mut ContextStore, args: Args) -> Result<Value> {
        (self.f)(ctx, args)
    }
}

/// Name-keyed set of verbs
///
/// Cloning is cheap; clones share the function objects, so every run can
/// start from the same registry with its own variables.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, Arc<dyn Function>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verb, replacing any previous one with the same name
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn Function>) {
        let name = name.into();
        if self.functions.insert(name.clone(), function).is_some() {
            tracing::debug!("Function '{}' re-registered", name);
        }
    }

    /// Register a closure as a verb
    pub fn register_fn<F>(&mut self, name: impl Into<String>, signature: Signature, f: F)
    where
        F: Fn(&mut ContextStore, Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnFunction::new(signature, f)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Registered names with their signatures, sorted by name
    pub fn signatures(&self) -> Vec<(&str, Signature)> {
        self.functions
            .iter()
            .map(|(name, f)| (name.as_str(), f.signature()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}
