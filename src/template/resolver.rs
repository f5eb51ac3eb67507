//! Template evaluation against a [`ContextStore`]
//!
//! Evaluation is innermost-first: call arguments are resolved left to
//! right before the call runs. A string that is exactly one placeholder
//! keeps the placeholder's value type; anything else becomes a string.

use serde_json::{Map, Value};

use super::parser::{parse_template, ArgValue, Call, Segment, Template};
use super::render;
use crate::common::{Error, Result};
use crate::context::{Args, ContextStore};

/// Evaluator borrowing a store for the duration of one resolution
pub struct Resolver<'a> {
    ctx: &'a mut ContextStore,
    /// Deferred variables currently being expanded, outermost first
    expanding: Vec<String>,
    depth: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(ctx: &'a mut ContextStore) -> Self {
        Self {
            ctx,
            expanding: Vec::new(),
            depth: 0,
        }
    }

    /// Resolve every string in a structured value; map keys included
    pub fn resolve_value(&mut self, value: &Value) -> Result<Value> {
        match value {
            Value::String(text) => self.resolve_str(text),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let key = render(&self.resolve_str(key)?);
                    out.insert(key, self.resolve_value(item)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    pub fn resolve_str(&mut self, text: &str) -> Result<Value> {
        // Fast path for the common placeholder-free case
        if !text.contains('$') {
            return Ok(Value::String(text.to_string()));
        }
        let template = parse_template(text, self.ctx.max_depth())?;
        let value = self.eval_template(&template)?;
        tracing::debug!("resolved {:?} -> {}", text, value);
        Ok(value)
    }

    pub fn eval_template(&mut self, template: &Template) -> Result<Value> {
        if let Some(segment) = template.sole_placeholder() {
            return self.eval_segment(segment);
        }

        let mut out = String::new();
        for segment in &template.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                other => out.push_str(&render(&self.eval_segment(other)?)),
            }
        }
        Ok(Value::String(out))
    }

    fn eval_segment(&mut self, segment: &Segment) -> Result<Value> {
        match segment {
            Segment::Text(text) => Ok(Value::String(text.clone())),
            Segment::Var(name) => self.variable(name),
            Segment::Call(call) => self.eval_call(call),
        }
    }

    /// Look up a variable, expanding deferred templates with a cycle guard
    pub fn variable(&mut self, name: &str) -> Result<Value> {
        let value = self.ctx.require(name)?.clone();
        if !self.ctx.is_deferred(name) {
            return Ok(value);
        }

        if self.expanding.iter().any(|n| n == name) {
            let mut chain = self.expanding.clone();
            chain.push(name.to_string());
            return Err(Error::CyclicVariable(chain.join(" -> ")));
        }

        self.enter()?;
        self.expanding.push(name.to_string());
        let result = self.resolve_value(&value);
        self.expanding.pop();
        self.leave();
        result
    }

    /// Evaluate a call expression: check the verb exists, resolve the arguments, invoke
    pub fn eval_call(&mut self, call: &Call) -> Result<Value> {
        if !self.ctx.has_function(&call.name) {
            return Err(Error::UnknownFunction(call.name.clone()));
        }

        self.enter()?;
        let result = self
            .eval_args(call)
            .and_then(|args| self.ctx.call(&call.name, args));
        self.leave();

        if let Ok(value) = &result {
            tracing::debug!("called {} -> {}", call.name, value);
        }
        result
    }

    fn eval_args(&mut self, call: &Call) -> Result<Args> {
        let mut args = Args::default();
        for arg in &call.args {
            let value = match &arg.value {
                ArgValue::Literal(value) => value.clone(),
                ArgValue::Quoted(template) => Value::String(render(&self.eval_template(template)?)),
                ArgValue::Expr(template) => self.eval_template(template)?,
            };
            match &arg.name {
                Some(name) => args.push_named(name.clone(), value),
                None => args.push(value),
            }
        }
        Ok(args)
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.ctx.max_depth() {
            self.depth -= 1;
            return Err(Error::RecursionLimit(self.ctx.max_depth()));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
