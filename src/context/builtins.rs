//! Built-in verbs
//!
//! Registered once at run start. Extraction verbs read the most recent step
//! result; verify verbs fail by returning [`Error::Assertion`].

use serde_json::Value;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::functions::{Args, FnFunction, FunctionRegistry, Signature};
use super::ContextStore;
use crate::common::{Error, Result};
use crate::template::render;

/// Information about a built-in verb
#[derive(Clone, Copy)]
pub struct BuiltinInfo {
    pub name: &'static str,
    pub signature: Signature,
    pub description: &'static str,
    pub func: fn(&mut ContextStore, Args) -> Result<Value>,
}

/// All built-in verbs
static BUILTINS: &[BuiltinInfo] = &[
    BuiltinInfo {
        name: "Set",
        signature: Signature::keywords_only(),
        description: "Bind every keyword argument as a variable",
        func: set,
    },
    BuiltinInfo {
        name: "SetVar",
        signature: Signature::exact(&["name", "value"]),
        description: "Bind a variable",
        func: set_var,
    },
    BuiltinInfo {
        name: "GetVar",
        signature: Signature::exact(&["name"]),
        description: "Return a variable's value",
        func: get_var,
    },
    BuiltinInfo {
        name: "DyStrData",
        signature: Signature::optional(&["name", "regx", "index"], 2),
        description: "Bind a regex capture from the last step result",
        func: dy_str_data,
    },
    BuiltinInfo {
        name: "DyJsonData",
        signature: Signature::exact(&["name", "path"]),
        description: "Bind a dotted-path value from the last step result",
        func: dy_json_data,
    },
    BuiltinInfo {
        name: "GetTimestamp",
        signature: Signature::exact(&[]),
        description: "Current time in epoch milliseconds",
        func: get_timestamp,
    },
    BuiltinInfo {
        name: "VerifyVar",
        signature: Signature::exact(&["name", "expected"]),
        description: "Variable equals the expected value",
        func: verify_var,
    },
    BuiltinInfo {
        name: "VerifyEqual",
        signature: Signature::exact(&["actual", "expected"]),
        description: "Two values are equal",
        func: verify_equal,
    },
    BuiltinInfo {
        name: "VerifyCode",
        signature: Signature::exact(&["code"]),
        description: "Last step result has this status code",
        func: verify_code,
    },
    BuiltinInfo {
        name: "VerifyContain",
        signature: Signature::exact(&["text"]),
        description: "Last step result text contains the value",
        func: verify_contain,
    },
    BuiltinInfo {
        name: "VerifyNotNull",
        signature: Signature::exact(&["name"]),
        description: "Variable is bound and not null",
        func: verify_not_null,
    },
];

/// Get all built-in verbs
pub fn all_builtins() -> &'static [BuiltinInfo] {
    BUILTINS
}

/// Get built-in info by name
pub fn get_builtin(name: &str) -> Option<&'static BuiltinInfo> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Register every built-in verb into a registry
pub fn register_builtins(registry: &mut FunctionRegistry) {
    for builtin in BUILTINS {
        registry.register(builtin.name, Arc::new(FnFunction::new(builtin.signature, builtin.func)));
    }
}

/// A registry holding only the built-ins
pub fn default_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_builtins(&mut registry);
    registry
}

/// Text of a step result: a `text`/`body` string field, a string, or its JSON form
pub fn result_text(value: &Value) -> String {
    if let Value::Object(map) = value {
        for key in ["text", "body"] {
            if let Some(Value::String(text)) = map.get(key) {
                return text.clone();
            }
        }
    }
    render(value)
}

/// Walk a dotted path (`data.items.0.id`) into a value
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.')
        .filter(|part| !part.is_empty())
        .try_fold(value, |current, part| match current {
            Value::Object(map) => map.get(part),
            Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

fn last_result<'c>(ctx: &'c ContextStore, function: &str) -> Result<&'c Value> {
    ctx.last_result().ok_or_else(|| Error::FunctionFailed {
        function: function.to_string(),
        message: "no step result recorded yet".to_string(),
    })
}

fn set(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    for (name, value) in args.named() {
        ctx.set(name.clone(), value.clone());
    }
    Ok(Value::Null)
}

fn set_var(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let name = args.str(0);
    if name.is_empty() {
        return Err(Error::argument("SetVar", "variable name is empty"));
    }
    let value = args.get(1).cloned().unwrap_or(Value::Null);
    ctx.set(name, value.clone());
    Ok(value)
}

fn get_var(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    ctx.resolver().variable(&args.str(0))
}

fn dy_str_data(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let name = args.str(0);
    let regx = args.str(1);
    let index = match args.get(2) {
        None => 1,
        Some(v) => render(v)
            .parse::<usize>()
            .map_err(|_| Error::argument("DyStrData", format!("index must be a number, got {}", v)))?,
    };

    let pattern = ctx.pattern(&regx).cloned().ok_or_else(|| {
        Error::argument("DyStrData", format!("no pattern named '{}' in glob_regx", regx))
    })?;
    let text = result_text(last_result(ctx, "DyStrData")?);

    let captured = pattern
        .captures(&text)
        .and_then(|caps| caps.get(index))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::FunctionFailed {
            function: "DyStrData".to_string(),
            message: format!("pattern '{}' group {} did not match", regx, index),
        })?;

    let value = Value::String(captured);
    ctx.set(name, value.clone());
    Ok(value)
}

fn dy_json_data(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let name = args.str(0);
    let path = args.str(1);
    let result = last_result(ctx, "DyJsonData")?;
    let value = lookup_path(result, &path)
        .cloned()
        .ok_or_else(|| Error::FunctionFailed {
            function: "DyJsonData".to_string(),
            message: format!("path '{}' not found in step result", path),
        })?;
    ctx.set(name, value.clone());
    Ok(value)
}

fn get_timestamp(_ctx: &mut ContextStore, _args: Args) -> Result<Value> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Ok(Value::from(millis))
}

fn verify_var(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let name = args.str(0);
    let actual = match ctx.resolver().variable(&name) {
        Ok(value) => value,
        Err(Error::UnresolvedVariable(_)) => {
            return Err(Error::Assertion(format!("variable '{}' is not bound", name)))
        }
        Err(e) => return Err(e),
    };
    let expected = args.str(1);
    if render(&actual) != expected {
        return Err(Error::Assertion(format!(
            "variable '{}': expected '{}', got '{}'",
            name,
            expected,
            render(&actual)
        )));
    }
    Ok(Value::Bool(true))
}

fn verify_equal(_ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let (actual, expected) = (args.str(0), args.str(1));
    if actual != expected {
        return Err(Error::Assertion(format!(
            "expected '{}', got '{}'",
            expected, actual
        )));
    }
    Ok(Value::Bool(true))
}

fn verify_code(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let expected = args.str(0);
    let result = ctx
        .last_result()
        .ok_or_else(|| Error::Assertion("no step result to check the status code of".to_string()))?;
    let actual = ["status_code", "status"]
        .iter()
        .find_map(|key| result.get(key))
        .map(render)
        .ok_or_else(|| Error::Assertion("step result carries no status code".to_string()))?;
    if actual != expected {
        return Err(Error::Assertion(format!(
            "expected status code {}, got {}",
            expected, actual
        )));
    }
    Ok(Value::Bool(true))
}

fn verify_contain(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let needle = args.str(0);
    let result = ctx
        .last_result()
        .ok_or_else(|| Error::Assertion("no step result to search".to_string()))?;
    let text = result_text(result);
    if !text.contains(&needle) {
        let shown = if text.chars().count() > 200 {
            format!("{}...", text.chars().take(200).collect::<String>())
        } else {
            text
        };
        return Err(Error::Assertion(format!(
            "result does not contain '{}'. Got: '{}'",
            needle, shown
        )));
    }
    Ok(Value::Bool(true))
}

fn verify_not_null(ctx: &mut ContextStore, args: Args) -> Result<Value> {
    let name = args.str(0);
    match ctx.get(&name) {
        Some(Value::Null) | None => Err(Error::Assertion(format!(
            "variable '{}' is null or unbound",
            name
        ))),
        Some(_) => Ok(Value::Bool(true)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ContextStore {
        ContextStore::with_builtins()
    }

    #[test]
    fn test_all_builtins_registered() {
        let registry = default_registry();
        assert_eq!(registry.len(), all_builtins().len());
        assert!(get_builtin("SetVar").is_some());
        assert!(get_builtin("nonexistent").is_none());
    }

    #[test]
    fn test_set_and_set_var() {
        let mut ctx = ctx();
        ctx.resolve_str(r#"${Set(passwd = "123456", retries = 3)}"#).unwrap();
        assert_eq!(ctx.get("passwd"), Some(&json!("123456")));
        assert_eq!(ctx.get("retries"), Some(&json!(3)));

        ctx.resolve_str("${SetVar(pwd, $passwd)}").unwrap();
        assert_eq!(ctx.get("pwd"), Some(&json!("123456")));
    }

    #[test]
    fn test_get_var_expands_deferred() {
        let mut ctx = ctx();
        ctx.set("host", json!("h"));
        ctx.define("url", json!("http://$host/"));
        assert_eq!(ctx.resolve_str("${GetVar(url)}").unwrap(), json!("http://h/"));
    }

    #[test]
    fn test_dy_str_data() {
        let mut ctx = ctx();
        ctx.set_pattern("token", regex::Regex::new(r"token=(\w+);").unwrap());
        ctx.set_last_result(json!({"status_code": 200, "text": "ok token=abc123; done"}));
        ctx.resolve_str("${DyStrData(tok, token)}").unwrap();
        assert_eq!(ctx.get("tok"), Some(&json!("abc123")));

        ctx.resolve_str("${DyStrData(whole, token, 0)}").unwrap();
        assert_eq!(ctx.get("whole"), Some(&json!("token=abc123;")));

        assert!(matches!(
            ctx.resolve_str("${DyStrData(x, missing)}"),
            Err(Error::ArgumentError { .. })
        ));
    }

    #[test]
    fn test_dy_str_data_without_result() {
        let mut ctx = ctx();
        ctx.set_pattern("any", regex::Regex::new("(.*)").unwrap());
        assert!(matches!(
            ctx.resolve_str("${DyStrData(x, any)}"),
            Err(Error::FunctionFailed { .. })
        ));
    }

    #[test]
    fn test_dy_json_data() {
        let mut ctx = ctx();
        ctx.set_last_result(json!({"json": {"data": {"items": [{"id": 7}]}}}));
        ctx.resolve_str("${DyJsonData(first, json.data.items.0.id)}").unwrap();
        assert_eq!(ctx.get("first"), Some(&json!(7)));
        assert!(ctx.resolve_str("${DyJsonData(x, json.nope)}").is_err());
    }

    #[test]
    fn test_verify_var() {
        let mut ctx = ctx();
        ctx.set("pwd", json!("123456"));
        assert_eq!(ctx.resolve_str("${VerifyVar(pwd, 123456)}").unwrap(), json!(true));
        assert!(matches!(
            ctx.resolve_str("${VerifyVar(pwd, 654321)}"),
            Err(Error::Assertion(_))
        ));
        assert!(matches!(
            ctx.resolve_str("${VerifyVar(unbound, 1)}"),
            Err(Error::Assertion(_))
        ));
    }

    #[test]
    fn test_verify_code_and_contain() {
        let mut ctx = ctx();
        assert!(matches!(
            ctx.resolve_str("${VerifyCode(200)}"),
            Err(Error::Assertion(_))
        ));
        ctx.set_last_result(json!({"status_code": 200, "body": "welcome home"}));
        assert!(ctx.resolve_str("${VerifyCode(200)}").is_ok());
        assert!(ctx.resolve_str("${VerifyCode(404)}").is_err());
        assert!(ctx.resolve_str("${VerifyContain(welcome)}").is_ok());
        assert!(ctx.resolve_str("${VerifyContain(goodbye)}").is_err());
    }

    #[test]
    fn test_verify_equal_and_not_null() {
        let mut ctx = ctx();
        ctx.set("a", json!(1));
        ctx.set("n", Value::Null);
        assert!(ctx.resolve_str("${VerifyEqual($a, 1)}").is_ok());
        assert!(ctx.resolve_str("${VerifyEqual($a, 2)}").is_err());
        assert!(ctx.resolve_str("${VerifyNotNull(a)}").is_ok());
        assert!(ctx.resolve_str("${VerifyNotNull(n)}").is_err());
        assert!(ctx.resolve_str("${VerifyNotNull(zzz)}").is_err());
    }

    #[test]
    fn test_lookup_path() {
        let v = json!({"a": [{"b": "x"}]});
        assert_eq!(lookup_path(&v, "a.0.b"), Some(&json!("x")));
        assert_eq!(lookup_path(&v, "a.1.b"), None);
        assert_eq!(lookup_path(&v, ""), Some(&v));
    }

    #[test]
    fn test_result_text() {
        assert_eq!(result_text(&json!({"text": "t", "body": "b"})), "t");
        assert_eq!(result_text(&json!({"body": "b"})), "b");
        assert_eq!(result_text(&json!("raw")), "raw");
        assert_eq!(result_text(&json!({"n": 1})), r#"{"n":1}"#);
    }
}
