//! `$NAME` / `${NAME(args)}` placeholders
//!
//! [`parser`] turns strings into [`Template`]s and actions into [`Call`]s;
//! [`Resolver`] evaluates them against a context store.

mod parser;
mod resolver;

use serde_json::Value;
use std::collections::BTreeMap;

pub use parser::{literal_value, parse_call, parse_template, Arg, ArgValue, Call, Segment, Template};
pub use resolver::Resolver;

/// String form of a value as it appears when interpolated into text
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Replacement text for one fragment parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    /// Inserted into plain text and inside quoted strings
    pub text: String,
    /// Inserted where a call argument is expected; quotes kept as written
    pub literal: String,
}

impl Substitution {
    pub fn new(text: impl Into<String>, literal: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            literal: literal.into(),
        }
    }

    /// Same text in every position
    pub fn plain(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            literal: text.clone(),
            text,
        }
    }
}

/// Lexical position while rewriting
#[derive(Clone, Copy, PartialEq)]
enum Scope {
    /// Argument list of a call; `at_start` until the argument's first character
    Args { at_start: bool },
    /// Quoted argument
    Quote(char),
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn word_end(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && is_word(chars[end]) {
        end += 1;
    }
    end
}

fn skip_spaces(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

/// Rewrite `$param` / `${param}` occurrences using a parameter mapping
///
/// This is textual: the replacement is inserted as source text, so a
/// replacement such as `$password` is resolved later at run time. Inside a
/// call's argument list the [`Substitution::literal`] form is used so a
/// quoted argument stays one argument. Names not in the mapping, `$$`
/// escapes and everything else are copied unchanged.
pub fn substitute_params(text: &str, mapping: &BTreeMap<String, Substitution>) -> String {
    if mapping.is_empty() || !text.contains('$') {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut scopes: Vec<Scope> = Vec::new();
    let mut i = 0;

    // Bare action form: a leading `NAME(` opens an argument list
    let lead = skip_spaces(&chars, 0);
    let name_end = word_end(&chars, lead);
    if name_end > lead {
        let paren = skip_spaces(&chars, name_end);
        if chars.get(paren) == Some(&'(') {
            out.extend(&chars[..=paren]);
            scopes.push(Scope::Args { at_start: true });
            i = paren + 1;
        }
    }

    while i < chars.len() {
        let c = chars[i];

        if c != '$' {
            match scopes.last_mut() {
                Some(Scope::Quote(q)) => {
                    if c == '\\' && i + 1 < chars.len() {
                        out.push(c);
                        out.push(chars[i + 1]);
                        i += 2;
                        continue;
                    }
                    if c == *q {
                        scopes.pop();
                    }
                }
                Some(Scope::Args { at_start }) => match c {
                    ')' => {
                        scopes.pop();
                    }
                    ',' | '=' => *at_start = true,
                    '"' | '\'' if *at_start => {
                        *at_start = false;
                        scopes.push(Scope::Quote(c));
                    }
                    c if c.is_whitespace() => {}
                    _ => *at_start = false,
                },
                None => {}
            }
            out.push(c);
            i += 1;
            continue;
        }

        let in_args = matches!(scopes.last(), Some(Scope::Args { .. }));
        if let Some(Scope::Args { at_start }) = scopes.last_mut() {
            *at_start = false;
        }
        let pick = |sub: &Substitution| -> String {
            if in_args {
                sub.literal.clone()
            } else {
                sub.text.clone()
            }
        };

        match chars.get(i + 1) {
            Some('$') => {
                out.push_str("$$");
                i += 2;
            }
            Some('{') => {
                let start = skip_spaces(&chars, i + 2);
                let end = word_end(&chars, start);
                let name: String = chars[start..end].iter().collect();
                let next = skip_spaces(&chars, end);
                match (chars.get(next), mapping.get(&name)) {
                    (Some('}'), Some(sub)) => {
                        out.push_str(&pick(sub));
                        i = next + 1;
                    }
                    (Some('('), _) if !name.is_empty() => {
                        out.extend(&chars[i..=next]);
                        scopes.push(Scope::Args { at_start: true });
                        i = next + 1;
                    }
                    _ => {
                        out.push_str("${");
                        i += 2;
                    }
                }
            }
            Some(c) if is_word(*c) => {
                let end = word_end(&chars, i + 1);
                let name: String = chars[i + 1..end].iter().collect();
                match mapping.get(&name) {
                    Some(sub) => out.push_str(&pick(sub)),
                    None => {
                        out.push('$');
                        out.push_str(&name);
                    }
                }
                i = end;
            }
            _ => {
                out.push('$');
                i += 1;
            }
        }
    }
    out
}

/// [`substitute_params`] applied to every string (and map key) of a value
pub fn substitute_value(value: &Value, mapping: &BTreeMap<String, Substitution>) -> Value {
    if mapping.is_empty() {
        return value.clone();
    }
    match value {
        Value::String(text) => Value::String(substitute_params(text, mapping)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| substitute_value(item, mapping))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (substitute_params(k, mapping), substitute_value(v, mapping)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(pairs: &[(&str, &str)]) -> BTreeMap<String, Substitution> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Substitution::plain(*v)))
            .collect()
    }

    #[test]
    fn test_render() {
        assert_eq!(render(&json!("abc")), "abc");
        assert_eq!(render(&json!(123456)), "123456");
        assert_eq!(render(&json!(true)), "true");
        assert_eq!(render(&Value::Null), "null");
        assert_eq!(render(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_substitute_params() {
        let m = mapping(&[("user", "admin"), ("pwd", "$password")]);
        assert_eq!(
            substitute_params("/login?u=$user&p=${pwd}", &m),
            "/login?u=admin&p=$password"
        );
        assert_eq!(substitute_params("$username", &m), "$username");
        assert_eq!(substitute_params("${SetVar(u, $user)}", &m), "${SetVar(u, admin)}");
        assert_eq!(substitute_params("$$user", &m), "$$user");
        assert_eq!(substitute_params("5$", &m), "5$");
    }

    #[test]
    fn test_quoted_argument_stays_one_argument() {
        let mut m = BTreeMap::new();
        m.insert("who".to_string(), Substitution::new("a,b", "\"a,b\""));

        assert_eq!(
            substitute_params("${SetVar(name, $who)}", &m),
            "${SetVar(name, \"a,b\")}"
        );
        assert_eq!(substitute_params("SetVar(name, ${who})", &m), "SetVar(name, \"a,b\")");
        assert_eq!(substitute_params("/greet/$who", &m), "/greet/a,b");
        assert_eq!(
            substitute_params("${SetVar(name, 'hi $who')}", &m),
            "${SetVar(name, 'hi a,b')}"
        );
        assert_eq!(
            substitute_params("x ${F(${G($who)}, k=$who)} $who", &m),
            "x ${F(${G(\"a,b\")}, k=\"a,b\")} a,b"
        );
    }

    #[test]
    fn test_substitute_value() {
        let m = mapping(&[("user", "admin")]);
        let v = json!({"url": "/u/$user", "list": ["$user", 1], "$user": true});
        assert_eq!(
            substitute_value(&v, &m),
            json!({"url": "/u/admin", "list": ["admin", 1], "admin": true})
        );
    }
}
