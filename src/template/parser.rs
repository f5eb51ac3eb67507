//! Placeholder grammar
//!
//! ```text
//! template  := (text | '$$' | var | braced)*
//! var       := '$' WORD
//! braced    := '${' WORD ( '(' args? ')' )? '}'
//! args      := arg (',' arg)*
//! arg       := (WORD '=')? ( quoted | unquoted )
//! quoted    := '"' template '"' | '\'' template '\''
//! unquoted  := template up to the next top-level ',' or ')'
//! ```
//!
//! Actions use the bare call form `NAME(args)`, optionally wrapped in `${...}`.

use serde_json::Value;

use crate::common::{Error, Result};

/// A parsed string with placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text, `$$` already unescaped
    Text(String),
    /// `$NAME` or `${NAME}`
    Var(String),
    /// `${NAME(args)}`
    Call(Call),
}

/// A function call expression
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Arg>,
}

/// One call argument, optionally named (`key=value`)
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub name: Option<String>,
    pub value: ArgValue,
    /// Raw text of the value, trimmed, without surrounding quotes
    pub source: String,
    /// The value exactly as written, quotes included
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// Placeholder-free unquoted text, already typed
    Literal(Value),
    /// Quoted text; always evaluates to a string
    Quoted(Template),
    /// Unquoted text containing placeholders
    Expr(Template),
}

impl Template {
    /// True when the template has no placeholders at all
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Text(_)))
    }

    /// The single placeholder if the template is exactly one, with no text around it
    pub fn sole_placeholder(&self) -> Option<&Segment> {
        match self.segments.as_slice() {
            [seg @ (Segment::Var(_) | Segment::Call(_))] => Some(seg),
            _ => None,
        }
    }

    /// Names of every variable referenced, including inside call arguments
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_variables(&self.segments, &mut out);
        out
    }
}

fn collect_variables(segments: &[Segment], out: &mut Vec<String>) {
    for seg in segments {
        match seg {
            Segment::Text(_) => {}
            Segment::Var(name) => out.push(name.clone()),
            Segment::Call(call) => {
                for arg in &call.args {
                    match &arg.value {
                        ArgValue::Literal(_) => {}
                        ArgValue::Quoted(t) | ArgValue::Expr(t) => {
                            collect_variables(&t.segments, out)
                        }
                    }
                }
            }
        }
    }
}

/// Parse a string that may contain placeholders
pub fn parse_template(input: &str, max_depth: usize) -> Result<Template> {
    let mut parser = Parser::new(input, max_depth);
    let template = parser.template(Stop::End)?;
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(template)
}

/// Parse an action or reference: `NAME(args)`, `${NAME(args)}` or a bare `NAME`
///
/// A bare name is a call with no arguments.
pub fn parse_call(input: &str, max_depth: usize) -> Result<Call> {
    let trimmed = input.trim();
    let mut parser = Parser::new(trimmed, max_depth);

    let call = if trimmed.starts_with("${") {
        match parser.placeholder()? {
            Segment::Call(call) => call,
            Segment::Var(name) => Call {
                name,
                args: Vec::new(),
            },
            Segment::Text(_) => return Err(parser.error("expected a function call")),
        }
    } else {
        let name = parser.word();
        if name.is_empty() {
            return Err(parser.error("expected a function name"));
        }
        parser.skip_ws();
        let args = if parser.eat('(') {
            parser.args()?
        } else {
            Vec::new()
        };
        Call { name, args }
    };

    parser.skip_ws();
    if !parser.at_end() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(call)
}

/// Type an unquoted literal: numbers, booleans and null, otherwise a string
pub fn literal_value(text: &str) -> Value {
    match text {
        "true" | "True" => return Value::Bool(true),
        "false" | "False" => return Value::Bool(false),
        "null" | "None" => return Value::Null,
        _ => {}
    }

    let digits = text.strip_prefix('-').unwrap_or(text);
    let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
    let numeric_chars = !digits.is_empty()
        && digits.chars().next().is_some_and(|c| c.is_ascii_digit())
        && digits
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));

    if numeric_chars && !leading_zero {
        if let Ok(i) = text.parse::<i64>() {
            return Value::from(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(text.to_string())
}

/// Where a nested template stops
#[derive(Clone, Copy, PartialEq)]
enum Stop {
    End,
    Quote(char),
    ArgEnd,
}

struct Parser<'a> {
    input: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, max_depth: usize) -> Self {
        Self {
            input,
            chars: input.chars().collect(),
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    fn error(&self, message: &str) -> Error {
        Error::syntax(self.input, format!("{} at column {}", message, self.pos + 1))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_word) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn template(&mut self, stop: Stop) -> Result<Template> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut text = String::new();

        while let Some(c) = self.peek() {
            match stop {
                Stop::Quote(q) if c == q => break,
                Stop::ArgEnd if c == ',' || c == ')' => break,
                _ => {}
            }

            if let Stop::Quote(q) = stop {
                if c == '\\' && matches!(self.peek_at(1), Some(n) if n == q || n == '\\') {
                    text.push(self.chars[self.pos + 1]);
                    self.pos += 2;
                    continue;
                }
            }

            if c != '$' {
                text.push(c);
                self.pos += 1;
                continue;
            }

            match self.peek_at(1) {
                Some('$') => {
                    text.push('$');
                    self.pos += 2;
                }
                Some('{') => {
                    flush(&mut text, &mut segments);
                    segments.push(self.placeholder()?);
                }
                Some(n) if is_word(n) => {
                    flush(&mut text, &mut segments);
                    self.pos += 1;
                    segments.push(Segment::Var(self.word()));
                }
                _ => {
                    text.push('$');
                    self.pos += 1;
                }
            }
        }

        flush(&mut text, &mut segments);
        Ok(Template { segments })
    }

    /// Parse `${NAME}` or `${NAME(args)}`; positioned at the `$`
    fn placeholder(&mut self) -> Result<Segment> {
        self.pos += 2;
        self.enter()?;
        self.skip_ws();
        let name = self.word();
        if name.is_empty() {
            return Err(self.error("expected a name after '${'"));
        }
        self.skip_ws();

        let segment = if self.eat('(') {
            let args = self.args()?;
            Segment::Call(Call { name, args })
        } else {
            Segment::Var(name)
        };

        self.skip_ws();
        if !self.eat('}') {
            return Err(self.error("expected '}'"));
        }
        self.leave();
        Ok(segment)
    }

    /// Parse arguments up to and including the closing `)`; positioned after `(`
    fn args(&mut self) -> Result<Vec<Arg>> {
        let mut args = Vec::new();
        self.skip_ws();
        if self.eat(')') {
            return Ok(args);
        }

        loop {
            args.push(self.arg()?);
            self.skip_ws();
            if self.eat(',') {
                continue;
            }
            if self.eat(')') {
                return Ok(args);
            }
            return Err(self.error("expected ',' or ')'"));
        }
    }

    fn arg(&mut self) -> Result<Arg> {
        self.skip_ws();
        let name = self.keyword();
        self.skip_ws();

        let start = self.pos;
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let template = self.template(Stop::Quote(q))?;
                if !self.eat(q) {
                    return Err(self.error("unterminated string"));
                }
                let source = self.slice(start + 1, self.pos - 1);
                return Ok(Arg {
                    name,
                    value: ArgValue::Quoted(template),
                    source,
                    raw: self.slice(start, self.pos),
                });
            }
            _ => {
                let mut template = self.template(Stop::ArgEnd)?;
                if let Some(Segment::Text(last)) = template.segments.last_mut() {
                    let trimmed = last.trim_end().len();
                    last.truncate(trimmed);
                    if last.is_empty() {
                        template.segments.pop();
                    }
                }
                if template.segments.is_empty() {
                    return Err(self.error("empty argument"));
                }
                if template.is_literal() {
                    let text: String = template
                        .segments
                        .iter()
                        .filter_map(|s| match s {
                            Segment::Text(t) => Some(t.as_str()),
                            _ => None,
                        })
                        .collect();
                    ArgValue::Literal(literal_value(&text))
                } else {
                    ArgValue::Expr(template)
                }
            }
        };

        let source = self.slice(start, self.pos).trim_end().to_string();
        Ok(Arg {
            name,
            value,
            raw: source.clone(),
            source,
        })
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().collect()
    }

    /// Consume `WORD =` if present (but not `==`)
    fn keyword(&mut self) -> Option<String> {
        let start = self.pos;
        let word = self.word();
        if word.is_empty() {
            self.pos = start;
            return None;
        }
        self.skip_ws();
        if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
            self.pos += 1;
            Some(word)
        } else {
            self.pos = start;
            None
        }
    }
}

fn flush(text: &mut String, segments: &mut Vec<Segment>) {
    if !text.is_empty() {
        segments.push(Segment::Text(std::mem::take(text)));
    }
}
