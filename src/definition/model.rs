//! Test definition data model
//!
//! Everything here is immutable once loaded. Layer references
//! ([`CaseEntry::Api`], [`CaseEntry::Suite`]) only exist between loading and
//! composition; the runner only ever sees [`CaseDefinition`]s.

use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::common::{legal_filename, Error, Result};
use crate::context::DEFAULT_MAX_DEPTH;
use crate::template::{parse_call, ArgValue, Call, Segment, Substitution};

/// Module name used when a testset carries no `project.module`
pub const DEFAULT_MODULE: &str = "Default Test Set";

/// Key a step may carry next to its kind to store the step's result
pub const RESULT_KEY: &str = "result";

/// Identifies the system under test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    pub name: String,
    pub module: String,
    /// Entry-point name when the document is a suite fragment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub def: Option<String>,
}

impl Default for ProjectInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            module: DEFAULT_MODULE.to_string(),
            def: None,
        }
    }
}

/// One imperative instruction, e.g. `${SetVar(name, value)}`
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// The text as written
    pub source: String,
    /// Parsed `{functionName, args}`
    pub call: Call,
}

impl Action {
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_depth(source, DEFAULT_MAX_DEPTH)
    }

    pub fn parse_with_depth(source: &str, max_depth: usize) -> Result<Self> {
        Ok(Self {
            source: source.trim().to_string(),
            call: parse_call(source, max_depth)?,
        })
    }

    pub fn function_name(&self) -> &str {
        &self.call.name
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

/// Protocol kind of a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    Request,
    WebDriver,
    MobileDriver,
    WpfDriver,
    MfcDriver,
    /// Preserved as written; interpreted only by extension executors
    Other(String),
}

impl StepKind {
    pub fn from_key(key: &str) -> Self {
        match key {
            "request" => StepKind::Request,
            "webdriver" => StepKind::WebDriver,
            "mobiledriver" => StepKind::MobileDriver,
            "wpfdriver" => StepKind::WpfDriver,
            "mfcdriver" => StepKind::MfcDriver,
            other => StepKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Request => "request",
            StepKind::WebDriver => "webdriver",
            StepKind::MobileDriver => "mobiledriver",
            StepKind::WpfDriver => "wpfdriver",
            StepKind::MfcDriver => "mfcdriver",
            StepKind::Other(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, StepKind::Other(_))
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One step: a kind plus its kind-specific fields, still templated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSpec {
    pub kind: StepKind,
    pub fields: Value,
    /// Variable that receives the executor's result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl StepSpec {
    /// Build from a `{<kind>: {...}, result?: name}` map, validating its shape
    pub fn from_map(mut map: Map<String, Value>, location: &str) -> Result<Self> {
        let result = match map.remove(RESULT_KEY) {
            None => None,
            Some(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
            Some(other) => {
                return Err(Error::malformed(
                    location,
                    format!("step '{}' must be a variable name, got {}", RESULT_KEY, other),
                ))
            }
        };

        if map.len() != 1 {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            return Err(Error::malformed(
                location,
                format!("a step needs exactly one kind key, got {:?}", keys),
            ));
        }

        let (key, fields) = map
            .into_iter()
            .next()
            .ok_or_else(|| Error::malformed(location, "empty step"))?;
        let kind = StepKind::from_key(&key);

        if kind.is_known() {
            let Value::Object(body) = &fields else {
                return Err(Error::malformed(
                    location,
                    format!("'{}' step fields must be a mapping", kind),
                ));
            };
            if kind == StepKind::Request {
                for field in ["url", "method"] {
                    if !body.contains_key(field) {
                        return Err(Error::missing_field(field, format!("{} request step", location)));
                    }
                }
            }
        }

        Ok(Self { kind, fields, result })
    }
}

/// One executable test case
#[derive(Debug, Clone, Serialize)]
pub struct CaseDefinition {
    pub id: String,
    pub desc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tester: Option<String>,
    pub pre_command: Vec<Action>,
    pub steps: Vec<StepSpec>,
    pub post_command: Vec<Action>,
    pub verify: Vec<Action>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub glob_var: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty", serialize_with = "serialize_patterns")]
    pub glob_regx: BTreeMap<String, Regex>,
}

fn serialize_patterns<S: Serializer>(
    patterns: &BTreeMap<String, Regex>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(patterns.iter().map(|(k, v)| (k, v.as_str())))
}

impl CaseDefinition {
    pub fn new(id: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            desc: desc.into(),
            responsible: None,
            tester: None,
            pre_command: Vec::new(),
            steps: Vec::new(),
            post_command: Vec::new(),
            verify: Vec::new(),
            glob_var: BTreeMap::new(),
            glob_regx: BTreeMap::new(),
        }
    }

    /// Display name `id[desc]`, legal as a file name
    pub fn name(&self) -> String {
        legal_filename(&format!("{}[{}]", self.id, self.desc))
    }
}

/// Which kind of fragment a layer reference names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Api,
    Suite,
}

impl LayerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerKind::Api => "api",
            LayerKind::Suite => "suite",
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `api: name(args)` or `suite: name(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct LayerReference {
    pub kind: LayerKind,
    pub call: Call,
    pub source: String,
}

impl LayerReference {
    pub fn parse(kind: LayerKind, source: &str) -> Result<Self> {
        Self::parse_with_depth(kind, source, DEFAULT_MAX_DEPTH)
    }

    pub fn parse_with_depth(kind: LayerKind, source: &str, max_depth: usize) -> Result<Self> {
        Ok(Self {
            kind,
            call: parse_call(source, max_depth)?,
            source: source.trim().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.call.name
    }

    /// Argument source texts, in order
    pub fn arg_sources(&self) -> Vec<String> {
        self.call.args.iter().map(|a| a.source.clone()).collect()
    }

    /// Cache key: the name plus the arguments as written
    pub fn key(&self) -> String {
        let args: Vec<String> = self
            .call
            .args
            .iter()
            .map(|a| match &a.name {
                Some(name) => format!("{}={}", name, a.raw),
                None => a.raw.clone(),
            })
            .collect();
        format!("{}({})", self.name(), args.join(","))
    }
}

/// A fragment entry-point such as `login($user, $pwd)`
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDef {
    pub name: String,
    /// Parameter names without the leading `$`
    pub params: Vec<String>,
}

impl FragmentDef {
    pub fn parse(source: &str, location: &str) -> Result<Self> {
        let call = parse_call(source, DEFAULT_MAX_DEPTH)
            .map_err(|e| Error::malformed(location, e.to_string()))?;
        let mut params = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let param = match &arg.value {
                ArgValue::Expr(t) if arg.name.is_none() => match t.sole_placeholder() {
                    Some(Segment::Var(name)) => Some(name.clone()),
                    _ => None,
                },
                _ => None,
            };
            match param {
                Some(name) if !params.contains(&name) => params.push(name),
                Some(name) => {
                    return Err(Error::malformed(
                        location,
                        format!("parameter '${}' declared twice in '{}'", name, source),
                    ))
                }
                None => {
                    return Err(Error::malformed(
                        location,
                        format!(
                            "definition parameters must be $NAME placeholders, got '{}' in '{}'",
                            arg.source, source
                        ),
                    ))
                }
            }
        }
        Ok(Self {
            name: call.name,
            params,
        })
    }

    /// Map each parameter to the reference's argument text
    pub fn bind(&self, reference: &LayerReference) -> Result<BTreeMap<String, Substitution>> {
        let args = &reference.call.args;
        if args.len() != self.params.len() {
            return Err(Error::ArgumentMismatch {
                name: self.name.clone(),
                expected: self.params.len(),
                given: args.len(),
            });
        }
        Ok(self
            .params
            .iter()
            .zip(args)
            .filter(|(param, arg)| arg.raw != format!("${}", param))
            .map(|(param, arg)| {
                (
                    param.clone(),
                    Substitution::new(arg.source.clone(), arg.raw.clone()),
                )
            })
            .collect())
    }
}

/// Execution fields declared by an api fragment; `None` means not declared
#[derive(Debug, Clone, Default)]
pub struct ExecutionFields {
    pub pre_command: Option<Vec<Action>>,
    pub steps: Option<Vec<StepSpec>>,
    pub post_command: Option<Vec<Action>>,
    pub verify: Option<Vec<Action>>,
}

/// Reusable pre/steps/post/verify unit, keyed by its `def` name
#[derive(Debug, Clone)]
pub struct ApiFragment {
    pub def: FragmentDef,
    /// The block as loaded; parameters are substituted into it per reference
    pub body: Value,
    pub path: PathBuf,
}

/// Reusable case list, keyed by its `project.def` name
#[derive(Debug, Clone)]
pub struct SuiteFragment {
    pub def: FragmentDef,
    /// The whole document as loaded
    pub document: Value,
    pub path: PathBuf,
}

/// A case list entry before composition
#[derive(Debug, Clone)]
pub enum CaseEntry {
    /// A complete case
    Case(CaseDefinition),
    /// Metadata (and possibly fields) overlaid by an api fragment
    Api {
        base: CaseDefinition,
        reference: LayerReference,
    },
    /// Replaced in place by a suite's cases
    Suite(LayerReference),
}

/// A loaded document: project metadata plus its uncomposed entries
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub project: ProjectInfo,
    pub entries: Vec<CaseEntry>,
}

/// A composed testset, ready to run
#[derive(Debug, Clone, Serialize)]
pub struct TestSet {
    pub path: PathBuf,
    pub project: ProjectInfo,
    pub cases: Vec<CaseDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => panic!("Expected object"),
        }
    }

    #[test]
    fn test_request_step() {
        let step = StepSpec::from_map(
            map(json!({"request": {"url": "/login", "method": "POST"}, "result": "resp"})),
            "t.yaml",
        )
        .unwrap();
        assert_eq!(step.kind, StepKind::Request);
        assert_eq!(step.result.as_deref(), Some("resp"));
    }

    #[test]
    fn test_request_step_requires_url() {
        let err = StepSpec::from_map(map(json!({"request": {"method": "GET"}})), "t.yaml").unwrap_err();
        assert!(matches!(err, Error::MissingField { field, .. } if field == "url"));
    }

    #[test]
    fn test_unknown_step_kind_is_preserved() {
        let step = StepSpec::from_map(map(json!({"ftp": "get /a"})), "t.yaml").unwrap();
        assert_eq!(step.kind, StepKind::Other("ftp".into()));
        assert_eq!(step.fields, json!("get /a"));
    }

    #[test]
    fn test_step_shape_errors() {
        assert!(StepSpec::from_map(map(json!({})), "t").is_err());
        assert!(StepSpec::from_map(map(json!({"request": {}, "webdriver": {}})), "t").is_err());
        assert!(StepSpec::from_map(map(json!({"webdriver": "click"})), "t").is_err());
        assert!(StepSpec::from_map(map(json!({"webdriver": {}, "result": 3})), "t").is_err());
    }

    #[test]
    fn test_case_name_is_legal() {
        let case = CaseDefinition::new("ATP-1", "login: ok/fail");
        assert_eq!(case.name(), "ATP-1[login_ ok_fail]");
    }

    #[test]
    fn test_action_parse() {
        let action = Action::parse("  ${SetVar(a, 1)} ").unwrap();
        assert_eq!(action.function_name(), "SetVar");
        assert_eq!(action.source, "${SetVar(a, 1)}");
        assert!(Action::parse("not a call!").is_err());
    }

    #[test]
    fn test_fragment_def() {
        let def = FragmentDef::parse("login($user, $pwd)", "a.yaml").unwrap();
        assert_eq!(def.name, "login");
        assert_eq!(def.params, vec!["user", "pwd"]);
        assert!(FragmentDef::parse("login(user)", "a.yaml").is_err());
        assert!(FragmentDef::parse("login($u, $u)", "a.yaml").is_err());
        assert!(FragmentDef::parse("login", "a.yaml").unwrap().params.is_empty());
    }

    #[test]
    fn test_fragment_bind() {
        let def = FragmentDef::parse("login($user, $pwd)", "a.yaml").unwrap();
        let reference = LayerReference::parse(LayerKind::Api, "login(admin, $pwd)").unwrap();
        let mapping = def.bind(&reference).unwrap();
        assert_eq!(mapping.get("user"), Some(&Substitution::plain("admin")));
        assert!(!mapping.contains_key("pwd"));

        let short = LayerReference::parse(LayerKind::Api, "login(admin)").unwrap();
        assert!(matches!(
            def.bind(&short),
            Err(Error::ArgumentMismatch { expected: 2, given: 1, .. })
        ));
    }

    #[test]
    fn test_reference_key() {
        let reference = LayerReference::parse(LayerKind::Suite, "smoke(a, \"b c\")").unwrap();
        assert_eq!(reference.key(), "smoke(a,\"b c\")");
        assert_eq!(reference.arg_sources(), vec!["a", "b c"]);

        let quoted = LayerReference::parse(LayerKind::Suite, "s(\"a,b\")").unwrap();
        let split = LayerReference::parse(LayerKind::Suite, "s(a,b)").unwrap();
        assert_ne!(quoted.key(), split.key());
        assert_eq!(reference.name(), "smoke");
    }
}
