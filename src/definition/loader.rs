//! Definition documents: reading, block parsing and validation
//!
//! Every document is a list of single-key blocks. Testsets and suites hold
//! `project` and `case` blocks; api documents hold `api` blocks. YAML and JSON
//! are read into the same `serde_json::Value` tree before validation, so both
//! serializations go through identical checks.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::model::{
    Action, ApiFragment, CaseDefinition, CaseEntry, Document, ExecutionFields, FragmentDef,
    LayerKind, LayerReference, ProjectInfo, StepSpec, SuiteFragment, DEFAULT_MODULE,
};
use crate::common::config::LoaderConfig;
use crate::common::paths::is_definition_file;
use crate::common::{Error, Result};

#[derive(Debug, Default, Deserialize)]
struct RawProject {
    name: Option<String>,
    module: Option<String>,
    def: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCase {
    id: Option<Value>,
    desc: Option<Value>,
    responsible: Option<String>,
    tester: Option<String>,
    pre_command: Option<Vec<String>>,
    steps: Option<Vec<Map<String, Value>>>,
    post_command: Option<Vec<String>>,
    verify: Option<Vec<String>>,
    glob_var: Option<BTreeMap<String, Value>>,
    glob_regx: Option<BTreeMap<String, String>>,
    api: Option<String>,
    suite: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawApi {
    def: Option<String>,
    pre_command: Option<Vec<String>>,
    steps: Option<Vec<Map<String, Value>>>,
    post_command: Option<Vec<String>>,
    verify: Option<Vec<String>>,
}

/// Read a definition file into a value tree
pub fn read_document(path: &Path) -> Result<Value> {
    if !is_definition_file(path) {
        return Err(Error::malformed(
            path.display().to_string(),
            "expected a .yaml, .yml or .json file",
        ));
    }

    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let value = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| Error::malformed(path.display().to_string(), e.to_string()))?
    } else {
        serde_yaml::from_str(&content)
            .map_err(|e| Error::malformed(path.display().to_string(), e.to_string()))?
    };

    tracing::debug!("read {}", path.display());
    Ok(value)
}

/// Split a document into its `(key, body)` blocks
fn blocks(value: Value, location: &str) -> Result<Vec<(String, Value)>> {
    let items = match value {
        Value::Array(items) if !items.is_empty() => items,
        Value::Array(_) | Value::Null => return Err(Error::malformed(location, "empty document")),
        _ => {
            return Err(Error::malformed(
                location,
                "a definition document must be a list of blocks",
            ))
        }
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) if map.len() == 1 => {
                let (key, body) = map
                    .into_iter()
                    .next()
                    .ok_or_else(|| Error::malformed(location, "empty block"))?;
                Ok((key, body))
            }
            _ => Err(Error::malformed(
                location,
                format!("block #{} must be a single-key mapping", index + 1),
            )),
        })
        .collect()
}

fn deserialize<T: for<'de> Deserialize<'de>>(body: Value, location: &str) -> Result<T> {
    serde_json::from_value(body).map_err(|e| Error::malformed(location, e.to_string()))
}

/// Text of a scalar field; ids and descriptions may be written as numbers
fn scalar_text(value: Value, field: &str, location: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err(Error::missing_field(field, location)),
        _ => Err(Error::malformed(location, format!("'{}' must be a scalar", field))),
    }
}

/// Template syntax inside a definition file is a malformed definition
fn malformed_syntax(location: &str) -> impl Fn(Error) -> Error + '_ {
    move |e| match e {
        Error::TemplateSyntax { .. } | Error::RecursionLimit(_) => {
            Error::malformed(location, e.to_string())
        }
        other => other,
    }
}

fn actions(
    sources: Option<Vec<String>>,
    location: &str,
    max_depth: usize,
) -> Result<Option<Vec<Action>>> {
    sources
        .map(|list| {
            list.iter()
                .map(|s| Action::parse_with_depth(s, max_depth).map_err(malformed_syntax(location)))
                .collect()
        })
        .transpose()
}

fn reference(
    kind: LayerKind,
    source: &str,
    location: &str,
    max_depth: usize,
) -> Result<LayerReference> {
    LayerReference::parse_with_depth(kind, source, max_depth).map_err(malformed_syntax(location))
}

fn steps(maps: Option<Vec<Map<String, Value>>>, location: &str) -> Result<Option<Vec<StepSpec>>> {
    maps.map(|list| {
        list.into_iter()
            .enumerate()
            .map(|(index, map)| {
                StepSpec::from_map(map, &format!("{} step #{}", location, index + 1))
            })
            .collect()
    })
    .transpose()
}

fn patterns(raw: Option<BTreeMap<String, String>>) -> Result<BTreeMap<String, Regex>> {
    raw.unwrap_or_default()
        .into_iter()
        .map(|(name, source)| {
            Regex::new(&source)
                .map(|re| (name.clone(), re))
                .map_err(|e| Error::InvalidPattern {
                    name,
                    reason: e.to_string(),
                })
        })
        .collect()
}

fn project(body: Value, path: &Path) -> Result<ProjectInfo> {
    let location = path.display().to_string();
    let raw: RawProject = match body {
        Value::Null => RawProject::default(),
        body => deserialize(body, &location)?,
    };
    let name = raw.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Ok(ProjectInfo {
        name,
        module: raw.module.unwrap_or_else(|| DEFAULT_MODULE.to_string()),
        def: raw.def.map(|d| d.trim().to_string()),
    })
}

fn case_entry(body: Value, location: &str, max_depth: usize) -> Result<CaseEntry> {
    let raw: RawCase = deserialize(body, location)?;

    if let Some(source) = raw.suite {
        if raw.api.is_some() {
            return Err(Error::malformed(
                location,
                "a case cannot reference both an api and a suite",
            ));
        }
        let has_fields = raw.pre_command.is_some()
            || raw.steps.is_some()
            || raw.post_command.is_some()
            || raw.verify.is_some();
        if has_fields {
            return Err(Error::malformed(
                location,
                format!("suite reference '{}' cannot carry execution fields", source),
            ));
        }
        return Ok(CaseEntry::Suite(reference(LayerKind::Suite, &source, location, max_depth)?));
    }

    let id = scalar_text(
        raw.id.ok_or_else(|| Error::missing_field("id", location))?,
        "id",
        location,
    )?;
    let location = format!("{} case '{}'", location, id);
    let desc = scalar_text(
        raw.desc.ok_or_else(|| Error::missing_field("desc", location.as_str()))?,
        "desc",
        &location,
    )?;

    let mut case = CaseDefinition::new(id, desc);
    case.responsible = raw.responsible;
    case.tester = raw.tester;
    case.pre_command = actions(raw.pre_command, &location, max_depth)?.unwrap_or_default();
    case.steps = steps(raw.steps, &location)?.unwrap_or_default();
    case.post_command = actions(raw.post_command, &location, max_depth)?.unwrap_or_default();
    case.verify = actions(raw.verify, &location, max_depth)?.unwrap_or_default();
    case.glob_var = raw.glob_var.unwrap_or_default();
    case.glob_regx = patterns(raw.glob_regx)?;

    match raw.api {
        Some(source) => Ok(CaseEntry::Api {
            base: case,
            reference: reference(LayerKind::Api, &source, &location, max_depth)?,
        }),
        None => Ok(CaseEntry::Case(case)),
    }
}

/// Parse a testset or suite document from its value tree
///
/// `max_depth` bounds placeholder nesting in actions and references.
pub fn parse_document(path: &Path, value: Value, max_depth: usize) -> Result<Document> {
    let location = path.display().to_string();
    let mut project_info: Option<ProjectInfo> = None;
    let mut entries = Vec::new();

    for (key, body) in blocks(value, &location)? {
        match key.as_str() {
            "project" => {
                if project_info.is_some() {
                    return Err(Error::malformed(&location, "more than one 'project' block"));
                }
                project_info = Some(project(body, path)?);
            }
            "case" => entries.push(case_entry(body, &location, max_depth)?),
            other => {
                return Err(Error::malformed(
                    &location,
                    format!("unexpected '{}' block in a testset", other),
                ))
            }
        }
    }

    let project_info = match project_info {
        Some(info) => info,
        None => project(Value::Null, path)?,
    };

    Ok(Document {
        path: path.to_path_buf(),
        project: project_info,
        entries,
    })
}

/// Load a testset document
pub fn load_document(path: &Path, max_depth: usize) -> Result<Document> {
    parse_document(path, read_document(path)?, max_depth)
}

/// Execution fields of one api block
pub fn api_fields(body: Value, location: &str, max_depth: usize) -> Result<ExecutionFields> {
    let raw: RawApi = deserialize(body, location)?;
    Ok(ExecutionFields {
        pre_command: actions(raw.pre_command, location, max_depth)?,
        steps: steps(raw.steps, location)?,
        post_command: actions(raw.post_command, location, max_depth)?,
        verify: actions(raw.verify, location, max_depth)?,
    })
}

/// Load every api fragment declared in an api document
pub fn load_api_document(path: &Path, max_depth: usize) -> Result<Vec<ApiFragment>> {
    let location = path.display().to_string();
    let mut fragments = Vec::new();

    for (key, body) in blocks(read_document(path)?, &location)? {
        if key != "api" {
            return Err(Error::malformed(
                &location,
                format!("unexpected '{}' block in an api document", key),
            ));
        }
        let raw_def = body
            .get("def")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::missing_field("def", format!("{} api block", location)))?;
        let def = FragmentDef::parse(raw_def, &location)?;

        // Validate the shape now so errors surface at load time
        let block_location = format!("{} api '{}'", location, def.name);
        api_fields(body.clone(), &block_location, max_depth)?;

        fragments.push(ApiFragment {
            def,
            body,
            path: path.to_path_buf(),
        });
    }
    Ok(fragments)
}

/// Load a suite document; `project.def` names it
pub fn load_suite_document(path: &Path, max_depth: usize) -> Result<SuiteFragment> {
    let value = read_document(path)?;
    let document = parse_document(path, value.clone(), max_depth)?;
    let location = path.display().to_string();

    let raw_def = document
        .project
        .def
        .as_deref()
        .ok_or_else(|| Error::missing_field("project.def", location.as_str()))?;
    let def = FragmentDef::parse(raw_def, &location)?;

    Ok(SuiteFragment {
        def,
        document: value,
        path: path.to_path_buf(),
    })
}

/// Definition files beneath a directory, in path order
///
/// A missing directory yields no files.
pub fn definition_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::FileRead {
            path: dir.display().to_string(),
            error: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_definition_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Testset files named by a path: the file itself, or every definition
/// file beneath a directory outside its dependency area
pub fn discover_testsets(path: &Path, loader: &LoaderConfig) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::FileRead {
            path: path.display().to_string(),
            error: "no such file or directory".to_string(),
        });
    }

    let skip = loader.dependencies_dir.as_str();
    let mut files = Vec::new();
    let walker = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() > 0 && e.file_type().is_dir() && e.file_name() == skip));
    for entry in walker {
        let entry = entry.map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        if entry.file_type().is_file() && is_definition_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
