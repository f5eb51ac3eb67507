//! Hierarchy composition: api merge and suite expansion
//!
//! A [`Composer`] owns the fragment library of one dependency area. Each
//! fragment directory is scanned on the first reference of its kind, and
//! expanded suites are cached by reference so repeated references load once.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::loader::{
    api_fields, definition_files, discover_testsets, load_api_document, load_document,
    load_suite_document, parse_document,
};
use super::model::{
    ApiFragment, CaseDefinition, CaseEntry, Document, LayerKind, LayerReference, SuiteFragment,
    TestSet,
};
use crate::common::config::LoaderConfig;
use crate::common::paths::{api_dir, dependencies_dir, suite_dir};
use crate::common::{Error, Result};
use crate::template::substitute_value;

/// Fragments of one kind, keyed by `def` name, loaded on first use
#[derive(Debug)]
struct FragmentIndex<F> {
    kind: LayerKind,
    dir: PathBuf,
    max_depth: usize,
    fragments: Option<BTreeMap<String, F>>,
}

impl<F> FragmentIndex<F> {
    fn new(kind: LayerKind, dir: PathBuf, max_depth: usize) -> Self {
        Self {
            kind,
            dir,
            max_depth,
            fragments: None,
        }
    }

    fn unresolved(&self, name: &str) -> Error {
        Error::unresolved_reference(self.kind.as_str(), name, &[self.dir.display().to_string()])
    }
}

fn insert_unique<F>(
    map: &mut BTreeMap<String, F>,
    kind: LayerKind,
    name: String,
    fragment: F,
    path: &Path,
    existing_path: impl Fn(&F) -> &Path,
) -> Result<()> {
    if let Some(first) = map.get(&name) {
        return Err(Error::DuplicateDefinition {
            kind: kind.to_string(),
            name,
            first: existing_path(first).display().to_string(),
            second: path.display().to_string(),
        });
    }
    map.insert(name, fragment);
    Ok(())
}

impl FragmentIndex<ApiFragment> {
    fn get(&mut self, name: &str) -> Result<&ApiFragment> {
        if self.fragments.is_none() {
            let mut map = BTreeMap::new();
            for path in definition_files(&self.dir)? {
                for fragment in load_api_document(&path, self.max_depth)? {
                    let name = fragment.def.name.clone();
                    insert_unique(&mut map, self.kind, name, fragment, &path, |f| f.path.as_path())?;
                }
            }
            tracing::debug!("indexed {} api fragment(s) in {}", map.len(), self.dir.display());
            self.fragments = Some(map);
        }
        let err = self.unresolved(name);
        self.fragments
            .as_ref()
            .and_then(|map| map.get(name))
            .ok_or(err)
    }
}

impl FragmentIndex<SuiteFragment> {
    fn get(&mut self, name: &str) -> Result<&SuiteFragment> {
        if self.fragments.is_none() {
            let mut map = BTreeMap::new();
            for path in definition_files(&self.dir)? {
                let fragment = load_suite_document(&path, self.max_depth)?;
                let name = fragment.def.name.clone();
                insert_unique(&mut map, self.kind, name, fragment, &path, |f| f.path.as_path())?;
            }
            tracing::debug!("indexed {} suite fragment(s) in {}", map.len(), self.dir.display());
            self.fragments = Some(map);
        }
        let err = self.unresolved(name);
        self.fragments
            .as_ref()
            .and_then(|map| map.get(name))
            .ok_or(err)
    }
}

/// Resolves layer references against one dependency area
#[derive(Debug)]
pub struct Composer {
    apis: FragmentIndex<ApiFragment>,
    suites: FragmentIndex<SuiteFragment>,
    /// Fully expanded suites by reference key
    expanded: HashMap<String, Vec<CaseDefinition>>,
    /// Suites being expanded, outermost first
    stack: Vec<String>,
    max_depth: usize,
}

impl Composer {
    /// Composer for the dependency area at `dependencies`
    pub fn new(dependencies: &Path, loader: &LoaderConfig) -> Self {
        Self {
            apis: FragmentIndex::new(LayerKind::Api, api_dir(dependencies, loader), loader.max_depth),
            suites: FragmentIndex::new(
                LayerKind::Suite,
                suite_dir(dependencies, loader),
                loader.max_depth,
            ),
            expanded: HashMap::new(),
            stack: Vec::new(),
            max_depth: loader.max_depth,
        }
    }

    /// Composer for the dependency area next to a testset
    pub fn for_testset(testset: &Path, loader: &LoaderConfig) -> Self {
        Self::new(&dependencies_dir(testset, loader), loader)
    }

    /// Flatten a document into executable cases
    pub fn compose(&mut self, document: Document) -> Result<TestSet> {
        let cases = self.expand_entries(document.entries)?;
        validate_cases(&cases)?;
        Ok(TestSet {
            path: document.path,
            project: document.project,
            cases,
        })
    }

    /// Expand entries depth-first, preserving order
    pub fn expand_entries(&mut self, entries: Vec<CaseEntry>) -> Result<Vec<CaseDefinition>> {
        let mut cases = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                CaseEntry::Case(case) => cases.push(case),
                CaseEntry::Api { base, reference } => cases.push(self.merge_api(base, &reference)?),
                CaseEntry::Suite(reference) => cases.extend(self.expand_suite(&reference)?),
            }
        }
        Ok(cases)
    }

    /// Overlay an api fragment's execution fields onto a case
    ///
    /// Fields the fragment declares replace the case's own; metadata always
    /// comes from the referencing case.
    pub fn merge_api(
        &mut self,
        mut case: CaseDefinition,
        reference: &LayerReference,
    ) -> Result<CaseDefinition> {
        let fragment = self.apis.get(reference.name())?;
        let mapping = fragment.def.bind(reference)?;
        let location = format!("{} api '{}'", fragment.path.display(), fragment.def.name);
        let body = substitute_value(&fragment.body, &mapping);
        let fields = api_fields(body, &location, self.max_depth)?;

        if let Some(pre_command) = fields.pre_command {
            case.pre_command = pre_command;
        }
        if let Some(steps) = fields.steps {
            case.steps = steps;
        }
        if let Some(post_command) = fields.post_command {
            case.post_command = post_command;
        }
        if let Some(verify) = fields.verify {
            case.verify = verify;
        }

        tracing::debug!("merged api {} into case {}", reference.source, case.id);
        Ok(case)
    }

    /// The cases a suite reference stands for, already expanded
    pub fn expand_suite(&mut self, reference: &LayerReference) -> Result<Vec<CaseDefinition>> {
        let name = reference.name().to_string();
        if self.stack.contains(&name) {
            let mut chain = self.stack.clone();
            chain.push(name);
            return Err(Error::CircularReference(chain.join(" -> ")));
        }

        let fragment = self.suites.get(&name)?;
        let mapping = fragment.def.bind(reference)?;

        let key = reference.key();
        if let Some(cases) = self.expanded.get(&key) {
            return Ok(cases.clone());
        }

        let path = fragment.path.clone();
        let value = substitute_value(&fragment.document, &mapping);
        let document = parse_document(&path, value, self.max_depth)?;

        self.stack.push(name);
        let result = self.expand_entries(document.entries);
        self.stack.pop();
        let cases = result?;

        tracing::debug!("expanded suite {} into {} case(s)", reference.source, cases.len());
        self.expanded.insert(key, cases.clone());
        Ok(cases)
    }
}

fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

/// Checks on a flattened case list: ids are well-formed and unique, every
/// case has steps
///
/// Ids are checked here rather than at load time since suite fragments may
/// build them from parameters.
pub fn validate_cases(cases: &[CaseDefinition]) -> Result<()> {
    let mut seen = HashSet::new();
    for case in cases {
        if !is_valid_id(&case.id) {
            return Err(Error::malformed(
                format!("case '{}'", case.id),
                "case ids may only contain letters, digits, '_' and '-'",
            ));
        }
        if case.steps.is_empty() {
            return Err(Error::missing_field("steps", format!("case '{}'", case.id)));
        }
        if !seen.insert(case.id.as_str()) {
            return Err(Error::DuplicateCaseId(case.id.clone()));
        }
    }
    Ok(())
}

/// Load and compose one testset file
pub fn load_testset(path: &Path, loader: &LoaderConfig) -> Result<TestSet> {
    let document = load_document(path, loader.max_depth)?;
    Composer::for_testset(path, loader).compose(document)
}

/// Load and compose every testset a path names
///
/// Testsets sharing a dependency area share one composer. Case ids must be
/// unique across all of them.
pub fn load_path(path: &Path, loader: &LoaderConfig) -> Result<Vec<TestSet>> {
    load_paths(&[path], loader)
}

/// [`load_path`] over several paths, as one run
pub fn load_paths<P: AsRef<Path>>(paths: &[P], loader: &LoaderConfig) -> Result<Vec<TestSet>> {
    let mut composers: HashMap<PathBuf, Composer> = HashMap::new();
    let mut testsets = Vec::new();

    for path in paths {
        for file in discover_testsets(path.as_ref(), loader)? {
            let deps = dependencies_dir(&file, loader);
            let composer = composers
                .entry(deps.clone())
                .or_insert_with(|| Composer::new(&deps, loader));
            let document = load_document(&file, loader.max_depth)?;
            let testset = composer.compose(document)?;
            tracing::info!(
                "loaded {} ({} case(s))",
                testset.path.display(),
                testset.cases.len()
            );
            testsets.push(testset);
        }
    }

    let all: Vec<CaseDefinition> = testsets.iter().flat_map(|t| t.cases.iter().cloned()).collect();
    validate_cases(&all)?;
    Ok(testsets)
}
