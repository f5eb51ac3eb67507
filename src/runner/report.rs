//! Run report: per-case verdicts, errors and verify outcomes

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::pipeline::Phase;
use crate::common::{Error, ErrorCategory, Result};
use crate::definition::CaseDefinition;

/// Verdict of one case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    /// Reached the end with at least one failed verify
    Failed,
    /// Stopped by a fatal error before verifying
    Error,
}

/// The fatal error that ended a case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseError {
    pub phase: Phase,
    pub kind: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl CaseError {
    pub fn new(phase: Phase, error: &Error) -> Self {
        Self {
            phase,
            kind: error.kind().to_string(),
            category: error.category(),
            message: error.to_string(),
        }
    }
}

/// One verify action's result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyOutcome {
    pub action: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub module: String,
    pub status: CaseStatus,
    /// Last phase entered; `done` when the case ran to completion
    pub terminal_phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
    pub verifies: Vec<VerifyOutcome>,
    pub steps_run: usize,
    pub steps_skipped: usize,
}

impl CaseResult {
    /// A fresh result for a case about to start
    pub fn new(case: &CaseDefinition, module: &str) -> Self {
        Self {
            id: case.id.clone(),
            name: case.name(),
            desc: case.desc.clone(),
            module: module.to_string(),
            status: CaseStatus::Passed,
            terminal_phase: Phase::Start,
            error: None,
            verifies: Vec::new(),
            steps_run: 0,
            steps_skipped: 0,
        }
    }

    /// Move into the ERROR state from the current phase
    pub fn fail(&mut self, error: &Error) {
        self.status = CaseStatus::Error;
        self.error = Some(CaseError::new(self.terminal_phase, error));
    }

    /// Record verify outcomes and settle the verdict
    pub fn finish(&mut self, verifies: Vec<VerifyOutcome>) {
        self.terminal_phase = Phase::Done;
        self.status = if verifies.iter().all(|v| v.passed) {
            CaseStatus::Passed
        } else {
            CaseStatus::Failed
        };
        self.verifies = verifies;
    }

    pub fn passed(&self) -> bool {
        self.status == CaseStatus::Passed
    }

    /// Whether the case got at least as far as `phase`
    pub fn reached(&self, phase: Phase) -> bool {
        self.terminal_phase >= phase
    }

    pub fn failed_verifies(&self) -> impl Iterator<Item = &VerifyOutcome> {
        self.verifies.iter().filter(|v| !v.passed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
}

impl Summary {
    pub fn of(cases: &[CaseResult]) -> Self {
        let mut summary = Summary {
            total: cases.len(),
            ..Default::default()
        };
        for case in cases {
            match case.status {
                CaseStatus::Passed => summary.passed += 1,
                CaseStatus::Failed => summary.failed += 1,
                CaseStatus::Error => summary.errors += 1,
            }
        }
        summary
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: Summary,
    pub cases: Vec<CaseResult>,
    /// Variable bindings when the last case finished
    pub context: BTreeMap<String, Value>,
}

impl RunReport {
    pub fn new(cases: Vec<CaseResult>, context: BTreeMap<String, Value>) -> Self {
        Self {
            summary: Summary::of(&cases),
            cases,
            context,
        }
    }

    /// True when no case failed or errored
    pub fn passed(&self) -> bool {
        self.summary.failed == 0 && self.summary.errors == 0
    }

    pub fn case(&self, id: &str) -> Option<&CaseResult> {
        self.cases.iter().find(|c| c.id == id)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON
    pub fn write_to(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Write any serializable value as pretty JSON, creating parent directories
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(id: &str) -> CaseResult {
        CaseResult::new(&CaseDefinition::new(id, "d"), "m")
    }

    #[test]
    fn test_fail_keeps_phase() {
        let mut r = result("A");
        r.terminal_phase = Phase::Steps;
        r.fail(&Error::step_failed("request", "timeout"));
        assert_eq!(r.status, CaseStatus::Error);
        let err = r.error.as_ref().unwrap();
        assert_eq!(err.phase, Phase::Steps);
        assert_eq!(err.kind, "STEP_FAILED");
        assert!(r.reached(Phase::PreCommand));
        assert!(!r.reached(Phase::Verify));
    }

    #[test]
    fn test_finish_verdict() {
        let mut r = result("A");
        r.finish(vec![
            VerifyOutcome {
                action: "a".into(),
                passed: true,
                message: None,
            },
            VerifyOutcome {
                action: "b".into(),
                passed: false,
                message: Some("no".into()),
            },
        ]);
        assert_eq!(r.status, CaseStatus::Failed);
        assert!(r.reached(Phase::Verify));
        assert_eq!(r.failed_verifies().count(), 1);
    }

    #[test]
    fn test_report_json() {
        let mut ok = result("A");
        ok.finish(Vec::new());
        let mut broken = result("B");
        broken.fail(&Error::UnresolvedVariable("x".into()));

        let report = RunReport::new(vec![ok, broken], BTreeMap::from([("k".to_string(), json!(1))]));
        assert_eq!(report.summary.passed, 1);
        assert_eq!(report.summary.errors, 1);
        assert!(!report.passed());

        let value: Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["cases"][0]["status"], json!("passed"));
        assert_eq!(value["cases"][0]["terminal_phase"], json!("DONE"));
        assert_eq!(value["cases"][1]["error"]["phase"], json!("START"));
        assert_eq!(value["cases"][1]["error"]["category"], json!("resolution"));
        assert_eq!(value["context"]["k"], json!(1));
    }
}
