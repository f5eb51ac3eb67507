//! Run orchestration
//!
//! A [`Runner`] owns everything one run needs: the context store, the tracer,
//! the step executors and the case strategy. Cases run one at a time in
//! composition order; a case that errors never stops the ones after it.

pub mod executor;
pub mod pipeline;
pub mod report;
pub mod tracer;

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use executor::{ExecutorRegistry, FnExecutor, StepExecutor};
pub use pipeline::{CaseRunner, DefaultCaseRunner, Phase, RunEnv};
pub use report::{CaseError, CaseResult, CaseStatus, RunReport, Summary, VerifyOutcome};
pub use tracer::{CaseTrace, NullTracer, RecordingTracer, TraceEntry, TraceLevel, Tracer};

use crate::common::config::Config;
use crate::context::ContextStore;
use crate::definition::{CaseDefinition, StepKind, TestSet, DEFAULT_MODULE};

/// Orchestrates a run over composed cases
pub struct Runner<T: Tracer = RecordingTracer> {
    ctx: ContextStore,
    tracer: T,
    executors: ExecutorRegistry,
    case_runner: Box<dyn CaseRunner>,
}

impl Default for Runner<RecordingTracer> {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner<RecordingTracer> {
    /// A runner with the built-in verbs and a recording tracer
    pub fn new() -> Self {
        Self::with_tracer(RecordingTracer::new())
    }

    /// A runner seeded from configuration: depth limit and global variables
    pub fn from_config(config: &Config) -> Self {
        let mut runner = Self::new();
        runner.ctx.set_max_depth(config.template.max_depth);
        runner.seed_variables(&config.variables);
        runner
    }
}

impl<T: Tracer> Runner<T> {
    pub fn with_tracer(tracer: T) -> Self {
        Self {
            ctx: ContextStore::with_builtins(),
            tracer,
            executors: ExecutorRegistry::new(),
            case_runner: Box::new(DefaultCaseRunner),
        }
    }

    /// Replace the per-case execution strategy
    pub fn with_case_runner(mut self, case_runner: impl CaseRunner + 'static) -> Self {
        self.case_runner = Box::new(case_runner);
        self
    }

    /// Register the executor for one step kind
    pub fn with_executor(mut self, kind: StepKind, executor: Arc<dyn StepExecutor>) -> Self {
        self.executors.register(kind, executor);
        self
    }

    pub fn context(&self) -> &ContextStore {
        &self.ctx
    }

    /// Mutable store access, e.g. to register extra verbs before running
    pub fn context_mut(&mut self) -> &mut ContextStore {
        &mut self.ctx
    }

    pub fn executors_mut(&mut self) -> &mut ExecutorRegistry {
        &mut self.executors
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn into_tracer(self) -> T {
        self.tracer
    }

    /// Bind global variables; later bindings of the same name win
    pub fn seed_variables(&mut self, variables: &BTreeMap<String, Value>) {
        for (name, value) in variables {
            self.ctx.set(name.clone(), value.clone());
        }
    }

    /// Run cases outside any testset
    pub fn run_all(&mut self, cases: &[CaseDefinition]) -> RunReport {
        let results = self.run_cases(cases, DEFAULT_MODULE);
        self.report(results)
    }

    pub fn run_testset(&mut self, testset: &TestSet) -> RunReport {
        self.run_testsets(std::slice::from_ref(testset))
    }

    /// Run several testsets in order into one report, sharing one store
    pub fn run_testsets(&mut self, testsets: &[TestSet]) -> RunReport {
        let mut results = Vec::new();
        for testset in testsets {
            tracing::info!(
                "testset {} [{}]: {} case(s)",
                testset.project.name,
                testset.project.module,
                testset.cases.len()
            );
            results.extend(self.run_cases(&testset.cases, &testset.project.module));
        }
        self.report(results)
    }

    fn run_cases(&mut self, cases: &[CaseDefinition], module: &str) -> Vec<CaseResult> {
        let mut results = Vec::with_capacity(cases.len());
        for case in cases {
            let mut env = RunEnv {
                ctx: &mut self.ctx,
                tracer: &mut self.tracer,
                executors: &self.executors,
                module,
            };
            let result = self.case_runner.run_one(case, &mut env);
            match result.status {
                CaseStatus::Passed => tracing::info!("{} passed", result.name),
                CaseStatus::Failed => tracing::info!(
                    "{} failed {} verify action(s)",
                    result.name,
                    result.failed_verifies().count()
                ),
                CaseStatus::Error => tracing::info!(
                    "{} errored in {}",
                    result.name,
                    result.terminal_phase
                ),
            }
            results.push(result);
        }
        results
    }

    fn report(&mut self, cases: Vec<CaseResult>) -> RunReport {
        RunReport::new(cases, self.context_snapshot())
    }

    /// Current bindings with deferred values expanded where possible
    fn context_snapshot(&mut self) -> BTreeMap<String, Value> {
        let mut snapshot = self.ctx.snapshot();
        for (name, value) in snapshot.iter_mut() {
            if self.ctx.is_deferred(name) {
                if let Ok(expanded) = self.ctx.resolver().variable(name) {
                    *value = expanded;
                }
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use crate::definition::{Action, StepSpec};
    use serde_json::json;

    fn request_case(id: &str, url: &str) -> CaseDefinition {
        let mut case = CaseDefinition::new(id, format!("case {}", id));
        let step = json!({"request": {"url": url, "method": "GET"}});
        case.steps = vec![StepSpec::from_map(step.as_object().cloned().unwrap_or_default(), id).unwrap()];
        case.verify = vec![Action::parse("${VerifyCode(200)}").unwrap()];
        case
    }

    fn ok_executor() -> Arc<dyn StepExecutor> {
        Arc::new(FnExecutor(|_: &StepKind, _: &Value, _: &ContextStore| {
            Ok(json!({"status_code": 200}))
        }))
    }

    #[test]
    fn test_failing_case_does_not_stop_run() {
        let cases = vec![
            request_case("one", "/a"),
            request_case("two", "/b/$nothing"),
            request_case("three", "/c"),
        ];
        let mut runner = Runner::new().with_executor(StepKind::Request, ok_executor());
        let report = runner.run_all(&cases);

        assert_eq!(report.summary.total, 3);
        assert!(report.case("one").unwrap().reached(Phase::Verify));
        assert!(report.case("three").unwrap().reached(Phase::Verify));
        let two = report.case("two").unwrap();
        assert_eq!(two.status, CaseStatus::Error);
        assert_eq!(two.error.as_ref().unwrap().phase, Phase::Steps);
        assert_eq!(runner.tracer().records().len(), 3);
    }

    #[test]
    fn test_context_is_shared_across_cases() {
        let mut first = request_case("one", "/a");
        first.pre_command = vec![Action::parse("${SetVar(shared, 5)}").unwrap()];
        let mut second = request_case("two", "/b/$shared");
        second.verify.push(Action::parse("${VerifyVar(shared, 5)}").unwrap());

        let mut runner = Runner::new().with_executor(StepKind::Request, ok_executor());
        let report = runner.run_all(&[first, second]);
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.context.get("shared"), Some(&json!(5)));
    }

    struct AlwaysError;

    impl CaseRunner for AlwaysError {
        fn run_one(&self, case: &CaseDefinition, env: &mut RunEnv<'_>) -> CaseResult {
            let mut result = CaseResult::new(case, env.module);
            result.fail(&Error::step_failed("custom", "refused"));
            result
        }
    }

    #[test]
    fn test_case_runner_is_pluggable() {
        let mut runner = Runner::with_tracer(NullTracer).with_case_runner(AlwaysError);
        let report = runner.run_all(&[request_case("one", "/a"), request_case("two", "/b")]);
        assert_eq!(report.summary.errors, 2);
        assert_eq!(report.cases[0].error.as_ref().unwrap().phase, Phase::Start);
    }

    #[test]
    fn test_from_config_seeds_variables() {
        let config = Config::parse("[variables]\nhost = \"example.com\"\n[template]\nmax_depth = 4\n").unwrap();
        let runner = Runner::from_config(&config);
        assert_eq!(runner.context().get("host"), Some(&json!("example.com")));
        assert_eq!(runner.context().max_depth(), 4);
    }

    #[test]
    fn test_snapshot_expands_deferred() {
        let mut case = request_case("one", "/a");
        case.glob_var.insert("base".into(), json!("https://$host"));
        let mut runner = Runner::new().with_executor(StepKind::Request, ok_executor());
        runner.context_mut().set("host", json!("h"));
        let report = runner.run_all(&[case]);
        assert_eq!(report.context.get("base"), Some(&json!("https://h")));
    }

    #[test]
    fn test_module_comes_from_testset() {
        let testset = TestSet {
            path: "t.yaml".into(),
            project: crate::definition::ProjectInfo {
                name: "p".into(),
                module: "billing".into(),
                def: None,
            },
            cases: vec![request_case("one", "/a")],
        };
        let mut runner = Runner::new().with_executor(StepKind::Request, ok_executor());
        let report = runner.run_testset(&testset);
        assert_eq!(report.cases[0].module, "billing");
        assert_eq!(runner.tracer().records()[0].module, "billing");
    }
}
