//! Per-case pipeline
//!
//! `START -> PRE_COMMAND -> STEPS -> POST_COMMAND -> VERIFY -> DONE`. Every
//! phase runs even when empty. A fatal error in any phase before VERIFY ends
//! the case; verify actions are independent assertions and all of them run.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use super::executor::ExecutorRegistry;
use super::report::{CaseResult, VerifyOutcome};
use super::tracer::Tracer;
use crate::common::{Error, Result};
use crate::context::ContextStore;
use crate::definition::{Action, CaseDefinition, StepSpec};
use crate::template::render;

/// Pipeline phase, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Start,
    PreCommand,
    Steps,
    PostCommand,
    Verify,
    Done,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "START",
            Phase::PreCommand => "PRE_COMMAND",
            Phase::Steps => "STEPS",
            Phase::PostCommand => "POST_COMMAND",
            Phase::Verify => "VERIFY",
            Phase::Done => "DONE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one case execution gets to work with
pub struct RunEnv<'a> {
    pub ctx: &'a mut ContextStore,
    pub tracer: &'a mut dyn Tracer,
    pub executors: &'a ExecutorRegistry,
    /// Module name of the testset the case came from
    pub module: &'a str,
}

/// Execution strategy for a single case
///
/// This is the only override point of a run; the orchestration loop itself is
/// fixed. Implementations must not panic on case failures: every outcome,
/// fatal or not, goes into the returned [`CaseResult`].
pub trait CaseRunner {
    fn run_one(&self, case: &CaseDefinition, env: &mut RunEnv<'_>) -> CaseResult;
}

/// The standard four-phase pipeline
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCaseRunner;

impl CaseRunner for DefaultCaseRunner {
    fn run_one(&self, case: &CaseDefinition, env: &mut RunEnv<'_>) -> CaseResult {
        let mut result = CaseResult::new(case, env.module);
        env.tracer.start(
            env.module,
            &result.name,
            case.responsible.as_deref(),
            case.tester.as_deref(),
        );

        match run_fatal_phases(case, env, &mut result) {
            Ok(()) => {
                result.terminal_phase = Phase::Verify;
                env.tracer.section("verify");
                let verifies = run_verify(&case.verify, env);
                result.finish(verifies);
            }
            Err(e) => {
                env.tracer.error(&format!("{} failed: {}", result.terminal_phase, e));
                result.fail(&e);
            }
        }

        env.tracer.stop();
        result
    }
}

/// PRE_COMMAND, STEPS and POST_COMMAND; the first error ends the case
fn run_fatal_phases(
    case: &CaseDefinition,
    env: &mut RunEnv<'_>,
    result: &mut CaseResult,
) -> Result<()> {
    result.terminal_phase = Phase::PreCommand;
    env.tracer.section("pre_command");
    bind_case_globals(case, env);
    run_actions(&case.pre_command, env)?;

    result.terminal_phase = Phase::Steps;
    env.tracer.section("steps");
    for step in &case.steps {
        if run_step(step, env)? {
            result.steps_run += 1;
        } else {
            result.steps_skipped += 1;
        }
    }

    result.terminal_phase = Phase::PostCommand;
    env.tracer.section("post_command");
    run_actions(&case.post_command, env)
}

/// Bind `glob_var` as deferred templates and register `glob_regx` patterns
pub fn bind_case_globals(case: &CaseDefinition, env: &mut RunEnv<'_>) {
    for (name, value) in &case.glob_var {
        env.ctx.define(name.clone(), value.clone());
    }
    for (name, pattern) in &case.glob_regx {
        env.ctx.set_pattern(name.clone(), pattern.clone());
    }
    if !case.glob_var.is_empty() || !case.glob_regx.is_empty() {
        env.tracer.normal(&format!(
            "bound {} variable(s), {} pattern(s)",
            case.glob_var.len(),
            case.glob_regx.len()
        ));
    }
}

/// Evaluate one action against the store
pub fn run_action(action: &Action, ctx: &mut ContextStore) -> Result<Value> {
    ctx.resolver().eval_call(&action.call)
}

/// Evaluate actions in order, stopping at the first error
pub fn run_actions(actions: &[Action], env: &mut RunEnv<'_>) -> Result<()> {
    for action in actions {
        let value = run_action(action, env.ctx)?;
        env.tracer.normal(&format!("{} -> {}", action, render(&value)));
    }
    Ok(())
}

/// Resolve and dispatch one step; `Ok(false)` when it was skipped
///
/// Steps without an executor are skipped before resolution.
pub fn run_step(step: &StepSpec, env: &mut RunEnv<'_>) -> Result<bool> {
    let Some(executor) = env.executors.get(&step.kind) else {
        tracing::warn!("no executor for '{}' steps, skipping", step.kind);
        env.tracer.normal(&format!("skipped '{}' step: no executor", step.kind));
        return Ok(false);
    };

    let fields = env.ctx.resolve_value(&step.fields)?;
    env.tracer.step(&format!("{} {}", step.kind, fields));

    let value = executor.execute(&step.kind, &fields, env.ctx)?;
    if let Some(name) = &step.result {
        env.ctx.set(name.clone(), value.clone());
    }
    env.ctx.set_last_result(value);
    Ok(true)
}

/// Evaluate every verify action; none of them can end the case
pub fn run_verify(actions: &[Action], env: &mut RunEnv<'_>) -> Vec<VerifyOutcome> {
    actions
        .iter()
        .map(|action| {
            let outcome = match run_action(action, env.ctx) {
                Ok(Value::Bool(false)) => VerifyOutcome {
                    action: action.source.clone(),
                    passed: false,
                    message: Some(format!("{} evaluated to false", action)),
                },
                Ok(_) => VerifyOutcome {
                    action: action.source.clone(),
                    passed: true,
                    message: None,
                },
                Err(e) => VerifyOutcome {
                    action: action.source.clone(),
                    passed: false,
                    message: Some(verify_message(&e)),
                },
            };
            if outcome.passed {
                env.tracer.normal(&format!("verify {}: pass", action));
            } else {
                env.tracer.error(&format!(
                    "verify {}: {}",
                    action,
                    outcome.message.as_deref().unwrap_or("failed")
                ));
            }
            outcome
        })
        .collect()
}

fn verify_message(error: &Error) -> String {
    match error {
        Error::Assertion(message) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextStore;
    use crate::definition::{CaseDefinition, StepKind};
    use crate::runner::report::CaseStatus;
    use crate::runner::tracer::{RecordingTracer, TraceLevel};
    use serde_json::{json, Map};

    fn step(value: Value) -> StepSpec {
        match value {
            Value::Object(map) => StepSpec::from_map(map, "test").unwrap(),
            _ => StepSpec::from_map(Map::new(), "test").unwrap(),
        }
    }

    fn actions(sources: &[&str]) -> Vec<Action> {
        sources.iter().map(|s| Action::parse(s).unwrap()).collect()
    }

    fn echo_executors() -> ExecutorRegistry {
        let mut executors = ExecutorRegistry::new();
        executors.register_fn(StepKind::Request, |_, fields, _| {
            Ok(json!({"status_code": 200, "text": format!("token=abc123 for {}", fields["url"])}))
        });
        executors
    }

    fn run(case: &CaseDefinition, ctx: &mut ContextStore, executors: &ExecutorRegistry) -> (CaseResult, RecordingTracer) {
        let mut tracer = RecordingTracer::new();
        let result = {
            let mut env = RunEnv {
                ctx,
                tracer: &mut tracer,
                executors,
                module: "m",
            };
            DefaultCaseRunner.run_one(case, &mut env)
        };
        (result, tracer)
    }

    #[test]
    fn test_phases_in_order() {
        let mut case = CaseDefinition::new("C1", "full pipeline");
        case.glob_regx
            .insert("tok".into(), regex::Regex::new(r"token=(\w+)").unwrap());
        case.pre_command = actions(&["${SetVar(path, /login)}"]);
        case.steps = vec![step(json!({"request": {"url": "$path", "method": "GET"}, "result": "resp"}))];
        case.post_command = actions(&["${DyStrData(token, tok)}"]);
        case.verify = actions(&["${VerifyCode(200)}", "${VerifyVar(token, abc123)}"]);

        let mut ctx = ContextStore::with_builtins();
        let (result, tracer) = run(&case, &mut ctx, &echo_executors());

        assert_eq!(result.status, CaseStatus::Passed, "{:?}", result);
        assert_eq!(result.terminal_phase, Phase::Done);
        assert_eq!(result.steps_run, 1);
        assert_eq!(ctx.get("token"), Some(&json!("abc123")));
        assert_eq!(ctx.get("resp").unwrap()["status_code"], json!(200));

        let trace = &tracer.records()[0];
        assert_eq!(
            trace.messages(TraceLevel::Section),
            vec!["pre_command", "steps", "post_command", "verify"]
        );
        assert_eq!(trace.messages(TraceLevel::Step), vec![r#"request {"method":"GET","url":"/login"}"#]);
    }

    #[test]
    fn test_step_error_ends_case() {
        let mut case = CaseDefinition::new("C2", "broken");
        case.steps = vec![step(json!({"request": {"url": "$missing", "method": "GET"}}))];
        case.post_command = actions(&["${SetVar(after, 1)}"]);
        case.verify = actions(&["${VerifyCode(200)}"]);

        let mut ctx = ContextStore::with_builtins();
        let (result, tracer) = run(&case, &mut ctx, &echo_executors());

        assert_eq!(result.status, CaseStatus::Error);
        assert_eq!(result.terminal_phase, Phase::Steps);
        let error = result.error.unwrap();
        assert_eq!(error.phase, Phase::Steps);
        assert_eq!(error.kind, "UNRESOLVED_VARIABLE");
        assert!(result.verifies.is_empty());
        assert!(!ctx.contains("after"));
        assert_eq!(tracer.records()[0].messages(TraceLevel::Error).len(), 1);
    }

    #[test]
    fn test_executor_failure() {
        let mut executors = ExecutorRegistry::new();
        executors.register_fn(StepKind::WebDriver, |kind, _, _| {
            Err(Error::step_failed(kind.as_str(), "element not found"))
        });
        let mut case = CaseDefinition::new("C3", "driver fails");
        case.steps = vec![step(json!({"webdriver": {"by": "id"}}))];

        let mut ctx = ContextStore::with_builtins();
        let (result, _) = run(&case, &mut ctx, &executors);
        assert_eq!(result.status, CaseStatus::Error);
        assert_eq!(result.error.unwrap().kind, "STEP_FAILED");
    }

    #[test]
    fn test_unknown_verb_in_pre_command() {
        let mut case = CaseDefinition::new("C4", "bad verb");
        case.pre_command = actions(&["${Nope(1)}"]);
        case.steps = vec![step(json!({"webdriver": {}}))];

        let mut ctx = ContextStore::with_builtins();
        let (result, _) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert_eq!(result.terminal_phase, Phase::PreCommand);
        assert_eq!(result.error.unwrap().kind, "UNKNOWN_FUNCTION");
    }

    #[test]
    fn test_resolution_error_in_post_command_is_fatal() {
        let mut case = CaseDefinition::new("C5", "post fails");
        case.steps = vec![step(json!({"webdriver": {}}))];
        case.post_command = actions(&["${SetVar(x, $ghost)}"]);
        case.verify = actions(&["${VerifyVar(x, 1)}"]);

        let mut ctx = ContextStore::with_builtins();
        let (result, _) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert_eq!(result.status, CaseStatus::Error);
        assert_eq!(result.error.unwrap().phase, Phase::PostCommand);
    }

    #[test]
    fn test_all_verifies_run() {
        let mut case = CaseDefinition::new("C6", "verifies");
        case.steps = vec![step(json!({"webdriver": {}}))];
        case.pre_command = actions(&["Set(a=1, b=2)"]);
        case.verify = actions(&[
            "${VerifyVar(a, 2)}",
            "${VerifyVar(missing, 1)}",
            "${VerifyVar(b, 2)}",
            "${VerifyEqual($a, 1)}",
        ]);

        let mut ctx = ContextStore::with_builtins();
        let (result, _) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.terminal_phase, Phase::Done);
        assert!(result.error.is_none());
        let passed: Vec<bool> = result.verifies.iter().map(|v| v.passed).collect();
        assert_eq!(passed, vec![false, false, true, true]);
        assert!(result.verifies[1].message.as_deref().unwrap().contains("missing"));
    }

    #[test]
    fn test_verify_resolution_errors_are_failed_assertions() {
        let mut case = CaseDefinition::new("C6b", "broken verifies");
        case.steps = vec![step(json!({"webdriver": {}}))];
        case.pre_command = actions(&["${SetVar(a, 1)}"]);
        case.verify = actions(&[
            "${Nope(1)}",
            "${VerifyEqual($ghost, 1)}",
            "${VerifyVar(a, 1)}",
        ]);

        let mut ctx = ContextStore::with_builtins();
        let (result, tracer) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert_eq!(result.status, CaseStatus::Failed);
        assert_eq!(result.terminal_phase, Phase::Done);
        assert!(result.error.is_none());

        let passed: Vec<bool> = result.verifies.iter().map(|v| v.passed).collect();
        assert_eq!(passed, vec![false, false, true]);
        assert!(result.verifies[0].message.as_deref().unwrap().contains("Nope"));
        assert!(result.verifies[1].message.as_deref().unwrap().contains("ghost"));
        assert_eq!(tracer.records()[0].messages(TraceLevel::Error).len(), 2);
    }

    #[test]
    fn test_verify_false_value_fails() {
        let mut ctx = ContextStore::with_builtins();
        ctx.register_fn("No", crate::context::Signature::exact(&[]), |_, _| Ok(json!(false)));
        let mut case = CaseDefinition::new("C7", "false");
        case.steps = vec![step(json!({"webdriver": {}}))];
        case.verify = actions(&["${No()}"]);

        let (result, _) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert_eq!(result.status, CaseStatus::Failed);
    }

    #[test]
    fn test_step_without_executor_is_skipped() {
        let mut case = CaseDefinition::new("C8", "skip");
        case.steps = vec![
            step(json!({"mobiledriver": {"tap": "$unbound"}})),
            step(json!({"request": {"url": "/a", "method": "GET"}})),
        ];
        let mut ctx = ContextStore::with_builtins();
        let (result, tracer) = run(&case, &mut ctx, &echo_executors());
        assert_eq!(result.status, CaseStatus::Passed);
        assert_eq!(result.steps_skipped, 1);
        assert_eq!(result.steps_run, 1);
        assert!(tracer.records()[0]
            .messages(TraceLevel::Normal)
            .iter()
            .any(|m| m.starts_with("skipped 'mobiledriver'")));
    }

    #[test]
    fn test_glob_var_is_deferred() {
        let mut case = CaseDefinition::new("C9", "deferred");
        case.glob_var.insert("host".into(), json!("example.com"));
        case.glob_var.insert("url".into(), json!("https://$host/x"));
        case.steps = vec![step(json!({"webdriver": {}}))];
        case.pre_command = actions(&["${SetVar(u, $url)}"]);

        let mut ctx = ContextStore::with_builtins();
        let (result, _) = run(&case, &mut ctx, &ExecutorRegistry::new());
        assert!(result.passed());
        assert_eq!(ctx.get("u"), Some(&json!("https://example.com/x")));
    }
}
