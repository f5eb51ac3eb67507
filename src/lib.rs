//! stepcase - declarative test-case engine
//!
//! Test cases are written as YAML or JSON documents. The engine loads them,
//! composes reusable api and suite fragments, resolves `$NAME` / `${F(args)}`
//! templates against a run-scoped context store and drives every case through
//! a four-phase pipeline, recording a structured trace and a run report.

pub mod cli;
pub mod commands;
pub mod common;
pub mod context;
pub mod definition;
pub mod runner;
pub mod template;

// Re-export commonly used types
pub use common::config::Config;
pub use common::{Error, ErrorCategory, Result};
pub use context::{Args, ContextStore, Function, FunctionRegistry, Signature};
pub use definition::{load_path, load_paths, load_testset, CaseDefinition, StepKind, TestSet};
pub use runner::{
    CaseResult, CaseRunner, CaseStatus, ExecutorRegistry, Phase, RecordingTracer, RunReport,
    Runner, StepExecutor, Tracer,
};
