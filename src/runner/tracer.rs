//! Structured per-case trace sink
//!
//! The orchestrator never consults a tracer's state, and tracer calls cannot
//! fail. [`RecordingTracer`] keeps serializable records for report rendering
//! and mirrors every entry to `tracing`.

use serde::Serialize;

/// Append-only log sink, one sequence per case
pub trait Tracer {
    fn start(&mut self, module: &str, case_name: &str, responsible: Option<&str>, tester: Option<&str>);
    fn section(&mut self, name: &str);
    fn normal(&mut self, message: &str);
    fn step(&mut self, message: &str);
    fn error(&mut self, message: &str);
    fn stop(&mut self);
}

/// Kind of a trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
    Section,
    Normal,
    Step,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub level: TraceLevel,
    pub message: String,
}

/// Everything traced for one case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseTrace {
    pub module: String,
    pub case: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tester: Option<String>,
    pub entries: Vec<TraceEntry>,
}

impl CaseTrace {
    /// Messages of one level, in order
    pub fn messages(&self, level: TraceLevel) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.level == level)
            .map(|e| e.message.as_str())
            .collect()
    }
}

/// Tracer that keeps every case's records in memory
#[derive(Debug, Default)]
pub struct RecordingTracer {
    finished: Vec<CaseTrace>,
    current: Option<CaseTrace>,
}

impl RecordingTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records of every stopped case
    pub fn records(&self) -> &[CaseTrace] {
        &self.finished
    }

    pub fn into_records(mut self) -> Vec<CaseTrace> {
        self.stop();
        self.finished
    }

    fn push(&mut self, level: TraceLevel, message: &str) {
        match self.current.as_mut() {
            Some(trace) => trace.entries.push(TraceEntry {
                level,
                message: message.to_string(),
            }),
            None => tracing::debug!("trace entry outside a case dropped: {}", message),
        }
    }
}

impl Tracer for RecordingTracer {
    fn start(&mut self, module: &str, case_name: &str, responsible: Option<&str>, tester: Option<&str>) {
        // An unstopped case is closed implicitly
        self.stop();
        tracing::info!("[{}] {}", module, case_name);
        self.current = Some(CaseTrace {
            module: module.to_string(),
            case: case_name.to_string(),
            responsible: responsible.map(str::to_string),
            tester: tester.map(str::to_string),
            entries: Vec::new(),
        });
    }

    fn section(&mut self, name: &str) {
        tracing::debug!("-- {}", name);
        self.push(TraceLevel::Section, name);
    }

    fn normal(&mut self, message: &str) {
        tracing::debug!("{}", message);
        self.push(TraceLevel::Normal, message);
    }

    fn step(&mut self, message: &str) {
        tracing::debug!("step: {}", message);
        self.push(TraceLevel::Step, message);
    }

    fn error(&mut self, message: &str) {
        tracing::warn!("{}", message);
        self.push(TraceLevel::Error, message);
    }

    fn stop(&mut self) {
        if let Some(trace) = self.current.take() {
            self.finished.push(trace);
        }
    }
}

/// Tracer that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracer;

impl Tracer for NullTracer {
    fn start(&mut self, _: &str, _: &str, _: Option<&str>, _: Option<&str>) {}
    fn section(&mut self, _: &str) {}
    fn normal(&mut self, _: &str) {}
    fn step(&mut self, _: &str) {}
    fn error(&mut self, _: &str) {}
    fn stop(&mut self) {}
}
