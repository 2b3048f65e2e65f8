use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::LanguageConfig;

use super::{ExecutionOutcome, Limits, TestCase};

/// A candidate program written to disk and ready to execute
#[derive(Debug)]
pub struct PreparedProgram {
    /// Host-side directory holding the written source (and artifacts)
    pub dir: PathBuf,
    /// Fully rendered command that runs the program
    pub run_command: Vec<String>,
}

/// Failure to set up a candidate program: missing entry point, syntax or
/// compile error, or a harness I/O problem. Always maps to a
/// `system_error` verdict covering the whole batch.
#[derive(Debug)]
pub struct PrepareError {
    pub message: String,
}

impl PrepareError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for PrepareError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PrepareError {}

/// Trait for different execution isolation implementations
///
/// This trait abstracts the core functionality needed for preparing and
/// running untrusted candidate code - from full isolation with `isolate`
/// to plain subprocess execution without sandboxing.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Writes the candidate code to a fresh program directory and runs
    /// the language's one-time preparation step, if any.
    async fn prepare(
        &self,
        code: &str,
        language: &LanguageConfig,
    ) -> Result<PreparedProgram, PrepareError>;

    /// Runs the prepared program against one test case in a fresh
    /// context. Never returns an error: harness problems are reported
    /// inside the outcome as system faults.
    async fn execute(
        &self,
        program: &PreparedProgram,
        test_case: &TestCase,
        limits: &Limits,
    ) -> ExecutionOutcome;
}

/// Compares produced output with expected output
///
/// Exact byte comparison after trimming leading/trailing whitespace on
/// both sides. No numeric tolerance and no structural equivalence;
/// float-valued answers rely on fixed-format expected strings.
pub fn outputs_match(produced: &str, expected: &str) -> bool {
    produced.trim() == expected.trim()
}

/// Renders a command template, substituting the source file location
pub(super) fn render_command(template: &[String], source: &str) -> Vec<String> {
    template.iter().map(|s| s.replace("%INPUT%", source)).collect()
}

/// Renders the source text written to disk for a candidate program
pub(super) fn render_source(code: &str, language: &LanguageConfig) -> String {
    match &language.harness {
        Some(harness) => harness.replace("%CODE%", code),
        None => format!("{code}\n"),
    }
}
