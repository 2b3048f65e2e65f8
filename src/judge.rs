mod batch;
mod executor;
mod isolate;
mod process;
mod verdict;

pub use batch::BatchRunner;
pub use executor::{Executor, PrepareError, PreparedProgram, outputs_match};
pub use process::ProcessExecutor;
pub use verdict::{Verdict, VerdictStatus, aggregate};

use std::sync::Arc;

use anyhow::Result;

use isolate::IsolateExecutor;

/// One test case a candidate program runs against
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TestCase {
    pub id: i64,
    pub input: String,
    pub expected_output: String,
    pub is_sample: bool,
}

/// Classification of a failed execution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Wall-clock limit exceeded, program was force-stopped
    Timeout,
    /// The candidate code faulted (non-zero exit, uncaught error)
    Runtime,
    /// The judging harness itself failed
    System,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Timeout,
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::Runtime,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: FaultKind::System,
            message: message.into(),
        }
    }
}

/// Result of running one program against one test case
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionOutcome {
    pub test_case_id: i64,
    pub output: Option<String>,
    pub passed: bool,
    pub time_ms: u64,
    pub fault: Option<Fault>,
}

impl ExecutionOutcome {
    /// An outcome for an attempt the harness could not carry out
    pub fn system_fault(test_case_id: i64, message: impl Into<String>) -> Self {
        Self {
            test_case_id,
            output: None,
            passed: false,
            time_ms: 0,
            fault: Some(Fault::system(message)),
        }
    }
}

/// Resource ceilings for one execution
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub time_limit_ms: u64,
    pub max_output_bytes: usize,
}

/// Creates an executor based on what the host provides
///
/// When the `isolate` binary is available, an IsolateExecutor with full
/// sandboxing is created; `slots` isolate boxes are reserved for it so
/// concurrent test cases never share a box. Otherwise a ProcessExecutor
/// is created, which only provides timeout enforcement. Setting the
/// NO_ISOLATE environment variable to "1" forces the latter.
pub fn create_executor(id: u8, slots: usize) -> Result<Arc<dyn Executor>> {
    let have_isolate = std::env::var("NO_ISOLATE").as_deref() != Ok("1")
        && std::process::Command::new("which")
            .arg("isolate")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false);

    if have_isolate {
        log::info!("Creating IsolateExecutor {id} (full isolation mode)");
        let executor = IsolateExecutor::build(id, slots)?;
        Ok(Arc::new(executor))
    } else {
        log::info!("Creating ProcessExecutor {id} (no isolation mode)");
        let executor = ProcessExecutor::build(id)?;
        Ok(Arc::new(executor))
    }
}
