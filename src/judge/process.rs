use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;

use crate::config::LanguageConfig;

use super::executor::{
    Executor, PrepareError, PreparedProgram, outputs_match, render_command, render_source,
};
use super::{ExecutionOutcome, Fault, Limits, TestCase};

const PREPARE_TIMEOUT: Duration = Duration::from_secs(30);

static PROGRAM_SEQ: AtomicU64 = AtomicU64::new(0);

/// An executor that runs code as plain subprocesses without sandboxing
///
/// ProcessExecutor enforces the wall-clock limit and the output ceiling
/// but provides no memory, file system, or permission controls. This is
/// intended for development/testing environments where security
/// isolation is not critical.
pub struct ProcessExecutor {
    /// Unique identifier for this instance
    id: u8,
    /// Path to the working directory for this executor
    work_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn build(id: u8) -> Result<Self> {
        let work_dir = std::env::temp_dir().join("duel-judge").join(id.to_string());
        std::fs::create_dir_all(&work_dir)?;

        log::info!("ProcessExecutor {id} initialized successfully");
        log::warn!(
            "ProcessExecutor provides NO security isolation - use only in trusted environments"
        );

        Ok(Self { id, work_dir })
    }

    /// Creates a fresh directory for one prepared program
    fn create_program_dir(&self) -> std::io::Result<PathBuf> {
        let seq = PROGRAM_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .work_dir
            .join(format!("{}-{seq}", Local::now().format("%y%m%d-%H-%M-%S")));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Runs the language's check command against the written source
    async fn run_check_command(&self, command: &[String], dir: &PathBuf) -> Result<(), PrepareError> {
        if command.is_empty() {
            return Err(PrepareError::new("empty check command"));
        }

        let mut cmd = tokio::process::Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(dir)
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| PrepareError::new(format!("failed to spawn check command: {e}")))?;

        match timeout(PREPARE_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    Ok(())
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stdout = String::from_utf8_lossy(&output.stdout);
                    let detail = if stderr.trim().is_empty() {
                        stdout.trim().to_string()
                    } else {
                        stderr.trim().to_string()
                    };
                    let message = if detail.is_empty() {
                        "program preparation check failed".to_string()
                    } else {
                        format!("program preparation check failed: {detail}")
                    };
                    Err(PrepareError::new(message))
                }
            }
            Ok(Err(e)) => Err(PrepareError::new(format!("check command error: {e}"))),
            Err(_) => Err(PrepareError::new("program preparation timed out")),
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn prepare(
        &self,
        code: &str,
        language: &LanguageConfig,
    ) -> Result<PreparedProgram, PrepareError> {
        let dir = self
            .create_program_dir()
            .map_err(|e| PrepareError::new(format!("failed to create program directory: {e}")))?;

        let source_path = dir.join(&language.file_name);
        tokio::fs::write(&source_path, render_source(code, language))
            .await
            .map_err(|e| PrepareError::new(format!("failed to write source file: {e}")))?;

        let source = source_path.to_string_lossy().into_owned();
        if let Some(check) = &language.check_command {
            self.run_check_command(&render_command(check, &source), &dir)
                .await?;
        }

        log::debug!("ProcessExecutor {} prepared program in {dir:?}", self.id);
        Ok(PreparedProgram {
            dir,
            run_command: render_command(&language.run_command, &source),
        })
    }

    async fn execute(
        &self,
        program: &PreparedProgram,
        test_case: &TestCase,
        limits: &Limits,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome {
            test_case_id: test_case.id,
            output: None,
            passed: false,
            time_ms: 0,
            fault: None,
        };

        let command = &program.run_command;
        if command.is_empty() {
            outcome.fault = Some(Fault::system("empty run command"));
            return outcome;
        }

        let start = Instant::now();
        let mut cmd = tokio::process::Command::new(&command[0]);
        cmd.args(&command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .current_dir(&program.dir)
            // dropping the wait future on timeout kills the process
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                outcome.fault = Some(Fault::system(format!("failed to spawn program: {e}")));
                return outcome;
            }
        };

        // Feed the input from a separate task. An input larger than the
        // pipe buffer blocks the writer until the program reads it, so
        // the write must not sit between spawn and the timed wait.
        let stdin = child.stdin.take();
        let mut input = test_case.input.clone();
        if !input.ends_with('\n') {
            input.push('\n');
        }
        let feeder = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(input.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        });

        let waited = timeout(
            Duration::from_millis(limits.time_limit_ms),
            child.wait_with_output(),
        )
        .await;
        // Killing the child closes the pipe and unblocks the writer
        feeder.abort();

        match waited {
            Ok(Ok(output)) => {
                outcome.time_ms = start.elapsed().as_millis() as u64;
                // External wall timer as a second opinion, matching the
                // sandboxed path
                if outcome.time_ms > limits.time_limit_ms {
                    outcome.fault = Some(Fault::timeout(format!(
                        "no result within {} ms",
                        limits.time_limit_ms
                    )));
                } else if output.status.success() {
                    let mut bytes = output.stdout;
                    if bytes.len() > limits.max_output_bytes {
                        bytes.truncate(limits.max_output_bytes);
                    }
                    let produced = String::from_utf8_lossy(&bytes).into_owned();
                    outcome.passed = outputs_match(&produced, &test_case.expected_output);
                    outcome.output = Some(produced);
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let message = if stderr.trim().is_empty() {
                        format!("process exited with code {:?}", output.status.code())
                    } else {
                        stderr.trim().to_string()
                    };
                    outcome.fault = Some(Fault::runtime(message));
                }
            }
            Ok(Err(e)) => {
                outcome.time_ms = start.elapsed().as_millis() as u64;
                outcome.fault = Some(Fault::system(format!("execution error: {e}")));
            }
            Err(_) => {
                outcome.time_ms = start.elapsed().as_millis() as u64;
                outcome.fault = Some(Fault::timeout(format!(
                    "no result within {} ms",
                    limits.time_limit_ms
                )));
            }
        }

        outcome
    }
}
