use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Local;
use parking_lot::Mutex;
use tokio::time::timeout;

use crate::config::LanguageConfig;

use super::executor::{
    Executor, PrepareError, PreparedProgram, outputs_match, render_command, render_source,
};
use super::{ExecutionOutcome, Fault, Limits, TestCase};

// Sandbox configuration constants
const PREPARE_WALL_TIME: f64 = 30.0; // seconds
const PREPARE_MEMORY_LIMIT: u32 = 262144; // KB
const PREPARE_PROCESSES: u32 = 10;
const PREPARE_OPEN_FILES: u32 = 512;
const PREPARE_FILE_SIZE: u32 = 65536; // KB

const RUNTIME_MEMORY_LIMIT: u32 = 262144; // KB
const RUNTIME_PROCESSES: u32 = 4;
const RUNTIME_OPEN_FILES: u32 = 30;

// Grace added on top of the wall-clock limit before the external timer
// gives up on isolate itself
const EXTERNAL_TIMER_GRACE_MS: u64 = 1000;

// Each executor instance owns a contiguous range of isolate box ids
const BOXES_PER_EXECUTOR: u32 = 16;

const CACHE_DIR_PERMISSIONS: u32 = 0o700;

static PROGRAM_SEQ: AtomicU64 = AtomicU64::new(0);

/// An executor that compiles and runs code safely using isolate
///
/// The IsolateExecutor provides an isolated environment where candidate
/// code executes with resource limits and no ambient filesystem or
/// network access, using Linux isolate. Every execution gets a freshly
/// initialized box; a pool of box ids allows concurrent test cases
/// without sharing a box.
pub struct IsolateExecutor {
    /// Unique identifier for this executor instance
    id: u8,
    /// Path to the cache directory for prepared programs and meta files
    cache_dir: PathBuf,
    /// Pool of isolate box ids available for execution
    boxes: Mutex<Vec<u32>>,
}

impl IsolateExecutor {
    pub fn build(id: u8, slots: usize) -> Result<Self> {
        if slots == 0 || slots as u32 > BOXES_PER_EXECUTOR {
            bail!("executor slots must be between 1 and {BOXES_PER_EXECUTOR}");
        }

        let cache_dir = Self::setup_cache_directory(id)?;
        let base = id as u32 * BOXES_PER_EXECUTOR;
        let boxes: Vec<u32> = (base..base + slots as u32).collect();

        log::info!("IsolateExecutor {id} initialized with {slots} boxes");
        Ok(Self {
            id,
            cache_dir,
            boxes: Mutex::new(boxes),
        })
    }

    /// Sets up the cache directory for this executor
    fn setup_cache_directory(id: u8) -> Result<PathBuf> {
        use directories::ProjectDirs;

        let proj_dirs = ProjectDirs::from("", "", "duel-judge")
            .ok_or_else(|| anyhow!("Unable to find user directory"))?;

        let cache_base_dir = proj_dirs.cache_dir();
        fs::create_dir_all(cache_base_dir)?;
        fs::set_permissions(
            cache_base_dir,
            fs::Permissions::from_mode(CACHE_DIR_PERMISSIONS),
        )?;

        let cache_dir = cache_base_dir.join(id.to_string());
        fs::create_dir_all(&cache_dir)?;

        Ok(cache_dir)
    }

    /// Creates a fresh directory for one prepared program
    fn create_program_dir(&self) -> Result<PathBuf> {
        let seq = PROGRAM_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = self
            .cache_dir
            .join(format!("{}-{seq}", Local::now().format("%y%m%d-%H-%M-%S")));
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn checkout_box(&self) -> Option<u32> {
        self.boxes.lock().pop()
    }

    fn return_box(&self, box_id: u32) {
        self.boxes.lock().push(box_id);
    }

    /// Initializes one isolate box and returns its directory
    fn init_box(box_id: u32) -> Result<PathBuf> {
        let output = Command::new("isolate")
            .arg("-b")
            .arg(box_id.to_string())
            .arg("--cg")
            .arg("--init")
            .output()
            .map_err(|e| anyhow!("Failed to spawn isolate --init: {}", e))?;

        if !output.status.success() {
            bail!("isolate --init exited with non-zero status");
        }

        let root_dir_absolute = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root_dir_absolute.is_empty() {
            bail!(
                "isolate --init produced empty stdout; stderr={}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(PathBuf::from(root_dir_absolute).join("box"))
    }

    fn cleanup_box(box_id: u32) {
        let out = Command::new("isolate")
            .arg("-b")
            .arg(box_id.to_string())
            .arg("--cg")
            .arg("--cleanup")
            .output();

        if !out.is_ok_and(|c| c.status.success()) {
            log::error!("Failed to clean up isolate box {box_id}");
        }
    }

    /// Copies the prepared program's files into a box
    fn populate_box(program_dir: &Path, box_dir: &Path) -> Result<()> {
        for entry in fs::read_dir(program_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".meta") {
                continue;
            }
            fs::copy(entry.path(), box_dir.join(name))?;
        }
        Ok(())
    }

    /// Runs the language's check command inside a freshly initialized box
    async fn run_check_in_box(
        &self,
        box_id: u32,
        program_dir: &Path,
        command: &[String],
    ) -> Result<(), PrepareError> {
        let box_dir = Self::init_box(box_id)
            .map_err(|e| PrepareError::new(format!("failed to initialize sandbox: {e}")))?;
        Self::populate_box(program_dir, &box_dir)
            .map_err(|e| PrepareError::new(format!("failed to populate sandbox: {e}")))?;

        let meta_path = program_dir.join("check.meta");
        let stdout_name = "check_stdout.txt";

        let box_arg = box_id.to_string();
        let processes_arg = format!("--processes={PREPARE_PROCESSES}");
        let open_files_arg = format!("--open-files={PREPARE_OPEN_FILES}");
        let fsize_arg = format!("--fsize={PREPARE_FILE_SIZE}");
        let wall_time_arg = format!("--wall-time={PREPARE_WALL_TIME}");
        let memory_arg = format!("--cg-mem={PREPARE_MEMORY_LIMIT}");
        let meta_arg = meta_path.to_string_lossy().into_owned();

        let mut cmd = tokio::process::Command::new("isolate");
        cmd.args([
            "-b",
            &box_arg,
            "--cg",
            "--run",
            &processes_arg,
            &open_files_arg,
            &fsize_arg,
            &wall_time_arg,
            &memory_arg,
            "-E",
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
            "-M",
            &meta_arg,
            "--silent",
            "--stderr-to-stdout",
            "-o",
            stdout_name,
            "--",
        ])
        .args(command)
        .kill_on_drop(true);

        let run = async {
            let status = cmd
                .status()
                .await
                .map_err(|e| PrepareError::new(format!("failed to spawn isolate: {e}")))?;
            Ok::<_, PrepareError>(status)
        };
        let result = timeout(Duration::from_secs(PREPARE_WALL_TIME as u64 + 5), run).await;

        let check_output = fs::read_to_string(box_dir.join(stdout_name)).unwrap_or_default();
        Self::cleanup_box(box_id);

        let status = match result {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(PrepareError::new("program preparation timed out")),
        };

        if status.success() {
            Ok(())
        } else {
            let detail = check_output.trim();
            let message = if detail.is_empty() {
                "program preparation check failed".to_string()
            } else {
                format!("program preparation check failed: {detail}")
            };
            Err(PrepareError::new(message))
        }
    }

    /// Runs the prepared program against one test case inside a box
    async fn run_in_box(
        &self,
        box_id: u32,
        program: &PreparedProgram,
        test_case: &TestCase,
        limits: &Limits,
    ) -> Result<ExecutionOutcome> {
        let box_dir = Self::init_box(box_id)?;
        Self::populate_box(&program.dir, &box_dir)?;

        let stdin_name = "case.in";
        let stdout_name = "case.out";
        let mut input = test_case.input.clone();
        if !input.ends_with('\n') {
            input.push('\n');
        }
        fs::write(box_dir.join(stdin_name), input)?;

        let meta_path = program.dir.join(format!("{box_id}-{}.meta", test_case.id));

        let box_arg = box_id.to_string();
        let wall_time_arg = format!("{:.4}", limits.time_limit_ms as f64 / 1000.0 + 0.5);
        let memory_arg = format!("--cg-mem={RUNTIME_MEMORY_LIMIT}");
        let stack_arg = format!("--stack={}", RUNTIME_MEMORY_LIMIT / 2);
        let processes_arg = format!("--processes={RUNTIME_PROCESSES}");
        let open_files_arg = format!("--open-files={RUNTIME_OPEN_FILES}");
        let fsize_arg = format!("--fsize={}", (limits.max_output_bytes as u32 / 1024).max(1));
        let meta_arg = meta_path.to_string_lossy().into_owned();

        let mut cmd = tokio::process::Command::new("isolate");
        cmd.args([
            "-b",
            &box_arg,
            "--cg",
            "--run",
            "-w",
            &wall_time_arg,
            &memory_arg,
            &stack_arg,
            &processes_arg,
            &open_files_arg,
            &fsize_arg,
            "-E",
            "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
            "-M",
            &meta_arg,
            "-i",
            stdin_name,
            "-o",
            stdout_name,
            "--stderr-to-stdout",
            "--silent",
            "--",
        ])
        .args(&program.run_command)
        .kill_on_drop(true);

        let mut outcome = ExecutionOutcome {
            test_case_id: test_case.id,
            output: None,
            passed: false,
            time_ms: 0,
            fault: None,
        };

        let start = Instant::now();
        let ran = timeout(
            Duration::from_millis(limits.time_limit_ms + EXTERNAL_TIMER_GRACE_MS),
            cmd.status(),
        )
        .await;
        let elapsed = start.elapsed();

        match ran {
            Ok(Ok(_)) => {
                if let Ok(meta_content) = fs::read_to_string(&meta_path) {
                    process_meta_content(&meta_content, &mut outcome);
                } else {
                    outcome.fault = Some(Fault::system("failed to read meta file"));
                }
            }
            Ok(Err(e)) => {
                outcome.fault = Some(Fault::system(format!("failed to spawn isolate: {e}")));
            }
            Err(_) => {
                // isolate itself never came back; the dropped future
                // killed it, the box cleanup below reaps the program
                outcome.fault = Some(Fault::timeout(format!(
                    "no result within {} ms",
                    limits.time_limit_ms
                )));
            }
        }

        // External wall timer as a second opinion on isolate's own limit
        if outcome.fault.is_none() && elapsed.as_millis() as u64 > limits.time_limit_ms {
            outcome.time_ms = elapsed.as_millis() as u64;
            outcome.fault = Some(Fault::timeout(format!(
                "no result within {} ms",
                limits.time_limit_ms
            )));
        }

        if outcome.fault.is_none() {
            match fs::read(box_dir.join(stdout_name)) {
                Ok(mut bytes) => {
                    if bytes.len() > limits.max_output_bytes {
                        bytes.truncate(limits.max_output_bytes);
                    }
                    let produced = String::from_utf8_lossy(&bytes).into_owned();
                    outcome.passed = outputs_match(&produced, &test_case.expected_output);
                    outcome.output = Some(produced);
                }
                Err(e) => {
                    log::error!("Failed to read output file: {e}");
                    outcome.fault = Some(Fault::system("failed to read output file"));
                }
            }
        }

        Self::cleanup_box(box_id);
        Ok(outcome)
    }
}

#[async_trait]
impl Executor for IsolateExecutor {
    async fn prepare(
        &self,
        code: &str,
        language: &LanguageConfig,
    ) -> Result<PreparedProgram, PrepareError> {
        let dir = self
            .create_program_dir()
            .map_err(|e| PrepareError::new(format!("failed to create program directory: {e}")))?;

        fs::write(dir.join(&language.file_name), render_source(code, language))
            .map_err(|e| PrepareError::new(format!("failed to write source file: {e}")))?;

        // Inside the box the program lives at the box root, so commands
        // reference the bare file name.
        if let Some(check) = &language.check_command {
            let Some(box_id) = self.checkout_box() else {
                return Err(PrepareError::new("no execution slot available"));
            };
            let result = self
                .run_check_in_box(box_id, &dir, &render_command(check, &language.file_name))
                .await;
            self.return_box(box_id);
            result?;
        }

        log::debug!("IsolateExecutor {} prepared program in {dir:?}", self.id);
        Ok(PreparedProgram {
            dir,
            run_command: render_command(&language.run_command, &language.file_name),
        })
    }

    async fn execute(
        &self,
        program: &PreparedProgram,
        test_case: &TestCase,
        limits: &Limits,
    ) -> ExecutionOutcome {
        let Some(box_id) = self.checkout_box() else {
            return ExecutionOutcome::system_fault(test_case.id, "no execution slot available");
        };

        let result = self.run_in_box(box_id, program, test_case, limits).await;
        self.return_box(box_id);

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Sandboxed execution failed: {e}");
                ExecutionOutcome::system_fault(test_case.id, format!("sandbox failure: {e}"))
            }
        }
    }
}

impl Drop for IsolateExecutor {
    fn drop(&mut self) {
        for box_id in self.boxes.lock().iter() {
            Self::cleanup_box(*box_id);
        }
        log::info!("IsolateExecutor {} cleaned up", self.id);
    }
}

/// Processes the isolate meta file content and updates the outcome
fn process_meta_content(meta_content: &str, outcome: &mut ExecutionOutcome) {
    let mut message: Option<String> = None;
    let mut exit_fault = false;

    for line in meta_content.lines() {
        if let Some((key, value)) = line.split_once(':') {
            match key {
                "killed" => {
                    // killed:1
                    outcome.fault = Some(Fault::timeout("wall-clock limit exceeded"));
                }
                "cg-oom-killed" => {
                    // cg-oom-killed:1
                    outcome.fault = Some(Fault::runtime("memory limit exceeded"));
                }
                "exitcode" => {
                    if value != "0" && outcome.fault.is_none() {
                        exit_fault = true;
                        outcome.fault =
                            Some(Fault::runtime(format!("process exited with code {value}")));
                    }
                }
                "message" => {
                    message = Some(value.to_string());
                }
                "time-wall" => {
                    if let Ok(secs) = value.parse::<f64>() {
                        outcome.time_ms = (secs * 1000.0) as u64;
                    }
                }
                _ => {}
            }
        }
    }

    // isolate's own message is more precise than the exit code alone
    if exit_fault
        && let Some(message) = message
    {
        outcome.fault = Some(Fault::runtime(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_outcome() -> ExecutionOutcome {
        ExecutionOutcome {
            test_case_id: 1,
            output: None,
            passed: false,
            time_ms: 0,
            fault: None,
        }
    }

    #[test]
    fn test_meta_kill_is_timeout() {
        let mut outcome = blank_outcome();
        process_meta_content("killed:1\ntime-wall:2.503\n", &mut outcome);
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.kind, crate::judge::FaultKind::Timeout);
        assert_eq!(outcome.time_ms, 2503);
    }

    #[test]
    fn test_meta_nonzero_exit_is_runtime_fault() {
        let mut outcome = blank_outcome();
        process_meta_content("exitcode:3\ntime-wall:0.012\n", &mut outcome);
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.kind, crate::judge::FaultKind::Runtime);
    }

    #[test]
    fn test_meta_clean_exit_is_no_fault() {
        let mut outcome = blank_outcome();
        process_meta_content("exitcode:0\ntime-wall:0.040\n", &mut outcome);
        assert!(outcome.fault.is_none());
        assert_eq!(outcome.time_ms, 40);
    }
}
