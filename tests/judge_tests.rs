use std::sync::Arc;

use pretty_assertions::assert_eq;

use duel_judge::config::LanguageConfig;
use duel_judge::judge::{
    BatchRunner, FaultKind, Limits, ProcessExecutor, TestCase, VerdictStatus, aggregate,
};

// Shell programs keep the executor tests runnable on any host
fn shell_language() -> LanguageConfig {
    LanguageConfig {
        name: "shell".to_string(),
        file_name: "main.sh".to_string(),
        run_command: vec!["sh".to_string(), "%INPUT%".to_string()],
        check_command: Some(vec![
            "sh".to_string(),
            "-n".to_string(),
            "%INPUT%".to_string(),
        ]),
        harness: None,
    }
}

fn limits(time_limit_ms: u64) -> Limits {
    Limits {
        time_limit_ms,
        max_output_bytes: 65536,
    }
}

fn case(id: i64, input: &str, expected: &str) -> TestCase {
    TestCase {
        id,
        input: input.to_string(),
        expected_output: expected.to_string(),
        is_sample: false,
    }
}

fn runner(id: u8, time_limit_ms: u64, max_concurrency: usize) -> BatchRunner {
    let executor = Arc::new(ProcessExecutor::build(id).unwrap());
    BatchRunner::new(executor, limits(time_limit_ms), max_concurrency)
}

#[tokio::test]
async fn test_passing_batch_is_accepted() {
    let runner = runner(101, 2000, 2);
    let code = "read x\necho $((x + 1))";
    let cases = vec![case(1, "1", "2"), case(2, "41", "42")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].test_case_id, 1);
    assert_eq!(outcomes[0].output.as_deref(), Some("2\n"));
    assert!(outcomes.iter().all(|o| o.passed));

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::Accepted);
    assert_eq!((verdict.passed, verdict.total), (2, 2));
    assert_eq!(verdict.error_message, None);
}

#[tokio::test]
async fn test_wrong_output_is_wrong_answer() {
    let runner = runner(102, 2000, 2);
    let code = "read x\necho 0";
    let cases = vec![case(1, "1", "2"), case(2, "0", "0")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    assert!(!outcomes[0].passed);
    assert!(outcomes[1].passed);

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::WrongAnswer);
    assert_eq!((verdict.passed, verdict.total), (1, 2));
}

#[tokio::test]
async fn test_nonzero_exit_is_runtime_error() {
    let runner = runner(103, 2000, 2);
    let code = "exit 3";
    let cases = vec![case(1, "", "")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    let fault = outcomes[0].fault.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::Runtime);

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::RuntimeError);
    assert!(verdict.error_message.is_some());
}

#[tokio::test]
async fn test_endless_program_is_force_stopped() {
    let runner = runner(104, 300, 2);
    let code = "sleep 30";
    let cases = vec![case(1, "", "")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    let fault = outcomes[0].fault.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::Timeout);
    // stopped within the limit plus bounded overhead, not after 30s
    assert!(outcomes[0].time_ms >= 300);
    assert!(outcomes[0].time_ms < 5000);

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::Timeout);
}

#[tokio::test]
async fn test_unread_oversized_input_is_still_force_stopped() {
    let runner = runner(109, 300, 2);
    // The input exceeds the pipe buffer and the program never reads it,
    // so the writer blocks; the wall-clock limit must still apply
    let code = "sleep 30";
    let input = "a".repeat(1 << 20);
    let cases = vec![case(1, &input, "")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    let fault = outcomes[0].fault.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::Timeout);
    assert!(outcomes[0].time_ms >= 300);
    assert!(outcomes[0].time_ms < 5000);
}

#[tokio::test]
async fn test_preparation_failure_short_circuits_batch() {
    let runner = runner(105, 2000, 2);
    // unparseable program: the syntax check fails before any case runs
    let code = "if [ ; then";
    let cases = vec![case(1, "1", "2"), case(2, "2", "3"), case(3, "3", "4")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    assert_eq!(outcomes.len(), 1);
    let fault = outcomes[0].fault.as_ref().unwrap();
    assert_eq!(fault.kind, FaultKind::System);

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::SystemError);
    assert!(verdict.error_message.is_some());
}

#[tokio::test]
async fn test_outcome_order_matches_input_order() {
    let runner = runner(106, 2000, 3);
    // the first case finishes last; order must still be the input order
    let code = "read x\nif [ \"$x\" = \"0\" ]; then sleep 0.4; fi\necho $x";
    let cases = vec![case(10, "0", "0"), case(11, "1", "1"), case(12, "2", "2")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    let ids: Vec<i64> = outcomes.iter().map(|o| o.test_case_id).collect();
    assert_eq!(ids, vec![10, 11, 12]);
    assert!(outcomes.iter().all(|o| o.passed));
}

#[tokio::test]
async fn test_one_failing_case_does_not_abort_the_batch() {
    let runner = runner(107, 2000, 1);
    let code = "read x\nif [ \"$x\" = \"1\" ]; then exit 9; fi\necho $x";
    let cases = vec![case(1, "1", "1"), case(2, "2", "2")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0].fault.as_ref().map(|f| f.kind),
        Some(FaultKind::Runtime)
    );
    assert!(outcomes[1].passed);

    let verdict = aggregate(outcomes);
    assert_eq!(verdict.status, VerdictStatus::RuntimeError);
    assert_eq!((verdict.passed, verdict.total), (1, 2));
}

#[tokio::test]
async fn test_output_is_truncated_at_the_ceiling() {
    let executor = Arc::new(ProcessExecutor::build(108).unwrap());
    let runner = BatchRunner::new(
        executor,
        Limits {
            time_limit_ms: 2000,
            max_output_bytes: 8,
        },
        1,
    );
    let code = "echo 0123456789abcdef";
    let cases = vec![case(1, "", "0123456789abcdef")];

    let outcomes = runner.run_batch(code, &shell_language(), &cases).await;
    assert_eq!(outcomes[0].output.as_deref(), Some("01234567"));
    assert!(!outcomes[0].passed);
}
