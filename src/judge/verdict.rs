use serde::Serialize;

use super::{ExecutionOutcome, FaultKind};

/// Final status of one judged submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Accepted,
    WrongAnswer,
    RuntimeError,
    Timeout,
    SystemError,
}

impl VerdictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::WrongAnswer => "wrong_answer",
            Self::RuntimeError => "runtime_error",
            Self::Timeout => "timeout",
            Self::SystemError => "system_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "wrong_answer" => Some(Self::WrongAnswer),
            "runtime_error" => Some(Self::RuntimeError),
            "timeout" => Some(Self::Timeout),
            "system_error" => Some(Self::SystemError),
            _ => None,
        }
    }
}

impl From<FaultKind> for VerdictStatus {
    fn from(kind: FaultKind) -> Self {
        match kind {
            FaultKind::Timeout => Self::Timeout,
            FaultKind::Runtime => Self::RuntimeError,
            FaultKind::System => Self::SystemError,
        }
    }
}

/// Reduction of a batch of per-test outcomes into one submission verdict
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub passed: usize,
    pub total: usize,
    pub average_time_ms: u64,
    pub error_message: Option<String>,
    pub outcomes: Vec<ExecutionOutcome>,
}

impl Verdict {
    /// A verdict for submissions that never reached execution
    pub fn system_error(message: impl Into<String>) -> Self {
        Self {
            status: VerdictStatus::SystemError,
            passed: 0,
            total: 0,
            average_time_ms: 0,
            error_message: Some(message.into()),
            outcomes: Vec::new(),
        }
    }
}

/// Reduces per-test outcomes into a single verdict
///
/// Accepted iff every outcome passed; otherwise the classification of
/// the first outcome (in input order) carrying a fault, falling back to
/// wrong_answer when no outcome faulted. Pure and deterministic.
pub fn aggregate(outcomes: Vec<ExecutionOutcome>) -> Verdict {
    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let first_fault = outcomes.iter().find_map(|o| o.fault.as_ref());

    let status = if passed == total {
        VerdictStatus::Accepted
    } else if let Some(fault) = first_fault {
        fault.kind.into()
    } else {
        VerdictStatus::WrongAnswer
    };

    let average_time_ms = if total == 0 {
        // empty batches are a system_error condition upstream; keep the
        // defensive case well-defined
        0
    } else {
        outcomes.iter().map(|o| o.time_ms).sum::<u64>() / total as u64
    };

    let error_message = match status {
        VerdictStatus::Accepted | VerdictStatus::WrongAnswer => None,
        _ => first_fault.map(|f| f.message.clone()),
    };

    Verdict {
        status,
        passed,
        total,
        average_time_ms,
        error_message,
        outcomes,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::judge::Fault;

    fn passed(id: i64, time_ms: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            test_case_id: id,
            output: Some("ok".to_string()),
            passed: true,
            time_ms,
            fault: None,
        }
    }

    fn wrong(id: i64, time_ms: u64) -> ExecutionOutcome {
        ExecutionOutcome {
            test_case_id: id,
            output: Some("nope".to_string()),
            passed: false,
            time_ms,
            fault: None,
        }
    }

    fn faulted(id: i64, fault: Fault) -> ExecutionOutcome {
        ExecutionOutcome {
            test_case_id: id,
            output: None,
            passed: false,
            time_ms: 5,
            fault: Some(fault),
        }
    }

    #[test]
    fn test_all_passed_is_accepted() {
        let verdict = aggregate(vec![passed(1, 10), passed(2, 20), passed(3, 30)]);
        assert_eq!(verdict.status, VerdictStatus::Accepted);
        assert_eq!(verdict.passed, 3);
        assert_eq!(verdict.total, 3);
        assert_eq!(verdict.average_time_ms, 20);
        assert_eq!(verdict.error_message, None);
    }

    #[test]
    fn test_no_fault_failure_is_wrong_answer() {
        let verdict = aggregate(vec![passed(1, 10), wrong(2, 10)]);
        assert_eq!(verdict.status, VerdictStatus::WrongAnswer);
        assert_eq!(verdict.passed, 1);
        assert_eq!(verdict.error_message, None);
    }

    #[test]
    fn test_first_fault_in_input_order_decides_status() {
        // The wrong answer on case 1 does not outrank the later fault
        let verdict = aggregate(vec![
            wrong(1, 10),
            faulted(2, Fault::timeout("no result within 1000 ms")),
            faulted(3, Fault::runtime("exit 1")),
        ]);
        assert_eq!(verdict.status, VerdictStatus::Timeout);
        assert_eq!(
            verdict.error_message,
            Some("no result within 1000 ms".to_string())
        );
    }

    #[test]
    fn test_runtime_fault_maps_to_runtime_error() {
        let verdict = aggregate(vec![faulted(1, Fault::runtime("division by zero"))]);
        assert_eq!(verdict.status, VerdictStatus::RuntimeError);
        assert_eq!(verdict.error_message, Some("division by zero".to_string()));
    }

    #[test]
    fn test_average_time_is_truncated() {
        let verdict = aggregate(vec![passed(1, 10), passed(2, 15)]);
        assert_eq!(verdict.average_time_ms, 12);
    }

    #[test]
    fn test_empty_outcome_list_is_well_defined() {
        let verdict = aggregate(Vec::new());
        assert_eq!(verdict.total, 0);
        assert_eq!(verdict.average_time_ms, 0);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let outcomes = vec![
            passed(1, 10),
            wrong(2, 20),
            faulted(3, Fault::runtime("exit 1")),
        ];
        assert_eq!(aggregate(outcomes.clone()), aggregate(outcomes));
    }
}
