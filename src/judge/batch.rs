use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::LanguageConfig;

use super::executor::Executor;
use super::{ExecutionOutcome, Limits, TestCase};

/// Runs one candidate program against an ordered list of test cases
///
/// The program is prepared once; test cases then execute with bounded
/// concurrency, and outcomes come back in input order regardless of
/// completion order. One case's failure never aborts the batch.
pub struct BatchRunner {
    executor: Arc<dyn Executor>,
    limits: Limits,
    max_concurrency: usize,
}

impl BatchRunner {
    pub fn new(executor: Arc<dyn Executor>, limits: Limits, max_concurrency: usize) -> Self {
        Self {
            executor,
            limits,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub async fn run_batch(
        &self,
        code: &str,
        language: &LanguageConfig,
        test_cases: &[TestCase],
    ) -> Vec<ExecutionOutcome> {
        let program = match self.executor.prepare(code, language).await {
            Ok(program) => Arc::new(program),
            Err(e) => {
                // Preparation failure covers the whole batch with a
                // single synthetic outcome instead of running any case
                log::info!("Program preparation failed: {}", e.message);
                return vec![ExecutionOutcome::system_fault(0, e.message)];
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for (idx, test_case) in test_cases.iter().cloned().enumerate() {
            let executor = Arc::clone(&self.executor);
            let program = Arc::clone(&program);
            let semaphore = Arc::clone(&semaphore);
            let limits = self.limits;
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            idx,
                            ExecutionOutcome::system_fault(
                                test_case.id,
                                "execution slot unavailable",
                            ),
                        );
                    }
                };
                (idx, executor.execute(&program, &test_case, &limits).await)
            });
        }

        let mut slots: Vec<Option<ExecutionOutcome>> = vec![None; test_cases.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => slots[idx] = Some(outcome),
                Err(e) => log::error!("Test case task failed: {e}"),
            }
        }

        // A panicked task leaves a hole; fill it so the verdict still
        // covers every case
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    ExecutionOutcome::system_fault(test_cases[idx].id, "execution task failed")
                })
            })
            .collect()
    }
}
