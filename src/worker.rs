use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{JudgeConfig, LanguageConfig};
use crate::coordinator::MatchCoordinator;
use crate::judge::{self, BatchRunner, Limits, Verdict, aggregate};
use crate::queue::{JudgeMessage, JudgeQueue, JudgeResponse};

pub async fn worker(
    id: u8,
    judge_config: JudgeConfig,
    languages: Arc<Vec<LanguageConfig>>,
    coordinator: Arc<MatchCoordinator>,
    queue: Arc<JudgeQueue>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let executor = judge::create_executor(id, judge_config.max_concurrency)?;
    let limits = Limits {
        time_limit_ms: judge_config.time_limit_ms,
        max_output_bytes: judge_config.max_output_bytes,
    };
    let runner = BatchRunner::new(executor, limits, judge_config.max_concurrency);
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            message = queue.pop() => {
                let JudgeMessage { request, responder } = message;

                let verdict = match languages.iter().find(|l| l.name == request.language) {
                    Some(language) => {
                        let outcomes = runner
                            .run_batch(&request.code, language, &request.test_cases)
                            .await;
                        aggregate(outcomes)
                    }
                    None => {
                        log::error!(
                            "Worker {id}: no configuration for language {}",
                            request.language
                        );
                        Verdict::system_error(format!(
                            "unsupported language: {}",
                            request.language
                        ))
                    }
                };

                let completion = match request.match_context {
                    Some(ctx) => {
                        Some(coordinator.resolve(ctx.match_id, ctx.participant_id, &verdict).await)
                    }
                    None => None,
                };

                log::info!(
                    "Worker {id} judged submission: {} ({}/{})",
                    verdict.status.as_str(),
                    verdict.passed,
                    verdict.total
                );

                if responder.send(JudgeResponse { verdict, completion }).is_err() {
                    log::warn!("Worker {id} failed to send judge response back to server");
                }
            }
        };
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}
