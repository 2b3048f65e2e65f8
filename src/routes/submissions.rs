use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use tokio::sync::oneshot;

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::config::LanguageConfig;
use crate::coordinator::{CompletionResult, MatchCoordinator};
use crate::database as db;
use crate::judge::{ExecutionOutcome, VerdictStatus};
use crate::queue::{JudgeMessage, JudgeQueue, JudgeRequest, JudgeResponse, MatchContext};

/// How many leading test cases stand in for samples when a question has
/// none flagged
const SAMPLE_FALLBACK: usize = 2;

#[derive(Serialize, Deserialize, Debug)]
pub struct SubmissionRequest {
    pub author_id: i64,
    pub question_id: i64,
    pub code: String,
    pub language: String,
    pub match_id: Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct SubmissionResult {
    pub submission_id: Option<i64>,
    pub status: VerdictStatus,
    pub passed: usize,
    pub total: usize,
    pub average_time_ms: u64,
    pub error_message: Option<String>,
    pub outcomes: Vec<ExecutionOutcome>,
    pub match_result: Option<CompletionResult>,
}

/// Runs code against sample test cases only; nothing is persisted.
#[post("/submissions/run")]
pub async fn run_handler(
    pool: web::Data<SqlitePool>,
    queue: web::Data<JudgeQueue>,
    languages: web::Data<Vec<LanguageConfig>>,
    body: web::Json<SubmissionRequest>,
) -> impl Responder {
    let test_cases = match load_test_cases(&body, &pool, &languages).await {
        Ok(cases) => cases,
        Err(response) => return response,
    };

    // No explicitly marked samples: fall back to the first few cases
    let samples: Vec<_> = {
        let flagged: Vec<_> = test_cases.iter().filter(|c| c.is_sample).cloned().collect();
        if flagged.is_empty() {
            test_cases.into_iter().take(SAMPLE_FALLBACK).collect()
        } else {
            flagged
        }
    };

    let request = JudgeRequest {
        code: body.code.clone(),
        language: body.language.clone(),
        test_cases: samples,
        match_context: None,
    };

    match judge_via_queue(&queue, request).await {
        Ok(response) => {
            HttpResponse::Ok().json(submission_result(None, response))
        }
        Err(response) => response,
    }
}

/// Judges code against all test cases, persists the submission, and
/// resolves the attached match, if any.
#[post("/submissions/submit")]
pub async fn submit_handler(
    pool: web::Data<SqlitePool>,
    queue: web::Data<JudgeQueue>,
    languages: web::Data<Vec<LanguageConfig>>,
    coordinator: web::Data<MatchCoordinator>,
    body: web::Json<SubmissionRequest>,
) -> impl Responder {
    let test_cases = match load_test_cases(&body, &pool, &languages).await {
        Ok(cases) => cases,
        Err(response) => return response,
    };

    let match_context = match body.match_id {
        Some(match_id) => {
            let record = match db::fetch_match(match_id, &pool).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    return HttpResponse::NotFound().json(ErrorResponse {
                        reason: "ERR_NOT_FOUND",
                        code: 3,
                    });
                }
                Err(e) => {
                    log::error!("Failed to fetch match {match_id}: {e}");
                    return HttpResponse::InternalServerError().json(ErrorResponse {
                        reason: "ERR_EXTERNAL",
                        code: 5,
                    });
                }
            };

            if body.author_id != record.player_one && body.author_id != record.player_two {
                return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                    reason: "ERR_INVALID_ARGUMENT",
                    code: 1,
                    message: "submitter is not a participant of this match".to_string(),
                });
            }

            coordinator.register(&record);
            Some(MatchContext {
                match_id,
                participant_id: body.author_id,
            })
        }
        None => None,
    };

    let request = JudgeRequest {
        code: body.code.clone(),
        language: body.language.clone(),
        test_cases,
        match_context,
    };

    let response = match judge_via_queue(&queue, request).await {
        Ok(response) => response,
        Err(response) => return response,
    };

    let submission_id = match db::insert_submission(
        &db::NewSubmission {
            author_id: body.author_id,
            question_id: body.question_id,
            source_code: &body.code,
            language: &body.language,
            kind: "scored",
            match_id: body.match_id,
            verdict: &response.verdict,
        },
        &pool,
    )
    .await
    {
        Ok(id) => {
            log::info!("Inserted submission {id} into database");
            Some(id)
        }
        Err(e) => {
            log::error!("Failed to insert submission into database: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    // The in-memory transition already committed; persistence failures
    // are operator-visible but never undo the verdict
    if let (Some(match_id), Some(CompletionResult::MatchCompleted { winner_id })) =
        (body.match_id, response.completion)
    {
        match db::complete_match(match_id, winner_id, &pool).await {
            Ok(true) => {
                log::info!("Match {match_id} completed, winner {winner_id}");
                coordinator.forget(match_id);
            }
            Ok(false) => {
                log::warn!("Match {match_id} was already persisted as completed");
                coordinator.forget(match_id);
            }
            // The entry stays in memory: the stored row still says
            // active, and evicting now would let the match be won again
            Err(e) => log::error!("Failed to persist completion of match {match_id}: {e}"),
        }
    }

    HttpResponse::Ok().json(submission_result(submission_id, response))
}

/// Validates the request against config and storage and loads the
/// question's test cases in order.
async fn load_test_cases(
    body: &SubmissionRequest,
    pool: &SqlitePool,
    languages: &[LanguageConfig],
) -> Result<Vec<crate::judge::TestCase>, HttpResponse> {
    if !languages.iter().any(|l| l.name == body.language) {
        return Err(HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        }));
    }

    match db::question_exists(body.question_id, pool).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            }));
        }
        Err(e) => {
            log::error!("Failed to check question existence: {e}");
            return Err(HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            }));
        }
    }

    let test_cases = match db::fetch_test_cases(body.question_id, pool).await {
        Ok(cases) => cases,
        Err(e) => {
            log::error!("Failed to fetch test cases: {e}");
            return Err(HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            }));
        }
    };

    if test_cases.is_empty() {
        return Err(HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: "no test cases available for this question".to_string(),
        }));
    }

    Ok(test_cases)
}

/// Sends one request through the judge queue and waits for its verdict
async fn judge_via_queue(
    queue: &JudgeQueue,
    request: JudgeRequest,
) -> Result<JudgeResponse, HttpResponse> {
    let (tx, rx) = oneshot::channel::<JudgeResponse>();
    queue
        .push(JudgeMessage {
            request,
            responder: tx,
        })
        .await;
    log::debug!("Sent judging request to queue");

    match rx.await {
        Ok(response) => Ok(response),
        Err(e) => {
            log::error!("Failed to receive judge response: {e}");
            Err(HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            }))
        }
    }
}

fn submission_result(submission_id: Option<i64>, response: JudgeResponse) -> SubmissionResult {
    let verdict = response.verdict;
    SubmissionResult {
        submission_id,
        status: verdict.status,
        passed: verdict.passed,
        total: verdict.total,
        average_time_ms: verdict.average_time_ms,
        error_message: verdict.error_message,
        outcomes: verdict.outcomes,
        match_result: response.completion,
    }
}
