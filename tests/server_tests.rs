use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, test, web};
use serde_json::json;
use sqlx::sqlite::SqlitePool;
use tokio_util::sync::CancellationToken;

use duel_judge::config::{CaseConfig, JudgeConfig, LanguageConfig, QuestionConfig};
use duel_judge::coordinator::{MatchCoordinator, MatchStatus};
use duel_judge::database as db;
use duel_judge::events::BroadcastSink;
use duel_judge::queue::JudgeQueue;
use duel_judge::routes::{run_handler, submit_handler};
use duel_judge::worker::worker;

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

// Test guard that ensures database cleanup on drop
struct TestDbGuard {
    db_path: String,
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.db_path);
        let _ = fs::remove_file(format!("{}-wal", self.db_path));
        let _ = fs::remove_file(format!("{}-shm", self.db_path));
    }
}

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

fn increment_question() -> QuestionConfig {
    QuestionConfig {
        id: 1,
        title: "Increment".to_string(),
        description: "Read an integer and print it plus one.".to_string(),
        cases: vec![
            CaseConfig {
                input: "1".to_string(),
                expected_output: "2".to_string(),
                is_sample: true,
            },
            CaseConfig {
                input: "41".to_string(),
                expected_output: "42".to_string(),
                is_sample: false,
            },
            CaseConfig {
                input: "-1".to_string(),
                expected_output: "0".to_string(),
                is_sample: false,
            },
        ],
    }
}

const CORRECT_CODE: &str = "read x\necho $((x + 1))";
const WRONG_CODE: &str = "read x\necho 0";

struct TestContext {
    pool: Arc<SqlitePool>,
    languages: Arc<Vec<LanguageConfig>>,
    queue: Arc<JudgeQueue>,
    coordinator: Arc<MatchCoordinator>,
    token: CancellationToken,
    _guard: TestDbGuard,
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn setup() -> TestContext {
    // keep judging runnable on hosts that happen to carry isolate
    unsafe { std::env::set_var("NO_ISOLATE", "1") };

    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = format!("data/test_duel_judge_{test_id}.db");
    let _ = fs::remove_file(&db_path);

    let pool = db::init_db(&db_path).await.unwrap();
    db::seed_questions(&[increment_question()], &pool)
        .await
        .unwrap();

    let pool = Arc::new(pool);
    let languages = Arc::new(vec![shell_language()]);
    let queue = Arc::new(JudgeQueue::new());
    let coordinator = Arc::new(MatchCoordinator::new(Arc::new(BroadcastSink::new(16))));
    let token = CancellationToken::new();

    let judge_config = JudgeConfig {
        workers: 1,
        time_limit_ms: 2000,
        max_output_bytes: 65536,
        max_concurrency: 2,
    };
    tokio::spawn(worker(
        1,
        judge_config,
        languages.clone(),
        coordinator.clone(),
        queue.clone(),
        token.clone(),
    ));

    TestContext {
        pool,
        languages,
        queue,
        coordinator,
        token,
        _guard: TestDbGuard { db_path },
    }
}

macro_rules! test_app {
    ($ctx:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::from($ctx.pool.clone()))
                .app_data(web::Data::from($ctx.languages.clone()))
                .app_data(web::Data::from($ctx.queue.clone()))
                .app_data(web::Data::from($ctx.coordinator.clone()))
                .service(run_handler)
                .service(submit_handler),
        )
        .await
    };
}

#[actix_web::test]
async fn test_run_judges_sample_cases_only() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/run")
        .set_json(json!({
            "author_id": 10,
            "question_id": 1,
            "code": CORRECT_CODE,
            "language": "shell",
            "match_id": null,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "accepted");
    // only the flagged sample case runs on /run
    assert_eq!(body["total"], 1);
    assert_eq!(body["passed"], 1);
    assert_eq!(body["submission_id"], serde_json::Value::Null);
    assert_eq!(body["match_result"], serde_json::Value::Null);
}

#[actix_web::test]
async fn test_submit_judges_all_cases_and_persists() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/submit")
        .set_json(json!({
            "author_id": 10,
            "question_id": 1,
            "code": WRONG_CODE,
            "language": "shell",
            "match_id": null,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "wrong_answer");
    assert_eq!(body["total"], 3);
    assert!(body["submission_id"].as_i64().is_some());
    assert_eq!(body["match_result"], serde_json::Value::Null);
}

#[actix_web::test]
async fn test_first_accepted_submission_wins_the_match() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let match_id = db::create_match(10, 20, &ctx.pool).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/submissions/submit")
        .set_json(json!({
            "author_id": 10,
            "question_id": 1,
            "code": CORRECT_CODE,
            "language": "shell",
            "match_id": match_id,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "accepted");
    assert_eq!(body["match_result"]["kind"], "match_completed");
    assert_eq!(body["match_result"]["winner_id"], 10);

    let record = db::fetch_match(match_id, &ctx.pool).await.unwrap().unwrap();
    assert_eq!(record.status, MatchStatus::Completed);
    assert_eq!(record.winner_id, Some(10));

    // persisting the completion evicts the in-memory match state
    assert_eq!(ctx.coordinator.snapshot(match_id), None);

    // the opponent's later accepted submission cannot win anymore
    let req = test::TestRequest::post()
        .uri("/submissions/submit")
        .set_json(json!({
            "author_id": 20,
            "question_id": 1,
            "code": CORRECT_CODE,
            "language": "shell",
            "match_id": match_id,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "accepted");
    assert_eq!(body["match_result"]["kind"], "acknowledged");

    let record = db::fetch_match(match_id, &ctx.pool).await.unwrap().unwrap();
    assert_eq!(record.winner_id, Some(10));
}

#[actix_web::test]
async fn test_failed_submission_leaves_the_match_open() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let match_id = db::create_match(10, 20, &ctx.pool).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/submissions/submit")
        .set_json(json!({
            "author_id": 20,
            "question_id": 1,
            "code": WRONG_CODE,
            "language": "shell",
            "match_id": match_id,
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "wrong_answer");
    assert_eq!(body["match_result"]["kind"], "acknowledged");

    let record = db::fetch_match(match_id, &ctx.pool).await.unwrap().unwrap();
    assert_eq!(record.status, MatchStatus::Active);
    assert_eq!(record.winner_id, None);
}

#[actix_web::test]
async fn test_unknown_language_is_rejected() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/run")
        .set_json(json!({
            "author_id": 10,
            "question_id": 1,
            "code": "print(1)",
            "language": "cobol",
            "match_id": null,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_unknown_question_is_rejected() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let req = test::TestRequest::post()
        .uri("/submissions/run")
        .set_json(json!({
            "author_id": 10,
            "question_id": 999,
            "code": CORRECT_CODE,
            "language": "shell",
            "match_id": null,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn test_non_participant_cannot_submit_into_a_match() {
    let ctx = setup().await;
    let app = test_app!(ctx);

    let match_id = db::create_match(10, 20, &ctx.pool).await.unwrap();

    let req = test::TestRequest::post()
        .uri("/submissions/submit")
        .set_json(json!({
            "author_id": 99,
            "question_id": 1,
            "code": CORRECT_CODE,
            "language": "shell",
            "match_id": match_id,
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}
