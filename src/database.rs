use std::fs;
use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};

use crate::config::QuestionConfig;
use crate::coordinator::{MatchRecord, MatchStatus};
use crate::judge::{TestCase, Verdict};

const DATABASE_NAME: &str = "duel-judge.sqlite3";

pub fn get_db_path() -> PathBuf {
    use directories::ProjectDirs;

    let proj_dirs = ProjectDirs::from("", "", "duel-judge").expect("Unable to find user directory");
    let data_dir = proj_dirs.data_local_dir();

    fs::create_dir_all(data_dir).expect("Failed to create local data dir");

    data_dir.join(DATABASE_NAME)
}

pub async fn init_db(db_path: impl AsRef<Path>) -> sqlx::Result<SqlitePool> {
    let db_url = format!("sqlite://{}?mode=rwc", db_path.as_ref().display()); // rwc = read/write/create
    let db_pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect(&db_url)
        .await?;

    // PRAGMA statements cannot run inside a transaction
    for pragma_sql in &[
        "PRAGMA foreign_keys = ON;",
        "PRAGMA busy_timeout = 2000;", // 2 seconds timeout for lock contention
        "PRAGMA journal_mode = WAL;",  // Write-Ahead Logging for better concurrency
        "PRAGMA synchronous = NORMAL;",
    ] {
        sqlx::query(pragma_sql).execute(&db_pool).await?;
    }

    let mut tx = db_pool.begin().await?;

    for sql in &[
        r"
        CREATE TABLE IF NOT EXISTS questions (
            id            INTEGER PRIMARY KEY,
            title         TEXT    NOT NULL,
            description   TEXT    NOT NULL DEFAULT ''
        );",
        r"
        CREATE TABLE IF NOT EXISTS test_cases (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            question_id     INTEGER NOT NULL,
            case_index      INTEGER NOT NULL,
            input           TEXT    NOT NULL,
            expected_output TEXT    NOT NULL,
            is_sample       INTEGER NOT NULL DEFAULT 0,
            UNIQUE (question_id, case_index),
            FOREIGN KEY (question_id) REFERENCES questions (id)
        );",
        r"
        CREATE TABLE IF NOT EXISTS matches (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            player_one      INTEGER NOT NULL,
            player_two      INTEGER NOT NULL,
            status          TEXT    NOT NULL DEFAULT 'active',
            winner_id       INTEGER,
            completed_time  TEXT
        );",
        r"
        CREATE TABLE IF NOT EXISTS submissions (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            created_time    TEXT    NOT NULL,
            author_id       INTEGER NOT NULL,
            question_id     INTEGER NOT NULL,
            source_code     TEXT    NOT NULL,
            language        TEXT    NOT NULL,
            kind            TEXT    NOT NULL,
            match_id        INTEGER,
            status          TEXT    NOT NULL,
            passed          INTEGER NOT NULL,
            total           INTEGER NOT NULL,
            average_time_ms INTEGER NOT NULL,
            error_message   TEXT,
            FOREIGN KEY (question_id) REFERENCES questions (id),
            FOREIGN KEY (match_id)    REFERENCES matches (id)
        );",
        "CREATE INDEX IF NOT EXISTS idx_submissions_created_time ON submissions(created_time);",
        "CREATE INDEX IF NOT EXISTS idx_submissions_match ON submissions(match_id);",
    ] {
        sqlx::query(sql).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;

    log::info!("Initialized database at {}", db_path.as_ref().display());

    Ok(db_pool)
}

pub fn remove_db(db_path: impl AsRef<Path>) {
    // WAL and SHM files might not exist; ignore errors
    let wal_path = format!("{}-wal", db_path.as_ref().display());
    let shm_path = format!("{}-shm", db_path.as_ref().display());
    let _ = fs::remove_file(wal_path);
    let _ = fs::remove_file(shm_path);

    if let Err(e) = std::fs::remove_file(&db_path) {
        log::warn!(
            "Unable to remove database at {}: {e}",
            db_path.as_ref().display()
        );
    } else {
        log::info!("Removed database at {}", db_path.as_ref().display());
    }
}

/// Inserts the configured questions and their test cases
///
/// Existing questions keep their rows; seeding is idempotent across
/// restarts.
pub async fn seed_questions(questions: &[QuestionConfig], pool: &SqlitePool) -> sqlx::Result<()> {
    let mut tx: Transaction<'_, Sqlite> = pool.begin().await?;

    for question in questions {
        sqlx::query("INSERT OR IGNORE INTO questions (id, title, description) VALUES (?, ?, ?)")
            .bind(question.id)
            .bind(&question.title)
            .bind(&question.description)
            .execute(tx.as_mut())
            .await?;

        for (idx, case) in question.cases.iter().enumerate() {
            sqlx::query(
                "INSERT OR IGNORE INTO test_cases
                 (question_id, case_index, input, expected_output, is_sample)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(question.id)
            .bind(idx as i64)
            .bind(&case.input)
            .bind(&case.expected_output)
            .bind(case.is_sample)
            .execute(tx.as_mut())
            .await?;
        }
    }

    tx.commit().await?;
    log::info!("Seeded {} questions", questions.len());
    Ok(())
}

pub async fn question_exists(question_id: i64, pool: &SqlitePool) -> sqlx::Result<bool> {
    let row = sqlx::query("SELECT 1 FROM questions WHERE id = ?")
        .bind(question_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Fetches a question's test cases in their defined order
pub async fn fetch_test_cases(question_id: i64, pool: &SqlitePool) -> sqlx::Result<Vec<TestCase>> {
    let rows = sqlx::query(
        "SELECT id, input, expected_output, is_sample
         FROM test_cases WHERE question_id = ? ORDER BY case_index",
    )
    .bind(question_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| TestCase {
            id: row.get("id"),
            input: row.get("input"),
            expected_output: row.get("expected_output"),
            is_sample: row.get("is_sample"),
        })
        .collect())
}

/// A judged submission ready to be persisted
#[derive(Debug)]
pub struct NewSubmission<'a> {
    pub author_id: i64,
    pub question_id: i64,
    pub source_code: &'a str,
    pub language: &'a str,
    pub kind: &'a str,
    pub match_id: Option<i64>,
    pub verdict: &'a Verdict,
}

pub async fn insert_submission(
    submission: &NewSubmission<'_>,
    pool: &SqlitePool,
) -> sqlx::Result<i64> {
    let verdict = submission.verdict;
    let result = sqlx::query(
        "INSERT INTO submissions
         (created_time, author_id, question_id, source_code, language, kind,
          match_id, status, passed, total, average_time_ms, error_message)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(crate::create_timestamp())
    .bind(submission.author_id)
    .bind(submission.question_id)
    .bind(submission.source_code)
    .bind(submission.language)
    .bind(submission.kind)
    .bind(submission.match_id)
    .bind(verdict.status.as_str())
    .bind(verdict.passed as i64)
    .bind(verdict.total as i64)
    .bind(verdict.average_time_ms as i64)
    .bind(&verdict.error_message)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn create_match(
    player_one: i64,
    player_two: i64,
    pool: &SqlitePool,
) -> sqlx::Result<i64> {
    let result = sqlx::query("INSERT INTO matches (player_one, player_two, status) VALUES (?, ?, 'active')")
        .bind(player_one)
        .bind(player_two)
        .execute(pool)
        .await?;
    Ok(result.last_insert_rowid())
}

pub async fn fetch_match(match_id: i64, pool: &SqlitePool) -> sqlx::Result<Option<MatchRecord>> {
    let row = sqlx::query(
        "SELECT id, player_one, player_two, status, winner_id FROM matches WHERE id = ?",
    )
    .bind(match_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let status: String = row.get("status");
        MatchRecord {
            id: row.get("id"),
            player_one: row.get("player_one"),
            player_two: row.get("player_two"),
            // unknown strings count as completed so a corrupt row can
            // never be won again
            status: MatchStatus::parse(&status).unwrap_or(MatchStatus::Completed),
            winner_id: row.get("winner_id"),
        }
    }))
}

/// Persists a match completion, guarded so the winner is written once
///
/// The WHERE clause re-checks the status, mirroring the coordinator's
/// compare-and-commit; returns whether this call performed the update.
pub async fn complete_match(
    match_id: i64,
    winner_id: i64,
    pool: &SqlitePool,
) -> sqlx::Result<bool> {
    let result = sqlx::query(
        "UPDATE matches SET status = 'completed', winner_id = ?, completed_time = ?
         WHERE id = ? AND status = 'active'",
    )
    .bind(winner_id)
    .bind(crate::create_timestamp())
    .bind(match_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
