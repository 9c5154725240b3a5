use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates exams, sections, questions, sessions, attempt logs, completions, and indexes.
#[allow(clippy::too_many_lines)]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS exams (
                    id INTEGER PRIMARY KEY,
                    title TEXT NOT NULL,
                    overall_time_limit_seconds INTEGER CHECK (overall_time_limit_seconds > 0),
                    allow_continue_after_time_up INTEGER NOT NULL DEFAULT 0
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS exam_sections (
                    id INTEGER PRIMARY KEY,
                    exam_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    ordinal INTEGER NOT NULL CHECK (ordinal >= 0),
                    time_limit_seconds INTEGER CHECK (time_limit_seconds > 0),
                    FOREIGN KEY (exam_id) REFERENCES exams(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS questions (
                    id INTEGER PRIMARY KEY,
                    subtopic_id INTEGER,
                    section_id INTEGER,
                    position INTEGER NOT NULL DEFAULT 0,
                    question_type TEXT NOT NULL,
                    kind_json TEXT NOT NULL,
                    prompt TEXT NOT NULL,
                    media TEXT,
                    marks INTEGER NOT NULL DEFAULT 1 CHECK (marks >= 0),
                    key_json TEXT,
                    explanation TEXT,
                    FOREIGN KEY (section_id) REFERENCES exam_sections(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS assessment_sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL,
                    target_kind TEXT NOT NULL CHECK (target_kind IN ('subtopic', 'exam')),
                    target_id INTEGER NOT NULL,
                    context_id INTEGER,
                    created_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS question_attempts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    session_id INTEGER NOT NULL,
                    question_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    value_json TEXT NOT NULL,
                    correct INTEGER,
                    time_spent_seconds INTEGER NOT NULL CHECK (time_spent_seconds >= 0),
                    recorded_at TEXT NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES assessment_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_completions (
                    session_id INTEGER PRIMARY KEY,
                    user_id INTEGER NOT NULL,
                    mode TEXT NOT NULL,
                    total INTEGER NOT NULL CHECK (total >= 0),
                    correct INTEGER NOT NULL CHECK (correct >= 0),
                    wrong INTEGER NOT NULL CHECK (wrong >= 0),
                    skipped INTEGER NOT NULL CHECK (skipped >= 0),
                    pending INTEGER NOT NULL CHECK (pending >= 0),
                    score INTEGER,
                    elapsed_seconds INTEGER NOT NULL CHECK (elapsed_seconds >= 0),
                    late INTEGER NOT NULL DEFAULT 0,
                    reason TEXT NOT NULL,
                    answers_json TEXT NOT NULL,
                    completed_at TEXT NOT NULL,
                    FOREIGN KEY (session_id) REFERENCES assessment_sessions(id) ON DELETE CASCADE
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_subtopic
                    ON questions(subtopic_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_questions_section_position
                    ON questions(section_id, position, id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_question_attempts_session
                    ON question_attempts (session_id, question_id);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
