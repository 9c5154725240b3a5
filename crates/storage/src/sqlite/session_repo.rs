use std::collections::HashMap;

use chrono::Utc;
use exam_core::model::{SessionId, TargetRef, UserId};
use sqlx::Row;
use tracing::{debug, info};

use super::SqliteRepository;
use super::mapping::{
    conn, i64_to_u32, map_completion_row, parse_answer_key, reason_as_str, ser,
    session_id_from_i64, u64_to_i64,
};
use crate::repository::{
    AttemptRecord, CompletionReceipt, CompletionRequest, ScoringService, StorageError,
    grade_submission,
};

impl SqliteRepository {
    async fn stored_completion(
        &self,
        session_id: SessionId,
    ) -> Result<Option<CompletionReceipt>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT session_id, total, correct, wrong, skipped, pending, score, completed_at
            FROM session_completions
            WHERE session_id = ?1
            ",
        )
        .bind(u64_to_i64("session_id", session_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;
        row.as_ref().map(map_completion_row).transpose()
    }

    /// Number of attempt log rows stored for a session.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on query failure.
    pub async fn attempt_count(&self, session_id: SessionId) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM question_attempts WHERE session_id = ?1",
        )
        .bind(u64_to_i64("session_id", session_id.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;
        u64::try_from(count).map_err(ser)
    }
}

#[async_trait::async_trait]
impl ScoringService for SqliteRepository {
    async fn create_session(
        &self,
        user_id: UserId,
        target: TargetRef,
        context_id: Option<u64>,
    ) -> Result<SessionId, StorageError> {
        let target_kind = match target {
            TargetRef::Subtopic(_) => "subtopic",
            TargetRef::Exam(_) => "exam",
        };
        let res = sqlx::query(
            r"
            INSERT INTO assessment_sessions (user_id, target_kind, target_id, context_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(u64_to_i64("user_id", user_id.value())?)
        .bind(target_kind)
        .bind(u64_to_i64("target_id", target.id())?)
        .bind(context_id.map(|c| u64_to_i64("context_id", c)).transpose()?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        let id = session_id_from_i64(res.last_insert_rowid())?;
        debug!(session_id = %id, target_ref = %target, "session row created");
        Ok(id)
    }

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), StorageError> {
        let value_json = serde_json::to_string(&record.value).map_err(ser)?;
        sqlx::query(
            r"
            INSERT INTO question_attempts (session_id, question_id, user_id, value_json, correct, time_spent_seconds, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(u64_to_i64("session_id", record.session_id.value())?)
        .bind(u64_to_i64("question_id", record.question_id.value())?)
        .bind(u64_to_i64("user_id", record.user_id.value())?)
        .bind(value_json)
        .bind(record.correct.map(i64::from))
        .bind(i64::from(record.time_spent_seconds))
        .bind(record.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, StorageError> {
        if let Some(existing) = self.stored_completion(request.session_id).await? {
            debug!(session_id = %request.session_id, "completion already stored");
            return Ok(existing);
        }

        let session_key = u64_to_i64("session_id", request.session_id.value())?;
        let known = sqlx::query("SELECT 1 FROM assessment_sessions WHERE id = ?1")
            .bind(session_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        if known.is_none() {
            return Err(StorageError::NotFound);
        }

        let mut keys = HashMap::new();
        for answer in &request.answers {
            let row = sqlx::query("SELECT key_json, marks FROM questions WHERE id = ?1")
                .bind(u64_to_i64("question_id", answer.question_id.value())?)
                .fetch_optional(&self.pool)
                .await
                .map_err(conn)?;
            let Some(row) = row else { continue };
            let Some(json) = row.try_get::<Option<String>, _>("key_json").map_err(ser)? else {
                continue;
            };
            let marks = i64_to_u32("marks", row.try_get("marks").map_err(ser)?)?;
            keys.insert(answer.question_id, (parse_answer_key(&json)?, marks));
        }

        let (tally, score) = grade_submission(request, &keys)
            .ok_or_else(|| StorageError::Serialization("answers exceed question total".into()))?;
        let answers_json = serde_json::to_string(&request.answers).map_err(ser)?;

        let mut tx = self.pool.begin().await.map_err(conn)?;
        // A concurrent completion of the same session keeps the first row.
        sqlx::query(
            r"
            INSERT INTO session_completions (session_id, user_id, mode, total, correct, wrong, skipped, pending, score, elapsed_seconds, late, reason, answers_json, completed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(session_id) DO NOTHING
            ",
        )
        .bind(session_key)
        .bind(u64_to_i64("user_id", request.user_id.value())?)
        .bind(request.mode.as_str())
        .bind(i64::from(tally.total()))
        .bind(i64::from(tally.correct()))
        .bind(i64::from(tally.wrong()))
        .bind(i64::from(tally.skipped()))
        .bind(i64::from(tally.pending()))
        .bind(i64::from(score))
        .bind(u64_to_i64("elapsed_seconds", request.elapsed_seconds)?)
        .bind(i64::from(request.late))
        .bind(reason_as_str(request.reason))
        .bind(answers_json)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        tx.commit().await.map_err(conn)?;

        let receipt = self
            .stored_completion(request.session_id)
            .await?
            .ok_or(StorageError::NotFound)?;
        info!(
            session_id = %request.session_id,
            correct = tally.correct(),
            wrong = tally.wrong(),
            pending = tally.pending(),
            "session completed"
        );
        Ok(receipt)
    }
}
