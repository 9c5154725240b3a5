use exam_core::model::{AnswerKey, QuestionKind, SectionId, SectionSpec, TargetRef};
use sqlx::Row;
use tracing::debug;

use super::SqliteRepository;
use super::mapping::{conn, i64_to_u32, i64_to_u64, map_question_row, ser, u64_to_i64};
use crate::repository::{QuestionRequest, QuestionSet, QuestionSource, StorageError};

/// Exam header row used for seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamRecord {
    pub id: u64,
    pub title: String,
    pub overall_time_limit_seconds: Option<u32>,
    pub allow_continue_after_time_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSectionRecord {
    pub id: u64,
    pub exam_id: u64,
    pub name: String,
    pub ordinal: u32,
    pub time_limit_seconds: Option<u32>,
}

/// A bank question with its key held separately from the client-facing shape.
///
/// Practice questions carry a `subtopic_id`; exam questions a `section_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRecord {
    pub id: u64,
    pub subtopic_id: Option<u64>,
    pub section_id: Option<u64>,
    pub position: u32,
    pub kind: QuestionKind,
    pub prompt: String,
    pub media: Option<String>,
    pub marks: u32,
    pub key: Option<AnswerKey>,
    pub explanation: Option<String>,
}

impl SqliteRepository {
    /// Insert or replace an exam header.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on overflow or query failure.
    pub async fn upsert_exam(&self, exam: &ExamRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO exams (id, title, overall_time_limit_seconds, allow_continue_after_time_up)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                overall_time_limit_seconds = excluded.overall_time_limit_seconds,
                allow_continue_after_time_up = excluded.allow_continue_after_time_up
            ",
        )
        .bind(u64_to_i64("exam_id", exam.id)?)
        .bind(&exam.title)
        .bind(exam.overall_time_limit_seconds.map(i64::from))
        .bind(i64::from(exam.allow_continue_after_time_up))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Insert or replace an exam section.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on overflow or query failure.
    pub async fn upsert_section(&self, section: &ExamSectionRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO exam_sections (id, exam_id, name, ordinal, time_limit_seconds)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                exam_id = excluded.exam_id,
                name = excluded.name,
                ordinal = excluded.ordinal,
                time_limit_seconds = excluded.time_limit_seconds
            ",
        )
        .bind(u64_to_i64("section_id", section.id)?)
        .bind(u64_to_i64("exam_id", section.exam_id)?)
        .bind(&section.name)
        .bind(i64::from(section.ordinal))
        .bind(section.time_limit_seconds.map(i64::from))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    /// Insert or replace a bank question.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on overflow, serialization, or query failure.
    pub async fn upsert_question(&self, question: &QuestionRecord) -> Result<(), StorageError> {
        let kind_json = serde_json::to_string(&question.kind).map_err(ser)?;
        let key_json = question
            .key
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO questions (id, subtopic_id, section_id, position, question_type, kind_json, prompt, media, marks, key_json, explanation)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                subtopic_id = excluded.subtopic_id,
                section_id = excluded.section_id,
                position = excluded.position,
                question_type = excluded.question_type,
                kind_json = excluded.kind_json,
                prompt = excluded.prompt,
                media = excluded.media,
                marks = excluded.marks,
                key_json = excluded.key_json,
                explanation = excluded.explanation
            ",
        )
        .bind(u64_to_i64("question_id", question.id)?)
        .bind(question.subtopic_id.map(|v| u64_to_i64("subtopic_id", v)).transpose()?)
        .bind(question.section_id.map(|v| u64_to_i64("section_id", v)).transpose()?)
        .bind(i64::from(question.position))
        .bind(question.kind.question_type().as_str())
        .bind(kind_json)
        .bind(&question.prompt)
        .bind(&question.media)
        .bind(i64::from(question.marks))
        .bind(key_json)
        .bind(&question.explanation)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn practice_set(
        &self,
        subtopic_id: u64,
        limit: Option<u32>,
    ) -> Result<QuestionSet, StorageError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit = limit.map_or(-1, i64::from);
        let rows = sqlx::query(
            r"
            SELECT id, kind_json, prompt, media, marks, key_json, explanation
            FROM questions
            WHERE subtopic_id = ?1
            ORDER BY RANDOM()
            LIMIT ?2
            ",
        )
        .bind(u64_to_i64("subtopic_id", subtopic_id)?)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let questions = rows
            .iter()
            .map(|row| map_question_row(row, true))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(subtopic_id, sampled = questions.len(), "sampled practice questions");
        Ok(QuestionSet::practice(SectionId::new(subtopic_id), questions))
    }

    async fn exam_set(&self, exam_id: u64) -> Result<QuestionSet, StorageError> {
        let exam_key = u64_to_i64("exam_id", exam_id)?;
        let exam = sqlx::query(
            r"
            SELECT overall_time_limit_seconds, allow_continue_after_time_up
            FROM exams
            WHERE id = ?1
            ",
        )
        .bind(exam_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?
        .ok_or(StorageError::NotFound)?;

        let overall_time_limit_seconds = exam
            .try_get::<Option<i64>, _>("overall_time_limit_seconds")
            .map_err(ser)?
            .map(|v| i64_to_u32("overall_time_limit_seconds", v))
            .transpose()?;
        let allow_continue: i64 = exam.try_get("allow_continue_after_time_up").map_err(ser)?;

        let section_rows = sqlx::query(
            r"
            SELECT id, name, ordinal, time_limit_seconds
            FROM exam_sections
            WHERE exam_id = ?1
            ORDER BY ordinal ASC, id ASC
            ",
        )
        .bind(exam_key)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut sections = Vec::with_capacity(section_rows.len());
        for row in &section_rows {
            let section_key: i64 = row.try_get("id").map_err(ser)?;
            let name: String = row.try_get("name").map_err(ser)?;
            let ordinal = i64_to_u32("ordinal", row.try_get("ordinal").map_err(ser)?)?;
            let time_limit = row
                .try_get::<Option<i64>, _>("time_limit_seconds")
                .map_err(ser)?
                .map(|v| i64_to_u32("time_limit_seconds", v))
                .transpose()?;

            // Keys never leave the store for exam delivery.
            let question_rows = sqlx::query(
                r"
                SELECT id, kind_json, prompt, media, marks
                FROM questions
                WHERE section_id = ?1
                ORDER BY position ASC, id ASC
                ",
            )
            .bind(section_key)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;
            let questions = question_rows
                .iter()
                .map(|q| map_question_row(q, false))
                .collect::<Result<Vec<_>, _>>()?;

            let mut spec = SectionSpec::new(
                SectionId::new(i64_to_u64("section_id", section_key)?),
                name,
                ordinal,
            )
            .with_questions(questions);
            spec.time_limit_seconds = time_limit;
            sections.push(spec);
        }

        Ok(QuestionSet {
            sections,
            overall_time_limit_seconds,
            allow_continue_after_time_up: allow_continue != 0,
        })
    }
}

#[async_trait::async_trait]
impl QuestionSource for SqliteRepository {
    async fn generate_session_questions(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionSet, StorageError> {
        match request.target {
            TargetRef::Subtopic(id) => self.practice_set(id, request.limit).await,
            TargetRef::Exam(id) => self.exam_set(id).await,
        }
    }
}
