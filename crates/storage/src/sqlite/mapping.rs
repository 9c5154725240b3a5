use exam_core::model::{
    AnswerKey, FinalizeReason, Question, QuestionId, QuestionKind, SealedKey, SessionId, Tally,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::{CompletionReceipt, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

pub(crate) fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn i64_to_u32(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn session_id_from_i64(v: i64) -> Result<SessionId, StorageError> {
    Ok(SessionId::new(i64_to_u64("session_id", v)?))
}

pub(crate) fn question_id_from_i64(v: i64) -> Result<QuestionId, StorageError> {
    Ok(QuestionId::new(i64_to_u64("question_id", v)?))
}

pub(crate) fn reason_as_str(reason: FinalizeReason) -> &'static str {
    match reason {
        FinalizeReason::Manual => "manual",
        FinalizeReason::Auto => "auto",
        FinalizeReason::TimeUp => "time_up",
    }
}

pub(crate) fn parse_answer_key(json: &str) -> Result<AnswerKey, StorageError> {
    serde_json::from_str(json).map_err(ser)
}

/// Map a `questions` row. The key is attached only when `with_key` is set.
pub(crate) fn map_question_row(row: &SqliteRow, with_key: bool) -> Result<Question, StorageError> {
    let id = question_id_from_i64(row.try_get("id").map_err(ser)?)?;
    let kind_json: String = row.try_get("kind_json").map_err(ser)?;
    let kind: QuestionKind = serde_json::from_str(&kind_json).map_err(ser)?;
    let prompt: String = row.try_get("prompt").map_err(ser)?;
    let marks = i64_to_u32("marks", row.try_get("marks").map_err(ser)?)?;

    let mut question = Question::new(id, kind, prompt, marks).map_err(ser)?;
    if let Some(media) = row.try_get::<Option<String>, _>("media").map_err(ser)? {
        question = question.with_media(media);
    }
    if !with_key {
        return Ok(question);
    }

    let key_json: Option<String> = row.try_get("key_json").map_err(ser)?;
    match key_json {
        Some(json) => {
            let explanation: Option<String> = row.try_get("explanation").map_err(ser)?;
            let key = SealedKey::new(parse_answer_key(&json)?, explanation);
            question.with_key(key).map_err(ser)
        }
        None => Ok(question),
    }
}

pub(crate) fn map_completion_row(row: &SqliteRow) -> Result<CompletionReceipt, StorageError> {
    let session_id = session_id_from_i64(row.try_get("session_id").map_err(ser)?)?;
    let count = |field: &'static str| -> Result<u32, StorageError> {
        i64_to_u32(field, row.try_get(field).map_err(ser)?)
    };
    let tally = Tally::from_counts(
        count("total")?,
        count("correct")?,
        count("wrong")?,
        count("skipped")?,
        count("pending")?,
    )
    .map_err(ser)?;
    let score = row
        .try_get::<Option<i64>, _>("score")
        .map_err(ser)?
        .map(|s| i64_to_u32("score", s))
        .transpose()?;

    Ok(CompletionReceipt {
        session_id,
        completed_at: row.try_get("completed_at").map_err(ser)?,
        tally: Some(tally),
        score,
    })
}
