use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    Answer, AnswerKey, AnswerValue, FinalizeReason, Question, QuestionId, QuestionOutcome,
    SectionId, SectionSpec, SessionId, SessionMode, Tally, TargetRef, UserId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

//
// ─── QUESTION SOURCE ───────────────────────────────────────────────────────────
//

/// Parameters for sampling or loading an attempt's questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub target: TargetRef,
    pub scope_id: Option<u64>,
    pub subject_context: Option<String>,
    pub user_id: UserId,
    /// Upper bound on sampled practice questions.
    pub limit: Option<u32>,
}

/// Questions for one attempt, already partitioned into sections.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionSet {
    pub sections: Vec<SectionSpec>,
    pub overall_time_limit_seconds: Option<u32>,
    pub allow_continue_after_time_up: bool,
}

impl QuestionSet {
    /// A practice set: one untimed section.
    #[must_use]
    pub fn practice(section: SectionId, questions: Vec<Question>) -> Self {
        Self {
            sections: vec![SectionSpec::new(section, "Practice", 0).with_questions(questions)],
            overall_time_limit_seconds: None,
            allow_continue_after_time_up: false,
        }
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.sections.iter().map(|s| s.questions.len()).sum()
    }
}

#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Deliver the ordered question set for an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for an unknown target, or transport errors.
    async fn generate_session_questions(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionSet, StorageError>;
}

//
// ─── SCORING SERVICE ───────────────────────────────────────────────────────────
//

/// Immediate-feedback record of a checked practice answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub user_id: UserId,
    pub value: AnswerValue,
    pub correct: Option<bool>,
    pub time_spent_seconds: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Final submission for an attempt.
///
/// Built once per attempt and resent unchanged on retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub mode: SessionMode,
    pub tally: Tally,
    pub elapsed_seconds: u64,
    pub late: bool,
    pub reason: FinalizeReason,
    pub answers: Vec<Answer>,
}

/// Acknowledgement of a completed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReceipt {
    pub session_id: SessionId,
    pub completed_at: DateTime<Utc>,
    /// Authoritative counts, when the service grades the attempt itself.
    pub tally: Option<Tally>,
    pub score: Option<u32>,
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    /// Open a session record for an attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be created.
    async fn create_session(
        &self,
        user_id: UserId,
        target: TargetRef,
        context_id: Option<u64>,
    ) -> Result<SessionId, StorageError>;

    /// Store one checked practice answer.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on persistence failure.
    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), StorageError>;

    /// Score and close a session. Repeated calls for the same session return
    /// the first receipt and never count twice.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on persistence or transport failure.
    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, StorageError>;
}

/// Grade submitted answers against server-held keys.
///
/// Answered questions without a key stay pending; `score` sums the marks of
/// correct answers.
#[must_use]
pub fn grade_submission(
    request: &CompletionRequest,
    keys: &HashMap<QuestionId, (AnswerKey, u32)>,
) -> Option<(Tally, u32)> {
    let mut outcomes = Vec::with_capacity(request.tally.total() as usize);
    let mut score = 0_u32;
    for answer in request.answers.iter().filter(|a| !a.value.is_blank()) {
        let outcome = match keys.get(&answer.question_id) {
            Some((key, marks)) if key.grade(&answer.value) => {
                score = score.saturating_add(*marks);
                QuestionOutcome::Correct
            }
            Some(_) => QuestionOutcome::Wrong,
            None => QuestionOutcome::Pending,
        };
        outcomes.push(outcome);
    }
    let answered = outcomes.len();
    let skipped = (request.tally.total() as usize).saturating_sub(answered);
    outcomes.extend(std::iter::repeat_n(QuestionOutcome::Skipped, skipped));
    Tally::from_outcomes(outcomes).ok().map(|t| (t, score))
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct SessionRow {
    target: TargetRef,
}

#[derive(Default)]
struct InMemoryState {
    banks: HashMap<TargetRef, QuestionSet>,
    keys: HashMap<TargetRef, HashMap<QuestionId, (AnswerKey, u32)>>,
    next_session: u64,
    sessions: HashMap<SessionId, SessionRow>,
    attempts: Vec<AttemptRecord>,
    completions: HashMap<SessionId, CompletionReceipt>,
    completion_calls: Vec<CompletionRequest>,
    fail_completions: u32,
    fail_fetch: bool,
    fail_create: bool,
    fail_attempts: bool,
    completion_delay: Option<Duration>,
}

/// Simple in-memory adapter for testing and prototyping, with fault injection.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut InMemoryState) -> T,
    ) -> Result<T, StorageError> {
        let mut guard = self
            .state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(f(&mut guard))
    }

    /// Register the question set served for `target`.
    pub fn insert_question_set(&self, target: TargetRef, set: QuestionSet) {
        let _ = self.with_state(|s| s.banks.insert(target, set));
    }

    /// Register server-side keys (and marks) used to grade `target` on completion.
    pub fn insert_answer_keys(&self, target: TargetRef, keys: HashMap<QuestionId, (AnswerKey, u32)>) {
        let _ = self.with_state(|s| s.keys.insert(target, keys));
    }

    /// Make the next `n` completion calls fail.
    pub fn fail_next_completions(&self, n: u32) {
        let _ = self.with_state(|s| s.fail_completions = n);
    }

    pub fn fail_question_fetch(&self, fail: bool) {
        let _ = self.with_state(|s| s.fail_fetch = fail);
    }

    pub fn set_create_failure(&self, fail: bool) {
        let _ = self.with_state(|s| s.fail_create = fail);
    }

    pub fn set_attempt_failure(&self, fail: bool) {
        let _ = self.with_state(|s| s.fail_attempts = fail);
    }

    /// Hold every completion call for `delay` before answering.
    pub fn set_completion_delay(&self, delay: Duration) {
        let _ = self.with_state(|s| s.completion_delay = Some(delay));
    }

    /// Every completion request received, failed ones included.
    #[must_use]
    pub fn completion_calls(&self) -> Vec<CompletionRequest> {
        self.with_state(|s| s.completion_calls.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn completion(&self, session: SessionId) -> Option<CompletionReceipt> {
        self.with_state(|s| s.completions.get(&session).cloned())
            .ok()
            .flatten()
    }

    #[must_use]
    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.with_state(|s| s.attempts.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.with_state(|s| s.sessions.len()).unwrap_or_default()
    }
}

#[async_trait]
impl QuestionSource for InMemoryRepository {
    async fn generate_session_questions(
        &self,
        request: &QuestionRequest,
    ) -> Result<QuestionSet, StorageError> {
        let found = self.with_state(|s| {
            if s.fail_fetch {
                return Err(StorageError::Unavailable("question source offline".into()));
            }
            s.banks.get(&request.target).cloned().ok_or(StorageError::NotFound)
        })??;

        let Some(limit) = request.limit.and_then(|l| usize::try_from(l).ok()) else {
            return Ok(found);
        };
        let mut set = found;
        let mut budget = limit;
        for section in &mut set.sections {
            section.questions.truncate(budget);
            budget -= section.questions.len();
        }
        Ok(set)
    }
}

#[async_trait]
impl ScoringService for InMemoryRepository {
    async fn create_session(
        &self,
        _user_id: UserId,
        target: TargetRef,
        _context_id: Option<u64>,
    ) -> Result<SessionId, StorageError> {
        self.with_state(|s| {
            if s.fail_create {
                return Err(StorageError::Unavailable("session service offline".into()));
            }
            s.next_session += 1;
            let id = SessionId::new(s.next_session);
            s.sessions.insert(id, SessionRow { target });
            Ok(id)
        })?
    }

    async fn record_attempt(&self, record: &AttemptRecord) -> Result<(), StorageError> {
        self.with_state(|s| {
            if s.fail_attempts {
                return Err(StorageError::Unavailable("attempt log offline".into()));
            }
            if !s.sessions.contains_key(&record.session_id) {
                return Err(StorageError::NotFound);
            }
            s.attempts.push(record.clone());
            Ok(())
        })?
    }

    async fn complete_session(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionReceipt, StorageError> {
        if let Some(delay) = self.with_state(|s| s.completion_delay)? {
            tokio::time::sleep(delay).await;
        }
        self.with_state(|s| {
            s.completion_calls.push(request.clone());
            if s.fail_completions > 0 {
                s.fail_completions -= 1;
                return Err(StorageError::Unavailable("scoring service offline".into()));
            }
            if let Some(existing) = s.completions.get(&request.session_id) {
                return Ok(existing.clone());
            }
            let row = s
                .sessions
                .get(&request.session_id)
                .cloned()
                .ok_or(StorageError::NotFound)?;
            let graded = s
                .keys
                .get(&row.target)
                .and_then(|keys| grade_submission(request, keys));
            let receipt = CompletionReceipt {
                session_id: request.session_id,
                completed_at: Utc::now(),
                tally: graded.map(|(tally, _)| tally),
                score: graded.map(|(_, score)| score),
            };
            s.completions.insert(request.session_id, receipt.clone());
            Ok(receipt)
        })?
    }
}

/// Question source and scoring service behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub questions: Arc<dyn QuestionSource>,
    pub scoring: Arc<dyn ScoringService>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_in_memory(&InMemoryRepository::new())
    }

    #[must_use]
    pub fn from_in_memory(repo: &InMemoryRepository) -> Self {
        let questions: Arc<dyn QuestionSource> = Arc::new(repo.clone());
        let scoring: Arc<dyn ScoringService> = Arc::new(repo.clone());
        Self { questions, scoring }
    }
}
