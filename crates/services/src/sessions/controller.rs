use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use exam_core::model::{
    Answer, AnswerRejected, AnswerValue, Attempt, AttemptResults, CheckOutcome, FinalizeReason,
    NavigatorState, OptionId, QuestionId, QuestionType, SectionAdvance, SectionId, SessionMode,
};
use exam_core::timer::{Countdown, TickReport, TimerSet};
use serde::Serialize;
use storage::repository::{
    AttemptRecord, CompletionReceipt, CompletionRequest, ScoringService, StorageError,
};
use tracing::{debug, info, warn};

use super::finalize::{FinalizationCoordinator, Settlement, Submission};
use crate::Clock;
use crate::error::{FinalizeError, SessionError};
use crate::settings::EngineSettings;

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a running attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    TimeUp,
    Finalizing,
    Completed,
    Error,
    Abandoned,
}

impl SessionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::TimeUp => "time_up",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Abandoned => "abandoned",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a finalize request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Completed(AttemptResults),
    /// A submission was already running or done; nothing was sent.
    AlreadyFinalizing,
}

/// What one timer tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub report: TickReport,
    /// Section locked because its clock ran out.
    pub section_finished: Option<SectionId>,
    pub entered_time_up: bool,
    pub finalized: Option<FinalizeOutcome>,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Owns one attempt and drives it through its lifecycle.
///
/// Obtained only from `SessionLauncher::start_session`, so every controller
/// starts `InProgress` with its timers armed.
pub struct SessionController {
    attempt: Attempt,
    timers: TimerSet,
    status: SessionStatus,
    clock: Clock,
    scoring: Arc<dyn ScoringService>,
    settings: EngineSettings,
    finalizer: Arc<FinalizationCoordinator>,
    reason: Option<FinalizeReason>,
    results: Option<AttemptResults>,
    last_error: Option<String>,
}

impl SessionController {
    pub(crate) fn new(
        attempt: Attempt,
        clock: Clock,
        scoring: Arc<dyn ScoringService>,
        settings: EngineSettings,
    ) -> Self {
        let started_at = attempt.started_at();
        let mut timers = TimerSet::new(attempt.overall_deadline().map(Countdown::until));
        if let Some(section) = attempt.sections().active() {
            timers.arm_section(section.id(), section.time_limit_seconds(), started_at);
        }
        let finalizer = Arc::new(FinalizationCoordinator::new(Arc::clone(&scoring)));
        Self {
            attempt,
            timers,
            status: SessionStatus::InProgress,
            clock,
            scoring,
            settings,
            finalizer,
            reason: None,
            results: None,
            last_error: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    #[must_use]
    pub fn attempt(&self) -> &Attempt {
        &self.attempt
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.attempt.mode()
    }

    #[must_use]
    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    #[must_use]
    pub fn results(&self) -> Option<&AttemptResults> {
        self.results.as_ref()
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    #[must_use]
    pub fn finalize_reason(&self) -> Option<FinalizeReason> {
        self.reason
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Mutable access for fixed clocks in tests and replays.
    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    /// True while timer ticks can still change anything.
    #[must_use]
    pub fn is_ticking(&self) -> bool {
        matches!(self.status, SessionStatus::InProgress | SessionStatus::TimeUp)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            status: self.status,
        }
    }

    fn ensure_accepting(&self) -> Result<(), AnswerRejected> {
        if self.status == SessionStatus::InProgress {
            Ok(())
        } else {
            Err(AnswerRejected::NotAccepting {
                status: self.status.as_str(),
            })
        }
    }

    //
    // ── answers ──────────────────────────────────────────────────────────────
    //

    /// Record `value` for `question`, replacing any earlier answer.
    ///
    /// # Errors
    ///
    /// Returns `AnswerRejected` outside `InProgress`, for questions outside the
    /// active section, or for a value of the wrong shape. Nothing changes on error.
    pub fn record_answer(
        &mut self,
        question: QuestionId,
        value: AnswerValue,
    ) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        let now = self.now();
        self.attempt
            .record_answer(question, value, now)
            .inspect_err(|err| debug!(%question, error = %err, "answer rejected"))?;
        Ok(())
    }

    /// Click an option: replaces for single choice, toggles for multiple choice.
    ///
    /// # Errors
    ///
    /// As for `record_answer`.
    pub fn select_option(
        &mut self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<AnswerValue, SessionError> {
        self.ensure_accepting()?;
        let now = self.now();
        Ok(self.attempt.select_option(question, option, now)?.clone())
    }

    /// Toggle membership of `option` in a multiple-choice answer.
    ///
    /// # Errors
    ///
    /// As for `record_answer`, plus `TypeMismatch` for other question kinds.
    pub fn toggle_option(
        &mut self,
        question: QuestionId,
        option: OptionId,
    ) -> Result<AnswerValue, SessionError> {
        self.ensure_accepting()?;
        let found = self
            .attempt
            .question(question)
            .map(|q| q.question_type())
            .ok_or(AnswerRejected::UnknownQuestion(question))?;
        if found != QuestionType::McqMultiple {
            return Err(AnswerRejected::TypeMismatch {
                question,
                expected: found,
                got: QuestionType::McqMultiple,
            }
            .into());
        }
        self.select_option(question, option)
    }

    /// Free-text entry for numerical and essay questions.
    ///
    /// # Errors
    ///
    /// As for `record_answer`.
    pub fn set_text(
        &mut self,
        question: QuestionId,
        text: impl Into<String>,
    ) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        let now = self.now();
        self.attempt.set_text(question, text, now)?;
        Ok(())
    }

    #[must_use]
    pub fn answer(&self, question: QuestionId) -> Option<&Answer> {
        self.attempt.answer(question)
    }

    //
    // ── navigation ───────────────────────────────────────────────────────────
    //

    fn ensure_navigable(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.is_ticking() {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    /// Move to `index` in `section` (the active section when `None`).
    ///
    /// # Errors
    ///
    /// Returns `NavigationError` for locked or inactive sections and bad indexes,
    /// or `InvalidState` once the attempt has left `InProgress`/`TimeUp`.
    pub fn navigate(
        &mut self,
        section: Option<SectionId>,
        index: usize,
    ) -> Result<NavigatorState, SessionError> {
        self.ensure_navigable("navigate")?;
        let now = self.now();
        Ok(self.attempt.navigate(section, index, now)?)
    }

    /// # Errors
    ///
    /// As for `navigate`.
    pub fn next(&mut self) -> Result<NavigatorState, SessionError> {
        self.ensure_navigable("next")?;
        let now = self.now();
        Ok(self.attempt.next(now)?)
    }

    /// # Errors
    ///
    /// As for `navigate`.
    pub fn previous(&mut self) -> Result<NavigatorState, SessionError> {
        self.ensure_navigable("previous")?;
        let now = self.now();
        Ok(self.attempt.previous(now)?)
    }

    //
    // ── practice check ───────────────────────────────────────────────────────
    //

    /// Reveal correctness for an answered practice question.
    ///
    /// The first check of a question is sent to the scoring service; a
    /// failure there is logged and does not affect the outcome.
    ///
    /// # Errors
    ///
    /// Returns `CheckError` for exam attempts, unknown or unanswered questions,
    /// and `InvalidState` outside `InProgress`.
    pub async fn check(&mut self, question: QuestionId) -> Result<CheckOutcome, SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(self.invalid("check"));
        }
        let now = self.now();
        let outcome = self.attempt.check(question, now)?;

        if outcome.first_check && self.settings.record_attempts {
            let record = AttemptRecord {
                session_id: self.attempt.session_id(),
                question_id: question,
                user_id: self.attempt.user_id(),
                value: outcome.value.clone(),
                correct: outcome.correct,
                time_spent_seconds: outcome.time_spent_seconds,
                recorded_at: now,
            };
            if let Err(err) = self.scoring.record_attempt(&record).await {
                warn!(
                    session_id = %record.session_id,
                    %question,
                    error = %err,
                    "failed to record practice attempt"
                );
            }
        }
        Ok(outcome)
    }

    //
    // ── sections ─────────────────────────────────────────────────────────────
    //

    /// Lock `section` and move on; finishing the last section submits the attempt.
    ///
    /// Finishing a section that is already locked changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` for unknown or not-yet-active sections,
    /// `InvalidState` outside `InProgress`, and finalize errors from the
    /// automatic submission.
    pub async fn finish_section(
        &mut self,
        section: SectionId,
    ) -> Result<SectionAdvance, SessionError> {
        if self.status != SessionStatus::InProgress {
            return Err(self.invalid("finish_section"));
        }
        let now = self.now();
        self.finish_section_at(section, now).await
    }

    async fn finish_section_at(
        &mut self,
        section: SectionId,
        now: DateTime<Utc>,
    ) -> Result<SectionAdvance, SessionError> {
        let advance = self.attempt.finish_section(section, now)?;
        match advance {
            SectionAdvance::Next(next) => {
                let limit = self
                    .attempt
                    .sections()
                    .get(next)
                    .and_then(|s| s.time_limit_seconds());
                self.timers.arm_section(next, limit, now);
                info!(session_id = %self.attempt.session_id(), %section, %next, "section finished");
            }
            SectionAdvance::Exhausted => {
                self.timers.disarm_section();
                info!(session_id = %self.attempt.session_id(), %section, "last section finished");
                self.finalize(FinalizeReason::Auto, now).await?;
            }
            SectionAdvance::AlreadyLocked => {
                debug!(%section, "section already locked");
            }
        }
        Ok(advance)
    }

    //
    // ── timers ───────────────────────────────────────────────────────────────
    //

    /// Process the clocks at the controller's current time.
    ///
    /// # Errors
    ///
    /// As for `tick_at`.
    pub async fn tick(&mut self) -> Result<TickOutcome, SessionError> {
        let now = self.now();
        self.tick_at(now).await
    }

    /// Process the clocks at `now`.
    ///
    /// A section expiry is handled before an overall expiry in the same tick.
    /// Without `allow_continue_after_time_up` the overall expiry submits at once.
    ///
    /// # Errors
    ///
    /// Returns finalize errors from an automatic submission; the controller is
    /// then in `Error`.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, SessionError> {
        let mut outcome = TickOutcome::default();
        if !self.is_ticking() {
            return Ok(outcome);
        }

        outcome.report = self.timers.tick(now);
        debug!(
            session_id = %self.attempt.session_id(),
            overall = ?outcome.report.overall_remaining,
            section = ?outcome.report.section_remaining,
            "tick"
        );

        if let Some(section) = outcome.report.section_expired {
            if self.status == SessionStatus::InProgress {
                info!(%section, "section time expired");
                let advance = self.finish_section_at(section, now).await?;
                if advance != SectionAdvance::AlreadyLocked {
                    outcome.section_finished = Some(section);
                }
                if advance == SectionAdvance::Exhausted {
                    outcome.finalized = self.finalized_outcome();
                }
            }
        }

        if outcome.report.overall_expired && self.status == SessionStatus::InProgress {
            if self.attempt.allow_continue_after_time_up() {
                self.timers.suspend_section(now);
                self.status = SessionStatus::TimeUp;
                outcome.entered_time_up = true;
                info!(session_id = %self.attempt.session_id(), "overall time up");
            } else {
                info!(session_id = %self.attempt.session_id(), "overall time up, submitting");
                outcome.finalized = Some(self.finalize(FinalizeReason::TimeUp, now).await?);
            }
        }

        Ok(outcome)
    }

    fn finalized_outcome(&self) -> Option<FinalizeOutcome> {
        self.results.clone().map(FinalizeOutcome::Completed)
    }

    /// Resume after the overall clock ran out; the attempt is marked late.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is in `TimeUp` and continuing is allowed.
    pub fn continue_after_time_up(&mut self) -> Result<(), SessionError> {
        if self.status != SessionStatus::TimeUp || !self.attempt.allow_continue_after_time_up() {
            return Err(self.invalid("continue_after_time_up"));
        }
        let now = self.now();
        self.attempt.mark_late();
        self.timers.resume_section(now);
        self.status = SessionStatus::InProgress;
        info!(session_id = %self.attempt.session_id(), "continuing late");
        Ok(())
    }

    /// Submit from `TimeUp`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside `TimeUp`, or finalize errors.
    pub async fn finish_now(&mut self) -> Result<FinalizeOutcome, SessionError> {
        if self.status != SessionStatus::TimeUp {
            return Err(self.invalid("finish_now"));
        }
        let now = self.now();
        self.finalize(FinalizeReason::TimeUp, now).await
    }

    //
    // ── finalization ─────────────────────────────────────────────────────────
    //

    /// Submit the attempt. Safe to call repeatedly: only the first call sends.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for abandoned sessions and sessions in `Error`
    /// (use `retry`), or `FinalizeError` when the scoring service fails.
    pub async fn request_finalize(
        &mut self,
        reason: FinalizeReason,
    ) -> Result<FinalizeOutcome, SessionError> {
        let now = self.now();
        self.finalize(reason, now).await
    }

    async fn finalize(
        &mut self,
        reason: FinalizeReason,
        now: DateTime<Utc>,
    ) -> Result<FinalizeOutcome, SessionError> {
        match self.status {
            SessionStatus::InProgress | SessionStatus::TimeUp => {}
            SessionStatus::Finalizing | SessionStatus::Completed => {
                return Ok(FinalizeOutcome::AlreadyFinalizing);
            }
            SessionStatus::Error | SessionStatus::Abandoned => {
                return Err(self.invalid("request_finalize"));
            }
        }

        let tally = self.attempt.tally().map_err(FinalizeError::from)?;
        self.timers.stop();
        self.status = SessionStatus::Finalizing;
        self.reason = Some(reason);
        info!(
            session_id = %self.attempt.session_id(),
            trace_id = %self.attempt.trace_id(),
            ?reason,
            "finalizing"
        );

        let request = CompletionRequest {
            session_id: self.attempt.session_id(),
            user_id: self.attempt.user_id(),
            mode: self.attempt.mode(),
            tally,
            elapsed_seconds: self.attempt.elapsed_seconds(now),
            late: self.attempt.is_late(),
            reason,
            answers: self.attempt.answers_in_order(),
        };
        self.submit(request).await
    }

    /// Re-send the cached payload after a failed submission.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless the session is in `Error`, or the
    /// scoring service's failure again.
    pub async fn retry(&mut self) -> Result<FinalizeOutcome, SessionError> {
        if self.status != SessionStatus::Error {
            return Err(self.invalid("retry"));
        }
        let Some(request) = self.finalizer.payload() else {
            return Err(self.invalid("retry"));
        };
        self.status = SessionStatus::Finalizing;
        info!(session_id = %request.session_id, "retrying completion");
        self.submit(request).await
    }

    async fn submit(&mut self, request: CompletionRequest) -> Result<FinalizeOutcome, SessionError> {
        let local = request.clone();
        match self.finalizer.submit_with(move || request).await {
            Ok(Submission::Completed(receipt)) => {
                let results = self.settle(&local, &receipt);
                Ok(FinalizeOutcome::Completed(results))
            }
            Ok(Submission::Skipped(state)) => {
                debug!(?state, "another submission holds the guard");
                self.adopt_settlement(local).await
            }
            Err(err) => {
                self.status = SessionStatus::Error;
                self.last_error = Some(err.to_string());
                Err(FinalizeError::from(err).into())
            }
        }
    }

    fn settle(&mut self, sent: &CompletionRequest, receipt: &CompletionReceipt) -> AttemptResults {
        let results = AttemptResults {
            session_id: sent.session_id,
            tally: receipt.tally.unwrap_or(sent.tally),
            elapsed_seconds: sent.elapsed_seconds,
            late: sent.late,
            reason: sent.reason,
            completed_at: receipt.completed_at,
            score: receipt.score,
        };
        self.status = SessionStatus::Completed;
        self.last_error = None;
        self.results = Some(results.clone());
        results
    }

    /// Follow a submission started elsewhere to its end, so the controller
    /// never stays in `Finalizing`.
    async fn adopt_settlement(
        &mut self,
        local: CompletionRequest,
    ) -> Result<FinalizeOutcome, SessionError> {
        let sent = self.finalizer.payload().unwrap_or(local);
        match self.finalizer.settled().await {
            Settlement::Completed(receipt) => {
                if self.results.is_none() {
                    self.settle(&sent, &receipt);
                }
                Ok(FinalizeOutcome::AlreadyFinalizing)
            }
            Settlement::Failed(message) => {
                self.status = SessionStatus::Error;
                self.last_error = Some(message.clone());
                Err(FinalizeError::Storage(StorageError::Unavailable(message)).into())
            }
            Settlement::Pending => {
                self.status = SessionStatus::Error;
                let message = "submission outcome unknown".to_owned();
                self.last_error = Some(message.clone());
                Err(FinalizeError::Storage(StorageError::Unavailable(message)).into())
            }
        }
    }

    /// Leave the attempt without submitting. Only possible before finalizing starts.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` once finalizing has begun.
    pub fn abandon(&mut self) -> Result<(), SessionError> {
        if !self.is_ticking() {
            return Err(self.invalid("abandon"));
        }
        self.timers.stop();
        self.status = SessionStatus::Abandoned;
        info!(session_id = %self.attempt.session_id(), "session abandoned");
        Ok(())
    }
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("attempt", &self.attempt)
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("finalizer", &self.finalizer)
            .finish_non_exhaustive()
    }
}
