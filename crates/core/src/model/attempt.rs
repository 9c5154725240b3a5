use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::model::answer::{Answer, AnswerRejected, AnswerValue};
use crate::model::ids::{OptionId, QuestionId, SectionId, SessionId, TargetRef, UserId};
use crate::model::navigator::{NavigationError, NavigatorState};
use crate::model::question::{AnswerKey, ChoiceOption, Question, QuestionKind, QuestionType};
use crate::model::section::{Section, SectionAdvance, SectionError, SectionManager, SectionSpec};
use crate::model::tally::{QuestionOutcome, Tally, TallyError};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AttemptError {
    #[error("the question set is empty")]
    NoQuestions,

    #[error("question {0} appears more than once")]
    DuplicateQuestion(QuestionId),

    #[error(transparent)]
    Section(#[from] SectionError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CheckError {
    #[error("answers can only be checked in practice mode")]
    NotPractice,

    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("question {0} has no answer to check")]
    Unanswered(QuestionId),
}

//
// ─── MODE ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Practice,
    Exam,
}

impl SessionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SessionMode::Practice => "practice",
            SessionMode::Exam => "exam",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── SETUP ─────────────────────────────────────────────────────────────────────
//

/// Everything needed to open an attempt once the session record exists.
#[derive(Debug, Clone)]
pub struct AttemptSetup {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub mode: SessionMode,
    pub target: TargetRef,
    pub started_at: DateTime<Utc>,
    pub overall_time_limit_seconds: Option<u32>,
    pub allow_continue_after_time_up: bool,
    pub sections: Vec<SectionSpec>,
}

//
// ─── CHECK OUTCOME ─────────────────────────────────────────────────────────────
//

/// Feedback revealed by a practice-mode check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckOutcome {
    pub question_id: QuestionId,
    pub value: AnswerValue,
    /// `None` when the question has no automatic key (essays).
    pub correct: Option<bool>,
    pub key: Option<AnswerKey>,
    pub explanation: Option<String>,
    pub time_spent_seconds: u32,
    /// False when the question had been checked before.
    pub first_check: bool,
}

//
// ─── CLIENT VIEW ───────────────────────────────────────────────────────────────
//

/// Client-visible rendering of one question.
///
/// A correctness reference appears only inside `checked`, after a practice check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionView {
    pub id: QuestionId,
    pub section: SectionId,
    pub question_type: QuestionType,
    pub prompt: String,
    pub media: Option<String>,
    pub options: Vec<ChoiceOption>,
    pub marks: u32,
    pub answer: Option<AnswerValue>,
    pub word_count: Option<usize>,
    pub checked: Option<CheckOutcome>,
}

//
// ─── ATTEMPT ───────────────────────────────────────────────────────────────────
//

/// One learner's pass through a practice or exam question set.
pub struct Attempt {
    session_id: SessionId,
    trace_id: Uuid,
    user_id: UserId,
    mode: SessionMode,
    target: TargetRef,
    questions: HashMap<QuestionId, Question>,
    sections: SectionManager,
    navigator: Option<NavigatorState>,
    answers: HashMap<QuestionId, Answer>,
    checks: HashMap<QuestionId, CheckOutcome>,
    first_shown: HashMap<QuestionId, DateTime<Utc>>,
    started_at: DateTime<Utc>,
    overall_deadline: Option<DateTime<Utc>>,
    late: bool,
    allow_continue_after_time_up: bool,
}

impl Attempt {
    /// Open an attempt from a delivered question set.
    ///
    /// Practice sets collapse into one unlimited section. Exam questions lose
    /// any correctness reference here. Sections without questions are dropped.
    ///
    /// # Errors
    ///
    /// Returns `AttemptError::NoQuestions` for an empty set, or
    /// `AttemptError::DuplicateQuestion` if a question id repeats.
    pub fn new(setup: AttemptSetup) -> Result<Self, AttemptError> {
        let AttemptSetup {
            session_id,
            user_id,
            mode,
            target,
            started_at,
            overall_time_limit_seconds,
            allow_continue_after_time_up,
            mut sections,
        } = setup;

        sections.retain(|s| !s.questions.is_empty());
        if sections.is_empty() {
            return Err(AttemptError::NoQuestions);
        }
        sections.sort_by_key(|s| s.ordinal);

        if mode == SessionMode::Practice {
            let first = &sections[0];
            let merged = SectionSpec::new(first.id, "Practice", 0)
                .with_questions(sections.iter().flat_map(|s| s.questions.clone()).collect());
            sections = vec![merged];
        }

        let mut questions = HashMap::new();
        let mut layout = Vec::with_capacity(sections.len());
        for spec in sections {
            let mut ids = Vec::with_capacity(spec.questions.len());
            for question in spec.questions {
                let question = match mode {
                    SessionMode::Practice => question,
                    SessionMode::Exam => question.without_key(),
                };
                let id = question.id();
                if questions.insert(id, question).is_some() {
                    return Err(AttemptError::DuplicateQuestion(id));
                }
                ids.push(id);
            }
            layout.push(Section::new(
                spec.id,
                spec.name,
                spec.ordinal,
                match mode {
                    SessionMode::Practice => None,
                    SessionMode::Exam => spec.time_limit_seconds,
                },
                ids,
            ));
        }

        let sections = SectionManager::new(layout)?;
        let navigator = sections.active_id().map(NavigatorState::start_of);
        let overall_deadline = overall_time_limit_seconds
            .map(|secs| started_at + chrono::Duration::seconds(i64::from(secs)));

        let mut attempt = Self {
            session_id,
            trace_id: Uuid::new_v4(),
            user_id,
            mode,
            target,
            questions,
            sections,
            navigator,
            answers: HashMap::new(),
            checks: HashMap::new(),
            first_shown: HashMap::new(),
            started_at,
            overall_deadline,
            late: false,
            allow_continue_after_time_up,
        };
        attempt.mark_shown(started_at);
        Ok(attempt)
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Per-process correlation id for logs.
    #[must_use]
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    #[must_use]
    pub fn target(&self) -> TargetRef {
        self.target
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn overall_deadline(&self) -> Option<DateTime<Utc>> {
        self.overall_deadline
    }

    #[must_use]
    pub fn is_late(&self) -> bool {
        self.late
    }

    pub fn mark_late(&mut self) {
        self.late = true;
    }

    #[must_use]
    pub fn allow_continue_after_time_up(&self) -> bool {
        self.allow_continue_after_time_up
    }

    #[must_use]
    pub fn sections(&self) -> &SectionManager {
        &self.sections
    }

    #[must_use]
    pub fn navigator(&self) -> Option<NavigatorState> {
        self.navigator
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.get(&id)
    }

    /// Question ids in presentation order.
    pub fn question_order(&self) -> impl Iterator<Item = QuestionId> + '_ {
        self.sections
            .sections()
            .iter()
            .flat_map(|s| s.question_ids().iter().copied())
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        let nav = self.navigator?;
        let section = self.sections.get(nav.section)?;
        section
            .question_ids()
            .get(nav.index)
            .and_then(|id| self.questions.get(id))
    }

    #[must_use]
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.started_at).num_seconds()).unwrap_or(0)
    }

    //
    // ── answers ──────────────────────────────────────────────────────────────
    //

    fn writable_question(&self, id: QuestionId) -> Result<&Question, AnswerRejected> {
        let question = self
            .questions
            .get(&id)
            .ok_or(AnswerRejected::UnknownQuestion(id))?;
        let section = self
            .sections
            .section_of(id)
            .ok_or(AnswerRejected::UnknownQuestion(id))?;
        if section.is_locked() {
            return Err(AnswerRejected::SectionLocked(section.id()));
        }
        if self.sections.active_id() != Some(section.id()) {
            return Err(AnswerRejected::SectionNotActive(section.id()));
        }
        if self.checks.contains_key(&id) {
            return Err(AnswerRejected::AlreadyChecked(id));
        }
        Ok(question)
    }

    /// Record `value` for `question`, replacing any earlier value.
    ///
    /// # Errors
    ///
    /// Returns `AnswerRejected` if the question is unknown, outside the active
    /// section, already checked, or the value has the wrong shape.
    pub fn record_answer(
        &mut self,
        question: QuestionId,
        value: AnswerValue,
        at: DateTime<Utc>,
    ) -> Result<(), AnswerRejected> {
        self.writable_question(question)?.validate_answer(&value)?;
        self.answers
            .insert(question, Answer::new(question, value, at));
        Ok(())
    }

    /// Click on a choice option: replaces for single choice, toggles for multiple.
    ///
    /// # Errors
    ///
    /// Returns `AnswerRejected` as for `record_answer`, and `TypeMismatch` for
    /// questions that have no options.
    pub fn select_option(
        &mut self,
        question: QuestionId,
        option: OptionId,
        at: DateTime<Utc>,
    ) -> Result<&AnswerValue, AnswerRejected> {
        let q = self.writable_question(question)?;
        let value = match q.kind() {
            QuestionKind::McqSingle { .. } => AnswerValue::McqSingle(option),
            QuestionKind::McqMultiple { .. } => {
                AnswerValue::toggled(self.answers.get(&question).map(|a| &a.value), option)
            }
            QuestionKind::TrueFalse | QuestionKind::Numerical | QuestionKind::Essay => {
                return Err(AnswerRejected::TypeMismatch {
                    question,
                    expected: q.question_type(),
                    got: QuestionType::McqSingle,
                });
            }
        };
        self.record_answer(question, value, at)?;
        self.answers
            .get(&question)
            .map(|a| &a.value)
            .ok_or(AnswerRejected::UnknownQuestion(question))
    }

    /// Free-text entry for numerical and essay questions.
    ///
    /// # Errors
    ///
    /// Returns `AnswerRejected` as for `record_answer`.
    pub fn set_text(
        &mut self,
        question: QuestionId,
        text: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), AnswerRejected> {
        let q = self.writable_question(question)?;
        let value = match q.question_type() {
            QuestionType::Numerical => AnswerValue::Numerical(text.into()),
            QuestionType::Essay => AnswerValue::Essay(text.into()),
            expected => {
                return Err(AnswerRejected::TypeMismatch {
                    question,
                    expected,
                    got: QuestionType::Essay,
                });
            }
        };
        self.record_answer(question, value, at)
    }

    #[must_use]
    pub fn answer(&self, question: QuestionId) -> Option<&Answer> {
        self.answers.get(&question)
    }

    /// Recorded answers in presentation order.
    #[must_use]
    pub fn answers_in_order(&self) -> Vec<Answer> {
        self.question_order()
            .filter_map(|id| self.answers.get(&id).cloned())
            .collect()
    }

    //
    // ── navigation ───────────────────────────────────────────────────────────
    //

    fn mark_shown(&mut self, at: DateTime<Utc>) {
        if let Some(id) = self.current_question().map(Question::id) {
            self.first_shown.entry(id).or_insert(at);
        }
    }

    /// Move to `index` within `section` (the active section when `None`).
    ///
    /// # Errors
    ///
    /// Returns `NavigationError` for locked or inactive sections and
    /// out-of-range indexes. The navigator is unchanged on error.
    pub fn navigate(
        &mut self,
        section: Option<SectionId>,
        index: usize,
        at: DateTime<Utc>,
    ) -> Result<NavigatorState, NavigationError> {
        let active = self
            .sections
            .active()
            .ok_or(NavigationError::NoActiveSection)?;
        let target_id = section.unwrap_or(active.id());
        let target = self
            .sections
            .get(target_id)
            .ok_or(NavigationError::UnknownSection(target_id))?;
        if target.is_locked() {
            return Err(NavigationError::SectionLocked(target_id));
        }
        if target_id != active.id() {
            return Err(NavigationError::SectionNotActive(target_id));
        }
        if index >= target.len() {
            return Err(NavigationError::IndexOutOfRange {
                section: target_id,
                index,
                len: target.len(),
            });
        }

        let state = NavigatorState {
            section: target_id,
            index,
        };
        self.navigator = Some(state);
        self.mark_shown(at);
        Ok(state)
    }

    /// Step to the next question of the active section.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::IndexOutOfRange` at the last question.
    pub fn next(&mut self, at: DateTime<Utc>) -> Result<NavigatorState, NavigationError> {
        let nav = self.navigator.ok_or(NavigationError::NoActiveSection)?;
        self.navigate(Some(nav.section), nav.index + 1, at)
    }

    /// Step to the previous question of the active section.
    ///
    /// # Errors
    ///
    /// Returns `NavigationError::IndexOutOfRange` at the first question.
    pub fn previous(&mut self, at: DateTime<Utc>) -> Result<NavigatorState, NavigationError> {
        let nav = self.navigator.ok_or(NavigationError::NoActiveSection)?;
        let Some(index) = nav.index.checked_sub(1) else {
            return Err(NavigationError::IndexOutOfRange {
                section: nav.section,
                index: 0,
                len: self.sections.get(nav.section).map_or(0, Section::len),
            });
        };
        self.navigate(Some(nav.section), index, at)
    }

    //
    // ── sections ─────────────────────────────────────────────────────────────
    //

    /// Lock `section` and move the navigator to the start of the next one.
    ///
    /// # Errors
    ///
    /// Propagates `SectionError` from the section manager.
    pub fn finish_section(
        &mut self,
        section: SectionId,
        at: DateTime<Utc>,
    ) -> Result<SectionAdvance, SectionError> {
        let advance = self.sections.finish(section, at)?;
        match advance {
            SectionAdvance::Next(next) => {
                self.navigator = Some(NavigatorState::start_of(next));
                self.mark_shown(at);
            }
            SectionAdvance::Exhausted => self.navigator = None,
            SectionAdvance::AlreadyLocked => {}
        }
        Ok(advance)
    }

    //
    // ── practice check ───────────────────────────────────────────────────────
    //

    /// Reveal correctness and explanation for an answered practice question.
    ///
    /// Checking again returns the stored outcome with `first_check = false`.
    /// A checked question no longer accepts answers.
    ///
    /// # Errors
    ///
    /// Returns `CheckError::NotPractice` for exam attempts, `UnknownQuestion`,
    /// or `Unanswered` when nothing has been recorded.
    pub fn check(
        &mut self,
        question: QuestionId,
        at: DateTime<Utc>,
    ) -> Result<CheckOutcome, CheckError> {
        if self.mode != SessionMode::Practice {
            return Err(CheckError::NotPractice);
        }
        if let Some(previous) = self.checks.get(&question) {
            let mut outcome = previous.clone();
            outcome.first_check = false;
            return Ok(outcome);
        }
        let q = self
            .questions
            .get(&question)
            .ok_or(CheckError::UnknownQuestion(question))?;
        let answer = self
            .answers
            .get(&question)
            .filter(|a| !a.value.is_blank())
            .ok_or(CheckError::Unanswered(question))?;

        let shown_at = self
            .first_shown
            .get(&question)
            .copied()
            .unwrap_or(self.started_at);
        let spent = (at - shown_at).num_seconds().max(0);

        let outcome = CheckOutcome {
            question_id: question,
            value: answer.value.clone(),
            correct: q.grade(&answer.value),
            key: q.sealed_key().map(|k| k.key().clone()),
            explanation: q
                .sealed_key()
                .and_then(|k| k.explanation())
                .map(str::to_owned),
            time_spent_seconds: u32::try_from(spent).unwrap_or(u32::MAX),
            first_check: true,
        };
        self.checks.insert(question, outcome.clone());
        Ok(outcome)
    }

    #[must_use]
    pub fn is_checked(&self, question: QuestionId) -> bool {
        self.checks.contains_key(&question)
    }

    //
    // ── aggregation ──────────────────────────────────────────────────────────
    //

    fn outcome_of(&self, id: QuestionId) -> QuestionOutcome {
        let Some(answer) = self.answers.get(&id).filter(|a| !a.value.is_blank()) else {
            return QuestionOutcome::Skipped;
        };
        if self.mode == SessionMode::Exam {
            return QuestionOutcome::Pending;
        }
        match self.questions.get(&id).and_then(|q| q.grade(&answer.value)) {
            Some(true) => QuestionOutcome::Correct,
            Some(false) => QuestionOutcome::Wrong,
            None => QuestionOutcome::Pending,
        }
    }

    /// Aggregate counts over the whole question set.
    ///
    /// # Errors
    ///
    /// Returns `TallyError` only if the question count overflows `u32`.
    pub fn tally(&self) -> Result<Tally, TallyError> {
        Tally::from_outcomes(self.question_order().map(|id| self.outcome_of(id)))
    }

    //
    // ── views ────────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn view(&self, id: QuestionId) -> Option<QuestionView> {
        let question = self.questions.get(&id)?;
        let section = self.sections.section_of(id)?;
        let answer = self.answers.get(&id).map(|a| a.value.clone());
        Some(QuestionView {
            id,
            section: section.id(),
            question_type: question.question_type(),
            prompt: question.prompt().to_owned(),
            media: question.media().map(str::to_owned),
            options: question.options().to_vec(),
            marks: question.marks(),
            word_count: answer.as_ref().and_then(AnswerValue::word_count),
            answer,
            checked: self.checks.get(&id).cloned(),
        })
    }

    /// Ids of questions with a non-blank answer.
    #[must_use]
    pub fn answered_ids(&self) -> HashSet<QuestionId> {
        self.answers
            .values()
            .filter(|a| !a.value.is_blank())
            .map(|a| a.question_id)
            .collect()
    }
}

impl fmt::Debug for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attempt")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("target", &self.target)
            .field("questions_len", &self.questions.len())
            .field("answers_len", &self.answers.len())
            .field("navigator", &self.navigator)
            .field("late", &self.late)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::question::SealedKey;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn mcq(id: u64, correct: u64) -> Question {
        Question::new(
            QuestionId::new(id),
            QuestionKind::McqSingle {
                options: (1..=3)
                    .map(|o| ChoiceOption::new(OptionId::new(o), format!("opt {o}")))
                    .collect(),
            },
            format!("Question {id}"),
            1,
        )
        .unwrap()
        .with_key(SealedKey::new(
            AnswerKey::McqSingle {
                option: OptionId::new(correct),
            },
            Some(format!("because {correct}")),
        ))
        .unwrap()
    }

    fn setup(mode: SessionMode, sections: Vec<SectionSpec>) -> AttemptSetup {
        AttemptSetup {
            session_id: SessionId::new(1),
            user_id: UserId::new(7),
            mode,
            target: TargetRef::Exam(3),
            started_at: fixed_now(),
            overall_time_limit_seconds: Some(120),
            allow_continue_after_time_up: false,
            sections,
        }
    }

    fn two_section_exam() -> Attempt {
        Attempt::new(setup(
            SessionMode::Exam,
            vec![
                SectionSpec::new(SectionId::new(1), "A", 1)
                    .with_time_limit(60)
                    .with_questions(vec![mcq(1, 1), mcq(2, 2)]),
                SectionSpec::new(SectionId::new(2), "B", 2).with_questions(vec![mcq(3, 3)]),
            ],
        ))
        .unwrap()
    }

    #[test]
    fn empty_question_set_is_rejected() {
        let err = Attempt::new(setup(
            SessionMode::Exam,
            vec![SectionSpec::new(SectionId::new(1), "A", 1)],
        ))
        .unwrap_err();
        assert_eq!(err, AttemptError::NoQuestions);
    }

    #[test]
    fn exam_questions_never_hold_keys() {
        let attempt = two_section_exam();
        assert!(attempt.question_order().all(|id| !attempt.question(id).unwrap().has_key()));
        assert_eq!(attempt.overall_deadline(), Some(fixed_now() + Duration::seconds(120)));
    }

    #[test]
    fn practice_collapses_into_one_unlimited_section() {
        let attempt = Attempt::new(setup(
            SessionMode::Practice,
            vec![
                SectionSpec::new(SectionId::new(1), "A", 1)
                    .with_time_limit(30)
                    .with_questions(vec![mcq(1, 1)]),
                SectionSpec::new(SectionId::new(2), "B", 2).with_questions(vec![mcq(2, 1)]),
            ],
        ))
        .unwrap();
        let sections = attempt.sections().sections();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].time_limit_seconds(), None);
        assert_eq!(sections[0].len(), 2);
    }

    #[test]
    fn record_then_read_returns_value() {
        let mut attempt = two_section_exam();
        let value = AnswerValue::McqSingle(OptionId::new(2));
        attempt
            .record_answer(QuestionId::new(1), value.clone(), fixed_now())
            .unwrap();
        assert_eq!(attempt.answer(QuestionId::new(1)).unwrap().value, value);

        // Last write wins.
        let value = AnswerValue::McqSingle(OptionId::new(3));
        attempt
            .record_answer(QuestionId::new(1), value.clone(), fixed_now())
            .unwrap();
        assert_eq!(attempt.answer(QuestionId::new(1)).unwrap().value, value);
    }

    #[test]
    fn mismatched_value_leaves_answer_untouched() {
        let mut attempt = two_section_exam();
        let err = attempt
            .record_answer(QuestionId::new(1), AnswerValue::TrueFalse(true), fixed_now())
            .unwrap_err();
        assert!(matches!(err, AnswerRejected::TypeMismatch { .. }));
        assert!(attempt.answer(QuestionId::new(1)).is_none());
    }

    #[test]
    fn locked_section_rejects_answers() {
        let mut attempt = two_section_exam();
        attempt.finish_section(SectionId::new(1), fixed_now()).unwrap();
        let err = attempt
            .select_option(QuestionId::new(1), OptionId::new(1), fixed_now())
            .unwrap_err();
        assert_eq!(err, AnswerRejected::SectionLocked(SectionId::new(1)));
        assert_eq!(
            attempt.navigator(),
            Some(NavigatorState::start_of(SectionId::new(2)))
        );
    }

    #[test]
    fn future_section_rejects_answers() {
        let mut attempt = two_section_exam();
        let err = attempt
            .select_option(QuestionId::new(3), OptionId::new(1), fixed_now())
            .unwrap_err();
        assert_eq!(err, AnswerRejected::SectionNotActive(SectionId::new(2)));
    }

    #[test]
    fn navigation_stays_in_active_section() {
        let mut attempt = two_section_exam();
        let now = fixed_now();
        assert_eq!(attempt.next(now).unwrap().index, 1);
        assert!(matches!(
            attempt.next(now).unwrap_err(),
            NavigationError::IndexOutOfRange { index: 2, .. }
        ));
        assert!(matches!(
            attempt.navigate(Some(SectionId::new(2)), 0, now).unwrap_err(),
            NavigationError::SectionNotActive(_)
        ));
        assert_eq!(attempt.previous(now).unwrap().index, 0);
        assert!(attempt.previous(now).is_err());

        attempt.finish_section(SectionId::new(1), now).unwrap();
        assert!(matches!(
            attempt.navigate(Some(SectionId::new(1)), 0, now).unwrap_err(),
            NavigationError::SectionLocked(_)
        ));
    }

    #[test]
    fn exam_cannot_check_and_tallies_as_pending() {
        let mut attempt = two_section_exam();
        attempt
            .select_option(QuestionId::new(1), OptionId::new(1), fixed_now())
            .unwrap();
        assert_eq!(
            attempt.check(QuestionId::new(1), fixed_now()).unwrap_err(),
            CheckError::NotPractice
        );
        let tally = attempt.tally().unwrap();
        assert_eq!(tally.pending(), 1);
        assert_eq!(tally.skipped(), 2);
        assert_eq!(tally.correct() + tally.wrong(), 0);
    }

    #[test]
    fn practice_check_reveals_only_after_check() {
        let mut attempt = Attempt::new(setup(
            SessionMode::Practice,
            vec![SectionSpec::new(SectionId::new(1), "P", 1).with_questions(vec![mcq(1, 2)])],
        ))
        .unwrap();
        let q = QuestionId::new(1);
        attempt.select_option(q, OptionId::new(2), fixed_now()).unwrap();
        assert!(attempt.view(q).unwrap().checked.is_none());

        let later = fixed_now() + Duration::seconds(12);
        let outcome = attempt.check(q, later).unwrap();
        assert_eq!(outcome.correct, Some(true));
        assert_eq!(outcome.explanation.as_deref(), Some("because 2"));
        assert_eq!(outcome.time_spent_seconds, 12);
        assert!(outcome.first_check);

        let again = attempt.check(q, later).unwrap();
        assert!(!again.first_check);
        assert_eq!(
            attempt.select_option(q, OptionId::new(1), later).unwrap_err(),
            AnswerRejected::AlreadyChecked(q)
        );
        assert!(attempt.view(q).unwrap().checked.is_some());
    }

    #[test]
    fn unanswered_question_cannot_be_checked() {
        let mut attempt = Attempt::new(setup(
            SessionMode::Practice,
            vec![SectionSpec::new(SectionId::new(1), "P", 1).with_questions(vec![mcq(1, 2)])],
        ))
        .unwrap();
        assert_eq!(
            attempt.check(QuestionId::new(1), fixed_now()).unwrap_err(),
            CheckError::Unanswered(QuestionId::new(1))
        );
    }

    #[test]
    fn multiple_choice_toggles_and_text_questions_take_text() {
        let multi = Question::new(
            QuestionId::new(10),
            QuestionKind::McqMultiple {
                options: (1..=3)
                    .map(|o| ChoiceOption::new(OptionId::new(o), "o"))
                    .collect(),
            },
            "Pick any",
            1,
        )
        .unwrap();
        let essay = Question::new(QuestionId::new(11), QuestionKind::Essay, "Discuss", 5).unwrap();
        let mut attempt = Attempt::new(setup(
            SessionMode::Exam,
            vec![SectionSpec::new(SectionId::new(1), "A", 1).with_questions(vec![multi, essay])],
        ))
        .unwrap();
        let now = fixed_now();

        attempt.select_option(QuestionId::new(10), OptionId::new(1), now).unwrap();
        attempt.select_option(QuestionId::new(10), OptionId::new(3), now).unwrap();
        let value = attempt
            .select_option(QuestionId::new(10), OptionId::new(1), now)
            .unwrap()
            .clone();
        assert_eq!(value, AnswerValue::McqMultiple([OptionId::new(3)].into()));

        attempt.set_text(QuestionId::new(11), "two words", now).unwrap();
        assert_eq!(attempt.view(QuestionId::new(11)).unwrap().word_count, Some(2));
        assert!(matches!(
            attempt.set_text(QuestionId::new(10), "text", now).unwrap_err(),
            AnswerRejected::TypeMismatch { .. }
        ));
    }
}
