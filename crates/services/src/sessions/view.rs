use exam_core::model::{
    AttemptResults, FinalizeReason, NavigatorState, QuestionView, SectionId, SessionId,
    SessionMode, TargetRef,
};
use serde::Serialize;

use super::controller::{SessionController, SessionStatus};

/// Sidebar entry for one section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionSummaryView {
    pub id: SectionId,
    pub name: String,
    pub ordinal: u32,
    pub time_limit_seconds: Option<u32>,
    pub locked: bool,
    pub active: bool,
    pub question_count: usize,
    pub answered: usize,
}

/// Serializable, client-visible state of a session.
///
/// Correctness references appear only for practice questions that were checked.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub mode: SessionMode,
    pub target: TargetRef,
    pub status: SessionStatus,
    pub late: bool,
    pub navigator: Option<NavigatorState>,
    pub current: Option<QuestionView>,
    /// Questions of the active section, in order.
    pub questions: Vec<QuestionView>,
    pub sections: Vec<SectionSummaryView>,
    pub overall_remaining_seconds: Option<u64>,
    pub section_remaining_seconds: Option<u64>,
    pub answered: usize,
    pub total: usize,
    pub finalize_reason: Option<FinalizeReason>,
    pub results: Option<AttemptResults>,
    pub error: Option<String>,
}

impl SessionController {
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let now = self.clock().now();
        let attempt = self.attempt();
        let sections = attempt.sections();
        let answered_ids = attempt.answered_ids();
        let active = sections.active_id();

        let section_views = sections
            .sections()
            .iter()
            .map(|s| SectionSummaryView {
                id: s.id(),
                name: s.name().to_owned(),
                ordinal: s.ordinal(),
                time_limit_seconds: s.time_limit_seconds(),
                locked: s.is_locked(),
                active: active == Some(s.id()),
                question_count: s.len(),
                answered: s
                    .question_ids()
                    .iter()
                    .filter(|id| answered_ids.contains(id))
                    .count(),
            })
            .collect();

        let questions = sections
            .active()
            .map(|s| {
                s.question_ids()
                    .iter()
                    .filter_map(|id| attempt.view(*id))
                    .collect()
            })
            .unwrap_or_default();

        let timers = self.timers();
        let ticking = self.is_ticking();

        SessionSnapshot {
            session_id: attempt.session_id(),
            mode: attempt.mode(),
            target: attempt.target(),
            status: self.status(),
            late: attempt.is_late(),
            navigator: attempt.navigator(),
            current: attempt
                .current_question()
                .and_then(|q| attempt.view(q.id())),
            questions,
            sections: section_views,
            overall_remaining_seconds: timers.overall_remaining(now).filter(|_| ticking),
            section_remaining_seconds: timers.section_remaining(now).filter(|_| ticking),
            answered: answered_ids.len(),
            total: attempt.question_count(),
            finalize_reason: self.finalize_reason(),
            results: self.results().cloned(),
            error: self.last_error().map(str::to_owned),
        }
    }
}
