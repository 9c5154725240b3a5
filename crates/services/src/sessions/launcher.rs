use std::sync::Arc;

use exam_core::model::{Attempt, AttemptSetup, SessionMode, TargetRef, UserId};
use rand::rng;
use rand::seq::SliceRandom;
use storage::repository::{QuestionRequest, QuestionSource, ScoringService, Storage};
use tracing::{info, warn};

use super::controller::SessionController;
use crate::Clock;
use crate::error::{SessionError, SetupError};
use crate::settings::EngineSettings;

/// What to start a session against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub user_id: UserId,
    pub target: TargetRef,
    pub scope_id: Option<u64>,
    pub subject_context: Option<String>,
    /// Forwarded to the scoring service when the session record is created.
    pub context_id: Option<u64>,
    /// Practice sample size; the engine default applies when unset.
    pub question_limit: Option<u32>,
    pub shuffle: bool,
}

impl SessionConfig {
    #[must_use]
    pub fn practice(user_id: UserId, subtopic_id: u64) -> Self {
        Self::new(user_id, TargetRef::Subtopic(subtopic_id))
    }

    #[must_use]
    pub fn exam(user_id: UserId, exam_id: u64) -> Self {
        Self::new(user_id, TargetRef::Exam(exam_id))
    }

    fn new(user_id: UserId, target: TargetRef) -> Self {
        Self {
            user_id,
            target,
            scope_id: None,
            subject_context: None,
            context_id: None,
            question_limit: None,
            shuffle: false,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.question_limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_context(mut self, context_id: u64) -> Self {
        self.context_id = Some(context_id);
        self
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject_context = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    #[must_use]
    pub fn mode(&self) -> SessionMode {
        match self.target {
            TargetRef::Subtopic(_) => SessionMode::Practice,
            TargetRef::Exam(_) => SessionMode::Exam,
        }
    }
}

/// Opens sessions: fetches questions, creates the session record, arms timers.
#[derive(Clone)]
pub struct SessionLauncher {
    clock: Clock,
    questions: Arc<dyn QuestionSource>,
    scoring: Arc<dyn ScoringService>,
    settings: EngineSettings,
}

impl SessionLauncher {
    #[must_use]
    pub fn new(
        clock: Clock,
        questions: Arc<dyn QuestionSource>,
        scoring: Arc<dyn ScoringService>,
    ) -> Self {
        Self {
            clock,
            questions,
            scoring,
            settings: EngineSettings::default(),
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, storage: &Storage) -> Self {
        Self::new(
            clock,
            Arc::clone(&storage.questions),
            Arc::clone(&storage.scoring),
        )
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    /// Start a session. On any failure no controller exists.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Setup` when the question set is empty or
    /// unavailable, or the session record cannot be created.
    pub async fn start_session(
        &self,
        config: &SessionConfig,
    ) -> Result<SessionController, SessionError> {
        let mode = config.mode();
        let limit = match mode {
            SessionMode::Practice => Some(config.question_limit.unwrap_or(self.settings.practice_size)),
            SessionMode::Exam => config.question_limit,
        };
        let request = QuestionRequest {
            target: config.target,
            scope_id: config.scope_id,
            subject_context: config.subject_context.clone(),
            user_id: config.user_id,
            limit,
        };

        let mut set = self
            .questions
            .generate_session_questions(&request)
            .await
            .map_err(|err| {
                warn!(target_ref = %config.target, error = %err, "question fetch failed");
                SetupError::Source(err)
            })?;
        if set.question_count() == 0 {
            warn!(target_ref = %config.target, "empty question set");
            return Err(SetupError::EmptyQuestionSet.into());
        }

        if config.shuffle && mode == SessionMode::Practice {
            let mut rng = rng();
            for section in &mut set.sections {
                section.questions.shuffle(&mut rng);
            }
        }

        let session_id = self
            .scoring
            .create_session(config.user_id, config.target, config.context_id)
            .await
            .map_err(|err| {
                warn!(target_ref = %config.target, error = %err, "session creation failed");
                SetupError::CreateSession(err)
            })?;

        let attempt = Attempt::new(AttemptSetup {
            session_id,
            user_id: config.user_id,
            mode,
            target: config.target,
            started_at: self.clock.now(),
            overall_time_limit_seconds: set.overall_time_limit_seconds,
            allow_continue_after_time_up: set.allow_continue_after_time_up,
            sections: set.sections,
        })
        .map_err(SetupError::from)?;

        info!(
            %session_id,
            trace_id = %attempt.trace_id(),
            %mode,
            target_ref = %config.target,
            questions = attempt.question_count(),
            "session started"
        );

        Ok(SessionController::new(
            attempt,
            self.clock,
            Arc::clone(&self.scoring),
            self.settings,
        ))
    }
}
