use thiserror::Error;

use crate::model::{
    AnswerRejected, AttemptError, CheckError, NavigationError, QuestionError, SectionError,
    TallyError,
};

/// Umbrella error for callers that do not need to branch on the source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Question(#[from] QuestionError),
    #[error(transparent)]
    Answer(#[from] AnswerRejected),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Tally(#[from] TallyError),
}
