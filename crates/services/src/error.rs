//! Shared error types for the services crate.

use thiserror::Error;

use exam_core::model::{
    AnswerRejected, AttemptError, CheckError, NavigationError, SectionError, TallyError,
};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

use crate::sessions::SessionStatus;

/// Why a session could not be started. No controller exists when this is returned.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SetupError {
    #[error("no questions available for this session")]
    EmptyQuestionSet,
    #[error("question source failed: {0}")]
    Source(#[source] StorageError),
    #[error("session record could not be created: {0}")]
    CreateSession(#[source] StorageError),
    #[error(transparent)]
    Attempt(#[from] AttemptError),
}

/// Errors from submitting an attempt.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FinalizeError {
    #[error("completion failed: {0}")]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Tally(#[from] TallyError),
}

/// Errors emitted by session services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Answer(#[from] AnswerRejected),
    #[error(transparent)]
    Navigation(#[from] NavigationError),
    #[error(transparent)]
    Section(#[from] SectionError),
    #[error(transparent)]
    Check(#[from] CheckError),
    #[error(transparent)]
    Finalize(#[from] FinalizeError),
    #[error("{operation} is not allowed while the session is {status}")]
    InvalidState {
        operation: &'static str,
        status: SessionStatus,
    },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
