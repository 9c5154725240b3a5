#![forbid(unsafe_code)]

pub mod remote;
pub mod repository;
pub mod sqlite;

pub use repository::{
    AttemptRecord, CompletionReceipt, CompletionRequest, InMemoryRepository, QuestionRequest,
    QuestionSet, QuestionSource, ScoringService, Storage, StorageError,
};
