use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::SectionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NavigationError {
    #[error("no section is active")]
    NoActiveSection,

    #[error("unknown section {0}")]
    UnknownSection(SectionId),

    #[error("section {0} is locked")]
    SectionLocked(SectionId),

    #[error("section {0} is not the active section")]
    SectionNotActive(SectionId),

    #[error("question index {index} is out of range for section {section} ({len} questions)")]
    IndexOutOfRange {
        section: SectionId,
        index: usize,
        len: usize,
    },
}

/// Where the learner currently is.
///
/// Always points into the active section at an in-range index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigatorState {
    pub section: SectionId,
    pub index: usize,
}

impl NavigatorState {
    #[must_use]
    pub fn start_of(section: SectionId) -> Self {
        Self { section, index: 0 }
    }
}
