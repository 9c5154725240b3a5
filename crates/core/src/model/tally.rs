use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::SessionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TallyError {
    #[error("total ({total}) does not match answered + skipped ({sum})")]
    CountMismatch { total: u32, sum: u32 },

    #[error("too many questions for a single attempt: {len}")]
    TooManyQuestions { len: usize },
}

/// Aggregate outcome counts for an attempt.
///
/// `pending` counts answered questions whose correctness is decided by the
/// scoring service rather than locally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    total: u32,
    answered: u32,
    correct: u32,
    wrong: u32,
    skipped: u32,
    pending: u32,
}

impl Tally {
    /// Rehydrate a tally from stored or received counts.
    ///
    /// # Errors
    ///
    /// Returns `TallyError` if the counts do not add up.
    pub fn from_counts(
        total: u32,
        correct: u32,
        wrong: u32,
        skipped: u32,
        pending: u32,
    ) -> Result<Self, TallyError> {
        let answered = correct.saturating_add(wrong).saturating_add(pending);
        let sum = answered.saturating_add(skipped);
        if sum != total {
            return Err(TallyError::CountMismatch { total, sum });
        }
        Ok(Self {
            total,
            answered,
            correct,
            wrong,
            skipped,
            pending,
        })
    }

    /// Build a tally from one outcome per question.
    ///
    /// # Errors
    ///
    /// Returns `TallyError::TooManyQuestions` if the count cannot fit in `u32`.
    pub fn from_outcomes<I>(outcomes: I) -> Result<Self, TallyError>
    where
        I: IntoIterator<Item = QuestionOutcome>,
    {
        let mut correct = 0_u32;
        let mut wrong = 0_u32;
        let mut skipped = 0_u32;
        let mut pending = 0_u32;
        let mut len = 0_usize;

        for outcome in outcomes {
            len += 1;
            match outcome {
                QuestionOutcome::Correct => correct = correct.saturating_add(1),
                QuestionOutcome::Wrong => wrong = wrong.saturating_add(1),
                QuestionOutcome::Skipped => skipped = skipped.saturating_add(1),
                QuestionOutcome::Pending => pending = pending.saturating_add(1),
            }
        }

        let total = u32::try_from(len).map_err(|_| TallyError::TooManyQuestions { len })?;
        Self::from_counts(total, correct, wrong, skipped, pending)
    }

    #[must_use]
    pub fn total(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub fn answered(&self) -> u32 {
        self.answered
    }

    #[must_use]
    pub fn correct(&self) -> u32 {
        self.correct
    }

    #[must_use]
    pub fn wrong(&self) -> u32 {
        self.wrong
    }

    #[must_use]
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    #[must_use]
    pub fn pending(&self) -> u32 {
        self.pending
    }
}

/// How a single question counts towards the tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionOutcome {
    Correct,
    Wrong,
    Skipped,
    Pending,
}

/// Why finalization was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeReason {
    /// The learner submitted explicitly.
    Manual,
    /// The last section was finished.
    Auto,
    /// The overall clock ran out.
    TimeUp,
}

/// Results payload handed to the UI once an attempt is completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResults {
    pub session_id: SessionId,
    pub tally: Tally,
    pub elapsed_seconds: u64,
    pub late: bool,
    pub reason: FinalizeReason,
    pub completed_at: DateTime<Utc>,
    /// Score reported by the scoring service, when it computes one.
    pub score: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_outcomes() {
        let tally = Tally::from_outcomes([
            QuestionOutcome::Correct,
            QuestionOutcome::Wrong,
            QuestionOutcome::Correct,
            QuestionOutcome::Skipped,
            QuestionOutcome::Pending,
        ])
        .unwrap();

        assert_eq!(tally.total(), 5);
        assert_eq!(tally.answered(), 4);
        assert_eq!(tally.correct(), 2);
        assert_eq!(tally.wrong(), 1);
        assert_eq!(tally.skipped(), 1);
        assert_eq!(tally.pending(), 1);
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let err = Tally::from_counts(5, 2, 1, 1, 0).unwrap_err();
        assert_eq!(err, TallyError::CountMismatch { total: 5, sum: 4 });
    }
}
