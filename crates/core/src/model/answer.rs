use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::ids::{OptionId, QuestionId, SectionId};
use crate::model::question::QuestionType;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Non-fatal rejection of an answer write. The attempt is left unchanged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AnswerRejected {
    #[error("answers are not accepted while the session is {status}")]
    NotAccepting { status: &'static str },

    #[error("unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("question {question} expects a {expected} answer, got {got}")]
    TypeMismatch {
        question: QuestionId,
        expected: QuestionType,
        got: QuestionType,
    },

    #[error("question {question} has no option {option}")]
    UnknownOption {
        question: QuestionId,
        option: OptionId,
    },

    #[error("section {0} is locked")]
    SectionLocked(SectionId),

    #[error("section {0} is not the active section")]
    SectionNotActive(SectionId),

    #[error("question {0} was already checked")]
    AlreadyChecked(QuestionId),
}

//
// ─── ANSWER VALUE ──────────────────────────────────────────────────────────────
//

/// Captured value, one variant per question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    McqSingle(OptionId),
    McqMultiple(BTreeSet<OptionId>),
    TrueFalse(bool),
    /// Raw text; numeric parsing is left to scoring.
    Numerical(String),
    Essay(String),
}

impl AnswerValue {
    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerValue::McqSingle(_) => QuestionType::McqSingle,
            AnswerValue::McqMultiple(_) => QuestionType::McqMultiple,
            AnswerValue::TrueFalse(_) => QuestionType::TrueFalse,
            AnswerValue::Numerical(_) => QuestionType::Numerical,
            AnswerValue::Essay(_) => QuestionType::Essay,
        }
    }

    /// An empty selection or whitespace-only text counts as not answered.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            AnswerValue::McqSingle(_) | AnswerValue::TrueFalse(_) => false,
            AnswerValue::McqMultiple(set) => set.is_empty(),
            AnswerValue::Numerical(text) | AnswerValue::Essay(text) => text.trim().is_empty(),
        }
    }

    /// Whitespace-delimited token count for essays. Derived, never stored.
    #[must_use]
    pub fn word_count(&self) -> Option<usize> {
        match self {
            AnswerValue::Essay(text) => Some(text.split_whitespace().count()),
            _ => None,
        }
    }

    /// Returns the multiple-choice selection with `option` toggled.
    ///
    /// `current` is the value already recorded for the question, if any.
    #[must_use]
    pub fn toggled(current: Option<&AnswerValue>, option: OptionId) -> AnswerValue {
        let mut set = match current {
            Some(AnswerValue::McqMultiple(set)) => set.clone(),
            _ => BTreeSet::new(),
        };
        if !set.remove(&option) {
            set.insert(option);
        }
        AnswerValue::McqMultiple(set)
    }
}

//
// ─── ANSWER ────────────────────────────────────────────────────────────────────
//

/// Latest value recorded for a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub value: AnswerValue,
    pub answered_at: DateTime<Utc>,
}

impl Answer {
    #[must_use]
    pub fn new(question_id: QuestionId, value: AnswerValue, answered_at: DateTime<Utc>) -> Self {
        Self {
            question_id,
            value,
            answered_at,
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn essay_word_count_is_whitespace_tokens() {
        let value = AnswerValue::Essay("  the quick\tbrown \n fox ".into());
        assert_eq!(value.word_count(), Some(4));
        assert_eq!(AnswerValue::Numerical("1 2".into()).word_count(), None);
    }

    #[test]
    fn toggling_adds_then_removes() {
        let first = AnswerValue::toggled(None, OptionId::new(2));
        assert_eq!(first, AnswerValue::McqMultiple([OptionId::new(2)].into()));

        let second = AnswerValue::toggled(Some(&first), OptionId::new(3));
        let third = AnswerValue::toggled(Some(&second), OptionId::new(2));
        assert_eq!(third, AnswerValue::McqMultiple([OptionId::new(3)].into()));
    }

    #[test]
    fn blank_values_are_detected() {
        assert!(AnswerValue::Essay("   ".into()).is_blank());
        assert!(AnswerValue::McqMultiple(BTreeSet::new()).is_blank());
        assert!(!AnswerValue::TrueFalse(false).is_blank());
    }

    #[test]
    fn values_serialize_with_type_tag() {
        let json = serde_json::to_value(AnswerValue::TrueFalse(true)).unwrap();
        assert_eq!(json["type"], "true_false");
        assert_eq!(json["value"], true);
    }
}
