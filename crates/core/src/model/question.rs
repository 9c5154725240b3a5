use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::answer::{AnswerRejected, AnswerValue};
use crate::model::ids::{OptionId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question {0} has an empty prompt")]
    EmptyPrompt(QuestionId),

    #[error("choice question {0} has no options")]
    NoOptions(QuestionId),

    #[error("question {question} lists option {option} more than once")]
    DuplicateOption {
        question: QuestionId,
        option: OptionId,
    },

    #[error("key for question {question} is {key}, expected {expected}")]
    KeyMismatch {
        question: QuestionId,
        expected: QuestionType,
        key: QuestionType,
    },

    #[error("key for question {question} references unknown option {option}")]
    KeyUnknownOption {
        question: QuestionId,
        option: OptionId,
    },

    #[error("unknown question type: {0}")]
    UnknownType(String),
}

//
// ─── QUESTION TYPE TAG ─────────────────────────────────────────────────────────
//

/// The closed set of question variants the engine can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    McqSingle,
    McqMultiple,
    TrueFalse,
    Numerical,
    Essay,
}

impl QuestionType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            QuestionType::McqSingle => "mcq_single",
            QuestionType::McqMultiple => "mcq_multiple",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Numerical => "numerical",
            QuestionType::Essay => "essay",
        }
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuestionType {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mcq_single" => Ok(QuestionType::McqSingle),
            "mcq_multiple" => Ok(QuestionType::McqMultiple),
            "true_false" => Ok(QuestionType::TrueFalse),
            "numerical" => Ok(QuestionType::Numerical),
            "essay" => Ok(QuestionType::Essay),
            other => Err(QuestionError::UnknownType(other.to_owned())),
        }
    }
}

//
// ─── QUESTION KIND ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: OptionId,
    pub label: String,
}

impl ChoiceOption {
    #[must_use]
    pub fn new(id: OptionId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }
}

/// Variant-specific shape of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    McqSingle { options: Vec<ChoiceOption> },
    McqMultiple { options: Vec<ChoiceOption> },
    TrueFalse,
    Numerical,
    Essay,
}

impl QuestionKind {
    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        match self {
            QuestionKind::McqSingle { .. } => QuestionType::McqSingle,
            QuestionKind::McqMultiple { .. } => QuestionType::McqMultiple,
            QuestionKind::TrueFalse => QuestionType::TrueFalse,
            QuestionKind::Numerical => QuestionType::Numerical,
            QuestionKind::Essay => QuestionType::Essay,
        }
    }

    #[must_use]
    pub fn options(&self) -> &[ChoiceOption] {
        match self {
            QuestionKind::McqSingle { options } | QuestionKind::McqMultiple { options } => options,
            QuestionKind::TrueFalse | QuestionKind::Numerical | QuestionKind::Essay => &[],
        }
    }
}

//
// ─── CORRECTNESS REFERENCE ─────────────────────────────────────────────────────
//

/// Correct answer for a question.
///
/// Essays have no automatic key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerKey {
    McqSingle { option: OptionId },
    McqMultiple { options: BTreeSet<OptionId> },
    TrueFalse { value: bool },
    Numerical { value: f64, tolerance: f64 },
}

impl AnswerKey {
    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        match self {
            AnswerKey::McqSingle { .. } => QuestionType::McqSingle,
            AnswerKey::McqMultiple { .. } => QuestionType::McqMultiple,
            AnswerKey::TrueFalse { .. } => QuestionType::TrueFalse,
            AnswerKey::Numerical { .. } => QuestionType::Numerical,
        }
    }

    /// Grades a captured value against this key.
    ///
    /// Numerical answers are parsed here and nowhere earlier; unparsable text
    /// is wrong. A value of a different type is wrong.
    #[must_use]
    pub fn grade(&self, value: &AnswerValue) -> bool {
        match (self, value) {
            (AnswerKey::McqSingle { option }, AnswerValue::McqSingle(chosen)) => option == chosen,
            (AnswerKey::McqMultiple { options }, AnswerValue::McqMultiple(chosen)) => {
                options == chosen
            }
            (AnswerKey::TrueFalse { value }, AnswerValue::TrueFalse(chosen)) => value == chosen,
            (AnswerKey::Numerical { value, tolerance }, AnswerValue::Numerical(raw)) => raw
                .trim()
                .parse::<f64>()
                .is_ok_and(|parsed| (parsed - value).abs() <= tolerance.abs()),
            _ => false,
        }
    }
}

/// A correctness reference that cannot leak into client-visible state.
///
/// It has no serializer and a redacted `Debug`. The only ways to read it are
/// grading inside this crate and the practice-mode check path on `Attempt`.
#[derive(Clone, PartialEq)]
pub struct SealedKey {
    key: AnswerKey,
    explanation: Option<String>,
}

impl SealedKey {
    #[must_use]
    pub fn new(key: AnswerKey, explanation: Option<String>) -> Self {
        Self { key, explanation }
    }

    pub(crate) fn key(&self) -> &AnswerKey {
        &self.key
    }

    pub(crate) fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

impl fmt::Debug for SealedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SealedKey(<sealed>)")
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    id: QuestionId,
    kind: QuestionKind,
    prompt: String,
    media: Option<String>,
    marks: u32,
    key: Option<SealedKey>,
}

impl Question {
    /// Build a question without a correctness reference.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError` if the prompt is blank or choice options are
    /// missing or duplicated.
    pub fn new(
        id: QuestionId,
        kind: QuestionKind,
        prompt: impl Into<String>,
        marks: u32,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt(id));
        }
        if matches!(
            kind,
            QuestionKind::McqSingle { .. } | QuestionKind::McqMultiple { .. }
        ) {
            let options = kind.options();
            if options.is_empty() {
                return Err(QuestionError::NoOptions(id));
            }
            let mut seen = HashSet::with_capacity(options.len());
            for option in options {
                if !seen.insert(option.id) {
                    return Err(QuestionError::DuplicateOption {
                        question: id,
                        option: option.id,
                    });
                }
            }
        }

        Ok(Self {
            id,
            kind,
            prompt,
            media: None,
            marks,
            key: None,
        })
    }

    #[must_use]
    pub fn with_media(mut self, media: impl Into<String>) -> Self {
        self.media = Some(media.into());
        self
    }

    /// Attach a correctness reference.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::KeyMismatch` if the key is for another question
    /// type, or `KeyUnknownOption` if it names an option the question lacks.
    pub fn with_key(mut self, key: SealedKey) -> Result<Self, QuestionError> {
        let expected = self.question_type();
        if key.key.question_type() != expected {
            return Err(QuestionError::KeyMismatch {
                question: self.id,
                expected,
                key: key.key.question_type(),
            });
        }
        let referenced: Vec<OptionId> = match &key.key {
            AnswerKey::McqSingle { option } => vec![*option],
            AnswerKey::McqMultiple { options } => options.iter().copied().collect(),
            AnswerKey::TrueFalse { .. } | AnswerKey::Numerical { .. } => Vec::new(),
        };
        if let Some(option) = referenced.into_iter().find(|o| !self.has_option(*o)) {
            return Err(QuestionError::KeyUnknownOption {
                question: self.id,
                option,
            });
        }
        self.key = Some(key);
        Ok(self)
    }

    /// Drop the correctness reference. Exam attempts only ever hold these.
    #[must_use]
    pub fn without_key(mut self) -> Self {
        self.key = None;
        self
    }

    #[must_use]
    pub fn id(&self) -> QuestionId {
        self.id
    }

    #[must_use]
    pub fn kind(&self) -> &QuestionKind {
        &self.kind
    }

    #[must_use]
    pub fn question_type(&self) -> QuestionType {
        self.kind.question_type()
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn media(&self) -> Option<&str> {
        self.media.as_deref()
    }

    #[must_use]
    pub fn marks(&self) -> u32 {
        self.marks
    }

    #[must_use]
    pub fn options(&self) -> &[ChoiceOption] {
        self.kind.options()
    }

    #[must_use]
    pub fn has_option(&self, option: OptionId) -> bool {
        self.options().iter().any(|o| o.id == option)
    }

    #[must_use]
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    pub(crate) fn sealed_key(&self) -> Option<&SealedKey> {
        self.key.as_ref()
    }

    /// Checks that `value` has this question's shape.
    ///
    /// # Errors
    ///
    /// Returns `AnswerRejected::TypeMismatch` for a value of another type and
    /// `AnswerRejected::UnknownOption` for a choice this question does not offer.
    pub fn validate_answer(&self, value: &AnswerValue) -> Result<(), AnswerRejected> {
        let expected = self.question_type();
        let got = value.question_type();
        if expected != got {
            return Err(AnswerRejected::TypeMismatch {
                question: self.id,
                expected,
                got,
            });
        }
        let chosen: Vec<OptionId> = match value {
            AnswerValue::McqSingle(option) => vec![*option],
            AnswerValue::McqMultiple(options) => options.iter().copied().collect(),
            AnswerValue::TrueFalse(_) | AnswerValue::Numerical(_) | AnswerValue::Essay(_) => {
                Vec::new()
            }
        };
        if let Some(option) = chosen.into_iter().find(|o| !self.has_option(*o)) {
            return Err(AnswerRejected::UnknownOption {
                question: self.id,
                option,
            });
        }
        Ok(())
    }

    /// `Some(correct)` when a key is present and applies, `None` otherwise.
    pub(crate) fn grade(&self, value: &AnswerValue) -> Option<bool> {
        self.key.as_ref().map(|sealed| sealed.key.grade(value))
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn options(ids: &[u64]) -> Vec<ChoiceOption> {
        ids.iter()
            .map(|id| ChoiceOption::new(OptionId::new(*id), format!("option {id}")))
            .collect()
    }

    #[test]
    fn blank_prompt_is_rejected() {
        let err = Question::new(QuestionId::new(1), QuestionKind::Essay, "  ", 1).unwrap_err();
        assert_eq!(err, QuestionError::EmptyPrompt(QuestionId::new(1)));
    }

    #[test]
    fn choice_question_requires_unique_options() {
        let err = Question::new(
            QuestionId::new(1),
            QuestionKind::McqSingle {
                options: options(&[1, 1]),
            },
            "Pick",
            1,
        )
        .unwrap_err();
        assert!(matches!(err, QuestionError::DuplicateOption { .. }));

        let err = Question::new(
            QuestionId::new(2),
            QuestionKind::McqMultiple { options: vec![] },
            "Pick",
            1,
        )
        .unwrap_err();
        assert_eq!(err, QuestionError::NoOptions(QuestionId::new(2)));
    }

    #[test]
    fn key_must_match_question_type() {
        let q = Question::new(QuestionId::new(1), QuestionKind::TrueFalse, "Sky is blue", 1)
            .unwrap();
        let err = q
            .with_key(SealedKey::new(
                AnswerKey::McqSingle {
                    option: OptionId::new(1),
                },
                None,
            ))
            .unwrap_err();
        assert!(matches!(err, QuestionError::KeyMismatch { .. }));
    }

    #[test]
    fn key_must_reference_known_options() {
        let q = Question::new(
            QuestionId::new(1),
            QuestionKind::McqSingle {
                options: options(&[1, 2]),
            },
            "Pick",
            1,
        )
        .unwrap();
        let err = q
            .with_key(SealedKey::new(
                AnswerKey::McqSingle {
                    option: OptionId::new(9),
                },
                None,
            ))
            .unwrap_err();
        assert!(matches!(err, QuestionError::KeyUnknownOption { .. }));
    }

    #[test]
    fn answer_shape_must_match() {
        let q = Question::new(QuestionId::new(3), QuestionKind::Numerical, "2+2?", 1).unwrap();
        assert!(q.validate_answer(&AnswerValue::Numerical("4".into())).is_ok());
        let err = q.validate_answer(&AnswerValue::TrueFalse(true)).unwrap_err();
        assert!(matches!(
            err,
            AnswerRejected::TypeMismatch {
                expected: QuestionType::Numerical,
                got: QuestionType::TrueFalse,
                ..
            }
        ));
    }

    #[test]
    fn choice_answers_must_use_offered_options() {
        let q = Question::new(
            QuestionId::new(4),
            QuestionKind::McqMultiple {
                options: options(&[1, 2, 3]),
            },
            "Pick many",
            2,
        )
        .unwrap();
        let ok = AnswerValue::McqMultiple([OptionId::new(1), OptionId::new(3)].into());
        assert!(q.validate_answer(&ok).is_ok());
        let bad = AnswerValue::McqMultiple([OptionId::new(7)].into());
        assert!(matches!(
            q.validate_answer(&bad).unwrap_err(),
            AnswerRejected::UnknownOption { .. }
        ));
    }

    #[test]
    fn numerical_key_uses_tolerance_and_parses_late() {
        let key = AnswerKey::Numerical {
            value: 2.5,
            tolerance: 0.01,
        };
        assert!(key.grade(&AnswerValue::Numerical(" 2.505 ".into())));
        assert!(!key.grade(&AnswerValue::Numerical("2.6".into())));
        assert!(!key.grade(&AnswerValue::Numerical("pi".into())));
    }

    #[test]
    fn multiple_key_requires_exact_set() {
        let key = AnswerKey::McqMultiple {
            options: [OptionId::new(1), OptionId::new(2)].into(),
        };
        assert!(key.grade(&AnswerValue::McqMultiple(
            [OptionId::new(2), OptionId::new(1)].into()
        )));
        assert!(!key.grade(&AnswerValue::McqMultiple([OptionId::new(1)].into())));
    }

    #[test]
    fn sealed_key_debug_is_redacted() {
        let sealed = SealedKey::new(AnswerKey::TrueFalse { value: true }, Some("because".into()));
        let q = Question::new(QuestionId::new(5), QuestionKind::TrueFalse, "T?", 1)
            .unwrap()
            .with_key(sealed)
            .unwrap();
        let rendered = format!("{q:?}");
        assert!(rendered.contains("<sealed>"));
        assert!(!rendered.contains("because"));
        assert!(!q.clone().without_key().has_key());
    }

    #[test]
    fn question_type_round_trips_through_str() {
        for t in [
            QuestionType::McqSingle,
            QuestionType::McqMultiple,
            QuestionType::TrueFalse,
            QuestionType::Numerical,
            QuestionType::Essay,
        ] {
            assert_eq!(t.as_str().parse::<QuestionType>().unwrap(), t);
        }
        assert!("matching".parse::<QuestionType>().is_err());
    }
}
