use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parsing an ID from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            #[must_use]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the underlying u64 value
            #[must_use]
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name::new)
                    .map_err(|_| ParseIdError {
                        kind: stringify!($name),
                    })
            }
        }
    };
}

numeric_id!(
    /// Identifier assigned to an attempt by the persistence service.
    SessionId
);
numeric_id!(
    /// Unique identifier for a question.
    QuestionId
);
numeric_id!(
    /// Unique identifier for an exam section.
    SectionId
);
numeric_id!(
    /// Identifier of a selectable option within a choice question.
    OptionId
);
numeric_id!(
    /// Identifier of the learner taking the attempt.
    UserId
);

/// What an attempt is taken against: a practice subtopic or a published exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Subtopic(u64),
    Exam(u64),
}

impl TargetRef {
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            TargetRef::Subtopic(id) | TargetRef::Exam(id) => *id,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetRef::Subtopic(id) => write!(f, "subtopic:{id}"),
            TargetRef::Exam(id) => write!(f, "exam:{id}"),
        }
    }
}

impl FromStr for TargetRef {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = ParseIdError { kind: "TargetRef" };
        let (kind, raw) = s.split_once(':').ok_or(err.clone())?;
        let id = raw.trim().parse::<u64>().map_err(|_| err.clone())?;
        match kind.trim() {
            "subtopic" => Ok(TargetRef::Subtopic(id)),
            "exam" => Ok(TargetRef::Exam(id)),
            _ => Err(err),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_id_display_and_parse() {
        let id = QuestionId::new(42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<QuestionId>().unwrap(), id);
        assert_eq!(format!("{id:?}"), "QuestionId(42)");
    }

    #[test]
    fn invalid_id_is_rejected() {
        let err = "nope".parse::<SectionId>().unwrap_err();
        assert_eq!(err.to_string(), "failed to parse SectionId from string");
    }

    #[test]
    fn target_ref_parses_both_kinds() {
        assert_eq!("exam:7".parse::<TargetRef>().unwrap(), TargetRef::Exam(7));
        assert_eq!(
            "subtopic:3".parse::<TargetRef>().unwrap(),
            TargetRef::Subtopic(3)
        );
        assert!("chapter:3".parse::<TargetRef>().is_err());
        assert_eq!(TargetRef::Exam(7).to_string(), "exam:7");
    }

    #[test]
    fn ids_serialize_as_plain_numbers() {
        let json = serde_json::to_string(&OptionId::new(5)).unwrap();
        assert_eq!(json, "5");
    }
}
