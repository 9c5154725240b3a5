mod answer;
mod attempt;
mod ids;
mod navigator;
mod question;
mod section;
mod tally;

pub use ids::{OptionId, ParseIdError, QuestionId, SectionId, SessionId, TargetRef, UserId};

pub use answer::{Answer, AnswerRejected, AnswerValue};
pub use attempt::{
    Attempt, AttemptError, AttemptSetup, CheckError, CheckOutcome, QuestionView, SessionMode,
};
pub use navigator::{NavigationError, NavigatorState};
pub use question::{
    AnswerKey, ChoiceOption, Question, QuestionError, QuestionKind, QuestionType, SealedKey,
};
pub use section::{Section, SectionAdvance, SectionError, SectionManager, SectionSpec};
pub use tally::{AttemptResults, FinalizeReason, QuestionOutcome, Tally, TallyError};
