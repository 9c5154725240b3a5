use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;

use crate::model::ids::{QuestionId, SectionId};
use crate::model::question::Question;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SectionError {
    #[error("an attempt needs at least one section")]
    NoSections,

    #[error("section {0} has no questions")]
    EmptySection(SectionId),

    #[error("section {0} appears more than once")]
    DuplicateSection(SectionId),

    #[error("unknown section {0}")]
    UnknownSection(SectionId),

    #[error("section {section} cannot be finished while {active:?} is active")]
    NotActive {
        section: SectionId,
        active: Option<SectionId>,
    },
}

//
// ─── SECTION SPEC ──────────────────────────────────────────────────────────────
//

/// A section as delivered by the question source, questions included.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionSpec {
    pub id: SectionId,
    pub name: String,
    pub ordinal: u32,
    pub time_limit_seconds: Option<u32>,
    pub questions: Vec<Question>,
}

impl SectionSpec {
    #[must_use]
    pub fn new(id: SectionId, name: impl Into<String>, ordinal: u32) -> Self {
        Self {
            id,
            name: name.into(),
            ordinal,
            time_limit_seconds: None,
            questions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_time_limit(mut self, seconds: u32) -> Self {
        self.time_limit_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_questions(mut self, questions: Vec<Question>) -> Self {
        self.questions = questions;
        self
    }
}

//
// ─── SECTION ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    id: SectionId,
    name: String,
    ordinal: u32,
    time_limit_seconds: Option<u32>,
    locked: bool,
    completed_at: Option<DateTime<Utc>>,
    question_ids: Vec<QuestionId>,
}

impl Section {
    #[must_use]
    pub fn new(
        id: SectionId,
        name: impl Into<String>,
        ordinal: u32,
        time_limit_seconds: Option<u32>,
        question_ids: Vec<QuestionId>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            ordinal,
            time_limit_seconds,
            locked: false,
            completed_at: None,
            question_ids,
        }
    }

    #[must_use]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    #[must_use]
    pub fn time_limit_seconds(&self) -> Option<u32> {
        self.time_limit_seconds
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.question_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.question_ids.is_empty()
    }

    #[must_use]
    pub fn contains(&self, question: QuestionId) -> bool {
        self.question_ids.contains(&question)
    }

    // One way only: there is no unlock.
    fn lock(&mut self, at: DateTime<Utc>) {
        if !self.locked {
            self.locked = true;
            self.completed_at = Some(at);
        }
    }
}

//
// ─── SECTION MANAGER ───────────────────────────────────────────────────────────
//

/// Result of finishing a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SectionAdvance {
    /// The section was locked and the next one is now active.
    Next(SectionId),
    /// The section was locked and none remain unlocked.
    Exhausted,
    /// The section had already been locked; nothing changed.
    AlreadyLocked,
}

/// Ordered, one-way-lockable partition of an attempt's questions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionManager {
    sections: Vec<Section>,
    active: Option<usize>,
}

impl SectionManager {
    /// Order sections by ordinal and activate the first.
    ///
    /// # Errors
    ///
    /// Returns `SectionError` when there are no sections, a section is empty,
    /// or a section id repeats.
    pub fn new(mut sections: Vec<Section>) -> Result<Self, SectionError> {
        if sections.is_empty() {
            return Err(SectionError::NoSections);
        }
        let mut seen = HashSet::with_capacity(sections.len());
        for section in &sections {
            if !seen.insert(section.id) {
                return Err(SectionError::DuplicateSection(section.id));
            }
            if section.is_empty() {
                return Err(SectionError::EmptySection(section.id));
            }
        }
        sections.sort_by_key(|s| s.ordinal);
        Ok(Self {
            sections,
            active: Some(0),
        })
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn get(&self, id: SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.id == id)
    }

    #[must_use]
    pub fn active(&self) -> Option<&Section> {
        self.active.and_then(|i| self.sections.get(i))
    }

    #[must_use]
    pub fn active_id(&self) -> Option<SectionId> {
        self.active().map(Section::id)
    }

    #[must_use]
    pub fn section_of(&self, question: QuestionId) -> Option<&Section> {
        self.sections.iter().find(|s| s.contains(question))
    }

    #[must_use]
    pub fn unlocked_count(&self) -> usize {
        self.sections.iter().filter(|s| !s.locked).count()
    }

    /// Lock `id`, stamp it, and activate the next unlocked section.
    ///
    /// # Errors
    ///
    /// Returns `SectionError::UnknownSection` for an id not in this attempt,
    /// or `SectionError::NotActive` when a later section is named before its turn.
    pub fn finish(
        &mut self,
        id: SectionId,
        at: DateTime<Utc>,
    ) -> Result<SectionAdvance, SectionError> {
        let index = self
            .sections
            .iter()
            .position(|s| s.id == id)
            .ok_or(SectionError::UnknownSection(id))?;

        if self.sections[index].locked {
            return Ok(SectionAdvance::AlreadyLocked);
        }
        if self.active != Some(index) {
            return Err(SectionError::NotActive {
                section: id,
                active: self.active_id(),
            });
        }

        self.sections[index].lock(at);
        self.active = self
            .sections
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, s)| !s.locked)
            .map(|(i, _)| i);

        Ok(match self.active_id() {
            Some(next) => SectionAdvance::Next(next),
            None => SectionAdvance::Exhausted,
        })
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn section(id: u64, ordinal: u32, questions: &[u64]) -> Section {
        Section::new(
            SectionId::new(id),
            format!("Section {id}"),
            ordinal,
            None,
            questions.iter().map(|q| QuestionId::new(*q)).collect(),
        )
    }

    #[test]
    fn sections_are_ordered_by_ordinal() {
        let manager =
            SectionManager::new(vec![section(2, 2, &[3]), section(1, 1, &[1, 2])]).unwrap();
        assert_eq!(manager.active_id(), Some(SectionId::new(1)));
        assert_eq!(manager.sections()[1].id(), SectionId::new(2));
    }

    #[test]
    fn finishing_advances_then_exhausts() {
        let now = fixed_now();
        let mut manager =
            SectionManager::new(vec![section(1, 1, &[1]), section(2, 2, &[2])]).unwrap();

        let advance = manager.finish(SectionId::new(1), now).unwrap();
        assert_eq!(advance, SectionAdvance::Next(SectionId::new(2)));
        let first = manager.get(SectionId::new(1)).unwrap();
        assert!(first.is_locked());
        assert_eq!(first.completed_at(), Some(now));

        let advance = manager.finish(SectionId::new(2), now).unwrap();
        assert_eq!(advance, SectionAdvance::Exhausted);
        assert!(manager.active().is_none());
        assert_eq!(manager.unlocked_count(), 0);
    }

    #[test]
    fn finishing_twice_is_a_noop() {
        let now = fixed_now();
        let mut manager =
            SectionManager::new(vec![section(1, 1, &[1]), section(2, 2, &[2])]).unwrap();
        manager.finish(SectionId::new(1), now).unwrap();

        let later = now + chrono::Duration::seconds(5);
        let again = manager.finish(SectionId::new(1), later).unwrap();
        assert_eq!(again, SectionAdvance::AlreadyLocked);
        assert_eq!(manager.get(SectionId::new(1)).unwrap().completed_at(), Some(now));
        assert_eq!(manager.active_id(), Some(SectionId::new(2)));
    }

    #[test]
    fn future_section_cannot_be_finished_early() {
        let mut manager =
            SectionManager::new(vec![section(1, 1, &[1]), section(2, 2, &[2])]).unwrap();
        let err = manager.finish(SectionId::new(2), fixed_now()).unwrap_err();
        assert!(matches!(err, SectionError::NotActive { .. }));
        assert!(!manager.get(SectionId::new(2)).unwrap().is_locked());
    }

    #[test]
    fn invalid_partitions_are_rejected() {
        assert_eq!(SectionManager::new(vec![]).unwrap_err(), SectionError::NoSections);
        assert_eq!(
            SectionManager::new(vec![section(1, 1, &[])]).unwrap_err(),
            SectionError::EmptySection(SectionId::new(1))
        );
        assert_eq!(
            SectionManager::new(vec![section(1, 1, &[1]), section(1, 2, &[2])]).unwrap_err(),
            SectionError::DuplicateSection(SectionId::new(1))
        );
    }
}
