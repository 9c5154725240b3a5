use exam_core::model::{AnswerKey, ChoiceOption, OptionId, QuestionKind};
use storage::repository::StorageError;
use storage::sqlite::{ExamRecord, ExamSectionRecord, QuestionRecord, SqliteRepository};
use tracing::info;

fn choice(labels: &[&str]) -> QuestionKind {
    QuestionKind::McqSingle {
        options: labels
            .iter()
            .zip(1_u64..)
            .map(|(label, id)| ChoiceOption::new(OptionId::new(id), *label))
            .collect(),
    }
}

fn question(id: u64, prompt: &str, kind: QuestionKind, key: Option<AnswerKey>) -> QuestionRecord {
    QuestionRecord {
        id,
        subtopic_id: None,
        section_id: None,
        position: 0,
        kind,
        prompt: prompt.to_owned(),
        media: None,
        marks: 1,
        key,
        explanation: None,
    }
}

/// Write a small demo exam and practice subtopic. Re-running overwrites the same rows.
pub async fn seed_demo(
    repo: &SqliteRepository,
    exam_id: u64,
    subtopic_id: u64,
) -> Result<(), StorageError> {
    repo.upsert_exam(&ExamRecord {
        id: exam_id,
        title: "Demo exam".into(),
        overall_time_limit_seconds: Some(600),
        allow_continue_after_time_up: true,
    })
    .await?;

    let sections = [
        (exam_id * 100 + 1, "Arithmetic", 1_u32, Some(240_u32)),
        (exam_id * 100 + 2, "Writing", 2, None),
    ];
    for (id, name, ordinal, limit) in sections {
        repo.upsert_section(&ExamSectionRecord {
            id,
            exam_id,
            name: name.into(),
            ordinal,
            time_limit_seconds: limit,
        })
        .await?;
    }

    let (arith, writing) = (sections[0].0, sections[1].0);
    let exam_questions = vec![
        (
            arith,
            question(
                exam_id * 1000 + 1,
                "What is 7 x 8?",
                choice(&["54", "56", "64"]),
                Some(AnswerKey::McqSingle { option: OptionId::new(2) }),
            ),
        ),
        (
            arith,
            question(
                exam_id * 1000 + 2,
                "Enter the square root of 2 to two decimals.",
                QuestionKind::Numerical,
                Some(AnswerKey::Numerical { value: 1.41, tolerance: 0.005 }),
            ),
        ),
        (
            writing,
            question(
                exam_id * 1000 + 3,
                "Describe one use of prime numbers.",
                QuestionKind::Essay,
                None,
            ),
        ),
    ];
    for (position, (section, mut q)) in (0_u32..).zip(exam_questions) {
        q.section_id = Some(section);
        q.position = position;
        repo.upsert_question(&q).await?;
    }

    let practice = [
        ("Is 17 prime?", true),
        ("Is 21 prime?", false),
        ("Is 2 the only even prime?", true),
    ];
    for (n, (prompt, answer)) in (1_u64..).zip(practice) {
        let mut q = question(
            subtopic_id * 1000 + 500 + n,
            prompt,
            QuestionKind::TrueFalse,
            Some(AnswerKey::TrueFalse { value: answer }),
        );
        q.subtopic_id = Some(subtopic_id);
        q.explanation = Some(if answer { "Yes." } else { "No." }.into());
        repo.upsert_question(&q).await?;
    }
    let mut q = question(
        subtopic_id * 1000 + 600,
        "Which number is prime?",
        choice(&["9", "15", "13"]),
        Some(AnswerKey::McqSingle { option: OptionId::new(3) }),
    );
    q.subtopic_id = Some(subtopic_id);
    q.explanation = Some("13 has no divisors other than 1 and itself.".into());
    repo.upsert_question(&q).await?;

    info!(exam_id, subtopic_id, "demo content seeded");
    Ok(())
}
